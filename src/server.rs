//! # HTTP server
//!
//! Two routes, plus a health probe:
//!
//! - `GET /` serves the form. The exam and section `<select>`s and the
//!   per-section question limits come from the [`ExamCatalog`], rendered once
//!   when the app is built.
//! - `POST /preguntar` takes the multipart form (`texto`, `examen`, `seccion`,
//!   `pregunta`, `image`) and answers with an HTML fragment, or a plain-text
//!   error with a 4xx/5xx status.

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State},
    response::Html,
    routing::{get, post},
};
use reqwest::Client;
use serde_json::{Map, Value as JsonValue};
use std::{error::Error, sync::Arc, time::Duration};
use tracing::{debug, error, info};

use crate::{
    api::{OpenAiEmbedder, OpenAiFormatter, create_client},
    config::{AsesorConfig, Credentials, ExamCatalog},
    error::AsesorError,
    fallback::RandomSummary,
    router::QuestionRouter,
    submission::{Section, Submission},
    template::{FormattingTemplate, load_template},
    vector_store::PineconeIndex,
};

const PAGE_TEMPLATE: &str = include_str!("../templates/index.html");

/// Uploads are photos of exam pages; leave room above axum's 2 MB default.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    router: Arc<QuestionRouter>,
    page: Arc<str>,
}

/// Build the production router: Pinecone, OpenAI and Wikipedia clients wired
/// together from the configuration.
pub async fn connect(
    config: &AsesorConfig,
    credentials: &Credentials,
) -> Result<QuestionRouter, Box<dyn Error>> {
    let http = Client::builder().build()?;

    if let Some(env) = &credentials.pinecone_env {
        info!("Pinecone environment: {env}");
    }
    let index = match &credentials.pinecone_host {
        Some(host) => PineconeIndex::new(http.clone(), host, credentials.pinecone_api_key.clone()),
        None => {
            PineconeIndex::connect(
                http.clone(),
                &credentials.pinecone_controller,
                &credentials.pinecone_index,
                credentials.pinecone_api_key.clone(),
            )
            .await?
        }
    };
    info!("Using Pinecone host {}", index.host());

    let template = match &config.formatter_template {
        Some(path) => load_template(path)?,
        None => FormattingTemplate::default(),
    };

    let openai = create_client(credentials);
    let embedder = OpenAiEmbedder::new(openai.clone(), config);
    let formatter = OpenAiFormatter::new(openai, config.chat_model.clone(), template);
    let reference = RandomSummary::new(
        http,
        config.fallback_url.clone(),
        Duration::from_secs(config.fallback_timeout_secs),
    );

    Ok(QuestionRouter::new(
        config,
        Arc::new(index),
        Arc::new(embedder),
        Arc::new(formatter),
        Arc::new(reference),
    ))
}

/// Fill the form page with the enabled exams, the sections and the question
/// limits.
pub fn render_page(catalog: &ExamCatalog) -> String {
    let exam_options = catalog
        .enabled_exams()
        .map(|exam| format!("        <option value=\"{exam}\">{exam}</option>"))
        .collect::<Vec<_>>()
        .join("\n");

    let section_options = Section::ALL
        .iter()
        .map(|section| format!("        <option value=\"{section}\">{section}</option>"))
        .collect::<Vec<_>>()
        .join("\n");

    let limits: Map<String, JsonValue> = Section::ALL
        .iter()
        .map(|section| {
            (
                section.to_string(),
                JsonValue::from(catalog.question_limit(*section)),
            )
        })
        .collect();

    PAGE_TEMPLATE
        .replace("{{exam_options}}", &exam_options)
        .replace("{{section_options}}", &section_options)
        .replace("{{question_limits}}", &JsonValue::Object(limits).to_string())
}

/// The axum application.
pub fn app(router: Arc<QuestionRouter>) -> Router {
    let page: Arc<str> = render_page(router.catalog()).into();

    Router::new()
        .route("/", get(home))
        .route("/preguntar", post(preguntar))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(AppState { router, page })
}

/// Bind `0.0.0.0:<port>` and serve until the process is stopped.
pub async fn serve(router: QuestionRouter, port: u16) -> Result<(), Box<dyn Error>> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app(Arc::new(router))).await?;
    Ok(())
}

async fn home(State(state): State<AppState>) -> Html<String> {
    Html(state.page.to_string())
}

async fn preguntar(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Html<String>, AsesorError> {
    let submission = read_submission(multipart).await?;
    debug!(
        has_text = submission.free_text.is_some(),
        exam = ?submission.exam,
        section = ?submission.section,
        question = ?submission.question,
        has_image = submission.image.is_some(),
        "Received submission"
    );

    match state.router.answer(&submission).await {
        Ok(answer) => Ok(Html(answer.html_fragment)),
        Err(err) => {
            match &err {
                AsesorError::Validation(message) => info!("Rejected submission: {message}"),
                other => error!("Failed to answer: {other}"),
            }
            Err(err)
        }
    }
}

async fn read_submission(mut multipart: Multipart) -> Result<Submission, AsesorError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        debug!("Malformed multipart body: {e}");
        AsesorError::validation("Formulario no válido.")
    };

    let mut submission = Submission::default();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "texto" => submission.free_text = Some(field.text().await.map_err(malformed)?),
            "examen" => submission.exam = Some(field.text().await.map_err(malformed)?),
            "seccion" => submission.section = Some(field.text().await.map_err(malformed)?),
            "pregunta" => submission.question = Some(field.text().await.map_err(malformed)?),
            "image" => {
                let bytes = field.bytes().await.map_err(malformed)?;
                if !bytes.is_empty() {
                    submission.image = Some(bytes.to_vec());
                }
            }
            other => debug!("Ignoring form field {other}"),
        }
    }
    Ok(submission)
}
