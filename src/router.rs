//! # Question router
//!
//! Decides where the snippets for an answer come from and assembles the HTML
//! fragment sent back to the form. A request runs through five stages in a
//! single pass:
//!
//! ```text
//! validate ─► exact lookup ─► similarity lookup ─► fallback ─► format
//!                 │                  │                 │
//!                 └── first non-empty result wins ─────┘
//! ```
//!
//! - **Exact**: only for a complete exam/section/question selector; a
//!   metadata-filtered query for one record.
//! - **Similarity**: embedding of the free text (or of the image when there is
//!   no text) and a top-K nearest-neighbour query.
//! - **Fallback**: one random encyclopedia summary.
//!
//! Vector-store failures in the first two tiers are logged and treated as "no
//! results". An embedding failure, a failed fallback fetch, or a formatting
//! failure ends the request. Nothing is retried.

use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    api::{AnswerFormatter, Embedder, EmbeddingSource},
    config::{AsesorConfig, ExamCatalog},
    error::{AsesorError, LookupError},
    fallback::ReferenceSource,
    submission::{Inquiry, Submission},
    vector_store::{IndexQuery, VectorIndex},
};

/// A unit of retrieved content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    text: String,
}

impl Snippet {
    pub fn new(text: impl Into<String>) -> Self {
        Snippet { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Which tier produced the snippets of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetSource {
    Exact,
    Similarity,
    Fallback,
}

/// The final fragment plus where its content came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedAnswer {
    pub html_fragment: String,
    pub source: SnippetSource,
}

/// The collaborators and settings a router needs.
pub struct QuestionRouter {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    formatter: Arc<dyn AnswerFormatter>,
    reference: Arc<dyn ReferenceSource>,
    catalog: ExamCatalog,
    top_k: u32,
    dimension: usize,
}

impl QuestionRouter {
    pub fn new(
        config: &AsesorConfig,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        formatter: Arc<dyn AnswerFormatter>,
        reference: Arc<dyn ReferenceSource>,
    ) -> Self {
        QuestionRouter {
            index,
            embedder,
            formatter,
            reference,
            catalog: config.exams.clone(),
            top_k: config.top_k,
            dimension: config.dimension,
        }
    }

    pub fn catalog(&self) -> &ExamCatalog {
        &self.catalog
    }

    /// Answer one submission.
    pub async fn answer(&self, submission: &Submission) -> Result<FormattedAnswer, AsesorError> {
        let inquiry = submission.validate(&self.catalog)?;

        let (snippets, source) = self.retrieve(&inquiry).await?;
        info!(?source, count = snippets.len(), "Collected snippets");

        let formatted = self
            .formatter
            .format(&snippets)
            .await
            .map_err(|e| AsesorError::Formatting(e.to_string()))?;

        Ok(FormattedAnswer {
            html_fragment: compose_fragment(&inquiry, &formatted),
            source,
        })
    }

    async fn retrieve(
        &self,
        inquiry: &Inquiry,
    ) -> Result<(Vec<Snippet>, SnippetSource), AsesorError> {
        match self.exact_lookup(inquiry).await {
            Ok(snippets) => return Ok((snippets, SnippetSource::Exact)),
            Err(err) => log_fallthrough("exact", &err),
        }

        match self.similarity_lookup(inquiry).await? {
            Ok(snippets) => return Ok((snippets, SnippetSource::Similarity)),
            Err(err) => log_fallthrough("similarity", &err),
        }

        let snippet = self.reference.random_snippet().await.map_err(|e| {
            tracing::error!("Fallback fetch failed: {e}");
            AsesorError::ExhaustedFallback
        })?;
        Ok((vec![snippet], SnippetSource::Fallback))
    }

    /// Metadata-filtered lookup of the selected exam question.
    ///
    /// `NotFound` when there is no selector or no record with a snippet.
    pub async fn exact_lookup(&self, inquiry: &Inquiry) -> Result<Vec<Snippet>, LookupError> {
        let Some(selector) = inquiry.selector() else {
            return Err(LookupError::NotFound);
        };

        let matches = self
            .index
            .query(&IndexQuery::filter_only(selector, self.dimension))
            .await?;

        matches
            .first()
            .and_then(|m| m.snippet_text())
            .map(|text| vec![Snippet::new(text)])
            .ok_or(LookupError::NotFound)
    }

    /// Nearest-neighbour lookup of the free text or image.
    ///
    /// The outer `Result` carries embedding failures, which end the request;
    /// the inner one is the tier outcome.
    pub async fn similarity_lookup(
        &self,
        inquiry: &Inquiry,
    ) -> Result<Result<Vec<Snippet>, LookupError>, AsesorError> {
        let source = match (inquiry.text(), inquiry.image()) {
            (Some(text), _) => EmbeddingSource::Text(text),
            (None, Some(image)) => EmbeddingSource::Image(image),
            (None, None) => return Ok(Err(LookupError::NotFound)),
        };

        let vector = self
            .embedder
            .embed(source)
            .await
            .map_err(|e| AsesorError::Embedding(e.to_string()))?;

        let matches = match self
            .index
            .query(&IndexQuery::similar_to(vector, self.top_k))
            .await
        {
            Ok(matches) => matches,
            Err(err) => return Ok(Err(err.into())),
        };

        let snippets: Vec<Snippet> = matches
            .iter()
            .filter_map(|m| m.snippet_text())
            .map(Snippet::new)
            .collect();

        if snippets.is_empty() {
            Ok(Err(LookupError::NotFound))
        } else {
            Ok(Ok(snippets))
        }
    }
}

fn log_fallthrough(tier: &str, err: &LookupError) {
    match err {
        LookupError::NotFound => info!("No {tier} results, falling through"),
        LookupError::Transient(e) => warn!("{tier} lookup failed, falling through: {e}"),
    }
}

/// Escape the characters that matter inside HTML text.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Echo the question fields, then the formatted list and the closing marker.
pub fn compose_fragment(inquiry: &Inquiry, formatted_list: &str) -> String {
    let selector = inquiry.selector();
    let exam = selector.map(|s| s.exam.to_string()).unwrap_or_default();
    let section = selector.map(|s| s.section.to_string()).unwrap_or_default();
    let question = selector.map(|s| s.question.to_string()).unwrap_or_default();
    let text = escape_html(inquiry.text().unwrap_or_default());

    format!(
        "<p><strong>Enunciado:</strong> {text}</p>\
         <p><strong>Examen:</strong> {exam}</p>\
         <p><strong>Sección:</strong> {section}</p>\
         <p><strong>Pregunta nº:</strong> {question}</p>\
         {formatted_list} 🤌"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::submission::{CONFLICT_MESSAGE, EMPTY_MESSAGE, INCOMPLETE_SELECTOR_MESSAGE, Section};
    use crate::vector_store::Match;
    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Fakes with call counters -------------------------------------------------

    #[derive(Default)]
    struct FakeIndex {
        exact: Option<Result<Vec<Match>, u16>>,
        similar: Option<Result<Vec<Match>, u16>>,
        queries: Mutex<Vec<IndexQuery>>,
    }

    impl FakeIndex {
        fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn query(&self, query: &IndexQuery) -> Result<Vec<Match>, UpstreamError> {
            self.queries.lock().unwrap().push(query.clone());
            let outcome = if query.filter.is_some() {
                &self.exact
            } else {
                &self.similar
            };
            match outcome.clone().unwrap_or(Ok(Vec::new())) {
                Ok(matches) => Ok(matches),
                Err(status) => Err(UpstreamError::Status {
                    service: "pinecone",
                    status,
                    body: "down".into(),
                }),
            }
        }
    }

    struct FakeEmbedder {
        calls: AtomicUsize,
        images: AtomicUsize,
        fail: bool,
    }

    impl FakeEmbedder {
        fn new(fail: bool) -> Self {
            FakeEmbedder {
                calls: AtomicUsize::new(0),
                images: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, source: EmbeddingSource<'_>) -> Result<Vec<f32>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if matches!(source, EmbeddingSource::Image(_)) {
                self.images.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail {
                Err(UpstreamError::Empty("embeddings"))
            } else {
                Ok(vec![0.1, 0.2, 0.3])
            }
        }
    }

    /// Wraps every snippet in `<li>\(…\)</li>`, like the real model is asked to.
    struct FakeFormatter {
        received: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl FakeFormatter {
        fn new(fail: bool) -> Self {
            FakeFormatter {
                received: Mutex::new(Vec::new()),
                fail,
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnswerFormatter for FakeFormatter {
        async fn format(&self, snippets: &[Snippet]) -> Result<String, UpstreamError> {
            self.received
                .lock()
                .unwrap()
                .push(snippets.iter().map(|s| s.text().to_string()).collect());
            if self.fail {
                return Err(UpstreamError::Empty("chat completion"));
            }
            let items: String = snippets
                .iter()
                .map(|s| format!("<li>\\({}\\)</li>", s.text()))
                .collect();
            Ok(format!("<ol>{items}</ol>"))
        }
    }

    struct FakeReference {
        calls: AtomicUsize,
        extract: Option<&'static str>,
    }

    #[async_trait]
    impl ReferenceSource for FakeReference {
        async fn random_snippet(&self) -> Result<Snippet, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.extract
                .map(Snippet::new)
                .ok_or(UpstreamError::Empty("wikipedia"))
        }
    }

    struct Harness {
        index: Arc<FakeIndex>,
        embedder: Arc<FakeEmbedder>,
        formatter: Arc<FakeFormatter>,
        reference: Arc<FakeReference>,
        router: QuestionRouter,
    }

    impl Harness {
        fn total_calls(&self) -> usize {
            self.index.calls()
                + self.embedder.calls.load(Ordering::SeqCst)
                + self.formatter.calls().len()
                + self.reference.calls.load(Ordering::SeqCst)
        }
    }

    struct Setup {
        index: FakeIndex,
        embed_fails: bool,
        format_fails: bool,
        extract: Option<&'static str>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Setup {
                index: FakeIndex::default(),
                embed_fails: false,
                format_fails: false,
                extract: Some("Random fact"),
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let config = AsesorConfig {
            dimension: 3,
            ..Default::default()
        };
        let index = Arc::new(setup.index);
        let embedder = Arc::new(FakeEmbedder::new(setup.embed_fails));
        let formatter = Arc::new(FakeFormatter::new(setup.format_fails));
        let reference = Arc::new(FakeReference {
            calls: AtomicUsize::new(0),
            extract: setup.extract,
        });
        let router = QuestionRouter::new(
            &config,
            index.clone(),
            embedder.clone(),
            formatter.clone(),
            reference.clone(),
        );
        Harness {
            index,
            embedder,
            formatter,
            reference,
            router,
        }
    }

    fn hit(metadata: JsonValue) -> Match {
        Match {
            id: "m".into(),
            score: 1.0,
            metadata: metadata.as_object().cloned(),
        }
    }

    fn validation_message(result: Result<FormattedAnswer, AsesorError>) -> String {
        match result {
            Err(AsesorError::Validation(message)) => message,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    // Validation ----------------------------------------------------------------

    #[tokio::test]
    async fn test_conflicting_submission_makes_no_calls() {
        let h = harness(Setup::default());
        let submission = Submission {
            free_text: Some("¿2+2?".into()),
            ..Submission::selector(1, Section::Matematicas, 3)
        };

        let result = h.router.answer(&submission).await;

        assert_eq!(validation_message(result), CONFLICT_MESSAGE);
        assert_eq!(h.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_submission_makes_no_calls() {
        let h = harness(Setup::default());
        let result = h.router.answer(&Submission::default()).await;
        assert_eq!(validation_message(result), EMPTY_MESSAGE);
        assert_eq!(h.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_selector_makes_no_calls() {
        let h = harness(Setup::default());
        let submission = Submission {
            exam: Some("1".into()),
            ..Default::default()
        };
        let result = h.router.answer(&submission).await;
        assert_eq!(validation_message(result), INCOMPLETE_SELECTOR_MESSAGE);
        assert_eq!(h.total_calls(), 0);
    }

    // Tiers ---------------------------------------------------------------------

    #[tokio::test]
    async fn test_exact_match_is_formatted() {
        let h = harness(Setup {
            index: FakeIndex {
                exact: Some(Ok(vec![hit(json!({"text": "2+2=4"}))])),
                ..Default::default()
            },
            ..Default::default()
        });

        let answer = h
            .router
            .answer(&Submission::selector(1, Section::Matematicas, 3))
            .await
            .unwrap();

        assert_eq!(answer.source, SnippetSource::Exact);
        assert!(answer
            .html_fragment
            .contains("<ol><li>\\(2+2=4\\)</li></ol>"));
        assert_eq!(h.formatter.calls(), vec![vec!["2+2=4".to_string()]]);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.reference.calls.load(Ordering::SeqCst), 0);

        let queries = h.index.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].top_k, 1);
        assert_eq!(
            queries[0].filter,
            Some(json!({"exam": 1, "section": "Matemáticas", "question": 3}))
        );
    }

    #[tokio::test]
    async fn test_exact_match_falls_back_to_answer_field() {
        let h = harness(Setup {
            index: FakeIndex {
                exact: Some(Ok(vec![hit(json!({"answer": "x = 3"}))])),
                ..Default::default()
            },
            ..Default::default()
        });
        let answer = h
            .router
            .answer(&Submission::selector(2, Section::Lectura, 10))
            .await
            .unwrap();
        assert_eq!(answer.source, SnippetSource::Exact);
        assert_eq!(h.formatter.calls(), vec![vec!["x = 3".to_string()]]);
    }

    #[tokio::test]
    async fn test_free_text_without_matches_uses_fallback() {
        let h = harness(Setup::default());

        let answer = h
            .router
            .answer(&Submission::text("¿Qué es un número primo?"))
            .await
            .unwrap();

        assert_eq!(answer.source, SnippetSource::Fallback);
        assert_eq!(h.formatter.calls(), vec![vec!["Random fact".to_string()]]);
        assert!(answer
            .html_fragment
            .contains("<ol><li>\\(Random fact\\)</li></ol> 🤌"));
        // only the similarity query ran; there was no selector
        assert_eq!(h.index.calls(), 1);
        assert!(h.index.queries.lock().unwrap()[0].filter.is_none());
    }

    #[tokio::test]
    async fn test_similarity_collects_snippets_and_skips_empty_matches() {
        let h = harness(Setup {
            index: FakeIndex {
                similar: Some(Ok(vec![
                    hit(json!({"text": "primero"})),
                    hit(json!({"exam": 4})),
                    hit(json!({"text": "", "answer": "segundo"})),
                ])),
                ..Default::default()
            },
            ..Default::default()
        });

        let answer = h.router.answer(&Submission::text("suma")).await.unwrap();

        assert_eq!(answer.source, SnippetSource::Similarity);
        assert_eq!(
            h.formatter.calls(),
            vec![vec!["primero".to_string(), "segundo".to_string()]]
        );
        assert_eq!(h.index.queries.lock().unwrap()[0].top_k, 5);
        assert_eq!(h.reference.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_selector_miss_with_image_uses_image_embedding() {
        let h = harness(Setup {
            index: FakeIndex {
                similar: Some(Ok(vec![hit(json!({"text": "de la imagen"}))])),
                ..Default::default()
            },
            ..Default::default()
        });
        let submission = Submission {
            image: Some(vec![1, 2, 3]),
            ..Submission::selector(1, Section::Variable, 2)
        };

        let answer = h.router.answer(&submission).await.unwrap();

        assert_eq!(answer.source, SnippetSource::Similarity);
        assert_eq!(h.embedder.images.load(Ordering::SeqCst), 1);
        assert_eq!(h.index.calls(), 2);
    }

    #[tokio::test]
    async fn test_selector_only_miss_skips_similarity() {
        let h = harness(Setup::default());
        let answer = h
            .router
            .answer(&Submission::selector(1, Section::Lectura, 1))
            .await
            .unwrap();

        assert_eq!(answer.source, SnippetSource::Fallback);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.index.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_distinct_from_not_found() {
        let h = harness(Setup {
            index: FakeIndex {
                exact: Some(Err(503)),
                ..Default::default()
            },
            ..Default::default()
        });
        let inquiry = Submission::selector(1, Section::Lectura, 1)
            .validate(h.router.catalog())
            .unwrap();
        let err = h.router.exact_lookup(&inquiry).await.unwrap_err();
        assert!(matches!(err, LookupError::Transient(_)));

        let empty = harness(Setup::default());
        let err = empty.router.exact_lookup(&inquiry).await.unwrap_err();
        assert!(err.is_not_found());

        // both still reach the fallback
        let answer = h
            .router
            .answer(&Submission::selector(1, Section::Lectura, 1))
            .await
            .unwrap();
        assert_eq!(answer.source, SnippetSource::Fallback);
    }

    #[tokio::test]
    async fn test_similarity_store_failure_falls_through() {
        let h = harness(Setup {
            index: FakeIndex {
                similar: Some(Err(500)),
                ..Default::default()
            },
            ..Default::default()
        });
        let inquiry = Submission::text("hola").validate(h.router.catalog()).unwrap();
        let outcome = h.router.similarity_lookup(&inquiry).await.unwrap();
        assert!(matches!(outcome, Err(LookupError::Transient(_))));

        let answer = h.router.answer(&Submission::text("hola")).await.unwrap();
        assert_eq!(answer.source, SnippetSource::Fallback);
    }

    // Terminal failures ---------------------------------------------------------

    #[tokio::test]
    async fn test_fallback_failure_is_exhausted() {
        let h = harness(Setup {
            extract: None,
            ..Default::default()
        });
        let err = h.router.answer(&Submission::text("hola")).await.unwrap_err();
        assert!(matches!(err, AsesorError::ExhaustedFallback));
        assert_eq!(
            err.to_string(),
            "No hay datos en Pinecone y falló la búsqueda aleatoria."
        );
        assert!(h.formatter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_a_dependency_error() {
        let h = harness(Setup {
            embed_fails: true,
            ..Default::default()
        });
        let err = h.router.answer(&Submission::text("hola")).await.unwrap_err();
        assert!(matches!(err, AsesorError::Embedding(_)));
        assert!(err.to_string().contains("embeddings returned an empty response"));
        assert_eq!(h.reference.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_formatting_failure_is_reported() {
        let h = harness(Setup {
            format_fails: true,
            ..Default::default()
        });
        let err = h.router.answer(&Submission::text("hola")).await.unwrap_err();
        assert!(err.to_string().starts_with("Error de formateo: "));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    // Composition ---------------------------------------------------------------

    #[tokio::test]
    async fn test_fragment_layout_and_idempotence() {
        let h = harness(Setup {
            index: FakeIndex {
                exact: Some(Ok(vec![hit(json!({"text": "2+2=4"}))])),
                ..Default::default()
            },
            ..Default::default()
        });
        let submission = Submission::selector(1, Section::Matematicas, 3);

        let first = h.router.answer(&submission).await.unwrap();
        let second = h.router.answer(&submission).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.html_fragment,
            "<p><strong>Enunciado:</strong> </p>\
             <p><strong>Examen:</strong> 1</p>\
             <p><strong>Sección:</strong> Matemáticas</p>\
             <p><strong>Pregunta nº:</strong> 3</p>\
             <ol><li>\\(2+2=4\\)</li></ol> 🤌"
        );
    }

    #[test]
    fn test_echoed_text_is_escaped() {
        let inquiry = Submission::text("<b>x</b> & y")
            .validate(&ExamCatalog::default())
            .unwrap();
        let fragment = compose_fragment(&inquiry, "<ol></ol>");
        assert!(fragment.starts_with(
            "<p><strong>Enunciado:</strong> &lt;b&gt;x&lt;/b&gt; &amp; y</p>"
        ));
        assert!(fragment.contains("<p><strong>Examen:</strong> </p>"));
    }
}
