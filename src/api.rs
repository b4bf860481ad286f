//! # API Module
//!
//! Calls into the OpenAI-compatible API: embeddings for the similarity lookup
//! and a single chat completion that formats the collected snippets.
//!
//! Both are exposed through traits ([`Embedder`], [`AnswerFormatter`]) so the
//! router can be driven by fakes in tests.
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
        CreateEmbeddingRequestArgs,
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::debug;

use crate::{
    config::{AsesorConfig, Credentials},
    error::UpstreamError,
    router::Snippet,
    template::FormattingTemplate,
};

/// What gets embedded for the similarity lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingSource<'a> {
    Text(&'a str),
    Image(&'a [u8]),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, source: EmbeddingSource<'_>) -> Result<Vec<f32>, UpstreamError>;
}

#[async_trait]
pub trait AnswerFormatter: Send + Sync {
    /// Turn snippets into an HTML ordered list.
    async fn format(&self, snippets: &[Snippet]) -> Result<String, UpstreamError>;
}

/// Creates a new OpenAI API client from the credentials.
pub fn create_client(credentials: &Credentials) -> Client<OpenAIConfig> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(credentials.openai_api_key.clone())
        .with_api_base(credentials.openai_api_base.clone());
    debug!("Client created for {}", credentials.openai_api_base);
    Client::with_config(openai_config)
}

/// Embeddings through `POST /embeddings`.
///
/// Images are sent base64-encoded to a dedicated model.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    text_model: String,
    image_model: String,
}

impl OpenAiEmbedder {
    pub fn new(client: Client<OpenAIConfig>, config: &AsesorConfig) -> Self {
        OpenAiEmbedder {
            client,
            text_model: config.text_embedding_model.clone(),
            image_model: config.image_embedding_model.clone(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, source: EmbeddingSource<'_>) -> Result<Vec<f32>, UpstreamError> {
        let (model, input) = match source {
            EmbeddingSource::Text(text) => (&self.text_model, text.to_string()),
            EmbeddingSource::Image(bytes) => (&self.image_model, STANDARD.encode(bytes)),
        };

        let request = CreateEmbeddingRequestArgs::default()
            .model(model.as_str())
            .input(input)
            .build()?;

        debug!("Requesting embedding with model {model}");
        let response = self.client.embeddings().create(request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|embedding| embedding.embedding)
            .ok_or(UpstreamError::Empty("embeddings"))
    }
}

/// Snippet formatting through one non-streaming chat completion.
#[derive(Clone)]
pub struct OpenAiFormatter {
    client: Client<OpenAIConfig>,
    model: String,
    template: FormattingTemplate,
}

impl OpenAiFormatter {
    pub fn new(
        client: Client<OpenAIConfig>,
        model: impl Into<String>,
        template: FormattingTemplate,
    ) -> Self {
        OpenAiFormatter {
            client,
            model: model.into(),
            template,
        }
    }

    fn messages(&self, snippets: &[Snippet]) -> Vec<ChatCompletionRequestMessage> {
        vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(
                    self.template.system_message(snippets),
                ),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(
                    self.template.user_message.clone(),
                ),
                name: None,
            }),
        ]
    }
}

#[async_trait]
impl AnswerFormatter for OpenAiFormatter {
    async fn format(&self, snippets: &[Snippet]) -> Result<String, UpstreamError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(self.messages(snippets))
            .build()?;

        debug!("Sending request: {:?}", request);

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or(UpstreamError::Empty("chat completion"))
    }
}
