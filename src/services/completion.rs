use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::attachment_store::{AttachmentStore, JPEG_QUALITY};
use crate::models::{AttachmentKind, Message};
use crate::repositories::BoxFuture;
use crate::services::secret_store::SecretStore;

/// Name of the provider credential in the secret store
pub const API_KEY_SECRET: &str = "anthropic_api_key";

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MODEL: &str = "claude-sonnet-4-20250514";
pub const MAX_TOKENS: u32 = 1024;
pub const TEMPERATURE: f32 = 0.7;

/// Substituted for the credential in any recorded request trace
const API_KEY_PLACEHOLDER: &str = "[REDACTED]";

const SYSTEM_PROMPT: &str = "You are a knowledgeable home repair assistant. \
Help the user diagnose household problems and fix them. Always lead with any \
relevant safety warnings, list the tools and materials needed, give clear \
step-by-step instructions, point out common mistakes to avoid, and say \
plainly when the job should be left to a licensed professional.";

const ROLE_USER: &str = "user";
const ROLE_ASSISTANT: &str = "assistant";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("No API key configured")]
    MissingCredential,

    #[error("Failed to encode image for upload: {0}")]
    Encoding(String),

    #[error("Network request failed: {0}")]
    Transport(String),

    #[error("Unexpected response from the Anthropic API")]
    InvalidResponse,

    #[error("Anthropic API error ({error_type}): {message}")]
    Provider { error_type: String, message: String },

    #[error("Anthropic API returned status {0}")]
    Status(u16),
}

/// A new image supplied with a send, before it is committed anywhere
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

// Wire types for the Anthropic Messages API

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: &'static str,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    temperature: f32,
    system: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

impl ContentBlock {
    fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    fn image_jpeg(jpeg_bytes: &[u8]) -> Self {
        ContentBlock::Image {
            source: ImageSource {
                kind: "base64",
                media_type: "image/jpeg",
                data: BASE64.encode(jpeg_bytes),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
    #[serde(default)]
    status_code: Option<u16>,
}

/// Re-encode arbitrary image bytes as JPEG for transport
fn encode_jpeg(bytes: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let mut out = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut out), JPEG_QUALITY);
    img.write_with_encoder(encoder)?;
    Ok(out)
}

/// Replace every occurrence of the credential with a fixed placeholder.
/// Applied to anything recorded about an outgoing request.
fn redact(text: &str, api_key: &str) -> String {
    if api_key.is_empty() {
        text.to_string()
    } else {
        text.replace(api_key, API_KEY_PLACEHOLDER)
    }
}

/// Human-readable trace of an outgoing request, safe to log
fn request_trace(endpoint: &str, request: &ApiRequest, api_key: &str) -> String {
    let body = serde_json::to_string(request).unwrap_or_else(|_| "<unserializable>".to_string());
    let trace = format!(
        "POST {endpoint}\nx-api-key: {API_KEY_PLACEHOLDER}\nanthropic-version: {ANTHROPIC_VERSION}\n{body}"
    );
    redact(&trace, api_key)
}

/// Build the `messages` array for a completion request.
///
/// Context messages become one turn each, keyed on `is_user`. A trailing
/// context message whose content equals the new input text is dropped so the
/// turn being sent is not encoded twice. Context attachments whose bytes no
/// longer load are skipped; a new image that fails to transcode aborts the
/// whole build before any network I/O.
async fn build_api_messages(
    store: &AttachmentStore,
    context: &[Message],
    text: &str,
    images: &[ImageInput],
) -> Result<Vec<ApiMessage>, CompletionError> {
    let mut history = context;
    if let Some(last) = history.last()
        && last.content() == text
    {
        history = &history[..history.len() - 1];
    }

    let mut api_messages = Vec::with_capacity(history.len() + 1);

    for message in history {
        let role = if message.is_user() {
            ROLE_USER
        } else {
            ROLE_ASSISTANT
        };

        if message.attachments().is_empty() {
            api_messages.push(ApiMessage {
                role,
                content: MessageContent::Text(message.content().to_string()),
            });
            continue;
        }

        let mut blocks = vec![ContentBlock::text(message.content())];
        for attachment in message.attachments() {
            if attachment.kind() != AttachmentKind::Image {
                continue;
            }
            match store.load(attachment.local_path()).await {
                Some(bytes) => blocks.push(ContentBlock::image_jpeg(&bytes)),
                None => debug!(
                    attachment_id = %attachment.id(),
                    "Skipping attachment with unloadable payload"
                ),
            }
        }
        api_messages.push(ApiMessage {
            role,
            content: MessageContent::Blocks(blocks),
        });
    }

    let mut blocks = vec![ContentBlock::text(text)];
    for image in images {
        let jpeg = encode_jpeg(&image.bytes).map_err(|e| {
            CompletionError::Encoding(format!("{}: {}", image.filename, e))
        })?;
        blocks.push(ContentBlock::image_jpeg(&jpeg));
    }
    api_messages.push(ApiMessage {
        role: ROLE_USER,
        content: MessageContent::Blocks(blocks),
    });

    Ok(api_messages)
}

/// The completion call as the conversation controller sees it.
/// Object-safe so tests can inject canned replies and failures.
pub trait CompletionService: Send + Sync + 'static {
    /// Continue the conversation given the full context (including the
    /// just-appended user turn), the new input text and any new images.
    /// Returns the assistant's reply text.
    fn complete(
        &self,
        context: Vec<Message>,
        text: String,
        images: Vec<ImageInput>,
    ) -> BoxFuture<'static, Result<String, CompletionError>>;
}

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    http: reqwest::Client,
    endpoint: String,
    secrets: Arc<dyn SecretStore>,
    attachments: Arc<AttachmentStore>,
}

impl AnthropicClient {
    pub fn new(secrets: Arc<dyn SecretStore>, attachments: Arc<AttachmentStore>) -> Self {
        Self::with_endpoint(ANTHROPIC_API_URL.to_string(), secrets, attachments)
    }

    /// Point the client at a different endpoint (used by tests)
    pub fn with_endpoint(
        endpoint: String,
        secrets: Arc<dyn SecretStore>,
        attachments: Arc<AttachmentStore>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            secrets,
            attachments,
        }
    }

    async fn execute(
        http: reqwest::Client,
        endpoint: String,
        secrets: Arc<dyn SecretStore>,
        attachments: Arc<AttachmentStore>,
        context: Vec<Message>,
        text: String,
        images: Vec<ImageInput>,
    ) -> Result<String, CompletionError> {
        let api_key = secrets
            .get(API_KEY_SECRET)
            .await
            .ok_or(CompletionError::MissingCredential)?;

        let messages = build_api_messages(&attachments, &context, &text, &images).await?;

        let request = ApiRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            messages,
            temperature: TEMPERATURE,
            system: SYSTEM_PROMPT,
        };

        debug!(request = %request_trace(&endpoint, &request, &api_key), "Sending completion request");

        let response = http
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("x-api-key", &api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(redact(&e.to_string(), &api_key)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::Transport(redact(&e.to_string(), &api_key)))?;

        if !status.is_success() {
            if let Ok(error_body) = serde_json::from_str::<ApiErrorBody>(&body) {
                warn!(
                    status = status.as_u16(),
                    error_type = %error_body.error.error_type,
                    status_code = ?error_body.error.status_code,
                    "Provider returned an error"
                );
                return Err(CompletionError::Provider {
                    error_type: error_body.error.error_type,
                    message: redact(&error_body.error.message, &api_key),
                });
            }
            return Err(CompletionError::Status(status.as_u16()));
        }

        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|_| CompletionError::InvalidResponse)?;

        if let Some(usage) = &parsed.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Completion token usage"
            );
        }

        // A first block without a text field (e.g. a tool-use block) is as
        // much a schema mismatch as a missing block
        parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or(CompletionError::InvalidResponse)
    }
}

impl CompletionService for AnthropicClient {
    fn complete(
        &self,
        context: Vec<Message>,
        text: String,
        images: Vec<ImageInput>,
    ) -> BoxFuture<'static, Result<String, CompletionError>> {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let secrets = self.secrets.clone();
        let attachments = self.attachments.clone();

        Box::pin(async move {
            Self::execute(http, endpoint, secrets, attachments, context, text, images).await
        })
    }
}
