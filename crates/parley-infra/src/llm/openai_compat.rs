//! OpenAI-compatible chat provider.
//!
//! Works against any endpoint speaking the OpenAI chat-completions API via a
//! configurable base URL. Uses [`async_openai`] for type-safe request/response
//! handling. The answer's cost signal is the response's `usage.total_tokens`.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, ImageUrl,
};
use parley_core::llm::ChatProvider;
use parley_types::config::ProviderConfig;
use parley_types::error::ProviderError;
use parley_types::history::{ContentPart, HistoryEntry, Role};
use parley_types::provider::{Answer, AskRequest};
use secrecy::{ExposeSecret, SecretString};

/// Provider for any OpenAI-compatible API.
///
/// Does NOT derive Debug: the `async_openai::Client` holds the API key.
pub struct OpenAiCompatibleProvider {
    client: Client<OpenAIConfig>,
    provider_name: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_key: &SecretString, base_url: &str, model: &str) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(base_url);

        Self {
            client: Client::with_config(openai_config),
            provider_name: "openai".to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(api_key: &SecretString, config: &ProviderConfig) -> Self {
        Self::new(api_key, &config.base_url, &config.default_model)
    }

    /// Build a [`CreateChatCompletionRequest`] from an [`AskRequest`].
    fn build_request(&self, request: &AskRequest) -> CreateChatCompletionRequest {
        let messages = request.messages.iter().map(to_openai_message).collect();

        // Use the model from the request if set, otherwise fall back to config default
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        CreateChatCompletionRequest {
            model,
            messages,
            max_completion_tokens: Some(request.max_tokens),
            ..Default::default()
        }
    }
}

fn to_openai_message(entry: &HistoryEntry) -> ChatCompletionRequestMessage {
    match entry.role {
        Role::System => ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: ChatCompletionRequestSystemMessageContent::Text(entry.text_content()),
            name: None,
        }),
        Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: user_content(entry),
            name: None,
        }),
        Role::Assistant => {
            #[allow(deprecated)]
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                    entry.text_content(),
                )),
                refusal: None,
                name: None,
                audio: None,
                tool_calls: None,
                function_call: None,
            })
        }
    }
}

/// Plain text unless the entry carries images, then a multi-part array.
fn user_content(entry: &HistoryEntry) -> ChatCompletionRequestUserMessageContent {
    if !entry.has_images() {
        return ChatCompletionRequestUserMessageContent::Text(entry.text_content());
    }

    let parts = entry
        .content
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText { text: text.clone() },
            ),
            ContentPart::Image { url, .. } => ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: url.clone(),
                        detail: None,
                    },
                },
            ),
        })
        .collect();

    ChatCompletionRequestUserMessageContent::Array(parts)
}

impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn ask(&self, request: &AskRequest) -> Result<Answer, ProviderError> {
        let oai_request = self.build_request(request);

        let response = self
            .client
            .chat()
            .create(oai_request)
            .await
            .map_err(map_openai_error)?;

        // Extract content from the first choice
        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let cost = response.usage.map(|u| u.total_tokens);
        tracing::debug!(model = %response.model, cost = ?cost, "Chat completion received");

        Ok(Answer::new(text, cost))
    }
}

/// Map an `async_openai::error::OpenAIError` to a [`ProviderError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> ProviderError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                ProviderError::AuthenticationFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                ProviderError::RateLimited
            } else if error_type == "invalid_request_error" {
                ProviderError::InvalidRequest(api_err.message.clone())
            } else {
                ProviderError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status().map(|s| s.as_u16()) {
            Some(401) => ProviderError::AuthenticationFailed,
            Some(429) => ProviderError::RateLimited,
            _ => ProviderError::Provider {
                message: err.to_string(),
            },
        },
        OpenAIError::JSONDeserialize(_, content) => {
            ProviderError::Deserialization(format!("failed to parse response: {content}"))
        }
        OpenAIError::InvalidArgument(msg) => ProviderError::InvalidRequest(msg.clone()),
        _ => ProviderError::Provider {
            message: err.to_string(),
        },
    }
}
