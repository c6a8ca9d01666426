use async_trait::async_trait;
use openai_api_rs::v1::{
    api::OpenAIClient,
    chat_completion,
    types,
};
use std::collections::HashMap;
use thiserror::Error;

use crate::payment::verification::{VerificationRequest, RESPONSE_FIELDS};

pub const API_KEY_VAR: &str = "OPENROUTER_API_KEY";
const TOOL_NAME: &str = "report_payment_verification";

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Environment error: {0}")]
    EnvError(#[from] std::env::VarError),
    #[error("Failed to create verification client: {0}")]
    ClientError(String),
    #[error("Verification request failed: {0}")]
    RequestError(String),
}

/// Anything that can look at a payment screenshot and judge it.
///
/// Implementations return the service's answer as JSON text; parsing is
/// left to [`crate::payment::verification::parse_verification_response`]
/// so every verifier gets the same permissive treatment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, request: &VerificationRequest) -> Result<String, VerifierError>;
}

/// Asks a multimodal chat model behind OpenRouter to check the screenshot.
pub struct OpenRouterVerifier {
    endpoint: String,
    model: String,
    api_key_var: &'static str,
}

impl OpenRouterVerifier {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key_var: API_KEY_VAR,
        }
    }

    // The key is read on every call so a rotated key is picked up without a restart.
    fn create_client(&self) -> Result<OpenAIClient, VerifierError> {
        let api_key = std::env::var(self.api_key_var)?;
        OpenAIClient::builder()
            .with_endpoint(self.endpoint.clone())
            .with_api_key(api_key)
            .build()
            .map_err(|e| VerifierError::ClientError(e.to_string()))
    }

    pub fn build_request(&self, request: &VerificationRequest) -> chat_completion::ChatCompletionRequest {
        let messages = vec![chat_completion::ChatCompletionMessage {
            role: chat_completion::MessageRole::user,
            content: chat_completion::Content::ImageUrl(vec![
                chat_completion::ImageUrl {
                    r#type: chat_completion::ContentType::text,
                    text: Some(request.prompt()),
                    image_url: None,
                },
                chat_completion::ImageUrl {
                    r#type: chat_completion::ContentType::image_url,
                    text: None,
                    image_url: Some(chat_completion::ImageUrlType {
                        url: request.image_data_uri(),
                    }),
                },
            ]),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }];

        let tools = vec![chat_completion::Tool {
            r#type: chat_completion::ToolType::Function,
            function: types::Function {
                name: TOOL_NAME.to_string(),
                description: Some("Reports whether the payment screenshot matches the entered transaction code and plan price".to_string()),
                parameters: types::FunctionParameters {
                    schema_type: types::JSONSchemaType::Object,
                    properties: Some(response_properties()),
                    required: Some(
                        RESPONSE_FIELDS
                            .iter()
                            .filter(|(_, required)| *required)
                            .map(|(name, _)| name.to_string())
                            .collect(),
                    ),
                },
            },
        }];

        chat_completion::ChatCompletionRequest::new(self.model.clone(), messages)
            .tools(tools)
            .tool_choice(chat_completion::ToolChoiceType::Required)
            .temperature(0.0)
            .max_tokens(300)
    }
}

fn response_properties() -> HashMap<String, Box<types::JSONSchemaDefine>> {
    let mut properties = HashMap::new();
    properties.insert(
        "match".to_string(),
        Box::new(types::JSONSchemaDefine {
            schema_type: Some(types::JSONSchemaType::Boolean),
            description: Some("True only if the extracted code equals the entered code and the amount matches the plan price".to_string()),
            ..Default::default()
        }),
    );
    properties.insert(
        "extractedCode".to_string(),
        Box::new(types::JSONSchemaDefine {
            schema_type: Some(types::JSONSchemaType::String),
            description: Some("The 10-character transaction code read from the screenshot".to_string()),
            ..Default::default()
        }),
    );
    properties.insert(
        "reason".to_string(),
        Box::new(types::JSONSchemaDefine {
            schema_type: Some(types::JSONSchemaType::String),
            description: Some("Short explanation for the user when the payment does not match".to_string()),
            ..Default::default()
        }),
    );
    properties.insert(
        "verifiedAmount".to_string(),
        Box::new(types::JSONSchemaDefine {
            schema_type: Some(types::JSONSchemaType::String),
            description: Some("The amount paid as shown in the screenshot".to_string()),
            ..Default::default()
        }),
    );
    properties
}

#[async_trait]
impl PaymentVerifier for OpenRouterVerifier {
    async fn verify(&self, request: &VerificationRequest) -> Result<String, VerifierError> {
        let client = self.create_client()?;
        let chat_request = self.build_request(request);

        tracing::debug!(
            plan = %request.plan,
            model = %self.model,
            image_bytes = request.image_data.len(),
            "Sending payment screenshot for verification"
        );

        let result = client
            .chat_completion(chat_request)
            .await
            .map_err(|e| VerifierError::RequestError(e.to_string()))?;

        Ok(response_text(&result.choices))
    }
}

/// JSON text of the first choice. No choices at all is an empty answer,
/// which the parser folds into a non-match like any other unusable reply.
fn response_text(choices: &[chat_completion::ChatCompletionChoice]) -> String {
    let Some(choice) = choices.first() else {
        tracing::warn!("Verification service returned no choices");
        return String::new();
    };
    // Forced tool call is the normal path, some models still answer in plain content.
    choice
        .message
        .tool_calls
        .as_ref()
        .and_then(|calls| calls.first())
        .and_then(|call| call.function.arguments.clone())
        .or_else(|| choice.message.content.clone())
        .unwrap_or_default()
}
