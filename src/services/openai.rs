use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AnalysisResult, Analyzer};
use crate::error::{Error, Result};
use crate::prompts::{build_prompts, render_conversation};
use crate::{AnalysisType, AppConfig, Message};

const TEMPERATURE: f64 = 0.7;

/// Chat-completions client that asks the model for a JSON object and
/// returns it untouched. One attempt per call: no retry, no backoff.
pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiAnalyzer {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.openai_api_key.clone(),
            config.openai_model.clone(),
            &config.openai_base_url,
            config.http_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Parse the model's text output. Anything other than a JSON object is a
/// `ResponseFormat` failure carrying the raw text.
pub fn parse_result(content: &str) -> Result<AnalysisResult> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => {
            tracing::error!(raw = %content, "model output is JSON but not an object");
            Err(Error::ResponseFormat {
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
                raw: content.to_string(),
            })
        }
        Err(e) => {
            tracing::error!(error = %e, raw = %content, "failed to parse model output as JSON");
            Err(Error::ResponseFormat {
                reason: e.to_string(),
                raw: content.to_string(),
            })
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[async_trait::async_trait]
impl Analyzer for OpenAiAnalyzer {
    async fn analyze(
        &self,
        messages: &[Message],
        analysis_type: AnalysisType,
    ) -> Result<AnalysisResult> {
        if self.api_key.is_empty() {
            return Err(Error::Configuration("OpenAI"));
        }
        if messages.is_empty() {
            return Err(Error::InvalidArgument("message list is empty".into()));
        }

        let prompts = build_prompts(analysis_type, &render_conversation(messages));
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompts.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompts.user,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            temperature: TEMPERATURE,
        };

        tracing::info!(analysis_type = %analysis_type, model = %self.model, "requesting analysis");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "model provider rejected the request");
            return Err(Error::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = resp.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::ResponseFormat {
                reason: "reply contained no message content".into(),
                raw: String::new(),
            })?;

        let result = parse_result(&content)?;
        tracing::info!(analysis_type = %analysis_type, "analysis completed");
        Ok(result)
    }
}
