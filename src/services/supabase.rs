use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{AnalysisResult, AnalysisStore};
use crate::error::{Error, Result};
use crate::util::{self, Timestamp};
use crate::{AnalysisType, AppConfig, Message, Sender};

const MESSAGES_TABLE: &str = "messages";
const ANALYSES_TABLE: &str = "message_analyses";

/// Supabase access through its PostgREST endpoint (`<url>/rest/v1/<table>`).
pub struct SupabaseStore {
    client: reqwest::Client,
    rest_url: String,
    key: String,
}

/// Loose view of a `messages` row. Missing columns fall back to defaults;
/// present-but-wrong values (e.g. `null` content, unknown sender) fail the row.
#[derive(Deserialize)]
struct MessageRow {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    conversation_id: String,
    #[serde(default)]
    content: String,
    #[serde(default = "util::now", deserialize_with = "util::deserialize_timestamp")]
    timestamp: Timestamp,
    #[serde(default = "default_sender")]
    sender: Sender,
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    order: Option<i64>,
}

fn default_sender() -> Sender {
    Sender::Client
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            message_id: row.message_id,
            conversation_id: row.conversation_id,
            content: row.content,
            timestamp: row.timestamp,
            sender: row.sender,
            time: row.time,
            order: row.order,
        }
    }
}

impl SupabaseStore {
    /// An empty `url` or `key` yields a store that fails every call with a
    /// configuration error.
    pub fn new(url: &str, key: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let url = url.trim_end_matches('/');
        Ok(Self {
            client: builder.build()?,
            rest_url: if url.is_empty() {
                String::new()
            } else {
                format!("{}/rest/v1", url)
            },
            key: key.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            &config.supabase_url,
            config.supabase_key.clone(),
            config.http_timeout,
        )
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.rest_url.is_empty() || self.key.is_empty() {
            return Err(Error::Configuration("Supabase"));
        }
        Ok(())
    }

    fn table(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn find_analysis(&self, conversation_id: &str, analysis_type: &str) -> Result<bool> {
        let rows: Vec<Value> = self
            .table(reqwest::Method::GET, ANALYSES_TABLE)
            .query(&[
                ("select", "id".to_string()),
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("analysis_type", format!("eq.{}", analysis_type)),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(persistence)?
            .json()
            .await
            .map_err(persistence)?;
        Ok(!rows.is_empty())
    }

    async fn upsert_analysis(
        &self,
        conversation_id: &str,
        analysis_type: &str,
        result: &AnalysisResult,
    ) -> Result<()> {
        if self.find_analysis(conversation_id, analysis_type).await? {
            self.table(reqwest::Method::PATCH, ANALYSES_TABLE)
                .query(&[
                    ("conversation_id", format!("eq.{}", conversation_id)),
                    ("analysis_type", format!("eq.{}", analysis_type)),
                ])
                .header("Prefer", "return=minimal")
                .json(&json!({
                    "result": result,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                }))
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(persistence)?;
            tracing::info!(conversation_id, analysis_type, "analysis updated");
        } else {
            self.table(reqwest::Method::POST, ANALYSES_TABLE)
                .header("Prefer", "return=minimal")
                .json(&json!({
                    "conversation_id": conversation_id,
                    "analysis_type": analysis_type,
                    "result": result,
                }))
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(persistence)?;
            tracing::info!(conversation_id, analysis_type, "analysis created");
        }
        Ok(())
    }
}

fn persistence(err: reqwest::Error) -> Error {
    Error::Persistence(err.to_string())
}

#[async_trait::async_trait]
impl AnalysisStore for SupabaseStore {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.ensure_configured()?;
        tracing::info!(conversation_id, "fetching conversation messages");

        let rows: Vec<Value> = self
            .table(reqwest::Method::GET, MESSAGES_TABLE)
            .query(&[
                ("select", "*".to_string()),
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("order", "timestamp.asc".to_string()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(persistence)?
            .json()
            .await
            .map_err(persistence)?;

        let messages: Vec<Message> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<MessageRow>(row) {
                Ok(row) => Some(Message::from(row)),
                Err(e) => {
                    tracing::warn!(conversation_id, error = %e, "skipping malformed message row");
                    None
                }
            })
            .collect();

        tracing::info!(conversation_id, count = messages.len(), "messages fetched");
        Ok(messages)
    }

    async fn save_analysis(
        &self,
        conversation_id: &str,
        analysis_type: AnalysisType,
        result: &AnalysisResult,
    ) -> Result<bool> {
        self.ensure_configured()?;
        tracing::info!(conversation_id, analysis_type = %analysis_type, "saving analysis");

        match self
            .upsert_analysis(conversation_id, analysis_type.as_str(), result)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!(conversation_id, analysis_type = %analysis_type, error = %e, "failed to save analysis");
                Ok(false)
            }
        }
    }
}
