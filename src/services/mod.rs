//! Adapter seams for the two external collaborators.
//!
//! The handler only talks to these traits, so the model provider and the
//! datastore can be swapped (or stubbed in tests) without touching the
//! request flow. Both adapters hold a single long-lived HTTP client that
//! is safe to share across concurrent requests.

use crate::error::Result;
use crate::{AnalysisType, Message};

pub mod openai;
pub mod supabase;

/// JSON object returned by the model. Its shape is a convention set by
/// the prompt skeleton, not a checked schema.
pub type AnalysisResult = serde_json::Map<String, serde_json::Value>;

/// Produces a structured analysis of a conversation.
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, messages: &[Message], analysis_type: AnalysisType)
        -> Result<AnalysisResult>;
}

/// Remote storage for messages and analysis results.
#[async_trait::async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Messages of a conversation, oldest first. Rows that cannot be mapped
    /// are skipped.
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Upsert keyed by `(conversation_id, analysis_type)`. Write failures are
    /// reported as `Ok(false)`; `Err` is reserved for a store that cannot be
    /// used at all.
    async fn save_analysis(
        &self,
        conversation_id: &str,
        analysis_type: AnalysisType,
        result: &AnalysisResult,
    ) -> Result<bool>;
}
