#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::Router;
use imobflash::error::{Error, Result};
use imobflash::services::{AnalysisResult, AnalysisStore, Analyzer};
use imobflash::{AnalysisType, Message};
use tokio::task::JoinHandle;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// What the stub analyzer should do when called.
#[derive(Clone)]
pub enum StubReply {
    Json(serde_json::Value),
    /// Raw model text, run through the real output parser.
    Text(String),
    Panic,
}

pub struct StubAnalyzer {
    reply: StubReply,
    pub calls: AtomicUsize,
}

impl StubAnalyzer {
    pub fn new(reply: StubReply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl Analyzer for StubAnalyzer {
    async fn analyze(
        &self,
        _messages: &[Message],
        _analysis_type: AnalysisType,
    ) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            StubReply::Json(value) => imobflash::services::openai::parse_result(&value.to_string()),
            StubReply::Text(text) => imobflash::services::openai::parse_result(text),
            StubReply::Panic => panic!("analyzer exploded"),
        }
    }
}

/// How the stub store answers `save_analysis`.
#[derive(Clone, Copy)]
pub enum StoreBehaviour {
    Saves,
    ReportsFailure,
    Errors,
    Panics,
}

pub struct StubStore {
    behaviour: StoreBehaviour,
    pub saves: AtomicUsize,
}

impl StubStore {
    pub fn new(behaviour: StoreBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            saves: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl AnalysisStore for StubStore {
    async fn fetch_messages(&self, _conversation_id: &str) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn save_analysis(
        &self,
        _conversation_id: &str,
        _analysis_type: AnalysisType,
        _result: &AnalysisResult,
    ) -> Result<bool> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            StoreBehaviour::Saves => Ok(true),
            StoreBehaviour::ReportsFailure => Ok(false),
            StoreBehaviour::Errors => Err(Error::Persistence("connection reset".into())),
            StoreBehaviour::Panics => panic!("store exploded"),
        }
    }
}

/// Serve a router on an ephemeral localhost port.
pub async fn serve(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

pub fn sample_request(analysis_type: &str) -> serde_json::Value {
    serde_json::json!({
        "conversation_id": "c1",
        "analysis_type": analysis_type,
        "messages": [
            {
                "message_id": "1",
                "conversation_id": "c1",
                "content": "Oi, quero visitar o apto",
                "timestamp": "2024-01-01T10:00:00Z",
                "sender": "client"
            },
            {
                "message_id": "2",
                "conversation_id": "c1",
                "content": "Claro! Amanhã às 15h funciona?",
                "timestamp": "2024-01-01T10:02:00Z",
                "sender": "agent",
                "time": 120.0,
                "order": 2
            }
        ]
    })
}
