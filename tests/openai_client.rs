#[path = "common/mod.rs"]
mod common;

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::post, Json, Router};
use imobflash::error::Error;
use imobflash::services::openai::OpenAiAnalyzer;
use imobflash::services::Analyzer;
use imobflash::{AnalysisRequest, AnalysisType};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

// Mock chat-completions endpoint answering with a fixed assistant message.
async fn start_mock_provider(content: Option<&'static str>) -> (String, Captured) {
    async fn complete(
        State((captured, content)): State<(Captured, Option<&'static str>)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        captured.bodies.lock().unwrap().push(body);
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            captured.auth.lock().unwrap().push(auth.to_string());
        }
        Json(json!({
            "id": "chatcmpl-test",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        }))
    }
    let captured = Captured::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(complete))
        .with_state((captured.clone(), content));
    let (addr, _handle) = common::serve(app).await;
    (format!("http://{}/v1", addr), captured)
}

fn messages() -> Vec<imobflash::Message> {
    let req: AnalysisRequest = serde_json::from_value(common::sample_request("summary")).unwrap();
    req.messages
}

#[tokio::test]
async fn sends_prompt_pair_in_json_mode() {
    let (base, captured) =
        start_mock_provider(Some(r#"{"score": 0.8, "sentiment": "positive", "indicators": []}"#))
            .await;
    let analyzer = OpenAiAnalyzer::new("sk-test", "gpt-4o-mini", &base, None).unwrap();

    let result = analyzer
        .analyze(&messages(), AnalysisType::Sentiment)
        .await
        .unwrap();
    assert_eq!(result.get("sentiment"), Some(&json!("positive")));

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["temperature"], 0.7);
    assert_eq!(body["response_format"], json!({"type": "json_object"}));
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["role"], "user");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("[01/01/2024 10:00] Cliente: Oi, quero visitar o apto"));
    assert!(user.contains("[01/01/2024 10:02] Agente: Claro! Amanhã às 15h funciona?"));
    assert_eq!(captured.auth.lock().unwrap()[0], "Bearer sk-test");
}

#[tokio::test]
async fn result_is_not_checked_against_skeleton() {
    let (base, _) = start_mock_provider(Some(r#"{"anything": "goes"}"#)).await;
    let analyzer = OpenAiAnalyzer::new("sk-test", "gpt-4o-mini", &base, None).unwrap();
    let result = analyzer
        .analyze(&messages(), AnalysisType::LeadQuality)
        .await
        .unwrap();
    assert_eq!(Value::Object(result), json!({"anything": "goes"}));
}

#[tokio::test]
async fn non_json_content_is_response_format_error() {
    let (base, _) = start_mock_provider(Some("not json at all")).await;
    let analyzer = OpenAiAnalyzer::new("sk-test", "gpt-4o-mini", &base, None).unwrap();
    let err = analyzer
        .analyze(&messages(), AnalysisType::Intent)
        .await
        .unwrap_err();
    match err {
        Error::ResponseFormat { raw, .. } => assert_eq!(raw, "not json at all"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_content_is_response_format_error() {
    let (base, _) = start_mock_provider(None).await;
    let analyzer = OpenAiAnalyzer::new("sk-test", "gpt-4o-mini", &base, None).unwrap();
    let err = analyzer
        .analyze(&messages(), AnalysisType::Summary)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResponseFormat { .. }));
}

#[tokio::test]
async fn provider_error_status_is_propagated() {
    async fn rate_limited() -> impl IntoResponse {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"message": "Rate limit reached"}})),
        )
    }
    let app = Router::new().route("/v1/chat/completions", post(rate_limited));
    let (addr, _handle) = common::serve(app).await;
    let analyzer =
        OpenAiAnalyzer::new("sk-test", "gpt-4o-mini", &format!("http://{}/v1", addr), None)
            .unwrap();
    let err = analyzer
        .analyze(&messages(), AnalysisType::Summary)
        .await
        .unwrap_err();
    match err {
        Error::Provider { status, body } => {
            assert_eq!(status, 429);
            assert!(body.contains("Rate limit reached"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_provider_is_transport_error() {
    // Nothing listens on this port; the single attempt fails fast.
    let base = format!("http://127.0.0.1:{}/v1", 65_535u16.saturating_sub(10));
    let analyzer = OpenAiAnalyzer::new("sk-test", "gpt-4o-mini", &base, None).unwrap();
    let err = analyzer
        .analyze(&messages(), AnalysisType::Summary)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn empty_key_is_configuration_error() {
    let analyzer = OpenAiAnalyzer::new("", "gpt-4o-mini", "http://127.0.0.1:1/v1", None).unwrap();
    let err = analyzer
        .analyze(&messages(), AnalysisType::Summary)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn empty_messages_is_invalid_argument() {
    let analyzer =
        OpenAiAnalyzer::new("sk-test", "gpt-4o-mini", "http://127.0.0.1:1/v1", None).unwrap();
    let err = analyzer
        .analyze(&[], AnalysisType::Summary)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
