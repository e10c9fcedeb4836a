//! Integration tests for the gateway and extraction pipeline against an
//! in-process stub gateway.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use pinax_core::{ContextBundle, ContextFile, Error};
use pinax_inference::{ExtractOptions, Extractor, GatewayConfig, ModelGateway};

#[derive(Clone)]
struct StubState {
    /// Body the stub answers with, as (status, body).
    reply: Arc<Mutex<(StatusCode, Value)>>,
    /// Last request seen, for assertions.
    last_request: Arc<Mutex<Option<(Option<String>, Value)>>>,
}

async fn chat_completions(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *state.last_request.lock().unwrap() = Some((auth, body));
    let (status, reply) = state.reply.lock().unwrap().clone();
    (status, Json(reply))
}

async fn start_stub(reply: (StatusCode, Value)) -> (String, StubState) {
    let state = StubState {
        reply: Arc::new(Mutex::new(reply)),
        last_request: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/chat/completions", post(chat_completions))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub serve");
    });
    (format!("http://{addr}"), state)
}

fn completion_with(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 2000, "completion_tokens": 120, "total_tokens": 2120}
    })
}

fn bundle() -> ContextBundle {
    ContextBundle {
        directory_name: "harbor-box-12".to_string(),
        files: vec![ContextFile {
            name: "survey.txt".to_string(),
            content: "The 1927 harbor survey of pier 4.".to_string(),
        }],
        existing_pinax: None,
    }
}

fn gateway(base: &str) -> ModelGateway {
    ModelGateway::new(GatewayConfig::new(base, "test-key")).expect("gateway")
}

#[tokio::test]
async fn extraction_happy_path_builds_a_valid_record() {
    let content = json!({
        "title": "Harbor survey records, 1927",
        "type": "Collection",
        "creator": "Port Authority",
        "institution": "City Archive",
        "created": "1927",
        "description": "Survey of pier 4.",
        "subjects": ["harbors", "surveys"],
        "language": "en"
    });
    let (base, state) = start_stub((StatusCode::OK, completion_with(&content.to_string()))).await;

    let extractor = Extractor::new(gateway(&base));
    let extraction = extractor
        .extract(&bundle(), &ExtractOptions::default())
        .await
        .expect("extraction");

    assert_eq!(
        extraction.record.title.as_deref(),
        Some("Harbor survey records, 1927")
    );
    assert_eq!(extraction.record.record_type.as_deref(), Some("Collection"));
    assert!(extraction.record.id.is_some(), "id filled in");
    assert_eq!(extraction.record.source.as_deref(), Some("PINAX"));
    assert!(extraction.validation.valid, "{:?}", extraction.validation);
    assert_eq!(extraction.usage.prompt_tokens, 2000);
    assert!(extraction.usage.cost_usd() > 0.0);

    // The request carried auth, both messages, and the JSON constraint.
    let (auth, request) = state.last_request.lock().unwrap().clone().expect("request");
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(request["response_format"]["type"], "json_object");
    assert_eq!(request["temperature"], 0.2);
    assert_eq!(request["max_tokens"], 1024);
    assert_eq!(request["messages"][0]["role"], "system");
    let user = request["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("Directory: harbor-box-12"));
    assert!(user.contains("--- File: survey.txt ---"));
}

#[tokio::test]
async fn invalid_model_fields_surface_as_warnings_not_errors() {
    let content = json!({
        "title": "Untyped thing",
        "type": "widget",
        "creator": "A",
        "institution": "I",
        "created": "undated",
        "access_url": "https://x/y"
    });
    let (base, _state) = start_stub((StatusCode::OK, completion_with(&content.to_string()))).await;

    let extraction = Extractor::new(gateway(&base))
        .extract(&bundle(), &ExtractOptions::default())
        .await
        .expect("extraction succeeds despite schema failures");

    assert!(!extraction.validation.valid);
    assert!(extraction.validation.field_validations["type"].starts_with('⚠'));
    assert_eq!(extraction.record.record_type.as_deref(), Some("widget"));
}

#[tokio::test]
async fn gateway_error_carries_status_and_body() {
    let (base, _state) = start_stub((
        StatusCode::BAD_GATEWAY,
        json!({"error": {"message": "upstream unavailable"}}),
    ))
    .await;

    let err = Extractor::new(gateway(&base))
        .extract(&bundle(), &ExtractOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::Llm { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("expected Llm error, got {other}"),
    }
}

#[tokio::test]
async fn empty_choices_is_an_llm_error() {
    let (base, _state) = start_stub((
        StatusCode::OK,
        json!({"id": "chatcmpl-1", "choices": [], "usage": null}),
    ))
    .await;

    let err = Extractor::new(gateway(&base))
        .extract(&bundle(), &ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Llm { .. }), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn non_json_content_is_a_parse_error() {
    let (base, _state) =
        start_stub((StatusCode::OK, completion_with("Sorry, I cannot help."))).await;

    let err = Extractor::new(gateway(&base))
        .extract(&bundle(), &ExtractOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn custom_prompt_reaches_the_system_message() {
    let content = json!({"title": "X"});
    let (base, state) = start_stub((StatusCode::OK, completion_with(&content.to_string()))).await;

    let options = ExtractOptions {
        custom_prompt: Some("Catalog in Portuguese.".to_string()),
        ..Default::default()
    };
    Extractor::new(gateway(&base))
        .extract(&bundle(), &options)
        .await
        .expect("extraction");

    let (_, request) = state.last_request.lock().unwrap().clone().expect("request");
    let system = request["messages"][0]["content"].as_str().unwrap();
    assert!(system.contains("Catalog in Portuguese."));
}
