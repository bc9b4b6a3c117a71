//! Integration tests using wiremock to simulate chat-completion endpoints.

use async_trait::async_trait;
use chatguard::retry::RetryOnTransientServerError;
use chatguard::{
    Client, ClientBuilder, Error, ErrorKind, FallbackFields, GenerationOptions, ModelRoutes,
    RetryPolicy, RetryPredicate, Sleeper, TemplateFallback,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CHAT_PATH: &str = "/v1/chat/completions";

/// Records requested waits instead of sleeping.
#[derive(Clone, Default)]
struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    })
}

fn policy(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1000), 2.0).unwrap()
}

fn builder_for(server: &MockServer, sleeper: &RecordingSleeper) -> ClientBuilder {
    Client::builder()
        .endpoint(format!("{}{}", server.uri(), CHAT_PATH))
        .unwrap()
        .api_key("sk-test")
        .model("deepseek-chat")
        .sleeper(sleeper.clone())
}

fn ms(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|v| Duration::from_millis(*v)).collect()
}

#[tokio::test]
async fn test_successful_generation() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "model": "deepseek-chat",
            "stream": false,
            "messages": [
                { "role": "system", "content": chatguard::DEFAULT_SYSTEM_PROMPT },
                { "role": "user", "content": "Analyze my store" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("<h1>Report</h1>")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper).build().unwrap();

    let generation = client
        .generate_content("Analyze my store", &GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(generation.content, "<h1>Report</h1>");
    assert!(!generation.used_fallback);
    assert!(generation.fallback_reason.is_none());
    assert_eq!(generation.attempts, 1);
    assert!(!generation.was_retried());
    assert_eq!(generation.status.map(|s| s.as_u16()), Some(200));
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_call_options_override_defaults() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(body_partial_json(json!({
            "model": "qwen-plus",
            "temperature": 1.5,
            "max_tokens": 256
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper).build().unwrap();
    let options = GenerationOptions::default()
        .model("qwen-plus")
        .temperature(1.5)
        .max_tokens(256);

    let generation = client.generate_content("hi", &options).await.unwrap();
    assert_eq!(generation.model, "qwen-plus");
    assert_eq!(generation.content, "ok");
}

#[tokio::test]
async fn test_server_errors_use_every_attempt() {
    for max_attempts in 1..=4 {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
            .expect(max_attempts as u64)
            .mount(&mock_server)
            .await;

        let sleeper = RecordingSleeper::default();
        let client = builder_for(&mock_server, &sleeper)
            .retry_policy(policy(max_attempts))
            .build()
            .unwrap();

        let result = client
            .generate_content("hi", &GenerationOptions::default())
            .await;

        match result {
            Err(Error::MaxRetriesExceeded { attempts, last_error }) => {
                assert_eq!(attempts, max_attempts);
                assert_eq!(last_error.status().map(|s| s.as_u16()), Some(500));
            }
            other => panic!("Expected MaxRetriesExceeded, got {:?}", other),
        }
        assert_eq!(sleeper.delays().len(), max_attempts - 1);
    }
}

#[tokio::test]
async fn test_backoff_schedule() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(4))
        .build()
        .unwrap();

    let _ = client
        .generate_content("hi", &GenerationOptions::default())
        .await;

    assert_eq!(sleeper.delays(), ms(&[1000, 2000, 4000]));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    for status in [400u16, 401, 403, 404, 422, 429, 499] {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string("rejected"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let sleeper = RecordingSleeper::default();
        let client = builder_for(&mock_server, &sleeper)
            .retry_policy(policy(5))
            .build()
            .unwrap();

        let result = client
            .generate_content("hi", &GenerationOptions::default())
            .await;

        match result {
            Err(Error::HttpError {
                status: got,
                raw_response,
                ..
            }) => {
                assert_eq!(got.as_u16(), status);
                assert_eq!(raw_response, "rejected");
            }
            other => panic!("Expected HttpError, got {:?}", other),
        }
        assert!(sleeper.delays().is_empty());
    }
}

#[tokio::test]
async fn test_retry_then_success() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First two requests fail with 502, third succeeds
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(502).set_body_string("Bad gateway")
            } else {
                ResponseTemplate::new(200).set_body_json(completion("third time"))
            }
        })
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(3))
        .build()
        .unwrap();

    let generation = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(generation.content, "third time");
    assert_eq!(generation.attempts, 3);
    assert!(generation.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    assert_eq!(sleeper.delays(), ms(&[1000, 2000]));
}

#[tokio::test]
async fn test_missing_content_is_retried() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(move |_req: &wiremock::Request| {
            match attempt_count_clone.fetch_add(1, Ordering::SeqCst) {
                0 => ResponseTemplate::new(200).set_body_json(json!({ "id": "x" })),
                1 => ResponseTemplate::new(200)
                    .set_body_json(json!({ "choices": [{ "message": { "role": "assistant" } }] })),
                _ => ResponseTemplate::new(200).set_body_json(completion("finally")),
            }
        })
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(3))
        .build()
        .unwrap();

    let generation = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(generation.content, "finally");
    assert_eq!(generation.attempts, 3);
}

#[tokio::test]
async fn test_malformed_body_exhausts_like_network_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy page</html>"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(2))
        .build()
        .unwrap();

    let err = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 2, .. }));
    match err.root() {
        Error::MalformedResponse { raw_response, status, .. } => {
            assert_eq!(raw_response, "<html>proxy page</html>");
            assert_eq!(status.as_u16(), 200);
        }
        other => panic!("Expected MalformedResponse, got {:?}", other),
    }
    assert_eq!(err.summary().kind, ErrorKind::MalformedResponse);
}

#[tokio::test]
async fn test_timeout_cancels_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("too late"))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(2))
        .build()
        .unwrap();

    let start = Instant::now();
    let err = client
        .generate_content(
            "hi",
            &GenerationOptions::default().timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 2, .. }));
    assert!(matches!(err.root(), Error::Timeout));
    assert!(err.root().is_retryable());
    // Two cancelled attempts, not two full two-second responses.
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_network_error_is_retried() {
    let sleeper = RecordingSleeper::default();
    let client = Client::builder()
        .endpoint("http://127.0.0.1:1/v1/chat/completions")
        .unwrap()
        .sleeper(sleeper.clone())
        .retry_policy(policy(2))
        .build()
        .unwrap();

    let err = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 2, .. }));
    assert_eq!(err.root().kind(), ErrorKind::Network);
    assert_eq!(sleeper.delays(), ms(&[1000]));
}

#[tokio::test]
async fn test_fallback_after_exhaustion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(3))
        .fallback(TemplateFallback::store_report().unwrap())
        .build()
        .unwrap();

    let generation = client
        .generate_content("Tell me about my business", &GenerationOptions::default())
        .await
        .unwrap();

    assert!(generation.used_fallback);
    assert_eq!(generation.attempts, 3);
    assert_eq!(generation.status, None);
    assert!(generation.content.contains("Your Store"));
    assert!(generation.content.contains("Mid-range"));

    let reason = generation.fallback_reason.unwrap();
    assert_eq!(reason.kind, ErrorKind::Server);
    assert_eq!(reason.status_code, Some(503));
    assert!(!reason.is_client_error);

    // Two backoff waits, then the simulated latency.
    assert_eq!(sleeper.delays(), ms(&[1000, 2000, 2000]));
}

#[tokio::test]
async fn test_fallback_uses_fields_from_prompt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(1))
        .fallback(TemplateFallback::store_report().unwrap().with_latency(Duration::ZERO))
        .build()
        .unwrap();

    let prompt = "Please write a report.\nStore name: Golden Dumpling\n价格区间：35-50元";
    let generation = client
        .generate_content(prompt, &GenerationOptions::default())
        .await
        .unwrap();

    assert!(generation.used_fallback);
    assert!(generation.content.contains("Golden Dumpling"));
    assert!(generation.content.contains("35-50元"));
    // no simulated latency and a single attempt: nothing to wait for
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_fallback_uses_structured_fields() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(1))
        .fallback(TemplateFallback::store_report().unwrap())
        .build()
        .unwrap();

    let fields = FallbackFields::new()
        .with("store_name", "Spicy Corner")
        .with("location", "Chengdu");
    let generation = client
        .generate_content_with_fields(
            "Store name: Ignored Name",
            &GenerationOptions::default(),
            &fields,
        )
        .await
        .unwrap();

    assert!(generation.content.contains("Spicy Corner"));
    assert!(generation.content.contains("Chengdu"));
    assert!(!generation.content.contains("Ignored Name"));
}

#[tokio::test]
async fn test_fallback_absorbs_client_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(3))
        .fallback(TemplateFallback::store_report().unwrap())
        .build()
        .unwrap();

    let generation = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap();

    assert!(generation.used_fallback);
    assert_eq!(generation.attempts, 1);
    let reason = generation.fallback_reason.unwrap();
    assert!(reason.is_client_error);
    assert_eq!(reason.status_code, Some(401));
    assert_eq!(sleeper.delays(), vec![TemplateFallback::DEFAULT_LATENCY]);
}

#[tokio::test]
async fn test_fallback_output_is_deterministic() {
    let sleeper = RecordingSleeper::default();
    let client = Client::builder()
        .endpoint("http://127.0.0.1:1/v1/chat/completions")
        .unwrap()
        .sleeper(sleeper.clone())
        .retry_policy(policy(2))
        .fallback(TemplateFallback::store_report().unwrap())
        .build()
        .unwrap();

    let prompt = "Store name: Golden Dumpling\nCategory: Dumplings";
    let first = client
        .generate_content(prompt, &GenerationOptions::default())
        .await
        .unwrap();
    let second = client
        .generate_content(prompt, &GenerationOptions::default())
        .await
        .unwrap();

    assert!(first.used_fallback && second.used_fallback);
    assert_eq!(first.content, second.content);
    assert_eq!(first.fallback_reason.unwrap().kind, ErrorKind::Network);
}

#[tokio::test]
async fn test_invalid_input_is_never_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("x")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .fallback(TemplateFallback::store_report().unwrap())
        .build()
        .unwrap();

    let empty = client
        .generate_content("   ", &GenerationOptions::default())
        .await;
    assert!(matches!(empty, Err(Error::Configuration(_))));

    let hot = client
        .generate_content("hi", &GenerationOptions::default().temperature(3.0))
        .await;
    assert!(matches!(hot, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_request_size_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("x")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let strict = builder_for(&mock_server, &sleeper)
        .max_request_bytes(64)
        .build()
        .unwrap();

    let err = strict
        .generate_content(&"x".repeat(100), &GenerationOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::RequestTooLarge { size, limit } => {
            assert_eq!(limit, 64);
            assert!(size > 100);
        }
        other => panic!("Expected RequestTooLarge, got {:?}", other),
    }

    let lenient = strict
        .to_builder()
        .fallback(TemplateFallback::store_report().unwrap().with_latency(Duration::ZERO))
        .build()
        .unwrap();
    let generation = lenient
        .generate_content(&"x".repeat(100), &GenerationOptions::default())
        .await
        .unwrap();
    assert!(generation.used_fallback);
    assert_eq!(generation.attempts, 0);
    assert_eq!(generation.fallback_reason.unwrap().kind, ErrorKind::Local);
}

#[tokio::test]
async fn test_transient_predicate_stops_on_501() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(501))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(policy(3))
        .retry_predicate(Box::new(RetryOnTransientServerError))
        .build()
        .unwrap();

    let err = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpError { status, .. } if status.as_u16() == 501));
}

#[tokio::test]
async fn test_custom_predicate_cannot_retry_client_errors() {
    struct RetryEverything;

    impl RetryPredicate for RetryEverything {
        fn should_retry(&self, _error: &Error, _attempt: usize) -> bool {
            true
        }
    }

    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .retry_policy(RetryPolicy::new(3, Duration::ZERO, 1.0).unwrap())
        .retry_predicate(Box::new(RetryEverything))
        .build()
        .unwrap();

    let err = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpError { status, .. } if status.as_u16() == 400));
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn test_model_routes() {
    let default_server = MockServer::start().await;
    let routed_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("default")))
        .expect(1)
        .mount(&default_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/compatible-mode/v1/chat/completions"))
        .and(header("authorization", "Bearer route-key"))
        .and(body_partial_json(json!({ "model": "qwen-plus" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("routed")))
        .expect(1)
        .mount(&routed_server)
        .await;

    let routes = ModelRoutes::new()
        .route(
            "qwen-plus",
            format!("{}/compatible-mode/v1/chat/completions", routed_server.uri()),
            Some("route-key"),
        )
        .unwrap();

    let client = Client::builder()
        .endpoint(format!("{}{}", default_server.uri(), CHAT_PATH))
        .unwrap()
        .routes(routes)
        .build()
        .unwrap();

    let routed = client
        .generate_content("hi", &GenerationOptions::default().model("qwen-plus"))
        .await
        .unwrap();
    assert_eq!(routed.content, "routed");

    let default = client
        .generate_content("hi", &GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(default.content, "default");
}

#[tokio::test]
async fn test_identical_requests_are_serialized() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("ok"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let sleeper = RecordingSleeper::default();
    let client = builder_for(&mock_server, &sleeper)
        .serialize_identical_requests(true)
        .build()
        .unwrap();

    let options = GenerationOptions::default();
    let run = || client.generate_content("same prompt", &options);

    let start = Instant::now();
    let (a, b) = tokio::join!(run(), run());
    assert_eq!(a.unwrap().content, "ok");
    assert_eq!(b.unwrap().content, "ok");
    // The second call only starts once the first has its response.
    assert!(start.elapsed() >= Duration::from_millis(400));
}
