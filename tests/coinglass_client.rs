//! CoinGlass client against a mocked upstream

use peak_watch::sources::coinglass::API_KEY_HEADER;
use peak_watch::{CoinGlassClient, FetchError, RetryPolicy, SentimentLabel};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/api/bull-market-peak-indicator";

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_millis(1),
    }
}

fn client_for(server: &MockServer) -> CoinGlassClient {
    CoinGlassClient::new(&format!("{}{}", server.uri(), ENDPOINT))
        .unwrap()
        .with_retry_policy(fast_policy())
}

fn sample_body() -> serde_json::Value {
    json!({
        "code": "200",
        "data": [
            {"name": "A", "hit_status": true, "hit_time": 1714000000000_i64},
            {"name": "B", "hit_status": false},
            {"name": "C", "hit": true}
        ]
    })
}

#[tokio::test]
async fn test_success_aggregates_sample() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
        .expect(1)
        .mount(&server)
        .await;

    let agg = client_for(&server).fetch_aggregate(None).await.unwrap();

    assert_eq!(agg.sell_pct, 66.67);
    assert_eq!(agg.hold_pct, 33.33);
    assert_eq!(agg.label, SentimentLabel::Mitigate);
    let names: Vec<&str> = agg.triggered.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["A", "C"]);
    assert_eq!(agg.triggered[0].hit_time, Some(1_714_000_000_000));
}

#[tokio::test]
async fn test_empty_data_is_full_hold() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "200", "data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let agg = client_for(&server).fetch_aggregate(None).await.unwrap();
    assert_eq!(agg.sell_pct, 0.0);
    assert_eq!(agg.hold_pct, 100.0);
    assert!(agg.triggered.is_empty());
}

#[tokio::test]
async fn test_api_key_header_sent_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header(API_KEY_HEADER, "secret-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server).fetch_aggregate(Some("secret-key")).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_api_key_header_omitted_when_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
        .mount(&server)
        .await;

    client_for(&server).fetch_aggregate(Some("")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get(API_KEY_HEADER).is_none());
}

#[tokio::test]
async fn test_persistent_503_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(6)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_aggregate(None).await.unwrap_err();

    match err {
        FetchError::RetriesExhausted { retries, last } => {
            assert_eq!(retries, 5);
            assert_eq!(*last, FetchError::RetriableServer { status: 503 });
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_success_on_final_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(5)
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
        .expect(1)
        .mount(&server)
        .await;

    let agg = client_for(&server).fetch_aggregate(None).await.unwrap();
    assert_eq!(agg.label, SentimentLabel::Mitigate);
}

#[tokio::test]
async fn test_backoff_waits_between_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(6)
        .mount(&server)
        .await;

    let policy = RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_millis(10),
    };
    let client = CoinGlassClient::new(&format!("{}{}", server.uri(), ENDPOINT))
        .unwrap()
        .with_retry_policy(policy);

    let started = Instant::now();
    let result = client.fetch_aggregate(None).await;

    assert!(result.is_err());
    // 10 + 20 + 40 + 80 + 160
    assert!(started.elapsed() >= Duration::from_millis(310));
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client_for(&server).fetch_aggregate(None).await.is_ok());
}

#[tokio::test]
async fn test_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_aggregate(Some("wrong")).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::FatalClient {
            status: 401,
            message: "Unauthorized".to_string()
        }
    );
    assert_eq!(err.to_string(), "HTTP Error (401): Unauthorized");
}

#[tokio::test]
async fn test_forbidden_uses_envelope_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"code": "403", "msg": "Upgrade plan"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_aggregate(None).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::FatalClient {
            status: 403,
            message: "Upgrade plan".to_string()
        }
    );
}

#[tokio::test]
async fn test_error_envelope_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": "400", "msg": "bad request"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_aggregate(None).await.unwrap_err();
    assert_eq!(err.to_string(), "bad request");
    assert!(matches!(err, FetchError::Upstream { ref code, .. } if code == "400"));
}

#[tokio::test]
async fn test_unexpected_envelope_code_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "500"})))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_aggregate(None).await.unwrap_err();
    assert!(matches!(err, FetchError::Upstream { ref code, .. } if code == "500"));
}

#[tokio::test]
async fn test_malformed_body_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_aggregate(None).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_network_failure_is_retried() {
    // Grab a free port, then close it so connections are refused
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = CoinGlassClient::new(&format!("http://127.0.0.1:{}{}", port, ENDPOINT))
        .unwrap()
        .with_retry_policy(fast_policy());

    let err = client.fetch_aggregate(None).await.unwrap_err();

    match err {
        FetchError::RetriesExhausted { retries, last } => {
            assert_eq!(retries, 5);
            assert!(matches!(*last, FetchError::Network(_)));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_request_timeout_counts_as_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(sample_body())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server)
        .with_retry_policy(RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
        })
        .with_request_timeout(Duration::from_millis(50));

    let err = client.fetch_aggregate(None).await.unwrap_err();
    match err {
        FetchError::RetriesExhausted { retries, last } => {
            assert_eq!(retries, 1);
            assert!(matches!(*last, FetchError::Network(_)));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stalled_body_times_out() {
    // Headers arrive promptly, then the body stops partway through
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"code\":",
                    )
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    let client = CoinGlassClient::new(&format!("http://{}{}", addr, ENDPOINT))
        .unwrap()
        .with_retry_policy(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        })
        .with_request_timeout(Duration::from_millis(200));

    let result = tokio::time::timeout(Duration::from_secs(3), client.fetch_aggregate(None))
        .await
        .expect("fetch should give up on a stalled body");

    match result {
        Err(FetchError::RetriesExhausted { retries, last }) => {
            assert_eq!(retries, 0);
            assert!(matches!(*last, FetchError::Network(_)), "got {:?}", last);
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unusable_api_key_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_aggregate(Some("line\nbreak")).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidApiKey(_)), "got {:?}", err);
}
