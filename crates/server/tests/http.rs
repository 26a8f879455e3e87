use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use consumer::{Backoff, ConsumerSettings, OrderConsumer, Outcome};
use model::fixtures::sample_order;
use prometheus::Registry;
use queue::{DurableQueue, InMemoryQueue};
use repository::InMemoryOrdersRepository;
use serde_json::{Value, json};
use server::Server;
use service::{MessageServiceImpl, OrderServiceImpl};
use tower::ServiceExt;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

struct TestApp {
    router: Router,
    queue: Arc<InMemoryQueue>,
    repo: Arc<InMemoryOrdersRepository>,
    consumer: OrderConsumer<InMemoryQueue, InMemoryOrdersRepository>,
}

impl TestApp {
    fn new() -> Self {
        let queue = Arc::new(InMemoryQueue::new());
        let repo = Arc::new(InMemoryOrdersRepository::new());
        let orders = Arc::new(OrderServiceImpl::new(queue.clone(), repo.clone(), "orders"));
        let messages = Arc::new(MessageServiceImpl::new(queue.clone(), "foo", READ_TIMEOUT));
        let server = Server::new(8080, orders, messages, Registry::new()).unwrap();

        let consumer = OrderConsumer::new(
            queue.clone(),
            repo.clone(),
            ConsumerSettings {
                subject: "orders".into(),
                dead_letter_subject: "orders.dlq".into(),
                poll_interval: Duration::from_millis(20),
                backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
                max_deliveries: 0,
                max_subscribe_failures: 3,
            },
        );

        Self {
            router: server.router(),
            queue,
            repo,
            consumer,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn get(&self, uri: &str) -> (StatusCode, String) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_order(&self, body: impl Into<Body>) -> (StatusCode, String) {
        let request = Request::post("/order")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap();
        self.send(request).await
    }

    /// Lets the consumer process one pending order message.
    async fn consume_one(&self) -> Outcome {
        let mut sub = self.queue.subscribe("orders").await.unwrap();
        let msg = sub.next(Duration::from_millis(50)).await.unwrap().unwrap();
        self.consumer.handle(msg).await
    }
}

#[tokio::test]
async fn test_submitted_order_is_readable_after_ingestion() {
    let app = TestApp::new();
    let payload = json!({
        "order_uid": "abc123",
        "track_number": "T1",
        "delivery": {"name": "A"},
        "payment": {"amount": 10},
    });

    let (status, body) = app.post_order(payload.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"order_uid": "abc123"}));

    // Accepted means queued, not yet stored.
    let (status, _) = app.get("/order/abc123").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.consume_one().await, Outcome::Persisted("abc123".into()));

    let (status, body) = app.get("/order/abc123").await;
    assert_eq!(status, StatusCode::OK);
    let order: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(order["order_uid"], "abc123");
    assert_eq!(order["track_number"], "T1");
    assert_eq!(order["delivery"]["name"], "A");
    assert_eq!(order["payment"]["amount"], 10);
    assert_eq!(order["items"], json!([]));
}

#[tokio::test]
async fn test_invalid_order_is_rejected() {
    let app = TestApp::new();

    let (status, _) = app.post_order("{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut order = sample_order("abc123");
    order.items[0].sale = 150;
    let (status, body) = app.post_order(serde_json::to_vec(&order).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("items[0].sale"));

    assert!(app.queue.messages("orders").await.is_empty());
}

#[tokio::test]
async fn test_submit_fails_when_queue_is_down() {
    let app = TestApp::new();
    app.queue.set_unavailable(true);
    let (status, _) = app
        .post_order(serde_json::to_vec(&sample_order("abc123")).unwrap())
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let app = TestApp::new();
    let (status, _) = app.get("/order/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_order_id_is_bad_request() {
    let app = TestApp::new();
    let (status, body) = app.get("/order/").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("order id is required"));

    let (status, _) = app.get("/order/%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_orders() {
    let app = TestApp::new();
    let (status, body) = app.get("/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");

    for uid in ["b", "a"] {
        app.post_order(serde_json::to_vec(&sample_order(uid)).unwrap())
            .await;
        app.consume_one().await;
    }
    let (status, body) = app.get("/orders").await;
    assert_eq!(status, StatusCode::OK);
    let orders: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(orders.len(), 2);

    app.repo.set_unavailable(true);
    let (status, _) = app.get("/orders").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_publish_then_read() {
    let app = TestApp::new();

    let (status, body) = app.get("/publish?message=hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Published message: hello");

    let (status, body) = app.get("/read").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Received a message: hello");
}

#[tokio::test]
async fn test_publish_requires_message() {
    let app = TestApp::new();
    let (status, _) = app.get("/publish").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.get("/publish?message=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_on_fresh_subject_times_out() {
    let app = TestApp::new();
    let started = Instant::now();
    let (status, body) = app.get("/read").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, "No messages available");
    assert!(started.elapsed() >= READ_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_read_fails_when_queue_is_down() {
    let app = TestApp::new();
    app.queue.set_unavailable(true);
    let (status, _) = app.get("/read").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    app.get("/order/does-not-exist").await;
    let (status, body) = app.get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("http_requests_total"));
    assert!(body.contains(r#"endpoint="/order/{order_uid}""#));
    assert!(!body.contains("does-not-exist"));
}
