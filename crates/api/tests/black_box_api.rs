use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use fetchgate_api::app::{build_router, AppContext};
use fetchgate_core::{Job, JobId, Sanitizer, VendorKind};
use fetchgate_infra::dispatch::{Dispatcher, DispatcherConfig, DispatcherHandle};
use fetchgate_infra::queue::{Delivery, InMemoryQueue, JobQueue, QueueError};
use fetchgate_infra::reconcile::Reconciler;
use fetchgate_infra::store::{InMemoryJobStore, JobStore};
use fetchgate_infra::sweep::{Sweeper, SweeperHandle};
use fetchgate_infra::vendor::{CallOutcome, VendorError, VendorGateway};

/// Stub vendor: routes by the job's vendor kind, no HTTP involved.
struct StubVendor {
    sync_reply: serde_json::Value,
}

#[async_trait]
impl VendorGateway for StubVendor {
    async fn call(&self, job: &Job) -> Result<CallOutcome, VendorError> {
        match job.vendor {
            VendorKind::Sync => Ok(CallOutcome::Completed(self.sync_reply.clone())),
            VendorKind::Async => Ok(CallOutcome::Accepted),
        }
    }
}

struct TestServer {
    base_url: String,
    store: Arc<InMemoryJobStore>,
    serve: tokio::task::JoinHandle<()>,
    // Dropping these stops the background loops.
    _dispatcher: Option<DispatcherHandle>,
    _sweeper: Option<SweeperHandle>,
}

impl TestServer {
    /// Full harness: router + dispatcher pool + sweeper, all on in-memory
    /// backends, bound to an ephemeral port.
    async fn spawn(sync_reply: serde_json::Value, callback_timeout: Duration) -> Self {
        let store = InMemoryJobStore::arc();
        let queue = Arc::new(InMemoryQueue::new(Duration::from_millis(50)));
        let reconciler = Arc::new(Reconciler::new(store.clone(), Sanitizer::default()));

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            queue.clone(),
            Arc::new(StubVendor { sync_reply }),
            Sanitizer::default(),
            3,
        ));
        let dispatcher_handle = dispatcher.spawn(DispatcherConfig {
            workers: 2,
            dequeue_block: Duration::from_millis(20),
            consumer_prefix: "test".to_string(),
        });
        let sweeper_handle =
            Sweeper::new(store.clone(), callback_timeout).spawn(Duration::from_millis(20));

        let app = build_router(AppContext {
            store: store.clone(),
            queue,
            reconciler,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let serve = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            serve,
            _dispatcher: Some(dispatcher_handle),
            _sweeper: Some(sweeper_handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.serve.abort();
    }
}

async fn create_job(
    client: &reqwest::Client,
    base_url: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let res = client
        .post(format!("{base_url}/jobs"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

/// Poll until the job reaches `want` or the timeout elapses.
async fn await_status(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    want: &str,
) -> serde_json::Value {
    for _ in 0..100 {
        let res = client
            .get(format!("{base_url}/jobs/{id}"))
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if body["status"] == want {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached status {want}");
}

#[tokio::test]
async fn health_is_up() {
    let srv = TestServer::spawn(json!({}), Duration::from_secs(60)).await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_returns_request_id_and_job_starts_pending() {
    let srv = TestServer::spawn(json!({}), Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    let (status, body) = create_job(&client, &srv.base_url, json!({"dataset": "sales-q3"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["request_id"].as_str().unwrap().to_string();
    id.parse::<JobId>().unwrap();

    // Pending immediately after create; the pool may claim it any moment, so
    // check the store record's payload rather than racing on status.
    let job = srv
        .store
        .get(id.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.payload, json!({"dataset": "sales-q3"}));
    assert_eq!(job.vendor, VendorKind::Sync);
}

#[tokio::test]
async fn sync_job_completes_with_sanitized_result() {
    let srv = TestServer::spawn(
        json!({"rows": 12, "owner_email": "x@y.z", "note": "  padded  "}),
        Duration::from_secs(60),
    )
    .await;
    let client = reqwest::Client::new();

    let (_, body) = create_job(&client, &srv.base_url, json!({"dataset": "a"})).await;
    let id = body["request_id"].as_str().unwrap();

    let job = await_status(&client, &srv.base_url, id, "complete").await;
    assert_eq!(job["result"], json!({"rows": 12, "note": "padded"}));
    assert!(job.get("error").is_none());
}

#[tokio::test]
async fn async_job_waits_then_completes_via_webhook() {
    let srv = TestServer::spawn(json!({}), Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    let (_, body) = create_job(
        &client,
        &srv.base_url,
        json!({"dataset": "b", "vendor": "async"}),
    )
    .await;
    let id = body["request_id"].as_str().unwrap().to_string();

    await_status(&client, &srv.base_url, &id, "awaiting_callback").await;

    let res = client
        .post(format!("{}/vendor-webhook/async", srv.base_url))
        .json(&json!({"job_id": id, "data": {"rows": 4, "contact_phone": "555"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let job = await_status(&client, &srv.base_url, &id, "complete").await;
    assert_eq!(job["result"], json!({"rows": 4}));
}

#[tokio::test]
async fn duplicate_webhook_is_idempotent() {
    let srv = TestServer::spawn(json!({}), Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    let (_, body) = create_job(&client, &srv.base_url, json!({"vendor": "async"})).await;
    let id = body["request_id"].as_str().unwrap().to_string();
    await_status(&client, &srv.base_url, &id, "awaiting_callback").await;

    for payload in [json!({"rows": 1}), json!({"rows": 999})] {
        let res = client
            .post(format!("{}/vendor-webhook/async", srv.base_url))
            .json(&json!({"job_id": id, "data": payload}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    // First callback's result sticks.
    let job = await_status(&client, &srv.base_url, &id, "complete").await;
    assert_eq!(job["result"], json!({"rows": 1}));
}

#[tokio::test]
async fn callback_timeout_fails_job_and_late_webhook_cannot_resurrect() {
    // Zero-ish callback window: the sweep fails the job almost immediately.
    let srv = TestServer::spawn(json!({}), Duration::from_millis(1)).await;
    let client = reqwest::Client::new();

    let (_, body) = create_job(&client, &srv.base_url, json!({"vendor": "async"})).await;
    let id = body["request_id"].as_str().unwrap().to_string();

    let job = await_status(&client, &srv.base_url, &id, "failed").await;
    assert!(job["error"].as_str().unwrap().contains("callback"));

    // Late callback: accepted (200) but the sweep's decision stands.
    let res = client
        .post(format!("{}/vendor-webhook/async", srv.base_url))
        .json(&json!({"job_id": id, "data": {"rows": 9}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/jobs/{}", srv.base_url, id))
        .send()
        .await
        .unwrap();
    let job: serde_json::Value = res.json().await.unwrap();
    assert_eq!(job["status"], "failed");
    assert!(job.get("result").is_none());
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let srv = TestServer::spawn(json!({}), Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    // Non-object payload.
    let (status, _) = create_job(&client, &srv.base_url, json!([1, 2, 3])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown vendor value.
    let (status, _) = create_job(&client, &srv.base_url, json!({"vendor": "ftp"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Malformed job id.
    let res = client
        .get(format!("{}/jobs/not-a-uuid", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Unknown job id.
    let res = client
        .get(format!("{}/jobs/{}", srv.base_url, JobId::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Webhook for a job that does not exist.
    let res = client
        .post(format!("{}/vendor-webhook/async", srv.base_url))
        .json(&json!({"job_id": JobId::new(), "data": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Webhook for a vendor that does not exist.
    let res = client
        .post(format!("{}/vendor-webhook/carrier-pigeon", srv.base_url))
        .json(&json!({"job_id": JobId::new(), "data": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Webhook with a malformed job id.
    let res = client
        .post(format!("{}/vendor-webhook/async", srv.base_url))
        .json(&json!({"job_id": "not-a-uuid", "data": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

/// Queue whose enqueue always fails, recording the id it was handed.
struct BrokenQueue {
    last: std::sync::Mutex<Option<JobId>>,
}

#[async_trait]
impl JobQueue for BrokenQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        *self.last.lock().unwrap() = Some(job_id);
        Err(QueueError::Connection("stream backend down".to_string()))
    }

    async fn dequeue(
        &self,
        _consumer: &str,
        _block: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        Ok(None)
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn len(&self) -> Result<u64, QueueError> {
        Ok(0)
    }
}

#[tokio::test]
async fn enqueue_failure_fails_the_job_instead_of_stranding_it() {
    let store = InMemoryJobStore::arc();
    let queue = Arc::new(BrokenQueue {
        last: std::sync::Mutex::new(None),
    });
    let reconciler = Arc::new(Reconciler::new(store.clone(), Sanitizer::default()));

    let app = build_router(AppContext {
        store: store.clone(),
        queue: queue.clone(),
        reconciler,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let serve = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let (status, _) = create_job(&client, &base_url, json!({"dataset": "x"})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    // The record is terminal with the failure recorded, not stuck pending.
    let id = queue.last.lock().unwrap().expect("enqueue was attempted");
    let job = store.get(id).await.unwrap().unwrap();
    assert!(job.status.is_terminal());
    assert!(job.error.as_deref().unwrap().contains("enqueue failed"));

    serve.abort();
}
