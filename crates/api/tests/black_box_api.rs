use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use neuroviz_api::app::AppServices;
use neuroviz_auth::JwtClaims;
use neuroviz_core::{SessionId, UserId};
use neuroviz_infra::compute::HttpComputeClient;
use neuroviz_infra::jobs::DispatcherConfig;
use reqwest::StatusCode;
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    compute: MockServer,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let compute = MockServer::start().await;
        let client = HttpComputeClient::new(
            compute.uri(),
            Duration::from_millis(500),
            Duration::from_secs(1),
        )
        .expect("compute client");
        let services = Arc::new(AppServices::in_memory(
            Arc::new(client),
            DispatcherConfig::default(),
        ));

        // Same router as prod, bound to an ephemeral port.
        let app = neuroviz_api::app::build_app(services.clone(), JWT_SECRET.to_string());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            compute,
            handle,
        }
    }

    fn register_session(&self, owner: UserId, file_path: &str) -> SessionId {
        self.services
            .session_directory()
            .expect("in-memory services")
            .register(owner, file_path)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(user: UserId) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user,
        issued_at: now - ChronoDuration::seconds(1),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn job_eventually_terminal(
    client: &reqwest::Client,
    srv: &TestServer,
    token: &str,
    id: &str,
) -> Value {
    // Execution is asynchronous; poll until the job settles.
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/jobs/{id}")))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["state"] == "COMPLETED" || body["state"] == "FAILED" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {id} did not reach a terminal state within timeout");
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let client = reqwest::Client::new();
    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn caller_identity_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let user = UserId::new();

    let res = reqwest::Client::new()
        .get(srv.url("/whoami"))
        .bearer_auth(mint_jwt(user))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user_id"].as_str().unwrap(), user.to_string());
}

#[tokio::test]
async fn preprocess_job_lifecycle_submit_poll_complete() {
    let srv = TestServer::spawn().await;
    Mock::given(method("POST"))
        .and(path("/preprocess/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"power": 1.23})))
        .expect(1)
        .mount(&srv.compute)
        .await;

    let user = UserId::new();
    let session = srv.register_session(user, "/data/s1.edf");
    let token = mint_jwt(user);
    let client = reqwest::Client::new();
    let params = json!({"bandpass": [5.0, 35.0], "notch": 60, "artifactRejection": false});

    let res = client
        .post(srv.url(&format!("/sessions/{session}/preprocess")))
        .bearer_auth(&token)
        .json(&params)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["kind"], "PREPROCESS");
    assert_eq!(created["session_id"], session.to_string());
    assert_eq!(created["params"], params);
    assert!(created["created_at"].is_string());

    let id = created["id"].as_str().unwrap();
    let done = job_eventually_terminal(&client, &srv, &token, id).await;
    assert_eq!(done["state"], "COMPLETED");
    assert_eq!(done["result"], json!({"power": 1.23}));
    assert!(done["error"].is_null());

    let latest: Value = client
        .get(srv.url(&format!("/sessions/{session}/jobs/latest?kind=PREPROCESS")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["id"], id);
}

#[tokio::test]
async fn empty_preprocess_body_uses_defaults() {
    let srv = TestServer::spawn().await;
    Mock::given(method("POST"))
        .and(path("/preprocess/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&srv.compute)
        .await;

    let user = UserId::new();
    let session = srv.register_session(user, "/data/s1.edf");

    let res = reqwest::Client::new()
        .post(srv.url(&format!("/sessions/{session}/preprocess")))
        .bearer_auth(mint_jwt(user))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(
        created["params"],
        json!({"bandpass": [1.0, 40.0], "notch": 50, "artifactRejection": true})
    );
}

#[tokio::test]
async fn invalid_parameters_are_rejected_before_any_job_exists() {
    let srv = TestServer::spawn().await;
    let user = UserId::new();
    let session = srv.register_session(user, "/data/s1.edf");
    let token = mint_jwt(user);
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url(&format!("/sessions/{session}/preprocess")))
        .bearer_auth(&token)
        .json(&json!({"notch": 45}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_parameters");

    let jobs: Value = client
        .get(srv.url(&format!("/sessions/{session}/jobs")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs, json!([]));
}

#[tokio::test]
async fn foreign_session_and_job_are_not_found() {
    let srv = TestServer::spawn().await;
    Mock::given(method("POST"))
        .and(path("/classify/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"label": "rest"})))
        .mount(&srv.compute)
        .await;

    let owner = UserId::new();
    let session = srv.register_session(owner, "/data/s1.edf");
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url(&format!("/sessions/{session}/jobs")))
        .bearer_auth(mint_jwt(owner))
        .json(&json!({"kind": "CLASSIFY"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let job: Value = res.json().await.unwrap();

    let stranger = mint_jwt(UserId::new());
    let res = client
        .post(srv.url(&format!("/sessions/{session}/preprocess")))
        .bearer_auth(&stranger)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "session_not_found");

    let res = client
        .get(srv.url(&format!("/jobs/{}", job["id"].as_str().unwrap())))
        .bearer_auth(&stranger)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/jobs/not-a-uuid"))
        .bearer_auth(&stranger)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn compute_rejection_is_recorded_on_the_job() {
    let srv = TestServer::spawn().await;
    Mock::given(method("GET"))
        .and(path("/analytics/bandpower"))
        .respond_with(ResponseTemplate::new(404).set_body_string("File not found"))
        .mount(&srv.compute)
        .await;

    let user = UserId::new();
    let session = srv.register_session(user, "/data/missing.edf");
    let token = mint_jwt(user);
    let client = reqwest::Client::new();

    let job: Value = client
        .post(srv.url(&format!("/sessions/{session}/jobs")))
        .bearer_auth(&token)
        .json(&json!({"kind": "ANALYTICS", "params": {"channel": "Cz", "metric": "band_power"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let failed = job_eventually_terminal(&client, &srv, &token, job["id"].as_str().unwrap()).await;
    assert_eq!(failed["state"], "FAILED");
    assert!(failed["result"].is_null());
    assert_eq!(failed["error"]["kind"], "compute_rejected");
    assert!(failed["error"]["message"].as_str().unwrap().contains("File not found"));
}

#[tokio::test]
async fn direct_analytics_forward_payload_and_errors() {
    let srv = TestServer::spawn().await;
    Mock::given(method("GET"))
        .and(path("/analytics/psd"))
        .and(query_param("file", "/data/s1.edf"))
        .and(query_param("channel", "Fz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"frequencies": [1, 2], "power": [0.5, 0.25]})))
        .mount(&srv.compute)
        .await;
    Mock::given(method("POST"))
        .and(path("/classify/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model missing"))
        .mount(&srv.compute)
        .await;

    let user = UserId::new();
    let session = srv.register_session(user, "/data/s1.edf");
    let token = mint_jwt(user);
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url(&format!("/sessions/{session}/analytics/psd?channel=Fz")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["power"], json!([0.5, 0.25]));

    let res = client
        .get(srv.url(&format!("/sessions/{session}/analytics/psd")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url(&format!("/sessions/{session}/classify")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "compute_rejected");
}

#[tokio::test]
async fn compute_health_reports_unreachable_service() {
    let srv = TestServer::spawn().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .mount(&srv.compute)
        .await;

    let client = reqwest::Client::new();
    let res = client.get(srv.url("/health/compute")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["compute"]["status"], "healthy");

    // A server whose compute client points at a closed port.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);
    let services = Arc::new(AppServices::in_memory(
        Arc::new(
            HttpComputeClient::new(
                format!("http://{dead}"),
                Duration::from_millis(500),
                Duration::from_millis(500),
            )
            .unwrap(),
        ),
        DispatcherConfig::default(),
    ));
    let app = neuroviz_api::app::build_app(services, JWT_SECRET.to_string());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let res = client
        .get(format!("http://{addr}/health/compute"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    handle.abort();
}
