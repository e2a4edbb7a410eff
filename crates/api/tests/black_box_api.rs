use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use medscribe_ai::{AiError, FakeBackend, FakeOp};
use medscribe_api::app::{Background, build_app};
use medscribe_api::config::AppConfig;
use medscribe_auth::TokenClaims;
use medscribe_core::UserId;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    // Workers stop when this is dropped.
    _background: Background,
}

impl TestServer {
    async fn spawn(backend: Arc<FakeBackend>) -> Self {
        let config = AppConfig {
            jwt_secret: SECRET.to_string(),
            job_workers: 2,
            ..AppConfig::default()
        };
        let app = build_app(&config, backend).await.expect("failed to build app");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let router = app.router;
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _background: app.background,
        }
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

fn mint_token(secret: &str, user: UserId) -> String {
    let now = Utc::now();
    let claims = TokenClaims::new(user, now - ChronoDuration::seconds(5), now + ChronoDuration::minutes(10));

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to encode token")
}

async fn create_patient(client: &reqwest::Client, server: &TestServer, token: &str) -> String {
    let res = client
        .post(server.url("/patients"))
        .bearer_auth(token)
        .json(&json!({
            "first_name": "Lucía",
            "last_name": "Márquez",
            "second_last_name": "Ortega",
            "address": "Av. del Puerto 4",
            "date_of_birth": "1971-06-03",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn create_consultation(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    patient_id: &str,
) -> String {
    let res = client
        .post(server.url("/consultations"))
        .bearer_auth(token)
        .json(&json!({
            "patient_id": patient_id,
            "scheduled_on": "2026-03-02T09:30:00Z",
            "time": "09:30",
            "description": "seguimiento",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn poll_until_done(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    path: &str,
) -> Value {
    for _ in 0..200 {
        let res = client
            .get(server.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job at {path} did not finish in time");
}

async fn submit_chat(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    consultation_id: &str,
    prompt: &str,
) -> reqwest::Response {
    client
        .post(server.url("/jobs/chat"))
        .bearer_auth(token)
        .json(&json!({ "consultation_id": consultation_id, "prompt": prompt }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_public_and_everything_else_needs_a_token() {
    let server = TestServer::spawn(Arc::new(FakeBackend::new())).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(server.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let forged = mint_token("other-secret", UserId::new());
    let res = client
        .get(server.url("/patients"))
        .bearer_auth(&forged)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let user = UserId::new();
    let res = client
        .get(server.url("/whoami"))
        .bearer_auth(mint_token(SECRET, user))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user_id"], user.to_string());
}

#[tokio::test]
async fn transcribe_chat_and_report_flow() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .reply(FakeOp::Transcribe, Ok("dolor torácico leve".into()))
        .reply(FakeOp::Complete, Ok("Reposo y control en una semana.".into()))
        .reply(FakeOp::Summarize, Ok("Paciente estable.".into()));
    let server = TestServer::spawn(backend.clone()).await;
    let client = reqwest::Client::new();
    let token = mint_token(SECRET, UserId::new());

    let patient_id = create_patient(&client, &server, &token).await;
    let consultation_id = create_consultation(&client, &server, &token, &patient_id).await;

    // Transcription: multipart upload, 202, then poll.
    let form = Form::new()
        .text("consultation_id", consultation_id.clone())
        .part(
            "file",
            Part::bytes(b"RIFF....WAVE".to_vec())
                .file_name("nota.wav")
                .mime_str("audio/wav")
                .unwrap(),
        );
    let res = client
        .post(server.url("/jobs/transcribe"))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    assert_eq!(accepted["status"], "processing");
    assert_eq!(accepted["consultation_id"], consultation_id);
    let job_id = accepted["job_id"].as_str().unwrap();

    let done = poll_until_done(&client, &server, &token, &format!("/jobs/transcribe/{job_id}")).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["transcription"], "dolor torácico leve");

    // Chat.
    let res = submit_chat(&client, &server, &token, &consultation_id, "¿Tratamiento?").await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    let chat_id = accepted["job_id"].as_str().unwrap().to_string();
    let done = poll_until_done(&client, &server, &token, &format!("/jobs/chat/{chat_id}")).await;
    assert_eq!(done["response"], "Reposo y control en una semana.");

    // A chat id on the report endpoint is not found.
    let res = client
        .get(server.url(&format!("/jobs/report/{chat_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Report over both entries.
    let res = client
        .post(server.url("/jobs/report"))
        .bearer_auth(&token)
        .json(&json!({ "consultation_id": consultation_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    let report_id = accepted["job_id"].as_str().unwrap();
    let done = poll_until_done(&client, &server, &token, &format!("/jobs/report/{report_id}")).await;
    assert_eq!(done["report"], "Paciente estable.");

    let summarize_input = backend
        .calls()
        .into_iter()
        .find(|c| c.op == FakeOp::Summarize)
        .unwrap()
        .input;
    assert!(summarize_input.contains("dolor torácico leve"));
    assert!(summarize_input.contains("Question: ¿Tratamiento?"));

    // The ledger holds the three entries in append order; the report is cached.
    let res = client
        .get(server.url(&format!("/consultations/{consultation_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let detail: Value = res.json().await.unwrap();
    assert_eq!(detail["report_text"], "Paciente estable.");
    assert_eq!(detail["patient"]["last_name"], "Márquez");
    let kinds: Vec<&str> = detail["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["transcript", "qa", "report"]);
}

#[tokio::test]
async fn report_without_resources_is_a_precondition_failure() {
    let server = TestServer::spawn(Arc::new(FakeBackend::new())).await;
    let client = reqwest::Client::new();
    let token = mint_token(SECRET, UserId::new());

    let patient_id = create_patient(&client, &server, &token).await;
    let consultation_id = create_consultation(&client, &server, &token, &patient_id).await;

    let res = client
        .post(server.url("/jobs/report"))
        .bearer_auth(&token)
        .json(&json!({ "consultation_id": consultation_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "precondition_failed");
}

#[tokio::test]
async fn other_users_cannot_touch_a_consultation_or_its_jobs() {
    let server = TestServer::spawn(Arc::new(FakeBackend::new())).await;
    let client = reqwest::Client::new();
    let owner = mint_token(SECRET, UserId::new());
    let intruder = mint_token(SECRET, UserId::new());

    let patient_id = create_patient(&client, &server, &owner).await;
    let consultation_id = create_consultation(&client, &server, &owner, &patient_id).await;

    let res = client
        .get(server.url(&format!("/consultations/{consultation_id}")))
        .bearer_auth(&intruder)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = submit_chat(&client, &server, &intruder, &consultation_id, "hola").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = submit_chat(&client, &server, &owner, &consultation_id, "hola").await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    let job_id = accepted["job_id"].as_str().unwrap();

    let res = client
        .get(server.url(&format!("/jobs/chat/{job_id}")))
        .bearer_auth(&intruder)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(server.url("/patients"))
        .bearer_auth(&intruder)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["items"], json!([]));
}

#[tokio::test]
async fn backend_failure_ends_in_a_failed_job_and_an_untouched_ledger() {
    let backend = Arc::new(FakeBackend::new());
    backend.reply(FakeOp::Complete, Err(AiError::Backend("500: upstream exploded".into())));
    let server = TestServer::spawn(backend).await;
    let client = reqwest::Client::new();
    let token = mint_token(SECRET, UserId::new());

    let patient_id = create_patient(&client, &server, &token).await;
    let consultation_id = create_consultation(&client, &server, &token, &patient_id).await;

    let res = submit_chat(&client, &server, &token, &consultation_id, "¿Dosis?").await;
    let accepted: Value = res.json().await.unwrap();
    let job_id = accepted["job_id"].as_str().unwrap();

    let done = poll_until_done(&client, &server, &token, &format!("/jobs/chat/{job_id}")).await;
    assert_eq!(done["status"], "failed");
    assert!(done["error"].as_str().unwrap().contains("upstream exploded"));

    let res = client
        .get(server.url(&format!("/consultations/{consultation_id}/resources")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["items"], json!([]));
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let server = TestServer::spawn(Arc::new(FakeBackend::new())).await;
    let client = reqwest::Client::new();
    let token = mint_token(SECRET, UserId::new());

    let res = client
        .get(server.url(&format!("/jobs/chat/{}", uuid::Uuid::now_v7())))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(server.url("/jobs/chat/not-a-uuid"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = submit_chat(&client, &server, &token, &uuid::Uuid::now_v7().to_string(), "hola").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
