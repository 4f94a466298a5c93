use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use blobgate_core::StorageGateway;
use blobgate_server::state::gateway_settings;
use blobgate_server::{routes, AppState, GatewayConfig, VerificationMode};
use blobgate_storage::MemoryBlobStore;
use jsonwebtoken::{encode, EncodingKey, Header};
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Helper to spawn a server on a random port, backed by an in-memory store
async fn spawn_server(config: GatewayConfig) -> (String, MemoryBlobStore) {
    let store = MemoryBlobStore::new();
    let gateway = StorageGateway::with_backend(gateway_settings(&config), Arc::new(store.clone()));

    let state = Arc::new(AppState::with_gateway(config, Arc::new(gateway)).unwrap());
    let app = routes::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), store)
}

async fn spawn_default() -> (String, MemoryBlobStore) {
    spawn_server(GatewayConfig::default()).await
}

// Token the unverified mode accepts
fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

fn token_for(user: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    unsigned_token(&json!({"oid": user, "name": user, "exp": exp}))
}

fn file_form(filename: &str, data: Vec<u8>, mime: &str) -> Form {
    let part = Part::bytes(data)
        .file_name(filename.to_string())
        .mime_str(mime)
        .unwrap();
    Form::new().part("file", part)
}

async fn upload(client: &Client, base_url: &str, token: &str, form: Form) -> reqwest::Response {
    client
        .post(format!("{}/api/upload/", base_url))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn list(client: &Client, base_url: &str, token: &str) -> (StatusCode, Value) {
    let res = client
        .get(format!("{}/api/files/", base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

#[tokio::test]
async fn test_health_without_auth() {
    let (base_url, _) = spawn_default().await;
    let client = Client::new();

    for path in ["/api/health/", "/api/health"] {
        let res = client.get(format!("{}{}", base_url, path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["message"], "File upload service is running");
    }
}

#[tokio::test]
async fn test_security_auth_enforcement() {
    let (base_url, _) = spawn_default().await;
    let client = Client::new();

    // No token
    let res = client.get(format!("{}/api/files/", base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(body["message"], "No authorization token provided");

    // Malformed token
    let res = client
        .get(format!("{}/api/files/", base_url))
        .header("Authorization", "Bearer malformed.token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid token");

    // Expired token
    let expired = unsigned_token(&json!({"oid": "u1", "exp": 1_000_000}));
    let res = client
        .get(format!("{}/api/files/", base_url))
        .bearer_auth(expired)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid token");

    // Upload is protected too
    let res = client
        .post(format!("{}/api/upload/", base_url))
        .multipart(file_form("a.txt", b"hi".to_vec(), "text/plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_then_list() {
    let (base_url, store) = spawn_default().await;
    let client = Client::new();
    let token = token_for("u1");

    let res = upload(
        &client,
        &base_url,
        &token,
        file_form("notes.txt", b"0123456789".to_vec(), "text/plain"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "File uploaded successfully");
    let data = &body["data"];
    assert_eq!(data["success"], true);
    assert_eq!(data["size"], 10);
    assert_eq!(data["original_filename"], "notes.txt");
    assert_eq!(data["content_type"], "text/plain");

    let key = data["blob_name"].as_str().unwrap();
    let pattern = Regex::new(r"^u1/\d{8}_\d{6}_[a-z0-9-]+\.txt$").unwrap();
    assert!(pattern.is_match(key), "unexpected key {}", key);
    assert!(data["blob_url"].as_str().unwrap().ends_with(key));
    assert!(chrono::DateTime::parse_from_rfc3339(data["uploaded_at"].as_str().unwrap()).is_ok());
    assert_eq!(store.get(key).unwrap().as_ref(), b"0123456789");

    let (status, listing) = list(&client, &base_url, &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["message"], "Files retrieved successfully");
    assert_eq!(listing["count"], 1);
    let entry = &listing["data"][0];
    assert_eq!(entry["name"], key);
    assert_eq!(entry["size"], 10);
    assert_eq!(entry["content_type"], "text/plain");
}

#[tokio::test]
async fn test_listing_is_scoped_to_owner() {
    let (base_url, _) = spawn_default().await;
    let client = Client::new();
    let alice = token_for("alice");
    let bob = token_for("bob");

    for name in ["a.txt", "b.txt"] {
        let res = upload(&client, &base_url, &alice, file_form(name, b"a".to_vec(), "text/plain")).await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }
    let res = upload(&client, &base_url, &bob, file_form("c.txt", b"b".to_vec(), "text/plain")).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let (_, listing) = list(&client, &base_url, &alice).await;
    assert_eq!(listing["count"], 2);

    let (_, listing) = list(&client, &base_url, &bob).await;
    assert_eq!(listing["count"], 1);
    assert!(listing["data"][0]["name"].as_str().unwrap().starts_with("bob/"));

    let (_, listing) = list(&client, &base_url, &token_for("carol")).await;
    assert_eq!(listing["count"], 0);
    assert_eq!(listing["data"], json!([]));
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let (base_url, store) = spawn_default().await;
    let client = Client::new();

    let res = upload(
        &client,
        &base_url,
        &token_for("u1"),
        file_form("big.bin", vec![0u8; 60 * 1024 * 1024], "application/octet-stream"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "File too large");
    assert!(body["message"].as_str().unwrap().contains("50MB"));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_body_over_request_limit_rejected() {
    let config = GatewayConfig {
        max_upload_size: 1024,
        max_body_size: 2048,
        ..Default::default()
    };
    let (base_url, store) = spawn_server(config).await;
    let client = Client::new();

    let res = upload(
        &client,
        &base_url,
        &token_for("u1"),
        file_form("big.bin", vec![7u8; 8 * 1024], "application/octet-stream"),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "File too large");
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_upload_without_file() {
    let (base_url, store) = spawn_default().await;
    let client = Client::new();
    let token = token_for("u1");

    // Multipart without a `file` field
    let form = Form::new().text("other", "value");
    let res = upload(&client, &base_url, &token, form).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "No file provided");
    assert_eq!(
        body["message"],
        r#"Please include a file in the request with key "file""#
    );

    // Not multipart at all
    let res = client
        .post(format!("{}/api/upload", base_url))
        .bearer_auth(&token)
        .json(&json!({"file": "inline"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "No file provided");

    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn test_request_id_echoed() {
    let (base_url, _) = spawn_default().await;
    let client = Client::new();

    let res = client
        .get(format!("{}/api/health/", base_url))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "req-42");

    let res = client.get(format!("{}/api/files/", base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_jwks_verification_end_to_end() {
    const SECRET: &[u8] = b"end-to-end-signing-secret-value";

    let jwks = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(SECRET)}]
        })))
        .mount(&jwks)
        .await;

    let config = GatewayConfig {
        verification: VerificationMode::Jwks,
        jwks_url: Some(format!("{}/keys", jwks.uri())),
        ..Default::default()
    };
    let (base_url, _) = spawn_server(config).await;
    let client = Client::new();

    let claims = json!({"oid": "u1", "exp": chrono::Utc::now().timestamp() + 600});
    let mut header = Header::default();
    header.kid = Some("k1".to_string());

    let signed = encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap();
    let (status, listing) = list(&client, &base_url, &signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["count"], 0);

    let forged = encode(&header, &claims, &EncodingKey::from_secret(b"someone-else")).unwrap();
    let (status, body) = list(&client, &base_url, &forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");

    // Well-formed but unsigned tokens are refused in this mode
    let (status, _) = list(&client, &base_url, &token_for("u1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
