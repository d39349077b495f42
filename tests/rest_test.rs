/// Integration tests for the REST API.
/// Starts the REST server on a free port and drives it with reqwest.
use serde_json::{json, Value};
use std::sync::Arc;
use taskhub::ai::AiClient;
use taskhub::config::DaemonConfig;
use taskhub::sync::event::EventBroadcaster;
use taskhub::tasks::storage::{SqliteTaskRepository, SqliteUserRepository, Storage};
use taskhub::tasks::{Priority, Task};
use taskhub::AppContext;

async fn start_rest_daemon() -> (String, Arc<AppContext>) {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let rest_port = get_free_port();

    let mut config = DaemonConfig::new(
        Some(0),
        Some(data_dir.clone()),
        Some("warn".to_string()),
        None,
    );
    config.rest_port = rest_port;
    config.jwt_secret = Some("test-secret".to_string());
    let config = Arc::new(config);

    let storage = Storage::new(&data_dir).await.unwrap();
    let ctx = Arc::new(AppContext {
        tasks: Arc::new(SqliteTaskRepository::new(storage.pool())),
        users: Arc::new(SqliteUserRepository::new(storage.pool())),
        broadcaster: Arc::new(EventBroadcaster::new()),
        ai: Arc::new(AiClient::new(&config)),
        config,
        started_at: std::time::Instant::now(),
    });

    let ctx_server = ctx.clone();
    tokio::spawn(async move {
        taskhub::rest::start_rest_server(ctx_server).await.ok();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{rest_port}"), ctx)
}

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn register(base: &str, username: &str, password: &str) -> String {
    let resp = reqwest::Client::new()
        .post(format!("{base}/register"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "register failed: {resp:?}");
    let body: Value = resp.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_and_login_round_trip() {
    let (base, _ctx) = start_rest_daemon().await;
    let client = reqwest::Client::new();

    let token = register(&base, "alice", "hunter2").await;
    assert!(!token.is_empty());

    // Correct password gets a fresh token
    let resp = client
        .post(format!("{base}/login"))
        .json(&json!({ "username": "alice", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["token"].is_string());

    // Wrong password and unknown user both reject identically
    for (user, pass) in [("alice", "wrong"), ("nobody", "hunter2")] {
        let resp = client
            .post(format!("{base}/login"))
            .json(&json!({ "username": user, "password": pass }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
    }
}

#[tokio::test]
async fn register_rejects_duplicates_and_missing_fields() {
    let (base, _ctx) = start_rest_daemon().await;
    let client = reqwest::Client::new();

    register(&base, "alice", "hunter2").await;

    let resp = client
        .post(format!("{base}/register"))
        .json(&json!({ "username": "alice", "password": "other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // The rejected attempt must not touch the stored credentials
    let resp = client
        .post(format!("{base}/login"))
        .json(&json!({ "username": "alice", "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .post(format!("{base}/login"))
        .json(&json!({ "username": "alice", "password": "other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    for body in [json!({}), json!({ "username": "bob" }), json!({ "username": "", "password": "x" })] {
        let resp = client
            .post(format!("{base}/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "accepted bad body: {body}");
    }
}

#[tokio::test]
async fn racing_registrations_create_exactly_one_account() {
    let (base, _ctx) = start_rest_daemon().await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/register"))
        .json(&json!({ "username": "alice", "password": "first" }))
        .send();
    let second = client
        .post(format!("{base}/register"))
        .json(&json!({ "username": "alice", "password": "second" }))
        .send();
    let (first, second) = tokio::join!(first, second);
    let statuses = [first.unwrap().status(), second.unwrap().status()];
    assert_eq!(
        statuses.iter().filter(|s| s.is_success()).count(),
        1,
        "exactly one registration may win: {statuses:?}"
    );

    // Only the winning password logs in
    let mut accepted = 0;
    for password in ["first", "second"] {
        let resp = client
            .post(format!("{base}/login"))
            .json(&json!({ "username": "alice", "password": password }))
            .send()
            .await
            .unwrap();
        if resp.status() == 200 {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn preferences_merge_over_defaults() {
    let (base, _ctx) = start_rest_daemon().await;
    let client = reqwest::Client::new();
    let token = register(&base, "alice", "hunter2").await;

    // Defaults: only organization is on
    let resp = client
        .get(format!("{base}/user/preferences"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let prefs: Value = resp.json().await.unwrap();
    assert_eq!(prefs["organization"], json!(true));
    assert_eq!(prefs["petCare"], json!(false));
    assert_eq!(prefs["laundry"], json!(false));

    // A partial write patches only what it names
    let resp = client
        .put(format!("{base}/user/preferences"))
        .bearer_auth(&token)
        .json(&json!({ "petCare": true, "organization": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let prefs: Value = resp.json().await.unwrap();
    assert_eq!(prefs["petCare"], json!(true));
    assert_eq!(prefs["organization"], json!(false));
    assert_eq!(prefs["cooking"], json!(false));

    // And the patch sticks across reads
    let prefs: Value = client
        .get(format!("{base}/user/preferences"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(prefs["petCare"], json!(true));
    assert_eq!(prefs["organization"], json!(false));
}

#[tokio::test]
async fn preferences_require_a_valid_token() {
    let (base, _ctx) = start_rest_daemon().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/user/preferences"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/user/preferences"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn users_endpoint_lists_usernames_only() {
    let (base, _ctx) = start_rest_daemon().await;
    register(&base, "alice", "a").await;
    register(&base, "bob", "b").await;

    let body: Value = reqwest::get(format!("{base}/users"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0], json!({ "username": "alice" }));
    assert_eq!(users[1], json!({ "username": "bob" }));
}

#[tokio::test]
async fn health_reports_version_and_uptime() {
    let (base, _ctx) = start_rest_daemon().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert!(body["uptime_secs"].is_number());
}

fn sample_task(title: &str) -> Task {
    Task {
        id: uuid::Uuid::new_v4().to_string(),
        title: title.to_string(),
        priority: Priority::Medium,
        completed: false,
        created_by: "alice".to_string(),
        assigned_to: "alice".to_string(),
    }
}

#[tokio::test]
async fn prioritize_degrades_to_input_order_without_a_key() {
    let (base, ctx) = start_rest_daemon().await;
    ctx.tasks.save(&sample_task("first")).await.unwrap();
    ctx.tasks.save(&sample_task("second")).await.unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{base}/ai/prioritize"))
        .json(&json!({ "preferences": { "petCare": true } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["aiPriority"], 1);
    assert_eq!(tasks[1]["aiPriority"], 2);
    assert!(tasks[0]["aiReason"].as_str().unwrap().contains("Fallback"));
}

#[tokio::test]
async fn prioritize_with_no_tasks_is_empty_not_an_error() {
    let (base, _ctx) = start_rest_daemon().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/ai/prioritize"))
        .json(&json!({ "preferences": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["tasks"], json!([]));
}

#[tokio::test]
async fn ai_endpoints_require_preferences() {
    let (base, _ctx) = start_rest_daemon().await;
    let client = reqwest::Client::new();

    for path in ["/ai/prioritize", "/ai/insights"] {
        let resp = client
            .post(format!("{base}{path}"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{path} accepted a body without flags");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Preferences are required");
    }
}

#[tokio::test]
async fn insights_surface_upstream_failure() {
    let (base, ctx) = start_rest_daemon().await;
    ctx.tasks.save(&sample_task("only")).await.unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{base}/ai/insights"))
        .json(&json!({ "preferences": { "cooking": true } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "AI insights unavailable");
}
