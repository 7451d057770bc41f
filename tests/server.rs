use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use nuggit::server::{router, AppState};
use nuggit::sqlite_store::SqliteStore;
use nuggit::{db, migrate};

/// Serves a fresh in-memory store on an ephemeral port and returns its base
/// URL.
async fn spawn_server() -> String {
    let pool = db::connect_memory().await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let state = AppState::new(Arc::new(SqliteStore::new(pool)), Duration::from_secs(10));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn pipe(name: &str, actions: Value) -> Value {
    json!({
        "api_version": "v1",
        "kind": "pipe",
        "metadata": {"name": name},
        "spec": {"actions": actions, "point": {"scalar": "string"}},
    })
}

async fn create(client: &reqwest::Client, base: &str, resource: Value) -> String {
    let resp = client
        .post(format!("{}/api/resources", base))
        .json(&resource)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_trigger_and_exchange_flow() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    create(
        &client,
        &base,
        pipe("foo", json!([{"action": "selector", "selector": ".foo"}])),
    )
    .await;
    let foo_text = create(
        &client,
        &base,
        pipe(
            "foo-text",
            json!([{"action": "pipe", "name": "foo"}, {"action": "field", "field": "innerText"}]),
        ),
    )
    .await;
    assert!(foo_text.starts_with("foo-text@"));

    let resp = client
        .post(format!("{}/api/rules", base))
        .json(&json!({"hostname": "example.com", "pipes": ["foo-text"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/views", base))
        .json(&json!({"columns": [{"pipe": "foo-text", "alias": "text"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let view: Value = resp.json().await.unwrap();
    let view_uuid = view["uuid"].as_str().unwrap().to_string();

    let trig: Value = client
        .post(format!("{}/api/trigger/implicit", base))
        .json(&json!({"url": "https://example.com/page", "include_pipes": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trig["pipes"][0]["name"], foo_text.as_str());
    assert_eq!(trig["plan"]["steps"].as_array().unwrap().len(), 3);
    let plan_uuid = trig["storage"]["uuid"].as_str().unwrap();

    let resp = client
        .post(format!("{}/api/trigger/exchange", base))
        .json(&json!({
            "uuid": plan_uuid,
            "url": "https://example.com/page",
            "results": [{"pipe": foo_text, "result": "hello"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let out: Value = resp.json().await.unwrap();
    assert_eq!(out["rows"], 1);

    let rows: Value = client
        .get(format!("{}/api/views/{}/rows", base, view_uuid))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows["rows"][0]["text"], "hello");
}

#[tokio::test]
async fn test_pipe_disable_enable() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let foo = create(
        &client,
        &base,
        pipe("foo", json!([{"action": "selector", "selector": ".foo"}])),
    )
    .await;

    let resp = client
        .post(format!("{}/api/pipes/{}:disable", base, foo))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let got: Value = client
        .get(format!("{}/api/pipes/{}", base, foo))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(got["disabled"], true);

    client
        .post(format!("{}/api/pipes/{}:enable", base, foo))
        .send()
        .await
        .unwrap();
    let list: Value = client
        .get(format!("{}/api/pipes", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["pipes"][0]["disabled"], false);

    let resp = client
        .post(format!("{}/api/pipes/{}:frobnicate", base, foo))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_error_contract() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/resources/missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "not found");
    assert!(body["reason"].as_str().unwrap().contains("missing"));

    let resp = client
        .post(format!("{}/api/resources", base))
        .json(&json!({"api_version": "v1", "kind": "gadget", "metadata": {"name": "x"}, "spec": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "invalid argument");

    let resp = client
        .post(format!("{}/api/trigger/implicit", base))
        .json(&json!({"url": "not a url"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_resource_lifecycle() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let foo = create(
        &client,
        &base,
        pipe("foo", json!([{"action": "selector", "selector": ".foo"}])),
    )
    .await;
    create(
        &client,
        &base,
        pipe("bar", json!([{"action": "pipe", "name": "foo"}, {"action": "field", "field": "id"}])),
    )
    .await;

    let list: Value = client
        .get(format!("{}/api/resources?kind=pipe", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["resources"].as_array().unwrap().len(), 2);

    let resp = client
        .delete(format!("{}/api/resources/{}", base, foo))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 412);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "failed precondition");

    let resp = client
        .delete(format!("{}/api/resources/bar", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .delete(format!("{}/api/resources/{}", base, foo))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_delete_planned_pipe_explains() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let foo = create(
        &client,
        &base,
        pipe("foo", json!([{"action": "selector", "selector": ".foo"}])),
    )
    .await;
    let rule = json!({"always_trigger": true, "pipes": [foo]});
    client
        .post(format!("{}/api/rules", base))
        .json(&rule)
        .send()
        .await
        .unwrap();
    let resp = client
        .post(format!("{}/api/trigger/implicit", base))
        .json(&json!({"url": "https://example.com/"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .delete(format!("{}/api/rules", base))
        .json(&rule)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let resp = client
        .delete(format!("{}/api/resources/{}", base, foo))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 412);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "failed precondition");
    assert!(body["reason"].as_str().unwrap().contains("trigger plan"));
}
