use async_trait::async_trait;
use blockflow::adapters::MemoryStore;
use blockflow::app::gateway::serve_with_listener;
use blockflow::app::services::{AuthService, GraphExecutionService, GraphManager};
use blockflow::config::AuthConfig;
use blockflow::domain::{CodeExecutor, GraphId, LlmClient, Value};
use blockflow::{Block, Gateway, Graph, GraphRunner, Result};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Writes twice the sum of the inputs to every output.
struct DoublingExecutor;

#[async_trait]
impl CodeExecutor for DoublingExecutor {
    async fn execute(
        &self,
        _code: &str,
        inputs: &BTreeMap<String, Value>,
        outputs: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        let total: i64 = inputs.values().filter_map(Value::as_i64).sum();
        Ok(outputs.iter().map(|o| (o.clone(), json!(total * 2))).collect())
    }
}

struct EchoLlm;

#[async_trait]
impl LlmClient for EchoLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }
}

struct TestGateway {
    addr: SocketAddr,
    client: reqwest::Client,
}

impl TestGateway {
    async fn start() -> Self {
        let graphs = GraphManager::new(Arc::new(MemoryStore::new()));
        let auth = AuthService::new(&AuthConfig::default(), graphs.clone());
        let runner = Arc::new(GraphRunner::new(Arc::new(DoublingExecutor), Arc::new(EchoLlm)));
        let execution = GraphExecutionService::new(graphs.clone(), runner);
        let gateway = Arc::new(Gateway::new(auth, graphs, execution));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_with_listener(listener, gateway, std::future::pending()));

        Self {
            addr,
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, action: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = self
            .client
            .post(format!("http://{}/{}", self.addr, action))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn create(&self, token: &str) -> String {
        let (status, body) = self.call("create", json!({"token": token})).await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["graph_id"].as_str().unwrap().to_string()
    }
}

fn doubling_graph(id: &str) -> Graph {
    let mut graph = Graph::with_id(GraphId::new(id), "doubling");
    graph
        .add_block(Block::variable("x", vec![("a".to_string(), json!(21))]).unwrap())
        .unwrap();
    graph.add_block(Block::code("double", "b = a * 2")).unwrap();
    graph.connect_blocks("x", "double", Some("a"), Some("a")).unwrap();
    graph.block_mut("double").unwrap().add_output_port(Some("b")).unwrap();
    graph
}

#[tokio::test]
async fn test_health() {
    let gateway = TestGateway::start().await;
    let body: serde_json::Value = gateway
        .client
        .get(format!("http://{}/health", gateway.addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "OK", "data": {"message": "Hello gateway"}}));
}

#[tokio::test]
async fn test_request_validation_order() {
    let gateway = TestGateway::start().await;

    let (status, body) = gateway.call("explode", json!({"token": "user1_token"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"status": "Error", "message": "Unknown action explode"}));

    let response = gateway
        .client
        .post(format!("http://{}/list", gateway.addr))
        .header("Content-Type", "text/plain")
        .body("token=user1_token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Request must be JSON");

    let (status, body) = gateway.call("list", json!({"token": "nobody"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Authentication failed");

    let (status, body) = gateway.call("view", json!({"token": "user1_token"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Authorization failed");
}

#[tokio::test]
async fn test_create_view_list_delete() {
    let gateway = TestGateway::start().await;

    let (status, body) = gateway.call("list", json!({"token": "user1_token"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User with username user1 does not exist");

    let id = gateway.create("user1_token").await;
    assert_eq!(id.len(), 32);

    let (status, body) = gateway
        .call("view", json!({"token": "user1_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let graph = Graph::from_json(body["data"]["serialized_graph"].as_str().unwrap()).unwrap();
    assert_eq!(graph.id().as_str(), id);

    let (_, body) = gateway.call("list", json!({"token": "user1_token"})).await;
    assert_eq!(body["data"]["graphs"], json!([id]));

    let (status, _) = gateway
        .call("delete", json!({"token": "user1_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::OK);

    // permissions went away with the graph
    let (status, _) = gateway
        .call("view", json!({"token": "user1_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sharing_controls_access() {
    let gateway = TestGateway::start().await;
    let id = gateway.create("user1_token").await;

    let (status, body) = gateway
        .call("view", json!({"token": "user2_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["message"],
        format!("user2 is not authorized for view on graph {}", id)
    );

    let (status, body) = gateway
        .call("share", json!({"token": "user1_token", "graph_id": id, "target_user": "user2"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing field 'permissions'");

    let mut oversized = vec![false; 35];
    oversized.push(true);
    let (status, body) = gateway
        .call(
            "share",
            json!({"token": "user1_token", "graph_id": id, "target_user": "user2", "permissions": oversized}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("permission flags"));

    let (status, _) = gateway
        .call(
            "share",
            json!({
                "token": "user1_token",
                "graph_id": id,
                "target_user": "user2",
                "permissions": [true, false, false]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = gateway
        .call("view", json!({"token": "user2_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = gateway
        .call("run", json!({"token": "user2_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // only the owner may share
    let (status, _) = gateway
        .call(
            "share",
            json!({"token": "user2_token", "graph_id": id, "target_user": "user1", "permissions": [true]}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_edit_then_run() {
    let gateway = TestGateway::start().await;
    let id = gateway.create("user1_token").await;

    let (status, body) = gateway
        .call("edit", json!({"token": "user1_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing field 'serialized_graph'");

    let (status, _) = gateway
        .call(
            "edit",
            json!({"token": "user1_token", "graph_id": id, "serialized_graph": "{not a graph"}),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let serialized = doubling_graph(&id).to_json().unwrap();
    let (status, _) = gateway
        .call(
            "edit",
            json!({"token": "user1_token", "graph_id": id, "serialized_graph": serialized}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = gateway
        .call("run", json!({"token": "user1_token", "graph_id": id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["executed"], json!(["x", "double"]));
    assert!(body["data"]["duration_ms"].is_u64());

    let (_, body) = gateway
        .call("view", json!({"token": "user1_token", "graph_id": id}))
        .await;
    let graph = Graph::from_json(body["data"]["serialized_graph"].as_str().unwrap()).unwrap();
    assert_eq!(graph.block("double").unwrap().variable("b"), Some(&json!(42)));

    let (status, body) = gateway
        .call(
            "run",
            json!({"token": "user1_token", "graph_id": id, "start_block": "double"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["executed"], json!(["double"]));
}
