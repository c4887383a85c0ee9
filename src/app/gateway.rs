use crate::app::services::{AuthService, GraphExecutionService, GraphManager};
use crate::domain::{Action, Permissions, Value};
use crate::utils::error::{FlowError, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Body accepted by every `/{action}` route.
#[derive(Debug, Default, Deserialize)]
pub struct ActionRequest {
    pub token: Option<String>,
    pub graph_id: Option<String>,
    pub serialized_graph: Option<String>,
    pub target_user: Option<String>,
    /// `[read, write, execute, ...]`
    pub permissions: Option<Vec<bool>>,
    pub start_block: Option<String>,
}

#[derive(Debug, Serialize)]
struct Envelope {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

fn ok(data: Value) -> Response {
    let body = Envelope {
        status: "OK",
        message: None,
        data: Some(data),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn error(code: StatusCode, message: impl Into<String>) -> Response {
    let body = Envelope {
        status: "Error",
        message: Some(message.into()),
        data: None,
    };
    (code, Json(body)).into_response()
}

enum Rejection {
    MissingField(&'static str),
    InvalidField(String),
    Service(FlowError),
}

impl From<FlowError> for Rejection {
    fn from(e: FlowError) -> Self {
        Rejection::Service(e)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::MissingField(field) => {
                error(StatusCode::BAD_REQUEST, format!("Missing field '{}'", field))
            }
            Rejection::Service(FlowError::NotFound { message }) => {
                error(StatusCode::NOT_FOUND, message)
            }
            Rejection::InvalidField(message) => error(StatusCode::BAD_REQUEST, message),
            Rejection::Service(e) => {
                tracing::error!("❌ Request failed: {} (Category: {:?})", e, e.category());
                error(StatusCode::INTERNAL_SERVER_ERROR, e.user_friendly_message())
            }
        }
    }
}

fn required<'a, T: ?Sized>(value: Option<&'a T>, field: &'static str) -> std::result::Result<&'a T, Rejection> {
    value.ok_or(Rejection::MissingField(field))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// HTTP entry point: authenticates, authorizes and dispatches graph actions.
#[derive(Clone)]
pub struct Gateway {
    auth: AuthService,
    graphs: GraphManager,
    execution: GraphExecutionService,
}

impl Gateway {
    pub fn new(auth: AuthService, graphs: GraphManager, execution: GraphExecutionService) -> Self {
        Self {
            auth,
            graphs,
            execution,
        }
    }

    async fn dispatch(
        &self,
        user: &str,
        action: Action,
        request: &ActionRequest,
    ) -> std::result::Result<Value, Rejection> {
        let graph_id = || required(request.graph_id.as_deref(), "graph_id");

        let data = match action {
            Action::Create => {
                let id = self.graphs.create_graph(user).await?;
                json!({ "graph_id": id })
            }
            Action::View => {
                let id = graph_id()?;
                let serialized = self.graphs.get_serialized_graph(id).await?;
                json!({ "graph_id": id, "serialized_graph": serialized })
            }
            Action::Edit => {
                let id = graph_id()?;
                let serialized = required(request.serialized_graph.as_deref(), "serialized_graph")?;
                self.graphs.store_serialized_graph(id, serialized).await?;
                json!({ "graph_id": id })
            }
            Action::Delete => {
                let id = graph_id()?;
                self.graphs.delete_graph(id).await?;
                json!({ "graph_id": id })
            }
            Action::List => {
                let graphs = self.graphs.list_graphs(user).await?;
                json!({ "graphs": graphs })
            }
            Action::Run => {
                let id = graph_id()?;
                let report = match request.start_block.as_deref() {
                    Some(start) => self.execution.execute_from(id, start).await?,
                    None => self.execution.execute_graph(id).await?,
                };
                json!({
                    "graph_id": id,
                    "executed": report.executed_names(),
                    "duration_ms": report.duration.as_millis() as u64,
                })
            }
            Action::Share => {
                let id = graph_id()?;
                let target = required(request.target_user.as_deref(), "target_user")?;
                let flags = required(request.permissions.as_deref(), "permissions")?;
                let permissions = Permissions::from_flag_list(flags)
                    .map_err(|e| Rejection::InvalidField(e.to_string()))?;
                self.graphs.share_graph(id, target, permissions).await?;
                json!({ "graph_id": id })
            }
        };
        Ok(data)
    }
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    ok(json!({ "message": gateway.graphs.say_hello("gateway") }))
}

async fn handle_action(
    State(gateway): State<Arc<Gateway>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(action) = action.parse::<Action>() else {
        return error(StatusCode::BAD_REQUEST, format!("Unknown action {}", action));
    };

    if !is_json(&headers) {
        return error(StatusCode::BAD_REQUEST, "Request must be JSON");
    }
    let request: ActionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("rejected request body: {}", e);
            return error(StatusCode::BAD_REQUEST, "Request must be JSON");
        }
    };

    let Some(user) = request.token.as_deref().and_then(|t| gateway.auth.authenticate(t)) else {
        return error(StatusCode::FORBIDDEN, "Authentication failed");
    };

    let graph_id = request.graph_id.as_deref();
    match gateway.auth.authorize(&user, action, graph_id).await {
        Ok(true) => {}
        Ok(false) => {
            return error(
                StatusCode::FORBIDDEN,
                format!(
                    "{} is not authorized for {} on graph {}",
                    user,
                    action,
                    graph_id.unwrap_or("None")
                ),
            );
        }
        Err(e) => {
            tracing::warn!(user = %user, action = %action, "authorization could not be checked: {}", e);
            return error(StatusCode::INTERNAL_SERVER_ERROR, "Authorization failed");
        }
    }

    tracing::info!(user = %user, action = %action, graph_id = ?graph_id, "📨 Handling request");
    match gateway.dispatch(&user, action, &request).await {
        Ok(data) => ok(data),
        Err(rejection) => rejection.into_response(),
    }
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/:action", get(handle_action).post(handle_action))
        .with_state(gateway)
}

/// Serves the gateway on an already bound listener until `shutdown` resolves.
pub async fn serve_with_listener<F>(listener: TcpListener, gateway: Arc<Gateway>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("🌐 Gateway listening on http://{}", addr);
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("Gateway stopped");
    Ok(())
}

pub async fn serve(bind: &str, gateway: Arc<Gateway>) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    serve_with_listener(listener, gateway, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {}", e);
        }
    })
    .await
}
