//! HTTP API for the load harness: dispatch, account listing and nonce
//! debugging

use crate::chain::{TxReceipt, TxRequest};
use crate::config::ApiConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::tx::{AccountSummary, Dispatcher, NonceStatus};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, dispatcher: Arc<Dispatcher>) -> DispatchResult<()> {
    let app = router(AppState { dispatcher });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/accounts", get(get_accounts))
        .route("/accounts/:id/resync", post(resync_account))
        .route("/nonces", get(get_nonces))
        .route("/nonces/reset", post(reset_nonces))
        .route("/tx/:id", post(send_transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List configured accounts
async fn get_accounts(State(state): State<AppState>) -> impl IntoResponse {
    Json(AccountsResponse {
        accounts: state.dispatcher.accounts(),
    })
}

/// Chain versus local nonce for every account
async fn get_nonces(State(state): State<AppState>) -> Result<Json<NoncesResponse>, ApiError> {
    let nonces = state.dispatcher.nonce_status().await?;
    Ok(Json(NoncesResponse { nonces }))
}

/// Forget local nonce state; next sends re-fetch from chain
async fn reset_nonces(State(state): State<AppState>) -> impl IntoResponse {
    state.dispatcher.reset_nonces().await;
    Json(MessageResponse {
        message: "All nonces reset".to_string(),
    })
}

async fn resync_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResyncResponse>, ApiError> {
    let nonce = state.dispatcher.resync_account(&id).await?;
    Ok(Json(ResyncResponse { id, nonce }))
}

/// Submit a transaction on behalf of an account
async fn send_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TxRequest>,
) -> Result<Json<TxReceipt>, ApiError> {
    let receipt = state.dispatcher.send(&id, request).await?;
    Ok(Json(receipt))
}

/// Maps dispatcher errors onto HTTP status codes
struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::UnknownAccount { .. } => StatusCode::NOT_FOUND,
            DispatchError::Chain(_) | DispatchError::RetriesExhausted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: self.0.chain_error().map(|e| e.kind()),
            }),
        )
            .into_response()
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct AccountsResponse {
    accounts: Vec<AccountSummary>,
}

#[derive(Serialize)]
struct NoncesResponse {
    nonces: Vec<NonceStatus>,
}

#[derive(Serialize)]
struct ResyncResponse {
    id: String,
    nonce: u64,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::tests::registry;
    use crate::chain::{ChainClient, MockChainClient};
    use crate::config::DispatcherConfig;
    use crate::error::ChainError;
    use crate::tx::NonceAllocator;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ethers::types::{H256, U256};
    use tower::ServiceExt;

    fn app(chain: MockChainClient) -> Router {
        let chain: Arc<dyn ChainClient> = Arc::new(chain);
        let allocator = Arc::new(NonceAllocator::new(Arc::clone(&chain)));
        let dispatcher = Dispatcher::new(
            chain,
            allocator,
            Arc::new(registry()),
            DispatcherConfig {
                retry_delay_ms: 0,
                ..Default::default()
            },
        );
        router(AppState {
            dispatcher: Arc::new(dispatcher),
        })
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn lists_accounts() {
        let response = app(MockChainClient::new())
            .oneshot(Request::get("/accounts").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["accounts"][0]["id"], "testUser1");
        assert_eq!(body["accounts"][1]["label"], "testUser2 - Performance");
    }

    #[tokio::test]
    async fn dispatches_transaction() {
        let mut chain = MockChainClient::new();
        chain.expect_gas_price().returning(|| Ok(U256::from(1_000)));
        chain.expect_pending_nonce().returning(|_| Ok(0));
        chain.expect_submit().returning(|_, _| {
            Ok(TxReceipt {
                transaction_hash: H256::repeat_byte(0x42),
                gas_used: Some(U256::from(50_000)),
                block_number: Some(12),
            })
        });

        let body = serde_json::json!({
            "to": "0x00000000000000000000000000000000000000aa",
            "data": "0x0102",
            "gas_limit": "0x2dc6c0"
        });
        let response = app(chain)
            .oneshot(post_json("/tx/testUser1", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["block_number"], 12);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let body = serde_json::json!({
            "to": "0x00000000000000000000000000000000000000aa",
            "gas_limit": "0x5208"
        });
        let response = app(MockChainClient::new())
            .oneshot(post_json("/tx/ghost", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chain_failure_is_bad_gateway() {
        let mut chain = MockChainClient::new();
        chain
            .expect_pending_nonce()
            .returning(|_| Err(ChainError::Unavailable("connection refused".into())));

        let response = app(chain)
            .oneshot(Request::get("/nonces").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["kind"], "unavailable");
    }
}
