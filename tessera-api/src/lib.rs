pub mod auth;
pub mod engine;
pub mod routes;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tokio::net::TcpListener;

use crate::auth::TokenAuthority;
use crate::engine::VerificationEngine;
use tessera_core::error::{Result, TesseraError};

pub use engine::{VerifyOutcome, VerifyParams};

pub struct AppState {
    pub engine: Arc<VerificationEngine>,
    pub start_time: Instant,
}

pub struct ApiServer {
    bind: String,
    token: Option<String>,
    engine: VerificationEngine,
}

impl ApiServer {
    pub fn new(bind: String, token: Option<String>, engine: VerificationEngine) -> Self {
        Self {
            bind,
            token,
            engine,
        }
    }

    pub async fn run(self) -> Result<()> {
        let auth = match &self.token {
            Some(t) => TokenAuthority::from_existing(t),
            None => {
                let (auth, token) = TokenAuthority::generate()
                    .map_err(|e| TesseraError::Io(std::io::Error::other(e.to_string())))?;
                eprintln!();
                eprintln!("  token: {token}");
                eprintln!();
                auth
            }
        };
        let auth = Arc::new(auth);

        let state = Arc::new(AppState {
            engine: Arc::new(self.engine),
            start_time: Instant::now(),
        });
        let app = build_router(state, auth);

        let addr: SocketAddr = self
            .bind
            .parse()
            .map_err(|e| TesseraError::InvalidInput(format!("invalid bind addr: {e}")))?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(%addr, "verification API listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// `/health` is open; everything under `/v1` needs a bearer token.
pub fn build_router(state: Arc<AppState>, auth: Arc<TokenAuthority>) -> Router {
    use routes::{sessions, verify};

    let protected = Router::new()
        .route("/v1/verify", post(verify::verify))
        .route(
            "/v1/sessions/{id}",
            get(sessions::get_session).delete(sessions::clear_session),
        )
        .layer(middleware::from_fn(auth::require_auth))
        .layer(axum::Extension(auth));

    Router::new()
        .route("/health", get(verify::health))
        .merge(protected)
        .with_state(state)
}
