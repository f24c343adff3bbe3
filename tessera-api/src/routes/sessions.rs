use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use std::sync::Arc;

use tessera_attest::VerificationSession;

use crate::AppState;

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<VerificationSession>, StatusCode> {
    state
        .engine
        .sessions()
        .get(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.engine.sessions().clear(&id) {
        Some(_) => {
            tracing::debug!(verification_id = %id, "session cleared");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing;

    #[tokio::test]
    async fn get_and_clear() {
        let state = testing::configured();
        state
            .engine
            .sessions()
            .register("chat-1", Some("n1"), None, None)
            .unwrap();

        let Json(session) = get_session(State(state.clone()), Path("chat-1".into()))
            .await
            .unwrap();
        assert_eq!(session.nonce.as_deref(), Some("n1"));

        assert_eq!(
            clear_session(State(state.clone()), Path("chat-1".into())).await,
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            get_session(State(state.clone()), Path("chat-1".into()))
                .await
                .unwrap_err(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            clear_session(State(state), Path("chat-1".into())).await,
            StatusCode::NOT_FOUND
        );
    }
}
