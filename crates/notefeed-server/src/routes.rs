use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use tracing::{error, warn};

use notefeed_core::{FeedError, FeedFilter, Session};
use notefeed_types::Origin;
use notefeed_types::api::ToggleReactionRequest;

use crate::actor::{ActorError, FeedHandle};
use crate::auth;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub feed: FeedHandle,
    pub jwt_secret: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/feed/{origin}/{id}", delete(remove_note))
        .route("/feed/{origin}/{id}/reactions", post(toggle_reaction))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .route("/feed", get(get_feed))
        .route("/session", post(auth::sign_in).delete(auth::sign_out))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub filter: FeedFilter,
}

pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let snapshot = state.feed.snapshot(query.filter).await.map_err(status_for)?;
    Ok(Json(snapshot))
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Extension(caller): Extension<Session>,
    Path((origin, id)): Path<(Origin, String)>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let response = state
        .feed
        .toggle(caller, origin, id, req.emoji)
        .await
        .map_err(status_for)?;
    Ok(Json(response))
}

pub async fn remove_note(
    State(state): State<AppState>,
    Extension(caller): Extension<Session>,
    Path((origin, id)): Path<(Origin, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    state.feed.remove(caller, origin, id).await.map_err(status_for)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn status_for(e: ActorError) -> StatusCode {
    match e {
        ActorError::Feed(e) => {
            warn!("Feed request failed: {}", e);
            match e {
                FeedError::Unauthenticated => StatusCode::UNAUTHORIZED,
                FeedError::Forbidden => StatusCode::FORBIDDEN,
                FeedError::NotFound { .. } => StatusCode::NOT_FOUND,
                FeedError::InvalidState(_) => StatusCode::CONFLICT,
                FeedError::Write(_) | FeedError::Subscribe(_) => StatusCode::BAD_GATEWAY,
            }
        }
        ActorError::SessionMismatch => StatusCode::FORBIDDEN,
        ActorError::Stopped => {
            error!("Feed actor is gone");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
