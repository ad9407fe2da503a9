use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::error::{SessionClosed, SettingsError};
use crate::server_protocol::{parse_client_message, ParsedClientMessage};
use crate::session::SessionHandle;
use crate::settings_store::SettingsStore;
use crate::types::{ParticipantId, Snapshot};

const OUTBOUND_QUEUE: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<RwLock<SettingsStore>>,
    pub session: SessionHandle,
}

impl AppState {
    pub fn new(settings: SettingsStore, session: SessionHandle) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
            session,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidSettings(#[from] SettingsError),
    #[error(transparent)]
    SessionClosed(#[from] SessionClosed),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidSettings(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::SessionClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/game/state", get(game_state))
        .route("/api/game/participants/{id}/begin", post(participant_begin))
        .route("/api/game/participants/{id}/end", post(participant_end))
        .route("/api/game/killer/press", post(killer_press))
        .route("/api/game/killer/release", post(killer_release))
        .route("/api/game/restart", post(restart))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json("Server is up !")
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.settings.read().await;
    Json(store.body().clone())
}

async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    // The write guard spans the session update so stored and live config
    // change in the same order under concurrent PUTs.
    let mut store = state.settings.write().await;
    let config = match store.replace(body) {
        Ok(config) => config,
        Err(error) => {
            warn!(%error, "rejected settings update");
            return Err(error.into());
        }
    };
    state.session.apply_config(config).await?;
    info!(revision = store.revision(), "settings updated successfully");
    drop(store);
    Ok(Json(json!({ "message": "Settings updated successfully" })))
}

async fn game_state(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session.snapshot().await?))
}

async fn participant_begin(
    State(state): State<AppState>,
    Path(id): Path<ParticipantId>,
) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session.begin(id).await?.snapshot))
}

async fn participant_end(
    State(state): State<AppState>,
    Path(id): Path<ParticipantId>,
) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session.end(id).await?.snapshot))
}

async fn killer_press(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session.killer_press().await?.snapshot))
}

async fn killer_release(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.session.killer_release().await?.snapshot))
}

async fn restart(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(restart_with_stored_config(&state).await?))
}

async fn restart_with_stored_config(state: &AppState) -> Result<Snapshot, SessionClosed> {
    let config = state.settings.read().await.config().clone();
    state.session.restart(Some(config)).await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Controls this connection is holding, released when it goes away.
#[derive(Default)]
struct ClientContext {
    held: BTreeSet<ParticipantId>,
    holding_killer: bool,
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let mut updates = state.session.subscribe();
    let forward_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(snapshot) => {
                    if forward_tx.send(state_message(&snapshot)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client fell behind session updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if let Ok(snapshot) = state.session.snapshot().await {
        let _ = tx.send(state_message(&snapshot)).await;
    }

    let mut context = ClientContext::default();
    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(&state, &tx, &mut context, raw.as_str()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(&state, &tx, &mut context, &text).await;
                } else {
                    send_error(&tx, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    release_held_controls(&state, context).await;
    forwarder.abort();
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(
    state: &AppState,
    tx: &mpsc::Sender<String>,
    context: &mut ClientContext,
    raw: &str,
) {
    let Some(message) = parse_client_message(raw) else {
        send_error(tx, "invalid message").await;
        return;
    };
    debug!(?message, "websocket message");

    let result = match message {
        // Only holds this socket actually took are recorded, so a disconnect
        // never ends a hold owned by someone else.
        ParsedClientMessage::Begin { id } => state.session.begin(id).await.map(|outcome| {
            if outcome.accepted {
                context.held.insert(id);
            }
        }),
        ParsedClientMessage::End { id } => {
            if !context.held.remove(&id) {
                debug!(id, "end for a hold this client does not own");
            }
            state.session.end(id).await.map(|_| ())
        }
        ParsedClientMessage::KillerPress => state.session.killer_press().await.map(|outcome| {
            if outcome.accepted {
                context.holding_killer = true;
            }
        }),
        ParsedClientMessage::KillerRelease => {
            context.holding_killer = false;
            state.session.killer_release().await.map(|_| ())
        }
        ParsedClientMessage::Restart => restart_with_stored_config(state).await.map(|_| ()),
        ParsedClientMessage::Ping { t } => {
            let _ = tx.send(json!({ "type": "pong", "t": t }).to_string()).await;
            Ok(())
        }
    };

    if let Err(error) = result {
        send_error(tx, &error.to_string()).await;
    }
}

async fn release_held_controls(state: &AppState, context: ClientContext) {
    for id in context.held {
        let _ = state.session.end(id).await;
    }
    if context.holding_killer {
        let _ = state.session.killer_release().await;
    }
}

async fn send_error(tx: &mpsc::Sender<String>, message: &str) {
    let _ = tx
        .send(json!({ "type": "error", "message": message }).to_string())
        .await;
}

fn state_message(snapshot: &Snapshot) -> String {
    json!({ "type": "state", "snapshot": snapshot }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameConfig, SessionProfile};

    #[test]
    fn invalid_settings_map_to_unprocessable_entity() {
        let response = ApiError::from(SettingsError::RateTableTooShort { len: 1, min: 4 })
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = ApiError::from(SessionClosed).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn put_settings_forwards_config_to_session() {
        let session = SessionHandle::spawn(GameConfig::default(), SessionProfile::default());
        let state = AppState::new(SettingsStore::new(), session.clone());
        let body = json!({
            "timerDuration": 40,
            "killerTimerDuration": 3,
            "killerCooldown": 10,
            "playerTimerRate": [1, 1.5, 2, 2.5, 3],
        });

        let response = put_settings(State(state.clone()), Json(body.clone()))
            .await
            .expect("valid settings");
        assert_eq!(
            response.0,
            json!({ "message": "Settings updated successfully" })
        );
        assert_eq!(state.settings.read().await.body(), &body);

        let snapshot = session.snapshot().await.expect("session alive");
        assert_eq!(snapshot.timer_duration, 40);
        assert_eq!(snapshot.remaining, 40);
    }

    #[tokio::test]
    async fn put_settings_rejects_invalid_body() {
        let session = SessionHandle::spawn(GameConfig::default(), SessionProfile::default());
        let state = AppState::new(SettingsStore::new(), session);
        let result = put_settings(State(state.clone()), Json(json!({ "timerDuration": 0 }))).await;
        assert!(matches!(result, Err(ApiError::InvalidSettings(_))));
        assert_eq!(state.settings.read().await.revision(), 0);
    }

    #[tokio::test]
    async fn websocket_disconnect_releases_held_controls() {
        let session = SessionHandle::spawn(GameConfig::default(), SessionProfile::default());
        let state = AppState::new(SettingsStore::new(), session.clone());
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut context = ClientContext::default();

        handle_client_message(&state, &tx, &mut context, r#"{"type":"begin","id":1}"#).await;
        handle_client_message(&state, &tx, &mut context, r#"{"type":"begin","id":2}"#).await;
        assert_eq!(
            session.snapshot().await.expect("session alive").active_count,
            2
        );

        release_held_controls(&state, context).await;
        assert_eq!(
            session.snapshot().await.expect("session alive").active_count,
            0
        );
    }

    #[tokio::test]
    async fn refused_begin_is_not_released_on_disconnect() {
        let session = SessionHandle::spawn(GameConfig::default(), SessionProfile::default());
        let state = AppState::new(SettingsStore::new(), session.clone());
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut first = ClientContext::default();
        let mut second = ClientContext::default();

        // Begin is refused while the killer charges.
        session.killer_press().await.expect("session alive");
        handle_client_message(&state, &tx, &mut first, r#"{"type":"begin","id":1}"#).await;
        assert!(first.held.is_empty());
        session.killer_release().await.expect("session alive");

        handle_client_message(&state, &tx, &mut second, r#"{"type":"begin","id":1}"#).await;
        assert!(second.held.contains(&1));

        // Already held by the second client, so the first does not own it.
        handle_client_message(&state, &tx, &mut first, r#"{"type":"begin","id":1}"#).await;
        assert!(first.held.is_empty());

        release_held_controls(&state, first).await;
        let snapshot = session.snapshot().await.expect("session alive");
        assert_eq!(snapshot.active_participants, vec![1]);
    }

    #[tokio::test]
    async fn refused_killer_press_is_not_released_on_disconnect() {
        let session = SessionHandle::spawn(GameConfig::default(), SessionProfile::default());
        let state = AppState::new(SettingsStore::new(), session.clone());
        let (tx, _rx) = mpsc::channel(OUTBOUND_QUEUE);
        let mut context = ClientContext::default();

        session.begin(7).await.expect("session alive");
        handle_client_message(&state, &tx, &mut context, r#"{"type":"killer_press"}"#).await;
        assert!(!context.holding_killer);

        session.end(7).await.expect("session alive");
        handle_client_message(&state, &tx, &mut context, r#"{"type":"killer_press"}"#).await;
        assert!(context.holding_killer);

        release_held_controls(&state, context).await;
        let snapshot = session.snapshot().await.expect("session alive");
        assert!(!snapshot.killer.active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_leave_store_and_session_in_step() {
        let session = SessionHandle::spawn(GameConfig::default(), SessionProfile::default());
        let state = AppState::new(SettingsStore::new(), session.clone());

        let mut puts = Vec::new();
        for duration in 30..62u32 {
            let state = state.clone();
            puts.push(tokio::spawn(async move {
                let body = json!({
                    "timerDuration": duration,
                    "killerTimerDuration": 5,
                    "killerCooldown": 20,
                    "playerTimerRate": [1, 1.5, 2, 2.5],
                });
                put_settings(State(state), Json(body)).await.map(|_| ())
            }));
        }
        for put in puts {
            assert!(put.await.expect("put task").is_ok());
        }

        let stored = state.settings.read().await.config().timer_duration;
        let snapshot = session.snapshot().await.expect("session alive");
        assert_eq!(snapshot.timer_duration, stored);
    }
}
