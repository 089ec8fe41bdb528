//! HTTP endpoints.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use dara_core::{BoardSize, Pos};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, warn};

use crate::pairing::{GameId, Lobby, PairingError};
use crate::push::Push;
use crate::session::{ConnectionId, SessionError, SessionManager};
use crate::store::{Credentials, RankEntry, Rankings, StoreError};
use crate::timer::{Fired, TokioScheduler};

// =============================================================================
// State
// =============================================================================

pub struct AppStateInner {
    session: Mutex<SessionManager<TokioScheduler>>,
    credentials: Credentials,
    rankings: Arc<Rankings>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(
        session: SessionManager<TokioScheduler>,
        credentials: Credentials,
        rankings: Arc<Rankings>,
    ) -> AppStateInner {
        AppStateInner {
            session: Mutex::new(session),
            credentials,
            rankings,
        }
    }

    fn session(&self) -> MutexGuard<'_, SessionManager<TokioScheduler>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feed fired timers into the session, one at a time under its lock.
pub fn spawn_timers(state: AppState, mut fired: mpsc::UnboundedReceiver<Fired>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Fired { id, event }) = fired.recv().await {
            state.session().on_timer(id, event);
        }
    })
}

// =============================================================================
// Models
// =============================================================================

#[derive(Deserialize)]
pub struct Credentialed {
    pub nick: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct JoinRequest {
    pub nick: String,
    pub password: String,
    pub group: u32,
    pub size: BoardSize,
}

#[derive(Serialize)]
pub struct JoinResponse {
    pub game: GameId,
}

#[derive(Deserialize)]
pub struct UpdateQuery {
    pub nick: String,
    pub game: GameId,
}

#[derive(Deserialize)]
pub struct NotifyRequest {
    pub nick: String,
    pub password: String,
    pub game: GameId,
    #[serde(rename = "move")]
    pub cell: Pos,
}

#[derive(Deserialize)]
pub struct LeaveRequest {
    pub nick: String,
    pub password: String,
    pub game: GameId,
}

#[derive(Deserialize)]
pub struct RankingRequest {
    pub group: u32,
    pub size: BoardSize,
}

#[derive(Serialize)]
pub struct RankingResponse {
    pub ranking: Vec<RankEntry>,
}

#[derive(Serialize)]
pub struct Empty {}

#[derive(Serialize)]
struct ErrorModel {
    error: String,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> ApiError {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorModel { error: self.message })).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        if let SessionError::Pairing(PairingError::InvalidState) = e {
            error!("pairing invariant broken");
        }
        ApiError::bad_request(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::WrongPassword | StoreError::UnknownUser => StatusCode::UNAUTHORIZED,
            StoreError::InvalidNick => StatusCode::BAD_REQUEST,
            StoreError::Io(_) | StoreError::Json(_) => {
                error!(error = %e, "store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// Handlers
// =============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn register(State(state): State<AppState>, Json(req): Json<Credentialed>) -> ApiResult<Empty> {
    state.credentials.register(&req.nick, &req.password)?;
    Ok(Json(Empty {}))
}

async fn join(State(state): State<AppState>, Json(req): Json<JoinRequest>) -> ApiResult<JoinResponse> {
    state.credentials.verify(&req.nick, &req.password)?;
    if !req.size.is_supported() {
        return Err(ApiError::bad_request(format!("unsupported board size {}", req.size)));
    }
    let game = state.session().join(&req.nick, Lobby::new(req.group, req.size));
    Ok(Json(JoinResponse { game }))
}

async fn update(State(state): State<AppState>, Query(query): Query<UpdateQuery>) -> Result<Sse<UpdateStream>, ApiError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = state.session().connect(&query.game, &query.nick, tx)?;
    debug!(game = %query.game, user = %query.nick, "update stream opened");
    let guard = StreamGuard {
        state: state.clone(),
        game: query.game,
        nick: query.nick,
        conn,
    };
    Ok(Sse::new(UpdateStream { rx, _guard: guard }))
}

async fn notify(State(state): State<AppState>, Json(req): Json<NotifyRequest>) -> ApiResult<Empty> {
    state.credentials.verify(&req.nick, &req.password)?;
    state.session().notify(&req.game, &req.nick, req.cell)?;
    Ok(Json(Empty {}))
}

async fn leave(State(state): State<AppState>, Json(req): Json<LeaveRequest>) -> ApiResult<Empty> {
    state.credentials.verify(&req.nick, &req.password)?;
    state.session().leave(&req.game, &req.nick)?;
    Ok(Json(Empty {}))
}

async fn ranking(State(state): State<AppState>, Json(req): Json<RankingRequest>) -> ApiResult<RankingResponse> {
    let ranking = state.rankings.top(Lobby::new(req.group, req.size))?;
    Ok(Json(RankingResponse { ranking }))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/register", post(register))
        .route("/join", post(join))
        .route("/update", get(update))
        .route("/notify", post(notify))
        .route("/leave", post(leave))
        .route("/ranking", post(ranking))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Update stream
// =============================================================================

/// Tells the session when the client goes away.
struct StreamGuard {
    state: AppState,
    game: GameId,
    nick: String,
    conn: ConnectionId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let result = self
            .state
            .session()
            .disconnect_stream(&self.game, &self.nick, self.conn);
        match result {
            Ok(()) => debug!(game = %self.game, user = %self.nick, "update stream closed"),
            Err(e) => debug!(game = %self.game, user = %self.nick, error = %e, "update stream closed after game"),
        }
    }
}

pub struct UpdateStream {
    rx: mpsc::UnboundedReceiver<Push>,
    _guard: StreamGuard,
}

impl Stream for UpdateStream {
    type Item = Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|push| push.map(event))
    }
}

fn event(push: Push) -> Result<Event, axum::Error> {
    match push {
        Push::Ping => Ok(Event::default().comment("ping")),
        push => Event::default().json_data(&push).inspect_err(|e| {
            warn!(error = %e, "could not encode push");
        }),
    }
}
