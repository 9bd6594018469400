//! API route handlers.
//!
//! Engine endpoints go through the `EngineHandle`; the game/bet CRUD
//! endpoints talk to the key/value store directly and never touch the
//! in-round state.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::EngineHandle;
use crate::storage::{self, SharedStore};
use crate::types::{BetReceipt, CashOutReceipt, GameError, RoundRecord, RoundSnapshot};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub engine: EngineHandle,
    pub store: SharedStore,
}

impl ApiState {
    pub fn new(engine: EngineHandle, store: SharedStore) -> Self {
        Self { engine, store }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error returned by handlers. Engine errors keep their kind; anything
/// else is an internal failure.
#[derive(Debug)]
pub enum ApiError {
    Game(GameError),
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        ApiError::Game(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Game(e) => {
                let status = match e {
                    GameError::InvalidPhase { .. } | GameError::DuplicateBet(_) => StatusCode::CONFLICT,
                    GameError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                    GameError::NoSuchBet(_) => StatusCode::NOT_FOUND,
                    GameError::ResourceExhausted(_) | GameError::EngineStopped => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceBetRequest {
    pub bettor_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CashOutRequest {
    pub bettor_id: String,
}

/// Game stored under `game:{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDocument {
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bets: BTreeMap<String, StoredBet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBet {
    pub user_id: String,
    pub bet_amount: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBetRequest {
    pub game_id: Option<String>,
    pub user_id: Option<String>,
    pub bet_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBetRequest {
    pub game_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoBet {
    pub initial_bet: u32,
}

// ---------------------------------------------------------------------------
// Engine handlers
// ---------------------------------------------------------------------------

/// GET /api/state
pub async fn get_state(State(state): State<AppState>) -> Json<RoundSnapshot> {
    Json(state.engine.current_state())
}

/// POST /api/bet
pub async fn place_bet(
    State(state): State<AppState>,
    Json(req): Json<PlaceBetRequest>,
) -> Result<Json<BetReceipt>, ApiError> {
    let receipt = state.engine.place_bet(&req.bettor_id, req.amount).await?;
    Ok(Json(receipt))
}

/// POST /api/cashout
pub async fn cash_out(
    State(state): State<AppState>,
    Json(req): Json<CashOutRequest>,
) -> Result<Json<CashOutReceipt>, ApiError> {
    let receipt = state.engine.cash_out(&req.bettor_id).await?;
    Ok(Json(receipt))
}

/// GET /api/events — server-sent stream of engine events.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.engine.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.name()).json_data(&event);
                    return Some((sse, rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /api/rounds/:id
pub async fn get_round(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoundRecord>, ApiError> {
    match storage::load_round(state.store.as_ref(), &id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("Round {id} not found"))),
    }
}

// ---------------------------------------------------------------------------
// Game / bet CRUD handlers
// ---------------------------------------------------------------------------

async fn load_game(state: &ApiState, game_id: &str) -> Result<Option<GameDocument>, ApiError> {
    let key = storage::game_key(game_id);
    if !state.store.exists(&key).await? {
        return Ok(None);
    }
    let Some(json) = state.store.get(&key).await? else {
        return Ok(None);
    };
    let game = serde_json::from_str(&json)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Corrupt game {game_id}: {e}")))?;
    Ok(Some(game))
}

async fn save_game(state: &ApiState, game_id: &str, game: &GameDocument) -> Result<(), ApiError> {
    let json = serde_json::to_string(game).map_err(|e| ApiError::Internal(e.into()))?;
    state.store.set(&storage::game_key(game_id), &json).await?;
    Ok(())
}

/// POST /game/create
pub async fn create_game(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let game_id = Uuid::new_v4().to_string();
    let game = GameDocument {
        created_at: Some(Utc::now()),
        bets: BTreeMap::new(),
    };
    save_game(&state, &game_id, &game).await?;
    info!(game = %game_id, "Game created");
    Ok((StatusCode::CREATED, Json(game_id)))
}

/// POST /bets
pub async fn create_bet(
    State(state): State<AppState>,
    Json(req): Json<CreateBetRequest>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let (Some(game_id), Some(user_id), Some(bet_amount)) = (req.game_id, req.user_id, req.bet_amount)
    else {
        return Err(ApiError::BadRequest(
            "Missing required fields: gameId, userId, betAmount".into(),
        ));
    };
    if bet_amount <= Decimal::ZERO {
        return Err(ApiError::Game(GameError::InvalidAmount(bet_amount)));
    }

    let Some(mut game) = load_game(&state, &game_id).await? else {
        return Err(ApiError::BadRequest("Invalid game ID".into()));
    };

    let bet_id = Uuid::new_v4().to_string();
    game.bets.insert(
        bet_id.clone(),
        StoredBet {
            user_id,
            bet_amount,
            timestamp: Utc::now(),
        },
    );
    save_game(&state, &game_id, &game).await?;

    info!(game = %game_id, bet = %bet_id, amount = %bet_amount, "Bet stored");
    Ok((StatusCode::OK, "Bet added successfully"))
}

/// DELETE /bets/:id
pub async fn delete_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<String>,
    body: Option<Json<DeleteBetRequest>>,
) -> Result<(StatusCode, &'static str), ApiError> {
    // A missing or unreadable body is treated as an unknown game.
    let game_id = body.and_then(|Json(req)| req.game_id).unwrap_or_default();
    let Some(mut game) = load_game(&state, &game_id).await? else {
        return Err(ApiError::BadRequest("Invalid game ID".into()));
    };
    if game.bets.remove(&bet_id).is_none() {
        return Err(ApiError::NotFound("Bet not found".into()));
    }
    save_game(&state, &game_id, &game).await?;

    info!(game = %game_id, bet = %bet_id, "Bet deleted");
    Ok((StatusCode::OK, "Bet deleted successfully"))
}

/// GET /bets/generate — ten random demo bettors.
pub async fn generate_bets() -> Json<BTreeMap<u32, DemoBet>> {
    let mut rng = rand::thread_rng();
    let mut bets = BTreeMap::new();
    while bets.len() < 10 {
        bets.insert(
            rng.gen_range(0..10_000),
            DemoBet {
                initial_bet: rng.gen_range(10..=100),
            },
        );
    }
    Json(bets)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
