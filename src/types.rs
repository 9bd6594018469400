//! Shared types for the AVIATOR engine.
//!
//! These types form the data model used across the engine, storage and
//! API modules. Everything that crosses a module boundary lives here so
//! that the engine never depends on transport or storage code.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque bettor identifier as supplied by the caller.
pub type BettorId = String;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a round. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Countdown,
    Running,
    Crashed,
    Settled,
}

impl Phase {
    /// Whether new bets are accepted in this phase.
    pub fn accepts_bets(&self) -> bool {
        matches!(self, Phase::Countdown | Phase::Running)
    }

    /// The phase that follows this one, if any.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Countdown => Some(Phase::Running),
            Phase::Running => Some(Phase::Crashed),
            Phase::Crashed => Some(Phase::Settled),
            Phase::Settled => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Countdown => write!(f, "COUNTDOWN"),
            Phase::Running => write!(f, "RUNNING"),
            Phase::Crashed => write!(f, "CRASHED"),
            Phase::Settled => write!(f, "SETTLED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

/// Outcome of a bet. `Open` until cashed out or the round settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BetOutcome {
    Open,
    Won { cashout_multiplier: f64, payout: Decimal },
    Lost,
}

/// A single bet in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub bettor_id: BettorId,
    pub amount: Decimal,
    /// Multiplier at the moment the bet was accepted (1.0 during countdown).
    pub placed_at_multiplier: f64,
    pub placed_at: DateTime<Utc>,
    pub outcome: BetOutcome,
}

impl Bet {
    pub fn is_open(&self) -> bool {
        self.outcome == BetOutcome::Open
    }

    /// Final payout. Zero for open and lost bets.
    pub fn payout(&self) -> Decimal {
        match &self.outcome {
            BetOutcome::Won { payout, .. } => *payout,
            _ => Decimal::ZERO,
        }
    }
}

/// Acknowledgement returned by a successful `place_bet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub round_id: Uuid,
    pub bettor_id: BettorId,
    pub amount: Decimal,
    pub placed_at_multiplier: f64,
    pub phase: Phase,
}

/// Acknowledgement returned by a successful `cash_out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashOutReceipt {
    pub round_id: Uuid,
    pub bettor_id: BettorId,
    pub amount: Decimal,
    pub cashout_multiplier: f64,
    pub payout: Decimal,
}

// ---------------------------------------------------------------------------
// Observer views
// ---------------------------------------------------------------------------

/// Point-in-time view of the current round, safe to hand to any observer.
///
/// The crash multiplier is only present once the round has crashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: Uuid,
    pub round_number: u64,
    pub phase: Phase,
    /// 0 during countdown, live value while running, crash value afterwards.
    pub current_multiplier: f64,
    /// Milliseconds left in the current phase, when that is public.
    pub time_remaining_ms: Option<u64>,
    pub crash_multiplier: Option<f64>,
    pub bet_count: usize,
    pub total_wagered: Decimal,
}

impl fmt::Display for RoundSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round #{} [{}] {:.2}x bets={} wagered={}",
            self.round_number,
            self.phase,
            self.current_multiplier,
            self.bet_count,
            self.total_wagered,
        )
    }
}

/// Immutable summary of a settled round, written to the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_id: Uuid,
    pub round_number: u64,
    pub created_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
    pub crash_multiplier: f64,
    pub bets: Vec<Bet>,
    pub total_wagered: Decimal,
    pub total_paid: Decimal,
}

impl RoundRecord {
    pub fn winners(&self) -> impl Iterator<Item = &Bet> {
        self.bets
            .iter()
            .filter(|b| matches!(b.outcome, BetOutcome::Won { .. }))
    }

    /// House result for the round (wagered minus paid out).
    pub fn house_pnl(&self) -> Decimal {
        self.total_wagered - self.total_paid
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events published by the engine to real-time observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    RoundStarted {
        round_id: Uuid,
        round_number: u64,
        countdown_ms: u64,
    },
    PhaseChanged {
        round_id: Uuid,
        from: Phase,
        to: Phase,
    },
    Crashed {
        round_id: Uuid,
        crash_multiplier: f64,
    },
    Settled {
        record: RoundRecord,
    },
    BetPlaced {
        receipt: BetReceipt,
    },
    CashedOut {
        receipt: CashOutReceipt,
    },
    Tick {
        snapshot: RoundSnapshot,
    },
}

impl EngineEvent {
    /// Short event name, used as the SSE event type.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::RoundStarted { .. } => "round_started",
            EngineEvent::PhaseChanged { .. } => "phase_changed",
            EngineEvent::Crashed { .. } => "crashed",
            EngineEvent::Settled { .. } => "settled",
            EngineEvent::BetPlaced { .. } => "bet_placed",
            EngineEvent::CashedOut { .. } => "cashed_out",
            EngineEvent::Tick { .. } => "tick",
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors reported synchronously to the caller of an engine operation.
/// None of them are fatal to the engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    #[error("Cannot {operation} while round is {phase}")]
    InvalidPhase { operation: &'static str, phase: Phase },

    #[error("Bettor {0} already has a bet in this round")]
    DuplicateBet(BettorId),

    #[error("Invalid bet amount: {0}")]
    InvalidAmount(Decimal),

    #[error("No open bet for bettor {0}")]
    NoSuchBet(BettorId),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Engine is not running")]
    EngineStopped,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
