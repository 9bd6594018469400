//! Round engine — the authoritative crash-round state machine.
//!
//! Drives one round at a time through
//! `Countdown → Running → Crashed → Settled`. Every mutating call takes the
//! current monotonic time, and the multiplier is always recomputed from the
//! round's start instant, so irregular or re-delivered ticks cannot drift
//! the curve.
//!
//! This type is synchronous and single-owner. Concurrency is handled by
//! the actor in [`crate::engine::actor`].

use chrono::Utc;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::crash::{self, CrashPolicy};
use crate::types::{
    Bet, BetOutcome, BetReceipt, BettorId, CashOutReceipt, EngineEvent, GameError, Phase,
    RoundRecord, RoundSnapshot,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine parameters.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub countdown: Duration,
    /// Growth constant `k`, per second.
    pub growth_rate: f64,
    /// Time spent in `Crashed` before settlement. Zero settles immediately.
    pub settle_delay: Duration,
    pub min_bet: Decimal,
    pub max_bet: Decimal,
    /// Upper bound applied to every crash draw.
    pub max_multiplier: f64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(3),
            growth_rate: 0.15,
            settle_delay: Duration::from_secs(1),
            min_bet: dec!(10),
            max_bet: dec!(10000),
            max_multiplier: 100.0,
        }
    }
}

/// `exp(k * elapsed)`. Non-decreasing in `elapsed`.
pub fn multiplier_after(growth_rate: f64, elapsed: Duration) -> f64 {
    (growth_rate * elapsed.as_secs_f64()).exp()
}

/// Payout for a winning bet, rounded to cents.
///
/// Fails with `ResourceExhausted` when the product leaves `Decimal` range.
pub fn payout_for(amount: Decimal, multiplier: f64) -> Result<Decimal, GameError> {
    let overflow = || GameError::ResourceExhausted(format!("payout overflow: {amount} x {multiplier}"));
    let m = Decimal::from_f64(multiplier).ok_or_else(overflow)?;
    amount
        .checked_mul(m)
        .map(|p| p.round_dp(2))
        .ok_or_else(overflow)
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// One played instance of the game.
#[derive(Debug, Clone)]
pub struct Round {
    pub id: Uuid,
    pub number: u64,
    pub created_at: chrono::DateTime<Utc>,
    phase: Phase,
    countdown_ends: Instant,
    started_at: Option<Instant>,
    crashed_at: Option<Instant>,
    /// Fixed at creation, never mutated.
    crash_multiplier: f64,
    bets: HashMap<BettorId, Bet>,
    record: Option<RoundRecord>,
}

impl Round {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Crash multiplier, revealed only once the round has crashed.
    pub fn revealed_crash_multiplier(&self) -> Option<f64> {
        (self.phase >= Phase::Crashed).then_some(self.crash_multiplier)
    }

    pub fn bet(&self, bettor_id: &str) -> Option<&Bet> {
        self.bets.get(bettor_id)
    }

    pub fn open_bet_count(&self) -> usize {
        self.bets.values().filter(|b| b.is_open()).count()
    }

    pub fn total_wagered(&self) -> Decimal {
        self.bets.values().map(|b| b.amount).sum()
    }

    /// Settlement record, present once the round is `Settled`.
    pub fn record(&self) -> Option<&RoundRecord> {
        self.record.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RoundEngine {
    config: RoundConfig,
    policy: Box<dyn CrashPolicy>,
    round: Round,
    last_seen: Instant,
}

impl RoundEngine {
    /// Create an engine with its first round already in `Countdown`.
    pub fn new(config: RoundConfig, mut policy: Box<dyn CrashPolicy>, now: Instant) -> Self {
        let round = Self::allocate(&config, policy.as_mut(), 1, now);
        info!(
            round = %round.id,
            policy = policy.name(),
            growth_rate = config.growth_rate,
            "Round engine created"
        );
        Self {
            config,
            policy,
            round,
            last_seen: now,
        }
    }

    fn allocate(config: &RoundConfig, policy: &mut dyn CrashPolicy, number: u64, now: Instant) -> Round {
        let crash_multiplier = crash::sanitise(policy.draw(), config.max_multiplier);
        let round = Round {
            id: Uuid::new_v4(),
            number,
            created_at: Utc::now(),
            phase: Phase::Countdown,
            countdown_ends: now + config.countdown,
            started_at: None,
            crashed_at: None,
            crash_multiplier,
            bets: HashMap::new(),
            record: None,
        };
        debug!(round = %round.id, number, "Round allocated");
        round
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    /// Start the next round. The current round must be `Settled`.
    pub fn create_round(&mut self, now: Instant) -> Result<EngineEvent, GameError> {
        if self.round.phase != Phase::Settled {
            return Err(GameError::InvalidPhase {
                operation: "create a round",
                phase: self.round.phase,
            });
        }
        let number = self.round.number.checked_add(1).ok_or_else(|| {
            GameError::ResourceExhausted("round sequence number overflow".into())
        })?;

        let now = now.max(self.last_seen);
        self.last_seen = now;
        self.round = Self::allocate(&self.config, self.policy.as_mut(), number, now);

        info!(round = %self.round.id, number, "Round created");
        Ok(EngineEvent::RoundStarted {
            round_id: self.round.id,
            round_number: number,
            countdown_ms: self.config.countdown.as_millis() as u64,
        })
    }

    /// Multiplier of the current round as of `now`.
    fn multiplier_at(&self, now: Instant) -> f64 {
        match self.round.phase {
            Phase::Countdown => 0.0,
            Phase::Running => match self.round.started_at {
                Some(start) => {
                    multiplier_after(self.config.growth_rate, now.saturating_duration_since(start))
                }
                None => 1.0,
            },
            Phase::Crashed | Phase::Settled => self.round.crash_multiplier,
        }
    }

    /// Multiplier a bet placed right now would record.
    fn entry_multiplier(&self, now: Instant) -> f64 {
        match self.round.phase {
            Phase::Running => self.multiplier_at(now),
            _ => 1.0,
        }
    }

    /// Advance the round to whatever phase `now` implies.
    ///
    /// Stale or repeated timestamps are no-ops. Several transitions may
    /// happen in one call. Returns the events produced, in order.
    pub fn tick(&mut self, now: Instant) -> Vec<EngineEvent> {
        if now <= self.last_seen {
            return Vec::new();
        }
        self.last_seen = now;

        let mut events = Vec::new();
        while let Some(next) = self.pending_transition(now) {
            events.push(EngineEvent::PhaseChanged {
                round_id: self.round.id,
                from: self.round.phase,
                to: next,
            });
            self.apply_transition(next, &mut events);
        }
        events
    }

    fn pending_transition(&self, now: Instant) -> Option<Phase> {
        let next = self.round.phase.next()?;
        let due = match self.round.phase {
            Phase::Countdown => now >= self.round.countdown_ends,
            Phase::Running => self.round.started_at.is_some_and(|start| {
                let m = multiplier_after(self.config.growth_rate, now.saturating_duration_since(start));
                m >= self.round.crash_multiplier
            }),
            Phase::Crashed => self
                .round
                .crashed_at
                .is_some_and(|crashed| now >= crashed + self.config.settle_delay),
            Phase::Settled => false,
        };
        due.then_some(next)
    }

    /// Moves the round into `next`, pushing at most one phase-specific event.
    fn apply_transition(&mut self, next: Phase, events: &mut Vec<EngineEvent>) {
        match next {
            Phase::Running => {
                // The curve starts at the scheduled end of the countdown, not
                // at whichever tick noticed it.
                self.round.started_at = Some(self.round.countdown_ends);
                self.round.phase = Phase::Running;
                info!(round = %self.round.id, bets = self.round.bets.len(), "Round running");
            }
            Phase::Crashed => {
                let start = self.round.started_at.unwrap_or(self.round.countdown_ends);
                // Exact instant the curve reached the crash point.
                let secs = self.round.crash_multiplier.ln() / self.config.growth_rate;
                self.round.crashed_at = Some(start + Duration::from_secs_f64(secs.max(0.0)));
                self.round.phase = Phase::Crashed;
                info!(
                    round = %self.round.id,
                    crash_multiplier = format!("{:.2}x", self.round.crash_multiplier),
                    open_bets = self.round.open_bet_count(),
                    "Round crashed"
                );
                events.push(EngineEvent::Crashed {
                    round_id: self.round.id,
                    crash_multiplier: self.round.crash_multiplier,
                });
            }
            Phase::Settled => {
                let record = self.settle();
                events.push(EngineEvent::Settled { record });
            }
            Phase::Countdown => {}
        }
    }

    /// Finalise every bet and freeze the round.
    fn settle(&mut self) -> RoundRecord {
        for bet in self.round.bets.values_mut() {
            if bet.is_open() {
                bet.outcome = BetOutcome::Lost;
            }
        }
        self.round.phase = Phase::Settled;

        let mut bets: Vec<Bet> = self.round.bets.values().cloned().collect();
        bets.sort_by(|a, b| a.placed_at.cmp(&b.placed_at).then(a.bettor_id.cmp(&b.bettor_id)));
        let total_wagered = self.round.total_wagered();
        let total_paid: Decimal = bets.iter().map(Bet::payout).sum();

        let record = RoundRecord {
            round_id: self.round.id,
            round_number: self.round.number,
            created_at: self.round.created_at,
            settled_at: Utc::now(),
            crash_multiplier: self.round.crash_multiplier,
            bets,
            total_wagered,
            total_paid,
        };

        info!(
            round = %record.round_id,
            wagered = %record.total_wagered,
            paid = %record.total_paid,
            winners = record.winners().count(),
            "Round settled"
        );

        self.round.record = Some(record.clone());
        record
    }

    /// Place a bet for `bettor_id`. Allowed during `Countdown` and `Running`.
    pub fn place_bet(
        &mut self,
        bettor_id: &str,
        amount: Decimal,
        now: Instant,
    ) -> Result<(BetReceipt, Vec<EngineEvent>), GameError> {
        let events = self.tick(now);
        let now = now.max(self.last_seen);

        if !self.round.phase.accepts_bets() {
            return Err(GameError::InvalidPhase {
                operation: "place a bet",
                phase: self.round.phase,
            });
        }
        if amount <= Decimal::ZERO || amount < self.config.min_bet || amount > self.config.max_bet {
            return Err(GameError::InvalidAmount(amount));
        }
        if self.round.bets.contains_key(bettor_id) {
            return Err(GameError::DuplicateBet(bettor_id.to_string()));
        }

        let placed_at_multiplier = self.entry_multiplier(now);
        self.round.bets.insert(
            bettor_id.to_string(),
            Bet {
                bettor_id: bettor_id.to_string(),
                amount,
                placed_at_multiplier,
                placed_at: Utc::now(),
                outcome: BetOutcome::Open,
            },
        );

        debug!(round = %self.round.id, bettor = bettor_id, %amount, placed_at_multiplier, "Bet placed");
        Ok((
            BetReceipt {
                round_id: self.round.id,
                bettor_id: bettor_id.to_string(),
                amount,
                placed_at_multiplier,
                phase: self.round.phase,
            },
            events,
        ))
    }

    /// Lock in the current multiplier for `bettor_id`. Only while `Running`.
    ///
    /// A crash that has already happened by `now` is applied first, so a
    /// late cash-out fails with `InvalidPhase` rather than winning.
    pub fn cash_out(
        &mut self,
        bettor_id: &str,
        now: Instant,
    ) -> Result<(CashOutReceipt, Vec<EngineEvent>), GameError> {
        let events = self.tick(now);
        let now = now.max(self.last_seen);

        if self.round.phase != Phase::Running {
            return Err(GameError::InvalidPhase {
                operation: "cash out",
                phase: self.round.phase,
            });
        }

        let multiplier = self.multiplier_at(now);
        let round_id = self.round.id;
        let bet = self
            .round
            .bets
            .get_mut(bettor_id)
            .filter(|b| b.is_open())
            .ok_or_else(|| GameError::NoSuchBet(bettor_id.to_string()))?;

        let payout = payout_for(bet.amount, multiplier)?;
        bet.outcome = BetOutcome::Won {
            cashout_multiplier: multiplier,
            payout,
        };

        info!(round = %round_id, bettor = bettor_id, multiplier = format!("{multiplier:.2}x"), %payout, "Cashed out");
        Ok((
            CashOutReceipt {
                round_id,
                bettor_id: bettor_id.to_string(),
                amount: bet.amount,
                cashout_multiplier: multiplier,
                payout,
            },
            events,
        ))
    }

    /// Point-in-time view as of the last observed time. Never mutates.
    pub fn current_state(&self) -> RoundSnapshot {
        let now = self.last_seen;
        let time_remaining = match self.round.phase {
            Phase::Countdown => Some(self.round.countdown_ends.saturating_duration_since(now)),
            Phase::Crashed => self
                .round
                .crashed_at
                .map(|c| (c + self.config.settle_delay).saturating_duration_since(now)),
            Phase::Running | Phase::Settled => None,
        };

        RoundSnapshot {
            round_id: self.round.id,
            round_number: self.round.number,
            phase: self.round.phase,
            current_multiplier: self.multiplier_at(now),
            time_remaining_ms: time_remaining.map(|d| d.as_millis() as u64),
            crash_multiplier: self.round.revealed_crash_multiplier(),
            bet_count: self.round.bets.len(),
            total_wagered: self.round.total_wagered(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
