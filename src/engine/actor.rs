//! Engine actor — single-writer owner of the `RoundEngine`.
//!
//! Bettor commands arrive over an mpsc channel with a oneshot reply, and
//! the scheduler tick is a `tokio::time::interval` in the same `select!`
//! loop, so a crash transition and a late cash-out are always applied in
//! some order and never interleave.
//!
//! Observers read snapshots from a `watch` channel and events from a
//! `broadcast` channel; neither path can block the engine.

use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::round::RoundEngine;
use crate::storage::{self, SharedStore};
use crate::types::{
    BetReceipt, BettorId, CashOutReceipt, EngineEvent, GameError, Phase, RoundSnapshot,
};

const COMMAND_BUFFER: usize = 1024;
const EVENT_BUFFER: usize = 4096;

/// Inbound requests to the engine.
#[derive(Debug)]
pub enum EngineCommand {
    PlaceBet {
        bettor_id: BettorId,
        amount: Decimal,
        resp: oneshot::Sender<Result<BetReceipt, GameError>>,
    },
    CashOut {
        bettor_id: BettorId,
        resp: oneshot::Sender<Result<CashOutReceipt, GameError>>,
    },
    Shutdown,
}

/// Cloneable client side of the engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<RoundSnapshot>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    pub async fn place_bet(&self, bettor_id: &str, amount: Decimal) -> Result<BetReceipt, GameError> {
        let (resp, rx) = oneshot::channel();
        self.send(EngineCommand::PlaceBet {
            bettor_id: bettor_id.to_string(),
            amount,
            resp,
        })
        .await?;
        rx.await.map_err(|_| GameError::EngineStopped)?
    }

    pub async fn cash_out(&self, bettor_id: &str) -> Result<CashOutReceipt, GameError> {
        let (resp, rx) = oneshot::channel();
        self.send(EngineCommand::CashOut {
            bettor_id: bettor_id.to_string(),
            resp,
        })
        .await?;
        rx.await.map_err(|_| GameError::EngineStopped)?
    }

    /// Latest published snapshot. Never blocks on the engine.
    pub fn current_state(&self) -> RoundSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes whenever a new snapshot is published.
    pub fn watch(&self) -> watch::Receiver<RoundSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Ask the engine loop to stop. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
    }

    async fn send(&self, cmd: EngineCommand) -> Result<(), GameError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| GameError::EngineStopped)
    }
}

/// Move `engine` into its own task and return the handle.
pub fn spawn_engine(
    engine: RoundEngine,
    store: SharedStore,
    tick_interval: Duration,
) -> (EngineHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (snap_tx, snap_rx) = watch::channel(engine.current_state());
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let handle = EngineHandle {
        commands: cmd_tx,
        snapshots: snap_rx,
        events: event_tx.clone(),
    };

    let actor = EngineActor {
        engine,
        store,
        snapshots: snap_tx,
        events: event_tx,
    };
    let task = tokio::spawn(actor.run(cmd_rx, tick_interval));

    (handle, task)
}

struct EngineActor {
    engine: RoundEngine,
    store: SharedStore,
    snapshots: watch::Sender<RoundSnapshot>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineActor {
    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>, tick_interval: Duration) {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let first = self.engine.current_state();
        self.publish(EngineEvent::RoundStarted {
            round_id: first.round_id,
            round_number: first.round_number,
            countdown_ms: self.engine.config().countdown.as_millis() as u64,
        });

        info!(tick_ms = tick_interval.as_millis() as u64, "Engine loop started");

        loop {
            tokio::select! {
                biased;

                // Bettor commands first so they are never starved by ticks.
                cmd = commands.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => {
                        info!("Engine loop stopping");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },

                _ = interval.tick() => self.on_tick(Instant::now()),
            }
        }
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        let now = Instant::now();
        match cmd {
            EngineCommand::PlaceBet { bettor_id, amount, resp } => {
                let result = match self.engine.place_bet(&bettor_id, amount, now) {
                    Ok((receipt, events)) => {
                        self.publish_all(events);
                        self.publish(EngineEvent::BetPlaced { receipt: receipt.clone() });
                        Ok(receipt)
                    }
                    Err(e) => {
                        debug!(bettor = %bettor_id, error = %e, "Bet rejected");
                        Err(e)
                    }
                };
                let _ = resp.send(result);
            }
            EngineCommand::CashOut { bettor_id, resp } => {
                let result = match self.engine.cash_out(&bettor_id, now) {
                    Ok((receipt, events)) => {
                        self.publish_all(events);
                        self.publish(EngineEvent::CashedOut { receipt: receipt.clone() });
                        Ok(receipt)
                    }
                    Err(e) => {
                        debug!(bettor = %bettor_id, error = %e, "Cash-out rejected");
                        Err(e)
                    }
                };
                let _ = resp.send(result);
            }
            EngineCommand::Shutdown => {}
        }
        self.after_transition(now);
        self.publish_snapshot();
    }

    fn on_tick(&mut self, now: Instant) {
        let events = self.engine.tick(now);
        self.publish_all(events);
        self.after_transition(now);
        self.publish_snapshot();

        let snapshot = self.engine.current_state();
        if matches!(snapshot.phase, Phase::Countdown | Phase::Running) {
            self.publish(EngineEvent::Tick { snapshot });
        }
    }

    /// Archive a settled round and open the next one.
    fn after_transition(&mut self, now: Instant) {
        if self.engine.round().phase() != Phase::Settled {
            return;
        }

        if let Some(record) = self.engine.round().record().cloned() {
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = storage::archive_round(store.as_ref(), &record).await {
                    error!(round = %record.round_id, error = %e, "Failed to archive round");
                }
            });
        }

        match self.engine.create_round(now) {
            Ok(event) => self.publish(event),
            Err(e) => warn!(error = %e, "Could not start next round"),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.engine.current_state());
    }

    fn publish_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
