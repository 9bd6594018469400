//! End-to-end round scenarios against the public engine API.

use aviator::engine::crash::FixedCrash;
use aviator::engine::{RoundConfig, RoundEngine};
use aviator::types::{BetOutcome, EngineEvent, GameError, Phase};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::{Duration, Instant};

const K: f64 = 0.15;

fn engine(crash: f64) -> (RoundEngine, Instant) {
    let t0 = Instant::now();
    let cfg = RoundConfig {
        countdown: Duration::from_secs(3),
        growth_rate: K,
        settle_delay: Duration::ZERO,
        ..RoundConfig::default()
    };
    (RoundEngine::new(cfg, Box::new(FixedCrash(crash)), t0), t0)
}

/// Instant `s` seconds after the round starts running.
fn at(t0: Instant, s: f64) -> Instant {
    t0 + Duration::from_secs(3) + Duration::from_secs_f64(s)
}

fn time_to(multiplier: f64) -> f64 {
    multiplier.ln() / K
}

#[test]
fn test_full_round_with_mixed_outcomes() {
    let (mut engine, t0) = engine(2.0);

    // Countdown bet at 1.0x, cashed out at 1.8x.
    engine.place_bet("alice", dec!(100), t0).unwrap();
    // Running bet at 1.3x, never cashed out.
    engine.place_bet("bob", dec!(100), at(t0, time_to(1.3))).unwrap();
    // Running bet cashed out just before the crash.
    engine.place_bet("carol", dec!(50), at(t0, time_to(1.5))).unwrap();

    let (alice, _) = engine.cash_out("alice", at(t0, time_to(1.8))).unwrap();
    assert_eq!(alice.payout, dec!(180));

    let (carol, _) = engine.cash_out("carol", at(t0, time_to(1.99))).unwrap();
    assert_eq!(carol.payout, dec!(99.50));

    let events = engine.tick(at(t0, 4.63));
    let record = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::Settled { record } => Some(record.clone()),
            _ => None,
        })
        .expect("round should settle");

    assert_eq!(record.crash_multiplier, 2.0);
    assert_eq!(record.bets.len(), 3);
    assert_eq!(record.total_wagered, dec!(250));
    assert_eq!(record.total_paid, dec!(279.50));

    let bob = record.bets.iter().find(|b| b.bettor_id == "bob").unwrap();
    assert_eq!(bob.outcome, BetOutcome::Lost);
    assert_eq!(bob.payout(), Decimal::ZERO);
    assert!((bob.placed_at_multiplier - 1.3).abs() < 1e-9);
}

#[test]
fn test_actions_after_crash_always_invalid_phase() {
    let (mut engine, t0) = engine(1.5);
    engine.place_bet("alice", dec!(100), t0).unwrap();
    engine.tick(at(t0, time_to(1.5) + 0.01));
    assert_eq!(engine.current_state().phase, Phase::Settled);

    for offset in [0.02, 1.0, 60.0] {
        let now = at(t0, time_to(1.5) + offset);
        assert!(matches!(
            engine.place_bet("zed", dec!(10), now),
            Err(GameError::InvalidPhase { .. })
        ));
        assert!(matches!(
            engine.cash_out("alice", now),
            Err(GameError::InvalidPhase { .. })
        ));
    }
}

#[test]
fn test_crash_declared_exactly_once_across_irregular_ticks() {
    let (mut engine, t0) = engine(3.0);
    let mut crashes = 0;
    let mut t = 0.0;
    let mut step = 0.013;
    while t < 20.0 {
        for event in engine.tick(at(t0, t)) {
            if let EngineEvent::Crashed { crash_multiplier, .. } = event {
                crashes += 1;
                assert_eq!(crash_multiplier, 3.0);
                assert!(t >= time_to(3.0));
            }
        }
        // Re-deliver the same tick; must be a no-op.
        assert!(engine.tick(at(t0, t)).is_empty());
        t += step;
        step = if step > 0.3 { 0.013 } else { step * 1.7 };
    }
    assert_eq!(crashes, 1);
}

#[test]
fn test_consecutive_rounds() {
    let (mut engine, t0) = engine(1.2);
    let mut now = t0;
    for n in 1..=5u64 {
        assert_eq!(engine.current_state().round_number, n);
        engine.place_bet("alice", dec!(20), now).unwrap();
        now += Duration::from_secs(10);
        engine.tick(now);
        assert_eq!(engine.current_state().phase, Phase::Settled);
        assert_eq!(engine.round().record().unwrap().total_paid, Decimal::ZERO);
        engine.create_round(now).unwrap();
    }
}
