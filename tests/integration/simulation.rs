//! Many-round simulation harness.
//!
//! Replays seeded crash draws through the engine with a fixed cash-out
//! strategy and checks the book balances round by round.

use aviator::engine::crash::HouseEdgeCrash;
use aviator::engine::{RoundConfig, RoundEngine};
use aviator::types::{BetOutcome, EngineEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::{Duration, Instant};

#[test]
fn test_seeded_simulation_books_balance() {
    let k = 0.15;
    let target = 1.5f64;
    let cfg = RoundConfig {
        countdown: Duration::from_secs(1),
        growth_rate: k,
        settle_delay: Duration::ZERO,
        max_multiplier: 1000.0,
        ..RoundConfig::default()
    };
    let mut now = Instant::now();
    let mut engine = RoundEngine::new(cfg, Box::new(HouseEdgeCrash::new(0.01, 1000.0, Some(2026))), now);

    let mut wagered = Decimal::ZERO;
    let mut paid = Decimal::ZERO;
    let mut wins = 0;

    for _ in 0..200 {
        engine.place_bet("sim", dec!(10), now).unwrap();
        let start = now + Duration::from_secs(1);

        // Try to cash out at the target; the crash may get there first.
        let cash_at = start + Duration::from_secs_f64(target.ln() / k + 0.001);
        let cashed = engine.cash_out("sim", cash_at).is_ok();

        now = start + Duration::from_secs(120);
        let record = engine
            .tick(now)
            .into_iter()
            .find_map(|e| match e {
                EngineEvent::Settled { record } => Some(record),
                _ => None,
            })
            .or_else(|| engine.round().record().cloned())
            .expect("round should settle within two minutes");

        let bet = &record.bets[0];
        match bet.outcome {
            BetOutcome::Won { cashout_multiplier, payout } => {
                assert!(cashed);
                assert!(cashout_multiplier >= target);
                assert!(record.crash_multiplier > cashout_multiplier);
                assert_eq!(payout, record.total_paid);
                wins += 1;
            }
            BetOutcome::Lost => {
                assert!(!cashed);
                assert!(record.crash_multiplier <= target + 1e-3);
            }
            BetOutcome::Open => panic!("open bet in settled round"),
        }

        wagered += record.total_wagered;
        paid += record.total_paid;
        engine.create_round(now).unwrap();
    }

    assert_eq!(wagered, dec!(2000));
    assert!(wins > 0 && wins < 200);
    assert!(paid > Decimal::ZERO);
}
