//! Crash-point strategies.
//!
//! The crash multiplier is drawn exactly once per round, when the round is
//! created. Strategies are pluggable so the distribution can change without
//! touching the state machine.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::CrashConfig;

/// Source of crash multipliers.
pub trait CrashPolicy: Send {
    /// Draw the crash multiplier for a new round. Values below 1.0 or
    /// non-finite values are sanitised by the engine.
    fn draw(&mut self) -> f64;

    /// Policy name for logging.
    fn name(&self) -> &str;
}

/// Clamp a raw draw into `[1.0, max]`.
pub fn sanitise(raw: f64, max: f64) -> f64 {
    if !raw.is_finite() {
        return 1.0;
    }
    raw.clamp(1.0, max.max(1.0))
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

// ---------------------------------------------------------------------------
// Uniform
// ---------------------------------------------------------------------------

/// Uniform draw in `[1.0, max_multiplier)`. No house edge.
pub struct UniformCrash {
    rng: StdRng,
    max_multiplier: f64,
}

impl UniformCrash {
    pub fn new(max_multiplier: f64, seed: Option<u64>) -> Self {
        Self {
            rng: make_rng(seed),
            max_multiplier: max_multiplier.max(1.0),
        }
    }
}

impl CrashPolicy for UniformCrash {
    fn draw(&mut self) -> f64 {
        if !(self.max_multiplier.is_finite() && self.max_multiplier > 1.0) {
            return 1.0;
        }
        self.rng.gen_range(1.0..self.max_multiplier)
    }

    fn name(&self) -> &str {
        "uniform"
    }
}

// ---------------------------------------------------------------------------
// House edge
// ---------------------------------------------------------------------------

/// Heavy-tailed draw `(1 - edge) / (1 - u)`, truncated to cents.
///
/// Roughly `edge` of all rounds crash at 1.00x.
pub struct HouseEdgeCrash {
    rng: StdRng,
    house_edge: f64,
    max_multiplier: f64,
}

impl HouseEdgeCrash {
    pub fn new(house_edge: f64, max_multiplier: f64, seed: Option<u64>) -> Self {
        Self {
            rng: make_rng(seed),
            house_edge: house_edge.clamp(0.0, 0.99),
            max_multiplier: max_multiplier.max(1.0),
        }
    }
}

impl CrashPolicy for HouseEdgeCrash {
    fn draw(&mut self) -> f64 {
        let u: f64 = self.rng.gen();
        let raw = (1.0 - self.house_edge) / (1.0 - u);
        let truncated = (raw * 100.0).floor() / 100.0;
        truncated.clamp(1.0, self.max_multiplier)
    }

    fn name(&self) -> &str {
        "house_edge"
    }
}

// ---------------------------------------------------------------------------
// Fixed
// ---------------------------------------------------------------------------

/// Always crashes at the same multiplier.
pub struct FixedCrash(pub f64);

impl CrashPolicy for FixedCrash {
    fn draw(&mut self) -> f64 {
        self.0
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Plays back a fixed sequence, repeating the last value once exhausted.
pub struct ScriptedCrash {
    values: Vec<f64>,
    next: usize,
}

impl ScriptedCrash {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, next: 0 }
    }
}

impl CrashPolicy for ScriptedCrash {
    fn draw(&mut self) -> f64 {
        let idx = self.next.min(self.values.len().saturating_sub(1));
        self.next += 1;
        self.values.get(idx).copied().unwrap_or(1.0)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Build the configured policy.
pub fn from_config(cfg: &CrashConfig) -> Result<Box<dyn CrashPolicy>> {
    let policy: Box<dyn CrashPolicy> = match cfg.policy.as_str() {
        "uniform" => Box::new(UniformCrash::new(cfg.max_multiplier, cfg.seed)),
        "house_edge" => Box::new(HouseEdgeCrash::new(cfg.house_edge, cfg.max_multiplier, cfg.seed)),
        "fixed" => match cfg.fixed_multiplier {
            Some(m) => Box::new(FixedCrash(m)),
            None => bail!("crash.policy = \"fixed\" requires crash.fixed_multiplier"),
        },
        other => bail!("Unknown crash policy: {other}"),
    };
    debug!(policy = policy.name(), max = cfg.max_multiplier, "Crash policy built");
    Ok(policy)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn crash_cfg(policy: &str) -> CrashConfig {
        CrashConfig {
            policy: policy.into(),
            max_multiplier: 50.0,
            house_edge: 0.01,
            fixed_multiplier: None,
            seed: Some(7),
        }
    }

    #[test]
    fn test_uniform_within_bounds() {
        let mut p = UniformCrash::new(10.0, Some(42));
        for _ in 0..1000 {
            let m = p.draw();
            assert!((1.0..10.0).contains(&m), "out of range: {m}");
        }
    }

    #[test]
    fn test_uniform_degenerate_max() {
        let mut p = UniformCrash::new(0.5, Some(1));
        assert_eq!(p.draw(), 1.0);
    }

    #[test]
    fn test_uniform_unbounded_max_does_not_panic() {
        let mut p = UniformCrash::new(f64::INFINITY, Some(1));
        assert_eq!(p.draw(), 1.0);
        let mut p = UniformCrash::new(f64::NAN, Some(1));
        assert_eq!(p.draw(), 1.0);
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let mut a = HouseEdgeCrash::new(0.01, 1000.0, Some(99));
        let mut b = HouseEdgeCrash::new(0.01, 1000.0, Some(99));
        let xs: Vec<f64> = (0..20).map(|_| a.draw()).collect();
        let ys: Vec<f64> = (0..20).map(|_| b.draw()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_house_edge_truncated_and_capped() {
        let mut p = HouseEdgeCrash::new(0.05, 20.0, Some(3));
        for _ in 0..1000 {
            let m = p.draw();
            assert!((1.0..=20.0).contains(&m));
            let cents = m * 100.0;
            assert!((cents - cents.round()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_house_edge_produces_instant_crashes() {
        let mut p = HouseEdgeCrash::new(0.5, 1000.0, Some(11));
        let ones = (0..2000).filter(|_| p.draw() == 1.0).count();
        // Roughly half of all rounds should bust at 1.00x.
        assert!(ones > 800 && ones < 1200, "ones = {ones}");
    }

    #[test]
    fn test_sanitise() {
        assert_eq!(sanitise(f64::NAN, 10.0), 1.0);
        assert_eq!(sanitise(f64::INFINITY, 10.0), 1.0);
        assert_eq!(sanitise(0.3, 10.0), 1.0);
        assert_eq!(sanitise(25.0, 10.0), 10.0);
        assert_eq!(sanitise(2.5, 10.0), 2.5);
    }

    #[test]
    fn test_scripted_repeats_last() {
        let mut p = ScriptedCrash::new(vec![1.5, 3.0]);
        assert_eq!(p.draw(), 1.5);
        assert_eq!(p.draw(), 3.0);
        assert_eq!(p.draw(), 3.0);
        assert_eq!(ScriptedCrash::new(vec![]).draw(), 1.0);
    }

    #[test]
    fn test_from_config() {
        assert_eq!(from_config(&crash_cfg("uniform")).unwrap().name(), "uniform");
        assert_eq!(from_config(&crash_cfg("house_edge")).unwrap().name(), "house_edge");
        assert!(from_config(&crash_cfg("fixed")).is_err());
        assert!(from_config(&crash_cfg("martingale")).is_err());

        let mut cfg = crash_cfg("fixed");
        cfg.fixed_multiplier = Some(2.0);
        let mut p = from_config(&cfg).unwrap();
        assert_eq!(p.draw(), 2.0);
    }
}
