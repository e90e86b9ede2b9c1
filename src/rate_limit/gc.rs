//! Eviction-on-access for stale limiter entries.
//!
//! Instead of a background timer, each check samples a decision; on a hit the whole store is
//! scanned for entries untouched for longer than the staleness threshold.

use crate::error::BuildError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Share of checks that trigger a sweep.
pub const DEFAULT_GC_PROBABILITY: f64 = 0.03;

/// Entries untouched for this long are evicted.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Shortest accepted staleness threshold: one day plus one minute window.
///
/// An entry untouched this long can hold no count for the current UTC day or minute window,
/// so evicting it never hands a caller a fresh quota early.
pub const MIN_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60 + 60);

/// Decides, per check, whether to sweep.
#[derive(Clone)]
pub enum GcSampler {
    Never,
    Always,
    /// Sweep with this probability, in `[0, 1]`.
    Probability(f64),
    /// Caller-supplied decision, for deterministic tests or external scheduling.
    Custom(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl GcSampler {
    /// Validated probability sampler.
    pub fn probability(p: f64) -> Result<Self, BuildError> {
        if (0.0..=1.0).contains(&p) {
            Ok(Self::Probability(p))
        } else {
            Err(BuildError::InvalidProbability(p))
        }
    }

    pub fn custom(decide: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(decide))
    }

    pub fn should_sweep(&self) -> bool {
        match self {
            GcSampler::Never => false,
            GcSampler::Always => true,
            GcSampler::Probability(p) if *p <= 0.0 => false,
            GcSampler::Probability(p) if *p >= 1.0 => true,
            GcSampler::Probability(p) => rand::rng().random_bool(*p),
            GcSampler::Custom(decide) => decide(),
        }
    }
}

impl Default for GcSampler {
    fn default() -> Self {
        Self::Probability(DEFAULT_GC_PROBABILITY)
    }
}

impl std::fmt::Debug for GcSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcSampler::Never => f.write_str("Never"),
            GcSampler::Always => f.write_str("Always"),
            GcSampler::Probability(p) => f.debug_tuple("Probability").field(p).finish(),
            GcSampler::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
