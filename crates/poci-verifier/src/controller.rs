//! Saturating fixed-point reputation controller.
//!
//! Per-model state is a `(weight, theta)` vector of integers; updates clamp
//! into fixed bounds so no verdict stream can push either value out of
//! range. The controller is a pure reducer over its verdict stream:
//! replaying the same stream on a fresh controller yields identical state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Upper weight bound (display 1.00).
pub const WEIGHT_MAX: u32 = 1000;
/// Lower weight bound (display 0.00).
pub const WEIGHT_MIN: u32 = 0;
/// Upper theta bound (display 5.00).
pub const THETA_MAX: u32 = 500;
/// Lower theta bound (display 0.50).
pub const THETA_MIN: u32 = 50;

const GOOD_WEIGHT_STEP: u32 = 30;
const GOOD_THETA_STEP: u32 = 8;
const BAD_WEIGHT_STEP: u32 = 100;
const BAD_THETA_STEP: u32 = 30;

//─────────────────────────────
//  Per-model reputation
//─────────────────────────────

/// One model's reputation vector.
///
/// Stored fixed-point: `weight` in `[0, 1000]` maps to a displayed
/// `0.00–1.00`, `theta` in `[50, 500]` maps to `0.50–5.00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reputation {
    /// Trust weight, saturating in `[WEIGHT_MIN, WEIGHT_MAX]`.
    pub weight: u32,
    /// Scrutiny threshold, saturating in `[THETA_MIN, THETA_MAX]`.
    pub theta: u32,
}

impl Default for Reputation {
    fn default() -> Self {
        Self {
            weight: WEIGHT_MAX,
            theta: THETA_MAX,
        }
    }
}

impl Reputation {
    /// Weight scaled for display (`weight / 1000`).
    pub fn weight_display(&self) -> f64 {
        f64::from(self.weight) / 1000.0
    }

    /// Theta scaled for display (`theta / 100`).
    pub fn theta_display(&self) -> f64 {
        f64::from(self.theta) / 100.0
    }

    fn apply(&mut self, good: bool) {
        if good {
            self.weight = (self.weight + GOOD_WEIGHT_STEP).min(WEIGHT_MAX);
            self.theta = self.theta.saturating_sub(GOOD_THETA_STEP).max(THETA_MIN);
        } else {
            self.weight = self.weight.saturating_sub(BAD_WEIGHT_STEP).max(WEIGHT_MIN);
            self.theta = (self.theta + BAD_THETA_STEP).min(THETA_MAX);
        }
    }
}

//─────────────────────────────
//  Controller
//─────────────────────────────

/// Tracks one [`Reputation`] per model, fed by verifier verdicts.
///
/// Process-local state, reconstructible by replaying verification over the
/// event log.
#[derive(Debug, Default)]
pub struct ReputationController {
    state: HashMap<String, Reputation>,
}

impl ReputationController {
    /// Fresh controller with no models tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one verdict into the model's reputation and return the updated
    /// vector. Unknown models start from the default `(1000, 500)`.
    pub fn update(&mut self, model_id: &str, good: bool) -> Reputation {
        let rep = self.state.entry(model_id.to_string()).or_default();
        rep.apply(good);
        *rep
    }

    /// Current reputation of a model (default if never updated).
    pub fn get(&self, model_id: &str) -> Reputation {
        self.state.get(model_id).copied().unwrap_or_default()
    }

    /// All tracked models with their reputation, sorted by model id.
    pub fn summary(&self) -> Vec<(String, Reputation)> {
        let mut rows: Vec<_> = self
            .state
            .iter()
            .map(|(id, rep)| (id.clone(), *rep))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}
