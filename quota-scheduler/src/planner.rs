//! Quota planning: relative weights to absolute per-action targets.

use crate::types::PlanError;
use std::collections::HashSet;

/// Relative action frequencies, in configuration order.
///
/// Order does not affect the computed quotas, but it is the order in which
/// fixed-mode scheduling walks the action types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionWeights {
    entries: Vec<(String, f64)>,
}

impl ActionWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds weights from `(action, weight)` pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            entries: pairs.into_iter().map(|(a, w)| (a.into(), w)).collect(),
        }
    }

    /// Appends an action weight.
    pub fn push(&mut self, action: impl Into<String>, weight: f64) {
        self.entries.push((action.into(), weight));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(a, w)| (a.as_str(), *w))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that weights are finite, non-negative, and that no action repeats.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for (action, weight) in &self.entries {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(PlanError::InvalidWeight {
                    action: action.clone(),
                    weight: *weight,
                });
            }
            if !seen.insert(action.as_str()) {
                return Err(PlanError::DuplicateAction(action.clone()));
            }
        }
        Ok(())
    }
}

/// Target count per action type, in configuration order. Immutable once planned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaTable {
    entries: Vec<(String, u64)>,
}

impl QuotaTable {
    /// Returns the quota for `action`, or `None` if it was not planned.
    pub fn get(&self, action: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(a, _)| a == action)
            .map(|(_, q)| *q)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.get(action).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(a, q)| (a.as_str(), *q))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all quotas.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, q)| q).sum()
    }

    pub(crate) fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }
}

/// Result of quota planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaPlan {
    /// Per-action targets. Zero-weight actions are absent.
    pub quotas: QuotaTable,
    /// Realized run total: the sum of `quotas`, which may fall short of the
    /// requested total because of rounding.
    pub total: u64,
}

impl QuotaPlan {
    /// Action types that start the run active, in configuration order.
    ///
    /// An action whose quota rounded down to zero stays in the table but is
    /// never scheduled.
    pub fn active_set(&self) -> Vec<&str> {
        self.quotas
            .iter()
            .filter(|(_, q)| *q > 0)
            .map(|(a, _)| a)
            .collect()
    }

    /// Returns true if the plan schedules nothing.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Computes per-action quotas for a run of `total` transactions.
///
/// Each non-zero weight receives `round(weight / sum * total)`, rounding
/// half-to-even (2.5 becomes 2, 3.5 becomes 4). Rounding drift is kept: the
/// returned [`QuotaPlan::total`] is the sum of the rounded quotas.
///
/// # Errors
///
/// Returns [`PlanError`] for negative or non-finite weights, for weights whose
/// sum overflows, and for repeated action types.
pub fn plan(weights: &ActionWeights, total: u64) -> Result<QuotaPlan, PlanError> {
    weights.validate()?;

    let ratio_sum: f64 = weights.iter().map(|(_, w)| w).filter(|w| *w > 0.0).sum();
    if !ratio_sum.is_finite() {
        return Err(PlanError::WeightSumOverflow);
    }
    if ratio_sum == 0.0 {
        tracing::debug!("all action weights are zero, nothing to schedule");
        return Ok(QuotaPlan::default());
    }

    let entries: Vec<(String, u64)> = weights
        .iter()
        .filter(|(_, w)| *w > 0.0)
        .map(|(action, weight)| {
            let quota = (weight / ratio_sum * total as f64).round_ties_even() as u64;
            (action.to_string(), quota)
        })
        .collect();

    let quotas = QuotaTable { entries };
    let realized = quotas.total();
    if realized != total {
        tracing::debug!(requested = total, realized, "quota rounding drift");
    }

    Ok(QuotaPlan {
        quotas,
        total: realized,
    })
}
