/// Rolling correlation matrix and exposure admission checks
///
/// The matrix is refreshed from historical return series on its own schedule.
/// Instruments without enough history fall back to predefined correlation
/// group membership; the fallback substitutes an assumed coefficient for a
/// measured one, so it is logged every time it is used.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Direction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub coefficient: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Matrix refresh interval
    pub update_hours: u64,
    /// |coefficient| at or above this counts as correlated exposure
    pub high_threshold: f64,
    /// Maximum number of already-open positions the candidate may correlate with
    pub max_correlated_exposure: usize,
    /// Maximum open positions in the same direction across the portfolio
    pub max_same_direction_exposure: usize,
    /// Return observations required before a measured coefficient is trusted
    pub min_history: usize,
    #[serde(default)]
    pub groups: Vec<CorrelationGroup>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            update_hours: 4,
            high_threshold: 0.7,
            max_correlated_exposure: 1,
            max_same_direction_exposure: 3,
            min_history: 30,
            groups: Vec::new(),
        }
    }
}

/// One open position's contribution to portfolio exposure
#[derive(Debug, Clone)]
pub struct OpenExposure {
    pub instrument: String,
    pub direction: Direction,
}

/// Admission verdict with a human-readable reason for telemetry
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub reason: String,
}

impl Admission {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "within exposure limits".to_string(),
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

pub struct CorrelationManager {
    config: CorrelationConfig,
    matrix: HashMap<(String, String), CorrelationEntry>,
    last_refreshed: Option<DateTime<Utc>>,
}

impl CorrelationManager {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            matrix: HashMap::new(),
            last_refreshed: None,
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Symmetric storage key: the pair is ordered so (A,B) and (B,A) hit the
    /// same entry
    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_refreshed {
            None => true,
            Some(at) => (now - at).num_hours() >= self.config.update_hours as i64,
        }
    }

    /// Recompute the matrix from per-instrument return series
    ///
    /// Pairs where either side lacks `min_history` observations are dropped
    /// from the matrix; lookups for them fall back to group membership.
    pub fn refresh(&mut self, returns: &HashMap<String, Vec<f64>>, now: DateTime<Utc>) {
        let mut symbols: Vec<&String> = returns.keys().collect();
        symbols.sort();

        let mut updated = 0;
        for (i, a) in symbols.iter().enumerate() {
            for b in &symbols[i + 1..] {
                let series_a = &returns[*a];
                let series_b = &returns[*b];

                if series_a.len() < self.config.min_history
                    || series_b.len() < self.config.min_history
                {
                    self.matrix.remove(&Self::key(a, b));
                    continue;
                }

                let len = series_a.len().min(series_b.len());
                let aligned_a = &series_a[series_a.len() - len..];
                let aligned_b = &series_b[series_b.len() - len..];

                if let Some(coefficient) = pearson(aligned_a, aligned_b) {
                    self.matrix.insert(
                        Self::key(a, b),
                        CorrelationEntry {
                            coefficient,
                            last_updated: now,
                        },
                    );
                    updated += 1;
                }
            }
        }

        self.last_refreshed = Some(now);
        tracing::info!(pairs = updated, "correlation matrix refreshed");
    }

    /// Measured coefficient between two instruments, if present
    ///
    /// Self-correlation is always 1.0 and never stored.
    pub fn coefficient(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(1.0);
        }
        self.matrix.get(&Self::key(a, b)).map(|e| e.coefficient)
    }

    /// Coefficient used for admission: measured when available, otherwise the
    /// group-membership fallback at the high-correlation threshold
    fn effective_coefficient(&self, a: &str, b: &str) -> Option<f64> {
        if let Some(measured) = self.coefficient(a, b) {
            return Some(measured);
        }

        if self.share_group(a, b) {
            tracing::warn!(
                instrument_a = a,
                instrument_b = b,
                assumed = self.config.high_threshold,
                "no correlation history, falling back to group membership"
            );
            return Some(self.config.high_threshold);
        }

        None
    }

    fn share_group(&self, a: &str, b: &str) -> bool {
        self.config.groups.iter().any(|g| {
            g.members.iter().any(|m| m == a) && g.members.iter().any(|m| m == b)
        })
    }

    /// Can `candidate` be opened alongside the current portfolio?
    pub fn can_open(
        &self,
        candidate: &str,
        direction: Direction,
        open: &[OpenExposure],
    ) -> Admission {
        let mut correlated = 0usize;
        for position in open {
            let coefficient = self
                .effective_coefficient(candidate, &position.instrument)
                .unwrap_or(0.0);

            if coefficient.abs() >= self.config.high_threshold {
                correlated += 1;
                if correlated > self.config.max_correlated_exposure.saturating_sub(1) {
                    return Admission::reject(format!(
                        "{} correlates with {} ({:.2}); correlated exposure limit {} reached",
                        candidate,
                        position.instrument,
                        coefficient,
                        self.config.max_correlated_exposure
                    ));
                }
            }
        }

        let same_direction = open.iter().filter(|p| p.direction == direction).count();
        if same_direction >= self.config.max_same_direction_exposure {
            return Admission::reject(format!(
                "{} same-direction positions already open, limit {}",
                same_direction, self.config.max_same_direction_exposure
            ));
        }

        Admission::allow()
    }
}

/// Pearson correlation coefficient of two equally-long series
pub fn pearson(series_a: &[f64], series_b: &[f64]) -> Option<f64> {
    if series_a.len() != series_b.len() || series_a.is_empty() {
        return None;
    }

    let n = series_a.len() as f64;
    let mean_a = series_a.iter().sum::<f64>() / n;
    let mean_b = series_b.iter().sum::<f64>() / n;

    let cov: f64 = series_a
        .iter()
        .zip(series_b.iter())
        .map(|(a, b)| (a - mean_a) * (b - mean_b))
        .sum::<f64>()
        / n;

    let std_a = (series_a.iter().map(|x| (x - mean_a).powi(2)).sum::<f64>() / n).sqrt();
    let std_b = (series_b.iter().map(|x| (x - mean_b).powi(2)).sum::<f64>() / n).sqrt();

    if std_a == 0.0 || std_b == 0.0 {
        return None;
    }

    Some(cov / (std_a * std_b))
}
