//! Online statistical learning over feature vectors (spec §4.2): exact
//! key lookup backed by nearest-neighbor fallback.
//!
//! Grounded on the teacher's plain-`f64` statistics style
//! (`examples/Zuytan-rustrade/src/domain/performance/stats.rs`) and on
//! `domain/ports.rs`'s partitioned-persistence pattern, generalized to
//! live/paper/backtest pattern stores instead of per-broker ports.

use crate::domain::{FeatureVector, PersistenceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DEFAULT_CAP: usize = 10_000;
const RESULTS_CAP: usize = 10;
const DEFAULT_MIN_MATCHES: u32 = 3;
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;
const MAX_NEIGHBORS: usize = 10;
const DEFAULT_WEIGHTS: [f64; 9] = [0.25, 0.15, 0.15, 0.10, 0.05, 0.05, 0.15, 0.05, 0.05];

/// Which on-disk partition a pattern store belongs to (spec §4.2
/// "never cross-contaminate").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Live,
    Paper,
    Backtest,
}

impl Partition {
    fn file_suffix(self) -> &'static str {
        match self {
            Partition::Live => "live",
            Partition::Paper => "paper",
            Partition::Backtest => "backtest",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternResult {
    pub timestamp: DateTime<Utc>,
    pub pnl: f64,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStat {
    pub times_seen: u64,
    pub total_pnl: f64,
    pub wins: u64,
    pub losses: u64,
    pub results: Vec<PatternResult>,
    /// Stored so similarity search does not need to re-parse the key.
    pub vector: Vec<f64>,
}

impl PatternStat {
    fn win_rate(&self) -> f64 {
        if self.times_seen == 0 {
            0.0
        } else {
            self.wins as f64 / self.times_seen as f64
        }
    }

    fn avg_pnl(&self) -> f64 {
        if self.times_seen == 0 {
            0.0
        } else {
            self.total_pnl / self.times_seen as f64
        }
    }

    /// Recent win rate from the bounded results window, decayed by age.
    fn decayed_success_rate(&self, now: DateTime<Utc>) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for result in &self.results {
            let age_hours = (now - result.timestamp).num_seconds() as f64 / 3600.0;
            let weight = (-age_hours.max(0.0) * 0.01).exp();
            weighted_sum += weight * if result.success { 1.0 } else { 0.0 };
            weight_total += weight;
        }
        if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        }
    }

    fn recent_win_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let wins = self.results.iter().filter(|r| r.success).count();
        wins as f64 / self.results.len() as f64
    }

    /// Pruning score (spec §4.2): `(times_seen/10) * (1 - min(age_fraction, 1))`.
    fn prune_score(&self, now: DateTime<Utc>) -> f64 {
        let most_recent = self.results.last().map(|r| r.timestamp).unwrap_or(now);
        let age_fraction = (now - most_recent).num_seconds() as f64 / (30.0 * 24.0 * 3600.0);
        (self.times_seen as f64 / 10.0) * (1.0 - age_fraction.clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatedDirection {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub confidence: f64,
    pub direction: EvaluatedDirection,
    pub exact_match: bool,
    pub times_seen: u64,
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub reason: String,
}

impl EvaluationResult {
    fn zero_confidence_hold(reason: &str) -> Self {
        Self {
            confidence: 0.0,
            direction: EvaluatedDirection::Hold,
            exact_match: false,
            times_seen: 0,
            win_rate: 0.0,
            avg_pnl: 0.0,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    count: u64,
    patterns: HashMap<String, PatternStat>,
    timestamp: DateTime<Utc>,
}

pub struct PatternMemory {
    patterns: HashMap<String, PatternStat>,
    cap: usize,
    min_matches: u32,
    confidence_threshold: f64,
    similarity_threshold: f64,
    weights: [f64; 9],
    partition: Partition,
    path: PathBuf,
}

impl PatternMemory {
    pub async fn load(data_dir: &Path, partition: Partition) -> Result<Self, PersistenceError> {
        let path = data_dir.join(format!("pattern-memory.{}.json", partition.file_suffix()));
        let loaded: Option<PersistedStore> = crate::persistence::read_json_opt(&path).await?;
        let patterns = loaded.map(|p| p.patterns).unwrap_or_default();
        Ok(Self {
            patterns,
            cap: DEFAULT_CAP,
            min_matches: DEFAULT_MIN_MATCHES,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            weights: DEFAULT_WEIGHTS,
            partition,
            path,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Record a trade outcome against the feature vector's quantized key
    /// (spec §4.2 "Record").
    pub fn record(&mut self, features: &FeatureVector, pnl: f64, timestamp: DateTime<Utc>) {
        let key = features.quantized_key();
        let is_new = !self.patterns.contains_key(&key);
        let entry = self.patterns.entry(key).or_insert_with(|| PatternStat {
            times_seen: 0,
            total_pnl: 0.0,
            wins: 0,
            losses: 0,
            results: Vec::new(),
            vector: features.as_slice().to_vec(),
        });

        entry.times_seen += 1;
        entry.total_pnl += pnl;
        if pnl > 0.0 {
            entry.wins += 1;
        } else {
            entry.losses += 1;
        }
        entry.results.push(PatternResult {
            timestamp,
            pnl,
            success: pnl > 0.0,
        });
        if entry.results.len() > RESULTS_CAP {
            entry.results.remove(0);
        }

        if is_new && self.patterns.len() > self.cap {
            self.prune(timestamp);
        }
    }

    /// Keep the top 80% by prune score (spec §4.2 "Pruning").
    fn prune(&mut self, now: DateTime<Utc>) {
        let before = self.patterns.len();
        let mut scored: Vec<(String, f64)> = self
            .patterns
            .iter()
            .map(|(k, stat)| (k.clone(), stat.prune_score(now)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let keep = (before as f64 * 0.8).floor() as usize;
        let keep_keys: std::collections::HashSet<String> =
            scored.into_iter().take(keep).map(|(k, _)| k).collect();
        self.patterns.retain(|k, _| keep_keys.contains(k));
        info!(
            "PatternMemory[{:?}]: pruned {} -> {} entries",
            self.partition,
            before,
            self.patterns.len()
        );
    }

    fn weighted_distance(&self, a: &[f64], b: &[f64]) -> Option<f64> {
        if a.len() != b.len() {
            return None;
        }
        let mut weighted_sq_sum = 0.0;
        let mut weight_total = 0.0;
        for i in 0..a.len() {
            let w = self.weights.get(i).copied().unwrap_or(0.0);
            weighted_sq_sum += w * (a[i] - b[i]).powi(2);
            weight_total += w;
        }
        if weight_total <= 0.0 {
            return Some(0.0);
        }
        Some((weighted_sq_sum / weight_total).sqrt())
    }

    fn similarity(&self, a: &[f64], b: &[f64]) -> Option<f64> {
        self.weighted_distance(a, b)
            .map(|d| (1.0 - d / 2.0).max(0.0))
    }

    /// Four-step evaluation pipeline (spec §4.2 "Evaluation").
    pub fn evaluate(&self, features: &FeatureVector, now: DateTime<Utc>) -> EvaluationResult {
        let key = features.quantized_key();

        // Step 1: exact key lookup.
        if let Some(stat) = self.patterns.get(&key) {
            if stat.times_seen as u32 >= self.min_matches {
                let overall = stat.win_rate();
                let recent = stat.recent_win_rate();
                let confidence = 0.7 * overall + 0.3 * recent;
                let avg_pnl = stat.avg_pnl();
                let direction = if avg_pnl > 0.0 {
                    EvaluatedDirection::Buy
                } else if avg_pnl < 0.0 {
                    EvaluatedDirection::Sell
                } else {
                    EvaluatedDirection::Hold
                };
                if confidence >= self.confidence_threshold {
                    return EvaluationResult {
                        confidence,
                        direction,
                        exact_match: true,
                        times_seen: stat.times_seen,
                        win_rate: overall,
                        avg_pnl,
                        reason: "exact_match".to_string(),
                    };
                }
                return EvaluationResult::zero_confidence_hold("exact_match_below_threshold");
            }
        }

        // Step 2: same-length neighbor scan.
        let target = features.as_slice();
        let mut neighbors: Vec<(&PatternStat, f64)> = self
            .patterns
            .values()
            .filter(|stat| stat.vector.len() == target.len())
            .filter_map(|stat| {
                self.similarity(&stat.vector, target)
                    .filter(|s| *s >= self.similarity_threshold)
                    .map(|s| (stat, s))
            })
            .collect();

        // Keep the top MAX_NEIGHBORS by similarity first, then drop the
        // ones without enough samples — not the other way around, or a
        // well-sampled but slightly-less-similar neighbor could get bumped
        // out of the top 10 by a high-similarity one-off match.
        neighbors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        neighbors.truncate(MAX_NEIGHBORS);
        neighbors.retain(|(stat, _)| stat.times_seen as u32 >= self.min_matches);

        // Step 3: nothing qualifies.
        if neighbors.is_empty() {
            return EvaluationResult::zero_confidence_hold("no_qualifying_neighbors");
        }

        // Step 4: similarity-weighted aggregation.
        let mut weighted_pnl = 0.0;
        let mut weighted_win_rate = 0.0;
        let mut weighted_recent = 0.0;
        let mut weight_total = 0.0;
        let mut times_seen_total = 0u64;
        for (stat, sim) in &neighbors {
            weighted_pnl += sim * stat.avg_pnl();
            weighted_win_rate += sim * stat.win_rate();
            weighted_recent += sim * stat.decayed_success_rate(now);
            weight_total += sim;
            times_seen_total += stat.times_seen;
        }
        let avg_pnl = if weight_total > 0.0 {
            weighted_pnl / weight_total
        } else {
            0.0
        };
        let win_rate = if weight_total > 0.0 {
            weighted_win_rate / weight_total
        } else {
            0.0
        };
        let recent = if weight_total > 0.0 {
            weighted_recent / weight_total
        } else {
            0.0
        };
        let mean_similarity = weight_total / neighbors.len() as f64;
        let base_confidence = 0.7 * win_rate + 0.3 * recent;
        let confidence = (base_confidence * mean_similarity).min(1.0);

        let direction = if avg_pnl > 0.0 {
            EvaluatedDirection::Buy
        } else if avg_pnl < 0.0 {
            EvaluatedDirection::Sell
        } else {
            EvaluatedDirection::Hold
        };

        if confidence >= self.confidence_threshold {
            EvaluationResult {
                confidence,
                direction,
                exact_match: false,
                times_seen: times_seen_total,
                win_rate,
                avg_pnl,
                reason: format!("neighbor_match[{}]", neighbors.len()),
            }
        } else {
            EvaluationResult::zero_confidence_hold("neighbor_match_below_threshold")
        }
    }

    /// Decayed success rate for a specific key, used by the AI module's
    /// outcome feedback weighting.
    pub fn decayed_success_rate(&self, features: &FeatureVector, now: DateTime<Utc>) -> Option<f64> {
        self.patterns
            .get(&features.quantized_key())
            .map(|stat| stat.decayed_success_rate(now))
    }

    pub async fn persist(&self) -> Result<(), PersistenceError> {
        let persisted = PersistedStore {
            count: self.patterns.len() as u64,
            patterns: self.patterns.clone(),
            timestamp: Utc::now(),
        };
        crate::persistence::write_json_atomic(&self.path, &persisted).await?;
        debug!(
            "PatternMemory[{:?}]: persisted {} patterns",
            self.partition,
            persisted.count
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn features(elements: [f64; 9]) -> FeatureVector {
        FeatureVector::new(elements.to_vec()).unwrap()
    }

    async fn store() -> PatternMemory {
        let dir = std::env::temp_dir().join(format!("spotcore-pm-test-{}", uuid::Uuid::new_v4()));
        PatternMemory::load(&dir, Partition::Backtest).await.unwrap()
    }

    #[tokio::test]
    async fn exact_match_requires_min_matches() {
        let mut pm = store().await;
        let f = features([0.5, 0.1, 1.0, 0.2, 0.03, 0.1, 0.01, 1.1, 1.0]);
        let now = Utc::now();

        pm.record(&f, 10.0, now);
        pm.record(&f, 12.0, now);
        // Only 2 observations: below min_matches (3).
        let eval = pm.evaluate(&f, now);
        assert_eq!(eval.confidence, 0.0);

        pm.record(&f, 15.0, now);
        let eval = pm.evaluate(&f, now);
        assert!(eval.exact_match);
        assert_eq!(eval.times_seen, 3);
        assert_eq!(eval.direction, EvaluatedDirection::Buy);
    }

    #[tokio::test]
    async fn neighbor_fallback_finds_similar_vector() {
        let mut pm = store().await;
        let base = [0.5, 0.1, 1.0, 0.2, 0.03, 0.1, 0.01, 1.1, 1.0];
        let f1 = features(base);
        let now = Utc::now();
        pm.record(&f1, 8.0, now);
        pm.record(&f1, 9.0, now);
        pm.record(&f1, 7.0, now);

        let mut near = base;
        near[0] += 0.001;
        let eval = pm.evaluate(&features(near), now);
        assert!(!eval.exact_match);
        assert_eq!(eval.direction, EvaluatedDirection::Buy);
    }

    #[tokio::test]
    async fn decay_weights_older_results_less() {
        let mut pm = store().await;
        let f = features([0.1; 9]);
        let old = Utc::now() - Duration::hours(500);
        let now = Utc::now();
        pm.record(&f, 1.0, old);
        pm.record(&f, -1.0, now);
        let decayed = pm.decayed_success_rate(&f, now).unwrap();
        // Recent failure should dominate a stale success.
        assert!(decayed < 0.5);
    }

    #[test]
    fn similarity_of_identical_vectors_is_one() {
        let pm = PatternMemory {
            patterns: HashMap::new(),
            cap: DEFAULT_CAP,
            min_matches: DEFAULT_MIN_MATCHES,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            weights: DEFAULT_WEIGHTS,
            partition: Partition::Backtest,
            path: PathBuf::new(),
        };
        let v = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];
        assert_eq!(pm.similarity(&v, &v), Some(1.0));
    }
}
