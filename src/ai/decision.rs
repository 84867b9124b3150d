//! Second-opinion layer with veto power (spec §4.5).
//!
//! Grounded on the teacher's `MLPredictor` pluggable-model trait
//! (`examples/Zuytan-rustrade/src/application/ml/predictor.rs`) for the
//! `ReasoningCollaborator` injection point, and on `risk_manager.rs`'s
//! command-style pipeline for the ten decision steps.

use crate::domain::Direction;
use crate::pattern_memory::{EvaluatedDirection, PatternMemory};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiMode {
    Passive,
    Advisory,
    Hybrid,
    Autonomous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

#[derive(Debug, Clone)]
pub struct MarketContext {
    pub volatility: f64,
    pub rsi: Option<f64>,
    pub macd_bias: Option<f64>,
    pub regime: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: f64,
    pub factors: Vec<&'static str>,
    pub estimated_max_loss_pct: f64,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub intent_id: String,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub vetoed: bool,
    pub reasoning: String,
    pub risk: RiskAssessment,
    pub position_multiplier: f64,
    pub stop_loss_multiplier: f64,
    pub take_profit_multiplier: f64,
}

#[async_trait]
pub trait ReasoningCollaborator: Send + Sync {
    async fn explain(&self, direction: Direction, confidence: f64, context: &MarketContext) -> Option<String>;
}

/// Rule-based fallback, used whenever the LLM path times out, errors, or
/// is disabled via `AI_ENABLE_LLM=false`.
pub struct RuleBasedReasoner;

#[async_trait]
impl ReasoningCollaborator for RuleBasedReasoner {
    async fn explain(&self, direction: Direction, confidence: f64, context: &MarketContext) -> Option<String> {
        let regime = context.regime.as_deref().unwrap_or("neutral");
        Some(format!(
            "{:?} at {:.0}% confidence under a {} regime (volatility {:.3})",
            direction,
            confidence * 100.0,
            regime,
            context.volatility
        ))
    }
}

#[derive(Debug, Clone, Default)]
struct PatternOutcomeStat {
    samples: u64,
    successes: u64,
    failures: u64,
    last_touched: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub mode: AiMode,
    pub min_confidence_override: f64,
    pub emergency_stop_pct: f64,
    pub enable_veto: bool,
    pub enable_llm: bool,
    pub llm_timeout: StdDuration,
    pub min_sample_for_blend: u64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            mode: AiMode::Advisory,
            min_confidence_override: 0.35,
            emergency_stop_pct: 0.05,
            enable_veto: true,
            enable_llm: true,
            llm_timeout: StdDuration::from_secs(3),
            min_sample_for_blend: 10,
        }
    }
}

pub struct AiDecisionModule {
    config: DecisionConfig,
    outcome_stats: HashMap<String, PatternOutcomeStat>,
    reasoner: std::sync::Arc<dyn ReasoningCollaborator>,
    decision_log: std::collections::VecDeque<Decision>,
}

impl AiDecisionModule {
    pub fn new(config: DecisionConfig, reasoner: std::sync::Arc<dyn ReasoningCollaborator>) -> Self {
        Self {
            config,
            outcome_stats: HashMap::new(),
            reasoner,
            decision_log: std::collections::VecDeque::new(),
        }
    }

    /// Ten-step decision pipeline (spec §4.5).
    pub async fn decide(
        &mut self,
        direction: Direction,
        signal_confidence_pct: f64,
        pattern_key: &str,
        pattern_memory: &PatternMemory,
        features: &crate::domain::FeatureVector,
        context: MarketContext,
    ) -> Decision {
        // Step 1: intent id tied to this decision.
        let intent_id = format!(
            "{:x}",
            md5_like_hash(&format!("{}-{:?}-{:.4}", context.timestamp.timestamp_millis(), direction, signal_confidence_pct))
        );

        // Step 2: market context is already supplied by the caller.

        // Step 3: compute AI confidence.
        let mut ai_confidence = self.compute_ai_confidence(
            direction,
            signal_confidence_pct,
            pattern_key,
            pattern_memory,
            features,
            &context,
        );

        // Step 4: blend with the original signal confidence per mode.
        let original = normalize_confidence(direction, signal_confidence_pct);
        let blended = match self.config.mode {
            AiMode::Passive => original,
            AiMode::Advisory => {
                let penalty = if ai_confidence < 0.10 { 0.9 } else { 1.0 };
                (original + ai_confidence * 0.3 * penalty).clamp(0.0, 1.0)
            }
            AiMode::Hybrid => {
                let penalty = if ai_confidence < 0.10 { 0.9 } else { 1.0 };
                (original + ai_confidence * 0.6 * penalty).clamp(0.0, 1.0)
            }
            AiMode::Autonomous => (0.7 * ai_confidence + 0.3 * original).clamp(0.0, 1.0),
        };
        ai_confidence = blended;

        // Step 5: risk assessment.
        let risk = self.assess_risk(ai_confidence, &context);

        // Step 6: recommendation.
        let mut recommendation = if ai_confidence >= self.config.min_confidence_override {
            match direction {
                Direction::Buy if ai_confidence >= 0.7 => Recommendation::StrongBuy,
                Direction::Buy => Recommendation::Buy,
                Direction::Sell if ai_confidence >= 0.7 => Recommendation::StrongSell,
                Direction::Sell => Recommendation::Sell,
                Direction::Hold => Recommendation::Hold,
            }
        } else {
            Recommendation::Hold
        };

        // Step 7: veto.
        let mut vetoed = false;
        if self.config.enable_veto {
            let veto_triggered = risk.score > 0.8
                || risk.estimated_max_loss_pct > self.config.emergency_stop_pct
                || risk.factors.len() >= 3;
            if veto_triggered {
                vetoed = true;
                recommendation = Recommendation::Hold;
                ai_confidence = 0.0;
            }
        }

        // Step 8: reasoning.
        let reasoning = if ai_confidence > 0.40 && ai_confidence < 0.70 && self.config.enable_llm {
            match tokio::time::timeout(self.config.llm_timeout, self.reasoner.explain(direction, ai_confidence, &context)).await {
                Ok(Some(text)) => text,
                _ => {
                    warn!("AiDecisionModule: LLM reasoning timed out or errored, falling back to rules");
                    RuleBasedReasoner.explain(direction, ai_confidence, &context).await.unwrap_or_default()
                }
            }
        } else {
            RuleBasedReasoner.explain(direction, ai_confidence, &context).await.unwrap_or_default()
        };

        // Step 9: position/stop/take multipliers.
        let (position_multiplier, stop_loss_multiplier, take_profit_multiplier) =
            self.compute_multipliers(ai_confidence, &risk);

        let decision = Decision {
            intent_id,
            recommendation,
            confidence: ai_confidence,
            vetoed,
            reasoning,
            risk,
            position_multiplier,
            stop_loss_multiplier,
            take_profit_multiplier,
        };

        // Step 10: telemetry.
        self.decision_log.push_back(decision.clone());
        while self.decision_log.len() > 50 {
            self.decision_log.pop_front();
        }
        debug!("AiDecisionModule: decision {:?}", decision.recommendation);

        decision
    }

    fn compute_ai_confidence(
        &self,
        direction: Direction,
        signal_confidence_pct: f64,
        pattern_key: &str,
        pattern_memory: &PatternMemory,
        features: &crate::domain::FeatureVector,
        context: &MarketContext,
    ) -> f64 {
        if let Some(stat) = self.outcome_stats.get(pattern_key) {
            if stat.samples > 0 {
                let rate = stat.successes as f64 / stat.samples as f64;
                if rate >= 0.8 && stat.samples >= 5 {
                    return rate; // learned_success short-circuit
                }
                if rate <= 0.2 && stat.samples >= 5 {
                    return 0.0; // learned_failure short-circuit
                }
            }
        }

        let mut confidence = normalize_confidence(direction, signal_confidence_pct);

        // `evaluate` already folds every qualifying neighbor into one
        // win_rate, so there is no per-pattern list left to sum here; the
        // per-pattern cap lives inside PatternMemory's own aggregation.
        let eval = pattern_memory.evaluate(features, context.timestamp);
        if eval.times_seen > 0 {
            confidence += eval.win_rate * 0.03;
        }

        if let (Some(rsi), Some(macd_bias)) = (context.rsi, context.macd_bias) {
            let aligned = match direction {
                Direction::Buy => rsi < 50.0 && macd_bias > 0.0,
                Direction::Sell => rsi > 50.0 && macd_bias < 0.0,
                Direction::Hold => false,
            };
            if aligned {
                confidence += 0.05;
            }
        }

        if let Some(regime) = &context.regime {
            let regime = regime.to_lowercase();
            let aligned = (direction == Direction::Buy && regime.contains("up"))
                || (direction == Direction::Sell && regime.contains("down"));
            confidence += if aligned { 0.05 } else { -0.05 };
        }

        if matches!(eval.direction, EvaluatedDirection::Hold) {
            confidence *= 0.9;
        }

        if eval.times_seen as u64 >= self.config.min_sample_for_blend {
            confidence = 0.6 * confidence + 0.4 * eval.win_rate;
        }

        confidence.clamp(0.0, 1.0)
    }

    fn assess_risk(&self, confidence: f64, context: &MarketContext) -> RiskAssessment {
        let mut score = 0.0;
        let mut factors = Vec::new();

        if context.volatility > 0.04 {
            score += 0.3;
            factors.push("high_volatility");
        }
        if confidence < 0.3 {
            score += 0.25;
            factors.push("low_confidence");
        }
        if context.regime.as_deref().map(|r| r.to_lowercase().contains("uncertain")).unwrap_or(false) {
            score += 0.2;
            factors.push("uncertain_regime");
        }
        let hour = context.timestamp.hour();
        if hour < 6 {
            score += 0.15;
            factors.push("low_liquidity_hours");
        }

        let estimated_max_loss_pct = (context.volatility * 1.5).min(0.2);

        RiskAssessment {
            score: score.clamp(0.0, 1.0),
            factors,
            estimated_max_loss_pct,
        }
    }

    fn compute_multipliers(&self, confidence: f64, risk: &RiskAssessment) -> (f64, f64, f64) {
        let position_multiplier = (1.0 + (confidence - 0.5)).clamp(0.5, 1.5);
        let stop_loss_multiplier = (1.0 + risk.score * 0.5).clamp(1.0, 2.0);
        let take_profit_multiplier = (1.0 + confidence * 0.5).clamp(1.0, 1.5);
        (position_multiplier, stop_loss_multiplier, take_profit_multiplier)
    }

    /// `update_outcome`: increments per-pattern success/failure counters.
    pub fn update_outcome(&mut self, pattern_key: &str, success: bool, now: DateTime<Utc>) {
        let stat = self.outcome_stats.entry(pattern_key.to_string()).or_default();
        stat.samples += 1;
        if success {
            stat.successes += 1;
        } else {
            stat.failures += 1;
        }
        stat.last_touched = Some(now);
    }

    /// Drop patterns untouched for 90 days.
    pub fn prune_outcomes(&mut self, now: DateTime<Utc>) {
        let cutoff = chrono::Duration::days(90);
        self.outcome_stats.retain(|_, stat| {
            stat.last_touched.map(|t| now - t < cutoff).unwrap_or(true)
        });
    }
}

fn normalize_confidence(direction: Direction, pct: f64) -> f64 {
    if pct.is_finite() && pct > 0.0 {
        return (pct / 100.0).clamp(0.0, 1.0);
    }
    match direction {
        Direction::Hold => 0.3,
        Direction::Buy | Direction::Sell => 0.5,
    }
}

/// Cheap deterministic hash for intent-id generation within this module;
/// the Execution Layer's SHA-256 derivation is the authoritative one used
/// on the order path.
fn md5_like_hash(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}

impl Clone for Decision {
    fn clone(&self) -> Self {
        Self {
            intent_id: self.intent_id.clone(),
            recommendation: self.recommendation,
            confidence: self.confidence,
            vetoed: self.vetoed,
            reasoning: self.reasoning.clone(),
            risk: self.risk.clone(),
            position_multiplier: self.position_multiplier,
            stop_loss_multiplier: self.stop_loss_multiplier,
            take_profit_multiplier: self.take_profit_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn context() -> MarketContext {
        MarketContext {
            volatility: 0.02,
            rsi: Some(40.0),
            macd_bias: Some(1.0),
            regime: Some("uptrend".to_string()),
            timestamp: Utc::now(),
        }
    }

    async fn pattern_memory() -> PatternMemory {
        let dir = std::env::temp_dir().join(format!("spotcore-ai-test-{}", uuid::Uuid::new_v4()));
        PatternMemory::load(&dir, crate::pattern_memory::Partition::Backtest).await.unwrap()
    }

    #[tokio::test]
    async fn veto_forces_hold_on_high_risk_score() {
        let mut module = AiDecisionModule::new(DecisionConfig::default(), std::sync::Arc::new(RuleBasedReasoner));
        let pm = pattern_memory().await;
        let features = crate::domain::FeatureVector::new(vec![0.1; 9]).unwrap();
        let mut ctx = context();
        ctx.volatility = 0.08; // high volatility factor
        ctx.regime = Some("uncertain".to_string());
        ctx.timestamp = ctx.timestamp.with_hour(3).unwrap();

        let decision = module
            .decide(Direction::Buy, 80.0, "k", &pm, &features, ctx)
            .await;
        assert!(decision.vetoed);
        assert_eq!(decision.recommendation, Recommendation::Hold);
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn passive_mode_does_not_add_ai_confidence() {
        let mut module = AiDecisionModule::new(
            DecisionConfig {
                mode: AiMode::Passive,
                ..DecisionConfig::default()
            },
            std::sync::Arc::new(RuleBasedReasoner),
        );
        let pm = pattern_memory().await;
        let features = crate::domain::FeatureVector::new(vec![0.1; 9]).unwrap();
        let decision = module
            .decide(Direction::Buy, 50.0, "k", &pm, &features, context())
            .await;
        assert_eq!(decision.confidence, 0.5);
    }

    #[test]
    fn learned_failure_short_circuits_to_zero() {
        let mut module = AiDecisionModule::new(DecisionConfig::default(), std::sync::Arc::new(RuleBasedReasoner));
        for _ in 0..5 {
            module.update_outcome("bad-pattern", false, Utc::now());
        }
        let stat = module.outcome_stats.get("bad-pattern").unwrap();
        assert_eq!(stat.successes, 0);
        assert_eq!(stat.failures, 5);
    }
}
