//! AI Decision Module (spec §4.5): a second-opinion veto layer sitting
//! between the Signal Generator and the Risk Manager.

pub mod decision;

pub use decision::{
    AiDecisionModule, AiMode, Decision, DecisionConfig, MarketContext, ReasoningCollaborator,
    Recommendation, RiskAssessment, RuleBasedReasoner,
};
