//! Risk management: sizing, candidate ordering, risk accounting and the decision engine.

mod config;
mod engine;
mod ordering;
mod position_sizer;
mod risk;

pub use config::RiskConfig;
pub use engine::{evaluate, DecisionEngine, Evaluation};
pub use ordering::{
    ordering_from_name, AlphabeticalOrdering, CandidateOrdering, KeyOrdering,
    LowVolatilityOrdering,
};
pub use position_sizer::{PositionPlan, PositionSizer};
pub use risk::{PositionRisk, RiskReport};
