pub mod activation;
pub mod behavior;
pub mod context;
pub mod delay;
pub mod engine;
pub mod ruler;
pub mod schemer;
pub mod snapshot;

use thiserror::Error;
use uuid::Uuid;

use crate::graph::GraphError;

/// Runtime contract violations. Domain-rule failures are NOT errors; they
/// travel through [`RuleResult`](ruler::RuleResult) and scheme results.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("unknown scheme instance {0}")]
    UnknownScheme(Uuid),

    #[error("unknown activation {0}")]
    UnknownActivation(u64),

    #[error("activation {activation} is not suspended on {expected}")]
    InvalidCompletion {
        activation: u64,
        expected: &'static str,
    },

    #[error("node kind '{kind}' cannot run inside a rule graph")]
    UnsupportedInRule { kind: String },

    #[error("rule graph '{group}' exceeded the step budget (authored cycle?)")]
    RuleBudgetExceeded { group: String },
}
