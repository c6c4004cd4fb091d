//! Decomposition algorithms for integer linear programs over a pluggable
//! LP/MIP backend.
//!
//! [`LinearProgramOracle`] is the backend contract; [`SimplexOracle`] is the
//! bundled reference backend. On top of it sit Benders decomposition
//! ([`BendersCoordinator`]), cutting-stock column generation
//! ([`ColumnGenerationEngine`]), block-angular [`DantzigWolfeDecomposition`],
//! a generic [`BranchAndBoundTree`], the [`DivingRoundingHeuristic`] and
//! [`BranchAndPrice`].

pub mod benders;
pub mod branch_and_bound;
pub mod branch_and_price;
pub mod column_generation;
pub mod context;
pub mod cut_pool;
pub mod dantzig_wolfe;
pub mod diving;
pub mod model;
pub mod oracle;
pub mod pricing;
pub mod report;
pub mod simplex_oracle;

pub use benders::{
    BendersConfig, BendersCoordinator, BendersIteration, BendersMode, BendersProblem,
    BendersReport, Subproblem,
};
pub use branch_and_bound::{
    is_integer, relative_gap_percent, BoundSample, BranchAndBoundConfig, BranchAndBoundTree,
    BranchDecision, BranchingRule, MipNode, MipRelaxation, NodeEvaluation, NodeSelection,
    NodeStats, PruneReason, PruneRecord, Relaxation, SearchReport, SearchView,
};
pub use branch_and_price::{
    BranchAndPrice, BranchAndPriceConfig, BranchAndPriceReport, PackingSolution, PriceNode,
};
pub use column_generation::{
    ColumnGenerationConfig, ColumnGenerationEngine, ColumnGenerationOutcome,
    CuttingStockInstance, PatternBound, PatternMatrix,
};
pub use context::{RunContext, RunStats};
pub use cut_pool::{
    dual_optimality_cut, feasibility_cut, optimality_cut, ray_feasibility_cut, Cut, CutKind,
    CutPool, LinkingCost, LinkingRow,
};
pub use dantzig_wolfe::{
    CouplingRow, DantzigWolfeConfig, DantzigWolfeDecomposition, DantzigWolfeOutcome,
    DantzigWolfeProblem,
};
pub use diving::{
    simple_rounding, DivingConfig, DivingRoundingHeuristic, RoundedSolution, RoundingStrategy,
};
pub use model::{
    Constraint, ConstraintId, ConstraintSense, LinExpr, Model, ObjectiveSense, SolveParams,
    VarId, VarType, Variable,
};
pub use oracle::{
    Candidate, IntegerCandidateHandler, LinearProgramOracle, SolveResult, SolveStatus,
};
pub use pricing::{KnapsackPricer, OraclePricer, PricedPattern, PricingOracle};
pub use report::{BoundAssessment, BoundTrust};
pub use simplex_oracle::{OracleConfig, SimplexOracle};

#[cfg(test)]
mod tests;
