pub mod integer_linear;
pub mod optimization;

pub use optimization::simplex::{LinearProgram, LpStatus, Row, RowSense, SimplexSolution};
pub use optimization::SimplexConfig;

pub use integer_linear::{
    BendersCoordinator, BendersConfig, BendersMode, BendersProblem, BranchAndBoundConfig,
    BranchAndBoundTree, BranchAndPrice, BranchAndPriceConfig, ColumnGenerationConfig,
    ColumnGenerationEngine, CutPool, CuttingStockInstance, DantzigWolfeDecomposition,
    DantzigWolfeProblem, DivingConfig, DivingRoundingHeuristic, KnapsackPricer, LinExpr,
    LinearProgramOracle, MipRelaxation, Model, NodeSelection, ObjectiveSense, OracleConfig,
    PatternMatrix, SimplexOracle, SolveResult, SolveStatus, VarType,
};
