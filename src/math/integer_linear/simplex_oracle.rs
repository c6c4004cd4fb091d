use std::time::Duration;

use log::{debug, trace};

use crate::error::Result;
use crate::math::integer_linear::branch_and_bound::{
    BranchAndBoundConfig, BranchAndBoundTree, BranchingRule, MipRelaxation, NodeSelection,
};
use crate::math::integer_linear::context::RunContext;
use crate::math::integer_linear::model::{ConstraintId, ConstraintSense, Model, ObjectiveSense};
use crate::math::integer_linear::oracle::{
    IntegerCandidateHandler, LinearProgramOracle, SolveResult, SolveStatus,
};
use crate::math::optimization::simplex::{minimize, LinearProgram, LpStatus, Row, RowSense};
use crate::math::optimization::SimplexConfig;

/// Configuration options for [`SimplexOracle`].
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub simplex: SimplexConfig,
    /// Node limit of the integer search
    pub node_limit: Option<usize>,
    pub time_limit: Option<Duration>,
    pub node_selection: NodeSelection,
    pub branching: BranchingRule,
    pub integrality_tolerance: f64,
    /// Relative gap at which the integer search stops
    pub relative_gap: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            simplex: SimplexConfig::default(),
            node_limit: None,
            time_limit: None,
            node_selection: NodeSelection::BestBound,
            branching: BranchingRule::FirstFractional,
            integrality_tolerance: 1e-6,
            relative_gap: 1e-9,
        }
    }
}

/// Reference backend: LPs through the bounded simplex, MIPs through
/// [`BranchAndBoundTree`] over [`MipRelaxation`].
#[derive(Debug, Clone, Default)]
pub struct SimplexOracle {
    config: OracleConfig,
    lp_solves: usize,
}

impl SimplexOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            config,
            lp_solves: 0,
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Number of LP relaxations solved over the oracle's lifetime.
    pub fn lp_solves(&self) -> usize {
        self.lp_solves
    }

    fn solve_lp(&mut self, model: &Model) -> Result<SolveResult> {
        let (lp, ids) = to_linear_program(model);
        let solution = minimize(&lp, &self.config.simplex);
        self.lp_solves += 1;
        trace!(
            "lp `{}`: {:?} after {} pivots",
            model.name(),
            solution.status,
            solution.iterations
        );

        let requested = model.params().request_certificates;
        let slots = model.constraint_slots();
        let scatter = |values: &[f64], sign: f64| {
            let mut out = vec![0.0; slots];
            for (id, v) in ids.iter().zip(values) {
                out[id.index()] = sign * v;
            }
            out
        };
        let base = SolveResult::new(SolveStatus::Optimal).certificates_requested(requested);
        let result = match solution.status {
            LpStatus::Optimal => {
                let objective = model.objective_value(&solution.x);
                let sign = match model.sense() {
                    ObjectiveSense::Minimize => 1.0,
                    ObjectiveSense::Maximize => -1.0,
                };
                let mut result = base.with_primal(objective, solution.x);
                if let Some(duals) = solution.duals {
                    result = result.with_duals(scatter(&duals, sign));
                }
                result
            }
            LpStatus::Infeasible => {
                let mut result = SolveResult::new(SolveStatus::Infeasible)
                    .certificates_requested(requested);
                if let (true, Some(farkas)) = (requested, solution.farkas) {
                    result = result.with_farkas(scatter(&farkas, 1.0));
                }
                result
            }
            LpStatus::Unbounded => {
                let mut result = SolveResult::new(SolveStatus::Unbounded)
                    .certificates_requested(requested);
                if let (true, Some(ray)) = (requested, solution.ray) {
                    result = result.with_ray(ray);
                }
                result
            }
            LpStatus::IterationLimit => SolveResult::new(SolveStatus::IterationLimit),
            LpStatus::Numerical => SolveResult::new(SolveStatus::Numerical),
        };
        Ok(result.with_counts(solution.iterations, 0))
    }

    fn solve_mip(
        &mut self,
        model: &Model,
        handler: Option<&mut dyn IntegerCandidateHandler>,
    ) -> Result<SolveResult> {
        let tree = BranchAndBoundTree::new(BranchAndBoundConfig {
            node_selection: self.config.node_selection,
            node_limit: self.config.node_limit,
            time_limit: self.config.time_limit,
            absolute_gap: 1e-9,
            relative_gap: self.config.relative_gap,
        });
        let branching = self.config.branching;
        let tolerance = self.config.integrality_tolerance;

        let mut ctx = RunContext::new();
        let mut relaxation = MipRelaxation::new(model, self)
            .with_branching(branching)
            .with_integrality_tolerance(tolerance);
        if let Some(handler) = handler {
            relaxation = relaxation.with_handler(handler);
        }
        let report = tree.search(&mut relaxation, &mut ctx)?;
        let iterations = relaxation.lp_iterations();
        debug!(
            "mip `{}`: {:?} in {} nodes",
            model.name(),
            report.status,
            report.stats.processed
        );

        let mut result = SolveResult::new(report.status)
            .integer_search()
            .with_counts(iterations, report.stats.processed);
        if report.best_bound.is_finite() {
            result = result.with_best_bound(report.best_bound);
        }
        if let (Some(objective), Some(values)) = (report.objective, report.incumbent) {
            result = result.with_primal(objective, values);
        }
        Ok(result)
    }
}

impl LinearProgramOracle for SimplexOracle {
    fn solve(&mut self, model: &Model) -> Result<SolveResult> {
        if model.has_integer_vars() {
            self.solve_mip(model, None)
        } else {
            self.solve_lp(model)
        }
    }

    fn solve_relaxation(&mut self, model: &Model) -> Result<SolveResult> {
        self.solve_lp(model)
    }

    fn solve_with_candidates(
        &mut self,
        model: &Model,
        handler: &mut dyn IntegerCandidateHandler,
    ) -> Result<SolveResult> {
        self.solve_mip(model, Some(handler))
    }
}

/// Minimization-form LP of `model` with integrality dropped, plus the constraint id
/// behind each row.
fn to_linear_program(model: &Model) -> (LinearProgram, Vec<ConstraintId>) {
    let sign = match model.sense() {
        ObjectiveSense::Minimize => 1.0,
        ObjectiveSense::Maximize => -1.0,
    };
    let vars = model.vars();
    let mut ids = Vec::with_capacity(model.num_constraints());
    let rows = model
        .constraints()
        .map(|(id, c)| {
            ids.push(id);
            Row {
                coefficients: c
                    .expr
                    .terms()
                    .iter()
                    .map(|&(var, a)| (var.index(), a))
                    .collect(),
                sense: match c.sense {
                    ConstraintSense::LessEqual => RowSense::LessEqual,
                    ConstraintSense::GreaterEqual => RowSense::GreaterEqual,
                    ConstraintSense::Equal => RowSense::Equal,
                },
                rhs: c.rhs,
            }
        })
        .collect();
    let lp = LinearProgram {
        objective: vars.iter().map(|v| sign * v.objective).collect(),
        rows,
        lower: vars.iter().map(|v| v.lower).collect(),
        upper: vars.iter().map(|v| v.upper).collect(),
    };
    (lp, ids)
}
