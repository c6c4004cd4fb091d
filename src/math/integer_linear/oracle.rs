//! Backend contract consumed by the decomposition loops.
//!
//! A backend solves a [`Model`] and reports a [`SolveResult`]. Infeasibility,
//! unboundedness and limits are statuses; errors are reserved for malformed input
//! and broken callbacks. Model mutation lives on [`Model`] itself and a deep copy is
//! `Model::clone`, so the trait only carries the three solve entry points.

use crate::error::{Error, Result};
use crate::math::integer_linear::model::{
    Constraint, ConstraintId, ConstraintSense, LinExpr, Model, VarId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    InfeasibleOrUnbounded,
    Numerical,
    IterationLimit,
    NodeLimit,
    TimeLimit,
    /// The search was stopped on request of an integer-candidate handler.
    Interrupted,
}

impl SolveStatus {
    /// Statuses that stop a solve early without proving anything.
    pub fn is_limit(self) -> bool {
        matches!(
            self,
            SolveStatus::IterationLimit
                | SolveStatus::NodeLimit
                | SolveStatus::TimeLimit
                | SolveStatus::Interrupted
        )
    }
}

/// Snapshot of one backend invocation.
///
/// Per-constraint vectors are indexed by [`ConstraintId::index`]; entries of removed
/// constraints are zero.
#[derive(Debug, Clone)]
pub struct SolveResult {
    status: SolveStatus,
    objective: Option<f64>,
    values: Vec<f64>,
    best_bound: Option<f64>,
    iterations: usize,
    nodes: usize,
    integer: bool,
    certificates_requested: bool,
    duals: Option<Vec<f64>>,
    farkas: Option<Vec<f64>>,
    ray: Option<Vec<f64>>,
}

impl SolveResult {
    pub fn new(status: SolveStatus) -> Self {
        Self {
            status,
            objective: None,
            values: Vec::new(),
            best_bound: None,
            iterations: 0,
            nodes: 0,
            integer: false,
            certificates_requested: false,
            duals: None,
            farkas: None,
            ray: None,
        }
    }

    pub fn with_primal(mut self, objective: f64, values: Vec<f64>) -> Self {
        self.objective = Some(objective);
        self.values = values;
        self
    }

    pub fn with_best_bound(mut self, bound: f64) -> Self {
        self.best_bound = Some(bound);
        self
    }

    pub fn with_counts(mut self, iterations: usize, nodes: usize) -> Self {
        self.iterations = iterations;
        self.nodes = nodes;
        self
    }

    /// Marks the result as coming from an integer search; such results never carry duals.
    pub fn integer_search(mut self) -> Self {
        self.integer = true;
        self
    }

    pub fn certificates_requested(mut self, requested: bool) -> Self {
        self.certificates_requested = requested;
        self
    }

    pub fn with_duals(mut self, duals: Vec<f64>) -> Self {
        self.duals = Some(duals);
        self
    }

    pub fn with_farkas(mut self, farkas: Vec<f64>) -> Self {
        self.farkas = Some(farkas);
        self
    }

    pub fn with_ray(mut self, ray: Vec<f64>) -> Self {
        self.ray = Some(ray);
        self
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    pub fn is_optimal(&self) -> bool {
        self.status == SolveStatus::Optimal
    }

    /// Objective of the returned point; present when optimal or when an incumbent exists.
    pub fn objective(&self) -> Option<f64> {
        self.objective
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn value(&self, var: VarId) -> Option<f64> {
        self.values.get(var.0).copied()
    }

    pub fn best_bound(&self) -> Option<f64> {
        self.best_bound
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Dual value of `id` at an optimal LP basis.
    pub fn dual(&self, id: ConstraintId) -> Result<f64> {
        let duals = self.duals.as_ref().ok_or_else(|| self.missing("dual value"))?;
        duals
            .get(id.0)
            .copied()
            .ok_or(Error::UnknownConstraint(id.0))
    }

    /// Farkas multiplier of `id` for an infeasible LP.
    pub fn farkas_dual(&self, id: ConstraintId) -> Result<f64> {
        let farkas = self
            .farkas
            .as_ref()
            .ok_or_else(|| self.missing("Farkas certificate"))?;
        farkas
            .get(id.0)
            .copied()
            .ok_or(Error::UnknownConstraint(id.0))
    }

    /// Component of the unbounded ray along `var`.
    pub fn unbounded_ray(&self, var: VarId) -> Result<f64> {
        let ray = self.ray.as_ref().ok_or_else(|| self.missing("unbounded ray"))?;
        ray.get(var.0).copied().ok_or(Error::UnknownVariable(var.0))
    }

    fn missing(&self, what: &'static str) -> Error {
        let reason = match (what, self.status) {
            _ if self.integer => "the result comes from an integer search",
            ("dual value", _) => "the solve did not end at an optimal basis",
            ("Farkas certificate", SolveStatus::Infeasible)
            | ("unbounded ray", SolveStatus::Unbounded)
                if !self.certificates_requested =>
            {
                "certificates were not requested before solving"
            }
            ("Farkas certificate", _) => "the model was not proven infeasible",
            _ => "the model was not proven unbounded",
        };
        Error::MissingCertificate { what, reason }
    }
}

/// Integer-feasible point offered to an [`IntegerCandidateHandler`] during a search.
///
/// The handler sees the point and the current bounds and may respond with lazy
/// constraints or a termination request. It never sees the model under search.
#[derive(Debug)]
pub struct Candidate<'a> {
    values: &'a [f64],
    objective: f64,
    best_bound: Option<f64>,
    lazy: Vec<Constraint>,
    terminate: bool,
}

impl<'a> Candidate<'a> {
    pub fn new(values: &'a [f64], objective: f64, best_bound: Option<f64>) -> Self {
        Self {
            values,
            objective,
            best_bound,
            lazy: Vec::new(),
            terminate: false,
        }
    }

    pub fn values(&self) -> &[f64] {
        self.values
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.0]
    }

    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn best_bound(&self) -> Option<f64> {
        self.best_bound
    }

    /// Registers a constraint that stays in force for the rest of the search.
    pub fn add_lazy_constraint(
        &mut self,
        name: impl Into<String>,
        expr: LinExpr,
        sense: ConstraintSense,
        rhs: f64,
    ) {
        self.lazy.push(Constraint {
            name: name.into(),
            expr,
            sense,
            rhs,
        });
    }

    pub fn terminate(&mut self) {
        self.terminate = true;
    }

    pub fn termination_requested(&self) -> bool {
        self.terminate
    }

    pub fn take_lazy_constraints(&mut self) -> Vec<Constraint> {
        std::mem::take(&mut self.lazy)
    }
}

/// Synchronous callback invoked by the search at every integer-feasible candidate.
pub trait IntegerCandidateHandler {
    fn on_candidate(&mut self, candidate: &mut Candidate<'_>) -> Result<()>;
}

/// LP/MIP solving backend.
pub trait LinearProgramOracle {
    /// Solves the model, as a MIP when it has integer variables.
    fn solve(&mut self, model: &Model) -> Result<SolveResult>;

    /// Solves the LP relaxation, ignoring integrality.
    fn solve_relaxation(&mut self, model: &Model) -> Result<SolveResult>;

    /// Runs a MIP search that hands every integer-feasible candidate to `handler`
    /// before accepting it.
    fn solve_with_candidates(
        &mut self,
        model: &Model,
        handler: &mut dyn IntegerCandidateHandler,
    ) -> Result<SolveResult>;
}

impl<O: LinearProgramOracle + ?Sized> LinearProgramOracle for &mut O {
    fn solve(&mut self, model: &Model) -> Result<SolveResult> {
        (**self).solve(model)
    }

    fn solve_relaxation(&mut self, model: &Model) -> Result<SolveResult> {
        (**self).solve_relaxation(model)
    }

    fn solve_with_candidates(
        &mut self,
        model: &Model,
        handler: &mut dyn IntegerCandidateHandler,
    ) -> Result<SolveResult> {
        (**self).solve_with_candidates(model, handler)
    }
}
