use log::{debug, info};

use crate::error::{Error, Result};
use crate::math::integer_linear::context::{RunContext, RunStats};
use crate::math::integer_linear::cut_pool::{
    dual_optimality_cut, feasibility_cut, optimality_cut, ray_feasibility_cut, Cut, CutKind,
    CutPool, LinkingCost, LinkingRow,
};
use crate::math::integer_linear::model::{Model, ObjectiveSense, VarId};
use crate::math::integer_linear::oracle::{
    Candidate, IntegerCandidateHandler, LinearProgramOracle, SolveStatus,
};
use crate::math::integer_linear::report::BoundAssessment;

/// Second stage of a [`BendersProblem`].
#[derive(Debug, Clone)]
pub enum Subproblem {
    /// Minimizing LP whose linking rows have right-hand sides affine in `y`. Cuts come
    /// from its duals and Farkas certificates.
    Primal {
        model: Model,
        linking: Vec<LinkingRow>,
    },
    /// Maximizing LP over the dual multipliers, with objective coefficients affine in
    /// `y`. Cuts come from its optimal points and unbounded rays.
    Dual {
        model: Model,
        costs: Vec<LinkingCost>,
    },
}

impl Subproblem {
    pub fn model(&self) -> &Model {
        match self {
            Self::Primal { model, .. } | Self::Dual { model, .. } => model,
        }
    }
}

/// Two-stage problem split into a master over `y` (plus the surrogate `q`) and an LP
/// subproblem parameterized by `y`.
#[derive(Debug, Clone)]
pub struct BendersProblem {
    pub master: Model,
    /// Master variable bounding the subproblem cost from below.
    pub surrogate: VarId,
    pub subproblem: Subproblem,
}

impl BendersProblem {
    pub fn new(
        master: Model,
        surrogate: VarId,
        subproblem: Model,
        linking: Vec<LinkingRow>,
    ) -> Result<Self> {
        check_master(&master, surrogate)?;
        if subproblem.sense() != ObjectiveSense::Minimize {
            return Err(Error::InvalidModel("the Benders subproblem must minimize".into()));
        }
        check_linear(&subproblem)?;
        for link in &linking {
            subproblem.constraint(link.constraint)?;
            check_affine(&master, "linking row base", link.base, &link.terms)?;
        }
        Ok(Self {
            master,
            surrogate,
            subproblem: Subproblem::Primal {
                model: subproblem,
                linking,
            },
        })
    }

    /// Benders problem whose second stage is given in dual form: the value of `dual`
    /// at `y` is the subproblem cost, and an unbounded `dual` marks `y` infeasible.
    pub fn with_dual_subproblem(
        master: Model,
        surrogate: VarId,
        dual: Model,
        costs: Vec<LinkingCost>,
    ) -> Result<Self> {
        check_master(&master, surrogate)?;
        if dual.sense() != ObjectiveSense::Maximize {
            return Err(Error::InvalidModel(
                "a dual Benders subproblem must maximize".into(),
            ));
        }
        check_linear(&dual)?;
        for cost in &costs {
            dual.var(cost.var)?;
            check_affine(&master, "linking cost base", cost.base, &cost.terms)?;
        }
        Ok(Self {
            master,
            surrogate,
            subproblem: Subproblem::Dual { model: dual, costs },
        })
    }

    /// Objective coefficient of the surrogate in the master.
    pub fn surrogate_cost(&self) -> Result<f64> {
        Ok(self.master.var(self.surrogate)?.objective)
    }

    /// Subproblem with every `y`-dependent coefficient evaluated at `master_values`.
    pub fn subproblem_at(&self, master_values: &[f64]) -> Result<Model> {
        let mut model = self.subproblem.model().clone();
        match &self.subproblem {
            Subproblem::Primal { linking, .. } => {
                for link in linking {
                    model.set_rhs(link.constraint, link.rhs_at(master_values))?;
                }
            }
            Subproblem::Dual { costs, .. } => {
                for cost in costs {
                    model.set_objective_coefficient(cost.var, cost.cost_at(master_values))?;
                }
            }
        }
        model.set_request_certificates(true);
        Ok(model)
    }
}

fn check_master(master: &Model, surrogate: VarId) -> Result<()> {
    if master.sense() != ObjectiveSense::Minimize {
        return Err(Error::InvalidModel("the Benders master must minimize".into()));
    }
    let q = master.var(surrogate)?;
    if !q.lower.is_finite() {
        return Err(Error::InvalidModel(
            "the surrogate variable needs a finite lower bound".into(),
        ));
    }
    if q.objective <= 0.0 {
        return Err(Error::InvalidModel(
            "the surrogate variable needs a positive objective coefficient".into(),
        ));
    }
    Ok(())
}

fn check_linear(subproblem: &Model) -> Result<()> {
    if subproblem.has_integer_vars() {
        return Err(Error::InvalidModel(
            "the Benders subproblem must be a linear program".into(),
        ));
    }
    Ok(())
}

fn check_affine(master: &Model, context: &'static str, base: f64, terms: &[(VarId, f64)]) -> Result<()> {
    if !base.is_finite() {
        return Err(Error::non_finite(context, base));
    }
    for &(var, t) in terms {
        master.var(var)?;
        if !t.is_finite() {
            return Err(Error::non_finite("linking coefficient", t));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BendersMode {
    /// Alternate master and subproblem solves, appending cuts to the master.
    Eager,
    /// One master search; cuts are injected as lazy constraints at integer candidates.
    Lazy,
}

#[derive(Debug, Clone)]
pub struct BendersConfig {
    pub mode: BendersMode,
    pub max_iterations: usize,
    /// Converged once `UB − LB` falls to this value.
    pub convergence_tolerance: f64,
    /// Minimum violation for a cut to be added.
    pub cut_tolerance: f64,
}

impl Default for BendersConfig {
    fn default() -> Self {
        Self {
            mode: BendersMode::Eager,
            max_iterations: 100,
            convergence_tolerance: 1e-6,
            cut_tolerance: 1e-6,
        }
    }
}

/// Bounds after one master/subproblem round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BendersIteration {
    pub iteration: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone)]
pub struct BendersReport {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub master_values: Vec<f64>,
    pub subproblem_values: Vec<f64>,
    pub iterations: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub trace: Vec<BendersIteration>,
    pub feasibility_cuts: usize,
    pub optimality_cuts: usize,
    pub stats: RunStats,
    pub assessment: BoundAssessment,
}

enum SubproblemOutcome {
    Optimal {
        value: f64,
        values: Vec<f64>,
        cut: Cut,
    },
    Infeasible {
        cut: Cut,
    },
}

fn evaluate_candidate<S: LinearProgramOracle + ?Sized>(
    problem: &BendersProblem,
    oracle: &mut S,
    master_values: &[f64],
    ctx: &mut RunContext,
) -> Result<SubproblemOutcome> {
    let model = problem.subproblem_at(master_values)?;
    let result = oracle.solve_relaxation(&model)?;
    ctx.subproblem_solves += 1;
    let optimal = |cut: Cut| -> Result<SubproblemOutcome> {
        let value = result
            .objective()
            .ok_or(Error::CutDerivation(SolveStatus::Optimal))?;
        Ok(SubproblemOutcome::Optimal {
            value,
            values: result.values().to_vec(),
            cut,
        })
    };
    match (&problem.subproblem, result.status()) {
        (Subproblem::Primal { linking, .. }, SolveStatus::Optimal) => {
            optimal(optimality_cut(&model, linking, problem.surrogate, &result)?)
        }
        (Subproblem::Primal { linking, .. }, SolveStatus::Infeasible) => {
            Ok(SubproblemOutcome::Infeasible {
                cut: feasibility_cut(&model, linking, &result)?,
            })
        }
        (Subproblem::Primal { .. }, SolveStatus::Unbounded) => {
            Err(Error::Unbounded("the Benders subproblem"))
        }
        (Subproblem::Dual { costs, .. }, SolveStatus::Optimal) => {
            optimal(dual_optimality_cut(&model, costs, problem.surrogate, &result)?)
        }
        // An unbounded dual certifies an infeasible primal subproblem at this candidate.
        (Subproblem::Dual { costs, .. }, SolveStatus::Unbounded) => {
            Ok(SubproblemOutcome::Infeasible {
                cut: ray_feasibility_cut(&model, costs, &result)?,
            })
        }
        (_, status) => Err(Error::CutDerivation(status)),
    }
}

/// Control loop of Benders decomposition over a master oracle and a subproblem oracle.
///
/// LB is the master objective and never decreases; UB is the best total cost of a
/// subproblem-feasible master candidate and never increases.
pub struct BendersCoordinator<M, S> {
    master_oracle: M,
    subproblem_oracle: S,
    config: BendersConfig,
}

struct Progress {
    lower: f64,
    upper: f64,
    best: Option<(Vec<f64>, Vec<f64>)>,
    trace: Vec<BendersIteration>,
}

impl Progress {
    fn new() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            best: None,
            trace: Vec::new(),
        }
    }

    fn raise_lower(&mut self, bound: f64) {
        self.lower = self.lower.max(bound);
    }

    fn offer_upper(&mut self, total: f64, master_values: &[f64], sub_values: Vec<f64>) {
        if total < self.upper {
            self.upper = total;
            self.best = Some((master_values.to_vec(), sub_values));
        }
    }

    fn record(&mut self, iteration: usize) {
        self.trace.push(BendersIteration {
            iteration,
            lower_bound: self.lower,
            upper_bound: self.upper,
        });
    }
}

impl<M: LinearProgramOracle, S: LinearProgramOracle> BendersCoordinator<M, S> {
    pub fn new(master_oracle: M, subproblem_oracle: S, config: BendersConfig) -> Self {
        Self {
            master_oracle,
            subproblem_oracle,
            config,
        }
    }

    pub fn run(&mut self, problem: &BendersProblem, ctx: &mut RunContext) -> Result<BendersReport> {
        match self.config.mode {
            BendersMode::Eager => self.run_eager(problem, ctx),
            BendersMode::Lazy => self.run_lazy(problem, ctx),
        }
    }

    fn run_eager(&mut self, problem: &BendersProblem, ctx: &mut RunContext) -> Result<BendersReport> {
        info!(
            "eager Benders on `{}` / `{}`",
            problem.master.name(),
            problem.subproblem.model().name()
        );
        let mut master = problem.master.clone();
        let mut pool = CutPool::new(self.config.cut_tolerance);
        let mut progress = Progress::new();
        let mut status = SolveStatus::IterationLimit;
        let mut iterations = 0;

        for iteration in 1..=self.config.max_iterations {
            iterations = iteration;
            let master_result = self.master_oracle.solve(&master)?;
            ctx.master_solves += 1;
            match master_result.status() {
                SolveStatus::Optimal => {}
                SolveStatus::Unbounded => return Err(Error::Unbounded("the Benders master problem")),
                other => {
                    status = other;
                    break;
                }
            }
            let candidate = master_result.values().to_vec();
            let master_objective = master_result
                .objective()
                .ok_or(Error::RelaxationFailed(SolveStatus::Optimal))?;
            let estimate = candidate[problem.surrogate.index()];
            progress.raise_lower(master_objective);
            let surrogate_cost = problem.surrogate_cost()?;

            let mut converged = false;
            match evaluate_candidate(problem, &mut self.subproblem_oracle, &candidate, ctx)? {
                SubproblemOutcome::Optimal { value, values, cut } => {
                    let total = master_objective + surrogate_cost * (value - estimate);
                    progress.offer_upper(total, &candidate, values);
                    progress.record(iteration);
                    if progress.upper - progress.lower <= self.config.convergence_tolerance {
                        converged = true;
                    } else if value > estimate + self.config.cut_tolerance
                        && pool.admit(cut, &candidate, iteration)?
                    {
                        ctx.optimality_cuts += 1;
                    } else {
                        // The subproblem confirms the surrogate estimate.
                        converged = true;
                    }
                }
                SubproblemOutcome::Infeasible { cut } => {
                    progress.record(iteration);
                    if !pool.admit(cut, &candidate, iteration)? {
                        return Err(Error::CutDerivation(SolveStatus::Infeasible));
                    }
                    ctx.feasibility_cuts += 1;
                }
            }
            debug!(
                "iteration {iteration}: LB {} UB {} ({} cuts)",
                progress.lower,
                progress.upper,
                pool.len()
            );
            if converged {
                status = SolveStatus::Optimal;
                break;
            }
            pool.apply_to(&mut master)?;
        }

        Ok(self.finish(status, iterations, progress, &pool, ctx))
    }

    fn run_lazy(&mut self, problem: &BendersProblem, ctx: &mut RunContext) -> Result<BendersReport> {
        info!(
            "lazy Benders on `{}` / `{}`",
            problem.master.name(),
            problem.subproblem.model().name()
        );
        let master = problem.master.clone();
        let mut handler = LazyCutHandler {
            problem,
            oracle: &mut self.subproblem_oracle,
            pool: CutPool::new(self.config.cut_tolerance),
            ctx: &mut *ctx,
            progress: Progress::new(),
            candidates: 0,
        };
        let result = self.master_oracle.solve_with_candidates(&master, &mut handler)?;
        let LazyCutHandler {
            pool,
            mut progress,
            candidates,
            ..
        } = handler;
        ctx.master_solves += 1;

        let status = match result.status() {
            SolveStatus::Unbounded => return Err(Error::Unbounded("the Benders master problem")),
            other => other,
        };
        if let Some(bound) = result.best_bound() {
            progress.raise_lower(bound);
        }
        if let (Some(objective), SolveStatus::Optimal) = (result.objective(), status) {
            progress.raise_lower(objective.min(progress.upper));
            let values = result.values().to_vec();
            if let SubproblemOutcome::Optimal { value, values: sub, .. } =
                evaluate_candidate(problem, &mut self.subproblem_oracle, &values, ctx)?
            {
                let estimate = values[problem.surrogate.index()];
                let total = objective + problem.surrogate_cost()? * (value - estimate);
                progress.upper = progress.upper.min(total);
                progress.best = Some((values, sub));
            }
        }
        // The closing master pass counts as one iteration after the candidate rounds.
        let iterations = candidates + 1;
        progress.record(iterations);
        Ok(self.finish(status, iterations, progress, &pool, ctx))
    }

    fn finish(
        &self,
        status: SolveStatus,
        iterations: usize,
        progress: Progress,
        pool: &CutPool,
        ctx: &RunContext,
    ) -> BendersReport {
        let Progress {
            lower,
            upper,
            best,
            trace,
        } = progress;
        let (master_values, subproblem_values) = best.unwrap_or_default();
        let has_incumbent = !master_values.is_empty();
        let objective = match status {
            SolveStatus::Optimal => Some(upper),
            _ if has_incumbent => Some(upper),
            _ => None,
        };
        let assessment = BoundAssessment::assess(status, has_incumbent, lower.is_finite());
        assessment.log("Benders", objective, lower.is_finite().then_some(lower));
        BendersReport {
            status,
            objective,
            master_values,
            subproblem_values,
            iterations,
            lower_bound: lower,
            upper_bound: upper,
            trace,
            feasibility_cuts: pool.count(CutKind::Feasibility),
            optimality_cuts: pool.count(CutKind::Optimality),
            stats: ctx.stats(),
            assessment,
        }
    }
}

/// Solves the subproblem at every integer master candidate and rejects the candidate
/// with a lazy cut when it is infeasible or underestimates the subproblem cost.
struct LazyCutHandler<'a, S> {
    problem: &'a BendersProblem,
    oracle: &'a mut S,
    pool: CutPool,
    ctx: &'a mut RunContext,
    progress: Progress,
    candidates: usize,
}

impl<S: LinearProgramOracle> IntegerCandidateHandler for LazyCutHandler<'_, S> {
    fn on_candidate(&mut self, candidate: &mut Candidate<'_>) -> Result<()> {
        self.candidates += 1;
        let iteration = self.candidates;
        let values = candidate.values().to_vec();
        let estimate = values[self.problem.surrogate.index()];
        if let Some(bound) = candidate.best_bound() {
            self.progress.raise_lower(bound);
        }

        let cut = match evaluate_candidate(self.problem, &mut *self.oracle, &values, self.ctx)? {
            SubproblemOutcome::Optimal { value, values: sub, cut } => {
                let weight = self.problem.surrogate_cost()?;
                let total = candidate.objective() + weight * (value - estimate);
                self.progress.offer_upper(total, &values, sub);
                (value > estimate + self.pool.tolerance()).then_some(cut)
            }
            SubproblemOutcome::Infeasible { cut } => Some(cut),
        };
        self.progress.record(iteration);

        if let Some(cut) = cut {
            let kind = cut.kind;
            if self.pool.admit(cut, &values, iteration)? {
                if let Some(stored) = self.pool.last() {
                    candidate.add_lazy_constraint(
                        format!("lazy_benders_{}", self.pool.len()),
                        stored.expr.clone(),
                        stored.sense,
                        stored.rhs,
                    );
                }
                match kind {
                    CutKind::Feasibility => self.ctx.feasibility_cuts += 1,
                    CutKind::Optimality => self.ctx.optimality_cuts += 1,
                }
            } else if kind == CutKind::Feasibility {
                return Err(Error::CutDerivation(SolveStatus::Infeasible));
            }
        }
        Ok(())
    }
}
