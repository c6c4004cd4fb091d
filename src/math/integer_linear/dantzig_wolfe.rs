use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::math::integer_linear::column_generation::Pricing;
use crate::math::integer_linear::context::RunContext;
use crate::math::integer_linear::model::{
    ConstraintId, ConstraintSense, LinExpr, Model, ObjectiveSense, VarId, VarType,
};
use crate::math::integer_linear::oracle::{LinearProgramOracle, SolveResult, SolveStatus};

/// Points of the same block closer than this in every coordinate are one column.
const SAME_POINT: f64 = 1e-9;

/// Row linking several blocks: `Σ coefficient · x[block][var]  sense  rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingRow {
    pub name: String,
    pub terms: Vec<(usize, VarId, f64)>,
    pub sense: ConstraintSense,
    pub rhs: f64,
}

/// Block-angular minimization: independent block models tied together by coupling rows.
#[derive(Debug, Clone)]
pub struct DantzigWolfeProblem {
    pub blocks: Vec<Model>,
    pub coupling: Vec<CouplingRow>,
}

impl DantzigWolfeProblem {
    pub fn new(blocks: Vec<Model>, coupling: Vec<CouplingRow>) -> Result<Self> {
        if blocks.is_empty() {
            return Err(Error::InvalidModel("a Dantzig-Wolfe problem needs a block".into()));
        }
        if blocks.iter().any(|b| b.sense() != ObjectiveSense::Minimize) {
            return Err(Error::InvalidModel("every Dantzig-Wolfe block must minimize".into()));
        }
        for row in &coupling {
            if !row.rhs.is_finite() {
                let context = format!("right-hand side of `{}`", row.name);
                return Err(Error::non_finite(context, row.rhs));
            }
            for &(block, var, a) in &row.terms {
                let model = blocks.get(block).ok_or_else(|| {
                    Error::InvalidModel(format!("`{}` refers to missing block {block}", row.name))
                })?;
                model.var(var)?;
                if !a.is_finite() {
                    return Err(Error::non_finite(format!("coefficient in `{}`", row.name), a));
                }
            }
        }
        Ok(Self { blocks, coupling })
    }

    /// The same problem as one model, block variables laid out block after block.
    pub fn monolithic(&self) -> Result<Model> {
        let mut model = Model::new("monolithic", ObjectiveSense::Minimize);
        let mut offsets = Vec::with_capacity(self.blocks.len());
        for (k, block) in self.blocks.iter().enumerate() {
            offsets.push(model.num_vars());
            for var in block.vars() {
                model.add_var(
                    format!("b{k}_{}", var.name),
                    var.lower,
                    var.upper,
                    var.objective,
                    var.var_type,
                )?;
            }
            for (_, row) in block.constraints() {
                let expr = row
                    .expr
                    .terms()
                    .iter()
                    .map(|&(var, a)| (VarId(offsets[k] + var.index()), a))
                    .collect();
                model.add_constraint(format!("b{k}_{}", row.name), expr, row.sense, row.rhs)?;
            }
        }
        for row in &self.coupling {
            let expr = row
                .terms
                .iter()
                .map(|&(k, var, a)| (VarId(offsets[k] + var.index()), a))
                .collect();
            model.add_constraint(row.name.clone(), expr, row.sense, row.rhs)?;
        }
        Ok(model)
    }

    /// Left-hand side of every coupling row restricted to block `k` at `point`.
    fn coupling_activity(&self, k: usize, point: &[f64]) -> Vec<f64> {
        self.coupling
            .iter()
            .map(|row| {
                row.terms
                    .iter()
                    .filter(|&&(block, _, _)| block == k)
                    .map(|&(_, var, a)| a * point[var.index()])
                    .sum()
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DantzigWolfeConfig {
    pub max_rounds: usize,
    /// Minimum reduced cost (or Farkas value) for a block point to enter the master.
    pub tolerance: f64,
}

impl Default for DantzigWolfeConfig {
    fn default() -> Self {
        Self {
            max_rounds: 500,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DantzigWolfeOutcome {
    pub status: SolveStatus,
    /// Final restricted master objective.
    pub objective: Option<f64>,
    /// Best Lagrangian bound seen over the pricing rounds.
    pub lower_bound: Option<f64>,
    /// Recovered block solutions `Σ λ_p x_p`, one vector per block.
    pub block_values: Vec<Vec<f64>>,
    pub coupling_duals: Vec<f64>,
    pub rounds: usize,
    pub columns: usize,
}

impl DantzigWolfeOutcome {
    fn infeasible(rounds: usize, columns: usize) -> Self {
        Self {
            status: SolveStatus::Infeasible,
            objective: None,
            lower_bound: None,
            block_values: Vec::new(),
            coupling_duals: Vec::new(),
            rounds,
            columns,
        }
    }
}

struct Column {
    block: usize,
    point: Vec<f64>,
    var: VarId,
}

/// Restricted master over convex combinations of block points.
struct Master {
    model: Model,
    coupling_rows: Vec<ConstraintId>,
    convexity_rows: Vec<ConstraintId>,
    columns: Vec<Column>,
}

impl Master {
    fn build(problem: &DantzigWolfeProblem) -> Result<Self> {
        let mut model = Model::new("dantzig-wolfe master", ObjectiveSense::Minimize);
        model.set_request_certificates(true);
        let coupling_rows = problem
            .coupling
            .iter()
            .map(|row| model.add_constraint(row.name.clone(), LinExpr::new(), row.sense, row.rhs))
            .collect::<Result<Vec<_>>>()?;
        let convexity_rows = (0..problem.blocks.len())
            .map(|k| model.add_eq(format!("convexity_{k}"), LinExpr::new(), 1.0))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            model,
            coupling_rows,
            convexity_rows,
            columns: Vec::new(),
        })
    }

    fn contains(&self, block: usize, point: &[f64]) -> bool {
        self.columns.iter().any(|c| {
            c.block == block
                && c.point
                    .iter()
                    .zip(point)
                    .all(|(a, b)| (a - b).abs() <= SAME_POINT)
        })
    }

    fn add(&mut self, problem: &DantzigWolfeProblem, block: usize, point: Vec<f64>) -> Result<()> {
        let cost = problem.blocks[block].objective_value(&point);
        let mut entries: Vec<(ConstraintId, f64)> = self
            .coupling_rows
            .iter()
            .copied()
            .zip(problem.coupling_activity(block, &point))
            .filter(|&(_, a)| a != 0.0)
            .collect();
        entries.push((self.convexity_rows[block], 1.0));
        let var = self.model.add_column(
            format!("lambda_{}", self.columns.len()),
            0.0,
            f64::INFINITY,
            cost,
            VarType::Continuous,
            &entries,
        )?;
        self.columns.push(Column { block, point, var });
        Ok(())
    }

    fn recover(&self, problem: &DantzigWolfeProblem, result: &SolveResult) -> Vec<Vec<f64>> {
        let mut values: Vec<Vec<f64>> = problem
            .blocks
            .iter()
            .map(|b| vec![0.0; b.num_vars()])
            .collect();
        for column in &self.columns {
            let weight = result.value(column.var).unwrap_or(0.0);
            for (x, p) in values[column.block].iter_mut().zip(&column.point) {
                *x += weight * p;
            }
        }
        values
    }
}

/// Dantzig-Wolfe decomposition: a restricted master over block extreme points,
/// priced one block at a time through the oracle.
///
/// An infeasible restricted master is repaired with Farkas pricing before the usual
/// reduced-cost pricing starts. Blocks must be bounded.
pub struct DantzigWolfeDecomposition<O> {
    oracle: O,
    config: DantzigWolfeConfig,
}

impl<O: LinearProgramOracle> DantzigWolfeDecomposition<O> {
    pub fn new(oracle: O, config: DantzigWolfeConfig) -> Self {
        Self { oracle, config }
    }

    pub fn solve(
        &mut self,
        problem: &DantzigWolfeProblem,
        ctx: &mut RunContext,
    ) -> Result<DantzigWolfeOutcome> {
        info!(
            "Dantzig-Wolfe over {} blocks and {} coupling rows",
            problem.blocks.len(),
            problem.coupling.len()
        );
        let mut master = Master::build(problem)?;
        for (k, block) in problem.blocks.iter().enumerate() {
            let result = self.solve_subproblem(block, ctx)?;
            if result.status() == SolveStatus::Infeasible {
                debug!("block {k} is infeasible");
                return Ok(DantzigWolfeOutcome::infeasible(0, 0));
            }
            master.add(problem, k, result.values().to_vec())?;
        }
        ctx.columns_added += master.columns.len();

        let mut lower_bound: Option<f64> = None;
        for round in 1..=self.config.max_rounds {
            let result = self.oracle.solve_relaxation(&master.model)?;
            ctx.master_solves += 1;
            let (mode, coupling, convexity) = match result.status() {
                SolveStatus::Optimal => (
                    Pricing::Duals,
                    multipliers(&master.coupling_rows, |row| result.dual(row))?,
                    multipliers(&master.convexity_rows, |row| result.dual(row))?,
                ),
                SolveStatus::Infeasible => (
                    Pricing::Farkas,
                    multipliers(&master.coupling_rows, |row| result.farkas_dual(row))?,
                    multipliers(&master.convexity_rows, |row| result.farkas_dual(row))?,
                ),
                status => return Err(Error::RelaxationFailed(status)),
            };

            let mut admitted = 0;
            let mut reduced_total = 0.0;
            for (k, block) in problem.blocks.iter().enumerate() {
                let pricing = pricing_model(problem, k, block, &mode, &coupling)?;
                let priced = self.solve_subproblem(&pricing, ctx)?;
                let value = priced
                    .objective()
                    .ok_or(Error::RelaxationFailed(priced.status()))?;
                let (score, improving) = match mode {
                    Pricing::Duals => {
                        let reduced = value - convexity[k];
                        reduced_total += reduced;
                        (reduced, reduced < -self.config.tolerance)
                    }
                    Pricing::Farkas => {
                        let farkas = convexity[k] - value;
                        (farkas, farkas > self.config.tolerance)
                    }
                };
                if !improving {
                    continue;
                }
                let point = priced.values().to_vec();
                if master.contains(k, &point) {
                    warn!("block {k} priced an existing column again (score {score:e})");
                    continue;
                }
                trace!("round {round}: block {k} column admitted (score {score:e})");
                master.add(problem, k, point)?;
                admitted += 1;
            }
            ctx.pricing_rounds += 1;
            ctx.columns_added += admitted;

            if let (Pricing::Duals, Some(objective)) = (&mode, result.objective()) {
                let bound = objective + reduced_total;
                lower_bound = Some(lower_bound.map_or(bound, |b: f64| b.max(bound)));
                debug!("round {round}: master {objective}, Lagrangian bound {bound}");
            }

            if admitted == 0 {
                return Ok(match mode {
                    Pricing::Duals => {
                        info!(
                            "Dantzig-Wolfe converged after {round} rounds: {:?}",
                            result.objective()
                        );
                        DantzigWolfeOutcome {
                            status: SolveStatus::Optimal,
                            objective: result.objective(),
                            lower_bound,
                            block_values: master.recover(problem, &result),
                            coupling_duals: coupling,
                            rounds: round,
                            columns: master.columns.len(),
                        }
                    }
                    Pricing::Farkas => {
                        debug!("no block point repairs the infeasible master");
                        DantzigWolfeOutcome::infeasible(round, master.columns.len())
                    }
                });
            }
        }

        warn!("Dantzig-Wolfe stopped after {} rounds", self.config.max_rounds);
        let result = self.oracle.solve_relaxation(&master.model)?;
        ctx.master_solves += 1;
        let optimal = result.status() == SolveStatus::Optimal;
        Ok(DantzigWolfeOutcome {
            status: SolveStatus::IterationLimit,
            objective: result.objective().filter(|_| optimal),
            lower_bound,
            block_values: if optimal {
                master.recover(problem, &result)
            } else {
                Vec::new()
            },
            coupling_duals: Vec::new(),
            rounds: self.config.max_rounds,
            columns: master.columns.len(),
        })
    }

    fn solve_subproblem(&mut self, block: &Model, ctx: &mut RunContext) -> Result<SolveResult> {
        let result = self.oracle.solve(block)?;
        ctx.subproblem_solves += 1;
        match result.status() {
            SolveStatus::Optimal | SolveStatus::Infeasible => Ok(result),
            SolveStatus::Unbounded => Err(Error::Unbounded("a Dantzig-Wolfe block")),
            status => Err(Error::RelaxationFailed(status)),
        }
    }
}

fn multipliers(
    rows: &[ConstraintId],
    read: impl Fn(ConstraintId) -> Result<f64>,
) -> Result<Vec<f64>> {
    rows.iter().map(|&row| read(row)).collect()
}

/// Block `k` with the pricing objective: `c − πᵀA_k` for duals, `−λᵀA_k` for a
/// Farkas certificate.
fn pricing_model(
    problem: &DantzigWolfeProblem,
    k: usize,
    block: &Model,
    mode: &Pricing,
    weights: &[f64],
) -> Result<Model> {
    let mut model = block.clone();
    for (id, var) in block.var_ids().zip(block.vars()) {
        let base = match mode {
            Pricing::Duals => var.objective,
            Pricing::Farkas => 0.0,
        };
        model.set_objective_coefficient(id, base)?;
    }
    for (row, &w) in problem.coupling.iter().zip(weights) {
        if w == 0.0 {
            continue;
        }
        for &(_, var, a) in row.terms.iter().filter(|&&(b, _, _)| b == k) {
            let current = model.var(var)?.objective;
            model.set_objective_coefficient(var, current - w * a)?;
        }
    }
    Ok(model)
}
