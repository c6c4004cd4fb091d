use log::{debug, info, trace, warn};
use ndarray::{Array2, ArrayView1, ShapeBuilder};

use crate::error::{Error, Result};
use crate::math::integer_linear::context::RunContext;
use crate::math::integer_linear::model::{
    ConstraintId, ConstraintSense, LinExpr, Model, ObjectiveSense, VarType,
};
use crate::math::integer_linear::oracle::{LinearProgramOracle, SolveResult, SolveStatus};
use crate::math::integer_linear::pricing::{PricedPattern, PricingOracle};

/// One-dimensional cutting-stock data: rolls of `width`, piece type `i` of length
/// `sizes[i]` demanded `demands[i]` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuttingStockInstance {
    pub width: u32,
    pub sizes: Vec<u32>,
    pub demands: Vec<u32>,
}

impl CuttingStockInstance {
    pub fn new(width: u32, sizes: Vec<u32>, demands: Vec<u32>) -> Result<Self> {
        if sizes.is_empty() {
            return Err(Error::InvalidInstance("no piece types".into()));
        }
        if sizes.len() != demands.len() {
            return Err(Error::InvalidInstance(format!(
                "{} sizes but {} demands",
                sizes.len(),
                demands.len()
            )));
        }
        if let Some(&size) = sizes.iter().find(|&&s| s == 0 || s > width) {
            return Err(Error::InvalidInstance(format!(
                "piece of length {size} does not fit a roll of width {width}"
            )));
        }
        Ok(Self {
            width,
            sizes,
            demands,
        })
    }

    pub fn num_types(&self) -> usize {
        self.sizes.len()
    }

    /// Rolls needed if every roll were cut without waste; a lower bound on any packing.
    pub fn material_bound(&self) -> f64 {
        let used: u64 = self
            .sizes
            .iter()
            .zip(&self.demands)
            .map(|(&s, &d)| u64::from(s) * u64::from(d))
            .sum();
        used as f64 / f64::from(self.width)
    }
}

/// Append-only set of cutting patterns; column `j` holds the piece counts of pattern `j`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatrix {
    columns: Array2<u32>,
}

impl PatternMatrix {
    pub fn empty(num_types: usize) -> Self {
        Self {
            columns: Array2::zeros((num_types, 0).f()),
        }
    }

    /// One homogeneous pattern per piece type: `floor(width / size)` pieces of it.
    pub fn initial(instance: &CuttingStockInstance) -> Result<Self> {
        let mut patterns = Self::empty(instance.num_types());
        for (i, &size) in instance.sizes.iter().enumerate() {
            let mut pattern = vec![0; instance.num_types()];
            pattern[i] = instance.width / size;
            patterns.push(&pattern)?;
        }
        Ok(patterns)
    }

    pub fn len(&self) -> usize {
        self.columns.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_types(&self) -> usize {
        self.columns.nrows()
    }

    pub fn column(&self, j: usize) -> ArrayView1<'_, u32> {
        self.columns.column(j)
    }

    pub fn pattern(&self, j: usize) -> Vec<u32> {
        self.columns.column(j).to_vec()
    }

    pub fn as_array(&self) -> &Array2<u32> {
        &self.columns
    }

    /// Index of an identical pattern, if present.
    pub fn position(&self, pattern: &[u32]) -> Option<usize> {
        self.columns
            .columns()
            .into_iter()
            .position(|c| c.iter().eq(pattern.iter()))
    }

    pub fn push(&mut self, pattern: &[u32]) -> Result<usize> {
        self.columns.push_column(ArrayView1::from(pattern))?;
        Ok(self.len() - 1)
    }

    /// Pieces of each type produced by cutting pattern `j` `quantities[j]` times.
    pub fn coverage(&self, quantities: &[f64]) -> Vec<f64> {
        self.columns
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(quantities)
                    .map(|(&a, &x)| f64::from(a) * x)
                    .sum()
            })
            .collect()
    }

    /// Total length used by pattern `j`.
    pub fn used_width(&self, j: usize, sizes: &[u32]) -> u32 {
        self.columns
            .column(j)
            .iter()
            .zip(sizes)
            .map(|(&a, &s)| a * s)
            .sum()
    }
}

/// Branching row `x_pattern (sense) bound` on one pattern quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternBound {
    pub pattern: usize,
    pub sense: ConstraintSense,
    pub bound: f64,
}

#[derive(Debug, Clone)]
pub struct ColumnGenerationConfig {
    /// Columns are admitted when their reduced cost is below `-tolerance`.
    pub tolerance: f64,
    /// Pricing solutions requested per round.
    pub pool_size: usize,
    /// Upper limit for pool doubling.
    pub max_pool_size: usize,
    pub max_rounds: usize,
}

impl Default for ColumnGenerationConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            pool_size: 1,
            max_pool_size: 64,
            max_rounds: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnGenerationOutcome {
    /// `Optimal`, `Infeasible` (no column repairs the master) or `IterationLimit`.
    pub status: SolveStatus,
    pub objective: Option<f64>,
    /// Quantity per pattern of the final restricted master.
    pub quantities: Vec<f64>,
    pub demand_duals: Vec<f64>,
    pub rounds: usize,
    pub columns_added: usize,
}

/// Restricted master of one column-generation run.
struct RestrictedMaster {
    model: Model,
    demand_rows: Vec<ConstraintId>,
    /// Branching rows and the pattern each one bounds.
    branch_rows: Vec<(ConstraintId, usize)>,
}

impl RestrictedMaster {
    fn build(
        demands: &[u32],
        patterns: &PatternMatrix,
        bounds: &[PatternBound],
        var_type: VarType,
    ) -> Result<Self> {
        let mut model = Model::new("restricted master", ObjectiveSense::Minimize);
        let vars = (0..patterns.len())
            .map(|j| model.add_var(format!("x{j}"), 0.0, f64::INFINITY, 1.0, var_type))
            .collect::<Result<Vec<_>>>()?;
        let mut demand_rows = Vec::with_capacity(demands.len());
        for (i, &d) in demands.iter().enumerate() {
            let expr: LinExpr = patterns
                .as_array()
                .row(i)
                .iter()
                .zip(&vars)
                .filter(|&(&a, _)| a > 0)
                .map(|(&a, &x)| (x, f64::from(a)))
                .collect();
            demand_rows.push(model.add_ge(format!("demand_{i}"), expr, f64::from(d))?);
        }
        let mut branch_rows = Vec::with_capacity(bounds.len());
        for b in bounds {
            let &x = vars
                .get(b.pattern)
                .ok_or_else(|| Error::InvalidModel(format!("no pattern {}", b.pattern)))?;
            let row = model.add_constraint(
                format!("branch_{}", b.pattern),
                LinExpr::new().term(x, 1.0),
                b.sense,
                b.bound,
            )?;
            branch_rows.push((row, b.pattern));
        }
        model.set_request_certificates(true);
        Ok(Self {
            model,
            demand_rows,
            branch_rows,
        })
    }

    fn add_pattern(&mut self, j: usize, pattern: &[u32]) -> Result<()> {
        let entries: Vec<(ConstraintId, f64)> = self
            .demand_rows
            .iter()
            .zip(pattern)
            .filter(|&(_, &a)| a > 0)
            .map(|(&row, &a)| (row, f64::from(a)))
            .collect();
        self.model.add_column(
            format!("x{j}"),
            0.0,
            f64::INFINITY,
            1.0,
            VarType::Continuous,
            &entries,
        )?;
        Ok(())
    }
}

pub(crate) enum Pricing {
    /// Reduced-cost pricing with the demand duals of an optimal master.
    Duals,
    /// Repair pricing with the Farkas multipliers of an infeasible master.
    Farkas,
}

/// Cutting-stock column generation: alternates restricted-master LP solves through
/// the oracle with knapsack pricing until no column prices out.
///
/// Reduced costs are taken relative to the current node's master: a priced pattern
/// that is already present has its reduced cost corrected by the duals of the
/// branching rows on that column. Such columns are reported and never re-added.
pub struct ColumnGenerationEngine<O, P> {
    oracle: O,
    pricer: P,
    config: ColumnGenerationConfig,
}

impl<O: LinearProgramOracle, P: PricingOracle> ColumnGenerationEngine<O, P> {
    pub fn new(oracle: O, pricer: P, config: ColumnGenerationConfig) -> Self {
        Self {
            oracle,
            pricer,
            config,
        }
    }

    pub fn config(&self) -> &ColumnGenerationConfig {
        &self.config
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Runs column generation on `demands` (which may differ from the instance's own
    /// demands, e.g. residual demand) over `patterns`, appending every admitted column.
    pub fn solve(
        &mut self,
        instance: &CuttingStockInstance,
        demands: &[u32],
        patterns: &mut PatternMatrix,
        bounds: &[PatternBound],
        ctx: &mut RunContext,
    ) -> Result<ColumnGenerationOutcome> {
        if demands.len() != instance.num_types() || patterns.num_types() != instance.num_types()
        {
            return Err(Error::InvalidInstance(
                "demand and pattern rows must match the piece types".into(),
            ));
        }
        let mut master = RestrictedMaster::build(demands, patterns, bounds, VarType::Continuous)?;
        let mut pool = self.config.pool_size.max(1);
        let mut columns_added = 0;
        debug!(
            "column generation: {} patterns, {} branching rows",
            patterns.len(),
            bounds.len()
        );

        for round in 1..=self.config.max_rounds {
            let result = self.oracle.solve_relaxation(&master.model)?;
            ctx.master_solves += 1;
            let (mode, weights) = match result.status() {
                SolveStatus::Optimal => (
                    Pricing::Duals,
                    master
                        .demand_rows
                        .iter()
                        .map(|&row| result.dual(row))
                        .collect::<Result<Vec<_>>>()?,
                ),
                SolveStatus::Infeasible => (
                    Pricing::Farkas,
                    master
                        .demand_rows
                        .iter()
                        .map(|&row| result.farkas_dual(row))
                        .collect::<Result<Vec<_>>>()?,
                ),
                status => return Err(Error::RelaxationFailed(status)),
            };

            let admitted = loop {
                let priced =
                    self.pricer
                        .price(&weights, &instance.sizes, instance.width, pool)?;
                ctx.pricing_rounds += 1;
                let scan = self.admit(&mode, &priced, &result, &mut master, patterns)?;
                if scan.admitted > 0 || !scan.only_duplicates || priced.len() < pool {
                    break scan.admitted;
                }
                if pool >= self.config.max_pool_size {
                    warn!(
                        "every priced column is already present with a pool of {pool}; \
                         stopping pricing"
                    );
                    break 0;
                }
                pool = (pool * 2).min(self.config.max_pool_size);
                debug!("pricing pool doubled to {pool}");
            };
            columns_added += admitted;
            ctx.columns_added += admitted;
            trace!("round {round}: {admitted} columns admitted");

            if admitted == 0 {
                return Ok(match mode {
                    Pricing::Duals => {
                        info!(
                            "column generation converged after {round} rounds: LP bound {:?}",
                            result.objective()
                        );
                        ColumnGenerationOutcome {
                            status: SolveStatus::Optimal,
                            objective: result.objective(),
                            quantities: result.values().to_vec(),
                            demand_duals: weights,
                            rounds: round,
                            columns_added,
                        }
                    }
                    Pricing::Farkas => {
                        debug!("no column repairs the infeasible master");
                        ColumnGenerationOutcome {
                            status: SolveStatus::Infeasible,
                            objective: None,
                            quantities: Vec::new(),
                            demand_duals: Vec::new(),
                            rounds: round,
                            columns_added,
                        }
                    }
                });
            }
        }

        warn!(
            "column generation stopped after {} rounds",
            self.config.max_rounds
        );
        let result = self.oracle.solve_relaxation(&master.model)?;
        ctx.master_solves += 1;
        Ok(ColumnGenerationOutcome {
            status: SolveStatus::IterationLimit,
            objective: result.objective(),
            quantities: result.values().to_vec(),
            demand_duals: Vec::new(),
            rounds: self.config.max_rounds,
            columns_added,
        })
    }

    fn admit(
        &self,
        mode: &Pricing,
        priced: &[PricedPattern],
        result: &SolveResult,
        master: &mut RestrictedMaster,
        patterns: &mut PatternMatrix,
    ) -> Result<Scan> {
        let tolerance = self.config.tolerance;
        let mut scan = Scan {
            admitted: 0,
            only_duplicates: true,
        };
        for candidate in priced {
            let improving = match mode {
                Pricing::Duals => 1.0 - candidate.value < -tolerance,
                Pricing::Farkas => candidate.value > tolerance,
            };
            if !improving {
                scan.only_duplicates = false;
                break;
            }
            match patterns.position(&candidate.pattern) {
                Some(j) => {
                    if let Pricing::Duals = mode {
                        let branch_dual: f64 = master
                            .branch_rows
                            .iter()
                            .filter(|&&(_, p)| p == j)
                            .map(|&(row, _)| result.dual(row))
                            .sum::<Result<f64>>()?;
                        let corrected = 1.0 - candidate.value - branch_dual;
                        if corrected < -tolerance {
                            warn!("pattern {j} is present with corrected reduced cost {corrected:e}");
                        } else {
                            trace!("pattern {j} present, corrected reduced cost {corrected:e}");
                        }
                    }
                }
                None => {
                    let j = patterns.push(&candidate.pattern)?;
                    master.add_pattern(j, &candidate.pattern)?;
                    scan.admitted += 1;
                    scan.only_duplicates = false;
                    trace!("pattern {j} {:?} admitted (value {})", candidate.pattern, candidate.value);
                }
            }
        }
        Ok(scan)
    }

    /// Solves the final restricted master with integer quantities.
    ///
    /// Returns the rolls and quantities of the best packing the oracle found, if any.
    pub fn integer_master(
        &mut self,
        instance: &CuttingStockInstance,
        patterns: &PatternMatrix,
        bounds: &[PatternBound],
        ctx: &mut RunContext,
    ) -> Result<Option<(f64, Vec<f64>)>> {
        let master = RestrictedMaster::build(&instance.demands, patterns, bounds, VarType::Integer)?;
        let result = self.oracle.solve(&master.model)?;
        ctx.master_solves += 1;
        debug!(
            "integer restricted master: {:?}, objective {:?}",
            result.status(),
            result.objective()
        );
        Ok(result
            .objective()
            .map(|objective| (objective, result.values().iter().map(|v| v.round()).collect())))
    }
}

struct Scan {
    admitted: usize,
    /// No improving candidate was new and none failed to improve.
    only_duplicates: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::integer_linear::pricing::KnapsackPricer;
    use crate::math::integer_linear::SimplexOracle;
    use approx::assert_relative_eq;

    fn engine() -> ColumnGenerationEngine<SimplexOracle, KnapsackPricer> {
        ColumnGenerationEngine::new(
            SimplexOracle::default(),
            KnapsackPricer::default(),
            ColumnGenerationConfig::default(),
        )
    }

    #[test]
    fn test_instance_validation() {
        assert!(CuttingStockInstance::new(10, vec![3, 5], vec![1, 2]).is_ok());
        assert!(matches!(
            CuttingStockInstance::new(10, vec![3, 11], vec![1, 2]),
            Err(Error::InvalidInstance(_))
        ));
        assert!(CuttingStockInstance::new(10, vec![3], vec![1, 2]).is_err());
        assert!(CuttingStockInstance::new(10, vec![], vec![]).is_err());
    }

    #[test]
    fn test_initial_patterns_are_homogeneous() {
        let instance = CuttingStockInstance::new(115, vec![25, 40, 50], vec![1, 1, 1]).unwrap();
        let mut patterns = PatternMatrix::initial(&instance).unwrap();
        assert_eq!(patterns.len(), 3);
        assert_eq!(patterns.pattern(0), vec![4, 0, 0]);
        assert_eq!(patterns.pattern(1), vec![0, 2, 0]);
        assert_eq!(patterns.pattern(2), vec![0, 0, 2]);
        assert_eq!(patterns.position(&[0, 2, 0]), Some(1));
        assert_eq!(patterns.push(&[1, 1, 0]).unwrap(), 3);
        assert_eq!(patterns.used_width(3, &instance.sizes), 65);
        assert_eq!(patterns.coverage(&[1.0, 0.5, 0.0, 2.0]), vec![6.0, 3.0, 0.0]);
    }

    #[test]
    fn test_small_instance_reaches_lp_bound() {
        // Width 10, pieces 3 and 5: the LP optimum mixes [3, 0] and [0, 2].
        let instance = CuttingStockInstance::new(10, vec![3, 5], vec![9, 4]).unwrap();
        let mut patterns = PatternMatrix::initial(&instance).unwrap();
        let mut ctx = RunContext::new();
        let outcome = engine()
            .solve(&instance, &instance.demands, &mut patterns, &[], &mut ctx)
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_relative_eq!(outcome.objective.unwrap(), 5.0, epsilon = 1e-6);
        let covered = patterns.coverage(&outcome.quantities);
        assert!(covered[0] >= 9.0 - 1e-6 && covered[1] >= 4.0 - 1e-6);
        assert!(ctx.master_solves >= 1);
    }

    #[test]
    fn test_farkas_pricing_repairs_blocked_master() {
        let instance = CuttingStockInstance::new(10, vec![3, 5], vec![3, 2]).unwrap();
        let mut patterns = PatternMatrix::initial(&instance).unwrap();
        let blocked = [
            PatternBound { pattern: 0, sense: ConstraintSense::LessEqual, bound: 0.0 },
            PatternBound { pattern: 1, sense: ConstraintSense::LessEqual, bound: 0.0 },
        ];
        let outcome = engine()
            .solve(&instance, &instance.demands, &mut patterns, &blocked, &mut RunContext::new())
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Optimal);
        // Best without the homogeneous patterns: two [1, 1] and half a [2, 0].
        assert_relative_eq!(outcome.objective.unwrap(), 2.5, epsilon = 1e-6);
        assert!(patterns.len() > 2);
        assert!(outcome.quantities[0].abs() < 1e-9 && outcome.quantities[1].abs() < 1e-9);
    }

    #[test]
    fn test_unrepairable_master_is_infeasible() {
        // The only possible pattern is capped below the demand.
        let instance = CuttingStockInstance::new(3, vec![3], vec![2]).unwrap();
        let mut patterns = PatternMatrix::initial(&instance).unwrap();
        let blocked = [PatternBound { pattern: 0, sense: ConstraintSense::LessEqual, bound: 1.0 }];
        let outcome = engine()
            .solve(&instance, &instance.demands, &mut patterns, &blocked, &mut RunContext::new())
            .unwrap();
        assert_eq!(outcome.status, SolveStatus::Infeasible);
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn test_integer_master_covers_demand() {
        let instance = CuttingStockInstance::new(10, vec![3, 5], vec![9, 4]).unwrap();
        let mut patterns = PatternMatrix::initial(&instance).unwrap();
        let mut engine = engine();
        let mut ctx = RunContext::new();
        engine
            .solve(&instance, &instance.demands, &mut patterns, &[], &mut ctx)
            .unwrap();
        let (rolls, quantities) = engine
            .integer_master(&instance, &patterns, &[], &mut ctx)
            .unwrap()
            .unwrap();
        assert!(rolls >= 5.0 - 1e-9);
        let covered = patterns.coverage(&quantities);
        assert!(covered[0] >= 9.0 && covered[1] >= 4.0);
    }
}
