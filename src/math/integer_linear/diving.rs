use log::{debug, trace};

use crate::error::{Error, Result};
use crate::math::integer_linear::column_generation::{
    ColumnGenerationEngine, CuttingStockInstance, PatternMatrix,
};
use crate::math::integer_linear::context::RunContext;
use crate::math::integer_linear::oracle::{LinearProgramOracle, SolveStatus};
use crate::math::integer_linear::pricing::PricingOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingStrategy {
    /// Fix nearly integral quantities and re-solve on the residual demand.
    Diving,
    /// Round every quantity up.
    Simple,
}

#[derive(Debug, Clone)]
pub struct DivingConfig {
    /// Fractional parts up to this value are rounded down.
    pub low: f64,
    /// Fractional parts from this value on are rounded up.
    pub high: f64,
    pub max_passes: usize,
    /// Quantities at or below this value count as unused.
    pub tolerance: f64,
}

impl Default for DivingConfig {
    fn default() -> Self {
        Self {
            low: 0.2,
            high: 0.8,
            max_passes: 100,
            tolerance: 1e-9,
        }
    }
}

/// Integral packing: quantity per pattern of the (possibly extended) pattern matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundedSolution {
    pub quantities: Vec<f64>,
    pub objective: f64,
    pub passes: usize,
}

impl RoundedSolution {
    fn from_quantities(quantities: Vec<f64>, passes: usize) -> Self {
        let objective = quantities.iter().sum();
        Self {
            quantities,
            objective,
            passes,
        }
    }
}

/// Ceiling of every quantity; covers any demand the fractional solution covers.
pub fn simple_rounding(quantities: &[f64]) -> RoundedSolution {
    let rounded = quantities.iter().map(|q| (q - 1e-9).ceil().max(0.0)).collect();
    RoundedSolution::from_quantities(rounded, 1)
}

/// Turns a fractional cutting-stock solution into an integral one.
///
/// Each pass fixes some quantities to integers, recomputes the demand left
/// uncovered and re-runs column generation on that residual demand over the
/// current patterns.
#[derive(Debug, Clone, Default)]
pub struct DivingRoundingHeuristic {
    config: DivingConfig,
}

impl DivingRoundingHeuristic {
    pub fn new(config: DivingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DivingConfig {
        &self.config
    }

    /// Rounds one pass of `quantities` into `fixed`; returns the added roll count.
    fn fix(&self, quantities: &[f64], fixed: &mut [f64]) -> Result<f64> {
        let tol = self.config.tolerance;
        let used: Vec<(usize, f64)> = quantities
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, q)| q > tol)
            .collect();
        if used.is_empty() {
            return Err(Error::HeuristicStall(
                "no fractional quantity left to round".into(),
            ));
        }

        let mut added = 0.0;
        for &(j, q) in &used {
            let fraction = q - q.floor();
            let amount = if fraction <= self.config.low + tol {
                q.floor()
            } else if fraction >= self.config.high - tol {
                q.ceil()
            } else {
                continue;
            };
            fixed[j] += amount;
            added += amount;
        }

        if added == 0.0 {
            let distance = |q: f64| (q - q.round()).abs();
            if let Some(&(j, q)) = used
                .iter()
                .min_by(|a, b| distance(a.1).total_cmp(&distance(b.1)))
            {
                trace!("rounding least fractional pattern {j} ({q}) to nearest");
                fixed[j] += q.round();
                added += q.round();
            }
        }

        if added == 0.0 {
            let gap = |q: f64| q.ceil() - q;
            if let Some(&(j, q)) = used.iter().min_by(|a, b| gap(a.1).total_cmp(&gap(b.1))) {
                trace!("stalled; rounding pattern {j} ({q}) up");
                fixed[j] += q.ceil();
                added += q.ceil();
            }
        }
        Ok(added)
    }

    pub fn round<O, P>(
        &self,
        engine: &mut ColumnGenerationEngine<O, P>,
        instance: &CuttingStockInstance,
        patterns: &mut PatternMatrix,
        quantities: &[f64],
        ctx: &mut RunContext,
    ) -> Result<RoundedSolution>
    where
        O: LinearProgramOracle,
        P: PricingOracle,
    {
        let mut current = quantities.to_vec();
        let mut fixed = vec![0.0; patterns.len()];
        let mut residual = instance.demands.clone();

        for pass in 1..=self.config.max_passes {
            ctx.diving_passes += 1;
            fixed.resize(patterns.len(), 0.0);
            current.resize(patterns.len(), 0.0);
            let added = self.fix(&current, &mut fixed)?;

            let covered = patterns.coverage(&fixed);
            residual = instance
                .demands
                .iter()
                .zip(&covered)
                .map(|(&d, &c)| (f64::from(d) - c).max(0.0).round() as u32)
                .collect();
            debug!("diving pass {pass}: {added} rolls fixed, residual {residual:?}");
            if residual.iter().all(|&r| r == 0) {
                return Ok(RoundedSolution::from_quantities(fixed, pass));
            }

            let outcome = engine.solve(instance, &residual, patterns, &[], ctx)?;
            if outcome.status != SolveStatus::Optimal {
                return Err(Error::HeuristicStall(format!(
                    "column generation on the residual demand ended {:?}",
                    outcome.status
                )));
            }
            current = outcome.quantities;
        }

        Err(Error::HeuristicStall(format!(
            "{} passes left residual demand {residual:?}",
            self.config.max_passes
        )))
    }
}
