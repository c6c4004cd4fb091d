//! Pricing subproblems of cutting-stock column generation.
//!
//! Every pricer solves the integer knapsack `max Σ wᵢ uᵢ  s.t.  Σ sizeᵢ uᵢ ≤ width`
//! for the current row weights `w` (demand duals, or Farkas multipliers when the
//! restricted master is infeasible).

use log::trace;

use crate::error::{Error, Result};
use crate::math::integer_linear::model::{LinExpr, Model, ObjectiveSense, VarType};
use crate::math::integer_linear::oracle::{LinearProgramOracle, SolveStatus};

/// A cutting pattern with its knapsack value `Σ wᵢ uᵢ`.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedPattern {
    pub pattern: Vec<u32>,
    pub value: f64,
}

pub trait PricingOracle {
    /// Returns up to `limit` distinct non-empty patterns, best value first.
    fn price(
        &mut self,
        weights: &[f64],
        sizes: &[u32],
        width: u32,
        limit: usize,
    ) -> Result<Vec<PricedPattern>>;
}

fn check_dimensions(weights: &[f64], sizes: &[u32]) -> Result<()> {
    if weights.len() != sizes.len() {
        return Err(Error::InvalidInstance(format!(
            "{} pricing weights for {} piece types",
            weights.len(),
            sizes.len()
        )));
    }
    if let Some(&w) = weights.iter().find(|w| !w.is_finite()) {
        return Err(Error::non_finite("pricing weight", w));
    }
    Ok(())
}

/// Best `limit` patterns seen so far, sorted by decreasing value.
struct TopPatterns {
    patterns: Vec<PricedPattern>,
    limit: usize,
}

impl TopPatterns {
    fn is_full(&self) -> bool {
        self.patterns.len() >= self.limit
    }

    fn threshold(&self) -> f64 {
        self.patterns.last().map_or(f64::NEG_INFINITY, |p| p.value)
    }

    fn offer(&mut self, pattern: &[u32], value: f64) {
        if self.is_full() && value <= self.threshold() {
            return;
        }
        let at = self.patterns.partition_point(|p| p.value >= value);
        self.patterns.insert(
            at,
            PricedPattern {
                pattern: pattern.to_vec(),
                value,
            },
        );
        self.patterns.truncate(self.limit);
    }
}

/// Exact depth-first knapsack enumeration.
///
/// Items are visited by decreasing value density and a branch is cut when its
/// fractional bound cannot enter the current top list. Items whose weight does not
/// exceed `tolerance` are fixed at zero.
#[derive(Debug, Clone)]
pub struct KnapsackPricer {
    tolerance: f64,
    nodes: usize,
}

impl Default for KnapsackPricer {
    fn default() -> Self {
        Self::new(1e-9)
    }
}

struct Enumeration<'a> {
    order: &'a [usize],
    weights: &'a [f64],
    sizes: &'a [u32],
    counts: Vec<u32>,
    top: TopPatterns,
    nodes: usize,
}

impl Enumeration<'_> {
    fn density(&self, item: usize) -> f64 {
        self.weights[item] / f64::from(self.sizes[item])
    }

    fn descend(&mut self, depth: usize, capacity: u32, value: f64) {
        self.nodes += 1;
        let Some(&item) = self.order.get(depth) else {
            if value > 0.0 {
                self.top.offer(&self.counts, value);
            }
            return;
        };
        let bound = value + f64::from(capacity) * self.density(item);
        if self.top.is_full() && bound <= self.top.threshold() {
            return;
        }
        let size = self.sizes[item];
        for count in (0..=capacity / size).rev() {
            self.counts[item] = count;
            self.descend(
                depth + 1,
                capacity - count * size,
                value + f64::from(count) * self.weights[item],
            );
        }
        self.counts[item] = 0;
    }
}

impl KnapsackPricer {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            nodes: 0,
        }
    }

    /// Enumeration nodes visited over the pricer's lifetime.
    pub fn nodes_explored(&self) -> usize {
        self.nodes
    }
}

impl PricingOracle for KnapsackPricer {
    fn price(
        &mut self,
        weights: &[f64],
        sizes: &[u32],
        width: u32,
        limit: usize,
    ) -> Result<Vec<PricedPattern>> {
        check_dimensions(weights, sizes)?;
        let mut order: Vec<usize> = (0..sizes.len())
            .filter(|&i| weights[i] > self.tolerance && sizes[i] > 0 && sizes[i] <= width)
            .collect();
        order.sort_by(|&a, &b| {
            let da = weights[a] / f64::from(sizes[a]);
            let db = weights[b] / f64::from(sizes[b]);
            db.total_cmp(&da).then(a.cmp(&b))
        });

        let mut search = Enumeration {
            order: &order,
            weights,
            sizes,
            counts: vec![0; sizes.len()],
            top: TopPatterns {
                patterns: Vec::with_capacity(limit),
                limit: limit.max(1),
            },
            nodes: 0,
        };
        search.descend(0, width, 0.0);
        self.nodes += search.nodes;
        trace!(
            "knapsack pricing: {} nodes, best value {:?}",
            search.nodes,
            search.top.patterns.first().map(|p| p.value)
        );
        Ok(search.top.patterns)
    }
}

/// Prices through a [`LinearProgramOracle`] by solving the knapsack as a MIP.
/// Returns at most one pattern per call.
pub struct OraclePricer<O> {
    oracle: O,
}

impl<O: LinearProgramOracle> OraclePricer<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }

    pub fn into_inner(self) -> O {
        self.oracle
    }
}

impl<O: LinearProgramOracle> PricingOracle for OraclePricer<O> {
    fn price(
        &mut self,
        weights: &[f64],
        sizes: &[u32],
        width: u32,
        _limit: usize,
    ) -> Result<Vec<PricedPattern>> {
        check_dimensions(weights, sizes)?;
        let mut model = Model::new("pricing knapsack", ObjectiveSense::Maximize);
        let mut capacity = LinExpr::new();
        for (i, (&w, &size)) in weights.iter().zip(sizes).enumerate() {
            let upper = if size == 0 { 0 } else { width / size };
            let u = model.add_var(format!("u{i}"), 0.0, f64::from(upper), w, VarType::Integer)?;
            capacity.add_term(u, f64::from(size));
        }
        model.add_le("width", capacity, f64::from(width))?;

        let result = self.oracle.solve(&model)?;
        if result.status() != SolveStatus::Optimal {
            return Err(Error::RelaxationFailed(result.status()));
        }
        let pattern: Vec<u32> = result
            .values()
            .iter()
            .map(|v| v.round().max(0.0) as u32)
            .collect();
        if pattern.iter().all(|&u| u == 0) {
            return Ok(Vec::new());
        }
        let value = pattern
            .iter()
            .zip(weights)
            .map(|(&u, &w)| f64::from(u) * w)
            .sum();
        Ok(vec![PricedPattern { pattern, value }])
    }
}
