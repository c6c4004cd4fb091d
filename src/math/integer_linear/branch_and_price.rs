use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::math::integer_linear::branch_and_bound::{
    relative_gap_percent, BoundSample, BranchAndBoundConfig, BranchAndBoundTree, BranchingRule,
    NodeEvaluation, NodeSelection, NodeStats, PruneRecord, Relaxation, SearchView,
};
use crate::math::integer_linear::column_generation::{
    ColumnGenerationConfig, ColumnGenerationEngine, CuttingStockInstance, PatternBound,
    PatternMatrix,
};
use crate::math::integer_linear::context::{RunContext, RunStats};
use crate::math::integer_linear::diving::{
    simple_rounding, DivingConfig, DivingRoundingHeuristic, RoundedSolution, RoundingStrategy,
};
use crate::math::integer_linear::model::{ConstraintSense, ObjectiveSense};
use crate::math::integer_linear::oracle::{LinearProgramOracle, SolveStatus};
use crate::math::integer_linear::pricing::PricingOracle;
use crate::math::integer_linear::report::BoundAssessment;

#[derive(Debug, Clone)]
pub struct BranchAndPriceConfig {
    pub column_generation: ColumnGenerationConfig,
    pub diving: DivingConfig,
    /// Heuristic run at fractional nodes.
    pub rounding: RoundingStrategy,
    pub node_selection: NodeSelection,
    pub branching: BranchingRule,
    /// Relative gap at which the search stops.
    pub gap_tolerance: f64,
    pub integrality_tolerance: f64,
    pub node_limit: Option<usize>,
    pub time_limit: Option<Duration>,
}

impl Default for BranchAndPriceConfig {
    fn default() -> Self {
        Self {
            column_generation: ColumnGenerationConfig::default(),
            diving: DivingConfig::default(),
            rounding: RoundingStrategy::Diving,
            node_selection: NodeSelection::BestBound,
            branching: BranchingRule::FirstFractional,
            gap_tolerance: 1e-4,
            integrality_tolerance: 1e-6,
            node_limit: None,
            time_limit: None,
        }
    }
}

/// Branching decision that created the node; the root has none.
#[derive(Debug, Clone, Default)]
pub struct PriceNode {
    pub decision: Option<PatternBound>,
}

/// Integral cutting plan: each used pattern with the number of rolls cut that way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackingSolution {
    pub patterns: Vec<Vec<u32>>,
    pub quantities: Vec<u32>,
    pub rolls: u32,
}

impl PackingSolution {
    fn from_quantities(patterns: &PatternMatrix, quantities: &[f64]) -> Self {
        let mut used = Vec::new();
        let mut counts = Vec::new();
        for (j, q) in quantities.iter().enumerate() {
            let count = q.round().max(0.0) as u32;
            if count > 0 {
                used.push(patterns.pattern(j));
                counts.push(count);
            }
        }
        let rolls = counts.iter().sum();
        Self {
            patterns: used,
            quantities: counts,
            rolls,
        }
    }

    /// Pieces of each type produced by the plan.
    pub fn produced(&self, num_types: usize) -> Vec<u32> {
        let mut produced = vec![0; num_types];
        for (pattern, &count) in self.patterns.iter().zip(&self.quantities) {
            for (p, &a) in produced.iter_mut().zip(pattern) {
                *p += a * count;
            }
        }
        produced
    }

    pub fn covers(&self, instance: &CuttingStockInstance) -> bool {
        self.produced(instance.num_types())
            .iter()
            .zip(&instance.demands)
            .all(|(p, d)| p >= d)
    }
}

#[derive(Debug, Clone)]
pub struct BranchAndPriceReport {
    pub status: SolveStatus,
    pub incumbent: Option<PackingSolution>,
    /// Column-generation bound of the root node.
    pub lp_bound: Option<f64>,
    /// Best proven roll count lower bound.
    pub integral_lower_bound: Option<f64>,
    pub gap: Option<f64>,
    pub stats: NodeStats,
    pub prunes: Vec<PruneRecord>,
    pub trace: Vec<BoundSample>,
    pub patterns: usize,
    pub run: RunStats,
    pub assessment: BoundAssessment,
}

/// Branch-and-price for cutting stock: every node runs column generation under its
/// branching rows, and fractional nodes branch on a pattern quantity.
///
/// Patterns form one pool shared by all nodes; a branching row refers to a pattern
/// by index, so child nodes see every column their ancestors generated.
pub struct BranchAndPrice<O, P> {
    instance: CuttingStockInstance,
    engine: ColumnGenerationEngine<O, P>,
    patterns: PatternMatrix,
    diving: DivingRoundingHeuristic,
    config: BranchAndPriceConfig,
    root_bound: Option<f64>,
}

impl<O: LinearProgramOracle, P: PricingOracle> BranchAndPrice<O, P> {
    pub fn new(
        instance: CuttingStockInstance,
        oracle: O,
        pricer: P,
        config: BranchAndPriceConfig,
    ) -> Result<Self> {
        let patterns = PatternMatrix::initial(&instance)?;
        Ok(Self {
            engine: ColumnGenerationEngine::new(oracle, pricer, config.column_generation.clone()),
            diving: DivingRoundingHeuristic::new(config.diving.clone()),
            instance,
            patterns,
            config,
            root_bound: None,
        })
    }

    pub fn patterns(&self) -> &PatternMatrix {
        &self.patterns
    }

    pub fn instance(&self) -> &CuttingStockInstance {
        &self.instance
    }

    pub fn solve(&mut self, ctx: &mut RunContext) -> Result<BranchAndPriceReport> {
        info!(
            "branch and price: width {}, {} piece types",
            self.instance.width,
            self.instance.num_types()
        );
        let tree = BranchAndBoundTree::new(BranchAndBoundConfig {
            node_selection: self.config.node_selection,
            node_limit: self.config.node_limit,
            time_limit: self.config.time_limit,
            absolute_gap: 1e-9,
            relative_gap: self.config.gap_tolerance,
        });
        let report = tree.search(self, ctx)?;

        let integral_lower_bound = report
            .best_bound
            .is_finite()
            .then(|| self.round_bound(report.best_bound));
        let gap = match (integral_lower_bound, report.objective) {
            (Some(lower), Some(upper)) => relative_gap_percent(lower, upper),
            _ => None,
        };
        let assessment = BoundAssessment::assess(
            report.status,
            report.incumbent.is_some(),
            integral_lower_bound.is_some(),
        );
        assessment.log("branch and price", report.objective, integral_lower_bound);

        Ok(BranchAndPriceReport {
            status: report.status,
            incumbent: report.incumbent,
            lp_bound: self.root_bound,
            integral_lower_bound,
            gap,
            stats: report.stats,
            prunes: report.prunes,
            trace: report.trace,
            patterns: self.patterns.len(),
            run: ctx.stats(),
            assessment,
        })
    }

    fn rounding_heuristic(
        &mut self,
        quantities: &[f64],
        ctx: &mut RunContext,
    ) -> Result<RoundedSolution> {
        match self.config.rounding {
            RoundingStrategy::Simple => Ok(simple_rounding(quantities)),
            RoundingStrategy::Diving => {
                match self.diving.round(
                    &mut self.engine,
                    &self.instance,
                    &mut self.patterns,
                    quantities,
                    ctx,
                ) {
                    Err(Error::HeuristicStall(reason)) => {
                        warn!("diving failed ({reason}); rounding up instead");
                        Ok(simple_rounding(quantities))
                    }
                    other => other,
                }
            }
        }
    }
}

impl<O: LinearProgramOracle, P: PricingOracle> Relaxation for BranchAndPrice<O, P> {
    type Node = PriceNode;
    type Solution = PackingSolution;

    fn sense(&self) -> ObjectiveSense {
        ObjectiveSense::Minimize
    }

    fn root(&mut self) -> PriceNode {
        PriceNode::default()
    }

    /// The objective is a roll count.
    fn round_bound(&self, bound: f64) -> f64 {
        (bound - 1e-6).ceil()
    }

    fn evaluate(
        &mut self,
        node: &mut PriceNode,
        ancestors: &[&PriceNode],
        view: SearchView,
        ctx: &mut RunContext,
    ) -> Result<NodeEvaluation<PriceNode, PackingSolution>> {
        let bounds: Vec<PatternBound> = ancestors
            .iter()
            .filter_map(|n| n.decision)
            .chain(node.decision)
            .collect();
        let outcome = self.engine.solve(
            &self.instance,
            &self.instance.demands,
            &mut self.patterns,
            &bounds,
            ctx,
        )?;
        let bound = match (outcome.status, outcome.objective) {
            (SolveStatus::Infeasible, _) => return Ok(NodeEvaluation::Infeasible),
            (SolveStatus::Optimal, Some(objective)) => objective,
            (status, _) => return Err(Error::RelaxationFailed(status)),
        };
        if bounds.is_empty() {
            self.root_bound = Some(bound);
        }

        let quantities = outcome.quantities;
        let tolerance = self.config.integrality_tolerance;
        let Some(j) = self
            .config
            .branching
            .select(&quantities, 0..quantities.len(), tolerance)
        else {
            let solution = PackingSolution::from_quantities(&self.patterns, &quantities);
            debug!("integral node with {} rolls", solution.rolls);
            return Ok(NodeEvaluation::Integral {
                objective: f64::from(solution.rolls),
                solution,
            });
        };

        let hopeless = view
            .incumbent
            .is_some_and(|incumbent| self.round_bound(bound) >= incumbent);
        let heuristic = if hopeless {
            None
        } else {
            let rounded = self.rounding_heuristic(&quantities, ctx)?;
            let solution = PackingSolution::from_quantities(&self.patterns, &rounded.quantities);
            debug!(
                "node bound {bound}: heuristic packing with {} rolls",
                solution.rolls
            );
            Some((f64::from(solution.rolls), solution))
        };

        let value = quantities[j];
        let children = vec![
            PriceNode {
                decision: Some(PatternBound {
                    pattern: j,
                    sense: ConstraintSense::LessEqual,
                    bound: value.floor(),
                }),
            },
            PriceNode {
                decision: Some(PatternBound {
                    pattern: j,
                    sense: ConstraintSense::GreaterEqual,
                    bound: value.ceil(),
                }),
            },
        ];
        Ok(NodeEvaluation::Fractional {
            bound,
            children,
            heuristic,
        })
    }
}
