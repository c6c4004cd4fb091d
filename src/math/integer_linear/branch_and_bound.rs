use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use log::{debug, info, trace};

use crate::error::{Error, Result};
use crate::math::integer_linear::context::RunContext;
use crate::math::integer_linear::model::{
    Constraint, ConstraintSense, LinExpr, Model, ObjectiveSense, VarId,
};
use crate::math::integer_linear::oracle::{
    Candidate, IntegerCandidateHandler, LinearProgramOracle, SolveStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSelection {
    /// LIFO stack.
    DepthFirst,
    /// Open node with the best cached bound first; ties go to the newest node.
    BestBound,
}

/// Which fractional variable a relaxation branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchingRule {
    /// First fractional integer variable in index order.
    FirstFractional,
    /// Variable whose fractional part is closest to one half.
    MostFractional,
}

impl BranchingRule {
    /// Picks a branching index among `values`, restricted to `candidates`.
    pub fn select(
        self,
        values: &[f64],
        candidates: impl Iterator<Item = usize>,
        tolerance: f64,
    ) -> Option<usize> {
        let mut fractional = candidates.filter(|&j| !is_integer(values[j], tolerance));
        match self {
            BranchingRule::FirstFractional => fractional.next(),
            BranchingRule::MostFractional => {
                let mut best: Option<(usize, f64)> = None;
                for j in fractional {
                    let distance = (values[j] - values[j].floor() - 0.5).abs();
                    if best.map_or(true, |(_, d)| distance < d) {
                        best = Some((j, distance));
                    }
                }
                best.map(|(j, _)| j)
            }
        }
    }
}

pub fn is_integer(value: f64, tolerance: f64) -> bool {
    (value - value.round()).abs() <= tolerance
}

#[derive(Debug, Clone)]
pub struct BranchAndBoundConfig {
    pub node_selection: NodeSelection,
    pub node_limit: Option<usize>,
    pub time_limit: Option<Duration>,
    /// Stop once `incumbent − bound` falls to this value.
    pub absolute_gap: f64,
    /// Stop once `(incumbent − bound) / |bound|` falls to this value.
    pub relative_gap: f64,
}

impl Default for BranchAndBoundConfig {
    fn default() -> Self {
        Self {
            node_selection: NodeSelection::BestBound,
            node_limit: None,
            time_limit: None,
            absolute_gap: 1e-9,
            relative_gap: 1e-9,
        }
    }
}

/// Incumbent and global bound as seen by a node evaluation, in the objective's sense.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchView {
    pub incumbent: Option<f64>,
    pub best_bound: Option<f64>,
}

/// Result of evaluating one node's relaxation.
#[derive(Debug)]
pub enum NodeEvaluation<N, S> {
    Infeasible,
    /// The relaxation has no finite optimum.
    Unbounded,
    /// The relaxation optimum already satisfies integrality.
    Integral { objective: f64, solution: S },
    /// Branch into `children`; `heuristic` is an optional feasible point found on the way.
    Fractional {
        bound: f64,
        children: Vec<N>,
        heuristic: Option<(f64, S)>,
    },
}

/// Problem-specific part of a branch-and-bound search.
///
/// Nodes are deltas: `evaluate` receives the node together with its ancestors,
/// root first, and rebuilds the node problem from that chain.
pub trait Relaxation {
    type Node;
    type Solution: Clone;

    fn sense(&self) -> ObjectiveSense;

    fn root(&mut self) -> Self::Node;

    /// Strengthens a relaxation bound, e.g. by rounding when the objective is integral.
    fn round_bound(&self, bound: f64) -> f64 {
        bound
    }

    fn evaluate(
        &mut self,
        node: &mut Self::Node,
        ancestors: &[&Self::Node],
        view: SearchView,
        ctx: &mut RunContext,
    ) -> Result<NodeEvaluation<Self::Node, Self::Solution>>;

    /// Checked after every node; `true` stops the search as interrupted.
    fn interrupted(&self) -> bool {
        false
    }
}

/// One (nodes, LB, UB) sample of the bound trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundSample {
    pub nodes: usize,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneReason {
    Infeasible,
    /// The node bound could not beat the incumbent.
    Dominated,
    /// Retired as a candidate incumbent.
    Integral,
}

/// Why a node was closed, with its bound and the incumbent at that moment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PruneRecord {
    pub reason: PruneReason,
    pub bound: Option<f64>,
    pub incumbent: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub processed: usize,
    pub branched: usize,
    pub integral: usize,
    pub infeasible: usize,
    pub dominated: usize,
    pub incumbent_updates: usize,
    pub max_depth: usize,
    pub left_open: usize,
}

#[derive(Debug, Clone)]
pub struct SearchReport<S> {
    /// `Optimal`, `Infeasible`, `InfeasibleOrUnbounded` or a limit status.
    pub status: SolveStatus,
    pub incumbent: Option<S>,
    pub objective: Option<f64>,
    /// Best proven bound in the objective's sense.
    pub best_bound: f64,
    /// Percentage gap, see [`relative_gap_percent`].
    pub gap: Option<f64>,
    pub stats: NodeStats,
    pub prunes: Vec<PruneRecord>,
    pub trace: Vec<BoundSample>,
}

/// `100 × (upper − lower) / |lower|`, undefined when `lower` is zero or a bound is infinite.
pub fn relative_gap_percent(lower: f64, upper: f64) -> Option<f64> {
    if !lower.is_finite() || !upper.is_finite() || lower.abs() < 1e-12 {
        return None;
    }
    Some(100.0 * (upper - lower) / lower.abs())
}

struct Slot<N> {
    node: N,
    parent: Option<usize>,
    depth: usize,
    /// Minimization score of the bound inherited at creation.
    score: f64,
}

#[derive(Debug)]
struct OpenNode {
    score: f64,
    seq: usize,
    index: usize,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    // Max-heap: smaller score first, then the newer node.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.seq.cmp(&other.seq))
    }
}

enum Frontier {
    Stack(Vec<OpenNode>),
    Heap(BinaryHeap<OpenNode>),
}

impl Frontier {
    fn new(selection: NodeSelection) -> Self {
        match selection {
            NodeSelection::DepthFirst => Frontier::Stack(Vec::new()),
            NodeSelection::BestBound => Frontier::Heap(BinaryHeap::new()),
        }
    }

    fn push(&mut self, node: OpenNode) {
        match self {
            Frontier::Stack(stack) => stack.push(node),
            Frontier::Heap(heap) => heap.push(node),
        }
    }

    fn pop(&mut self) -> Option<OpenNode> {
        match self {
            Frontier::Stack(stack) => stack.pop(),
            Frontier::Heap(heap) => heap.pop(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Frontier::Stack(stack) => stack.len(),
            Frontier::Heap(heap) => heap.len(),
        }
    }

    fn min_score(&self) -> Option<f64> {
        match self {
            Frontier::Stack(stack) => stack.iter().map(|n| n.score).min_by(f64::total_cmp),
            Frontier::Heap(heap) => heap.peek().map(|n| n.score),
        }
    }
}

/// Generic branch-and-bound driver over a [`Relaxation`].
///
/// Scores are handled internally as minimization values. Each open node keeps the
/// bound of its parent as priority; open nodes are never re-solved to be compared.
pub struct BranchAndBoundTree {
    config: BranchAndBoundConfig,
}

impl BranchAndBoundTree {
    pub fn new(config: BranchAndBoundConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BranchAndBoundConfig {
        &self.config
    }

    /// Rounded node score against the incumbent score; ties cannot improve.
    fn cannot_improve<R: Relaxation>(&self, relaxation: &R, score: f64, incumbent_score: f64) -> bool {
        if !incumbent_score.is_finite() || !score.is_finite() {
            return false;
        }
        let rounded = match relaxation.sense() {
            ObjectiveSense::Minimize => relaxation.round_bound(score),
            ObjectiveSense::Maximize => -relaxation.round_bound(-score),
        };
        rounded >= incumbent_score - self.config.absolute_gap
    }

    pub fn search<R: Relaxation>(
        &self,
        relaxation: &mut R,
        ctx: &mut RunContext,
    ) -> Result<SearchReport<R::Solution>> {
        let sense = relaxation.sense();
        let to_score = |v: f64| match sense {
            ObjectiveSense::Minimize => v,
            ObjectiveSense::Maximize => -v,
        };
        let from_score = to_score;

        let mut slots: Vec<Slot<R::Node>> = Vec::new();
        let mut frontier = Frontier::new(self.config.node_selection);
        let mut seq = 0;
        let root = relaxation.root();
        slots.push(Slot {
            node: root,
            parent: None,
            depth: 0,
            score: f64::NEG_INFINITY,
        });
        frontier.push(OpenNode {
            score: f64::NEG_INFINITY,
            seq,
            index: 0,
        });

        let mut incumbent: Option<R::Solution> = None;
        let mut incumbent_score = f64::INFINITY;
        let mut stats = NodeStats::default();
        let mut prunes = Vec::new();
        let mut trace = Vec::new();
        let mut status = None;
        let started = std::time::Instant::now();

        loop {
            if frontier.len() == 0 {
                break;
            }
            if let Some(limit) = self.config.node_limit {
                if stats.processed >= limit {
                    status = Some(SolveStatus::NodeLimit);
                    break;
                }
            }
            if let Some(limit) = self.config.time_limit {
                if started.elapsed() >= limit {
                    status = Some(SolveStatus::TimeLimit);
                    break;
                }
            }
            if incumbent.is_some() {
                if let Some(lower) = frontier.min_score() {
                    let gap = incumbent_score - lower;
                    if gap <= self.config.absolute_gap
                        || gap <= self.config.relative_gap * lower.abs().max(1e-12)
                    {
                        debug!("gap closed ({gap:e}) with {} open nodes", frontier.len());
                        break;
                    }
                }
            }

            let Some(open) = frontier.pop() else {
                break;
            };
            if self.cannot_improve(&*relaxation, open.score, incumbent_score) {
                stats.dominated += 1;
                prunes.push(PruneRecord {
                    reason: PruneReason::Dominated,
                    bound: Some(from_score(open.score)),
                    incumbent: Some(from_score(incumbent_score)),
                });
                continue;
            }

            let index = open.index;
            stats.processed += 1;
            ctx.nodes_processed += 1;

            let global_lower = frontier
                .min_score()
                .map_or(open.score, |s| s.min(open.score))
                .min(incumbent_score);
            let view = SearchView {
                incumbent: incumbent.as_ref().map(|_| from_score(incumbent_score)),
                best_bound: global_lower.is_finite().then(|| from_score(global_lower)),
            };

            let (before, rest) = slots.split_at_mut(index);
            let slot = &mut rest[0];
            let mut ancestors = Vec::with_capacity(slot.depth);
            let mut parent = slot.parent;
            while let Some(p) = parent {
                ancestors.push(&before[p].node);
                parent = before[p].parent;
            }
            ancestors.reverse();
            let depth = slot.depth;
            let inherited = slot.score;
            stats.max_depth = stats.max_depth.max(depth);

            let evaluation = relaxation.evaluate(&mut slot.node, &ancestors, view, ctx)?;
            match evaluation {
                NodeEvaluation::Infeasible => {
                    trace!("node {index} infeasible");
                    stats.infeasible += 1;
                    prunes.push(PruneRecord {
                        reason: PruneReason::Infeasible,
                        bound: None,
                        incumbent: incumbent.as_ref().map(|_| from_score(incumbent_score)),
                    });
                }
                NodeEvaluation::Unbounded => {
                    info!("relaxation unbounded at node {index}; stopping the search");
                    status = Some(SolveStatus::InfeasibleOrUnbounded);
                    break;
                }
                NodeEvaluation::Integral {
                    objective,
                    solution,
                } => {
                    stats.integral += 1;
                    let score = to_score(objective);
                    prunes.push(PruneRecord {
                        reason: PruneReason::Integral,
                        bound: Some(objective),
                        incumbent: incumbent.as_ref().map(|_| from_score(incumbent_score)),
                    });
                    if score < incumbent_score - self.config.absolute_gap {
                        debug!("node {index}: new incumbent {objective}");
                        incumbent_score = score;
                        incumbent = Some(solution);
                        stats.incumbent_updates += 1;
                    }
                }
                NodeEvaluation::Fractional {
                    bound,
                    children,
                    heuristic,
                } => {
                    if let Some((objective, solution)) = heuristic {
                        let score = to_score(objective);
                        if score < incumbent_score - self.config.absolute_gap {
                            debug!("node {index}: heuristic incumbent {objective}");
                            incumbent_score = score;
                            incumbent = Some(solution);
                            stats.incumbent_updates += 1;
                        }
                    }
                    let score = to_score(bound).max(inherited);
                    if self.cannot_improve(&*relaxation, score, incumbent_score) {
                        stats.dominated += 1;
                        prunes.push(PruneRecord {
                            reason: PruneReason::Dominated,
                            bound: Some(from_score(score)),
                            incumbent: Some(from_score(incumbent_score)),
                        });
                    } else {
                        stats.branched += 1;
                        trace!(
                            "node {index} (depth {depth}) bound {bound}: {} children",
                            children.len()
                        );
                        // Reverse so the first child is popped first from either frontier.
                        for child in children.into_iter().rev() {
                            slots.push(Slot {
                                node: child,
                                parent: Some(index),
                                depth: depth + 1,
                                score,
                            });
                            seq += 1;
                            frontier.push(OpenNode {
                                score,
                                seq,
                                index: slots.len() - 1,
                            });
                        }
                    }
                }
            }

            let lower = frontier
                .min_score()
                .map_or(incumbent_score, |s| s.min(incumbent_score));
            let (lo, hi) = match sense {
                ObjectiveSense::Minimize => (lower, incumbent_score),
                ObjectiveSense::Maximize => (-incumbent_score, -lower),
            };
            trace.push(BoundSample {
                nodes: stats.processed,
                lower: lo,
                upper: hi,
            });

            if relaxation.interrupted() {
                status = Some(SolveStatus::Interrupted);
                break;
            }
        }

        stats.left_open = frontier.len();
        let open_lower = frontier.min_score().unwrap_or(f64::INFINITY);
        let bound_score = open_lower.min(incumbent_score);
        let status = status.unwrap_or(if incumbent.is_some() {
            SolveStatus::Optimal
        } else {
            SolveStatus::Infeasible
        });
        let best_bound = match status {
            SolveStatus::InfeasibleOrUnbounded => match sense {
                ObjectiveSense::Minimize => f64::NEG_INFINITY,
                ObjectiveSense::Maximize => f64::INFINITY,
            },
            _ => from_score(bound_score),
        };
        let objective = incumbent.as_ref().map(|_| from_score(incumbent_score));
        let gap = objective.and_then(|obj| match sense {
            ObjectiveSense::Minimize => relative_gap_percent(best_bound, obj),
            ObjectiveSense::Maximize => relative_gap_percent(obj, best_bound),
        });

        info!(
            "branch and bound finished: {:?}, objective {:?}, bound {}, {} nodes",
            status, objective, best_bound, stats.processed
        );

        Ok(SearchReport {
            status,
            incumbent,
            objective,
            best_bound,
            gap,
            stats,
            prunes,
            trace,
        })
    }
}

/// A bound row added on the way down the tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchDecision {
    pub var: VarId,
    pub sense: ConstraintSense,
    pub bound: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MipNode {
    pub decision: Option<BranchDecision>,
}

/// Standalone MIP relaxation: LP relaxations of `root` solved through an oracle,
/// with branching rows, a pool of lazy constraints and an optional candidate handler.
pub struct MipRelaxation<'a, O: LinearProgramOracle + ?Sized> {
    root: &'a Model,
    oracle: &'a mut O,
    handler: Option<&'a mut dyn IntegerCandidateHandler>,
    lazy: Vec<Constraint>,
    branching: BranchingRule,
    integrality_tolerance: f64,
    terminated: bool,
    lp_iterations: usize,
}

impl<'a, O: LinearProgramOracle + ?Sized> MipRelaxation<'a, O> {
    pub fn new(root: &'a Model, oracle: &'a mut O) -> Self {
        Self {
            root,
            oracle,
            handler: None,
            lazy: Vec::new(),
            branching: BranchingRule::FirstFractional,
            integrality_tolerance: 1e-6,
            terminated: false,
            lp_iterations: 0,
        }
    }

    pub fn with_handler(mut self, handler: &'a mut dyn IntegerCandidateHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_branching(mut self, rule: BranchingRule) -> Self {
        self.branching = rule;
        self
    }

    pub fn with_integrality_tolerance(mut self, tolerance: f64) -> Self {
        self.integrality_tolerance = tolerance;
        self
    }

    /// Lazy constraints collected from the handler so far.
    pub fn lazy_constraints(&self) -> &[Constraint] {
        &self.lazy
    }

    pub fn lp_iterations(&self) -> usize {
        self.lp_iterations
    }

    fn node_model(&self, decisions: impl Iterator<Item = BranchDecision>) -> Result<Model> {
        let mut model = self.root.clone();
        for c in &self.lazy {
            model.add_constraint(c.name.clone(), c.expr.clone(), c.sense, c.rhs)?;
        }
        for d in decisions {
            model.add_constraint(
                format!("branch_{}", d.var.index()),
                LinExpr::new().term(d.var, 1.0),
                d.sense,
                d.bound,
            )?;
        }
        Ok(model)
    }

    /// Hands an integral point to the handler. Returns the lazy rows it violates.
    fn offer(&mut self, values: &[f64], objective: f64, view: SearchView) -> Result<Vec<Constraint>> {
        let Some(handler) = self.handler.as_mut() else {
            return Ok(Vec::new());
        };
        let mut candidate = Candidate::new(values, objective, view.best_bound);
        handler.on_candidate(&mut candidate)?;
        if candidate.termination_requested() {
            self.terminated = true;
        }
        let added = candidate.take_lazy_constraints();
        let violated: Vec<Constraint> = added
            .iter()
            .filter(|c| c.violation(values) > self.integrality_tolerance)
            .cloned()
            .collect();
        self.lazy.extend(added);
        Ok(violated)
    }
}

impl<O: LinearProgramOracle + ?Sized> Relaxation for MipRelaxation<'_, O> {
    type Node = MipNode;
    type Solution = Vec<f64>;

    fn sense(&self) -> ObjectiveSense {
        self.root.sense()
    }

    fn root(&mut self) -> MipNode {
        MipNode::default()
    }

    fn evaluate(
        &mut self,
        node: &mut MipNode,
        ancestors: &[&MipNode],
        view: SearchView,
        _ctx: &mut RunContext,
    ) -> Result<NodeEvaluation<MipNode, Vec<f64>>> {
        let decisions: Vec<BranchDecision> = ancestors
            .iter()
            .filter_map(|n| n.decision)
            .chain(node.decision)
            .collect();
        let mut model = self.node_model(decisions.iter().copied())?;
        let root = self.root;

        loop {
            let result = self.oracle.solve_relaxation(&model)?;
            self.lp_iterations += result.iterations();
            match result.status() {
                SolveStatus::Optimal => {}
                SolveStatus::Infeasible => return Ok(NodeEvaluation::Infeasible),
                SolveStatus::Unbounded | SolveStatus::InfeasibleOrUnbounded => {
                    return Ok(NodeEvaluation::Unbounded)
                }
                status => return Err(Error::RelaxationFailed(status)),
            }
            let objective = result.objective().unwrap_or(f64::NAN);
            let values = result.values().to_vec();

            let integers = root
                .vars()
                .iter()
                .enumerate()
                .filter(|(_, v)| v.var_type.is_integral())
                .map(|(j, _)| j);
            match self
                .branching
                .select(&values, integers, self.integrality_tolerance)
            {
                Some(j) => {
                    let value = values[j];
                    let var = VarId(j);
                    let children = vec![
                        MipNode {
                            decision: Some(BranchDecision {
                                var,
                                sense: ConstraintSense::LessEqual,
                                bound: value.floor(),
                            }),
                        },
                        MipNode {
                            decision: Some(BranchDecision {
                                var,
                                sense: ConstraintSense::GreaterEqual,
                                bound: value.ceil(),
                            }),
                        },
                    ];
                    return Ok(NodeEvaluation::Fractional {
                        bound: objective,
                        children,
                        heuristic: None,
                    });
                }
                None => {
                    let violated = self.offer(&values, objective, view)?;
                    if violated.is_empty() {
                        return Ok(NodeEvaluation::Integral {
                            objective,
                            solution: values,
                        });
                    }
                    if self.terminated {
                        return Ok(NodeEvaluation::Infeasible);
                    }
                    trace!("{} lazy constraints cut off the candidate; re-solving", violated.len());
                    for c in violated {
                        model.add_constraint(c.name, c.expr, c.sense, c.rhs)?;
                    }
                }
            }
        }
    }

    fn interrupted(&self) -> bool {
        self.terminated
    }
}
