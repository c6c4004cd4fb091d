use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::math::integer_linear::{
    BendersConfig, BendersCoordinator, BendersMode, BendersProblem, BranchAndBoundConfig,
    BranchAndBoundTree, BranchAndPrice, BranchAndPriceConfig, Candidate, ColumnGenerationConfig,
    ColumnGenerationEngine, ConstraintSense, CuttingStockInstance, DivingRoundingHeuristic,
    IntegerCandidateHandler, KnapsackPricer, LinExpr, LinearProgramOracle, LinkingRow,
    MipRelaxation, Model, NodeSelection, ObjectiveSense, PatternMatrix, PruneReason, RunContext,
    SearchReport, SimplexOracle, SolveStatus, VarId, VarType,
};
use crate::Result;

/// Best objective over all 0/1 assignments, or `None` if none is feasible.
fn brute_force_binary(model: &Model) -> Option<f64> {
    let n = model.num_vars();
    let mut best: Option<f64> = None;
    for mask in 0u32..(1 << n) {
        let values: Vec<f64> = (0..n).map(|j| f64::from((mask >> j) & 1)).collect();
        if !model.is_feasible(&values, 1e-9) {
            continue;
        }
        let value = model.objective_value(&values);
        best = Some(match (best, model.sense()) {
            (None, _) => value,
            (Some(b), ObjectiveSense::Maximize) => b.max(value),
            (Some(b), ObjectiveSense::Minimize) => b.min(value),
        });
    }
    best
}

fn search(model: &Model, selection: NodeSelection) -> SearchReport<Vec<f64>> {
    let mut oracle = SimplexOracle::default();
    let mut relaxation = MipRelaxation::new(model, &mut oracle);
    BranchAndBoundTree::new(BranchAndBoundConfig {
        node_selection: selection,
        ..BranchAndBoundConfig::default()
    })
    .search(&mut relaxation, &mut RunContext::new())
    .unwrap()
}

fn random_binary_model(rng: &mut ChaCha8Rng, n: usize, sense: ObjectiveSense) -> Model {
    let mut model = Model::new("random", sense);
    let vars: Vec<_> = (0..n)
        .map(|j| {
            let cost = f64::from(rng.gen_range(1..20u32));
            model.add_var(format!("b{j}"), 0.0, 1.0, cost, VarType::Binary).unwrap()
        })
        .collect();
    for r in 0..3 {
        let expr: LinExpr = vars
            .iter()
            .map(|&v| (v, f64::from(rng.gen_range(0..10u32))))
            .collect();
        let total: f64 = expr.terms().iter().map(|t| t.1).sum();
        match sense {
            ObjectiveSense::Maximize => {
                model.add_le(format!("cap{r}"), expr, (total * 0.5).floor()).unwrap();
            }
            ObjectiveSense::Minimize => {
                model.add_ge(format!("cover{r}"), expr, (total * 0.4).ceil()).unwrap();
            }
        }
    }
    model
}

#[test]
fn test_branch_and_bound_matches_brute_force_on_four_binaries() {
    // max 5a + 4b + 3c + 7d  s.t.  2a + 3b + c + 4d ≤ 6,  a + b + c + d ≤ 3
    let mut model = Model::new("four binaries", ObjectiveSense::Maximize);
    let profit = [5.0, 4.0, 3.0, 7.0];
    let weight = [2.0, 3.0, 1.0, 4.0];
    let vars: Vec<_> = profit
        .iter()
        .enumerate()
        .map(|(j, &p)| model.add_var(format!("x{j}"), 0.0, 1.0, p, VarType::Binary).unwrap())
        .collect();
    model
        .add_le("weight", vars.iter().zip(weight).map(|(&v, w)| (v, w)).collect(), 6.0)
        .unwrap();
    model
        .add_le("count", vars.iter().map(|&v| (v, 1.0)).collect(), 3.0)
        .unwrap();

    let expected = brute_force_binary(&model).unwrap();
    assert_relative_eq!(expected, 12.0);
    for selection in [NodeSelection::DepthFirst, NodeSelection::BestBound] {
        let report = search(&model, selection);
        assert_eq!(report.status, SolveStatus::Optimal);
        assert_relative_eq!(report.objective.unwrap(), expected, epsilon = 1e-9);
        assert!(model.is_feasible(report.incumbent.as_ref().unwrap(), 1e-9));
    }
}

#[test]
fn test_branch_and_bound_matches_brute_force_on_random_instances() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for round in 0..12 {
        let sense = if round % 2 == 0 {
            ObjectiveSense::Maximize
        } else {
            ObjectiveSense::Minimize
        };
        let model = random_binary_model(&mut rng, 7, sense);
        let expected = brute_force_binary(&model);
        for selection in [NodeSelection::DepthFirst, NodeSelection::BestBound] {
            let report = search(&model, selection);
            match expected {
                Some(value) => {
                    assert_eq!(report.status, SolveStatus::Optimal, "round {round}");
                    assert_relative_eq!(report.objective.unwrap(), value, epsilon = 1e-7);
                }
                None => assert_eq!(report.status, SolveStatus::Infeasible, "round {round}"),
            }
        }
    }
}

#[test]
fn test_pruned_nodes_are_dominated_or_infeasible() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for _ in 0..6 {
        let model = random_binary_model(&mut rng, 8, ObjectiveSense::Minimize);
        let report = search(&model, NodeSelection::BestBound);
        if report.status != SolveStatus::Optimal {
            continue;
        }
        let optimum = report.objective.unwrap();
        for prune in &report.prunes {
            match prune.reason {
                PruneReason::Infeasible => assert!(prune.bound.is_none()),
                PruneReason::Dominated => {
                    let bound = prune.bound.unwrap();
                    let incumbent = prune.incumbent.unwrap();
                    assert!(bound >= incumbent - 1e-9);
                    assert!(bound >= optimum - 1e-9);
                }
                PruneReason::Integral => assert!(prune.bound.unwrap() >= optimum - 1e-9),
            }
        }
        let mut previous = f64::NEG_INFINITY;
        for sample in &report.trace {
            assert!(sample.lower <= sample.upper + 1e-9);
            assert!(sample.lower >= previous - 1e-9);
            previous = sample.lower;
        }
    }
}

/// Task selection with five stage capacities, exclusions and prerequisites.
fn task_selection() -> Model {
    let values = [
        200.0, 3.0, 20.0, 50.0, 70.0, 20.0, 5.0, 10.0, 200.0, 150.0, 18.0, 8.0, 300.0, 185.0,
    ];
    let stages: [([f64; 14], f64); 5] = [
        ([6., 2., 3., 0., 0., 0., 1., 0., 4., 0., 0., 5., 0., 0.], 10.0),
        ([0., 3., 5., 0., 5., 0., 8., 0., 5., 8., 0., 7., 1., 4.], 12.0),
        ([0., 0., 0., 0., 8., 1., 0., 0., 0., 4., 2., 0., 4., 5.], 14.0),
        ([0., 0., 0., 0., 0., 8., 0., 5., 0., 0., 7., 0., 1., 3.], 14.0),
        ([0., 0., 0., 10., 0., 4., 0., 0., 0., 0., 0., 0., 1., 3.], 14.0),
    ];
    let mut model = Model::new("task selection", ObjectiveSense::Maximize);
    let x: Vec<_> = values
        .iter()
        .enumerate()
        .map(|(j, &v)| model.add_var(format!("task{}", j + 1), 0.0, 1.0, v, VarType::Binary).unwrap())
        .collect();
    for (s, (row, cap)) in stages.iter().enumerate() {
        let expr = x.iter().zip(row).filter(|&(_, &a)| a != 0.0).map(|(&v, &a)| (v, a)).collect();
        model.add_le(format!("stage{}", s + 1), expr, *cap).unwrap();
    }
    // At most one of each pair (1-based task numbers).
    for (a, b) in [(4, 5), (8, 11), (9, 14)] {
        model
            .add_le(format!("excl_{a}_{b}"), LinExpr::new().term(x[a - 1], 1.0).term(x[b - 1], 1.0), 1.0)
            .unwrap();
    }
    // Task `a` requires task `b`.
    for (a, b) in [(11, 2), (4, 3), (5, 3), (6, 3), (7, 3)] {
        model
            .add_le(format!("req_{a}_{b}"), LinExpr::new().term(x[a - 1], 1.0).term(x[b - 1], -1.0), 0.0)
            .unwrap();
    }
    model
}

#[test]
fn test_task_selection_matches_brute_force() {
    let model = task_selection();
    let expected = brute_force_binary(&model).unwrap();
    let result = SimplexOracle::default().solve(&model).unwrap();
    assert_eq!(result.status(), SolveStatus::Optimal);
    assert_relative_eq!(result.objective().unwrap(), expected, epsilon = 1e-7);
    assert!(model.is_feasible(result.values(), 1e-7));
}

/// Caps `x + y ≤ 3` lazily at every candidate that violates it.
struct CapHandler {
    calls: usize,
}

impl IntegerCandidateHandler for CapHandler {
    fn on_candidate(&mut self, candidate: &mut Candidate<'_>) -> Result<()> {
        self.calls += 1;
        let expr = LinExpr::new().term(VarId(0), 1.0).term(VarId(1), 1.0);
        if expr.evaluate(candidate.values()) > 3.0 + 1e-9 {
            candidate.add_lazy_constraint("cap", expr, ConstraintSense::LessEqual, 3.0);
        }
        Ok(())
    }
}

#[test]
fn test_lazy_constraints_match_explicit_model() {
    let mut model = Model::new("lazy", ObjectiveSense::Maximize);
    let x = model.add_var("x", 0.0, 10.0, 2.0, VarType::Integer).unwrap();
    let y = model.add_var("y", 0.0, 10.0, 3.0, VarType::Integer).unwrap();
    model
        .add_le("mix", LinExpr::new().term(x, 2.0).term(y, 3.0), 17.0)
        .unwrap();

    let mut handler = CapHandler { calls: 0 };
    let lazy = SimplexOracle::default()
        .solve_with_candidates(&model, &mut handler)
        .unwrap();

    let mut explicit = model.clone();
    explicit
        .add_le("cap", LinExpr::new().term(x, 1.0).term(y, 1.0), 3.0)
        .unwrap();
    let direct = SimplexOracle::default().solve(&explicit).unwrap();

    assert_eq!(lazy.status(), SolveStatus::Optimal);
    assert!(handler.calls >= 1);
    assert_relative_eq!(lazy.objective().unwrap(), direct.objective().unwrap(), epsilon = 1e-9);
    assert!(explicit.is_feasible(lazy.values(), 1e-9));
}

/// Fund allocation: keep `y` in cash at 4.5 % or invest up to 100 in each of ten
/// funds returning 2 % .. 11 %, with 1000 available in total. Minimization form.
fn investment_problem() -> (BendersProblem, Model) {
    let returns: Vec<f64> = (0..10).map(|i| 1.0 + 0.01 * f64::from(i + 1)).collect();

    let mut master = Model::new("cash", ObjectiveSense::Minimize);
    let y = master.add_var("y", 0.0, 1000.0, -1.045, VarType::Integer).unwrap();
    let q = master.add_var("q", -1100.0, f64::INFINITY, 1.0, VarType::Continuous).unwrap();

    let mut sub = Model::new("funds", ObjectiveSense::Minimize);
    let funds: Vec<_> = returns
        .iter()
        .enumerate()
        .map(|(i, &r)| sub.add_var(format!("fund{i}"), 0.0, 100.0, -r, VarType::Continuous).unwrap())
        .collect();
    let budget = sub
        .add_le("budget", funds.iter().map(|&f| (f, 1.0)).collect(), 1000.0)
        .unwrap();
    let link = LinkingRow {
        constraint: budget,
        base: 1000.0,
        terms: vec![(y, -1.0)],
    };

    let mut direct = Model::new("investment", ObjectiveSense::Maximize);
    let dy = direct.add_var("y", 0.0, 1000.0, 1.045, VarType::Integer).unwrap();
    let mut total = LinExpr::new().term(dy, 1.0);
    for (i, &r) in returns.iter().enumerate() {
        let f = direct.add_var(format!("fund{i}"), 0.0, 100.0, r, VarType::Continuous).unwrap();
        total.add_term(f, 1.0);
    }
    direct.add_le("budget", total, 1000.0).unwrap();

    (BendersProblem::new(master, q, sub, vec![link]).unwrap(), direct)
}

#[test]
fn test_benders_matches_direct_mip() {
    let (problem, direct) = investment_problem();
    let direct = SimplexOracle::default().solve(&direct).unwrap();
    assert_relative_eq!(direct.objective().unwrap(), 1063.0, epsilon = 1e-6);

    for mode in [BendersMode::Eager, BendersMode::Lazy] {
        let mut coordinator = BendersCoordinator::new(
            SimplexOracle::default(),
            SimplexOracle::default(),
            BendersConfig {
                mode,
                ..BendersConfig::default()
            },
        );
        let mut ctx = RunContext::new();
        let report = coordinator.run(&problem, &mut ctx).unwrap();
        assert_eq!(report.status, SolveStatus::Optimal, "{mode:?}");
        assert_relative_eq!(report.objective.unwrap(), -1063.0, epsilon = 1e-5);
        assert_relative_eq!(report.master_values[0], 400.0, epsilon = 1e-6);
        let invested: f64 = report.subproblem_values.iter().sum();
        assert_relative_eq!(invested, 600.0, epsilon = 1e-6);
        assert!(report.optimality_cuts >= 1);
        assert!(ctx.subproblem_solves >= report.optimality_cuts);
    }
}

#[test]
fn test_benders_bounds_are_monotone() {
    let (problem, _) = investment_problem();
    let mut coordinator = BendersCoordinator::new(
        SimplexOracle::default(),
        SimplexOracle::default(),
        BendersConfig::default(),
    );
    let report = coordinator.run(&problem, &mut RunContext::new()).unwrap();
    assert!(!report.trace.is_empty());
    for pair in report.trace.windows(2) {
        assert!(pair[1].lower_bound >= pair[0].lower_bound - 1e-9);
        assert!(pair[1].upper_bound <= pair[0].upper_bound + 1e-9);
    }
    for it in &report.trace {
        assert!(it.lower_bound <= it.upper_bound + 1e-6);
    }
    let last = report.trace.last().unwrap();
    assert!(last.upper_bound - last.lower_bound <= 1e-6);
}

fn roll_instance() -> CuttingStockInstance {
    CuttingStockInstance::new(115, vec![25, 40, 50, 55, 70], vec![50, 136, 114, 80, 89]).unwrap()
}

/// Every non-empty pattern that fits a roll.
fn all_patterns(instance: &CuttingStockInstance) -> Vec<Vec<u32>> {
    fn walk(i: usize, capacity: u32, sizes: &[u32], current: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
        if i == sizes.len() {
            if current.iter().any(|&c| c > 0) {
                out.push(current.clone());
            }
            return;
        }
        for count in 0..=capacity / sizes[i] {
            current[i] = count;
            walk(i + 1, capacity - count * sizes[i], sizes, current, out);
        }
        current[i] = 0;
    }
    let mut out = Vec::new();
    let mut current = vec![0; instance.num_types()];
    walk(0, instance.width, &instance.sizes, &mut current, &mut out);
    out
}

fn engine() -> ColumnGenerationEngine<SimplexOracle, KnapsackPricer> {
    ColumnGenerationEngine::new(
        SimplexOracle::default(),
        KnapsackPricer::default(),
        ColumnGenerationConfig::default(),
    )
}

#[test]
fn test_column_generation_equals_full_enumeration() {
    let instance = roll_instance();

    let patterns = all_patterns(&instance);
    let mut full = Model::new("all patterns", ObjectiveSense::Minimize);
    let vars: Vec<_> = (0..patterns.len())
        .map(|j| full.add_var(format!("x{j}"), 0.0, f64::INFINITY, 1.0, VarType::Continuous).unwrap())
        .collect();
    for (i, &d) in instance.demands.iter().enumerate() {
        let expr = patterns
            .iter()
            .zip(&vars)
            .filter(|(p, _)| p[i] > 0)
            .map(|(p, &v)| (v, f64::from(p[i])))
            .collect();
        full.add_ge(format!("demand_{i}"), expr, f64::from(d)).unwrap();
    }
    let enumerated = SimplexOracle::default().solve(&full).unwrap();

    let mut matrix = PatternMatrix::initial(&instance).unwrap();
    let mut ctx = RunContext::new();
    let outcome = engine()
        .solve(&instance, &instance.demands, &mut matrix, &[], &mut ctx)
        .unwrap();
    assert_eq!(outcome.status, SolveStatus::Optimal);
    assert_relative_eq!(
        outcome.objective.unwrap(),
        enumerated.objective().unwrap(),
        epsilon = 1e-6
    );
    assert!(matrix.len() < patterns.len());
    assert_eq!(ctx.columns_added, outcome.columns_added);
    assert!(outcome.objective.unwrap() >= instance.material_bound() - 1e-6);
}

#[test]
fn test_pool_mode_reaches_the_same_bound() {
    let instance = roll_instance();
    let mut single = PatternMatrix::initial(&instance).unwrap();
    let one = engine()
        .solve(&instance, &instance.demands, &mut single, &[], &mut RunContext::new())
        .unwrap();

    let mut pooled = PatternMatrix::initial(&instance).unwrap();
    let mut wide = ColumnGenerationEngine::new(
        SimplexOracle::default(),
        KnapsackPricer::default(),
        ColumnGenerationConfig {
            pool_size: 4,
            ..ColumnGenerationConfig::default()
        },
    );
    let many = wide
        .solve(&instance, &instance.demands, &mut pooled, &[], &mut RunContext::new())
        .unwrap();
    assert_relative_eq!(one.objective.unwrap(), many.objective.unwrap(), epsilon = 1e-6);
    assert!(many.columns_added >= 1);
}

#[test]
fn test_diving_is_feasible_and_above_the_lp_bound() {
    let instance = roll_instance();
    let mut patterns = PatternMatrix::initial(&instance).unwrap();
    let mut engine = engine();
    let mut ctx = RunContext::new();
    let lp = engine
        .solve(&instance, &instance.demands, &mut patterns, &[], &mut ctx)
        .unwrap();

    let rounded = DivingRoundingHeuristic::default()
        .round(&mut engine, &instance, &mut patterns, &lp.quantities, &mut ctx)
        .unwrap();
    let covered = patterns.coverage(&rounded.quantities);
    for (c, &d) in covered.iter().zip(&instance.demands) {
        assert!(*c >= f64::from(d));
    }
    assert!(rounded.quantities.iter().all(|q| q.fract() == 0.0 && *q >= 0.0));
    assert!(rounded.objective >= lp.objective.unwrap() - 1e-6);
}

#[test]
fn test_branch_and_price_packs_the_roll_instance() {
    let instance = roll_instance();
    let mut bp = BranchAndPrice::new(
        instance.clone(),
        SimplexOracle::default(),
        KnapsackPricer::default(),
        BranchAndPriceConfig {
            node_limit: Some(200),
            ..BranchAndPriceConfig::default()
        },
    )
    .unwrap();
    let report = bp.solve(&mut RunContext::new()).unwrap();
    assert!(matches!(report.status, SolveStatus::Optimal | SolveStatus::NodeLimit));

    let packing = report.incumbent.unwrap();
    assert!(packing.covers(&instance));
    for pattern in &packing.patterns {
        let used: u32 = pattern.iter().zip(&instance.sizes).map(|(a, s)| a * s).sum();
        assert!(used <= instance.width);
    }
    let lp = report.lp_bound.unwrap();
    assert!(f64::from(packing.rolls) >= (lp - 1e-6).ceil());
    assert!(report.integral_lower_bound.unwrap() <= f64::from(packing.rolls));
    if report.status == SolveStatus::Optimal {
        assert!(report.assessment.is_proven());
    }
}
