use std::collections::HashSet;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::math::integer_linear::model::{ConstraintId, ConstraintSense, LinExpr, Model, VarId};
use crate::math::integer_linear::oracle::{SolveResult, SolveStatus};

/// Reduced costs and multiplier products below this magnitude count as zero.
const ZERO: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CutKind {
    Feasibility,
    Optimality,
}

/// Linear inequality over master variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Cut {
    pub kind: CutKind,
    pub expr: LinExpr,
    pub sense: ConstraintSense,
    pub rhs: f64,
}

impl Cut {
    /// Positive when `values` violate the cut.
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            ConstraintSense::LessEqual => lhs - self.rhs,
            ConstraintSense::GreaterEqual => self.rhs - lhs,
            ConstraintSense::Equal => (lhs - self.rhs).abs(),
        }
    }

    /// Scale-free fingerprint: coefficients divided by the largest magnitude, quantized.
    fn key(&self) -> CutKey {
        let expr = self.expr.compacted();
        let scale = expr
            .terms()
            .iter()
            .fold(0.0_f64, |acc, &(_, a)| acc.max(a.abs()));
        let scale = if scale > 0.0 { scale } else { self.rhs.abs().max(1.0) };
        let quantize = |v: f64| (v / scale / 1e-9).round() as i64;
        CutKey {
            sense: self.sense,
            terms: expr
                .terms()
                .iter()
                .map(|&(var, a)| (var.index(), quantize(a)))
                .collect(),
            rhs: quantize(self.rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CutKey {
    sense: ConstraintSense,
    terms: Vec<(usize, i64)>,
    rhs: i64,
}

/// Subproblem row whose right-hand side depends on master variables:
/// `rhs(y) = base + Σ coefficient · y`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkingRow {
    pub constraint: ConstraintId,
    pub base: f64,
    pub terms: Vec<(VarId, f64)>,
}

impl LinkingRow {
    pub fn rhs_at(&self, master_values: &[f64]) -> f64 {
        self.base
            + self
                .terms
                .iter()
                .map(|&(var, t)| t * master_values[var.index()])
                .sum::<f64>()
    }
}

/// Accumulates `rhs(y)` of every subproblem row weighted by `multipliers`, split into the
/// constant part and the master-variable part.
fn weighted_rhs(
    subproblem: &Model,
    linking: &[LinkingRow],
    multiplier: impl Fn(ConstraintId) -> Result<f64>,
) -> Result<(f64, LinExpr, Vec<f64>)> {
    let mut constant = 0.0;
    let mut expr = LinExpr::new();
    let mut column_weights = vec![0.0; subproblem.num_vars()];
    for (id, row) in subproblem.constraints() {
        let m = multiplier(id)?;
        if m == 0.0 {
            continue;
        }
        match linking.iter().find(|l| l.constraint == id) {
            Some(link) => {
                constant += m * link.base;
                for &(var, t) in &link.terms {
                    expr.add_term(var, m * t);
                }
            }
            None => constant += m * row.rhs,
        }
        for &(var, a) in row.expr.terms() {
            column_weights[var.index()] += m * a;
        }
    }
    Ok((constant, expr.compacted(), column_weights))
}

/// Feasibility cut `Σ λ rhs(y) ≤ Σ_j max_{x_j ∈ [l_j, u_j]} (λᵀA)_j x_j` from the Farkas
/// multipliers of an infeasible subproblem.
pub fn feasibility_cut(
    subproblem: &Model,
    linking: &[LinkingRow],
    result: &SolveResult,
) -> Result<Cut> {
    let (constant, expr, weights) =
        weighted_rhs(subproblem, linking, |id| result.farkas_dual(id))?;
    let mut box_max = 0.0;
    for (v, &g) in subproblem.vars().iter().zip(&weights) {
        if g.abs() <= ZERO {
            continue;
        }
        let reach = if g > 0.0 { g * v.upper } else { g * v.lower };
        if !reach.is_finite() {
            return Err(Error::CutDerivation(SolveStatus::Infeasible));
        }
        box_max += reach;
    }
    Ok(Cut {
        kind: CutKind::Feasibility,
        expr,
        sense: ConstraintSense::LessEqual,
        rhs: box_max - constant,
    })
}

/// Optimality cut `q ≥ Σ π rhs(y) + Σ_j min_{x_j ∈ [l_j, u_j]} d_j x_j` with reduced
/// costs `d = c − πᵀA` from the duals of an optimal subproblem.
pub fn optimality_cut(
    subproblem: &Model,
    linking: &[LinkingRow],
    surrogate: VarId,
    result: &SolveResult,
) -> Result<Cut> {
    let (constant, expr, weights) = weighted_rhs(subproblem, linking, |id| result.dual(id))?;
    let mut box_min = 0.0;
    for (v, &w) in subproblem.vars().iter().zip(&weights) {
        let d = v.objective - w;
        if d.abs() <= ZERO {
            continue;
        }
        let reach = if d > 0.0 { d * v.lower } else { d * v.upper };
        if !reach.is_finite() {
            return Err(Error::CutDerivation(SolveStatus::Optimal));
        }
        box_min += reach;
    }
    // q − Σ (πT) y ≥ Σ π base + box_min
    let mut cut_expr = LinExpr::new().term(surrogate, 1.0);
    for &(var, a) in expr.terms() {
        cut_expr.add_term(var, -a);
    }
    Ok(Cut {
        kind: CutKind::Optimality,
        expr: cut_expr.compacted(),
        sense: ConstraintSense::GreaterEqual,
        rhs: constant + box_min,
    })
}

/// Variable of a dual-form subproblem whose objective coefficient depends on master
/// variables: `cost(y) = base + Σ coefficient · y`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkingCost {
    pub var: VarId,
    pub base: f64,
    pub terms: Vec<(VarId, f64)>,
}

impl LinkingCost {
    pub fn cost_at(&self, master_values: &[f64]) -> f64 {
        self.base
            + self
                .terms
                .iter()
                .map(|&(var, t)| t * master_values[var.index()])
                .sum::<f64>()
    }
}

/// `Σ_j w_j cost_j(y)` over the variables of a dual subproblem, split into the constant
/// part and the master-variable part.
fn weighted_costs(
    dual: &Model,
    costs: &[LinkingCost],
    weight: impl Fn(VarId) -> Result<f64>,
) -> Result<(f64, LinExpr)> {
    let mut constant = 0.0;
    let mut expr = LinExpr::new();
    for (id, var) in dual.var_ids().zip(dual.vars()) {
        let w = weight(id)?;
        if w == 0.0 {
            continue;
        }
        match costs.iter().find(|c| c.var == id) {
            Some(link) => {
                constant += w * link.base;
                for &(y, t) in &link.terms {
                    expr.add_term(y, w * t);
                }
            }
            None => constant += w * var.objective,
        }
    }
    Ok((constant, expr.compacted()))
}

/// Feasibility cut `Σ_j r_j cost_j(y) ≤ 0` from an unbounded ray `r` of a maximizing
/// dual subproblem. Its feasible region does not depend on `y`, so `r` stays a ray
/// for every master candidate.
pub fn ray_feasibility_cut(
    dual: &Model,
    costs: &[LinkingCost],
    result: &SolveResult,
) -> Result<Cut> {
    let (constant, expr) = weighted_costs(dual, costs, |id| result.unbounded_ray(id))?;
    Ok(Cut {
        kind: CutKind::Feasibility,
        expr,
        sense: ConstraintSense::LessEqual,
        rhs: -constant,
    })
}

/// Optimality cut `q ≥ Σ_j π_j cost_j(y)` from the optimal point `π` of a maximizing
/// dual subproblem.
pub fn dual_optimality_cut(
    dual: &Model,
    costs: &[LinkingCost],
    surrogate: VarId,
    result: &SolveResult,
) -> Result<Cut> {
    let (constant, expr) = weighted_costs(dual, costs, |id| {
        result.value(id).ok_or(Error::UnknownVariable(id.index()))
    })?;
    let mut cut_expr = LinExpr::new().term(surrogate, 1.0);
    for &(var, a) in expr.terms() {
        cut_expr.add_term(var, -a);
    }
    Ok(Cut {
        kind: CutKind::Optimality,
        expr: cut_expr.compacted(),
        sense: ConstraintSense::GreaterEqual,
        rhs: constant,
    })
}

/// Deduplicated store of Benders cuts.
///
/// A cut is admitted only when it is violated by more than `tolerance` at the
/// candidate that produced it. Producing an already stored cut while it is still
/// violated means the loop cannot make progress.
#[derive(Debug, Clone)]
pub struct CutPool {
    cuts: Vec<Cut>,
    seen: HashSet<CutKey>,
    applied: usize,
    tolerance: f64,
}

impl CutPool {
    pub fn new(tolerance: f64) -> Self {
        Self {
            cuts: Vec::new(),
            seen: HashSet::new(),
            applied: 0,
            tolerance,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Returns `Ok(true)` when the cut was stored, `Ok(false)` when it is not violated enough.
    pub fn admit(&mut self, cut: Cut, candidate: &[f64], iteration: usize) -> Result<bool> {
        let violation = cut.violation(candidate);
        if violation <= self.tolerance {
            trace!("{:?} cut violated by {violation:e} only; skipped", cut.kind);
            return Ok(false);
        }
        if !self.seen.insert(cut.key()) {
            return Err(Error::CutStagnation {
                kind: cut.kind,
                iteration,
            });
        }
        debug!(
            "iteration {iteration}: {:?} cut {} {} (violation {violation:e})",
            cut.kind,
            cut.sense,
            cut.rhs
        );
        self.cuts.push(cut);
        Ok(true)
    }

    /// Appends the cuts added since the previous call to `model`.
    pub fn apply_to(&mut self, model: &mut Model) -> Result<usize> {
        let pending = &self.cuts[self.applied..];
        for (offset, cut) in pending.iter().enumerate() {
            let name = match cut.kind {
                CutKind::Feasibility => format!("feasibility_cut_{}", self.applied + offset),
                CutKind::Optimality => format!("optimality_cut_{}", self.applied + offset),
            };
            model.add_constraint(name, cut.expr.clone(), cut.sense, cut.rhs)?;
        }
        let added = pending.len();
        self.applied = self.cuts.len();
        Ok(added)
    }

    pub fn cuts(&self) -> &[Cut] {
        &self.cuts
    }

    pub fn last(&self) -> Option<&Cut> {
        self.cuts.last()
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    pub fn count(&self, kind: CutKind) -> usize {
        self.cuts.iter().filter(|c| c.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::integer_linear::model::{ObjectiveSense, VarType};
    use crate::math::integer_linear::oracle::LinearProgramOracle;
    use crate::math::integer_linear::SimplexOracle;
    use approx::assert_relative_eq;

    // Master variable y in [0, 10]; subproblem: min 2x s.t. x ≥ 7 − y, x ∈ [0, 4].
    fn instance() -> (Model, LinkingRow) {
        let mut sub = Model::new("sub", ObjectiveSense::Minimize);
        let x = sub.add_var("x", 0.0, 4.0, 2.0, VarType::Continuous).unwrap();
        let row = sub.add_ge("cover", LinExpr::new().term(x, 1.0), 7.0).unwrap();
        sub.set_request_certificates(true);
        let link = LinkingRow {
            constraint: row,
            base: 7.0,
            terms: vec![(VarId(0), -1.0)],
        };
        (sub, link)
    }

    fn at(sub: &Model, link: &LinkingRow, y: f64) -> Model {
        let mut m = sub.clone();
        m.set_rhs(link.constraint, link.rhs_at(&[y, 0.0])).unwrap();
        m
    }

    #[test]
    fn test_feasibility_cut_separates_candidate_only() {
        let (sub, link) = instance();
        let candidate = [1.0, 0.0];
        let model = at(&sub, &link, candidate[0]);
        let result = SimplexOracle::default().solve(&model).unwrap();
        assert_eq!(result.status(), SolveStatus::Infeasible);

        let cut = feasibility_cut(&model, std::slice::from_ref(&link), &result).unwrap();
        assert!(cut.violation(&candidate) > 1e-6);
        // The subproblem is feasible exactly for y ≥ 3; the cut must keep all of them.
        for y in [3.0, 4.5, 10.0] {
            assert!(cut.violation(&[y, 0.0]) <= 1e-9, "cut removes feasible y = {y}");
        }
        assert!(cut.violation(&[2.5, 0.0]) > 0.0);
    }

    #[test]
    fn test_optimality_cut_is_tight_and_valid() {
        let (sub, link) = instance();
        let model = at(&sub, &link, 5.0);
        let result = SimplexOracle::default().solve(&model).unwrap();
        assert_relative_eq!(result.objective().unwrap(), 4.0, epsilon = 1e-9);

        let q = VarId(1);
        let cut = optimality_cut(&model, std::slice::from_ref(&link), q, &result).unwrap();
        // Tight at the candidate: q ≥ v(5) = 4.
        assert_relative_eq!(cut.violation(&[5.0, 4.0]), 0.0, epsilon = 1e-9);
        // Valid lower bound of v(y) = 2 (7 − y) on the feasible range.
        for y in [3.0, 4.0, 6.0, 7.0] {
            let v = 2.0 * (7.0_f64 - y).max(0.0);
            assert!(cut.violation(&[y, v]) <= 1e-9);
        }
    }

    // Dual of the instance above: max (7 − y) u − 4 w  s.t.  u − w ≤ 2,  u, w ≥ 0.
    fn dual_instance() -> (Model, LinkingCost) {
        let mut dual = Model::new("dual sub", ObjectiveSense::Maximize);
        let u = dual.add_var("u", 0.0, f64::INFINITY, 7.0, VarType::Continuous).unwrap();
        let w = dual.add_var("w", 0.0, f64::INFINITY, -4.0, VarType::Continuous).unwrap();
        dual.add_le("x", LinExpr::new().term(u, 1.0).term(w, -1.0), 2.0).unwrap();
        dual.set_request_certificates(true);
        let cost = LinkingCost {
            var: u,
            base: 7.0,
            terms: vec![(VarId(0), -1.0)],
        };
        (dual, cost)
    }

    fn dual_at(dual: &Model, cost: &LinkingCost, y: f64) -> Model {
        let mut m = dual.clone();
        m.set_objective_coefficient(cost.var, cost.cost_at(&[y, 0.0])).unwrap();
        m
    }

    #[test]
    fn test_ray_cut_separates_candidate_only() {
        let (dual, cost) = dual_instance();
        let model = dual_at(&dual, &cost, 1.0);
        let result = SimplexOracle::default().solve(&model).unwrap();
        assert_eq!(result.status(), SolveStatus::Unbounded);

        let cut = ray_feasibility_cut(&model, std::slice::from_ref(&cost), &result).unwrap();
        assert!(cut.violation(&[1.0, 0.0]) > 1e-6);
        for y in [3.0, 4.5, 10.0] {
            assert!(cut.violation(&[y, 0.0]) <= 1e-9, "ray cut removes feasible y = {y}");
        }
    }

    #[test]
    fn test_dual_optimality_cut_is_tight_and_valid() {
        let (dual, cost) = dual_instance();
        let model = dual_at(&dual, &cost, 5.0);
        let result = SimplexOracle::default().solve(&model).unwrap();
        assert_relative_eq!(result.objective().unwrap(), 4.0, epsilon = 1e-9);

        let cut = dual_optimality_cut(&model, std::slice::from_ref(&cost), VarId(1), &result).unwrap();
        assert_relative_eq!(cut.violation(&[5.0, 4.0]), 0.0, epsilon = 1e-9);
        for y in [3.0, 4.0, 6.0, 7.0] {
            let v = 2.0 * (7.0_f64 - y).max(0.0);
            assert!(cut.violation(&[y, v]) <= 1e-9);
        }
    }

    #[test]
    fn test_dual_cuts_need_certificates() {
        let (mut dual, cost) = dual_instance();
        dual.set_request_certificates(false);
        let model = dual_at(&dual, &cost, 1.0);
        let result = SimplexOracle::default().solve(&model).unwrap();
        assert!(matches!(
            ray_feasibility_cut(&model, &[cost], &result),
            Err(Error::MissingCertificate { .. })
        ));
    }

    #[test]
    fn test_pool_rejects_weak_and_duplicate_cuts() {
        let mut pool = CutPool::new(1e-6);
        let cut = Cut {
            kind: CutKind::Optimality,
            expr: LinExpr::new().term(VarId(0), 1.0),
            sense: ConstraintSense::GreaterEqual,
            rhs: 2.0,
        };
        assert!(!pool.admit(cut.clone(), &[2.0], 1).unwrap());
        assert!(pool.admit(cut.clone(), &[1.0], 1).unwrap());

        let scaled = Cut {
            expr: LinExpr::new().term(VarId(0), 3.0),
            rhs: 6.0,
            ..cut
        };
        assert!(matches!(
            pool.admit(scaled, &[1.0], 2),
            Err(Error::CutStagnation { kind: CutKind::Optimality, iteration: 2 })
        ));
        assert_eq!(pool.count(CutKind::Optimality), 1);
    }

    #[test]
    fn test_apply_to_adds_each_cut_once() {
        let mut master = Model::new("master", ObjectiveSense::Minimize);
        let y = master.add_var("y", 0.0, 10.0, 1.0, VarType::Integer).unwrap();
        let mut pool = CutPool::new(1e-6);
        pool.admit(
            Cut {
                kind: CutKind::Feasibility,
                expr: LinExpr::new().term(y, -1.0),
                sense: ConstraintSense::LessEqual,
                rhs: -3.0,
            },
            &[0.0],
            1,
        )
        .unwrap();
        assert_eq!(pool.apply_to(&mut master).unwrap(), 1);
        assert_eq!(pool.apply_to(&mut master).unwrap(), 0);
        assert_eq!(master.num_constraints(), 1);
    }
}
