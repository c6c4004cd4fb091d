use std::fmt;

use crate::error::{Error, Result};

/// Handle of a decision variable. Only meaningful for the model that issued it
/// and for clones of that model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of a constraint. Ids of removed constraints are never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub(crate) usize);

impl ConstraintId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Continuous,
    Integer,
    Binary,
}

impl VarType {
    pub fn is_integral(self) -> bool {
        !matches!(self, VarType::Continuous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveSense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintSense {
    LessEqual,
    GreaterEqual,
    Equal,
}

impl fmt::Display for ConstraintSense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConstraintSense::LessEqual => "<=",
            ConstraintSense::GreaterEqual => ">=",
            ConstraintSense::Equal => "=",
        };
        f.write_str(symbol)
    }
}

/// Sparse linear expression `Σ coefficient · variable`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    terms: Vec<(VarId, f64)>,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`LinExpr::add_term`].
    pub fn term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        self.terms.push((var, coefficient));
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(var, coefficient)| coefficient * values[var.0])
            .sum()
    }

    /// Merges repeated variables and drops zero coefficients. Terms end up sorted by id.
    pub fn compacted(&self) -> Self {
        let mut terms = self.terms.clone();
        terms.sort_by_key(|&(var, _)| var);
        let mut merged: Vec<(VarId, f64)> = Vec::with_capacity(terms.len());
        for (var, coefficient) in terms {
            match merged.last_mut() {
                Some((last, total)) if *last == var => *total += coefficient,
                _ => merged.push((var, coefficient)),
            }
        }
        merged.retain(|&(_, coefficient)| coefficient != 0.0);
        Self { terms: merged }
    }
}

impl FromIterator<(VarId, f64)> for LinExpr {
    fn from_iter<I: IntoIterator<Item = (VarId, f64)>>(iter: I) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub objective: f64,
    pub var_type: VarType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub expr: LinExpr,
    pub sense: ConstraintSense,
    pub rhs: f64,
}

impl Constraint {
    /// Amount by which `values` violate the row; zero or negative when satisfied.
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            ConstraintSense::LessEqual => lhs - self.rhs,
            ConstraintSense::GreaterEqual => self.rhs - lhs,
            ConstraintSense::Equal => (lhs - self.rhs).abs(),
        }
    }
}

/// Parameters read by the solving backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveParams {
    /// Compute Farkas certificates for infeasible LPs and rays for unbounded ones.
    pub request_certificates: bool,
}

/// A mutable linear or mixed-integer program.
///
/// Every constraint refers only to variables of this model, and every coefficient,
/// objective coefficient and right-hand side is finite. Bounds may be infinite.
/// `Clone` produces an independent deep copy.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    sense: ObjectiveSense,
    vars: Vec<Variable>,
    constraints: Vec<Option<Constraint>>,
    params: SolveParams,
}

fn check_bounds(name: &str, var_type: VarType, lower: f64, upper: f64) -> Result<(f64, f64)> {
    let (lower, upper) = match var_type {
        VarType::Binary => (lower.max(0.0), upper.min(1.0)),
        _ => (lower, upper),
    };
    if lower.is_nan() || upper.is_nan() || lower > upper || lower == f64::INFINITY
        || upper == f64::NEG_INFINITY
    {
        return Err(Error::InconsistentBounds {
            name: name.to_string(),
            lower,
            upper,
        });
    }
    Ok((lower, upper))
}

impl Model {
    pub fn new(name: impl Into<String>, sense: ObjectiveSense) -> Self {
        Self {
            name: name.into(),
            sense,
            vars: Vec::new(),
            constraints: Vec::new(),
            params: SolveParams::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sense(&self) -> ObjectiveSense {
        self.sense
    }

    pub fn set_sense(&mut self, sense: ObjectiveSense) {
        self.sense = sense;
    }

    pub fn params(&self) -> SolveParams {
        self.params
    }

    pub fn set_request_certificates(&mut self, request: bool) {
        self.params.request_certificates = request;
    }

    /// Adds a variable. Binary bounds are clamped to `[0, 1]`.
    pub fn add_var(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        objective: f64,
        var_type: VarType,
    ) -> Result<VarId> {
        let name = name.into();
        let (lower, upper) = check_bounds(&name, var_type, lower, upper)?;
        if !objective.is_finite() {
            return Err(Error::non_finite(
                format!("objective coefficient of `{name}`"),
                objective,
            ));
        }
        self.vars.push(Variable {
            name,
            lower,
            upper,
            objective,
            var_type,
        });
        Ok(VarId(self.vars.len() - 1))
    }

    /// Adds a variable together with its coefficients in existing constraints.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        objective: f64,
        var_type: VarType,
        entries: &[(ConstraintId, f64)],
    ) -> Result<VarId> {
        for &(id, coefficient) in entries {
            self.constraint(id)?;
            if !coefficient.is_finite() {
                return Err(Error::non_finite(
                    format!("column coefficient in constraint {}", id.0),
                    coefficient,
                ));
            }
        }
        let var = self.add_var(name, lower, upper, objective, var_type)?;
        for &(id, coefficient) in entries {
            if let Some(Some(constraint)) = self.constraints.get_mut(id.0) {
                constraint.expr.add_term(var, coefficient);
            }
        }
        Ok(var)
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: LinExpr,
        sense: ConstraintSense,
        rhs: f64,
    ) -> Result<ConstraintId> {
        let name = name.into();
        if !rhs.is_finite() {
            return Err(Error::non_finite(format!("right-hand side of `{name}`"), rhs));
        }
        for &(var, coefficient) in expr.terms() {
            if var.0 >= self.vars.len() {
                return Err(Error::UnknownVariable(var.0));
            }
            if !coefficient.is_finite() {
                return Err(Error::non_finite(
                    format!("coefficient of `{}` in `{name}`", self.vars[var.0].name),
                    coefficient,
                ));
            }
        }
        self.constraints.push(Some(Constraint {
            name,
            expr: expr.compacted(),
            sense,
            rhs,
        }));
        Ok(ConstraintId(self.constraints.len() - 1))
    }

    pub fn add_le(&mut self, name: impl Into<String>, expr: LinExpr, rhs: f64) -> Result<ConstraintId> {
        self.add_constraint(name, expr, ConstraintSense::LessEqual, rhs)
    }

    pub fn add_ge(&mut self, name: impl Into<String>, expr: LinExpr, rhs: f64) -> Result<ConstraintId> {
        self.add_constraint(name, expr, ConstraintSense::GreaterEqual, rhs)
    }

    pub fn add_eq(&mut self, name: impl Into<String>, expr: LinExpr, rhs: f64) -> Result<ConstraintId> {
        self.add_constraint(name, expr, ConstraintSense::Equal, rhs)
    }

    /// Adds `lower ≤ expr ≤ upper` as two one-sided rows.
    pub fn add_range(
        &mut self,
        name: impl Into<String>,
        expr: LinExpr,
        lower: f64,
        upper: f64,
    ) -> Result<(ConstraintId, ConstraintId)> {
        let name = name.into();
        if lower > upper {
            return Err(Error::InvalidModel(format!(
                "range `{name}` has lower side {lower} above upper side {upper}"
            )));
        }
        let low = self.add_ge(format!("{name}_lo"), expr.clone(), lower)?;
        let high = self.add_le(format!("{name}_hi"), expr, upper)?;
        Ok((low, high))
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<Constraint> {
        self.constraints
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(Error::UnknownConstraint(id.0))
    }

    pub fn set_bounds(&mut self, var: VarId, lower: f64, upper: f64) -> Result<()> {
        let (name, var_type) = {
            let v = self.var(var)?;
            (v.name.clone(), v.var_type)
        };
        let (lower, upper) = check_bounds(&name, var_type, lower, upper)?;
        let v = &mut self.vars[var.0];
        v.lower = lower;
        v.upper = upper;
        Ok(())
    }

    pub fn set_rhs(&mut self, id: ConstraintId, rhs: f64) -> Result<()> {
        if !rhs.is_finite() {
            return Err(Error::non_finite(format!("right-hand side of constraint {}", id.0), rhs));
        }
        self.constraint_mut(id)?.rhs = rhs;
        Ok(())
    }

    pub fn set_objective_coefficient(&mut self, var: VarId, coefficient: f64) -> Result<()> {
        if !coefficient.is_finite() {
            return Err(Error::non_finite(
                format!("objective coefficient of variable {}", var.0),
                coefficient,
            ));
        }
        self.var(var)?;
        self.vars[var.0].objective = coefficient;
        Ok(())
    }

    /// Changes the type of a variable; switching to binary clamps its bounds.
    pub fn set_var_type(&mut self, var: VarId, var_type: VarType) -> Result<()> {
        let v = self.var(var)?.clone();
        let (lower, upper) = check_bounds(&v.name, var_type, v.lower, v.upper)?;
        let v = &mut self.vars[var.0];
        v.var_type = var_type;
        v.lower = lower;
        v.upper = upper;
        Ok(())
    }

    pub fn var(&self, var: VarId) -> Result<&Variable> {
        self.vars.get(var.0).ok_or(Error::UnknownVariable(var.0))
    }

    pub fn vars(&self) -> &[Variable] {
        &self.vars
    }

    pub fn var_ids(&self) -> impl Iterator<Item = VarId> {
        (0..self.vars.len()).map(VarId)
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn constraint(&self, id: ConstraintId) -> Result<&Constraint> {
        self.constraints
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::UnknownConstraint(id.0))
    }

    fn constraint_mut(&mut self, id: ConstraintId) -> Result<&mut Constraint> {
        self.constraints
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::UnknownConstraint(id.0))
    }

    /// Active constraints in insertion order.
    pub fn constraints(&self) -> impl Iterator<Item = (ConstraintId, &Constraint)> {
        self.constraints
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (ConstraintId(i), c)))
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.iter().flatten().count()
    }

    /// Number of constraint ids ever issued, removed ones included.
    pub fn constraint_slots(&self) -> usize {
        self.constraints.len()
    }

    pub fn has_integer_vars(&self) -> bool {
        self.vars.iter().any(|v| v.var_type.is_integral())
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.vars
            .iter()
            .zip(values)
            .map(|(v, x)| v.objective * x)
            .sum()
    }

    /// Checks bounds, rows and integrality of `values` within `tolerance`.
    pub fn is_feasible(&self, values: &[f64], tolerance: f64) -> bool {
        if values.len() != self.vars.len() {
            return false;
        }
        let within_bounds = self.vars.iter().zip(values).all(|(v, &x)| {
            x >= v.lower - tolerance
                && x <= v.upper + tolerance
                && (!v.var_type.is_integral() || (x - x.round()).abs() <= tolerance)
        });
        within_bounds
            && self
                .constraints()
                .all(|(_, c)| c.violation(values) <= tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_var_model() -> (Model, VarId, VarId) {
        let mut model = Model::new("test", ObjectiveSense::Maximize);
        let x = model.add_var("x", 0.0, 10.0, 1.0, VarType::Continuous).unwrap();
        let y = model.add_var("y", 0.0, 10.0, 2.0, VarType::Integer).unwrap();
        (model, x, y)
    }

    #[test]
    fn test_binary_bounds_are_clamped() {
        let mut model = Model::new("clamp", ObjectiveSense::Minimize);
        let b = model.add_var("b", -5.0, 7.0, 1.0, VarType::Binary).unwrap();
        let v = model.var(b).unwrap();
        assert_eq!((v.lower, v.upper), (0.0, 1.0));
    }

    #[test]
    fn test_rejects_malformed_input() {
        let (mut model, x, _) = two_var_model();
        assert!(matches!(
            model.add_var("bad", 3.0, 1.0, 0.0, VarType::Continuous),
            Err(Error::InconsistentBounds { .. })
        ));
        assert!(matches!(
            model.add_le("nan", LinExpr::new().term(x, f64::NAN), 1.0),
            Err(Error::NonFinite { .. })
        ));
        assert!(matches!(
            model.add_le("dangling", LinExpr::new().term(VarId(42), 1.0), 1.0),
            Err(Error::UnknownVariable(42))
        ));
        assert!(matches!(
            model.add_le("inf", LinExpr::new().term(x, 1.0), f64::INFINITY),
            Err(Error::NonFinite { .. })
        ));
    }

    #[test]
    fn test_removed_constraint_ids_are_not_reused() {
        let (mut model, x, y) = two_var_model();
        let first = model.add_le("c0", LinExpr::new().term(x, 1.0), 4.0).unwrap();
        model.remove_constraint(first).unwrap();
        let second = model.add_le("c1", LinExpr::new().term(y, 1.0), 4.0).unwrap();
        assert_ne!(first, second);
        assert_eq!(model.num_constraints(), 1);
        assert_eq!(model.constraint_slots(), 2);
        assert!(matches!(model.constraint(first), Err(Error::UnknownConstraint(0))));
        assert!(model.remove_constraint(first).is_err());
    }

    #[test]
    fn test_add_column_extends_rows() {
        let (mut model, x, _) = two_var_model();
        let row = model.add_ge("cover", LinExpr::new().term(x, 1.0), 2.0).unwrap();
        let z = model
            .add_column("z", 0.0, f64::INFINITY, 1.0, VarType::Continuous, &[(row, 3.0)])
            .unwrap();
        let terms = model.constraint(row).unwrap().expr.terms().to_vec();
        assert_eq!(terms, vec![(x, 1.0), (z, 3.0)]);
    }

    #[test]
    fn test_expression_compaction_merges_terms() {
        let (mut model, x, y) = two_var_model();
        let expr = LinExpr::new().term(y, 1.0).term(x, 2.0).term(y, -1.0).term(x, 1.0);
        let id = model.add_le("merged", expr, 3.0).unwrap();
        assert_eq!(model.constraint(id).unwrap().expr.terms(), &[(x, 3.0)]);
    }

    #[test]
    fn test_clone_is_independent() {
        let (mut model, x, _) = two_var_model();
        let row = model.add_le("cap", LinExpr::new().term(x, 1.0), 5.0).unwrap();
        let mut copy = model.clone();
        copy.set_rhs(row, 1.0).unwrap();
        copy.set_bounds(x, 2.0, 3.0).unwrap();
        copy.add_le("extra", LinExpr::new().term(x, 1.0), 9.0).unwrap();

        assert_eq!(model.constraint(row).unwrap().rhs, 5.0);
        assert_eq!(model.var(x).unwrap().lower, 0.0);
        assert_eq!(model.num_constraints(), 1);
    }

    #[test]
    fn test_feasibility_check() {
        let (mut model, x, y) = two_var_model();
        model.add_le("sum", LinExpr::new().term(x, 1.0).term(y, 1.0), 4.0).unwrap();
        assert!(model.is_feasible(&[1.5, 2.0], 1e-9));
        assert!(!model.is_feasible(&[1.5, 2.5], 1e-9));
        assert!(!model.is_feasible(&[3.0, 2.0], 1e-9));
        assert_eq!(model.objective_value(&[1.5, 2.0]), 5.5);
    }
}
