use log::trace;

use crate::math::optimization::SimplexConfig;

/// Sense of a single linear row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSense {
    LessEqual,
    GreaterEqual,
    Equal,
}

/// One sparse row `Σ a_j x_j (≤ | ≥ | =) rhs`.
#[derive(Debug, Clone)]
pub struct Row {
    pub coefficients: Vec<(usize, f64)>,
    pub sense: RowSense,
    pub rhs: f64,
}

/// A bounded linear program.
///
/// minimize c^T x
/// subject to each row of `rows`
///           lower ≤ x ≤ upper
///
/// Bounds may be infinite in either direction.
#[derive(Debug, Clone)]
pub struct LinearProgram {
    /// The objective function coefficients (c in min c^T x)
    pub objective: Vec<f64>,
    pub rows: Vec<Row>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Terminal state of [`minimize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
    /// Phase one reported an unbounded direction, which can only happen through round-off.
    Numerical,
}

/// Outcome of [`minimize`].
///
/// `duals[i]` is the sensitivity of the optimal objective to `rows[i].rhs`. For a
/// minimization that means `≥` rows carry non-negative duals and `≤` rows non-positive
/// ones.
///
/// `farkas` (infeasible LPs) holds a row multiplier `λ` with
/// `λ^T b > max { λ^T A x : lower ≤ x ≤ upper }`, where `≥` rows get `λ ≥ 0` and `≤`
/// rows get `λ ≤ 0`. `ray` (unbounded LPs) is a direction `d` with `c^T d < 0` that keeps
/// every row and bound satisfied.
#[derive(Debug, Clone)]
pub struct SimplexSolution {
    pub status: LpStatus,
    pub x: Vec<f64>,
    pub objective: f64,
    pub duals: Option<Vec<f64>>,
    pub farkas: Option<Vec<f64>>,
    pub ray: Option<Vec<f64>>,
    pub iterations: usize,
}

impl SimplexSolution {
    fn terminal(status: LpStatus, iterations: usize) -> Self {
        Self {
            status,
            x: Vec::new(),
            objective: f64::NAN,
            duals: None,
            farkas: None,
            ray: None,
            iterations,
        }
    }
}

const CLEANUP: f64 = 1e-12;

/// How an original variable is expressed through non-negative internal columns.
#[derive(Debug, Clone, Copy)]
enum ColumnMap {
    /// x = offset + x'
    Shifted { col: usize, offset: f64 },
    /// x = offset - x'
    Mirrored { col: usize, offset: f64 },
    /// x = x⁺ - x⁻
    Split { pos: usize, neg: usize },
}

struct InternalRow {
    dense: Vec<f64>,
    sense: RowSense,
    rhs: f64,
    flipped: bool,
}

enum PivotOutcome {
    Optimal,
    Unbounded(usize),
    IterationLimit,
}

struct Tableau<'a> {
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    width: usize,
    config: &'a SimplexConfig,
    iterations: usize,
}

impl Tableau<'_> {
    fn rhs(&self, i: usize) -> f64 {
        self.rows[i][self.width]
    }

    /// Reduced cost row for `cost` with respect to the current basis. The last entry is `-z`.
    fn reduced_costs(&self, cost: &[f64]) -> Vec<f64> {
        let mut d = cost.to_vec();
        d.push(0.0);
        for (row, &b) in self.rows.iter().zip(&self.basis) {
            let cb = cost[b];
            if cb != 0.0 {
                for (dj, &aij) in d.iter_mut().zip(row) {
                    *dj -= cb * aij;
                }
            }
        }
        d
    }

    fn pivot(&mut self, d: &mut [f64], leaving_row: usize, entering_col: usize) {
        let scale = 1.0 / self.rows[leaving_row][entering_col];
        for v in self.rows[leaving_row].iter_mut() {
            *v *= scale;
            if v.abs() < CLEANUP {
                *v = 0.0;
            }
        }
        self.rows[leaving_row][entering_col] = 1.0;
        let pivot_row = self.rows[leaving_row].clone();

        let eliminate = |row: &mut [f64]| {
            let factor = row[entering_col];
            if factor != 0.0 {
                for (v, &p) in row.iter_mut().zip(&pivot_row) {
                    *v -= factor * p;
                    if v.abs() < CLEANUP {
                        *v = 0.0;
                    }
                }
                row[entering_col] = 0.0;
            }
        };
        for (i, row) in self.rows.iter_mut().enumerate() {
            if i != leaving_row {
                eliminate(row.as_mut_slice());
            }
        }
        eliminate(d);
        self.basis[leaving_row] = entering_col;
    }

    /// Runs primal simplex pivots on reduced cost row `d` over columns flagged in `allowed`.
    fn iterate(&mut self, d: &mut [f64], allowed: &[bool]) -> PivotOutcome {
        let tol = self.config.optimality_tolerance;
        let mut bland = false;
        let mut streak = 0;
        loop {
            if self.iterations >= self.config.max_iterations {
                return PivotOutcome::IterationLimit;
            }

            let entering = if bland {
                (0..self.width).find(|&j| allowed[j] && d[j] < -tol)
            } else {
                let mut best: Option<usize> = None;
                for j in (0..self.width).filter(|&j| allowed[j] && d[j] < -tol) {
                    if best.map_or(true, |b| d[j] < d[b]) {
                        best = Some(j);
                    }
                }
                best
            };
            let Some(q) = entering else {
                return PivotOutcome::Optimal;
            };

            let mut leaving: Option<usize> = None;
            let mut min_ratio = f64::INFINITY;
            for i in 0..self.rows.len() {
                let a = self.rows[i][q];
                if a <= self.config.pivot_tolerance {
                    continue;
                }
                let ratio = self.rhs(i).max(0.0) / a;
                let better = match leaving {
                    None => true,
                    Some(r) => {
                        ratio < min_ratio - CLEANUP
                            || ((ratio - min_ratio).abs() <= CLEANUP
                                && self.basis[i] < self.basis[r])
                    }
                };
                if better {
                    min_ratio = ratio;
                    leaving = Some(i);
                }
            }
            let Some(r) = leaving else {
                return PivotOutcome::Unbounded(q);
            };

            if min_ratio <= CLEANUP {
                streak += 1;
                if !bland && streak >= self.config.degenerate_streak {
                    trace!("switching to Bland's rule after {streak} degenerate pivots");
                    bland = true;
                }
            } else {
                streak = 0;
            }

            self.pivot(d, r, q);
            self.iterations += 1;
        }
    }
}

/// Minimizes a bounded linear program with a dense two-phase primal simplex.
///
/// Dantzig pricing is used until a run of degenerate pivots is observed, after which
/// the routine falls back to Bland's rule to rule out cycling. The solution carries
/// row duals when optimal, a Farkas multiplier when infeasible and a primal ray when
/// unbounded.
///
/// # Examples
///
/// ```
/// use decomp::math::{LinearProgram, LpStatus, Row, RowSense, SimplexConfig};
/// use decomp::math::optimization::simplex::minimize;
///
/// // minimize -x - y
/// // subject to:
/// //   x + y ≤ 1
/// //   x, y ≥ 0
/// let lp = LinearProgram {
///     objective: vec![-1.0, -1.0],
///     rows: vec![Row {
///         coefficients: vec![(0, 1.0), (1, 1.0)],
///         sense: RowSense::LessEqual,
///         rhs: 1.0,
///     }],
///     lower: vec![0.0, 0.0],
///     upper: vec![f64::INFINITY, f64::INFINITY],
/// };
///
/// let solution = minimize(&lp, &SimplexConfig::default());
/// assert_eq!(solution.status, LpStatus::Optimal);
/// assert!((solution.objective + 1.0).abs() < 1e-9);
/// ```
pub fn minimize(lp: &LinearProgram, config: &SimplexConfig) -> SimplexSolution {
    let n = lp.objective.len();

    let mut maps = Vec::with_capacity(n);
    let mut structural = 0;
    for j in 0..n {
        let (l, u) = (lp.lower[j], lp.upper[j]);
        if l.is_finite() {
            maps.push(ColumnMap::Shifted {
                col: structural,
                offset: l,
            });
            structural += 1;
        } else if u.is_finite() {
            maps.push(ColumnMap::Mirrored {
                col: structural,
                offset: u,
            });
            structural += 1;
        } else {
            maps.push(ColumnMap::Split {
                pos: structural,
                neg: structural + 1,
            });
            structural += 2;
        }
    }

    let mut cost = vec![0.0; structural];
    for (j, map) in maps.iter().enumerate() {
        let c = lp.objective[j];
        match *map {
            ColumnMap::Shifted { col, .. } => cost[col] = c,
            ColumnMap::Mirrored { col, .. } => cost[col] = -c,
            ColumnMap::Split { pos, neg } => {
                cost[pos] = c;
                cost[neg] = -c;
            }
        }
    }

    let mut internal: Vec<InternalRow> = Vec::with_capacity(lp.rows.len());
    for row in &lp.rows {
        let mut dense = vec![0.0; structural];
        let mut rhs = row.rhs;
        for &(j, a) in &row.coefficients {
            match maps[j] {
                ColumnMap::Shifted { col, offset } => {
                    dense[col] += a;
                    rhs -= a * offset;
                }
                ColumnMap::Mirrored { col, offset } => {
                    dense[col] -= a;
                    rhs -= a * offset;
                }
                ColumnMap::Split { pos, neg } => {
                    dense[pos] += a;
                    dense[neg] -= a;
                }
            }
        }
        internal.push(InternalRow {
            dense,
            sense: row.sense,
            rhs,
            flipped: false,
        });
    }
    for (j, map) in maps.iter().enumerate() {
        if let ColumnMap::Shifted { col, offset } = *map {
            if lp.upper[j].is_finite() {
                let mut dense = vec![0.0; structural];
                dense[col] = 1.0;
                internal.push(InternalRow {
                    dense,
                    sense: RowSense::LessEqual,
                    rhs: lp.upper[j] - offset,
                    flipped: false,
                });
            }
        }
    }
    for row in internal.iter_mut().filter(|r| r.rhs < 0.0) {
        row.dense.iter_mut().for_each(|v| *v = -*v);
        row.rhs = -row.rhs;
        row.flipped = true;
        row.sense = match row.sense {
            RowSense::LessEqual => RowSense::GreaterEqual,
            RowSense::GreaterEqual => RowSense::LessEqual,
            RowSense::Equal => RowSense::Equal,
        };
    }

    // Column layout: structural, then one slack/surplus per inequality, then artificials.
    let m = internal.len();
    let mut width = structural;
    let mut aux_col = vec![None; m];
    for (i, row) in internal.iter().enumerate() {
        if row.sense != RowSense::Equal {
            aux_col[i] = Some(width);
            width += 1;
        }
    }
    let mut art_col = vec![None; m];
    for (i, row) in internal.iter().enumerate() {
        if row.sense != RowSense::LessEqual {
            art_col[i] = Some(width);
            width += 1;
        }
    }
    let mut is_artificial = vec![false; width];
    art_col.iter().flatten().for_each(|&c| is_artificial[c] = true);

    let mut rows = Vec::with_capacity(m);
    let mut basis = Vec::with_capacity(m);
    for (i, row) in internal.iter().enumerate() {
        let mut t = row.dense.clone();
        t.resize(width + 1, 0.0);
        if let Some(c) = aux_col[i] {
            t[c] = if row.sense == RowSense::LessEqual { 1.0 } else { -1.0 };
        }
        if let Some(c) = art_col[i] {
            t[c] = 1.0;
        }
        t[width] = row.rhs;
        rows.push(t);
        basis.push(art_col[i].or(aux_col[i]).unwrap_or(structural));
    }
    let initial_basis = basis.clone();

    let mut tableau = Tableau {
        rows,
        basis,
        width,
        config,
        iterations: 0,
    };

    let map_rows = |y: &[f64]| -> Vec<f64> {
        (0..lp.rows.len())
            .map(|i| if internal[i].flipped { -y[i] } else { y[i] })
            .collect()
    };

    if is_artificial.iter().any(|&a| a) {
        let phase_one_cost: Vec<f64> = is_artificial
            .iter()
            .map(|&a| if a { 1.0 } else { 0.0 })
            .collect();
        let mut d = tableau.reduced_costs(&phase_one_cost);
        let everything = vec![true; width];
        match tableau.iterate(&mut d, &everything) {
            PivotOutcome::Optimal => {}
            PivotOutcome::IterationLimit => {
                return SimplexSolution::terminal(LpStatus::IterationLimit, tableau.iterations)
            }
            PivotOutcome::Unbounded(_) => {
                return SimplexSolution::terminal(LpStatus::Numerical, tableau.iterations)
            }
        }

        let infeasibility = -d[width];
        let scale = internal.iter().fold(1.0_f64, |acc, r| acc.max(r.rhs.abs()));
        if infeasibility > config.feasibility_tolerance * scale {
            trace!("phase one ended with infeasibility {infeasibility:e}");
            let lambda: Vec<f64> = initial_basis
                .iter()
                .map(|&c| phase_one_cost[c] - d[c])
                .collect();
            let mut solution = SimplexSolution::terminal(LpStatus::Infeasible, tableau.iterations);
            solution.farkas = Some(map_rows(&lambda));
            return solution;
        }

        // Drive remaining artificials out of the basis where a pivot is available.
        for i in 0..m {
            if !is_artificial[tableau.basis[i]] {
                continue;
            }
            let replacement = (0..width).find(|&j| {
                !is_artificial[j] && tableau.rows[i][j].abs() > config.pivot_tolerance
            });
            if let Some(j) = replacement {
                tableau.pivot(&mut d, i, j);
            }
        }
    }

    let mut phase_two_cost = cost;
    phase_two_cost.resize(width, 0.0);
    let mut d = tableau.reduced_costs(&phase_two_cost);
    let allowed: Vec<bool> = is_artificial.iter().map(|&a| !a).collect();
    match tableau.iterate(&mut d, &allowed) {
        PivotOutcome::Optimal => {}
        PivotOutcome::IterationLimit => {
            return SimplexSolution::terminal(LpStatus::IterationLimit, tableau.iterations)
        }
        PivotOutcome::Unbounded(q) => {
            let mut direction = vec![0.0; width];
            direction[q] = 1.0;
            for (row, &b) in tableau.rows.iter().zip(&tableau.basis) {
                direction[b] = -row[q];
            }
            let ray = maps
                .iter()
                .map(|map| match *map {
                    ColumnMap::Shifted { col, .. } => direction[col],
                    ColumnMap::Mirrored { col, .. } => -direction[col],
                    ColumnMap::Split { pos, neg } => direction[pos] - direction[neg],
                })
                .collect();
            let mut solution = SimplexSolution::terminal(LpStatus::Unbounded, tableau.iterations);
            solution.ray = Some(ray);
            return solution;
        }
    }

    let mut values = vec![0.0; width];
    for (i, &b) in tableau.basis.iter().enumerate() {
        values[b] = tableau.rhs(i);
    }
    let x: Vec<f64> = maps
        .iter()
        .map(|map| {
            let v = match *map {
                ColumnMap::Shifted { col, offset } => offset + values[col],
                ColumnMap::Mirrored { col, offset } => offset - values[col],
                ColumnMap::Split { pos, neg } => values[pos] - values[neg],
            };
            if v.abs() < CLEANUP {
                0.0
            } else {
                v
            }
        })
        .collect();
    let objective = x.iter().zip(&lp.objective).map(|(xi, ci)| xi * ci).sum();

    let y: Vec<f64> = initial_basis
        .iter()
        .map(|&c| phase_two_cost[c] - d[c])
        .collect();

    SimplexSolution {
        status: LpStatus::Optimal,
        x,
        objective,
        duals: Some(map_rows(&y)),
        farkas: None,
        ray: None,
        iterations: tableau.iterations,
    }
}
