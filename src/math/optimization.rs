pub mod simplex;

pub use simplex::minimize as simplex_minimize;

/// Configuration options for the simplex routine.
#[derive(Debug, Clone)]
pub struct SimplexConfig {
    /// Maximum number of pivots over both phases
    pub max_iterations: usize,
    /// Reduced costs above `-optimality_tolerance` are treated as non-negative
    pub optimality_tolerance: f64,
    /// Phase-one objective below this value means the problem is feasible
    pub feasibility_tolerance: f64,
    /// Smallest magnitude accepted as a pivot element
    pub pivot_tolerance: f64,
    /// Consecutive degenerate pivots before switching to Bland's rule for good
    pub degenerate_streak: usize,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50_000,
            optimality_tolerance: 1e-9,
            feasibility_tolerance: 1e-7,
            pivot_tolerance: 1e-9,
            degenerate_streak: 25,
        }
    }
}
