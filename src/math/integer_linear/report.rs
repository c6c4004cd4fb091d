//! Final status reporting shared by the decomposition drivers.

use std::fmt;

use log::{info, warn};

use crate::math::integer_linear::oracle::SolveStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundTrust {
    /// Proven optimal at termination.
    Proven,
    /// Correct but possibly not tight.
    Valid,
    /// Missing or meaningless for this status.
    Unavailable,
}

/// States which of the primal incumbent and the dual bound a caller may rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAssessment {
    pub status: SolveStatus,
    pub primal: BoundTrust,
    pub dual: BoundTrust,
}

impl BoundAssessment {
    pub fn assess(status: SolveStatus, has_incumbent: bool, has_bound: bool) -> Self {
        let (primal, dual) = match status {
            SolveStatus::Optimal => (BoundTrust::Proven, BoundTrust::Proven),
            SolveStatus::Infeasible
            | SolveStatus::Unbounded
            | SolveStatus::InfeasibleOrUnbounded => {
                (BoundTrust::Unavailable, BoundTrust::Unavailable)
            }
            SolveStatus::Numerical => (
                if has_incumbent { BoundTrust::Valid } else { BoundTrust::Unavailable },
                BoundTrust::Unavailable,
            ),
            SolveStatus::IterationLimit
            | SolveStatus::NodeLimit
            | SolveStatus::TimeLimit
            | SolveStatus::Interrupted => (
                if has_incumbent { BoundTrust::Valid } else { BoundTrust::Unavailable },
                if has_bound { BoundTrust::Valid } else { BoundTrust::Unavailable },
            ),
        };
        Self {
            status,
            primal,
            dual,
        }
    }

    pub fn is_proven(&self) -> bool {
        self.primal == BoundTrust::Proven && self.dual == BoundTrust::Proven
    }

    /// Logs the outcome of a run; non-proven outcomes go to `warn!`.
    pub fn log(&self, run: &str, objective: Option<f64>, bound: Option<f64>) {
        if self.is_proven() || matches!(self.status, SolveStatus::Infeasible) {
            info!("{run}: {self} (objective {objective:?}, bound {bound:?})");
        } else {
            warn!("{run}: {self} (objective {objective:?}, bound {bound:?})");
        }
    }
}

impl fmt::Display for BoundAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let primal = match self.primal {
            BoundTrust::Proven => "incumbent is optimal",
            BoundTrust::Valid => "incumbent is feasible but not proven optimal",
            BoundTrust::Unavailable => "no trustworthy incumbent",
        };
        let dual = match self.dual {
            BoundTrust::Proven => "bound matches the incumbent",
            BoundTrust::Valid => "bound is valid but not tight",
            BoundTrust::Unavailable => "no trustworthy bound",
        };
        write!(f, "{:?}: {primal}; {dual}", self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_status_trusts_what_exists() {
        let a = BoundAssessment::assess(SolveStatus::NodeLimit, true, true);
        assert_eq!((a.primal, a.dual), (BoundTrust::Valid, BoundTrust::Valid));
        assert!(!a.is_proven());

        let b = BoundAssessment::assess(SolveStatus::TimeLimit, false, true);
        assert_eq!(b.primal, BoundTrust::Unavailable);
        assert_eq!(b.dual, BoundTrust::Valid);
    }

    #[test]
    fn test_optimal_is_proven() {
        let a = BoundAssessment::assess(SolveStatus::Optimal, true, true);
        assert!(a.is_proven());
        assert_eq!(
            a.to_string(),
            "Optimal: incumbent is optimal; bound matches the incumbent"
        );
    }

    #[test]
    fn test_numerical_failure_never_trusts_the_bound() {
        let a = BoundAssessment::assess(SolveStatus::Numerical, true, true);
        assert_eq!(a.primal, BoundTrust::Valid);
        assert_eq!(a.dual, BoundTrust::Unavailable);
    }
}
