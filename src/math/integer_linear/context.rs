use std::time::{Duration, Instant};

/// Counters for one decomposition run, passed by `&mut` through every call.
#[derive(Debug, Clone)]
pub struct RunContext {
    started: Instant,
    pub master_solves: usize,
    pub subproblem_solves: usize,
    pub pricing_rounds: usize,
    pub columns_added: usize,
    pub feasibility_cuts: usize,
    pub optimality_cuts: usize,
    pub diving_passes: usize,
    pub nodes_processed: usize,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            master_solves: 0,
            subproblem_solves: 0,
            pricing_rounds: 0,
            columns_added: 0,
            feasibility_cuts: 0,
            optimality_cuts: 0,
            diving_passes: 0,
            nodes_processed: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            elapsed: self.elapsed(),
            master_solves: self.master_solves,
            subproblem_solves: self.subproblem_solves,
            pricing_rounds: self.pricing_rounds,
            columns_added: self.columns_added,
            feasibility_cuts: self.feasibility_cuts,
            optimality_cuts: self.optimality_cuts,
            diving_passes: self.diving_passes,
            nodes_processed: self.nodes_processed,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen copy of the counters, attached to reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    pub elapsed: Duration,
    pub master_solves: usize,
    pub subproblem_solves: usize,
    pub pricing_rounds: usize,
    pub columns_added: usize,
    pub feasibility_cuts: usize,
    pub optimality_cuts: usize,
    pub diving_passes: usize,
    pub nodes_processed: usize,
}
