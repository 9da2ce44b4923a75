// Domain service interface for solving optimization problems
// Every backend implements the same build -> solve -> translate contract

use super::errors::SolveError;
use super::models::Problem;
use super::result::SolveResult;
use std::future::Future;
use std::time::Duration;

/// Resource limits applied to one solve, resolved by the dispatcher from the
/// problem's options and the engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    /// Time budget handed to the native engine.
    pub time_limit: Duration,
    /// Numerical tolerance for result checking and engine settings.
    pub tolerance: f64,
    /// Number of assignments to enumerate (at least 1).
    pub max_solutions: usize,
    pub verbose: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(30),
            tolerance: 1e-6,
            max_solutions: 1,
            verbose: false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SolveError>;

/// Capability set shared by the backend adapters.
///
/// `build` produces the engine's native model from a validated problem,
/// `solve` runs the engine and `translate` maps the native outcome onto the
/// canonical result. Errors from `build` and `solve` are converted into a
/// result by the dispatcher; they never escape as panics.
pub trait SolverService: Send + Sync {
    type Model: Send + 'static;
    type Outcome: Send + 'static;

    /// Get the name of this solver backend
    fn name(&self) -> &str;

    /// Check if this solver supports integer variables
    fn supports_mip(&self) -> bool;

    fn build(&self, problem: &Problem, limits: &Limits) -> Result<Self::Model>;

    fn solve(
        &self,
        model: Self::Model,
        limits: &Limits,
    ) -> impl Future<Output = Result<Self::Outcome>> + Send;

    fn translate(&self, problem: &Problem, outcome: Self::Outcome) -> SolveResult;
}
