// Dispatcher: selects the adapter for a problem's family and runs
// build -> solve -> translate under a hard wall-clock ceiling

use crate::domain::{
    Limits, LinearBackend, Problem, ProblemFamily, SolveError, SolveResult, SolverService,
};
use crate::infrastructure::EngineConfig;
use crate::solver::{ClarabelSolver, CpSolver, CspSolver, MicrolpSolver};
#[cfg(feature = "highs")]
use crate::solver::HighsSolver;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Floor for result checking of interior-point solutions.
const CONVEX_CHECK_TOLERANCE: f64 = 1e-5;

pub struct Dispatcher {
    config: Arc<EngineConfig>,
    csp: CspSolver,
    cp: CpSolver,
    convex: ClarabelSolver,
    microlp: MicrolpSolver,
    #[cfg(feature = "highs")]
    highs: HighsSolver,
}

impl Dispatcher {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            csp: CspSolver::new(config.smt.clone()),
            cp: CpSolver::new(config.smt.clone()),
            convex: ClarabelSolver::new(),
            microlp: MicrolpSolver::new(),
            #[cfg(feature = "highs")]
            highs: HighsSolver::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Solve a validated problem. Always returns a result; adapter errors,
    /// engine failures and ceiling expiry become `error` / `timed_out`.
    pub async fn solve(&self, problem: &Problem) -> SolveResult {
        let limits = self.config.limits(problem.options());
        let span = info_span!(
            "solve",
            family = %problem.family(),
            variables = problem.variables().len(),
            constraints = problem.constraints().len(),
        );
        async {
            let result = match problem.family() {
                ProblemFamily::ConstraintSatisfaction => self.run(&self.csp, problem, &limits).await,
                ProblemFamily::ConstraintProgramming => self.run(&self.cp, problem, &limits).await,
                ProblemFamily::Convex => self.run(&self.convex, problem, &limits).await,
                ProblemFamily::Linear => {
                    match self.config.linear_backend(problem.options().backend) {
                        LinearBackend::Highs => self.run_highs(problem, &limits).await,
                        _ => self.run(&self.microlp, problem, &limits).await,
                    }
                }
            };
            info!(
                status = %result.status,
                backend = result.diagnostics.backend.as_deref().unwrap_or("-"),
                solve_time_ms = result.diagnostics.solve_time_ms.unwrap_or_default(),
                "solved"
            );
            result
        }
        .instrument(span)
        .await
    }

    #[cfg(feature = "highs")]
    async fn run_highs(&self, problem: &Problem, limits: &Limits) -> SolveResult {
        self.run(&self.highs, problem, limits).await
    }

    #[cfg(not(feature = "highs"))]
    async fn run_highs(&self, _problem: &Problem, _limits: &Limits) -> SolveResult {
        let err = SolveError::EngineFailure(
            "HiGHS backend is not available in this build (enable the `highs` feature)".into(),
        );
        let mut result = SolveResult::failed(&err);
        result.diagnostics.backend = Some("HiGHS".into());
        result
    }

    async fn run<B: SolverService>(&self, backend: &B, problem: &Problem, limits: &Limits) -> SolveResult {
        let started = Instant::now();
        debug!(backend = backend.name(), time_limit_s = limits.time_limit.as_secs_f64(), "building model");

        let result = match backend.build(problem, limits) {
            Ok(model) => {
                let ceiling = self.config.ceiling(limits);
                match tokio::time::timeout(ceiling, backend.solve(model, limits)).await {
                    Ok(Ok(outcome)) => backend.translate(problem, outcome),
                    Ok(Err(err)) => self.failure(backend.name(), err),
                    Err(_) => {
                        warn!(
                            backend = backend.name(),
                            ceiling_s = ceiling.as_secs_f64(),
                            "wall-clock ceiling reached, abandoning solve"
                        );
                        SolveResult::failed(&SolveError::Timeout {
                            seconds: limits.time_limit.as_secs_f64(),
                        })
                    }
                }
            }
            Err(err) => self.failure(backend.name(), err),
        };

        let mut result = verify(problem, result, check_tolerance(problem.family(), limits));
        if result.diagnostics.backend.is_none() {
            result.diagnostics.backend = Some(backend.name().to_string());
        }
        result.diagnostics.solve_time_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    fn failure(&self, backend: &str, err: SolveError) -> SolveResult {
        match &err {
            SolveError::Internal(detail) => error!(backend, detail = %detail, "internal solver error"),
            SolveError::Timeout { .. } => info!(backend, "{err}"),
            _ => warn!(backend, "{err}"),
        }
        SolveResult::failed(&err)
    }
}

fn check_tolerance(family: ProblemFamily, limits: &Limits) -> f64 {
    match family {
        ProblemFamily::Convex => limits.tolerance.max(CONVEX_CHECK_TOLERANCE),
        _ => limits.tolerance,
    }
}

/// Re-check every returned assignment against the declared domains, bounds
/// and constraints. A violation turns the result into an error.
fn verify(problem: &Problem, result: SolveResult, tolerance: f64) -> SolveResult {
    if !result.status.has_assignment() {
        return result;
    }
    if result.values.is_none() {
        return result.into_error("INTERNAL", "solver reported success without an assignment");
    }
    let violation = result
        .values
        .iter()
        .chain(&result.solutions)
        .map(|named| problem.check(&named.values(), tolerance))
        .find_map(|checked| checked.err());
    match violation {
        Some(reason) => {
            error!(reason = %reason, "engine returned an invalid assignment");
            result.into_error("INVALID_ASSIGNMENT", format!("engine returned an invalid assignment: {reason}"))
        }
        None => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Direction, LinearSpec, Coefficients, ConstraintSpec, NamedValues, ObjectiveSpec, Sense,
        SolutionStatus, SolverOptions, Variable,
    };
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(EngineConfig::new().with_lp_backend(LinearBackend::Microlp)))
    }

    fn row(coefficients: Vec<f64>, sense: Sense, rhs: f64) -> ConstraintSpec {
        ConstraintSpec::Linear(LinearSpec {
            coefficients: Coefficients::Dense(coefficients),
            sense,
            rhs,
            name: None,
        })
    }

    fn production() -> Problem {
        Problem::builder(ProblemFamily::Linear)
            .variable(Variable::continuous("a").with_bounds(Some(0.0), None))
            .variable(Variable::continuous("b").with_bounds(Some(0.0), None))
            .constraint(row(vec![2.0, 1.0], Sense::LessThanOrEqual, 100.0))
            .constraint(row(vec![1.0, 2.0], Sense::LessThanOrEqual, 80.0))
            .objective(ObjectiveSpec::linear(Direction::Maximize, vec![3.0, 2.0]))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_dispatch_sets_diagnostics() {
        let result = dispatcher().solve(&production()).await;
        assert_eq!(result.status, SolutionStatus::Optimal);
        assert!((result.objective_value.unwrap() - 180.0).abs() < 1e-6);
        assert_eq!(result.diagnostics.backend.as_deref(), Some("microlp"));
        assert!(result.diagnostics.solve_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_convex_dispatch() {
        let problem = Problem::builder(ProblemFamily::Convex)
            .variable(Variable::continuous("x"))
            .constraint("x >= 2")
            .objective(ObjectiveSpec::expression(Direction::Minimize, "square(x)"))
            .build()
            .unwrap();
        let result = dispatcher().solve(&problem).await;
        assert_eq!(result.status, SolutionStatus::Optimal);
        assert!((result.values.unwrap().get("x").unwrap() - 2.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_missing_smt_engine_is_engine_failure() {
        let config = EngineConfig::new().with_smt(crate::solver::SmtCommand::new(
            "/nonexistent/smt-engine",
            Vec::new(),
        ));
        let problem = Problem::builder(ProblemFamily::ConstraintSatisfaction)
            .variable(Variable::integer("x"))
            .constraint("x > 3")
            .build()
            .unwrap();
        let result = Dispatcher::new(Arc::new(config)).solve(&problem).await;
        assert_eq!(result.status, SolutionStatus::Error);
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("ENGINE_FAILURE"));
        assert!(result.values.is_none());
    }

    #[cfg(not(feature = "highs"))]
    #[tokio::test]
    async fn test_highs_without_feature_is_engine_failure() {
        let problem = Problem::builder(ProblemFamily::Linear)
            .variable(Variable::continuous("x").with_bounds(Some(0.0), Some(1.0)))
            .objective(ObjectiveSpec::linear(Direction::Maximize, vec![1.0]))
            .options(SolverOptions::new().with_backend(LinearBackend::Highs))
            .build()
            .unwrap();
        let result = dispatcher().solve(&problem).await;
        assert_eq!(result.status, SolutionStatus::Error);
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("ENGINE_FAILURE"));
        assert_eq!(result.diagnostics.backend.as_deref(), Some("HiGHS"));
    }

    #[test]
    fn test_verify_rejects_violating_assignment() {
        let problem = production();
        let values: NamedValues = [("a", 100.0), ("b", 100.0)].into_iter().collect();
        let result = SolveResult::new(SolutionStatus::Optimal)
            .with_values(values)
            .with_objective(500.0);
        let checked = verify(&problem, result, 1e-6);
        assert_eq!(checked.status, SolutionStatus::Error);
        assert_eq!(checked.diagnostics.error_kind.as_deref(), Some("INVALID_ASSIGNMENT"));
        assert!(checked.values.is_none());
        assert!(checked.objective_value.is_none());
    }

    #[test]
    fn test_verify_passes_non_assignment_statuses() {
        let result = SolveResult::new(SolutionStatus::Infeasible);
        assert_eq!(verify(&production(), result.clone(), 1e-6), result);
    }

    struct Sleeper;

    impl SolverService for Sleeper {
        type Model = ();
        type Outcome = ();

        fn name(&self) -> &str {
            "sleeper"
        }

        fn supports_mip(&self) -> bool {
            false
        }

        fn build(&self, _problem: &Problem, _limits: &Limits) -> crate::domain::solver_service::Result<()> {
            Ok(())
        }

        async fn solve(&self, _model: (), _limits: &Limits) -> crate::domain::solver_service::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        fn translate(&self, _problem: &Problem, _outcome: ()) -> SolveResult {
            SolveResult::new(SolutionStatus::Optimal)
        }
    }

    #[tokio::test]
    async fn test_ceiling_abandons_unresponsive_adapter() {
        let config = EngineConfig::new().with_grace(Duration::from_millis(50));
        let dispatcher = Dispatcher::new(Arc::new(config));
        let limits = Limits {
            time_limit: Duration::from_millis(50),
            ..Limits::default()
        };
        let started = Instant::now();
        let result = dispatcher.run(&Sleeper, &production(), &limits).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.status, SolutionStatus::TimedOut);
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("TIMEOUT"));
        assert_eq!(result.diagnostics.backend.as_deref(), Some("sleeper"));
    }
}
