// Constraint-satisfaction adapter over an SMT-LIB2 engine process

use crate::domain::{
    solver_service::{Limits, Result},
    Diagnostics, NamedValues, Problem, SolutionStatus, SolveError, SolveResult, SolverService,
};
use crate::solver::smt_process::{self, SmtCommand, SmtModel, SmtOutcome, Verdict};
use crate::solver::smtlib;

pub struct CspSolver {
    command: SmtCommand,
}

impl CspSolver {
    pub fn new(command: SmtCommand) -> Self {
        Self { command }
    }
}

impl Default for CspSolver {
    fn default() -> Self {
        Self::new(SmtCommand::default())
    }
}

impl SolverService for CspSolver {
    type Model = SmtModel;
    type Outcome = SmtOutcome;

    fn name(&self) -> &str {
        "smt"
    }

    fn supports_mip(&self) -> bool {
        true
    }

    fn build(&self, problem: &Problem, limits: &Limits) -> Result<SmtModel> {
        let unsat_core = problem.options().unsat_core;
        Ok(SmtModel {
            script: smtlib::emit(problem, unsat_core)?,
            max_solutions: limits.max_solutions,
            unsat_core,
        })
    }

    async fn solve(&self, model: SmtModel, limits: &Limits) -> Result<SmtOutcome> {
        smt_process::run(&self.command, model, limits.time_limit).await
    }

    fn translate(&self, problem: &Problem, outcome: SmtOutcome) -> SolveResult {
        let unsat = SolutionStatus::Unsatisfiable;
        translate_smt(problem, outcome, SolutionStatus::Satisfiable, unsat)
    }
}

/// Shared mapping for the SMT-backed families; `found` and `refuted` are
/// the family's statuses for sat and unsat.
pub(crate) fn translate_smt(
    problem: &Problem,
    outcome: SmtOutcome,
    found: SolutionStatus,
    refuted: SolutionStatus,
) -> SolveResult {
    let mut diagnostics = Diagnostics::for_backend(&outcome.engine);
    match outcome.verdict {
        Verdict::Unsat => {
            diagnostics.conflict = outcome.conflict;
            SolveResult::new(refuted)
                .with_message("no assignment satisfies all constraints")
                .with_diagnostics(diagnostics)
        }
        Verdict::Unknown => {
            let reason = outcome.reason.unwrap_or_else(|| "unknown".into());
            let err = if reason.contains("timeout") || reason.contains("canceled") {
                SolveError::Timeout {
                    seconds: outcome.time_limit.as_secs_f64(),
                }
            } else {
                SolveError::EngineFailure(format!("engine gave up: {reason}"))
            };
            diagnostics.error_kind = Some(err.code().to_string());
            SolveResult::failed(&err)
                .with_message(format!("{err} (engine returned unknown: {reason})"))
                .with_diagnostics(diagnostics)
        }
        Verdict::Sat if outcome.unbounded => SolveResult::new(SolutionStatus::Unbounded)
            .with_message("Problem is unbounded: objective can be improved infinitely")
            .with_diagnostics(diagnostics),
        Verdict::Sat => {
            let names = problem.variable_names();
            let named = |values: &Vec<f64>| -> NamedValues {
                names.iter().map(String::as_str).zip(values.iter().copied()).collect()
            };
            let solutions: Vec<NamedValues> = outcome.solutions.iter().map(named).collect();
            let first = outcome.solutions.first().cloned().unwrap_or_default();
            let mut result = SolveResult::new(found).with_diagnostics(diagnostics);
            if let Some(values) = solutions.first() {
                result = result.with_values(values.clone());
            }
            if let Some(objective) = problem.objective_value(&first) {
                result = result.with_objective(objective);
            }
            if outcome.truncated {
                result = result.with_message(format!(
                    "enumeration stopped at the time limit after {} assignments",
                    solutions.len()
                ));
            }
            if problem.options().max_solutions.is_some_and(|n| n > 1) {
                result = result.with_solutions(solutions);
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProblemFamily, Variable};
    use std::time::Duration;

    fn problem() -> Problem {
        Problem::builder(ProblemFamily::ConstraintSatisfaction)
            .variable(Variable::integer("x"))
            .variable(Variable::integer("y"))
            .constraint("x + y == 10")
            .constraint("x - y == 2")
            .build()
            .unwrap()
    }

    fn outcome(verdict: Verdict) -> SmtOutcome {
        SmtOutcome {
            engine: "z3".into(),
            verdict,
            solutions: Vec::new(),
            conflict: Vec::new(),
            unbounded: false,
            reason: None,
            time_limit: Duration::from_secs(30),
            truncated: false,
        }
    }

    #[test]
    fn test_build_script_asserts_every_constraint() {
        let solver = CspSolver::default();
        let model = solver.build(&problem(), &Limits::default()).unwrap();
        assert_eq!(model.script.symbols, vec!["v0", "v1"]);
        assert_eq!(model.script.text.matches("(assert").count(), 2);
        assert_eq!(model.max_solutions, 1);
    }

    #[test]
    fn test_translate_sat() {
        let p = problem();
        let mut raw = outcome(Verdict::Sat);
        raw.solutions.push(vec![6.0, 4.0]);
        let result = CspSolver::default().translate(&p, raw);
        assert_eq!(result.status, SolutionStatus::Satisfiable);
        let values = result.values.unwrap();
        assert_eq!(values.get("x"), Some(6.0));
        assert_eq!(values.get("y"), Some(4.0));
        assert_eq!(result.diagnostics.backend.as_deref(), Some("z3"));
        assert!(result.solutions.is_empty());
    }

    #[test]
    fn test_translate_unsat_reports_conflict() {
        let mut raw = outcome(Verdict::Unsat);
        raw.conflict = vec!["c0".into(), "c1".into()];
        let result = CspSolver::default().translate(&problem(), raw);
        assert_eq!(result.status, SolutionStatus::Unsatisfiable);
        assert!(result.values.is_none());
        assert_eq!(result.diagnostics.conflict, vec!["c0", "c1"]);
    }

    #[test]
    fn test_translate_unknown_is_error() {
        let mut raw = outcome(Verdict::Unknown);
        raw.reason = Some("incomplete quantifiers".into());
        let result = CspSolver::default().translate(&problem(), raw);
        assert_eq!(result.status, SolutionStatus::Error);
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("ENGINE_FAILURE"));
    }

    #[test]
    fn test_translate_unknown_timeout() {
        let mut raw = outcome(Verdict::Unknown);
        raw.reason = Some("timeout".into());
        raw.time_limit = Duration::from_millis(2500);
        let result = CspSolver::default().translate(&problem(), raw);
        assert_eq!(result.status, SolutionStatus::TimedOut);
        assert!(result.message.unwrap().contains("2.5"));
    }
}
