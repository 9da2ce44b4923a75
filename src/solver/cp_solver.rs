// Constraint-programming adapter
// Finite integer domains, scheduling constructs decomposed into the compiled
// tree, objectives through the engine's optimisation extension

use crate::domain::{
    solver_service::{Limits, Result},
    Problem, SolutionStatus, SolveError, SolveResult, SolverService,
};
use crate::solver::csp_solver::translate_smt;
use crate::solver::smt_process::{self, SmtCommand, SmtModel, SmtOutcome};
use crate::solver::smtlib;
use tracing::warn;

pub struct CpSolver {
    command: SmtCommand,
}

impl CpSolver {
    pub fn new(command: SmtCommand) -> Self {
        Self { command }
    }
}

impl Default for CpSolver {
    fn default() -> Self {
        Self::new(SmtCommand::default())
    }
}

impl SolverService for CpSolver {
    type Model = SmtModel;
    type Outcome = SmtOutcome;

    fn name(&self) -> &str {
        "smt-opt"
    }

    fn supports_mip(&self) -> bool {
        true
    }

    fn build(&self, problem: &Problem, limits: &Limits) -> Result<SmtModel> {
        let unbounded: Vec<&str> = problem
            .variables()
            .iter()
            .filter(|v| {
                let (lower, upper) = v.bounds();
                !(lower.is_finite() && upper.is_finite())
            })
            .map(|v| v.name.as_str())
            .collect();
        if !unbounded.is_empty() {
            // the engine copes, but the domain is no longer finite
            warn!(variables = ?unbounded, "constraint-programming variables without finite bounds");
        }
        if problem.objective().is_some() && limits.max_solutions > 1 {
            return Err(SolveError::Internal(
                "enumeration with an objective reached the engine".into(),
            ));
        }
        Ok(SmtModel {
            script: smtlib::emit(problem, false)?,
            max_solutions: limits.max_solutions,
            unsat_core: false,
        })
    }

    async fn solve(&self, model: SmtModel, limits: &Limits) -> Result<SmtOutcome> {
        smt_process::run(&self.command, model, limits.time_limit).await
    }

    fn translate(&self, problem: &Problem, outcome: SmtOutcome) -> SolveResult {
        let found = if problem.objective().is_some() {
            SolutionStatus::Optimal
        } else {
            SolutionStatus::Feasible
        };
        translate_smt(problem, outcome, found, SolutionStatus::Infeasible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Direction, GlobalSpec, ConstraintSpec, IntervalSpec, ObjectiveSpec, ProblemFamily, Variable,
    };
    use crate::solver::smt_process::Verdict;
    use std::time::Duration;

    fn schedule() -> Problem {
        Problem::builder(ProblemFamily::ConstraintProgramming)
            .variable(Variable::integer("s1").with_bounds(Some(0.0), Some(10.0)))
            .variable(Variable::integer("s2").with_bounds(Some(0.0), Some(10.0)))
            .variable(Variable::integer("makespan").with_bounds(Some(0.0), Some(20.0)))
            .interval(IntervalSpec {
                name: "t1".into(),
                start: "s1".into(),
                size: 3,
                end: None,
            })
            .interval(IntervalSpec {
                name: "t2".into(),
                start: "s2".into(),
                size: 2,
                end: None,
            })
            .constraint(ConstraintSpec::Global(GlobalSpec::NoOverlap {
                intervals: vec!["t1".into(), "t2".into()],
                name: None,
            }))
            .constraint("makespan >= s1 + 3")
            .constraint("makespan >= s2 + 2")
            .objective(ObjectiveSpec::expression(Direction::Minimize, "makespan"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_emits_objective() {
        let model = CpSolver::default()
            .build(&schedule(), &Limits::default())
            .unwrap();
        assert_eq!(model.script.objective.as_deref(), Some("(minimize v2)\n"));
        assert!(model.script.text.contains("(or "));
    }

    #[test]
    fn test_translate_optimal_with_objective() {
        let p = schedule();
        let outcome = SmtOutcome {
            engine: "z3".into(),
            verdict: Verdict::Sat,
            solutions: vec![vec![0.0, 3.0, 5.0]],
            conflict: Vec::new(),
            unbounded: false,
            reason: None,
            time_limit: Duration::from_secs(30),
            truncated: false,
        };
        let result = CpSolver::default().translate(&p, outcome);
        assert_eq!(result.status, SolutionStatus::Optimal);
        assert_eq!(result.objective_value, Some(5.0));
    }

    #[test]
    fn test_translate_unsat_is_infeasible() {
        let outcome = SmtOutcome {
            engine: "z3".into(),
            verdict: Verdict::Unsat,
            solutions: Vec::new(),
            conflict: Vec::new(),
            unbounded: false,
            reason: None,
            time_limit: Duration::from_secs(30),
            truncated: false,
        };
        let result = CpSolver::default().translate(&schedule(), outcome);
        assert_eq!(result.status, SolutionStatus::Infeasible);
    }
}
