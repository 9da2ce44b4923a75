// microlp Solver Adapter
// Pure-Rust simplex and branch-and-bound through good_lp

use crate::domain::{
    solver_service::{Limits, Result},
    Problem, Sense, SolveError, SolveResult, SolverService,
};
use crate::solver::lp_model::{translate_outcome, LinearModel, LpOutcome, LpStatus};
use good_lp::{
    solvers::microlp::microlp, variable, variables, Expression, ResolutionError, Solution,
    SolverModel, Variable as GoodLpVariable,
};
use tracing::debug;

pub struct MicrolpSolver;

impl MicrolpSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MicrolpSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverService for MicrolpSolver {
    type Model = LinearModel;
    type Outcome = LpOutcome;

    fn name(&self) -> &str {
        "microlp"
    }

    fn supports_mip(&self) -> bool {
        true
    }

    fn build(&self, problem: &Problem, limits: &Limits) -> Result<LinearModel> {
        LinearModel::from_problem(problem, limits.time_limit)
    }

    async fn solve(&self, model: LinearModel, _limits: &Limits) -> Result<LpOutcome> {
        // microlp has no native time limit; the dispatcher ceiling detaches from it
        tokio::task::spawn_blocking(move || solve_blocking(model))
            .await
            .map_err(|e| SolveError::Internal(format!("microlp task failed: {e}")))
    }

    fn translate(&self, problem: &Problem, outcome: LpOutcome) -> SolveResult {
        translate_outcome(problem, self.name(), outcome)
    }
}

fn solve_blocking(model: LinearModel) -> LpOutcome {
    if let Some(label) = &model.infeasible_row {
        debug!(constraint = %label, "constant row is violated, skipping engine");
        return LpOutcome::with_status(LpStatus::Infeasible);
    }

    let mut vars = variables!();
    let mut columns: Vec<GoodLpVariable> = Vec::with_capacity(model.columns.len());
    for column in &model.columns {
        let mut definition = variable().min(column.lower).max(column.upper);
        if column.integer {
            definition = definition.integer();
        }
        columns.push(vars.add(definition));
    }

    let mut objective: Expression = 0.into();
    for (column, &var) in model.columns.iter().zip(&columns) {
        if column.cost != 0.0 {
            objective += column.cost * var;
        }
    }

    let unsolved = if model.maximize {
        vars.maximise(objective)
    } else {
        vars.minimise(objective)
    };
    let mut lp_model = unsolved.using(microlp);

    for row in &model.rows {
        let mut lhs: Expression = 0.into();
        for &(i, coeff) in &row.terms {
            lhs += coeff * columns[i];
        }
        lp_model = match row.sense {
            Sense::LessThanOrEqual => lp_model.with(lhs.leq(row.rhs)),
            Sense::Equal => lp_model.with(lhs.eq(row.rhs)),
            Sense::GreaterThanOrEqual => lp_model.with(lhs.geq(row.rhs)),
        };
    }

    match lp_model.solve() {
        Ok(solution) => LpOutcome {
            values: columns.iter().map(|&var| solution.value(var)).collect(),
            ..LpOutcome::with_status(LpStatus::Optimal)
        },
        Err(ResolutionError::Infeasible) => LpOutcome::with_status(LpStatus::Infeasible),
        Err(ResolutionError::Unbounded) => LpOutcome::with_status(LpStatus::Unbounded),
        Err(e) => LpOutcome::with_status(LpStatus::Failed(e.to_string())),
    }
}
