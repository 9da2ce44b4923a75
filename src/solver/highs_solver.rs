// HiGHS Solver Adapter
// Implements the SolverService interface for HiGHS
// This is an adapter pattern - translates the linear model to the HiGHS row API

use crate::domain::{
    solver_service::{Limits, Result},
    Problem, Sense, SolveError, SolveResult, SolverService,
};
use crate::solver::lp_model::{translate_outcome, LinearModel, LpOutcome, LpStatus};
use highs::{HighsModelStatus, RowProblem, Sense as HighsSense};
use tracing::debug;

pub struct HighsSolver;

impl HighsSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HighsSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverService for HighsSolver {
    type Model = LinearModel;
    type Outcome = LpOutcome;

    fn name(&self) -> &str {
        "HiGHS"
    }

    fn supports_mip(&self) -> bool {
        true
    }

    fn build(&self, problem: &Problem, limits: &Limits) -> Result<LinearModel> {
        LinearModel::from_problem(problem, limits.time_limit)
    }

    async fn solve(&self, model: LinearModel, _limits: &Limits) -> Result<LpOutcome> {
        tokio::task::spawn_blocking(move || solve_blocking(model))
            .await
            .map_err(|e| SolveError::Internal(format!("HiGHS task failed: {e}")))
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

    // Use HiGHS RowProblem (add variables first, then constraints)
    let mut pb = RowProblem::default();
    let cols: Vec<_> = model
        .columns
        .iter()
        .map(|column| {
            if column.integer {
                pb.add_integer_column(column.cost, column.lower..column.upper)
            } else {
                pb.add_column(column.cost, column.lower..column.upper)
            }
        })
        .collect();

    for row in &model.rows {
        let terms: Vec<_> = row.terms.iter().map(|&(i, coeff)| (cols[i], coeff)).collect();
        match row.sense {
            Sense::LessThanOrEqual => pb.add_row(..=row.rhs, &terms),
            Sense::Equal => pb.add_row(row.rhs..=row.rhs, &terms),
            Sense::GreaterThanOrEqual => pb.add_row(row.rhs.., &terms),
        }
    }

    let sense = if model.maximize {
        HighsSense::Maximise
    } else {
        HighsSense::Minimise
    };
    let mut highs_model = pb.optimise(sense);
    if !model.verbose {
        highs_model.make_quiet();
    }
    highs_model.set_option("time_limit", model.time_limit.as_secs_f64());
    if let Some(gap) = model.mip_gap {
        highs_model.set_option("mip_rel_gap", gap);
    }

    let solved = highs_model.solve();
    match solved.status() {
        HighsModelStatus::Optimal => {
            let solution = solved.get_solution();
            let duals = if model.is_mip() {
                Vec::new()
            } else {
                model
                    .rows
                    .iter()
                    .map(|r| r.label.clone())
                    .zip(solution.dual_rows().iter().copied())
                    .collect()
            };
            LpOutcome {
                values: solution.columns().to_vec(),
                duals,
                ..LpOutcome::with_status(LpStatus::Optimal)
            }
        }
        status => LpOutcome::with_status(native_status(status)),
    }
}

/// Statuses without a solution to read back.
fn native_status(status: HighsModelStatus) -> LpStatus {
    match status {
        HighsModelStatus::Infeasible => LpStatus::Infeasible,
        HighsModelStatus::Unbounded => LpStatus::Unbounded,
        HighsModelStatus::UnboundedOrInfeasible => LpStatus::Failed(
            "HiGHS could not tell whether the problem is infeasible or unbounded".into(),
        ),
        HighsModelStatus::ReachedTimeLimit => LpStatus::TimeLimit,
        status => LpStatus::Failed(format!("HiGHS solver returned status: {status:?}")),
    }
}
