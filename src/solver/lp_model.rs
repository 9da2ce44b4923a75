// Structured matrix form shared by the linear/MIP adapters
// Both good_lp (microlp) and HiGHS consume the same columns and rows

use crate::domain::{
    ConstraintKind, Diagnostics, Direction, NamedValues, ObjectiveKind, Problem, Sense,
    SolutionStatus, SolveError, SolveResult, VariableKind,
};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub integer: bool,
    pub lower: f64,
    pub upper: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub label: String,
    pub terms: Vec<(usize, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

/// Linear model in column/row form, built once per request.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub maximize: bool,
    pub time_limit: Duration,
    pub mip_gap: Option<f64>,
    pub verbose: bool,
    /// Label of a row without variables whose constant side already fails.
    pub infeasible_row: Option<String>,
}

impl LinearModel {
    pub fn from_problem(problem: &Problem, time_limit: Duration) -> Result<Self, SolveError> {
        let objective = problem
            .objective()
            .ok_or_else(|| SolveError::Internal("linear problem without objective".into()))?;
        let costs = match &objective.kind {
            ObjectiveKind::Linear(costs) => costs,
            _ => {
                return Err(SolveError::Internal(
                    "linear backend received a non-linear objective".into(),
                ))
            }
        };

        let columns = problem
            .variables()
            .iter()
            .enumerate()
            .map(|(i, variable)| {
                let (lower, upper) = variable.bounds();
                Column {
                    integer: variable.kind != VariableKind::Continuous,
                    lower,
                    upper,
                    cost: costs.get(i).copied().unwrap_or(0.0),
                }
            })
            .collect();

        let mut rows = Vec::with_capacity(problem.constraints().len());
        let mut infeasible_row = None;
        for constraint in problem.constraints() {
            let row = match &constraint.kind {
                ConstraintKind::Linear(row) => row,
                _ => {
                    return Err(SolveError::Internal(format!(
                        "constraint '{}' is not a linear row",
                        constraint.label
                    )))
                }
            };
            if row.terms.is_empty() {
                if !row.sense.holds(0.0, row.rhs, 1e-9) && infeasible_row.is_none() {
                    infeasible_row = Some(constraint.label.clone());
                }
                continue;
            }
            rows.push(Row {
                label: constraint.label.clone(),
                terms: row.terms.clone(),
                sense: row.sense,
                rhs: row.rhs,
            });
        }

        Ok(Self {
            columns,
            rows,
            maximize: objective.direction == Direction::Maximize,
            time_limit,
            mip_gap: problem.options().mip_gap,
            verbose: problem.options().verbose,
            infeasible_row,
        })
    }

    pub fn is_mip(&self) -> bool {
        self.columns.iter().any(|c| c.integer)
    }
}

/// Native status, one variant per canonical outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
    TimeLimit,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpOutcome {
    pub status: LpStatus,
    pub values: Vec<f64>,
    /// Row duals aligned with `LinearModel::rows` labels.
    pub duals: Vec<(String, f64)>,
    pub iterations: Option<u64>,
    pub nodes: Option<u64>,
}

impl LpOutcome {
    pub fn with_status(status: LpStatus) -> Self {
        Self {
            status,
            values: Vec::new(),
            duals: Vec::new(),
            iterations: None,
            nodes: None,
        }
    }
}

/// Map a native linear outcome onto the canonical result.
pub fn translate_outcome(problem: &Problem, backend: &str, outcome: LpOutcome) -> SolveResult {
    let mut diagnostics = Diagnostics::for_backend(backend);
    diagnostics.iterations = outcome.iterations;
    diagnostics.nodes_explored = outcome.nodes;

    let status = match outcome.status {
        LpStatus::Optimal => SolutionStatus::Optimal,
        LpStatus::Infeasible => {
            return SolveResult::new(SolutionStatus::Infeasible)
                .with_message("Problem is infeasible: no solution satisfies all constraints")
                .with_diagnostics(diagnostics)
        }
        LpStatus::Unbounded => {
            return SolveResult::new(SolutionStatus::Unbounded)
                .with_message("Problem is unbounded: objective can be improved infinitely")
                .with_diagnostics(diagnostics)
        }
        LpStatus::TimeLimit => {
            diagnostics.error_kind = Some("TIMEOUT".into());
            return SolveResult::new(SolutionStatus::TimedOut)
                .with_message("time limit reached before a solution was proven")
                .with_diagnostics(diagnostics);
        }
        LpStatus::Failed(message) => {
            let err = SolveError::EngineFailure(message);
            diagnostics.error_kind = Some(err.code().to_string());
            return SolveResult::new(SolutionStatus::Error)
                .with_message(err.to_string())
                .with_diagnostics(diagnostics);
        }
    };

    let values: Vec<f64> = problem
        .variables()
        .iter()
        .zip(&outcome.values)
        .map(|(variable, &value)| {
            if variable.kind.is_discrete() {
                value.round()
            } else {
                value
            }
        })
        .collect();

    diagnostics.duals = outcome.duals.into_iter().collect();
    let named: NamedValues = problem
        .variables()
        .iter()
        .map(|v| v.name.as_str())
        .zip(values.iter().copied())
        .collect();
    let mut result = SolveResult::new(status)
        .with_values(named)
        .with_diagnostics(diagnostics);
    if let Some(objective) = problem.objective_value(&values) {
        result = result.with_objective(objective);
    }
    result
}
