// Clarabel Solver Adapter
// Interior point conic solver for LP, QP and SOCP problems

use super::dcp::{canonicalize, Cone, ConicForm};
use crate::domain::{
    solver_service::{Limits, Result},
    Diagnostics, NamedValues, Problem, SolutionStatus, SolveError, SolveResult, SolverService,
};
use clarabel::algebra::CscMatrix;
use clarabel::solver::implementations::default::{DefaultSettings, DefaultSettingsBuilder};
use clarabel::solver::SupportedConeT::{self, *};
use clarabel::solver::{DefaultSolver, IPSolver, SolverStatus};
use tracing::debug;

/// Relative slack allowed on the smallest eigenvalue of a quadratic objective.
const PSD_TOLERANCE: f64 = 1e-9;

pub struct ClarabelSolver;

impl ClarabelSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClarabelSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Native clarabel input: `min ½xᵀPx + qᵀx  s.t.  Ax + s = b, s ∈ K`.
pub struct ConicModel {
    p: CscMatrix<f64>,
    q: Vec<f64>,
    a: CscMatrix<f64>,
    b: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
    settings: DefaultSettings<f64>,
    num_declared: usize,
    dual_rows: Vec<(String, usize)>,
    report_duals: bool,
}

pub struct ConicOutcome {
    status: SolverStatus,
    x: Vec<f64>,
    z: Vec<f64>,
    iterations: u32,
    num_declared: usize,
    dual_rows: Vec<(String, usize)>,
    report_duals: bool,
}

impl SolverService for ClarabelSolver {
    type Model = ConicModel;
    type Outcome = ConicOutcome;

    fn name(&self) -> &str {
        "clarabel"
    }

    fn supports_mip(&self) -> bool {
        false
    }

    fn build(&self, problem: &Problem, limits: &Limits) -> Result<ConicModel> {
        let form = canonicalize(problem, PSD_TOLERANCE)?;
        debug!(
            columns = form.num_columns,
            rows = form.num_rows(),
            cones = form.blocks.len(),
            "canonicalized convex problem"
        );

        let mut settings = DefaultSettingsBuilder::default();
        settings
            .verbose(limits.verbose)
            .time_limit(limits.time_limit.as_secs_f64());
        if let Some(max_iter) = problem.options().max_iterations {
            settings.max_iter(max_iter);
        }
        let settings = settings
            .build()
            .map_err(|e| SolveError::Internal(format!("invalid clarabel settings: {e}")))?;

        Ok(into_model(form, settings, problem.options().duals))
    }

    async fn solve(&self, model: ConicModel, _limits: &Limits) -> Result<ConicOutcome> {
        tokio::task::spawn_blocking(move || solve_blocking(model))
            .await
            .map_err(|e| SolveError::Internal(format!("clarabel task failed: {e}")))?
    }

    fn translate(&self, problem: &Problem, outcome: ConicOutcome) -> SolveResult {
        let mut diagnostics = Diagnostics::for_backend(self.name());
        diagnostics.iterations = Some(u64::from(outcome.iterations));

        let status = match outcome.status {
            SolverStatus::Solved => SolutionStatus::Optimal,
            SolverStatus::AlmostSolved => SolutionStatus::Feasible,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                return SolveResult::new(SolutionStatus::Infeasible)
                    .with_message("Problem is infeasible: no solution satisfies all constraints")
                    .with_diagnostics(diagnostics)
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                return SolveResult::new(SolutionStatus::Unbounded)
                    .with_message("Problem is unbounded: objective can be improved infinitely")
                    .with_diagnostics(diagnostics)
            }
            SolverStatus::MaxTime => {
                diagnostics.error_kind = Some("TIMEOUT".into());
                return SolveResult::new(SolutionStatus::TimedOut)
                    .with_message("time limit reached before convergence")
                    .with_diagnostics(diagnostics);
            }
            other => {
                let err = SolveError::EngineFailure(format!("clarabel stopped with status {other:?}"));
                diagnostics.error_kind = Some(err.code().to_string());
                return SolveResult::new(SolutionStatus::Error)
                    .with_message(err.to_string())
                    .with_diagnostics(diagnostics);
            }
        };

        let values: Vec<f64> = outcome.x.iter().take(outcome.num_declared).copied().collect();
        if outcome.report_duals {
            diagnostics.duals = outcome
                .dual_rows
                .iter()
                .filter_map(|(label, row)| outcome.z.get(*row).map(|z| (label.as_str(), *z)))
                .collect();
        }
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
}

fn solve_blocking(model: ConicModel) -> Result<ConicOutcome> {
    let mut solver = DefaultSolver::new(&model.p, &model.q, &model.a, &model.b, &model.cones, model.settings)
        .map_err(|e| SolveError::EngineFailure(format!("clarabel rejected the model: {e:?}")))?;
    solver.solve();
    Ok(ConicOutcome {
        status: solver.solution.status.clone(),
        x: solver.solution.x.clone(),
        z: solver.solution.z.clone(),
        iterations: solver.solution.iterations,
        num_declared: model.num_declared,
        dual_rows: model.dual_rows,
        report_duals: model.report_duals,
    })
}

fn into_model(form: ConicForm, settings: DefaultSettings<f64>, report_duals: bool) -> ConicModel {
    let n = form.num_columns;
    let mut a_rows = Vec::with_capacity(form.num_rows());
    let mut b = Vec::with_capacity(form.num_rows());
    let mut cones = Vec::with_capacity(form.blocks.len());
    for block in form.blocks {
        cones.push(match block.cone {
            Cone::Zero => ZeroConeT(block.rows.len()),
            Cone::Nonnegative => NonnegativeConeT(block.rows.len()),
            Cone::SecondOrder => SecondOrderConeT(block.rows.len()),
        });
        for row in block.rows {
            // s = row(x)  <=>  -row.terms·x + s = row.constant
            a_rows.push(row.terms.into_iter().map(|(j, c)| (j, -c)).collect::<Vec<_>>());
            b.push(row.constant);
        }
    }

    let mut a_entries = Vec::new();
    for (i, row) in a_rows.iter().enumerate() {
        for &(j, c) in row {
            a_entries.push((i, j, c));
        }
    }

    let mut q = form.linear;
    q.resize(n, 0.0);
    ConicModel {
        p: csc(n, n, &form.quadratic),
        q,
        a: csc(b.len(), n, &a_entries),
        b,
        cones,
        settings,
        num_declared: form.num_declared,
        dual_rows: form.dual_rows,
        report_duals,
    }
}

/// Compressed sparse column matrix from `(row, col, value)` entries given in
/// ascending row order per column.
fn csc(m: usize, n: usize, entries: &[(usize, usize, f64)]) -> CscMatrix<f64> {
    let mut rowval = vec![Vec::new(); n];
    let mut nzval = vec![Vec::new(); n];
    for &(i, j, v) in entries {
        rowval[j].push(i);
        nzval[j].push(v);
    }
    let mut colptr = Vec::with_capacity(n + 1);
    colptr.push(0);
    let mut total = 0;
    for col in &rowval {
        total += col.len();
        colptr.push(total);
    }
    CscMatrix::new(
        m,
        n,
        colptr,
        rowval.into_iter().flatten().collect(),
        nzval.into_iter().flatten().collect(),
    )
}
