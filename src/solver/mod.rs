// Solver adapters module

pub mod convex;
pub mod cp_solver;
pub mod csp_solver;
#[cfg(feature = "highs")]
pub mod highs_solver;
pub mod lp_model;
pub mod microlp_solver;
pub mod sexpr;
pub mod smt_process;
pub mod smtlib;

pub use convex::ClarabelSolver;
pub use cp_solver::CpSolver;
pub use csp_solver::CspSolver;
#[cfg(feature = "highs")]
pub use highs_solver::HighsSolver;
pub use microlp_solver::MicrolpSolver;
pub use smt_process::SmtCommand;
