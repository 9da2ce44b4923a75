// Domain layer: problem model, results, errors and the solver contract
pub mod domain;

// Expression compiler for symbolic constraints and objectives
pub mod expr;

// Application layer: dispatcher and tool operations
pub mod application;

// Infrastructure layer: configuration, logging, gRPC server
pub mod infrastructure;

// Solver adapters: concrete implementations of SolverService
pub mod solver;

// Re-export commonly used types
pub use domain::{
    ConstraintSpec, Direction, Problem, ProblemFamily, RequestError, SolutionStatus, SolveError,
    SolveResult, SolverOptions, SolverService, Variable, VariableKind,
};

pub use application::{Dispatcher, Tools};
pub use infrastructure::EngineConfig;

#[cfg(feature = "server")]
pub use infrastructure::{start_server, ServerConfig};
