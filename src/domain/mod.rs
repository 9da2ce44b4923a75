// Domain module: models, options, results and the solver contract

pub mod errors;
pub mod models;
pub mod options;
pub mod result;
pub mod solver_service;
pub mod value_objects;

pub use errors::*;
pub use models::*;
pub use options::*;
pub use result::*;
pub use solver_service::{Limits, SolverService};
pub use value_objects::*;
