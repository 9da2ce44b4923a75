// Convex backend: curvature checking, conic canonicalization and clarabel

pub mod clarabel_solver;
pub mod dcp;

pub use clarabel_solver::ClarabelSolver;
