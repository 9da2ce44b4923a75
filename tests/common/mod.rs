#![allow(dead_code)]

use constrained_opt::domain::LinearBackend;
use constrained_opt::solver::SmtCommand;
use constrained_opt::{EngineConfig, Tools};
use std::sync::Arc;

pub fn tools() -> Tools {
    Tools::new(Arc::new(
        EngineConfig::new().with_lp_backend(LinearBackend::Microlp),
    ))
}

/// Tests that need the SMT engine return early when it is not installed.
pub async fn smt_available() -> bool {
    let available = SmtCommand::default().is_available().await;
    if !available {
        eprintln!("z3 not found on PATH, skipping");
    }
    available
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual}"
    );
}
