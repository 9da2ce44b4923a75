// Solver options: typed view over the raw option map of a request

use super::errors::ValidationError;
use super::value_objects::{LinearBackend, ProblemFamily};
use serde_json::{Map, Value};

/// Options every family accepts.
pub const COMMON_OPTIONS: &[&str] = &["time_limit", "tolerance", "verbose"];

/// Configuration options for one solve.
///
/// Built from the request's raw option map by [`SolverOptions::parse`], which
/// rejects anything the target family does not recognise.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// Time limit in seconds. `None` means the dispatcher default.
    pub time_limit: Option<f64>,
    /// Numerical tolerance used when checking assignments. `None` means engine default.
    pub tolerance: Option<f64>,
    pub verbose: bool,
    /// Maximum number of assignments to enumerate.
    pub max_solutions: Option<usize>,
    /// Report a conflicting subset of constraints when unsatisfiable.
    pub unsat_core: bool,
    /// Largest collection a subset quantifier may expand.
    pub max_set_size: Option<usize>,
    pub max_iterations: Option<u32>,
    /// Report dual values per constraint.
    pub duals: bool,
    pub backend: LinearBackend,
    /// Relative MIP gap tolerance.
    pub mip_gap: Option<f64>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_limit: None,
            tolerance: None,
            verbose: false,
            max_solutions: None,
            unsat_core: false,
            max_set_size: None,
            max_iterations: None,
            duals: true,
            backend: LinearBackend::Auto,
            mip_gap: None,
        }
    }
}

impl SolverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw option map for the given family.
    pub fn parse(family: ProblemFamily, raw: &Map<String, Value>) -> Result<Self, ValidationError> {
        let mut options = Self::default();
        for (key, value) in raw {
            if !COMMON_OPTIONS.contains(&key.as_str())
                && !family.family_options().contains(&key.as_str())
            {
                return Err(ValidationError::UnsupportedOption {
                    option: key.clone(),
                    family,
                });
            }
            match key.as_str() {
                "time_limit" => options.time_limit = Some(positive_f64(key, value)?),
                "tolerance" => options.tolerance = Some(positive_f64(key, value)?),
                "verbose" => options.verbose = boolean(key, value)?,
                "max_solutions" => options.max_solutions = Some(positive_usize(key, value)?),
                "unsat_core" => options.unsat_core = boolean(key, value)?,
                "max_set_size" => options.max_set_size = Some(positive_usize(key, value)?),
                "max_iterations" => {
                    let n = positive_usize(key, value)?;
                    options.max_iterations = Some(u32::try_from(n).unwrap_or(u32::MAX));
                }
                "duals" => options.duals = boolean(key, value)?,
                "backend" => {
                    let name = value
                        .as_str()
                        .ok_or_else(|| ValidationError::invalid_domain(key, "expected a string"))?;
                    options.backend = LinearBackend::parse(name).ok_or_else(|| {
                        ValidationError::invalid_domain(key, format!("unknown backend '{name}'"))
                    })?;
                }
                "mip_gap" => {
                    let gap = number(key, value)?;
                    if gap < 0.0 {
                        return Err(ValidationError::invalid_domain(key, "must be non-negative"));
                    }
                    options.mip_gap = Some(gap);
                }
                _ => {
                    return Err(ValidationError::UnsupportedOption {
                        option: key.clone(),
                        family,
                    })
                }
            }
        }
        Ok(options)
    }

    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_max_solutions(mut self, count: usize) -> Self {
        self.max_solutions = Some(count);
        self
    }

    pub fn with_unsat_core(mut self, enabled: bool) -> Self {
        self.unsat_core = enabled;
        self
    }

    pub fn with_max_set_size(mut self, size: usize) -> Self {
        self.max_set_size = Some(size);
        self
    }

    pub fn with_backend(mut self, backend: LinearBackend) -> Self {
        self.backend = backend;
        self
    }
}

fn number(key: &str, value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::invalid_domain(key, "expected a finite number"))
}

fn positive_f64(key: &str, value: &Value) -> Result<f64, ValidationError> {
    let v = number(key, value)?;
    if v <= 0.0 {
        return Err(ValidationError::invalid_domain(key, "must be positive"));
    }
    Ok(v)
}

fn positive_usize(key: &str, value: &Value) -> Result<usize, ValidationError> {
    match value.as_u64() {
        Some(0) => Err(ValidationError::invalid_domain(key, "must be at least 1")),
        Some(n) => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
        None => Err(ValidationError::invalid_domain(
            key,
            "expected a non-negative integer",
        )),
    }
}

fn boolean(key: &str, value: &Value) -> Result<bool, ValidationError> {
    value
        .as_bool()
        .ok_or_else(|| ValidationError::invalid_domain(key, "expected true or false"))
}
