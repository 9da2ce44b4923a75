// Engine configuration
// Process-wide settings read once at startup and shared read-only by every request

use crate::domain::{Limits, LinearBackend, SolverOptions};
use crate::solver::SmtCommand;
use std::time::Duration;
use tracing::warn;

const ENV_PREFIX: &str = "CONSTRAINED_OPT_";

/// Immutable engine configuration handed to the dispatcher at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Time limit when a request does not set one.
    pub default_time_limit: Duration,
    /// Upper clamp for request time limits.
    pub max_time_limit: Duration,
    /// Extra wall-clock time granted past the time limit before the
    /// dispatcher abandons a solve.
    pub grace: Duration,
    /// Largest collection a subset quantifier may expand.
    pub max_set_size: usize,
    /// Cap on enumerated assignments (`find_all_solutions`, `max_solutions`).
    pub max_enumeration: usize,
    pub smt: SmtCommand,
    pub lp_backend: LinearBackend,
    pub tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_time_limit: Duration::from_secs(30),
            max_time_limit: Duration::from_secs(300),
            grace: Duration::from_secs(2),
            max_set_size: crate::expr::DEFAULT_MAX_SET_SIZE,
            max_enumeration: 100,
            smt: SmtCommand::default(),
            lp_backend: LinearBackend::Auto,
            tolerance: 1e-6,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `CONSTRAINED_OPT_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(secs) = parsed::<f64>(&get, "TIME_LIMIT").and_then(seconds) {
            config.default_time_limit = secs;
        }
        if let Some(secs) = parsed::<f64>(&get, "MAX_TIME_LIMIT").and_then(seconds) {
            config.max_time_limit = secs;
        }
        if let Some(secs) = parsed::<f64>(&get, "GRACE").and_then(seconds) {
            config.grace = secs;
        }
        if let Some(size) = parsed::<usize>(&get, "MAX_SET_SIZE") {
            config.max_set_size = size;
        }
        if let Some(count) = parsed::<usize>(&get, "MAX_SOLUTIONS").filter(|n| *n > 0) {
            config.max_enumeration = count;
        }
        if let Some(tolerance) = parsed::<f64>(&get, "TOLERANCE").filter(|t| *t > 0.0) {
            config.tolerance = tolerance;
        }
        if let Some(program) = get("SMT_BINARY").filter(|p| !p.trim().is_empty()) {
            config.smt.program = program;
        }
        if let Some(args) = get("SMT_ARGS") {
            config.smt.args = args.split_whitespace().map(String::from).collect();
        }
        if let Some(name) = get("LP_BACKEND") {
            match LinearBackend::parse(&name) {
                Some(backend) => config.lp_backend = backend,
                None => warn!(value = %name, "ignoring unknown {ENV_PREFIX}LP_BACKEND"),
            }
        }
        config
    }

    pub fn with_default_time_limit(mut self, limit: Duration) -> Self {
        self.default_time_limit = limit;
        self
    }

    pub fn with_max_time_limit(mut self, limit: Duration) -> Self {
        self.max_time_limit = limit;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_max_set_size(mut self, size: usize) -> Self {
        self.max_set_size = size;
        self
    }

    pub fn with_max_enumeration(mut self, count: usize) -> Self {
        self.max_enumeration = count.max(1);
        self
    }

    pub fn with_smt(mut self, command: SmtCommand) -> Self {
        self.smt = command;
        self
    }

    pub fn with_lp_backend(mut self, backend: LinearBackend) -> Self {
        self.lp_backend = backend;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Resolve the limits for one solve from its options.
    pub fn limits(&self, options: &SolverOptions) -> Limits {
        let time_limit = options
            .time_limit
            .map(|secs| secs.min(self.max_time_limit.as_secs_f64()))
            .and_then(seconds)
            .unwrap_or(self.default_time_limit)
            .min(self.max_time_limit);
        Limits {
            time_limit,
            tolerance: options.tolerance.unwrap_or(self.tolerance),
            max_solutions: options
                .max_solutions
                .unwrap_or(1)
                .clamp(1, self.max_enumeration),
            verbose: options.verbose,
        }
    }

    /// Hard wall-clock ceiling for a solve with the given limits.
    pub fn ceiling(&self, limits: &Limits) -> Duration {
        limits.time_limit.saturating_add(self.grace)
    }

    /// Backend for a linear request, `Auto` resolved against the compiled features.
    pub fn linear_backend(&self, requested: LinearBackend) -> LinearBackend {
        let backend = match requested {
            LinearBackend::Auto => self.lp_backend,
            other => other,
        };
        match backend {
            LinearBackend::Auto if cfg!(feature = "highs") => LinearBackend::Highs,
            LinearBackend::Auto => LinearBackend::Microlp,
            other => other,
        }
    }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = get(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(value = %raw, "ignoring unparseable {ENV_PREFIX}{name}");
            None
        }
    }
}

fn seconds(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
