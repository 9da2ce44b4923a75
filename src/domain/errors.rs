// Error taxonomy: validation, compilation and solve errors

use super::value_objects::{ProblemFamily, VariableKind};

/// Structural problems found while building a Problem. Never reaches a backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("variable '{0}' is declared more than once")]
    DuplicateVariable(String),

    #[error("{context} references undeclared variable '{name}'")]
    UnknownVariable { name: String, context: String },

    #[error("invalid domain for '{name}': {reason}")]
    InvalidDomain { name: String, reason: String },

    #[error("option '{option}' is not supported by the {family} solver")]
    UnsupportedOption { option: String, family: ProblemFamily },

    #[error("{kind} variable '{name}' cannot be handled by the {family} solver")]
    UnsupportedKind {
        name: String,
        kind: VariableKind,
        family: ProblemFamily,
    },

    #[error("{constraint} constraints are not supported by the {family} solver")]
    UnsupportedConstraint {
        constraint: String,
        family: ProblemFamily,
    },

    #[error("objective does not reference any variable")]
    EmptyObjective,

    #[error("the {family} solver requires an objective")]
    MissingObjective { family: ProblemFamily },

    #[error("{what} has {found} entries but {expected} were expected")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },
}

impl ValidationError {
    pub fn invalid_domain(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidDomain {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::DuplicateVariable(_) => "DUPLICATE_VARIABLE",
            ValidationError::UnknownVariable { .. } => "UNKNOWN_VARIABLE",
            ValidationError::InvalidDomain { .. } => "INVALID_DOMAIN",
            ValidationError::UnsupportedOption { .. } => "UNSUPPORTED_OPTION",
            ValidationError::UnsupportedKind { .. } => "INVALID_DOMAIN",
            ValidationError::UnsupportedConstraint { .. } => "UNSUPPORTED_CONSTRAINT",
            ValidationError::EmptyObjective => "EMPTY_OBJECTIVE",
            ValidationError::MissingObjective { .. } => "MISSING_OBJECTIVE",
            ValidationError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
        }
    }
}

/// Errors raised by the expression compiler, carrying the offending fragment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompilationError {
    #[error("syntax error at offset {position} in '{fragment}': {message}")]
    Syntax {
        message: String,
        position: usize,
        fragment: String,
    },

    #[error("unknown identifier '{identifier}' in '{fragment}'")]
    UnknownIdentifier { identifier: String, fragment: String },

    #[error("type mismatch in '{fragment}': {message}")]
    TypeMismatch { message: String, fragment: String },

    #[error("division by zero in '{fragment}'")]
    DivisionByZero { fragment: String },

    #[error("expanding '{collection}' ({size} members) exceeds the maximum set size {limit}")]
    ExpansionTooLarge {
        collection: String,
        size: usize,
        limit: usize,
    },
}

impl CompilationError {
    pub fn code(&self) -> &'static str {
        match self {
            CompilationError::Syntax { .. } => "SYNTAX_ERROR",
            CompilationError::UnknownIdentifier { .. } => "UNKNOWN_IDENTIFIER",
            CompilationError::TypeMismatch { .. } => "TYPE_MISMATCH",
            CompilationError::DivisionByZero { .. } => "DIVISION_BY_ZERO",
            CompilationError::ExpansionTooLarge { .. } => "EXPANSION_TOO_LARGE",
        }
    }
}

/// Errors raised at the adapter boundary. Always converted into a Result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("time limit of {seconds:.3}s reached")]
    Timeout { seconds: f64 },

    #[error("problem is not convex: {0}")]
    NotConvex(String),

    #[error("internal solver error")]
    Internal(String),
}

impl SolveError {
    pub fn code(&self) -> &'static str {
        match self {
            SolveError::EngineFailure(_) => "ENGINE_FAILURE",
            SolveError::Timeout { .. } => "TIMEOUT",
            SolveError::NotConvex(_) => "NOT_CONVEX",
            SolveError::Internal(_) => "INTERNAL",
        }
    }
}

/// Anything that rejects a request before an engine is invoked.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::Validation(e) => e.code(),
            RequestError::Compilation(e) => e.code(),
            RequestError::Malformed(_) => "MALFORMED_REQUEST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::DuplicateVariable("x".into());
        assert_eq!(err.to_string(), "variable 'x' is declared more than once");
        assert_eq!(err.code(), "DUPLICATE_VARIABLE");
    }

    #[test]
    fn test_compilation_error_carries_fragment() {
        let err = CompilationError::DivisionByZero {
            fragment: "x / 0".into(),
        };
        assert!(err.to_string().contains("x / 0"));
        assert_eq!(err.code(), "DIVISION_BY_ZERO");
    }

    #[test]
    fn test_internal_error_hides_details() {
        let err = SolveError::Internal("panicked at src/ffi.rs:42".into());
        assert_eq!(err.to_string(), "internal solver error");
    }

    #[test]
    fn test_request_error_code_passthrough() {
        let err: RequestError = ValidationError::EmptyObjective.into();
        assert_eq!(err.code(), "EMPTY_OBJECTIVE");
    }
}
