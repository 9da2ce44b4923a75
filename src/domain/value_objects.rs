// Domain value objects representing core modelling concepts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain of a decision variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// Boolean variable (x ∈ {false, true}, reported as 0/1)
    #[serde(alias = "bool", alias = "binary")]
    Boolean,
    /// Integer number (x ∈ ℤ)
    #[serde(alias = "int")]
    Integer,
    /// Continuous real number (x ∈ ℝ)
    #[default]
    #[serde(alias = "real", alias = "float")]
    Continuous,
}

impl VariableKind {
    pub fn is_discrete(self) -> bool {
        matches!(self, VariableKind::Boolean | VariableKind::Integer)
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Boolean => write!(f, "boolean"),
            VariableKind::Integer => write!(f, "integer"),
            VariableKind::Continuous => write!(f, "continuous"),
        }
    }
}

/// Relational sense of a structured constraint row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    /// Less than or equal (≤)
    #[serde(rename = "<=", alias = "le", alias = "leq")]
    LessThanOrEqual,
    /// Equal (=)
    #[serde(rename = "==", alias = "=", alias = "eq")]
    Equal,
    /// Greater than or equal (≥)
    #[serde(rename = ">=", alias = "ge", alias = "geq")]
    GreaterThanOrEqual,
}

impl Sense {
    pub fn holds(self, lhs: f64, rhs: f64, tolerance: f64) -> bool {
        match self {
            Sense::LessThanOrEqual => lhs <= rhs + tolerance,
            Sense::Equal => (lhs - rhs).abs() <= tolerance,
            Sense::GreaterThanOrEqual => lhs + tolerance >= rhs,
        }
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sense::LessThanOrEqual => write!(f, "<="),
            Sense::Equal => write!(f, "=="),
            Sense::GreaterThanOrEqual => write!(f, ">="),
        }
    }
}

/// Direction of optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Minimize the objective function
    #[serde(alias = "min")]
    Minimize,
    /// Maximize the objective function
    #[serde(alias = "max")]
    Maximize,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Minimize => write!(f, "minimize"),
            Direction::Maximize => write!(f, "maximize"),
        }
    }
}

/// Problem family; determines which backend adapter handles a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemFamily {
    ConstraintSatisfaction,
    Convex,
    Linear,
    ConstraintProgramming,
}

impl ProblemFamily {
    /// Options accepted by this family in addition to the common ones.
    pub fn family_options(self) -> &'static [&'static str] {
        match self {
            ProblemFamily::ConstraintSatisfaction => &["max_solutions", "unsat_core", "max_set_size"],
            ProblemFamily::ConstraintProgramming => &["max_solutions", "max_set_size"],
            ProblemFamily::Convex => &["max_iterations", "duals"],
            ProblemFamily::Linear => &["backend", "mip_gap"],
        }
    }

    /// Variable domains the family's engine can represent.
    pub fn supported_kinds(self) -> &'static [VariableKind] {
        match self {
            ProblemFamily::Convex => &[VariableKind::Continuous],
            ProblemFamily::ConstraintProgramming => &[VariableKind::Boolean, VariableKind::Integer],
            ProblemFamily::ConstraintSatisfaction | ProblemFamily::Linear => &[
                VariableKind::Boolean,
                VariableKind::Integer,
                VariableKind::Continuous,
            ],
        }
    }

    /// Whether symbolic expressions may use convex atoms (`norm2`, `square`, ...)
    /// rather than the discrete constructs (`%`, `all_different`, quantifiers over booleans).
    pub fn dialect(self) -> Dialect {
        match self {
            ProblemFamily::Convex => Dialect::Convex,
            _ => Dialect::Symbolic,
        }
    }
}

impl fmt::Display for ProblemFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemFamily::ConstraintSatisfaction => write!(f, "constraint-satisfaction"),
            ProblemFamily::Convex => write!(f, "convex"),
            ProblemFamily::Linear => write!(f, "linear"),
            ProblemFamily::ConstraintProgramming => write!(f, "constraint-programming"),
        }
    }
}

/// Function vocabulary accepted by the expression compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Symbolic,
    Convex,
}

/// Status of a solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    /// Proven optimal solution
    Optimal,
    /// Feasible solution, optimality not proven
    Feasible,
    /// Satisfying assignment for a pure constraint problem
    Satisfiable,
    /// No solution satisfies all constraints
    Infeasible,
    /// Constraint problem has no satisfying assignment
    Unsatisfiable,
    /// Objective can be improved infinitely
    Unbounded,
    /// Time limit or wall-clock ceiling reached
    TimedOut,
    /// Validation, compilation or engine error
    Error,
}

impl SolutionStatus {
    /// Statuses that carry a variable assignment.
    pub fn has_assignment(self) -> bool {
        matches!(
            self,
            SolutionStatus::Optimal | SolutionStatus::Feasible | SolutionStatus::Satisfiable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SolutionStatus::Optimal => "optimal",
            SolutionStatus::Feasible => "feasible",
            SolutionStatus::Satisfiable => "satisfiable",
            SolutionStatus::Infeasible => "infeasible",
            SolutionStatus::Unsatisfiable => "unsatisfiable",
            SolutionStatus::Unbounded => "unbounded",
            SolutionStatus::TimedOut => "timed_out",
            SolutionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear/MIP engine to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearBackend {
    /// HiGHS when compiled in, microlp otherwise
    #[default]
    Auto,
    /// Pure-Rust microlp through good_lp
    Microlp,
    /// HiGHS (requires the `highs` feature)
    Highs,
}

impl LinearBackend {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" => Some(LinearBackend::Auto),
            "microlp" => Some(LinearBackend::Microlp),
            "highs" => Some(LinearBackend::Highs),
            _ => None,
        }
    }
}

impl fmt::Display for LinearBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinearBackend::Auto => write!(f, "auto"),
            LinearBackend::Microlp => write!(f, "microlp"),
            LinearBackend::Highs => write!(f, "HiGHS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sense_holds_with_tolerance() {
        assert!(Sense::LessThanOrEqual.holds(10.0000001, 10.0, 1e-6));
        assert!(!Sense::LessThanOrEqual.holds(10.1, 10.0, 1e-6));
        assert!(Sense::Equal.holds(5.0, 5.0 + 1e-9, 1e-6));
        assert!(Sense::GreaterThanOrEqual.holds(3.0, 3.0, 0.0));
    }

    #[test]
    fn test_status_assignment_grouping() {
        assert!(SolutionStatus::Optimal.has_assignment());
        assert!(SolutionStatus::Satisfiable.has_assignment());
        assert!(!SolutionStatus::TimedOut.has_assignment());
        assert!(!SolutionStatus::Unsatisfiable.has_assignment());
    }

    #[test]
    fn test_sense_deserializes_from_symbols() {
        let sense: Sense = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(sense, Sense::GreaterThanOrEqual);
        let kind: VariableKind = serde_json::from_str("\"int\"").unwrap();
        assert_eq!(kind, VariableKind::Integer);
    }

    #[test]
    fn test_family_tables() {
        assert!(ProblemFamily::Linear.family_options().contains(&"backend"));
        assert!(!ProblemFamily::Convex
            .supported_kinds()
            .contains(&VariableKind::Integer));
        assert_eq!(ProblemFamily::Convex.dialect(), Dialect::Convex);
    }
}
