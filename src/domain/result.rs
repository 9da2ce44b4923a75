// Canonical result shared by every backend

use super::errors::{RequestError, SolveError};
use super::value_objects::SolutionStatus;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Ordered `name -> value` mapping, serialized as a JSON object in
/// insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NamedValues(Vec<(String, f64)>);

impl NamedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        self.0.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn values(&self) -> Vec<f64> {
        self.0.iter().map(|(_, v)| *v).collect()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for NamedValues {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v)).collect())
    }
}

impl Serialize for NamedValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Secondary information about a solve
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solve_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes_explored: Option<u64>,
    /// Dual value per constraint label.
    #[serde(skip_serializing_if = "NamedValues::is_empty")]
    pub duals: NamedValues,
    /// Labels of a conflicting constraint subset.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflict: Vec<String>,
    /// Stable error code when the status is `error` or `timed_out`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl Diagnostics {
    pub fn for_backend(name: impl Into<String>) -> Self {
        Self {
            backend: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Outcome of a solve, identical in shape for every family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveResult {
    pub status: SolutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<NamedValues>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_value: Option<f64>,
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Every enumerated assignment when more than one was requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub solutions: Vec<NamedValues>,
}

impl SolveResult {
    pub fn new(status: SolutionStatus) -> Self {
        Self {
            status,
            values: None,
            objective_value: None,
            diagnostics: Diagnostics::default(),
            message: None,
            solutions: Vec::new(),
        }
    }

    pub fn with_values(mut self, values: NamedValues) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_objective(mut self, value: f64) -> Self {
        self.objective_value = Some(value);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_solutions(mut self, solutions: Vec<NamedValues>) -> Self {
        self.solutions = solutions;
        self
    }

    /// Error result for a request rejected before any engine ran.
    pub fn rejected(err: &RequestError) -> Self {
        let mut result = Self::new(SolutionStatus::Error).with_message(err.to_string());
        result.diagnostics.error_kind = Some(err.code().to_string());
        result
    }

    /// Result for a failure at the adapter boundary.
    pub fn failed(err: &SolveError) -> Self {
        let status = match err {
            SolveError::Timeout { .. } => SolutionStatus::TimedOut,
            _ => SolutionStatus::Error,
        };
        let mut result = Self::new(status).with_message(err.to_string());
        result.diagnostics.error_kind = Some(err.code().to_string());
        result
    }

    pub fn is_success(&self) -> bool {
        self.status.has_assignment()
    }

    /// Drop any assignment and mark the result as an error.
    pub fn into_error(mut self, kind: &str, message: impl Into<String>) -> Self {
        self.status = SolutionStatus::Error;
        self.values = None;
        self.objective_value = None;
        self.solutions.clear();
        self.message = Some(message.into());
        self.diagnostics.error_kind = Some(kind.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ValidationError;
    use serde_json::json;

    #[test]
    fn test_values_serialize_in_declaration_order() {
        let values: NamedValues = [("zeta", 1.0), ("alpha", 2.0)].into_iter().collect();
        let text = serde_json::to_string(&values).unwrap();
        assert_eq!(text, r#"{"zeta":1.0,"alpha":2.0}"#);
    }

    #[test]
    fn test_result_schema() {
        let mut diagnostics = Diagnostics::for_backend("microlp");
        diagnostics.solve_time_ms = Some(1.5);
        let result = SolveResult::new(SolutionStatus::Optimal)
            .with_values([("a", 40.0), ("b", 20.0)].into_iter().collect())
            .with_objective(160.0)
            .with_diagnostics(diagnostics);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "status": "optimal",
                "values": {"a": 40.0, "b": 20.0},
                "objective_value": 160.0,
                "diagnostics": {"backend": "microlp", "solve_time_ms": 1.5}
            })
        );
    }

    #[test]
    fn test_rejected_carries_error_kind() {
        let err: RequestError = ValidationError::DuplicateVariable("x".into()).into();
        let result = SolveResult::rejected(&err);
        assert_eq!(result.status, SolutionStatus::Error);
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("DUPLICATE_VARIABLE"));
        assert!(result.values.is_none());
    }

    #[test]
    fn test_timeout_maps_to_timed_out() {
        let result = SolveResult::failed(&SolveError::Timeout { seconds: 2.0 });
        assert_eq!(result.status, SolutionStatus::TimedOut);
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("TIMEOUT"));
    }
}
