mod common;

use common::tools;
use constrained_opt::SolutionStatus;
use serde_json::json;

#[tokio::test]
async fn duplicate_variable_rejected_before_any_engine() {
    let result = tools()
        .call(
            "solve_constraint_satisfaction",
            json!({
                "variables": [
                    {"name": "x", "type": "integer"},
                    {"name": "x", "type": "boolean"}
                ],
                "constraints": ["x >= 0"]
            }),
        )
        .await;
    assert_eq!(result.status, SolutionStatus::Error);
    assert_eq!(result.diagnostics.error_kind.as_deref(), Some("DUPLICATE_VARIABLE"));
    assert!(result.diagnostics.backend.is_none());
}

#[tokio::test]
async fn objective_without_variables_rejected() {
    let result = tools()
        .call(
            "solve_convex_optimization",
            json!({
                "variables": [{"name": "x"}],
                "objective": {"sense": "minimize", "expression": "3 + 4"},
                "constraints": ["x >= 0"]
            }),
        )
        .await;
    assert_eq!(result.status, SolutionStatus::Error);
    assert_eq!(result.diagnostics.error_kind.as_deref(), Some("EMPTY_OBJECTIVE"));
}

#[tokio::test]
async fn zero_coefficient_objective_rejected() {
    let result = tools()
        .call(
            "solve_linear_programming",
            json!({
                "sense": "maximize",
                "objective_coeffs": [0, 0],
                "variables": [{"name": "a"}, {"name": "b"}]
            }),
        )
        .await;
    assert_eq!(result.diagnostics.error_kind.as_deref(), Some("EMPTY_OBJECTIVE"));
}

#[tokio::test]
async fn cp_max_solutions_zero_is_an_error() {
    let result = tools()
        .call(
            "solve_constraint_programming",
            json!({
                "variables": [{"name": "x", "type": "integer", "lb": 0, "ub": 5}],
                "constraints": ["x >= 2"],
                "max_solutions": 0
            }),
        )
        .await;
    assert_eq!(result.status, SolutionStatus::Error);
    assert_eq!(result.diagnostics.error_kind.as_deref(), Some("INVALID_DOMAIN"));
    assert!(result.values.is_none());
    assert!(result.solutions.is_empty());
}

#[test]
fn unknown_variable_in_structured_row() {
    let report = tools().validate(
        "solve_convex_optimization",
        json!({
            "variables": [{"name": "x"}],
            "objective": {"sense": "minimize", "expression": "square(x)"},
            "constraints": [{"coefficients": {"x": 1, "z": 1}, "sense": "<=", "rhs": 3}]
        }),
    );
    assert!(!report.is_valid);
    assert_eq!(report.error_kind.as_deref(), Some("UNKNOWN_VARIABLE"));
}

#[test]
fn compilation_errors_carry_the_fragment() {
    let cases = [
        ("x + w >= 1", "UNKNOWN_IDENTIFIER", "'w'"),
        ("x + 1", "TYPE_MISMATCH", "'x + 1'"),
        ("x and x > 1", "TYPE_MISMATCH", "'x'"),
        ("x / 0 >= 1", "DIVISION_BY_ZERO", "'x / 0'"),
        ("x + >= 1", "SYNTAX_ERROR", "'x + >= 1'"),
    ];
    for (source, code, fragment) in cases {
        let report = tools().validate(
            "solve_constraint_satisfaction",
            json!({
                "variables": [{"name": "x", "type": "integer"}],
                "constraints": [source]
            }),
        );
        assert_eq!(report.error_kind.as_deref(), Some(code), "{source}");
        assert!(report.errors[0].contains(fragment), "{}", report.errors[0]);
    }
}

#[test]
fn bounds_must_be_ordered() {
    let report = tools().validate(
        "solve_constraint_satisfaction",
        json!({
            "variables": [{"name": "x", "type": "integer", "lb": 5, "ub": 1}],
            "constraints": ["x >= 0"]
        }),
    );
    assert_eq!(report.error_kind.as_deref(), Some("INVALID_DOMAIN"));
}

#[test]
fn subset_expansion_is_bounded() {
    let names: Vec<String> = (0..20).map(|i| format!("v{i}")).collect();
    let variables: Vec<_> = names
        .iter()
        .map(|n| json!({"name": n, "type": "integer", "lb": 0, "ub": 1}))
        .collect();
    let report = tools().validate(
        "solve_constraint_satisfaction",
        json!({
            "variables": variables,
            "sets": {"all": names},
            "constraints": ["forall S in subsets(all, 2): sum(S) != 7"]
        }),
    );
    assert_eq!(report.error_kind.as_deref(), Some("EXPANSION_TOO_LARGE"));
}

#[test]
fn continuous_variables_rejected_by_constraint_programming() {
    let report = tools().validate(
        "solve_constraint_programming",
        json!({
            "variables": [{"name": "r", "type": "continuous"}],
            "constraints": ["r >= 1"]
        }),
    );
    assert_eq!(report.error_kind.as_deref(), Some("INVALID_DOMAIN"));
}

#[test]
fn deeply_nested_and_oversized_expressions_are_rejected() {
    let deep = format!("{}x{} >= 0", "(".repeat(100_000), ")".repeat(100_000));
    let nested = format!("{}x{} >= 0", "(".repeat(500), ")".repeat(500));
    for source in [deep, nested] {
        let report = tools().validate(
            "solve_constraint_satisfaction",
            json!({
                "variables": [{"name": "x", "type": "integer"}],
                "constraints": [source]
            }),
        );
        assert!(!report.is_valid);
        assert_eq!(report.error_kind.as_deref(), Some("SYNTAX_ERROR"));
    }
}

#[tokio::test]
async fn huge_time_limit_is_clamped_not_fatal() {
    let result = tools()
        .call(
            "solve_linear_programming",
            json!({
                "sense": "maximize",
                "objective_coeffs": [1],
                "variables": [{"name": "x", "lb": 0, "ub": 4}],
                "options": {"time_limit": 1e20}
            }),
        )
        .await;
    assert_eq!(result.status, SolutionStatus::Optimal);
    assert!((result.objective_value.unwrap() - 4.0).abs() < 1e-9);
}

#[test]
fn oversized_exponent_rejected() {
    let report = tools().validate(
        "solve_constraint_satisfaction",
        json!({
            "variables": [{"name": "x", "type": "integer", "lb": 2, "ub": 2}],
            "constraints": ["x^2147483648 >= 1"]
        }),
    );
    assert_eq!(report.error_kind.as_deref(), Some("TYPE_MISMATCH"));
}
