// Tool surface: one typed request per problem family, a generic JSON entry
// point and dry-run validation

use super::dispatcher::Dispatcher;
use super::portfolio::PortfolioRequest;
use crate::domain::{
    Coefficients, ConstraintSpec, Direction, IntervalSpec, LinearSpec, ObjectiveSpec, Problem,
    ProblemFamily, RequestError, Sense, SolveResult, SolverOptions, ValidationError, Variable,
};
use crate::infrastructure::EngineConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Static description of one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub family: &'static str,
    pub engine: &'static str,
    pub description: &'static str,
}

pub const TOOLS: &[ToolInfo] = &[
    ToolInfo {
        name: "solve_constraint_satisfaction",
        family: "constraint-satisfaction",
        engine: "smt",
        description: "Find an assignment (or all assignments) satisfying symbolic constraints",
    },
    ToolInfo {
        name: "solve_convex_optimization",
        family: "convex",
        engine: "clarabel",
        description: "Minimise a convex or maximise a concave objective under convex constraints",
    },
    ToolInfo {
        name: "solve_linear_programming",
        family: "linear",
        engine: "microlp / HiGHS",
        description: "Linear and mixed-integer programs in matrix form",
    },
    ToolInfo {
        name: "solve_constraint_programming",
        family: "constraint-programming",
        engine: "smt-opt",
        description: "Finite-domain models with global and scheduling constraints",
    },
    ToolInfo {
        name: "solve_portfolio_optimization",
        family: "convex",
        engine: "clarabel",
        description: "Mean-variance portfolio allocation",
    },
];

/// Tools addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ConstraintSatisfaction,
    Convex,
    Linear,
    ConstraintProgramming,
    Portfolio,
}

impl Tool {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "solve_constraint_satisfaction" => Some(Tool::ConstraintSatisfaction),
            "solve_convex_optimization" => Some(Tool::Convex),
            "solve_linear_programming" => Some(Tool::Linear),
            "solve_constraint_programming" => Some(Tool::ConstraintProgramming),
            "solve_portfolio_optimization" => Some(Tool::Portfolio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CspRequest {
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    /// Named variable collections for aggregates and quantifiers.
    #[serde(default)]
    pub sets: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub find_all_solutions: bool,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl CspRequest {
    pub fn into_problem(self, config: &EngineConfig) -> Result<Problem, RequestError> {
        let family = ProblemFamily::ConstraintSatisfaction;
        let mut options = SolverOptions::parse(family, &self.options)?;
        if self.find_all_solutions && options.max_solutions.is_none() {
            options.max_solutions = Some(config.max_enumeration);
        }
        let mut builder = Problem::builder(family)
            .variables(self.variables)
            .constraints(self.constraints)
            .options(options)
            .max_set_size(config.max_set_size);
        for (name, members) in self.sets {
            builder = builder.set(name, members);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpressionObjective {
    pub sense: Direction,
    pub expression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvexRequest {
    pub variables: Vec<Variable>,
    pub objective: ExpressionObjective,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ConvexRequest {
    pub fn into_problem(self, config: &EngineConfig) -> Result<Problem, RequestError> {
        let family = ProblemFamily::Convex;
        Problem::builder(family)
            .variables(self.variables)
            .constraints(self.constraints)
            .objective(ObjectiveSpec::expression(
                self.objective.sense,
                self.objective.expression,
            ))
            .options(SolverOptions::parse(family, &self.options)?)
            .max_set_size(config.max_set_size)
            .build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LpRequest {
    pub sense: Direction,
    pub objective_coeffs: Vec<f64>,
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub constraint_matrix: Vec<Vec<f64>>,
    #[serde(default)]
    pub constraint_senses: Vec<Sense>,
    #[serde(default)]
    pub rhs_values: Vec<f64>,
    /// Optional row labels, defaulting to `c{i}`.
    #[serde(default)]
    pub constraint_names: Vec<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl LpRequest {
    pub fn into_problem(self, config: &EngineConfig) -> Result<Problem, RequestError> {
        let family = ProblemFamily::Linear;
        let n = self.variables.len();
        let rows = self.constraint_matrix.len();
        expect_len("objective_coeffs", n, self.objective_coeffs.len())?;
        expect_len("constraint_senses", rows, self.constraint_senses.len())?;
        expect_len("rhs_values", rows, self.rhs_values.len())?;
        if !self.constraint_names.is_empty() {
            expect_len("constraint_names", rows, self.constraint_names.len())?;
        }
        for (i, row) in self.constraint_matrix.iter().enumerate() {
            expect_len(&format!("constraint_matrix row {i}"), n, row.len())?;
        }

        let mut names = self.constraint_names.into_iter();
        let constraints: Vec<ConstraintSpec> = self
            .constraint_matrix
            .into_iter()
            .zip(self.constraint_senses)
            .zip(self.rhs_values)
            .map(|((row, sense), rhs)| {
                ConstraintSpec::Linear(LinearSpec {
                    coefficients: Coefficients::Dense(row),
                    sense,
                    rhs,
                    name: names.next(),
                })
            })
            .collect();

        Problem::builder(family)
            .variables(self.variables)
            .constraints(constraints)
            .objective(ObjectiveSpec::linear(self.sense, self.objective_coeffs))
            .options(SolverOptions::parse(family, &self.options)?)
            .max_set_size(config.max_set_size)
            .build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CpRequest {
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub intervals: Vec<IntervalSpec>,
    #[serde(default)]
    pub sets: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub objective: Option<ExpressionObjective>,
    #[serde(default)]
    pub max_solutions: Option<u64>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl CpRequest {
    pub fn into_problem(self, config: &EngineConfig) -> Result<Problem, RequestError> {
        let family = ProblemFamily::ConstraintProgramming;
        let mut options = SolverOptions::parse(family, &self.options)?;
        match self.max_solutions {
            Some(0) => {
                return Err(
                    ValidationError::invalid_domain("max_solutions", "must be at least 1").into(),
                )
            }
            Some(n) => options.max_solutions = Some(usize::try_from(n).unwrap_or(usize::MAX)),
            None => {}
        }
        let mut builder = Problem::builder(family)
            .variables(self.variables)
            .constraints(self.constraints)
            .options(options)
            .max_set_size(config.max_set_size);
        for (name, members) in self.sets {
            builder = builder.set(name, members);
        }
        for interval in self.intervals {
            builder = builder.interval(interval);
        }
        if let Some(objective) = self.objective {
            builder = builder.objective(ObjectiveSpec::expression(objective.sense, objective.expression));
        }
        builder.build()
    }
}

fn expect_len(what: &str, expected: usize, found: usize) -> Result<(), ValidationError> {
    if expected == found {
        Ok(())
    } else {
        Err(ValidationError::DimensionMismatch {
            what: what.to_string(),
            expected,
            found,
        })
    }
}

/// Outcome of a dry-run validation.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub num_variables: usize,
    pub num_constraints: usize,
    pub num_integer_vars: usize,
}

impl ValidationReport {
    fn rejected(err: &RequestError) -> Self {
        Self {
            is_valid: false,
            errors: vec![err.to_string()],
            error_kind: Some(err.code().to_string()),
            ..Self::default()
        }
    }
}

/// The five solve operations plus validation, sharing one dispatcher.
pub struct Tools {
    dispatcher: Dispatcher,
}

impl Tools {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            dispatcher: Dispatcher::new(config),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn config(&self) -> &EngineConfig {
        self.dispatcher.config()
    }

    pub async fn solve_constraint_satisfaction(&self, request: CspRequest) -> SolveResult {
        self.solve_built(request.into_problem(self.config())).await
    }

    pub async fn solve_convex_optimization(&self, request: ConvexRequest) -> SolveResult {
        self.solve_built(request.into_problem(self.config())).await
    }

    pub async fn solve_linear_programming(&self, request: LpRequest) -> SolveResult {
        self.solve_built(request.into_problem(self.config())).await
    }

    pub async fn solve_constraint_programming(&self, request: CpRequest) -> SolveResult {
        self.solve_built(request.into_problem(self.config())).await
    }

    pub async fn solve_portfolio_optimization(&self, request: PortfolioRequest) -> SolveResult {
        match request.into_model(self.config()) {
            Ok(model) => {
                let result = self.dispatcher.solve(&model.problem).await;
                model.report(result)
            }
            Err(err) => reject(&err),
        }
    }

    /// Run a tool by name with JSON arguments.
    pub async fn call(&self, tool: &str, arguments: Value) -> SolveResult {
        let Some(parsed) = Tool::parse(tool) else {
            return reject(&RequestError::Malformed(format!("unknown tool '{tool}'")));
        };
        match parsed {
            Tool::ConstraintSatisfaction => match decode(arguments) {
                Ok(request) => self.solve_constraint_satisfaction(request).await,
                Err(err) => reject(&err),
            },
            Tool::Convex => match decode(arguments) {
                Ok(request) => self.solve_convex_optimization(request).await,
                Err(err) => reject(&err),
            },
            Tool::Linear => match decode(arguments) {
                Ok(request) => self.solve_linear_programming(request).await,
                Err(err) => reject(&err),
            },
            Tool::ConstraintProgramming => match decode(arguments) {
                Ok(request) => self.solve_constraint_programming(request).await,
                Err(err) => reject(&err),
            },
            Tool::Portfolio => match decode(arguments) {
                Ok(request) => self.solve_portfolio_optimization(request).await,
                Err(err) => reject(&err),
            },
        }
    }

    /// Build and compile the problem a tool call describes without solving it.
    pub fn validate(&self, tool: &str, arguments: Value) -> ValidationReport {
        match self.build(tool, arguments) {
            Ok(problem) => ValidationReport {
                is_valid: true,
                errors: Vec::new(),
                error_kind: None,
                num_variables: problem.variables().len(),
                num_constraints: problem.constraints().len(),
                num_integer_vars: problem.num_integer_variables(),
            },
            Err(err) => ValidationReport::rejected(&err),
        }
    }

    fn build(&self, tool: &str, arguments: Value) -> Result<Problem, RequestError> {
        let config = self.config();
        match Tool::parse(tool) {
            Some(Tool::ConstraintSatisfaction) => decode::<CspRequest>(arguments)?.into_problem(config),
            Some(Tool::Convex) => decode::<ConvexRequest>(arguments)?.into_problem(config),
            Some(Tool::Linear) => decode::<LpRequest>(arguments)?.into_problem(config),
            Some(Tool::ConstraintProgramming) => decode::<CpRequest>(arguments)?.into_problem(config),
            Some(Tool::Portfolio) => Ok(decode::<PortfolioRequest>(arguments)?.into_model(config)?.problem),
            None => Err(RequestError::Malformed(format!("unknown tool '{tool}'"))),
        }
    }

    async fn solve_built(&self, problem: Result<Problem, RequestError>) -> SolveResult {
        match problem {
            Ok(problem) => self.dispatcher.solve(&problem).await,
            Err(err) => reject(&err),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, RequestError> {
    serde_json::from_value(arguments).map_err(|e| RequestError::Malformed(e.to_string()))
}

fn reject(err: &RequestError) -> SolveResult {
    match err {
        RequestError::Malformed(_) => warn!(error = %err, "malformed request"),
        _ => debug!(code = err.code(), error = %err, "request rejected"),
    }
    SolveResult::rejected(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LinearBackend, SolutionStatus};
    use serde_json::json;

    fn tools() -> Tools {
        Tools::new(Arc::new(
            EngineConfig::new().with_lp_backend(LinearBackend::Microlp),
        ))
    }

    fn diet() -> Value {
        json!({
            "sense": "minimize",
            "objective_coeffs": [12, 20],
            "variables": [
                {"name": "x", "lb": 0},
                {"name": "y", "lb": 0, "ub": 3}
            ],
            "constraint_matrix": [[6, 8], [7, 12]],
            "constraint_senses": [">=", ">="],
            "rhs_values": [100, 120]
        })
    }

    #[tokio::test]
    async fn test_call_linear_programming() {
        let result = tools().call("solve_linear_programming", diet()).await;
        assert_eq!(result.status, SolutionStatus::Optimal);
        let values = result.values.unwrap();
        assert!((values.get("x").unwrap() - 15.0).abs() < 1e-6);
        assert!((values.get("y").unwrap() - 1.25).abs() < 1e-6);
        assert!((result.objective_value.unwrap() - 205.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_malformed() {
        let result = tools().call("solve_everything", json!({})).await;
        assert_eq!(result.status, SolutionStatus::Error);
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("MALFORMED_REQUEST"));
    }

    #[tokio::test]
    async fn test_missing_field_is_malformed() {
        let result = tools()
            .call("solve_convex_optimization", json!({"variables": []}))
            .await;
        assert_eq!(result.diagnostics.error_kind.as_deref(), Some("MALFORMED_REQUEST"));
    }

    #[test]
    fn test_matrix_dimension_mismatch() {
        let mut args = diet();
        args["rhs_values"] = json!([100]);
        let report = tools().validate("solve_linear_programming", args);
        assert!(!report.is_valid);
        assert_eq!(report.error_kind.as_deref(), Some("DIMENSION_MISMATCH"));
    }

    #[test]
    fn test_validate_counts() {
        let report = tools().validate(
            "solve_constraint_satisfaction",
            json!({
                "variables": [
                    {"name": "x", "type": "integer", "lb": 0, "ub": 9},
                    {"name": "flag", "type": "boolean"},
                    {"name": "r", "type": "continuous"}
                ],
                "constraints": ["x + r >= 2", {"expression": "flag -> x > 3", "name": "gate"}]
            }),
        );
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.num_variables, 3);
        assert_eq!(report.num_constraints, 2);
        assert_eq!(report.num_integer_vars, 2);
    }

    #[test]
    fn test_cp_zero_max_solutions_is_invalid_domain() {
        let report = tools().validate(
            "solve_constraint_programming",
            json!({
                "variables": [{"name": "x", "type": "integer", "lb": 0, "ub": 3}],
                "constraints": ["x >= 1"],
                "max_solutions": 0
            }),
        );
        assert_eq!(report.error_kind.as_deref(), Some("INVALID_DOMAIN"));
    }

    #[test]
    fn test_find_all_solutions_uses_enumeration_cap() {
        let config = EngineConfig::new().with_max_enumeration(7);
        let request: CspRequest = serde_json::from_value(json!({
            "variables": [{"name": "x", "type": "integer", "lb": 0, "ub": 3}],
            "constraints": ["x >= 1"],
            "find_all_solutions": true
        }))
        .unwrap();
        let problem = request.into_problem(&config).unwrap();
        assert_eq!(problem.options().max_solutions, Some(7));
    }

    #[test]
    fn test_unrecognized_option_rejected() {
        let mut args = diet();
        args["options"] = json!({"max_solutions": 3});
        let report = tools().validate("solve_linear_programming", args);
        assert_eq!(report.error_kind.as_deref(), Some("UNSUPPORTED_OPTION"));
    }

    #[test]
    fn test_tool_table_matches_parser() {
        for tool in TOOLS {
            assert!(Tool::parse(tool.name).is_some(), "{}", tool.name);
        }
    }
}
