// Mappers: Convert between gRPC protobuf types and domain models
// This keeps protobuf dependencies isolated from business logic (Dependency Inversion)

use super::tools::{LpRequest, ToolInfo, ValidationReport};
use crate::domain::{Direction, NamedValues, Sense, SolutionStatus, SolveResult, Variable, VariableKind};
use serde_json::{Map, Value};
use tonic::Status;

pub mod pb {
    tonic::include_proto!("constrained_opt");
}

/// Convert protobuf Variable to domain Variable
pub fn proto_to_domain_variable(proto_var: &pb::Variable) -> Result<Variable, Box<Status>> {
    let kind = match pb::variable::VariableType::try_from(proto_var.r#type) {
        Ok(pb::variable::VariableType::Continuous) => VariableKind::Continuous,
        Ok(pb::variable::VariableType::Integer) => VariableKind::Integer,
        Ok(pb::variable::VariableType::Boolean) => VariableKind::Boolean,
        Err(_) => return Err(Box::new(Status::invalid_argument("Invalid variable type"))),
    };
    Ok(Variable::new(proto_var.name.clone(), kind)
        .with_bounds(proto_var.lower_bound, proto_var.upper_bound))
}

fn proto_to_domain_sense(sense: i32) -> Result<Sense, Box<Status>> {
    match pb::linear_row::Sense::try_from(sense) {
        Ok(pb::linear_row::Sense::LessThanOrEqual) => Ok(Sense::LessThanOrEqual),
        Ok(pb::linear_row::Sense::Equal) => Ok(Sense::Equal),
        Ok(pb::linear_row::Sense::GreaterThanOrEqual) => Ok(Sense::GreaterThanOrEqual),
        Err(_) => Err(Box::new(Status::invalid_argument("Invalid constraint sense"))),
    }
}

/// Convert a typed linear program into the matrix-form tool request.
pub fn proto_to_lp_request(program: pb::LinearProgram) -> Result<LpRequest, Box<Status>> {
    let sense = match pb::linear_program::Direction::try_from(program.direction) {
        Ok(pb::linear_program::Direction::Minimize) => Direction::Minimize,
        Ok(pb::linear_program::Direction::Maximize) => Direction::Maximize,
        Err(_) => return Err(Box::new(Status::invalid_argument("Invalid optimization direction"))),
    };

    // Create default variables if none provided
    let variables = if program.variables.is_empty() {
        (0..program.objective_coefficients.len())
            .map(|i| Variable::continuous(format!("x{i}")).with_bounds(Some(0.0), None))
            .collect()
    } else {
        program
            .variables
            .iter()
            .map(proto_to_domain_variable)
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut constraint_matrix = Vec::with_capacity(program.constraints.len());
    let mut constraint_senses = Vec::with_capacity(program.constraints.len());
    let mut rhs_values = Vec::with_capacity(program.constraints.len());
    let mut constraint_names = Vec::with_capacity(program.constraints.len());
    for (i, row) in program.constraints.into_iter().enumerate() {
        constraint_senses.push(proto_to_domain_sense(row.sense)?);
        rhs_values.push(row.rhs);
        constraint_names.push(if row.name.is_empty() {
            format!("c{i}")
        } else {
            row.name
        });
        constraint_matrix.push(row.coefficients);
    }

    let mut options = Map::new();
    if let Some(limit) = program.time_limit {
        options.insert("time_limit".into(), Value::from(limit));
    }
    if !program.backend.is_empty() {
        options.insert("backend".into(), Value::from(program.backend));
    }

    Ok(LpRequest {
        sense,
        objective_coeffs: program.objective_coefficients,
        variables,
        constraint_matrix,
        constraint_senses,
        rhs_values,
        constraint_names,
        options,
    })
}

fn domain_to_proto_status(status: SolutionStatus) -> pb::SolutionStatus {
    match status {
        SolutionStatus::Optimal => pb::SolutionStatus::Optimal,
        SolutionStatus::Feasible => pb::SolutionStatus::Feasible,
        SolutionStatus::Satisfiable => pb::SolutionStatus::Satisfiable,
        SolutionStatus::Infeasible => pb::SolutionStatus::Infeasible,
        SolutionStatus::Unsatisfiable => pb::SolutionStatus::Unsatisfiable,
        SolutionStatus::Unbounded => pb::SolutionStatus::Unbounded,
        SolutionStatus::TimedOut => pb::SolutionStatus::TimedOut,
        SolutionStatus::Error => pb::SolutionStatus::Error,
    }
}

fn domain_to_proto_values(values: &NamedValues) -> Vec<pb::VariableValue> {
    values
        .iter()
        .map(|(name, value)| pb::VariableValue {
            name: name.to_string(),
            value,
        })
        .collect()
}

/// Convert domain SolveResult to protobuf SolveResponse
pub fn domain_to_proto_result(result: &SolveResult) -> pb::SolveResponse {
    let diagnostics = &result.diagnostics;
    pb::SolveResponse {
        status: domain_to_proto_status(result.status) as i32,
        values: result
            .values
            .as_ref()
            .map(domain_to_proto_values)
            .unwrap_or_default(),
        objective_value: result.objective_value,
        diagnostics: Some(pb::Diagnostics {
            backend: diagnostics.backend.clone().unwrap_or_default(),
            solve_time_ms: diagnostics.solve_time_ms,
            iterations: diagnostics.iterations,
            nodes_explored: diagnostics.nodes_explored,
            duals: diagnostics
                .duals
                .iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            conflict: diagnostics.conflict.clone(),
            error_kind: diagnostics.error_kind.clone().unwrap_or_default(),
            extra: diagnostics
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }),
        message: result.message.clone(),
        solutions: result
            .solutions
            .iter()
            .map(|values| pb::Assignment {
                values: domain_to_proto_values(values),
            })
            .collect(),
        result_json: serde_json::to_string(result).unwrap_or_default(),
    }
}

pub fn domain_to_proto_report(report: ValidationReport) -> pb::ValidationResult {
    pb::ValidationResult {
        is_valid: report.is_valid,
        errors: report.errors,
        num_variables: count(report.num_variables),
        num_constraints: count(report.num_constraints),
        num_integer_vars: count(report.num_integer_vars),
    }
}

pub fn domain_to_proto_tool(tool: &ToolInfo) -> pb::ToolInfo {
    pb::ToolInfo {
        name: tool.name.to_string(),
        family: tool.family.to_string(),
        engine: tool.engine.to_string(),
        description: tool.description.to_string(),
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Diagnostics;

    #[test]
    fn test_variable_type_mapping() {
        let var = pb::Variable {
            name: "n".into(),
            r#type: pb::variable::VariableType::Integer as i32,
            lower_bound: Some(0.0),
            upper_bound: None,
        };
        let mapped = proto_to_domain_variable(&var).unwrap();
        assert_eq!(mapped.kind, VariableKind::Integer);
        assert_eq!(mapped.lower_bound, Some(0.0));
        assert_eq!(mapped.upper_bound, None);

        let bad = pb::Variable { r#type: 42, ..var };
        assert!(proto_to_domain_variable(&bad).is_err());
    }

    #[test]
    fn test_linear_program_defaults() {
        let program = pb::LinearProgram {
            direction: pb::linear_program::Direction::Maximize as i32,
            objective_coefficients: vec![3.0, 2.0],
            variables: Vec::new(),
            constraints: vec![pb::LinearRow {
                coefficients: vec![2.0, 1.0],
                sense: pb::linear_row::Sense::LessThanOrEqual as i32,
                rhs: 100.0,
                name: String::new(),
            }],
            time_limit: Some(5.0),
            backend: "microlp".into(),
        };
        let request = proto_to_lp_request(program).unwrap();
        assert_eq!(request.sense, Direction::Maximize);
        assert_eq!(request.variables.len(), 2);
        assert_eq!(request.variables[1].name, "x1");
        assert_eq!(request.variables[0].lower_bound, Some(0.0));
        assert_eq!(request.constraint_names, vec!["c0"]);
        assert_eq!(request.options["backend"], "microlp");
    }

    #[test]
    fn test_result_mapping() {
        let mut diagnostics = Diagnostics::for_backend("clarabel");
        diagnostics.duals.push("budget", 0.5);
        let result = SolveResult::new(SolutionStatus::Optimal)
            .with_values([("x", 1.0), ("y", 2.0)].into_iter().collect())
            .with_objective(3.0)
            .with_diagnostics(diagnostics);
        let response = domain_to_proto_result(&result);
        assert_eq!(response.status, pb::SolutionStatus::Optimal as i32);
        assert_eq!(response.values.len(), 2);
        assert_eq!(response.values[1].name, "y");
        let diagnostics = response.diagnostics.unwrap();
        assert_eq!(diagnostics.backend, "clarabel");
        assert_eq!(diagnostics.duals["budget"], 0.5);
        assert!(response.result_json.contains("\"status\":\"optimal\""));
    }
}
