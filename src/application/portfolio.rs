// Portfolio optimization: mean-variance allocation mapped onto the convex family

use crate::domain::{
    Coefficients, ConstraintSpec, Direction, LinearSpec, NamedValues, ObjectiveInput, ObjectiveSpec, Problem,
    ProblemFamily, RequestError, Sense, SolveResult, SolverOptions, ValidationError, Variable,
};
use crate::infrastructure::EngineConfig;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const CORRELATION_TOLERANCE: f64 = 1e-9;

fn default_budget() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_risk_aversion() -> f64 {
    1.0
}

/// Weight bounds on a group of assets.
#[derive(Debug, Clone, Deserialize)]
pub struct SectorLimit {
    pub name: String,
    pub assets: Vec<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioConstraints {
    /// Sum of all weights.
    #[serde(default = "default_budget")]
    pub budget: f64,
    #[serde(default = "default_true")]
    pub long_only: bool,
    #[serde(default)]
    pub max_weight: Option<f64>,
    #[serde(default)]
    pub min_weight: Option<f64>,
    /// Switches to minimum variance subject to this expected return.
    #[serde(default)]
    pub min_return: Option<f64>,
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: f64,
    #[serde(default)]
    pub sector_limits: Vec<SectorLimit>,
}

impl Default for PortfolioConstraints {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            long_only: true,
            max_weight: None,
            min_weight: None,
            min_return: None,
            risk_aversion: default_risk_aversion(),
            sector_limits: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioRequest {
    pub assets: Vec<String>,
    pub expected_returns: Vec<f64>,
    /// Volatility (standard deviation of return) per asset.
    pub risk_factors: Vec<f64>,
    pub correlation_matrix: Vec<Vec<f64>>,
    #[serde(default)]
    pub constraints: PortfolioConstraints,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// A portfolio request lowered onto a convex problem, with the data needed
/// to report risk and return of the solution.
#[derive(Debug, Clone)]
pub struct PortfolioModel {
    pub problem: Problem,
    returns: Vec<f64>,
    covariance: Vec<Vec<f64>>,
}

impl PortfolioRequest {
    pub fn into_model(self, config: &EngineConfig) -> Result<PortfolioModel, RequestError> {
        let n = self.assets.len();
        if n == 0 {
            return Err(ValidationError::invalid_domain("assets", "at least one asset is required").into());
        }
        dimension("expected_returns", n, self.expected_returns.len())?;
        dimension("risk_factors", n, self.risk_factors.len())?;
        dimension("correlation_matrix", n, self.correlation_matrix.len())?;
        for (i, row) in self.correlation_matrix.iter().enumerate() {
            dimension(&format!("correlation_matrix row {i}"), n, row.len())?;
        }
        if self.expected_returns.iter().any(|r| !r.is_finite()) {
            return Err(ValidationError::invalid_domain("expected_returns", "must be finite").into());
        }
        if self.risk_factors.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(ValidationError::invalid_domain("risk_factors", "must be finite and non-negative").into());
        }
        check_correlation(&self.correlation_matrix)?;

        let limits = &self.constraints;
        if !limits.budget.is_finite() {
            return Err(ValidationError::invalid_domain("budget", "must be finite").into());
        }
        if !limits.risk_aversion.is_finite() || limits.risk_aversion < 0.0 {
            return Err(ValidationError::invalid_domain("risk_aversion", "must be non-negative").into());
        }

        // Σ = diag(σ)·C·diag(σ)
        let sigma = &self.risk_factors;
        let covariance: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| sigma[i] * self.correlation_matrix[i][j] * sigma[j]).collect())
            .collect();

        let lower = if limits.long_only {
            Some(limits.min_weight.unwrap_or(0.0).max(0.0))
        } else {
            limits.min_weight
        };
        let variables = self
            .assets
            .iter()
            .map(|asset| Variable::continuous(asset.as_str()).with_bounds(lower, limits.max_weight));

        let mut constraints = vec![row(
            Coefficients::Dense(vec![1.0; n]),
            Sense::Equal,
            limits.budget,
            "budget",
        )];
        for sector in &limits.sector_limits {
            let members: BTreeMap<String, f64> =
                sector.assets.iter().map(|a| (a.clone(), 1.0)).collect();
            if let Some(max) = sector.max {
                let label = format!("sector_{}_max", sector.name);
                constraints.push(row(Coefficients::Named(members.clone()), Sense::LessThanOrEqual, max, &label));
            }
            if let Some(min) = sector.min {
                let label = format!("sector_{}_min", sector.name);
                constraints.push(row(Coefficients::Named(members), Sense::GreaterThanOrEqual, min, &label));
            }
        }

        let objective = match limits.min_return {
            Some(target) => {
                constraints.push(row(
                    Coefficients::Dense(self.expected_returns.clone()),
                    Sense::GreaterThanOrEqual,
                    target,
                    "min_return",
                ));
                ObjectiveSpec {
                    direction: Direction::Minimize,
                    input: ObjectiveInput::Quadratic {
                        linear: Vec::new(),
                        quadratic: covariance.clone(),
                    },
                }
            }
            None => {
                let half_lambda = limits.risk_aversion / 2.0;
                ObjectiveSpec {
                    direction: Direction::Maximize,
                    input: ObjectiveInput::Quadratic {
                        linear: self.expected_returns.clone(),
                        quadratic: covariance
                            .iter()
                            .map(|r| r.iter().map(|v| -half_lambda * v).collect())
                            .collect(),
                    },
                }
            }
        };

        let family = ProblemFamily::Convex;
        let problem = Problem::builder(family)
            .variables(variables)
            .constraints(constraints)
            .objective(objective)
            .options(SolverOptions::parse(family, &self.options)?)
            .max_set_size(config.max_set_size)
            .build()?;

        Ok(PortfolioModel {
            problem,
            returns: self.expected_returns,
            covariance,
        })
    }
}

impl PortfolioModel {
    /// Add expected return, variance and volatility of the allocation.
    pub fn report(&self, mut result: SolveResult) -> SolveResult {
        let Some(weights) = result.values.as_ref().map(NamedValues::values) else {
            return result;
        };
        let expected: f64 = self.returns.iter().zip(&weights).map(|(r, w)| r * w).sum();
        let variance: f64 = self
            .covariance
            .iter()
            .zip(&weights)
            .map(|(row, wi)| wi * row.iter().zip(&weights).map(|(c, wj)| c * wj).sum::<f64>())
            .sum::<f64>()
            .max(0.0);
        let extra = &mut result.diagnostics.extra;
        extra.insert("expected_return".into(), expected);
        extra.insert("variance".into(), variance);
        extra.insert("volatility".into(), variance.sqrt());
        result
    }
}

fn row(coefficients: Coefficients, sense: Sense, rhs: f64, label: &str) -> ConstraintSpec {
    ConstraintSpec::Linear(LinearSpec {
        coefficients,
        sense,
        rhs,
        name: Some(label.to_string()),
    })
}

fn dimension(what: &str, expected: usize, found: usize) -> Result<(), ValidationError> {
    if expected == found {
        return Ok(());
    }
    Err(ValidationError::DimensionMismatch {
        what: what.to_string(),
        expected,
        found,
    })
}

fn check_correlation(matrix: &[Vec<f64>]) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::invalid_domain("correlation_matrix", reason);
    for (i, row) in matrix.iter().enumerate() {
        if (row[i] - 1.0).abs() > CORRELATION_TOLERANCE {
            return Err(invalid(format!("diagonal entry {i} must be 1")));
        }
        for (j, &value) in row.iter().enumerate() {
            if !value.is_finite() || value.abs() > 1.0 + CORRELATION_TOLERANCE {
                return Err(invalid(format!("entry ({i}, {j}) must lie in [-1, 1]")));
            }
            if (value - matrix[j][i]).abs() > CORRELATION_TOLERANCE {
                return Err(invalid(format!("entries ({i}, {j}) and ({j}, {i}) differ")));
            }
        }
    }
    Ok(())
}
