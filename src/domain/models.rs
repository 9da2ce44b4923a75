// Problem model: variables, constraints, objective and the validated Problem

use super::errors::{RequestError, ValidationError};
use super::options::SolverOptions;
use super::value_objects::{Direction, ProblemFamily, Sense, VariableKind};
use crate::expr::arena::{ArithOp, CmpOp, LogicOp};
use crate::expr::{
    evaluate, print, CompileSettings, Compiler, ExprArena, Node, NodeId, SymbolTable, ValueType,
    DEFAULT_MAX_SET_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Decision variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: VariableKind,
    #[serde(
        rename = "lb",
        alias = "lower_bound",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub lower_bound: Option<f64>,
    #[serde(
        rename = "ub",
        alias = "upper_bound",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub upper_bound: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<f64>,
}

impl Variable {
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            lower_bound: None,
            upper_bound: None,
            initial: None,
        }
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Continuous)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, VariableKind::Boolean)
    }

    pub fn with_bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    pub fn with_initial(mut self, value: f64) -> Self {
        self.initial = Some(value);
        self
    }

    /// Effective bounds; unset bounds are unbounded except for booleans.
    pub fn bounds(&self) -> (f64, f64) {
        match self.kind {
            VariableKind::Boolean => (
                self.lower_bound.unwrap_or(0.0),
                self.upper_bound.unwrap_or(1.0),
            ),
            _ => (
                self.lower_bound.unwrap_or(f64::NEG_INFINITY),
                self.upper_bound.unwrap_or(f64::INFINITY),
            ),
        }
    }

    /// Whether `value` lies in this variable's domain and bounds.
    pub fn admits(&self, value: f64, tolerance: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.kind.is_discrete() && (value - value.round()).abs() > tolerance.max(1e-9) {
            return false;
        }
        let (lb, ub) = self.bounds();
        let slack = tolerance * 1f64.max(value.abs());
        value >= lb - slack && value <= ub + slack
    }

    /// Validate the bounds and round integer bounds inward.
    fn normalize(&mut self) -> Result<(), ValidationError> {
        let name = self.name.clone();
        if name.is_empty() {
            return Err(ValidationError::invalid_domain(name, "variable name must not be empty"));
        }
        for bound in [self.lower_bound, self.upper_bound, self.initial].into_iter().flatten() {
            if bound.is_nan() {
                return Err(ValidationError::invalid_domain(name, "bounds must be numbers"));
            }
        }
        if self.lower_bound == Some(f64::INFINITY) || self.upper_bound == Some(f64::NEG_INFINITY) {
            return Err(ValidationError::invalid_domain(name, "bound excludes every value"));
        }
        if let (Some(lb), Some(ub)) = (self.lower_bound, self.upper_bound) {
            if lb > ub {
                return Err(ValidationError::invalid_domain(
                    name,
                    format!("lower bound {lb} exceeds upper bound {ub}"),
                ));
            }
        }
        if self.kind == VariableKind::Boolean {
            let outside = self.lower_bound.is_some_and(|lb| lb < 0.0)
                || self.upper_bound.is_some_and(|ub| ub > 1.0);
            if outside {
                return Err(ValidationError::invalid_domain(
                    name,
                    "boolean bounds must lie within [0, 1]",
                ));
            }
        }
        if self.kind.is_discrete() {
            let (lb, ub) = (self.lower_bound.map(f64::ceil), self.upper_bound.map(f64::floor));
            if let (Some(lb), Some(ub)) = (lb, ub) {
                if lb > ub {
                    return Err(ValidationError::invalid_domain(
                        name,
                        format!(
                            "no integer lies within [{}, {}]",
                            self.lower_bound.unwrap_or(lb),
                            self.upper_bound.unwrap_or(ub)
                        ),
                    ));
                }
            }
            self.lower_bound = lb;
            self.upper_bound = ub;
        }
        if let Some(initial) = self.initial {
            if !self.admits(initial, 0.0) {
                return Err(ValidationError::invalid_domain(
                    name,
                    format!("initial value {initial} lies outside the domain"),
                ));
            }
        }
        Ok(())
    }
}

/// Coefficients of a structured row, positional or keyed by variable name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coefficients {
    Dense(Vec<f64>),
    Named(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSpec {
    pub coefficients: Coefficients,
    pub sense: Sense,
    pub rhs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledExpression {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Global and scheduling constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GlobalSpec {
    AllDifferent {
        variables: Vec<String>,
        #[serde(default)]
        name: Option<String>,
    },
    NoOverlap {
        intervals: Vec<String>,
        #[serde(default)]
        name: Option<String>,
    },
    Cumulative {
        intervals: Vec<String>,
        demands: Vec<i64>,
        capacity: i64,
        #[serde(default)]
        name: Option<String>,
    },
}

/// A constraint as it appears in a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstraintSpec {
    Expression(String),
    Labelled(LabelledExpression),
    Linear(LinearSpec),
    Global(GlobalSpec),
}

impl From<&str> for ConstraintSpec {
    fn from(source: &str) -> Self {
        ConstraintSpec::Expression(source.to_string())
    }
}

impl From<String> for ConstraintSpec {
    fn from(source: String) -> Self {
        ConstraintSpec::Expression(source)
    }
}

/// Interval over an integer start variable with a fixed size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub name: String,
    pub start: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveInput {
    Expression(String),
    Linear(Coefficients),
    /// `linear·x + xᵀ·quadratic·x`
    Quadratic {
        linear: Vec<f64>,
        quadratic: Vec<Vec<f64>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveSpec {
    pub direction: Direction,
    pub input: ObjectiveInput,
}

impl ObjectiveSpec {
    pub fn expression(direction: Direction, source: impl Into<String>) -> Self {
        Self {
            direction,
            input: ObjectiveInput::Expression(source.into()),
        }
    }

    pub fn linear(direction: Direction, coefficients: Vec<f64>) -> Self {
        Self {
            direction,
            input: ObjectiveInput::Linear(Coefficients::Dense(coefficients)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearRow {
    /// `(variable index, coefficient)`, zero coefficients dropped
    pub terms: Vec<(usize, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearRow {
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(i, c)| c * values.get(i).copied().unwrap_or(f64::NAN))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    AllDifferent,
    NoOverlap,
    Cumulative,
    IntervalEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintKind {
    Expression { source: String, root: NodeId },
    Linear(LinearRow),
    /// Global constraint lowered to a boolean tree.
    Global { kind: GlobalKind, root: NodeId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub label: String,
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Root of the boolean tree, for every non-linear-row constraint.
    pub fn root(&self) -> Option<NodeId> {
        match &self.kind {
            ConstraintKind::Expression { root, .. } | ConstraintKind::Global { root, .. } => {
                Some(*root)
            }
            ConstraintKind::Linear(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub name: String,
    pub start: usize,
    pub size: i64,
    pub end: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveKind {
    Expression { source: String, root: NodeId },
    /// Dense coefficients aligned with the variables.
    Linear(Vec<f64>),
    /// Dense linear part plus symmetric quadratic form.
    Quadratic {
        linear: Vec<f64>,
        quadratic: Vec<Vec<f64>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub direction: Direction,
    pub kind: ObjectiveKind,
}

/// A validated, compiled optimization problem. Immutable once built.
#[derive(Debug, Clone)]
pub struct Problem {
    family: ProblemFamily,
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    sets: BTreeMap<String, Vec<usize>>,
    intervals: Vec<Interval>,
    constraints: Vec<Constraint>,
    objective: Option<Objective>,
    options: SolverOptions,
    arena: ExprArena,
}

impl Problem {
    pub fn builder(family: ProblemFamily) -> ProblemBuilder {
        ProblemBuilder::new(family)
    }

    pub fn family(&self) -> ProblemFamily {
        self.family
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn sets(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.sets
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> Option<&Objective> {
        self.objective.as_ref()
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    pub fn num_integer_variables(&self) -> usize {
        self.variables.iter().filter(|v| v.kind.is_discrete()).count()
    }

    /// Render a compiled tree as expression text.
    pub fn render(&self, root: NodeId) -> String {
        print(&self.arena, root, &self.variable_names())
    }

    /// Objective value of an assignment given in declaration order.
    pub fn objective_value(&self, values: &[f64]) -> Option<f64> {
        let objective = self.objective.as_ref()?;
        let value = match &objective.kind {
            ObjectiveKind::Expression { root, .. } => {
                evaluate(&self.arena, *root, values, 0.0).as_f64()
            }
            ObjectiveKind::Linear(coefficients) => dot(coefficients, values),
            ObjectiveKind::Quadratic { linear, quadratic } => {
                let quad: f64 = quadratic
                    .iter()
                    .zip(values)
                    .map(|(row, xi)| xi * dot(row, values))
                    .sum();
                dot(linear, values) + quad
            }
        };
        Some(value)
    }

    /// Check an assignment against every domain, bound and constraint.
    pub fn check(&self, values: &[f64], tolerance: f64) -> Result<(), String> {
        if values.len() != self.variables.len() {
            return Err(format!(
                "assignment covers {} of {} variables",
                values.len(),
                self.variables.len()
            ));
        }
        for (variable, &value) in self.variables.iter().zip(values) {
            if !variable.admits(value, tolerance) {
                return Err(format!(
                    "value {value} for '{}' violates its {} domain or bounds",
                    variable.name, variable.kind
                ));
            }
        }
        for constraint in &self.constraints {
            let satisfied = match &constraint.kind {
                ConstraintKind::Linear(row) => {
                    let activity = row.activity(values);
                    let slack = tolerance * 1f64.max(activity.abs()).max(row.rhs.abs());
                    row.sense.holds(activity, row.rhs, slack)
                }
                ConstraintKind::Expression { root, .. } | ConstraintKind::Global { root, .. } => {
                    evaluate(&self.arena, *root, values, tolerance).as_bool()
                }
            };
            if !satisfied {
                return Err(format!(
                    "constraint '{}' is violated by the returned assignment",
                    constraint.label
                ));
            }
        }
        Ok(())
    }
}

fn dot(coefficients: &[f64], values: &[f64]) -> f64 {
    coefficients.iter().zip(values).map(|(c, x)| c * x).sum()
}

struct Symbols<'a> {
    variables: &'a [Variable],
    index: &'a HashMap<String, usize>,
    sets: &'a BTreeMap<String, Vec<usize>>,
}

impl SymbolTable for Symbols<'_> {
    fn variable(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn kind(&self, index: usize) -> VariableKind {
        self.variables[index].kind
    }

    fn set(&self, name: &str) -> Option<Vec<usize>> {
        self.sets.get(name).cloned()
    }
}

/// Collects a request's parts and validates them into a [`Problem`].
#[derive(Debug, Clone)]
pub struct ProblemBuilder {
    family: ProblemFamily,
    variables: Vec<Variable>,
    sets: Vec<(String, Vec<String>)>,
    intervals: Vec<IntervalSpec>,
    constraints: Vec<ConstraintSpec>,
    objective: Option<ObjectiveSpec>,
    options: SolverOptions,
    max_set_size: usize,
}

impl ProblemBuilder {
    pub fn new(family: ProblemFamily) -> Self {
        Self {
            family,
            variables: Vec::new(),
            sets: Vec::new(),
            intervals: Vec::new(),
            constraints: Vec::new(),
            objective: None,
            options: SolverOptions::default(),
            max_set_size: DEFAULT_MAX_SET_SIZE,
        }
    }

    pub fn variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn variables(mut self, variables: impl IntoIterator<Item = Variable>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn set(mut self, name: impl Into<String>, members: Vec<String>) -> Self {
        self.sets.push((name.into(), members));
        self
    }

    pub fn interval(mut self, interval: IntervalSpec) -> Self {
        self.intervals.push(interval);
        self
    }

    pub fn constraint(mut self, constraint: impl Into<ConstraintSpec>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn constraints(mut self, constraints: impl IntoIterator<Item = ConstraintSpec>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    pub fn objective(mut self, objective: ObjectiveSpec) -> Self {
        self.objective = Some(objective);
        self
    }

    pub fn options(mut self, options: SolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Default expansion limit when the options do not set one.
    pub fn max_set_size(mut self, limit: usize) -> Self {
        self.max_set_size = limit;
        self
    }

    pub fn build(self) -> Result<Problem, RequestError> {
        let family = self.family;

        let mut variables = Vec::with_capacity(self.variables.len());
        let mut index = HashMap::new();
        for mut variable in self.variables {
            if index.contains_key(&variable.name) {
                return Err(ValidationError::DuplicateVariable(variable.name).into());
            }
            if !family.supported_kinds().contains(&variable.kind) {
                return Err(ValidationError::UnsupportedKind {
                    name: variable.name,
                    kind: variable.kind,
                    family,
                }
                .into());
            }
            variable.normalize()?;
            index.insert(variable.name.clone(), variables.len());
            variables.push(variable);
        }

        let mut sets = BTreeMap::new();
        for (name, members) in self.sets {
            if index.contains_key(&name) || sets.contains_key(&name) {
                return Err(ValidationError::DuplicateVariable(name).into());
            }
            let context = format!("set '{name}'");
            let resolved = members
                .iter()
                .map(|member| resolve(&index, member, &context))
                .collect::<Result<Vec<_>, _>>()?;
            sets.insert(name, resolved);
        }

        if !self.intervals.is_empty() && family != ProblemFamily::ConstraintProgramming {
            return Err(ValidationError::UnsupportedConstraint {
                constraint: "interval".into(),
                family,
            }
            .into());
        }
        let mut intervals: Vec<Interval> = Vec::with_capacity(self.intervals.len());
        for spec in self.intervals {
            if index.contains_key(&spec.name) || intervals.iter().any(|i| i.name == spec.name) {
                return Err(ValidationError::DuplicateVariable(spec.name).into());
            }
            let context = format!("interval '{}'", spec.name);
            if spec.size < 0 {
                return Err(ValidationError::invalid_domain(&spec.name, "size must be non-negative").into());
            }
            let start = resolve_integer(&variables, &index, &spec.start, &context)?;
            let end = spec
                .end
                .as_deref()
                .map(|end| resolve_integer(&variables, &index, end, &context))
                .transpose()?;
            intervals.push(Interval {
                name: spec.name,
                start,
                size: spec.size,
                end,
            });
        }

        let settings = CompileSettings {
            dialect: family.dialect(),
            max_set_size: self.options.max_set_size.unwrap_or(self.max_set_size),
        };
        let mut arena = ExprArena::new();
        let symbols = Symbols {
            variables: &variables,
            index: &index,
            sets: &sets,
        };

        let mut constraints = Vec::with_capacity(self.constraints.len());
        for (i, spec) in self.constraints.into_iter().enumerate() {
            let default_label = format!("c{i}");
            let constraint = match spec {
                ConstraintSpec::Expression(source) => {
                    expression_constraint(&mut arena, &symbols, settings, family, default_label, source)?
                }
                ConstraintSpec::Labelled(labelled) => expression_constraint(
                    &mut arena,
                    &symbols,
                    settings,
                    family,
                    labelled.name.unwrap_or(default_label),
                    labelled.expression,
                )?,
                ConstraintSpec::Linear(spec) => {
                    let label = spec.name.clone().unwrap_or(default_label);
                    let terms = linear_terms(&spec.coefficients, &variables, &index, &label)?;
                    if !spec.rhs.is_finite() {
                        return Err(ValidationError::invalid_domain(label, "rhs must be finite").into());
                    }
                    Constraint {
                        label,
                        kind: ConstraintKind::Linear(LinearRow {
                            terms,
                            sense: spec.sense,
                            rhs: spec.rhs,
                        }),
                    }
                }
                ConstraintSpec::Global(spec) => {
                    global_constraint(&mut arena, &variables, &index, &intervals, family, default_label, spec)?
                }
            };
            constraints.push(constraint);
        }
        for interval in &intervals {
            if let Some(end) = interval.end {
                let start_end = interval_end(&mut arena, interval);
                let end_var = arena.intern(Node::Var(end), ValueType::Int);
                let root = arena.intern(Node::Cmp(CmpOp::Eq, end_var, start_end), ValueType::Bool);
                constraints.push(Constraint {
                    label: format!("{}_end", interval.name),
                    kind: ConstraintKind::Global {
                        kind: GlobalKind::IntervalEnd,
                        root,
                    },
                });
            }
        }

        let objective = match self.objective {
            None => match family {
                ProblemFamily::Linear | ProblemFamily::Convex => {
                    return Err(ValidationError::MissingObjective { family }.into())
                }
                _ => None,
            },
            Some(spec) => Some(compile_objective(
                &mut arena, &symbols, settings, family, &variables, &index, spec,
            )?),
        };

        let enumerating = self.options.max_solutions.is_some_and(|n| n > 1);
        if objective.is_some() && enumerating {
            return Err(ValidationError::UnsupportedOption {
                option: "max_solutions".into(),
                family,
            }
            .into());
        }

        Ok(Problem {
            family,
            variables,
            index,
            sets,
            intervals,
            constraints,
            objective,
            options: self.options,
            arena,
        })
    }
}

fn resolve(index: &HashMap<String, usize>, name: &str, context: &str) -> Result<usize, ValidationError> {
    index
        .get(name)
        .copied()
        .ok_or_else(|| ValidationError::UnknownVariable {
            name: name.to_string(),
            context: context.to_string(),
        })
}

fn resolve_integer(
    variables: &[Variable],
    index: &HashMap<String, usize>,
    name: &str,
    context: &str,
) -> Result<usize, ValidationError> {
    let i = resolve(index, name, context)?;
    if variables[i].kind != VariableKind::Integer {
        return Err(ValidationError::invalid_domain(
            name,
            format!("{context} needs an integer variable"),
        ));
    }
    Ok(i)
}

fn expression_constraint(
    arena: &mut ExprArena,
    symbols: &Symbols<'_>,
    settings: CompileSettings,
    family: ProblemFamily,
    label: String,
    source: String,
) -> Result<Constraint, RequestError> {
    if family == ProblemFamily::Linear {
        return Err(ValidationError::UnsupportedConstraint {
            constraint: "expression".into(),
            family,
        }
        .into());
    }
    let root = Compiler::new(arena, symbols, settings).constraint(&source)?;
    Ok(Constraint {
        label,
        kind: ConstraintKind::Expression { source, root },
    })
}

fn linear_terms(
    coefficients: &Coefficients,
    variables: &[Variable],
    index: &HashMap<String, usize>,
    context: &str,
) -> Result<Vec<(usize, f64)>, ValidationError> {
    let terms: Vec<(usize, f64)> = match coefficients {
        Coefficients::Dense(values) => {
            if values.len() != variables.len() {
                return Err(ValidationError::DimensionMismatch {
                    what: context.to_string(),
                    expected: variables.len(),
                    found: values.len(),
                });
            }
            values.iter().copied().enumerate().collect()
        }
        Coefficients::Named(map) => map
            .iter()
            .map(|(name, &c)| resolve(index, name, context).map(|i| (i, c)))
            .collect::<Result<_, _>>()?,
    };
    if terms.iter().any(|(_, c)| !c.is_finite()) {
        return Err(ValidationError::invalid_domain(context, "coefficients must be finite"));
    }
    Ok(terms.into_iter().filter(|&(_, c)| c != 0.0).collect())
}

fn global_constraint(
    arena: &mut ExprArena,
    variables: &[Variable],
    index: &HashMap<String, usize>,
    intervals: &[Interval],
    family: ProblemFamily,
    default_label: String,
    spec: GlobalSpec,
) -> Result<Constraint, RequestError> {
    let allowed = match spec {
        GlobalSpec::AllDifferent { .. } => matches!(
            family,
            ProblemFamily::ConstraintSatisfaction | ProblemFamily::ConstraintProgramming
        ),
        _ => family == ProblemFamily::ConstraintProgramming,
    };
    let kind_name = match spec {
        GlobalSpec::AllDifferent { .. } => "all_different",
        GlobalSpec::NoOverlap { .. } => "no_overlap",
        GlobalSpec::Cumulative { .. } => "cumulative",
    };
    if !allowed {
        return Err(ValidationError::UnsupportedConstraint {
            constraint: kind_name.into(),
            family,
        }
        .into());
    }

    let find_interval = |name: &str, context: &str| {
        intervals
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| ValidationError::UnknownVariable {
                name: name.to_string(),
                context: context.to_string(),
            })
    };

    let (label, kind, root) = match spec {
        GlobalSpec::AllDifferent { variables: names, name } => {
            let label = name.unwrap_or(default_label);
            let mut members = Vec::with_capacity(names.len());
            for member in &names {
                let i = resolve(index, member, &label)?;
                if variables[i].kind == VariableKind::Boolean {
                    return Err(ValidationError::invalid_domain(
                        member,
                        "all_different needs numeric variables",
                    )
                    .into());
                }
                let ty = if variables[i].kind == VariableKind::Integer {
                    ValueType::Int
                } else {
                    ValueType::Real
                };
                members.push(arena.intern(Node::Var(i), ty));
            }
            let root = if members.is_empty() {
                arena.intern(Node::Bool(true), ValueType::Bool)
            } else {
                arena.intern(Node::AllDifferent(members), ValueType::Bool)
            };
            (label, GlobalKind::AllDifferent, root)
        }
        GlobalSpec::NoOverlap { intervals: names, name } => {
            let label = name.unwrap_or(default_label);
            let tasks = names
                .iter()
                .map(|n| find_interval(n, &label))
                .collect::<Result<Vec<_>, _>>()?;
            (label, GlobalKind::NoOverlap, lower_no_overlap(arena, &tasks))
        }
        GlobalSpec::Cumulative {
            intervals: names,
            demands,
            capacity,
            name,
        } => {
            let label = name.unwrap_or(default_label);
            if demands.len() != names.len() {
                return Err(ValidationError::DimensionMismatch {
                    what: format!("demands of {label}"),
                    expected: names.len(),
                    found: demands.len(),
                }
                .into());
            }
            if capacity < 0 || demands.iter().any(|&d| d < 0) {
                return Err(ValidationError::invalid_domain(
                    &label,
                    "capacity and demands must be non-negative",
                )
                .into());
            }
            let tasks = names
                .iter()
                .map(|n| find_interval(n, &label))
                .collect::<Result<Vec<_>, _>>()?;
            let root = lower_cumulative(arena, &tasks, &demands, capacity);
            (label, GlobalKind::Cumulative, root)
        }
    };
    Ok(Constraint {
        label,
        kind: ConstraintKind::Global { kind, root },
    })
}

fn interval_end(arena: &mut ExprArena, interval: &Interval) -> NodeId {
    let start = arena.intern(Node::Var(interval.start), ValueType::Int);
    if interval.size == 0 {
        return start;
    }
    let size = arena.intern(Node::Int(interval.size), ValueType::Int);
    arena.intern(Node::Arith(ArithOp::Add, start, size), ValueType::Int)
}

/// Pairwise disjunction: one task ends before the other starts.
fn lower_no_overlap(arena: &mut ExprArena, tasks: &[&Interval]) -> NodeId {
    let mut pairs = Vec::new();
    for (i, a) in tasks.iter().enumerate() {
        for b in &tasks[i + 1..] {
            let (start_a, end_a) = (
                arena.intern(Node::Var(a.start), ValueType::Int),
                interval_end(arena, a),
            );
            let (start_b, end_b) = (
                arena.intern(Node::Var(b.start), ValueType::Int),
                interval_end(arena, b),
            );
            let a_first = arena.intern(Node::Cmp(CmpOp::Le, end_a, start_b), ValueType::Bool);
            let b_first = arena.intern(Node::Cmp(CmpOp::Le, end_b, start_a), ValueType::Bool);
            pairs.push(arena.intern(Node::Logic(LogicOp::Or, a_first, b_first), ValueType::Bool));
        }
    }
    if pairs.is_empty() {
        return arena.intern(Node::Bool(true), ValueType::Bool);
    }
    arena.intern(Node::All(pairs), ValueType::Bool)
}

/// Resource usage is bounded at every task start, which is where usage peaks.
fn lower_cumulative(arena: &mut ExprArena, tasks: &[&Interval], demands: &[i64], capacity: i64) -> NodeId {
    let zero = arena.intern(Node::Int(0), ValueType::Int);
    let cap = arena.intern(Node::Int(capacity), ValueType::Int);
    let consuming: Vec<(&Interval, i64)> = tasks
        .iter()
        .zip(demands)
        .filter(|(task, &demand)| task.size > 0 && demand > 0)
        .map(|(task, &demand)| (*task, demand))
        .collect();

    let mut checks = Vec::with_capacity(consuming.len());
    for (probe, _) in &consuming {
        let at = arena.intern(Node::Var(probe.start), ValueType::Int);
        let mut usage = Vec::with_capacity(consuming.len());
        for (task, demand) in &consuming {
            let start = arena.intern(Node::Var(task.start), ValueType::Int);
            let end = interval_end(arena, task);
            let started = arena.intern(Node::Cmp(CmpOp::Le, start, at), ValueType::Bool);
            let running = arena.intern(Node::Cmp(CmpOp::Lt, at, end), ValueType::Bool);
            let active = arena.intern(Node::Logic(LogicOp::And, started, running), ValueType::Bool);
            let demand = arena.intern(Node::Int(*demand), ValueType::Int);
            usage.push(arena.intern(Node::Ite(active, demand, zero), ValueType::Int));
        }
        let total = arena.intern(Node::Sum(usage), ValueType::Int);
        checks.push(arena.intern(Node::Cmp(CmpOp::Le, total, cap), ValueType::Bool));
    }
    if checks.is_empty() {
        return arena.intern(Node::Bool(true), ValueType::Bool);
    }
    arena.intern(Node::All(checks), ValueType::Bool)
}

fn compile_objective(
    arena: &mut ExprArena,
    symbols: &Symbols<'_>,
    settings: CompileSettings,
    family: ProblemFamily,
    variables: &[Variable],
    index: &HashMap<String, usize>,
    spec: ObjectiveSpec,
) -> Result<Objective, RequestError> {
    let unsupported = |form: &str| ValidationError::UnsupportedOption {
        option: format!("{form} objective"),
        family,
    };
    if family == ProblemFamily::ConstraintSatisfaction {
        return Err(unsupported("an").into());
    }
    let n = variables.len();
    let kind = match spec.input {
        ObjectiveInput::Expression(source) => {
            if family == ProblemFamily::Linear {
                return Err(unsupported("expression").into());
            }
            let root = Compiler::new(arena, symbols, settings).objective(&source)?;
            if arena.variables(root).is_empty() {
                return Err(ValidationError::EmptyObjective.into());
            }
            ObjectiveKind::Expression { source, root }
        }
        ObjectiveInput::Linear(coefficients) => {
            let terms = linear_terms(&coefficients, variables, index, "objective")?;
            if terms.is_empty() {
                return Err(ValidationError::EmptyObjective.into());
            }
            let mut dense = vec![0.0; n];
            for (i, c) in terms {
                dense[i] += c;
            }
            ObjectiveKind::Linear(dense)
        }
        ObjectiveInput::Quadratic { linear, quadratic } => {
            if family != ProblemFamily::Convex {
                return Err(unsupported("quadratic").into());
            }
            let linear = if linear.is_empty() { vec![0.0; n] } else { linear };
            if linear.len() != n {
                return Err(ValidationError::DimensionMismatch {
                    what: "linear objective".into(),
                    expected: n,
                    found: linear.len(),
                }
                .into());
            }
            if quadratic.len() != n {
                return Err(ValidationError::DimensionMismatch {
                    what: "quadratic objective".into(),
                    expected: n,
                    found: quadratic.len(),
                }
                .into());
            }
            if let Some(row) = quadratic.iter().find(|row| row.len() != n) {
                return Err(ValidationError::DimensionMismatch {
                    what: "quadratic objective row".into(),
                    expected: n,
                    found: row.len(),
                }
                .into());
            }
            let finite = linear.iter().chain(quadratic.iter().flatten()).all(|v| v.is_finite());
            if !finite {
                return Err(ValidationError::invalid_domain("objective", "coefficients must be finite").into());
            }
            let symmetric: Vec<Vec<f64>> = (0..n)
                .map(|i| (0..n).map(|j| 0.5 * (quadratic[i][j] + quadratic[j][i])).collect())
                .collect();
            let empty = linear.iter().chain(symmetric.iter().flatten()).all(|&v| v == 0.0);
            if empty {
                return Err(ValidationError::EmptyObjective.into());
            }
            ObjectiveKind::Quadratic {
                linear,
                quadratic: symmetric,
            }
        }
    };
    Ok(Objective {
        direction: spec.direction,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CompilationError;

    fn csp() -> ProblemBuilder {
        Problem::builder(ProblemFamily::ConstraintSatisfaction)
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let err = csp()
            .variable(Variable::integer("x"))
            .variable(Variable::continuous("x"))
            .build()
            .unwrap_err();
        assert_eq!(err, RequestError::from(ValidationError::DuplicateVariable("x".into())));
    }

    #[test]
    fn test_bound_violation_rejected() {
        let err = csp()
            .variable(Variable::continuous("x").with_bounds(Some(5.0), Some(1.0)))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DOMAIN");
    }

    #[test]
    fn test_integer_bounds_round_inward() {
        let problem = csp()
            .variable(Variable::integer("n").with_bounds(Some(1.5), Some(4.7)))
            .build()
            .unwrap();
        assert_eq!(problem.variables()[0].bounds(), (2.0, 4.0));

        let err = csp()
            .variable(Variable::integer("n").with_bounds(Some(2.2), Some(2.8)))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DOMAIN");
    }

    #[test]
    fn test_boolean_bounds_must_be_unit_interval() {
        let err = csp()
            .variable(Variable::boolean("b").with_bounds(Some(0.0), Some(2.0)))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DOMAIN");
    }

    #[test]
    fn test_unknown_identifier_in_expression() {
        let err = csp()
            .variable(Variable::integer("x"))
            .constraint("x + y == 3")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::Compilation(CompilationError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn test_unknown_variable_in_structured_row() {
        let mut named = BTreeMap::new();
        named.insert("q".to_string(), 1.0);
        let err = Problem::builder(ProblemFamily::Linear)
            .variable(Variable::continuous("x"))
            .constraint(ConstraintSpec::Linear(LinearSpec {
                coefficients: Coefficients::Named(named),
                sense: Sense::LessThanOrEqual,
                rhs: 1.0,
                name: None,
            }))
            .objective(ObjectiveSpec::linear(Direction::Maximize, vec![1.0]))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_VARIABLE");
    }

    #[test]
    fn test_zero_objective_rejected() {
        let err = Problem::builder(ProblemFamily::Linear)
            .variable(Variable::continuous("x"))
            .objective(ObjectiveSpec::linear(Direction::Minimize, vec![0.0]))
            .build()
            .unwrap_err();
        assert_eq!(err, RequestError::from(ValidationError::EmptyObjective));

        let err = Problem::builder(ProblemFamily::Convex)
            .variable(Variable::continuous("x"))
            .objective(ObjectiveSpec::expression(Direction::Minimize, "3 + 4"))
            .build()
            .unwrap_err();
        assert_eq!(err, RequestError::from(ValidationError::EmptyObjective));
    }

    #[test]
    fn test_convex_rejects_integer_variables() {
        let err = Problem::builder(ProblemFamily::Convex)
            .variable(Variable::integer("n"))
            .objective(ObjectiveSpec::expression(Direction::Minimize, "n"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::Validation(ValidationError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn test_objective_with_enumeration_rejected() {
        let err = Problem::builder(ProblemFamily::ConstraintProgramming)
            .variable(Variable::integer("x").with_bounds(Some(0.0), Some(3.0)))
            .objective(ObjectiveSpec::expression(Direction::Maximize, "x"))
            .options(SolverOptions::new().with_max_solutions(3))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_OPTION");
    }

    #[test]
    fn test_constraint_deserialization_shapes() {
        let specs: Vec<ConstraintSpec> = serde_json::from_str(
            r#"[
                "x + y <= 4",
                {"expression": "x >= 1", "name": "floor"},
                {"coefficients": [1, 2], "sense": ">=", "rhs": 3},
                {"coefficients": {"x": 1}, "sense": "==", "rhs": 1},
                {"kind": "all_different", "variables": ["x", "y"]}
            ]"#,
        )
        .unwrap();
        assert!(matches!(specs[0], ConstraintSpec::Expression(_)));
        assert!(matches!(specs[1], ConstraintSpec::Labelled(_)));
        assert!(matches!(
            specs[2],
            ConstraintSpec::Linear(LinearSpec {
                coefficients: Coefficients::Dense(_),
                ..
            })
        ));
        assert!(matches!(
            specs[3],
            ConstraintSpec::Linear(LinearSpec {
                coefficients: Coefficients::Named(_),
                ..
            })
        ));
        assert!(matches!(specs[4], ConstraintSpec::Global(GlobalSpec::AllDifferent { .. })));
    }

    #[test]
    fn test_check_flags_violations() {
        let problem = csp()
            .variable(Variable::integer("x"))
            .variable(Variable::integer("y").with_bounds(Some(0.0), None))
            .constraint("x + y == 10")
            .build()
            .unwrap();
        assert!(problem.check(&[6.0, 4.0], 1e-6).is_ok());
        assert!(problem.check(&[7.0, 4.0], 1e-6).is_err());
        assert!(problem.check(&[11.0, -1.0], 1e-6).is_err());
        assert!(problem.check(&[6.5, 3.5], 1e-6).is_err());
        assert!(problem.check(&[6.0], 1e-6).is_err());
    }

    #[test]
    fn test_no_overlap_lowering() {
        let problem = Problem::builder(ProblemFamily::ConstraintProgramming)
            .variable(Variable::integer("a").with_bounds(Some(0.0), Some(10.0)))
            .variable(Variable::integer("b").with_bounds(Some(0.0), Some(10.0)))
            .interval(IntervalSpec {
                name: "A".into(),
                start: "a".into(),
                size: 3,
                end: None,
            })
            .interval(IntervalSpec {
                name: "B".into(),
                start: "b".into(),
                size: 2,
                end: None,
            })
            .constraint(ConstraintSpec::Global(GlobalSpec::NoOverlap {
                intervals: vec!["A".into(), "B".into()],
                name: None,
            }))
            .build()
            .unwrap();
        assert!(problem.check(&[0.0, 3.0], 1e-6).is_ok());
        assert!(problem.check(&[5.0, 3.0], 1e-6).is_ok());
        assert!(problem.check(&[0.0, 2.0], 1e-6).is_err());
    }

    #[test]
    fn test_cumulative_lowering() {
        let problem = Problem::builder(ProblemFamily::ConstraintProgramming)
            .variables(["a", "b", "c"].map(|n| Variable::integer(n).with_bounds(Some(0.0), Some(10.0))))
            .interval(IntervalSpec { name: "A".into(), start: "a".into(), size: 2, end: None })
            .interval(IntervalSpec { name: "B".into(), start: "b".into(), size: 2, end: None })
            .interval(IntervalSpec { name: "C".into(), start: "c".into(), size: 2, end: None })
            .constraint(ConstraintSpec::Global(GlobalSpec::Cumulative {
                intervals: vec!["A".into(), "B".into(), "C".into()],
                demands: vec![1, 1, 1],
                capacity: 2,
                name: Some("machines".into()),
            }))
            .build()
            .unwrap();
        assert!(problem.check(&[0.0, 0.0, 2.0], 1e-6).is_ok());
        assert_eq!(
            problem.check(&[0.0, 0.0, 1.0], 1e-6).unwrap_err(),
            "constraint 'machines' is violated by the returned assignment"
        );
    }

    #[test]
    fn test_objective_value_forms() {
        let problem = Problem::builder(ProblemFamily::Convex)
            .variables([Variable::continuous("x"), Variable::continuous("y")])
            .objective(ObjectiveSpec {
                direction: Direction::Minimize,
                input: ObjectiveInput::Quadratic {
                    linear: vec![1.0, 0.0],
                    quadratic: vec![vec![1.0, 0.0], vec![2.0, 1.0]],
                },
            })
            .build()
            .unwrap();
        // x + x² + 2xy + y² at (1, 2)
        assert_eq!(problem.objective_value(&[1.0, 2.0]), Some(10.0));
    }
}
