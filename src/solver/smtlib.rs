// SMT-LIB2 emitter: declarations, bounds and assertions for a compiled Problem

use crate::domain::{
    ConstraintKind, Direction, LinearRow, ObjectiveKind, Problem, Sense, SolveError, VariableKind,
};
use crate::expr::arena::{ArithOp, CmpOp, Func, LogicOp};
use crate::expr::{ExprArena, Node, NodeId, ValueType};
use crate::solver::sexpr::SExpr;
use std::fmt::Write;

/// Engine sort of a declared constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Bool,
    Int,
    Real,
}

impl Sort {
    pub fn of(kind: VariableKind) -> Self {
        match kind {
            VariableKind::Boolean => Sort::Bool,
            VariableKind::Integer => Sort::Int,
            VariableKind::Continuous => Sort::Real,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Sort::Bool => "Bool",
            Sort::Int => "Int",
            Sort::Real => "Real",
        }
    }
}

/// A problem rendered as SMT-LIB2 commands, ready for `(check-sat)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtScript {
    pub text: String,
    /// Engine symbol per variable, in declaration order.
    pub symbols: Vec<String>,
    /// `(assertion name, constraint label)` for named assertions.
    pub tracked: Vec<(String, String)>,
    /// `(minimize ..)` or `(maximize ..)` command, when the problem has an objective.
    pub objective: Option<String>,
}

impl SmtScript {
    pub fn label_of(&self, assertion: &str) -> Option<&str> {
        self.tracked
            .iter()
            .find(|(name, _)| name == assertion)
            .map(|(_, label)| label.as_str())
    }
}

/// Render `problem`. With `track` set every constraint is asserted under a
/// name so an unsat core can be mapped back onto constraint labels.
pub fn emit(problem: &Problem, track: bool) -> Result<SmtScript, SolveError> {
    let symbols: Vec<String> = (0..problem.variables().len()).map(|i| format!("v{i}")).collect();
    let mut emitter = Emitter {
        arena: problem.arena(),
        symbols: &symbols,
        kinds: problem.variables().iter().map(|v| v.kind).collect(),
        fresh: 0,
    };

    let mut text = String::new();
    for (variable, symbol) in problem.variables().iter().zip(&symbols) {
        let sort = Sort::of(variable.kind);
        let _ = writeln!(text, "(declare-const {symbol} {})", sort.name());
        if sort == Sort::Bool {
            continue;
        }
        let (lower, upper) = variable.bounds();
        let ty = if sort == Sort::Int { ValueType::Int } else { ValueType::Real };
        if lower.is_finite() {
            let _ = writeln!(text, "(assert (>= {symbol} {}))", number(lower, ty));
        }
        if upper.is_finite() {
            let _ = writeln!(text, "(assert (<= {symbol} {}))", number(upper, ty));
        }
    }

    let mut tracked = Vec::new();
    for (k, constraint) in problem.constraints().iter().enumerate() {
        let term = match &constraint.kind {
            ConstraintKind::Linear(row) => emitter.row(row),
            ConstraintKind::Expression { root, .. } | ConstraintKind::Global { root, .. } => {
                emitter.term(*root, ValueType::Bool)?
            }
        };
        if track {
            let name = format!("a{k}");
            let _ = writeln!(text, "(assert (! {term} :named {name}))");
            tracked.push((name, constraint.label.clone()));
        } else {
            let _ = writeln!(text, "(assert {term})");
        }
    }

    let objective = match problem.objective() {
        None => None,
        Some(objective) => {
            let term = match &objective.kind {
                ObjectiveKind::Expression { root, .. } => {
                    let ty = emitter.arena.ty(*root);
                    emitter.term(*root, ty)?
                }
                ObjectiveKind::Linear(coefficients) => {
                    let terms: Vec<(usize, f64)> = coefficients
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| **c != 0.0)
                        .map(|(i, c)| (i, *c))
                        .collect();
                    let ty = emitter.row_type(&terms, 0.0);
                    emitter.linear(&terms, ty)
                }
                ObjectiveKind::Quadratic { .. } => {
                    return Err(SolveError::Internal(
                        "quadratic objective has no SMT-LIB encoding".into(),
                    ))
                }
            };
            let command = match objective.direction {
                Direction::Minimize => "minimize",
                Direction::Maximize => "maximize",
            };
            Some(format!("({command} {term})\n"))
        }
    };

    Ok(SmtScript {
        text,
        symbols,
        tracked,
        objective,
    })
}

/// Assertion excluding one assignment, given as the engine's own value terms.
pub fn blocking_clause(symbols: &[String], values: &[SExpr]) -> String {
    let differences: Vec<String> = symbols
        .iter()
        .zip(values)
        .map(|(symbol, value)| format!("(not (= {symbol} {value}))"))
        .collect();
    match differences.len() {
        0 => "(assert false)\n".to_string(),
        1 => format!("(assert {})\n", differences[0]),
        _ => format!("(assert (or {}))\n", differences.join(" ")),
    }
}

fn number(value: f64, ty: ValueType) -> String {
    if ty == ValueType::Int && value.fract() == 0.0 && value.abs() < 9.0e15 {
        int_literal(value as i64)
    } else {
        real_literal(value)
    }
}

fn int_literal(value: i64) -> String {
    if value < 0 {
        format!("(- {})", value.unsigned_abs())
    } else {
        value.to_string()
    }
}

fn real_literal(value: f64) -> String {
    let magnitude = value.abs();
    let mut text = format!("{magnitude}");
    if !text.contains('.') {
        text.push_str(".0");
    }
    if value < 0.0 {
        format!("(- {text})")
    } else {
        text
    }
}

fn zero(ty: ValueType) -> &'static str {
    if ty == ValueType::Real {
        "0.0"
    } else {
        "0"
    }
}

fn apply(op: &str, args: &[String]) -> String {
    format!("({op} {})", args.join(" "))
}

struct Emitter<'a> {
    arena: &'a ExprArena,
    symbols: &'a [String],
    kinds: Vec<VariableKind>,
    fresh: usize,
}

impl Emitter<'_> {
    /// Term for `id` in sort `want`, inserting `to_real` where an integer
    /// sub-term feeds a real context.
    fn term(&mut self, id: NodeId, want: ValueType) -> Result<String, SolveError> {
        let ty = self.arena.ty(id);
        if want == ValueType::Real && ty == ValueType::Int {
            if let Node::Int(v) = self.arena.node(id) {
                return Ok(real_literal(*v as f64));
            }
            return Ok(format!("(to_real {})", self.raw(id)?));
        }
        self.raw(id)
    }

    fn terms(&mut self, ids: &[NodeId], want: ValueType) -> Result<Vec<String>, SolveError> {
        ids.iter().map(|&id| self.term(id, want)).collect()
    }

    fn raw(&mut self, id: NodeId) -> Result<String, SolveError> {
        let arena = self.arena;
        let ty = arena.ty(id);
        let text = match arena.node(id) {
            Node::Bool(b) => b.to_string(),
            Node::Int(v) => int_literal(*v),
            Node::Real(r) => real_literal(r.0),
            Node::Var(i) => self.symbols[*i].clone(),
            Node::Neg(a) => format!("(- {})", self.term(*a, ty)?),
            Node::Arith(op, a, b) => {
                let (symbol, operand) = match op {
                    ArithOp::Add => ("+", ty),
                    ArithOp::Sub => ("-", ty),
                    ArithOp::Mul => ("*", ty),
                    ArithOp::Div => ("/", ValueType::Real),
                    ArithOp::Mod => ("mod", ValueType::Int),
                };
                let args = [self.term(*a, operand)?, self.term(*b, operand)?];
                apply(symbol, &args)
            }
            Node::Pow(a, k) => match k {
                0 => {
                    if ty == ValueType::Real {
                        "1.0".into()
                    } else {
                        "1".into()
                    }
                }
                1 => self.term(*a, ty)?,
                _ => {
                    let base = self.term(*a, ty)?;
                    apply("*", &vec![base; *k as usize])
                }
            },
            Node::Cmp(op, a, b) => {
                let (ta, tb) = (arena.ty(*a), arena.ty(*b));
                let operand = if ta == ValueType::Bool && tb == ValueType::Bool {
                    ValueType::Bool
                } else {
                    ta.promote(tb)
                };
                let args = [self.term(*a, operand)?, self.term(*b, operand)?];
                match op {
                    CmpOp::Eq => apply("=", &args),
                    CmpOp::Ne => format!("(not {})", apply("=", &args)),
                    CmpOp::Lt => apply("<", &args),
                    CmpOp::Le => apply("<=", &args),
                    CmpOp::Gt => apply(">", &args),
                    CmpOp::Ge => apply(">=", &args),
                }
            }
            Node::Not(a) => format!("(not {})", self.term(*a, ValueType::Bool)?),
            Node::Logic(op, a, b) => {
                let symbol = match op {
                    LogicOp::And => "and",
                    LogicOp::Or => "or",
                    LogicOp::Implies => "=>",
                };
                let args = [
                    self.term(*a, ValueType::Bool)?,
                    self.term(*b, ValueType::Bool)?,
                ];
                apply(symbol, &args)
            }
            Node::Ite(c, a, b) => {
                let args = [
                    self.term(*c, ValueType::Bool)?,
                    self.term(*a, ty)?,
                    self.term(*b, ty)?,
                ];
                apply("ite", &args)
            }
            Node::Sum(items) => self.fold("+", items, ty, zero(ty))?,
            Node::All(items) => self.fold("and", items, ValueType::Bool, "true")?,
            Node::Any(items) => self.fold("or", items, ValueType::Bool, "false")?,
            Node::AllDifferent(items) => {
                if items.len() < 2 {
                    "true".into()
                } else {
                    let operand = items
                        .iter()
                        .map(|&i| arena.ty(i))
                        .fold(ValueType::Int, ValueType::promote);
                    apply("distinct", &self.terms(items, operand)?)
                }
            }
            Node::Call(func, args) => self.call(*func, args, ty)?,
        };
        Ok(text)
    }

    fn fold(
        &mut self,
        op: &str,
        items: &[NodeId],
        ty: ValueType,
        empty: &str,
    ) -> Result<String, SolveError> {
        Ok(match items {
            [] => empty.to_string(),
            [single] => self.term(*single, ty)?,
            _ => apply(op, &self.terms(items, ty)?),
        })
    }

    fn call(&mut self, func: Func, args: &[NodeId], ty: ValueType) -> Result<String, SolveError> {
        match func {
            Func::Abs => {
                let x = self.term(args[0], ty)?;
                Ok(abs(&x, ty))
            }
            Func::Square => {
                let x = self.term(args[0], ty)?;
                Ok(format!("(* {x} {x})"))
            }
            Func::SumSquares => {
                let squares: Vec<String> = self
                    .terms(args, ty)?
                    .into_iter()
                    .map(|x| format!("(* {x} {x})"))
                    .collect();
                Ok(sum_or_zero(squares, ty))
            }
            Func::Norm1 => {
                let magnitudes: Vec<String> = self
                    .terms(args, ty)?
                    .iter()
                    .map(|x| abs(x, ty))
                    .collect();
                Ok(sum_or_zero(magnitudes, ty))
            }
            Func::Min | Func::Max => {
                let keep = if func == Func::Min { "<=" } else { ">=" };
                let values = self.terms(args, ty)?;
                let Some((first, rest)) = values.split_first() else {
                    return Err(SolveError::Internal(format!("{} without arguments", func.name())));
                };
                // running extremum bound with `let` to keep the term linear in size
                self.fresh += 1;
                let prefix = format!("ext{}", self.fresh);
                let mut body = format!("{prefix}_{}", rest.len());
                for (k, value) in rest.iter().enumerate().rev() {
                    let prev = format!("{prefix}_{k}");
                    let next = format!("{prefix}_{}", k + 1);
                    body = format!(
                        "(let (({next} (ite ({keep} {prev} {value}) {prev} {value}))) {body})"
                    );
                }
                Ok(format!("(let (({prefix}_0 {first})) {body})"))
            }
            Func::Norm2 => Err(SolveError::Internal(
                "norm2 has no SMT-LIB encoding".into(),
            )),
        }
    }

    /// Sort a structured row is stated in: integer only when every term and
    /// constant is integral.
    fn row_type(&self, terms: &[(usize, f64)], rhs: f64) -> ValueType {
        let integral = rhs.fract() == 0.0
            && terms
                .iter()
                .all(|&(i, c)| c.fract() == 0.0 && self.kinds[i] != VariableKind::Continuous);
        if integral {
            ValueType::Int
        } else {
            ValueType::Real
        }
    }

    fn linear(&self, terms: &[(usize, f64)], ty: ValueType) -> String {
        let products: Vec<String> = terms
            .iter()
            .map(|&(i, c)| {
                let symbol = &self.symbols[i];
                let var = match self.kinds[i] {
                    VariableKind::Boolean if ty == ValueType::Real => format!("(ite {symbol} 1.0 0.0)"),
                    VariableKind::Boolean => format!("(ite {symbol} 1 0)"),
                    VariableKind::Integer if ty == ValueType::Real => format!("(to_real {symbol})"),
                    _ => symbol.clone(),
                };
                if c == 1.0 {
                    var
                } else {
                    format!("(* {} {var})", number(c, ty))
                }
            })
            .collect();
        sum_or_zero(products, ty)
    }

    fn row(&self, row: &LinearRow) -> String {
        let ty = self.row_type(&row.terms, row.rhs);
        let lhs = self.linear(&row.terms, ty);
        let op = match row.sense {
            Sense::LessThanOrEqual => "<=",
            Sense::Equal => "=",
            Sense::GreaterThanOrEqual => ">=",
        };
        format!("({op} {lhs} {})", number(row.rhs, ty))
    }
}

fn abs(x: &str, ty: ValueType) -> String {
    let zero = zero(ty);
    format!("(ite (>= {x} {zero}) {x} (- {x}))")
}

fn sum_or_zero(items: Vec<String>, ty: ValueType) -> String {
    match items.len() {
        0 => zero(ty).to_string(),
        1 => items.into_iter().next().unwrap_or_default(),
        _ => apply("+", &items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Coefficients, ConstraintSpec, LinearSpec, ObjectiveSpec, ProblemFamily, Variable,
    };

    fn problem(family: ProblemFamily, variables: Vec<Variable>, constraints: &[&str]) -> Problem {
        let mut builder = Problem::builder(family).variables(variables);
        for c in constraints {
            builder = builder.constraint(*c);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_declarations_and_bounds() {
        let p = problem(
            ProblemFamily::ConstraintSatisfaction,
            vec![
                Variable::integer("x").with_bounds(Some(-2.0), Some(5.0)),
                Variable::boolean("b"),
                Variable::continuous("r").with_bounds(Some(0.5), None),
            ],
            &[],
        );
        let script = emit(&p, false).unwrap();
        assert!(script.text.contains("(declare-const v0 Int)"));
        assert!(script.text.contains("(assert (>= v0 (- 2)))"));
        assert!(script.text.contains("(assert (<= v0 5))"));
        assert!(script.text.contains("(declare-const v1 Bool)"));
        assert!(script.text.contains("(assert (>= v2 0.5))"));
        assert!(!script.text.contains("(<= v2"));
    }

    #[test]
    fn test_mixed_arithmetic_uses_to_real() {
        let p = problem(
            ProblemFamily::ConstraintSatisfaction,
            vec![Variable::integer("x"), Variable::continuous("y")],
            &["x + y <= 3"],
        );
        let script = emit(&p, false).unwrap();
        assert!(script.text.contains("(assert (<= (+ (to_real v0) v1) 3.0))"));
    }

    fn coins(constraints: &[&str]) -> Problem {
        let names = ["half_dollar", "quarter", "dime"];
        let mut builder = Problem::builder(ProblemFamily::ConstraintSatisfaction)
            .variables(names.iter().map(|n| Variable::integer(*n).with_bounds(Some(1.0), None)))
            .set("coins", names.iter().map(|n| n.to_string()).collect());
        for c in constraints {
            builder = builder.constraint(*c);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_subset_quantifier_expands_in_lexicographic_order() {
        let script = emit(&coins(&["forall S in subsets(coins, 2): sum(S) != 5"]), false).unwrap();
        let assertion = script.text.lines().last().unwrap();
        assert_eq!(
            assertion,
            "(assert (and (not (= (+ v0 v1) 5)) (not (= (+ v0 v2) 5)) \
             (not (= (+ v1 v2) 5)) (not (= (+ v0 v1 v2) 5))))"
        );
    }

    #[test]
    fn test_subset_comprehension_with_conditional_terms() {
        let script = emit(
            &coins(&["forall S in subsets(coins, 2, 2): sum(c in S: if(c == 50, 0, c)) != 95"]),
            false,
        )
        .unwrap();
        let assertion = script.text.lines().last().unwrap();
        assert_eq!(
            assertion,
            "(assert (and \
             (not (= (+ (ite (= v0 50) 0 v0) (ite (= v1 50) 0 v1)) 95)) \
             (not (= (+ (ite (= v0 50) 0 v0) (ite (= v2 50) 0 v2)) 95)) \
             (not (= (+ (ite (= v1 50) 0 v1) (ite (= v2 50) 0 v2)) 95))))"
        );
    }

    #[test]
    fn test_division_is_real_even_for_integer_operands() {
        let p = problem(
            ProblemFamily::ConstraintSatisfaction,
            vec![Variable::integer("x"), Variable::integer("y"), Variable::continuous("r")],
            &["x / 2 >= r", "x / y == 1"],
        );
        let script = emit(&p, false).unwrap();
        assert!(script.text.contains("(assert (>= (/ (to_real v0) 2.0) v2))"));
        assert!(script.text.contains("(assert (= (/ (to_real v0) (to_real v1)) 1.0))"));
    }

    #[test]
    fn test_power_expands_to_product() {
        let p = problem(
            ProblemFamily::ConstraintSatisfaction,
            vec![Variable::integer("x")],
            &["x^3 <= 27"],
        );
        let script = emit(&p, false).unwrap();
        assert!(script.text.contains("(assert (<= (* v0 v0 v0) 27))"));
    }

    #[test]
    fn test_named_assertions_map_to_labels() {
        let p = problem(
            ProblemFamily::ConstraintSatisfaction,
            vec![Variable::integer("x")],
            &["x > 3", "x < 2"],
        );
        let script = emit(&p, true).unwrap();
        assert!(script.text.contains("(assert (! (> v0 3) :named a0))"));
        assert_eq!(script.label_of("a1"), Some("c1"));
    }

    #[test]
    fn test_linear_row_with_boolean_and_fractional_coefficient() {
        let p = Problem::builder(ProblemFamily::ConstraintSatisfaction)
            .variable(Variable::boolean("b"))
            .variable(Variable::integer("n"))
            .constraint(ConstraintSpec::Linear(LinearSpec {
                coefficients: Coefficients::Dense(vec![1.0, 0.5]),
                sense: Sense::GreaterThanOrEqual,
                rhs: 2.0,
                name: None,
            }))
            .build()
            .unwrap();
        let script = emit(&p, false).unwrap();
        assert!(script
            .text
            .contains("(assert (>= (+ (ite v0 1.0 0.0) (* 0.5 (to_real v1))) 2.0))"));
    }

    #[test]
    fn test_cp_objective_command() {
        let p = Problem::builder(ProblemFamily::ConstraintProgramming)
            .variable(Variable::integer("x").with_bounds(Some(0.0), Some(9.0)))
            .objective(ObjectiveSpec::expression(Direction::Maximize, "2 * x"))
            .build()
            .unwrap();
        let script = emit(&p, false).unwrap();
        assert_eq!(script.objective.as_deref(), Some("(maximize (* 2 v0))\n"));
    }

    #[test]
    fn test_min_uses_let_chain() {
        let p = problem(
            ProblemFamily::ConstraintSatisfaction,
            vec![Variable::integer("a"), Variable::integer("b"), Variable::integer("c")],
            &["min(a, b, c) >= 1"],
        );
        let script = emit(&p, false).unwrap();
        assert!(script.text.contains(
            "(let ((ext1_0 v0)) (let ((ext1_1 (ite (<= ext1_0 v1) ext1_0 v1))) \
             (let ((ext1_2 (ite (<= ext1_1 v2) ext1_1 v2))) ext1_2)))"
        ));
    }

    #[test]
    fn test_blocking_clause() {
        let symbols = vec!["v0".to_string(), "v1".to_string()];
        let values = vec![
            SExpr::Atom("6".into()),
            SExpr::List(vec![SExpr::Atom("-".into()), SExpr::Atom("4".into())]),
        ];
        assert_eq!(
            blocking_clause(&symbols, &values),
            "(assert (or (not (= v0 6)) (not (= v1 (- 4)))))\n"
        );
    }

    #[test]
    fn test_real_literal_has_no_exponent() {
        assert_eq!(real_literal(1e-7), "0.0000001");
        assert_eq!(real_literal(-2.0), "(- 2.0)");
        assert_eq!(int_literal(-3), "(- 3)");
    }
}
