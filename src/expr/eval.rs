//! Evaluates compiled trees under a complete assignment.

use super::arena::{ArithOp, CmpOp, ExprArena, Func, LogicOp, Node, NodeId, ValueType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Num(f64),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Bool(b) => f64::from(u8::from(b)),
            Value::Num(v) => v,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Num(v) => v > 0.5,
        }
    }
}

/// Evaluate `root` with `values[i]` bound to variable `i`.
///
/// Comparisons between continuous quantities accept a relative slack of
/// `tolerance`; integer comparisons are exact.
pub fn evaluate(arena: &ExprArena, root: NodeId, values: &[f64], tolerance: f64) -> Value {
    Evaluator {
        arena,
        values,
        tolerance,
        cache: vec![None; arena.len()],
    }
    .eval(root)
}

struct Evaluator<'a> {
    arena: &'a ExprArena,
    values: &'a [f64],
    tolerance: f64,
    cache: Vec<Option<Value>>,
}

impl Evaluator<'_> {
    fn eval(&mut self, id: NodeId) -> Value {
        if let Some(value) = self.cache[id.index()] {
            return value;
        }
        let value = self.compute(id);
        self.cache[id.index()] = Some(value);
        value
    }

    fn num(&mut self, id: NodeId) -> f64 {
        self.eval(id).as_f64()
    }

    fn truth(&mut self, id: NodeId) -> bool {
        self.eval(id).as_bool()
    }

    fn compute(&mut self, id: NodeId) -> Value {
        let arena = self.arena;
        match arena.node(id) {
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(v) => Value::Num(*v as f64),
            Node::Real(r) => Value::Num(r.0),
            Node::Var(index) => {
                let raw = self.values.get(*index).copied().unwrap_or(f64::NAN);
                if arena.ty(id) == ValueType::Bool {
                    Value::Bool(raw > 0.5)
                } else {
                    Value::Num(raw)
                }
            }
            Node::Neg(a) => Value::Num(-self.num(*a)),
            Node::Pow(a, n) => {
                let base = self.num(*a);
                Value::Num(match i32::try_from(*n) {
                    Ok(k) => base.powi(k),
                    Err(_) => base.powf(f64::from(*n)),
                })
            }
            Node::Arith(op, a, b) => {
                let (x, y) = (self.num(*a), self.num(*b));
                Value::Num(match op {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    ArithOp::Mul => x * y,
                    ArithOp::Div if y == 0.0 => f64::NAN,
                    ArithOp::Div => x / y,
                    ArithOp::Mod if y == 0.0 => f64::NAN,
                    ArithOp::Mod => x.rem_euclid(y),
                })
            }
            Node::Cmp(op, a, b) => Value::Bool(self.compare(*op, *a, *b)),
            Node::Not(a) => Value::Bool(!self.truth(*a)),
            Node::Logic(op, a, b) => {
                let (x, y) = (self.truth(*a), self.truth(*b));
                Value::Bool(match op {
                    LogicOp::And => x && y,
                    LogicOp::Or => x || y,
                    LogicOp::Implies => !x || y,
                })
            }
            Node::Ite(c, a, b) => {
                if self.truth(*c) {
                    self.eval(*a)
                } else {
                    self.eval(*b)
                }
            }
            Node::Sum(items) => Value::Num(items.iter().map(|&i| self.num(i)).sum()),
            Node::AllDifferent(items) => {
                let exact = items.iter().all(|&i| arena.ty(i) == ValueType::Int);
                let values: Vec<f64> = items.iter().map(|&i| self.num(i)).collect();
                let distinct = values.iter().enumerate().all(|(i, x)| {
                    values[i + 1..]
                        .iter()
                        .all(|y| !self.equal(*x, *y, exact))
                });
                Value::Bool(distinct)
            }
            Node::All(items) => Value::Bool(items.iter().all(|&i| self.truth(i))),
            Node::Any(items) => Value::Bool(items.iter().any(|&i| self.truth(i))),
            Node::Call(func, items) => {
                let args: Vec<f64> = items.iter().map(|&i| self.num(i)).collect();
                Value::Num(apply(*func, &args))
            }
        }
    }

    fn equal(&self, x: f64, y: f64, exact: bool) -> bool {
        if exact {
            (x - y).abs() < 0.5
        } else {
            (x - y).abs() <= self.slack(x, y)
        }
    }

    fn slack(&self, x: f64, y: f64) -> f64 {
        self.tolerance * 1f64.max(x.abs()).max(y.abs())
    }

    fn compare(&mut self, op: CmpOp, a: NodeId, b: NodeId) -> bool {
        let bools = self.arena.ty(a) == ValueType::Bool;
        if bools {
            let (x, y) = (self.truth(a), self.truth(b));
            return match op {
                CmpOp::Ne => x != y,
                _ => x == y,
            };
        }
        let exact = self.arena.ty(a) == ValueType::Int && self.arena.ty(b) == ValueType::Int;
        let (x, y) = (self.num(a), self.num(b));
        if x.is_nan() || y.is_nan() {
            return false;
        }
        if exact {
            return match op {
                CmpOp::Eq => (x - y).abs() < 0.5,
                CmpOp::Ne => (x - y).abs() >= 0.5,
                CmpOp::Lt => x < y - 0.5,
                CmpOp::Le => x < y + 0.5,
                CmpOp::Gt => x > y + 0.5,
                CmpOp::Ge => x > y - 0.5,
            };
        }
        let slack = self.slack(x, y);
        match op {
            CmpOp::Eq => (x - y).abs() <= slack,
            CmpOp::Ne => x != y,
            CmpOp::Lt | CmpOp::Le => x <= y + slack,
            CmpOp::Gt | CmpOp::Ge => x + slack >= y,
        }
    }
}

fn apply(func: Func, args: &[f64]) -> f64 {
    match func {
        Func::Abs => args.first().map_or(f64::NAN, |x| x.abs()),
        Func::Square => args.first().map_or(f64::NAN, |x| x * x),
        Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Func::SumSquares => args.iter().map(|x| x * x).sum(),
        Func::Norm1 => args.iter().map(|x| x.abs()).sum(),
        Func::Norm2 => args.iter().map(|x| x * x).sum::<f64>().sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::VariableKind;
    use crate::expr::compiler::tests::TestSymbols;
    use crate::expr::compiler::{CompileSettings, Compiler};

    fn holds(symbols: &TestSymbols, source: &str, values: &[f64]) -> bool {
        let mut arena = ExprArena::new();
        let id = Compiler::new(&mut arena, symbols, CompileSettings::default())
            .constraint(source)
            .unwrap();
        evaluate(&arena, id, values, 1e-6).as_bool()
    }

    #[test]
    fn test_integer_constraints() {
        let symbols = TestSymbols::new(&[("x", VariableKind::Integer), ("y", VariableKind::Integer)]);
        assert!(holds(&symbols, "x + y == 10 and x - y == 2", &[6.0, 4.0]));
        assert!(!holds(&symbols, "x + y == 10 and x - y == 2", &[5.0, 5.0]));
        assert!(holds(&symbols, "x % 4 == 3", &[-1.0, 0.0]));
        assert!(holds(&symbols, "x < y", &[3.0, 4.0]));
        assert!(!holds(&symbols, "x < y", &[4.0, 4.0]));
    }

    #[test]
    fn test_power_beyond_i32_range() {
        let mut arena = ExprArena::new();
        let x = arena.intern(Node::Var(0), ValueType::Int);
        let id = arena.intern(Node::Pow(x, 1 << 31), ValueType::Int);
        assert_eq!(evaluate(&arena, id, &[1.0], 1e-6), Value::Num(1.0));
        let square = arena.intern(Node::Pow(x, 2), ValueType::Int);
        assert_eq!(evaluate(&arena, square, &[-3.0], 1e-6), Value::Num(9.0));
    }

    #[test]
    fn test_real_comparisons_use_tolerance() {
        let symbols = TestSymbols::new(&[("r", VariableKind::Continuous)]);
        assert!(holds(&symbols, "r <= 1.0", &[1.0 + 1e-9]));
        assert!(holds(&symbols, "r == 0.5", &[0.5 + 1e-9]));
        assert!(!holds(&symbols, "r >= 2", &[1.9]));
    }

    #[test]
    fn test_aggregates() {
        let symbols = TestSymbols::new(&[
            ("a", VariableKind::Integer),
            ("b", VariableKind::Integer),
            ("c", VariableKind::Integer),
        ])
        .with_set("S", &[0, 1, 2]);
        assert!(holds(&symbols, "all_different(S)", &[1.0, 2.0, 3.0]));
        assert!(!holds(&symbols, "all_different(S)", &[1.0, 2.0, 1.0]));
        assert!(holds(&symbols, "forall T in subsets(S, 2): sum(T) != 4", &[1.0, 2.0, 5.0]));
        assert!(!holds(&symbols, "forall T in subsets(S, 2): sum(T) != 4", &[1.0, 3.0, 5.0]));
        assert!(holds(&symbols, "max(S) == 5 and min(a, b) == 1", &[1.0, 3.0, 5.0]));
    }

    #[test]
    fn test_booleans_and_implication() {
        let symbols = TestSymbols::new(&[("p", VariableKind::Boolean), ("q", VariableKind::Boolean)]);
        assert!(holds(&symbols, "p -> q", &[0.0, 0.0]));
        assert!(!holds(&symbols, "p -> q", &[1.0, 0.0]));
        assert!(holds(&symbols, "sum([p, q]) == 1", &[1.0, 0.0]));
    }

    #[test]
    fn test_runtime_division_by_zero_is_false() {
        let symbols = TestSymbols::new(&[("x", VariableKind::Integer), ("y", VariableKind::Integer)]);
        assert!(!holds(&symbols, "x / y == 1", &[1.0, 0.0]));
    }
}
