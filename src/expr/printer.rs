//! Renders compiled trees back into expression text.
//!
//! Output re-parses into a structurally equal tree: parentheses are emitted
//! only where operator precedence or left associativity would otherwise
//! regroup the operands.

use super::arena::{ArithOp, ExprArena, LogicOp, Node, NodeId};

const IMPLIES: u8 = 1;
const OR: u8 = 2;
const AND: u8 = 3;
const NOT: u8 = 4;
const RELATION: u8 = 5;
const ADDITIVE: u8 = 6;
const TERM: u8 = 7;
const UNARY: u8 = 8;
const POWER: u8 = 9;
const ATOM: u8 = 10;

/// Render `root` using `names` for variable references.
pub fn print(arena: &ExprArena, root: NodeId, names: &[String]) -> String {
    Printer { arena, names }.render(root).0
}

/// Format a real literal so the lexer reads it back as a real.
pub fn format_real(value: f64) -> String {
    let text = format!("{value:?}");
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{text}.0")
    }
}

struct Printer<'a> {
    arena: &'a ExprArena,
    names: &'a [String],
}

impl Printer<'_> {
    fn render(&self, id: NodeId) -> (String, u8) {
        match self.arena.node(id) {
            Node::Bool(v) => (v.to_string(), ATOM),
            Node::Int(v) => (v.to_string(), if *v < 0 { UNARY } else { ATOM }),
            Node::Real(r) => (
                format_real(r.0),
                if r.0.is_sign_negative() { UNARY } else { ATOM },
            ),
            Node::Var(index) => (
                self.names
                    .get(*index)
                    .cloned()
                    .unwrap_or_else(|| format!("_v{index}")),
                ATOM,
            ),
            Node::Neg(a) => (format!("-{}", self.operand(*a, UNARY)), UNARY),
            Node::Pow(a, n) => (format!("{}^{n}", self.operand(*a, ATOM)), POWER),
            Node::Arith(op, a, b) => {
                let (symbol, level) = match op {
                    ArithOp::Add => ("+", ADDITIVE),
                    ArithOp::Sub => ("-", ADDITIVE),
                    ArithOp::Mul => ("*", TERM),
                    ArithOp::Div => ("/", TERM),
                    ArithOp::Mod => ("%", TERM),
                };
                (self.infix(*a, symbol, *b, level), level)
            }
            Node::Cmp(op, a, b) => (self.infix(*a, op.symbol(), *b, RELATION), RELATION),
            Node::Not(a) => (format!("not {}", self.operand(*a, NOT)), NOT),
            Node::Logic(op, a, b) => {
                let (symbol, level) = match op {
                    LogicOp::And => ("and", AND),
                    LogicOp::Or => ("or", OR),
                    LogicOp::Implies => ("->", IMPLIES),
                };
                (self.infix(*a, symbol, *b, level), level)
            }
            Node::Ite(c, a, b) => (
                format!(
                    "if({}, {}, {})",
                    self.render(*c).0,
                    self.render(*a).0,
                    self.render(*b).0
                ),
                ATOM,
            ),
            Node::Sum(items) => (format!("sum([{}])", self.list(items)), ATOM),
            Node::AllDifferent(items) => (format!("all_different([{}])", self.list(items)), ATOM),
            Node::All(items) => (format!("all([{}])", self.list(items)), ATOM),
            Node::Any(items) => (format!("any([{}])", self.list(items)), ATOM),
            Node::Call(func, items) => (format!("{}({})", func.name(), self.list(items)), ATOM),
        }
    }

    fn operand(&self, id: NodeId, min_level: u8) -> String {
        let (text, level) = self.render(id);
        if level < min_level {
            format!("({text})")
        } else {
            text
        }
    }

    /// Left-associative infix: the right operand binds one level tighter.
    fn infix(&self, a: NodeId, symbol: &str, b: NodeId, level: u8) -> String {
        format!(
            "{} {symbol} {}",
            self.operand(a, level),
            self.operand(b, level + 1)
        )
    }

    fn list(&self, items: &[NodeId]) -> String {
        items
            .iter()
            .map(|&id| self.render(id).0)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::VariableKind;
    use crate::expr::compiler::tests::TestSymbols;
    use crate::expr::compiler::{CompileSettings, Compiler};

    fn round_trip(symbols: &TestSymbols, source: &str) -> String {
        let names: Vec<String> = symbols.vars.iter().map(|(n, _)| n.clone()).collect();
        let mut first = ExprArena::new();
        let a = Compiler::new(&mut first, symbols, CompileSettings::default())
            .constraint(source)
            .unwrap();
        let printed = print(&first, a, &names);
        let mut second = ExprArena::new();
        let b = Compiler::new(&mut second, symbols, CompileSettings::default())
            .constraint(&printed)
            .unwrap();
        assert!(
            first.same_structure(a, &second, b),
            "'{source}' printed as '{printed}' does not re-parse to the same tree"
        );
        printed
    }

    fn ints() -> TestSymbols {
        TestSymbols::new(&[
            ("x", VariableKind::Integer),
            ("y", VariableKind::Integer),
            ("z", VariableKind::Integer),
        ])
    }

    #[test]
    fn test_minimal_parentheses() {
        let symbols = ints();
        assert_eq!(round_trip(&symbols, "(x + y) * z == 4"), "(x + y) * z == 4");
        assert_eq!(round_trip(&symbols, "x - (y - z) == 1"), "x - (y - z) == 1");
        assert_eq!(round_trip(&symbols, "((x - y) - z) == 1"), "x - y - z == 1");
    }

    #[test]
    fn test_negative_literals_and_powers() {
        let symbols = ints();
        assert_eq!(round_trip(&symbols, "(-3)^2 + x >= -1"), "(-3)^2 + x >= -1");
        round_trip(&symbols, "-x^2 <= 2 * -3");
        round_trip(&symbols, "--x == x");
    }

    #[test]
    fn test_connectives() {
        let symbols = ints();
        round_trip(&symbols, "x > 1 -> (y > 1 -> z > 1)");
        round_trip(&symbols, "not (x == 1 or y == 2) and z != 3");
        round_trip(&symbols, "(x < y) == (y < z)");
    }

    #[test]
    fn test_aggregates_and_quantifiers() {
        let symbols = ints().with_set("S", &[0, 1, 2]);
        round_trip(&symbols, "forall T in subsets(S, 2): sum(T) != 5");
        round_trip(&symbols, "all_different(S) and max(x, y) <= abs(z - 4)");
        round_trip(&symbols, "sum(c in S: if(c == 5, 0, c)) != 9");
    }

    #[test]
    fn test_real_formatting() {
        assert_eq!(format_real(100.0), "100.0");
        assert_eq!(format_real(0.25), "0.25");
        assert_eq!(format_real(1e-7), "1e-7");
        let symbols = TestSymbols::new(&[("r", VariableKind::Continuous)]);
        round_trip(&symbols, "r * 1.5 <= 1e-7 + 3 / 4");
    }
}
