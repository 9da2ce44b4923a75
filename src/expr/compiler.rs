//! Typed compilation of syntax trees into arena nodes.
//!
//! Identifiers are resolved against a [`SymbolTable`] supplied by the
//! problem being built. Quantifiers and comprehensions are expanded here,
//! so every tree handed to a backend is quantifier free.

use super::arena::{ArithOp, CmpOp, ExprArena, Func, LogicOp, Node, NodeId, Real, ValueType};
use super::parser::{parse, BinOp, Domain, Expr, ExprKind, Quantifier};
use crate::domain::errors::CompilationError;
use crate::domain::value_objects::{Dialect, VariableKind};

pub const DEFAULT_MAX_SET_SIZE: usize = 16;

/// Largest literal exponent accepted by `^`. Powers are emitted as repeated
/// products, so the bound also caps the size of the engine term.
pub const MAX_EXPONENT: u32 = 64;

/// Names visible to the compiler.
pub trait SymbolTable {
    /// Index of a declared variable.
    fn variable(&self, name: &str) -> Option<usize>;
    fn kind(&self, index: usize) -> VariableKind;
    /// Member variable indices of a named set.
    fn set(&self, name: &str) -> Option<Vec<usize>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileSettings {
    pub dialect: Dialect,
    pub max_set_size: usize,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            dialect: Dialect::Symbolic,
            max_set_size: DEFAULT_MAX_SET_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Element(NodeId),
    Set(Vec<NodeId>),
}

pub struct Compiler<'a> {
    arena: &'a mut ExprArena,
    symbols: &'a dyn SymbolTable,
    settings: CompileSettings,
    source: String,
    scopes: Vec<(String, Binding)>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        arena: &'a mut ExprArena,
        symbols: &'a dyn SymbolTable,
        settings: CompileSettings,
    ) -> Self {
        Self {
            arena,
            symbols,
            settings,
            source: String::new(),
            scopes: Vec::new(),
        }
    }

    /// Compile a boolean constraint.
    pub fn constraint(&mut self, source: &str) -> Result<NodeId, CompilationError> {
        let id = self.compile_root(source)?;
        if self.arena.ty(id) != ValueType::Bool {
            return Err(CompilationError::TypeMismatch {
                message: format!(
                    "a constraint must be a boolean expression, found {}",
                    self.arena.ty(id)
                ),
                fragment: source.to_string(),
            });
        }
        Ok(id)
    }

    /// Compile a numeric objective.
    pub fn objective(&mut self, source: &str) -> Result<NodeId, CompilationError> {
        let id = self.compile_root(source)?;
        if !self.arena.ty(id).is_numeric() {
            return Err(CompilationError::TypeMismatch {
                message: "an objective must be a numeric expression".into(),
                fragment: source.to_string(),
            });
        }
        Ok(id)
    }

    fn compile_root(&mut self, source: &str) -> Result<NodeId, CompilationError> {
        let tree = parse(source)?;
        self.source = source.to_string();
        self.scopes.clear();
        self.expr(&tree)
    }

    fn fragment(&self, e: &Expr) -> String {
        self.source
            .get(e.span.0..e.span.1)
            .unwrap_or(&self.source)
            .to_string()
    }

    fn mismatch(&self, e: &Expr, message: impl Into<String>) -> CompilationError {
        CompilationError::TypeMismatch {
            message: message.into(),
            fragment: self.fragment(e),
        }
    }

    fn unknown(&self, e: &Expr, identifier: &str) -> CompilationError {
        CompilationError::UnknownIdentifier {
            identifier: identifier.to_string(),
            fragment: self.fragment(e),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, binding)| binding)
    }

    fn var(&mut self, index: usize) -> NodeId {
        let ty = match self.symbols.kind(index) {
            VariableKind::Boolean => ValueType::Bool,
            VariableKind::Integer => ValueType::Int,
            VariableKind::Continuous => ValueType::Real,
        };
        self.arena.intern(Node::Var(index), ty)
    }

    fn expr(&mut self, e: &Expr) -> Result<NodeId, CompilationError> {
        match &e.kind {
            ExprKind::Int(v) => Ok(self.arena.intern(Node::Int(*v), ValueType::Int)),
            ExprKind::Real(v) => Ok(self.arena.intern(Node::Real(Real(*v)), ValueType::Real)),
            ExprKind::Bool(v) => Ok(self.arena.intern(Node::Bool(*v), ValueType::Bool)),
            ExprKind::Ident(name) => self.ident(e, name),
            ExprKind::List(_) => Err(self.mismatch(
                e,
                "a list is only valid as a function argument or quantifier domain",
            )),
            ExprKind::Neg(inner) => self.negate(e, inner),
            ExprKind::Not(inner) => {
                let id = self.boolean(inner)?;
                Ok(self.arena.intern(Node::Not(id), ValueType::Bool))
            }
            ExprKind::Binary(op, lhs, rhs) => self.binary(e, *op, lhs, rhs),
            ExprKind::Pow(base, exponent) => self.power(e, base, exponent),
            ExprKind::Call(name, args) => self.call(e, name, args),
            ExprKind::Comprehension {
                func,
                binder,
                domain,
                body,
            } => {
                if !is_aggregate(func) {
                    return Err(if is_scalar_function(func) {
                        self.mismatch(e, format!("{func} does not accept a comprehension"))
                    } else {
                        self.unknown(e, func)
                    });
                }
                let members = self.collection(domain)?;
                let mut items = Vec::with_capacity(members.len());
                for member in members {
                    self.scopes.push((binder.clone(), Binding::Element(member)));
                    let item = self.expr(body);
                    self.scopes.pop();
                    items.push(item?);
                }
                self.aggregate(e, func, items)
            }
            ExprKind::Quantifier {
                kind,
                binder,
                domain,
                body,
            } => self.quantifier(*kind, binder, domain, body),
        }
    }

    fn ident(&mut self, e: &Expr, name: &str) -> Result<NodeId, CompilationError> {
        match self.lookup(name) {
            Some(Binding::Element(id)) => return Ok(*id),
            Some(Binding::Set(_)) => {
                return Err(self.mismatch(e, format!("'{name}' is a collection, not a value")))
            }
            None => {}
        }
        if let Some(index) = self.symbols.variable(name) {
            return Ok(self.var(index));
        }
        if self.symbols.set(name).is_some() {
            return Err(self.mismatch(e, format!("'{name}' is a collection, not a value")));
        }
        Err(self.unknown(e, name))
    }

    fn numeric(&mut self, e: &Expr) -> Result<NodeId, CompilationError> {
        let id = self.expr(e)?;
        if !self.arena.ty(id).is_numeric() {
            return Err(self.mismatch(e, "expected a numeric operand, found boolean"));
        }
        Ok(id)
    }

    fn boolean(&mut self, e: &Expr) -> Result<NodeId, CompilationError> {
        let id = self.expr(e)?;
        if self.arena.ty(id) != ValueType::Bool {
            return Err(self.mismatch(
                e,
                format!("expected a boolean operand, found {}", self.arena.ty(id)),
            ));
        }
        Ok(id)
    }

    fn negate(&mut self, e: &Expr, inner: &Expr) -> Result<NodeId, CompilationError> {
        let id = self.numeric(inner)?;
        match self.arena.node(id).clone() {
            Node::Int(v) => {
                let v = v
                    .checked_neg()
                    .ok_or_else(|| self.mismatch(e, "integer literal overflows"))?;
                Ok(self.arena.intern(Node::Int(v), ValueType::Int))
            }
            Node::Real(r) => Ok(self.arena.intern(Node::Real(Real(-r.0)), ValueType::Real)),
            _ => {
                let ty = self.arena.ty(id);
                Ok(self.arena.intern(Node::Neg(id), ty))
            }
        }
    }

    fn binary(
        &mut self,
        e: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<NodeId, CompilationError> {
        let logic = match op {
            BinOp::And => Some(LogicOp::And),
            BinOp::Or => Some(LogicOp::Or),
            BinOp::Implies => Some(LogicOp::Implies),
            _ => None,
        };
        if let Some(logic) = logic {
            let (a, b) = (self.boolean(lhs)?, self.boolean(rhs)?);
            return Ok(self.arena.intern(Node::Logic(logic, a, b), ValueType::Bool));
        }

        let cmp = match op {
            BinOp::Eq => Some(CmpOp::Eq),
            BinOp::Ne => Some(CmpOp::Ne),
            BinOp::Lt => Some(CmpOp::Lt),
            BinOp::Le => Some(CmpOp::Le),
            BinOp::Gt => Some(CmpOp::Gt),
            BinOp::Ge => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(cmp) = cmp {
            let (a, b) = (self.expr(lhs)?, self.expr(rhs)?);
            let (ta, tb) = (self.arena.ty(a), self.arena.ty(b));
            let both_bool = ta == ValueType::Bool && tb == ValueType::Bool;
            let ok = (ta.is_numeric() && tb.is_numeric())
                || (both_bool && matches!(cmp, CmpOp::Eq | CmpOp::Ne));
            if !ok {
                return Err(self.mismatch(
                    e,
                    format!("cannot compare {ta} with {tb} using '{}'", cmp.symbol()),
                ));
            }
            return Ok(self.arena.intern(Node::Cmp(cmp, a, b), ValueType::Bool));
        }

        let arith = match op {
            BinOp::Add => ArithOp::Add,
            BinOp::Sub => ArithOp::Sub,
            BinOp::Mul => ArithOp::Mul,
            BinOp::Div => ArithOp::Div,
            _ => ArithOp::Mod,
        };
        let (a, b) = (self.numeric(lhs)?, self.numeric(rhs)?);
        let (ta, tb) = (self.arena.ty(a), self.arena.ty(b));
        if matches!(arith, ArithOp::Div | ArithOp::Mod)
            && self.arena.node(b).literal() == Some(0.0)
        {
            return Err(CompilationError::DivisionByZero {
                fragment: self.fragment(e),
            });
        }
        let ty = match arith {
            ArithOp::Div => ValueType::Real,
            ArithOp::Mod => {
                if ta != ValueType::Int || tb != ValueType::Int {
                    return Err(self.mismatch(e, "'%' requires integer operands"));
                }
                ValueType::Int
            }
            _ => ta.promote(tb),
        };
        Ok(self.arena.intern(Node::Arith(arith, a, b), ty))
    }

    fn power(&mut self, e: &Expr, base: &Expr, exponent: &Expr) -> Result<NodeId, CompilationError> {
        let n = match exponent.kind {
            ExprKind::Int(n) => u32::try_from(n).ok(),
            _ => None,
        }
        .ok_or_else(|| self.mismatch(e, "exponent must be a non-negative integer literal"))?;
        if n > MAX_EXPONENT {
            return Err(self.mismatch(e, format!("exponent {n} exceeds the maximum of {MAX_EXPONENT}")));
        }
        let id = self.numeric(base)?;
        let ty = self.arena.ty(id);
        Ok(self.arena.intern(Node::Pow(id, n), ty))
    }

    fn is_collection(&self, e: &Expr) -> bool {
        match &e.kind {
            ExprKind::List(_) => true,
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(Binding::Set(_)) => true,
                Some(Binding::Element(_)) => false,
                None => {
                    self.symbols.variable(name).is_none() && self.symbols.set(name).is_some()
                }
            },
            _ => false,
        }
    }

    fn collection(&mut self, e: &Expr) -> Result<Vec<NodeId>, CompilationError> {
        match &e.kind {
            ExprKind::List(items) => items.iter().map(|item| self.expr(item)).collect(),
            ExprKind::Ident(name) => {
                match self.lookup(name) {
                    Some(Binding::Set(members)) => return Ok(members.clone()),
                    Some(Binding::Element(_)) => {
                        return Err(self.mismatch(e, format!("'{name}' is not a collection")))
                    }
                    None => {}
                }
                if let Some(indices) = self.symbols.set(name) {
                    return Ok(indices.into_iter().map(|i| self.var(i)).collect());
                }
                if self.symbols.variable(name).is_some() {
                    return Err(self.mismatch(e, format!("'{name}' is not a collection")));
                }
                Err(self.unknown(e, name))
            }
            _ => Err(self.mismatch(e, "expected a named set or a list")),
        }
    }

    fn call(&mut self, e: &Expr, name: &str, args: &[Expr]) -> Result<NodeId, CompilationError> {
        match name {
            "abs" | "square" => {
                let [arg] = args else {
                    return Err(self.mismatch(e, format!("{name} takes exactly one argument")));
                };
                let id = self.numeric(arg)?;
                let ty = self.arena.ty(id);
                let func = if name == "abs" { Func::Abs } else { Func::Square };
                Ok(self.arena.intern(Node::Call(func, vec![id]), ty))
            }
            "if" | "ite" => {
                let [cond, then, otherwise] = args else {
                    return Err(self.mismatch(e, "if takes exactly three arguments"));
                };
                let c = self.boolean(cond)?;
                let (a, b) = (self.expr(then)?, self.expr(otherwise)?);
                let (ta, tb) = (self.arena.ty(a), self.arena.ty(b));
                let ty = if ta.is_numeric() && tb.is_numeric() {
                    ta.promote(tb)
                } else if ta == tb {
                    ta
                } else {
                    return Err(self.mismatch(e, format!("if branches differ: {ta} and {tb}")));
                };
                Ok(self.arena.intern(Node::Ite(c, a, b), ty))
            }
            _ if is_aggregate(name) => {
                let items = match args {
                    [single] if self.is_collection(single) => self.collection(single)?,
                    _ => args
                        .iter()
                        .map(|arg| self.expr(arg))
                        .collect::<Result<Vec<_>, _>>()?,
                };
                self.aggregate(e, name, items)
            }
            _ => Err(self.unknown(e, name)),
        }
    }

    fn aggregate(
        &mut self,
        e: &Expr,
        name: &str,
        items: Vec<NodeId>,
    ) -> Result<NodeId, CompilationError> {
        match name {
            "sum" => {
                if items.is_empty() {
                    return Ok(self.arena.intern(Node::Int(0), ValueType::Int));
                }
                let one = self.arena.intern(Node::Int(1), ValueType::Int);
                let zero = self.arena.intern(Node::Int(0), ValueType::Int);
                let mut ty = ValueType::Int;
                let mut terms = Vec::with_capacity(items.len());
                for id in items {
                    // booleans count as 0/1
                    let term = if self.arena.ty(id) == ValueType::Bool {
                        self.arena.intern(Node::Ite(id, one, zero), ValueType::Int)
                    } else {
                        id
                    };
                    ty = ty.promote(self.arena.ty(term));
                    terms.push(term);
                }
                Ok(self.arena.intern(Node::Sum(terms), ty))
            }
            "all" | "any" => {
                if items.iter().any(|&id| self.arena.ty(id) != ValueType::Bool) {
                    return Err(self.mismatch(e, format!("{name} expects boolean members")));
                }
                Ok(self.junction(name == "all", items))
            }
            "all_different" | "alldifferent" | "distinct" => {
                if self.settings.dialect == Dialect::Convex {
                    return Err(self.mismatch(e, "all_different is only available to discrete solvers"));
                }
                self.require_numeric(e, name, &items)?;
                if items.is_empty() {
                    return Ok(self.arena.intern(Node::Bool(true), ValueType::Bool));
                }
                Ok(self.arena.intern(Node::AllDifferent(items), ValueType::Bool))
            }
            _ => {
                let func = match name {
                    "min" => Func::Min,
                    "max" => Func::Max,
                    "sum_squares" => Func::SumSquares,
                    "norm1" => Func::Norm1,
                    _ => Func::Norm2,
                };
                if func == Func::Norm2 && self.settings.dialect != Dialect::Convex {
                    return Err(self.mismatch(e, "norm2 is only available to convex problems"));
                }
                if items.is_empty() {
                    return Err(self.mismatch(e, format!("{name} needs at least one argument")));
                }
                self.require_numeric(e, name, &items)?;
                let ty = if func == Func::Norm2 {
                    ValueType::Real
                } else {
                    items
                        .iter()
                        .fold(ValueType::Int, |acc, &id| acc.promote(self.arena.ty(id)))
                };
                Ok(self.arena.intern(Node::Call(func, items), ty))
            }
        }
    }

    fn require_numeric(&self, e: &Expr, name: &str, items: &[NodeId]) -> Result<(), CompilationError> {
        if items.iter().any(|&id| !self.arena.ty(id).is_numeric()) {
            return Err(self.mismatch(e, format!("{name} expects numeric members")));
        }
        Ok(())
    }

    fn junction(&mut self, conjunction: bool, items: Vec<NodeId>) -> NodeId {
        if items.is_empty() {
            return self.arena.intern(Node::Bool(conjunction), ValueType::Bool);
        }
        let node = if conjunction {
            Node::All(items)
        } else {
            Node::Any(items)
        };
        self.arena.intern(node, ValueType::Bool)
    }

    fn quantifier(
        &mut self,
        kind: Quantifier,
        binder: &str,
        domain: &Domain,
        body: &Expr,
    ) -> Result<NodeId, CompilationError> {
        let bindings = match domain {
            Domain::Collection(collection) => self
                .collection(collection)?
                .into_iter()
                .map(Binding::Element)
                .collect::<Vec<_>>(),
            Domain::Subsets {
                collection,
                min,
                max,
            } => {
                let members = self.collection(collection)?;
                if members.len() > self.settings.max_set_size {
                    return Err(CompilationError::ExpansionTooLarge {
                        collection: self.fragment(collection),
                        size: members.len(),
                        limit: self.settings.max_set_size,
                    });
                }
                let upper = max.unwrap_or(members.len()).min(members.len());
                (*min..=upper)
                    .flat_map(|k| combinations(members.len(), k))
                    .map(|picked| Binding::Set(picked.into_iter().map(|i| members[i]).collect()))
                    .collect()
            }
        };

        let mut items = Vec::with_capacity(bindings.len());
        for binding in bindings {
            self.scopes.push((binder.to_string(), binding));
            let item = self.boolean(body);
            self.scopes.pop();
            items.push(item?);
        }
        Ok(self.junction(kind == Quantifier::Forall, items))
    }
}

fn is_aggregate(name: &str) -> bool {
    matches!(
        name,
        "sum"
            | "all"
            | "any"
            | "all_different"
            | "alldifferent"
            | "distinct"
            | "min"
            | "max"
            | "sum_squares"
            | "norm1"
            | "norm2"
            | "norm"
    )
}

fn is_scalar_function(name: &str) -> bool {
    matches!(name, "abs" | "square" | "if" | "ite")
}

/// All `k`-element index combinations of `0..n` in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k > n {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if current[i] != i + n - k {
                break;
            }
            if i == 0 {
                return out;
            }
        }
        current[i] += 1;
        for j in i + 1..k {
            current[j] = current[j - 1] + 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Symbol table for tests: `(name, kind)` pairs plus named sets.
    pub(crate) struct TestSymbols {
        pub vars: Vec<(String, VariableKind)>,
        pub sets: HashMap<String, Vec<usize>>,
    }

    impl TestSymbols {
        pub(crate) fn new(vars: &[(&str, VariableKind)]) -> Self {
            Self {
                vars: vars.iter().map(|(n, k)| (n.to_string(), *k)).collect(),
                sets: HashMap::new(),
            }
        }

        pub(crate) fn with_set(mut self, name: &str, members: &[usize]) -> Self {
            self.sets.insert(name.to_string(), members.to_vec());
            self
        }
    }

    impl SymbolTable for TestSymbols {
        fn variable(&self, name: &str) -> Option<usize> {
            self.vars.iter().position(|(n, _)| n == name)
        }

        fn kind(&self, index: usize) -> VariableKind {
            self.vars[index].1
        }

        fn set(&self, name: &str) -> Option<Vec<usize>> {
            self.sets.get(name).cloned()
        }
    }

    fn ints(names: &[&str]) -> TestSymbols {
        TestSymbols::new(
            &names
                .iter()
                .map(|n| (*n, VariableKind::Integer))
                .collect::<Vec<_>>(),
        )
    }

    fn compile(symbols: &TestSymbols, source: &str) -> Result<(ExprArena, NodeId), CompilationError> {
        let mut arena = ExprArena::new();
        let id = Compiler::new(&mut arena, symbols, CompileSettings::default()).constraint(source)?;
        Ok((arena, id))
    }

    #[test]
    fn test_linear_constraint_types() {
        let symbols = ints(&["x", "y"]);
        let (arena, id) = compile(&symbols, "x + y == 10").unwrap();
        assert_eq!(arena.ty(id), ValueType::Bool);
        match arena.node(id) {
            Node::Cmp(CmpOp::Eq, lhs, _) => assert_eq!(arena.ty(*lhs), ValueType::Int),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_mixed_arithmetic_promotes_to_real() {
        let symbols = TestSymbols::new(&[("n", VariableKind::Integer), ("r", VariableKind::Continuous)]);
        let mut arena = ExprArena::new();
        let id = Compiler::new(&mut arena, &symbols, CompileSettings::default())
            .objective("n * 2 + r")
            .unwrap();
        assert_eq!(arena.ty(id), ValueType::Real);
        let id = Compiler::new(&mut arena, &symbols, CompileSettings::default())
            .objective("n / 2")
            .unwrap();
        assert_eq!(arena.ty(id), ValueType::Real);
    }

    #[test]
    fn test_unknown_identifier_reports_name() {
        let symbols = ints(&["x"]);
        match compile(&symbols, "x + z >= 1") {
            Err(CompilationError::UnknownIdentifier { identifier, fragment }) => {
                assert_eq!(identifier, "z");
                assert_eq!(fragment, "z");
            }
            other => panic!("expected unknown identifier, got {other:?}"),
        }
    }

    #[test]
    fn test_connective_requires_boolean_operands() {
        let symbols = ints(&["x", "y"]);
        match compile(&symbols, "x and y > 1") {
            Err(CompilationError::TypeMismatch { fragment, .. }) => assert_eq!(fragment, "x"),
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_exponent_is_bounded() {
        let symbols = ints(&["x"]);
        assert!(compile(&symbols, "x^64 >= 1").is_ok());
        for source in ["x^65 >= 1", "x^2147483648 >= 1", "x^4000000000 >= 1"] {
            match compile(&symbols, source) {
                Err(CompilationError::TypeMismatch { fragment, message }) => {
                    assert!(fragment.starts_with("x^"), "{fragment}");
                    assert!(message.contains("maximum"), "{message}");
                }
                other => panic!("expected bounded exponent for '{source}', got {other:?}"),
            }
        }
    }

    #[test]
    fn test_division_by_literal_zero() {
        let symbols = ints(&["x"]);
        match compile(&symbols, "x / 0 == 1") {
            Err(CompilationError::DivisionByZero { fragment }) => assert_eq!(fragment, "x / 0"),
            other => panic!("expected division by zero, got {other:?}"),
        }
        assert!(matches!(
            compile(&symbols, "x % 0.0 == 1"),
            Err(CompilationError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_modulo_requires_integers() {
        let symbols = TestSymbols::new(&[("r", VariableKind::Continuous)]);
        assert!(matches!(
            compile(&symbols, "r % 2 == 1"),
            Err(CompilationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_relational_chain_fails_type_check() {
        let symbols = ints(&["x", "y", "z"]);
        assert!(matches!(
            compile(&symbols, "x < y < z"),
            Err(CompilationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_negative_literal_folds() {
        let symbols = ints(&["x"]);
        let (arena, id) = compile(&symbols, "x >= -3").unwrap();
        match arena.node(id) {
            Node::Cmp(_, _, rhs) => assert_eq!(arena.node(*rhs), &Node::Int(-3)),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_subset_quantifier_expands_all_subsets() {
        let symbols = ints(&["a", "b", "c"]).with_set("S", &[0, 1, 2]);
        let (arena, id) = compile(&symbols, "forall T in subsets(S, 2): sum(T) != 5").unwrap();
        match arena.node(id) {
            // three pairs plus the full triple
            Node::All(items) => assert_eq!(items.len(), 4),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_subset_quantifier_respects_upper_size() {
        let symbols = ints(&["a", "b", "c"]).with_set("S", &[0, 1, 2]);
        let (arena, id) = compile(&symbols, "exists T in subsets(S, 1, 1): sum(T) == 2").unwrap();
        match arena.node(id) {
            Node::Any(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_expansion_too_large() {
        let names: Vec<String> = (0..20).map(|i| format!("v{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let symbols = ints(&refs).with_set("big", &(0..20).collect::<Vec<_>>());
        match compile(&symbols, "forall T in subsets(big, 2): sum(T) != 3") {
            Err(CompilationError::ExpansionTooLarge { size, limit, .. }) => {
                assert_eq!(size, 20);
                assert_eq!(limit, DEFAULT_MAX_SET_SIZE);
            }
            other => panic!("expected expansion error, got {other:?}"),
        }
    }

    #[test]
    fn test_comprehension_binds_elements() {
        let symbols = ints(&["a", "b"]).with_set("coins", &[0, 1]);
        let (arena, id) = compile(&symbols, "sum(c in coins: if(c == 50, 0, c)) != 95").unwrap();
        match arena.node(id) {
            Node::Cmp(CmpOp::Ne, lhs, _) => match arena.node(*lhs) {
                Node::Sum(items) => assert_eq!(items.len(), 2),
                other => panic!("unexpected node {other:?}"),
            },
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_binder_shadows_variable() {
        let symbols = ints(&["x", "y"]).with_set("S", &[1]);
        let (arena, id) = compile(&symbols, "forall x in S: x >= 0").unwrap();
        assert_eq!(arena.variables(id).into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_hash_consing_shares_repeated_sums() {
        let symbols = ints(&["a", "b", "c"]).with_set("S", &[0, 1, 2]);
        let mut arena = ExprArena::new();
        let mut compiler = Compiler::new(&mut arena, &symbols, CompileSettings::default());
        let first = compiler.constraint("sum(S) <= 10").unwrap();
        let second = compiler.constraint("sum(S) <= 10").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_dialect_restrictions() {
        let symbols = TestSymbols::new(&[("x", VariableKind::Continuous), ("y", VariableKind::Continuous)]);
        let mut arena = ExprArena::new();
        let convex = CompileSettings {
            dialect: Dialect::Convex,
            ..CompileSettings::default()
        };
        assert!(Compiler::new(&mut arena, &symbols, convex)
            .objective("norm2(x, y)")
            .is_ok());
        assert!(Compiler::new(&mut arena, &symbols, CompileSettings::default())
            .objective("norm2(x, y)")
            .is_err());
        assert!(Compiler::new(&mut arena, &symbols, convex)
            .constraint("all_different(x, y)")
            .is_err());
    }

    #[test]
    fn test_unknown_function() {
        let symbols = ints(&["x"]);
        assert!(matches!(
            compile(&symbols, "sqrt(x) == 2"),
            Err(CompilationError::UnknownIdentifier { identifier, .. }) if identifier == "sqrt"
        ));
    }

    #[test]
    fn test_combinations_order() {
        assert_eq!(
            combinations(4, 2),
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(combinations(3, 0), vec![Vec::<usize>::new()]);
        assert!(combinations(2, 3).is_empty());
    }
}
