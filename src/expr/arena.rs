//! Hash-consed storage for compiled expression trees.
//!
//! Every node lives in one [`ExprArena`] owned by the problem that compiled
//! it and is addressed by a [`NodeId`]. Interning guarantees that two
//! structurally identical sub-trees share a single handle, so quantifier
//! expansion does not duplicate repeated sums. Trees are acyclic because a
//! node can only reference handles that existed before it was interned.

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

/// Handle to a node in an [`ExprArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Inferred type of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Real,
}

impl ValueType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Real)
    }

    /// Result type of mixing two numeric operands.
    pub fn promote(self, other: ValueType) -> ValueType {
        if self == ValueType::Int && other == ValueType::Int {
            ValueType::Int
        } else {
            ValueType::Real
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Bool => write!(f, "boolean"),
            ValueType::Int => write!(f, "integer"),
            ValueType::Real => write!(f, "continuous"),
        }
    }
}

/// Real literal compared and hashed by bit pattern.
#[derive(Debug, Clone, Copy)]
pub struct Real(pub f64);

impl PartialEq for Real {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Real {}

impl Hash for Real {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
    Implies,
}

/// Built-in numeric functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Func {
    Abs,
    Min,
    Max,
    Square,
    SumSquares,
    Norm1,
    Norm2,
}

impl Func {
    pub fn name(self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Square => "square",
            Func::SumSquares => "sum_squares",
            Func::Norm1 => "norm1",
            Func::Norm2 => "norm2",
        }
    }

    /// Functions taking exactly one argument.
    pub fn is_unary(self) -> bool {
        matches!(self, Func::Abs | Func::Square)
    }
}

/// A typed expression node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Bool(bool),
    Int(i64),
    Real(Real),
    /// Index of a declared variable in its problem.
    Var(usize),
    Neg(NodeId),
    Arith(ArithOp, NodeId, NodeId),
    Pow(NodeId, u32),
    Cmp(CmpOp, NodeId, NodeId),
    Not(NodeId),
    Logic(LogicOp, NodeId, NodeId),
    Ite(NodeId, NodeId, NodeId),
    /// Aggregate sum over a collection.
    Sum(Vec<NodeId>),
    AllDifferent(Vec<NodeId>),
    /// Conjunction produced by a universal quantifier.
    All(Vec<NodeId>),
    /// Disjunction produced by an existential quantifier.
    Any(Vec<NodeId>),
    Call(Func, Vec<NodeId>),
}

impl Node {
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Node::Bool(_) | Node::Int(_) | Node::Real(_) | Node::Var(_) => Vec::new(),
            Node::Neg(a) | Node::Pow(a, _) | Node::Not(a) => vec![*a],
            Node::Arith(_, a, b) | Node::Cmp(_, a, b) | Node::Logic(_, a, b) => vec![*a, *b],
            Node::Ite(c, a, b) => vec![*c, *a, *b],
            Node::Sum(items)
            | Node::AllDifferent(items)
            | Node::All(items)
            | Node::Any(items)
            | Node::Call(_, items) => items.clone(),
        }
    }

    /// Numeric value of a literal node.
    pub fn literal(&self) -> Option<f64> {
        match self {
            Node::Int(v) => Some(*v as f64),
            Node::Real(r) => Some(r.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Node>,
    types: Vec<ValueType>,
    interned: HashMap<Node, NodeId>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a node, returning the existing handle when an identical node
    /// is already stored.
    pub fn intern(&mut self, node: Node, ty: ValueType) -> NodeId {
        if let Some(&id) = self.interned.get(&node) {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node.clone());
        self.types.push(ty);
        self.interned.insert(node, id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn ty(&self, id: NodeId) -> ValueType {
        self.types[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of every variable reachable from `root`.
    pub fn variables(&self, root: NodeId) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            match self.node(id) {
                Node::Var(index) => {
                    found.insert(*index);
                }
                node => stack.extend(node.children()),
            }
        }
        found
    }

    /// Structural equality between a tree here and a tree in another arena.
    pub fn same_structure(&self, a: NodeId, other: &ExprArena, b: NodeId) -> bool {
        if self.ty(a) != other.ty(b) {
            return false;
        }
        let (left, right) = (self.node(a), other.node(b));
        let shallow_match = match (left, right) {
            (Node::Bool(x), Node::Bool(y)) => x == y,
            (Node::Int(x), Node::Int(y)) => x == y,
            (Node::Real(x), Node::Real(y)) => x == y,
            (Node::Var(x), Node::Var(y)) => x == y,
            (Node::Neg(_), Node::Neg(_))
            | (Node::Not(_), Node::Not(_))
            | (Node::Ite(..), Node::Ite(..)) => true,
            (Node::Pow(_, x), Node::Pow(_, y)) => x == y,
            (Node::Arith(x, ..), Node::Arith(y, ..)) => x == y,
            (Node::Cmp(x, ..), Node::Cmp(y, ..)) => x == y,
            (Node::Logic(x, ..), Node::Logic(y, ..)) => x == y,
            (Node::Sum(_), Node::Sum(_))
            | (Node::AllDifferent(_), Node::AllDifferent(_))
            | (Node::All(_), Node::All(_))
            | (Node::Any(_), Node::Any(_)) => true,
            (Node::Call(x, _), Node::Call(y, _)) => x == y,
            _ => false,
        };
        if !shallow_match {
            return false;
        }
        let (lc, rc) = (left.children(), right.children());
        lc.len() == rc.len()
            && lc
                .iter()
                .zip(rc.iter())
                .all(|(&x, &y)| self.same_structure(x, other, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_shares_identical_nodes() {
        let mut arena = ExprArena::new();
        let x = arena.intern(Node::Var(0), ValueType::Int);
        let y = arena.intern(Node::Var(1), ValueType::Int);
        let a = arena.intern(Node::Arith(ArithOp::Add, x, y), ValueType::Int);
        let b = arena.intern(Node::Arith(ArithOp::Add, x, y), ValueType::Int);
        assert_eq!(a, b);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn test_real_literals_intern_by_bits() {
        let mut arena = ExprArena::new();
        let a = arena.intern(Node::Real(Real(0.5)), ValueType::Real);
        let b = arena.intern(Node::Real(Real(0.5)), ValueType::Real);
        let c = arena.intern(Node::Real(Real(-0.5)), ValueType::Real);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_variables_collects_each_index_once() {
        let mut arena = ExprArena::new();
        let x = arena.intern(Node::Var(3), ValueType::Int);
        let sum = arena.intern(Node::Sum(vec![x, x]), ValueType::Int);
        let two = arena.intern(Node::Int(2), ValueType::Int);
        let cmp = arena.intern(Node::Cmp(CmpOp::Le, sum, two), ValueType::Bool);
        assert_eq!(arena.variables(cmp).into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_same_structure_across_arenas() {
        let mut first = ExprArena::new();
        let pad = first.intern(Node::Bool(true), ValueType::Bool);
        let x = first.intern(Node::Var(0), ValueType::Real);
        let neg = first.intern(Node::Neg(x), ValueType::Real);
        let _ = pad;

        let mut second = ExprArena::new();
        let x2 = second.intern(Node::Var(0), ValueType::Real);
        let neg2 = second.intern(Node::Neg(x2), ValueType::Real);
        let abs2 = second.intern(Node::Call(Func::Abs, vec![x2]), ValueType::Real);

        assert!(first.same_structure(neg, &second, neg2));
        assert!(!first.same_structure(neg, &second, abs2));
    }
}
