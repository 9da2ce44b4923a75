//! Disciplined convex canonicalization.
//!
//! Compiled trees are rewritten into affine rows over the declared variables
//! plus auxiliary epigraph variables. Every row belongs to a cone
//! (`s = row(x)`, `s ∈ K`): zero, nonnegative or second-order. Curvature is
//! checked while rewriting: a convex atom may only be bounded from above, a
//! concave one from below, and a non-affine argument is accepted only where
//! the composition rules allow it.

use crate::domain::{
    ConstraintKind, Direction, LinearRow, ObjectiveKind, Problem, Sense, SolveError,
};
use crate::expr::arena::{ArithOp, CmpOp, Func, LogicOp};
use crate::expr::{evaluate, print, ExprArena, Node, NodeId, ValueType};
use std::collections::BTreeMap;
use std::ops::{Add, Neg, Sub};

/// Affine function `Σ cᵢ·xᵢ + constant` over model columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Affine {
    pub terms: BTreeMap<usize, f64>,
    pub constant: f64,
}

impl Affine {
    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn var(column: usize) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(column, 1.0);
        Self {
            terms,
            constant: 0.0,
        }
    }

    pub fn scale(mut self, factor: f64) -> Self {
        for c in self.terms.values_mut() {
            *c *= factor;
        }
        self.constant *= factor;
        self.prune()
    }

    fn prune(mut self) -> Self {
        self.terms.retain(|_, c| *c != 0.0);
        self
    }
}

impl Add for Affine {
    type Output = Affine;

    fn add(mut self, other: Affine) -> Affine {
        for (column, c) in other.terms {
            *self.terms.entry(column).or_insert(0.0) += c;
        }
        self.constant += other.constant;
        self.prune()
    }
}

impl Sub for Affine {
    type Output = Affine;

    fn sub(self, other: Affine) -> Affine {
        self + (-other)
    }
}

impl Neg for Affine {
    type Output = Affine;

    fn neg(self) -> Affine {
        self.scale(-1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cone {
    Zero,
    Nonnegative,
    SecondOrder,
}

/// A block of consecutive rows in one cone.
#[derive(Debug, Clone, PartialEq)]
pub struct ConeBlock {
    pub cone: Cone,
    pub rows: Vec<Affine>,
}

/// Problem in conic form: minimise `½xᵀPx + qᵀx` subject to the cone rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ConicForm {
    /// Declared variables occupy columns `0..num_declared`.
    pub num_declared: usize,
    pub num_columns: usize,
    /// Upper-triangular entries `(row, col, value)` of P.
    pub quadratic: Vec<(usize, usize, f64)>,
    pub linear: Vec<f64>,
    pub blocks: Vec<ConeBlock>,
    /// Constraint label and the global row index of its defining row.
    pub dual_rows: Vec<(String, usize)>,
}

impl ConicForm {
    pub fn num_rows(&self) -> usize {
        self.blocks.iter().map(|b| b.rows.len()).sum()
    }
}

/// Canonicalize a convex-family problem.
///
/// `psd_tolerance` bounds how negative the smallest eigenvalue of a
/// quadratic objective may be before the form is rejected as not convex.
pub fn canonicalize(problem: &Problem, psd_tolerance: f64) -> Result<ConicForm, SolveError> {
    let names = problem.variable_names();
    let num_declared = problem.variables().len();
    let mut canon = Canonicalizer {
        arena: problem.arena(),
        names: &names,
        next_column: num_declared,
        blocks: Vec::new(),
        rows: 0,
    };

    for (i, variable) in problem.variables().iter().enumerate() {
        let (lower, upper) = variable.bounds();
        if lower.is_finite() {
            canon.push(Cone::Nonnegative, vec![Affine::var(i) - Affine::constant(lower)]);
        }
        if upper.is_finite() {
            canon.push(Cone::Nonnegative, vec![Affine::constant(upper) - Affine::var(i)]);
        }
    }

    let mut dual_rows = Vec::new();
    for constraint in problem.constraints() {
        let row = match &constraint.kind {
            ConstraintKind::Linear(row) => Some(canon.linear_row(row)),
            ConstraintKind::Expression { root, .. } => canon.constraint(*root)?,
            ConstraintKind::Global { .. } => {
                return Err(SolveError::Internal(format!(
                    "global constraint '{}' reached the convex backend",
                    constraint.label
                )))
            }
        };
        if let Some(row) = row {
            dual_rows.push((constraint.label.clone(), row));
        }
    }

    let objective = problem
        .objective()
        .ok_or_else(|| SolveError::Internal("convex problem without objective".into()))?;
    let sign = match objective.direction {
        Direction::Minimize => 1.0,
        Direction::Maximize => -1.0,
    };
    let mut quadratic = Vec::new();
    let target = match &objective.kind {
        ObjectiveKind::Linear(coefficients) => linear_affine(coefficients).scale(sign),
        ObjectiveKind::Quadratic {
            linear,
            quadratic: q,
        } => {
            // minimise sign·(lᵀx + xᵀQx); P = 2·sign·Q
            let oriented: Vec<Vec<f64>> = q
                .iter()
                .map(|row| row.iter().map(|v| v * sign).collect())
                .collect();
            let min_eigenvalue = smallest_eigenvalue(&oriented);
            let scale = oriented
                .iter()
                .flatten()
                .fold(1.0_f64, |m, v| m.max(v.abs()));
            if min_eigenvalue < -psd_tolerance * scale {
                let required = match objective.direction {
                    Direction::Minimize => "positive semidefinite for minimization",
                    Direction::Maximize => "negative semidefinite for maximization",
                };
                return Err(SolveError::NotConvex(format!(
                    "quadratic form is not {required} (smallest eigenvalue {min_eigenvalue:.3e})"
                )));
            }
            for (i, row) in oriented.iter().enumerate() {
                for (j, &v) in row.iter().enumerate().skip(i) {
                    if v != 0.0 {
                        quadratic.push((i, j, 2.0 * v));
                    }
                }
            }
            linear_affine(linear).scale(sign)
        }
        ObjectiveKind::Expression { root, .. } => match objective.direction {
            Direction::Minimize => canon.bound(*root, true)?,
            Direction::Maximize => -canon.bound(*root, false)?,
        },
    };

    let num_columns = canon.next_column;
    let mut linear = vec![0.0; num_columns];
    for (&column, &c) in &target.terms {
        linear[column] = c;
    }

    Ok(ConicForm {
        num_declared,
        num_columns,
        quadratic,
        linear,
        blocks: canon.blocks,
        dual_rows,
    })
}

fn linear_affine(coefficients: &[f64]) -> Affine {
    coefficients
        .iter()
        .enumerate()
        .fold(Affine::default(), |acc, (i, &c)| acc + Affine::var(i).scale(c))
}

fn smallest_eigenvalue(matrix: &[Vec<f64>]) -> f64 {
    let n = matrix.len();
    if n == 0 {
        return 0.0;
    }
    let m = nalgebra::DMatrix::from_fn(n, n, |i, j| 0.5 * (matrix[i][j] + matrix[j][i]));
    m.symmetric_eigenvalues().min()
}

struct Canonicalizer<'a> {
    arena: &'a ExprArena,
    names: &'a [String],
    next_column: usize,
    blocks: Vec<ConeBlock>,
    rows: usize,
}

impl Canonicalizer<'_> {
    /// Append rows; zero and nonnegative rows merge into the previous block
    /// of the same cone. Returns the index of the first row.
    fn push(&mut self, cone: Cone, rows: Vec<Affine>) -> usize {
        let first = self.rows;
        self.rows += rows.len();
        match self.blocks.last_mut() {
            Some(block) if block.cone == cone && cone != Cone::SecondOrder => {
                block.rows.extend(rows)
            }
            _ => self.blocks.push(ConeBlock { cone, rows }),
        }
        first
    }

    fn fresh(&mut self) -> Affine {
        let column = self.next_column;
        self.next_column += 1;
        Affine::var(column)
    }

    fn not_convex(&self, id: NodeId, reason: &str) -> SolveError {
        SolveError::NotConvex(format!("'{}' {reason}", print(self.arena, id, self.names)))
    }

    fn linear_row(&mut self, row: &LinearRow) -> usize {
        let lhs = row
            .terms
            .iter()
            .fold(Affine::default(), |acc, &(i, c)| acc + Affine::var(i).scale(c));
        let rhs = Affine::constant(row.rhs);
        match row.sense {
            Sense::LessThanOrEqual => self.push(Cone::Nonnegative, vec![rhs - lhs]),
            Sense::GreaterThanOrEqual => self.push(Cone::Nonnegative, vec![lhs - rhs]),
            Sense::Equal => self.push(Cone::Zero, vec![lhs - rhs]),
        }
    }

    /// Rows for a boolean constraint tree; returns the defining row of a
    /// single comparison.
    fn constraint(&mut self, root: NodeId) -> Result<Option<usize>, SolveError> {
        let arena = self.arena;
        match arena.node(root) {
            Node::Bool(true) => Ok(None),
            Node::Bool(false) => Ok(Some(self.push(Cone::Nonnegative, vec![Affine::constant(-1.0)]))),
            Node::All(items) => {
                for &item in items {
                    self.constraint(item)?;
                }
                Ok(None)
            }
            Node::Logic(LogicOp::And, a, b) => {
                self.constraint(*a)?;
                self.constraint(*b)?;
                Ok(None)
            }
            Node::Cmp(op, a, b) => {
                let row = match op {
                    CmpOp::Le | CmpOp::Lt => {
                        let lhs = self.bound(*a, true)?;
                        let rhs = self.bound(*b, false)?;
                        self.push(Cone::Nonnegative, vec![rhs - lhs])
                    }
                    CmpOp::Ge | CmpOp::Gt => {
                        let lhs = self.bound(*a, false)?;
                        let rhs = self.bound(*b, true)?;
                        self.push(Cone::Nonnegative, vec![lhs - rhs])
                    }
                    CmpOp::Eq => {
                        let lhs = self.affine(*a)?;
                        let rhs = self.affine(*b)?;
                        self.push(Cone::Zero, vec![lhs - rhs])
                    }
                    CmpOp::Ne => return Err(self.not_convex(root, "is a disequality")),
                };
                Ok(Some(row))
            }
            _ => Err(self.not_convex(root, "is not a conjunction of convex comparisons")),
        }
    }

    fn affine(&mut self, id: NodeId) -> Result<Affine, SolveError> {
        self.try_affine(id)
            .ok_or_else(|| self.not_convex(id, "must be affine here"))
    }

    /// Structural affine form, without auxiliary columns.
    fn try_affine(&self, id: NodeId) -> Option<Affine> {
        let arena = self.arena;
        match arena.node(id) {
            Node::Int(v) => Some(Affine::constant(*v as f64)),
            Node::Real(r) => Some(Affine::constant(r.0)),
            Node::Var(i) => Some(Affine::var(*i)),
            Node::Neg(a) => self.try_affine(*a).map(Neg::neg),
            Node::Arith(ArithOp::Add, a, b) => Some(self.try_affine(*a)? + self.try_affine(*b)?),
            Node::Arith(ArithOp::Sub, a, b) => Some(self.try_affine(*a)? - self.try_affine(*b)?),
            Node::Arith(ArithOp::Mul, a, b) => {
                if let Some(c) = self.constant(*a) {
                    Some(self.try_affine(*b)?.scale(c))
                } else {
                    let c = self.constant(*b)?;
                    Some(self.try_affine(*a)?.scale(c))
                }
            }
            Node::Arith(ArithOp::Div, a, b) => {
                let c = self.constant(*b)?;
                (c != 0.0).then_some(())?;
                Some(self.try_affine(*a)?.scale(1.0 / c))
            }
            Node::Pow(a, 1) => self.try_affine(*a),
            Node::Pow(_, 0) => Some(Affine::constant(1.0)),
            Node::Sum(items) => items
                .iter()
                .try_fold(Affine::default(), |acc, &item| Some(acc + self.try_affine(item)?)),
            _ => self.constant(id).map(Affine::constant),
        }
    }

    fn constant(&self, id: NodeId) -> Option<f64> {
        if self.arena.ty(id) == ValueType::Bool || !self.arena.variables(id).is_empty() {
            return None;
        }
        let value = evaluate(self.arena, id, &[], 0.0).as_f64();
        value.is_finite().then_some(value)
    }

    /// Affine bound on `id`: an upper bound (`upper`, needs a convex
    /// expression) or a lower bound (needs a concave one). Auxiliary
    /// columns make the bound tight at the optimum.
    fn bound(&mut self, id: NodeId, upper: bool) -> Result<Affine, SolveError> {
        if let Some(affine) = self.try_affine(id) {
            return Ok(affine);
        }
        let arena = self.arena;
        match arena.node(id) {
            Node::Neg(a) => Ok(-self.bound(*a, !upper)?),
            Node::Arith(ArithOp::Add, a, b) => Ok(self.bound(*a, upper)? + self.bound(*b, upper)?),
            Node::Arith(ArithOp::Sub, a, b) => Ok(self.bound(*a, upper)? - self.bound(*b, !upper)?),
            Node::Arith(ArithOp::Mul, a, b) => {
                if let Some(c) = self.constant(*a) {
                    self.scaled(*b, c, upper)
                } else if let Some(c) = self.constant(*b) {
                    self.scaled(*a, c, upper)
                } else if a == b {
                    self.square(id, *a, upper)
                } else {
                    Err(self.not_convex(id, "multiplies two non-constant expressions"))
                }
            }
            Node::Arith(ArithOp::Div, a, b) => match self.constant(*b) {
                Some(c) if c != 0.0 => self.scaled(*a, 1.0 / c, upper),
                _ => Err(self.not_convex(id, "divides by a non-constant expression")),
            },
            Node::Pow(a, 2) => self.square(id, *a, upper),
            Node::Sum(items) => items.iter().try_fold(Affine::default(), |acc, &item| {
                Ok(acc + self.bound(item, upper)?)
            }),
            Node::Call(func, args) => self.atom(id, *func, args, upper),
            Node::Pow(..) => Err(self.not_convex(id, "uses a power other than 2")),
            _ => Err(self.not_convex(id, "has no convex representation")),
        }
    }

    fn scaled(&mut self, id: NodeId, factor: f64, upper: bool) -> Result<Affine, SolveError> {
        let inner = if factor >= 0.0 {
            self.bound(id, upper)?
        } else {
            self.bound(id, !upper)?
        };
        Ok(inner.scale(factor))
    }

    fn require_upper(&self, id: NodeId, upper: bool) -> Result<(), SolveError> {
        if upper {
            Ok(())
        } else {
            Err(self.not_convex(id, "is convex but appears where a concave expression is required"))
        }
    }

    fn square(&mut self, id: NodeId, arg: NodeId, upper: bool) -> Result<Affine, SolveError> {
        self.require_upper(id, upper)?;
        let x = self.affine(arg)?;
        Ok(self.sum_squares_epigraph(vec![x]))
    }

    /// `t ≥ Σ xᵢ²` as `‖(t − 1, 2x)‖ ≤ t + 1`.
    fn sum_squares_epigraph(&mut self, xs: Vec<Affine>) -> Affine {
        let t = self.fresh();
        let mut rows = vec![
            t.clone() + Affine::constant(1.0),
            t.clone() - Affine::constant(1.0),
        ];
        rows.extend(xs.into_iter().map(|x| x.scale(2.0)));
        self.push(Cone::SecondOrder, rows);
        t
    }

    fn abs_epigraph(&mut self, x: Affine) -> Affine {
        let t = self.fresh();
        self.push(
            Cone::Nonnegative,
            vec![t.clone() - x.clone(), t.clone() + x],
        );
        t
    }

    fn atom(&mut self, id: NodeId, func: Func, args: &[NodeId], upper: bool) -> Result<Affine, SolveError> {
        match func {
            Func::Abs => {
                self.require_upper(id, upper)?;
                let x = self.affine(args[0])?;
                Ok(self.abs_epigraph(x))
            }
            Func::Square => self.square(id, args[0], upper),
            Func::SumSquares => {
                self.require_upper(id, upper)?;
                let xs = args.iter().map(|&a| self.affine(a)).collect::<Result<Vec<_>, _>>()?;
                Ok(self.sum_squares_epigraph(xs))
            }
            Func::Norm1 => {
                self.require_upper(id, upper)?;
                let mut total = Affine::default();
                for &a in args {
                    let x = self.affine(a)?;
                    total = total + self.abs_epigraph(x);
                }
                Ok(total)
            }
            Func::Norm2 => {
                self.require_upper(id, upper)?;
                let xs = args.iter().map(|&a| self.affine(a)).collect::<Result<Vec<_>, _>>()?;
                let t = self.fresh();
                let mut rows = vec![t.clone()];
                rows.extend(xs);
                self.push(Cone::SecondOrder, rows);
                Ok(t)
            }
            Func::Max => {
                self.require_upper(id, upper)?;
                let t = self.fresh();
                for &a in args {
                    let x = self.bound(a, true)?;
                    self.push(Cone::Nonnegative, vec![t.clone() - x]);
                }
                Ok(t)
            }
            Func::Min => {
                if upper {
                    return Err(self.not_convex(id, "is concave but appears where a convex expression is required"));
                }
                let t = self.fresh();
                for &a in args {
                    let x = self.bound(a, false)?;
                    self.push(Cone::Nonnegative, vec![x - t.clone()]);
                }
                Ok(t)
            }
        }
    }
}
