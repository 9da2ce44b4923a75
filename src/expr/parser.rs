use super::lexer::{tokenize, SpannedToken, Token};
use crate::domain::errors::CompilationError;

/// Untyped syntax tree produced by [`parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    /// Byte range in the source text.
    pub span: (usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Real(f64),
    Bool(bool),
    Ident(String),
    List(Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    /// `f(x in C: body)`
    Comprehension {
        func: String,
        binder: String,
        domain: Box<Expr>,
        body: Box<Expr>,
    },
    Quantifier {
        kind: Quantifier,
        binder: String,
        domain: Domain,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Implies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Forall,
    Exists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Collection(Box<Expr>),
    Subsets {
        collection: Box<Expr>,
        min: usize,
        max: Option<usize>,
    },
}

/// Deepest bracket, call or prefix-operator nesting the parser descends into.
pub const MAX_NESTING: usize = 64;

/// Tallest syntax tree accepted, operator chains included.
pub const MAX_TREE_HEIGHT: usize = 512;

/// Longest expression accepted, in tokens.
pub const MAX_TOKENS: usize = 8192;

/// Parse an expression string into a syntax tree.
pub fn parse(source: &str) -> Result<Expr, CompilationError> {
    let tokens = tokenize(source);
    if tokens.len() > MAX_TOKENS {
        return Err(CompilationError::Syntax {
            message: format!("expression has {} tokens, more than the maximum of {MAX_TOKENS}", tokens.len()),
            position: 0,
            fragment: source.to_string(),
        });
    }
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_implication()?;
    if let Some(tok) = parser.peek() {
        return Err(parser.error_at(tok, format!("unexpected '{}'", tok.lexeme)));
    }
    if height(&expr) > MAX_TREE_HEIGHT {
        return Err(CompilationError::Syntax {
            message: format!("expression nests more than {MAX_TREE_HEIGHT} operators deep; use sum(...) for long sums"),
            position: 0,
            fragment: source.to_string(),
        });
    }
    Ok(expr)
}

/// Height of a syntax tree, walked without recursion.
fn height(root: &Expr) -> usize {
    let mut tallest = 0;
    let mut stack = vec![(root, 1)];
    while let Some((expr, level)) = stack.pop() {
        tallest = tallest.max(level);
        let below = level + 1;
        match &expr.kind {
            ExprKind::Int(_) | ExprKind::Real(_) | ExprKind::Bool(_) | ExprKind::Ident(_) => {}
            ExprKind::List(items) | ExprKind::Call(_, items) => {
                stack.extend(items.iter().map(|item| (item, below)));
            }
            ExprKind::Neg(a) | ExprKind::Not(a) => stack.push((a.as_ref(), below)),
            ExprKind::Binary(_, a, b) | ExprKind::Pow(a, b) => {
                stack.push((a.as_ref(), below));
                stack.push((b.as_ref(), below));
            }
            ExprKind::Comprehension { domain, body, .. } => {
                stack.push((domain.as_ref(), below));
                stack.push((body.as_ref(), below));
            }
            ExprKind::Quantifier { domain, body, .. } => {
                let (Domain::Collection(c) | Domain::Subsets { collection: c, .. }) = domain;
                stack.push((c.as_ref(), below));
                stack.push((body.as_ref(), below));
            }
        }
    }
    tallest
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<Token> {
        self.peek().map(|t| t.token)
    }

    fn peek_token_at(&self, offset: usize) -> Option<Token> {
        self.tokens.get(self.pos + offset).map(|t| t.token)
    }

    fn next(&mut self) -> Option<SpannedToken> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn consume(&mut self, token: Token) -> bool {
        if self.peek_token() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<SpannedToken, CompilationError> {
        match self.next() {
            Some(tok) if tok.token == token => Ok(tok),
            Some(tok) => Err(self.error_at(&tok, format!("expected {what}, found '{}'", tok.lexeme))),
            None => Err(self.error_at_end(format!("expected {what}"))),
        }
    }

    fn error_at(&self, tok: &SpannedToken, message: String) -> CompilationError {
        let message = if tok.token == Token::Error {
            format!("unrecognised input '{}'", tok.lexeme)
        } else {
            message
        };
        CompilationError::Syntax {
            message,
            position: tok.start,
            fragment: self.source.to_string(),
        }
    }

    fn error_at_end(&self, message: String) -> CompilationError {
        CompilationError::Syntax {
            message: format!("{message}, found end of input"),
            position: self.source.len(),
            fragment: self.source.to_string(),
        }
    }

    /// Run `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, CompilationError>,
    ) -> Result<T, CompilationError> {
        if self.depth >= MAX_NESTING {
            let position = self.peek().map_or(self.source.len(), |t| t.start);
            return Err(CompilationError::Syntax {
                message: format!("expression nests more than {MAX_NESTING} levels deep"),
                position,
                fragment: self.source.to_string(),
            });
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        let span = (lhs.span.0, rhs.span.1);
        Expr {
            kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
            span,
        }
    }

    fn parse_implication(&mut self) -> Result<Expr, CompilationError> {
        let mut lhs = self.parse_or()?;
        while self.consume(Token::Implies) {
            let rhs = self.parse_or()?;
            lhs = Self::binary(BinOp::Implies, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, CompilationError> {
        let mut lhs = self.parse_and()?;
        while self.consume(Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Self::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CompilationError> {
        let mut lhs = self.parse_not()?;
        while self.consume(Token::And) {
            let rhs = self.parse_not()?;
            lhs = Self::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, CompilationError> {
        if let Some(tok) = self.peek().filter(|t| t.token == Token::Not).cloned() {
            self.pos += 1;
            let operand = self.nested(Self::parse_not)?;
            let span = (tok.start, operand.span.1);
            return Ok(Expr {
                kind: ExprKind::Not(Box::new(operand)),
                span,
            });
        }
        self.parse_relation()
    }

    fn parse_relation(&mut self) -> Result<Expr, CompilationError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Equal) => BinOp::Eq,
                Some(Token::NotEqual) => BinOp::Ne,
                Some(Token::Less) => BinOp::Lt,
                Some(Token::LessEqual) => BinOp::Le,
                Some(Token::Greater) => BinOp::Gt,
                Some(Token::GreaterEqual) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, CompilationError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, CompilationError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompilationError> {
        if let Some(tok) = self.peek().filter(|t| t.token == Token::Minus).cloned() {
            self.pos += 1;
            let operand = self.nested(Self::parse_unary)?;
            let span = (tok.start, operand.span.1);
            return Ok(Expr {
                kind: ExprKind::Neg(Box::new(operand)),
                span,
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, CompilationError> {
        let base = self.parse_primary()?;
        if self.consume(Token::Caret) {
            let exponent = self.nested(Self::parse_unary)?;
            let span = (base.span.0, exponent.span.1);
            return Ok(Expr {
                kind: ExprKind::Pow(Box::new(base), Box::new(exponent)),
                span,
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompilationError> {
        let tok = match self.next() {
            Some(tok) => tok,
            None => return Err(self.error_at_end("expected an expression".into())),
        };
        let span = (tok.start, tok.end);
        match tok.token {
            Token::Integer => {
                let value = tok.lexeme.parse::<i64>().map_err(|_| {
                    self.error_at(&tok, format!("integer literal '{}' is out of range", tok.lexeme))
                })?;
                Ok(Expr {
                    kind: ExprKind::Int(value),
                    span,
                })
            }
            Token::Real => {
                let value = tok
                    .lexeme
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        self.error_at(&tok, format!("invalid number '{}'", tok.lexeme))
                    })?;
                Ok(Expr {
                    kind: ExprKind::Real(value),
                    span,
                })
            }
            Token::True => Ok(Expr {
                kind: ExprKind::Bool(true),
                span,
            }),
            Token::False => Ok(Expr {
                kind: ExprKind::Bool(false),
                span,
            }),
            Token::LParen => {
                let inner = self.nested(Self::parse_implication)?;
                let close = self.expect(Token::RParen, "')'")?;
                Ok(Expr {
                    kind: inner.kind,
                    span: (tok.start, close.end),
                })
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.peek_token() != Some(Token::RBracket) {
                    loop {
                        items.push(self.nested(Self::parse_implication)?);
                        if !self.consume(Token::Comma) {
                            break;
                        }
                    }
                }
                let close = self.expect(Token::RBracket, "']'")?;
                Ok(Expr {
                    kind: ExprKind::List(items),
                    span: (tok.start, close.end),
                })
            }
            Token::Forall | Token::Exists => self.parse_quantifier(tok),
            Token::Ident => {
                if self.consume(Token::LParen) {
                    self.parse_call(tok)
                } else {
                    Ok(Expr {
                        kind: ExprKind::Ident(tok.lexeme),
                        span,
                    })
                }
            }
            _ => Err(self.error_at(&tok, format!("unexpected '{}'", tok.lexeme))),
        }
    }

    /// Called with the function name consumed along with its `(`.
    fn parse_call(&mut self, name: SpannedToken) -> Result<Expr, CompilationError> {
        if self.peek_token() == Some(Token::Ident) && self.peek_token_at(1) == Some(Token::In) {
            let binder = self.next().map(|t| t.lexeme).unwrap_or_default();
            self.pos += 1;
            let domain = self.nested(Self::parse_implication)?;
            self.expect(Token::Colon, "':'")?;
            let body = self.nested(Self::parse_implication)?;
            let close = self.expect(Token::RParen, "')'")?;
            return Ok(Expr {
                kind: ExprKind::Comprehension {
                    func: name.lexeme,
                    binder,
                    domain: Box::new(domain),
                    body: Box::new(body),
                },
                span: (name.start, close.end),
            });
        }

        let mut args = Vec::new();
        if self.peek_token() != Some(Token::RParen) {
            loop {
                args.push(self.nested(Self::parse_implication)?);
                if !self.consume(Token::Comma) {
                    break;
                }
            }
        }
        let close = self.expect(Token::RParen, "')'")?;
        Ok(Expr {
            kind: ExprKind::Call(name.lexeme, args),
            span: (name.start, close.end),
        })
    }

    fn parse_quantifier(&mut self, keyword: SpannedToken) -> Result<Expr, CompilationError> {
        let kind = if keyword.token == Token::Forall {
            Quantifier::Forall
        } else {
            Quantifier::Exists
        };
        let binder = self.expect(Token::Ident, "a binder name")?.lexeme;
        self.expect(Token::In, "'in'")?;
        let domain = self.nested(Self::parse_domain)?;
        self.expect(Token::Colon, "':'")?;
        let body = self.nested(Self::parse_implication)?;
        let span = (keyword.start, body.span.1);
        Ok(Expr {
            kind: ExprKind::Quantifier {
                kind,
                binder,
                domain,
                body: Box::new(body),
            },
            span,
        })
    }

    fn parse_domain(&mut self) -> Result<Domain, CompilationError> {
        let is_subsets = self
            .peek()
            .is_some_and(|t| t.token == Token::Ident && t.lexeme == "subsets")
            && self.peek_token_at(1) == Some(Token::LParen);
        if !is_subsets {
            return Ok(Domain::Collection(Box::new(self.parse_additive()?)));
        }
        self.pos += 2;
        let collection = self.parse_additive()?;
        self.expect(Token::Comma, "','")?;
        let min = self.size_literal()?;
        let max = if self.consume(Token::Comma) {
            Some(self.size_literal()?)
        } else {
            None
        };
        self.expect(Token::RParen, "')'")?;
        Ok(Domain::Subsets {
            collection: Box::new(collection),
            min,
            max,
        })
    }

    fn size_literal(&mut self) -> Result<usize, CompilationError> {
        let tok = self.expect(Token::Integer, "a subset size")?;
        tok.lexeme
            .parse::<usize>()
            .map_err(|_| self.error_at(&tok, format!("subset size '{}' is out of range", tok.lexeme)))
    }
}
