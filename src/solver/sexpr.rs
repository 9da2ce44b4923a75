// S-expression reader for SMT-LIB2 engine responses

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

impl SExpr {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExpr::Atom(atom) => Some(atom),
            SExpr::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(items) => Some(items),
            SExpr::Atom(_) => None,
        }
    }

    /// Numeric value of a model value term: numerals, decimals, booleans,
    /// `(- x)` and `(/ a b)`.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            SExpr::Atom(atom) => match atom.as_str() {
                "true" => Some(1.0),
                "false" => Some(0.0),
                other => other.parse().ok(),
            },
            SExpr::List(items) => match items.as_slice() {
                [SExpr::Atom(op), x] if op == "-" => x.numeric().map(|v| -v),
                [SExpr::Atom(op), a, b] if op == "-" => Some(a.numeric()? - b.numeric()?),
                [SExpr::Atom(op), a, b] if op == "/" => Some(a.numeric()? / b.numeric()?),
                _ => None,
            },
        }
    }

    /// Whether any atom in the tree equals `needle`.
    pub fn contains_atom(&self, needle: &str) -> bool {
        match self {
            SExpr::Atom(atom) => atom == needle,
            SExpr::List(items) => items.iter().any(|item| item.contains_atom(needle)),
        }
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::Atom(atom) => write!(f, "{atom}"),
            SExpr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Parenthesis depth after reading `text`; strings and `|quoted|` symbols are skipped.
pub fn depth(text: &str) -> i64 {
    let mut depth = 0;
    let mut in_string = false;
    let mut in_symbol = false;
    for c in text.chars() {
        match c {
            '"' if !in_symbol => in_string = !in_string,
            '|' if !in_string => in_symbol = !in_symbol,
            '(' if !in_string && !in_symbol => depth += 1,
            ')' if !in_string && !in_symbol => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Parse a single s-expression.
pub fn parse(text: &str) -> Result<SExpr, String> {
    let tokens = tokenize(text);
    let mut pos = 0;
    let expr = parse_at(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("trailing input after s-expression: '{}'", text.trim()));
    }
    Ok(expr)
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            '"' | '|' => {
                current.push(c);
                for next in chars.by_ref() {
                    current.push(next);
                    if next == c {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_at(tokens: &[String], pos: &mut usize) -> Result<SExpr, String> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| "unexpected end of s-expression".to_string())?;
    *pos += 1;
    match token.as_str() {
        "(" => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos).map(String::as_str) {
                    Some(")") => {
                        *pos += 1;
                        return Ok(SExpr::List(items));
                    }
                    Some(_) => items.push(parse_at(tokens, pos)?),
                    None => return Err("unbalanced parentheses".into()),
                }
            }
        }
        ")" => Err("unexpected ')'".into()),
        atom => Ok(SExpr::Atom(atom.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_value_response() {
        let expr = parse("((v0 6)\n (v1 (- 4))\n (v2 (/ 1.0 4.0))\n (v3 true))").unwrap();
        let pairs = expr.as_list().unwrap();
        let values: Vec<f64> = pairs
            .iter()
            .map(|pair| pair.as_list().unwrap()[1].numeric().unwrap())
            .collect();
        assert_eq!(values, vec![6.0, -4.0, 0.25, 1.0]);
    }

    #[test]
    fn test_display_round_trips() {
        let text = "(/ (- 3.0) 2.0)";
        assert_eq!(parse(text).unwrap().to_string(), text);
    }

    #[test]
    fn test_depth_ignores_quoted_parens() {
        assert_eq!(depth("(error \"line 1 (col 2\")"), 0);
        assert_eq!(depth("((v0 1)"), 1);
        assert_eq!(depth("(|a(b| 2)"), 0);
    }

    #[test]
    fn test_unbalanced_is_error() {
        assert!(parse("((v0 1)").is_err());
        assert!(parse("(a) b").is_err());
    }

    #[test]
    fn test_non_numeric_value() {
        let expr = parse("(root-obj (+ (^ x 2) (- 2)) 1)").unwrap();
        assert_eq!(expr.numeric(), None);
        assert!(expr.contains_atom("root-obj"));
    }
}
