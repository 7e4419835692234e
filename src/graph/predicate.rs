//! Bounded expression sublanguage for conditional edges and router rules.
//!
//! Predicates are short declarative expressions evaluated against the memory
//! plane. The grammar is deliberately closed — comparisons, null checks and
//! boolean combinators over named keys — so a graph document can never smuggle
//! arbitrary code into the runtime.
//!
//! Grammar:
//!
//! ```text
//! expr       := or
//! or         := and ( ("or" | "||") and )*
//! and        := unary ( ("and" | "&&") unary )*
//! unary      := ("not" | "!") unary | primary
//! primary    := "(" expr ")" | operand ( cmp operand )?
//! operand    := identifier | literal
//! literal    := number | string | "true" | "false" | "null"
//! cmp        := "==" | "!=" | "<" | "<=" | ">" | ">="
//! ```
//!
//! A bare identifier evaluates to the truthiness of its memory value: absent,
//! `null`, `false`, `0` and `""` are falsy, everything else is truthy.
//!
//! # Examples
//!
//! ```
//! use goalgraph::graph::predicate::Predicate;
//! use rustc_hash::FxHashMap;
//! use serde_json::json;
//!
//! let p = Predicate::parse("feedback != null and score >= 0.5").unwrap();
//! let mut memory = FxHashMap::default();
//! memory.insert("feedback".to_string(), json!("needs work"));
//! memory.insert("score".to_string(), json!(0.7));
//! assert!(p.evaluate(&memory));
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PredicateError {
    #[error("empty predicate expression")]
    #[diagnostic(code(goalgraph::predicate::empty))]
    Empty,

    #[error("unexpected character {found:?} at byte {at}")]
    #[diagnostic(code(goalgraph::predicate::lex))]
    UnexpectedChar { found: char, at: usize },

    #[error("unterminated string literal starting at byte {at}")]
    #[diagnostic(code(goalgraph::predicate::unterminated_string))]
    UnterminatedString { at: usize },

    #[error("unexpected token {found} (expected {expected})")]
    #[diagnostic(code(goalgraph::predicate::parse))]
    UnexpectedToken { found: String, expected: String },

    #[error("trailing input after expression: {found}")]
    #[diagnostic(code(goalgraph::predicate::trailing))]
    Trailing { found: String },
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "identifier `{s}`"),
            Token::Number(n) => write!(f, "number {n}"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::True => write!(f, "`true`"),
            Token::False => write!(f, "`false`"),
            Token::Null => write!(f, "`null`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::Eq => write!(f, "`==`"),
            Token::Ne => write!(f, "`!=`"),
            Token::Lt => write!(f, "`<`"),
            Token::Le => write!(f, "`<=`"),
            Token::Gt => write!(f, "`>`"),
            Token::Ge => write!(f, "`>=`"),
            Token::And => write!(f, "`and`"),
            Token::Or => write!(f, "`or`"),
            Token::Not => write!(f, "`not`"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Key(String),
    Literal(Value),
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CmpOp, Operand),
    Truthy(Operand),
}

/// A parsed, reusable predicate expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    /// Parses an expression, rejecting anything outside the closed grammar.
    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let tokens = lex(source)?;
        if tokens.is_empty() {
            return Err(PredicateError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(PredicateError::Trailing {
                found: parser.tokens[parser.pos].to_string(),
            });
        }
        Ok(Predicate {
            source: source.to_string(),
            expr,
        })
    }

    /// The original expression text, preserved for documents and traces.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against a memory view. Absent keys behave as `null`.
    #[must_use]
    pub fn evaluate(&self, memory: &FxHashMap<String, Value>) -> bool {
        eval(&self.expr, memory)
    }

    /// Memory key names the expression references, deduplicated.
    #[must_use]
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_names(&self.expr, &mut names);
        names
    }
}

fn collect_names(expr: &Expr, out: &mut Vec<String>) {
    let mut push = |op: &Operand| {
        if let Operand::Key(k) = op {
            if !out.contains(k) {
                out.push(k.clone());
            }
        }
    };
    match expr {
        Expr::Or(a, b) | Expr::And(a, b) => {
            collect_names(a, out);
            collect_names(b, out);
        }
        Expr::Not(inner) => collect_names(inner, out),
        Expr::Compare(l, _, r) => {
            push(l);
            push(r);
        }
        Expr::Truthy(op) => push(op),
    }
}

fn lex(source: &str) -> Result<Vec<Token>, PredicateError> {
    let mut tokens = Vec::new();
    let bytes: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut s = String::new();
                loop {
                    match bytes.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(PredicateError::UnterminatedString { at: start }),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit()
                || (c == '-' && bytes.get(i + 1).is_some_and(|d| d.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while bytes
                    .get(i)
                    .is_some_and(|d| d.is_ascii_digit() || *d == '.')
                {
                    i += 1;
                }
                let text: String = bytes[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| PredicateError::UnexpectedChar { found: c, at: start })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while bytes
                    .get(i)
                    .is_some_and(|d| d.is_alphanumeric() || *d == '_' || *d == '.')
                {
                    i += 1;
                }
                let word: String = bytes[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(PredicateError::UnexpectedChar { found: other, at: i }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.bump();
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, PredicateError> {
        let mut left = self.unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.bump();
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, PredicateError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.bump();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, PredicateError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.bump();
            let inner = self.expr()?;
            match self.bump() {
                Some(Token::RParen) => return Ok(inner),
                Some(other) => {
                    return Err(PredicateError::UnexpectedToken {
                        found: other.to_string(),
                        expected: "`)`".to_string(),
                    })
                }
                None => {
                    return Err(PredicateError::UnexpectedToken {
                        found: "end of input".to_string(),
                        expected: "`)`".to_string(),
                    })
                }
            }
        }

        let left = self.operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.bump();
                let right = self.operand()?;
                Ok(Expr::Compare(left, op, right))
            }
            None => Ok(Expr::Truthy(left)),
        }
    }

    fn operand(&mut self) -> Result<Operand, PredicateError> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(Operand::Key(name)),
            Some(Token::Number(n)) => Ok(Operand::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::True) => Ok(Operand::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Operand::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Operand::Literal(Value::Null)),
            Some(other) => Err(PredicateError::UnexpectedToken {
                found: other.to_string(),
                expected: "identifier or literal".to_string(),
            }),
            None => Err(PredicateError::UnexpectedToken {
                found: "end of input".to_string(),
                expected: "identifier or literal".to_string(),
            }),
        }
    }
}

fn eval(expr: &Expr, memory: &FxHashMap<String, Value>) -> bool {
    match expr {
        Expr::Or(a, b) => eval(a, memory) || eval(b, memory),
        Expr::And(a, b) => eval(a, memory) && eval(b, memory),
        Expr::Not(inner) => !eval(inner, memory),
        Expr::Truthy(op) => truthy(&resolve(op, memory)),
        Expr::Compare(l, op, r) => {
            let lv = resolve(l, memory);
            let rv = resolve(r, memory);
            compare(&lv, *op, &rv)
        }
    }
}

fn resolve(op: &Operand, memory: &FxHashMap<String, Value>) -> Value {
    match op {
        Operand::Key(k) => memory.get(k).cloned().unwrap_or(Value::Null),
        Operand::Literal(v) => v.clone(),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::Ne => !values_equal(left, right),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => match partial_order(left, right) {
            Some(ord) => match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
                _ => unreachable!(),
            },
            // Ordering across incompatible types never holds.
            None => false,
        },
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn partial_order(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory(pairs: &[(&str, Value)]) -> FxHashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn null_check_on_absent_key() {
        let p = Predicate::parse("feedback != null").unwrap();
        assert!(!p.evaluate(&memory(&[])));
        assert!(p.evaluate(&memory(&[("feedback", json!("fix tone"))])));
        assert!(!p.evaluate(&memory(&[("feedback", json!(null))])));
    }

    #[test]
    fn bare_identifier_truthiness() {
        let p = Predicate::parse("done").unwrap();
        assert!(!p.evaluate(&memory(&[])));
        assert!(!p.evaluate(&memory(&[("done", json!(false))])));
        assert!(!p.evaluate(&memory(&[("done", json!(""))])));
        assert!(p.evaluate(&memory(&[("done", json!(true))])));
        assert!(p.evaluate(&memory(&[("done", json!("yes"))])));
    }

    #[test]
    fn not_combinator() {
        let p = Predicate::parse("not done").unwrap();
        assert!(p.evaluate(&memory(&[])));
        assert!(!p.evaluate(&memory(&[("done", json!(true))])));
    }

    #[test]
    fn numeric_comparisons() {
        let p = Predicate::parse("score >= 0.5").unwrap();
        assert!(p.evaluate(&memory(&[("score", json!(0.5))])));
        assert!(p.evaluate(&memory(&[("score", json!(7))])));
        assert!(!p.evaluate(&memory(&[("score", json!(0.2))])));
        // Absent key resolves to null; ordering never holds.
        assert!(!p.evaluate(&memory(&[])));
    }

    #[test]
    fn string_equality_and_ordering() {
        let p = Predicate::parse("verdict == 'approved'").unwrap();
        assert!(p.evaluate(&memory(&[("verdict", json!("approved"))])));
        assert!(!p.evaluate(&memory(&[("verdict", json!("rejected"))])));

        let q = Predicate::parse("name < \"m\"").unwrap();
        assert!(q.evaluate(&memory(&[("name", json!("alpha"))])));
    }

    #[test]
    fn boolean_combinators_and_parens() {
        let p = Predicate::parse("(done or feedback != null) and not failed").unwrap();
        assert!(p.evaluate(&memory(&[("feedback", json!("x"))])));
        assert!(!p.evaluate(&memory(&[("feedback", json!("x")), ("failed", json!(true))])));
        assert!(!p.evaluate(&memory(&[])));
    }

    #[test]
    fn symbolic_operators() {
        let p = Predicate::parse("a && !b || c == 1").unwrap();
        assert!(p.evaluate(&memory(&[("a", json!(true))])));
        assert!(p.evaluate(&memory(&[("c", json!(1))])));
        assert!(!p.evaluate(&memory(&[("a", json!(true)), ("b", json!(true))])));
    }

    #[test]
    fn integer_and_float_equality() {
        let p = Predicate::parse("n == 1").unwrap();
        assert!(p.evaluate(&memory(&[("n", json!(1))])));
        assert!(p.evaluate(&memory(&[("n", json!(1.0))])));
    }

    #[test]
    fn referenced_names_collects_keys_only() {
        let p = Predicate::parse("a != null and b > 2 or not c").unwrap();
        assert_eq!(p.referenced_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(Predicate::parse(""), Err(PredicateError::Empty)));
        assert!(matches!(
            Predicate::parse("a ?? b"),
            Err(PredicateError::UnexpectedChar { .. })
        ));
        assert!(matches!(
            Predicate::parse("a == "),
            Err(PredicateError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Predicate::parse("(a"),
            Err(PredicateError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Predicate::parse("a b"),
            Err(PredicateError::Trailing { .. })
        ));
        assert!(matches!(
            Predicate::parse("'open"),
            Err(PredicateError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn source_is_preserved() {
        let text = "feedback != null";
        assert_eq!(Predicate::parse(text).unwrap().source(), text);
    }
}
