//! Guard expressions over event payloads.
//!
//! A guard narrows an event-matched transition further by inspecting the
//! event's JSON payload. The expression language:
//!
//! - `event.field` - payload field is truthy
//! - `event.a.b` - nested field access
//! - `event.field == value` / `!=` - equality with strings, numbers, booleans, null
//! - `event.field > 3` / `>=` / `<` / `<=` - numeric comparison
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)`
//!
//! `&&` binds tighter than `||`. A guard never has side effects, so it is safe
//! to evaluate while the machine is still selecting transitions.

use crate::error::CoreError;
use serde_json::Value;

/// Comparison operator in a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn is_numeric(self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le
        )
    }
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    /// Field is truthy.
    Truthy(Vec<String>),
    /// Field compared against a literal.
    Compare {
        field: Vec<String>,
        op: CompareOp,
        value: Value,
    },
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression.
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(invalid("empty guard expression"));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(invalid(format!("unexpected token {}", tok.describe())));
        }
        Ok(expr)
    }

    /// Evaluates the guard against an event payload.
    pub fn evaluate(&self, payload: &Value) -> bool {
        match self {
            GuardExpr::Truthy(path) => is_truthy(lookup(payload, path)),
            GuardExpr::Compare { field, op, value } => {
                let actual = lookup(payload, field);
                match op {
                    CompareOp::Eq => loosely_equal(actual, value),
                    CompareOp::Ne => !loosely_equal(actual, value),
                    CompareOp::Gt => numeric(actual, value, |a, b| a > b),
                    CompareOp::Ge => numeric(actual, value, |a, b| a >= b),
                    CompareOp::Lt => numeric(actual, value, |a, b| a < b),
                    CompareOp::Le => numeric(actual, value, |a, b| a <= b),
                }
            }
            GuardExpr::And(lhs, rhs) => lhs.evaluate(payload) && rhs.evaluate(payload),
            GuardExpr::Or(lhs, rhs) => lhs.evaluate(payload) || rhs.evaluate(payload),
            GuardExpr::Not(inner) => !inner.evaluate(payload),
        }
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidGuard {
        reason: reason.into(),
    }
}

fn lookup<'a>(payload: &'a Value, path: &[String]) -> &'a Value {
    let mut current = payload;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::Array(_), _) | (Value::Object(_), _) => false,
        _ => actual == expected,
    }
}

fn numeric(actual: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(Vec<String>),
    Literal(Value),
    Op(CompareOp),
    Not,
    And,
    Or,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Path(p) => format!("'event.{}'", p.join(".")),
            Token::Literal(v) => format!("literal {}", v),
            Token::Op(op) => format!("operator {:?}", op),
            Token::Not => "'!'".to_string(),
            Token::And => "'&&'".to_string(),
            Token::Or => "'||'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, CoreError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match (c, next) {
            (c, _) if c.is_whitespace() => i += 1,
            ('(', _) => {
                tokens.push(Token::LParen);
                i += 1;
            }
            (')', _) => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ('&', Some('&')) => {
                tokens.push(Token::And);
                i += 2;
            }
            ('|', Some('|')) => {
                tokens.push(Token::Or);
                i += 2;
            }
            ('=', Some('=')) => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            ('!', Some('=')) => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            ('>', Some('=')) => {
                tokens.push(Token::Op(CompareOp::Ge));
                i += 2;
            }
            ('<', Some('=')) => {
                tokens.push(Token::Op(CompareOp::Le));
                i += 2;
            }
            ('>', _) => {
                tokens.push(Token::Op(CompareOp::Gt));
                i += 1;
            }
            ('<', _) => {
                tokens.push(Token::Op(CompareOp::Lt));
                i += 1;
            }
            ('!', _) => {
                tokens.push(Token::Not);
                i += 1;
            }
            ('"', _) => {
                let (text, end) = read_string(&chars, i + 1)?;
                tokens.push(Token::Literal(Value::String(text)));
                i = end;
            }
            (c, _) if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .ok_or_else(|| invalid(format!("invalid number: '{}'", text)))?;
                tokens.push(Token::Literal(Value::Number(number)));
            }
            (c, _) if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(word_token(&word)?);
            }
            (c, _) => return Err(invalid(format!("unexpected character '{}'", c))),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], mut i: usize) -> Result<(String, usize), CoreError> {
    let mut text = String::new();
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((text, i + 1)),
            '\\' if i + 1 < chars.len() => {
                text.push(chars[i + 1]);
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(invalid("unterminated string"))
}

fn word_token(word: &str) -> Result<Token, CoreError> {
    match word {
        "true" => Ok(Token::Literal(Value::Bool(true))),
        "false" => Ok(Token::Literal(Value::Bool(false))),
        "null" => Ok(Token::Literal(Value::Null)),
        _ => {
            let rest = word
                .strip_prefix("event.")
                .ok_or_else(|| invalid(format!("field '{}' must start with 'event.'", word)))?;
            let path: Vec<String> = rest.split('.').map(str::to_string).collect();
            if path.iter().any(|s| s.is_empty()) {
                return Err(invalid(format!("malformed field path '{}'", word)));
            }
            Ok(Token::Path(path))
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or_expr(&mut self) -> Result<GuardExpr, CoreError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = GuardExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<GuardExpr, CoreError> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = GuardExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<GuardExpr, CoreError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(GuardExpr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<GuardExpr, CoreError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(invalid("expected ')'")),
                }
            }
            Some(Token::Path(field)) => self.comparison(field),
            Some(tok) => Err(invalid(format!("unexpected token {}", tok.describe()))),
            None => Err(invalid("unexpected end of expression")),
        }
    }

    fn comparison(&mut self, field: Vec<String>) -> Result<GuardExpr, CoreError> {
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Ok(GuardExpr::Truthy(field)),
        };
        self.pos += 1;

        let value = match self.advance() {
            Some(Token::Literal(v)) => v,
            _ => return Err(invalid("expected a literal after comparison operator")),
        };
        if op.is_numeric() && !value.is_number() {
            return Err(invalid(format!("operator {:?} needs a number", op)));
        }

        Ok(GuardExpr::Compare { field, op, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy_field() {
        let guard = GuardExpr::parse("event.force").unwrap();
        assert!(guard.evaluate(&json!({"force": true})));
        assert!(!guard.evaluate(&json!({"force": false})));
        assert!(!guard.evaluate(&json!({})));
        assert!(!guard.evaluate(&Value::Null));
    }

    #[test]
    fn test_string_and_number_equality() {
        let guard = GuardExpr::parse("event.mode == \"fast\"").unwrap();
        assert!(guard.evaluate(&json!({"mode": "fast"})));
        assert!(!guard.evaluate(&json!({"mode": "slow"})));

        let guard = GuardExpr::parse("event.count != 3").unwrap();
        assert!(guard.evaluate(&json!({"count": 4})));
        assert!(!guard.evaluate(&json!({"count": 3.0})));
    }

    #[test]
    fn test_numeric_comparisons() {
        let guard = GuardExpr::parse("event.speed >= 2.5").unwrap();
        assert!(guard.evaluate(&json!({"speed": 2.5})));
        assert!(!guard.evaluate(&json!({"speed": 1})));
        assert!(!guard.evaluate(&json!({"speed": "fast"})));

        let guard = GuardExpr::parse("event.delta < -1").unwrap();
        assert!(guard.evaluate(&json!({"delta": -2})));
    }

    #[test]
    fn test_precedence_and_grouping() {
        let guard = GuardExpr::parse("event.a || event.b && event.c").unwrap();
        assert!(guard.evaluate(&json!({"a": true})));
        assert!(!guard.evaluate(&json!({"b": true})));

        let guard = GuardExpr::parse("(event.a || event.b) && event.c").unwrap();
        assert!(!guard.evaluate(&json!({"a": true})));
        assert!(guard.evaluate(&json!({"b": true, "c": 1})));
    }

    #[test]
    fn test_negation_and_nested_paths() {
        let guard = GuardExpr::parse("!event.user.blocked").unwrap();
        assert!(guard.evaluate(&json!({"user": {"blocked": false}})));
        assert!(!guard.evaluate(&json!({"user": {"blocked": true}})));

        let guard = GuardExpr::parse("event.items.0 == \"x\"").unwrap();
        assert!(guard.evaluate(&json!({"items": ["x", "y"]})));
    }

    #[test]
    fn test_parse_errors() {
        assert!(GuardExpr::parse("").is_err());
        assert!(GuardExpr::parse("ctx.a").is_err());
        assert!(GuardExpr::parse("event.a >").is_err());
        assert!(GuardExpr::parse("event.a > \"x\"").is_err());
        assert!(GuardExpr::parse("(event.a").is_err());
        assert!(GuardExpr::parse("event.a event.b").is_err());
        assert!(GuardExpr::parse("event.s == \"open").is_err());
    }
}
