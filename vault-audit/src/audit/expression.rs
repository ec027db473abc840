//! Boolean filter expressions over audit event attributes
//!
//! The grammar is small:
//!
//! ```text
//! expr      := or
//! or        := and ("or" and)*
//! and       := unary ("and" unary)*
//! unary     := "not" unary | "(" expr ")" | match
//! match     := selector ("==" | "!=") value
//!            | selector ["not"] ("matches" | "contains") value
//!            | selector "is" ["not"] "empty"
//!            | value ["not"] "in" selector
//! ```
//!
//! Values are quoted with `"` or backticks, or written as bare words.
//! Selectors must name one of the known [`Field`]s; anything else is rejected
//! when the expression is parsed.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

/// Attribute names available to filter expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Request operation
    Operation,
    /// Type of the mount handling the request
    MountType,
    /// Mount point handling the request
    MountPoint,
    /// Namespace path
    Namespace,
    /// Request path
    Path,
}

impl Field {
    /// Every field in declaration order
    pub const ALL: [Field; 5] = [
        Field::Operation,
        Field::MountType,
        Field::MountPoint,
        Field::Namespace,
        Field::Path,
    ];

    /// Name used in expressions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operation => "operation",
            Self::MountType => "mount_type",
            Self::MountPoint => "mount_point",
            Self::Namespace => "namespace",
            Self::Path => "path",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ParseError(format!("selector {s:?} is not valid")))
    }
}

/// Attribute values an expression is evaluated against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub operation: String,
    pub mount_type: String,
    pub mount_point: String,
    pub namespace: String,
    pub path: String,
}

impl Attributes {
    fn get(&self, field: Field) -> &str {
        match field {
            Field::Operation => &self.operation,
            Field::MountType => &self.mount_type,
            Field::MountPoint => &self.mount_point,
            Field::Namespace => &self.namespace,
            Field::Path => &self.path,
        }
    }
}

/// Error produced while parsing an expression
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(String);

/// A compiled filter expression
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parse an expression
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ParseError("expression is empty".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(ParseError(format!("unexpected token {tok}")));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Evaluate against a set of attributes
    pub fn evaluate(&self, attrs: &Attributes) -> bool {
        self.root.evaluate(attrs)
    }

    /// The original expression text
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Match(Field, MatchOp),
}

#[derive(Debug, Clone)]
enum MatchOp {
    Equal(String),
    NotEqual(String),
    Matches(Regex),
    NotMatches(Regex),
    Contains(String),
    NotContains(String),
    IsEmpty,
    IsNotEmpty,
}

impl Expr {
    fn evaluate(&self, attrs: &Attributes) -> bool {
        match self {
            Self::And(l, r) => l.evaluate(attrs) && r.evaluate(attrs),
            Self::Or(l, r) => l.evaluate(attrs) || r.evaluate(attrs),
            Self::Not(e) => !e.evaluate(attrs),
            Self::Match(field, op) => {
                let actual = attrs.get(*field);
                match op {
                    MatchOp::Equal(v) => actual == v,
                    MatchOp::NotEqual(v) => actual != v,
                    MatchOp::Matches(re) => re.is_match(actual),
                    MatchOp::NotMatches(re) => !re.is_match(actual),
                    MatchOp::Contains(v) => actual.contains(v.as_str()),
                    MatchOp::NotContains(v) => !actual.contains(v.as_str()),
                    MatchOp::IsEmpty => actual.is_empty(),
                    MatchOp::IsNotEmpty => !actual.is_empty(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Eq,
    Ne,
    Quoted(String),
    Word(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => f.write_str("\"(\""),
            Self::RParen => f.write_str("\")\""),
            Self::Eq => f.write_str("\"==\""),
            Self::Ne => f.write_str("\"!=\""),
            Self::Quoted(s) => write!(f, "{s:?}"),
            Self::Word(w) => write!(f, "{w:?}"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' | '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(ParseError(format!("expected \"=\" after {c:?}")));
                }
                tokens.push(if c == '=' { Token::Eq } else { Token::Ne });
            }
            '"' | '`' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    if ch == '\\' && quote == '"' {
                        match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => break,
                        }
                        continue;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(ParseError("unterminated string".to_string()));
                }
                tokens.push(Token::Quoted(value));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | '`' | '=' | '!') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
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

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn is_word(&self, offset: usize, word: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Word(w)) if w == word)
    }

    fn expect_word(&mut self, word: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(Token::Word(ref w)) if w == word => Ok(()),
            Some(tok) => Err(ParseError(format!("expected {word:?}, found {tok}"))),
            None => Err(ParseError(format!("expected {word:?}, found end of expression"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.is_word(0, "or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while self.is_word(0, "and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.is_word(0, "not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                Some(tok) => return Err(ParseError(format!("expected \")\", found {tok}"))),
                None => return Err(ParseError("unbalanced parentheses".to_string())),
            }
        }
        self.parse_match()
    }

    fn parse_match(&mut self) -> Result<Expr, ParseError> {
        let value_first = match self.peek() {
            Some(Token::Quoted(_)) => true,
            Some(Token::Word(_)) => {
                self.is_word(1, "in") || (self.is_word(1, "not") && self.is_word(2, "in"))
            }
            Some(tok) => return Err(ParseError(format!("unexpected token {tok}"))),
            None => return Err(ParseError("unexpected end of expression".to_string())),
        };

        if value_first {
            let value = self.parse_value()?;
            let negated = self.is_word(0, "not");
            if negated {
                self.pos += 1;
            }
            self.expect_word("in")?;
            let field = self.parse_selector()?;
            let op = if negated {
                MatchOp::NotContains(value)
            } else {
                MatchOp::Contains(value)
            };
            return Ok(Expr::Match(field, op));
        }

        let field = self.parse_selector()?;
        let op = match self.next() {
            Some(Token::Eq) => MatchOp::Equal(self.parse_value()?),
            Some(Token::Ne) => MatchOp::NotEqual(self.parse_value()?),
            Some(Token::Word(w)) => match w.as_str() {
                "matches" => MatchOp::Matches(self.parse_regex()?),
                "contains" => MatchOp::Contains(self.parse_value()?),
                "not" => match self.next() {
                    Some(Token::Word(ref w)) if w == "matches" => {
                        MatchOp::NotMatches(self.parse_regex()?)
                    }
                    Some(Token::Word(ref w)) if w == "contains" => {
                        MatchOp::NotContains(self.parse_value()?)
                    }
                    _ => {
                        return Err(ParseError(
                            "expected \"matches\" or \"contains\" after \"not\"".to_string(),
                        ))
                    }
                },
                "is" => {
                    let negated = self.is_word(0, "not");
                    if negated {
                        self.pos += 1;
                    }
                    self.expect_word("empty")?;
                    if negated {
                        MatchOp::IsNotEmpty
                    } else {
                        MatchOp::IsEmpty
                    }
                }
                other => return Err(ParseError(format!("unknown operator {other:?}"))),
            },
            Some(tok) => return Err(ParseError(format!("unexpected token {tok}"))),
            None => {
                return Err(ParseError(format!(
                    "missing operator after selector {field:?}",
                    field = field.as_str()
                )))
            }
        };
        Ok(Expr::Match(field, op))
    }

    fn parse_selector(&mut self) -> Result<Field, ParseError> {
        match self.next() {
            Some(Token::Word(w)) => w.parse(),
            Some(tok) => Err(ParseError(format!("expected selector, found {tok}"))),
            None => Err(ParseError("expected selector, found end of expression".to_string())),
        }
    }

    fn parse_value(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Token::Quoted(v)) | Some(Token::Word(v)) => Ok(v),
            Some(tok) => Err(ParseError(format!("expected value, found {tok}"))),
            None => Err(ParseError("expected value, found end of expression".to_string())),
        }
    }

    fn parse_regex(&mut self) -> Result<Regex, ParseError> {
        let pattern = self.parse_value()?;
        Regex::new(&pattern).map_err(|e| ParseError(format!("invalid regular expression: {e}")))
    }
}
