//! Session filters select sessions by their properties.
//!
//! ```text
//! filter  := or
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | "(" filter ")" | "all" | key op value
//! op      := "is" | "eq" | "==" | "ne" | "!="
//! value   := '...' | "..."
//! ```
//!
//! Keywords are case-insensitive. `$SessionId` and `$Principal` name the
//! properties every session derives.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strata_topics::SessionError;

pub const SESSION_ID_PROPERTY: &str = "$SessionId";
pub const PRINCIPAL_PROPERTY: &str = "$Principal";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Expr {
    All,
    Compare { key: String, equal: bool, value: String },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    fn matches(&self, properties: &BTreeMap<String, String>) -> bool {
        match self {
            Expr::All => true,
            Expr::Compare { key, equal, value } => {
                let actual = properties.get(key).map(String::as_str);
                (actual == Some(value.as_str())) == *equal
            }
            Expr::And(left, right) => left.matches(properties) && right.matches(properties),
            Expr::Or(left, right) => left.matches(properties) || right.matches(properties),
            Expr::Not(inner) => !inner.matches(properties),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Equal,
    NotEqual,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, SessionError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((position, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '\'' | '"' => {
                let mut value = String::new();
                let mut terminated = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        quote if quote == c => {
                            terminated = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !terminated {
                    return Err(SessionError::MisquotedInput { input: input.to_owned(), position });
                }
                tokens.push(Token::Quoted(value));
            }
            '=' | '!' => match chars.next() {
                Some((_, '=')) => tokens.push(if c == '=' { Token::Equal } else { Token::NotEqual }),
                _ => return Err(syntax(format!("expected '=' after '{c}' at offset {position}"))),
            },
            c if is_word_char(c) => {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if !is_word_char(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(syntax(format!("unexpected '{other}' at offset {position}"))),
        }
    }
    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '$' | '_' | '.' | '-' | ':')
}

fn syntax(message: String) -> SessionError {
    SessionError::invalid_argument("filter", message)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn or(&mut self) -> Result<Expr, SessionError> {
        let mut expr = self.and()?;
        while self.keyword("or") {
            self.position += 1;
            expr = Expr::Or(Box::new(expr), Box::new(self.and()?));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, SessionError> {
        let mut expr = self.unary()?;
        while self.keyword("and") {
            self.position += 1;
            expr = Expr::And(Box::new(expr), Box::new(self.unary()?));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, SessionError> {
        if self.keyword("not") {
            self.position += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.keyword("all") {
            self.position += 1;
            return Ok(Expr::All);
        }
        match self.next() {
            Some(Token::Open) => {
                let expr = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(expr),
                    _ => Err(syntax("missing ')'".into())),
                }
            }
            Some(Token::Word(key)) => {
                let equal = match self.next() {
                    Some(Token::Equal) => true,
                    Some(Token::NotEqual) => false,
                    Some(Token::Word(op)) if op.eq_ignore_ascii_case("is") || op.eq_ignore_ascii_case("eq") => true,
                    Some(Token::Word(op)) if op.eq_ignore_ascii_case("ne") => false,
                    _ => return Err(syntax(format!("expected an operator after {key}"))),
                };
                match self.next() {
                    Some(Token::Quoted(value)) => Ok(Expr::Compare { key, equal, value }),
                    _ => Err(syntax(format!("expected a quoted value for {key}"))),
                }
            }
            Some(other) => Err(syntax(format!("unexpected {other:?}"))),
            None => Err(syntax("unexpected end of filter".into())),
        }
    }
}

/// A parsed session filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionFilter {
    expression: String,
    root: Expr,
}

impl SessionFilter {
    pub fn parse(expression: &str) -> Result<Self, SessionError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(syntax("empty filter".into()));
        }
        let mut parser = Parser { tokens, position: 0 };
        let root = parser.or()?;
        if let Some(extra) = parser.peek() {
            return Err(syntax(format!("unexpected {extra:?} after filter")));
        }
        Ok(Self { expression: expression.to_owned(), root })
    }

    /// Matches every session.
    pub fn all() -> Self {
        Self { expression: "all".into(), root: Expr::All }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, properties: &BTreeMap<String, String>) -> bool {
        self.root.matches(properties)
    }
}

impl fmt::Display for SessionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for SessionFilter {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn compares_and_combines() {
        let session = properties(&[("$Principal", "alice"), ("region", "eu"), ("tier", "gold")]);
        let cases = [
            ("$Principal is 'alice'", true),
            ("$Principal ne 'alice'", false),
            ("region == \"eu\" and tier != 'silver'", true),
            ("region eq 'us' or tier is 'gold'", true),
            ("NOT (region is 'eu')", false),
            ("missing ne 'x'", true),
            ("missing is 'x'", false),
            ("all", true),
            ("not all or region is 'eu' and tier is 'silver'", false),
        ];
        for (expression, expected) in cases {
            let filter = SessionFilter::parse(expression).expect("filter");
            assert_eq!(filter.matches(&session), expected, "{expression}");
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let filter = SessionFilter::parse("a is '1' or b is '1' and c is '1'").expect("filter");
        assert!(filter.matches(&properties(&[("a", "1")])));
        assert!(!filter.matches(&properties(&[("b", "1")])));
    }

    #[test]
    fn quotes_may_escape() {
        let filter = SessionFilter::parse(r"name is 'o\'brien'").expect("filter");
        assert!(filter.matches(&properties(&[("name", "o'brien")])));
    }

    #[test]
    fn misquoted_input_reports_the_opening_quote() {
        let error = SessionFilter::parse("region is 'eu").expect_err("misquoted");
        assert_eq!(error, SessionError::MisquotedInput { input: "region is 'eu".into(), position: 10 });
        assert!(matches!(SessionFilter::parse("a is \"x'"), Err(SessionError::MisquotedInput { .. })));
    }

    #[test]
    fn rejects_malformed_filters() {
        for expression in ["", "region", "region is eu", "(a is 'b'", "a is 'b' c", "a = 'b'"] {
            assert!(
                matches!(SessionFilter::parse(expression), Err(SessionError::InvalidArgument { .. })),
                "{expression}"
            );
        }
    }
}
