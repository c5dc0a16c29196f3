//! # Capability filter language.
//!
//! A [`Filter`] is a boolean predicate over capability [`Attributes`]: attribute
//! equality and presence, combined with AND / OR / NOT.
//!
//! ## Textual form
//! ```text
//! (kind=Logger)                 equality
//! (kind=*)                      presence
//! (&(kind=Logger)(env=prod))    and
//! (|(kind=Logger)(kind=Sink))   or
//! (!(env=test))                 not
//! (&)                           empty and: matches everything
//! ```
//! Inside a value, `\` escapes the next byte, so `(name=a\)b)` matches the value `a)b`.
//! Attribute names are never escaped: they may not contain `(`, `)` or `=`, may not
//! start with an operator (`&`, `|`, `!`), and carry no surrounding whitespace.
//! [`Display`](std::fmt::Display) renders the canonical form, and [`Filter::parse`]
//! reads it back for every filter that passes [`Filter::validate`].

use std::fmt;

use crate::error::ConfigurationError;

use super::Attributes;

/// Boolean predicate over capability attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Attribute `key` exists and equals `value`.
    Equals { key: String, value: String },
    /// Attribute `key` exists (any value).
    Present { key: String },
    /// Every sub-filter matches (vacuously true when empty).
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Equality filter `(key=value)`.
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Presence filter `(key=*)`.
    pub fn present(key: impl Into<String>) -> Self {
        Filter::Present { key: key.into() }
    }

    /// Conjunction of `filters`.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    /// Disjunction of `filters`.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Negation of `filter`.
    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Filter matching every capability.
    pub fn any() -> Self {
        Filter::And(Vec::new())
    }

    /// Evaluates the filter against a set of attributes.
    pub fn matches(&self, attrs: &Attributes) -> bool {
        match self {
            Filter::Equals { key, value } => attrs.get(key).is_some_and(|v| v == value),
            Filter::Present { key } => attrs.contains_key(key),
            Filter::And(fs) => fs.iter().all(|f| f.matches(attrs)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(attrs)),
            Filter::Not(f) => !f.matches(attrs),
        }
    }

    /// Checks every attribute name in the tree.
    ///
    /// Filters built through the constructors are not checked on creation; this
    /// runs when a module carrying the filter is submitted.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Filter::Equals { key, .. } | Filter::Present { key } => match key_defect(key) {
                Some(reason) => Err(ConfigurationError::InvalidAttributeName {
                    key: key.clone(),
                    reason,
                }),
                None => Ok(()),
            },
            Filter::And(fs) | Filter::Or(fs) => fs.iter().try_for_each(Filter::validate),
            Filter::Not(f) => f.validate(),
        }
    }

    /// Parses the textual filter form.
    ///
    /// # Example
    /// ```
    /// use modvisor::Filter;
    ///
    /// let f = Filter::parse("(&(kind=Logger)(!(env=test)))").unwrap();
    /// assert_eq!(f.to_string(), "(&(kind=Logger)(!(env=test)))");
    /// ```
    pub fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let mut p = Parser {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        };
        p.skip_ws();
        let filter = p.filter()?;
        p.skip_ws();
        if p.pos != p.bytes.len() {
            return Err(p.error("trailing input after filter"));
        }
        Ok(filter)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equals { key, value } => {
                write!(f, "({key}=")?;
                for ch in value.chars() {
                    if matches!(ch, '(' | ')' | '*' | '\\') {
                        write!(f, "\\")?;
                    }
                    write!(f, "{ch}")?;
                }
                write!(f, ")")
            }
            Filter::Present { key } => write!(f, "({key}=*)"),
            Filter::And(fs) => {
                write!(f, "(&")?;
                for sub in fs {
                    write!(f, "{sub}")?;
                }
                write!(f, ")")
            }
            Filter::Or(fs) => {
                write!(f, "(|")?;
                for sub in fs {
                    write!(f, "{sub}")?;
                }
                write!(f, ")")
            }
            Filter::Not(sub) => write!(f, "(!{sub})"),
        }
    }
}

fn key_defect(key: &str) -> Option<&'static str> {
    if key.is_empty() {
        return Some("empty attribute name");
    }
    if key.trim() != key {
        return Some("surrounding whitespace in attribute name");
    }
    if key.starts_with(['&', '|', '!']) {
        return Some("attribute name starts with an operator");
    }
    if key.contains(['(', ')']) {
        return Some("unexpected parenthesis in attribute name");
    }
    if key.contains('=') {
        return Some("'=' in attribute name");
    }
    None
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &'static str) -> ConfigurationError {
        ConfigurationError::InvalidFilter {
            filter: self.text.to_string(),
            position: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8, reason: &'static str) -> Result<(), ConfigurationError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn filter(&mut self) -> Result<Filter, ConfigurationError> {
        self.expect(b'(', "expected '('")?;
        self.skip_ws();
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                self.skip_ws();
                let inner = self.filter()?;
                self.skip_ws();
                Filter::Not(Box::new(inner))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(b')', "expected ')'")?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, ConfigurationError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'(') => out.push(self.filter()?),
                Some(b')') => return Ok(out),
                Some(_) => return Err(self.error("expected '(' or ')' in filter list")),
                None => return Err(self.error("unexpected end of filter list")),
            }
        }
    }

    fn item(&mut self) -> Result<Filter, ConfigurationError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b'=' => break,
                b'(' | b')' => return Err(self.error("unexpected parenthesis in attribute name")),
                _ => self.pos += 1,
            }
        }
        let key = self.text[start..self.pos].trim();
        if let Some(reason) = key_defect(key) {
            return Err(self.error(reason));
        }
        let key = key.to_string();
        self.expect(b'=', "expected '='")?;

        let mut value = Vec::new();
        let mut escaped_any = false;
        loop {
            match self.peek() {
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b) => {
                            value.push(b);
                            escaped_any = true;
                            self.pos += 1;
                        }
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some(b')') => break,
                Some(b'(') => return Err(self.error("unescaped '(' in value")),
                Some(b) => {
                    value.push(b);
                    self.pos += 1;
                }
                None => return Err(self.error("unexpected end of value")),
            }
        }

        if !escaped_any && value == b"*" {
            return Ok(Filter::Present { key });
        }
        let value = String::from_utf8(value).map_err(|_| self.error("value is not valid utf-8"))?;
        Ok(Filter::Equals { key, value })
    }
}
