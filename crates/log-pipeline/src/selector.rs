// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Label selectors with optional line filters.
//!
//! ```text
//! {app="api", env!="dev", pod=~"api-.*", level!~"debug|trace"} |= "error" != "timeout" |~ "5\\d\\d"
//! ```
//!
//! Every label matcher and every line filter must hold for an entry to match.
//! Label regexes are anchored at both ends; line-filter regexes are not. A
//! label the entry does not carry is compared as the empty string.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::entry::{is_valid_label_name, LabelSet};
use crate::errors::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

#[derive(Clone, Debug)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
    regex: Option<Regex>,
}

impl LabelMatcher {
    pub fn new(name: &str, op: MatchOp, value: &str) -> Result<Self, ConfigError> {
        let regex = match op {
            MatchOp::Regex | MatchOp::NotRegex => Some(compile(&format!("^(?:{value})$"), value)?),
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            name: name.to_string(),
            op,
            value: value.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match (self.op, &self.regex) {
            (MatchOp::Equal, _) => value == self.value,
            (MatchOp::NotEqual, _) => value != self.value,
            (MatchOp::Regex, Some(re)) => re.is_match(value),
            (MatchOp::NotRegex, Some(re)) => !re.is_match(value),
            (MatchOp::Regex | MatchOp::NotRegex, None) => false,
        }
    }
}

#[derive(Clone, Debug)]
pub enum LineFilter {
    Contains(String),
    NotContains(String),
    Regex(Regex),
    NotRegex(Regex),
}

impl LineFilter {
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        match self {
            LineFilter::Contains(s) => line.contains(s.as_str()),
            LineFilter::NotContains(s) => !line.contains(s.as_str()),
            LineFilter::Regex(re) => re.is_match(line),
            LineFilter::NotRegex(re) => !re.is_match(line),
        }
    }
}

fn compile(pattern: &str, original: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern)
        .map_err(|e| ConfigError::SelectorSyntax(format!("invalid regex \"{original}\": {e}")))
}

/// A parsed selector expression.
#[derive(Clone, Debug)]
pub struct Selector {
    source: String,
    matchers: Vec<LabelMatcher>,
    filters: Vec<LineFilter>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Parser::new(input).selector()
    }

    #[must_use]
    pub fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }

    #[must_use]
    pub fn has_line_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    #[must_use]
    pub fn matches_labels(&self, labels: &LabelSet) -> bool {
        self.matchers.iter().all(|m| {
            let value = labels.get(&m.name).map_or("", String::as_str);
            m.matches(value)
        })
    }

    #[must_use]
    pub fn matches(&self, labels: &LabelSet, line: &str) -> bool {
        self.matches_labels(labels) && self.filters.iter().all(|f| f.matches(line))
    }
}

impl FromStr for Selector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, expected: &str) -> ConfigError {
        let found = match self.rest().chars().next() {
            Some(c) => format!("'{c}'"),
            None => "end of input".to_string(),
        };
        ConfigError::SelectorSyntax(format!(
            "expected {expected} at position {}, found {found}",
            self.pos
        ))
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn selector(mut self) -> Result<Selector, ConfigError> {
        if !self.eat("{") {
            return Err(self.error("'{'"));
        }
        let mut matchers = vec![self.matcher()?];
        while self.eat(",") {
            matchers.push(self.matcher()?);
        }
        if !self.eat("}") {
            return Err(self.error("',' or '}'"));
        }

        let mut filters = Vec::new();
        loop {
            self.skip_whitespace();
            if self.rest().is_empty() {
                break;
            }
            filters.push(self.line_filter()?);
        }

        Ok(Selector {
            source: self.input.trim().to_string(),
            matchers,
            filters,
        })
    }

    fn matcher(&mut self) -> Result<LabelMatcher, ConfigError> {
        let name = self.label_name()?;
        // two-character operators first so "=~" is not read as "="
        let op = if self.eat("=~") {
            MatchOp::Regex
        } else if self.eat("!~") {
            MatchOp::NotRegex
        } else if self.eat("!=") {
            MatchOp::NotEqual
        } else if self.eat("=") {
            MatchOp::Equal
        } else {
            return Err(self.error("one of '=', '!=', '=~', '!~'"));
        };
        let value = self.string()?;
        LabelMatcher::new(name, op, &value)
    }

    fn label_name(&mut self) -> Result<&'a str, ConfigError> {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let name = &rest[..len];
        if !is_valid_label_name(name) {
            return Err(self.error("label name"));
        }
        self.pos += len;
        Ok(name)
    }

    fn line_filter(&mut self) -> Result<LineFilter, ConfigError> {
        if self.eat("|=") {
            Ok(LineFilter::Contains(self.string()?))
        } else if self.eat("!=") {
            Ok(LineFilter::NotContains(self.string()?))
        } else if self.eat("|~") {
            let re = self.string()?;
            Ok(LineFilter::Regex(compile(&re, &re)?))
        } else if self.eat("!~") {
            let re = self.string()?;
            Ok(LineFilter::NotRegex(compile(&re, &re)?))
        } else {
            Err(self.error("a line filter ('|=', '!=', '|~', '!~')"))
        }
    }

    fn string(&mut self) -> Result<String, ConfigError> {
        self.skip_whitespace();
        let mut chars = self.rest().char_indices();
        match chars.next() {
            Some((_, '`')) => {
                for (i, c) in chars {
                    if c == '`' {
                        let value = self.rest()[1..i].to_string();
                        self.pos += i + 1;
                        return Ok(value);
                    }
                }
                Err(ConfigError::SelectorSyntax("unterminated raw string".to_string()))
            }
            Some((_, '"')) => {
                let mut value = String::new();
                while let Some((i, c)) = chars.next() {
                    match c {
                        '"' => {
                            self.pos += i + 1;
                            return Ok(value);
                        }
                        '\\' => match chars.next() {
                            Some((_, '"')) => value.push('"'),
                            Some((_, '\\')) => value.push('\\'),
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, other)) => {
                                return Err(ConfigError::SelectorSyntax(format!(
                                    "invalid escape sequence '\\{other}'"
                                )))
                            }
                            None => break,
                        },
                        c => value.push(c),
                    }
                }
                Err(ConfigError::SelectorSyntax("unterminated string".to_string()))
            }
            _ => Err(self.error("a quoted string")),
        }
    }
}
