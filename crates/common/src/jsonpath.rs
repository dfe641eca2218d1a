//! JSONPath compiler and evaluator for routing conditions.
//!
//! Compiles a path expression from string form (e.g.
//! `$[?(@.message.data.event.type = 'created')]`) into a sequence of steps
//! that are evaluated against parsed JSON documents. Supported syntax:
//!
//! - `$` — document root, `@` — current element (inside filters)
//! - `.key` / `['key']` — object member access (single-quoted strings)
//! - `[n]` — array element by index (negative counts from the end)
//! - `*` / `[*]` — wildcard over object members and array elements
//! - `..key` — recursive descent
//! - `[?(<predicate>)]` — filter; predicates combine comparisons
//!   (`=`/`==`, `!=`, `<`, `<=`, `>`, `>=`), regex matches (`~` against a
//!   `/…/` literal, optional `i` flag), existence tests (a bare sub-path)
//!   and the logical connectives `&` and `|` with parentheses.

use std::fmt;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid JSONPath expression at offset {position}: {message}")]
pub struct JsonPathError {
    pub message: String,
    pub position: usize,
}

// ── Compiled form ───────────────────────────────────────────────────

/// Whether a path starts from the document root (`$`) or the element a
/// filter is currently testing (`@`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathRoot {
    Document,
    Current,
}

/// A single step in a compiled path.
#[derive(Debug, Clone)]
enum PathStep {
    /// Object member access (`.key` or `['key']`).
    Member(String),
    /// Array element by index (`[n]`); negative indexes count from the end.
    Index(i64),
    /// All members of an object / all elements of an array (`*`, `[*]`).
    Wildcard,
    /// Recursive descent (`..`) followed by a selector applied at every
    /// depth, the current element included.
    Descend(Box<PathStep>),
    /// Filter expression (`[?(…)]`).
    Filter(FilterExpr),
}

#[derive(Debug, Clone)]
enum FilterExpr {
    Or(Box<FilterExpr>, Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Compare(Operand, CompareOp, Operand),
    /// Regex match: the operand's string value tested against the pattern.
    Matches(Operand, Regex),
    /// Bare sub-path: true when it selects at least one element.
    Exists(JsonPath),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Operand {
    Path(JsonPath),
    Literal(Value),
}

/// A compiled JSONPath expression.
#[derive(Debug, Clone)]
pub struct JsonPath {
    root: PathRoot,
    steps: Vec<PathStep>,
}

impl JsonPath {
    /// Compiles a path expression. Top-level expressions must start with
    /// `$`; `@`-rooted paths are only produced by the filter parser.
    pub fn compile(text: &str) -> Result<Self, JsonPathError> {
        let mut parser = Parser::new(text);
        parser.skip_ws();
        let path = parser.parse_path(false)?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("trailing characters after path"));
        }
        Ok(path)
    }

    /// Evaluates the path against `document`, returning every selected
    /// element in document order.
    pub fn find<'a>(&self, document: &'a Value) -> Vec<&'a Value> {
        self.find_from(document, document)
    }

    /// True when the path selects at least one element of `document`.
    pub fn matches(&self, document: &Value) -> bool {
        !self.find(document).is_empty()
    }

    fn find_from<'a>(&self, document: &'a Value, current: &'a Value) -> Vec<&'a Value> {
        let start = match self.root {
            PathRoot::Document => document,
            PathRoot::Current => current,
        };
        let mut selected = vec![start];
        for step in &self.steps {
            selected = apply_step(step, document, &selected);
            if selected.is_empty() {
                break;
            }
        }
        selected
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            PathRoot::Document => write!(f, "$"),
            PathRoot::Current => write!(f, "@"),
        }?;
        for step in &self.steps {
            match step {
                PathStep::Member(name) => write!(f, ".{name}")?,
                PathStep::Index(i) => write!(f, "[{i}]")?,
                PathStep::Wildcard => write!(f, ".*")?,
                PathStep::Descend(inner) => match inner.as_ref() {
                    PathStep::Member(name) => write!(f, "..{name}")?,
                    PathStep::Wildcard => write!(f, "..*")?,
                    _ => write!(f, "..[…]")?,
                },
                PathStep::Filter(_) => write!(f, "[?(…)]")?,
            }
        }
        Ok(())
    }
}

// ── Evaluation ──────────────────────────────────────────────────────

fn apply_step<'a>(step: &PathStep, document: &'a Value, input: &[&'a Value]) -> Vec<&'a Value> {
    let mut output = Vec::new();
    for value in input {
        match step {
            PathStep::Member(name) => {
                if let Some(child) = value.get(name.as_str()) {
                    output.push(child);
                }
            }
            PathStep::Index(index) => {
                if let Value::Array(items) = value {
                    let resolved = if *index < 0 {
                        items.len() as i64 + index
                    } else {
                        *index
                    };
                    if resolved >= 0 {
                        if let Some(item) = items.get(resolved as usize) {
                            output.push(item);
                        }
                    }
                }
            }
            PathStep::Wildcard => match value {
                Value::Array(items) => output.extend(items.iter()),
                Value::Object(map) => output.extend(map.values()),
                _ => {}
            },
            PathStep::Descend(selector) => {
                let mut descendants = Vec::new();
                collect_descendants(value, &mut descendants);
                output.extend(apply_step(selector, document, &descendants));
            }
            PathStep::Filter(expr) => match value {
                Value::Array(items) => {
                    output.extend(
                        items
                            .iter()
                            .filter(|item| eval_filter(expr, document, item)),
                    );
                }
                other => {
                    if eval_filter(expr, document, other) {
                        output.push(other);
                    }
                }
            },
        }
    }
    output
}

/// Depth-first collection of a value and all its descendants.
fn collect_descendants<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(value);
    match value {
        Value::Array(items) => {
            for item in items {
                collect_descendants(item, out);
            }
        }
        Value::Object(map) => {
            for child in map.values() {
                collect_descendants(child, out);
            }
        }
        _ => {}
    }
}

fn eval_filter(expr: &FilterExpr, document: &Value, current: &Value) -> bool {
    match expr {
        FilterExpr::Or(lhs, rhs) => {
            eval_filter(lhs, document, current) || eval_filter(rhs, document, current)
        }
        FilterExpr::And(lhs, rhs) => {
            eval_filter(lhs, document, current) && eval_filter(rhs, document, current)
        }
        FilterExpr::Compare(lhs, op, rhs) => {
            let (Some(left), Some(right)) = (
                resolve_operand(lhs, document, current),
                resolve_operand(rhs, document, current),
            ) else {
                return false;
            };
            compare_values(left, *op, right)
        }
        FilterExpr::Matches(operand, pattern) => resolve_operand(operand, document, current)
            .and_then(|value| value.as_str().map(|s| pattern.is_match(s)))
            .unwrap_or(false),
        FilterExpr::Exists(path) => !path.find_from(document, current).is_empty(),
    }
}

fn resolve_operand<'a>(
    operand: &'a Operand,
    document: &'a Value,
    current: &'a Value,
) -> Option<&'a Value> {
    match operand {
        Operand::Literal(value) => Some(value),
        Operand::Path(path) => path.find_from(document, current).into_iter().next(),
    }
}

fn compare_values(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => json_eq(left, right),
        CompareOp::Ne => !json_eq(left, right),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    }
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                None => false,
                Some(ordering) => match op {
                    CompareOp::Lt => ordering.is_lt(),
                    CompareOp::Le => ordering.is_le(),
                    CompareOp::Gt => ordering.is_gt(),
                    CompareOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                },
            }
        }
    }
}

/// JSON equality with numeric coercion, so `42` and `42.0` compare equal.
fn json_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => left == right,
    }
}

// ── Parser ──────────────────────────────────────────────────────────

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> JsonPathError {
        JsonPathError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), JsonPathError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// Parses a full path. `inside_filter` additionally allows the `@` root.
    fn parse_path(&mut self, inside_filter: bool) -> Result<JsonPath, JsonPathError> {
        let root = match self.peek() {
            Some('$') => PathRoot::Document,
            Some('@') if inside_filter => PathRoot::Current,
            Some('@') => {
                return Err(self.error("'@' is only valid inside filter expressions"));
            }
            _ => return Err(self.error("path must start with '$'")),
        };
        self.pos += 1;

        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some('.') if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let selector = self.parse_descend_selector()?;
                    steps.push(PathStep::Descend(Box::new(selector)));
                }
                Some('.') => {
                    self.pos += 1;
                    if self.eat('*') {
                        steps.push(PathStep::Wildcard);
                    } else {
                        let name = self.parse_ident()?;
                        steps.push(PathStep::Member(name));
                    }
                }
                Some('[') => {
                    self.pos += 1;
                    steps.push(self.parse_bracket()?);
                }
                _ => break,
            }
        }
        Ok(JsonPath { root, steps })
    }

    /// The selector following `..`: a member name, `*`, or a bracket.
    fn parse_descend_selector(&mut self) -> Result<PathStep, JsonPathError> {
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                Ok(PathStep::Wildcard)
            }
            Some('[') => {
                self.pos += 1;
                self.parse_bracket()
            }
            _ => Ok(PathStep::Member(self.parse_ident()?)),
        }
    }

    /// The inside of a bracket selector; the opening `[` is consumed.
    fn parse_bracket(&mut self) -> Result<PathStep, JsonPathError> {
        self.skip_ws();
        let step = match self.peek() {
            Some('*') => {
                self.pos += 1;
                PathStep::Wildcard
            }
            Some('\'') | Some('"') => PathStep::Member(self.parse_quoted()?),
            Some('?') => {
                self.pos += 1;
                self.expect('(')?;
                let expr = self.parse_or_expr()?;
                self.skip_ws();
                self.expect(')')?;
                PathStep::Filter(expr)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let number = self.parse_number()?;
                match number.as_i64() {
                    Some(index) => PathStep::Index(index),
                    None => return Err(self.error("array index must be an integer")),
                }
            }
            _ => return Err(self.error("expected '*', index, quoted name or '?(' in brackets")),
        };
        self.skip_ws();
        self.expect(']')?;
        Ok(step)
    }

    fn parse_or_expr(&mut self) -> Result<FilterExpr, JsonPathError> {
        let mut expr = self.parse_and_expr()?;
        loop {
            self.skip_ws();
            if self.eat('|') {
                self.eat('|');
                let rhs = self.parse_and_expr()?;
                expr = FilterExpr::Or(Box::new(expr), Box::new(rhs));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_and_expr(&mut self) -> Result<FilterExpr, JsonPathError> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.eat('&') {
                self.eat('&');
                let rhs = self.parse_primary()?;
                expr = FilterExpr::And(Box::new(expr), Box::new(rhs));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<FilterExpr, JsonPathError> {
        self.skip_ws();
        if self.peek() == Some('(') {
            self.pos += 1;
            let expr = self.parse_or_expr()?;
            self.skip_ws();
            self.expect(')')?;
            return Ok(expr);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr, JsonPathError> {
        let lhs = self.parse_operand()?;
        self.skip_ws();
        let Some(op) = self.parse_compare_op() else {
            // A bare operand is an existence test; literals are always
            // "present" and would make the predicate constant.
            return match lhs {
                Operand::Path(path) => Ok(FilterExpr::Exists(path)),
                Operand::Literal(_) => {
                    Err(self.error("expected a comparison operator after literal"))
                }
            };
        };
        self.skip_ws();
        if op == '~' {
            let pattern = self.parse_regex()?;
            return Ok(FilterExpr::Matches(lhs, pattern));
        }
        let rhs = self.parse_operand()?;
        let op = match op_symbol(op, self) {
            Ok(op) => op,
            Err(e) => return Err(e),
        };
        Ok(FilterExpr::Compare(lhs, op, rhs))
    }

    /// Consumes a comparison operator, returning a one-character tag:
    /// `=`, `!`, `<`, `>`, `L` (<=), `G` (>=), or `~`.
    fn parse_compare_op(&mut self) -> Option<char> {
        match self.peek()? {
            '=' => {
                self.pos += 1;
                self.eat('=');
                Some('=')
            }
            '!' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                Some('!')
            }
            '<' => {
                self.pos += 1;
                if self.eat('=') {
                    Some('L')
                } else {
                    Some('<')
                }
            }
            '>' => {
                self.pos += 1;
                if self.eat('=') {
                    Some('G')
                } else {
                    Some('>')
                }
            }
            '~' => {
                self.pos += 1;
                Some('~')
            }
            _ => None,
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, JsonPathError> {
        self.skip_ws();
        match self.peek() {
            Some('$') | Some('@') => Ok(Operand::Path(self.parse_path(true)?)),
            Some('\'') | Some('"') => Ok(Operand::Literal(Value::String(self.parse_quoted()?))),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                Ok(Operand::Literal(Value::Number(self.parse_number()?)))
            }
            _ => {
                if self.eat_keyword("true") {
                    Ok(Operand::Literal(Value::Bool(true)))
                } else if self.eat_keyword("false") {
                    Ok(Operand::Literal(Value::Bool(false)))
                } else if self.eat_keyword("null") {
                    Ok(Operand::Literal(Value::Null))
                } else {
                    Err(self.error("expected a path, string, number, boolean or null"))
                }
            }
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let end = self.pos + keyword.len();
        if end > self.chars.len() {
            return false;
        }
        let candidate: String = self.chars[self.pos..end].iter().collect();
        if candidate == keyword && !self.chars.get(end).copied().is_some_and(is_ident_char) {
            self.pos = end;
            true
        } else {
            false
        }
    }

    fn parse_ident(&mut self) -> Result<String, JsonPathError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a member name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_quoted(&mut self) -> Result<String, JsonPathError> {
        let quote = self.bump().expect("caller checked for a quote");
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some('\\') => match self.bump() {
                    None => return Err(self.error("unterminated escape sequence")),
                    Some(escaped) => out.push(escaped),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_number(&mut self) -> Result<serde_json::Number, JsonPathError> {
        let start = self.pos;
        self.eat('-');
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '+')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(int) = text.parse::<i64>() {
            return Ok(serde_json::Number::from(int));
        }
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .ok_or_else(|| self.error(format!("invalid number literal '{text}'")))
    }

    /// A JS-style regex literal: `/pattern/flags`. Only the `i` flag is
    /// supported.
    fn parse_regex(&mut self) -> Result<Regex, JsonPathError> {
        self.expect('/')?;
        let mut pattern = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated regex literal")),
                Some('\\') => match self.bump() {
                    None => return Err(self.error("unterminated regex escape")),
                    Some('/') => pattern.push('/'),
                    Some(escaped) => {
                        pattern.push('\\');
                        pattern.push(escaped);
                    }
                },
                Some('/') => break,
                Some(c) => pattern.push(c),
            }
        }
        let mut case_insensitive = false;
        while let Some(flag) = self.peek().filter(|c| c.is_ascii_alphabetic()) {
            match flag {
                'i' => case_insensitive = true,
                other => return Err(self.error(format!("unsupported regex flag '{other}'"))),
            }
            self.pos += 1;
        }
        regex::RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| self.error(format!("invalid regex: {e}")))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn op_symbol(tag: char, parser: &Parser) -> Result<CompareOp, JsonPathError> {
    match tag {
        '=' => Ok(CompareOp::Eq),
        '!' => Ok(CompareOp::Ne),
        '<' => Ok(CompareOp::Lt),
        'L' => Ok(CompareOp::Le),
        '>' => Ok(CompareOp::Gt),
        'G' => Ok(CompareOp::Ge),
        other => Err(parser.error(format!("unknown operator '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn find(path: &str, document: &Value) -> Vec<Value> {
        JsonPath::compile(path)
            .unwrap()
            .find(document)
            .into_iter()
            .cloned()
            .collect()
    }

    fn store() -> Value {
        json!({
            "store": {
                "book": [
                    {"title": "Sayings", "price": 8.95, "category": "reference"},
                    {"title": "Moby Dick", "price": 8.99, "category": "fiction"},
                    {"title": "The Lord of the Rings", "price": 22.99, "category": "fiction"}
                ],
                "bicycle": {"color": "red", "price": 19.95}
            }
        })
    }

    #[test]
    fn test_root_only() {
        let doc = json!({"a": 1});
        assert_eq!(find("$", &doc), vec![doc.clone()]);
    }

    #[test]
    fn test_member_access() {
        assert_eq!(
            find("$.store.bicycle.color", &store()),
            vec![json!("red")]
        );
    }

    #[test]
    fn test_bracket_member_access() {
        assert_eq!(
            find("$['store']['bicycle']['color']", &store()),
            vec![json!("red")]
        );
    }

    #[test]
    fn test_array_index() {
        assert_eq!(
            find("$.store.book[1].title", &store()),
            vec![json!("Moby Dick")]
        );
    }

    #[test]
    fn test_negative_array_index() {
        assert_eq!(
            find("$.store.book[-1].title", &store()),
            vec![json!("The Lord of the Rings")]
        );
    }

    #[test]
    fn test_wildcard_over_array() {
        assert_eq!(find("$.store.book[*].price", &store()).len(), 3);
    }

    #[test]
    fn test_wildcard_over_object() {
        // both book and bicycle
        assert_eq!(find("$.store.*", &store()).len(), 2);
    }

    #[test]
    fn test_recursive_descent() {
        // three books plus the bicycle
        assert_eq!(find("$..price", &store()).len(), 4);
    }

    #[test]
    fn test_missing_member_selects_nothing() {
        assert!(find("$.store.magazine", &store()).is_empty());
    }

    #[test]
    fn test_filter_string_equality() {
        let titles = find(
            "$.store.book[?(@.category = 'fiction')].title",
            &store(),
        );
        assert_eq!(titles, vec![json!("Moby Dick"), json!("The Lord of the Rings")]);
    }

    #[test]
    fn test_filter_double_equals_synonym() {
        assert_eq!(
            find("$.store.book[?(@.category == 'fiction')]", &store()).len(),
            2
        );
    }

    #[test]
    fn test_filter_inequality_and_ordering() {
        assert_eq!(
            find("$.store.book[?(@.price < 10)]", &store()).len(),
            2
        );
        assert_eq!(
            find("$.store.book[?(@.price >= 8.99)]", &store()).len(),
            2
        );
        assert_eq!(
            find("$.store.book[?(@.category != 'fiction')]", &store()).len(),
            1
        );
    }

    #[test]
    fn test_filter_numeric_coercion() {
        let doc = json!([{"n": 42}]);
        assert_eq!(find("$[?(@.n = 42.0)]", &doc).len(), 1);
    }

    #[test]
    fn test_filter_logical_and() {
        assert_eq!(
            find(
                "$.store.book[?(@.category = 'fiction' & @.price < 10)]",
                &store()
            )
            .len(),
            1
        );
    }

    #[test]
    fn test_filter_logical_or() {
        assert_eq!(
            find(
                "$.store.book[?(@.price < 9 | @.price > 20)].title",
                &store()
            )
            .len(),
            3
        );
    }

    #[test]
    fn test_filter_parentheses() {
        assert_eq!(
            find(
                "$.store.book[?((@.category = 'reference' | @.category = 'fiction') & @.price < 9)]",
                &store()
            )
            .len(),
            2
        );
    }

    #[test]
    fn test_filter_existence() {
        let doc = json!([{"a": 1}, {"b": 2}]);
        assert_eq!(find("$[?(@.a)]", &doc), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_filter_regex() {
        assert_eq!(
            find("$.store.book[?(@.title ~ /rings/i)].title", &store()),
            vec![json!("The Lord of the Rings")]
        );
        assert!(find("$.store.book[?(@.title ~ /rings/)]", &store()).is_empty());
    }

    #[test]
    fn test_filter_document_root_reference() {
        let doc = json!({"limit": 9, "items": [{"price": 5}, {"price": 12}]});
        assert_eq!(find("$.items[?(@.price < $.limit)]", &doc).len(), 1);
    }

    #[test]
    fn test_filter_on_scalar_value_missing_member() {
        // filter against a non-container applies the predicate to the value
        let doc = json!([{"org_name": "org1"}]);
        assert_eq!(find("$[?(@.org_name = 'org1')]", &doc).len(), 1);
        assert!(find("$[?(@.org_name = 'org2')]", &doc).is_empty());
    }

    #[test]
    fn test_missing_operand_never_matches() {
        let doc = json!([{"a": 1}]);
        assert!(find("$[?(@.missing = 1)]", &doc).is_empty());
        assert!(find("$[?(@.missing != 1)]", &doc).is_empty());
    }

    #[test]
    fn test_compile_rejects_bad_paths() {
        for bad in [
            "",
            "store.book",
            "@.a",
            "$.",
            "$[",
            "$[?(@.a = )]",
            "$[?(@.a ~ 'x')]",
            "$[?(@.a ~ /x/g)]",
            "$[?(1)]",
            "$.a trailing",
        ] {
            assert!(JsonPath::compile(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn test_display_round_trips_simple_paths() {
        let path = JsonPath::compile("$.store.book[0]").unwrap();
        assert_eq!(path.to_string(), "$.store.book[0]");
    }
}
