//! Keypad calculator: input state machine plus a small arithmetic evaluator.
//!
//! Expressions use the keypad glyphs `+ - × ÷ %`. `a % b` reads as
//! "a percent of b" (`a / 100 * b`) and binds like multiplication.

use chrono::{DateTime, Utc};
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Display value shown when an expression cannot be evaluated
pub const ERROR_SENTINEL: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
pub enum Operator {
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Subtract,
    #[strum(to_string = "×", serialize = "*", serialize = "x")]
    Multiply,
    #[strum(to_string = "÷", serialize = "/")]
    Divide,
    #[strum(to_string = "%")]
    Percent,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        let mut buf = [0u8; 4];
        Operator::from_str(c.encode_utf8(&mut buf)).ok()
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Operator::Add => lhs + rhs,
            Operator::Subtract => lhs - rhs,
            Operator::Multiply => lhs * rhs,
            Operator::Divide => lhs / rhs,
            Operator::Percent => lhs / 100.0 * rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("expression ends unexpectedly")]
    UnexpectedEnd,
    #[error("expected a number, found '{0}'")]
    UnexpectedOperator(Operator),
    #[error("unexpected number {0}")]
    UnexpectedNumber(f64),
    #[error("malformed number '{0}'")]
    MalformedNumber(String),
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(Operator),
}

fn tokenize(expr: &str) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse::<f64>()
                .map_err(|_| CalcError::MalformedNumber(literal.clone()))?;
            tokens.push(Token::Number(value));
        } else if let Some(op) = Operator::from_char(c) {
            tokens.push(Token::Op(op));
            chars.next();
        } else {
            return Err(CalcError::UnexpectedChar(c));
        }
    }

    Ok(tokens)
}

/// Recursive-descent evaluator.
///
/// ```text
/// expr  := term (('+' | '-') term)*
/// term  := unary (('×' | '÷' | '%') unary)*
/// unary := '-' unary | number
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ (Operator::Add | Operator::Subtract))) = self.peek() {
            self.pos += 1;
            value = op.apply(value, self.term()?);
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ (Operator::Multiply | Operator::Divide | Operator::Percent))) =
            self.peek()
        {
            self.pos += 1;
            value = op.apply(value, self.unary()?);
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Op(Operator::Subtract)) => Ok(-self.unary()?),
            Some(Token::Op(op)) => Err(CalcError::UnexpectedOperator(op)),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

/// Evaluate an expression written with keypad glyphs
pub fn evaluate(expr: &str) -> Result<f64, CalcError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(CalcError::Empty);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(match token {
            Token::Op(op) => CalcError::UnexpectedOperator(op),
            Token::Number(n) => CalcError::UnexpectedNumber(n),
        });
    }

    if !value.is_finite() {
        return Err(CalcError::NonFinite);
    }
    Ok(value)
}

/// Integral values render bare, everything else with two decimals
pub fn format_result(value: f64) -> String {
    // -0 renders as 0
    let value = if value == 0.0 { 0.0 } else { value };
    if value.fract() == 0.0 {
        format!("{value}")
    } else {
        format!("{value:.2}")
    }
}

/// One keypad press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(char),
    Decimal,
    Operator(Operator),
    Equals,
    Clear,
    Backspace,
}

impl FromStr for Key {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" | "ac" | "C" | "c" => Ok(Key::Clear),
            "⌫" | "DEL" | "del" => Ok(Key::Backspace),
            "=" => Ok(Key::Equals),
            "." => Ok(Key::Decimal),
            _ => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_digit() => Ok(Key::Digit(c)),
                    (Some(c), None) => Operator::from_char(c)
                        .map(Key::Operator)
                        .ok_or(CalcError::UnexpectedChar(c)),
                    (Some(c), Some(_)) => Err(CalcError::UnexpectedChar(c)),
                    (None, _) => Err(CalcError::Empty),
                }
            }
        }
    }
}

/// Turn a typed line such as `12×3=` into key presses, one per glyph
pub fn parse_keys(input: &str) -> Result<Vec<Key>, CalcError> {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).parse()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Keys are appended to the live expression
    Accumulating,
    /// The last evaluation's result (or the error sentinel) is on display
    ResultShown,
}

/// A successful evaluation, kept newest first
#[derive(Debug, Clone, PartialEq)]
pub struct Calculation {
    pub expression: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Calculator {
    input: String,
    result: Option<String>,
    mode: Mode,
    history: Vec<Calculation>,
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

impl Calculator {
    pub fn new() -> Self {
        Self {
            input: String::new(),
            result: None,
            mode: Mode::Accumulating,
            history: Vec::new(),
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn history(&self) -> &[Calculation] {
        &self.history
    }

    /// What the display shows: the result when one is up, otherwise the expression
    pub fn display(&self) -> &str {
        match (&self.mode, &self.result) {
            (Mode::ResultShown, Some(result)) => result,
            _ => &self.input,
        }
    }

    pub fn press(&mut self, key: Key) {
        match key {
            Key::Digit(d) => self.push_operand(d),
            Key::Decimal => self.push_operand('.'),
            Key::Operator(op) => self.push_operator(op),
            Key::Equals => self.equals(),
            Key::Clear => {
                self.input.clear();
                self.result = None;
                self.mode = Mode::Accumulating;
            }
            Key::Backspace => {
                self.input.pop();
                self.result = None;
                self.mode = Mode::Accumulating;
            }
        }
    }

    pub fn press_all(&mut self, keys: impl IntoIterator<Item = Key>) {
        for key in keys {
            self.press(key);
        }
    }

    fn push_operand(&mut self, c: char) {
        if self.mode == Mode::ResultShown {
            self.input.clear();
            self.result = None;
            self.mode = Mode::Accumulating;
        }
        self.input.push(c);
    }

    fn push_operator(&mut self, op: Operator) {
        if self.mode == Mode::ResultShown {
            // chain from the previous result; nothing to chain from after an error
            match self.result.take() {
                Some(result) if result != ERROR_SENTINEL => {
                    self.input = result;
                    self.mode = Mode::Accumulating;
                }
                other => {
                    self.result = other;
                    return;
                }
            }
        }

        let ends_with_operator = self
            .input
            .chars()
            .last()
            .is_some_and(|c| Operator::from_char(c).is_some());

        if ends_with_operator {
            self.input.pop();
            self.input.push_str(op.as_ref());
        } else if !self.input.is_empty() {
            self.input.push_str(op.as_ref());
        }
    }

    fn equals(&mut self) {
        if self.input.is_empty() {
            return;
        }

        match evaluate(&self.input) {
            Ok(value) => {
                let result = format_result(value);
                self.history.insert(
                    0,
                    Calculation {
                        expression: self.input.clone(),
                        result: result.clone(),
                        timestamp: Utc::now(),
                    },
                );
                self.result = Some(result);
            }
            Err(e) => {
                tracing::debug!(expression = %self.input, error = %e, "evaluation failed");
                self.result = Some(ERROR_SENTINEL.to_string());
            }
        }
        self.mode = Mode::ResultShown;
    }
}
