//! Sandboxed arithmetic for user-supplied seed formulas.
//!
//! The grammar is fixed: numeric literals, named variables supplied by the
//! caller, `+ - * / // % **`, unary sign and parentheses. There are no
//! function calls, attribute access or anything else; input outside the
//! grammar is a parse error.
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '//' | '%') unary)*
//! unary := ('+' | '-') unary | power
//! power := atom ('**' unary)?
//! atom  := NUMBER | IDENT | '(' expr ')'
//! ```

use std::collections::HashMap;

use super::SeedError;

/// Longest formula accepted.
const MAX_FORMULA_LEN: usize = 512;

/// Deepest parenthesis / unary nesting accepted.
const MAX_DEPTH: usize = 64;

/// A formula value: exact integer or float, with Python-like promotion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Truncate toward zero, as an integer conversion would.
    pub fn to_i128(self) -> Result<i128, SeedError> {
        match self {
            Number::Int(i) => Ok(i),
            Number::Float(f) if f.is_finite() && f.abs() < 1.0e38 => Ok(f.trunc() as i128),
            Number::Float(_) => Err(SeedError::NotFinite),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Power,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, SeedError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Power);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                let number = if text.contains('.') {
                    text.parse::<f64>().map(Number::Float).ok()
                } else {
                    text.parse::<i128>().map(Number::Int).ok()
                };
                match number {
                    Some(n) => tokens.push(Token::Number(n)),
                    None => {
                        return Err(SeedError::Parse {
                            position: start,
                            message: format!("invalid number `{text}`"),
                        })
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(SeedError::Parse {
                    position: i,
                    message: format!("unexpected character `{other}`"),
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    vars: &'a HashMap<&'static str, Number>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> Result<(), SeedError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(SeedError::Parse {
                position: self.pos,
                message: "expression nested too deeply".to_string(),
            });
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Number, SeedError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    value = add(value, self.term()?)?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    value = sub(value, self.term()?)?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<Number, SeedError> {
        let mut value = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Token::Star,
                Some(Token::Slash) => Token::Slash,
                Some(Token::DoubleSlash) => Token::DoubleSlash,
                Some(Token::Percent) => Token::Percent,
                _ => return Ok(value),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => mul(value, rhs)?,
                Token::Slash => true_div(value, rhs)?,
                Token::DoubleSlash => floor_div(value, rhs)?,
                _ => modulo(value, rhs)?,
            };
        }
    }

    fn unary(&mut self) -> Result<Number, SeedError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                neg(value)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(value)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Number, SeedError> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Power) {
            self.pos += 1;
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return pow(base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, SeedError> {
        let position = self.pos;
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Ident(name)) => self
                .vars
                .get(name.as_str())
                .copied()
                .ok_or(SeedError::UnknownVariable(name)),
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(SeedError::Parse {
                        position,
                        message: "unclosed parenthesis".to_string(),
                    }),
                }
            }
            Some(other) => Err(SeedError::Parse {
                position,
                message: format!("unexpected token {other:?}"),
            }),
            None => Err(SeedError::Parse {
                position,
                message: "unexpected end of formula".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn float(value: f64) -> Result<Number, SeedError> {
    if value.is_finite() {
        Ok(Number::Float(value))
    } else {
        Err(SeedError::NotFinite)
    }
}

fn add(a: Number, b: Number) -> Result<Number, SeedError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_add(y).map(Number::Int).ok_or(SeedError::Overflow),
        _ => float(a.as_f64() + b.as_f64()),
    }
}

fn sub(a: Number, b: Number) -> Result<Number, SeedError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_sub(y).map(Number::Int).ok_or(SeedError::Overflow),
        _ => float(a.as_f64() - b.as_f64()),
    }
}

fn mul(a: Number, b: Number) -> Result<Number, SeedError> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.checked_mul(y).map(Number::Int).ok_or(SeedError::Overflow),
        _ => float(a.as_f64() * b.as_f64()),
    }
}

fn neg(a: Number) -> Result<Number, SeedError> {
    match a {
        Number::Int(x) => x.checked_neg().map(Number::Int).ok_or(SeedError::Overflow),
        Number::Float(f) => Ok(Number::Float(-f)),
    }
}

fn true_div(a: Number, b: Number) -> Result<Number, SeedError> {
    if b.as_f64() == 0.0 {
        return Err(SeedError::DivisionByZero);
    }
    float(a.as_f64() / b.as_f64())
}

fn floor_div(a: Number, b: Number) -> Result<Number, SeedError> {
    match (a, b) {
        (Number::Int(_), Number::Int(0)) => Err(SeedError::DivisionByZero),
        (Number::Int(x), Number::Int(y)) => {
            let q = x.checked_div(y).ok_or(SeedError::Overflow)?;
            // Round toward negative infinity.
            if (x % y != 0) && ((x < 0) != (y < 0)) {
                Ok(Number::Int(q - 1))
            } else {
                Ok(Number::Int(q))
            }
        }
        _ => {
            if b.as_f64() == 0.0 {
                return Err(SeedError::DivisionByZero);
            }
            float((a.as_f64() / b.as_f64()).floor())
        }
    }
}

/// Remainder with the sign of the divisor.
fn modulo(a: Number, b: Number) -> Result<Number, SeedError> {
    match (a, b) {
        (Number::Int(_), Number::Int(0)) => Err(SeedError::DivisionByZero),
        (Number::Int(x), Number::Int(y)) => {
            let r = x.checked_rem(y).ok_or(SeedError::Overflow)?;
            if r != 0 && ((r < 0) != (y < 0)) {
                Ok(Number::Int(r + y))
            } else {
                Ok(Number::Int(r))
            }
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            if y == 0.0 {
                return Err(SeedError::DivisionByZero);
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                float(r + y)
            } else {
                float(r)
            }
        }
    }
}

fn pow(base: Number, exponent: Number) -> Result<Number, SeedError> {
    match (base, exponent) {
        (Number::Int(b), Number::Int(e)) if e >= 0 => {
            let e = u32::try_from(e).map_err(|_| SeedError::Overflow)?;
            b.checked_pow(e).map(Number::Int).ok_or(SeedError::Overflow)
        }
        _ => float(base.as_f64().powf(exponent.as_f64())),
    }
}

/// Evaluate `source` against the given variables.
pub fn evaluate(source: &str, vars: &HashMap<&'static str, Number>) -> Result<Number, SeedError> {
    if source.len() > MAX_FORMULA_LEN {
        return Err(SeedError::TooLong(MAX_FORMULA_LEN));
    }
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(SeedError::Parse {
            position: 0,
            message: "empty formula".to_string(),
        });
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        vars,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(SeedError::Parse {
            position: parser.pos,
            message: "trailing input".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn eval(src: &str) -> Result<Number, SeedError> {
        let vars = HashMap::from([
            ("seed", Number::Int(1000)),
            ("task_id", Number::Int(7)),
            ("multiplier", Number::Float(1.5)),
        ]);
        evaluate(src, &vars)
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Number::Int(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Number::Int(9));
        assert_eq!(eval("2 ** 3 ** 2").unwrap(), Number::Int(512));
        assert_eq!(eval("-2 ** 2").unwrap(), Number::Int(-4));
        assert_eq!(eval("10 - 4 - 3").unwrap(), Number::Int(3));
    }

    #[test]
    fn variables_resolve() {
        assert_eq!(eval("seed + task_id * 100").unwrap(), Number::Int(1700));
        assert_eq!(eval("task_id * multiplier").unwrap(), Number::Float(10.5));
    }

    #[test]
    fn division_follows_floor_semantics() {
        assert_eq!(eval("7 / 2").unwrap(), Number::Float(3.5));
        assert_eq!(eval("7 // 2").unwrap(), Number::Int(3));
        assert_eq!(eval("-7 // 2").unwrap(), Number::Int(-4));
        assert_eq!(eval("-7 % 3").unwrap(), Number::Int(2));
        assert_eq!(eval("7 % -3").unwrap(), Number::Int(-2));
    }

    #[test]
    fn errors_are_reported_not_panicked() {
        assert_matches!(eval("1 / 0"), Err(SeedError::DivisionByZero));
        assert_matches!(eval("1 % 0"), Err(SeedError::DivisionByZero));
        assert_matches!(eval("10 ** 100"), Err(SeedError::Overflow));
        assert_matches!(eval("secret"), Err(SeedError::UnknownVariable(ref v)) if v == "secret");
        assert_matches!(eval("(1 + 2"), Err(SeedError::Parse { .. }));
        assert_matches!(eval("1 2"), Err(SeedError::Parse { .. }));
        assert_matches!(eval(""), Err(SeedError::Parse { .. }));
    }

    #[test]
    fn code_is_not_executed() {
        assert_matches!(eval("__import__('os')"), Err(SeedError::Parse { .. }));
        assert_matches!(eval("seed.real"), Err(SeedError::Parse { .. }));
        assert_matches!(eval("abs(seed)"), Err(SeedError::UnknownVariable(_)));
    }

    #[test]
    fn depth_and_length_are_bounded() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_matches!(eval(&deep), Err(SeedError::Parse { .. }));
        let long = "1+".repeat(300) + "1";
        assert_matches!(eval(&long), Err(SeedError::TooLong(_)));
    }
}
