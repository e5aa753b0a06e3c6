//! Recursive-descent evaluator for `+ - * / % ^` and parentheses over `f64`.

use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
	#[error("unexpected `{0}`")]
	Unexpected(char),
	#[error("unexpected end of input")]
	End,
	#[error("division by zero")]
	DivisionByZero,
	#[error("result is not a finite number")]
	NotFinite,
}

/// Evaluates `input`; the whole input must be one expression.
pub fn evaluate(input: &str) -> Result<f64, EvalError> {
	let mut parser = Parser {
		chars: input.chars().peekable(),
	};
	let value = parser.expr()?;
	if let Some(c) = parser.peek() {
		return Err(EvalError::Unexpected(c));
	}
	if value.is_finite() { Ok(value) } else { Err(EvalError::NotFinite) }
}

/// Integers without a fraction, everything else with at most ten significant decimals.
pub fn format(value: f64) -> String {
	if value.fract() == 0.0 && value.abs() < 1e15 {
		return format!("{value:.0}");
	}
	let text = format!("{value:.10}");
	text.trim_end_matches('0').trim_end_matches('.').to_string()
}

struct Parser<'a> {
	chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
	fn peek(&mut self) -> Option<char> {
		while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
		self.chars.peek().copied()
	}

	fn eat(&mut self, expected: char) -> bool {
		if self.peek() == Some(expected) {
			self.chars.next();
			true
		} else {
			false
		}
	}

	fn expr(&mut self) -> Result<f64, EvalError> {
		let mut value = self.term()?;
		loop {
			if self.eat('+') {
				value += self.term()?;
			} else if self.eat('-') {
				value -= self.term()?;
			} else {
				return Ok(value);
			}
		}
	}

	fn term(&mut self) -> Result<f64, EvalError> {
		let mut value = self.power()?;
		loop {
			let op = match self.peek() {
				Some(op @ ('*' | '/' | '%')) => op,
				_ => return Ok(value),
			};
			self.chars.next();
			let rhs = self.power()?;
			value = match op {
				'*' => value * rhs,
				_ if rhs == 0.0 => return Err(EvalError::DivisionByZero),
				'/' => value / rhs,
				_ => value % rhs,
			};
		}
	}

	/// Right-associative, binding tighter than unary minus on its left: `-2^2 = -4`.
	fn power(&mut self) -> Result<f64, EvalError> {
		if self.eat('-') {
			return Ok(-self.power()?);
		}
		if self.eat('+') {
			return self.power();
		}
		let base = self.atom()?;
		if self.eat('^') {
			return Ok(base.powf(self.power()?));
		}
		Ok(base)
	}

	fn atom(&mut self) -> Result<f64, EvalError> {
		match self.peek() {
			Some('(') => {
				self.chars.next();
				let value = self.expr()?;
				if !self.eat(')') {
					return Err(self.peek().map_or(EvalError::End, EvalError::Unexpected));
				}
				Ok(value)
			}
			Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
			Some(c) => Err(EvalError::Unexpected(c)),
			None => Err(EvalError::End),
		}
	}

	fn number(&mut self) -> Result<f64, EvalError> {
		let mut text = String::new();
		while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '.' || *c == '_') {
			if c != '_' {
				text.push(c);
			}
		}
		text.parse().map_err(|_| EvalError::Unexpected('.'))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn precedence_and_associativity() {
		assert_eq!(evaluate("2 + 3 * 4"), Ok(14.0));
		assert_eq!(evaluate("(2 + 3) * 4"), Ok(20.0));
		assert_eq!(evaluate("2 ^ 3 ^ 2"), Ok(512.0));
		assert_eq!(evaluate("-2 ^ 2"), Ok(-4.0));
		assert_eq!(evaluate("10 - 4 - 3"), Ok(3.0));
		assert_eq!(evaluate("7 % 4"), Ok(3.0));
		assert_eq!(evaluate("1_000 / 8"), Ok(125.0));
	}

	#[test]
	fn rejects_garbage() {
		assert_eq!(evaluate("fire"), Err(EvalError::Unexpected('f')));
		assert_eq!(evaluate("2 +"), Err(EvalError::End));
		assert_eq!(evaluate("(1 + 2"), Err(EvalError::End));
		assert_eq!(evaluate("1 / 0"), Err(EvalError::DivisionByZero));
		assert_eq!(evaluate("1 2"), Err(EvalError::Unexpected('2')));
		assert_eq!(evaluate("1.2.3"), Err(EvalError::Unexpected('.')));
	}

	#[test]
	fn formats_results() {
		assert_eq!(format(14.0), "14");
		assert_eq!(format(0.1 + 0.2), "0.3");
		assert_eq!(format(-2.5), "-2.5");
	}
}
