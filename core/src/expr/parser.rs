//! Text parser for user equations.
//!
//! Supports:
//! - Numbers (integers, floats, scientific notation)
//! - Parameter references (`@name`, resolved by the caller)
//! - Arithmetic operators (+, -, *, /, ^)
//! - Parentheses for grouping
//! - Built-in functions (sin, cos, tan, asin, acos, atan, sqrt, square, abs, exp, ln)
//! - Built-in constants (PI, E)

use super::{BinaryOperator, Expr, Function};
use crate::handle::HParam;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// Parse error with location info
#[derive(Debug, Error, Clone, PartialEq)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    ParamRef(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Eof,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            position: 0,
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();

        let pos = self.position;

        let Some(&c) = self.chars.peek() else {
            return Ok(Token::Eof);
        };
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match c {
            '@' => {
                self.advance();
                let name = self.read_identifier(true);
                if name.is_empty() {
                    Err(ParseError {
                        message: "Expected parameter name after @".to_string(),
                        position: pos,
                    })
                } else {
                    Ok(Token::ParamRef(name))
                }
            }
            c if c.is_ascii_digit() || c == '.' => self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => Ok(Token::Identifier(self.read_identifier(false))),
            _ => Err(ParseError {
                message: format!("Unexpected character: '{}'", c),
                position: pos,
            }),
        }
    }

    fn advance(&mut self) -> Option<char> {
        self.position += 1;
        self.chars.next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, ParseError> {
        let pos = self.position;
        let mut num_str = String::new();
        let mut has_dot = false;

        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else if c == '.' && !has_dot {
                has_dot = true;
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // Scientific notation (1e10, 1.5e-3)
        if let Some(&c) = self.chars.peek() {
            if c == 'e' || c == 'E' {
                num_str.push(c);
                self.advance();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        num_str.push(sign);
                        self.advance();
                    }
                }
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        num_str.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        num_str.parse::<f64>().map(Token::Number).map_err(|_| ParseError {
            message: format!("Invalid number: '{}'", num_str),
            position: pos,
        })
    }

    /// Param references may contain dots (`@line.16`), plain identifiers may not.
    fn read_identifier(&mut self, allow_dot: bool) -> String {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_dot && c == '.') {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        name
    }
}

struct Parser<'a, R> {
    lexer: Lexer<'a>,
    current: Token,
    resolve: R,
}

impl<'a, R: Fn(&str) -> Option<HParam>> Parser<'a, R> {
    fn new(input: &'a str, resolve: R) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current, resolve })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            message,
            position: self.lexer.position,
        }
    }

    fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_additive()?;
        if self.current != Token::Eof {
            return Err(self.error(format!("Unexpected token after expression: {:?}", self.current)));
        }
        Ok(expr)
    }

    // Additive: term (('+' | '-') term)*
    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match &self.current {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    // Multiplicative: power (('*' | '/') power)*
    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_power()?;

        loop {
            let op = match &self.current {
                Token::Star => BinaryOperator::Mul,
                Token::Slash => BinaryOperator::Div,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_power()?;
            left = Expr::binary(op, left, right);
        }

        Ok(left)
    }

    // Power: unary ('^' power)?  (right associative)
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_unary()?;

        if self.current == Token::Caret {
            self.advance()?;
            let exp = self.parse_power()?;
            Ok(base.pow(exp))
        } else {
            Ok(base)
        }
    }

    // Unary: '-' unary | primary
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.current == Token::Minus {
            self.advance()?;
            Ok(-self.parse_unary()?)
        } else {
            self.parse_primary()
        }
    }

    // Primary: number | paramref | constant | function_call | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match &self.current {
            Token::Number(n) => {
                let val = *n;
                self.advance()?;
                Ok(Expr::Constant(val))
            }
            Token::ParamRef(name) => {
                let name = name.clone();
                let h = (self.resolve)(&name)
                    .ok_or_else(|| self.error(format!("Unknown parameter: '@{}'", name)))?;
                self.advance()?;
                Ok(Expr::Param(h))
            }
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance()?;

                match name.as_str() {
                    "PI" | "pi" => Ok(Expr::Constant(std::f64::consts::PI)),
                    "E" | "e" => Ok(Expr::Constant(std::f64::consts::E)),
                    _ if self.current == Token::LParen => {
                        let func = Function::from_name(&name)
                            .ok_or_else(|| self.error(format!("Unknown function: '{}'", name)))?;
                        self.advance()?;
                        let arg = self.parse_additive()?;
                        if self.current != Token::RParen {
                            return Err(self.error("Expected ')' after function argument".to_string()));
                        }
                        self.advance()?;
                        Ok(Expr::function(func, arg))
                    }
                    _ => Err(self.error(format!(
                        "Unknown identifier: '{}'. Did you mean '@{}'?",
                        name, name
                    ))),
                }
            }
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_additive()?;
                if self.current != Token::RParen {
                    return Err(self.error("Expected ')'".to_string()));
                }
                self.advance()?;
                Ok(expr)
            }
            _ => Err(self.error(format!("Unexpected token: {:?}", self.current))),
        }
    }
}

/// Parses an expression, resolving each `@name` through `resolve`.
pub fn parse_expression<R>(input: &str, resolve: R) -> Result<Expr, ParseError>
where
    R: Fn(&str) -> Option<HParam>,
{
    if input.trim().is_empty() {
        return Err(ParseError {
            message: "Empty expression".to_string(),
            position: 0,
        });
    }
    let mut parser = Parser::new(input, resolve)?;
    parser.parse()
}
