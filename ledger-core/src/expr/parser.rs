//! Expression parser implementing recursive descent with operator precedence
//!
//! This module provides a Pratt parser for converting text expressions into
//! an AST. Regular expressions on the right of `=~` are compiled here, so a
//! bad pattern is a compile error rather than a per-item failure.

use std::iter::Peekable;
use std::str::Chars;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use crate::datetime::parse_date;
use crate::expr::{BinaryOp, BuiltinFunction, ExprNode, UnaryOp, Value};

/// Result type for parsing; errors are plain messages that the caller wraps
/// together with the source text
pub type ParseResult<T> = Result<T, String>;

/// Token types for lexical analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Decimal(Decimal),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    Regex(String),
    Null,

    // Identifiers and functions
    Identifier(String),
    Function(BuiltinFunction),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
    Not,
    Question,
    Colon,
    Match,

    // Delimiters
    LeftParen,
    RightParen,
    Comma,

    // Special
    EndOfInput,
}

impl Token {
    /// Convert token to binary operator if possible
    pub fn to_binary_op(&self) -> Option<BinaryOp> {
        match self {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::Equal => Some(BinaryOp::Eq),
            Token::NotEqual => Some(BinaryOp::Ne),
            Token::Less => Some(BinaryOp::Lt),
            Token::Greater => Some(BinaryOp::Gt),
            Token::LessEqual => Some(BinaryOp::Le),
            Token::GreaterEqual => Some(BinaryOp::Ge),
            Token::And => Some(BinaryOp::And),
            Token::Or => Some(BinaryOp::Or),
            _ => None,
        }
    }

    /// Convert token to unary operator if possible
    pub fn to_unary_op(&self) -> Option<UnaryOp> {
        match self {
            Token::Minus => Some(UnaryOp::Neg),
            Token::Not => Some(UnaryOp::Not),
            _ => None,
        }
    }
}

/// Lexer for tokenizing expression strings
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    column: usize,
    after_match: bool,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `input`
    pub fn new(input: &'a str) -> Self {
        Lexer { input: input.chars().peekable(), column: 0, after_match: false }
    }

    /// Column of the last consumed character
    pub fn column(&self) -> usize {
        self.column
    }

    /// Peek at the next character without consuming it
    fn peek(&mut self) -> Option<char> {
        self.input.peek().cloned()
    }

    /// Consume and return the next character
    fn next_char(&mut self) -> Option<char> {
        let ch = self.input.next()?;
        self.column += 1;
        Some(ch)
    }

    /// Skip whitespace characters
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.next_char();
        }
    }

    /// Read a number (integer or decimal)
    fn read_number(&mut self, first_digit: char) -> ParseResult<Token> {
        let mut number = String::new();
        number.push(first_digit);

        let mut has_decimal = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                number.push(ch);
            } else if ch == '.' && !has_decimal {
                has_decimal = true;
                number.push(ch);
            } else {
                break;
            }
            self.next_char();
        }

        if has_decimal {
            number.parse::<Decimal>().map(Token::Decimal).map_err(|_| format!("Invalid decimal number: {}", number))
        } else {
            number.parse::<i64>().map(Token::Integer).map_err(|_| format!("Invalid integer: {}", number))
        }
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self, first_char: char) -> Token {
        let mut identifier = String::new();
        identifier.push(first_char);

        while let Some(ch) = self.peek() {
            if !(ch.is_alphanumeric() || ch == '_') {
                break;
            }
            identifier.push(ch);
            self.next_char();
        }

        match identifier.as_str() {
            "true" => Token::Boolean(true),
            "false" => Token::Boolean(false),
            "null" => Token::Null,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => match BuiltinFunction::from_name(&identifier) {
                Some(function) if self.peek() == Some('(') => Token::Function(function),
                _ => Token::Identifier(identifier),
            },
        }
    }

    /// Read text up to an unescaped `terminator`
    fn read_delimited(&mut self, terminator: char, what: &str) -> ParseResult<String> {
        let mut text = String::new();
        while let Some(ch) = self.next_char() {
            if ch == terminator {
                return Ok(text);
            }
            if ch == '\\' {
                match self.next_char() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(escaped) if escaped == terminator || escaped == '\\' && terminator == '"' => {
                        text.push(escaped)
                    }
                    Some(escaped) => {
                        text.push('\\');
                        text.push(escaped);
                    }
                    None => break,
                }
            } else {
                text.push(ch);
            }
        }
        Err(format!("Unterminated {}", what))
    }

    /// Get the next token
    pub fn next_token(&mut self) -> ParseResult<Token> {
        self.skip_whitespace();

        let after_match = std::mem::replace(&mut self.after_match, false);
        if after_match && self.peek() == Some('/') {
            self.next_char();
            return self.read_delimited('/', "regular expression").map(Token::Regex);
        }

        let Some(ch) = self.next_char() else {
            return Ok(Token::EndOfInput);
        };

        match ch {
            '+' => Ok(Token::Plus),
            '-' => Ok(Token::Minus),
            '*' => Ok(Token::Star),
            '/' => Ok(Token::Slash),
            '(' => Ok(Token::LeftParen),
            ')' => Ok(Token::RightParen),
            ',' => Ok(Token::Comma),
            '?' => Ok(Token::Question),
            ':' => Ok(Token::Colon),
            '[' => {
                let text = self.read_delimited(']', "date literal")?;
                parse_date(&text).map(Token::Date).map_err(|e| e.to_string())
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.next_char();
                    Ok(Token::NotEqual)
                } else {
                    Ok(Token::Not)
                }
            }
            '=' => match self.peek() {
                Some('=') => {
                    self.next_char();
                    Ok(Token::Equal)
                }
                Some('~') => {
                    self.next_char();
                    self.after_match = true;
                    Ok(Token::Match)
                }
                _ => Ok(Token::Equal),
            },
            '<' => {
                if self.peek() == Some('=') {
                    self.next_char();
                    Ok(Token::LessEqual)
                } else {
                    Ok(Token::Less)
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.next_char();
                    Ok(Token::GreaterEqual)
                } else {
                    Ok(Token::Greater)
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.next_char();
                }
                Ok(Token::And)
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.next_char();
                }
                Ok(Token::Or)
            }
            '"' => self.read_delimited('"', "string").map(Token::String),
            ch if ch.is_ascii_digit() => self.read_number(ch),
            ch if ch.is_alphabetic() || ch == '_' => Ok(self.read_identifier(ch)),
            _ => Err(format!("Unexpected character '{}' at column {}", ch, self.column)),
        }
    }
}

/// Precedence of the `=~` operator (same as comparisons)
const MATCH_PRECEDENCE: u8 = 4;

/// Precedence of the ternary operator
const QUERY_PRECEDENCE: u8 = 0;

/// Expression parser using Pratt parsing algorithm
pub struct ExprParser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
}

impl<'a> ExprParser<'a> {
    /// Create a parser positioned on the first token
    pub fn new(input: &'a str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;
        Ok(ExprParser { lexer, current_token })
    }

    /// Advance to the next token
    fn advance(&mut self) -> ParseResult<()> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    /// Check if current token matches expected token
    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if std::mem::discriminant(&self.current_token) == std::mem::discriminant(&expected) {
            self.advance()
        } else {
            Err(format!("Expected {:?}, found {:?}", expected, self.current_token))
        }
    }

    /// Parse a complete expression
    pub fn parse(&mut self) -> ParseResult<ExprNode> {
        if self.current_token == Token::EndOfInput {
            return Err("Empty expression".to_string());
        }

        let root = self.parse_expression(0)?;
        if self.current_token != Token::EndOfInput {
            return Err(format!("Unexpected token after expression: {:?}", self.current_token));
        }
        Ok(root)
    }

    /// Parse expression with given minimum precedence (Pratt parsing)
    fn parse_expression(&mut self, min_precedence: u8) -> ParseResult<ExprNode> {
        let mut left = self.parse_primary()?;

        loop {
            if self.current_token == Token::Question {
                if QUERY_PRECEDENCE < min_precedence {
                    break;
                }
                self.advance()?;
                let if_true = self.parse_expression(QUERY_PRECEDENCE)?;
                self.expect(Token::Colon)?;
                let if_false = self.parse_expression(QUERY_PRECEDENCE)?;
                left = ExprNode::Conditional {
                    condition: Box::new(left),
                    if_true: Box::new(if_true),
                    if_false: Box::new(if_false),
                };
                continue;
            }

            if self.current_token == Token::Match {
                if MATCH_PRECEDENCE < min_precedence {
                    break;
                }
                self.advance()?;
                let pattern = match self.current_token.clone() {
                    Token::Regex(text) | Token::String(text) => text,
                    other => return Err(format!("Expected a pattern after '=~', found {:?}", other)),
                };
                let pattern = Regex::new(&pattern).map_err(|e| format!("Invalid regular expression: {}", e))?;
                self.advance()?;
                left = ExprNode::Match { operand: Box::new(left), pattern };
                continue;
            }

            let Some(op) = self.current_token.to_binary_op() else {
                break;
            };
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }

            self.advance()?; // consume operator
            let right = self.parse_expression(precedence + 1)?;
            left = ExprNode::binary(op, left, right);
        }

        Ok(left)
    }

    /// Parse primary expressions (literals, identifiers, parenthesized expressions)
    fn parse_primary(&mut self) -> ParseResult<ExprNode> {
        let token = self.current_token.clone();
        let literal = match &token {
            Token::Integer(n) => Some(Value::Integer(*n)),
            Token::Decimal(d) => Some(Value::Decimal(*d)),
            Token::String(s) => Some(Value::String(s.clone())),
            Token::Boolean(b) => Some(Value::Bool(*b)),
            Token::Date(d) => Some(Value::Date(*d)),
            Token::Null => Some(Value::Null),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance()?;
            return Ok(ExprNode::Value(value));
        }

        match token {
            Token::Identifier(name) => {
                self.advance()?;
                if self.current_token == Token::LeftParen {
                    return Err(format!("Unknown function: {}", name));
                }
                Ok(ExprNode::Identifier(name))
            }
            Token::Function(function) => {
                self.advance()?;
                let args = self.parse_argument_list()?;
                if args.len() != function.arity() {
                    return Err(format!(
                        "Function {} expects {} arguments, got {}",
                        function,
                        function.arity(),
                        args.len()
                    ));
                }
                Ok(ExprNode::FunctionCall { function, args })
            }
            Token::LeftParen => {
                self.advance()?;
                let expr = self.parse_expression(0)?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::Minus | Token::Not => {
                let op = token.to_unary_op().ok_or_else(|| "Invalid unary operator".to_string())?;
                self.advance()?;
                let operand = self.parse_primary()?;
                Ok(ExprNode::unary(op, operand))
            }
            other => Err(format!("Unexpected token in primary expression: {:?}", other)),
        }
    }

    /// Parse function argument list
    fn parse_argument_list(&mut self) -> ParseResult<Vec<ExprNode>> {
        self.expect(Token::LeftParen)?;

        let mut args = Vec::new();
        if self.current_token != Token::RightParen {
            loop {
                args.push(self.parse_expression(0)?);
                if self.current_token != Token::Comma {
                    break;
                }
                self.advance()?;
            }
        }

        self.expect(Token::RightParen)?;
        Ok(args)
    }
}

/// Parse an expression from a string
pub fn parse_expression(input: &str) -> ParseResult<ExprNode> {
    ExprParser::new(input)?.parse()
}
