//! Lexer and tokenizer
//!
//! Lexical analysis for event scripts. The lexer is a plain cursor over the
//! source text: it hands out one token per call and keeps no lookahead of
//! its own (lookahead is the compiler's job).

use crate::error::{Result, ScriptError};
use std::iter::Peekable;
use std::str::Chars;

/// Maximum length of a numeric literal, in characters
pub const MAX_NUMBER_LEN: usize = 32;

/// Event script token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Identifier(String),
    /// An identifier with a trailing `:`, colon stripped
    Label(String),

    // Keywords
    Event,
    Goto,
    If,
    Else,
    Loop,
    True,
    False,
    None,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %

    // Comparison
    Equal,        // ==
    NotEqual,     // !=
    Less,         // <
    Greater,      // >
    LessEqual,    // <=
    GreaterEqual, // >=

    // Logical
    And,          // &
    Or,           // |
    Not,          // !

    // Assignment
    Assign,       // =

    // Delimiters
    LParen,       // (
    RParen,       // )
    LBrace,       // {
    RBrace,       // }
    Semicolon,    // ;
    Comma,        // ,

    // End of input
    Eof,
}

/// Event script lexer
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    ch: Option<char>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer over a source buffer
    pub fn new(input: &'a str) -> Self {
        let mut chars = input.chars().peekable();
        let ch = chars.next();
        Self {
            input: chars,
            line: 1,
            ch,
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        match self.ch {
            Option::None => Ok(Token::Eof),

            Some(ch) => match ch {
                '0'..='9' => self.read_number(),

                'a'..='z' | 'A'..='Z' | '_' => self.read_identifier(),

                '"' => self.read_string(),

                '#' => {
                    // Line comment
                    while self.ch.is_some() && self.ch != Some('\n') {
                        self.advance();
                    }
                    self.next_token()
                }

                '+' => { self.advance(); Ok(Token::Plus) }
                '-' => { self.advance(); Ok(Token::Minus) }
                '*' => { self.advance(); Ok(Token::Star) }
                '/' => { self.advance(); Ok(Token::Slash) }
                '%' => { self.advance(); Ok(Token::Percent) }

                '=' => {
                    self.advance();
                    if self.ch == Some('=') {
                        self.advance();
                        Ok(Token::Equal)
                    } else {
                        Ok(Token::Assign)
                    }
                }

                '!' => {
                    self.advance();
                    if self.ch == Some('=') {
                        self.advance();
                        Ok(Token::NotEqual)
                    } else {
                        Ok(Token::Not)
                    }
                }

                '<' => {
                    self.advance();
                    if self.ch == Some('=') {
                        self.advance();
                        Ok(Token::LessEqual)
                    } else {
                        Ok(Token::Less)
                    }
                }

                '>' => {
                    self.advance();
                    if self.ch == Some('=') {
                        self.advance();
                        Ok(Token::GreaterEqual)
                    } else {
                        Ok(Token::Greater)
                    }
                }

                '&' => { self.advance(); Ok(Token::And) }
                '|' => { self.advance(); Ok(Token::Or) }

                '(' => { self.advance(); Ok(Token::LParen) }
                ')' => { self.advance(); Ok(Token::RParen) }
                '{' => { self.advance(); Ok(Token::LBrace) }
                '}' => { self.advance(); Ok(Token::RBrace) }
                ';' => { self.advance(); Ok(Token::Semicolon) }
                ',' => { self.advance(); Ok(Token::Comma) }

                _ => {
                    let msg = format!("Unexpected character: {}", ch);
                    self.advance();
                    Err(ScriptError::Parse {
                        line: self.line,
                        message: msg,
                    })
                }
            },
        }
    }

    /// Current line number, for compiler diagnostics
    pub fn line(&self) -> usize {
        self.line
    }

    /// Read an int or float literal
    fn read_number(&mut self) -> Result<Token> {
        let mut num_str = String::new();
        let mut is_float = false;

        while let Some(ch) = self.ch {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' && !is_float && self.peek_char().is_some_and(|c| c.is_ascii_digit())
            {
                is_float = true;
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }

            if num_str.len() > MAX_NUMBER_LEN {
                return Err(ScriptError::Parse {
                    line: self.line,
                    message: format!(
                        "Numeric literal exceeds maximum length of {} characters",
                        MAX_NUMBER_LEN
                    ),
                });
            }
        }

        if is_float {
            let value: f64 = num_str.parse().map_err(|_| ScriptError::Parse {
                line: self.line,
                message: format!("Invalid number: {}", num_str),
            })?;
            Ok(Token::Float(value))
        } else {
            let value: i64 = num_str.parse().map_err(|_| ScriptError::Parse {
                line: self.line,
                message: format!("Invalid number: {}", num_str),
            })?;
            Ok(Token::Int(value))
        }
    }

    /// Read an identifier, keyword, or label
    fn read_identifier(&mut self) -> Result<Token> {
        let mut ident = String::new();

        while let Some(ch) = self.ch {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // A trailing colon marks a label; the colon is not stored
        if let Some(name) = ident.strip_suffix(':') {
            return Ok(Token::Label(name.to_string()));
        }

        let token = match ident.as_str() {
            "event" => Token::Event,
            "goto" => Token::Goto,
            "if" => Token::If,
            "else" => Token::Else,
            "loop" => Token::Loop,
            "true" => Token::True,
            "false" => Token::False,
            "none" => Token::None,
            _ => Token::Identifier(ident),
        };

        Ok(token)
    }

    /// Read a string literal
    ///
    /// Strings are double-quote delimited with no escape processing.
    fn read_string(&mut self) -> Result<Token> {
        self.advance(); // Skip opening quote

        let mut s = String::new();

        while let Some(ch) = self.ch {
            if ch == '"' {
                self.advance();
                return Ok(Token::Str(s));
            }
            if ch == '\n' {
                self.line += 1;
            }
            s.push(ch);
            self.advance();
        }

        Err(ScriptError::Parse {
            line: self.line,
            message: "Unterminated string".into(),
        })
    }

    /// Peek at the character after the current one
    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    /// Advance to the next character
    fn advance(&mut self) {
        self.ch = self.input.next();
    }

    /// Skip whitespace, counting lines
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.ch {
            if ch == '\n' {
                self.line += 1;
                self.advance();
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }
}
