//! Bytecode compiler
//!
//! Single-pass Pratt compiler: tokens are turned directly into bytecode
//! with no intermediate tree. The compiler keeps one token of lookahead
//! (`current`/`previous`) and backpatches jump targets in place once they
//! are known.

use crate::bytecode::{Event, Instruction};
use crate::command::ResolveCommand;
use crate::error::{Result, ScriptError};
use crate::lexer::{Lexer, Token};
use crate::value::Value;
use std::collections::HashMap;

/// Expression precedence levels, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // |
    And,        // &
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Call,       // ()
    Primary,
}

impl Precedence {
    /// One level higher, for left-associative binary operators
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Placeholder jump target, rewritten by backpatching
const UNPATCHED: usize = usize::MAX;

/// Event script compiler
///
/// Produces one [`Event`] per `event "name" { ... }` block. Call
/// [`compile_next`](Compiler::compile_next) until it returns `None`.
pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    commands: &'a dyn ResolveCommand,

    current: Token,
    previous: Token,
    primed: bool,

    instructions: Vec<Instruction>,

    // Flat, event-scoped variable table. The first mention of a name
    // allocates the next slot; blocks introduce no new scope.
    variables: Vec<String>,

    labels: HashMap<String, usize>,
    unresolved_gotos: Vec<(String, usize, usize)>, // name, instruction index, line
}

impl<'a> Compiler<'a> {
    /// Create a compiler over a source buffer
    ///
    /// Call sites are resolved against `commands` at compile time.
    pub fn new(source: &'a str, commands: &'a dyn ResolveCommand) -> Self {
        Self {
            lexer: Lexer::new(source),
            commands,
            current: Token::Eof,
            previous: Token::Eof,
            primed: false,
            instructions: Vec::new(),
            variables: Vec::new(),
            labels: HashMap::new(),
            unresolved_gotos: Vec::new(),
        }
    }

    /// Compile the next event, or `None` when the source is exhausted
    pub fn compile_next(&mut self) -> Result<Option<Event>> {
        if !self.primed {
            self.advance()?;
            self.primed = true;
        }

        if self.current == Token::Eof {
            return Ok(None);
        }

        self.instructions.clear();
        self.variables.clear();
        self.labels.clear();
        self.unresolved_gotos.clear();

        self.consume(Token::Event, "Expected event definition")?;
        let name = match self.current.clone() {
            Token::Str(s) => {
                self.advance()?;
                s
            }
            _ => return Err(self.error_at_current("Expected event name")),
        };
        self.consume(Token::LBrace, "Expected '{' after event name")?;

        while self.current != Token::RBrace && self.current != Token::Eof {
            self.statement()?;
        }

        self.consume(Token::RBrace, "Expected '}' after event body")?;
        self.resolve_gotos()?;

        let event = Event {
            name,
            instructions: std::mem::take(&mut self.instructions),
            slot_count: self.variables.len(),
        };

        tracing::debug!(
            "Compiled event '{}': {} instructions, {} slots",
            event.name,
            event.instructions.len(),
            event.slot_count
        );

        Ok(Some(event))
    }

    /// Compile every remaining event
    pub fn compile_all(&mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(event) = self.compile_next()? {
            events.push(event);
        }
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn advance(&mut self) -> Result<()> {
        self.previous = std::mem::replace(&mut self.current, self.lexer.next_token()?);
        Ok(())
    }

    /// Advance past an expected token, or fail
    fn consume(&mut self, expected: Token, err: &str) -> Result<()> {
        if self.current == expected {
            self.advance()
        } else {
            Err(self.error_at_current(err))
        }
    }

    fn error(&self, message: &str) -> ScriptError {
        ScriptError::Parse {
            line: self.lexer.line(),
            message: message.into(),
        }
    }

    fn error_at_current(&self, message: &str) -> ScriptError {
        ScriptError::Parse {
            line: self.lexer.line(),
            message: format!("{}, got {:?}", message, self.current),
        }
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Emit a jump with a placeholder target, returning its position
    fn emit_jump(&mut self, instruction: Instruction) -> usize {
        let index = self.instructions.len();
        self.emit(instruction);
        index
    }

    /// Rewrite the jump at `index` to target the current end of the sequence
    fn patch_jump(&mut self, index: usize) {
        let target = self.instructions.len();
        match &mut self.instructions[index] {
            Instruction::Jump(pos)
            | Instruction::JumpIfFalse(pos)
            | Instruction::JumpIfTrue(pos) => *pos = target,
            other => unreachable!("patch target {} is not a jump", other),
        }
    }

    /// Slot index for a variable name, allocating on first mention
    fn resolve_slot(&mut self, name: &str) -> usize {
        match self.variables.iter().position(|v| v == name) {
            Some(slot) => slot,
            None => {
                self.variables.push(name.to_string());
                self.variables.len() - 1
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<()> {
        match self.current.clone() {
            Token::LBrace => {
                self.advance()?;
                self.block()
            }
            Token::If => {
                self.advance()?;
                self.if_statement()
            }
            Token::Loop => {
                self.advance()?;
                self.loop_statement()
            }
            Token::Goto => {
                self.advance()?;
                self.goto_statement()
            }
            Token::Label(name) => {
                self.advance()?;
                self.define_label(name)
            }
            _ => self.expression_statement(),
        }
    }

    /// Statements until `}`; blocks introduce no new variable scope
    fn block(&mut self) -> Result<()> {
        while self.current != Token::RBrace && self.current != Token::Eof {
            self.statement()?;
        }
        self.consume(Token::RBrace, "Expected '}' after block")
    }

    fn expression_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(Token::Semicolon, "Expected ';' after expression")?;
        // Discard the statement's value so the stack stays net-zero
        self.emit(Instruction::Pop);
        Ok(())
    }

    fn if_statement(&mut self) -> Result<()> {
        self.expression()?;

        // Conditional jumps peek the condition; each arm pops it itself
        let else_jump = self.emit_jump(Instruction::JumpIfFalse(UNPATCHED));
        self.emit(Instruction::Pop);

        self.consume(Token::LBrace, "Expected '{' after if condition")?;
        self.block()?;

        let end_jump = self.emit_jump(Instruction::Jump(UNPATCHED));
        self.patch_jump(else_jump);
        self.emit(Instruction::Pop);

        if self.current == Token::Else {
            self.advance()?;
            if self.current == Token::If {
                self.advance()?;
                self.if_statement()?;
            } else {
                self.consume(Token::LBrace, "Expected '{' after else")?;
                self.block()?;
            }
        }

        self.patch_jump(end_jump);
        Ok(())
    }

    /// `loop { ... }`: unconditional backward jump, no built-in break.
    /// The only way out is a goto to a label past the loop.
    fn loop_statement(&mut self) -> Result<()> {
        let start = self.instructions.len();
        self.consume(Token::LBrace, "Expected '{' after loop")?;
        self.block()?;
        self.emit(Instruction::Jump(start));
        Ok(())
    }

    fn goto_statement(&mut self) -> Result<()> {
        let name = match self.current.clone() {
            Token::Identifier(name) => {
                self.advance()?;
                name
            }
            _ => return Err(self.error_at_current("Expected label name after goto")),
        };
        self.consume(Token::Semicolon, "Expected ';' after goto")?;

        if let Some(&target) = self.labels.get(&name) {
            self.emit(Instruction::Jump(target));
        } else {
            // Forward reference; resolved at the end of the event
            let line = self.lexer.line();
            let index = self.emit_jump(Instruction::Jump(UNPATCHED));
            self.unresolved_gotos.push((name, index, line));
        }
        Ok(())
    }

    fn define_label(&mut self, name: String) -> Result<()> {
        let position = self.instructions.len();
        if self.labels.insert(name.clone(), position).is_some() {
            return Err(self.error(&format!("Duplicate label '{}'", name)));
        }
        Ok(())
    }

    fn resolve_gotos(&mut self) -> Result<()> {
        for (name, index, line) in std::mem::take(&mut self.unresolved_gotos) {
            match self.labels.get(&name) {
                Some(&target) => match &mut self.instructions[index] {
                    Instruction::Jump(pos) => *pos = target,
                    other => unreachable!("unresolved goto {} is not a jump", other),
                },
                None => {
                    return Err(ScriptError::Parse {
                        line,
                        message: format!("Undefined label '{}'", name),
                    })
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<()> {
        self.advance()?;
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(can_assign)?;

        while precedence <= Self::infix_precedence(&self.current) {
            self.advance()?;
            self.infix()?;
        }

        if can_assign && self.current == Token::Assign {
            return Err(self.error("Invalid assignment target"));
        }
        Ok(())
    }

    /// Prefix handler for the previous token
    fn prefix(&mut self, can_assign: bool) -> Result<()> {
        match self.previous.clone() {
            Token::Int(n) => {
                self.emit(Instruction::Push(Value::Int(n)));
                Ok(())
            }
            Token::Float(n) => {
                self.emit(Instruction::Push(Value::Float(n)));
                Ok(())
            }
            Token::Str(s) => {
                self.emit(Instruction::Push(Value::Str(s.into())));
                Ok(())
            }
            Token::True => {
                self.emit(Instruction::Push(Value::Bool(true)));
                Ok(())
            }
            Token::False => {
                self.emit(Instruction::Push(Value::Bool(false)));
                Ok(())
            }
            Token::None => {
                self.emit(Instruction::Push(Value::None));
                Ok(())
            }
            Token::LParen => self.grouping(),
            Token::Minus | Token::Not => self.unary(),
            Token::Identifier(name) => self.variable_or_call(name, can_assign),
            _ => Err(self.error("Expected expression")),
        }
    }

    /// Infix precedence for a token, `None` if it is not an infix operator
    fn infix_precedence(token: &Token) -> Precedence {
        match token {
            Token::Or => Precedence::Or,
            Token::And => Precedence::And,
            Token::Equal | Token::NotEqual => Precedence::Equality,
            Token::Less | Token::LessEqual | Token::Greater | Token::GreaterEqual => {
                Precedence::Comparison
            }
            Token::Plus | Token::Minus => Precedence::Term,
            Token::Star | Token::Slash | Token::Percent => Precedence::Factor,
            _ => Precedence::None,
        }
    }

    /// Infix handler for the previous token
    fn infix(&mut self) -> Result<()> {
        let op = self.previous.clone();

        // & and | short-circuit via jumps; the instruction set has no
        // dedicated and/or opcodes
        match op {
            Token::And => return self.and(),
            Token::Or => return self.or(),
            _ => {}
        }

        // Right operand one level higher, for left-associativity
        self.parse_precedence(Self::infix_precedence(&op).next())?;

        let instruction = match op {
            Token::Plus => Instruction::Add,
            Token::Minus => Instruction::Sub,
            Token::Star => Instruction::Mul,
            Token::Slash => Instruction::Div,
            Token::Percent => Instruction::Mod,
            Token::Equal => Instruction::Eq,
            Token::NotEqual => Instruction::NotEq,
            Token::Less => Instruction::Less,
            Token::LessEqual => Instruction::LessEq,
            Token::Greater => Instruction::Greater,
            Token::GreaterEqual => Instruction::GreaterEq,
            other => unreachable!("no infix handler for {:?}", other),
        };
        self.emit(instruction);
        Ok(())
    }

    /// Assumes the initial `(` was consumed
    fn grouping(&mut self) -> Result<()> {
        self.expression()?;
        self.consume(Token::RParen, "Expected ')' after expression")
    }

    fn unary(&mut self) -> Result<()> {
        let op = self.previous.clone();
        self.parse_precedence(Precedence::Unary)?;
        match op {
            Token::Minus => self.emit(Instruction::Negate),
            Token::Not => self.emit(Instruction::Not),
            other => unreachable!("no unary handler for {:?}", other),
        }
        Ok(())
    }

    /// If the left operand is falsey, skip the right and keep it as the result
    fn and(&mut self) -> Result<()> {
        let end_jump = self.emit_jump(Instruction::JumpIfFalse(UNPATCHED));
        self.emit(Instruction::Pop);
        self.parse_precedence(Precedence::And)?;
        self.patch_jump(end_jump);
        Ok(())
    }

    /// If the left operand is truthy, skip the right and keep it as the result
    fn or(&mut self) -> Result<()> {
        let end_jump = self.emit_jump(Instruction::JumpIfTrue(UNPATCHED));
        self.emit(Instruction::Pop);
        self.parse_precedence(Precedence::Or)?;
        self.patch_jump(end_jump);
        Ok(())
    }

    /// Bare identifier: a command call if followed by `(`, otherwise a
    /// variable read or (when allowed) an assignment target
    fn variable_or_call(&mut self, name: String, can_assign: bool) -> Result<()> {
        if self.current == Token::LParen {
            return self.call(name);
        }

        let slot = self.resolve_slot(&name);
        if can_assign && self.current == Token::Assign {
            self.advance()?;
            self.expression()?;
            self.emit(Instruction::Set(slot));
        } else {
            self.emit(Instruction::Fetch(slot));
        }
        Ok(())
    }

    fn call(&mut self, name: String) -> Result<()> {
        let id = self
            .commands
            .resolve(&name)
            .ok_or_else(|| ScriptError::UnknownCommand(name.clone()))?;

        self.advance()?; // consume '('

        let mut args: u8 = 0;
        if self.current != Token::RParen {
            loop {
                self.expression()?;
                args = args
                    .checked_add(1)
                    .ok_or_else(|| self.error("Too many arguments"))?;
                if self.current == Token::Comma {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.consume(Token::RParen, "Expected ')' after arguments")?;

        self.emit(Instruction::Call { command: id, args });
        Ok(())
    }
}
