//! Bytecode
//!
//! The instruction set and the compiled `Event` record.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a command in a [`CommandTable`](crate::command::CommandTable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub u16);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single bytecode instruction
///
/// Jump targets and slot indices are resolved to concrete positions by the
/// time compilation of an event completes; no placeholders escape the
/// compiler. Positions are 0-based indices into the owning event's
/// instruction sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Unconditional jump to a position
    Jump(usize),
    /// Jump if the top of the stack is falsey (peeks, does not pop)
    JumpIfFalse(usize),
    /// Jump if the top of the stack is truthy (peeks, does not pop)
    JumpIfTrue(usize),

    /// Invoke a native command with the given argument count
    Call { command: CommandId, args: u8 },

    /// Discard the top of the stack
    Pop,

    /// Push the value stored in a variable slot
    Fetch(usize),
    /// Store the top of the stack into a variable slot (peeks, does not pop)
    Set(usize),

    // Unary ops
    Negate,
    Not,

    // Math ops
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    /// Push a literal value
    Push(Value),

    // Comparisons
    Eq,
    NotEq,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Jump(pos) => write!(f, "jump {}", pos),
            Instruction::JumpIfFalse(pos) => write!(f, "jump-if-false {}", pos),
            Instruction::JumpIfTrue(pos) => write!(f, "jump-if-true {}", pos),
            Instruction::Call { command, args } => {
                write!(f, "call {} ({} args)", command, args)
            }
            Instruction::Pop => write!(f, "pop"),
            Instruction::Fetch(slot) => write!(f, "fetch {}", slot),
            Instruction::Set(slot) => write!(f, "set {}", slot),
            Instruction::Negate => write!(f, "negate"),
            Instruction::Not => write!(f, "not"),
            Instruction::Add => write!(f, "add"),
            Instruction::Sub => write!(f, "subtract"),
            Instruction::Mul => write!(f, "multiply"),
            Instruction::Div => write!(f, "divide"),
            Instruction::Mod => write!(f, "modulo"),
            Instruction::Push(Value::Str(s)) => write!(f, "push '{}'", s),
            Instruction::Push(value) => write!(f, "push {}", value),
            Instruction::Eq => write!(f, "=="),
            Instruction::NotEq => write!(f, "!="),
            Instruction::Greater => write!(f, ">"),
            Instruction::GreaterEq => write!(f, ">="),
            Instruction::Less => write!(f, "<"),
            Instruction::LessEq => write!(f, "<="),
        }
    }
}

/// One compiled script unit
///
/// Immutable once built; share with VM instances via `Arc<Event>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Name from the `event "name" { ... }` header
    pub name: String,

    /// Ordered instruction sequence, addressed by position
    pub instructions: Vec<Instruction>,

    /// Number of variable slots the VM must reserve
    pub slot_count: usize,
}

impl Event {
    /// Disassemble the event for debugging
    pub fn disassemble(&self) -> String {
        let mut output = format!("== {} ==\n", self.name);

        for (pos, insn) in self.instructions.iter().enumerate() {
            output.push_str(&format!("{:04} {}\n", pos, insn));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble() {
        let event = Event {
            name: "t".into(),
            instructions: vec![
                Instruction::Push(Value::Int(1)),
                Instruction::JumpIfFalse(3),
                Instruction::Pop,
            ],
            slot_count: 0,
        };

        let listing = event.disassemble();
        assert!(listing.starts_with("== t ==\n"));
        assert!(listing.contains("0000 push 1"));
        assert!(listing.contains("0001 jump-if-false 3"));
        assert!(listing.contains("0002 pop"));
    }

    #[test]
    fn test_instruction_display() {
        let call = Instruction::Call {
            command: CommandId(2),
            args: 1,
        };
        assert_eq!(call.to_string(), "call #2 (1 args)");
        assert_eq!(
            Instruction::Push(Value::Str("hi".into())).to_string(),
            "push 'hi'"
        );
    }
}
