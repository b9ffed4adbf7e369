//! # Event Scripting Engine
//!
//! This crate compiles textual "event" scripts (dialogue, triggers,
//! scripted sequences) into bytecode and executes them on a resumable
//! stack machine.
//!
//! ## Features
//! - Single-pass Pratt compiler: tokens straight to bytecode, no AST
//! - Suspend/resume VM: commands can yield and be retried once per tick
//! - Pluggable command table supplied by the embedding game
//! - Per-event variable slots, labels and gotos, if/else and loops
//!
//! ## Pipeline
//!
//! Source text goes through the [`Lexer`] into the [`Compiler`], which
//! emits one immutable [`Event`] per `event "name" { ... }` block. The
//! owning collaborator wraps each event in a [`Vm`] and steps it once per
//! simulation tick; commands that touch pending game state (an open dialog
//! box, a running timer) yield and are retried on later ticks.

pub mod bytecode;
pub mod command;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod value;
pub mod vm;

pub use bytecode::{CommandId, Event, Instruction};
pub use command::{Command, CommandTable, Outcome, ResolveCommand};
pub use compiler::Compiler;
pub use error::{Result, ScriptError};
pub use lexer::{Lexer, Token};
pub use value::Value;
pub use vm::{Vm, STACK_MAX};
