//! Command table
//!
//! The seam between the VM and the rest of the game. Collaborators register
//! native commands here; the compiler resolves call sites against the table
//! and the VM dispatches through it at runtime.
//!
//! Commands pop their own arguments off the VM stack. A command that yields
//! must leave its arguments in place (peek, don't pop) so the retried call
//! sees the same stack, and must keep any retry progress in the context it
//! is given; the VM carries no continuation state of its own.

use crate::bytecode::CommandId;
use crate::error::Result;
use crate::value::Value;
use crate::vm::Vm;

/// What a native command did with its invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The command finished; the VM pushes this result
    Complete(Value),

    /// The command cannot finish this tick and must be retried
    Yield,
}

/// A native command callable from scripts
pub trait Command<C> {
    /// Display name, used by call sites in script source
    fn name(&self) -> &str;

    /// Fixed argument count, or `None` for variadic commands
    fn arity(&self) -> Option<u8> {
        None
    }

    /// Invoke the command
    ///
    /// `args` values are on top of the VM stack, last argument topmost.
    fn call(&self, vm: &mut Vm, args: u8, ctx: &mut C) -> Result<Outcome>;
}

/// Resolution of command names to ids, as seen by the compiler
///
/// Split out from [`CommandTable`] so the compiler does not need to know the
/// context type commands run against.
pub trait ResolveCommand {
    /// Look up a command id by display name
    fn resolve(&self, name: &str) -> Option<CommandId>;
}

/// Registry of native commands, keyed by dense [`CommandId`]
pub struct CommandTable<C> {
    entries: Vec<Box<dyn Command<C>>>,
}

impl<C> CommandTable<C> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a command, returning its id
    ///
    /// Ids are assigned in registration order and are stable for the
    /// lifetime of the table.
    pub fn register(&mut self, command: impl Command<C> + 'static) -> CommandId {
        let id = CommandId(self.entries.len() as u16);
        self.entries.push(Box::new(command));
        id
    }

    /// Get a command by id
    pub fn get(&self, id: CommandId) -> Option<&dyn Command<C>> {
        self.entries.get(id.0 as usize).map(|c| c.as_ref())
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for CommandTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ResolveCommand for CommandTable<C> {
    fn resolve(&self, name: &str) -> Option<CommandId> {
        self.entries
            .iter()
            .position(|c| c.name() == name)
            .map(|idx| CommandId(idx as u16))
    }
}
