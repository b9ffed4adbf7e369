//! Error types for the event scripting engine

/// Script-specific error types
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Compile-time syntax error
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A call site named a command missing from the registry
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    /// A call instruction carried a command id missing from the table
    #[error("Unknown command id {0}")]
    UnknownCommandId(u16),

    /// A command was invoked with the wrong number of arguments
    #[error("Command '{name}' expects {expected} arguments, got {got}")]
    WrongArity {
        name: String,
        expected: u8,
        got: u8,
    },

    /// Runtime type or state error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Operand stack exceeded its capacity
    #[error("Stack overflow")]
    StackOverflow,

    /// Pop or peek on an empty operand stack
    #[error("Stack underflow")]
    StackUnderflow,
}

/// Result type for scripting operations
pub type Result<T> = std::result::Result<T, ScriptError>;
