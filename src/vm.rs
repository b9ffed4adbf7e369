//! Virtual machine
//!
//! Executes one compiled event against an operand stack and a slot array,
//! dispatching command invocations to an externally supplied table. The VM
//! is resumable: a yielding command suspends execution until the owner's
//! next tick, at which point the same call instruction runs again.

use crate::bytecode::{Event, Instruction};
use crate::command::{CommandTable, Outcome};
use crate::error::{Result, ScriptError};
use crate::value::Value;
use std::sync::Arc;

/// Hard cap on operand stack depth
pub const STACK_MAX: usize = 256;

/// A single script execution
///
/// One instance per active script; discarded when the script finishes or
/// its owner cancels it. Dropping a VM performs no rollback of side effects
/// already caused by executed commands.
pub struct Vm {
    event: Arc<Event>,

    /// Next instruction to execute; `instructions.len()` means finished
    ip: usize,

    stack: Vec<Value>,

    /// Variable slots, sized to the event's declared slot count
    slots: Vec<Value>,
}

impl Vm {
    /// Create a VM over a compiled event
    pub fn new(event: Arc<Event>) -> Self {
        let slots = vec![Value::None; event.slot_count];
        Self {
            event,
            ip: 0,
            stack: Vec::new(),
            slots,
        }
    }

    /// The event this VM executes
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Current instruction pointer, for owner diagnostics
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Whether the instruction pointer has reached the end of the event
    pub fn finished(&self) -> bool {
        self.ip >= self.event.instructions.len()
    }

    /// Current operand stack depth
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Run until the event finishes or a command yields
    ///
    /// Returns `Ok(true)` when the event has run to completion and
    /// `Ok(false)` when a command requested a retry next tick. Calling
    /// `execute` on a finished VM is a no-op returning `Ok(true)`.
    ///
    /// On a runtime error the VM parks itself at the finished position
    /// before propagating, so a failed event never resumes in a partially
    /// consistent state.
    pub fn execute<C>(&mut self, commands: &CommandTable<C>, ctx: &mut C) -> Result<bool> {
        let result = self.run(commands, ctx);
        if result.is_err() {
            self.ip = self.event.instructions.len();
        }
        result
    }

    fn run<C>(&mut self, commands: &CommandTable<C>, ctx: &mut C) -> Result<bool> {
        while self.ip < self.event.instructions.len() {
            let insn = self.event.instructions[self.ip].clone();
            self.ip += 1;

            match insn {
                Instruction::Jump(pos) => {
                    self.jump(pos)?;
                }

                Instruction::JumpIfFalse(pos) => {
                    if self.peek(0)?.is_falsey() {
                        self.jump(pos)?;
                    }
                }

                Instruction::JumpIfTrue(pos) => {
                    if self.peek(0)?.is_truthy() {
                        self.jump(pos)?;
                    }
                }

                Instruction::Call { command, args } => {
                    let cmd = commands
                        .get(command)
                        .ok_or(ScriptError::UnknownCommandId(command.0))?;

                    if let Some(expected) = cmd.arity() {
                        if expected != args {
                            return Err(ScriptError::WrongArity {
                                name: cmd.name().to_string(),
                                expected,
                                got: args,
                            });
                        }
                    }

                    match cmd.call(self, args, ctx)? {
                        Outcome::Complete(value) => self.push(value)?,
                        Outcome::Yield => {
                            // Rewind so the same call instruction executes
                            // again next tick
                            self.ip -= 1;
                            tracing::trace!(
                                "Event '{}' yielded at instruction {}",
                                self.event.name,
                                self.ip
                            );
                            return Ok(false);
                        }
                    }
                }

                Instruction::Pop => {
                    self.pop()?;
                }

                Instruction::Fetch(slot) => {
                    let value = self
                        .slots
                        .get(slot)
                        .cloned()
                        .ok_or_else(|| slot_error(slot))?;
                    self.push(value)?;
                }

                Instruction::Set(slot) => {
                    let value = self.peek(0)?.clone();
                    let cell = self.slots.get_mut(slot).ok_or_else(|| slot_error(slot))?;
                    *cell = value;
                }

                Instruction::Negate => {
                    let value = self.pop()?;
                    let out = match value {
                        Value::Int(n) => Value::Int(n.wrapping_neg()),
                        Value::Float(n) => Value::Float(-n),
                        other => {
                            return Err(ScriptError::Runtime(format!(
                                "Negate operand must be a number, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    self.push(out)?;
                }

                Instruction::Not => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()))?;
                }

                Instruction::Add => {
                    self.arithmetic("+", i64::wrapping_add, |a, b| a + b)?;
                }

                Instruction::Sub => {
                    self.arithmetic("-", i64::wrapping_sub, |a, b| a - b)?;
                }

                Instruction::Mul => {
                    self.arithmetic("*", i64::wrapping_mul, |a, b| a * b)?;
                }

                Instruction::Div => {
                    let (a, b) = self.pop_pair()?;
                    let out = match (a, b) {
                        (Value::Int(a), Value::Int(b)) => {
                            let b = nonzero(b)?;
                            Value::Int(a.wrapping_div(b))
                        }
                        (Value::Int(a), Value::Float(b)) => Value::Float(a as f64 / b),
                        (Value::Float(a), Value::Int(b)) => Value::Float(a / b as f64),
                        (Value::Float(a), Value::Float(b)) => Value::Float(a / b),
                        (a, b) => return Err(operand_error("/", &a, &b)),
                    };
                    self.push(out)?;
                }

                Instruction::Mod => {
                    let (a, b) = self.pop_pair()?;
                    let out = match (a, b) {
                        (Value::Int(a), Value::Int(b)) => {
                            let b = nonzero(b)?;
                            Value::Int(a.wrapping_rem(b))
                        }
                        (a, b) => {
                            return Err(ScriptError::Runtime(format!(
                                "Operands to '%' must be integers, got {} and {}",
                                a.type_name(),
                                b.type_name()
                            )))
                        }
                    };
                    self.push(out)?;
                }

                Instruction::Push(value) => {
                    self.push(value)?;
                }

                Instruction::Eq => {
                    let (a, b) = self.pop_pair()?;
                    self.push(Value::Bool(a == b))?;
                }

                Instruction::NotEq => {
                    let (a, b) = self.pop_pair()?;
                    self.push(Value::Bool(a != b))?;
                }

                Instruction::Greater => {
                    self.comparison(">", |a, b| a > b)?;
                }

                Instruction::GreaterEq => {
                    self.comparison(">=", |a, b| a >= b)?;
                }

                Instruction::Less => {
                    self.comparison("<", |a, b| a < b)?;
                }

                Instruction::LessEq => {
                    self.comparison("<=", |a, b| a <= b)?;
                }
            }
        }

        // Out of instructions: the event has finished
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Stack access, public for command implementations
    // ------------------------------------------------------------------

    /// Push a value onto the operand stack
    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= STACK_MAX {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop the top of the operand stack
    pub fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    /// Peek below the top of the stack; depth 0 is the top
    pub fn peek(&self, depth: usize) -> Result<&Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|idx| self.stack.get(idx))
            .ok_or(ScriptError::StackUnderflow)
    }

    // ------------------------------------------------------------------
    // Interpretation helpers
    // ------------------------------------------------------------------

    fn jump(&mut self, pos: usize) -> Result<()> {
        if pos > self.event.instructions.len() {
            return Err(ScriptError::Runtime(format!(
                "Jump target {} out of range",
                pos
            )));
        }
        self.ip = pos;
        Ok(())
    }

    /// Pop the two operands of a binary instruction, left first
    fn pop_pair(&mut self) -> Result<(Value, Value)> {
        let b = self.pop()?;
        let a = self.pop()?;
        Ok((a, b))
    }

    /// Binary arithmetic: if either operand is a float the result is a
    /// float, otherwise an int
    fn arithmetic(
        &mut self,
        op: &'static str,
        iop: fn(i64, i64) -> i64,
        fop: fn(f64, f64) -> f64,
    ) -> Result<()> {
        let (a, b) = self.pop_pair()?;
        let out = match (a, b) {
            (Value::Int(a), Value::Int(b)) => Value::Int(iop(a, b)),
            (Value::Int(a), Value::Float(b)) => Value::Float(fop(a as f64, b)),
            (Value::Float(a), Value::Int(b)) => Value::Float(fop(a, b as f64)),
            (Value::Float(a), Value::Float(b)) => Value::Float(fop(a, b)),
            (a, b) => return Err(operand_error(op, &a, &b)),
        };
        self.push(out)
    }

    /// Ordered comparison over numeric operands
    fn comparison(&mut self, op: &'static str, cmp: fn(f64, f64) -> bool) -> Result<()> {
        let (a, b) = self.pop_pair()?;
        let out = match (&a, &b) {
            (Value::Int(a), Value::Int(b)) => cmp(*a as f64, *b as f64),
            (Value::Int(a), Value::Float(b)) => cmp(*a as f64, *b),
            (Value::Float(a), Value::Int(b)) => cmp(*a, *b as f64),
            (Value::Float(a), Value::Float(b)) => cmp(*a, *b),
            _ => return Err(operand_error(op, &a, &b)),
        };
        self.push(Value::Bool(out))
    }
}

fn operand_error(op: &str, a: &Value, b: &Value) -> ScriptError {
    ScriptError::Runtime(format!(
        "Operands to '{}' must be numbers, got {} and {}",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn slot_error(slot: usize) -> ScriptError {
    ScriptError::Runtime(format!("Variable slot {} out of range", slot))
}

fn nonzero(b: i64) -> Result<i64> {
    if b == 0 {
        Err(ScriptError::Runtime("Division by zero".into()))
    } else {
        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CommandId;
    use crate::command::Command;
    use crate::compiler::Compiler;

    /// Game-state stand-in for command side effects and retry progress
    #[derive(Default)]
    struct TestCtx {
        log: Vec<String>,
        waited: i64,
    }

    /// Pops its argument and records it
    struct Say;

    impl Command<TestCtx> for Say {
        fn name(&self) -> &str {
            "say"
        }

        fn arity(&self) -> Option<u8> {
            Some(1)
        }

        fn call(&self, vm: &mut Vm, _args: u8, ctx: &mut TestCtx) -> Result<Outcome> {
            let value = vm.pop()?;
            ctx.log.push(value.to_string());
            Ok(Outcome::Complete(Value::None))
        }
    }

    /// Yields until the context has ticked its argument's worth of times.
    /// Leaves the argument on the stack across retries.
    struct Wait;

    impl Command<TestCtx> for Wait {
        fn name(&self) -> &str {
            "wait"
        }

        fn arity(&self) -> Option<u8> {
            Some(1)
        }

        fn call(&self, vm: &mut Vm, _args: u8, ctx: &mut TestCtx) -> Result<Outcome> {
            let ticks = match vm.peek(0)? {
                Value::Int(n) => *n,
                other => {
                    return Err(ScriptError::Runtime(format!(
                        "wait expects an int, got {}",
                        other.type_name()
                    )))
                }
            };

            if ctx.waited >= ticks {
                ctx.waited = 0;
                vm.pop()?;
                return Ok(Outcome::Complete(Value::None));
            }

            ctx.waited += 1;
            Ok(Outcome::Yield)
        }
    }

    /// Returns the int 2
    struct Two;

    impl Command<TestCtx> for Two {
        fn name(&self) -> &str {
            "two"
        }

        fn arity(&self) -> Option<u8> {
            Some(0)
        }

        fn call(&self, _vm: &mut Vm, _args: u8, _ctx: &mut TestCtx) -> Result<Outcome> {
            Ok(Outcome::Complete(Value::Int(2)))
        }
    }

    fn table() -> CommandTable<TestCtx> {
        let mut table = CommandTable::new();
        table.register(Say);
        table.register(Wait);
        table.register(Two);
        table
    }

    fn compile(source: &str, table: &CommandTable<TestCtx>) -> Arc<Event> {
        let mut compiler = Compiler::new(source, table);
        Arc::new(compiler.compile_next().unwrap().unwrap())
    }

    #[test]
    fn test_arithmetic_runs_to_completion() {
        let table = table();
        let event = compile(r#"event "t" { 1 + 2; }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).unwrap());
        assert_eq!(vm.stack_len(), 0);
        assert!(vm.finished());
    }

    #[test]
    fn test_variables() {
        let table = table();
        let event = compile(r#"event "t" { x = 5; say(x + 1); }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).unwrap());
        assert_eq!(ctx.log, vec!["6"]);
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn test_float_contagion() {
        let table = table();
        let event = compile(r#"event "t" { say(1 + 0.5); say(4 / 2); }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        vm.execute(&table, &mut ctx).unwrap();
        assert_eq!(ctx.log, vec!["1.5", "2"]);
    }

    #[test]
    fn test_if_truthy_takes_then_branch() {
        let table = table();
        let event = compile(
            r#"event "t" { if true { say("then"); } else { say("else"); } }"#,
            &table,
        );
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        vm.execute(&table, &mut ctx).unwrap();
        assert_eq!(ctx.log, vec!["then"]);
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn test_if_falsey_takes_else_branch() {
        let table = table();
        let event = compile(
            r#"event "t" { if none { say("then"); } else { say("else"); } }"#,
            &table,
        );
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        vm.execute(&table, &mut ctx).unwrap();
        assert_eq!(ctx.log, vec!["else"]);
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn test_numeric_equality_in_script() {
        let table = table();
        let event = compile(r#"event "t" { if 2 == 2.0 { say("eq"); } }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        vm.execute(&table, &mut ctx).unwrap();
        assert_eq!(ctx.log, vec!["eq"]);
    }

    #[test]
    fn test_yield_retries_same_call() {
        let table = table();
        let event = compile(r#"event "t" { wait(3); say("done"); }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        // Three ticks suspended on the same call instruction
        for _ in 0..3 {
            assert!(!vm.execute(&table, &mut ctx).unwrap());
            assert!(ctx.log.is_empty());
        }

        assert!(vm.execute(&table, &mut ctx).unwrap());
        assert_eq!(ctx.log, vec!["done"]);
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn test_finished_vm_is_noop() {
        let table = table();
        let event = compile(r#"event "t" { say("once"); }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).unwrap());
        assert!(vm.execute(&table, &mut ctx).unwrap());
        assert_eq!(ctx.log, vec!["once"]);
    }

    #[test]
    fn test_loop_with_goto_exit() {
        let table = table();
        let event = compile(
            r#"
            event "t" {
                i = 0;
                loop {
                    i = i + 1;
                    if i >= 3 { goto out; }
                }
                out: say(i);
            }
            "#,
            &table,
        );
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).unwrap());
        assert_eq!(ctx.log, vec!["3"]);
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn test_short_circuit_skips_command() {
        let table = table();
        let event = compile(r#"event "t" { false & say("no"); true | say("no"); }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).unwrap());
        assert!(ctx.log.is_empty());
        assert_eq!(vm.stack_len(), 0);
    }

    #[test]
    fn test_command_result_feeds_expression() {
        let table = table();
        let event = compile(r#"event "t" { say(two() + 1); }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        vm.execute(&table, &mut ctx).unwrap();
        assert_eq!(ctx.log, vec!["3"]);
    }

    #[test]
    fn test_modulo_requires_integers() {
        let table = table();
        let event = compile(r#"event "t" { 1.5 % 2; }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).is_err());
        // Abort this event cleanly, once: the VM is finished afterwards
        assert!(vm.finished());
        assert!(vm.execute(&table, &mut ctx).unwrap());
    }

    #[test]
    fn test_non_numeric_arithmetic_fails() {
        let table = table();
        let event = compile(r#"event "t" { "a" + 1; }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let table = table();
        let event = compile(r#"event "t" { 1 / 0; }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        assert!(vm.execute(&table, &mut ctx).is_err());
    }

    #[test]
    fn test_unknown_command_id() {
        let table = table();
        let event = Arc::new(Event {
            name: "t".into(),
            instructions: vec![Instruction::Call {
                command: CommandId(99),
                args: 0,
            }],
            slot_count: 0,
        });
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        let err = vm.execute(&table, &mut ctx).unwrap_err();
        assert!(matches!(err, ScriptError::UnknownCommandId(99)));
    }

    #[test]
    fn test_wrong_arity() {
        let table = table();
        let event = compile(r#"event "t" { say(); }"#, &table);
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        let err = vm.execute(&table, &mut ctx).unwrap_err();
        assert!(matches!(err, ScriptError::WrongArity { got: 0, .. }));
    }

    #[test]
    fn test_stack_bounds() {
        let table = table();
        let event = compile(r#"event "t" { }"#, &table);
        let mut vm = Vm::new(event);

        assert!(matches!(vm.pop(), Err(ScriptError::StackUnderflow)));
        assert!(matches!(vm.peek(0), Err(ScriptError::StackUnderflow)));

        for i in 0..STACK_MAX {
            vm.push(Value::Int(i as i64)).unwrap();
        }
        assert!(matches!(
            vm.push(Value::None),
            Err(ScriptError::StackOverflow)
        ));

        assert_eq!(*vm.peek(0).unwrap(), Value::Int(STACK_MAX as i64 - 1));
        assert_eq!(*vm.peek(1).unwrap(), Value::Int(STACK_MAX as i64 - 2));
    }

    #[test]
    fn test_string_literal_outlives_compiler() {
        let table = table();
        let event = {
            let source = String::from(r#"event "t" { say("owned"); }"#);
            compile(&source, &table)
            // source dropped here; the event owns its literal text
        };
        let mut vm = Vm::new(event);
        let mut ctx = TestCtx::default();

        vm.execute(&table, &mut ctx).unwrap();
        assert_eq!(ctx.log, vec!["owned"]);
    }
}
