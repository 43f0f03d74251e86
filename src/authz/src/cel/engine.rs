//! CEL expression engine

use cel_interpreter::objects::Value as CelValue;
use cel_interpreter::{Context, Program};
use std::panic::{self, AssertUnwindSafe};

use crate::cel::{
    context::EvalContext,
    convert::json_to_cel,
    error::{CelError, Result},
};

/// Compiles and evaluates boolean CEL expressions
///
/// Programs are compiled per call and never shared between threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Engine;

impl Engine {
    pub fn new() -> Self {
        Self
    }

    /// Compile an expression, reporting syntax errors
    pub fn compile(&self, expr: &str) -> Result<Program> {
        Program::compile(expr).map_err(|e| CelError::CompilationError(format!("{:?}", e)))
    }

    /// Evaluate a compiled program to a boolean
    pub fn evaluate(&self, program: &Program, ctx: &EvalContext) -> Result<bool> {
        let mut cel_context = Context::default();
        for (name, value) in ctx.to_variables() {
            cel_context.add_variable_from_value(name, json_to_cel(value));
        }

        // The interpreter may panic on malformed input
        let result = panic::catch_unwind(AssertUnwindSafe(|| program.execute(&cel_context)))
            .map_err(|_| CelError::InterpreterPanic)?
            .map_err(|e| CelError::EvaluationError(format!("{:?}", e)))?;

        match result {
            CelValue::Bool(b) => Ok(b),
            _ => Err(CelError::NonBooleanResult),
        }
    }

    /// Compile and evaluate in one call
    pub fn evaluate_expression(&self, expr: &str, ctx: &EvalContext) -> Result<bool> {
        let program = self.compile(expr)?;
        self.evaluate(&program, ctx)
    }
}
