//! CEL (Common Expression Language) support for rule policies

pub mod context;
pub mod convert;
pub mod engine;
pub mod error;

pub use context::EvalContext;
pub use engine::Engine;
pub use error::{CelError, Result};
