//! Command surface for termgate.
//!
//! Turns one raw line of terminal input into a validated, typed invocation
//! of a registered handler:
//!
//! - [`schema`] — parameter schemas, typed values, coercion
//! - [`lexer`] — quote/escape aware tokenizer
//! - [`command`] — command descriptors, handlers, replies
//! - [`registry`] — name → descriptor mapping with nested groups and
//!   completion
//! - [`dispatch`] — resolution, argument binding, handler invocation

pub mod command;
pub mod dispatch;
pub mod lexer;
pub mod registry;
pub mod schema;

pub use command::{Action, BoundArgs, CallContext, Command, Handler, Invocation, Reply};
pub use dispatch::Dispatcher;
pub use lexer::{tokenize, Token};
pub use registry::CommandRegistry;
pub use schema::{Param, ParamType, Value};
