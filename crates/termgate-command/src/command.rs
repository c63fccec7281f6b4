//! Command descriptors, handlers, and replies.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use termgate_core::{Principal, SessionId};

use crate::schema::{Param, Value};

/// What the session should do after a command completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Keep the session's command loop running
    #[default]
    Continue,
    /// Close this session's connection
    CloseSession,
    /// Request a server-wide shutdown
    ShutdownServer,
}

/// Result of a successful handler execution.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    /// Text written back to the client (markup allowed); may be empty
    pub text: String,
    /// Follow-up action for the session
    pub action: Action,
}

impl Reply {
    /// Reply with output text, loop continues.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: Action::Continue,
        }
    }

    /// Silent reply, loop continues.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reply that closes the session after the text is written.
    pub fn close(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: Action::CloseSession,
        }
    }

    /// Reply that requests a server shutdown.
    pub fn shutdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: Action::ShutdownServer,
        }
    }
}

/// Who is invoking a command, and from which session.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub session: SessionId,
    pub principal: Principal,
}

/// Argument values bound against a command's schema.
///
/// A bound invocation always satisfies its own schema, so the typed
/// getters panic only when handler code disagrees with the schema it
/// declared — a programming error, not a runtime condition.
#[derive(Debug, Clone, Default)]
pub struct BoundArgs {
    values: HashMap<String, Value>,
}

impl BoundArgs {
    pub(crate) fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub(crate) fn append_list(&mut self, name: &str, mut elems: Vec<Value>) {
        match self.values.get_mut(name) {
            Some(Value::List(existing)) => existing.append(&mut elems),
            _ => {
                self.values.insert(name.to_string(), Value::List(elems));
            }
        }
    }

    /// Raw value, if bound.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Integer parameter value.
    pub fn int(&self, name: &str) -> i64 {
        self.values
            .get(name)
            .and_then(Value::as_int)
            .unwrap_or_else(|| panic!("parameter '{name}' is not a bound integer"))
    }

    /// Float parameter value.
    pub fn float(&self, name: &str) -> f64 {
        self.values
            .get(name)
            .and_then(Value::as_float)
            .unwrap_or_else(|| panic!("parameter '{name}' is not a bound float"))
    }

    /// Boolean parameter value; unbound booleans read as false.
    pub fn flag(&self, name: &str) -> bool {
        self.values
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// String parameter value.
    pub fn str(&self, name: &str) -> &str {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_else(|| panic!("parameter '{name}' is not a bound string"))
    }

    /// List parameter value; unbound lists read as empty.
    pub fn list(&self, name: &str) -> &[Value] {
        self.values
            .get(name)
            .and_then(Value::as_list)
            .unwrap_or(&[])
    }
}

/// A fully bound invocation handed to a handler.
///
/// Ephemeral: created per input line, discarded after execution.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Bound argument values
    pub args: BoundArgs,
    /// The raw input line as typed
    pub raw_line: String,
    /// Invoking session and principal
    pub context: CallContext,
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Reply>> + Send>>;

/// Type-erased async command handler.
pub struct Handler(Box<dyn Fn(Invocation) -> HandlerFuture + Send + Sync>);

impl Handler {
    /// Wrap an async function or closure as a handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        Self(Box::new(move |inv| Box::pin(f(inv))))
    }

    /// Invoke the handler.
    pub fn call(&self, invocation: Invocation) -> HandlerFuture {
        (self.0)(invocation)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// Registered metadata describing a command: name, parameter schema,
/// help text, and handler. Immutable once registered.
#[derive(Debug)]
pub struct Command {
    name: String,
    summary: String,
    long_help: String,
    params: Vec<Param>,
    handler: Arc<Handler>,
}

impl Command {
    /// Start building a command with a one-line summary.
    ///
    /// The handler defaults to a no-op reply; set a real one with
    /// [`Command::handler`].
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            long_help: String::new(),
            params: Vec::new(),
            handler: Arc::new(Handler::new(|_| async { Ok(Reply::empty()) })),
        }
    }

    /// Append a parameter to the schema (declared order is binding order).
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Longer help text shown by `help <name>`.
    pub fn long_help(mut self, text: impl Into<String>) -> Self {
        self.long_help = text.into();
        self
    }

    /// Set the handler.
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.handler = Arc::new(Handler::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Long help text, falling back to the summary.
    pub fn help_text(&self) -> &str {
        if self.long_help.is_empty() {
            &self.summary
        } else {
            &self.long_help
        }
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub(crate) fn handler_ref(&self) -> Arc<Handler> {
        Arc::clone(&self.handler)
    }

    /// One-line usage string, e.g. `add <x> <y> [--verbose]`.
    pub fn usage(&self) -> String {
        let mut out = self.name.clone();
        for p in &self.params {
            if p.required {
                out.push_str(&format!(" <{}>", p.name));
            } else {
                out.push_str(&format!(" [--{}]", p.name));
            }
        }
        out
    }
}
