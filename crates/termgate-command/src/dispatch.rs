//! Line dispatcher: resolve, bind, invoke.
//!
//! Transforms one raw line of input into a handler invocation against the
//! shared registry. Parsing and argument errors never escape as session
//! failures; they are rendered into a single human-readable line for the
//! offending session.

use std::sync::Arc;

use tracing::debug;

use termgate_core::config::DispatchSettings;
use termgate_core::{Error, Result};

use crate::command::{BoundArgs, CallContext, Command, Invocation, Reply};
use crate::lexer::{tokenize, Token};
use crate::registry::{CommandRegistry, Entry};
use crate::schema::{coerce, Param, ParamType, Value};

/// Parses lines and invokes registered handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(registry: Arc<CommandRegistry>, settings: DispatchSettings) -> Self {
        Self { registry, settings }
    }

    /// The shared registry. CommandRegistry is read-only at this point, so
    /// concurrent lookups from many sessions need no locking.
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Completion candidates for a partial line, built-ins included at top
    /// level.
    pub fn complete(&self, line_prefix: &str) -> Vec<String> {
        let mut candidates = self.registry.complete(line_prefix);
        if !line_prefix.contains(char::is_whitespace) {
            for builtin in ["exit", "help"] {
                if builtin.starts_with(line_prefix.trim()) {
                    candidates.push(builtin.to_string());
                }
            }
            candidates.sort();
        }
        candidates
    }

    /// Dispatch one raw input line.
    ///
    /// `Ok(None)` means the line was empty, whitespace, or a comment — a
    /// no-op, no error, the caller just re-prompts. Handler failures come
    /// back as [`Error::Handler`]; they never tear down the session.
    pub async fn dispatch(&self, line: &str, context: CallContext) -> Result<Option<Reply>> {
        let tokens = tokenize(line)?;
        let Some(first) = tokens.first() else {
            return Ok(None);
        };

        if self.is_builtin(first, "exit") {
            return Ok(Some(Reply::close("Closing connection.")));
        }
        if self.is_builtin(first, "help") {
            return self.help(&tokens[1..]).map(Some);
        }

        let (command, consumed) = self
            .registry
            .resolve(&tokens, self.settings.max_suggestion_distance)?;
        let args = bind(&command, &tokens[consumed..])?;
        debug!(command = command.name(), session = %context.session, "dispatching");

        let invocation = Invocation {
            args,
            raw_line: line.to_string(),
            context,
        };
        let reply = command
            .handler_ref()
            .call(invocation)
            .await
            .map_err(Error::Handler)?;
        Ok(Some(reply))
    }

    fn is_builtin(&self, token: &Token, name: &str) -> bool {
        if self.settings.case_insensitive {
            token.text.eq_ignore_ascii_case(name)
        } else {
            token.text == name
        }
    }

    /// The `help` pseudo-command: list top-level commands, or show full
    /// help for one command or group.
    fn help(&self, path: &[Token]) -> Result<Reply> {
        if path.is_empty() {
            return Ok(Reply::text(self.list_scope(&self.registry, "Available commands")));
        }

        let mut scope: &CommandRegistry = &self.registry;
        for (i, token) in path.iter().enumerate() {
            match scope.get(&token.text) {
                Some(Entry::Command(cmd)) if i == path.len() - 1 => {
                    return Ok(Reply::text(command_help(cmd)));
                }
                Some(Entry::Command(_)) | None => {
                    let suggestion = self
                        .registry
                        .complete(&token.text)
                        .into_iter()
                        .next();
                    return Err(Error::UnknownCommand {
                        name: token.text.clone(),
                        suggestion,
                    });
                }
                Some(Entry::Group(group)) => {
                    if i == path.len() - 1 {
                        let title = format!("Commands in '{}'", token.text);
                        return Ok(Reply::text(self.list_scope(group, &title)));
                    }
                    scope = group;
                }
            }
        }
        unreachable!("help path loop always returns");
    }

    fn list_scope(&self, scope: &CommandRegistry, title: &str) -> String {
        let mut lines = vec![format!("<b>{title}:</b>")];
        for (name, entry) in scope.iter() {
            match entry {
                Entry::Command(cmd) => lines.push(format!("  {:<12} {}", name, cmd.summary())),
                Entry::Group(_) => lines.push(format!("  {:<12} (command group)", name)),
            }
        }
        if std::ptr::eq(scope, self.registry.as_ref()) {
            lines.push(format!("  {:<12} show help for a command", "help"));
            lines.push(format!("  {:<12} close this connection", "exit"));
        }
        lines.join("\n")
    }

    /// Render an error as the single line written to the offending
    /// session.
    pub fn render_error(&self, error: &Error) -> String {
        match error {
            Error::UnknownCommand {
                suggestion: Some(s),
                ..
            } => {
                format!("<error>{error}</error> Did you mean '<b>{s}</b>'?")
            }
            Error::Argument { .. } | Error::MissingArgument { .. } | Error::UnknownArgument { .. } => {
                format!("<error>{error}</error> See 'help <command>' for usage.")
            }
            _ => format!("<error>{error}</error>"),
        }
    }
}

/// Full help text for one command.
fn command_help(cmd: &Command) -> String {
    let mut out = format!("<b>{}</b> - {}\nUsage: {}", cmd.name(), cmd.help_text(), cmd.usage());
    if !cmd.params().is_empty() {
        out.push_str("\nParameters:");
        for p in cmd.params() {
            let required = if p.required { "required" } else { "optional" };
            out.push_str(&format!(
                "\n  {:<12} {} ({}){}{}",
                p.name,
                p.ty.expected_name(),
                required,
                if p.help.is_empty() { "" } else { " - " },
                p.help,
            ));
        }
    }
    out
}

/// Bind tokens to the command's parameter schema.
///
/// Explicit `--flag` bindings are applied first and always win; positional
/// tokens then fill the still-unbound parameters in declared order, so
/// binding is deterministic regardless of where flags appear in the line.
/// A `List` parameter accumulates every remaining positional token (and
/// repeated flag occurrences).
fn bind(command: &Command, tokens: &[Token]) -> Result<BoundArgs> {
    let params = command.params();
    let mut args = BoundArgs::default();
    let mut positional: Vec<&Token> = Vec::new();

    // first pass: flags
    let mut i = 0;
    while i < tokens.len() {
        let text = &tokens[i].text;
        let flag_name = match text.strip_prefix("--") {
            Some(name) if !name.is_empty() => name,
            _ => {
                positional.push(&tokens[i]);
                i += 1;
                continue;
            }
        };
        let param = find_param(params, flag_name).ok_or_else(|| Error::UnknownArgument {
            flag: text.clone(),
        })?;
        match &param.ty {
            // a bare boolean flag means true
            ParamType::Bool => args.insert(&param.name, Value::Bool(true)),
            ParamType::List(elem) => {
                let value = flag_value(tokens, &mut i, param)?;
                let coerced = coerce(&param.name, value, elem)?;
                args.append_list(&param.name, vec![coerced]);
            }
            ty => {
                let value = flag_value(tokens, &mut i, param)?;
                args.insert(&param.name, coerce(&param.name, value, ty)?);
            }
        }
        i += 1;
    }

    // second pass: positional fill in declared order, skipping
    // flag-bound parameters
    let mut next = 0;
    for token in positional {
        let param = loop {
            let Some(param) = params.get(next) else {
                return Err(Error::UnknownArgument {
                    flag: token.text.clone(),
                });
            };
            let is_list = matches!(param.ty, ParamType::List(_));
            if args.contains(&param.name) && !is_list {
                next += 1;
                continue;
            }
            break param;
        };
        match &param.ty {
            ParamType::List(elem) => {
                // a list swallows the rest of the positional tokens
                let coerced = coerce(&param.name, &token.text, elem)?;
                args.append_list(&param.name, vec![coerced]);
            }
            ty => {
                args.insert(&param.name, coerce(&param.name, &token.text, ty)?);
                next += 1;
            }
        }
    }

    // defaults, then required check in declared order
    for param in params {
        if !args.contains(&param.name) {
            if let Some(default) = &param.default {
                args.insert(&param.name, default.clone());
            } else if param.required {
                return Err(Error::MissingArgument {
                    parameter: param.name.clone(),
                });
            }
        }
    }
    Ok(args)
}

fn find_param<'p>(params: &'p [Param], name: &str) -> Option<&'p Param> {
    params.iter().find(|p| p.name == name)
}

fn flag_value<'t>(tokens: &'t [Token], i: &mut usize, param: &Param) -> Result<&'t str> {
    *i += 1;
    tokens
        .get(*i)
        .map(|t| t.text.as_str())
        .ok_or_else(|| Error::MissingArgument {
            parameter: param.name.clone(),
        })
}
