//! Command registry: name → descriptor mapping with nested groups.
//!
//! Built once at startup from registration calls, then shared read-only
//! across sessions (`Arc<CommandRegistry>`). Lookups walk the longest
//! known group prefix, then resolve the remainder inside that scope.
//! Completion candidates come back in lexical order straight from the
//! `BTreeMap`.

use std::collections::BTreeMap;
use std::sync::Arc;

use termgate_core::{Error, Result};

use crate::command::Command;
use crate::lexer::Token;

/// Names reserved for dispatcher built-ins; host commands may not shadow
/// them.
pub const RESERVED_NAMES: &[&str] = &["help", "exit"];

/// One registry slot: a leaf command or a nested group.
#[derive(Debug)]
pub enum Entry {
    Command(Arc<Command>),
    Group(CommandRegistry),
}

/// Mapping from command name to descriptor, with nested sub-registries
/// for command groups.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    entries: BTreeMap<String, Entry>,
    case_insensitive: bool,
}

impl CommandRegistry {
    /// New empty registry with case-sensitive name matching.
    pub fn new() -> Self {
        Self::default()
    }

    /// New empty registry folding names to lowercase on insert and lookup.
    pub fn case_insensitive() -> Self {
        Self::with_case_folding(true)
    }

    /// New empty registry with the folding mode given explicitly, so a
    /// host can pass its `DispatchSettings::case_insensitive` straight
    /// through and registry lookups agree with the dispatcher built-ins.
    pub fn with_case_folding(folded: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            case_insensitive: folded,
        }
    }

    fn key(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    /// Register a command in this scope.
    ///
    /// Fails with [`Error::DuplicateCommand`] if the name is already
    /// taken (the original entry is left intact) or reserved for a
    /// built-in.
    pub fn register(&mut self, command: Command) -> Result<()> {
        let key = self.key(command.name());
        if RESERVED_NAMES.contains(&key.as_str()) {
            return Err(Error::DuplicateCommand(format!(
                "{key} (reserved built-in)"
            )));
        }
        if self.entries.contains_key(&key) {
            return Err(Error::DuplicateCommand(key));
        }
        self.entries.insert(key, Entry::Command(Arc::new(command)));
        Ok(())
    }

    /// Get or create a nested group scope.
    ///
    /// Fails with [`Error::DuplicateCommand`] if the name is taken by a
    /// leaf command; an existing group of the same name is returned so a
    /// tree can be built incrementally.
    pub fn register_group(&mut self, name: &str) -> Result<&mut CommandRegistry> {
        let key = self.key(name);
        if RESERVED_NAMES.contains(&key.as_str()) {
            return Err(Error::DuplicateCommand(format!(
                "{key} (reserved built-in)"
            )));
        }
        let case_insensitive = self.case_insensitive;
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            Entry::Group(CommandRegistry {
                entries: BTreeMap::new(),
                case_insensitive,
            })
        });
        match entry {
            Entry::Group(group) => Ok(group),
            Entry::Command(_) => Err(Error::DuplicateCommand(key)),
        }
    }

    /// Look up an entry by name in this scope only.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(&self.key(name))
    }

    /// All names registered in this scope, lexically sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Entries in this scope in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether this scope has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve leading tokens to a command descriptor.
    ///
    /// Returns the descriptor and the number of tokens consumed by the
    /// command path. Resolution matches the longest known group prefix,
    /// then the command inside it; an unmatched remainder yields
    /// [`Error::UnknownCommand`] naming the offending token, with a
    /// nearest-match suggestion from the failing scope when one is within
    /// `max_suggestion_distance`.
    pub fn resolve(
        &self,
        tokens: &[Token],
        max_suggestion_distance: usize,
    ) -> Result<(Arc<Command>, usize)> {
        let mut scope = self;
        let mut consumed = 0;
        loop {
            let Some(token) = tokens.get(consumed) else {
                // ran out of tokens inside a group: the group name itself
                // is the offending token
                let name = tokens
                    .get(consumed.wrapping_sub(1))
                    .map(|t| t.text.clone())
                    .unwrap_or_default();
                return Err(Error::UnknownCommand {
                    name,
                    suggestion: None,
                });
            };
            match scope.get(&token.text) {
                Some(Entry::Command(cmd)) => return Ok((Arc::clone(cmd), consumed + 1)),
                Some(Entry::Group(group)) => {
                    scope = group;
                    consumed += 1;
                }
                None => {
                    let name = scope.key(&token.text);
                    let suggestion = scope.suggest(&name, max_suggestion_distance);
                    return Err(Error::UnknownCommand {
                        name: token.text.clone(),
                        suggestion,
                    });
                }
            }
        }
    }

    /// Ordered completion candidates for a partial input line.
    ///
    /// Whole words walk group scopes like resolution does; the trailing
    /// partial word (empty if the line ends in whitespace) is prefix
    /// matched in the final scope. Returns an empty vector, never an
    /// error, when nothing matches.
    pub fn complete(&self, line_prefix: &str) -> Vec<String> {
        let mut words: Vec<&str> = line_prefix.split_whitespace().collect();
        let partial = if line_prefix.ends_with(char::is_whitespace) || words.is_empty() {
            String::new()
        } else {
            self.key(words.pop().unwrap_or(""))
        };

        let mut scope = self;
        for word in words {
            match scope.get(word) {
                Some(Entry::Group(group)) => scope = group,
                // completed words that are not a group have nothing below
                _ => return Vec::new(),
            }
        }
        scope
            .entries
            .keys()
            .filter(|name| name.starts_with(&partial))
            .cloned()
            .collect()
    }

    /// Nearest registered name within the distance bound, ties broken
    /// lexically.
    fn suggest(&self, name: &str, max_distance: usize) -> Option<String> {
        let mut best: Option<(usize, &String)> = None;
        for candidate in self.entries.keys() {
            let dist = levenshtein(name, candidate);
            if dist <= max_distance && best.map_or(true, |(d, _)| dist < d) {
                best = Some((dist, candidate));
            }
        }
        best.map(|(_, n)| n.clone())
    }
}

/// Levenshtein distance with a rolling row.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    let mut prev_row: Vec<usize> = (0..=n).collect();
    let mut curr_row = vec![0usize; n + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[n]
}
