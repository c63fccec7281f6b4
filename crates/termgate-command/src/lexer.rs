//! Tokenizer for raw input lines.
//!
//! Whitespace separates tokens; single and double quotes group; a
//! backslash escapes the following character, inside or outside quotes.
//! A `#` at the start of a token (outside quotes) comments out the rest of
//! the line. An unterminated quote is a syntax error pointing at the
//! opening quote's byte offset.

use termgate_core::{Error, Result};

/// One token with the byte offset where it started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub offset: usize,
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Split a line into tokens.
///
/// Empty, whitespace-only, and comment-only lines produce an empty vector.
pub fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // offset of the first character of the token being built
    let mut start: Option<usize> = None;
    // offset of the opening quote while inside one
    let mut quote: Option<(char, usize)> = None;
    let mut escape_at: Option<usize> = None;

    for (i, ch) in line.char_indices() {
        if escape_at.is_some() {
            if start.is_none() {
                start = Some(escape_at.unwrap());
            }
            current.push(ch);
            escape_at = None;
            continue;
        }
        match ch {
            '\\' => {
                escape_at = Some(i);
            }
            '\'' | '"' => match quote {
                Some((q, _)) if q == ch => quote = None,
                Some(_) => current.push(ch),
                None => {
                    quote = Some((ch, i));
                    if start.is_none() {
                        start = Some(i);
                    }
                }
            },
            c if c.is_whitespace() && quote.is_none() => {
                if let Some(offset) = start.take() {
                    tokens.push(Token {
                        text: std::mem::take(&mut current),
                        offset,
                    });
                }
            }
            '#' if quote.is_none() && start.is_none() => {
                // comment: rest of the line is ignored
                return Ok(tokens);
            }
            _ => {
                if start.is_none() {
                    start = Some(i);
                }
                current.push(ch);
            }
        }
    }

    if let Some((q, offset)) = quote {
        let which = if q == '\'' { "single" } else { "double" };
        return Err(Error::Syntax {
            offset,
            message: format!("unterminated {which} quote"),
        });
    }
    if let Some(offset) = escape_at {
        return Err(Error::Syntax {
            offset,
            message: "dangling escape at end of line".to_string(),
        });
    }
    if let Some(offset) = start {
        tokens.push(Token {
            text: current,
            offset,
        });
    }
    Ok(tokens)
}
