//! Terminal boundary: line I/O over a byte stream, plus inline markup.
//!
//! The core emits plain text with a small markup vocabulary and reads back
//! completed lines; cursor movement, history, and completion rendering
//! belong to the client-side line editor. [`Terminal`] is generic over any
//! full-duplex byte stream, which is the seam a secure-transport
//! integration plugs into — the core never sees the handshake.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};

use termgate_core::Result;

/// Inline markup tags and their ANSI SGR codes.
///
/// `<error>`, `<warn>`, and `<info>` are the semantic styles; the rest are
/// plain presentation. Unknown tags pass through literally.
const TAGS: &[(&str, &str)] = &[
    ("b", "1"),
    ("i", "3"),
    ("red", "31"),
    ("green", "32"),
    ("yellow", "33"),
    ("grey", "90"),
    ("error", "31"),
    ("warn", "33"),
    ("info", "90"),
];

const RESET: &str = "\x1b[0m";

/// Render markup to ANSI escapes, or strip the tags when color is off.
pub fn render(text: &str, color: bool) -> String {
    let mut out = text.to_string();
    for (tag, code) in TAGS {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        if color {
            out = out.replace(&open, &format!("\x1b[{code}m"));
            out = out.replace(&close, RESET);
        } else {
            out = out.replace(&open, "");
            out = out.replace(&close, "");
        }
    }
    out
}

/// Line-oriented terminal over a full-duplex byte stream.
pub struct Terminal<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    color: bool,
    size: (u16, u16),
    echo: bool,
}

impl<S: AsyncRead + AsyncWrite> Terminal<S> {
    /// Wrap a stream. `color` controls whether markup renders to ANSI or
    /// is stripped.
    pub fn new(stream: S, color: bool) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            color,
            size: (80, 24),
            echo: true,
        }
    }

    /// Read one completed line, without the trailing newline.
    ///
    /// Returns `Ok(None)` when the peer closed the connection.
    pub async fn read_line(&mut self) -> Result<Option<String>>
    where
        S: Unpin,
    {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Write markup text as-is (no trailing newline), flushed.
    pub async fn write(&mut self, markup: &str) -> Result<()>
    where
        S: Unpin,
    {
        let rendered = render(markup, self.color);
        self.writer.write_all(rendered.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write markup text followed by a line ending, flushed.
    pub async fn write_line(&mut self, markup: &str) -> Result<()>
    where
        S: Unpin,
    {
        let mut rendered = render(markup, self.color);
        rendered.push_str("\r\n");
        self.writer.write_all(rendered.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write side.
    pub async fn close(&mut self) -> Result<()>
    where
        S: Unpin,
    {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Out-of-band window size sink for transports that signal resizes.
    pub fn set_size(&mut self, cols: u16, rows: u16) {
        self.size = (cols, rows);
    }

    /// Current (cols, rows) as last signalled.
    pub fn size(&self) -> (u16, u16) {
        self.size
    }

    /// Hint that client-side echo should be suppressed (password entry).
    /// A plain byte stream carries no channel to tell the client, so this
    /// records the preference for transports that can.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Whether client-side echo is currently wanted.
    pub fn echo(&self) -> bool {
        self.echo
    }
}

/// Marker bound for streams a session can be spawned on.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
impl<S: AsyncRead + AsyncWrite + Send + Unpin + 'static> SessionStream for S {}
