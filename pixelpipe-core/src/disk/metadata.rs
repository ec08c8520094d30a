//! Response metadata persisted next to cached bytes
//!
//! Wire format (UTF-8, `\n` line endings):
//!
//! ```text
//! <sent_at_millis>
//! <received_at_millis>
//! <header_count>
//! <name>: <value>        (header_count lines)
//! ```

use crate::headers::Headers;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponseMetadata {
    /// When the request that produced this response was sent
    pub sent_at_millis: i64,
    /// When the response was received
    pub received_at_millis: i64,
    pub headers: Headers,
}

impl CachedResponseMetadata {
    pub fn new(sent_at_millis: i64, received_at_millis: i64, headers: Headers) -> Self {
        Self {
            sent_at_millis,
            received_at_millis,
            headers,
        }
    }

    /// `Content-Type` without parameters
    pub fn mime_type(&self) -> Option<&str> {
        self.headers
            .get("Content-Type")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|mime| !mime.is_empty())
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.sent_at_millis)?;
        writeln!(out, "{}", self.received_at_millis)?;
        writeln!(out, "{}", self.headers.len())?;
        for (name, value) in self.headers.iter() {
            writeln!(out, "{}: {}", name, value)?;
        }
        Ok(())
    }

    pub fn read_from<R: BufRead>(input: R) -> io::Result<Self> {
        let mut lines = input.lines();
        let mut next_line = |what: &str| -> io::Result<String> {
            lines
                .next()
                .unwrap_or_else(|| Err(invalid(format!("missing {}", what))))
        };

        let sent_at_millis = parse_number(&next_line("sent timestamp")?)?;
        let received_at_millis = parse_number(&next_line("received timestamp")?)?;
        let count: usize = next_line("header count")?
            .trim()
            .parse()
            .map_err(|_| invalid("bad header count".to_string()))?;

        let mut headers = Headers::new();
        for _ in 0..count {
            let line = next_line("header line")?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| invalid(format!("bad header line: {}", line)))?;
            headers.add(name.trim(), value.strip_prefix(' ').unwrap_or(value));
        }

        Ok(Self {
            sent_at_millis,
            received_at_millis,
            headers,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        Self::read_from(bytes)
    }
}

fn parse_number(line: &str) -> io::Result<i64> {
    line.trim()
        .parse()
        .map_err(|_| invalid(format!("bad timestamp: {}", line)))
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
