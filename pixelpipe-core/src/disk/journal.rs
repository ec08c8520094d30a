//! Append-only journal of disk cache operations
//!
//! ```text
//! libcore.io.DiskLruCache
//! 1
//! 1
//! 2
//!
//! DIRTY 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! CLEAN 3400330d1dfc7f3f7f4b8d4d803dfcf6 412 38211
//! READ 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! REMOVE 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! ```
//!
//! The five header lines are magic, journal version, application version,
//! value count and a blank line. Each following line records one operation
//! on an entry; `CLEAN` carries the lengths of the metadata and data files.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub(crate) const JOURNAL_FILE: &str = "journal";
pub(crate) const JOURNAL_FILE_TMP: &str = "journal.tmp";
pub(crate) const JOURNAL_FILE_BACKUP: &str = "journal.bkp";

const MAGIC: &str = "libcore.io.DiskLruCache";
const VERSION: &str = "1";
const APP_VERSION: u32 = 1;

/// Files per entry: metadata and data
pub(crate) const VALUE_COUNT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalRecord {
    Clean { key: String, lengths: [u64; VALUE_COUNT] },
    Dirty { key: String },
    Remove { key: String },
    Read { key: String },
}

impl JournalRecord {
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(' ');
        let op = parts.next()?;
        let key = parts.next().filter(|k| !k.is_empty())?.to_string();

        let record = match op {
            "CLEAN" => {
                let mut lengths = [0u64; VALUE_COUNT];
                for length in lengths.iter_mut() {
                    *length = parts.next()?.parse().ok()?;
                }
                JournalRecord::Clean { key, lengths }
            }
            "DIRTY" => JournalRecord::Dirty { key },
            "REMOVE" => JournalRecord::Remove { key },
            "READ" => JournalRecord::Read { key },
            _ => return None,
        };

        match parts.next() {
            Some(_) => None,
            None => Some(record),
        }
    }
}

impl fmt::Display for JournalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalRecord::Clean { key, lengths } => {
                write!(f, "CLEAN {} {} {}", key, lengths[0], lengths[1])
            }
            JournalRecord::Dirty { key } => write!(f, "DIRTY {}", key),
            JournalRecord::Remove { key } => write!(f, "REMOVE {}", key),
            JournalRecord::Read { key } => write!(f, "READ {}", key),
        }
    }
}

/// Parsed body of an existing journal
#[derive(Debug, Default)]
pub(crate) struct JournalContents {
    pub records: Vec<JournalRecord>,
    /// Number of operation lines, including malformed ones
    pub line_count: usize,
    pub malformed_lines: usize,
}

impl JournalContents {
    /// Whether the file should be rewritten before appending to it
    pub fn needs_rebuild(&self) -> bool {
        self.malformed_lines > 0
    }
}

/// Read a journal, failing only when the header is not ours
pub(crate) fn read_journal(path: &Path) -> io::Result<JournalContents> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let expected = [
        MAGIC.to_string(),
        VERSION.to_string(),
        APP_VERSION.to_string(),
        VALUE_COUNT.to_string(),
        String::new(),
    ];
    for expected_line in &expected {
        match lines.next() {
            Some(Ok(line)) if line == *expected_line => {}
            Some(Ok(line)) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected journal header line: {:?}", line),
                ))
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated journal header",
                ))
            }
        }
    }

    let mut contents = JournalContents::default();
    for line in lines {
        contents.line_count += 1;
        // Undecodable bytes count as a malformed line
        match line.ok().as_deref().and_then(JournalRecord::parse) {
            Some(record) => contents.records.push(record),
            None => contents.malformed_lines += 1,
        }
    }

    Ok(contents)
}

/// Appends records to the live journal
pub(crate) struct JournalWriter {
    writer: BufWriter<File>,
}

impl JournalWriter {
    pub(crate) fn open_append(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub(crate) fn append(&mut self, record: &JournalRecord) -> io::Result<()> {
        writeln!(self.writer, "{}", record)?;
        self.writer.flush()
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Write a complete journal (header plus `records`) to `path`
pub(crate) fn write_journal<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a JournalRecord>,
) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", MAGIC)?;
    writeln!(writer, "{}", VERSION)?;
    writeln!(writer, "{}", APP_VERSION)?;
    writeln!(writer, "{}", VALUE_COUNT)?;
    writeln!(writer)?;
    for record in records {
        writeln!(writer, "{}", record)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()
}
