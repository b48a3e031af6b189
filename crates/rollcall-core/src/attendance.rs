//! Append-only attendance log.
//!
//! A name is appended only if the log's `Name` column does not already hold
//! it. The check reads the file and the append follows it without a lock, so
//! two processes writing the same log can both append the same name. Only a
//! single writer per log is supported.

use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOG_HEADER: [&str; 3] = ["Name", "Student Id", "Timestamp"];
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Identifier recorded for a recognized face with no roster entry.
pub const UNKNOWN_STUDENT_ID: &str = "Unknown";

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("attendance log {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Result of a [`AttendanceLog::mark`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marked {
    Recorded,
    AlreadyPresent,
}

pub struct AttendanceLog {
    path: PathBuf,
    /// Names already confirmed present in the log during this run.
    seen: HashSet<String>,
}

impl AttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `name` with the current local time unless the log already has it.
    pub fn mark(&mut self, name: &str, student_id: &str) -> Result<Marked, AttendanceError> {
        self.mark_at(name, student_id, Local::now().naive_local())
    }

    /// Record `name` at `at` unless the log already has it.
    ///
    /// Creates the log with its header row if it does not exist.
    pub fn mark_at(
        &mut self,
        name: &str,
        student_id: &str,
        at: NaiveDateTime,
    ) -> Result<Marked, AttendanceError> {
        if self.seen.contains(name) {
            return Ok(Marked::AlreadyPresent);
        }

        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        let row = [name, student_id, timestamp.as_str()];

        let mut file = match OpenOptions::new().read(true).append(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "attendance log not found, creating it");
                let file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&self.path)
                    .map_err(|e| self.io_err(e))?;
                self.write_rows(file, &[&LOG_HEADER, &row])?;
                self.record(name, student_id, &timestamp);
                return Ok(Marked::Recorded);
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| self.io_err(e))?;

        if contents.trim().is_empty() {
            self.write_rows(file, &[&LOG_HEADER, &row])?;
        } else {
            if logged_names(&contents).map_err(|e| self.csv_err(e))?.contains(name) {
                self.seen.insert(name.to_string());
                return Ok(Marked::AlreadyPresent);
            }
            if !contents.ends_with('\n') {
                file.write_all(b"\n").map_err(|e| self.io_err(e))?;
            }
            self.write_rows(file, &[&row])?;
        }

        self.record(name, student_id, &timestamp);
        Ok(Marked::Recorded)
    }

    fn record(&mut self, name: &str, student_id: &str, timestamp: &str) {
        tracing::info!(name, student_id, timestamp, "attendance recorded");
        self.seen.insert(name.to_string());
    }

    fn write_rows(&self, file: File, rows: &[&[&str; 3]]) -> Result<(), AttendanceError> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        for row in rows {
            writer.write_record(row.iter()).map_err(|e| self.csv_err(e))?;
        }
        writer.flush().map_err(|e| self.io_err(e))
    }

    fn io_err(&self, source: std::io::Error) -> AttendanceError {
        AttendanceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> AttendanceError {
        AttendanceError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

/// Values of the first column of every row. Older logs may lack a header,
/// so the first row is read as data too.
fn logged_names(contents: &str) -> Result<HashSet<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(contents.as_bytes());

    let mut names = HashSet::new();
    for record in reader.records() {
        if let Some(name) = record?.get(0) {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}
