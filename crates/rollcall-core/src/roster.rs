//! Class roster: `Name,Student Id,Branch,...` CSV keyed by normalized name.

use crate::names::normalize_name;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const NAME_COLUMN: &str = "Name";
pub const STUDENT_ID_COLUMN: &str = "Student Id";
pub const BRANCH_COLUMN: &str = "Branch";

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("roster {} is missing required column {column:?}", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("failed to read roster {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One roster row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRecord {
    /// Name as written in the roster.
    pub name: String,
    pub student_id: String,
    pub branch: String,
    /// Any further columns, in header order.
    pub extra: Vec<(String, String)>,
}

impl RosterRecord {
    /// Banner text shown for a recognized student.
    pub fn display_text(&self) -> String {
        format!(
            "ID: {}, Name: {}, Branch: {}",
            self.student_id, self.name, self.branch
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    records: HashMap<String, RosterRecord>,
}

struct Columns {
    name: usize,
    student_id: usize,
    branch: usize,
}

impl Roster {
    /// Load a roster CSV. The header row must contain `Name`, `Student Id` and `Branch`.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        if !path.is_file() {
            return Err(RosterError::NotFound(path.to_path_buf()));
        }

        let csv_err = |source| RosterError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = reader.headers().map_err(csv_err)?.clone();
        let column = |wanted: &'static str| {
            headers
                .iter()
                .position(|h| h == wanted)
                .ok_or_else(|| RosterError::MissingColumn {
                    path: path.to_path_buf(),
                    column: wanted,
                })
        };
        let columns = Columns {
            name: column(NAME_COLUMN)?,
            student_id: column(STUDENT_ID_COLUMN)?,
            branch: column(BRANCH_COLUMN)?,
        };

        let mut roster = Roster::default();
        for (line, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(path = %path.display(), row = line + 1, error = %e, "skipping malformed roster row");
                    continue;
                }
            };

            let field = |idx: usize| row.get(idx).unwrap_or_default().to_string();
            let extra = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| ![columns.name, columns.student_id, columns.branch].contains(i))
                .map(|(i, h)| (h.to_string(), field(i)))
                .collect();

            roster.insert(RosterRecord {
                name: field(columns.name),
                student_id: field(columns.student_id),
                branch: field(columns.branch),
                extra,
            });
        }

        tracing::info!(path = %path.display(), records = roster.len(), "loaded roster");
        Ok(roster)
    }

    /// Insert a record under its normalized name, replacing any earlier one.
    pub fn insert(&mut self, record: RosterRecord) {
        let key = normalize_name(&record.name);
        if key.is_empty() {
            tracing::warn!(student_id = %record.student_id, "skipping roster row with empty name");
            return;
        }
        if let Some(previous) = self.records.insert(key, record) {
            tracing::warn!(name = %previous.name, "duplicate roster name, keeping the later row");
        }
    }

    /// Case- and whitespace-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&RosterRecord> {
        self.records.get(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
