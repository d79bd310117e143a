//! Durable, append-only attendance ledger.
//!
//! A two-column text file with header `Name,Timestamp`. Each `try_record`
//! re-reads the file so rows written by other processes are honoured, and
//! appends a whole row in a single write.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const LEDGER_HEADER: &str = "Name,Timestamp";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unknown ledger scope {0:?} (expected \"lifetime\" or \"daily\")")]
    UnknownScope(String),
}

/// Uniqueness window for ledger rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerScope {
    /// At most one row per name for the whole life of the file.
    #[default]
    Lifetime,
    /// At most one row per name per local calendar day.
    Daily,
}

impl FromStr for LedgerScope {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lifetime" => Ok(LedgerScope::Lifetime),
            "daily" => Ok(LedgerScope::Daily),
            other => Err(LedgerError::UnknownScope(other.to_string())),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    /// Local time, second precision. `None` if the stored value was unreadable.
    pub timestamp: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
    scope: LedgerScope,
}

impl AttendanceLedger {
    /// Open the ledger, creating it (and its directory) with the header if absent.
    pub fn open(path: impl Into<PathBuf>, scope: LedgerScope) -> Result<Self, LedgerError> {
        let path = path.into();
        let io_err = |source: std::io::Error| LedgerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let needs_header = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(io_err(e)),
        };
        if needs_header {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err)?;
            file.write_all(format!("{LEDGER_HEADER}\n").as_bytes())
                .map_err(io_err)?;
            tracing::info!(path = %path.display(), "created attendance ledger");
        }

        Ok(Self { path, scope })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> LedgerScope {
        self.scope
    }

    /// Snapshot of every row currently in the file.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(parse_records(&self.read_raw()?))
    }

    /// Whether `name` already has a row that blocks recording at `at`.
    pub fn has_recorded(&self, name: &str, at: NaiveDateTime) -> Result<bool, LedgerError> {
        Ok(self.blocked(&parse_records(&self.read_raw()?), &clean_name(name), at))
    }

    /// Append `(name, at)` unless the name is already recorded.
    ///
    /// `Ok(true)`: first sighting, row written. `Ok(false)`: already present,
    /// nothing written. `Err`: storage failed and nothing is recorded.
    ///
    /// Line breaks and other control characters in `name` are stored as spaces.
    pub fn try_record(&self, name: &str, at: DateTime<Local>) -> Result<bool, LedgerError> {
        let at = at.naive_local();
        let name = clean_name(name);
        let raw = self.read_raw()?;
        if self.blocked(&parse_records(&raw), &name, at) {
            return Ok(false);
        }

        // A file edited by hand may lack its final newline.
        let lead = if raw.is_empty() || raw.ends_with('\n') { "" } else { "\n" };
        let row = format!("{lead}{},{}\n", escape_field(&name), at.format(TIMESTAMP_FORMAT));
        let io_err = |source: std::io::Error| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(row.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(true)
    }

    fn read_raw(&self) -> Result<String, LedgerError> {
        std::fs::read_to_string(&self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn blocked(&self, records: &[AttendanceRecord], name: &str, at: NaiveDateTime) -> bool {
        records.iter().any(|r| r.name == name && self.blocks(r, at))
    }

    fn blocks(&self, record: &AttendanceRecord, at: NaiveDateTime) -> bool {
        match self.scope {
            LedgerScope::Lifetime => true,
            // A row whose day cannot be read still blocks; never double-record.
            LedgerScope::Daily => record.timestamp.map_or(true, |ts| ts.date() == at.date()),
        }
    }
}

fn parse_records(raw: &str) -> Vec<AttendanceRecord> {
    raw.lines()
        .enumerate()
        .filter(|(i, line)| !(*i == 0 && line.trim() == LEDGER_HEADER))
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let record = parse_row(line);
            if record.timestamp.is_none() {
                tracing::debug!(line = i + 1, "ledger row has no readable timestamp");
            }
            record
        })
        .collect()
}

/// Rows are single lines, so control characters never reach the file.
fn clean_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Quote a field if it contains a separator or quote.
fn escape_field(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split a row into its (possibly quoted) name and the remainder.
fn parse_row(line: &str) -> AttendanceRecord {
    let (name, rest) = if let Some(quoted) = line.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        let mut rest = "";
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    name.push('"');
                    chars.next();
                } else {
                    rest = quoted[i + 1..].strip_prefix(',').unwrap_or("");
                    break;
                }
            } else {
                name.push(c);
            }
        }
        (name, rest)
    } else {
        match line.split_once(',') {
            Some((name, rest)) => (name.to_string(), rest),
            None => (line.to_string(), ""),
        }
    };

    AttendanceRecord {
        name,
        timestamp: NaiveDateTime::parse_from_str(rest.trim(), TIMESTAMP_FORMAT).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn ledger(dir: &tempfile::TempDir, scope: LedgerScope) -> AttendanceLedger {
        AttendanceLedger::open(dir.path().join("attendance.csv"), scope).unwrap()
    }

    #[test]
    fn test_open_creates_header() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        assert_eq!(std::fs::read_to_string(l.path()).unwrap(), "Name,Timestamp\n");
        assert!(l.records().unwrap().is_empty());
    }

    #[test]
    fn test_open_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Name,Timestamp\nANA,2024-05-01 08:00:00\n").unwrap();
        let l = AttendanceLedger::open(&path, LedgerScope::Lifetime).unwrap();
        assert_eq!(l.records().unwrap().len(), 1);
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/attendance.csv");
        AttendanceLedger::open(&path, LedgerScope::Lifetime).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_try_record_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        assert!(l.try_record("ANA", at(2024, 5, 1, 8, 0, 0)).unwrap());
        assert!(!l.try_record("ANA", at(2024, 5, 1, 8, 0, 5)).unwrap());

        let rows = l.records().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "ANA");
    }

    #[test]
    fn test_roundtrip_second_precision() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        let t = at(2024, 12, 31, 23, 59, 58) + chrono::Duration::milliseconds(750);
        l.try_record("BEN", t).unwrap();

        let rows = l.records().unwrap();
        assert_eq!(rows[0].timestamp, Some(at(2024, 12, 31, 23, 59, 58).naive_local()));
        let line = std::fs::read_to_string(l.path()).unwrap();
        assert!(line.ends_with("BEN,2024-12-31 23:59:58\n"));
    }

    #[test]
    fn test_lifetime_scope_spans_days() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        assert!(l.try_record("ANA", at(2024, 5, 1, 8, 0, 0)).unwrap());
        assert!(!l.try_record("ANA", at(2024, 5, 2, 8, 0, 0)).unwrap());
    }

    #[test]
    fn test_daily_scope_allows_next_day() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Daily);
        assert!(l.try_record("ANA", at(2024, 5, 1, 8, 0, 0)).unwrap());
        assert!(!l.try_record("ANA", at(2024, 5, 1, 17, 0, 0)).unwrap());
        assert!(l.try_record("ANA", at(2024, 5, 2, 8, 0, 0)).unwrap());
        assert_eq!(l.records().unwrap().len(), 2);
    }

    #[test]
    fn test_rows_written_by_others_are_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        let mut f = OpenOptions::new().append(true).open(l.path()).unwrap();
        f.write_all(b"CARLA,2024-05-01 07:00:00\n").unwrap();
        assert!(!l.try_record("CARLA", at(2024, 5, 1, 8, 0, 0)).unwrap());
    }

    #[test]
    fn test_names_with_separators_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        let name = "DELA CRUZ, \"JUAN\"";
        assert!(l.try_record(name, at(2024, 5, 1, 8, 0, 0)).unwrap());
        assert!(!l.try_record(name, at(2024, 5, 1, 9, 0, 0)).unwrap());

        let rows = l.records().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, name);
        assert!(rows[0].timestamp.is_some());
    }

    #[test]
    fn test_append_after_missing_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Name,Timestamp\nBEN,2024-05-01 07:00:00").unwrap();
        let l = AttendanceLedger::open(&path, LedgerScope::Lifetime).unwrap();

        assert!(l.try_record("ANA", at(2024, 5, 1, 8, 0, 0)).unwrap());
        assert!(!l.try_record("ANA", at(2024, 5, 1, 8, 0, 10)).unwrap());
        assert!(!l.try_record("BEN", at(2024, 5, 1, 8, 0, 20)).unwrap());

        let rows = l.records().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "BEN");
        assert_eq!(rows[0].timestamp, Some(at(2024, 5, 1, 7, 0, 0).naive_local()));
        assert_eq!(rows[1].name, "ANA");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Name,Timestamp\nBEN,2024-05-01 07:00:00\nANA,2024-05-01 08:00:00\n"
        );
    }

    #[test]
    fn test_line_breaks_in_name_stay_on_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        assert!(l.try_record("DELA\nCRUZ", at(2024, 5, 1, 8, 0, 0)).unwrap());
        assert!(!l.try_record("DELA\nCRUZ", at(2024, 5, 1, 8, 0, 10)).unwrap());
        assert!(l.has_recorded("DELA\nCRUZ", at(2024, 5, 1, 9, 0, 0).naive_local()).unwrap());

        let rows = l.records().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "DELA CRUZ");
        assert!(rows[0].timestamp.is_some());
    }

    #[test]
    fn test_unreadable_timestamp_still_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Daily);
        let mut f = OpenOptions::new().append(true).open(l.path()).unwrap();
        f.write_all(b"ANA,yesterday-ish\n").unwrap();
        assert!(!l.try_record("ANA", at(2024, 5, 1, 8, 0, 0)).unwrap());
        assert_eq!(l.records().unwrap()[0].timestamp, None);
    }

    #[test]
    fn test_missing_file_is_an_error_not_already_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let l = ledger(&dir, LedgerScope::Lifetime);
        std::fs::remove_file(l.path()).unwrap();
        let err = l.try_record("ANA", at(2024, 5, 1, 8, 0, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::Io { .. }));
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!("Daily".parse::<LedgerScope>().unwrap(), LedgerScope::Daily);
        assert_eq!(" lifetime ".parse::<LedgerScope>().unwrap(), LedgerScope::Lifetime);
        assert!("weekly".parse::<LedgerScope>().is_err());
    }
}
