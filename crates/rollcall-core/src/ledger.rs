//! Per-day attendance ledger.
//!
//! One CSV file per calendar day (`attendance_<YYYY-MM-DD>.csv`) with the header
//! `Name,Date,Time`. Records are only ever appended: every append copies the
//! current file byte for byte into a synced temporary file, adds the new row and
//! atomically renames it into place. The in-memory marked set is updated only
//! after the rename succeeded, so a crash or write failure can lose the newest
//! record, never duplicate, tear or reformat one.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const HEADER: [&str; 3] = ["Name", "Date", "Time"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("ledger csv ({path}): {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("ledger {path} has header {found:?}, expected Name,Date,Time")]
    BadHeader { path: String, found: Vec<String> },
    #[error("ledger not found: {0}")]
    NotFound(String),
    #[error("timestamp {at} is outside ledger day {day}")]
    DayMismatch { day: NaiveDate, at: NaiveDateTime },
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Time")]
    pub time: NaiveTime,
}

/// Result of [`AttendanceLedger::mark_present`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded(AttendanceRecord),
    AlreadyMarked,
}

/// Durable attendance records for one calendar day plus the set of names already marked.
#[derive(Debug)]
pub struct AttendanceLedger {
    dir: PathBuf,
    path: PathBuf,
    day: NaiveDate,
    records: Vec<AttendanceRecord>,
    marked: HashSet<String>,
}

impl AttendanceLedger {
    /// Ledger file name for `day`.
    pub fn file_name(day: NaiveDate) -> String {
        format!("attendance_{}.csv", day.format("%Y-%m-%d"))
    }

    /// Open the ledger for `day` in `dir`, creating it with a header if absent.
    ///
    /// An existing file is loaded as-is and never rewritten by opening it.
    pub fn open(dir: &Path, day: NaiveDate) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        let path = dir.join(Self::file_name(day));

        if path.exists() {
            let ledger = Self::read(dir, &path, day)?;
            tracing::info!(
                path = %path.display(),
                records = ledger.records.len(),
                "resumed existing ledger"
            );
            return Ok(ledger);
        }

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_err(dir, e))?;
        write_rows(tmp.as_file_mut(), true, &[]).map_err(|e| e.at(&path))?;
        tmp.as_file().sync_all().map_err(|e| io_err(&path, e))?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {}
            // Lost a creation race: somebody else's header is just as good.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Self::read(dir, &path, day);
            }
            Err(e) => return Err(io_err(&path, e.error)),
        }
        sync_dir(dir);

        tracing::info!(path = %path.display(), "created ledger");
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            day,
            records: Vec::new(),
            marked: HashSet::new(),
        })
    }

    /// Load an existing ledger without creating anything.
    pub fn load(dir: &Path, day: NaiveDate) -> Result<Self, LedgerError> {
        let path = dir.join(Self::file_name(day));
        if !path.exists() {
            return Err(LedgerError::NotFound(path.display().to_string()));
        }
        Self::read(dir, &path, day)
    }

    fn read(dir: &Path, path: &Path, day: NaiveDate) -> Result<Self, LedgerError> {
        let csv_err = |source| LedgerError::Csv { path: path.display().to_string(), source };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let found: Vec<String> = reader.headers().map_err(csv_err)?.iter().map(String::from).collect();
        if found != HEADER {
            return Err(LedgerError::BadHeader { path: path.display().to_string(), found });
        }

        let mut records = Vec::new();
        let mut marked = HashSet::new();
        for row in reader.deserialize::<AttendanceRecord>() {
            let record = row.map_err(csv_err)?;
            if record.date == day {
                marked.insert(record.name.clone());
            } else {
                // Kept in the file, but it does not count as attendance for `day`.
                tracing::warn!(
                    path = %path.display(),
                    name = %record.name,
                    date = %record.date,
                    "ledger row dated outside its day"
                );
            }
            records.push(record);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            path: path.to_path_buf(),
            day,
            records,
            marked,
        })
    }

    /// Record `name` as present at `at`, unless already recorded today.
    ///
    /// The file is durably extended before `name` joins the marked set, so on
    /// error the name stays unmarked and a later call retries the append.
    pub fn mark_present(
        &mut self,
        name: &str,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome, LedgerError> {
        if at.date() != self.day {
            return Err(LedgerError::DayMismatch { day: self.day, at });
        }
        if self.marked.contains(name) {
            return Ok(MarkOutcome::AlreadyMarked);
        }

        let time = at.time();
        let record = AttendanceRecord {
            name: name.to_string(),
            date: self.day,
            time: time.with_nanosecond(0).unwrap_or(time),
        };

        self.append(&record)?;

        self.marked.insert(record.name.clone());
        self.records.push(record.clone());
        Ok(MarkOutcome::Recorded(record))
    }

    fn append(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let written = match std::fs::read(&self.path) {
            Ok(mut existing) => {
                if !existing.is_empty() && !existing.ends_with(b"\n") {
                    existing.push(b'\n');
                }
                tmp.write_all(&existing).map_err(|e| io_err(&self.path, e))?;
                write_rows(tmp.as_file_mut(), false, std::slice::from_ref(record))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.path.display(),
                    records = self.records.len(),
                    "ledger file disappeared; rewriting it from memory"
                );
                let mut rows = self.records.clone();
                rows.push(record.clone());
                write_rows(tmp.as_file_mut(), true, &rows)
            }
            Err(e) => return Err(io_err(&self.path, e)),
        };
        written.map_err(|e| e.at(&self.path))?;

        tmp.as_file().sync_all().map_err(|e| io_err(&self.path, e))?;
        tmp.persist(&self.path).map_err(|e| io_err(&self.path, e.error))?;
        sync_dir(&self.dir);
        Ok(())
    }

    /// The calendar day this ledger is scoped to.
    pub fn current_day(&self) -> NaiveDate {
        self.day
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.marked.contains(name)
    }

    pub fn marked_count(&self) -> usize {
        self.marked.len()
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

enum WriteError {
    Io(io::Error),
    Csv(csv::Error),
}

impl WriteError {
    fn at(self, path: &Path) -> LedgerError {
        match self {
            WriteError::Io(source) => io_err(path, source),
            WriteError::Csv(source) => LedgerError::Csv { path: path.display().to_string(), source },
        }
    }
}

fn write_rows(file: &mut File, header: bool, records: &[AttendanceRecord]) -> Result<(), WriteError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if header {
        writer.write_record(HEADER).map_err(WriteError::Csv)?;
    }
    for record in records {
        writer.serialize(record).map_err(WriteError::Csv)?;
    }
    writer.flush().map_err(WriteError::Io)
}

fn io_err(path: &Path, source: io::Error) -> LedgerError {
    LedgerError::Io { path: path.display().to_string(), source }
}

/// Make a rename durable. Not every filesystem supports syncing a directory.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory sync skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, m, s).unwrap()
    }

    fn file_text(ledger: &AttendanceLedger) -> String {
        std::fs::read_to_string(ledger.path()).unwrap()
    }

    #[test]
    fn test_file_name() {
        assert_eq!(AttendanceLedger::file_name(day(7)), "attendance_2026-03-07.csv");
    }

    #[test]
    fn test_open_creates_header_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::open(dir.path(), day(1)).unwrap();
        assert_eq!(ledger.current_day(), day(1));
        assert!(ledger.records().is_empty());
        assert_eq!(ledger.marked_count(), 0);
        assert_eq!(file_text(&ledger), "Name,Date,Time\n");
    }

    #[test]
    fn test_open_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs").join("attendance");
        let ledger = AttendanceLedger::open(&nested, day(1)).unwrap();
        assert!(ledger.path().starts_with(&nested));
        assert!(ledger.path().exists());
    }

    #[test]
    fn test_mark_present_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path(), day(1)).unwrap();

        let first = ledger.mark_present("alice", at(1, 9, 15, 2)).unwrap();
        let MarkOutcome::Recorded(record) = first else {
            panic!("expected a new record, got {first:?}");
        };
        assert_eq!(record.time, NaiveTime::from_hms_opt(9, 15, 2).unwrap());

        for minute in 16..20 {
            assert_eq!(
                ledger.mark_present("alice", at(1, 9, minute, 0)).unwrap(),
                MarkOutcome::AlreadyMarked
            );
        }

        assert_eq!(ledger.records().len(), 1);
        assert!(ledger.is_marked("alice"));
        assert_eq!(file_text(&ledger), "Name,Date,Time\nalice,2026-03-01,09:15:02\n");
    }

    #[test]
    fn test_time_is_truncated_to_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path(), day(1)).unwrap();
        let ts = day(1).and_hms_milli_opt(8, 0, 1, 750).unwrap();
        ledger.mark_present("bob", ts).unwrap();
        assert_eq!(file_text(&ledger), "Name,Date,Time\nbob,2026-03-01,08:00:01\n");
    }

    #[test]
    fn test_names_with_commas_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path(), day(1)).unwrap();
        ledger.mark_present("Doe, Jane", at(1, 8, 0, 0)).unwrap();

        let reopened = AttendanceLedger::open(dir.path(), day(1)).unwrap();
        assert!(reopened.is_marked("Doe, Jane"));
    }

    #[test]
    fn test_reopen_rebuilds_marked_set_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ledger = AttendanceLedger::open(dir.path(), day(2)).unwrap();
            ledger.mark_present("alice", at(2, 8, 0, 0)).unwrap();
            ledger.mark_present("bob", at(2, 8, 5, 0)).unwrap();
        }
        let before = std::fs::read(dir.path().join("attendance_2026-03-02.csv")).unwrap();

        let mut ledger = AttendanceLedger::open(dir.path(), day(2)).unwrap();
        assert!(ledger.is_marked("alice"));
        assert!(ledger.is_marked("bob"));
        assert_eq!(ledger.marked_count(), 2);
        assert_eq!(std::fs::read(ledger.path()).unwrap(), before);

        assert_eq!(ledger.mark_present("alice", at(2, 12, 0, 0)).unwrap(), MarkOutcome::AlreadyMarked);
        assert!(matches!(
            ledger.mark_present("carol", at(2, 12, 0, 0)).unwrap(),
            MarkOutcome::Recorded(_)
        ));
        assert_eq!(
            file_text(&ledger),
            "Name,Date,Time\nalice,2026-03-02,08:00:00\nbob,2026-03-02,08:05:00\ncarol,2026-03-02,12:00:00\n"
        );
    }

    #[test]
    fn test_days_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mut monday = AttendanceLedger::open(dir.path(), day(2)).unwrap();
        monday.mark_present("alice", at(2, 9, 0, 0)).unwrap();

        let mut tuesday = AttendanceLedger::open(dir.path(), day(3)).unwrap();
        assert!(!tuesday.is_marked("alice"));
        assert!(matches!(
            tuesday.mark_present("alice", at(3, 9, 0, 0)).unwrap(),
            MarkOutcome::Recorded(_)
        ));
        assert_ne!(monday.path(), tuesday.path());
        assert_eq!(monday.records().len(), 1);
        assert_eq!(AttendanceLedger::load(dir.path(), day(2)).unwrap().records().len(), 1);
    }

    #[test]
    fn test_rejects_timestamp_from_another_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = AttendanceLedger::open(dir.path(), day(2)).unwrap();
        let err = ledger.mark_present("alice", at(3, 0, 0, 1)).unwrap_err();
        assert!(matches!(err, LedgerError::DayMismatch { .. }));
        assert!(!ledger.is_marked("alice"));
        assert!(ledger.records().is_empty());
    }

    #[test]
    fn test_failed_persist_leaves_name_unmarked_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_dir = dir.path().join("ledger");
        let mut ledger = AttendanceLedger::open(&ledger_dir, day(4)).unwrap();
        ledger.mark_present("alice", at(4, 8, 0, 0)).unwrap();

        std::fs::remove_dir_all(&ledger_dir).unwrap();
        let err = ledger.mark_present("bob", at(4, 8, 1, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::Io { .. }));
        assert!(!ledger.is_marked("bob"));
        assert_eq!(ledger.records().len(), 1);

        std::fs::create_dir_all(&ledger_dir).unwrap();
        assert!(matches!(
            ledger.mark_present("bob", at(4, 8, 2, 0)).unwrap(),
            MarkOutcome::Recorded(_)
        ));
        assert_eq!(
            file_text(&ledger),
            "Name,Date,Time\nalice,2026-03-04,08:00:00\nbob,2026-03-04,08:02:00\n"
        );
    }

    #[test]
    fn test_accepts_spaced_header() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("attendance_2026-03-05.csv"),
            "Name, Date, Time\nalice, 2026-03-05, 07:59:59\n",
        )
        .unwrap();
        let ledger = AttendanceLedger::open(dir.path(), day(5)).unwrap();
        assert!(ledger.is_marked("alice"));
    }

    #[test]
    fn test_append_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let original = "Name, Date, Time\nalice, 2026-03-05, 07:59:59.250\n";
        std::fs::write(dir.path().join("attendance_2026-03-05.csv"), original).unwrap();

        let mut ledger = AttendanceLedger::open(dir.path(), day(5)).unwrap();
        ledger.mark_present("bob", at(5, 8, 0, 0)).unwrap();

        assert_eq!(file_text(&ledger), format!("{original}bob,2026-03-05,08:00:00\n"));
    }

    #[test]
    fn test_append_terminates_unfinished_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let original = "Name,Date,Time\nalice,2026-03-05,07:59:59";
        std::fs::write(dir.path().join("attendance_2026-03-05.csv"), original).unwrap();

        let mut ledger = AttendanceLedger::open(dir.path(), day(5)).unwrap();
        ledger.mark_present("bob", at(5, 8, 0, 0)).unwrap();

        assert_eq!(file_text(&ledger), format!("{original}\nbob,2026-03-05,08:00:00\n"));
        let reopened = AttendanceLedger::open(dir.path(), day(5)).unwrap();
        assert_eq!(reopened.marked_count(), 2);
    }

    #[test]
    fn test_rows_from_other_days_do_not_mark() {
        let dir = tempfile::tempdir().unwrap();
        let original = "Name,Date,Time\nalice,2026-03-04,17:00:00\n";
        std::fs::write(dir.path().join("attendance_2026-03-05.csv"), original).unwrap();

        let mut ledger = AttendanceLedger::open(dir.path(), day(5)).unwrap();
        assert!(!ledger.is_marked("alice"));
        assert_eq!(ledger.marked_count(), 0);
        assert_eq!(ledger.records().len(), 1);

        assert!(matches!(
            ledger.mark_present("alice", at(5, 9, 0, 0)).unwrap(),
            MarkOutcome::Recorded(_)
        ));
        assert!(ledger.is_marked("alice"));
        assert_eq!(file_text(&ledger), format!("{original}alice,2026-03-05,09:00:00\n"));
    }

    #[test]
    fn test_rejects_foreign_header() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("attendance_2026-03-05.csv"), "Who,When\nalice,now\n").unwrap();
        let err = AttendanceLedger::open(dir.path(), day(5)).unwrap_err();
        assert!(matches!(err, LedgerError::BadHeader { .. }));
    }

    #[test]
    fn test_rejects_corrupt_row() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("attendance_2026-03-05.csv"),
            "Name,Date,Time\nalice,yesterday,noon\n",
        )
        .unwrap();
        let err = AttendanceLedger::open(dir.path(), day(5)).unwrap_err();
        assert!(matches!(err, LedgerError::Csv { .. }));
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AttendanceLedger::load(dir.path(), day(9)),
            Err(LedgerError::NotFound(_))
        ));
    }
}
