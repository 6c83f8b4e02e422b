//! Appends a finished [`Report`] to one tab-separated history file per
//! statistic, and optionally snapshots it as JSON.
//!
//! Each `subreddit.<stat>.tsv` file holds a header row
//! (`timestamp` followed by one column per subreddit) and one row per run.

use chrono::{DateTime, Utc};
use collector_core::{CoreError, Report, SubredditStats};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

const TIMESTAMP_COLUMN: &str = "timestamp";

/// What one call to [`ReportWriter::write`] produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    pub stat_files: Vec<PathBuf>,
    pub json_snapshot: Option<PathBuf>,
    /// Subreddits with stats that some existing file has no column for.
    pub unwritten: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct ReportWriter {
    out_dir: PathBuf,
    json_snapshot: bool,
}

impl ReportWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            json_snapshot: false,
        }
    }

    pub fn with_json_snapshot(mut self, enabled: bool) -> Self {
        self.json_snapshot = enabled;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn stat_path(&self, stat: &str) -> PathBuf {
        self.out_dir.join(format!("subreddit.{}.tsv", stat))
    }

    pub fn snapshot_path(&self, report: &Report) -> PathBuf {
        self.out_dir.join(format!("report.{}.json", report.run_id))
    }

    /// Appends one row per statistic, stamped with `timestamp`.
    ///
    /// Every stat file is checked before any is appended to, so a file with
    /// a foreign header leaves all of them untouched.
    pub fn write(&self, report: &Report, timestamp: DateTime<Utc>) -> Result<WriteSummary, CoreError> {
        fs::create_dir_all(&self.out_dir)?;

        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        let rows = SubredditStats::STAT_NAMES
            .iter()
            .map(|stat| prepare_row(self.stat_path(stat), stat, report, &stamp))
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = WriteSummary::default();
        for row in rows {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&row.path)?
                .write_all(row.text.as_bytes())?;
            summary.unwritten.extend(row.unwritten);
            summary.stat_files.push(row.path);
        }

        if !summary.unwritten.is_empty() {
            warn!(
                "No column for {:?} in existing stat files under {}; their values were not written",
                summary.unwritten,
                self.out_dir.display()
            );
        }

        if self.json_snapshot {
            summary.json_snapshot = Some(self.write_json(report)?);
        }

        info!(
            "Wrote {} stat file(s) to {}",
            summary.stat_files.len(),
            self.out_dir.display()
        );
        Ok(summary)
    }

    /// Writes the whole report as pretty-printed JSON.
    pub fn write_json(&self, report: &Report) -> Result<PathBuf, CoreError> {
        fs::create_dir_all(&self.out_dir)?;
        let path = self.snapshot_path(report);
        fs::write(&path, serde_json::to_string_pretty(report)?)?;
        debug!("Wrote report snapshot {}", path.display());
        Ok(path)
    }
}

/// The header of a stat file that already has one.
struct ExistingFile {
    columns: Vec<String>,
    ends_with_newline: bool,
}

/// Reads an existing file's header, or `None` if the file is missing or
/// empty.
fn read_existing(path: &Path) -> Result<Option<ExistingFile>, CoreError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut line = String::new();
    BufReader::new(&file).read_line(&mut line)?;
    let header = line.trim_end_matches(['\r', '\n']);
    if header.is_empty() {
        return Ok(None);
    }

    let mut fields = header.split('\t');
    if fields.next() != Some(TIMESTAMP_COLUMN) {
        return Err(CoreError::InvalidInput {
            message: format!("{} does not start with a {} column", path.display(), TIMESTAMP_COLUMN),
        });
    }
    let columns = fields.map(str::to_string).collect();

    let mut last = [0u8; 1];
    (&file).seek(SeekFrom::End(-1))?;
    (&file).read_exact(&mut last)?;

    Ok(Some(ExistingFile {
        columns,
        ends_with_newline: last[0] == b'\n',
    }))
}

/// The text one stat file is about to receive.
struct PendingRow {
    path: PathBuf,
    text: String,
    /// Subreddits with stats that the header has no column for.
    unwritten: Vec<String>,
}

/// Builds the row for `stat`, preceded by a header if the file is new.
fn prepare_row(path: PathBuf, stat: &str, report: &Report, stamp: &str) -> Result<PendingRow, CoreError> {
    let mut text = String::new();
    let columns = match read_existing(&path)? {
        Some(existing) => {
            // An interrupted write or a hand edit can leave the last row open
            if !existing.ends_with_newline {
                text.push('\n');
            }
            existing.columns
        }
        None => {
            let columns: Vec<String> = report
                .requested
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            text.push_str(TIMESTAMP_COLUMN);
            for column in &columns {
                text.push('\t');
                text.push_str(column);
            }
            text.push('\n');
            columns
        }
    };

    text.push_str(stamp);
    for column in &columns {
        text.push('\t');
        if let Some(value) = report.stats.get(column).and_then(|s| s.value_of(stat)) {
            text.push_str(&value);
        }
    }
    text.push('\n');

    let unwritten = report
        .stats
        .keys()
        .filter(|name| !columns.contains(name))
        .cloned()
        .collect();
    Ok(PendingRow {
        path,
        text,
        unwritten,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_core::{FailureKind, SubredditFailure};

    fn timestamp() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn stats(name: &str, num_posts: u64, avg_age_seconds: f64) -> SubredditStats {
        SubredditStats {
            num_posts,
            num_comments: num_posts * 2,
            avg_age_seconds,
            ..SubredditStats::empty(name)
        }
    }

    fn report(requested: &[&str]) -> Report {
        Report::new(
            requested.iter().map(|s| s.to_string()).collect(),
            timestamp(),
        )
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_new_files_get_sorted_header() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("out"));

        let mut report = report(&["rust", "golang"]);
        report.record_success(stats("rust", 3, 15.0));
        report.record_success(stats("golang", 1, 7.5));

        let summary = writer.write(&report, timestamp()).unwrap();
        assert_eq!(summary.stat_files.len(), SubredditStats::STAT_NAMES.len());
        assert!(summary.unwritten.is_empty());
        assert!(summary.json_snapshot.is_none());

        assert_eq!(
            lines(&writer.stat_path("num_posts")),
            vec!["timestamp\tgolang\trust", "11/14/2023 22:13:20\t1\t3"]
        );
        assert_eq!(
            lines(&writer.stat_path("avg_age_seconds"))[1],
            "11/14/2023 22:13:20\t7.5\t15"
        );
    }

    #[test]
    fn test_rows_are_appended_under_existing_header() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        fs::write(
            writer.stat_path("num_comments"),
            "timestamp\trust\tgolang\n01/01/2023 00:00:00\t4\t2\n",
        )
        .unwrap();

        let mut report = report(&["golang", "rust", "zig"]);
        report.record_success(stats("rust", 5, 1.0));
        report.record_success(stats("zig", 1, 1.0));
        report.record_failure(
            "golang",
            SubredditFailure {
                kind: FailureKind::RateLimited,
                message: "429".to_string(),
                posts_seen: 0,
            },
        );

        let summary = writer.write(&report, timestamp()).unwrap();
        assert_eq!(
            lines(&writer.stat_path("num_comments")),
            vec![
                "timestamp\trust\tgolang",
                "01/01/2023 00:00:00\t4\t2",
                "11/14/2023 22:13:20\t10\t",
            ]
        );
        assert_eq!(summary.unwritten, BTreeSet::from(["zig".to_string()]));
    }

    #[test]
    fn test_failed_subreddits_get_empty_cells_in_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());

        let mut report = report(&["rust", "golang"]);
        report.record_success(stats("rust", 2, 3.0));
        report.finish(timestamp(), FailureKind::Cancelled);

        writer.write(&report, timestamp()).unwrap();
        assert_eq!(
            lines(&writer.stat_path("num_posts")),
            vec!["timestamp\tgolang\trust", "11/14/2023 22:13:20\t\t2"]
        );
    }

    #[test]
    fn test_empty_existing_file_is_treated_as_new() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        fs::write(writer.stat_path("num_urls"), "").unwrap();

        let mut report = report(&["rust"]);
        report.record_success(stats("rust", 2, 3.0));
        writer.write(&report, timestamp()).unwrap();

        assert_eq!(lines(&writer.stat_path("num_urls"))[0], "timestamp\trust");
    }

    #[test]
    fn test_foreign_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        fs::write(writer.stat_path("avg_age_seconds"), "when\trust\n").unwrap();

        let result = writer.write(&report(&["rust"]), timestamp());
        assert!(matches!(result, Err(CoreError::InvalidInput { .. })));
    }

    #[test]
    fn test_bad_file_leaves_every_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let seeded = "timestamp\trust\n01/01/2023 00:00:00\t4\n";
        fs::write(writer.stat_path("num_comments"), seeded).unwrap();
        fs::write(writer.stat_path("num_posts"), "when\trust\n").unwrap();

        let mut report = report(&["rust"]);
        report.record_success(stats("rust", 2, 3.0));
        assert!(writer.write(&report, timestamp()).is_err());

        assert_eq!(fs::read_to_string(writer.stat_path("num_comments")).unwrap(), seeded);
        assert_eq!(fs::read_to_string(writer.stat_path("num_posts")).unwrap(), "when\trust\n");
        for stat in SubredditStats::STAT_NAMES {
            if stat != "num_comments" && stat != "num_posts" {
                assert!(!writer.stat_path(stat).exists(), "{stat} was written");
            }
        }
    }

    #[test]
    fn test_unterminated_last_row_is_closed_first() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        fs::write(
            writer.stat_path("num_ups"),
            "timestamp\trust\n01/01/2023 00:00:00\t4",
        )
        .unwrap();

        let mut report = report(&["rust"]);
        report.record_success(stats("rust", 2, 3.0));
        writer.write(&report, timestamp()).unwrap();

        assert_eq!(
            lines(&writer.stat_path("num_ups")),
            vec![
                "timestamp\trust",
                "01/01/2023 00:00:00\t4",
                "11/14/2023 22:13:20\t0",
            ]
        );
    }

    #[test]
    fn test_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path()).with_json_snapshot(true);

        let mut report = report(&["rust"]);
        report.record_success(stats("rust", 2, 3.0));

        let summary = writer.write(&report, timestamp()).unwrap();
        let path = summary.json_snapshot.unwrap();
        assert_eq!(path, writer.snapshot_path(&report));

        let restored: Report = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(restored.run_id, report.run_id);
        assert_eq!(restored.stats, report.stats);
    }
}
