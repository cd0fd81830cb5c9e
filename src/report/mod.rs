//! HTML reports.
//!
//! A [`Report`] is a flat list of rows, each tagged with a grouping key and a
//! failed flag. Rendering splits it into a Failed and a Successful section and
//! bands rows by group.

mod backups;
mod health;

pub use backups::*;
pub use health::*;

use askama::Template;
use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Report error types.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to render report: {0}")]
    Render(#[from] askama::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    /// Banding key, e.g. the AG or server name.
    pub group: String,
    pub cells: Vec<String>,
    pub failed: bool,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub generated_at: String,
    pub columns: Vec<String>,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn new(title: &str, columns: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, group: &str, cells: Vec<String>, failed: bool) {
        self.rows.push(ReportRow {
            group: group.to_string(),
            cells,
            failed,
        });
    }

    pub fn failed_count(&self) -> usize {
        self.rows.iter().filter(|r| r.failed).count()
    }

    pub fn render(&self) -> Result<String, ReportError> {
        let failed: Vec<&ReportRow> = self.rows.iter().filter(|r| r.failed).collect();
        let successful: Vec<&ReportRow> = self.rows.iter().filter(|r| !r.failed).collect();

        let page = ReportPage {
            title: &self.title,
            generated_at: &self.generated_at,
            columns: &self.columns,
            has_failed: !failed.is_empty(),
            failed: band(&failed),
            successful: band(&successful),
        };
        Ok(page.render()?)
    }
}

struct BandedRow<'a> {
    class: &'static str,
    cells: &'a [String],
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportPage<'a> {
    title: &'a str,
    generated_at: &'a str,
    columns: &'a [String],
    has_failed: bool,
    failed: Vec<BandedRow<'a>>,
    successful: Vec<BandedRow<'a>>,
}

/// Alternate the row class each time the group changes.
fn band<'a>(rows: &[&'a ReportRow]) -> Vec<BandedRow<'a>> {
    let mut banded = Vec::with_capacity(rows.len());
    let mut shaded = false;
    let mut previous: Option<&str> = None;

    for row in rows {
        if let Some(prev) = previous {
            if prev != row.group {
                shaded = !shaded;
            }
        }
        previous = Some(&row.group);
        banded.push(BandedRow {
            class: if shaded { "band-b" } else { "band-a" },
            cells: &row.cells,
        });
    }
    banded
}

/// `<prefix>_<YYYY-MM-DD>.html`
pub fn report_file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{}.html", prefix, date.format("%Y-%m-%d"))
}

/// Render `report` into `dir`, creating the directory when missing.
pub fn write_report(dir: &Path, prefix: &str, report: &Report, date: NaiveDate) -> Result<PathBuf, ReportError> {
    let html = report.render()?;

    std::fs::create_dir_all(dir).map_err(|e| ReportError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let path = dir.join(report_file_name(prefix, date));
    std::fs::write(&path, html).map_err(|e| ReportError::Io {
        path: path.clone(),
        source: e,
    })?;

    tracing::info!(
        "Wrote {} ({} rows, {} failed)",
        path.display(),
        report.rows.len(),
        report.failed_count()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(failed: &[bool]) -> Report {
        let mut report = Report::new("Test", &["Group", "Value"]);
        for (i, f) in failed.iter().enumerate() {
            let group = format!("G{}", i / 2);
            report.push(&group, vec![group.clone(), i.to_string()], *f);
        }
        report
    }

    #[test]
    fn test_failed_section_only_with_failures() {
        let html = sample(&[false, false]).render().unwrap();
        assert!(!html.contains("<h2>Failed</h2>"));
        assert!(html.contains("<h2>Successful</h2>"));

        let html = sample(&[false, true]).render().unwrap();
        assert!(html.contains("<h2>Failed</h2>"));
        assert!(html.contains("<h2>Successful</h2>"));
    }

    #[test]
    fn test_successful_header_renders_without_rows() {
        let html = sample(&[true]).render().unwrap();
        assert!(html.contains("<h2>Successful</h2>"));
        assert!(html.contains("<h2>Failed</h2>"));

        let html = Report::new("Empty", &["A"]).render().unwrap();
        assert!(html.contains("<h2>Successful</h2>"));
        assert!(!html.contains("<h2>Failed</h2>"));
    }

    #[test]
    fn test_bands_alternate_on_group_change() {
        let rows = [
            ReportRow { group: "AG1".into(), cells: vec![], failed: false },
            ReportRow { group: "AG1".into(), cells: vec![], failed: false },
            ReportRow { group: "AG2".into(), cells: vec![], failed: false },
            ReportRow { group: "AG3".into(), cells: vec![], failed: false },
        ];
        let refs: Vec<&ReportRow> = rows.iter().collect();
        let classes: Vec<_> = band(&refs).iter().map(|r| r.class).collect();
        assert_eq!(classes, vec!["band-a", "band-a", "band-b", "band-a"]);
    }

    #[test]
    fn test_cells_are_escaped() {
        let mut report = Report::new("Escaping", &["Name"]);
        report.push("x", vec!["<script>".to_string()], false);
        let html = report.render().unwrap();
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_write_creates_directory_and_dated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("reports").join("daily");
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();

        let path = write_report(&dir, "AGHealth", &sample(&[false]), date).unwrap();
        assert_eq!(path, dir.join("AGHealth_2024-03-07.html"));
        assert!(std::fs::read_to_string(&path).unwrap().contains("Test"));
    }
}
