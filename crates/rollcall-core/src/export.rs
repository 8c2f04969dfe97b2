//! CSV export of a single report.

use std::cmp::Ordering;

use thiserror::Error;

use crate::types::{AttendanceRecord, AttendanceReport};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv output is not valid UTF-8")]
    Encoding,
}

const HEADER: [&str; 3] = ["Roll No", "Name", "Status"];

/// Numeric roll ids first, in numeric order; everything else after, lexicographically.
pub fn compare_roll_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Render a report as `Roll No,Name,Status`, one row per student by roll id.
///
/// Fields containing a comma, quote or newline are quoted.
pub fn to_csv(report: &AttendanceReport) -> Result<String, ExportError> {
    let mut rows: Vec<&AttendanceRecord> = report.attendance.iter().collect();
    rows.sort_by(|a, b| compare_roll_ids(&a.roll_id, &b.roll_id));

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for row in rows {
        writer.write_record([row.roll_id.as_str(), row.name.as_str(), row.status.as_str()])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    String::from_utf8(bytes).map_err(|_| ExportError::Encoding)
}

/// `attendance_<classroom>_<period>_<YYYY-MM-DD>.csv`, with every
/// non-alphanumeric character of the labels replaced by `_`.
pub fn export_filename(report: &AttendanceReport) -> String {
    format!(
        "attendance_{}_{}_{}.csv",
        sanitize(&report.classroom_name),
        sanitize(&report.period),
        report.timestamp.format("%Y-%m-%d")
    )
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
