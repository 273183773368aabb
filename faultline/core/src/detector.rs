use std::{fs, path::Path};

use crate::executor::ExecutionReport;

/// Classification of one execution, in rule order: executor error, exit
/// code, report presence, report size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ExecutionError,
    ExitNonZero,
    ReportMissing,
    ReportUndersized,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ExecutionError => "execution_error",
            Self::ExitNonZero => "exit_nonzero",
            Self::ReportMissing => "report_missing",
            Self::ReportUndersized => "report_undersized",
        }
    }
}

/// First-match-wins outcome classification. A report exactly at the minimum
/// size passes; one byte under is undersized.
#[must_use]
pub fn classify(report: &ExecutionReport, report_path: &Path, min_bytes: u64) -> Outcome {
    if report.error.is_some() {
        return Outcome::ExecutionError;
    }
    if report.exit_code != Some(0) {
        return Outcome::ExitNonZero;
    }
    let Ok(metadata) = fs::metadata(report_path) else {
        return Outcome::ReportMissing;
    };
    if metadata.len() < min_bytes {
        return Outcome::ReportUndersized;
    }
    Outcome::Success
}
