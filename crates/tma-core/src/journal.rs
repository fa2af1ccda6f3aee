use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;

use crate::errors::Error;

/// Append-only journal for unexpected failures.
///
/// Diagnostic only: recording never fails the request. A journal write
/// error is logged and dropped so it cannot mask the error being
/// reported.
#[derive(Clone, Debug)]
pub struct ErrorJournal {
    path: PathBuf,
}

impl ErrorJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, context: &str, error: &Error) {
        if let Err(e) = self.append(context, &error.to_string()) {
            tracing::warn!(
                journal = %self.path.display(),
                error = %e,
                "error journal write failed"
            );
        }
    }

    fn append(&self, context: &str, detail: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} [{context}] {detail}", Utc::now().to_rfc3339())
    }
}
