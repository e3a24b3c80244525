use std::io::{self, Write};

use serde::Serialize;

use crate::cache::{CacheStats, DedupReport};
use crate::domain::Identity;
use crate::scanner::ScanReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &ScanReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_stats(stats: &CacheStats) -> io::Result<()> {
        Self::print_json(stats)
    }

    pub fn print_dedup(report: &DedupReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_identities<'a, I>(ids: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        let mut stdout = io::stdout().lock();
        for id in ids {
            writeln!(stdout, "{id}")?;
        }
        Ok(())
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Plain progress lines on stderr, keeping stdout for the JSON report.
pub struct StderrProgress;

impl StderrProgress {
    pub fn progress(processed: usize, total: usize) {
        let _ = writeln!(io::stderr().lock(), "scan  {processed} / {total} items");
    }

    pub fn status(message: &str) {
        let _ = writeln!(io::stderr().lock(), "scan  {message}");
    }
}
