//! Preflight check results.

use std::fmt::Write as _;

/// Outcome of one host or path check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// `rootpack pack` cannot succeed until this is fixed.
    Fail,
    /// Packing works but the image may differ from what the board expects,
    /// e.g. non-reproducible output on an old e2fsprogs.
    Warn,
    /// Nothing configured to check.
    Skip,
}

impl CheckStatus {
    fn icon(self) -> &'static str {
        match self {
            Self::Pass => "✓",
            Self::Fail => "✗",
            Self::Warn => "⚠",
            Self::Skip => "○",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Warn => "WARN",
            Self::Skip => "SKIP",
        }
    }
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(str::to_string),
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Warn, Some(details))
    }

    pub fn skip(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Skip, Some(details))
    }
}

#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Names of the checks with `status`, in report order.
    pub fn names(&self, status: CheckStatus) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// One line per check, then a summary.
    pub fn render(&self) -> String {
        let mut out = String::from("=== Preflight Check Results ===\n\n");
        for check in &self.checks {
            let _ = write!(
                out,
                "  {} [{}] {}",
                check.status.icon(),
                check.status.label(),
                check.name
            );
            match &check.details {
                Some(details) => {
                    let _ = writeln!(out, ": {}", details);
                }
                None => out.push('\n'),
            }
        }

        let _ = writeln!(
            out,
            "\nSummary: {}/{} passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        if self.fail_count() > 0 {
            let _ = writeln!(
                out,
                "         {} FAILED - rootpack pack will not succeed",
                self.fail_count()
            );
        }
        if self.warn_count() > 0 {
            let _ = writeln!(out, "         {} warnings", self.warn_count());
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
