//! Diagnostics sink
//!
//! Append-only, thread-safe record of problems found while building or
//! running a configuration. Reported to operators; never consulted for
//! control flow.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// How serious a recorded problem is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProblemSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for ProblemSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemSeverity::Info => write!(f, "INFO"),
            ProblemSeverity::Warning => write!(f, "WARNING"),
            ProblemSeverity::Error => write!(f, "ERROR"),
        }
    }
}

/// One diagnostic record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub severity: ProblemSeverity,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl Problem {
    pub fn new(severity: ProblemSeverity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            resource: None,
            location: None,
            cause: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)?;
        if let Some(resource) = &self.resource {
            write!(f, " (resource: {})", resource)?;
        }
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " caused by: {}", cause)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Problems {
    entries: Mutex<Vec<Problem>>,
}

impl Problems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, problem: Problem) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(problem);
    }

    pub fn add_error(&self, code: impl Into<String>, message: impl Into<String>) {
        self.add(Problem::new(ProblemSeverity::Error, code, message));
    }

    pub fn add_warning(&self, code: impl Into<String>, message: impl Into<String>) {
        self.add(Problem::new(ProblemSeverity::Warning, code, message));
    }

    pub fn add_info(&self, code: impl Into<String>, message: impl Into<String>) {
        self.add(Problem::new(ProblemSeverity::Info, code, message));
    }

    fn any(&self, severity: ProblemSeverity) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|problem| problem.severity == severity)
    }

    pub fn has_errors(&self) -> bool {
        self.any(ProblemSeverity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.any(ProblemSeverity::Warning)
    }

    pub fn has_info(&self) -> bool {
        self.any(ProblemSeverity::Info)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything recorded so far, in order
    pub fn snapshot(&self) -> Vec<Problem> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
