//! Diagnostic sink threaded through every parse and validate call.
//!
//! Nothing in the engine logs through global state on its own: parsers hand
//! a [`Diagnostic`] to whatever sink the caller passed in. [`Diagnostics`] is
//! the stock sink; it mirrors each entry to `tracing` at the matching level
//! and keeps it for later inspection.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalField {
    TotalAmount,
    TotalPayment,
    GrantedReward,
}

impl fmt::Display for TotalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TotalAmount => "total amount",
            Self::TotalPayment => "total payment",
            Self::GrantedReward => "granted reward",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotalMismatch {
    pub field: TotalField,
    pub computed: i64,
    pub stated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// Expected section markers were absent, or the mail shape is wrong.
    StructuralMiss { detail: String },
    /// An order block was found but no line item could be read from it.
    MissingItems { order_id: Option<String> },
    ReconciliationMismatch { mismatches: Vec<TotalMismatch> },
    /// The block was skipped because a labelled field could not be parsed.
    MalformedBlock { error: String },
    UnreadableMail { error: String },
    /// A whole target could not be aggregated; later targets still run.
    TargetFailed { error: String },
}

impl Issue {
    pub fn severity(&self) -> Severity {
        match self {
            Self::StructuralMiss { .. } | Self::MissingItems { .. } => Severity::Warning,
            Self::ReconciliationMismatch { .. }
            | Self::MalformedBlock { .. }
            | Self::UnreadableMail { .. }
            | Self::TargetFailed { .. } => Severity::Error,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StructuralMiss { detail } => write!(f, "structural miss: {detail}"),
            Self::MissingItems { order_id: Some(id) } => {
                write!(f, "order {id} has no readable line items")
            }
            Self::MissingItems { order_id: None } => {
                f.write_str("order block has no readable line items")
            }
            Self::ReconciliationMismatch { mismatches } => {
                f.write_str("reconciliation mismatch:")?;
                for m in mismatches {
                    write!(f, " {} computed={} stated={};", m.field, m.computed, m.stated)?;
                }
                Ok(())
            }
            Self::MalformedBlock { error } => write!(f, "order block skipped: {error}"),
            Self::UnreadableMail { error } => write!(f, "mail skipped: {error}"),
            Self::TargetFailed { error } => write!(f, "target skipped: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Mail the issue came from; filled in by [`Scoped`] when a parser leaves
    /// it empty.
    pub origin: String,
    pub issue: Issue,
}

impl Diagnostic {
    pub fn new(issue: Issue) -> Self {
        Self {
            origin: String::new(),
            issue,
        }
    }

    pub fn structural(detail: impl Into<String>) -> Self {
        Self::new(Issue::StructuralMiss {
            detail: detail.into(),
        })
    }

    pub fn severity(&self) -> Severity {
        self.issue.severity()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.origin.is_empty() {
            write!(f, "{}", self.issue)
        } else {
            write!(f, "{}: {}", self.origin, self.issue)
        }
    }
}

pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity() == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

impl DiagnosticSink for Diagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Warning => tracing::warn!("{diagnostic}"),
            Severity::Error => tracing::error!("{diagnostic}"),
        }
        self.entries.push(diagnostic);
    }
}

/// Stamps an origin onto every diagnostic passing through to `inner`.
pub struct Scoped<'a> {
    inner: &'a mut dyn DiagnosticSink,
    origin: &'a str,
}

impl<'a> Scoped<'a> {
    pub fn new(inner: &'a mut dyn DiagnosticSink, origin: &'a str) -> Self {
        Self { inner, origin }
    }
}

impl DiagnosticSink for Scoped<'_> {
    fn report(&mut self, mut diagnostic: Diagnostic) {
        if diagnostic.origin.is_empty() {
            diagnostic.origin = self.origin.to_string();
        }
        self.inner.report(diagnostic);
    }
}
