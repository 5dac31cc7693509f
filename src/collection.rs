//! Runs a vendor parser over a batch of mails and assembles the ordered
//! receipt collection.

use serde::Serialize;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::diagnostics::{Diagnostic, DiagnosticSink, Issue, Scoped};
use crate::error::{Error, Result};
use crate::mail::{MailFile, MailSource};
use crate::receipt::Receipt;
use crate::validate::reconcile;
use crate::vendor::VendorParser;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedReceipt {
    pub receipt: Receipt,
    /// Mail the receipt was read from.
    pub origin: String,
    /// False when a stated total disagreed with the recomputed one.
    pub reconciled: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub mails_read: usize,
    pub receipt_mails: usize,
    pub receipts: usize,
    pub unreconciled: usize,
    pub failed_mails: usize,
    pub failed_blocks: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReceiptCollection {
    entries: Vec<CollectedReceipt>,
    summary: ScanSummary,
}

impl ReceiptCollection {
    /// Parses every receipt mail in `mails`, reconciles each order and
    /// returns all receipts sorted by purchase instant. Mails keep their
    /// relative order for receipts bought at the same instant.
    pub fn scan<M: MailSource>(
        parser: &dyn VendorParser,
        mails: impl IntoIterator<Item = (String, M)>,
        sink: &mut dyn DiagnosticSink,
    ) -> Self {
        let mut collection = Self::default();
        for (origin, mail) in mails {
            collection.summary.mails_read += 1;
            collection.add_mail(parser, &origin, &mail, sink);
        }
        collection.finish()
    }

    /// Scans every regular file under `dir`, in path order. Files that cannot
    /// be read or decoded are reported and skipped.
    pub fn scan_dir(
        parser: &dyn VendorParser,
        dir: &Path,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "mail directory not found"),
            ));
        }
        let mut collection = Self::default();
        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(err) => {
                    let origin = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| dir.display().to_string());
                    collection.summary.failed_mails += 1;
                    sink.report(Diagnostic {
                        origin,
                        issue: Issue::UnreadableMail {
                            error: err.to_string(),
                        },
                    });
                }
            }
        }
        files.sort();

        for path in &files {
            collection.summary.mails_read += 1;
            let origin = path.display().to_string();
            match MailFile::read_file(path) {
                Ok(mail) => collection.add_mail(parser, &origin, &mail, sink),
                Err(err) => {
                    collection.summary.failed_mails += 1;
                    sink.report(Diagnostic {
                        origin,
                        issue: Issue::UnreadableMail {
                            error: err.to_string(),
                        },
                    });
                }
            }
        }
        Ok(collection.finish())
    }

    fn add_mail(
        &mut self,
        parser: &dyn VendorParser,
        origin: &str,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) {
        if !parser.is_receipt(mail) {
            debug!(origin, subject = %mail.subject(), "not a receipt mail");
            return;
        }
        self.summary.receipt_mails += 1;
        let mut sink = Scoped::new(sink, origin);
        for block in parser.extract_order_blocks(mail, &mut sink) {
            let parsed = match parser.parse_order(&block, mail, &mut sink) {
                Ok(parsed) => parsed,
                Err(err) => {
                    self.summary.failed_blocks += 1;
                    sink.report(Diagnostic::new(Issue::MalformedBlock {
                        error: err.to_string(),
                    }));
                    continue;
                }
            };
            if parsed.receipt.items().is_empty() {
                // Already reported by the parser.
                self.summary.failed_blocks += 1;
                continue;
            }
            let mismatch = reconcile(&parsed.receipt, &parsed.stated);
            let reconciled = mismatch.is_none();
            if let Some(diagnostic) = mismatch {
                self.summary.unreconciled += 1;
                sink.report(diagnostic);
            }
            self.entries.push(CollectedReceipt {
                receipt: parsed.receipt,
                origin: origin.to_string(),
                reconciled,
            });
        }
    }

    fn finish(mut self) -> Self {
        self.entries
            .sort_by_key(|entry| entry.receipt.purchased_at().instant());
        self.summary.receipts = self.entries.len();
        self
    }

    pub fn summary(&self) -> ScanSummary {
        self.summary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectedReceipt> {
        self.entries.iter()
    }

    pub fn receipts(&self) -> impl Iterator<Item = &Receipt> {
        self.entries.iter().map(|entry| &entry.receipt)
    }

    pub fn into_vec(self) -> Vec<CollectedReceipt> {
        self.entries
    }
}
