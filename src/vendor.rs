//! The contract every vendor parser implements, plus the scanning and
//! time-zone helpers they share.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::amazon_receipt::AmazonParser;
use crate::bookwalker_receipt::BookwalkerParser;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::ParseError;
use crate::mail::MailSource;
use crate::melonbooks_receipt::MelonbooksParser;
use crate::receipt::{PurchasedAt, Receipt, Vendor};
use crate::yodobashi_receipt::YodobashiParser;

/// Totals printed in the source block, kept for reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatedTotals {
    pub total_amount: Option<i64>,
    pub total_payment: Option<i64>,
    /// Granted reward total, bonus tranche excluded.
    pub granted: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOrder {
    pub receipt: Receipt,
    pub stated: StatedTotals,
}

pub trait VendorParser {
    fn vendor(&self) -> Vendor;

    /// Subject-line check. Pure.
    fn is_receipt(&self, mail: &dyn MailSource) -> bool;

    /// Every order block in the mail, in order of appearance. Blocks never
    /// overlap; an empty result has already been reported to `sink`.
    fn extract_order_blocks(
        &self,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<String>;

    /// Builds the raw receipt for one block. An empty item list is reported
    /// to `sink` and returned as is; only a malformed labelled field fails
    /// the block.
    fn parse_order(
        &self,
        block: &str,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<ParsedOrder, ParseError>;
}

pub fn parser_for(vendor: Vendor) -> Box<dyn VendorParser> {
    match vendor {
        Vendor::Amazon => Box::new(AmazonParser),
        Vendor::Bookwalker => Box::new(BookwalkerParser),
        Vendor::Melonbooks => Box::new(MelonbooksParser),
        Vendor::Yodobashi => Box::new(YodobashiParser),
    }
}

/// Splits `text` into sections that each start at a match of `header` and
/// run up to the next match (or the end). Text before the first header is
/// dropped.
pub(crate) fn sections<'a>(text: &'a str, header: &Regex) -> Vec<&'a str> {
    let starts = header.find_iter(text).map(|m| m.start()).collect::<Vec<_>>();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            &text[start..end]
        })
        .collect()
}

/// Blocks that open at `open` and close at the next `close` match after it.
/// The search for the next block resumes at the start of the closing match,
/// so a rule line may close one block and open the next.
pub(crate) fn delimited_blocks<'a>(text: &'a str, open: &Regex, close: &Regex) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(opened) = open.find_at(text, cursor) {
        let Some(closed) = close.find_at(text, opened.end()) else {
            break;
        };
        out.push(&text[opened.start()..closed.end()]);
        cursor = closed.start().max(opened.start() + 1);
    }
    out
}

/// The first plain-text part, for vendors that tolerate multipart mails.
pub(crate) fn first_text_part(
    mail: &dyn MailSource,
    vendor: Vendor,
    sink: &mut dyn DiagnosticSink,
) -> Option<String> {
    let part = mail.text_parts().into_iter().next();
    if part.is_none() {
        sink.report(Diagnostic::structural(format!(
            "{vendor}: mail has no plain-text part"
        )));
    }
    part
}

/// The single flat body, for vendors whose layout breaks in multipart mails.
pub(crate) fn flat_body(
    mail: &dyn MailSource,
    vendor: Vendor,
    sink: &mut dyn DiagnosticSink,
) -> Option<String> {
    if mail.is_multipart() {
        sink.report(Diagnostic::structural(format!(
            "{vendor}: expected a single plain-text body but the mail is multipart"
        )));
        return None;
    }
    first_text_part(mail, vendor, sink)
}

pub(crate) fn structural_miss(vendor: Vendor, what: &str, sink: &mut dyn DiagnosticSink) {
    sink.report(Diagnostic::structural(format!("{vendor}: {what} not found")));
}

fn zone_for_name(name: &str) -> Option<Tz> {
    let name = name.trim();
    match name.to_ascii_uppercase().as_str() {
        "JST" => Some(chrono_tz::Asia::Tokyo),
        "KST" => Some(chrono_tz::Asia::Seoul),
        "UTC" | "GMT" | "Z" => Some(chrono_tz::UTC),
        _ => name.parse::<Tz>().ok(),
    }
}

/// Attaches the named zone to a wall-clock time. Unknown names, and times
/// that do not exist in the zone, stay naive.
pub(crate) fn localize(local: NaiveDateTime, zone_name: &str) -> PurchasedAt {
    zone_for_name(zone_name)
        .and_then(|tz| tz.from_local_datetime(&local).earliest())
        .map(|at: DateTime<Tz>| PurchasedAt::Zoned(at.fixed_offset()))
        .unwrap_or(PurchasedAt::Naive(local))
}

/// Purchase time from the mail header, used when a block carries none.
pub(crate) fn mail_purchased_at(
    mail: &dyn MailSource,
    vendor: Vendor,
    sink: &mut dyn DiagnosticSink,
) -> PurchasedAt {
    match mail.date() {
        Some(at) => PurchasedAt::Zoned(at),
        None => {
            sink.report(Diagnostic::structural(format!(
                "{vendor}: no purchase date and no Date header, using the Unix epoch"
            )));
            PurchasedAt::Naive(DateTime::<Utc>::UNIX_EPOCH.naive_utc())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn sections_split_at_each_header() {
        let header = Regex::new(r"(?m)^# ").expect("regex");
        let text = "preamble\n# one\na\n# two\nb\n";
        assert_eq!(sections(text, &header), vec!["# one\na\n", "# two\nb\n"]);
        assert!(sections("no header", &header).is_empty());
    }

    #[test]
    fn delimited_blocks_share_closing_rule() {
        let open = Regex::new(r"(?m)^==+\n\nBEGIN\n").expect("regex");
        let close = Regex::new(r"(?m)^==+\n").expect("regex");
        let text = "==\n\nBEGIN\na\n==\n\nBEGIN\nb\n==\ntrailer";
        let blocks = delimited_blocks(text, &open, &close);
        assert_eq!(blocks, vec!["==\n\nBEGIN\na\n==\n", "==\n\nBEGIN\nb\n==\n"]);
    }

    #[test]
    fn delimited_blocks_need_a_closing_rule() {
        let open = Regex::new(r"BEGIN\n").expect("regex");
        let close = Regex::new(r"END\n").expect("regex");
        assert!(delimited_blocks("BEGIN\nno end", &open, &close).is_empty());
    }

    #[test]
    fn known_zone_names_resolve_and_unknown_stay_naive() {
        let local = NaiveDate::from_ymd_opt(2019, 3, 27)
            .and_then(|d| d.and_hms_opt(13, 0, 0))
            .expect("naive");
        match localize(local, "JST") {
            PurchasedAt::Zoned(at) => assert_eq!(at.offset().local_minus_utc(), 9 * 3600),
            other => panic!("expected zoned time, got {other:?}"),
        }
        match localize(local, "Asia/Seoul") {
            PurchasedAt::Zoned(at) => assert_eq!(at.offset().local_minus_utc(), 9 * 3600),
            other => panic!("expected zoned time, got {other:?}"),
        }
        assert_eq!(localize(local, "Mars Time"), PurchasedAt::Naive(local));
    }
}
