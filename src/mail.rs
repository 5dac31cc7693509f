use chrono::{DateTime, FixedOffset, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Read-only view of one mail: everything a vendor parser is allowed to see.
pub trait MailSource {
    fn subject(&self) -> String;

    /// `Date` header, if present and parseable.
    fn date(&self) -> Option<DateTime<FixedOffset>>;

    /// Plain-text parts in structural order, with CRLF folded to LF.
    fn text_parts(&self) -> Vec<String>;

    fn is_multipart(&self) -> bool;
}

fn fold_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// A mail held entirely in memory.
#[derive(Debug, Clone)]
pub struct TextMail {
    subject: String,
    date: Option<DateTime<FixedOffset>>,
    parts: Vec<String>,
    multipart: bool,
}

impl TextMail {
    /// Single-part mail with a flat plain-text body.
    pub fn new(
        subject: impl Into<String>,
        date: Option<DateTime<FixedOffset>>,
        body: impl AsRef<str>,
    ) -> Self {
        Self {
            subject: subject.into(),
            date,
            parts: vec![fold_newlines(body.as_ref())],
            multipart: false,
        }
    }

    pub fn multipart(
        subject: impl Into<String>,
        date: Option<DateTime<FixedOffset>>,
        parts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            date,
            parts: parts.into_iter().map(|p| fold_newlines(&p)).collect(),
            multipart: true,
        }
    }
}

impl MailSource for TextMail {
    fn subject(&self) -> String {
        self.subject.clone()
    }

    fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.date
    }

    fn text_parts(&self) -> Vec<String> {
        self.parts.clone()
    }

    fn is_multipart(&self) -> bool {
        self.multipart
    }
}

/// A mail read from an RFC 822 file. Headers and text parts are decoded
/// once up front so the parsed MIME tree does not have to outlive the bytes.
#[derive(Debug, Clone)]
pub struct MailFile {
    inner: TextMail,
}

impl MailFile {
    pub fn read_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mail = parse_mail(bytes)?;
        let subject = mail
            .headers
            .get_first_value("Subject")
            .unwrap_or_default()
            .trim()
            .to_string();
        let date = mail
            .headers
            .get_first_value("Date")
            .and_then(|raw| parse_date_header(&raw));
        let mut parts = Vec::new();
        collect_plain_parts(&mail, &mut parts)?;
        let multipart = !mail.subparts.is_empty()
            || mail.ctype.mimetype.to_ascii_lowercase().starts_with("multipart/");
        Ok(Self {
            inner: TextMail {
                subject,
                date,
                parts,
                multipart,
            },
        })
    }
}

fn collect_plain_parts(mail: &ParsedMail, out: &mut Vec<String>) -> Result<()> {
    if mail.subparts.is_empty() {
        if mail.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            out.push(fold_newlines(&mail.get_body()?));
        }
        return Ok(());
    }
    for part in &mail.subparts {
        collect_plain_parts(part, out)?;
    }
    Ok(())
}

fn parse_date_header(raw: &str) -> Option<DateTime<FixedOffset>> {
    let text = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc2822(text) {
        return Some(at);
    }
    // Fall back to mailparse's lenient parser; the offset is lost there.
    mailparse::dateparse(text)
        .ok()
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|at| at.fixed_offset())
}

impl MailSource for MailFile {
    fn subject(&self) -> String {
        self.inner.subject()
    }

    fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.inner.date()
    }

    fn text_parts(&self) -> Vec<String> {
        self.inner.text_parts()
    }

    fn is_multipart(&self) -> bool {
        self.inner.is_multipart()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT: &str = "Subject: =?UTF-8?B?44Oo44OJ44OQ44K344O744OJ44OD44OI44O744Kz44Og77ya44GU5rOo5paH44GC44KK44GM44Go44GG44GU44GW44GE44G+44GZ?=\r\n\
Date: Sat, 14 Mar 2020 10:15:00 +0900\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
line one\r\n\
line two\r\n";

    const MULTI: &str = "Subject: Order Confirmation\r\n\
Date: Sat, 14 Mar 2020 10:15:00 +0000\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
plain body\r\n\
--b1\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>html body</p>\r\n\
--b1--\r\n";

    #[test]
    fn flat_mail_exposes_decoded_subject_and_lf_body() {
        let mail = MailFile::from_bytes(FLAT.as_bytes()).expect("parse flat mail");
        assert_eq!(mail.subject(), "ヨドバシ・ドット・コム：ご注文ありがとうございます");
        assert!(!mail.is_multipart());
        let parts = mail.text_parts();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].starts_with("line one\nline two"), "{:?}", parts[0]);
        let date = mail.date().expect("date header");
        assert_eq!(date.offset().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn multipart_mail_keeps_only_plain_parts() {
        let mail = MailFile::from_bytes(MULTI.as_bytes()).expect("parse multipart mail");
        assert!(mail.is_multipart());
        let parts = mail.text_parts();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].contains("plain body"));
    }

    #[test]
    fn text_mail_folds_crlf() {
        let mail = TextMail::new("s", None, "a\r\nb\r\n");
        assert_eq!(mail.text_parts(), vec!["a\nb\n".to_string()]);
    }
}
