use regex::Regex;
use std::sync::OnceLock;

use crate::amount::{line_price, parse_count, parse_grouped, NUMERAL};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Issue};
use crate::error::ParseError;
use crate::mail::MailSource;
use crate::normalize::normalize_title;
use crate::receipt::{AdjustmentKind, LineItem, Receipt, Vendor};
use crate::vendor::{
    delimited_blocks, first_text_part, mail_purchased_at, structural_miss, ParsedOrder,
    StatedTotals, VendorParser,
};

const SUBJECT_PREFIX: &str = "Amazon.co.jp ご注文の確認";

fn order_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^=+\n\s*\n注文内容\n").expect("invalid order open regex"))
}

fn rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^=+\n").expect("invalid rule regex"))
}

fn item_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)注文内容\n(?P<items>.+?)\n_+\n").expect("invalid item section regex")
    })
}

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\s*(?P<name>.+?)(?:\s*-\s*(?P<piece>[0-9,]+)\s*点)?\n\s*￥\s*(?P<unit_price>[0-9,]+)[ \t]*(?:\n|$)",
        )
        .expect("invalid item regex")
    })
}

fn order_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"注文番号[：:]\s*(?P<order_id>[0-9][0-9-]*)").expect("invalid order id regex")
    })
}

/// A `label： ￥ 1,000` line. Lines whose value holds no numeral do not match.
fn yen_field_re(label: &str) -> Regex {
    Regex::new(&format!(
        r"(?m)^[ \t　]*{}[：:][ \t　]*(?P<value>-?[ \t]*￥?[ \t]*{NUMERAL})",
        regex::escape(label)
    ))
    .expect("invalid yen field regex")
}

fn shipping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| yen_field_re("配送料・手数料"))
}

fn discount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| yen_field_re("割引"))
}

fn total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| yen_field_re("注文合計"))
}

fn yen_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<pre>-)?\s*￥?\s*(?P<post>-)?\s*(?P<value>[0-9,]+)\s*$")
            .expect("invalid yen token regex")
    })
}

/// `￥ 1,000`, `-￥ 100`, `￥ -100` or a bare `1,000`.
fn parse_yen(label: &str, raw: &str) -> Result<i64, ParseError> {
    let caps = yen_token_re()
        .captures(raw.trim())
        .ok_or_else(|| ParseError::malformed(label, raw))?;
    let value = parse_grouped(label, &caps["value"])?;
    let negative = caps.name("pre").is_some() || caps.name("post").is_some();
    Ok(if negative { -value } else { value })
}

fn labelled_yen(block: &str, re: &Regex, label: &str) -> Result<Option<i64>, ParseError> {
    match re.captures(block) {
        Some(caps) => parse_yen(label, &caps["value"]).map(Some),
        None => Ok(None),
    }
}

fn parse_items(block: &str) -> Result<Vec<LineItem>, ParseError> {
    let Some(section) = item_section_re()
        .captures(block)
        .and_then(|caps| caps.name("items"))
    else {
        return Ok(Vec::new());
    };
    let mut items = Vec::new();
    for caps in item_re().captures_iter(section.as_str()) {
        let quantity = match caps.name("piece") {
            Some(piece) => parse_count("piece", piece.as_str())?,
            None => 1,
        };
        let unit_price = parse_grouped("unit price", &caps["unit_price"])?;
        items.push(LineItem::new(
            normalize_title(caps["name"].trim()),
            line_price("unit price", unit_price, quantity)?,
            quantity,
        ));
    }
    Ok(items)
}

pub struct AmazonParser;

impl VendorParser for AmazonParser {
    fn vendor(&self) -> Vendor {
        Vendor::Amazon
    }

    fn is_receipt(&self, mail: &dyn MailSource) -> bool {
        mail.subject().starts_with(SUBJECT_PREFIX)
    }

    fn extract_order_blocks(
        &self,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<String> {
        let Some(text) = first_text_part(mail, self.vendor(), sink) else {
            return Vec::new();
        };
        let blocks = delimited_blocks(&text, order_open_re(), rule_re())
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if blocks.is_empty() {
            structural_miss(self.vendor(), "`注文内容` section", sink);
        }
        blocks
    }

    fn parse_order(
        &self,
        block: &str,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<ParsedOrder, ParseError> {
        let order_id = order_id_re()
            .captures(block)
            .map(|caps| caps["order_id"].to_string());
        let items = parse_items(block)?;
        if items.is_empty() {
            sink.report(Diagnostic::new(Issue::MissingItems {
                order_id: order_id.clone(),
            }));
        }
        let shipping = labelled_yen(block, shipping_re(), "配送料・手数料")?.unwrap_or(0);
        let discount = labelled_yen(block, discount_re(), "割引")?.map_or(0, |v| -v.abs());
        let total_payment = labelled_yen(block, total_re(), "注文合計")?;

        let receipt = Receipt::builder(self.vendor(), mail_purchased_at(mail, self.vendor(), sink))
            .order_id(order_id)
            .items(items)
            .adjustment(AdjustmentKind::Shipping, shipping)
            .adjustment(AdjustmentKind::Discount, discount)
            .build();
        Ok(ParsedOrder {
            receipt,
            stated: StatedTotals {
                total_payment,
                ..StatedTotals::default()
            },
        })
    }
}
