use regex::Regex;
use std::sync::OnceLock;

use crate::amount::{parse_count, parse_grouped, NUMERAL};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Issue};
use crate::error::ParseError;
use crate::mail::MailSource;
use crate::normalize::normalize_title;
use crate::receipt::{AdjustmentKind, LineItem, Receipt, RewardTranche, Vendor};
use crate::vendor::{
    first_text_part, mail_purchased_at, sections, structural_miss, ParsedOrder, StatedTotals,
    VendorParser,
};

const SUBJECT: &str = "ヨドバシ・ドット・コム：ご注文ありがとうございます";

fn order_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^【ご注文商品】\n").expect("invalid order header regex"))
}

fn item_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)【ご注文商品】\n-+\n(?P<items>.+?)\n【お支払方法】")
            .expect("invalid item section regex")
    })
}

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)・「(?P<name>.+?)」\n.+?合計 (?P<piece>[0-9,]+) 点\s+(?P<price>[0-9,]+) 円")
            .expect("invalid item regex")
    })
}

fn name_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*").expect("invalid name break regex"))
}

fn shipping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"・配達料金：[ \t　]*(?P<value>{NUMERAL})"))
            .expect("invalid shipping regex")
    })
}

fn used_point_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"今回のご利用ゴールドポイント数[ \t　：:]*(?P<value>{NUMERAL})"
        ))
        .expect("invalid used point regex")
    })
}

fn granted_point_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"今回の還元ゴールドポイント数[ \t　：:]*(?P<value>{NUMERAL})"))
            .expect("invalid granted point regex")
    })
}

/// Value of a labelled numeral, zero when the label or its numeral is absent.
fn labelled(block: &str, re: &Regex, label: &str) -> Result<i64, ParseError> {
    re.captures(block)
        .map_or(Ok(0), |caps| parse_grouped(label, &caps["value"]))
}

fn parse_items(section: &str) -> Result<Vec<LineItem>, ParseError> {
    let mut items = Vec::new();
    for caps in item_re().captures_iter(section) {
        // Long names wrap onto indented continuation lines.
        let name = name_break_re().replace_all(&caps["name"], "");
        items.push(LineItem::new(
            normalize_title(&name),
            parse_grouped("合計", &caps["price"])?,
            parse_count("点", &caps["piece"])?,
        ));
    }
    Ok(items)
}

pub struct YodobashiParser;

impl VendorParser for YodobashiParser {
    fn vendor(&self) -> Vendor {
        Vendor::Yodobashi
    }

    fn is_receipt(&self, mail: &dyn MailSource) -> bool {
        mail.subject() == SUBJECT
    }

    fn extract_order_blocks(
        &self,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<String> {
        let Some(text) = first_text_part(mail, self.vendor(), sink) else {
            return Vec::new();
        };
        let blocks = sections(&text, order_header_re())
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if blocks.is_empty() {
            structural_miss(self.vendor(), "`【ご注文商品】` section", sink);
        }
        blocks
    }

    fn parse_order(
        &self,
        block: &str,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<ParsedOrder, ParseError> {
        let items = match item_section_re()
            .captures(block)
            .and_then(|caps| caps.name("items"))
        {
            Some(section) => parse_items(section.as_str())?,
            None => {
                structural_miss(self.vendor(), "`【お支払方法】` after the item list", sink);
                Vec::new()
            }
        };
        if items.is_empty() {
            sink.report(Diagnostic::new(Issue::MissingItems { order_id: None }));
        }
        let shipping = labelled(block, shipping_re(), "配達料金")?;
        let used_point = labelled(block, used_point_re(), "今回のご利用ゴールドポイント数")?;
        let granted_point = labelled(block, granted_point_re(), "今回の還元ゴールドポイント数")?;

        let granted = if granted_point != 0 {
            vec![RewardTranche::normal(granted_point)]
        } else {
            Vec::new()
        };
        let receipt = Receipt::builder(self.vendor(), mail_purchased_at(mail, self.vendor(), sink))
            .items(items)
            .adjustment(AdjustmentKind::Shipping, shipping)
            .adjustment(AdjustmentKind::PointUsage, -used_point.abs())
            .granted(granted)
            .build();
        // The mail prints no grand total to reconcile against.
        Ok(ParsedOrder {
            receipt,
            stated: StatedTotals::default(),
        })
    }
}
