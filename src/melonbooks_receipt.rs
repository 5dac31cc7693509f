use regex::Regex;
use std::sync::OnceLock;

use crate::amount::{parse_count, parse_grouped, NUMERAL};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Issue};
use crate::error::ParseError;
use crate::mail::MailSource;
use crate::normalize::normalize_title;
use crate::receipt::{AdjustmentKind, LineItem, Receipt, RewardTranche, Vendor};
use crate::vendor::{
    flat_body, mail_purchased_at, sections, structural_miss, ParsedOrder, StatedTotals,
    VendorParser,
};

const SUBJECT: &str = "【メロンブックス／フロマージュブックス】 ご注文の確認";

fn order_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^●ご注文番号\n").expect("invalid order header regex"))
}

fn order_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^●ご注文番号\n[ \t]*(?P<order_id>[0-9]+)[ \t]*$")
            .expect("invalid order id regex")
    })
}

fn item_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?ms)^●ご注文内容\n(?P<items>.+?)^●合計\n").expect("invalid item section regex")
    })
}

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?m)^商品名:[ \t]*(?P<name>.+?)[ \t]*\n",
            r"数量:[ \t]*(?P<piece>[0-9,]+)[ \t]*個[ \t]*\n",
            r"単価:[^\n]*\n",
            r"商品合計額:[ \t]*(?P<price>[0-9,]+)[ \t]*円",
        ))
        .expect("invalid item regex")
    })
}

/// A `label: 1,000円(税込)` line. Lines whose value holds no numeral do not match.
fn numeral_field_re(label: &str) -> Regex {
    Regex::new(&format!(
        r"(?m)^{}[:：][ \t]*(?P<value>{NUMERAL})",
        regex::escape(label)
    ))
    .expect("invalid field regex")
}

fn shipping_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| numeral_field_re("送料"))
}

fn charge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| numeral_field_re("手数料"))
}

fn total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| numeral_field_re("合計額"))
}

fn point_usage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| numeral_field_re("利用ポイント数"))
}

fn granted_point_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| numeral_field_re("獲得予定ポイント数"))
}

fn labelled(block: &str, re: &Regex, label: &str) -> Result<Option<i64>, ParseError> {
    re.captures(block)
        .map(|caps| parse_grouped(label, &caps["value"]))
        .transpose()
}

fn parse_items(block: &str) -> Result<Option<Vec<LineItem>>, ParseError> {
    let Some(section) = item_section_re()
        .captures(block)
        .and_then(|caps| caps.name("items"))
    else {
        return Ok(None);
    };
    let mut items = Vec::new();
    for caps in item_re().captures_iter(section.as_str()) {
        items.push(LineItem::new(
            normalize_title(&caps["name"]),
            parse_grouped("商品合計額", &caps["price"])?,
            parse_count("数量", &caps["piece"])?,
        ));
    }
    Ok(Some(items))
}

pub struct MelonbooksParser;

impl VendorParser for MelonbooksParser {
    fn vendor(&self) -> Vendor {
        Vendor::Melonbooks
    }

    fn is_receipt(&self, mail: &dyn MailSource) -> bool {
        mail.subject() == SUBJECT
    }

    fn extract_order_blocks(
        &self,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<String> {
        let Some(text) = flat_body(mail, self.vendor(), sink) else {
            return Vec::new();
        };
        let blocks = sections(&text, order_header_re());
        if blocks.is_empty() {
            // Older mails carry a single order without the number header.
            return vec![text];
        }
        blocks.into_iter().map(str::to_string).collect()
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
        let items = match parse_items(block)? {
            Some(items) => items,
            None => {
                structural_miss(self.vendor(), "`●ご注文内容` section", sink);
                Vec::new()
            }
        };
        if items.is_empty() {
            sink.report(Diagnostic::new(Issue::MissingItems {
                order_id: order_id.clone(),
            }));
        }
        let shipping = labelled(block, shipping_re(), "送料")?.unwrap_or(0);
        let charge = labelled(block, charge_re(), "手数料")?.unwrap_or(0);
        let point_usage = labelled(block, point_usage_re(), "利用ポイント数")?.unwrap_or(0);
        let granted_point = labelled(block, granted_point_re(), "獲得予定ポイント数")?.unwrap_or(0);
        let total_payment = labelled(block, total_re(), "合計額")?;

        let granted = if granted_point != 0 {
            vec![RewardTranche::normal(granted_point)]
        } else {
            Vec::new()
        };
        let receipt = Receipt::builder(self.vendor(), mail_purchased_at(mail, self.vendor(), sink))
            .order_id(order_id)
            .items(items)
            .adjustment(AdjustmentKind::Shipping, shipping)
            .adjustment(AdjustmentKind::Charge, charge)
            .adjustment(AdjustmentKind::PointUsage, -point_usage.abs())
            .granted(granted)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::mail::TextMail;
    use chrono::DateTime;

    const ORDER: &str = "\
メロンブックス通販をご利用いただき誠にありがとうございます。

●ご注文番号
123456

●ご注文内容
商品名: 【特典付き】放課後さいころ倶楽部（１５）
数量: 1 個
単価: 682 円 + 消費税
商品合計額: 750 円 (税込)
商品名: ご注文はうさぎですか？　画集
数量: 2 個
単価: 2,000 円 + 消費税
商品合計額: 4,400 円 (税込)

●合計
商品合計: 5,150円(税込)
送料: 550円(税込)
手数料: 330円(税込)
利用ポイント数: 30
合計額: 6,000円(税込)
獲得予定ポイント数: 51
";

    fn mail(body: &str) -> TextMail {
        TextMail::new(
            SUBJECT,
            DateTime::parse_from_rfc3339("2021-07-01T18:00:00+09:00").ok(),
            body,
        )
    }

    fn parse_all(body: &str) -> (Vec<ParsedOrder>, Diagnostics) {
        let mail = mail(body);
        let mut sink = Diagnostics::new();
        let orders = MelonbooksParser
            .extract_order_blocks(&mail, &mut sink)
            .iter()
            .map(|block| {
                MelonbooksParser
                    .parse_order(block, &mail, &mut sink)
                    .expect("parse order block")
            })
            .collect();
        (orders, sink)
    }

    #[test]
    fn subject_must_match_exactly() {
        assert!(MelonbooksParser.is_receipt(&mail("")));
        let reply = TextMail::new(format!("Re: {SUBJECT}"), None, "");
        assert!(!MelonbooksParser.is_receipt(&reply));
    }

    #[test]
    fn order_parses_items_fees_and_points() {
        let (orders, sink) = parse_all(ORDER);
        assert!(sink.is_empty(), "{:?}", sink.into_vec());
        assert_eq!(orders.len(), 1);
        let receipt = &orders[0].receipt;
        assert_eq!(receipt.order_id(), Some("123456"));
        assert_eq!(
            receipt.items(),
            &[
                LineItem::new("放課後さいころ倶楽部 15", 750, 1),
                LineItem::new("ご注文はうさぎですか? 画集", 4400, 2),
            ]
        );
        assert_eq!(receipt.adjustment(AdjustmentKind::Shipping), 550);
        assert_eq!(receipt.adjustment(AdjustmentKind::Charge), 330);
        assert_eq!(receipt.adjustment(AdjustmentKind::PointUsage), -30);
        assert_eq!(receipt.granted(), &[RewardTranche::normal(51)]);
        assert_eq!(receipt.total_payment(), 6000);
        assert_eq!(orders[0].stated.total_payment, Some(6000));
    }

    #[test]
    fn each_order_number_header_starts_a_block() {
        let second = ORDER
            .replace("123456", "123457")
            .replace("メロンブックス通販をご利用いただき誠にありがとうございます。\n\n", "");
        let (orders, _) = parse_all(&format!("{ORDER}\n{second}"));
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].receipt.order_id(), Some("123456"));
        assert_eq!(orders[1].receipt.order_id(), Some("123457"));
        assert_eq!(orders[0].receipt.items().len(), 2);
        assert_eq!(orders[1].receipt.items().len(), 2);
    }

    #[test]
    fn body_without_order_number_is_one_block() {
        let body = ORDER.replace("●ご注文番号\n123456\n", "");
        let (orders, _) = parse_all(&body);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].receipt.order_id(), None);
        assert_eq!(orders[0].receipt.total_payment(), 6000);
    }

    #[test]
    fn missing_item_section_is_reported() {
        let (orders, sink) = parse_all("●ご注文番号\n1\n\n合計額: 0円(税込)\n");
        assert_eq!(orders.len(), 1);
        assert!(orders[0].receipt.items().is_empty());
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn multipart_mail_yields_no_blocks() {
        let mail = TextMail::multipart(SUBJECT, None, vec![ORDER.to_string()]);
        let mut sink = Diagnostics::new();
        assert!(MelonbooksParser
            .extract_order_blocks(&mail, &mut sink)
            .is_empty());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn malformed_shipping_fails_the_block() {
        let body = ORDER.replace("送料: 550円(税込)", "送料: 99,999,999,999,999,999円(税込)");
        let mail = mail(&body);
        let mut sink = Diagnostics::new();
        let blocks = MelonbooksParser.extract_order_blocks(&mail, &mut sink);
        let err = MelonbooksParser
            .parse_order(&blocks[0], &mail, &mut sink)
            .expect_err("malformed shipping");
        assert!(matches!(err, ParseError::MalformedAmount { .. }));
    }

    #[test]
    fn free_shipping_keeps_the_receipt() {
        let body = ORDER
            .replace("送料: 550円(税込)", "送料: 無料")
            .replace("合計額: 6,000円(税込)", "合計額: 5,450円(税込)");
        let (orders, sink) = parse_all(&body);
        assert!(sink.is_empty(), "{:?}", sink.into_vec());
        let receipt = &orders[0].receipt;
        assert_eq!(receipt.adjustment(AdjustmentKind::Shipping), 0);
        assert_eq!(receipt.total_payment(), 5450);
        assert_eq!(orders[0].stated.total_payment, Some(5450));
    }
}
