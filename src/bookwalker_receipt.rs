//! BOOK☆WALKER order confirmations.
//!
//! The granted-coin section changed layout at 2019-03-27 13:00 JST. Before
//! the cutover the mail states the granted total and names only the limited
//! tranches, so the normal tranche is whatever is left over. From the cutover
//! on, every tranche is listed with its rate, e.g. `┗ 50 coins (期間限定) 5%`.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::amount::{parse_count, parse_grouped, NUMERAL};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Issue};
use crate::error::ParseError;
use crate::mail::MailSource;
use crate::normalize::normalize_title;
use crate::receipt::{
    AdjustmentKind, LineItem, PurchasedAt, Receipt, ReceiptKind, RewardTranche, Vendor,
};
use crate::vendor::{
    flat_body, localize, mail_purchased_at, sections, structural_miss, ParsedOrder, StatedTotals,
    VendorParser,
};

const SUBJECT_MARKER: &str = "Order Confirmation";
const PRE_ORDER_SUBJECT_MARKER: &str = "Order Confirmation for Pre-ordered eBooks";

/// 2019-03-27 13:00 JST.
const LAYOUT_CUTOVER_UNIX: i64 = 1_553_659_200;

pub fn layout_cutover() -> DateTime<Utc> {
    // The constant is well inside chrono's range, so the fallback is never taken.
    DateTime::from_timestamp(LAYOUT_CUTOVER_UNIX, 0).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinLayout {
    /// Normal tranche derived from the stated total.
    DerivedNormal,
    /// Every tranche listed with its rate.
    Itemized,
}

impl CoinLayout {
    pub fn for_purchase(at: &PurchasedAt) -> Self {
        if at.instant().timestamp() < LAYOUT_CUTOVER_UNIX {
            Self::DerivedNormal
        } else {
            Self::Itemized
        }
    }
}

/// Amount token as printed after a label: `JPY 1,000`, `JPY -100` or `20`.
fn amount_pattern() -> String {
    format!(r"-?[ \t]*(?:JPY)?[ \t]*{NUMERAL}")
}

/// A `■Label: value` line.
struct Field {
    label: &'static str,
    re: OnceLock<Regex>,
    amount_re: OnceLock<Regex>,
}

impl Field {
    const fn new(label: &'static str) -> Self {
        Self {
            label,
            re: OnceLock::new(),
            amount_re: OnceLock::new(),
        }
    }

    fn re(&self) -> &Regex {
        self.re.get_or_init(|| {
            Regex::new(&format!(
                r"(?m)^■{}[ \t]*[:：][ \t　]*(?P<value>.+)$",
                regex::escape(self.label)
            ))
            .expect("invalid field regex")
        })
    }

    fn value<'a>(&self, block: &'a str) -> Option<&'a str> {
        self.re()
            .captures(block)
            .and_then(|caps| caps.name("value"))
            .map(|m| m.as_str().trim())
    }

    fn amount_re(&self) -> &Regex {
        self.amount_re.get_or_init(|| {
            Regex::new(&format!(
                r"(?m)^■{}[ \t]*[:：][ \t　]*(?P<value>{})",
                regex::escape(self.label),
                amount_pattern()
            ))
            .expect("invalid field amount regex")
        })
    }

    /// The labelled amount. A label whose value holds no numeral reads as absent.
    fn amount(&self, block: &str) -> Result<Option<i64>, ParseError> {
        self.amount_re()
            .captures(block)
            .map(|caps| parse_jpy(self.label, &caps["value"]))
            .transpose()
    }
}

static ORDER_NUMBER: Field = Field::new("Order Number");
static PURCHASED_DATE: Field = Field::new("Purchased Date");
static COUPON_DISCOUNT: Field = Field::new("Coupon Discount");
static TAX: Field = Field::new("Tax");
static COIN_USAGE: Field = Field::new("Coin Usage (1 Coin = JPY 1)");
static TOTAL_AMOUNT: Field = Field::new("Total Amount");
static TOTAL_PAYMENT: Field = Field::new("Total Payment");
static BONUS_COIN: Field = Field::new("Bonus Coin");

fn order_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\[Your Order\]\n━+\n").expect("invalid order header regex"))
}

fn heavy_rule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^━+\n").expect("invalid heavy rule regex"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{2,}").expect("invalid blank lines regex"))
}

fn book_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?m)^■(?:Title / )?Item[ \t]*[:：][ \t　]*(?P<name>.+)\n■Price[ \t]*[:：][ \t　]*(?P<price>{})",
            amount_pattern()
        ))
        .expect("invalid book item regex")
    })
}

fn coin_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^■Item[ \t]*[:：][ \t　]*(?P<name>BOOK☆WALKER 期間限定コイン .+)\n■Amount[ \t]*[:：][ \t　]*(?P<amount>[0-9,]+)",
        )
        .expect("invalid coin item regex")
    })
}

fn coin_bundle_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^BOOK☆WALKER 期間限定コイン .+").expect("invalid coin name regex"))
}

fn granted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^■Granted Coin[ \t]*[:：][ \t　]*(?P<total>[0-9,]+)[ \t]*coins?[ \t]*\n(?P<tranches>(?:[ \t　]*[┗-].*\n)*)",
        )
        .expect("invalid granted coin regex")
    })
}

fn itemized_tranche_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[ \t　]*[┗-][ \t　]*(?P<coin>[0-9,]+)[ \t]*coins?[ \t]*\((?P<label>.+?)\)[ \t]*(?P<rate>[0-9]+)[ \t]*%",
        )
        .expect("invalid itemized tranche regex")
    })
}

fn limited_tranche_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[ \t　]*[┗-][ \t　]*(?P<label>[^:：]+?)[ \t　]*[:：][ \t　]*(?P<coin>[0-9,]+)[ \t]*coins?",
        )
        .expect("invalid limited tranche regex")
    })
}

fn jpy_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<pre>-)?[ \t]*(?:JPY)?[ \t]*(?P<post>-)?[ \t]*(?P<value>[0-9,]+)(?:[ \t]*\(\+Tax\))?$")
            .expect("invalid jpy token regex")
    })
}

fn purchased_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<y>[0-9]{4})/(?P<mo>[0-9]{1,2})/(?P<d>[0-9]{1,2})[ \t]+(?P<h>[0-9]{1,2}):(?P<mi>[0-9]{2})(?::(?P<s>[0-9]{2}))?[ \t]*\((?P<zone>[^)]+)\)",
        )
        .expect("invalid purchased date regex")
    })
}

/// `JPY 1,000`, `JPY -100`, `JPY 700 (+Tax)` or a bare `20`.
fn parse_jpy(label: &str, raw: &str) -> Result<i64, ParseError> {
    let caps = jpy_token_re()
        .captures(raw.trim())
        .ok_or_else(|| ParseError::malformed(label, raw))?;
    let value = parse_grouped(label, &caps["value"])?;
    let negative = caps.name("pre").is_some() || caps.name("post").is_some();
    Ok(if negative { -value } else { value })
}

fn parse_purchased_date(raw: &str) -> Option<PurchasedAt> {
    let caps = purchased_date_re().captures(raw.trim())?;
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());
    let year = caps["y"].parse::<i32>().ok()?;
    let local = NaiveDate::from_ymd_opt(year, num("mo")?, num("d")?)?.and_hms_opt(
        num("h")?,
        num("mi")?,
        num("s").unwrap_or(0),
    )?;
    Some(localize(local, &caps["zone"]))
}

/// Strips the `[Your Order]` header, everything after the last heavy rule,
/// inner heavy rules and blank lines.
fn clean_order_section(section: &str) -> Option<String> {
    let header = order_header_re().find(section)?;
    let last_rule = heavy_rule_re().find_iter(section).last()?;
    if last_rule.start() < header.end() {
        return None;
    }
    let body = &section[header.end()..last_rule.start()];
    let body = heavy_rule_re().replace_all(body, "");
    Some(blank_lines_re().replace_all(&body, "\n").to_string())
}

struct RawItem {
    name: String,
    price: i64,
    quantity: u32,
}

fn parse_raw_items(block: &str) -> Result<Vec<RawItem>, ParseError> {
    let mut items = Vec::new();
    for caps in book_item_re().captures_iter(block) {
        items.push(RawItem {
            name: caps["name"].trim().to_string(),
            price: parse_jpy("Price", &caps["price"])?,
            quantity: 1,
        });
    }
    if let Some(caps) = coin_item_re().captures(block) {
        if let Some(price) = TOTAL_PAYMENT.amount(block)? {
            items.push(RawItem {
                name: caps["name"].trim().to_string(),
                price,
                quantity: parse_count("Amount", &caps["amount"])?,
            });
        }
    }
    Ok(items)
}

fn tranche_category(label: &str, amount: i64) -> RewardTranche {
    let label = label.trim();
    if label.contains("通常") || label.to_ascii_lowercase().contains("normal") {
        RewardTranche::normal(amount)
    } else {
        RewardTranche::limited(label, amount)
    }
}

/// Granted tranches (bonus excluded) and the stated granted total.
fn parse_granted(
    block: &str,
    layout: CoinLayout,
) -> Result<(Vec<RewardTranche>, Option<i64>), ParseError> {
    let Some(caps) = granted_re().captures(block) else {
        return Ok((Vec::new(), None));
    };
    let total = parse_grouped("Granted Coin", &caps["total"])?;
    let lines = caps.name("tranches").map_or("", |m| m.as_str()).lines();
    let tranches = match layout {
        CoinLayout::Itemized => {
            let mut tranches = Vec::new();
            for line in lines {
                if let Some(t) = itemized_tranche_re().captures(line) {
                    // The rate is informational; only the coin count is kept.
                    let coin = parse_grouped("Granted Coin", &t["coin"])?;
                    tranches.push(tranche_category(&t["label"], coin));
                }
            }
            tranches
        }
        CoinLayout::DerivedNormal => {
            let mut limited = Vec::new();
            for line in lines {
                if let Some(t) = limited_tranche_re().captures(line) {
                    let coin = parse_grouped("Granted Coin", &t["coin"])?;
                    limited.push(RewardTranche::limited(t["label"].trim(), coin));
                }
            }
            let limited_sum = limited.iter().map(|t| t.amount).sum::<i64>();
            if limited_sum > total {
                return Err(ParseError::NegativeTranche {
                    total,
                    limited: limited_sum,
                });
            }
            let mut tranches = vec![RewardTranche::normal(total - limited_sum)];
            tranches.extend(limited);
            tranches
        }
    };
    Ok((tranches, Some(total)))
}

fn parse_bonus(block: &str) -> Result<Option<RewardTranche>, ParseError> {
    Ok(BONUS_COIN.amount(block)?.map(RewardTranche::bonus))
}

pub struct BookwalkerParser;

impl BookwalkerParser {
    fn kind_for(&self, mail: &dyn MailSource, raw_names: &[&str]) -> ReceiptKind {
        if mail.subject().contains(PRE_ORDER_SUBJECT_MARKER) {
            ReceiptKind::PreOrder
        } else if raw_names.iter().any(|n| coin_bundle_name_re().is_match(n)) {
            ReceiptKind::Coin
        } else {
            ReceiptKind::Order
        }
    }

    /// Kind of the first order in the mail, `None` when there is no order.
    pub fn receipt_kind(&self, mail: &dyn MailSource, sink: &mut dyn DiagnosticSink) -> ReceiptKind {
        let blocks = self.extract_order_blocks(mail, sink);
        let Some(block) = blocks.first() else {
            return ReceiptKind::None;
        };
        let names = parse_raw_items(block)
            .map(|items| items.into_iter().map(|i| i.name).collect::<Vec<_>>())
            .unwrap_or_default();
        let names = names.iter().map(String::as_str).collect::<Vec<_>>();
        self.kind_for(mail, &names)
    }
}

impl VendorParser for BookwalkerParser {
    fn vendor(&self) -> Vendor {
        Vendor::Bookwalker
    }

    fn is_receipt(&self, mail: &dyn MailSource) -> bool {
        mail.subject().contains(SUBJECT_MARKER)
    }

    fn extract_order_blocks(
        &self,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Vec<String> {
        let Some(text) = flat_body(mail, self.vendor(), sink) else {
            return Vec::new();
        };
        let found = sections(&text, order_header_re());
        let blocks = found
            .iter()
            .filter_map(|section| clean_order_section(section))
            .collect::<Vec<_>>();
        if blocks.len() < found.len() {
            structural_miss(self.vendor(), "closing rule of a `[Your Order]` section", sink);
        } else if blocks.is_empty() {
            structural_miss(self.vendor(), "`[Your Order]` section", sink);
        }
        blocks
    }

    fn parse_order(
        &self,
        block: &str,
        mail: &dyn MailSource,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<ParsedOrder, ParseError> {
        let order_id = ORDER_NUMBER.value(block).map(str::to_string);
        let raw_items = parse_raw_items(block)?;
        if raw_items.is_empty() {
            sink.report(Diagnostic::new(Issue::MissingItems {
                order_id: order_id.clone(),
            }));
        }
        let names = raw_items.iter().map(|i| i.name.as_str()).collect::<Vec<_>>();
        let kind = self.kind_for(mail, &names);

        let purchased_at = match PURCHASED_DATE.value(block) {
            Some(raw) => match parse_purchased_date(raw) {
                Some(at) => at,
                None => {
                    sink.report(Diagnostic::structural(format!(
                        "{}: unreadable purchase date {raw:?}",
                        self.vendor()
                    )));
                    mail_purchased_at(mail, self.vendor(), sink)
                }
            },
            None => mail_purchased_at(mail, self.vendor(), sink),
        };

        let discount = COUPON_DISCOUNT.amount(block)?.map_or(0, |v| -v.abs());
        let tax = TAX.amount(block)?.unwrap_or(0);
        let coin_usage = COIN_USAGE.amount(block)?.map_or(0, |v| -v.abs());
        let total_amount = TOTAL_AMOUNT.amount(block)?;
        let total_payment = TOTAL_PAYMENT.amount(block)?;

        let (mut granted, stated_granted) =
            parse_granted(block, CoinLayout::for_purchase(&purchased_at))?;
        if let Some(bonus) = parse_bonus(block)? {
            granted.push(bonus);
        }

        let items = raw_items
            .into_iter()
            .map(|item| LineItem::new(normalize_title(&item.name), item.price, item.quantity))
            .collect();
        let receipt = Receipt::builder(self.vendor(), purchased_at)
            .kind(kind)
            .order_id(order_id)
            .items(items)
            .adjustment(AdjustmentKind::Discount, discount)
            .adjustment(AdjustmentKind::Tax, tax)
            .adjustment(AdjustmentKind::CoinUsage, coin_usage)
            .granted(granted)
            .build();
        Ok(ParsedOrder {
            receipt,
            stated: StatedTotals {
                total_amount,
                total_payment,
                granted: stated_granted,
            },
        })
    }
}
