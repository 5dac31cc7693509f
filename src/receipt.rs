//! Canonical receipt model shared by every vendor parser.
//!
//! Adjustments are stored signed the way they move the payable total:
//! shipping, tax and charges are positive, discounts and point/coin usages
//! are negative. Vendors that print a usage as a positive number to be
//! subtracted are negated by their parser, so the totals below never need to
//! know which vendor a receipt came from.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Amazon,
    Bookwalker,
    Melonbooks,
    Yodobashi,
}

impl Vendor {
    pub const ALL: [Vendor; 4] = [
        Vendor::Amazon,
        Vendor::Bookwalker,
        Vendor::Melonbooks,
        Vendor::Yodobashi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Bookwalker => "bookwalker",
            Self::Melonbooks => "melonbooks",
            Self::Yodobashi => "yodobashi",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Vendor::ALL
            .into_iter()
            .find(|v| v.as_str() == key)
            .ok_or_else(|| Error::UnknownVendor(s.to_string()))
    }
}

/// Distinguishes media purchases from coin top-ups. Only BOOK☆WALKER
/// receipts use anything but `Order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    None,
    Order,
    PreOrder,
    Coin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub name: String,
    /// Line subtotal in yen, never a per-unit price.
    pub price: i64,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(name: impl Into<String>, price: i64, quantity: u32) -> Self {
        Self {
            name: name.into(),
            price,
            quantity: quantity.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Shipping,
    Discount,
    Tax,
    Charge,
    PointUsage,
    CoinUsage,
}

impl AdjustmentKind {
    pub fn is_usage(self) -> bool {
        matches!(self, Self::PointUsage | Self::CoinUsage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrancheCategory {
    Normal,
    Limited(String),
    Bonus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardTranche {
    pub category: TrancheCategory,
    pub amount: i64,
}

impl RewardTranche {
    pub fn normal(amount: i64) -> Self {
        Self {
            category: TrancheCategory::Normal,
            amount,
        }
    }

    pub fn limited(label: impl Into<String>, amount: i64) -> Self {
        Self {
            category: TrancheCategory::Limited(label.into()),
            amount,
        }
    }

    pub fn bonus(amount: i64) -> Self {
        Self {
            category: TrancheCategory::Bonus,
            amount,
        }
    }
}

/// Purchase time. A timestamp whose zone name could not be resolved stays
/// naive and is ordered as if it were UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PurchasedAt {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl PurchasedAt {
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            Self::Zoned(at) => at.with_timezone(&Utc),
            Self::Naive(at) => at.and_utc(),
        }
    }

    /// Wall-clock time in `tz`; naive timestamps are shown as written.
    pub fn local_in<Tz: TimeZone>(&self, tz: &Tz) -> NaiveDateTime {
        match self {
            Self::Zoned(at) => at.with_timezone(tz).naive_local(),
            Self::Naive(at) => *at,
        }
    }
}

impl From<DateTime<FixedOffset>> for PurchasedAt {
    fn from(at: DateTime<FixedOffset>) -> Self {
        Self::Zoned(at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    vendor: Vendor,
    kind: ReceiptKind,
    order_id: Option<String>,
    items: Vec<LineItem>,
    adjustments: BTreeMap<AdjustmentKind, i64>,
    granted: Vec<RewardTranche>,
    purchased_at: PurchasedAt,
}

impl Receipt {
    pub(crate) fn builder(vendor: Vendor, purchased_at: PurchasedAt) -> ReceiptBuilder {
        ReceiptBuilder {
            receipt: Receipt {
                vendor,
                kind: ReceiptKind::Order,
                order_id: None,
                items: Vec::new(),
                adjustments: BTreeMap::new(),
                granted: Vec::new(),
                purchased_at,
            },
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn kind(&self) -> ReceiptKind {
        self.kind
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn adjustment(&self, kind: AdjustmentKind) -> i64 {
        self.adjustments.get(&kind).copied().unwrap_or(0)
    }

    pub fn adjustments(&self) -> impl Iterator<Item = (AdjustmentKind, i64)> + '_ {
        self.adjustments.iter().map(|(k, v)| (*k, *v))
    }

    pub fn granted(&self) -> &[RewardTranche] {
        &self.granted
    }

    pub fn purchased_at(&self) -> PurchasedAt {
        self.purchased_at
    }

    pub fn item_total(&self) -> i64 {
        self.items.iter().map(|item| item.price).sum()
    }

    /// Items plus every adjustment that is not a point/coin usage.
    pub fn total_amount(&self) -> i64 {
        self.item_total()
            + self
                .adjustments
                .iter()
                .filter(|(kind, _)| !kind.is_usage())
                .map(|(_, v)| v)
                .sum::<i64>()
    }

    pub fn total_usage(&self) -> i64 {
        self.adjustments
            .iter()
            .filter(|(kind, _)| kind.is_usage())
            .map(|(_, v)| v)
            .sum()
    }

    pub fn total_payment(&self) -> i64 {
        self.total_amount() + self.total_usage()
    }

    pub fn total_granted(&self) -> i64 {
        self.granted.iter().map(|t| t.amount).sum()
    }

    /// Granted reward without the bonus tranche, which vendors state apart
    /// from the granted total.
    pub fn granted_before_bonus(&self) -> i64 {
        self.granted
            .iter()
            .filter(|t| t.category != TrancheCategory::Bonus)
            .map(|t| t.amount)
            .sum()
    }
}

pub(crate) struct ReceiptBuilder {
    receipt: Receipt,
}

impl ReceiptBuilder {
    pub(crate) fn kind(mut self, kind: ReceiptKind) -> Self {
        self.receipt.kind = kind;
        self
    }

    pub(crate) fn order_id(mut self, order_id: Option<String>) -> Self {
        self.receipt.order_id = order_id.filter(|id| !id.is_empty());
        self
    }

    pub(crate) fn items(mut self, items: Vec<LineItem>) -> Self {
        self.receipt.items = items;
        self
    }

    pub(crate) fn adjustment(mut self, kind: AdjustmentKind, value: i64) -> Self {
        if value != 0 {
            self.receipt.adjustments.insert(kind, value);
        }
        self
    }

    pub(crate) fn granted(mut self, granted: Vec<RewardTranche>) -> Self {
        self.receipt.granted = granted;
        self
    }

    pub(crate) fn build(self) -> Receipt {
        self.receipt
    }
}
