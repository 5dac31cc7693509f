//! Renders receipts as a markdown journal and as a GnuCash import CSV.
//!
//! Every GnuCash record balances to zero: the debit rows (items, fees,
//! granted rewards) are offset by payment and granted-reward credit rows.

use chrono::{Datelike, NaiveDate, TimeZone};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::receipt::{AdjustmentKind, Receipt, ReceiptKind, Vendor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownRow {
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownRecord {
    pub description: &'static str,
    pub rows: Vec<MarkdownRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GnuCashRow {
    pub account: &'static str,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GnuCashRecord {
    pub description: &'static str,
    pub rows: Vec<GnuCashRow>,
}

impl GnuCashRecord {
    /// Sum of all row values; zero for a well-formed record.
    pub fn balance(&self) -> i64 {
        self.rows.iter().map(|row| row.value).sum()
    }

    fn push(&mut self, account: &'static str, value: i64) {
        self.rows.push(GnuCashRow { account, value });
    }

    fn push_nonzero(&mut self, account: &'static str, value: i64) {
        if value != 0 {
            self.push(account, value);
        }
    }
}

/// Ledger description for a receipt.
pub fn describe(receipt: &Receipt) -> &'static str {
    match receipt.vendor() {
        Vendor::Amazon => "Amazon",
        Vendor::Bookwalker if receipt.kind() == ReceiptKind::Coin => "BOOK☆WALKER コイン購入",
        Vendor::Bookwalker => "BOOK☆WALKER",
        Vendor::Melonbooks => "Melonbooks 通販",
        Vendor::Yodobashi => "yodobashi.com",
    }
}

fn adjustment_rows(vendor: Vendor) -> &'static [(AdjustmentKind, &'static str)] {
    match vendor {
        Vendor::Amazon => &[
            (AdjustmentKind::Shipping, "送料･手数料"),
            (AdjustmentKind::Discount, "割引"),
        ],
        Vendor::Bookwalker => &[
            (AdjustmentKind::Discount, "クーポン割引"),
            (AdjustmentKind::Tax, "消費税"),
            (AdjustmentKind::CoinUsage, "コイン利用"),
        ],
        Vendor::Melonbooks => &[
            (AdjustmentKind::Shipping, "送料"),
            (AdjustmentKind::Charge, "手数料"),
            (AdjustmentKind::PointUsage, "ポイント利用"),
        ],
        Vendor::Yodobashi => &[
            (AdjustmentKind::Shipping, "送料"),
            (AdjustmentKind::PointUsage, "ゴールドポイント"),
        ],
    }
}

pub fn markdown_record(receipt: &Receipt) -> MarkdownRecord {
    let mut rows = receipt
        .items()
        .iter()
        .map(|item| MarkdownRow {
            name: if item.quantity > 1 {
                format!("{} x{}", item.name, item.quantity)
            } else {
                item.name.clone()
            },
            price: item.price,
        })
        .collect::<Vec<_>>();
    for &(kind, name) in adjustment_rows(receipt.vendor()) {
        let price = receipt.adjustment(kind);
        if price != 0 {
            rows.push(MarkdownRow {
                name: name.to_string(),
                price,
            });
        }
    }
    MarkdownRecord {
        description: describe(receipt),
        rows,
    }
}

pub fn gnucash_record(receipt: &Receipt) -> GnuCashRecord {
    let mut record = GnuCashRecord {
        description: describe(receipt),
        rows: Vec::new(),
    };
    let granted = receipt.total_granted();
    match receipt.vendor() {
        Vendor::Amazon => {
            record.push("item", receipt.item_total());
            record.push_nonzero("shipping", receipt.adjustment(AdjustmentKind::Shipping));
            record.push_nonzero("discount", receipt.adjustment(AdjustmentKind::Discount));
            record.push("payment", -receipt.total_payment());
        }
        Vendor::Bookwalker if receipt.kind() == ReceiptKind::Coin => {
            record.push("coin", receipt.total_amount() + granted);
            record.push("payment", -receipt.total_amount());
            record.push("granted coin", -granted);
        }
        Vendor::Bookwalker => {
            record.push("book", receipt.total_amount());
            record.push("coin", granted);
            record.push_nonzero("payment", -receipt.total_payment());
            record.push_nonzero("coin", receipt.adjustment(AdjustmentKind::CoinUsage));
            if receipt.granted().is_empty() {
                record.push("granted coin", 0);
            }
            for tranche in receipt.granted() {
                record.push("granted coin", -tranche.amount);
            }
        }
        Vendor::Melonbooks => {
            record.push("item", receipt.item_total());
            record.push_nonzero("shipping", receipt.adjustment(AdjustmentKind::Shipping));
            record.push_nonzero("charge", receipt.adjustment(AdjustmentKind::Charge));
            record.push_nonzero("point", granted);
            record.push_nonzero("point", receipt.adjustment(AdjustmentKind::PointUsage));
            record.push("payment", -receipt.total_payment());
            record.push_nonzero("granted point", -granted);
        }
        Vendor::Yodobashi => {
            record.push("item", receipt.item_total());
            record.push_nonzero("shipping", receipt.adjustment(AdjustmentKind::Shipping));
            record.push_nonzero("point", granted);
            record.push("payment", -receipt.total_payment());
            record.push_nonzero("point", receipt.adjustment(AdjustmentKind::PointUsage));
            record.push_nonzero("granted point", -granted);
        }
    }
    record
}

/// Writes `|day|HH:MM|description|name|price|` rows, opening each new local
/// day with a `#YYYY/MM/DD` line. `receipts` must already be sorted.
pub fn write_markdown<'a, W, Z>(
    mut out: W,
    receipts: impl IntoIterator<Item = &'a Receipt>,
    tz: &Z,
) -> io::Result<()>
where
    W: Write,
    Z: TimeZone,
{
    let mut last_date: Option<NaiveDate> = None;
    for receipt in receipts {
        let record = markdown_record(receipt);
        let time = receipt.purchased_at().local_in(tz);
        if last_date != Some(time.date()) {
            last_date = Some(time.date());
            writeln!(out, "#{}", time.format("%Y/%m/%d"))?;
        }
        for (i, row) in record.rows.iter().enumerate() {
            if i == 0 {
                writeln!(
                    out,
                    "|{}|{}|{}|{}|{}|",
                    time.day(),
                    time.format("%H:%M"),
                    record.description,
                    row.name,
                    row.price
                )?;
            } else {
                writeln!(out, "||||{}|{}|", row.name, row.price)?;
            }
        }
    }
    out.flush()
}

/// Writes `date,number,description,account,value` rows without a header
/// line. The number is the local purchase minute, suffixed with `#` when it
/// repeats the previous receipt's.
pub fn write_gnucash_csv<'a, W, Z>(
    out: W,
    receipts: impl IntoIterator<Item = &'a Receipt>,
    tz: &Z,
) -> Result<(), csv::Error>
where
    W: Write,
    Z: TimeZone,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    let mut last_number: Option<String> = None;
    for receipt in receipts {
        let record = gnucash_record(receipt);
        let time = receipt.purchased_at().local_in(tz);
        let date = time.format("%Y-%m-%d").to_string();
        let mut number = time.format("%Y%m%d%H%M").to_string();
        if last_number.as_deref() == Some(number.as_str()) {
            number.push('#');
        }
        last_number = Some(number.clone());
        for (i, row) in record.rows.iter().enumerate() {
            let value = row.value.to_string();
            let head = if i == 0 {
                [date.as_str(), number.as_str(), record.description]
            } else {
                ["", "", ""]
            };
            writer.write_record([head[0], head[1], head[2], row.account, value.as_str()])?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn export_markdown<'a, Z: TimeZone>(
    path: &Path,
    receipts: impl IntoIterator<Item = &'a Receipt>,
    tz: &Z,
) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    write_markdown(BufWriter::new(file), receipts, tz).map_err(|e| Error::io(path, e))
}

pub fn export_gnucash_csv<'a, Z: TimeZone>(
    path: &Path,
    receipts: impl IntoIterator<Item = &'a Receipt>,
    tz: &Z,
) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    write_gnucash_csv(BufWriter::new(file), receipts, tz)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::{LineItem, PurchasedAt, RewardTranche};
    use chrono::DateTime;
    use chrono_tz::Asia::Tokyo;

    fn at(rfc3339: &str) -> PurchasedAt {
        PurchasedAt::Zoned(DateTime::parse_from_rfc3339(rfc3339).expect("date"))
    }

    fn yodobashi() -> Receipt {
        Receipt::builder(Vendor::Yodobashi, at("2020-11-20T08:30:00+09:00"))
            .items(vec![
                LineItem::new("マウス", 1500, 1),
                LineItem::new("乾電池", 500, 2),
            ])
            .adjustment(AdjustmentKind::PointUsage, -300)
            .granted(vec![RewardTranche::normal(50)])
            .build()
    }

    fn bookwalker() -> Receipt {
        Receipt::builder(Vendor::Bookwalker, at("2019-04-01T21:05:00+09:00"))
            .items(vec![
                LineItem::new("ソードアート･オンライン 21", 500, 1),
                LineItem::new("とある魔術の禁書目録 3", 700, 1),
            ])
            .adjustment(AdjustmentKind::Discount, -100)
            .adjustment(AdjustmentKind::Tax, 88)
            .adjustment(AdjustmentKind::CoinUsage, -188)
            .granted(vec![
                RewardTranche::normal(10),
                RewardTranche::limited("期間限定コイン", 50),
                RewardTranche::bonus(20),
            ])
            .build()
    }

    fn coin_purchase() -> Receipt {
        Receipt::builder(Vendor::Bookwalker, at("2020-01-10T09:00:00+09:00"))
            .kind(ReceiptKind::Coin)
            .items(vec![LineItem::new("期間限定コイン 1000円分", 1000, 1)])
            .granted(vec![RewardTranche::limited("期間限定コイン", 100)])
            .build()
    }

    fn amazon(at_str: &str) -> Receipt {
        Receipt::builder(Vendor::Amazon, at(at_str))
            .items(vec![LineItem::new("Foo Bar 2", 1000, 1)])
            .adjustment(AdjustmentKind::Shipping, 200)
            .adjustment(AdjustmentKind::Discount, -100)
            .build()
    }

    fn melonbooks() -> Receipt {
        Receipt::builder(Vendor::Melonbooks, at("2021-07-01T18:00:00+09:00"))
            .items(vec![LineItem::new("画集", 4400, 2)])
            .adjustment(AdjustmentKind::Shipping, 550)
            .adjustment(AdjustmentKind::Charge, 330)
            .adjustment(AdjustmentKind::PointUsage, -30)
            .granted(vec![RewardTranche::normal(44)])
            .build()
    }

    #[test]
    fn yodobashi_record_credits_granted_points() {
        let record = gnucash_record(&yodobashi());
        assert_eq!(
            record.rows,
            vec![
                GnuCashRow { account: "item", value: 2000 },
                GnuCashRow { account: "point", value: 50 },
                GnuCashRow { account: "payment", value: -1700 },
                GnuCashRow { account: "point", value: -300 },
                GnuCashRow { account: "granted point", value: -50 },
            ]
        );
    }

    #[test]
    fn every_vendor_record_balances() {
        for receipt in [
            yodobashi(),
            bookwalker(),
            coin_purchase(),
            amazon("2020-03-14T10:15:00+09:00"),
            melonbooks(),
        ] {
            let record = gnucash_record(&receipt);
            assert_eq!(record.balance(), 0, "{record:?}");
        }
    }

    #[test]
    fn bookwalker_order_lists_each_granted_tranche() {
        let record = gnucash_record(&bookwalker());
        assert_eq!(record.description, "BOOK☆WALKER");
        let granted = record
            .rows
            .iter()
            .filter(|row| row.account == "granted coin")
            .map(|row| row.value)
            .collect::<Vec<_>>();
        assert_eq!(granted, vec![-10, -50, -20]);
        assert_eq!(gnucash_record(&coin_purchase()).description, "BOOK☆WALKER コイン購入");
    }

    #[test]
    fn markdown_rows_follow_items_then_adjustments() {
        let record = markdown_record(&yodobashi());
        assert_eq!(record.description, "yodobashi.com");
        let rows = record
            .rows
            .iter()
            .map(|row| (row.name.as_str(), row.price))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![("マウス", 1500), ("乾電池 x2", 500), ("ゴールドポイント", -300)]
        );
    }

    #[test]
    fn markdown_groups_by_local_day() {
        let receipts = vec![
            amazon("2020-03-14T10:15:00+09:00"),
            amazon("2020-03-14T23:30:00+09:00"),
            // 2020-03-15 00:10 JST
            amazon("2020-03-14T15:10:00+00:00"),
        ];
        let mut out = Vec::new();
        write_markdown(&mut out, &receipts, &Tokyo).expect("write markdown");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(
            text,
            "\
#2020/03/14
|14|10:15|Amazon|Foo Bar 2|1000|
||||送料･手数料|200|
||||割引|-100|
|14|23:30|Amazon|Foo Bar 2|1000|
||||送料･手数料|200|
||||割引|-100|
#2020/03/15
|15|00:10|Amazon|Foo Bar 2|1000|
||||送料･手数料|200|
||||割引|-100|
"
        );
    }

    #[test]
    fn gnucash_csv_marks_repeated_minutes() {
        let receipts = vec![
            amazon("2020-03-14T10:15:00+09:00"),
            amazon("2020-03-14T10:15:30+09:00"),
        ];
        let mut out = Vec::new();
        write_gnucash_csv(&mut out, &receipts, &Tokyo).expect("write csv");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(
            text,
            "\
2020-03-14,202003141015,Amazon,item,1000
,,,shipping,200
,,,discount,-100
,,,payment,-1100
2020-03-14,202003141015#,Amazon,item,1000
,,,shipping,200
,,,discount,-100
,,,payment,-1100
"
        );
    }

    #[test]
    fn export_writes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let receipts = vec![melonbooks()];
        let md = dir.path().join("melonbooks.md");
        let csv_path = dir.path().join("melonbooks.csv");
        export_markdown(&md, &receipts, &Tokyo).expect("markdown");
        export_gnucash_csv(&csv_path, &receipts, &Tokyo).expect("csv");
        let markdown = std::fs::read_to_string(&md).expect("read md");
        assert!(markdown.contains("|1|18:00|Melonbooks 通販|画集 x2|4400|"), "{markdown}");
        assert!(markdown.contains("||||ポイント利用|-30|"));
        let csv_text = std::fs::read_to_string(&csv_path).expect("read csv");
        assert!(csv_text.contains(",,,charge,330"), "{csv_text}");
        assert!(csv_text.contains(",,,granted point,-44"));
    }
}
