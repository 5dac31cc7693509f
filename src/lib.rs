pub mod aggregate;
mod amazon_receipt;
mod amount;
mod bookwalker_receipt;
pub mod collection;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ledger_export;
pub mod mail;
mod melonbooks_receipt;
pub mod normalize;
pub mod receipt;
pub mod validate;
pub mod vendor;
mod yodobashi_receipt;

pub use aggregate::{aggregate_target, aggregate_targets, clean_workspaces};
pub use amazon_receipt::AmazonParser;
pub use bookwalker_receipt::{layout_cutover, BookwalkerParser, CoinLayout};
pub use collection::{CollectedReceipt, ReceiptCollection, ScanSummary};
pub use config::{Config, Target};
pub use diagnostics::{Diagnostic, DiagnosticSink, Diagnostics, Issue, Severity};
pub use error::{Error, ParseError, Result};
pub use mail::{MailFile, MailSource, TextMail};
pub use melonbooks_receipt::MelonbooksParser;
pub use normalize::normalize_title;
pub use receipt::{
    AdjustmentKind, LineItem, PurchasedAt, Receipt, ReceiptKind, RewardTranche, TrancheCategory,
    Vendor,
};
pub use validate::reconcile;
pub use vendor::{parser_for, ParsedOrder, StatedTotals, VendorParser};
pub use yodobashi_receipt::YodobashiParser;
