use chrono_tz::Tz;
use std::fs;
use tracing::info;

use crate::collection::{ReceiptCollection, ScanSummary};
use crate::config::{Config, Target};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Issue};
use crate::error::{Error, Result};
use crate::ledger_export::{export_gnucash_csv, export_markdown};
use crate::vendor::parser_for;

/// Scans `<workspace>/mail` and writes `<name>.md` and `<name>.csv` next to it.
pub fn aggregate_target(
    name: &str,
    target: &Target,
    tz: &Tz,
    sink: &mut dyn DiagnosticSink,
) -> Result<ScanSummary> {
    let vendor = target.vendor()?;
    let parser = parser_for(vendor);
    let mail_dir = target.mail_dir();
    info!(target_name = name, %vendor, dir = %mail_dir.display(), "scanning mails");
    let collection = ReceiptCollection::scan_dir(parser.as_ref(), &mail_dir, sink)?;

    let markdown = target.markdown_path(name);
    export_markdown(&markdown, collection.receipts(), tz)?;
    let csv = target.csv_path(name);
    export_gnucash_csv(&csv, collection.receipts(), tz)?;

    let summary = collection.summary();
    info!(
        target_name = name,
        mails = summary.mails_read,
        receipt_mails = summary.receipt_mails,
        receipts = summary.receipts,
        unreconciled = summary.unreconciled,
        failed_mails = summary.failed_mails,
        failed_blocks = summary.failed_blocks,
        markdown = %markdown.display(),
        csv = %csv.display(),
        "aggregated"
    );
    Ok(summary)
}

/// Aggregates the named target, or every target in name order. A target that
/// fails is reported to `sink` as [`Issue::TargetFailed`] and the rest still
/// run. Returns the summaries of the targets that were written.
pub fn aggregate_targets(
    config: &Config,
    name: Option<&str>,
    sink: &mut dyn DiagnosticSink,
) -> Result<Vec<(String, ScanSummary)>> {
    let tz = config.tz()?;
    let mut done = Vec::new();
    for (name, target) in config.selected(name)? {
        match aggregate_target(name, target, &tz, sink) {
            Ok(summary) => done.push((name.to_string(), summary)),
            Err(err) => sink.report(Diagnostic {
                origin: name.to_string(),
                issue: Issue::TargetFailed {
                    error: err.to_string(),
                },
            }),
        }
    }
    Ok(done)
}

/// Removes every target workspace that exists. Returns how many were removed.
pub fn clean_workspaces(config: &Config) -> Result<usize> {
    let mut removed = 0;
    for (name, target) in &config.target {
        if !target.workspace.exists() {
            continue;
        }
        fs::remove_dir_all(&target.workspace).map_err(|e| Error::io(&target.workspace, e))?;
        info!(target_name = %name, workspace = %target.workspace.display(), "removed workspace");
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;

    const MAIL: &str = "\
Subject: =?UTF-8?B?44Oo44OJ44OQ44K344O744OJ44OD44OI44O744Kz44Og77ya44GU5rOo5paH44GC44KK44GM44Go44GG44GU44GW44GE44G+44GZ?=
Date: Fri, 20 Nov 2020 08:30:00 +0900
Content-Type: text/plain; charset=utf-8

【ご注文商品】
----------------------------------------
・「ワイヤレスマウス」
　　合計 1 点　　2,000 円

【お支払方法】
クレジットカード

・配達料金：　0 円
今回のご利用ゴールドポイント数　300 ポイント
今回の還元ゴールドポイント数　50 ポイント
";

    fn config_for(workspace: &std::path::Path) -> Config {
        let text = format!(
            "[target.yodobashi]\nvendor = \"yodobashi\"\nworkspace = {:?}\n",
            workspace.display().to_string()
        );
        Config::from_toml_str(&text).expect("config")
    }

    #[test]
    fn aggregate_writes_markdown_and_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().join("yodobashi");
        fs::create_dir_all(workspace.join("mail")).expect("mkdir");
        fs::write(workspace.join("mail").join("1"), MAIL.replace('\n', "\r\n")).expect("write mail");

        let config = config_for(&workspace);
        let target = config.target("yodobashi").expect("target");
        let mut sink = Diagnostics::new();
        let summary = aggregate_target(
            "yodobashi",
            target,
            &config.tz().expect("tz"),
            &mut sink,
        )
        .expect("aggregate");
        assert_eq!(summary.receipts, 1);
        assert!(!sink.has_errors());

        let markdown = fs::read_to_string(workspace.join("yodobashi.md")).expect("md");
        assert_eq!(
            markdown,
            "#2020/11/20\n|20|08:30|yodobashi.com|ワイヤレスマウス|2000|\n||||ゴールドポイント|-300|\n"
        );
        let csv = fs::read_to_string(workspace.join("yodobashi.csv")).expect("csv");
        assert!(csv.starts_with("2020-11-20,202011200830,yodobashi.com,item,2000\n"), "{csv}");
        assert!(csv.contains(",,,payment,-1700\n"));
        assert!(csv.ends_with(",,,granted point,-50\n"));
    }

    #[test]
    fn failed_target_does_not_stop_later_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent");
        let workspace = dir.path().join("yodobashi");
        fs::create_dir_all(workspace.join("mail")).expect("mkdir");
        fs::write(workspace.join("mail").join("1"), MAIL.replace('\n', "\r\n")).expect("write mail");
        let text = format!(
            "[target.a_missing]\nvendor = \"yodobashi\"\nworkspace = {:?}\n\n[target.yodobashi]\nvendor = \"yodobashi\"\nworkspace = {:?}\n",
            missing.display().to_string(),
            workspace.display().to_string()
        );
        let config = Config::from_toml_str(&text).expect("config");

        let mut sink = Diagnostics::new();
        let done = aggregate_targets(&config, None, &mut sink).expect("aggregate");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, "yodobashi");
        assert_eq!(done[0].1.receipts, 1);
        assert!(workspace.join("yodobashi.md").exists());
        let failed = sink
            .iter()
            .filter(|d| matches!(d.issue, Issue::TargetFailed { .. }))
            .map(|d| d.origin.as_str())
            .collect::<Vec<_>>();
        assert_eq!(failed, vec!["a_missing"]);
    }

    #[test]
    fn clean_removes_existing_workspaces_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().join("yodobashi");
        fs::create_dir_all(workspace.join("mail")).expect("mkdir");
        let config = config_for(&workspace);
        assert_eq!(clean_workspaces(&config).expect("clean"), 1);
        assert!(!workspace.exists());
        assert_eq!(clean_workspaces(&config).expect("clean again"), 0);
    }
}
