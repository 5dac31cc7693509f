//! Title normalization applied to item names before they are stored.
//!
//! `normalize_title` is idempotent: running it on its own output is a no-op.
//! The rewrite steps that could cascade (tag stripping, volume suffixes) run
//! to a fixpoint, and escaping skips metacharacters that already carry an
//! escaping backslash.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

const MARKDOWN_SYMBOLS: [char; 4] = ['*', '_', '\\', '~'];

const FULLWIDTH_FIRST: u32 = 0xFF01;
const FULLWIDTH_LAST: u32 = 0xFF5E;
const FULLWIDTH_OFFSET: u32 = 0xFF01 - 0x21;

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid ws regex"))
}

fn promo_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"【[^【】]*?(?:電子|特典|無料|オフ|(?i:off))[^【】]*?】")
            .expect("invalid promo tag regex")
    })
}

fn set_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"【([^【】]*セット)】").expect("invalid set tag regex"))
}

fn paren_volume_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\(([0-9]+)\)\s*$").expect("invalid paren volume regex"))
}

fn colon_volume_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*:\s+([0-9]+)\s*$").expect("invalid colon volume regex"))
}

fn named_volume_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s*(?:第\s*([0-9]+)\s*巻|([0-9]+)\s*巻|\b(?i:vol(?:ume)?)\.?\s*([0-9]+))\s*$")
            .expect("invalid named volume regex")
    })
}

fn coin_bundle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^BOOK☆WALKER 期間限定コイン ([0-9,]+)円分").expect("invalid coin bundle regex")
    })
}

/// NFKC plus the wave-dash fix-up NFKC leaves alone.
pub fn normalize_unicode(s: &str) -> String {
    s.nfkc()
        .map(|c| if c == '〜' { '～' } else { c })
        .collect()
}

/// Folds the fullwidth ASCII block onto ASCII; halfwidth input passes through.
pub fn fullwidth_to_halfwidth(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '　' => ' ',
            '・' => '･',
            '「' => '｢',
            '」' => '｣',
            _ => {
                let code = c as u32;
                if (FULLWIDTH_FIRST..=FULLWIDTH_LAST).contains(&code) {
                    char::from_u32(code - FULLWIDTH_OFFSET).unwrap_or(c)
                } else {
                    c
                }
            }
        })
        .collect()
}

/// Escapes `*`, `_`, `\` and `~` for a markdown table cell. A backslash
/// already followed by one of those symbols is kept as an escape pair.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if !MARKDOWN_SYMBOLS.contains(&c) {
            out.push(c);
            continue;
        }
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if MARKDOWN_SYMBOLS.contains(&next) {
                    out.push(c);
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push('\\');
        out.push(c);
    }
    out
}

fn collapse_ws(s: &str) -> String {
    ws_re().replace_all(s.trim(), " ").trim().to_string()
}

fn until_stable(mut current: String, step: impl Fn(&str) -> String) -> String {
    loop {
        let next = step(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_set_tags(s: &str) -> String {
    let labels = set_tag_re()
        .captures_iter(s)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect::<Vec<_>>();
    if labels.is_empty() {
        return s.to_string();
    }
    let mut out = set_tag_re().replace_all(s, " ").to_string();
    for label in labels {
        out.push(' ');
        out.push_str(&label);
    }
    out
}

fn rewrite_volume_suffix(s: &str) -> String {
    let s = s.trim();
    for re in [paren_volume_re(), colon_volume_re(), named_volume_re()] {
        if let Some(caps) = re.captures(s) {
            let number = caps
                .iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str())
                .unwrap_or_default();
            let Some(whole) = caps.get(0) else {
                continue;
            };
            return format!("{} {number}", &s[..whole.start()]);
        }
    }
    s.to_string()
}

fn strip_noise(s: &str) -> String {
    let s = until_stable(s.to_string(), |t| {
        promo_tag_re().replace_all(t, " ").to_string()
    });
    let s = collapse_ws(&until_stable(s, strip_set_tags));
    collapse_ws(&until_stable(s, rewrite_volume_suffix))
}

fn rewrite_coin_bundle(s: &str) -> Cow<'_, str> {
    match coin_bundle_re().captures(s).and_then(|caps| caps.get(1)) {
        Some(coin) => Cow::Owned(format!("期間限定コイン {}円分", coin.as_str().replace(',', ""))),
        None => Cow::Borrowed(s),
    }
}

pub fn normalize_title(raw: &str) -> String {
    let s = normalize_unicode(raw);
    let s = fullwidth_to_halfwidth(&s);
    let s = escape_markdown(&s);
    let s = strip_noise(&s);
    rewrite_coin_bundle(&s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "Foo Bar (2)",
        "【電子版】ソードアート・オンライン(21)",
        "【期間限定 特典付き】転生したら　スライムだった件 第１２巻",
        "ＡＢＣ　１２３：　４",
        "A〜B * C_D \\ E",
        "Re:ゼロから始める異世界生活: 3",
        "【3冊セット】とある魔術の禁書目録 Vol.5",
        "「鬼滅の刃」 23巻",
        "BOOK☆WALKER 期間限定コイン 1,000円分",
        "  spaced   out   title  ",
        "\\\\*already escaped",
        "【電【特典】子】nested",
        "【50%OFF】Title: (2)",
    ];

    #[test]
    fn trailing_parenthesized_volume_becomes_plain_number() {
        assert_eq!(normalize_title("Foo Bar (2)"), "Foo Bar 2");
        assert_eq!(normalize_title("Foo Bar（２）"), "Foo Bar 2");
        assert_eq!(normalize_title("Title: 12"), "Title 12");
    }

    #[test]
    fn named_volume_suffixes_become_plain_number() {
        assert_eq!(normalize_title("魔法少女 第3巻"), "魔法少女 3");
        assert_eq!(normalize_title("魔法少女 3巻"), "魔法少女 3");
        assert_eq!(normalize_title("Magic Girl Vol. 7"), "Magic Girl 7");
        assert_eq!(normalize_title("Magic Girl volume 7"), "Magic Girl 7");
    }

    #[test]
    fn promotional_tags_are_removed() {
        assert_eq!(
            normalize_title("【電子版】ソードアート・オンライン(21)"),
            "ソードアート･オンライン 21"
        );
        assert_eq!(normalize_title("【50%OFF】Title"), "Title");
        assert_eq!(normalize_title("【特典付き】Title【連載】"), "Title【連載】");
    }

    #[test]
    fn set_qualifier_moves_to_trailing_label() {
        assert_eq!(
            normalize_title("【3冊セット】とある物語"),
            "とある物語 3冊セット"
        );
    }

    #[test]
    fn markdown_symbols_are_escaped_once() {
        assert_eq!(escape_markdown("a*b_c~d\\e"), "a\\*b\\_c\\~d\\\\e");
        assert_eq!(escape_markdown("a\\*b"), "a\\*b");
        assert_eq!(normalize_title("A〜B"), "A\\~B");
    }

    #[test]
    fn coin_bundle_is_rewritten_to_canonical_phrase() {
        assert_eq!(
            normalize_title("BOOK☆WALKER 期間限定コイン 1,000円分"),
            "期間限定コイン 1000円分"
        );
        assert_eq!(
            normalize_title("BOOK☆WALKER 期間限定コイン 10,000円分 (キャンペーン)"),
            "期間限定コイン 10000円分"
        );
    }

    #[test]
    fn fullwidth_folding_is_noop_on_halfwidth_text() {
        let ascii = (0x21u8..=0x7e).map(char::from).collect::<String>();
        assert_eq!(fullwidth_to_halfwidth(&ascii), ascii);
        let folded = fullwidth_to_halfwidth("ＡＢＣ！～　「・」");
        assert_eq!(folded, "ABC!~ ｢･｣");
        assert_eq!(fullwidth_to_halfwidth(&folded), folded);
    }

    #[test]
    fn normalize_title_is_idempotent() {
        for sample in SAMPLES {
            let once = normalize_title(sample);
            let twice = normalize_title(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }
}
