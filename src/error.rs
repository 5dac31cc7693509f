use thiserror::Error;

/// Failure confined to a single order block. The block is skipped and the
/// scan carries on with the next one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed amount for `{label}`: {raw:?}")]
    MalformedAmount { label: String, raw: String },

    #[error("granted total {total} is smaller than the limited tranches ({limited})")]
    NegativeTranche { total: i64, limited: i64 },
}

impl ParseError {
    pub(crate) fn malformed(label: &str, raw: &str) -> Self {
        Self::MalformedAmount {
            label: label.to_string(),
            raw: raw.trim().to_string(),
        }
    }
}

/// Errors from the outer layers: reading mail files, config, exports.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse mail MIME structure: {0}")]
    MailParse(#[from] mailparse::MailParseError),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("unknown vendor `{0}` (expected amazon, bookwalker, melonbooks or yodobashi)")]
    UnknownVendor(String),

    #[error("unknown time zone `{0}`")]
    UnknownTimezone(String),

    #[error("no target named `{0}` in config")]
    UnknownTarget(String),
}

impl Error {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
