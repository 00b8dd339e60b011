#![forbid(unsafe_code)]

const SCHEME_SEPARATOR: &str = "://";

/// Backends a stored blob's encrypted payload can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageScheme {
    Dash,
    Ipfs,
    Arweave,
}

impl StorageScheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dash => "dash",
            Self::Ipfs => "ipfs",
            Self::Arweave => "ar",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[Self::Dash, Self::Ipfs, Self::Arweave]
    }

    pub fn as_prefix(self) -> String {
        format!("{}{}", self.as_str(), SCHEME_SEPARATOR)
    }

    /// Content-addressed backends resolve by hash rather than by document id.
    pub const fn is_content_addressed(self) -> bool {
        matches!(self, Self::Ipfs | Self::Arweave)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSchemeError {
    pub uri: String,
    pub reason: &'static str,
}

impl std::fmt::Display for UnknownSchemeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown storage URI scheme ({}): {}", self.reason, self.uri)
    }
}

impl std::error::Error for UnknownSchemeError {}

/// Opaque `scheme://id` locator for a stored blob. The id is never empty, so
/// `format` always parses back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageUri {
    scheme: StorageScheme,
    id: String,
}

impl StorageUri {
    pub fn new(scheme: StorageScheme, id: impl Into<String>) -> Result<Self, UnknownSchemeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(UnknownSchemeError {
                uri: scheme.as_prefix(),
                reason: "empty id",
            });
        }
        Ok(Self { scheme, id })
    }

    pub fn scheme(&self) -> StorageScheme {
        self.scheme
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parse(uri: &str) -> Result<Self, UnknownSchemeError> {
        let Some((scheme_raw, id)) = uri.split_once(SCHEME_SEPARATOR) else {
            return Err(UnknownSchemeError {
                uri: uri.to_string(),
                reason: "missing scheme separator",
            });
        };
        let Some(scheme) = StorageScheme::parse(scheme_raw) else {
            return Err(UnknownSchemeError {
                uri: uri.to_string(),
                reason: "unsupported scheme",
            });
        };
        if id.is_empty() {
            return Err(UnknownSchemeError {
                uri: uri.to_string(),
                reason: "empty id",
            });
        }
        Ok(Self {
            scheme,
            id: id.to_string(),
        })
    }

    pub fn format(&self) -> String {
        format!("{}{}", self.scheme.as_prefix(), self.id)
    }
}

impl std::fmt::Display for StorageUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.scheme.as_str(), SCHEME_SEPARATOR, self.id)
    }
}

impl std::str::FromStr for StorageUri {
    type Err = UnknownSchemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
