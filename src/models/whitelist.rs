//! Whitelist entries.

use sqlx::FromRow;

/// What a whitelist entry names: a single project or a whole family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Family,
    Project,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Family => "FAMILY",
            Self::Project => "PROJECT",
        }
    }

    /// Case-insensitive parse, as typed by the user in `whitelist_add`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FAMILY" => Some(Self::Family),
            "PROJECT" => Some(Self::Project),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One whitelist row. `(reviewer_login, entry_type, name)` is the identity.
#[derive(Debug, Clone, FromRow)]
pub struct WhitelistEntry {
    pub reviewer_login: String,

    /// `FAMILY` or `PROJECT`.
    pub entry_type: String,

    /// Project name or family label, verbatim.
    pub name: String,
}

impl WhitelistEntry {
    pub fn new(reviewer_login: impl Into<String>, kind: EntryKind, name: impl Into<String>) -> Self {
        Self {
            reviewer_login: reviewer_login.into(),
            entry_type: kind.as_str().to_string(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> Option<EntryKind> {
        EntryKind::parse(&self.entry_type)
    }
}
