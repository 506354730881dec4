use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Record permission levels, totally ordered.
///
/// `NONE < READ < READ_RESTRICTED < WRITE < WRITE_RESTRICTED < DELETE`.
/// A grant covers every level at or below it; the variant order below is the
/// order used by the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolePermission {
    #[default]
    None,
    Read,
    ReadRestricted,
    Write,
    WriteRestricted,
    Delete,
}

impl RolePermission {
    pub const ALL: [RolePermission; 6] = [
        RolePermission::None,
        RolePermission::Read,
        RolePermission::ReadRestricted,
        RolePermission::Write,
        RolePermission::WriteRestricted,
        RolePermission::Delete,
    ];

    /// True when this grant reaches `required`
    pub fn covers(self, required: RolePermission) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RolePermission::None => "NONE",
            RolePermission::Read => "READ",
            RolePermission::ReadRestricted => "READ_RESTRICTED",
            RolePermission::Write => "WRITE",
            RolePermission::WriteRestricted => "WRITE_RESTRICTED",
            RolePermission::Delete => "DELETE",
        }
    }

    /// Parse a stored value, degrading unknown text to `NONE`
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown permission value '{}', treating as NONE", value);
            RolePermission::None
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown permission: {0}")]
pub struct ParsePermissionError(pub String);

impl FromStr for RolePermission {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| ParsePermissionError(s.to_string()))
    }
}

impl std::fmt::Display for RolePermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_lattice() {
        for pair in RolePermission::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn higher_grant_covers_lower() {
        assert!(RolePermission::Delete.covers(RolePermission::Write));
        assert!(RolePermission::WriteRestricted.covers(RolePermission::Write));
        assert!(RolePermission::ReadRestricted.covers(RolePermission::Read));
        assert!(!RolePermission::ReadRestricted.covers(RolePermission::Write));
        assert!(!RolePermission::None.covers(RolePermission::Read));
        assert!(RolePermission::None.covers(RolePermission::None));
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("write_restricted".parse::<RolePermission>().unwrap(), RolePermission::WriteRestricted);
        assert_eq!(" DELETE ".parse::<RolePermission>().unwrap(), RolePermission::Delete);
        assert!("ADMIN".parse::<RolePermission>().is_err());
        assert_eq!(RolePermission::parse_lenient("ADMIN"), RolePermission::None);
    }

    #[test]
    fn serializes_as_upper_snake() {
        let v = serde_json::to_value(RolePermission::ReadRestricted).unwrap();
        assert_eq!(v, serde_json::json!("READ_RESTRICTED"));
    }
}
