use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;

/// What a custom domain does: serve the environment or redirect to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKind {
    Route,
    /// Redirect with one of 301, 302, 307, 308
    Redirect(u16),
}

impl DomainKind {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Redirect(301 | 308))
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route => f.write_str("route"),
            Self::Redirect(code) => write!(f, "{}", code),
        }
    }
}

impl FromStr for DomainKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "route" => Ok(Self::Route),
            "301" => Ok(Self::Redirect(301)),
            "302" => Ok(Self::Redirect(302)),
            "307" => Ok(Self::Redirect(307)),
            "308" => Ok(Self::Redirect(308)),
            other => Err(AppError::Internal(format!(
                "Unknown DomainKind value: {}",
                other
            ))),
        }
    }
}

impl Serialize for DomainKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DomainKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Pending,
    Active,
    Disabled,
    Failed,
}

string_enum!(DomainStatus {
    Pending => "pending",
    Active => "active",
    Disabled => "disabled",
    Failed => "failed",
});

/// Custom hostname bound to a project environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub project_id: Uuid,
    pub hostname: String,
    pub environment_id: String,
    pub kind: DomainKind,
    pub status: DomainStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_kind_parse() {
        assert_eq!("route".parse::<DomainKind>().unwrap(), DomainKind::Route);
        assert_eq!(
            "308".parse::<DomainKind>().unwrap(),
            DomainKind::Redirect(308)
        );
        assert!("303".parse::<DomainKind>().is_err());
    }

    #[test]
    fn test_permanent_redirects() {
        assert!(DomainKind::Redirect(301).is_permanent());
        assert!(DomainKind::Redirect(308).is_permanent());
        assert!(!DomainKind::Redirect(302).is_permanent());
        assert!(!DomainKind::Redirect(307).is_permanent());
        assert!(!DomainKind::Route.is_permanent());
    }
}
