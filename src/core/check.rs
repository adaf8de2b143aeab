use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A category of checks. Declaration order is the canonical scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Storage,
    Iam,
    Networking,
    Compute,
    AuditLogging,
}

impl CheckType {
    pub const ALL: [CheckType; 5] = [
        CheckType::Storage,
        CheckType::Iam,
        CheckType::Networking,
        CheckType::Compute,
        CheckType::AuditLogging,
    ];

    /// Selection used when the caller does not name any categories.
    pub const DEFAULT: [CheckType; 4] = [
        CheckType::Storage,
        CheckType::Iam,
        CheckType::Networking,
        CheckType::Compute,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            CheckType::Storage => "storage",
            CheckType::Iam => "iam",
            CheckType::Networking => "networking",
            CheckType::Compute => "compute",
            CheckType::AuditLogging => "audit_logging",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            CheckType::Storage => "storage",
            CheckType::Iam => "IAM",
            CheckType::Networking => "networking",
            CheckType::Compute => "compute",
            CheckType::AuditLogging => "audit logging",
        }
    }

    /// Parses a comma separated list, e.g. `storage,iam`.
    pub fn parse_list(s: &str) -> Result<Vec<CheckType>, String> {
        let mut out = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let check = part.parse::<CheckType>()?;
            if !out.contains(&check) {
                out.push(check);
            }
        }
        Ok(out)
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "storage" => Ok(CheckType::Storage),
            "iam" => Ok(CheckType::Iam),
            "networking" => Ok(CheckType::Networking),
            "compute" => Ok(CheckType::Compute),
            "audit_logging" | "audit" => Ok(CheckType::AuditLogging),
            other => Err(format!(
                "unknown check type: {other} (expected storage|iam|networking|compute|audit_logging)"
            )),
        }
    }
}
