//! Decision verdicts and system-override reason classification.

use serde::{Deserialize, Serialize};

/// A phase or final verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Grant,
    Deny,
    Unspecified,
}

impl Decision {
    pub fn from_bool(granted: bool) -> Self {
        if granted {
            Decision::Grant
        } else {
            Decision::Deny
        }
    }

    pub fn is_grant(&self) -> bool {
        matches!(self, Decision::Grant)
    }
}

/// Classified reasons for a system-override GRANT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantReason {
    Public,
    Visitor,
    AntiLockout,
    NotGranted,
}

/// Classified reasons for a system-override DENY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    JwtRequired,
    OperatorRequired,
    NotDenied,
}

/// Map a positive operation-policy result to its grant classification.
/// Unknown magnitudes classify as `NOT_GRANTED` rather than failing.
pub fn classify_grant(magnitude: i64) -> GrantReason {
    match magnitude {
        1 => GrantReason::Public,
        2 => GrantReason::Visitor,
        3 => GrantReason::AntiLockout,
        _ => GrantReason::NotGranted,
    }
}

/// Map a negative operation-policy result's magnitude to its deny
/// classification.
pub fn classify_deny(magnitude: i64) -> DenyReason {
    match magnitude {
        1 => DenyReason::JwtRequired,
        2 => DenyReason::OperatorRequired,
        _ => DenyReason::NotDenied,
    }
}

/// The outcome of the operation phase, driving composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemVerdict {
    /// The operation policy granted outright.
    Override(OverrideKind),
    /// Defer to the identity, resource, and scope phases.
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    Grant(GrantReason),
    Deny(DenyReason),
}

impl OverrideKind {
    /// Classify a non-zero integer result from the operation policy.
    pub fn classify(result: i64) -> Self {
        if result > 0 {
            OverrideKind::Grant(classify_grant(result))
        } else {
            OverrideKind::Deny(classify_deny(-result))
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            OverrideKind::Grant(_) => Decision::Grant,
            OverrideKind::Deny(_) => Decision::Deny,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_serialize_uppercase() {
        assert_eq!(serde_json::to_string(&Decision::Grant).unwrap(), "\"GRANT\"");
        assert_eq!(serde_json::to_string(&Decision::Deny).unwrap(), "\"DENY\"");
    }

    #[test]
    fn reasons_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&DenyReason::JwtRequired).unwrap(),
            "\"JWT_REQUIRED\""
        );
        assert_eq!(
            serde_json::to_string(&GrantReason::AntiLockout).unwrap(),
            "\"ANTI_LOCKOUT\""
        );
    }

    #[test]
    fn classification_handles_known_and_unknown_magnitudes() {
        assert_eq!(
            OverrideKind::classify(-1),
            OverrideKind::Deny(DenyReason::JwtRequired)
        );
        assert_eq!(
            OverrideKind::classify(-2),
            OverrideKind::Deny(DenyReason::OperatorRequired)
        );
        assert_eq!(
            OverrideKind::classify(-99),
            OverrideKind::Deny(DenyReason::NotDenied)
        );
        assert_eq!(
            OverrideKind::classify(1),
            OverrideKind::Grant(GrantReason::Public)
        );
        assert_eq!(
            OverrideKind::classify(3),
            OverrideKind::Grant(GrantReason::AntiLockout)
        );
        assert_eq!(
            OverrideKind::classify(42),
            OverrideKind::Grant(GrantReason::NotGranted)
        );
    }
}
