//! Access records - the per-decision audit artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ReasonCode;
use crate::registry::PolicyRef;

use super::decision::{Decision, DenyReason, GrantReason};

/// The evaluation phase a bundle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    System,
    Identity,
    Resource,
    Scope,
}

/// One policy bundle consulted during a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleReference {
    /// The entity the bundle was evaluated for (role, scope, resource-group,
    /// or operation-policy MRN).
    pub id: String,
    pub phase: Phase,
    /// The policy and its library closure, with content fingerprints.
    #[serde(default)]
    pub policies: Vec<PolicyRef>,
    pub decision: Decision,
    pub reason_code: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Wall-clock evaluation time in nanoseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl BundleReference {
    /// A clean policy outcome.
    pub fn outcome(
        id: impl Into<String>,
        phase: Phase,
        policies: Vec<PolicyRef>,
        decision: Decision,
        duration: Option<u64>,
    ) -> Self {
        BundleReference {
            id: id.into(),
            phase,
            policies,
            decision,
            reason_code: ReasonCode::PolicyOutcome,
            reason: None,
            duration,
        }
    }

    /// A bundle that failed; failures vote DENY.
    pub fn failure(
        id: impl Into<String>,
        phase: Phase,
        policies: Vec<PolicyRef>,
        reason_code: ReasonCode,
        reason: impl Into<String>,
        duration: Option<u64>,
    ) -> Self {
        BundleReference {
            id: id.into(),
            phase,
            policies,
            decision: Decision::Deny,
            reason_code,
            reason: Some(reason.into()),
            duration,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub timestamp: DateTime<Utc>,
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPrincipal {
    pub subject: String,
    pub realm: String,
}

/// The audit record emitted for every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub metadata: RecordMetadata,
    pub principal: RecordPrincipal,
    pub operation: String,
    pub resource: String,
    pub decision: Decision,
    pub references: Vec<BundleReference>,
    /// The final PORC, JSON-encoded for replay.
    pub porc: String,
    pub system_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_reason: Option<GrantReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<DenyReason>,
}

impl AccessRecord {
    /// A fresh skeleton with an UNSPECIFIED decision; the engine fills in
    /// the rest as phases complete.
    pub fn skeleton(
        subject: String,
        realm: String,
        operation: String,
        resource: String,
        env: Option<Value>,
    ) -> Self {
        AccessRecord {
            metadata: RecordMetadata {
                timestamp: Utc::now(),
                id: Uuid::new_v4(),
                env,
            },
            principal: RecordPrincipal { subject, realm },
            operation,
            resource,
            decision: Decision::Unspecified,
            references: Vec::new(),
            porc: String::new(),
            system_override: false,
            grant_reason: None,
            deny_reason: None,
        }
    }
}
