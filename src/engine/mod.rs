//! The decision engine.
//!
//! Answers one question: given a PORC request (principal, operation,
//! resource, context), is the request permitted? Four phases evaluate
//! concurrently - SYSTEM (operation), IDENTITY (roles), RESOURCE
//! (resource-group), SCOPE - and compose conjunctively, with the operation
//! phase able to bypass the rest with a classified system override. Every
//! decision emits an access record unless probe mode suppresses it.

pub mod compose;
pub mod config;
pub mod decision;
mod phases;
pub mod record;

pub use config::EngineConfig;
pub use decision::{Decision, DenyReason, GrantReason};
pub use phases::{ALLOW_QUERY, API_SCOPE_MRN};
pub use record::{AccessRecord, BundleReference, Phase};

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, trace};

use crate::access_log::AccessLogSink;
use crate::domain::ResolvedResource;
use crate::error::ReasonCode;
use crate::registry::Registry;

use decision::OverrideKind;
use phases::{PhaseInput, ResourceState};

/// An authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Porc {
    #[serde(default)]
    pub principal: Value,
    pub operation: String,
    pub resource: PorcResource,
    #[serde(default)]
    pub context: Value,
}

/// The resource half of a PORC: an MRN to resolve through the selector
/// tables, or a pre-resolved object used as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PorcResource {
    Mrn(String),
    Object(ResolvedResource),
}

/// Per-call authorization options.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizeOptions {
    /// Return the decision without emitting an access record.
    pub probe: bool,
    /// Deadline propagated to every policy evaluation.
    pub deadline: Option<Instant>,
}

/// The policy decision engine. Cheap to share; all state is read-only.
pub struct Engine {
    registry: Arc<Registry>,
    config: EngineConfig,
    access_log: Arc<dyn AccessLogSink>,
}

impl Engine {
    /// Wrap a compiled registry.
    ///
    /// Build the registry with this configuration's compiler
    /// ([`EngineConfig::compiler`]) so the configured builtin deny-list
    /// holds for everything the engine evaluates.
    pub fn new(
        registry: Registry,
        config: EngineConfig,
        access_log: Arc<dyn AccessLogSink>,
    ) -> Self {
        Engine {
            registry: Arc::new(registry),
            config,
            access_log,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decide a PORC request.
    ///
    /// The outcome is always a boolean; diagnostic detail lives on the
    /// emitted access record. Failures inside phases convert to DENY votes
    /// rather than call errors.
    #[instrument(name = "authorize", skip(self, porc), fields(operation = %porc.operation))]
    pub async fn authorize(&self, porc: Porc, opts: AuthorizeOptions) -> bool {
        let mut principal = match porc.principal {
            Value::Null => json!({}),
            other => other,
        };

        // Normalize the resource. A failed MRN resolution is remembered for
        // the resource phase; the operation phase still sees a bare
        // `{id: mrn}` substitute.
        let (resolved, resource_state) = match porc.resource {
            PorcResource::Mrn(mrn) => match self.registry.get_resource(&mrn) {
                Ok(resolved) => {
                    let state = ResourceState::Resolved(resolved.clone());
                    (resolved, state)
                }
                Err(e) => {
                    debug!("resource {mrn} did not resolve: {e}");
                    let state = ResourceState::Failed {
                        id: mrn.clone(),
                        reason_code: e.reason_code(),
                        reason: e.to_string(),
                    };
                    (ResolvedResource::bare(mrn), state)
                }
            },
            PorcResource::Object(resource) => {
                let state = ResourceState::Resolved(resource.clone());
                (resource, state)
            }
        };

        compose::inject_annotations(&self.registry, &mut principal);

        let subject = text_field(&principal, "sub");
        let realm = text_field(&principal, "mrealm");
        let roles = list_field(&principal, "mroles");
        let scopes = list_field(&principal, "scopes");

        let mut record = AccessRecord::skeleton(
            subject,
            realm,
            porc.operation.clone(),
            resolved.id.clone(),
            self.config.env.clone(),
        );

        let input = json!({
            "principal": principal,
            "operation": porc.operation.clone(),
            "resource": resolved,
            "context": porc.context,
        });
        match serde_json::to_string(&input) {
            Ok(encoded) => record.porc = encoded,
            Err(e) => {
                // Nothing can be evaluated against an unserializable PORC.
                record.decision = Decision::Deny;
                record.references.push(BundleReference::failure(
                    record.resource.clone(),
                    Phase::Resource,
                    Vec::new(),
                    ReasonCode::InvalidParam,
                    format!("PORC is not JSON-serializable: {e}"),
                    None,
                ));
                self.emit(record, &opts);
                return false;
            }
        }

        let ctx = PhaseInput {
            registry: Arc::clone(&self.registry),
            input: Arc::new(input),
            deadline: opts.deadline,
        };

        let (system, identity, resource, scope) = tokio::join!(
            phases::system_phase(&ctx, &porc.operation),
            phases::identity_phase(&ctx, &roles),
            phases::resource_phase(&ctx, &resource_state),
            phases::scope_phase(&ctx, &scopes),
        );

        match system.override_kind {
            Some(kind) => {
                record.decision = kind.decision();
                record.system_override = true;
                match kind {
                    OverrideKind::Grant(reason) => record.grant_reason = Some(reason),
                    OverrideKind::Deny(reason) => record.deny_reason = Some(reason),
                }
                record.references = system.references;
                if self.config.include_all_bundles {
                    record.references.extend(identity.references);
                    record.references.extend(resource.references);
                    record.references.extend(scope.references);
                }
            }
            None => {
                let granted = identity.verdict.is_grant()
                    && resource.verdict.is_grant()
                    && scope.verdict.is_grant();
                record.decision = Decision::from_bool(granted);
                record.references = system.references;
                record.references.extend(identity.references);
                record.references.extend(resource.references);
                record.references.extend(scope.references);
            }
        }

        trace!(
            decision = ?record.decision,
            references = record.references.len(),
            system_override = record.system_override,
            "decision composed"
        );

        let granted = record.decision.is_grant();
        self.emit(record, &opts);
        granted
    }

    fn emit(&self, record: AccessRecord, opts: &AuthorizeOptions) {
        if opts.probe {
            trace!("probe mode: access record suppressed");
            return;
        }
        self.access_log.send(record);
    }
}

fn text_field(principal: &Value, key: &str) -> String {
    principal
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn list_field(principal: &Value, key: &str) -> Vec<String> {
    principal
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
