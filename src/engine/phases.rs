//! The four evaluation phases.
//!
//! Each phase produces a verdict plus the bundle references it consulted, in
//! input order. Evaluations are CPU-bound and run on the blocking pool so
//! that independent bundles progress in parallel; fan-out order never leaks
//! into reference order because `join_all` preserves it.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tokio::task;

use crate::domain::ResolvedResource;
use crate::error::ReasonCode;
use crate::registry::{CompiledUnit, Registry};

use super::decision::{Decision, OverrideKind};
use super::record::{BundleReference, Phase};

/// The rule every policy exports.
pub const ALLOW_QUERY: &str = "data.authz.allow";

/// The well-known scope that short-circuits the scope phase. Preserved for
/// compatibility with existing domains; new domains should not depend on it.
pub const API_SCOPE_MRN: &str = "mrn:iam:scope:api";

/// Shared, read-only state for one authorization request.
pub(crate) struct PhaseInput {
    pub registry: Arc<Registry>,
    /// The final PORC, annotations composed, resource normalized.
    pub input: Arc<Value>,
    pub deadline: Option<Instant>,
}

/// One phase's contribution to the decision.
pub(crate) struct PhaseResult {
    pub verdict: Decision,
    pub references: Vec<BundleReference>,
    /// Set only by the operation phase on a non-zero result.
    pub override_kind: Option<OverrideKind>,
}

impl PhaseResult {
    fn unspecified() -> Self {
        PhaseResult {
            verdict: Decision::Unspecified,
            references: Vec::new(),
            override_kind: None,
        }
    }

    fn granted_without_bundles() -> Self {
        PhaseResult {
            verdict: Decision::Grant,
            references: Vec::new(),
            override_kind: None,
        }
    }
}

/// Operation phase: the matched operation policy may bypass the remaining
/// phases with a classified GRANT or DENY.
pub(crate) async fn system_phase(ctx: &PhaseInput, operation: &str) -> PhaseResult {
    let Some((policy_mrn, unit)) = ctx.registry.get_operation(operation) else {
        return PhaseResult::unspecified();
    };

    let refs = unit.refs.clone();
    let (outcome, duration) = evaluate(ctx, unit).await;
    let bundle = match outcome {
        Ok(value) => match value.as_i64() {
            Some(0) => BundleReference::outcome(
                &policy_mrn,
                Phase::System,
                refs,
                Decision::Unspecified,
                Some(duration),
            ),
            Some(result) => {
                let kind = OverrideKind::classify(result);
                let bundle = BundleReference::outcome(
                    &policy_mrn,
                    Phase::System,
                    refs,
                    kind.decision(),
                    Some(duration),
                );
                return PhaseResult {
                    verdict: kind.decision(),
                    references: vec![bundle],
                    override_kind: Some(kind),
                };
            }
            None => BundleReference::failure(
                &policy_mrn,
                Phase::System,
                refs,
                ReasonCode::Evaluation,
                format!("operation policy must produce an integer, got {value}"),
                Some(duration),
            ),
        },
        Err(bundle_error) => bundle_error.into_bundle(&policy_mrn, Phase::System, refs, duration),
    };

    // Errors and zero results defer to the remaining phases; an operation
    // policy failure never manufactures an override.
    PhaseResult {
        verdict: Decision::Unspecified,
        references: vec![bundle],
        override_kind: None,
    }
}

/// Identity phase: one bundle per role, GRANT iff any role votes GRANT.
pub(crate) async fn identity_phase(ctx: &PhaseInput, roles: &[String]) -> PhaseResult {
    let bundles = join_all(
        roles
            .iter()
            .map(|mrn| role_bundle(ctx, mrn.clone())),
    )
    .await;
    or_compose(bundles)
}

async fn role_bundle(ctx: &PhaseInput, mrn: String) -> BundleReference {
    match ctx.registry.get_role(&mrn) {
        Ok(handle) => boolean_bundle(ctx, mrn, Phase::Identity, handle.unit).await,
        Err(e) => BundleReference::failure(
            mrn,
            Phase::Identity,
            Vec::new(),
            e.reason_code(),
            e.to_string(),
            None,
        ),
    }
}

/// How the resource phase sees the request after normalization.
pub(crate) enum ResourceState {
    /// Resolution succeeded (or the caller supplied an object).
    Resolved(ResolvedResource),
    /// MRN resolution failed before fan-out; the recorded reason denies the
    /// phase outright.
    Failed {
        id: String,
        reason_code: ReasonCode,
        reason: String,
    },
}

/// Resource phase: the resolved resource-group's policy decides.
pub(crate) async fn resource_phase(ctx: &PhaseInput, state: &ResourceState) -> PhaseResult {
    let resource = match state {
        ResourceState::Resolved(resource) => resource,
        ResourceState::Failed {
            id,
            reason_code,
            reason,
        } => {
            let bundle = BundleReference::failure(
                id.clone(),
                Phase::Resource,
                Vec::new(),
                *reason_code,
                reason.clone(),
                None,
            );
            return PhaseResult {
                verdict: Decision::Deny,
                references: vec![bundle],
                override_kind: None,
            };
        }
    };

    let bundle = match &resource.group {
        None => BundleReference::failure(
            resource.id.clone(),
            Phase::Resource,
            Vec::new(),
            ReasonCode::NotFound,
            "resource has no resource-group",
            None,
        ),
        Some(group) => match ctx.registry.get_resource_group(group) {
            Ok(handle) => boolean_bundle(ctx, group.clone(), Phase::Resource, handle.unit).await,
            Err(e) => BundleReference::failure(
                group.clone(),
                Phase::Resource,
                Vec::new(),
                e.reason_code(),
                e.to_string(),
                None,
            ),
        },
    };

    PhaseResult {
        verdict: bundle.decision,
        references: vec![bundle],
        override_kind: None,
    }
}

/// Scope phase: empty scope lists and the well-known api scope grant
/// without consulting any bundle; otherwise one bundle per scope, GRANT iff
/// any scope votes GRANT.
pub(crate) async fn scope_phase(ctx: &PhaseInput, scopes: &[String]) -> PhaseResult {
    if scopes.is_empty() {
        return PhaseResult::granted_without_bundles();
    }
    if scopes.iter().any(|s| s == API_SCOPE_MRN) {
        return PhaseResult::granted_without_bundles();
    }

    let bundles = join_all(
        scopes
            .iter()
            .map(|mrn| scope_bundle(ctx, mrn.clone())),
    )
    .await;
    or_compose(bundles)
}

async fn scope_bundle(ctx: &PhaseInput, mrn: String) -> BundleReference {
    match ctx.registry.get_scope(&mrn) {
        Ok(handle) => boolean_bundle(ctx, mrn, Phase::Scope, handle.unit).await,
        Err(e) => BundleReference::failure(
            mrn,
            Phase::Scope,
            Vec::new(),
            e.reason_code(),
            e.to_string(),
            None,
        ),
    }
}

/// OR semantics over fan-out bundles: one GRANT vote carries the phase.
fn or_compose(references: Vec<BundleReference>) -> PhaseResult {
    let verdict = Decision::from_bool(references.iter().any(|r| r.decision.is_grant()));
    PhaseResult {
        verdict,
        references,
        override_kind: None,
    }
}

/// A failed evaluation, carrying enough detail to build the failure bundle.
struct BundleError {
    reason_code: ReasonCode,
    reason: String,
}

impl BundleError {
    fn into_bundle(
        self,
        id: &str,
        phase: Phase,
        refs: Vec<crate::registry::PolicyRef>,
        duration: u64,
    ) -> BundleReference {
        BundleReference::failure(
            id,
            phase,
            refs,
            self.reason_code,
            self.reason,
            Some(duration),
        )
    }
}

/// Run one bundle evaluation on the blocking pool.
async fn evaluate(
    ctx: &PhaseInput,
    unit: Arc<CompiledUnit>,
) -> (std::result::Result<Value, BundleError>, u64) {
    let input = Arc::clone(&ctx.input);
    let deadline = ctx.deadline;
    let started = Instant::now();
    let joined =
        task::spawn_blocking(move || unit.compiled.evaluate(ALLOW_QUERY, &input, deadline)).await;
    let duration = started.elapsed().as_nanos() as u64;

    let outcome = match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BundleError {
            reason_code: e.reason_code(),
            reason: e.to_string(),
        }),
        Err(e) => Err(BundleError {
            reason_code: ReasonCode::Unknown,
            reason: format!("evaluation task failed: {e}"),
        }),
    };
    (outcome, duration)
}

/// Evaluate a bundle expecting a boolean `allow`; anything else denies with
/// the failure recorded on the reference.
async fn boolean_bundle(
    ctx: &PhaseInput,
    id: String,
    phase: Phase,
    unit: Arc<CompiledUnit>,
) -> BundleReference {
    let refs = unit.refs.clone();
    let (outcome, duration) = evaluate(ctx, unit).await;
    match outcome {
        Ok(value) => match value.as_bool() {
            Some(granted) => BundleReference::outcome(
                id,
                phase,
                refs,
                Decision::from_bool(granted),
                Some(duration),
            ),
            None => BundleReference::failure(
                id,
                phase,
                refs,
                ReasonCode::Evaluation,
                format!("policy must produce a boolean, got {value}"),
                Some(duration),
            ),
        },
        Err(e) => e.into_bundle(&id, phase, refs, duration),
    }
}
