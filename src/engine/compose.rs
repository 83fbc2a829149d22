//! Effective-annotation composition.
//!
//! Before policy evaluation, the engine folds the annotations of every
//! scope, group, and role the principal carries - plus any annotations
//! already present on the input - into a single effective map injected as
//! `principal.mannotations`. Per key, each occurrence merges under its own
//! declared strategy, falling back to the owning domain's default.

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::annotation::MergeStrategy;
use crate::domain::Annotated;
use crate::registry::{apply_annotation, Registry};

/// Compose and inject the effective annotation map. Empty principals are
/// left untouched.
pub fn inject_annotations(registry: &Registry, principal: &mut Value) {
    let object = match principal.as_object() {
        Some(o) if !o.is_empty() => o,
        _ => return,
    };

    let explicit = object
        .get("mannotations")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut effective = Map::new();

    // Processing order: scopes, then groups, then roles, then the input's
    // own annotations.
    for mrn in mrn_list(object.get("scopes")) {
        match registry.get_scope(&mrn) {
            Ok(handle) => fold(
                &mut effective,
                handle.entity.annotations(),
                handle.default_merge,
            ),
            Err(e) => debug!("annotation composition: skipping scope {mrn}: {e}"),
        }
    }
    for mrn in mrn_list(object.get("mgroups")) {
        match registry.get_group(&mrn) {
            Ok(handle) => fold(
                &mut effective,
                handle.group.annotations(),
                handle.default_merge,
            ),
            Err(e) => debug!("annotation composition: skipping group {mrn}: {e}"),
        }
    }
    for mrn in mrn_list(object.get("mroles")) {
        match registry.get_role(&mrn) {
            Ok(handle) => fold(
                &mut effective,
                handle.entity.annotations(),
                handle.default_merge,
            ),
            Err(e) => debug!("annotation composition: skipping role {mrn}: {e}"),
        }
    }
    for (name, value) in explicit {
        apply_annotation(&mut effective, &name, value, MergeStrategy::Replace);
    }

    principal
        .as_object_mut()
        .expect("checked above")
        .insert("mannotations".to_string(), Value::Object(effective));
}

fn fold(
    target: &mut Map<String, Value>,
    annotations: &[crate::domain::annotation::Annotation],
    default_merge: MergeStrategy,
) {
    for annotation in annotations {
        apply_annotation(
            target,
            &annotation.name,
            annotation.value.clone(),
            annotation.merge.unwrap_or(default_merge),
        );
    }
}

fn mrn_list(value: Option<&Value>) -> Vec<String> {
    value
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
