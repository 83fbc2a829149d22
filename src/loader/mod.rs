//! Policy-domain loader.
//!
//! Parses versioned YAML documents (`v1alpha3`, `v1alpha4`, `v1beta1`) into
//! the in-memory [`PolicyDomain`] model: selector patterns are anchored and
//! compiled, external Rego files referenced by `PolicyDomainReference`
//! documents are inlined, annotation values are normalized to their JSON
//! shape, and every Rego module receives a content fingerprint.

mod anchor;
pub mod schema;

pub use anchor::anchor;

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::domain::annotation::Annotation;
use crate::domain::{
    AnnotationDefaults, ApiVersion, Group, Mapper, Operation, PolicyDomain, PolicyModule,
    ReferenceEntity, Resource, Selector,
};
use crate::error::{Error, Result};
use schema::{RawAnnotation, RawDocument, RawKind, RawModule};

/// Load a single policy-domain document from a string.
///
/// `origin` is the path the document was read from, used to resolve
/// `rego_filename` references; documents loaded from memory cannot use them.
pub fn load_str(content: &str, origin: Option<&Path>) -> Result<PolicyDomain> {
    let doc: RawDocument = serde_yaml_ng::from_str(content)?;
    load_document(doc, origin)
}

/// Load a single policy-domain document from a file.
pub fn load_file(path: impl AsRef<Path>) -> Result<PolicyDomain> {
    let path = path.as_ref();
    debug!("loading policy domain from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    load_str(&content, Some(path))
}

/// Load every `.yaml`/`.yml` document under a directory, in lexicographic
/// filename order, as one domain set.
pub fn load_dir(path: impl AsRef<Path>) -> Result<Vec<PolicyDomain>> {
    let path = path.as_ref();
    let mut files: Vec<_> = std::fs::read_dir(path)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    let mut domains = Vec::with_capacity(files.len());
    for file in files {
        domains.push(load_file(&file)?);
    }
    info!(
        "loaded {} policy domain(s) from {}",
        domains.len(),
        path.display()
    );
    Ok(domains)
}

fn load_document(doc: RawDocument, origin: Option<&Path>) -> Result<PolicyDomain> {
    let version = ApiVersion::parse(&doc.api_version)?;
    let domain_name = doc.metadata.name.clone();
    let spec = doc.spec;

    if !spec.resources.is_empty() && !version.supports_resources() {
        return Err(Error::Load(format!(
            "domain {domain_name:?}: spec.resources requires v1alpha4 or later"
        )));
    }

    let annotation_defaults = spec
        .annotation_defaults
        .as_ref()
        .map(|d| AnnotationDefaults { merge: d.merge })
        .unwrap_or_default();
    if spec.annotation_defaults.is_some() && !version.native_annotation_values() {
        return Err(Error::Load(format!(
            "domain {domain_name:?}: spec.annotation-defaults requires v1beta1"
        )));
    }

    let libraries = spec
        .policy_libraries
        .into_iter()
        .map(|m| load_module(&domain_name, m, doc.kind, origin).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;
    let policies = spec
        .policies
        .into_iter()
        .map(|m| load_module(&domain_name, m, doc.kind, origin).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    let load_reference = |raw: schema::RawReferenceEntity| -> Result<Arc<ReferenceEntity>> {
        Ok(Arc::new(ReferenceEntity {
            mrn: raw.mrn,
            name: raw.name,
            description: raw.description,
            default: raw.default,
            policy: raw.policy,
            annotations: load_annotations(&domain_name, raw.annotations, version)?,
        }))
    };

    let roles = spec
        .roles
        .into_iter()
        .map(load_reference)
        .collect::<Result<Vec<_>>>()?;
    let scopes = spec
        .scopes
        .into_iter()
        .map(load_reference)
        .collect::<Result<Vec<_>>>()?;
    let resource_groups = spec
        .resource_groups
        .into_iter()
        .map(load_reference)
        .collect::<Result<Vec<_>>>()?;

    let groups = spec
        .groups
        .into_iter()
        .map(|raw| -> Result<Arc<Group>> {
            Ok(Arc::new(Group {
                mrn: raw.mrn,
                name: raw.name,
                roles: raw.roles,
                annotations: load_annotations(&domain_name, raw.annotations, version)?,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let resources = spec
        .resources
        .into_iter()
        .map(|raw| -> Result<Arc<Resource>> {
            Ok(Arc::new(Resource {
                name: raw.name,
                description: raw.description,
                selectors: compile_selectors(&raw.selector)?,
                group: raw.group,
                annotations: load_annotations(&domain_name, raw.annotations, version)?,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let operations = spec
        .operations
        .into_iter()
        .map(|raw| -> Result<Arc<Operation>> {
            Ok(Arc::new(Operation {
                name: raw.name,
                selectors: compile_selectors(&raw.selector)?,
                policy: raw.policy,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let mappers = spec
        .mappers
        .into_iter()
        .map(|raw| -> Result<Arc<Mapper>> {
            let rego = module_source(
                &domain_name,
                &raw.name,
                raw.rego,
                raw.rego_filename,
                doc.kind,
                origin,
            )?;
            let fingerprint = crate::domain::Fingerprint::of(&rego);
            Ok(Arc::new(Mapper {
                name: raw.name,
                selectors: compile_selectors(&raw.selector)?,
                rego,
                fingerprint,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        domain = %domain_name,
        policies = policies.len(),
        libraries = libraries.len(),
        roles = roles.len(),
        "loaded policy domain"
    );

    Ok(PolicyDomain {
        name: domain_name,
        version,
        annotation_defaults,
        libraries,
        policies,
        roles,
        scopes,
        resource_groups,
        groups,
        resources,
        operations,
        mappers,
    })
}

fn compile_selectors(raw: &[String]) -> Result<Vec<Selector>> {
    raw.iter().map(|s| Selector::compile(s)).collect()
}

fn load_module(
    domain: &str,
    raw: RawModule,
    kind: RawKind,
    origin: Option<&Path>,
) -> Result<PolicyModule> {
    let rego = module_source(domain, &raw.mrn, raw.rego, raw.rego_filename, kind, origin)?;
    Ok(PolicyModule::new(
        raw.mrn,
        raw.name,
        raw.description,
        raw.dependencies,
        rego,
    ))
}

/// Resolve a module's Rego source: inline `rego`, or an external
/// `rego_filename` (PolicyDomainReference only) resolved against the
/// document's directory.
fn module_source(
    domain: &str,
    entity: &str,
    rego: Option<String>,
    rego_filename: Option<String>,
    kind: RawKind,
    origin: Option<&Path>,
) -> Result<String> {
    match (rego, rego_filename) {
        (Some(_), Some(_)) => Err(Error::Load(format!(
            "domain {domain:?}, {entity}: rego and rego_filename are mutually exclusive"
        ))),
        (Some(inline), None) => Ok(inline),
        (None, Some(filename)) => {
            if kind != RawKind::PolicyDomainReference {
                return Err(Error::Load(format!(
                    "domain {domain:?}, {entity}: rego_filename requires kind PolicyDomainReference"
                )));
            }
            let base = origin.and_then(|p| p.parent()).ok_or_else(|| {
                Error::Load(format!(
                    "domain {domain:?}, {entity}: rego_filename cannot be resolved without a document path"
                ))
            })?;
            let path = base.join(&filename);
            std::fs::read_to_string(&path).map_err(|e| {
                Error::Load(format!(
                    "domain {domain:?}, {entity}: reading {}: {e}",
                    path.display()
                ))
            })
        }
        (None, None) => Err(Error::Load(format!(
            "domain {domain:?}, {entity}: missing rego source"
        ))),
    }
}

/// Normalize raw annotations to their JSON-shaped values.
fn load_annotations(
    domain: &str,
    raw: Vec<RawAnnotation>,
    version: ApiVersion,
) -> Result<Vec<Annotation>> {
    raw.into_iter()
        .map(|a| {
            if a.merge.is_some() && !version.native_annotation_values() {
                return Err(Error::Load(format!(
                    "domain {domain:?}, annotation {:?}: merge strategies require v1beta1",
                    a.name
                )));
            }
            let value = annotation_value(domain, &a.name, a.value, version)?;
            Ok(Annotation {
                name: a.name,
                value,
                merge: a.merge,
            })
        })
        .collect()
}

fn annotation_value(
    domain: &str,
    name: &str,
    raw: serde_yaml_ng::Value,
    version: ApiVersion,
) -> Result<Value> {
    if version.native_annotation_values() {
        // v1beta1: native YAML value, carried over structurally.
        serde_json::to_value(&raw).map_err(|e| {
            Error::Load(format!(
                "domain {domain:?}, annotation {name:?}: value is not JSON-shaped: {e}"
            ))
        })
    } else {
        // v1alpha3/4: a JSON document encoded as a YAML string.
        let encoded = match raw {
            serde_yaml_ng::Value::String(s) => s,
            other => {
                return Err(Error::Load(format!(
                    "domain {domain:?}, annotation {name:?}: expected a JSON-encoded string, got {other:?}"
                )))
            }
        };
        serde_json::from_str(&encoded).map_err(|e| {
            Error::Load(format!(
                "domain {domain:?}, annotation {name:?}: invalid JSON value: {e}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MINIMAL_BETA: &str = r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  policies:
    - mrn: mrn:iam:policy:allow
      name: allow
      rego: |
        package authz
        default allow = true
  roles:
    - mrn: mrn:iam:role:user
      name: user
      policy: mrn:iam:policy:allow
      annotations:
        - name: tier
          value: standard
        - name: tags
          value: [a, b]
          merge: union
"#;

    #[test]
    fn loads_v1beta1_with_native_annotations() {
        let domain = load_str(MINIMAL_BETA, None).unwrap();
        assert_eq!(domain.name, "core");
        assert_eq!(domain.version, ApiVersion::V1Beta1);
        let role = &domain.roles[0];
        assert_eq!(role.annotations[0].value, json!("standard"));
        assert_eq!(role.annotations[1].value, json!(["a", "b"]));
        assert_eq!(
            role.annotations[1].merge,
            Some(crate::domain::annotation::MergeStrategy::Union)
        );
    }

    #[test]
    fn alpha_annotations_are_json_encoded_strings() {
        let doc = r#"
apiVersion: iamlite.manetu.io/v1alpha3
kind: PolicyDomain
metadata:
  name: legacy
spec:
  roles:
    - mrn: mrn:iam:role:user
      name: user
      policy: mrn:iam:policy:allow
      annotations:
        - name: limits
          value: '{"rps": 10}'
"#;
        let domain = load_str(doc, None).unwrap();
        assert_eq!(domain.roles[0].annotations[0].value, json!({"rps": 10}));
    }

    #[test]
    fn alpha_rejects_native_annotation_values() {
        let doc = r#"
apiVersion: iamlite.manetu.io/v1alpha3
kind: PolicyDomain
metadata:
  name: legacy
spec:
  roles:
    - mrn: mrn:iam:role:user
      name: user
      policy: mrn:iam:policy:allow
      annotations:
        - name: limits
          value: {rps: 10}
"#;
        assert!(load_str(doc, None).is_err());
    }

    #[test]
    fn alpha3_rejects_resources() {
        let doc = r#"
apiVersion: iamlite.manetu.io/v1alpha3
kind: PolicyDomain
metadata:
  name: legacy
spec:
  resources:
    - name: docs
      selector: [".*"]
      group: mrn:iam:resource-group:default
"#;
        assert!(load_str(doc, None).is_err());
    }

    #[test]
    fn inline_domain_rejects_rego_filename() {
        let doc = r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  policies:
    - mrn: mrn:iam:policy:p
      name: p
      rego_filename: p.rego
"#;
        assert!(load_str(doc, None).is_err());
    }

    #[test]
    fn selectors_are_anchored_at_load() {
        let doc = r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  operations:
    - name: reads
      selector: ["file:.*:read"]
      policy: mrn:iam:policy:p
"#;
        let domain = load_str(doc, None).unwrap();
        assert_eq!(domain.operations[0].selectors[0].pattern, "^file:.*:read$");
    }

    #[test]
    fn annotation_round_trip_preserves_json_structure() {
        let domain = load_str(MINIMAL_BETA, None).unwrap();
        let original = &domain.roles[0].annotations[1];
        let serialized = serde_json::to_string(original).unwrap();
        let reloaded: Annotation = serde_json::from_str(&serialized).unwrap();
        assert_eq!(&reloaded, original);
    }
}
