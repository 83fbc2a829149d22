//! Raw serde document shapes for policy-domain YAML.
//!
//! These mirror the on-disk schema across all three supported apiVersions;
//! version-specific handling (annotation encodings, resource availability)
//! happens in the loader proper.

use serde::Deserialize;

use crate::domain::annotation::MergeStrategy;

#[derive(Debug, Deserialize)]
pub struct RawDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: RawKind,
    pub metadata: RawMetadata,
    #[serde(default)]
    pub spec: RawSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RawKind {
    PolicyDomain,
    PolicyDomainReference,
}

#[derive(Debug, Deserialize)]
pub struct RawMetadata {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSpec {
    #[serde(rename = "policy-libraries", default)]
    pub policy_libraries: Vec<RawModule>,
    #[serde(default)]
    pub policies: Vec<RawModule>,
    #[serde(default)]
    pub roles: Vec<RawReferenceEntity>,
    #[serde(default)]
    pub scopes: Vec<RawReferenceEntity>,
    #[serde(rename = "resource-groups", default)]
    pub resource_groups: Vec<RawReferenceEntity>,
    #[serde(default)]
    pub groups: Vec<RawGroup>,
    #[serde(default)]
    pub resources: Vec<RawResource>,
    #[serde(default)]
    pub operations: Vec<RawOperation>,
    #[serde(default)]
    pub mappers: Vec<RawMapper>,
    #[serde(rename = "annotation-defaults", default)]
    pub annotation_defaults: Option<RawAnnotationDefaults>,
}

/// A policy or policy-library declaration. Exactly one of `rego` /
/// `rego_filename` must be present; the latter only for
/// `PolicyDomainReference` documents.
#[derive(Debug, Deserialize)]
pub struct RawModule {
    pub mrn: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub rego: Option<String>,
    #[serde(default)]
    pub rego_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawReferenceEntity {
    pub mrn: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: bool,
    pub policy: String,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
}

#[derive(Debug, Deserialize)]
pub struct RawGroup {
    pub mrn: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
}

#[derive(Debug, Deserialize)]
pub struct RawResource {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub selector: Vec<String>,
    pub group: String,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
}

#[derive(Debug, Deserialize)]
pub struct RawOperation {
    pub name: String,
    pub selector: Vec<String>,
    pub policy: String,
}

#[derive(Debug, Deserialize)]
pub struct RawMapper {
    pub name: String,
    pub selector: Vec<String>,
    #[serde(default)]
    pub rego: Option<String>,
    #[serde(default)]
    pub rego_filename: Option<String>,
}

/// An annotation element. The `value` stays as raw YAML here: v1alpha3/4
/// carry a JSON-encoded string, v1beta1 a native value.
#[derive(Debug, Deserialize)]
pub struct RawAnnotation {
    pub name: String,
    pub value: serde_yaml_ng::Value,
    #[serde(default)]
    pub merge: Option<MergeStrategy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawAnnotationDefaults {
    #[serde(default)]
    pub merge: MergeStrategy,
}
