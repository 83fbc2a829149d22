//! The policy domain model - typed, immutable entities shared by the
//! validator, registry, and decision engine.
//!
//! Entities are constructed once by the loader and never mutated afterwards;
//! the registry hands out `Arc` references that are safe to share across
//! concurrent authorization requests.

pub mod annotation;

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::loader::anchor;
use annotation::{Annotation, MergeStrategy};

/// Supported policy-domain schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1Alpha3,
    V1Alpha4,
    V1Beta1,
}

impl ApiVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "iamlite.manetu.io/v1alpha3" => Ok(ApiVersion::V1Alpha3),
            "iamlite.manetu.io/v1alpha4" => Ok(ApiVersion::V1Alpha4),
            "iamlite.manetu.io/v1beta1" => Ok(ApiVersion::V1Beta1),
            other => Err(Error::Load(format!("unsupported apiVersion: {other:?}"))),
        }
    }

    /// Annotation values are native YAML from v1beta1 onward; earlier
    /// versions carry JSON-encoded strings.
    pub fn native_annotation_values(&self) -> bool {
        matches!(self, ApiVersion::V1Beta1)
    }

    /// Resource selector records were introduced in v1alpha4.
    pub fn supports_resources(&self) -> bool {
        !matches!(self, ApiVersion::V1Alpha3)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiVersion::V1Alpha3 => "iamlite.manetu.io/v1alpha3",
            ApiVersion::V1Alpha4 => "iamlite.manetu.io/v1alpha4",
            ApiVersion::V1Beta1 => "iamlite.manetu.io/v1beta1",
        };
        f.write_str(s)
    }
}

/// Entity kinds, used for reference checking and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Role,
    Scope,
    Group,
    ResourceGroup,
    Policy,
    PolicyLibrary,
    Resource,
    Operation,
    Mapper,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Role => "role",
            EntityKind::Scope => "scope",
            EntityKind::Group => "group",
            EntityKind::ResourceGroup => "resource-group",
            EntityKind::Policy => "policy",
            EntityKind::PolicyLibrary => "policy-library",
            EntityKind::Resource => "resource",
            EntityKind::Operation => "operation",
            EntityKind::Mapper => "mapper",
        };
        f.write_str(s)
    }
}

/// SHA-256 content fingerprint over Rego source bytes.
///
/// Recorded (base64-encoded) on every bundle reference so decisions can be
/// replayed against the exact policy text that produced them.
#[derive(Clone, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }

    /// Wire encoding used in access records.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", hex::encode(self.0))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An ordered, anchored regex selector.
#[derive(Debug, Clone)]
pub struct Selector {
    /// The anchored pattern text.
    pub pattern: String,
    regex: Regex,
}

impl Selector {
    /// Anchor and compile a raw selector pattern.
    pub fn compile(raw: &str) -> Result<Self> {
        let pattern = anchor(raw);
        let regex = Regex::new(&pattern)?;
        Ok(Selector { pattern, regex })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// A named Rego module with library dependencies - a policy or a library.
#[derive(Debug, Clone)]
pub struct PolicyModule {
    pub mrn: String,
    pub name: String,
    pub description: Option<String>,
    /// Library MRN references, in declaration order.
    pub dependencies: Vec<String>,
    pub rego: String,
    pub fingerprint: Fingerprint,
}

impl PolicyModule {
    pub fn new(
        mrn: String,
        name: String,
        description: Option<String>,
        dependencies: Vec<String>,
        rego: String,
    ) -> Self {
        let fingerprint = Fingerprint::of(&rego);
        PolicyModule {
            mrn,
            name,
            description,
            dependencies,
            rego,
            fingerprint,
        }
    }
}

/// A reference entity: role, scope, or resource-group.
#[derive(Debug, Clone)]
pub struct ReferenceEntity {
    pub mrn: String,
    pub name: String,
    pub description: Option<String>,
    /// At most one resource-group per domain may set this.
    pub default: bool,
    /// Policy MRN reference.
    pub policy: String,
    pub annotations: Vec<Annotation>,
}

/// A group: a bag of role references plus annotations.
#[derive(Debug, Clone)]
pub struct Group {
    pub mrn: String,
    pub name: String,
    pub roles: Vec<String>,
    pub annotations: Vec<Annotation>,
}

/// A resource selector record (v1alpha4+).
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub description: Option<String>,
    pub selectors: Vec<Selector>,
    /// Target resource-group MRN.
    pub group: String,
    pub annotations: Vec<Annotation>,
}

/// An operation selector record.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub selectors: Vec<Selector>,
    /// Policy MRN reference.
    pub policy: String,
}

/// A mapper: selector record plus a Rego module exporting `porc`.
#[derive(Debug, Clone)]
pub struct Mapper {
    pub name: String,
    pub selectors: Vec<Selector>,
    pub rego: String,
    pub fingerprint: Fingerprint,
}

/// Per-domain annotation defaults (v1beta1).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnnotationDefaults {
    #[serde(default)]
    pub merge: MergeStrategy,
}

/// A fully-loaded policy domain.
#[derive(Debug, Clone)]
pub struct PolicyDomain {
    pub name: String,
    pub version: ApiVersion,
    pub annotation_defaults: AnnotationDefaults,
    pub libraries: Vec<Arc<PolicyModule>>,
    pub policies: Vec<Arc<PolicyModule>>,
    pub roles: Vec<Arc<ReferenceEntity>>,
    pub scopes: Vec<Arc<ReferenceEntity>>,
    pub resource_groups: Vec<Arc<ReferenceEntity>>,
    pub groups: Vec<Arc<Group>>,
    /// Source order is matching order.
    pub resources: Vec<Arc<Resource>>,
    pub operations: Vec<Arc<Operation>>,
    pub mappers: Vec<Arc<Mapper>>,
}

impl PolicyDomain {
    pub fn library(&self, mrn: &str) -> Option<&Arc<PolicyModule>> {
        self.libraries.iter().find(|m| m.mrn == mrn)
    }

    pub fn policy(&self, mrn: &str) -> Option<&Arc<PolicyModule>> {
        self.policies.iter().find(|m| m.mrn == mrn)
    }

    pub fn role(&self, mrn: &str) -> Option<&Arc<ReferenceEntity>> {
        self.roles.iter().find(|e| e.mrn == mrn)
    }

    pub fn scope(&self, mrn: &str) -> Option<&Arc<ReferenceEntity>> {
        self.scopes.iter().find(|e| e.mrn == mrn)
    }

    pub fn resource_group(&self, mrn: &str) -> Option<&Arc<ReferenceEntity>> {
        self.resource_groups.iter().find(|e| e.mrn == mrn)
    }

    pub fn group(&self, mrn: &str) -> Option<&Arc<Group>> {
        self.groups.iter().find(|g| g.mrn == mrn)
    }

    /// The domain's default resource-group, if one is marked.
    pub fn default_resource_group(&self) -> Option<&Arc<ReferenceEntity>> {
        self.resource_groups.iter().find(|g| g.default)
    }

    /// Whether an entity of the given kind exists under the given MRN.
    /// Selector records (resources, operations, mappers) are keyed by name.
    pub fn has_entity(&self, kind: EntityKind, mrn: &str) -> bool {
        match kind {
            EntityKind::Role => self.role(mrn).is_some(),
            EntityKind::Scope => self.scope(mrn).is_some(),
            EntityKind::Group => self.group(mrn).is_some(),
            EntityKind::ResourceGroup => self.resource_group(mrn).is_some(),
            EntityKind::Policy => self.policy(mrn).is_some(),
            EntityKind::PolicyLibrary => self.library(mrn).is_some(),
            EntityKind::Resource => self.resources.iter().any(|r| r.name == mrn),
            EntityKind::Operation => self.operations.iter().any(|o| o.name == mrn),
            EntityKind::Mapper => self.mappers.iter().any(|m| m.name == mrn),
        }
    }
}

/// Resource classification levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Low,
    Moderate,
    High,
    Maximum,
    #[default]
    Unassigned,
}

/// A resource after selector resolution (or caller-supplied as an object).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedResource {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub classification: Classification,
    #[serde(default)]
    pub annotations: serde_json::Map<String, Value>,
}

impl ResolvedResource {
    /// A bare resource with nothing resolved - used when an MRN matches no
    /// selector, and as the substitute the operation phase sees after a
    /// failed lookup.
    pub fn bare(id: impl Into<String>) -> Self {
        ResolvedResource {
            id: id.into(),
            owner: None,
            group: None,
            classification: Classification::Unassigned,
            annotations: serde_json::Map::new(),
        }
    }
}

// Capability sets shared by the three schema versions: the validator and
// registry depend only on these, never on concrete schema structs.

/// Library-like entities carrying Rego source and dependencies.
pub trait ModuleSource {
    fn mrn(&self) -> &str;
    fn rego(&self) -> &str;
    fn dependencies(&self) -> &[String];
    fn fingerprint(&self) -> &Fingerprint;
}

impl ModuleSource for PolicyModule {
    fn mrn(&self) -> &str {
        &self.mrn
    }
    fn rego(&self) -> &str {
        &self.rego
    }
    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
    fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Entities backed by a policy reference.
pub trait PolicyBacked {
    fn policy(&self) -> &str;
}

impl PolicyBacked for ReferenceEntity {
    fn policy(&self) -> &str {
        &self.policy
    }
}

impl PolicyBacked for Operation {
    fn policy(&self) -> &str {
        &self.policy
    }
}

/// Entities carrying annotations.
pub trait Annotated {
    fn annotations(&self) -> &[Annotation];
}

impl Annotated for ReferenceEntity {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

impl Annotated for Group {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

impl Annotated for Resource {
    fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

/// Entities matched by ordered selector lists.
pub trait SelectorSet {
    fn selectors(&self) -> &[Selector];

    fn matches(&self, candidate: &str) -> bool {
        self.selectors().iter().any(|s| s.is_match(candidate))
    }
}

impl SelectorSet for Resource {
    fn selectors(&self) -> &[Selector] {
        &self.selectors
    }
}

impl SelectorSet for Operation {
    fn selectors(&self) -> &[Selector] {
        &self.selectors
    }
}

impl SelectorSet for Mapper {
    fn selectors(&self) -> &[Selector] {
        &self.selectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_change_sensitive() {
        let a = Fingerprint::of("package authz\nallow = true");
        let b = Fingerprint::of("package authz\nallow = true");
        let c = Fingerprint::of("package authz\nallow = tru e");
        assert_eq!(a, b);
        assert_ne!(a, c);
        // base64 of 32 bytes, padded
        assert_eq!(a.to_base64().len(), 44);
    }

    #[test]
    fn selector_matches_whole_string_only() {
        let s = Selector::compile("file:document:.*").unwrap();
        assert!(s.is_match("file:document:read"));
        assert!(!s.is_match("xfile:document:read"));
        assert!(!s.is_match("file:document:read "));
    }

    #[test]
    fn api_version_parse_rejects_unknown() {
        assert!(ApiVersion::parse("iamlite.manetu.io/v1beta1").is_ok());
        assert!(ApiVersion::parse("iamlite.manetu.io/v2").is_err());
    }

    #[test]
    fn classification_serializes_uppercase() {
        let v = serde_json::to_string(&Classification::Moderate).unwrap();
        assert_eq!(v, "\"MODERATE\"");
        let d: Classification = Default::default();
        assert_eq!(d, Classification::Unassigned);
    }
}
