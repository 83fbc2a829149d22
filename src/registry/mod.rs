//! The compiled, multi-domain registry.
//!
//! Built once from a validated domain set, the registry owns everything the
//! decision engine needs at request time: per-policy compiled module sets
//! (policy plus its transitive library closure), per-mapper compiled
//! modules, MRN-keyed entity maps, and the ordered selector tables for
//! operations and resources. It is read-only after construction and safe to
//! share across concurrent requests.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::annotation::{merge_values, MergeStrategy};
use crate::domain::{
    Group, Mapper, Operation, PolicyDomain, ReferenceEntity, Resource, ResolvedResource,
    SelectorSet,
};
use crate::error::{Error, Result};
use crate::evaluator::{CompiledPolicy, PolicyCompiler};
use crate::mrn::{qualify, Reference};
use crate::validator::{graph::DependencyGraph, validate};

/// Identity of one policy module consulted by a bundle, as recorded in
/// access records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRef {
    pub mrn: String,
    /// base64-encoded SHA-256 of the module source.
    pub fingerprint: String,
}

/// A policy compiled together with its transitive library closure.
#[derive(Debug)]
pub struct CompiledUnit {
    pub compiled: CompiledPolicy,
    /// The policy itself first, then its libraries in closure order.
    pub refs: Vec<PolicyRef>,
}

/// A compiled mapper module.
#[derive(Debug)]
pub struct CompiledMapper {
    pub mapper: Arc<Mapper>,
    pub compiled: CompiledPolicy,
    pub reference: PolicyRef,
}

/// A reference entity resolved together with its compiled policy and the
/// owning domain's annotation default.
#[derive(Debug, Clone)]
pub struct EntityHandle {
    pub entity: Arc<ReferenceEntity>,
    pub unit: Arc<CompiledUnit>,
    pub default_merge: MergeStrategy,
}

/// A group resolved with the owning domain's annotation default.
#[derive(Debug, Clone)]
pub struct GroupHandle {
    pub group: Arc<Group>,
    pub default_merge: MergeStrategy,
}

#[derive(Debug)]
struct DomainIndex {
    name: String,
    default_merge: MergeStrategy,
    roles: HashMap<String, Arc<ReferenceEntity>>,
    scopes: HashMap<String, Arc<ReferenceEntity>>,
    resource_groups: HashMap<String, Arc<ReferenceEntity>>,
    groups: HashMap<String, Arc<Group>>,
    policies: HashMap<String, Arc<CompiledUnit>>,
    /// Source order is matching order.
    operations: Vec<Arc<Operation>>,
    resources: Vec<Arc<Resource>>,
    mappers: Vec<Arc<CompiledMapper>>,
    default_group: Option<String>,
}

/// The multi-domain registry.
#[derive(Debug)]
pub struct Registry {
    /// Load order is scan order for selector matching.
    domains: Vec<DomainIndex>,
}

impl Registry {
    /// Validate and compile a domain set.
    ///
    /// Engine-facing callers derive the compiler from their configuration
    /// (`EngineConfig::compiler`) so the configured `unsafe-builtins` key
    /// reaches compilation here.
    ///
    /// Fails with [`Error::Validation`] when the set does not validate, or
    /// [`Error::Compilation`] when a module set fails to compile.
    pub fn build(domains: Vec<PolicyDomain>, compiler: &PolicyCompiler) -> Result<Self> {
        let report = validate(&domains, compiler);
        if !report.is_ok() {
            return Err(Error::Validation(report.to_string()));
        }

        let (graph, _) = DependencyGraph::build(&domains);
        let mapper_compiler = compiler.permissive();

        let mut indexes = Vec::with_capacity(domains.len());
        for domain in &domains {
            indexes.push(build_index(&domains, domain, &graph, compiler, &mapper_compiler)?);
        }

        info!(
            domains = indexes.len(),
            policies = indexes.iter().map(|d| d.policies.len()).sum::<usize>(),
            "registry built"
        );
        Ok(Registry { domains: indexes })
    }

    pub fn get_role(&self, mrn: &str) -> Result<EntityHandle> {
        self.entity_handle(mrn, "role", |d| &d.roles)
    }

    pub fn get_scope(&self, mrn: &str) -> Result<EntityHandle> {
        self.entity_handle(mrn, "scope", |d| &d.scopes)
    }

    pub fn get_resource_group(&self, mrn: &str) -> Result<EntityHandle> {
        self.entity_handle(mrn, "resource-group", |d| &d.resource_groups)
    }

    pub fn get_group(&self, mrn: &str) -> Result<GroupHandle> {
        let (index, group) = self.find_unique(mrn, "group", |d| &d.groups)?;
        Ok(GroupHandle {
            group,
            default_merge: index.default_merge,
        })
    }

    /// Match an operation string against the ordered selector tables across
    /// all domains; the first full match wins.
    pub fn get_operation(&self, operation: &str) -> Option<(String, Arc<CompiledUnit>)> {
        for index in &self.domains {
            for record in &index.operations {
                if record.matches(operation) {
                    let unit = self
                        .policy_unit(&index.name, &record.policy)
                        .ok()?;
                    return Some((record.policy.clone(), unit));
                }
            }
        }
        None
    }

    /// Resolve a resource MRN through the selector tables.
    ///
    /// On a match the resolved resource takes the record's target group and
    /// the record's annotations merged beneath the group's own annotations.
    /// With no match anywhere, the resource lands in the default
    /// resource-group with no annotations.
    pub fn get_resource(&self, mrn: &str) -> Result<ResolvedResource> {
        for index in &self.domains {
            for record in &index.resources {
                if record.matches(mrn) {
                    return self.resolve_resource(index, record, mrn);
                }
            }
        }

        let default_group = self
            .domains
            .iter()
            .find_map(|d| d.default_group.clone())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "resource {mrn} matches no selector and no default resource-group exists"
                ))
            })?;
        Ok(ResolvedResource {
            group: Some(default_group),
            ..ResolvedResource::bare(mrn)
        })
    }

    /// `GetMapper`: a domain's unique mapper, or the unique mapper across
    /// all domains when no domain is named.
    pub fn get_mapper(&self, domain: Option<&str>) -> Result<Arc<CompiledMapper>> {
        let candidates: Vec<&Arc<CompiledMapper>> = match domain {
            Some(name) => {
                let index = self
                    .domains
                    .iter()
                    .find(|d| d.name == name)
                    .ok_or_else(|| Error::NotFound(format!("domain {name:?} does not exist")))?;
                index.mappers.iter().collect()
            }
            None => self.domains.iter().flat_map(|d| d.mappers.iter()).collect(),
        };
        match candidates.len() {
            0 => Err(Error::NotFound("no mapper defined".to_string())),
            1 => Ok(Arc::clone(candidates[0])),
            n => Err(Error::InvalidParam(format!(
                "{n} mappers defined; a unique mapper is required"
            ))),
        }
    }

    /// Match a request string against mapper selector tables, first match
    /// wins.
    pub fn find_mapper(&self, candidate: &str) -> Option<Arc<CompiledMapper>> {
        for index in &self.domains {
            for mapper in &index.mappers {
                if mapper.mapper.matches(candidate) {
                    return Some(Arc::clone(mapper));
                }
            }
        }
        None
    }

    fn entity_handle(
        &self,
        mrn: &str,
        kind: &str,
        table: impl Fn(&DomainIndex) -> &HashMap<String, Arc<ReferenceEntity>>,
    ) -> Result<EntityHandle> {
        let (index, entity) = self.find_unique(mrn, kind, table)?;
        let unit = self.policy_unit(&index.name, &entity.policy)?;
        Ok(EntityHandle {
            entity,
            unit,
            default_merge: index.default_merge,
        })
    }

    /// Resolve an MRN to an entity: qualified references target one domain,
    /// unqualified references must be unambiguous across all domains.
    fn find_unique<T>(
        &self,
        raw: &str,
        kind: &str,
        table: impl Fn(&DomainIndex) -> &HashMap<String, Arc<T>>,
    ) -> Result<(&DomainIndex, Arc<T>)> {
        let reference = Reference::parse(raw)?;
        if let Some(domain) = &reference.domain {
            let index = self
                .domains
                .iter()
                .find(|d| &d.name == domain)
                .ok_or_else(|| Error::NotFound(format!("domain {domain:?} does not exist")))?;
            let entity = table(index)
                .get(&reference.mrn)
                .ok_or_else(|| Error::NotFound(format!("no {kind} {raw}")))?;
            return Ok((index, Arc::clone(entity)));
        }

        let mut matches = self
            .domains
            .iter()
            .filter_map(|d| table(d).get(raw).map(|e| (d, Arc::clone(e))));
        match (matches.next(), matches.next()) {
            (None, _) => Err(Error::NotFound(format!("no {kind} {raw}"))),
            (Some(found), None) => Ok(found),
            (Some(_), Some(_)) => Err(Error::InvalidParam(format!(
                "{kind} {raw} is ambiguous across domains; qualify the reference"
            ))),
        }
    }

    fn policy_unit(&self, source_domain: &str, raw: &str) -> Result<Arc<CompiledUnit>> {
        let reference = Reference::parse(raw)?;
        let target = reference.domain_or(source_domain);
        let index = self
            .domains
            .iter()
            .find(|d| d.name == target)
            .ok_or_else(|| Error::NotFound(format!("domain {target:?} does not exist")))?;
        index
            .policies
            .get(&reference.mrn)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no policy {raw}")))
    }

    fn resolve_resource(
        &self,
        index: &DomainIndex,
        record: &Resource,
        mrn: &str,
    ) -> Result<ResolvedResource> {
        let group_ref = Reference::parse(&record.group)?;
        let group_domain = group_ref.domain_or(&index.name);
        let group_index = self
            .domains
            .iter()
            .find(|d| d.name == group_domain)
            .ok_or_else(|| Error::NotFound(format!("domain {group_domain:?} does not exist")))?;
        let group = group_index
            .resource_groups
            .get(&group_ref.mrn)
            .ok_or_else(|| Error::NotFound(format!("no resource-group {}", record.group)))?;

        // Record annotations form the base; the group's own annotations
        // merge on top.
        let mut annotations = serde_json::Map::new();
        for annotation in &record.annotations {
            apply_annotation(
                &mut annotations,
                &annotation.name,
                annotation.value.clone(),
                annotation.merge.unwrap_or(index.default_merge),
            );
        }
        for annotation in &group.annotations {
            apply_annotation(
                &mut annotations,
                &annotation.name,
                annotation.value.clone(),
                annotation.merge.unwrap_or(group_index.default_merge),
            );
        }

        Ok(ResolvedResource {
            id: mrn.to_string(),
            owner: None,
            group: Some(record.group.clone()),
            classification: Default::default(),
            annotations,
        })
    }
}

/// Merge one annotation occurrence into an accumulating map.
pub(crate) fn apply_annotation(
    target: &mut serde_json::Map<String, Value>,
    name: &str,
    value: Value,
    strategy: MergeStrategy,
) {
    let merged = match target.remove(name) {
        Some(existing) => merge_values(strategy, existing, value),
        None => value,
    };
    target.insert(name.to_string(), merged);
}

fn build_index(
    domains: &[PolicyDomain],
    domain: &PolicyDomain,
    graph: &DependencyGraph,
    compiler: &PolicyCompiler,
    mapper_compiler: &PolicyCompiler,
) -> Result<DomainIndex> {
    let mut policies = HashMap::new();
    for policy in &domain.policies {
        let closure = graph.closure(&domain.name, &policy.dependencies)?;

        let mut modules = Vec::with_capacity(closure.len() + 1);
        let mut refs = Vec::with_capacity(closure.len() + 1);
        modules.push((policy.mrn.clone(), policy.rego.clone()));
        refs.push(PolicyRef {
            mrn: policy.mrn.clone(),
            fingerprint: policy.fingerprint.to_base64(),
        });
        for qualified in &closure {
            let (owner, mrn) = qualified
                .split_once('/')
                .ok_or_else(|| Error::Unknown(format!("unqualified closure entry {qualified}")))?;
            let library = domains
                .iter()
                .find(|d| d.name == owner)
                .and_then(|d| d.library(mrn))
                .ok_or_else(|| Error::NotFound(format!("no policy-library {qualified}")))?;
            modules.push((qualified.clone(), library.rego.clone()));
            refs.push(PolicyRef {
                mrn: qualified.clone(),
                fingerprint: library.fingerprint.to_base64(),
            });
        }

        let compiled = compiler.compile(&policy.mrn, &modules)?;
        policies.insert(
            policy.mrn.clone(),
            Arc::new(CompiledUnit { compiled, refs }),
        );
    }

    let mut mappers = Vec::with_capacity(domain.mappers.len());
    for mapper in &domain.mappers {
        let qualified = qualify(&domain.name, &mapper.name);
        let modules = vec![(qualified.clone(), mapper.rego.clone())];
        let compiled = mapper_compiler.compile(&qualified, &modules)?;
        mappers.push(Arc::new(CompiledMapper {
            mapper: Arc::clone(mapper),
            compiled,
            reference: PolicyRef {
                mrn: qualified,
                fingerprint: mapper.fingerprint.to_base64(),
            },
        }));
    }

    debug!(domain = %domain.name, policies = policies.len(), "indexed domain");

    Ok(DomainIndex {
        name: domain.name.clone(),
        default_merge: domain.annotation_defaults.merge,
        roles: entity_map(&domain.roles, |e| e.mrn.clone()),
        scopes: entity_map(&domain.scopes, |e| e.mrn.clone()),
        resource_groups: entity_map(&domain.resource_groups, |e| e.mrn.clone()),
        groups: entity_map(&domain.groups, |g| g.mrn.clone()),
        policies,
        operations: domain.operations.clone(),
        resources: domain.resources.clone(),
        mappers,
        default_group: domain.default_resource_group().map(|g| g.mrn.clone()),
    })
}

fn entity_map<T>(entities: &[Arc<T>], key: impl Fn(&T) -> String) -> HashMap<String, Arc<T>> {
    entities
        .iter()
        .map(|e| (key(e), Arc::clone(e)))
        .collect()
}
