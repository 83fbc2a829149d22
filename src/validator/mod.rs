//! Cross-domain validation.
//!
//! Validation accumulates every problem it finds rather than stopping at the
//! first: broken references, dependency cycles, and Rego modules that fail
//! to parse. The report groups errors by domain and by category and renders
//! a one-line summary.

pub mod graph;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::domain::{EntityKind, PolicyBacked, PolicyDomain};
use crate::evaluator::PolicyCompiler;
use crate::mrn::Reference;
use graph::DependencyGraph;

/// Validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCategory {
    Reference,
    Cycle,
    Rego,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Reference => "reference",
            ErrorCategory::Cycle => "cycle",
            ErrorCategory::Rego => "rego",
        };
        f.write_str(s)
    }
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The domain the finding belongs to.
    pub domain: String,
    pub category: ErrorCategory,
    /// The entity (MRN or name) the finding is attached to.
    pub entity: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{}: {}",
            self.category, self.domain, self.entity, self.message
        )
    }
}

/// The aggregated result of validating a domain set.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn by_domain(&self) -> BTreeMap<&str, Vec<&ValidationError>> {
        let mut out: BTreeMap<&str, Vec<&ValidationError>> = BTreeMap::new();
        for error in &self.errors {
            out.entry(error.domain.as_str()).or_default().push(error);
        }
        out
    }

    pub fn by_category(&self) -> BTreeMap<ErrorCategory, Vec<&ValidationError>> {
        let mut out: BTreeMap<ErrorCategory, Vec<&ValidationError>> = BTreeMap::new();
        for error in &self.errors {
            out.entry(error.category).or_default().push(error);
        }
        out
    }

    pub fn summary(&self) -> String {
        if self.is_ok() {
            return "0 errors".to_string();
        }
        let counts = self.by_category();
        let breakdown: Vec<String> = counts
            .iter()
            .map(|(category, errors)| format!("{} {category}", errors.len()))
            .collect();
        format!(
            "{} error(s) across {} domain(s): {}",
            self.errors.len(),
            self.by_domain().len(),
            breakdown.join(", ")
        )
    }

    fn push(
        &mut self,
        domain: &str,
        category: ErrorCategory,
        entity: &str,
        message: impl Into<String>,
    ) {
        self.errors.push(ValidationError {
            domain: domain.to_string(),
            category,
            entity: entity.to_string(),
            message: message.into(),
        });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for (domain, errors) in self.by_domain() {
            writeln!(f, "domain {domain}:")?;
            for error in errors {
                writeln!(f, "  [{}] {}: {}", error.category, error.entity, error.message)?;
            }
        }
        Ok(())
    }
}

/// Validate a domain set: uniqueness, references, cycles, and Rego syntax.
pub fn validate(domains: &[PolicyDomain], compiler: &PolicyCompiler) -> ValidationReport {
    let mut report = ValidationReport::default();

    for domain in domains {
        check_unique_mrns(domain, &mut report);
        check_default_resource_group(domain, &mut report);
        check_references(domains, domain, &mut report);
        check_rego(domain, compiler, &mut report);
    }

    let (graph, unresolved) = DependencyGraph::build(domains);
    for missing in unresolved {
        report.push(
            &missing.domain,
            ErrorCategory::Reference,
            &missing.library,
            format!("dependency {:?}: {}", missing.dependency, missing.message),
        );
    }
    for cycle in graph.find_cycles() {
        let domain = cycle[0].split_once('/').map(|(d, _)| d).unwrap_or_default();
        report.push(
            domain,
            ErrorCategory::Cycle,
            &cycle[0],
            format!("dependency cycle: {}", cycle.join(" -> ")),
        );
    }

    debug!("validation finished: {}", report.summary());
    report
}

fn check_unique_mrns(domain: &PolicyDomain, report: &mut ValidationReport) {
    fn check<'a>(
        domain: &str,
        kind: EntityKind,
        mrns: impl Iterator<Item = &'a str>,
        report: &mut ValidationReport,
    ) {
        let mut seen = HashSet::new();
        for mrn in mrns {
            if !seen.insert(mrn) {
                report.push(
                    domain,
                    ErrorCategory::Reference,
                    mrn,
                    format!("duplicate {kind} MRN"),
                );
            }
        }
    }

    check(
        &domain.name,
        EntityKind::Policy,
        domain.policies.iter().map(|p| p.mrn.as_str()),
        report,
    );
    check(
        &domain.name,
        EntityKind::PolicyLibrary,
        domain.libraries.iter().map(|l| l.mrn.as_str()),
        report,
    );
    check(
        &domain.name,
        EntityKind::Role,
        domain.roles.iter().map(|r| r.mrn.as_str()),
        report,
    );
    check(
        &domain.name,
        EntityKind::Scope,
        domain.scopes.iter().map(|s| s.mrn.as_str()),
        report,
    );
    check(
        &domain.name,
        EntityKind::ResourceGroup,
        domain.resource_groups.iter().map(|g| g.mrn.as_str()),
        report,
    );
    check(
        &domain.name,
        EntityKind::Group,
        domain.groups.iter().map(|g| g.mrn.as_str()),
        report,
    );
}

fn check_default_resource_group(domain: &PolicyDomain, report: &mut ValidationReport) {
    let defaults: Vec<&str> = domain
        .resource_groups
        .iter()
        .filter(|g| g.default)
        .map(|g| g.mrn.as_str())
        .collect();
    if defaults.len() > 1 {
        report.push(
            &domain.name,
            ErrorCategory::Reference,
            defaults[1],
            format!(
                "more than one default resource-group: {}",
                defaults.join(", ")
            ),
        );
    }
}

fn check_references(
    domains: &[PolicyDomain],
    domain: &PolicyDomain,
    report: &mut ValidationReport,
) {
    let mut check = |entity: &str, raw: &str, kind: EntityKind| {
        if let Err(message) = resolve(domains, &domain.name, raw, kind) {
            report.push(&domain.name, ErrorCategory::Reference, entity, message);
        }
    };

    // Every policy-backed entity, through the shared capability set.
    for entity in domain
        .roles
        .iter()
        .chain(domain.scopes.iter())
        .chain(domain.resource_groups.iter())
    {
        check(&entity.mrn, entity.policy(), EntityKind::Policy);
    }
    for operation in &domain.operations {
        check(&operation.name, operation.policy(), EntityKind::Policy);
    }
    for resource in &domain.resources {
        check(&resource.name, &resource.group, EntityKind::ResourceGroup);
    }
    for group in &domain.groups {
        for role in &group.roles {
            check(&group.mrn, role, EntityKind::Role);
        }
    }
    for policy in &domain.policies {
        for dependency in &policy.dependencies {
            check(&policy.mrn, dependency, EntityKind::PolicyLibrary);
        }
    }
    // Library-to-library edges are checked during graph construction.
}

/// Resolve a reference from `source_domain`, expecting an entity of `kind`.
fn resolve(
    domains: &[PolicyDomain],
    source_domain: &str,
    raw: &str,
    kind: EntityKind,
) -> Result<(), String> {
    let reference = Reference::parse(raw).map_err(|e| e.to_string())?;
    let target_name = reference.domain_or(source_domain);
    let target = domains
        .iter()
        .find(|d| d.name == target_name)
        .ok_or_else(|| format!("reference {raw:?}: domain {target_name:?} does not exist"))?;
    if !target.has_entity(kind, &reference.mrn) {
        return Err(format!(
            "reference {raw:?}: no {kind} {} in domain {target_name:?}",
            reference.mrn
        ));
    }
    Ok(())
}

fn check_rego(domain: &PolicyDomain, compiler: &PolicyCompiler, report: &mut ValidationReport) {
    for module in domain.policies.iter().chain(domain.libraries.iter()) {
        if let Err(e) = compiler.parse(&module.mrn, &module.rego) {
            report.push(&domain.name, ErrorCategory::Rego, &module.mrn, e.to_string());
        }
    }
    let permissive = compiler.permissive();
    for mapper in &domain.mappers {
        if let Err(e) = permissive.parse(&mapper.name, &mapper.rego) {
            report.push(&domain.name, ErrorCategory::Rego, &mapper.name, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_str;

    fn domain(doc: &str) -> PolicyDomain {
        load_str(doc, None).unwrap()
    }

    #[test]
    fn clean_domain_validates() {
        let d = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  policy-libraries:
    - mrn: mrn:iam:library:util
      name: util
      rego: |
        package util
        yes = true
  policies:
    - mrn: mrn:iam:policy:allow
      name: allow
      dependencies: [mrn:iam:library:util]
      rego: |
        package authz
        import data.util
        default allow = false
        allow { util.yes }
  roles:
    - mrn: mrn:iam:role:user
      name: user
      policy: mrn:iam:policy:allow
"#,
        );
        let report = validate(&[d], &PolicyCompiler::default());
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    fn missing_reference_is_reported_not_fatal() {
        let d = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  roles:
    - mrn: mrn:iam:role:user
      name: user
      policy: mrn:iam:policy:missing
    - mrn: mrn:iam:role:admin
      name: admin
      policy: mrn:iam:policy:also-missing
"#,
        );
        let report = validate(&[d], &PolicyCompiler::default());
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.category == ErrorCategory::Reference));
        assert!(report.summary().contains("2 error(s)"));
    }

    #[test]
    fn dependency_cycle_reports_full_path() {
        let d = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  policy-libraries:
    - mrn: mrn:iam:library:a
      name: a
      dependencies: [mrn:iam:library:b]
      rego: |
        package a
        x = 1
    - mrn: mrn:iam:library:b
      name: b
      dependencies: [mrn:iam:library:a]
      rego: |
        package b
        x = 1
"#,
        );
        let report = validate(&[d], &PolicyCompiler::default());
        let cycles: Vec<_> = report
            .errors
            .iter()
            .filter(|e| e.category == ErrorCategory::Cycle)
            .collect();
        assert_eq!(cycles.len(), 1);
        let message = &cycles[0].message;
        assert!(message.contains("core/mrn:iam:library:a"), "{message}");
        // Path starts and ends at the same qualified MRN.
        let path: Vec<&str> = message
            .trim_start_matches("dependency cycle: ")
            .split(" -> ")
            .collect();
        assert_eq!(path.first(), path.last());
    }

    #[test]
    fn invalid_rego_is_reported_per_module() {
        let d = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  policies:
    - mrn: mrn:iam:policy:bad
      name: bad
      rego: |
        this is not rego
"#,
        );
        let report = validate(&[d], &PolicyCompiler::default());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].category, ErrorCategory::Rego);
    }

    #[test]
    fn duplicate_default_resource_groups_rejected() {
        let d = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  policies:
    - mrn: mrn:iam:policy:deny
      name: deny
      rego: |
        package authz
        default allow = false
  resource-groups:
    - mrn: mrn:iam:resource-group:a
      name: a
      default: true
      policy: mrn:iam:policy:deny
    - mrn: mrn:iam:resource-group:b
      name: b
      default: true
      policy: mrn:iam:policy:deny
"#,
        );
        let report = validate(&[d], &PolicyCompiler::default());
        assert!(!report.is_ok());
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("default resource-group")));
    }

    #[test]
    fn cross_domain_references_resolve_when_qualified() {
        let shared = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: shared
spec:
  policies:
    - mrn: mrn:iam:policy:allow
      name: allow
      rego: |
        package authz
        default allow = true
"#,
        );
        let app = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: app
spec:
  roles:
    - mrn: mrn:iam:role:user
      name: user
      policy: shared/mrn:iam:policy:allow
"#,
        );
        let report = validate(&[shared, app], &PolicyCompiler::default());
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    fn unqualified_references_do_not_cross_domains() {
        let shared = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: shared
spec:
  policies:
    - mrn: mrn:iam:policy:allow
      name: allow
      rego: |
        package authz
        default allow = true
"#,
        );
        let app = domain(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: app
spec:
  roles:
    - mrn: mrn:iam:role:user
      name: user
      policy: mrn:iam:policy:allow
"#,
        );
        let report = validate(&[shared, app], &PolicyCompiler::default());
        assert!(!report.is_ok());
    }
}
