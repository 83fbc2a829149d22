//! Loader behavior across the three schema versions: anchoring,
//! fingerprints, external Rego inlining, and directory loading.

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use iamlite::domain::{ApiVersion, Fingerprint, ModuleSource};
use iamlite::loader::{anchor, load_dir, load_file, load_str};

#[test]
fn unixfs_fixture_loads_completely() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/unixfs.yaml");
    let domain = load_file(path).unwrap();

    assert_eq!(domain.name, "unixfs");
    assert_eq!(domain.version, ApiVersion::V1Beta1);
    assert_eq!(domain.libraries.len(), 1);
    assert_eq!(domain.policies.len(), 7);
    assert_eq!(domain.roles.len(), 2);
    assert_eq!(domain.scopes.len(), 2);
    assert_eq!(domain.groups.len(), 1);
    assert_eq!(domain.resource_groups.len(), 2);
    assert_eq!(domain.resources.len(), 2);
    assert_eq!(domain.operations.len(), 3);
    assert_eq!(domain.mappers.len(), 1);

    assert_eq!(
        domain.default_resource_group().unwrap().mrn,
        "mrn:iam:resource-group:quarantine"
    );
    assert_eq!(
        domain.policies[0].dependencies,
        Vec::<String>::new()
    );
}

#[test]
fn every_selector_is_anchored_and_anchoring_is_idempotent() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/unixfs.yaml");
    let domain = load_file(path).unwrap();

    let selectors = domain
        .operations
        .iter()
        .flat_map(|o| o.selectors.iter())
        .chain(domain.resources.iter().flat_map(|r| r.selectors.iter()))
        .chain(domain.mappers.iter().flat_map(|m| m.selectors.iter()));

    for selector in selectors {
        assert!(selector.pattern.starts_with('^'), "{}", selector.pattern);
        assert!(selector.pattern.ends_with('$'), "{}", selector.pattern);
        assert_eq!(anchor(&selector.pattern), selector.pattern);
    }
}

#[test]
fn fingerprints_are_stable_and_content_sensitive() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/unixfs.yaml");
    let first = load_file(&path).unwrap();
    let second = load_file(&path).unwrap();

    for (a, b) in first.policies.iter().zip(second.policies.iter()) {
        assert_eq!(a.fingerprint(), b.fingerprint(), "{}", a.mrn);
    }

    let original = &first.policies[0];
    let mut tweaked = original.rego.clone();
    tweaked.push(' ');
    assert_ne!(*original.fingerprint(), Fingerprint::of(&tweaked));
}

#[test]
fn domain_reference_inlines_external_rego() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("member.rego"),
        "package authz\n\ndefault allow = false\n\nallow { input.principal.sub != \"\" }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("domain.yaml"),
        r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomainReference
metadata:
  name: filed
spec:
  policies:
    - mrn: mrn:iam:policy:member
      name: member
      rego_filename: member.rego
"#,
    )
    .unwrap();

    let domain = load_file(dir.path().join("domain.yaml")).unwrap();
    assert!(domain.policies[0].rego.contains("default allow = false"));
    // The fingerprint covers the inlined source bytes.
    assert_eq!(
        *domain.policies[0].fingerprint(),
        Fingerprint::of(&domain.policies[0].rego)
    );
}

#[test]
fn missing_external_rego_is_a_load_error() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("domain.yaml"),
        r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomainReference
metadata:
  name: filed
spec:
  policies:
    - mrn: mrn:iam:policy:member
      name: member
      rego_filename: nope.rego
"#,
    )
    .unwrap();
    assert!(load_file(dir.path().join("domain.yaml")).is_err());
}

#[test]
fn load_dir_orders_domains_by_filename() {
    let dir = TempDir::new().unwrap();
    let doc = |name: &str| {
        format!(
            r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: {name}
spec: {{}}
"#
        )
    };
    fs::write(dir.path().join("20-second.yaml"), doc("second")).unwrap();
    fs::write(dir.path().join("10-first.yml"), doc("first")).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let domains = load_dir(dir.path()).unwrap();
    let names: Vec<_> = domains.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[test]
fn alpha4_accepts_resources_and_json_string_annotations() {
    let doc = r#"
apiVersion: iamlite.manetu.io/v1alpha4
kind: PolicyDomain
metadata:
  name: legacy
spec:
  resources:
    - name: docs
      selector: ["mrn:docs:.*"]
      group: mrn:iam:resource-group:default
      annotations:
        - name: labels
          value: '["a", "b"]'
        - name: limits
          value: '{"rps": 10, "burst": true}'
"#;
    let domain = load_str(doc, None).unwrap();
    let annotations = &domain.resources[0].annotations;
    assert_eq!(annotations[0].value, serde_json::json!(["a", "b"]));
    assert_eq!(
        annotations[1].value,
        serde_json::json!({"rps": 10, "burst": true})
    );
    // Merge strategies stay a v1beta1 feature.
    assert!(annotations.iter().all(|a| a.merge.is_none()));
}

#[test]
fn unknown_api_version_is_rejected() {
    let doc = r#"
apiVersion: iamlite.manetu.io/v2
kind: PolicyDomain
metadata:
  name: future
spec: {}
"#;
    assert!(load_str(doc, None).is_err());
}
