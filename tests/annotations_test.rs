//! Annotation composition: effective maps from scopes, groups, and roles
//! under every merge strategy.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use iamlite::engine::compose::inject_annotations;
use iamlite::evaluator::PolicyCompiler;
use iamlite::registry::Registry;

const DOMAIN: &str = r#"
apiVersion: iamlite.manetu.io/v1beta1
kind: PolicyDomain
metadata:
  name: core
spec:
  annotation-defaults:
    merge: replace
  policies:
    - mrn: mrn:iam:policy:open
      name: open
      rego: |
        package authz

        default allow = true
  roles:
    - mrn: mrn:iam:role:analyst
      name: analyst
      policy: mrn:iam:policy:open
      annotations:
        - name: labels
          value: [reports, exports]
          merge: union
        - name: limits
          value: {rps: 50}
          merge: deep
        - name: tier
          value: analyst
  scopes:
    - mrn: mrn:iam:scope:ingest
      name: ingest
      policy: mrn:iam:policy:open
      annotations:
        - name: labels
          value: [ingest]
          merge: union
        - name: limits
          value: {rps: 10, burst: 5}
          merge: deep
        - name: tier
          value: scope-tier
  groups:
    - mrn: mrn:iam:group:data
      name: data
      roles: [mrn:iam:role:analyst]
      annotations:
        - name: labels
          value: [reports, shared]
          merge: union
        - name: history
          value: [group]
          merge: append
"#;

fn registry() -> Registry {
    let domain = iamlite::loader::load_str(DOMAIN, None).unwrap();
    Registry::build(vec![domain], &PolicyCompiler::default()).unwrap()
}

fn principal() -> Value {
    json!({
        "sub": "dana",
        "scopes": ["mrn:iam:scope:ingest"],
        "mgroups": ["mrn:iam:group:data"],
        "mroles": ["mrn:iam:role:analyst"],
    })
}

#[test]
fn union_is_order_stable_across_scopes_groups_roles() {
    let registry = registry();
    let mut p = principal();
    inject_annotations(&registry, &mut p);
    // scope [ingest], group [reports, shared], role [reports, exports]
    assert_eq!(
        p["mannotations"]["labels"],
        json!(["ingest", "reports", "shared", "exports"])
    );
}

#[test]
fn deep_merge_composes_maps_recursively() {
    let registry = registry();
    let mut p = principal();
    inject_annotations(&registry, &mut p);
    // The role's rps wins over the scope's; burst survives from the scope.
    assert_eq!(p["mannotations"]["limits"], json!({"rps": 50, "burst": 5}));
}

#[test]
fn replace_takes_the_last_writer_in_processing_order() {
    let registry = registry();
    let mut p = principal();
    inject_annotations(&registry, &mut p);
    assert_eq!(p["mannotations"]["tier"], json!("analyst"));
}

#[test]
fn explicit_input_annotations_win_last() {
    let registry = registry();
    let mut p = principal();
    p["mannotations"] = json!({"tier": "override", "extra": true});
    inject_annotations(&registry, &mut p);
    assert_eq!(p["mannotations"]["tier"], json!("override"));
    assert_eq!(p["mannotations"]["extra"], json!(true));
    // Entity-derived keys are still present.
    assert_eq!(p["mannotations"]["history"], json!(["group"]));
}

#[test]
fn empty_principal_is_left_untouched() {
    let registry = registry();
    let mut p = json!({});
    inject_annotations(&registry, &mut p);
    assert_eq!(p, json!({}));
}

#[test]
fn unknown_entities_are_skipped() {
    let registry = registry();
    let mut p = json!({
        "sub": "dana",
        "mroles": ["mrn:iam:role:ghost", "mrn:iam:role:analyst"],
    });
    inject_annotations(&registry, &mut p);
    assert_eq!(p["mannotations"]["tier"], json!("analyst"));
}
