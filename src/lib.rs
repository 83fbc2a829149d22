//! iamlite - a policy-based authorization engine.
//!
//! A declarative **policy domain** describes roles, groups, scopes,
//! operations, resource groups, resources, policy libraries, policies, and
//! mappers, with embedded Rego policy code. The [`loader`] parses versioned
//! YAML into the [`domain`] model, the [`validator`] checks references,
//! dependency cycles, and Rego syntax, and the [`registry`] compiles
//! everything into a read-only, MRN-keyed index. At request time the
//! [`engine`] answers PORC requests (principal, operation, resource,
//! context) through four concurrent evaluation phases and emits a
//! structured access record per decision.
//!
//! ```no_run
//! use std::sync::Arc;
//! use iamlite::{access_log::StdoutSink, AuthorizeOptions, Engine, EngineConfig, Porc};
//! use iamlite::registry::Registry;
//!
//! # async fn demo() -> iamlite::Result<()> {
//! let config = EngineConfig::default();
//! let domains = iamlite::loader::load_dir("policy/")?;
//! let registry = Registry::build(domains, &config.compiler())?;
//! let engine = Engine::new(registry, config, Arc::new(StdoutSink));
//!
//! let porc: Porc = serde_json::from_str(
//!     r#"{"principal": {"sub": "alice", "mroles": ["mrn:iam:role:user"]},
//!         "operation": "file:document:read",
//!         "resource": "mrn:fs:/doc.txt",
//!         "context": {}}"#,
//! )?;
//! let granted = engine.authorize(porc, AuthorizeOptions::default()).await;
//! # Ok(())
//! # }
//! ```

pub mod access_log;
pub mod domain;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod mrn;
pub mod registry;
pub mod validator;

pub use engine::{
    AccessRecord, AuthorizeOptions, BundleReference, Decision, Engine, EngineConfig, Phase, Porc,
    PorcResource,
};
pub use error::{Error, ReasonCode, Result};
