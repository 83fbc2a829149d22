//! Engine configuration passthrough.
//!
//! Configuration-file loading belongs to the caller; the engine consumes an
//! already-constructed [`EngineConfig`].

use serde_json::Value;

use crate::evaluator::{PolicyCompiler, DEFAULT_UNSAFE_BUILTINS};

/// Decision-engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When enabled (the default), references from all four phases are
    /// appended to the access record even when the operation phase
    /// short-circuits.
    pub include_all_bundles: bool,

    /// Builtins stripped from policy compilation. Mapper compilation keeps
    /// them. Enforced by the compiler derived via
    /// [`EngineConfig::compiler`]; build registries with that compiler so
    /// this list actually reaches compilation.
    pub unsafe_builtins: Vec<String>,

    /// Opaque environment descriptor copied into access-record metadata.
    pub env: Option<Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            include_all_bundles: true,
            unsafe_builtins: DEFAULT_UNSAFE_BUILTINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            env: None,
        }
    }
}

impl EngineConfig {
    /// The policy compiler enforcing this configuration's builtin
    /// deny-list. This is the pass-through point for the `unsafe-builtins`
    /// config key: registries handed to [`crate::engine::Engine`] must be
    /// built with this compiler.
    pub fn compiler(&self) -> PolicyCompiler {
        PolicyCompiler::new(self.unsafe_builtins.clone())
    }

    /// Parse the `unsafe-builtins` config key: a comma-separated list of
    /// Rego function names.
    pub fn parse_unsafe_builtins(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
