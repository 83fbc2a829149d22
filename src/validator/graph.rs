//! Library dependency graph.
//!
//! Nodes are policy libraries in the qualified `<domain>/<mrn>` name space,
//! stored as a flat arena with integer edges; the qualified-name map is an
//! auxiliary hash for lookups. Cycle detection is a three-colored DFS that
//! reports the full cycle path.

use std::collections::HashMap;

use crate::domain::PolicyDomain;
use crate::error::{Error, Result};
use crate::mrn::Reference;

#[derive(Debug)]
struct Node {
    qualified: String,
    edges: Vec<usize>,
}

/// The library graph for a domain set.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

/// An unresolvable dependency edge found while building the graph.
#[derive(Debug, Clone)]
pub struct UnresolvedDependency {
    pub domain: String,
    pub library: String,
    pub dependency: String,
    pub message: String,
}

impl DependencyGraph {
    /// Build the graph over every library in the domain set. Unresolvable
    /// edges are reported rather than failing the build, so validation can
    /// aggregate them.
    pub fn build(domains: &[PolicyDomain]) -> (Self, Vec<UnresolvedDependency>) {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        for domain in domains {
            for library in &domain.libraries {
                let qualified = crate::mrn::qualify(&domain.name, &library.mrn);
                // Duplicate MRNs are reported separately by the validator;
                // first declaration wins here.
                index.entry(qualified.clone()).or_insert_with(|| {
                    nodes.push(Node {
                        qualified,
                        edges: Vec::new(),
                    });
                    nodes.len() - 1
                });
            }
        }

        let mut unresolved = Vec::new();
        for domain in domains {
            for library in &domain.libraries {
                let from = match index.get(&crate::mrn::qualify(&domain.name, &library.mrn)) {
                    Some(&i) => i,
                    None => continue,
                };
                for dependency in &library.dependencies {
                    match resolve_edge(&index, &domain.name, dependency) {
                        Ok(to) => nodes[from].edges.push(to),
                        Err(message) => unresolved.push(UnresolvedDependency {
                            domain: domain.name.clone(),
                            library: library.mrn.clone(),
                            dependency: dependency.clone(),
                            message,
                        }),
                    }
                }
            }
        }

        (DependencyGraph { nodes, index }, unresolved)
    }

    /// All dependency cycles, each reported as a qualified-name path that
    /// starts and ends at the same node.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        const UNVISITED: u8 = 0;
        const ON_STACK: u8 = 1;
        const DONE: u8 = 2;

        let mut colors = vec![UNVISITED; self.nodes.len()];
        let mut path: Vec<usize> = Vec::new();
        let mut cycles = Vec::new();

        fn visit(
            graph: &DependencyGraph,
            node: usize,
            colors: &mut [u8],
            path: &mut Vec<usize>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            colors[node] = ON_STACK;
            path.push(node);
            for &next in &graph.nodes[node].edges {
                match colors[next] {
                    UNVISITED => visit(graph, next, colors, path, cycles),
                    ON_STACK => {
                        let start = path.iter().position(|&n| n == next).expect("on stack");
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|&n| graph.nodes[n].qualified.clone())
                            .collect();
                        cycle.push(graph.nodes[next].qualified.clone());
                        cycles.push(cycle);
                    }
                    _ => {}
                }
            }
            path.pop();
            colors[node] = DONE;
        }

        for node in 0..self.nodes.len() {
            if colors[node] == UNVISITED {
                visit(self, node, &mut colors, &mut path, &mut cycles);
            }
        }
        cycles
    }

    /// The transitive closure of a dependency list, qualified, duplicates
    /// removed preserving first occurrence. Resolving an already-resolved
    /// set yields the same set.
    pub fn closure(&self, source_domain: &str, dependencies: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for dependency in dependencies {
            let node = resolve_edge(&self.index, source_domain, dependency)
                .map_err(Error::NotFound)?;
            self.collect(node, &mut out, &mut seen);
        }
        Ok(out)
    }

    fn collect(
        &self,
        node: usize,
        out: &mut Vec<String>,
        seen: &mut std::collections::HashSet<usize>,
    ) {
        if !seen.insert(node) {
            return;
        }
        out.push(self.nodes[node].qualified.clone());
        for &next in &self.nodes[node].edges {
            self.collect(next, out, seen);
        }
    }
}

fn resolve_edge(
    index: &HashMap<String, usize>,
    source_domain: &str,
    dependency: &str,
) -> std::result::Result<usize, String> {
    let reference =
        Reference::parse(dependency).map_err(|e| format!("invalid reference: {e}"))?;
    let qualified = reference.qualified(source_domain);
    index
        .get(&qualified)
        .copied()
        .ok_or_else(|| format!("library {qualified} does not exist"))
}
