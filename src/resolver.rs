//! Dependency resolution
//!
//! Turns a recipe plus the active USE-flag set into an ordered
//! build/install list by walking recipes out of the installed database
//! and running them through the dependency graph.

use crate::db::InstalledDb;
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, DEFAULT_WEIGHT};
use crate::recipe::Recipe;
use std::collections::{BTreeMap, BTreeSet};

/// Result of `Resolver::audit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyAudit {
    /// Transitive dependencies that are not installed.
    pub missing: Vec<String>,
    /// Installed packages no other installed package depends on.
    pub orphans: Vec<String>,
}

pub struct Resolver<'a> {
    db: &'a dyn InstalledDb,
}

impl<'a> Resolver<'a> {
    pub fn new(db: &'a dyn InstalledDb) -> Self {
        Self { db }
    }

    /// All dependencies of a recipe that are active under `use_flags`.
    ///
    /// A dependency takes part iff its gate flag is absent or present in
    /// the active set. Build, runtime and optional maps are merged.
    pub fn parse_dependencies(
        recipe: &Recipe,
        use_flags: &BTreeSet<String>,
    ) -> BTreeMap<String, i64> {
        let mut deps = BTreeMap::new();
        for map in [
            &recipe.build_deps,
            &recipe.runtime_deps,
            &recipe.optional_deps,
        ] {
            for (dep, gate) in map {
                let active = match gate {
                    None => true,
                    Some(flag) => flag.is_empty() || use_flags.contains(flag),
                };
                if active {
                    deps.insert(dep.clone(), DEFAULT_WEIGHT);
                }
            }
        }
        deps
    }

    /// Build the full dependency graph rooted at `recipe`.
    ///
    /// Dependencies whose recipes the database does not know still appear
    /// as graph nodes; they simply contribute no edges of their own.
    pub fn build_graph(
        &self,
        recipe: &Recipe,
        use_flags: &BTreeSet<String>,
    ) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![recipe.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.name.clone()) {
                continue;
            }
            let deps = Self::parse_dependencies(&current, use_flags);
            graph.add_package(&current.name, &deps);
            for dep in deps.keys() {
                if let Some(dep_recipe) = self.db.recipe(dep) {
                    stack.push(dep_recipe);
                }
            }
        }

        if graph.detect_cycles() {
            return Err(Error::Conflict(format!(
                "dependency cycle detected while resolving {}",
                recipe.name
            )));
        }

        Ok(graph)
    }

    /// Topologically ordered install list, dependencies first, root last.
    pub fn resolve(&self, recipe: &Recipe, use_flags: &BTreeSet<String>) -> Result<Vec<String>> {
        self.build_graph(recipe, use_flags)?.topo_sort()
    }

    /// The resolved order restricted to packages not yet installed.
    pub fn find_missing(
        &self,
        recipe: &Recipe,
        use_flags: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        Ok(self
            .resolve(recipe, use_flags)?
            .into_iter()
            .filter(|pkg| !self.db.is_installed(pkg))
            .collect())
    }

    /// Installed packages whose dependency maps mention `package`.
    pub fn find_reverse_dependencies(&self, package: &str) -> Vec<String> {
        let no_flags = BTreeSet::new();
        self.db
            .installed_packages()
            .into_iter()
            .filter(|pkg| pkg != package)
            .filter(|pkg| {
                self.db
                    .recipe(pkg)
                    .map(|r| Self::parse_dependencies(&r, &no_flags).contains_key(package))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Subgraph of the recipe's dependency graph, restricted to `packages`
    /// when given.
    pub fn get_subgraph(
        &self,
        recipe: &Recipe,
        use_flags: &BTreeSet<String>,
        packages: Option<&[String]>,
    ) -> Result<DependencyGraph> {
        let graph = self.build_graph(recipe, use_flags)?;
        Ok(match packages {
            Some(subset) => graph.subgraph(subset),
            None => graph,
        })
    }

    /// Audit a recipe: which of its dependencies are missing, and which
    /// installed packages have become orphans.
    pub fn audit(&self, recipe: &Recipe, use_flags: &BTreeSet<String>) -> Result<DependencyAudit> {
        let graph = self.build_graph(recipe, use_flags)?;
        let missing = graph
            .nodes()
            .filter(|pkg| !self.db.is_installed(pkg))
            .map(str::to_string)
            .collect();
        let orphans = self
            .db
            .installed_packages()
            .into_iter()
            .filter(|pkg| !self.db.has_dependents(pkg))
            .collect();
        Ok(DependencyAudit { missing, orphans })
    }

    /// Export a recipe's dependency graph as JSON.
    pub fn export_graph(&self, recipe: &Recipe, use_flags: &BTreeSet<String>) -> Result<String> {
        self.build_graph(recipe, use_flags)?.to_json()
    }

    /// Import a previously exported dependency graph.
    pub fn import_graph(json: &str) -> Result<DependencyGraph> {
        DependencyGraph::from_json(json)
    }
}
