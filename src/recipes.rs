//! # Recipes: declarative component descriptions.
//!
//! A [`Recipe`] is the declarative description of one component: its
//! lifecycle steps, dependency declaration, environment, and optional
//! code-backed handler class. Recipe *files* and the on-disk package store
//! are out of scope; a [`RecipeSource`] supplies recipes by
//! `(name, version)` and answers semver requirement queries.
//!
//! The registry imports a recipe into the configuration store under
//! `services.<name>` ([`Recipe::import`]) before instantiating the
//! component, so everything downstream reads plain config.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use semver::{Version, VersionReq};

use crate::store::{ConfigStore, Topics, Tree};

/// Declarative description of a component.
#[derive(Debug, Clone)]
pub struct Recipe {
    /// Component name (globally unique; dotted paths permitted).
    pub name: String,
    /// Recipe version.
    pub version: Version,
    /// The lifecycle block: step-name → raw command, structured block, or
    /// platform-tagged map.
    pub lifecycle: Tree,
    /// Free-text dependency declaration (`"a, b:finished"`).
    pub dependencies: Option<String>,
    /// Component type hint (`generic`, `oneshot`, ...).
    pub component_type: Option<String>,
    /// Extra environment entries for every lifecycle step.
    pub setenv: Vec<(String, String)>,
    /// Arbitrary configuration subtree exposed to the component.
    pub configuration: Option<Tree>,
    /// Code-backed handler symbol; absent for script-driven components.
    pub class: Option<String>,
}

impl Recipe {
    /// Creates an empty recipe for `name`/`version`.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            lifecycle: Tree::branch::<_, String>([]),
            dependencies: None,
            component_type: None,
            setenv: Vec::new(),
            configuration: None,
            class: None,
        }
    }

    /// Sets the lifecycle block.
    pub fn with_lifecycle(mut self, lifecycle: Tree) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Sets the dependency declaration.
    pub fn with_dependencies(mut self, deps: impl Into<String>) -> Self {
        self.dependencies = Some(deps.into());
        self
    }

    /// Sets the code-backed handler symbol.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// Adds one `setenv` entry.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.setenv.push((key.into(), value.into()));
        self
    }

    /// Sets the configuration subtree.
    pub fn with_configuration(mut self, tree: Tree) -> Self {
        self.configuration = Some(tree);
        self
    }

    /// Writes this recipe into `services.<name>` and returns that subtree.
    pub fn import(&self, store: &ConfigStore) -> Topics {
        let t = store.lookup_topics(&format!("services.{}", self.name));
        t.set("version", self.version.to_string());
        if let Some(deps) = &self.dependencies {
            t.set("dependencies", deps.as_str());
        }
        if let Some(kind) = &self.component_type {
            t.set("componentType", kind.as_str());
        }
        if let Some(class) = &self.class {
            t.set("class", class.as_str());
        }
        if !self.setenv.is_empty() {
            let env = t.subtopics("setenv");
            for (k, v) in &self.setenv {
                env.set(k, v.as_str());
            }
        }
        if let Some(cfg) = &self.configuration {
            t.subtopics("configuration").merge_tree(cfg);
        }
        t.subtopics("lifecycle").merge_tree(&self.lifecycle);
        t
    }
}

/// Supplies recipes by name and version.
///
/// Implementations may be backed by a disk store, a cloud catalog, or (in
/// tests) plain memory. `list_versions` returns versions **newest first**
/// so that `best_match` picks the newest satisfying version.
#[async_trait]
pub trait RecipeSource: Send + Sync {
    /// Exact lookup.
    async fn find_recipe(&self, name: &str, version: &Version) -> Option<Recipe>;

    /// All versions of `name` satisfying `requirement`, newest first.
    async fn list_versions(&self, name: &str, requirement: &VersionReq) -> Vec<Version>;

    /// The newest `(name, version)` satisfying `requirement`.
    async fn best_match(&self, name: &str, requirement: &VersionReq) -> Option<(String, Version)> {
        self.list_versions(name, requirement)
            .await
            .into_iter()
            .next()
            .map(|v| (name.to_string(), v))
    }
}

/// In-memory [`RecipeSource`] for tests and demos.
#[derive(Default)]
pub struct MemoryRecipeSource {
    recipes: RwLock<HashMap<String, BTreeMap<Version, Recipe>>>,
}

impl MemoryRecipeSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a recipe.
    pub fn add(&self, recipe: Recipe) {
        self.recipes
            .write()
            .expect("recipe lock poisoned")
            .entry(recipe.name.clone())
            .or_default()
            .insert(recipe.version.clone(), recipe);
    }
}

#[async_trait]
impl RecipeSource for MemoryRecipeSource {
    async fn find_recipe(&self, name: &str, version: &Version) -> Option<Recipe> {
        self.recipes
            .read()
            .expect("recipe lock poisoned")
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned()
    }

    async fn list_versions(&self, name: &str, requirement: &VersionReq) -> Vec<Version> {
        self.recipes
            .read()
            .expect("recipe lock poisoned")
            .get(name)
            .map(|versions| {
                versions
                    .keys()
                    .rev()
                    .filter(|v| requirement.matches(v))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[tokio::test]
    async fn best_match_takes_newest_satisfying() {
        let src = MemoryRecipeSource::new();
        for ver in ["1.0.0", "1.2.0", "2.0.0"] {
            src.add(Recipe::new("cam", v(ver)));
        }

        let req = VersionReq::parse("^1").unwrap();
        let (name, version) = src.best_match("cam", &req).await.unwrap();
        assert_eq!(name, "cam");
        assert_eq!(version, v("1.2.0"));

        let any = VersionReq::STAR;
        assert_eq!(src.best_match("cam", &any).await.unwrap().1, v("2.0.0"));
        assert!(src.best_match("mic", &any).await.is_none());
    }

    #[test]
    fn import_writes_services_subtree() {
        let store = ConfigStore::new();
        Recipe::new("echo", v("0.1.0"))
            .with_lifecycle(Tree::branch([("run", Tree::leaf("echo hi"))]))
            .with_dependencies("net:running")
            .with_env("MODE", "demo")
            .import(&store);

        assert!(store.find("services.echo.lifecycle.run").is_some());
        assert_eq!(
            store
                .find("services.echo.dependencies")
                .unwrap()
                .as_leaf()
                .unwrap()
                .value
                .to_text(),
            "net:running"
        );
        assert_eq!(
            store
                .find("services.echo.setenv.MODE")
                .unwrap()
                .as_leaf()
                .unwrap()
                .value
                .to_text(),
            "demo"
        );
    }
}
