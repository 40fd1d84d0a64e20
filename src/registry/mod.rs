//! C2: the process-wide function registry.
//!
//! A single reader-preferring lock guards two maps — evaluation functions and
//! rewrite (meta-) functions. Registration only happens at startup; lookups
//! are the hot path. Re-registering a name logs a warning and overwrites;
//! registering a name that already exists in the *other* map logs a warning
//! but keeps both entries (lookup priority: rewrite functions win).

pub mod functions;
pub mod rewrite;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::CarbonApiError;
use crate::eval::Evaluator;
use crate::metricdata::MetricData;
use crate::parser::Expression;

/// Metadata surfaced on `/functions`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct FunctionDescription {
    pub name: String,
    pub description: String,
    pub group: String,
    pub module: String,
    pub proxied: bool,
}

#[async_trait]
pub trait Function: Send + Sync {
    /// Evaluates this function given its already-parsed call expression. Series-typed
    /// arguments are evaluated via `evaluator.eval(arg, from, until)`, which recurses
    /// through the registry (and may itself trigger a nested rewrite).
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError>;

    fn description(&self) -> FunctionDescription;

    fn can_backend_filtered(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait RewriteFunction: Send + Sync {
    /// Returns `Some(new_targets)` when this call rewrites into new target
    /// strings to be independently parsed, fetched and evaluated; `None` when
    /// this expression does not need rewriting (e.g. argument count mismatch
    /// some implementations treat as a pass-through rather than an error).
    async fn do_rewrite(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Option<Vec<String>>, CarbonApiError>;

    fn description(&self) -> FunctionDescription;
}

#[derive(Default)]
pub struct Registry {
    functions: RwLock<BTreeMap<String, Arc<dyn Function>>>,
    rewrite_functions: RwLock<BTreeMap<String, Arc<dyn RewriteFunction>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(&self, name: &str, f: Arc<dyn Function>) {
        let mut functions = self.functions.write().unwrap();
        if functions.contains_key(name) {
            tracing::warn!(function = name, "overwriting already-registered function");
        }
        if self.rewrite_functions.read().unwrap().contains_key(name) {
            tracing::warn!(
                function = name,
                "function name also registered as a rewrite function; keeping both"
            );
        }
        functions.insert(name.to_string(), f);
    }

    pub fn register_rewrite(&self, name: &str, f: Arc<dyn RewriteFunction>) {
        let mut rewrite_functions = self.rewrite_functions.write().unwrap();
        if rewrite_functions.contains_key(name) {
            tracing::warn!(function = name, "overwriting already-registered rewrite function");
        }
        if self.functions.read().unwrap().contains_key(name) {
            tracing::warn!(
                function = name,
                "rewrite function name also registered as a function; keeping both"
            );
        }
        rewrite_functions.insert(name.to_string(), f);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.read().unwrap().get(name).cloned()
    }

    /// Rewrite functions are consulted first by the evaluator, so lookup
    /// priority lives in the caller, not here; this just exposes the map.
    pub fn get_rewrite(&self, name: &str) -> Option<Arc<dyn RewriteFunction>> {
        self.rewrite_functions.read().unwrap().get(name).cloned()
    }

    pub fn descriptions(&self) -> BTreeMap<String, FunctionDescription> {
        let mut out = BTreeMap::new();
        for (name, f) in self.functions.read().unwrap().iter() {
            out.insert(name.clone(), f.description());
        }
        for (name, f) in self.rewrite_functions.read().unwrap().iter() {
            out.entry(name.clone()).or_insert_with(|| f.description());
        }
        out
    }

    pub fn descriptions_grouped(&self) -> BTreeMap<String, BTreeMap<String, FunctionDescription>> {
        let mut grouped: BTreeMap<String, BTreeMap<String, FunctionDescription>> = BTreeMap::new();
        for (name, desc) in self.descriptions() {
            grouped.entry(desc.group.clone()).or_default().insert(name, desc);
        }
        grouped
    }
}

/// Builds the process-wide registry populated with the built-in catalog.
pub fn default_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    functions::register_all(&registry);
    rewrite::register_all(&registry);
    registry
}

#[cfg(test)]
mod test {
    use super::*;

    struct Dummy;

    #[async_trait]
    impl Function for Dummy {
        async fn do_eval(
            &self,
            _evaluator: &Evaluator<'_>,
            _expr: &Expression,
            _from: i64,
            _until: i64,
        ) -> Result<Vec<MetricData>, CarbonApiError> {
            Ok(Vec::new())
        }

        fn description(&self) -> FunctionDescription {
            FunctionDescription {
                name: "dummy".into(),
                description: "test".into(),
                group: "test".into(),
                module: "test".into(),
                proxied: false,
            }
        }
    }

    #[test]
    fn registering_twice_overwrites_without_panicking() {
        let r = Registry::new();
        r.register("dummy", Arc::new(Dummy));
        r.register("dummy", Arc::new(Dummy));
        assert!(r.get("dummy").is_some());
    }

    #[test]
    fn default_registry_has_the_builtin_catalog() {
        let r = default_registry();
        for name in ["alias", "sumSeries", "scale", "offset", "exclude", "keepLastValue"] {
            assert!(r.get(name).is_some(), "missing builtin {name}");
        }
        assert!(r.get_rewrite("applyByNode").is_some());
        assert!(r.get("exclude").unwrap().can_backend_filtered());
    }
}
