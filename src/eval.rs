//! C4/C5: target discovery, fetch, and recursive evaluation.
//!
//! [`QueryEngine`] owns the process-wide registry, zipper client and a
//! semaphore bounding concurrent in-flight evaluations. [`QueryEngine::fetch_and_eval_all`]
//! is the outer entry point for a whole render request (one or more target
//! strings): it threads a single fetch cache across all of them so a metric
//! referenced by more than one target is only fetched once, per-target. Each
//! target in turn walks its parsed tree to discover which metric patterns
//! need fetching (pushing down backend-filterable wrapper calls along the
//! way as literal nested target text), fetches whatever the shared cache
//! doesn't already hold, scales everything *that target* references to a
//! common step as one batch, then hands off to [`Evaluator::eval`] for the
//! actual function dispatch. `Evaluator::eval` is also what a
//! [`crate::registry::Function`] impl calls on its own arguments, and it
//! re-checks the rewrite registry at every level, not just the root, so a
//! rewrite nested inside another call still expands correctly.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::{CarbonApiError, ErrorKind};
use crate::metricdata::{compose_target, scale_to_common_step, FetchRequest, FilteringFunction, MetricData};
use crate::parser::{self, Expression, ExpressionKind};
use crate::registry::Registry;
use crate::zipper::ZipperClient;

pub struct QueryEngine {
    pub registry: Arc<Registry>,
    pub zipper: Arc<ZipperClient>,
    pub config: Arc<Config>,
    limiter: Semaphore,
}

impl QueryEngine {
    pub fn new(registry: Arc<Registry>, zipper: Arc<ZipperClient>, config: Arc<Config>) -> Self {
        let permits = config.limiter.size.max(1);
        QueryEngine {
            registry,
            zipper,
            config,
            limiter: Semaphore::new(permits),
        }
    }

    /// Evaluates one target string against its own, unshared fetch cache.
    /// Used by rewrite functions expanding into new target strings, and by
    /// callers that only ever have a single target to evaluate.
    pub async fn fetch_and_eval(
        self: &Arc<Self>,
        target: &str,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let mut fetched = HashMap::new();
        self.fetch_and_eval_with_cache(target, from, until, &mut fetched).await
    }

    /// Evaluates every target in one render request against a single shared
    /// fetch cache, so a metric pattern (post filter push-down) referenced by
    /// more than one `target=` parameter is only fetched once.
    pub async fn fetch_and_eval_all(
        self: &Arc<Self>,
        targets: &[String],
        from: i64,
        until: i64,
    ) -> Vec<Result<Vec<MetricData>, CarbonApiError>> {
        let mut fetched: HashMap<String, Vec<MetricData>> = HashMap::new();
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            out.push(self.fetch_and_eval_with_cache(target, from, until, &mut fetched).await);
        }
        out
    }

    async fn fetch_and_eval_with_cache(
        self: &Arc<Self>,
        target: &str,
        from: i64,
        until: i64,
        fetched: &mut HashMap<String, Vec<MetricData>>,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| CarbonApiError::new(ErrorKind::Internal, "evaluation limiter closed"))?;

        let expr = parser::parse(target)
            .map_err(|e| CarbonApiError::new(ErrorKind::ParseError, format!("{e}: {target}")))?;

        let mut wants: HashMap<String, FetchPlan> = HashMap::new();
        let mut pushed_down: HashMap<usize, String> = HashMap::new();
        collect_fetch_targets(&self.registry, &expr, &[], false, &mut wants, &mut pushed_down);

        for (key, plan) in &wants {
            if fetched.contains_key(key) {
                continue;
            }
            let req = FetchRequest {
                name: plan.name.clone(),
                path_expression: key.clone(),
                start_time: from,
                stop_time: until,
                max_data_points: None,
                filter_functions: plan.filters.clone(),
            };
            match self.zipper.do_query(&req).await {
                Ok(series) => {
                    fetched.insert(key.clone(), series);
                }
                Err(_) if plan.tolerant => {
                    fetched.insert(key.clone(), Vec::new());
                }
                Err(e) => return Err(e),
            }
        }

        // Reshape every series *this target* references to a common step, as
        // one batch, per the reference implementation's per-target (not
        // per-metric-name, not per-request) scaling granularity. The shared
        // cross-target cache itself stays raw so a later target referencing
        // the same key isn't corrupted by an earlier target's rescaling.
        let keys: Vec<String> = wants.keys().cloned().collect();
        let per_key: Vec<Vec<MetricData>> = keys.iter().map(|k| fetched.get(k).cloned().unwrap_or_default()).collect();
        let values: HashMap<String, Vec<MetricData>> = if self.config.upstreams.scale_to_common_step {
            let combined: Vec<MetricData> = per_key.iter().flat_map(|v| v.iter().cloned()).collect();
            let scaled = scale_to_common_step(combined, from, until);
            let mut by_key = HashMap::new();
            let mut idx = 0;
            for (k, orig) in keys.iter().zip(per_key.iter()) {
                let n = orig.len();
                by_key.insert(k.clone(), scaled[idx..idx + n].to_vec());
                idx += n;
            }
            by_key
        } else {
            keys.into_iter().zip(per_key).collect()
        };

        let evaluator = Evaluator {
            engine: self,
            values,
            pushed_down,
        };
        evaluator.eval(&expr, from, until).await
    }
}

/// One metric pattern this request needs fetched: its bare name, the backend
/// filter chain pushed down onto it, and whether a fetch failure for it
/// should resolve to an empty series list instead of aborting evaluation
/// (set for anything nested under a `fallbackSeries` call).
struct FetchPlan {
    name: String,
    filters: Vec<FilteringFunction>,
    tolerant: bool,
}

/// Walks `expr`, recording one fetch per Name leaf together with whatever
/// backend filter chain the calls above it in the tree pushed down, keyed by
/// the composed target text (so two different filter chains over the same
/// bare name never collide). A call pushes down onto its sole series-typed
/// argument when it has exactly one such argument, every other argument is a
/// literal (Const/Str), and the function itself is registered as
/// backend-filterable; when that happens, the outermost such call's node
/// identity is recorded in `pushed_down` so the evaluator can short-circuit
/// straight to the (already backend-filtered) fetched series instead of
/// re-applying the filter client-side. `fallbackSeries` is special-cased
/// ahead of the push-down rule: each of its series-typed arguments is walked
/// with `tolerant` forced on, regardless of how many such arguments it has.
/// Returns the composed key for the subtree rooted at `expr`, when it
/// resolves to exactly one fetch.
fn collect_fetch_targets(
    registry: &Registry,
    expr: &Expression,
    filters: &[FilteringFunction],
    tolerant: bool,
    out: &mut HashMap<String, FetchPlan>,
    pushed_down: &mut HashMap<usize, String>,
) -> Option<String> {
    match &expr.kind {
        ExpressionKind::Name(n) => {
            let key = compose_target(n, filters);
            let plan = out.entry(key.clone()).or_insert_with(|| FetchPlan {
                name: n.clone(),
                filters: filters.to_vec(),
                tolerant,
            });
            plan.tolerant = plan.tolerant || tolerant;
            Some(key)
        }
        ExpressionKind::Const(_) | ExpressionKind::Str(_) => None,
        ExpressionKind::Func { name, args, named_args } => {
            if name == "fallbackSeries" {
                for a in args.iter().filter(|a| a.is_series_typed()) {
                    collect_fetch_targets(registry, a, filters, true, out, pushed_down);
                }
                return None;
            }

            let series_args: Vec<&Expression> = args.iter().filter(|a| a.is_series_typed()).collect();
            let all_others_literal = args
                .iter()
                .filter(|a| !a.is_series_typed())
                .all(|a| matches!(a.kind, ExpressionKind::Const(_) | ExpressionKind::Str(_)))
                && named_args
                    .values()
                    .all(|a| matches!(a.kind, ExpressionKind::Const(_) | ExpressionKind::Str(_)));
            let backend_filterable = registry.get(name).map(|f| f.can_backend_filtered()).unwrap_or(false);

            if series_args.len() == 1 && all_others_literal && backend_filterable {
                let literal_args: Vec<String> = args
                    .iter()
                    .filter(|a| !a.is_series_typed())
                    .map(literal_to_string)
                    .collect();
                let mut chain = filters.to_vec();
                chain.push(FilteringFunction {
                    name: name.clone(),
                    arguments: literal_args,
                });
                let key = collect_fetch_targets(registry, series_args[0], &chain, tolerant, out, pushed_down);
                if let Some(key) = &key {
                    pushed_down.insert(expr as *const Expression as usize, key.clone());
                }
                key
            } else {
                for a in &series_args {
                    collect_fetch_targets(registry, a, filters, tolerant, out, pushed_down);
                }
                None
            }
        }
    }
}

fn literal_to_string(expr: &Expression) -> String {
    match &expr.kind {
        ExpressionKind::Const(v) => {
            if v.fract() == 0.0 {
                format!("{}", *v as i64)
            } else {
                v.to_string()
            }
        }
        ExpressionKind::Str(s) => s.clone(),
        _ => expr.raw.clone(),
    }
}

/// Per-call-site view into one fetch's already-resolved series, used for the
/// recursive evaluation of a single target.
pub struct Evaluator<'a> {
    pub engine: &'a Arc<QueryEngine>,
    values: HashMap<String, Vec<MetricData>>,
    /// Node identity (`expr as *const Expression as usize`) of each maximal
    /// backend-push-down chain's outermost call, to its composed fetch key.
    /// Safe because the parsed tree is immutable and never reallocated
    /// between `collect_fetch_targets` and `eval` within one call.
    pushed_down: HashMap<usize, String>,
}

impl<'a> Evaluator<'a> {
    /// Evaluates one node: a Name resolves to its pre-fetched series, a Func
    /// that was backend-filtered resolves directly to its (already filtered)
    /// fetched series, a plain Func is dispatched through the registry
    /// (rewrite functions are consulted first, at every level of nesting),
    /// and a bare Const/Str contributes no series on its own (a function
    /// consumes it as a literal argument).
    pub fn eval<'b>(
        &'b self,
        expr: &'b Expression,
        from: i64,
        until: i64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<MetricData>, CarbonApiError>> + Send + 'b>>
    {
        Box::pin(async move {
            match &expr.kind {
                ExpressionKind::Name(n) => Ok(self.values.get(n).cloned().unwrap_or_default()),
                ExpressionKind::Const(_) | ExpressionKind::Str(_) => Ok(Vec::new()),
                ExpressionKind::Func { name, .. } => {
                    if let Some(key) = self.pushed_down.get(&(expr as *const Expression as usize)) {
                        return Ok(self.values.get(key).cloned().unwrap_or_default());
                    }
                    if let Some(rewrite) = self.engine.registry.get_rewrite(name) {
                        if let Some(new_targets) = rewrite.do_rewrite(self, expr, from, until).await? {
                            let mut out = Vec::new();
                            let mut seen_targets = HashSet::new();
                            for t in new_targets {
                                if !seen_targets.insert(t.clone()) {
                                    continue;
                                }
                                out.extend(self.engine.fetch_and_eval(&t, from, until).await?);
                            }
                            return Ok(out);
                        }
                    }
                    match self.engine.registry.get(name) {
                        Some(f) => f.do_eval(self, expr, from, until).await,
                        None => Err(CarbonApiError::new(
                            ErrorKind::UnknownFunction,
                            format!("unknown function {name}"),
                        )),
                    }
                }
            }
        })
    }
}

/// Reads a function argument expected to be a literal string, accepting a bare
/// Name too (targets like `alias(foo.bar, total)` are common in the wild even
/// though `total` should properly be quoted).
pub fn arg_as_str(expr: &Expression) -> Option<String> {
    match &expr.kind {
        ExpressionKind::Str(s) => Some(s.clone()),
        ExpressionKind::Name(n) => Some(n.clone()),
        _ => None,
    }
}

pub fn arg_as_f64(expr: &Expression) -> Option<f64> {
    match &expr.kind {
        ExpressionKind::Const(v) => Some(*v),
        _ => None,
    }
}

pub fn arg_as_i64(expr: &Expression) -> Option<i64> {
    arg_as_f64(expr).map(|v| v as i64)
}

pub fn named_arg<'e>(named_args: &'e BTreeMap<String, Expression>, key: &str) -> Option<&'e Expression> {
    named_args.get(key)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::default_registry;

    #[test]
    fn collects_bare_name_as_fetch_target() {
        let registry = default_registry();
        let expr = parser::parse("foo.bar").unwrap();
        let mut out = HashMap::new();
        let mut pushed_down = HashMap::new();
        collect_fetch_targets(&registry, &expr, &[], false, &mut out, &mut pushed_down);
        assert!(out.contains_key("foo.bar"));
        assert!(out["foo.bar"].filters.is_empty());
        assert!(!out["foo.bar"].tolerant);
        assert!(pushed_down.is_empty());
    }

    #[test]
    fn pushes_down_single_arg_literal_call_and_keys_by_composed_text() {
        let registry = default_registry();
        let expr = parser::parse("exclude(foo.*, \"bar\")").unwrap();
        let mut out = HashMap::new();
        let mut pushed_down = HashMap::new();
        collect_fetch_targets(&registry, &expr, &[], false, &mut out, &mut pushed_down);

        // the fetch key is the composed wire text, not the bare name, so it
        // is what actually gets sent to the backend (real push-down).
        assert!(out.contains_key("exclude(foo.*, 'bar')"));
        assert!(!out.contains_key("foo.*"));
        let plan = &out["exclude(foo.*, 'bar')"];
        assert_eq!(plan.name, "foo.*");
        assert_eq!(plan.filters.len(), 1);
        assert_eq!(plan.filters[0].name, "exclude");
        assert_eq!(plan.filters[0].arguments, vec!["bar".to_string()]);

        // the outer (and only) call node is marked so eval() short-circuits
        // straight to the fetched, already-filtered series.
        assert_eq!(pushed_down.len(), 1);
        assert_eq!(pushed_down.values().next().unwrap(), "exclude(foo.*, 'bar')");
    }

    #[test]
    fn does_not_push_down_multi_series_call() {
        let registry = default_registry();
        let expr = parser::parse("sumSeries(foo.a, foo.b)").unwrap();
        let mut out = HashMap::new();
        let mut pushed_down = HashMap::new();
        collect_fetch_targets(&registry, &expr, &[], false, &mut out, &mut pushed_down);
        assert!(out.contains_key("foo.a"));
        assert!(out.contains_key("foo.b"));
        assert!(out["foo.a"].filters.is_empty());
        assert!(pushed_down.is_empty());
    }

    #[test]
    fn fallback_series_marks_both_branches_tolerant() {
        let registry = default_registry();
        let expr = parser::parse("fallbackSeries(foo.primary, foo.backup)").unwrap();
        let mut out = HashMap::new();
        let mut pushed_down = HashMap::new();
        collect_fetch_targets(&registry, &expr, &[], false, &mut out, &mut pushed_down);
        assert!(out["foo.primary"].tolerant);
        assert!(out["foo.backup"].tolerant);
    }

    #[test]
    fn a_metric_tolerated_anywhere_stays_tolerant_regardless_of_visit_order() {
        let registry = default_registry();
        // same bare metric, once under fallbackSeries and once plain; the
        // second, non-tolerant visit must not clear the earlier tolerance.
        let expr = parser::parse("sumSeries(fallbackSeries(foo.a, foo.b), foo.a)").unwrap();
        let mut out = HashMap::new();
        let mut pushed_down = HashMap::new();
        collect_fetch_targets(&registry, &expr, &[], false, &mut out, &mut pushed_down);
        assert!(out["foo.a"].tolerant);
    }
}
