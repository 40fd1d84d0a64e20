//! Rewrite (meta) functions: calls that expand into new target strings to be
//! independently parsed, fetched and evaluated, rather than transforming
//! already-fetched series in place.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CarbonApiError, ErrorKind};
use crate::eval::{arg_as_i64, arg_as_str, Evaluator};
use crate::parser::Expression;

use super::{FunctionDescription, Registry, RewriteFunction};

pub fn register_all(registry: &Registry) {
    registry.register_rewrite("applyByNode", Arc::new(ApplyByNode));
}

/// `applyByNode(seriesList, nodeNum, templateFunction, newName)`: discovers
/// the distinct prefixes of the input series names up to `nodeNum` and
/// rewrites the call into one target per prefix, each built from
/// `templateFunction` with `%` replaced by the matched prefix, optionally
/// wrapped in `alias(..., newName)` with `%` substituted into `newName` too.
struct ApplyByNode;

#[async_trait]
impl RewriteFunction for ApplyByNode {
    async fn do_rewrite(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Option<Vec<String>>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "applyByNode: missing series argument")
        })?;
        let node_num = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_i64)
            .ok_or_else(|| {
                CarbonApiError::new(ErrorKind::BadArgumentType, "applyByNode: node number must be numeric").invalid_arg()
            })?;
        let template = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .filter_map(arg_as_str)
            .nth(1)
            .ok_or_else(|| {
                CarbonApiError::new(ErrorKind::MissingArgument, "applyByNode: missing template function").invalid_arg()
            })?;
        let new_name = args.iter().filter(|a| !a.is_series_typed()).filter_map(arg_as_str).nth(2);

        let series = evaluator.eval(series_arg, from, until).await?;
        let mut prefixes: Vec<String> = Vec::new();
        for s in &series {
            let base_name = s.tags.get("name").cloned().unwrap_or_else(|| s.name.clone());
            let nodes: Vec<&str> = base_name.split('.').collect();
            let idx = if node_num < 0 {
                (nodes.len() as i64 + node_num).max(0) as usize
            } else {
                node_num as usize
            };
            if idx >= nodes.len() {
                continue;
            }
            let prefix = nodes[..=idx].join(".");
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }

        let targets = prefixes
            .into_iter()
            .map(|prefix| {
                let expanded = template.replace('%', &prefix);
                match &new_name {
                    Some(name) => format!("alias({},\"{}\")", expanded, name.replace('%', &prefix)),
                    None => expanded,
                }
            })
            .collect();
        Ok(Some(targets))
    }

    fn description(&self) -> FunctionDescription {
        FunctionDescription {
            name: "applyByNode".to_string(),
            description: "Splits a series list by a path node and evaluates a template per distinct prefix.".to_string(),
            group: "transform".to_string(),
            module: "carbonapi.registry.rewrite".to_string(),
            proxied: false,
        }
    }
}
