//! Built-in evaluation functions. This is not the full upstream catalog — it
//! is the smallest set that exercises every evaluator code path: aliasing,
//! aggregation, arithmetic, backend-pushdown filtering, a windowed function,
//! a sorting function, a function that manufactures a series rather than
//! consuming one, and a function that tolerates missing inputs.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{CarbonApiError, ErrorKind};
use crate::eval::{arg_as_f64, arg_as_i64, arg_as_str, Evaluator};
use crate::metricdata::{MetricData, Windowed};
use crate::parser::Expression;

use super::{Function, FunctionDescription, Registry};

pub fn register_all(registry: &Registry) {
    registry.register("alias", Arc::new(Alias));
    registry.register("aliasByNode", Arc::new(AliasByNode));
    registry.register("sumSeries", Arc::new(SumSeries));
    registry.register("sum", Arc::new(SumSeries));
    registry.register("scale", Arc::new(Scale));
    registry.register("scaleToSeconds", Arc::new(ScaleToSeconds));
    registry.register("offset", Arc::new(Offset));
    registry.register("absolute", Arc::new(Absolute));
    registry.register("exclude", Arc::new(Exclude));
    registry.register("keepLastValue", Arc::new(KeepLastValue));
    registry.register("movingAverage", Arc::new(MovingAverage));
    registry.register("highestMax", Arc::new(HighestMax));
    registry.register("maximumAbove", Arc::new(MaximumAbove));
    registry.register("group", Arc::new(Group));
    registry.register("sortByName", Arc::new(SortByName));
    registry.register("constantLine", Arc::new(ConstantLine));
    registry.register("fallbackSeries", Arc::new(FallbackSeries));
}

async fn eval_args(
    evaluator: &Evaluator<'_>,
    args: &[Expression],
    from: i64,
    until: i64,
) -> Result<Vec<MetricData>, CarbonApiError> {
    let mut out = Vec::new();
    for a in args.iter().filter(|a| a.is_series_typed()) {
        out.extend(evaluator.eval(a, from, until).await?);
    }
    Ok(out)
}

fn desc(name: &str, description: &str, group: &str) -> FunctionDescription {
    FunctionDescription {
        name: name.to_string(),
        description: description.to_string(),
        group: group.to_string(),
        module: "carbonapi.registry.functions".to_string(),
        proxied: false,
    }
}

struct Alias;

#[async_trait]
impl Function for Alias {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "alias: missing series argument")
        })?;
        let new_name = args
            .iter()
            .find(|a| !a.is_series_typed())
            .and_then(arg_as_str)
            .ok_or_else(|| CarbonApiError::new(ErrorKind::MissingArgument, "alias: missing name argument").invalid_arg())?;

        let mut series = evaluator.eval(series_arg, from, until).await?;
        for s in &mut series {
            s.name = new_name.clone();
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc("alias", "Renames every input series to a fixed name.", "alias")
    }
}

struct AliasByNode;

#[async_trait]
impl Function for AliasByNode {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "aliasByNode: missing series argument")
        })?;
        let node_indices: Vec<i64> = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .filter_map(arg_as_i64)
            .collect();
        if node_indices.is_empty() {
            return Err(CarbonApiError::new(ErrorKind::MissingArgument, "aliasByNode: missing node index").invalid_arg());
        }

        let mut series = evaluator.eval(series_arg, from, until).await?;
        for s in &mut series {
            let base_name = s.tags.get("name").cloned().unwrap_or_else(|| s.name.clone());
            let nodes: Vec<&str> = base_name.split('.').collect();
            let picked: Vec<String> = node_indices
                .iter()
                .filter_map(|&i| {
                    let idx = if i < 0 { nodes.len() as i64 + i } else { i };
                    nodes.get(idx as usize).map(|s| s.to_string())
                })
                .collect();
            s.name = picked.join(".");
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc(
            "aliasByNode",
            "Renames series using one or more dot-separated path segments.",
            "alias",
        )
    }
}

struct SumSeries;

#[async_trait]
impl Function for SumSeries {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let series = eval_args(evaluator, expr.func_args(), from, until).await?;
        if series.is_empty() {
            return Ok(Vec::new());
        }
        let len = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
        let mut values = vec![0.0_f64; len];
        let mut any_present = vec![false; len];
        for s in &series {
            for (i, v) in s.values.iter().enumerate() {
                if !v.is_nan() {
                    values[i] += v;
                    any_present[i] = true;
                }
            }
        }
        for (i, v) in values.iter_mut().enumerate() {
            if !any_present[i] {
                *v = f64::NAN;
            }
        }
        let first = &series[0];
        let mut out = MetricData::new(
            format!("sumSeries({})", expr.func_args().first().map(|e| e.raw.as_str()).unwrap_or("")),
            values,
            first.start_time,
            first.step_time,
        );
        out.consolidation_func = first.consolidation_func;
        Ok(vec![out])
    }

    fn description(&self) -> FunctionDescription {
        desc("sumSeries", "Sums the values of all input series, point by point.", "aggregate")
    }
}

struct Scale;

#[async_trait]
impl Function for Scale {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "scale: missing series argument")
        })?;
        let factor = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_f64)
            .ok_or_else(|| CarbonApiError::new(ErrorKind::BadArgumentType, "scale: factor must be numeric").invalid_arg())?;

        let mut series = evaluator.eval(series_arg, from, until).await?;
        for s in &mut series {
            s.name = format!("scale({},{})", s.name, factor);
            for v in &mut s.values {
                if !v.is_nan() {
                    *v *= factor;
                }
            }
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc("scale", "Multiplies every datapoint by a constant factor.", "transform")
    }
}

struct ScaleToSeconds;

#[async_trait]
impl Function for ScaleToSeconds {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "scaleToSeconds: missing series argument")
        })?;
        let seconds = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_f64)
            .ok_or_else(|| {
                CarbonApiError::new(ErrorKind::BadArgumentType, "scaleToSeconds: seconds must be numeric").invalid_arg()
            })?;

        let mut series = evaluator.eval(series_arg, from, until).await?;
        for s in &mut series {
            let factor = seconds / s.step_time as f64;
            s.name = format!("scaleToSeconds({},{})", s.name, seconds as i64);
            for v in &mut s.values {
                if !v.is_nan() {
                    *v *= factor;
                }
            }
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc(
            "scaleToSeconds",
            "Rescales each series so its value represents a rate per the given number of seconds.",
            "transform",
        )
    }
}

struct Offset;

#[async_trait]
impl Function for Offset {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "offset: missing series argument")
        })?;
        let amount = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_f64)
            .ok_or_else(|| CarbonApiError::new(ErrorKind::BadArgumentType, "offset: amount must be numeric").invalid_arg())?;

        let mut series = evaluator.eval(series_arg, from, until).await?;
        for s in &mut series {
            s.name = format!("offset({},{})", s.name, amount);
            for v in &mut s.values {
                if !v.is_nan() {
                    *v += amount;
                }
            }
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc("offset", "Adds a constant to every datapoint.", "transform")
    }
}

struct Absolute;

#[async_trait]
impl Function for Absolute {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let mut series = eval_args(evaluator, expr.func_args(), from, until).await?;
        for s in &mut series {
            s.name = format!("absolute({})", s.name);
            for v in &mut s.values {
                if !v.is_nan() {
                    *v = v.abs();
                }
            }
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc("absolute", "Takes the absolute value of every datapoint.", "transform")
    }
}

/// Backend-filterable: pushed down as `exclude(<pattern>)` onto the fetch
/// instead of being evaluated locally once series names are already known,
/// but also works standalone against already-fetched series names (e.g. when
/// it wraps something other than a bare Name, so no pushdown occurred).
struct Exclude;

#[async_trait]
impl Function for Exclude {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "exclude: missing series argument")
        })?;
        let pattern = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_str)
            .ok_or_else(|| CarbonApiError::new(ErrorKind::MissingArgument, "exclude: missing pattern").invalid_arg())?;
        let re = Regex::new(&pattern)
            .map_err(|e| CarbonApiError::new(ErrorKind::InvalidArg, format!("exclude: bad regex: {e}")).invalid_arg())?;

        let series = evaluator.eval(series_arg, from, until).await?;
        Ok(series.into_iter().filter(|s| !re.is_match(&s.name)).collect())
    }

    fn description(&self) -> FunctionDescription {
        desc("exclude", "Drops series whose name matches a regular expression.", "filter")
    }

    fn can_backend_filtered(&self) -> bool {
        true
    }
}

struct KeepLastValue;

#[async_trait]
impl Function for KeepLastValue {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "keepLastValue: missing series argument")
        })?;
        let limit = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_i64)
            .unwrap_or(i64::MAX);

        let mut series = evaluator.eval(series_arg, from, until).await?;
        for s in &mut series {
            s.name = format!("keepLastValue({})", s.name);
            let mut last: Option<f64> = None;
            let mut gap = 0i64;
            for v in &mut s.values {
                if v.is_nan() {
                    gap += 1;
                    if let Some(l) = last {
                        if gap <= limit {
                            *v = l;
                        }
                    }
                } else {
                    last = Some(*v);
                    gap = 0;
                }
            }
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc(
            "keepLastValue",
            "Fills missing datapoints with the last known value, up to an optional gap limit.",
            "transform",
        )
    }
}

struct MovingAverage;

#[async_trait]
impl Function for MovingAverage {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "movingAverage: missing series argument")
        })?;
        let window_points = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_i64)
            .ok_or_else(|| {
                CarbonApiError::new(ErrorKind::BadArgumentType, "movingAverage: window must be numeric").invalid_arg()
            })?
            .max(1) as usize;

        let mut series = evaluator.eval(series_arg, from, until).await?;
        for s in &mut series {
            let mut window = Windowed::new(window_points);
            let mut out = Vec::with_capacity(s.values.len());
            for &v in &s.values {
                window.push(v);
                out.push(window.mean());
            }
            s.name = format!("movingAverage({},{})", s.name, window_points);
            s.values = out;
        }
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc(
            "movingAverage",
            "Replaces each datapoint with the rolling mean of the preceding window.",
            "calculate",
        )
    }
}

struct HighestMax;

#[async_trait]
impl Function for HighestMax {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "highestMax: missing series argument")
        })?;
        let n = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_i64)
            .unwrap_or(1)
            .max(0) as usize;

        let mut series = evaluator.eval(series_arg, from, until).await?;
        series.sort_by(|a, b| {
            let max_a = a.values.iter().cloned().filter(|v| !v.is_nan()).fold(f64::NEG_INFINITY, f64::max);
            let max_b = b.values.iter().cloned().filter(|v| !v.is_nan()).fold(f64::NEG_INFINITY, f64::max);
            max_b.partial_cmp(&max_a).unwrap_or(std::cmp::Ordering::Equal)
        });
        series.truncate(n);
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc("highestMax", "Keeps the N series with the highest maximum value.", "filter")
    }
}

struct MaximumAbove;

#[async_trait]
impl Function for MaximumAbove {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args = expr.func_args();
        let series_arg = args.iter().find(|a| a.is_series_typed()).ok_or_else(|| {
            CarbonApiError::new(ErrorKind::MissingArgument, "maximumAbove: missing series argument")
        })?;
        let threshold = args
            .iter()
            .filter(|a| !a.is_series_typed())
            .find_map(arg_as_f64)
            .ok_or_else(|| {
                CarbonApiError::new(ErrorKind::BadArgumentType, "maximumAbove: threshold must be numeric").invalid_arg()
            })?;

        let series = evaluator.eval(series_arg, from, until).await?;
        Ok(series
            .into_iter()
            .filter(|s| s.values.iter().cloned().filter(|v| !v.is_nan()).any(|v| v > threshold))
            .collect())
    }

    fn description(&self) -> FunctionDescription {
        desc(
            "maximumAbove",
            "Keeps only series whose maximum value exceeds the given threshold.",
            "filter",
        )
    }
}

struct Group;

#[async_trait]
impl Function for Group {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        eval_args(evaluator, expr.func_args(), from, until).await
    }

    fn description(&self) -> FunctionDescription {
        desc("group", "Concatenates the series of all its arguments into one result set.", "combine")
    }
}

struct SortByName;

#[async_trait]
impl Function for SortByName {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let mut series = eval_args(evaluator, expr.func_args(), from, until).await?;
        series.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(series)
    }

    fn description(&self) -> FunctionDescription {
        desc("sortByName", "Sorts the result set alphabetically by series name.", "sort")
    }
}

struct ConstantLine;

#[async_trait]
impl Function for ConstantLine {
    async fn do_eval(
        &self,
        _evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let value = expr
            .func_args()
            .iter()
            .find_map(arg_as_f64)
            .ok_or_else(|| CarbonApiError::new(ErrorKind::BadArgumentType, "constantLine: value must be numeric").invalid_arg())?;
        let step = 60;
        let n = (((until - from) / step).max(1)) as usize;
        Ok(vec![MetricData::new(
            format!("constantLine({value})"),
            vec![value; n],
            from,
            step,
        )])
    }

    fn description(&self) -> FunctionDescription {
        desc("constantLine", "Produces a flat series holding a single constant value.", "generate")
    }
}

/// Tries each series-typed argument in order and returns the first one that
/// yields any series. `collect_fetch_targets` marks every argument of this
/// call tolerant, so a backend fetch failure under it resolves to an empty
/// series list here rather than aborting the whole target evaluation.
struct FallbackSeries;

#[async_trait]
impl Function for FallbackSeries {
    async fn do_eval(
        &self,
        evaluator: &Evaluator<'_>,
        expr: &Expression,
        from: i64,
        until: i64,
    ) -> Result<Vec<MetricData>, CarbonApiError> {
        let args: Vec<&Expression> = expr.func_args().iter().filter(|a| a.is_series_typed()).collect();
        if args.is_empty() {
            return Err(CarbonApiError::new(ErrorKind::MissingArgument, "fallbackSeries: missing series argument"));
        }
        for a in args {
            let series = evaluator.eval(a, from, until).await?;
            if !series.is_empty() {
                return Ok(series);
            }
        }
        Ok(Vec::new())
    }

    fn description(&self) -> FunctionDescription {
        desc(
            "fallbackSeries",
            "Returns the first argument that has any series, tolerating missing inputs.",
            "special",
        )
    }
}
