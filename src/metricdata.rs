//! Core data model: fetch keys, time series, windowed statistics, and the
//! step-alignment/consolidation math the evaluator and cache both depend on.

use std::collections::BTreeMap;

/// The canonical fetch key: two requests are equal iff all three fields match.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricRequest {
    pub metric: String,
    pub from: i64,
    pub until: i64,
}

impl MetricRequest {
    pub fn new(metric: impl Into<String>, from: i64, until: i64) -> Self {
        MetricRequest {
            metric: metric.into(),
            from,
            until,
        }
    }
}

/// A filter function pushed down to the backend: `(name, literal-arguments)`.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteringFunction {
    pub name: String,
    pub arguments: Vec<String>,
}

/// Wire-shaped fetch request sent to a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub name: String,
    pub path_expression: String,
    pub start_time: i64,
    pub stop_time: i64,
    pub max_data_points: Option<u32>,
    pub filter_functions: Vec<FilteringFunction>,
}

/// Recomposes a bare metric name plus the filter chain pushed down onto it
/// into the literal target text a backend can parse itself: each filter wraps
/// the previous result as `name(result, 'arg', ...)`, innermost filter first.
/// Used both as the backend query text (so push-down has a real wire effect)
/// and as the fetch/cache key (so two different filter chains over the same
/// bare name never collide).
pub fn compose_target(base: &str, filters: &[FilteringFunction]) -> String {
    let mut out = base.to_string();
    for f in filters.iter().rev() {
        if f.arguments.is_empty() {
            out = format!("{}({})", f.name, out);
        } else {
            let args: Vec<String> = f
                .arguments
                .iter()
                .map(|a| format!("'{}'", a.replace('\'', "\\'")))
                .collect();
            out = format!("{}({}, {})", f.name, out, args.join(", "));
        }
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsolidationFunc {
    Average,
    Sum,
    Min,
    Max,
    Last,
    First,
}

impl ConsolidationFunc {
    pub fn parse(s: &str) -> Self {
        match s {
            "sum" => ConsolidationFunc::Sum,
            "min" => ConsolidationFunc::Min,
            "max" => ConsolidationFunc::Max,
            "last" => ConsolidationFunc::Last,
            "first" => ConsolidationFunc::First,
            _ => ConsolidationFunc::Average,
        }
    }

    /// Aggregates `values` (may contain NaN) respecting `x_files_factor`: NaN
    /// is returned unless at least `ceil(n * xff)` samples are non-NaN.
    pub fn aggregate(self, values: &[f64], x_files_factor: f64) -> f64 {
        let n = values.len();
        if n == 0 {
            return f64::NAN;
        }
        let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        let required = (n as f64 * x_files_factor).ceil() as usize;
        if present.len() < required.max(1).min(n) && present.len() < required {
            return f64::NAN;
        }
        if present.is_empty() {
            return f64::NAN;
        }
        match self {
            ConsolidationFunc::Average => present.iter().sum::<f64>() / present.len() as f64,
            ConsolidationFunc::Sum => present.iter().sum(),
            ConsolidationFunc::Min => present.iter().cloned().fold(f64::INFINITY, f64::min),
            ConsolidationFunc::Max => present.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ConsolidationFunc::First => present[0],
            ConsolidationFunc::Last => *present.last().unwrap(),
        }
    }
}

/// A named time series. `values[i] == NaN` denotes an absent sample.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricData {
    pub name: String,
    pub start_time: i64,
    pub stop_time: i64,
    pub step_time: i64,
    pub values: Vec<f64>,
    pub tags: BTreeMap<String, String>,
    pub consolidation_func: ConsolidationFunc,
    pub x_files_factor: f64,
    pub path_expression: String,
    pub request_start_time: i64,
    pub request_stop_time: i64,
}

impl MetricData {
    /// Builds a series and populates `tags["name"]` from the part of `name`
    /// before the first `;`, per the documented invariant.
    pub fn new(name: impl Into<String>, values: Vec<f64>, start_time: i64, step_time: i64) -> Self {
        let name = name.into();
        let stop_time = start_time + values.len() as i64 * step_time;
        let mut tags = crate::parser::tags::extract_tags(&name);
        tags.entry("name".to_string()).or_insert_with(|| {
            name.split(';').next().unwrap_or(&name).to_string()
        });
        MetricData {
            path_expression: name.clone(),
            name,
            start_time,
            stop_time,
            step_time: step_time.max(1),
            values,
            tags,
            consolidation_func: ConsolidationFunc::Average,
            x_files_factor: 0.0,
            request_start_time: start_time,
            request_stop_time: stop_time,
        }
    }
}

/// Euclid's algorithm.
pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// `lcm([]) = 0`, `lcm([x]) = x`, otherwise folds pairwise.
pub fn lcm(values: &[i64]) -> i64 {
    match values {
        [] => 0,
        [x] => *x,
        [a, b] => {
            let g = gcd(*a, *b);
            if g == 0 {
                0
            } else {
                (a / g) * b
            }
        }
        [a, b, rest @ ..] => {
            let first = lcm(&[*a, *b]);
            let mut acc = vec![first];
            acc.extend_from_slice(rest);
            lcm(&acc)
        }
    }
}

/// Floors `start` and ceils `stop` to `bucket`-sized boundaries.
pub fn align_to_bucket_size(start: i64, stop: i64, bucket: i64) -> (i64, i64) {
    if bucket <= 0 {
        return (start, stop);
    }
    let aligned_start = (start.div_euclid(bucket)) * bucket;
    let aligned_stop = {
        let rem = stop.rem_euclid(bucket);
        if rem == 0 {
            stop
        } else {
            stop + (bucket - rem)
        }
    };
    (aligned_start, aligned_stop)
}

/// Floors `start` to the nearest multiple of `interval` at or before it.
pub fn align_start_to_interval(start: i64, _stop: i64, interval: i64) -> i64 {
    if interval <= 0 {
        return start;
    }
    (start.div_euclid(interval)) * interval
}

/// A fixed-capacity rolling window over which sum, sum-of-squares, mean,
/// stdev, min and max can be read incrementally. NaN values participate in
/// `sum`/`sum_sq` as zero-contribution but are excluded from `min`/`max`, and
/// `mean` is NaN whenever the window is empty or the most recent push was
/// NaN-only, matching the reference implementation's edge cases.
pub struct Windowed {
    capacity: usize,
    buf: Vec<f64>,
    sum: f64,
    sum_sq: f64,
    count_non_nan: usize,
}

impl Windowed {
    pub fn new(capacity: usize) -> Self {
        Windowed {
            capacity: capacity.max(1),
            buf: Vec::with_capacity(capacity),
            sum: 0.0,
            sum_sq: 0.0,
            count_non_nan: 0,
        }
    }

    pub fn push(&mut self, v: f64) {
        if self.buf.len() == self.capacity {
            let evicted = self.buf.remove(0);
            if !evicted.is_nan() {
                self.sum -= evicted;
                self.sum_sq -= evicted * evicted;
                self.count_non_nan -= 1;
            }
        }
        if !v.is_nan() {
            self.sum += v;
            self.sum_sq += v * v;
            self.count_non_nan += 1;
        }
        self.buf.push(v);
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn sum_sq(&self) -> f64 {
        self.sum_sq
    }

    pub fn mean(&self) -> f64 {
        if self.count_non_nan == 0 {
            f64::NAN
        } else {
            self.sum / self.count_non_nan as f64
        }
    }

    pub fn stdev(&self) -> f64 {
        if self.count_non_nan == 0 {
            return 0.0;
        }
        let mean = self.sum / self.count_non_nan as f64;
        let variance = self.sum_sq / self.count_non_nan as f64 - mean * mean;
        variance.max(0.0).sqrt()
    }

    pub fn min(&self) -> f64 {
        self.buf
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.min(v) })
    }

    pub fn max(&self) -> f64 {
        self.buf
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NAN, |acc, v| if acc.is_nan() { v } else { acc.max(v) })
    }
}

/// Reshapes `series` to share a common step equal to `lcm` of their declared
/// steps over `[start, stop]`, consolidating with each series' declared
/// function and `x_files_factor`. Returns the new series (order preserved).
pub fn scale_to_common_step(series: Vec<MetricData>, start: i64, stop: i64) -> Vec<MetricData> {
    if series.is_empty() {
        return series;
    }
    let steps: Vec<i64> = series.iter().map(|s| s.step_time).collect();
    let common_step = lcm(&steps);
    if common_step <= 0 {
        return series;
    }
    let (astart, astop) = align_to_bucket_size(start, stop, common_step);
    let n_buckets = ((astop - astart) / common_step).max(0) as usize;

    series
        .into_iter()
        .map(|s| {
            if s.step_time == common_step {
                return s;
            }
            let per_bucket = (common_step / s.step_time).max(1) as usize;
            let mut new_values = Vec::with_capacity(n_buckets);
            for bucket in 0..n_buckets {
                let bucket_start = astart + bucket as i64 * common_step;
                let rel_start = bucket_start - s.start_time;
                if rel_start < 0 {
                    new_values.push(f64::NAN);
                    continue;
                }
                let first_idx = (rel_start / s.step_time) as usize;
                let window: Vec<f64> = (0..per_bucket)
                    .filter_map(|i| s.values.get(first_idx + i).copied())
                    .collect();
                new_values.push(s.consolidation_func.aggregate(&window, s.x_files_factor));
            }
            MetricData {
                step_time: common_step,
                start_time: astart,
                stop_time: astop,
                values: new_values,
                ..s
            }
        })
        .collect()
}

/// Downsamples `values` to at most `max_points` by fixed-bucket averaging,
/// used by the JSON serializer's `consolidate_json`.
pub fn consolidate_fixed_bucket(values: &[f64], max_points: usize) -> Vec<f64> {
    if max_points == 0 || values.len() <= max_points {
        return values.to_vec();
    }
    let bucket_size = (values.len() as f64 / max_points as f64).ceil() as usize;
    values
        .chunks(bucket_size.max(1))
        .map(|chunk| {
            let present: Vec<f64> = chunk.iter().copied().filter(|v| !v.is_nan()).collect();
            if present.is_empty() {
                f64::NAN
            } else {
                present.iter().sum::<f64>() / present.len() as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gcd_euclid() {
        assert_eq!(gcd(54, 24), 6);
        assert_eq!(gcd(0, 5), 5);
    }

    #[test]
    fn lcm_of_empty_and_singleton() {
        assert_eq!(lcm(&[]), 0);
        assert_eq!(lcm(&[7]), 7);
    }

    #[test]
    fn lcm_of_several_steps() {
        assert_eq!(lcm(&[4, 6]), 12);
        assert_eq!(lcm(&[2, 3, 5]), 30);
    }

    #[test]
    fn align_to_bucket_size_floors_and_ceils() {
        let (s, e) = align_to_bucket_size(101, 599, 100);
        assert_eq!(s, 100);
        assert_eq!(e, 600);
    }

    #[test]
    fn align_start_to_interval_floors() {
        assert_eq!(align_start_to_interval(125, 999, 60), 120);
    }

    #[test]
    fn metric_data_new_derives_name_tag() {
        let md = MetricData::new("metric2;foo=bar", vec![1.0, 2.0], 100, 100);
        assert_eq!(md.tags.get("name").unwrap(), "metric2");
        assert_eq!(md.tags.get("foo").unwrap(), "bar");
        assert_eq!(md.stop_time, 300);
    }

    #[test]
    fn windowed_matches_reference_edge_cases() {
        let mut w = Windowed::new(5);
        for v in [1.0, 2.0] {
            w.push(v);
        }
        assert!((w.sum() - 3.0).abs() < 1e-9);
        assert!((w.mean() - 1.5).abs() < 1e-9);
        assert!((w.stdev() - 0.5).abs() < 1e-9);
        assert!((w.min() - 1.0).abs() < 1e-9);
        assert!((w.max() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn windowed_all_nan_has_nan_mean_but_zero_sum() {
        let mut w = Windowed::new(3);
        w.push(f64::NAN);
        assert_eq!(w.sum(), 0.0);
        assert!(w.mean().is_nan());
    }

    #[test]
    fn consolidation_respects_x_files_factor() {
        let values = [1.0, f64::NAN, f64::NAN, f64::NAN];
        let out = ConsolidationFunc::Average.aggregate(&values, 0.5);
        assert!(out.is_nan());
        let out = ConsolidationFunc::Average.aggregate(&values, 0.2);
        assert!((out - 1.0).abs() < 1e-9);
    }

    #[test]
    fn compose_target_nests_innermost_filter_first() {
        let filters = vec![
            FilteringFunction { name: "exclude".into(), arguments: vec!["b".into()] },
            FilteringFunction { name: "exclude".into(), arguments: vec!["a".into()] },
        ];
        assert_eq!(compose_target("foo.*", &filters), "exclude(exclude(foo.*, 'a'), 'b')");
    }

    #[test]
    fn compose_target_bare_name_with_no_filters_is_unchanged() {
        assert_eq!(compose_target("foo.*", &[]), "foo.*");
    }

    #[test]
    fn scale_to_common_step_produces_lcm_step() {
        let a = MetricData::new("a", vec![1.0, 2.0, 3.0, 4.0], 0, 60);
        let b = MetricData::new("b", vec![10.0, 20.0], 0, 120);
        let out = scale_to_common_step(vec![a, b], 0, 240);
        for s in &out {
            assert_eq!(s.step_time, 120);
        }
    }
}
