//! JSON render format: `[{"target","tags","datapoints":[[value|null, ts], ...]}]`.

use serde::Serialize;

use crate::metricdata::{consolidate_fixed_bucket, MetricData};

#[derive(Serialize)]
struct JsonSeries<'a> {
    target: &'a str,
    tags: &'a std::collections::BTreeMap<String, String>,
    datapoints: Vec<(Option<f64>, i64)>,
}

pub fn encode(series: &[MetricData], max_data_points: Option<usize>, no_null_points: bool) -> Vec<u8> {
    let out: Vec<JsonSeries> = series
        .iter()
        .map(|s| {
            let values = match max_data_points {
                Some(max) if max > 0 => consolidate_fixed_bucket(&s.values, max),
                _ => s.values.clone(),
            };
            let step = if values.len() == s.values.len() {
                s.step_time
            } else {
                ((s.stop_time - s.start_time) / values.len().max(1) as i64).max(1)
            };
            let mut datapoints = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                let ts = s.start_time + i as i64 * step;
                if v.is_nan() {
                    if !no_null_points {
                        datapoints.push((None, ts));
                    }
                } else {
                    datapoints.push((Some(*v), ts));
                }
            }
            JsonSeries {
                target: &s.name,
                tags: &s.tags,
                datapoints,
            }
        })
        .collect();
    serde_json::to_vec(&out).expect("series serialize to json")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nan_becomes_null_unless_no_null_points() {
        let md = MetricData::new("a", vec![1.0, f64::NAN], 0, 60);
        let with_nulls = encode(std::slice::from_ref(&md), None, false);
        let text = String::from_utf8(with_nulls).unwrap();
        assert!(text.contains("null"));

        let without_nulls = encode(std::slice::from_ref(&md), None, true);
        let text = String::from_utf8(without_nulls).unwrap();
        assert!(!text.contains("null"));
    }

    #[test]
    fn tags_are_included() {
        let md = MetricData::new("a;env=prod", vec![1.0], 0, 60);
        let bytes = encode(&[md], None, false);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"env\":\"prod\""));
    }
}
