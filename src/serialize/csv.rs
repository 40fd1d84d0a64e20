//! CSV render format: one row per datapoint, `"name",timestamp,value`, with
//! absent samples written as an empty value field.

use crate::metricdata::MetricData;

pub fn encode(series: &[MetricData]) -> Vec<u8> {
    let mut out = String::new();
    for s in series {
        for (i, v) in s.values.iter().enumerate() {
            let ts = s.start_time + i as i64 * s.step_time;
            let value = if v.is_nan() { String::new() } else { v.to_string() };
            out.push_str(&format!("\"{}\",{},{}\n", s.name, ts, value));
        }
    }
    out.into_bytes()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_one_row_per_point_with_empty_value_for_nan() {
        let md = MetricData::new("a.b", vec![1.5, f64::NAN], 0, 60);
        let out = String::from_utf8(encode(&[md])).unwrap();
        assert_eq!(out, "\"a.b\",0,1.5\n\"a.b\",60,\n");
    }
}
