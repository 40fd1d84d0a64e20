//! Raw render format: one line per series,
//! `name,start,stop,step|v1,v2,...`, with absent samples written as `None`.

use crate::metricdata::MetricData;

pub fn encode(series: &[MetricData]) -> Vec<u8> {
    let mut out = String::new();
    for s in series {
        out.push_str(&s.name);
        out.push(',');
        out.push_str(&s.start_time.to_string());
        out.push(',');
        out.push_str(&s.stop_time.to_string());
        out.push(',');
        out.push_str(&s.step_time.to_string());
        out.push('|');
        let values: Vec<String> = s
            .values
            .iter()
            .map(|v| if v.is_nan() { "None".to_string() } else { v.to_string() })
            .collect();
        out.push_str(&values.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_header_and_values_with_none_for_nan() {
        let md = MetricData::new("a.b.c", vec![1.0, f64::NAN, 3.0], 0, 60);
        let out = String::from_utf8(encode(&[md])).unwrap();
        assert_eq!(out, "a.b.c,0,180,60|1,None,3\n");
    }
}
