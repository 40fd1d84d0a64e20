//! Protobuf render formats: hand-derived `prost::Message` structs mirroring
//! the two historical carbonapi wire messages. No `.proto` file or build-time
//! codegen is involved — `prost`'s derive macro works directly off field
//! attributes.

use std::collections::HashMap;

use prost::Message;

use crate::metricdata::MetricData;

/// `carbonapi_v2_pb`: flat message, absent samples carried as a parallel
/// `is_absent` flag (the value itself is written as 0.0).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchResponseV2 {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub start_time: i32,
    #[prost(int32, tag = "3")]
    pub stop_time: i32,
    #[prost(int32, tag = "4")]
    pub step_time: i32,
    #[prost(double, repeated, tag = "5")]
    pub values: Vec<f64>,
    #[prost(bool, repeated, tag = "6")]
    pub is_absent: Vec<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiFetchResponseV2 {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<FetchResponseV2>,
}

/// `carbonapi_v3_pb`: carries tags and the originally-requested window
/// alongside the (possibly step-aligned) returned window; absent samples are
/// plain `NaN` doubles, which the protobuf double wire type represents
/// exactly.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchResponseV3 {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub path_expression: String,
    #[prost(int64, tag = "3")]
    pub start_time: i64,
    #[prost(int64, tag = "4")]
    pub stop_time: i64,
    #[prost(int64, tag = "5")]
    pub step_time: i64,
    #[prost(double, repeated, tag = "6")]
    pub values: Vec<f64>,
    #[prost(int64, tag = "7")]
    pub request_start_time: i64,
    #[prost(int64, tag = "8")]
    pub request_stop_time: i64,
    #[prost(map = "string, string", tag = "9")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiFetchResponseV3 {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<FetchResponseV3>,
}

pub fn encode_v2(series: &[MetricData]) -> Vec<u8> {
    let metrics = series
        .iter()
        .map(|s| FetchResponseV2 {
            name: s.name.clone(),
            start_time: s.start_time as i32,
            stop_time: s.stop_time as i32,
            step_time: s.step_time as i32,
            values: s.values.iter().map(|v| if v.is_nan() { 0.0 } else { *v }).collect(),
            is_absent: s.values.iter().map(|v| v.is_nan()).collect(),
        })
        .collect();
    MultiFetchResponseV2 { metrics }.encode_to_vec()
}

pub fn encode_v3(series: &[MetricData]) -> Vec<u8> {
    let metrics = series
        .iter()
        .map(|s| FetchResponseV3 {
            name: s.name.clone(),
            path_expression: s.path_expression.clone(),
            start_time: s.start_time,
            stop_time: s.stop_time,
            step_time: s.step_time,
            values: s.values.clone(),
            request_start_time: s.request_start_time,
            request_stop_time: s.request_stop_time,
            tags: s.tags.clone().into_iter().collect(),
        })
        .collect();
    MultiFetchResponseV3 { metrics }.encode_to_vec()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn v2_round_trips_through_prost() {
        let md = MetricData::new("a", vec![1.0, f64::NAN], 0, 60);
        let bytes = encode_v2(&[md]);
        let decoded = MultiFetchResponseV2::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.metrics[0].name, "a");
        assert_eq!(decoded.metrics[0].is_absent, vec![false, true]);
    }

    #[test]
    fn v3_carries_nan_directly() {
        let md = MetricData::new("a", vec![f64::NAN], 0, 60);
        let bytes = encode_v3(&[md]);
        let decoded = MultiFetchResponseV3::decode(bytes.as_slice()).unwrap();
        assert!(decoded.metrics[0].values[0].is_nan());
    }
}
