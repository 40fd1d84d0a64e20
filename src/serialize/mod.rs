//! C9: render response serializers. Each format takes the already-consolidated
//! `Vec<MetricData>` for one request and produces a `(content_type, bytes)`
//! pair; none of them know about HTTP.

pub mod csv;
pub mod json;
pub mod pickle;
pub mod protobuf;
pub mod raw;

use crate::error::{CarbonApiError, ErrorKind};
use crate::metricdata::MetricData;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Raw,
    Csv,
    Pickle,
    ProtobufV2,
    ProtobufV3,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Format::Json),
            "raw" => Some(Format::Raw),
            "csv" => Some(Format::Csv),
            "pickle" => Some(Format::Pickle),
            "protobuf" | "carbonapi_v2_pb" => Some(Format::ProtobufV2),
            "carbonapi_v3_pb" => Some(Format::ProtobufV3),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Raw => "text/plain",
            Format::Csv => "text/csv",
            Format::Pickle => "application/pickle",
            Format::ProtobufV2 | Format::ProtobufV3 => "application/x-protobuf",
        }
    }
}

pub fn serialize(
    format: Format,
    series: &[MetricData],
    max_data_points: Option<usize>,
    no_null_points: bool,
) -> Result<Vec<u8>, CarbonApiError> {
    match format {
        Format::Json => Ok(json::encode(series, max_data_points, no_null_points)),
        Format::Raw => Ok(raw::encode(series)),
        Format::Csv => Ok(csv::encode(series)),
        Format::Pickle => Ok(pickle::encode(series)),
        Format::ProtobufV2 => Ok(protobuf::encode_v2(series)),
        Format::ProtobufV3 => Ok(protobuf::encode_v3(series)),
    }
}

/// PNG/SVG are in the render format allow-list but not implemented; callers
/// check this before falling into [`serialize`] so the response is a 501, not
/// a silently wrong body.
pub fn is_recognized_but_unimplemented(format: &str) -> bool {
    matches!(format, "png" | "svg")
}

pub fn unimplemented_format_error(format: &str) -> CarbonApiError {
    CarbonApiError::new(ErrorKind::Internal, format!("format {format} is not implemented"))
        .with_context("status_override", "501")
}
