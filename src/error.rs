//! Crate-wide error taxonomy and HTTP status mapping.
//!
//! Every error that can escape a target evaluation carries a [`ErrorKind`], an
//! HTTP status code, and free-form `key=value` context for the access log.
//! [`merge_errors`] implements the code-selection rules used to collapse a set
//! of per-target errors (C8) into one status code plus an ordered message list.

use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;

/// The taxonomy named in the error-handling design: one entry per distinct
/// failure mode the pipeline needs to reason about when merging errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    ParseError,
    UnknownFunction,
    MissingArgument,
    BadArgumentType,
    MissingTimeseries,
    SeriesDoesNotExist,
    InvalidArg,
    UnknownTimeUnits,
    NoMetricsFetched,
    NonFatal,
    Timeout,
    BackendUnreachable,
    ResponseMalformed,
    MaxTriesExceeded,
    Forbidden,
    FailedToFetch,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// The status this kind maps to before any cross-target merge rule applies.
    pub fn default_status(self) -> StatusCode {
        match self {
            ErrorKind::ParseError
            | ErrorKind::MissingArgument
            | ErrorKind::BadArgumentType
            | ErrorKind::InvalidArg
            | ErrorKind::UnknownTimeUnits => StatusCode::BAD_REQUEST,
            ErrorKind::UnknownFunction => StatusCode::BAD_REQUEST,
            ErrorKind::MissingTimeseries | ErrorKind::SeriesDoesNotExist => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::BackendUnreachable => StatusCode::BAD_GATEWAY,
            ErrorKind::MaxTriesExceeded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::NoMetricsFetched | ErrorKind::NonFatal => StatusCode::OK,
            ErrorKind::ResponseMalformed
            | ErrorKind::FailedToFetch
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A single target-scoped failure.
#[derive(Clone, Debug)]
pub struct CarbonApiError {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
    /// Set when an `InternalServerError` is actually rooted in a bad argument,
    /// so the merge step can reclassify it to 400.
    pub caused_by_invalid_arg: bool,
    pub context: BTreeMap<String, String>,
}

impl CarbonApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CarbonApiError {
            status: kind.default_status(),
            kind,
            message: message.into(),
            caused_by_invalid_arg: false,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn invalid_arg(mut self) -> Self {
        self.caused_by_invalid_arg = true;
        self
    }
}

impl fmt::Display for CarbonApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for (k, v) in &self.context {
            write!(f, " {}={}", k, v)?;
        }
        Ok(())
    }
}

impl std::error::Error for CarbonApiError {}

/// Merge a set of per-target errors into a single status code and an ordered,
/// de-duplicated message list.
///
/// Rules, applied in order:
/// - 404 is ignored unless it's the only status present (then it "wins" as 404,
///   the caller may still remap a lone 404 to `not_found_status_code`).
/// - A 500 caused by an invalid argument is reclassified to 400.
/// - 502 and 504 collapse to 503.
/// - 400 wins over everything.
/// - 403 wins over everything except 400.
/// - Otherwise the last non-503 status wins; 503 only wins if nothing else
///   survives.
pub fn merge_errors(errors: &[CarbonApiError]) -> (StatusCode, Vec<String>) {
    if errors.is_empty() {
        return (StatusCode::OK, Vec::new());
    }

    let mut codes: Vec<StatusCode> = Vec::with_capacity(errors.len());
    for e in errors {
        let mut code = e.status;
        if code == StatusCode::INTERNAL_SERVER_ERROR && e.caused_by_invalid_arg {
            code = StatusCode::BAD_REQUEST;
        }
        if code == StatusCode::BAD_GATEWAY || code == StatusCode::GATEWAY_TIMEOUT {
            code = StatusCode::SERVICE_UNAVAILABLE;
        }
        codes.push(code);
    }

    let non_404: Vec<StatusCode> = codes.iter().copied().filter(|c| *c != StatusCode::NOT_FOUND).collect();
    let merged = if non_404.is_empty() {
        StatusCode::NOT_FOUND
    } else if non_404.iter().any(|c| *c == StatusCode::BAD_REQUEST) {
        StatusCode::BAD_REQUEST
    } else if non_404.iter().any(|c| *c == StatusCode::FORBIDDEN) {
        StatusCode::FORBIDDEN
    } else {
        let mut last_non_503 = None;
        for c in &non_404 {
            if *c != StatusCode::SERVICE_UNAVAILABLE {
                last_non_503 = Some(*c);
            }
        }
        last_non_503.unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
    };

    let mut seen = std::collections::BTreeSet::new();
    let mut messages = Vec::new();
    for e in errors {
        if seen.insert(e.message.clone()) {
            messages.push(e.message.clone());
        }
    }

    (merged, messages)
}

#[cfg(test)]
mod test {
    use super::*;

    fn err(kind: ErrorKind, status: StatusCode, msg: &str) -> CarbonApiError {
        CarbonApiError {
            kind,
            status,
            message: msg.to_string(),
            caused_by_invalid_arg: false,
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn all_404_stays_404() {
        let errs = vec![
            err(ErrorKind::NotFound, StatusCode::NOT_FOUND, "a"),
            err(ErrorKind::NotFound, StatusCode::NOT_FOUND, "b"),
        ];
        let (code, _) = merge_errors(&errs);
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[test]
    fn bad_request_wins_over_service_unavailable() {
        let errs = vec![
            err(ErrorKind::BadArgumentType, StatusCode::BAD_REQUEST, "bad"),
            err(ErrorKind::Timeout, StatusCode::SERVICE_UNAVAILABLE, "slow"),
        ];
        let (code, _) = merge_errors(&errs);
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn bad_gateway_and_gateway_timeout_collapse_to_503() {
        let errs = vec![
            err(ErrorKind::BackendUnreachable, StatusCode::BAD_GATEWAY, "502"),
            err(ErrorKind::BackendUnreachable, StatusCode::GATEWAY_TIMEOUT, "504"),
        ];
        let (code, _) = merge_errors(&errs);
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn invalid_arg_internal_error_reclassified_to_400() {
        let mut e = err(ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR, "bad arg");
        e.caused_by_invalid_arg = true;
        let (code, _) = merge_errors(&[e]);
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn forbidden_wins_over_others_but_not_bad_request() {
        let errs = vec![
            err(ErrorKind::Forbidden, StatusCode::FORBIDDEN, "nope"),
            err(ErrorKind::Timeout, StatusCode::SERVICE_UNAVAILABLE, "slow"),
        ];
        let (code, _) = merge_errors(&errs);
        assert_eq!(code, StatusCode::FORBIDDEN);

        let errs = vec![
            err(ErrorKind::Forbidden, StatusCode::FORBIDDEN, "nope"),
            err(ErrorKind::BadArgumentType, StatusCode::BAD_REQUEST, "bad"),
        ];
        let (code, _) = merge_errors(&errs);
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn empty_errors_is_ok() {
        let (code, msgs) = merge_errors(&[]);
        assert_eq!(code, StatusCode::OK);
        assert!(msgs.is_empty());
    }
}
