//! Expression tree node types produced by the parser.

use std::collections::BTreeMap;

/// A parsed node. `raw` is the exact substring of the original target string
/// this node was parsed from, needed when a function's `Do` wants to report
/// an error against the precise sub-expression that caused it.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub raw: String,
}

impl Expression {
    pub fn new(kind: ExpressionKind, raw: String) -> Self {
        Expression { kind, raw }
    }

    pub fn is_func(&self) -> bool {
        matches!(self.kind, ExpressionKind::Func { .. })
    }

    pub fn is_name(&self) -> bool {
        matches!(self.kind, ExpressionKind::Name(_))
    }

    /// True for node kinds that can stand in for a time series (Name or Func);
    /// used by the backend-filter push-down rule to count "series-typed" args.
    pub fn is_series_typed(&self) -> bool {
        self.is_func() || self.is_name()
    }

    pub fn func_name(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Func { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn func_args(&self) -> &[Expression] {
        match &self.kind {
            ExpressionKind::Func { args, .. } => args.as_slice(),
            _ => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionKind {
    Name(String),
    Const(f64),
    Str(String),
    Func {
        name: String,
        args: Vec<Expression>,
        named_args: BTreeMap<String, Expression>,
    },
}

/// Parser failure kinds, matching the taxonomy every downstream consumer
/// stamps as HTTP 400.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    MissingExpression,
    MissingComma,
    MissingQuote,
    UnexpectedCharacter,
    BadType,
    MissingArgument,
    MissingTimeseries,
    SeriesDoesNotExist,
    UnknownTimeUnits,
}

impl ParseErrorKind {
    pub fn message(self) -> &'static str {
        match self {
            ParseErrorKind::MissingExpression => "missing expression",
            ParseErrorKind::MissingComma => "missing comma",
            ParseErrorKind::MissingQuote => "missing quote",
            ParseErrorKind::UnexpectedCharacter => "unexpected character",
            ParseErrorKind::BadType => "bad type",
            ParseErrorKind::MissingArgument => "missing argument",
            ParseErrorKind::MissingTimeseries => "missing timeseries",
            ParseErrorKind::SeriesDoesNotExist => "series does not exist",
            ParseErrorKind::UnknownTimeUnits => "unknown time units",
        }
    }
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ParseErrorKind {}
