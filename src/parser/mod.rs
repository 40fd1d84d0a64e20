//! C1: parses a Graphite target string into an expression tree.
//!
//! Grammar (informal): a target is a bare metric pattern (glob segments,
//! optionally tagged with `;k=v`, or a `seriesByTag(...)` call), a numeric
//! constant, a quoted string, or a function call of the form
//! `name(arg, arg, kwarg=arg, ...)` whose arguments are themselves targets.

pub mod node;
pub mod tags;

pub use node::{Expression, ExpressionKind, ParseErrorKind};

use std::collections::BTreeMap;

/// Parses `input` fully; any trailing, unconsumed text is a parse error (the
/// donor grammar calls this "leftover").
pub fn parse(input: &str) -> Result<Expression, ParseErrorKind> {
    let mut p = Parser { src: input, pos: 0 };
    p.skip_ws();
    let expr = p.parse_expr()?;
    p.skip_ws();
    if p.pos != p.src.len() {
        return Err(ParseErrorKind::UnexpectedCharacter);
    }
    Ok(expr)
}

/// Parses `input`, returning the expression and whatever text was not consumed
/// (mirrors the two-value donor API used internally by the rewrite phase,
/// which re-parses generated target strings one at a time).
pub fn parse_partial(input: &str) -> Result<(Expression, &str), ParseErrorKind> {
    let mut p = Parser { src: input, pos: 0 };
    p.skip_ws();
    let expr = p.parse_expr()?;
    Ok((expr, &input[p.pos..]))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<Expression, ParseErrorKind> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            None => Err(ParseErrorKind::MissingExpression),
            Some('\'') | Some('"') => self.parse_string(start),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                // Could be a negative number or a metric name starting with digits
                // (Unicode/leading-digit names are allowed); try numeric first.
                if let Some(expr) = self.try_parse_number(start) {
                    Ok(expr)
                } else {
                    self.parse_name_or_call(start)
                }
            }
            Some(_) => self.parse_name_or_call(start),
        }
    }

    fn try_parse_number(&mut self, start: usize) -> Option<Expression> {
        let save = self.pos;
        let mut s = String::new();
        if self.peek() == Some('-') {
            s.push(self.bump().unwrap());
        }
        let mut saw_digit = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                saw_digit = true;
                s.push(self.bump().unwrap());
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            let dot_save = self.pos;
            let mut frac = String::from(".");
            self.bump();
            let mut saw_frac_digit = false;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    saw_frac_digit = true;
                    frac.push(self.bump().unwrap());
                } else {
                    break;
                }
            }
            if saw_frac_digit {
                s.push_str(&frac);
            } else {
                self.pos = dot_save;
            }
        }
        // A bare number followed by a name character (e.g. "1m" as a metric
        // segment, or "10.x" as a path) is not a numeric literal.
        let next_is_boundary = matches!(
            self.peek(),
            None | Some(',') | Some(')') | Some(' ') | Some('\t')
        );
        if saw_digit && next_is_boundary {
            if let Ok(v) = s.parse::<f64>() {
                let raw = self.src[start..self.pos].to_string();
                return Some(Expression::new(ExpressionKind::Const(v), raw));
            }
        }
        self.pos = save;
        None
    }

    fn parse_string(&mut self, start: usize) -> Result<Expression, ParseErrorKind> {
        let quote = self.bump().unwrap();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseErrorKind::MissingQuote),
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
            }
        }
        let raw = self.src[start..self.pos].to_string();
        Ok(Expression::new(ExpressionKind::Str(s), raw))
    }

    fn is_name_char(c: char) -> bool {
        !matches!(c, '(' | ')' | ',' | '=' | ' ' | '\t' | '\'' | '"')
    }

    fn parse_name_or_call(&mut self, start: usize) -> Result<Expression, ParseErrorKind> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if Self::is_name_char(c) {
                name.push(c);
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(ParseErrorKind::UnexpectedCharacter);
        }
        if self.peek() == Some('(') {
            self.bump();
            let (args, named_args) = self.parse_arg_list()?;
            if self.peek() != Some(')') {
                return Err(ParseErrorKind::MissingComma);
            }
            self.bump();
            let raw = self.src[start..self.pos].to_string();
            return Ok(Expression::new(
                ExpressionKind::Func {
                    name,
                    args,
                    named_args,
                },
                raw,
            ));
        }
        let raw = self.src[start..self.pos].to_string();
        Ok(Expression::new(ExpressionKind::Name(name), raw))
    }

    fn parse_arg_list(
        &mut self,
    ) -> Result<(Vec<Expression>, BTreeMap<String, Expression>), ParseErrorKind> {
        let mut args = Vec::new();
        let mut named_args = BTreeMap::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            return Ok((args, named_args));
        }
        loop {
            self.skip_ws();
            let arg_start = self.pos;
            // Lookahead for `ident=value` kwarg form.
            if let Some(key) = self.try_parse_kwarg_key() {
                let value = self.parse_expr()?;
                named_args.insert(key, value);
            } else {
                self.pos = arg_start;
                let value = self.parse_expr()?;
                args.push(value);
            }
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some(')') => break,
                None => return Err(ParseErrorKind::MissingComma),
                Some(_) => return Err(ParseErrorKind::MissingComma),
            }
        }
        Ok((args, named_args))
    }

    /// If the upcoming tokens are `ident=` (and not `ident==` or `ident=~`,
    /// which belong to a tag-filter expression handled elsewhere), consumes
    /// them and returns the key.
    fn try_parse_kwarg_key(&mut self) -> Option<String> {
        let save = self.pos;
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                key.push(c);
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if key.is_empty() || self.peek() != Some('=') {
            self.pos = save;
            return None;
        }
        self.bump();
        Some(key)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_bare_metric_name() {
        let e = parse("foo.bar.baz").unwrap();
        match e.kind {
            ExpressionKind::Name(n) => assert_eq!(n, "foo.bar.baz"),
            _ => panic!("expected Name"),
        }
        assert_eq!(e.raw, "foo.bar.baz");
    }

    #[test]
    fn parses_glob_and_tagged_name() {
        let e = parse("foo.*.bar;env=prod").unwrap();
        match e.kind {
            ExpressionKind::Name(n) => assert_eq!(n, "foo.*.bar;env=prod"),
            _ => panic!("expected Name"),
        }
    }

    #[test]
    fn parses_negative_and_positive_constants() {
        let e = parse("-12.5").unwrap();
        assert!(matches!(e.kind, ExpressionKind::Const(v) if (v + 12.5).abs() < 1e-9));
        let e = parse("42").unwrap();
        assert!(matches!(e.kind, ExpressionKind::Const(v) if (v - 42.0).abs() < 1e-9));
    }

    #[test]
    fn parses_function_call_with_positional_and_kwargs() {
        let e = parse("scale(foo.bar, 2, name='x')").unwrap();
        match e.kind {
            ExpressionKind::Func { name, args, named_args } => {
                assert_eq!(name, "scale");
                assert_eq!(args.len(), 2);
                assert!(matches!(&args[0].kind, ExpressionKind::Name(n) if n == "foo.bar"));
                assert!(matches!(&args[1].kind, ExpressionKind::Const(v) if (*v - 2.0).abs() < 1e-9));
                assert_eq!(named_args.len(), 1);
                assert!(matches!(&named_args["name"].kind, ExpressionKind::Str(s) if s == "x"));
            }
            _ => panic!("expected Func"),
        }
    }

    #[test]
    fn parses_nested_functions() {
        let e = parse("alias(sumSeries(foo.*),\"total\")").unwrap();
        match e.kind {
            ExpressionKind::Func { name, args, .. } => {
                assert_eq!(name, "alias");
                assert!(matches!(&args[0].kind, ExpressionKind::Func { name, .. } if name == "sumSeries"));
                assert!(matches!(&args[1].kind, ExpressionKind::Str(s) if s == "total"));
            }
            _ => panic!("expected Func"),
        }
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = parse("alias(foo, \"total)").unwrap_err();
        assert_eq!(err, ParseErrorKind::MissingQuote);
    }

    #[test]
    fn missing_closing_paren_is_an_error() {
        let err = parse("sumSeries(foo.bar").unwrap_err();
        assert_eq!(err, ParseErrorKind::MissingComma);
    }

    #[test]
    fn empty_input_is_missing_expression() {
        let err = parse("").unwrap_err();
        assert_eq!(err, ParseErrorKind::MissingExpression);
    }

    #[test]
    fn leftover_text_is_unexpected_character() {
        let err = parse("foo.bar)").unwrap_err();
        assert_eq!(err, ParseErrorKind::UnexpectedCharacter);
    }

    #[test]
    fn unicode_metric_names_are_accepted() {
        let e = parse("服务.延迟").unwrap();
        assert!(matches!(e.kind, ExpressionKind::Name(n) if n == "服务.延迟"));
    }
}
