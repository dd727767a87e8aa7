//! Postgres array literals: `{1,2,NULL}`, `{"a,b","c"}`, `{{1,2},{3,4}}`.

use crate::domain::ResultValue;

use super::{NormalizeError, ScalarNormalizer};

/// Parses an array literal, applying `element` to every non-null element.
///
/// Nested braces produce nested arrays. An optional dimension decoration
/// such as `[0:2]=` is skipped.
pub fn parse_array(
    literal: &str,
    element: ScalarNormalizer,
) -> Result<ResultValue, NormalizeError> {
    let body = match literal.strip_prefix('[') {
        Some(_) => literal
            .split_once('=')
            .map(|(_, rest)| rest)
            .ok_or_else(|| NormalizeError::Array(literal.to_string()))?,
        None => literal,
    };

    let mut parser = ArrayParser {
        input: body.as_bytes(),
        source: literal,
        pos: 0,
        element,
    };
    let values = parser.parse_level()?;
    parser.skip_whitespace();
    if parser.pos != parser.input.len() {
        return Err(parser.malformed());
    }
    Ok(ResultValue::Array(values))
}

struct ArrayParser<'a> {
    input: &'a [u8],
    source: &'a str,
    pos: usize,
    element: ScalarNormalizer,
}

impl ArrayParser<'_> {
    fn malformed(&self) -> NormalizeError {
        NormalizeError::Array(self.source.to_string())
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), NormalizeError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.malformed())
        }
    }

    fn parse_level(&mut self) -> Result<Vec<ResultValue>, NormalizeError> {
        self.skip_whitespace();
        self.expect(b'{')?;
        let mut items = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(items);
        }

        loop {
            self.skip_whitespace();
            let item = match self.peek() {
                Some(b'{') => ResultValue::Array(self.parse_level()?),
                Some(b'"') => {
                    let text = self.parse_quoted()?;
                    (self.element)(&text)?
                }
                Some(_) => {
                    let (text, escaped) = self.parse_unquoted()?;
                    if !escaped && text.eq_ignore_ascii_case("NULL") {
                        ResultValue::Null
                    } else {
                        (self.element)(&text)?
                    }
                }
                None => return Err(self.malformed()),
            };
            items.push(item);

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.malformed()),
            }
        }
    }

    fn parse_quoted(&mut self) -> Result<String, NormalizeError> {
        self.expect(b'"')?;
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    let escaped = self.input.get(self.pos + 1).ok_or_else(|| self.malformed())?;
                    bytes.push(*escaped);
                    self.pos += 2;
                }
                Some(byte) => {
                    bytes.push(byte);
                    self.pos += 1;
                }
                None => return Err(self.malformed()),
            }
        }
        String::from_utf8(bytes).map_err(|_| self.malformed())
    }

    /// Returns the element text and whether it contained an escape.
    fn parse_unquoted(&mut self) -> Result<(String, bool), NormalizeError> {
        let mut bytes = Vec::new();
        let mut escaped = false;
        while let Some(byte) = self.peek() {
            match byte {
                b',' | b'}' => break,
                b'{' | b'"' => return Err(self.malformed()),
                b'\\' => {
                    let next = self.input.get(self.pos + 1).ok_or_else(|| self.malformed())?;
                    bytes.push(*next);
                    escaped = true;
                    self.pos += 2;
                }
                _ => {
                    bytes.push(byte);
                    self.pos += 1;
                }
            }
        }
        while bytes.last().is_some_and(u8::is_ascii_whitespace) {
            bytes.pop();
        }
        if bytes.is_empty() {
            return Err(self.malformed());
        }
        let text = String::from_utf8(bytes).map_err(|_| self.malformed())?;
        Ok((text, escaped))
    }
}

/// Encodes JSON array values as a Postgres array literal for text-mode
/// parameters.
pub fn to_array_literal(values: &[serde_json::Value]) -> String {
    let mut out = String::from("{");
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        match value {
            serde_json::Value::Null => out.push_str("NULL"),
            serde_json::Value::Bool(flag) => out.push_str(if *flag { "t" } else { "f" }),
            serde_json::Value::Number(number) => out.push_str(&number.to_string()),
            serde_json::Value::String(text) => push_quoted(&mut out, text),
            serde_json::Value::Array(nested) => out.push_str(&to_array_literal(nested)),
            serde_json::Value::Object(_) => push_quoted(&mut out, &value.to_string()),
        }
    }
    out.push('}');
    out
}

fn push_quoted(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::normalize::scalar;
    use serde_json::json;

    fn ints(values: &[Option<i64>]) -> ResultValue {
        ResultValue::Array(
            values
                .iter()
                .map(|v| v.map_or(ResultValue::Null, ResultValue::Int))
                .collect(),
        )
    }

    #[test]
    fn test_int_array_with_null() {
        let parsed = parse_array("{1,2,NULL,4}", scalar::integer).unwrap();
        assert_eq!(parsed, ints(&[Some(1), Some(2), None, Some(4)]));
    }

    #[test]
    fn test_quoted_elements_keep_delimiters() {
        let parsed = parse_array(r#"{"a,b","c"}"#, scalar::text).unwrap();
        assert_eq!(parsed, ResultValue::Array(vec!["a,b".into(), "c".into()]));
    }

    #[test]
    fn test_quoted_null_is_text() {
        let parsed = parse_array(r#"{"NULL",null}"#, scalar::text).unwrap();
        assert_eq!(parsed, ResultValue::Array(vec!["NULL".into(), ResultValue::Null]));
    }

    #[test]
    fn test_escapes() {
        let parsed = parse_array(r#"{"say \"hi\"","back\\slash"}"#, scalar::text).unwrap();
        assert_eq!(
            parsed,
            ResultValue::Array(vec!["say \"hi\"".into(), "back\\slash".into()])
        );
    }

    #[test]
    fn test_empty_and_nested() {
        assert_eq!(parse_array("{}", scalar::integer).unwrap(), ResultValue::Array(vec![]));

        let parsed = parse_array("{{1,2},{3,4}}", scalar::integer).unwrap();
        assert_eq!(
            parsed,
            ResultValue::Array(vec![ints(&[Some(1), Some(2)]), ints(&[Some(3), Some(4)])])
        );
    }

    #[test]
    fn test_dimension_decoration_is_skipped() {
        let parsed = parse_array("[0:1]={7,8}", scalar::integer).unwrap();
        assert_eq!(parsed, ints(&[Some(7), Some(8)]));
    }

    #[test]
    fn test_elements_go_through_element_normalizer() {
        let parsed = parse_array(
            r#"{"2023-01-01 10:00:00+00","2023-06-01 00:00:00+02"}"#,
            scalar::timestamp_tz,
        )
        .unwrap();
        assert_eq!(
            parsed,
            ResultValue::Array(vec!["2023-01-01 10:00:00".into(), "2023-06-01 00:00:00".into()])
        );
    }

    #[test]
    fn test_malformed_literals() {
        for literal in ["", "1,2", "{1,2", "{1,,2}", "{\"open}", "{1} x", "[0:1]{1}"] {
            assert!(parse_array(literal, scalar::text).is_err(), "{literal:?}");
        }
    }

    #[test]
    fn test_element_failure_propagates() {
        assert!(parse_array("{1,x}", scalar::integer).is_err());
    }

    #[test]
    fn test_to_array_literal() {
        assert_eq!(to_array_literal(&[json!(1), json!(null), json!(3)]), "{1,NULL,3}");
        assert_eq!(
            to_array_literal(&[json!("a,b"), json!("q\"uote")]),
            r#"{"a,b","q\"uote"}"#
        );
        assert_eq!(to_array_literal(&[json!([1, 2]), json!([3, 4])]), "{{1,2},{3,4}}");
        assert_eq!(to_array_literal(&[json!(true)]), "{t}");
    }

    #[test]
    fn test_literal_parses_back() {
        let literal = to_array_literal(&[json!("x y"), json!(null), json!("NULL")]);
        let parsed = parse_array(&literal, scalar::text).unwrap();
        assert_eq!(
            parsed,
            ResultValue::Array(vec!["x y".into(), ResultValue::Null, "NULL".into()])
        );
    }
}
