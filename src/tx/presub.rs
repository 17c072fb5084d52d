//! Literal splicing of `«key»` tokens into statement text.
//!
//! Used for values a query cannot take as bound parameters, such as labels,
//! relationship types and variable-length ranges.

use crate::error::GraphError;
use crate::hydrate::{Params, Value};

const OPEN: char = '«';
const CLOSE: char = '»';

/// Quotes `identifier` in backticks unless it is a plain identifier.
/// Embedded backticks are doubled.
pub fn cypher_escape(identifier: &str) -> Result<String, GraphError> {
    let mut chars = identifier.chars();
    let Some(first) = chars.next() else {
        return Err(GraphError::InvalidArgument("empty identifier".into()));
    };
    let plain = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        Ok(identifier.to_string())
    } else {
        Ok(format!("`{}`", identifier.replace('`', "``")))
    }
}

/// Replaces every `«key»` in `statement` with the text form of
/// `params[key]` and removes the spliced keys from `params`.
///
/// Integers become digits, lists of integers become `first..last`, lists of
/// strings become `:`-joined identifiers and strings become identifiers.
pub fn presubstitute(statement: &str, params: &mut Params) -> Result<String, GraphError> {
    if !statement.contains(OPEN) {
        return Ok(statement.to_string());
    }
    let mut out = String::with_capacity(statement.len());
    let mut used = Vec::new();
    let mut rest = statement;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len_utf8()..];
        let Some(end) = after.find(CLOSE) else {
            return Err(GraphError::InvalidArgument(format!(
                "unterminated substitution token in {statement:?}"
            )));
        };
        let key = &after[..end];
        let value = params.get(key).ok_or_else(|| {
            GraphError::InvalidArgument(format!("expected a presubstitution parameter named {key:?}"))
        })?;
        out.push_str(&render(key, value)?);
        used.push(key.to_string());
        rest = &after[end + CLOSE.len_utf8()..];
    }
    out.push_str(rest);
    for key in used {
        params.remove(&key);
    }
    Ok(out)
}

fn render(key: &str, value: &Value) -> Result<String, GraphError> {
    match value {
        Value::Integer(n) => Ok(n.to_string()),
        Value::String(s) => cypher_escape(s),
        Value::List(items) if !items.is_empty() && items.iter().all(|v| v.as_i64().is_some()) => {
            let first = items.first().and_then(Value::as_i64).unwrap_or_default();
            let last = items.last().and_then(Value::as_i64).unwrap_or_default();
            Ok(format!("{first}..{last}"))
        }
        Value::List(items) => {
            let parts = items
                .iter()
                .map(|item| match item.as_str() {
                    Some(s) => cypher_escape(s),
                    None => Err(unsplicable(key, item)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(parts.join(":"))
        }
        other => Err(unsplicable(key, other)),
    }
}

fn unsplicable(key: &str, value: &Value) -> GraphError {
    GraphError::InvalidArgument(format!("cannot substitute {value:?} for «{key}»"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: Vec<(&str, Value)>) -> Params {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn escape_quotes_only_when_needed() {
        assert_eq!(cypher_escape("Person").unwrap(), "Person");
        assert_eq!(cypher_escape("_x1").unwrap(), "_x1");
        assert_eq!(cypher_escape("1st").unwrap(), "`1st`");
        assert_eq!(cypher_escape("this is a `label`").unwrap(), "`this is a ``label```");
        assert!(cypher_escape("").is_err());
    }

    #[test]
    fn splices_each_value_form() {
        let mut p = params(vec![
            ("label", Value::from("Person")),
            ("labels", Value::from(vec!["A", "B c"])),
            ("depth", Value::from(vec![1i64, 2, 3])),
            ("limit", Value::from(10i64)),
            ("name", Value::from("Alice")),
        ]);
        let statement = presubstitute(
            "MATCH (a:«label»)-[*«depth»]->(b:«labels») WHERE a.name = $name RETURN b LIMIT «limit»",
            &mut p,
        )
        .unwrap();
        assert_eq!(
            statement,
            "MATCH (a:Person)-[*1..3]->(b:A:`B c`) WHERE a.name = $name RETURN b LIMIT 10"
        );
        assert_eq!(p.len(), 1);
        assert!(p.contains_key("name"));
    }

    #[test]
    fn repeated_token_is_spliced_everywhere() {
        let mut p = params(vec![("t", Value::from("KNOWS"))]);
        let statement = presubstitute("()-[:«t»]->()<-[:«t»]-()", &mut p).unwrap();
        assert_eq!(statement, "()-[:KNOWS]->()<-[:KNOWS]-()");
        assert!(p.is_empty());
    }

    #[test]
    fn missing_key_is_an_error() {
        let mut p = Params::new();
        let err = presubstitute("MATCH (a:«label») RETURN a", &mut p).unwrap_err();
        assert!(matches!(err, GraphError::InvalidArgument(msg) if msg.contains("label")));
    }

    #[test]
    fn statement_without_tokens_is_untouched() {
        let mut p = params(vec![("x", Value::from(1i64))]);
        assert_eq!(presubstitute("RETURN $x", &mut p).unwrap(), "RETURN $x");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn floats_cannot_be_spliced() {
        let mut p = params(vec![("x", Value::from(1.5))]);
        assert!(presubstitute("RETURN «x»", &mut p).is_err());
    }
}
