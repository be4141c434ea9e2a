//! SW-006: Positional argument extraction.
//!
//! The entry script is invoked positionally, so the argument list is derived
//! from the `args.<name>` placeholders of the plan's invocation body, in
//! first-occurrence order, and looked up in the plan's parameters.

use super::error::CompileError;
use super::types::{value_to_string, StructuredPlan};
use indexmap::IndexMap;
use serde_json::Value;

/// Placeholder marker inside an invocation body.
pub const PLACEHOLDER_PREFIX: &str = "args.";

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Placeholder names referenced by `template`, first occurrence first.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut found: Vec<&str> = Vec::new();
    let mut start = 0;

    while let Some(pos) = template[start..].find(PLACEHOLDER_PREFIX) {
        let at = start + pos;
        let key_start = at + PLACEHOLDER_PREFIX.len();
        let key_len = template[key_start..]
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(template.len() - key_start);
        let key = &template[key_start..key_start + key_len];

        // `xargs.foo` and `self.args.foo` are not placeholders
        let at_boundary = template[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !is_ident_char(c) && c != '.');
        let starts_ident = key.chars().next().is_some_and(|c| !c.is_ascii_digit());

        if at_boundary && starts_ident && !found.contains(&key) {
            found.push(key);
        }
        start = key_start;
    }

    found
}

/// Ordered argument values for `template`.
pub fn extract_arguments(
    template: &str,
    parameters: &IndexMap<String, Value>,
) -> Result<Vec<String>, CompileError> {
    placeholders(template)
        .into_iter()
        .map(|key| {
            parameters
                .get(key)
                .map(value_to_string)
                .ok_or_else(|| CompileError::MissingParameter(key.to_string()))
        })
        .collect()
}

/// Arguments for a structured plan; a plan without a body takes none.
pub fn plan_arguments(plan: &StructuredPlan) -> Result<Vec<String>, CompileError> {
    match plan.body.as_deref() {
        Some(body) => extract_arguments(body, &plan.parameters),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_sw006_first_occurrence_order() {
        let body = "return deploy('{0} {1}'.format(args.port, args.host, args.port)).stdout";
        assert_eq!(placeholders(body), vec!["port", "host"]);
    }

    #[test]
    fn test_sw006_extract_values() {
        let p = params(&[
            ("host", json!("db.internal")),
            ("port", json!(5432)),
            ("debug", json!(false)),
        ]);
        let args = extract_arguments("run(args.host, args.port, args.debug)", &p).unwrap();
        assert_eq!(args, vec!["db.internal", "5432", "false"]);
    }

    #[test]
    fn test_sw006_missing_parameter() {
        let p = params(&[("host", json!("h"))]);
        assert_eq!(
            extract_arguments("run(args.host, args.user)", &p).unwrap_err(),
            CompileError::MissingParameter("user".into())
        );
    }

    #[test]
    fn test_sw006_not_placeholders() {
        assert!(placeholders("xargs.foo self.args.bar args. args.1x").is_empty());
        assert!(placeholders("").is_empty());
        assert_eq!(placeholders("args.a_b-args.c"), vec!["a_b", "c"]);
    }

    #[test]
    fn test_sw006_unused_parameters_ignored() {
        let p = params(&[("a", json!("1")), ("unused", json!("x"))]);
        assert_eq!(extract_arguments("f(args.a)", &p).unwrap(), vec!["1"]);
    }

    #[test]
    fn test_sw006_plan_without_body() {
        let plan: StructuredPlan = serde_json::from_value(json!({
            "ID": "p", "FormatVersion": "2.0.0", "Action": "Execute",
            "Files": {}, "Scripts": {}
        }))
        .unwrap();
        assert!(plan_arguments(&plan).unwrap().is_empty());
    }

    #[test]
    fn test_sw006_plan_with_body() {
        let plan: StructuredPlan = serde_json::from_value(json!({
            "ID": "p", "FormatVersion": "2.0.0", "Action": "Execute",
            "Body": "return run(args.name).stdout",
            "Parameters": {"name": "tomcat"},
            "Files": {}, "Scripts": {}
        }))
        .unwrap();
        assert_eq!(plan_arguments(&plan).unwrap(), vec!["tomcat"]);
    }

    proptest! {
        #[test]
        fn prop_sw006_order_is_deterministic(
            keys in proptest::collection::hash_set("[a-z][a-z0-9_]{0,8}", 1..8)
        ) {
            let keys: Vec<String> = keys.into_iter().collect();
            let body = format!(
                "run({})",
                keys.iter().map(|k| format!("args.{}", k)).collect::<Vec<_>>().join(", ")
            );
            let p: IndexMap<String, Value> = keys
                .iter()
                .rev()
                .map(|k| (k.clone(), Value::String(k.to_uppercase())))
                .collect();
            let args = extract_arguments(&body, &p).unwrap();
            let expected: Vec<String> = keys.iter().map(|k| k.to_uppercase()).collect();
            prop_assert_eq!(args, expected);
        }
    }
}
