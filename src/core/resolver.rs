//! Template and placeholder resolution.
//!
//! Two passes with different lifetimes:
//! - `{{params.key}}` / `{{stack.name}}` templates are expanded once, when the
//!   config is turned into graph nodes.
//! - `ref` / `import` placeholders are substituted at plan time, right before
//!   a node is materialized, from the live attribute table and the export
//!   table.

use super::error::PlanError;
use super::outputs::ExportTable;
use super::types::*;
use indexmap::IndexMap;
use serde_yaml_ng::{Mapping, Value};
use std::collections::HashMap;

/// Live attributes of every materialized node, keyed by node ID.
pub type AttributeTable = IndexMap<String, Attributes>;

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, Value>,
    stack: &str,
) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else if key == "stack.name" {
            stack.to_string()
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Expand templates in every string literal of a parameter value.
/// Placeholders pass through untouched.
pub fn resolve_param_templates(
    value: &ParamValue,
    params: &HashMap<String, Value>,
    stack: &str,
) -> Result<ParamValue, String> {
    Ok(match value {
        ParamValue::Literal(Value::String(s)) => {
            ParamValue::Literal(Value::String(resolve_template(s, params, stack)?))
        }
        ParamValue::List(items) => ParamValue::List(
            items
                .iter()
                .map(|item| resolve_param_templates(item, params, stack))
                .collect::<Result<_, _>>()?,
        ),
        ParamValue::Map(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_param_templates(v, params, stack)?);
            }
            ParamValue::Map(out)
        }
        other => other.clone(),
    })
}

/// Expand templates in all params of a node.
pub fn resolve_node_templates(
    node: &ResourceNode,
    params: &HashMap<String, Value>,
    stack: &str,
) -> Result<ResourceNode, String> {
    let mut resolved = node.clone();
    for (key, value) in &node.params {
        let expanded = resolve_param_templates(value, params, stack)
            .map_err(|e| format!("resource '{}' param '{}': {}", node.id, key, e))?;
        resolved.params.insert(key.clone(), expanded);
    }
    Ok(resolved)
}

/// Substitute every `ref` and `import` placeholder in a node's params.
///
/// An import whose exporting node has not published yet is an
/// `UnresolvedReference`. A `ref` to an attribute the backend never reported
/// is charged to the consuming node as a `ProvisioningFailure`.
pub fn resolve_params(
    node: &ResourceNode,
    attributes: &AttributeTable,
    exports: &ExportTable,
) -> Result<ResolvedParams, PlanError> {
    let mut resolved = ResolvedParams::with_capacity(node.params.len());
    for (key, value) in &node.params {
        resolved.insert(key.clone(), resolve_value(node, value, attributes, exports)?);
    }
    Ok(resolved)
}

fn resolve_value(
    node: &ResourceNode,
    value: &ParamValue,
    attributes: &AttributeTable,
    exports: &ExportTable,
) -> Result<Value, PlanError> {
    match value {
        ParamValue::Literal(v) => Ok(v.clone()),
        ParamValue::List(items) => items
            .iter()
            .map(|item| resolve_value(node, item, attributes, exports))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        ParamValue::Map(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(
                    Value::String(k.clone()),
                    resolve_value(node, v, attributes, exports)?,
                );
            }
            Ok(Value::Mapping(out))
        }
        ParamValue::Ref(r) => attributes
            .get(&r.resource)
            .and_then(|attrs| attrs.get(&r.attribute))
            .map(|v| Value::String(v.clone()))
            .ok_or_else(|| PlanError::ProvisioningFailure {
                node: node.id.clone(),
                kind: node.kind,
                cause: format!(
                    "attribute '{}' of '{}' is not available",
                    r.attribute, r.resource
                ),
            }),
        ParamValue::Import(i) => exports.resolve(i).map(|v| Value::String(v.to_string())),
    }
}

/// Render resolved params as canonical YAML (keys sorted) for hashing.
pub fn canonical_params(params: &ResolvedParams) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    let mut out = String::new();
    for key in keys {
        out.push_str(key);
        out.push('=');
        out.push_str(&canonical_value(&params[key]));
        out.push('\n');
    }
    out
}

fn canonical_value(value: &Value) -> String {
    match value {
        Value::Sequence(items) => {
            let inner: Vec<String> = items.iter().map(canonical_value).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Mapping(map) => {
            let mut entries: Vec<(String, String)> = map
                .iter()
                .map(|(k, v)| (yaml_value_to_string(k), canonical_value(v)))
                .collect();
            entries.sort();
            let inner: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::String(s) => format!("{:?}", s),
        Value::Tagged(tagged) => canonical_value(&tagged.value),
        other => yaml_value_to_string(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HashMap<String, Value> {
        HashMap::from([
            (
                "domain_name".to_string(),
                Value::String("example.com".to_string()),
            ),
            ("ttl".to_string(), Value::Number(86400.into())),
        ])
    }

    #[test]
    fn test_resolve_params_template() {
        let result = resolve_template("www.{{params.domain_name}}", &params(), "web").unwrap();
        assert_eq!(result, "www.example.com");
    }

    #[test]
    fn test_resolve_stack_name() {
        let result = resolve_template("{{stack.name}}-logs", &params(), "static-website").unwrap();
        assert_eq!(result, "static-website-logs");
    }

    #[test]
    fn test_resolve_multiple_and_numbers() {
        let result =
            resolve_template("{{ params.domain_name }}:{{params.ttl}}", &params(), "web").unwrap();
        assert_eq!(result, "example.com:86400");
    }

    #[test]
    fn test_resolve_unknown_param() {
        let err = resolve_template("{{params.missing}}", &params(), "web").unwrap_err();
        assert!(err.contains("unknown param"));
    }

    #[test]
    fn test_resolve_unknown_variable_and_unclosed() {
        assert!(resolve_template("{{machine.x}}", &params(), "web")
            .unwrap_err()
            .contains("unknown template variable"));
        assert!(resolve_template("{{params.domain_name", &params(), "web")
            .unwrap_err()
            .contains("unclosed"));
    }

    #[test]
    fn test_resolve_node_templates_nested() {
        let node = ResourceNode::new("cert", ResourceKind::Certificate)
            .with_param("domain_name", ParamValue::string("{{params.domain_name}}"))
            .with_param(
                "subject_alternative_names",
                ParamValue::List(vec![ParamValue::string("www.{{params.domain_name}}")]),
            )
            .with_param("zone", ParamValue::attr("zone", "id"));
        let resolved = resolve_node_templates(&node, &params(), "cloudfront").unwrap();
        assert_eq!(resolved.params["domain_name"].as_str(), Some("example.com"));
        match &resolved.params["subject_alternative_names"] {
            ParamValue::List(items) => assert_eq!(items[0].as_str(), Some("www.example.com")),
            other => panic!("expected list, got {:?}", other),
        }
        assert_eq!(resolved.params["zone"], ParamValue::attr("zone", "id"));
    }

    #[test]
    fn test_resolve_node_templates_error_names_param() {
        let node = ResourceNode::new("cert", ResourceKind::Certificate)
            .with_param("domain_name", ParamValue::string("{{params.nope}}"));
        let err = resolve_node_templates(&node, &params(), "cloudfront").unwrap_err();
        assert!(err.contains("resource 'cert' param 'domain_name'"));
    }

    #[test]
    fn test_resolve_params_substitutes_placeholders() {
        let node = ResourceNode::new("dist", ResourceKind::CdnDistribution)
            .with_param("origin", ParamValue::import("static-website", "site-bucket"))
            .with_param("certificate_arn", ParamValue::attr("cert", "arn"))
            .with_param("price_class", ParamValue::string("PriceClass_100"));

        let mut attributes = AttributeTable::new();
        attributes.insert(
            "cert".to_string(),
            Attributes::from([("arn".to_string(), "arn:aws:acm:cert/1".to_string())]),
        );
        let mut exports = ExportTable::new();
        exports
            .declare("static-website", "site-bucket", "site", "bucket_name")
            .unwrap();
        exports.publish(
            "site",
            &Attributes::from([("bucket_name".to_string(), "example.com".to_string())]),
        );

        let resolved = resolve_params(&node, &attributes, &exports).unwrap();
        assert_eq!(resolved["origin"], Value::String("example.com".into()));
        assert_eq!(
            resolved["certificate_arn"],
            Value::String("arn:aws:acm:cert/1".into())
        );
        assert_eq!(resolved["price_class"], Value::String("PriceClass_100".into()));
    }

    #[test]
    fn test_resolve_params_unpublished_import() {
        let node = ResourceNode::new("dist", ResourceKind::CdnDistribution)
            .with_param("origin", ParamValue::import("static-website", "site-bucket"));
        let mut exports = ExportTable::new();
        exports
            .declare("static-website", "site-bucket", "site", "bucket_name")
            .unwrap();
        let err = resolve_params(&node, &AttributeTable::new(), &exports).unwrap_err();
        assert!(matches!(err, PlanError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_resolve_params_missing_attribute_charged_to_consumer() {
        let node = ResourceNode::new("a", ResourceKind::DnsRecord)
            .with_param("target", ParamValue::attr("dist", "domain_name"));
        let mut attributes = AttributeTable::new();
        attributes.insert("dist".to_string(), Attributes::new());
        match resolve_params(&node, &attributes, &ExportTable::new()) {
            Err(PlanError::ProvisioningFailure { node, kind, cause }) => {
                assert_eq!(node, "a");
                assert_eq!(kind, ResourceKind::DnsRecord);
                assert!(cause.contains("domain_name"));
            }
            other => panic!("expected provisioning failure, got {:?}", other),
        }
    }

    #[test]
    fn test_canonical_params_ignores_declaration_order() {
        let a: ResolvedParams = IndexMap::from([
            ("x".to_string(), Value::String("1".into())),
            ("y".to_string(), Value::Bool(true)),
        ]);
        let b: ResolvedParams = IndexMap::from([
            ("y".to_string(), Value::Bool(true)),
            ("x".to_string(), Value::String("1".into())),
        ]);
        assert_eq!(canonical_params(&a), canonical_params(&b));
        let c: ResolvedParams = IndexMap::from([("x".to_string(), Value::String("2".into()))]);
        assert_ne!(canonical_params(&a), canonical_params(&c));
    }
}
