//! CDN distribution in front of the site bucket.

use super::{check_one_of, display_param};
use crate::core::types::{Attributes, ParamValue, Params};
use crate::tripwire::hasher::short_digest;

pub const REQUIRED: &[&str] = &["origin"];

const PRICE_CLASSES: &[&str] = &["PriceClass_100", "PriceClass_200", "PriceClass_All"];
const HTTP_VERSIONS: &[&str] = &["http1.1", "http2", "http2and3", "http3"];
const PROTOCOL_VERSIONS: &[&str] = &["TLSv1.2_2019", "TLSv1.2_2021"];
const VIEWER_POLICIES: &[&str] = &["allow-all", "redirect-to-https", "https-only"];

pub fn validate(params: &Params) -> Vec<String> {
    let mut errors = Vec::new();
    errors.extend(check_one_of(params, "price_class", PRICE_CLASSES));
    errors.extend(check_one_of(params, "http_version", HTTP_VERSIONS));
    errors.extend(check_one_of(params, "minimum_protocol_version", PROTOCOL_VERSIONS));
    errors.extend(check_one_of(params, "viewer_protocol_policy", VIEWER_POLICIES));
    if let Some(aliases) = params.get("aliases") {
        if !matches!(aliases, ParamValue::List(_)) {
            errors.push("aliases must be a list".to_string());
        }
        if !params.contains_key("certificate_arn") {
            errors.push("aliases require a certificate_arn".to_string());
        }
    }
    if let Some(ParamValue::List(responses)) = params.get("error_responses") {
        for (i, response) in responses.iter().enumerate() {
            let ParamValue::Map(fields) = response else {
                errors.push(format!("error_responses[{}] must be a mapping", i));
                continue;
            };
            if !fields.contains_key("http_status") {
                errors.push(format!("error_responses[{}] has no http_status", i));
            }
        }
    }
    errors
}

pub fn describe(params: &Params) -> String {
    let mut out = format!("distribution -> {}", display_param(params, "origin"));
    if let Some(ParamValue::List(aliases)) = params.get("aliases") {
        let names: Vec<String> = aliases
            .iter()
            .map(|a| a.as_str().map_or_else(|| "<ref>".to_string(), str::to_string))
            .collect();
        out.push_str(&format!(" [{}]", names.join(", ")));
    }
    out
}

pub fn simulated_attributes(node_id: &str) -> Attributes {
    let id = short_digest(&format!("dist:{}", node_id), 13);
    Attributes::from([
        ("distribution_id".to_string(), format!("E{}", id.to_uppercase())),
        ("domain_name".to_string(), format!("d{}.cloudfront.net", id)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn base() -> Params {
        Params::from([(
            "origin".to_string(),
            ParamValue::import("static-website", "site-bucket"),
        )])
    }

    #[test]
    fn test_validate_closed_sets() {
        let mut p = base();
        p.insert("price_class".into(), ParamValue::string("PriceClass_100"));
        p.insert("http_version".into(), ParamValue::string("http2and3"));
        p.insert(
            "minimum_protocol_version".into(),
            ParamValue::string("TLSv1.2_2021"),
        );
        assert!(validate(&p).is_empty());
        p.insert("price_class".into(), ParamValue::string("PriceClass_Cheap"));
        assert_eq!(validate(&p).len(), 1);
    }

    #[test]
    fn test_aliases_need_certificate() {
        let mut p = base();
        p.insert(
            "aliases".into(),
            ParamValue::List(vec![ParamValue::string("example.com")]),
        );
        let errors = validate(&p);
        assert_eq!(errors, vec!["aliases require a certificate_arn"]);
        p.insert("certificate_arn".into(), ParamValue::attr("cert", "arn"));
        assert!(validate(&p).is_empty());
        assert_eq!(
            describe(&p),
            "distribution -> <import static-website.site-bucket> [example.com]"
        );
    }

    #[test]
    fn test_error_responses_shape() {
        let mut p = base();
        let ok = ParamValue::Map(IndexMap::from([(
            "http_status".to_string(),
            ParamValue::string("403"),
        )]));
        p.insert(
            "error_responses".into(),
            ParamValue::List(vec![ok, ParamValue::string("404")]),
        );
        let errors = validate(&p);
        assert_eq!(errors, vec!["error_responses[1] must be a mapping"]);
    }

    #[test]
    fn test_simulated_ids() {
        let attrs = simulated_attributes("dist");
        assert!(attrs["distribution_id"].starts_with('E'));
        assert!(attrs["domain_name"].ends_with(".cloudfront.net"));
        assert_eq!(attrs, simulated_attributes("dist"));
    }
}
