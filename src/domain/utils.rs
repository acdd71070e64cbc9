//! Domain-specific shared validations and filtering utilities

use std::sync::LazyLock;

use regex::Regex;

use crate::{errors::AppError, kube::models::TektonObject};

pub const DEFAULT_NAMESPACE: &str = "default";
const MAX_LABEL_LENGTH: usize = 63;
const MAX_NAME_LENGTH: usize = 253;

static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));
static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid regex")
});
static NAME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][-a-z0-9.]*$").expect("valid regex"));
static LABEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid regex")
});
static SELECTOR_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^=!\s]+)\s*(==|!=|=)\s*([^=!\s]*)$").expect("valid regex"));

pub fn normalize_namespace(namespace: Option<String>) -> Result<Option<String>, AppError> {
    let Some(value) = namespace else {
        return Ok(None);
    };

    let normalized = value.trim();
    if normalized.is_empty() {
        return Ok(None);
    }

    if normalized.len() > MAX_LABEL_LENGTH || !DNS_LABEL.is_match(normalized) {
        return Err(AppError::bad_request(
            "invalid_namespace",
            "namespace must be a lowercase RFC 1123 label of at most 63 characters",
        ));
    }

    Ok(Some(normalized.to_string()))
}

pub fn normalize_name(name: &str) -> Result<String, AppError> {
    let normalized = name.trim();
    if normalized.is_empty()
        || normalized.len() > MAX_NAME_LENGTH
        || !DNS_SUBDOMAIN.is_match(normalized)
    {
        return Err(AppError::bad_request(
            "invalid_name",
            "name must be a lowercase RFC 1123 subdomain of at most 253 characters",
        ));
    }

    Ok(normalized.to_string())
}

pub fn normalize_prefix(prefix: Option<String>) -> Result<Option<String>, AppError> {
    let Some(value) = prefix else {
        return Ok(None);
    };

    let normalized = value.trim();
    if normalized.is_empty() {
        return Ok(None);
    }

    if normalized.len() > MAX_NAME_LENGTH || !NAME_PREFIX.is_match(normalized) {
        return Err(AppError::bad_request(
            "invalid_prefix",
            "prefix must contain only lowercase alphanumeric characters, dashes and dots",
        ));
    }

    Ok(Some(normalized.to_string()))
}

fn is_label_key(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    let prefix_ok = prefix.map_or(true, |prefix| {
        prefix.len() <= MAX_NAME_LENGTH && DNS_SUBDOMAIN.is_match(prefix)
    });

    prefix_ok && name.len() <= MAX_LABEL_LENGTH && LABEL_NAME.is_match(name)
}

fn is_label_value(value: &str) -> bool {
    value.is_empty() || (value.len() <= MAX_LABEL_LENGTH && LABEL_NAME.is_match(value))
}

/// Validates an equality-based label selector (`k=v`, `k==v`, `k!=v`,
/// comma separated) and returns it in canonical form.
pub fn parse_label_selector(selector: Option<String>) -> Result<Option<String>, AppError> {
    let Some(value) = selector else {
        return Ok(None);
    };

    if value.trim().is_empty() {
        return Ok(None);
    }

    let invalid = || {
        AppError::bad_request(
            "invalid_label_selector",
            "label selector must be comma separated key=value, key==value or key!=value terms",
        )
    };

    let terms = value
        .split(',')
        .map(|term| {
            let captures = SELECTOR_TERM.captures(term.trim()).ok_or_else(invalid)?;
            let key = &captures[1];
            let operator = if &captures[2] == "!=" { "!=" } else { "=" };
            let label_value = &captures[3];

            if !is_label_key(key) || !is_label_value(label_value) {
                return Err(invalid());
            }

            Ok(format!("{key}{operator}{label_value}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(terms.join(",")))
}

pub fn filter_by_name_prefix(objects: Vec<TektonObject>, prefix: Option<&str>) -> Vec<TektonObject> {
    let Some(prefix) = prefix else {
        return objects;
    };

    objects
        .into_iter()
        .filter(|object| object.metadata.name.starts_with(prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        filter_by_name_prefix, normalize_name, normalize_namespace, normalize_prefix,
        parse_label_selector,
    };
    use crate::kube::models::{ObjectMeta, TektonObject};

    fn named(name: &str) -> TektonObject {
        TektonObject {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "ci".to_string(),
                ..ObjectMeta::default()
            },
            ..TektonObject::default()
        }
    }

    #[test]
    fn blank_namespace_means_all_namespaces() {
        assert_eq!(normalize_namespace(Some("  ".to_string())).expect("ok"), None);
        assert_eq!(normalize_namespace(None).expect("ok"), None);
    }

    #[test]
    fn rejects_invalid_namespace() {
        let error = normalize_namespace(Some("Team_A".to_string())).expect_err("invalid");
        assert!(error.to_string().contains("bad request"));
    }

    #[test]
    fn accepts_dotted_names() {
        assert_eq!(
            normalize_name(" build.v2 ").expect("valid name"),
            "build.v2"
        );
        assert!(normalize_name("Build").is_err());
        assert!(normalize_name("").is_err());
    }

    #[test]
    fn rejects_prefix_with_slash() {
        let error = normalize_prefix(Some("ci/build".to_string())).expect_err("invalid");
        assert!(error.to_string().contains("bad request"));
    }

    #[test]
    fn canonicalizes_label_selector() {
        let selector = parse_label_selector(Some(
            "tekton.dev/pipeline == build, env!=prod,team=".to_string(),
        ))
        .expect("valid selector");

        assert_eq!(
            selector.as_deref(),
            Some("tekton.dev/pipeline=build,env!=prod,team=")
        );
    }

    #[test]
    fn rejects_set_based_selector() {
        for selector in ["env in (prod)", "=prod", "env=pr od", "a=b,,c=d", "!env"] {
            let error = parse_label_selector(Some(selector.to_string())).expect_err(selector);
            assert!(error.to_string().contains("bad request"), "{selector}");
        }
    }

    #[test]
    fn filters_by_name_prefix() {
        let filtered = filter_by_name_prefix(
            vec![named("build-1"), named("deploy-1"), named("build-2")],
            Some("build-"),
        );

        let names: Vec<&str> = filtered.iter().map(|o| o.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["build-1", "build-2"]);
    }
}
