use std::{fmt, str::FromStr};

use crate::errors::CacheError;

pub const KEY_SCHEME: &str = "tekton";
pub const PIPELINE_RUN_KIND: &str = "pipelinerun";
pub const MIRRORED_KINDS: [&str; 1] = [PIPELINE_RUN_KIND];

/// Addressable identifier of one mirrored object:
/// `tekton://{namespace}/{kind}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    namespace: String,
    kind: &'static str,
    name: String,
}

impl ResourceKey {
    pub fn new(kind: &'static str, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn pipeline_run(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(PIPELINE_RUN_KIND, namespace, name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{KEY_SCHEME}://{}/{}/{}",
            self.namespace, self.kind, self.name
        )
    }
}

impl FromStr for ResourceKey {
    type Err = CacheError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let not_found = || CacheError::NotFound {
            key: uri.to_string(),
        };

        let rest = uri
            .strip_prefix(KEY_SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(not_found)?;

        let mut parts = rest.splitn(3, '/');
        let (Some(namespace), Some(kind), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(not_found());
        };

        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(not_found());
        }

        MIRRORED_KINDS
            .iter()
            .copied()
            .find(|known| *known == kind)
            .map(|known| Self::new(known, namespace, name))
            .ok_or_else(not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceKey;
    use crate::errors::CacheError;

    #[test]
    fn formats_pipeline_run_uri() {
        let key = ResourceKey::pipeline_run("ns1", "build-1");
        assert_eq!(key.to_string(), "tekton://ns1/pipelinerun/build-1");
    }

    #[test]
    fn parses_formatted_uri() {
        let key: ResourceKey = "tekton://ns1/pipelinerun/build-1"
            .parse()
            .expect("valid key");
        assert_eq!(key.namespace(), "ns1");
        assert_eq!(key.kind(), "pipelinerun");
        assert_eq!(key.name(), "build-1");
    }

    #[test]
    fn rejects_unknown_scheme_and_kind() {
        for uri in [
            "resource://ns1/pipelinerun/build-1",
            "tekton://ns1/taskrun/build-1",
            "tekton://ns1/pipelinerun",
            "tekton:///pipelinerun/build-1",
            "tekton://ns1/pipelinerun/a/b",
        ] {
            let error = uri.parse::<ResourceKey>().expect_err("invalid key");
            assert!(matches!(error, CacheError::NotFound { .. }), "{uri}");
        }
    }
}
