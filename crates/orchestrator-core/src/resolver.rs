//! Parameter Resolver.
//!
//! Rewrites a job's params at dispatch time, substituting `$jobId`,
//! `from-jobId`, and `_imageJobDependency:jobId` sentinels with the
//! referenced upstream job's primary output (the `url` of the first element
//! of its `result.outputs`). Reference rewriting into `depends_on` already
//! happened at admission (`plan::validate_and_canonicalize`); this module
//! only ever sees references that are guaranteed to point at a sibling job,
//! though that sibling might not have completed by the time a worker races
//! ahead of the fan-out (caller error, not a plan error) or might have
//! produced zero outputs (provider error), so both are still checked here.

use crate::error::ResolverError;

/// A resolved reference to an upstream job's state, provided by the caller
/// (the Job Worker, which already holds the sibling jobs for this
/// execution). Kept trait-based so tests can resolve against a plain
/// `HashMap` instead of a live store.
pub trait UpstreamOutputs {
    /// `Ok(Some(url))` if the referenced job has completed with at least one
    /// output, `Ok(None)` if it completed with zero outputs, `Err` if it is
    /// unknown or not yet completed.
    fn primary_output(&self, plan_local_id: &str) -> Result<Option<String>, ResolverError>;
}

pub fn resolve_params(
    params: &serde_json::Value,
    upstream: &dyn UpstreamOutputs,
) -> Result<serde_json::Value, ResolverError> {
    match params {
        serde_json::Value::String(s) => match crate::plan::parse_reference(s) {
            Some(id) => match upstream.primary_output(&id)? {
                Some(url) => Ok(serde_json::Value::String(url)),
                None => Err(ResolverError::EmptyUpstreamOutput(id)),
            },
            None => Ok(params.clone()),
        },
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_params(v, upstream)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_params(item, upstream)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapUpstream(HashMap<String, Option<String>>);

    impl UpstreamOutputs for MapUpstream {
        fn primary_output(&self, plan_local_id: &str) -> Result<Option<String>, ResolverError> {
            self.0
                .get(plan_local_id)
                .cloned()
                .ok_or_else(|| ResolverError::UpstreamNotCompleted(plan_local_id.to_string()))
        }
    }

    #[test]
    fn substitutes_dollar_and_from_forms_identically() {
        let upstream = MapUpstream(HashMap::from([(
            "img".to_string(),
            Some("https://store/cat.png".to_string()),
        )]));
        let resolved = resolve_params(&serde_json::json!({"a": "$img", "b": "from-img"}), &upstream).unwrap();
        assert_eq!(resolved["a"], "https://store/cat.png");
        assert_eq!(resolved["b"], "https://store/cat.png");
    }

    #[test]
    fn substitutes_lifted_sentinel() {
        let upstream = MapUpstream(HashMap::from([(
            "vid_lifted_1".to_string(),
            Some("https://store/cat.png".to_string()),
        )]));
        let resolved = resolve_params(
            &serde_json::json!({"image": "_imageJobDependency:vid_lifted_1"}),
            &upstream,
        )
        .unwrap();
        assert_eq!(resolved["image"], "https://store/cat.png");
    }

    #[test]
    fn leaves_non_reference_strings_untouched() {
        let upstream = MapUpstream(HashMap::new());
        let resolved = resolve_params(&serde_json::json!({"prompt": "a cat walking"}), &upstream).unwrap();
        assert_eq!(resolved["prompt"], "a cat walking");
    }

    #[test]
    fn fails_on_empty_upstream_output() {
        let upstream = MapUpstream(HashMap::from([("img".to_string(), None)]));
        let err = resolve_params(&serde_json::json!("$img"), &upstream).unwrap_err();
        assert!(matches!(err, ResolverError::EmptyUpstreamOutput(_)));
    }

    #[test]
    fn fails_on_not_completed_upstream() {
        let upstream = MapUpstream(HashMap::new());
        let err = resolve_params(&serde_json::json!("$img"), &upstream).unwrap_err();
        assert!(matches!(err, ResolverError::UpstreamNotCompleted(_)));
    }

    #[test]
    fn resolves_recursively_through_nested_lists_and_maps() {
        let upstream = MapUpstream(HashMap::from([(
            "img".to_string(),
            Some("https://store/cat.png".to_string()),
        )]));
        let resolved = resolve_params(
            &serde_json::json!({"layers": [{"source": "$img"}, {"source": "static"}]}),
            &upstream,
        )
        .unwrap();
        assert_eq!(resolved["layers"][0]["source"], "https://store/cat.png");
        assert_eq!(resolved["layers"][1]["source"], "static");
    }
}
