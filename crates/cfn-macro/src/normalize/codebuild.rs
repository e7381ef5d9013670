//! `AWS::CodeBuild::Project`: artifacts and cache default to S3
use super::ResourceDefinition;
use crate::config::Config;
use crate::dispatch::Call;
use crate::error::Result;
use crate::util::{rewrite_entries, rewrite_items, with_entry};
use crate::value::{Map, Value};
use std::borrow::Cow;

const S3: &str = "S3";

pub fn normalize<'a>(resource: &ResourceDefinition<'a>, _config: &Config) -> Result<Cow<'a, Map>> {
    let properties = resource.properties;
    let rewritten = rewrite_entries(properties, |key, value| {
        Ok(match key {
            // a cache with `Modes` is a local cache
            "Cache" => default_type(value, |cache| cache.contains_key("Modes")),
            "Artifacts" => default_type(value, |_| false),
            "SecondaryArtifacts" => match value {
                Value::Array(items) => {
                    match rewrite_items(items, |item| Ok(default_type(item, |_| false)))? {
                        Some(items) => Cow::Owned(Value::Array(items)),
                        None => Cow::Borrowed(value),
                    }
                }
                _ => Cow::Borrowed(value),
            },
            _ => Cow::Borrowed(value),
        })
    })?;

    Ok(match rewritten {
        Some(properties) => Cow::Owned(properties),
        None => Cow::Borrowed(properties),
    })
}

/// `Type: S3` for a block without a type
///
/// Calls (`Fn::If` & co) are opaque and stay as they are.
fn default_type(block: &Value, is_local: impl Fn(&Map) -> bool) -> Cow<'_, Value> {
    if Call::from_node(block).is_some() {
        return Cow::Borrowed(block);
    }
    match block {
        Value::Object(map) if !map.contains_key("Type") && !is_local(map) => {
            Cow::Owned(Value::Object(with_entry(map, "Type", S3.into())))
        }
        _ => Cow::Borrowed(block),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn normalize_properties(properties: &Value) -> Cow<'_, Map> {
        let definition = ResourceDefinition {
            logical_id: "Project",
            resource_type: "AWS::CodeBuild::Project",
            condition: None,
            depends_on: vec![],
            properties: properties.as_object().unwrap(),
        };
        normalize(&definition, &Config::default()).unwrap()
    }

    #[test]
    fn defaults_to_s3() {
        let properties = Value::from(json!({
            "Name": "build",
            "Cache": {"Location": "bucket/cache"},
            "Artifacts": {"Location": "bucket", "Packaging": "ZIP"},
            "SecondaryArtifacts": [
                {"ArtifactIdentifier": "reports", "Location": "bucket"},
                {"ArtifactIdentifier": "none", "Type": "NO_ARTIFACTS"}
            ]
        }));

        assert_eq!(
            Value::Object(normalize_properties(&properties).into_owned()),
            Value::from(json!({
                "Name": "build",
                "Cache": {"Location": "bucket/cache", "Type": "S3"},
                "Artifacts": {"Location": "bucket", "Packaging": "ZIP", "Type": "S3"},
                "SecondaryArtifacts": [
                    {"ArtifactIdentifier": "reports", "Location": "bucket", "Type": "S3"},
                    {"ArtifactIdentifier": "none", "Type": "NO_ARTIFACTS"}
                ]
            }))
        );
    }

    #[test]
    fn typed_or_local_blocks_are_identity() {
        let properties = Value::from(json!({
            "Cache": {"Modes": ["LOCAL_DOCKER_LAYER_CACHE"]},
            "Artifacts": {"Type": "CODEPIPELINE"},
            "SecondaryArtifacts": [{"Type": "S3", "Location": "bucket"}],
            "Source": {"Type": "CODEPIPELINE"}
        }));

        let Cow::Borrowed(result) = normalize_properties(&properties) else {
            panic!("fully specified project must not be copied");
        };
        assert!(std::ptr::eq(result, properties.as_object().unwrap()));
    }

    #[test]
    fn conditional_blocks_are_left_alone() {
        let properties = Value::from(json!({
            "Artifacts": {"Fn::If": ["Packaged", {"Location": "bucket"}, {"Type": "NO_ARTIFACTS"}]}
        }));
        assert!(matches!(normalize_properties(&properties), Cow::Borrowed(_)));
    }
}
