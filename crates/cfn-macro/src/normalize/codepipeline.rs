//! `AWS::CodePipeline::Pipeline`: shorthand stages become native stages
//!
//! See [crate::pipeline] for the stage notation. Every pipeline resource gets its own
//! [PipelineResolver]; artifacts and namespaces never leak between pipelines.
use super::ResourceDefinition;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::{
    artifact_list, Action, CompiledPipeline, PipelineResolver, ACTION_TYPE_ID, INPUT_ARTIFACTS,
    NAMESPACE, OUTPUT_ARTIFACTS,
};
use crate::util::{rewrite_entries, rewrite_items};
use crate::value::{Map, Value};
use std::borrow::Cow;

pub fn normalize<'a>(resource: &ResourceDefinition<'a>, config: &Config) -> Result<Cow<'a, Map>> {
    let properties = resource.properties;
    let logical_id = resource.logical_id;

    // `Fn::If` & co can not be analyzed
    let Some(Value::Array(stages)) = properties.get("Stages") else {
        tracing::trace!(%logical_id, "stages are not a list, pipeline left alone");
        return Ok(Cow::Borrowed(properties));
    };

    let mut resolver = PipelineResolver::default();
    let mut shorthand = Vec::with_capacity(stages.len());
    for stage in stages {
        let handled = resolver.handle_stage(stage)?;
        if !handled {
            resolver.handle_native_stage(stage)?;
        }
        shorthand.push(handled);
    }

    let artifact_store = if properties.contains_key("ArtifactStore")
        || properties.contains_key("ArtifactStores")
    {
        None
    } else {
        Some(default_artifact_store(config))
    };

    if !shorthand.contains(&true) && artifact_store.is_none() {
        return Ok(Cow::Borrowed(properties));
    }

    let stages = if shorthand.contains(&true) {
        let compiled = resolver.compile()?;
        let mut rebuilt = Vec::with_capacity(stages.len());
        for (stage, handled) in stages.iter().zip(shorthand) {
            rebuilt.push(if handled {
                native_stage(stage, &resolver, &compiled)?
            } else {
                stage.clone()
            });
        }
        tracing::debug!(%logical_id, actions = resolver.actions().len(), "pipeline stages compiled");
        Some(Value::Array(rebuilt))
    } else {
        None
    };

    let mut rewritten = properties.clone();
    if let Some(stages) = stages {
        rewritten.insert("Stages".to_string(), stages);
    }
    if let Some(artifact_store) = artifact_store {
        rewritten.insert("ArtifactStore".to_string(), artifact_store);
    }
    Ok(Cow::Owned(rewritten))
}

fn default_artifact_store(config: &Config) -> Value {
    let location: Value = [("Ref", config.pipeline.artifact_bucket_parameter.as_str())]
        .into_iter()
        .collect();
    [("Type", Value::from("S3")), ("Location", location)]
        .into_iter()
        .collect()
}

/// Stage with its actions as a native action list
fn native_stage(
    stage: &Value,
    resolver: &PipelineResolver,
    compiled: &CompiledPipeline,
) -> Result<Value> {
    let stage = stage.as_object()?;
    let stage_name = stage
        .get("Name")
        .map(Value::as_str)
        .transpose()?
        .unwrap_or_default();
    let declared = stage.get("Actions").map(Value::object_or_empty);

    let mut actions = Vec::new();
    for action in resolver.actions().iter().filter(|a| a.stage == stage_name) {
        let declaration = declared
            .and_then(|declared| declared.get(&action.name))
            .map(Value::object_or_empty);
        actions.push(native_action(action, declaration, resolver, compiled)?);
    }

    let mut rebuilt = stage.clone();
    rebuilt.insert("Actions".to_string(), Value::Array(actions));
    Ok(Value::Object(rebuilt))
}

fn native_action(
    action: &Action,
    declaration: Option<&Map>,
    resolver: &PipelineResolver,
    compiled: &CompiledPipeline,
) -> Result<Value> {
    let Some(compiled_action) = compiled.get(&action.stage, &action.name) else {
        return Err(Error::UnknownReference(action.key()));
    };

    let mut native = Map::new();
    native.insert("Name".to_string(), action.name.as_str().into());
    native.insert(ACTION_TYPE_ID.to_string(), action.type_id.to_value());
    if !action.inputs.is_empty() {
        native.insert(INPUT_ARTIFACTS.to_string(), artifact_list(&action.inputs));
    }
    if !action.outputs.is_empty() {
        native.insert(OUTPUT_ARTIFACTS.to_string(), artifact_list(&action.outputs));
    }

    for (key, value) in declaration.into_iter().flatten() {
        match key.as_str() {
            "Name" | "RunOrder" | ACTION_TYPE_ID | INPUT_ARTIFACTS | OUTPUT_ARTIFACTS | NAMESPACE => {}
            _ => {
                let value = rewrite_variables(value, resolver)?;
                native.insert(key.clone(), value.into_owned());
            }
        }
    }

    native.insert(
        "RunOrder".to_string(),
        Value::Integer(compiled_action.run_order.into()),
    );
    native.insert(
        NAMESPACE.to_string(),
        compiled_action.namespace.as_str().into(),
    );
    Ok(Value::Object(native))
}

/// `#{Stage:Action.Variable}` in any string below `value`
fn rewrite_variables<'a>(value: &'a Value, resolver: &PipelineResolver) -> Result<Cow<'a, Value>> {
    match value {
        Value::String(text) => Ok(match resolver.rewrite_variables(text)? {
            Some(text) => Cow::Owned(text.into()),
            None => Cow::Borrowed(value),
        }),
        Value::Array(items) => Ok(
            match rewrite_items(items, |item| rewrite_variables(item, resolver))? {
                Some(items) => Cow::Owned(Value::Array(items)),
                None => Cow::Borrowed(value),
            },
        ),
        Value::Object(map) => Ok(
            match rewrite_entries(map, |_, item| rewrite_variables(item, resolver))? {
                Some(map) => Cow::Owned(Value::Object(map)),
                None => Cow::Borrowed(value),
            },
        ),
        _ => Ok(Cow::Borrowed(value)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn normalize_properties(properties: &Value) -> Result<Cow<'_, Map>> {
        let definition = ResourceDefinition {
            logical_id: "Pipeline",
            resource_type: "AWS::CodePipeline::Pipeline",
            condition: None,
            depends_on: vec![],
            properties: properties.as_object().unwrap(),
        };
        normalize(&definition, &Config::default())
    }

    #[test]
    fn shorthand_stages() {
        let properties = Value::from(json!({
            "RoleArn": {"Fn::GetAtt": ["PipelineRole", "Arn"]},
            "Stages": [
                {
                    "Name": "Source",
                    "Actions": [{
                        "Name": "Checkout",
                        "ActionTypeId": {"Category": "Source", "Owner": "AWS", "Provider": "CodeCommit", "Version": "1"},
                        "OutputArtifacts": [{"Name": "Source"}],
                        "Namespace": "SourceVariables"
                    }]
                },
                {
                    "Name": "Build",
                    "Actions": {
                        "Compile": {
                            "ActionTypeId": {"Category": "Build", "Provider": "CodeBuild"},
                            "InputArtifacts": ["Source"],
                            "OutputArtifacts": ["Binary"],
                            "Configuration": {"ProjectName": {"Ref": "Project"}}
                        },
                        "Test": {
                            "ActionTypeId": {"Category": "Test", "Provider": "CodeBuild"},
                            "InputArtifacts": ["Binary"],
                            "Configuration": {
                                "ProjectName": {"Ref": "Tests"},
                                "EnvironmentVariables": "[{\"name\":\"VERSION\",\"value\":\"#{Build:Compile.VERSION}\"}]"
                            }
                        }
                    }
                }
            ]
        }));

        let result = normalize_properties(&properties).unwrap().into_owned();
        assert_eq!(
            Value::Object(result),
            Value::from(json!({
                "RoleArn": {"Fn::GetAtt": ["PipelineRole", "Arn"]},
                "Stages": [
                    {
                        "Name": "Source",
                        "Actions": [{
                            "Name": "Checkout",
                            "ActionTypeId": {"Category": "Source", "Owner": "AWS", "Provider": "CodeCommit", "Version": "1"},
                            "OutputArtifacts": [{"Name": "Source"}],
                            "Namespace": "SourceVariables"
                        }]
                    },
                    {
                        "Name": "Build",
                        "Actions": [
                            {
                                "Name": "Compile",
                                "ActionTypeId": {"Category": "Build", "Owner": "AWS", "Provider": "CodeBuild", "Version": "1"},
                                "InputArtifacts": [{"Name": "Source"}],
                                "OutputArtifacts": [{"Name": "Binary"}],
                                "Configuration": {"ProjectName": {"Ref": "Project"}},
                                "RunOrder": 1,
                                "Namespace": "build-compile"
                            },
                            {
                                "Name": "Test",
                                "ActionTypeId": {"Category": "Test", "Owner": "AWS", "Provider": "CodeBuild", "Version": "1"},
                                "InputArtifacts": [{"Name": "Binary"}],
                                "Configuration": {
                                    "ProjectName": {"Ref": "Tests"},
                                    "EnvironmentVariables": "[{\"name\":\"VERSION\",\"value\":\"#{build-compile.VERSION}\"}]"
                                },
                                "RunOrder": 2,
                                "Namespace": "build-test"
                            }
                        ]
                    }
                ],
                "ArtifactStore": {"Type": "S3", "Location": {"Ref": "ArtifactBucket"}}
            }))
        );
    }

    #[test]
    fn conditional_stages_are_identity() {
        let properties = Value::from(json!({
            "Stages": {"Fn::If": ["HasDeploy", [], []]},
            "ArtifactStores": {"Fn::If": ["MultiRegion", [], []]}
        }));
        let Cow::Borrowed(result) = normalize_properties(&properties).unwrap() else {
            panic!("conditional stages must not be touched");
        };
        assert!(std::ptr::eq(result, properties.as_object().unwrap()));
    }

    #[test]
    fn native_pipeline_with_store_is_identity() {
        let properties = Value::from(json!({
            "ArtifactStore": {"Type": "S3", "Location": "bucket"},
            "Stages": [{"Name": "Source", "Actions": [{"Name": "Checkout", "ActionTypeId": {"Category": "Source", "Owner": "AWS", "Provider": "S3", "Version": "1"}}]}]
        }));
        assert!(matches!(normalize_properties(&properties).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn missing_artifact_fails() {
        let properties = Value::from(json!({
            "Stages": [{"Name": "Build", "Actions": {"Compile": {
                "ActionTypeId": {"Category": "Build", "Provider": "CodeBuild"},
                "InputArtifacts": ["Source"]
            }}}]
        }));
        assert!(matches!(
            normalize_properties(&properties),
            Err(Error::MissingArtifact { .. })
        ));
    }

    #[test]
    fn pipelines_do_not_share_state() {
        let properties = Value::from(json!({
            "ArtifactStore": {"Type": "S3", "Location": "bucket"},
            "Stages": [{"Name": "Build", "Actions": {"Compile": {
                "ActionTypeId": {"Category": "Build", "Provider": "CodeBuild"},
                "OutputArtifacts": ["Binary"]
            }}}]
        }));
        // a shared resolver would report `Binary` as produced twice
        let first = normalize_properties(&properties).unwrap().into_owned();
        let second = normalize_properties(&properties).unwrap().into_owned();
        assert_eq!(first, second);
    }

    fn checkout(namespace: &str, output: &str) -> serde_json::Value {
        json!({
            "Name": "Checkout",
            "ActionTypeId": {"Category": "Source", "Owner": "AWS", "Provider": "S3", "Version": "1"},
            "OutputArtifacts": [{"Name": output}],
            "Namespace": namespace
        })
    }

    #[test]
    fn native_namespaces_are_not_handed_out_again() {
        let properties = Value::from(json!({
            "ArtifactStore": {"Type": "S3", "Location": "bucket"},
            "Stages": [
                {"Name": "Source", "Actions": [checkout("build-compile", "Source")]},
                {"Name": "Build", "Actions": {"Compile": {
                    "ActionTypeId": {"Category": "Build", "Provider": "CodeBuild"},
                    "InputArtifacts": ["Source"]
                }}}
            ]
        }));

        let result = normalize_properties(&properties).unwrap();
        let stages = result.get("Stages").unwrap().as_array().unwrap();
        let compile = &stages[1].get("Actions").unwrap().as_array().unwrap()[0];
        assert_eq!(compile.get_str(NAMESPACE), Some("build-compile-2"));
        assert_eq!(
            stages[0].get("Actions").unwrap().as_array().unwrap()[0].get_str(NAMESPACE),
            Some("build-compile")
        );
    }

    #[test]
    fn authored_namespace_clashing_with_native_fails() {
        let properties = Value::from(json!({
            "Stages": [
                {"Name": "Source", "Actions": [checkout("source", "Source")]},
                {"Name": "Build", "Actions": {"Compile": {
                    "ActionTypeId": {"Category": "Build", "Provider": "CodeBuild"},
                    "InputArtifacts": ["Source"],
                    "Namespace": "source"
                }}}
            ]
        }));
        let err = normalize_properties(&properties).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)), "{err}");
    }

    #[test]
    fn artifact_of_a_later_native_stage_fails() {
        let properties = Value::from(json!({
            "Stages": [
                {"Name": "Build", "Actions": {"Compile": {
                    "ActionTypeId": {"Category": "Build", "Provider": "CodeBuild"},
                    "InputArtifacts": ["Late"]
                }}},
                {"Name": "Source", "Actions": [checkout("source", "Late")]}
            ]
        }));
        let err = normalize_properties(&properties).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)), "{err}");
    }
}
