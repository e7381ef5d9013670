//! log groups from a retention property
//!
//! ```yaml
//! Function:
//!   Type: AWS::Lambda::Function
//!   Properties:
//!     LogRetentionInDays: 14
//! ```
//! The property is not known to the backend. It is removed and a `FunctionLogGroup` resource
//! owning the function's log group (`/aws/lambda/${Function}`) with that retention is added
//! right after the function.
use crate::config::LogGroupConfig;
use crate::engine::Pass;
use crate::error::{Error, Result};
use crate::intrinsics::SUB;
use crate::util::with_entry;
use crate::value::{Map, Value};
use std::borrow::Cow;

pub const LOG_GROUP_TYPE: &str = "AWS::Logs::LogGroup";

#[derive(derive_new::new)]
pub struct LogGroupProcessor<'c> {
    config: &'c LogGroupConfig,
}

impl LogGroupProcessor<'_> {
    fn retention<'a>(&self, resource: &'a Value) -> Option<&'a Value> {
        resource
            .get("Properties")
            .and_then(|properties| properties.get(&self.config.retention_property))
    }

    /// Owner without the retention property, and its log group
    fn synthesize(&self, logical_id: &str, resource: &Value, retention: &Value) -> Result<(Value, Value)> {
        let resource = resource.as_object()?;
        let resource_type = resource.get("Type").map(Value::as_str).transpose()?.unwrap_or_default();
        let Some(prefix) = self.config.prefixes.get(resource_type) else {
            return Err(Error::invalid(format!(
                "resource `{logical_id}` of type `{resource_type}` has {} but no log group prefix is known for its type",
                self.config.retention_property
            )));
        };

        let mut properties = resource
            .get("Properties")
            .map(Value::object_or_empty)
            .cloned()
            .unwrap_or_default();
        properties.shift_remove(&self.config.retention_property);
        let owner = with_entry(resource, "Properties", properties.into());

        let name: Value = [(SUB, format!("{prefix}${{{logical_id}}}"))].into_iter().collect();
        let log_group_properties: Value = [
            ("LogGroupName", name),
            ("RetentionInDays", retention.clone()),
        ]
        .into_iter()
        .collect();

        let mut log_group = Map::new();
        log_group.insert("Type".to_string(), LOG_GROUP_TYPE.into());
        if let Some(condition) = resource.get("Condition") {
            log_group.insert("Condition".to_string(), condition.clone());
        }
        log_group.insert("Properties".to_string(), log_group_properties);

        Ok((owner.into(), log_group.into()))
    }
}

impl Pass for LogGroupProcessor<'_> {
    fn name(&self) -> &'static str {
        "log-groups"
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn apply<'a>(&mut self, fragment: &'a Value) -> Result<Cow<'a, Value>> {
        let root = fragment.as_object()?;
        let Some(resources) = root.get("Resources") else {
            return Ok(Cow::Borrowed(fragment));
        };
        let resources = resources.as_object()?;

        let mut rewritten: Option<Map> = None;
        for (index, (logical_id, resource)) in resources.iter().enumerate() {
            let Some(retention) = self.retention(resource) else {
                if let Some(out) = rewritten.as_mut() {
                    out.insert(logical_id.clone(), resource.clone());
                }
                continue;
            };

            let log_group_id = format!("{logical_id}LogGroup");
            let out = rewritten.get_or_insert_with(|| {
                resources
                    .iter()
                    .take(index)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            });
            if resources.contains_key(&log_group_id) || out.contains_key(&log_group_id) {
                return Err(Error::invalid(format!(
                    "log group `{log_group_id}` for `{logical_id}` collides with an existing resource"
                )));
            }

            let (owner, log_group) = self.synthesize(logical_id, resource, retention)?;
            tracing::debug!(%logical_id, %log_group_id, "log group added");
            out.insert(logical_id.clone(), owner);
            out.insert(log_group_id, log_group);
        }

        Ok(match rewritten {
            Some(resources) => Cow::Owned(Value::Object(with_entry(
                root,
                "Resources",
                resources.into(),
            ))),
            None => Cow::Borrowed(fragment),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn apply(document: &Value) -> Result<Value> {
        let config = LogGroupConfig::default();
        LogGroupProcessor::new(&config)
            .apply(document)
            .map(Cow::into_owned)
    }

    #[test]
    fn adds_log_group_after_owner() {
        let document = Value::from(json!({
            "Resources": {
                "Function": {
                    "Type": "AWS::Lambda::Function",
                    "Condition": "Enabled",
                    "Properties": {"Runtime": "provided.al2023", "LogRetentionInDays": 14}
                },
                "Project": {
                    "Type": "AWS::CodeBuild::Project",
                    "Properties": {"LogRetentionInDays": {"Ref": "Retention"}}
                },
                "Bucket": {"Type": "AWS::S3::Bucket"}
            }
        }));

        assert_eq!(
            apply(&document).unwrap(),
            Value::from(json!({
                "Resources": {
                    "Function": {
                        "Type": "AWS::Lambda::Function",
                        "Condition": "Enabled",
                        "Properties": {"Runtime": "provided.al2023"}
                    },
                    "FunctionLogGroup": {
                        "Type": "AWS::Logs::LogGroup",
                        "Condition": "Enabled",
                        "Properties": {
                            "LogGroupName": {"Fn::Sub": "/aws/lambda/${Function}"},
                            "RetentionInDays": 14
                        }
                    },
                    "Project": {
                        "Type": "AWS::CodeBuild::Project",
                        "Properties": {}
                    },
                    "ProjectLogGroup": {
                        "Type": "AWS::Logs::LogGroup",
                        "Properties": {
                            "LogGroupName": {"Fn::Sub": "/aws/codebuild/${Project}"},
                            "RetentionInDays": {"Ref": "Retention"}
                        }
                    },
                    "Bucket": {"Type": "AWS::S3::Bucket"}
                }
            }))
        );
    }

    #[test]
    fn nothing_to_do_is_identity() {
        let document = Value::from(json!({
            "Resources": {"Function": {"Type": "AWS::Lambda::Function", "Properties": {"Runtime": "python3.12"}}}
        }));
        let config = LogGroupConfig::default();
        let result = LogGroupProcessor::new(&config).apply(&document).unwrap();
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn unknown_type_fails() {
        let document = Value::from(json!({
            "Resources": {"Queue": {"Type": "AWS::SQS::Queue", "Properties": {"LogRetentionInDays": 7}}}
        }));
        assert!(matches!(apply(&document), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn existing_log_group_fails() {
        let document = Value::from(json!({
            "Resources": {
                "Function": {"Type": "AWS::Lambda::Function", "Properties": {"LogRetentionInDays": 7}},
                "FunctionLogGroup": {"Type": "AWS::Logs::LogGroup"}
            }
        }));
        assert!(matches!(apply(&document), Err(Error::InvalidConfiguration(_))));
    }
}
