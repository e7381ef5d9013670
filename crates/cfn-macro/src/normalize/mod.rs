//! per resource type conventions
//!
//! [ResourceProcessor] hands the `Properties` of every resource to the normalizer registered for
//! its `Type` and puts the result back in place. Resources of other types pass through untouched.
pub mod codebuild;
pub mod codepipeline;
pub mod dynamodb;
pub mod iam;

use crate::config::Config;
use crate::engine::Pass;
use crate::error::{Error, Result};
use crate::util::{rewrite_entries, string_list, with_entry};
use crate::value::{empty_object, Map, Value};
use std::borrow::Cow;

/// Borrowed view of one entry of the `Resources` section
#[derive(Debug, Clone)]
pub struct ResourceDefinition<'a> {
    pub logical_id: &'a str,
    pub resource_type: &'a str,
    pub condition: Option<&'a str>,
    pub depends_on: Vec<&'a str>,
    pub properties: &'a Map,
}

impl<'a> ResourceDefinition<'a> {
    pub fn from_entry(logical_id: &'a str, resource: &'a Value) -> Result<Self> {
        let resource = resource.as_object()?;
        let resource_type = match resource.get("Type") {
            Some(resource_type) => resource_type.as_str()?,
            None => {
                return Err(Error::invalid(format!(
                    "resource `{logical_id}` has no Type"
                )))
            }
        };

        Ok(Self {
            logical_id,
            resource_type,
            condition: resource.get("Condition").map(Value::as_str).transpose()?,
            depends_on: resource
                .get("DependsOn")
                .map(string_list)
                .transpose()?
                .unwrap_or_default(),
            properties: match resource.get("Properties") {
                Some(properties) => properties.as_object()?,
                None => empty_object(),
            },
        })
    }
}

/// Rewrites the properties of one resource type, borrowed when there is nothing to do
pub type Normalize = for<'a> fn(&ResourceDefinition<'a>, &Config) -> Result<Cow<'a, Map>>;

/// Registered normalizers, sorted by type
const NORMALIZERS: &[(&str, Normalize)] = &[
    ("AWS::CodeBuild::Project", codebuild::normalize),
    ("AWS::CodePipeline::Pipeline", codepipeline::normalize),
    ("AWS::DynamoDB::GlobalTable", dynamodb::normalize),
    ("AWS::DynamoDB::Table", dynamodb::normalize),
    ("AWS::IAM::Group", iam::normalize),
    ("AWS::IAM::ManagedPolicy", iam::normalize),
    ("AWS::IAM::Policy", iam::normalize),
    ("AWS::IAM::Role", iam::normalize),
    ("AWS::IAM::User", iam::normalize),
];

pub fn normalizer_for(resource_type: &str) -> Option<Normalize> {
    NORMALIZERS
        .binary_search_by_key(&resource_type, |(registered, _)| *registered)
        .ok()
        .map(|index| NORMALIZERS[index].1)
}

/// Delegates every resource to its [Normalize] function
#[derive(derive_new::new)]
pub struct ResourceProcessor<'c> {
    config: &'c Config,
}

impl ResourceProcessor<'_> {
    fn process<'a>(&self, logical_id: &'a str, resource: &'a Value) -> Result<Cow<'a, Value>> {
        let Some(normalize) = resource.get_str("Type").and_then(normalizer_for) else {
            return Ok(Cow::Borrowed(resource));
        };

        let definition = ResourceDefinition::from_entry(logical_id, resource)?;
        match normalize(&definition, self.config)? {
            Cow::Borrowed(_) => Ok(Cow::Borrowed(resource)),
            Cow::Owned(properties) => {
                tracing::trace!(%logical_id, resource_type = %definition.resource_type, "resource normalized");
                Ok(Cow::Owned(Value::Object(with_entry(
                    resource.as_object()?,
                    "Properties",
                    properties.into(),
                ))))
            }
        }
    }
}

impl Pass for ResourceProcessor<'_> {
    fn name(&self) -> &'static str {
        "resources"
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn apply<'a>(&mut self, fragment: &'a Value) -> Result<Cow<'a, Value>> {
        let root = fragment.as_object()?;
        let Some(resources) = root.get("Resources") else {
            return Ok(Cow::Borrowed(fragment));
        };

        let rewritten = rewrite_entries(resources.as_object()?, |logical_id, resource| {
            self.process(logical_id, resource)
        })?;

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
