//! IAM policy shorthand
//!
//! ```yaml
//! PolicyDocument:
//!   Statement:
//!     Allow: [s3:GetObject, s3:PutObject]
//!     Resource: "*"
//! AssumeRolePolicyDocument: lambda.amazonaws.com
//! ```
//! expands to statements with `Effect` and `Action`, a `Version` and the usual service
//! `sts:AssumeRole` trust policy.
use super::ResourceDefinition;
use crate::config::Config;
use crate::dispatch::Call;
use crate::error::{Error, Result};
use crate::util::{rewrite_entries, rewrite_items, string_list, with_entry};
use crate::value::{Map, Value};
use std::borrow::Cow;

pub const POLICY_VERSION: &str = "2012-10-17";
const EFFECTS: [&str; 2] = ["Allow", "Deny"];

pub fn normalize<'a>(resource: &ResourceDefinition<'a>, _config: &Config) -> Result<Cow<'a, Map>> {
    let properties = resource.properties;
    let is_role = resource.resource_type == "AWS::IAM::Role";

    let rewritten = rewrite_entries(properties, |key, value| match key {
        "AssumeRolePolicyDocument" if is_role => assume_role_document(value),
        "PolicyDocument" => policy_document(value),
        "Policies" => inline_policies(value),
        _ => Ok(Cow::Borrowed(value)),
    })?;

    Ok(match rewritten {
        Some(properties) => {
            tracing::trace!(logical_id = %resource.logical_id, "policy shorthand expanded");
            Cow::Owned(properties)
        }
        None => Cow::Borrowed(properties),
    })
}

/// `[{PolicyName, PolicyDocument}, ...]` of roles, users and groups
fn inline_policies(policies: &Value) -> Result<Cow<'_, Value>> {
    let Value::Array(items) = policies else {
        return Ok(Cow::Borrowed(policies));
    };

    let rewritten = rewrite_items(items, |policy| match policy {
        Value::Object(map) => match map.get("PolicyDocument") {
            Some(document) => Ok(match policy_document(document)? {
                Cow::Owned(document) => {
                    Cow::Owned(Value::Object(with_entry(map, "PolicyDocument", document)))
                }
                Cow::Borrowed(_) => Cow::Borrowed(policy),
            }),
            None => Ok(Cow::Borrowed(policy)),
        },
        _ => Ok(Cow::Borrowed(policy)),
    })?;

    Ok(match rewritten {
        Some(items) => Cow::Owned(Value::Array(items)),
        None => Cow::Borrowed(policies),
    })
}

pub fn policy_document(document: &Value) -> Result<Cow<'_, Value>> {
    let Value::Object(map) = document else {
        return Ok(Cow::Borrowed(document));
    };
    if Call::from_node(document).is_some() {
        return Ok(Cow::Borrowed(document));
    }

    let statements = match map.get("Statement") {
        Some(single @ Value::Object(_)) if Call::from_node(single).is_none() => {
            Some(Value::Array(vec![statement(single)?.into_owned()]))
        }
        Some(Value::Array(items)) => {
            rewrite_items(items, statement)?.map(Value::Array)
        }
        _ => None,
    };
    let version = (!map.contains_key("Version")).then(|| Value::from(POLICY_VERSION));

    if statements.is_none() && version.is_none() {
        return Ok(Cow::Borrowed(document));
    }

    let mut rewritten = Map::with_capacity(map.len() + 1);
    if let Some(version) = version {
        rewritten.insert("Version".to_string(), version);
    }
    for (key, value) in map {
        rewritten.insert(key.clone(), value.clone());
    }
    if let Some(statements) = statements {
        rewritten.insert("Statement".to_string(), statements);
    }
    Ok(Cow::Owned(Value::Object(rewritten)))
}

/// `{Allow: actions, ...}` -> `{Effect: Allow, Action: [actions], ...}`
fn statement(statement: &Value) -> Result<Cow<'_, Value>> {
    let Value::Object(map) = statement else {
        return Ok(Cow::Borrowed(statement));
    };

    let shorthand: Vec<&str> = EFFECTS
        .into_iter()
        .filter(|effect| map.contains_key(*effect))
        .collect();
    let effect = match shorthand.as_slice() {
        [] => return Ok(Cow::Borrowed(statement)),
        [effect] => *effect,
        _ => {
            return Err(Error::invalid(
                "a policy statement can not use both Allow and Deny",
            ))
        }
    };
    if map.contains_key("Effect") {
        return Err(Error::invalid(format!(
            "a policy statement can not use both Effect and {effect}"
        )));
    }
    if map.contains_key("Action") {
        return Err(Error::invalid(format!(
            "a policy statement can not use both Action and {effect}"
        )));
    }

    let actions: Vec<Value> = string_list(&map[effect])?
        .into_iter()
        .map(Value::from)
        .collect();

    let mut rewritten = Map::with_capacity(map.len() + 1);
    rewritten.insert("Effect".to_string(), effect.into());
    rewritten.insert("Action".to_string(), Value::Array(actions));
    for (key, value) in map {
        if key != effect {
            rewritten.insert(key.clone(), value.clone());
        }
    }
    Ok(Cow::Owned(Value::Object(rewritten)))
}

/// `lambda.amazonaws.com` or a list of services -> trust policy for those services
fn assume_role_document(document: &Value) -> Result<Cow<'_, Value>> {
    let services = match document {
        Value::String(_) | Value::Array(_) => string_list(document)?,
        _ => return policy_document(document),
    };

    let principal: Value = [(
        "Service",
        Value::Array(services.into_iter().map(Value::from).collect()),
    )]
    .into_iter()
    .collect();
    let statement: Value = [
        ("Effect", Value::from("Allow")),
        ("Principal", principal),
        ("Action", Value::Array(vec!["sts:AssumeRole".into()])),
    ]
    .into_iter()
    .collect();

    Ok(Cow::Owned(
        [
            ("Version", Value::from(POLICY_VERSION)),
            ("Statement", Value::Array(vec![statement])),
        ]
        .into_iter()
        .collect(),
    ))
}
