//! `AWS::DynamoDB::Table` and `AWS::DynamoDB::GlobalTable`: attribute definitions from key schemas
//!
//! ```yaml
//! KeySchema:
//!   - { AttributeName: pk, KeyType: HASH }
//!   - { AttributeName: created, KeyType: RANGE, AttributeType: N }
//! ```
//! The inline `AttributeType` moves into `AttributeDefinitions`; key attributes nobody typed are
//! strings (`S`).
//!
//! Calls (`Fn::If` & co) in place of an index list, an index or a key schema are opaque: the
//! attributes behind them are the author's to define. Definitions given as a call leave the whole
//! table alone.
use super::ResourceDefinition;
use crate::config::Config;
use crate::dispatch::Call;
use crate::error::{Error, Result};
use crate::value::{Map, Value};
use indexmap::IndexMap;
use std::borrow::Cow;

const KEY_SCHEMA: &str = "KeySchema";
const ATTRIBUTE_DEFINITIONS: &str = "AttributeDefinitions";
const ATTRIBUTE_NAME: &str = "AttributeName";
const ATTRIBUTE_TYPE: &str = "AttributeType";
const INDEXES: [&str; 2] = ["GlobalSecondaryIndexes", "LocalSecondaryIndexes"];
const DEFAULT_TYPE: &str = "S";

pub fn normalize<'a>(resource: &ResourceDefinition<'a>, _config: &Config) -> Result<Cow<'a, Map>> {
    let properties = resource.properties;
    let logical_id = resource.logical_id;

    // existing definitions come first and keep their order
    let mut definitions: IndexMap<&str, &str> = IndexMap::new();
    if let Some(existing) = properties.get(ATTRIBUTE_DEFINITIONS) {
        if is_call(existing) || existing.as_array()?.iter().any(is_call) {
            tracing::trace!(%logical_id, "attribute definitions are computed, table left alone");
            return Ok(Cow::Borrowed(properties));
        }
        for definition in existing.as_array()? {
            let name = required_str(definition, ATTRIBUTE_NAME, logical_id)?;
            let kind = required_str(definition, ATTRIBUTE_TYPE, logical_id)?;
            definitions.insert(name, kind);
        }
    }
    let declared = definitions.len();

    let mut inline_types = false;
    for schema in key_schemas(properties)? {
        for element in schema.as_array()?.iter().filter(|element| !is_call(element)) {
            let name = required_str(element, ATTRIBUTE_NAME, logical_id)?;
            let inline = match element.get(ATTRIBUTE_TYPE) {
                Some(kind) => Some(kind.as_str()?),
                None => None,
            };
            inline_types |= inline.is_some();

            match (definitions.get(name).copied(), inline) {
                (Some(known), Some(inline)) if known != inline => {
                    return Err(Error::invalid(format!(
                        "table `{logical_id}`: attribute `{name}` is declared as both {known} and {inline}"
                    )));
                }
                (Some(_), _) => {}
                (None, inline) => {
                    definitions.insert(name, inline.unwrap_or(DEFAULT_TYPE));
                }
            }
        }
    }

    if !inline_types && definitions.len() == declared {
        return Ok(Cow::Borrowed(properties));
    }

    tracing::trace!(%logical_id, attributes = ?definitions.keys().collect::<Vec<_>>(), "attribute definitions derived");
    let definitions = Value::Array(
        definitions
            .into_iter()
            .map(|(name, kind)| [(ATTRIBUTE_NAME, name), (ATTRIBUTE_TYPE, kind)].into_iter().collect())
            .collect(),
    );

    let mut rewritten = properties.clone();
    if let Some(schema) = rewritten.get_mut(KEY_SCHEMA) {
        strip_types(schema);
    }
    for index_key in INDEXES {
        if let Some(Value::Array(indexes)) = rewritten.get_mut(index_key) {
            for index in indexes {
                if let Some(schema) = index_schema_mut(index) {
                    strip_types(schema);
                }
            }
        }
    }
    rewritten.insert(ATTRIBUTE_DEFINITIONS.to_string(), definitions);

    Ok(Cow::Owned(rewritten))
}

/// Key schema of the table followed by those of its indexes
fn key_schemas(properties: &Map) -> Result<Vec<&Value>> {
    let mut schemas: Vec<&Value> = properties.get(KEY_SCHEMA).into_iter().collect();
    for index_key in INDEXES {
        let Some(indexes) = properties.get(index_key) else {
            continue;
        };
        if is_call(indexes) {
            continue;
        }
        for index in indexes.as_array()?.iter().filter(|index| !is_call(index)) {
            schemas.extend(index.as_object()?.get(KEY_SCHEMA));
        }
    }
    schemas.retain(|schema| !is_call(schema));
    Ok(schemas)
}

fn is_call(value: &Value) -> bool {
    Call::from_node(value).is_some()
}

fn index_schema_mut(index: &mut Value) -> Option<&mut Value> {
    match index {
        Value::Object(index) => index.get_mut(KEY_SCHEMA),
        _ => None,
    }
}

fn strip_types(schema: &mut Value) {
    if let Value::Array(elements) = schema {
        for element in elements {
            if let Value::Object(element) = element {
                element.shift_remove(ATTRIBUTE_TYPE);
            }
        }
    }
}

fn required_str<'a>(value: &'a Value, key: &str, logical_id: &str) -> Result<&'a str> {
    match value.get(key) {
        Some(found) => found.as_str(),
        None => Err(Error::invalid(format!(
            "table `{logical_id}`: attribute without {key}"
        ))),
    }
}
