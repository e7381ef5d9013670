//! `${Import:Name}` placeholders in `Fn::Sub`
//!
//! ```yaml
//! Fn::Sub: "https://${Import:ApiHost}/v1"
//! ```
//! becomes
//! ```yaml
//! Fn::Sub:
//!   - "https://${import0}/v1"
//!   - import0: { Fn::ImportValue: ApiHost }
//! ```
//! Generated keys are numbered per expansion, starting after the `import<N>` keys already present
//! in the substitution mapping.
use crate::dispatch::Call;
use crate::error::Result;
use crate::value::{Map, Value};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

static IMPORT_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{Import:([^}]+)\}").expect("valid import pattern"));

static GENERATED_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\d+$").expect("valid key pattern"));

pub const SUB: &str = "Fn::Sub";
pub const IMPORT_VALUE: &str = "Fn::ImportValue";

#[derive(Debug, Clone, Copy, Default)]
pub struct IntrinsicToolkit;

impl IntrinsicToolkit {
    pub fn can_handle(&self, key: &str) -> bool {
        key == SUB
    }

    /// Hoist import placeholders of a `Fn::Sub` call into its substitution mapping
    ///
    /// Returns the call untouched when there is nothing to hoist or the argument has a shape
    /// `Fn::Sub` does not accept.
    pub fn expand<'a>(&self, call: Call<'a>) -> Result<Call<'a>> {
        if !self.can_handle(&call.key) {
            return Ok(call);
        }

        let hoisted = match call.argument.as_ref() {
            Value::String(template) => hoist_imports(template, &Map::new()),
            Value::Array(items) => match items.as_slice() {
                [Value::String(template), Value::Object(params)] => hoist_imports(template, params),
                _ => None,
            },
            _ => None,
        };

        Ok(match hoisted {
            Some((template, params)) => Call {
                key: call.key,
                argument: Cow::Owned(Value::Array(vec![template.into(), params.into()])),
            },
            None => call,
        })
    }
}

fn hoist_imports(template: &str, params: &Map) -> Option<(String, Map)> {
    if !IMPORT_PLACEHOLDER.is_match(template) {
        return None;
    }

    let mut params = params.clone();
    let mut next = params.keys().filter(|key| GENERATED_KEY.is_match(key)).count();
    let mut hoisted: HashMap<String, String> = HashMap::new();

    let rewritten = IMPORT_PLACEHOLDER.replace_all(template, |captures: &Captures| {
        let name = &captures[1];
        if let Some(key) = hoisted.get(name) {
            return format!("${{{key}}}");
        }

        let key = match existing_key(&params, name) {
            Some(key) => key,
            None => {
                let key = loop {
                    let candidate = format!("import{next}");
                    next += 1;
                    if !params.contains_key(&candidate) {
                        break candidate;
                    }
                };
                tracing::debug!(%name, %key, "import hoisted");
                params.insert(key.clone(), import_value(name));
                key
            }
        };

        let placeholder = format!("${{{key}}}");
        hoisted.insert(name.to_string(), key);
        placeholder
    });

    Some((rewritten.into_owned(), params))
}

/// Generated key that already imports `name`
fn existing_key(params: &Map, name: &str) -> Option<String> {
    let wanted = import_value(name);
    params
        .iter()
        .find(|(key, value)| GENERATED_KEY.is_match(key) && **value == wanted)
        .map(|(key, _)| key.clone())
}

fn import_value(name: &str) -> Value {
    [(IMPORT_VALUE, name)].into_iter().collect()
}
