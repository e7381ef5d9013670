//! recursive call expansion
//!
//! A "call" is an object with exactly one key, where that key is one of [CALL_KEYS]
//! (`{"Ref": "Bucket"}`, `{"Fn::Sub": "..."}`, ...).
//!
//! [CallDispatcher] walks the whole fragment bottom-up. Children are rewritten before their
//! parent, so a call only ever sees arguments whose nested calls are already expanded. Every call
//! goes through the [MatrixExpander] first and the [IntrinsicToolkit] second; the resulting call
//! replaces the node.
//!
//! This must be the last pass: earlier passes are free to emit matrix or import notation and rely
//! on it being resolved here.
use crate::engine::Pass;
use crate::error::Result;
use crate::intrinsics::IntrinsicToolkit;
use crate::matrix::{MatrixExpander, MatrixRegistry};
use crate::util::{rewrite_entries, rewrite_items};
use crate::value::{Map, Value};
use std::borrow::Cow;

/// Keys that turn a single-key object into a call
pub const CALL_KEYS: &[&str] = &[
    "Condition",
    "Fn::And",
    "Fn::Base64",
    "Fn::Cidr",
    "Fn::Equals",
    "Fn::FindInMap",
    "Fn::GetAZs",
    "Fn::GetAtt",
    "Fn::If",
    "Fn::ImportValue",
    "Fn::Join",
    "Fn::Not",
    "Fn::Or",
    "Fn::Select",
    "Fn::Split",
    "Fn::Sub",
    "Fn::Transform",
    "Ref",
];

/// A call, borrowed from the document as long as nobody changed it
#[derive(Debug, Clone, PartialEq)]
pub struct Call<'a> {
    pub key: Cow<'a, str>,
    pub argument: Cow<'a, Value>,
}

impl<'a> Call<'a> {
    pub fn borrowed(key: &'a str, argument: &'a Value) -> Self {
        Self {
            key: Cow::Borrowed(key),
            argument: Cow::Borrowed(argument),
        }
    }

    pub fn owned(key: impl Into<String>, argument: Value) -> Self {
        Self {
            key: Cow::Owned(key.into()),
            argument: Cow::Owned(argument),
        }
    }

    /// The call `node` represents, if any
    pub fn from_node(node: &'a Value) -> Option<Self> {
        let Value::Object(map) = node else {
            return None;
        };
        if map.len() != 1 {
            return None;
        }
        let (key, argument) = map.first()?;
        is_call_key(key).then(|| Call::borrowed(key, argument))
    }

    /// Like [Call::from_node] for an owned node; hands the node back if it is no call
    pub fn from_owned(node: Value) -> Result<Call<'static>, Value> {
        if Call::from_node(&node).is_none() {
            return Err(node);
        }
        let Value::Object(map) = node else {
            unreachable!("from_node only accepts objects")
        };
        match map.into_iter().next() {
            Some((key, argument)) => Ok(Call::owned(key, argument)),
            None => unreachable!("from_node only accepts objects with one entry"),
        }
    }

    /// Neither key nor argument were replaced
    pub fn is_unchanged(&self) -> bool {
        matches!(self.key, Cow::Borrowed(_)) && matches!(self.argument, Cow::Borrowed(_))
    }

    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(1);
        map.insert(self.key.into_owned(), self.argument.into_owned());
        Value::Object(map)
    }
}

pub fn is_call_key(key: &str) -> bool {
    CALL_KEYS.binary_search(&key).is_ok()
}

#[derive(derive_new::new)]
pub struct CallDispatcher<'r> {
    matrices: MatrixExpander<'r>,
    intrinsics: IntrinsicToolkit,
}

impl<'r> CallDispatcher<'r> {
    pub fn for_registry(registry: &'r MatrixRegistry) -> Self {
        Self::new(MatrixExpander::new(registry), IntrinsicToolkit)
    }

    /// Rewrite `node` and everything below it
    pub fn transform<'a>(&self, node: &'a Value) -> Result<Cow<'a, Value>> {
        let node = match node {
            Value::Object(map) => match rewrite_entries(map, |_, value| self.transform(value))? {
                Some(map) => Cow::Owned(Value::Object(map)),
                None => Cow::Borrowed(node),
            },
            Value::Array(items) => {
                return Ok(match rewrite_items(items, |item| self.transform(item))? {
                    Some(items) => Cow::Owned(Value::Array(items)),
                    None => Cow::Borrowed(node),
                });
            }
            _ => return Ok(Cow::Borrowed(node)),
        };

        self.expand_node(node)
    }

    fn expand_node<'a>(&self, node: Cow<'a, Value>) -> Result<Cow<'a, Value>> {
        match node {
            Cow::Borrowed(value) => {
                let Some(call) = Call::from_node(value) else {
                    return Ok(Cow::Borrowed(value));
                };
                let call = self.expand_call(call)?;
                Ok(if call.is_unchanged() {
                    Cow::Borrowed(value)
                } else {
                    Cow::Owned(call.into_value())
                })
            }
            Cow::Owned(value) => match Call::from_owned(value) {
                Ok(call) => Ok(Cow::Owned(self.expand_call(call)?.into_value())),
                Err(value) => Ok(Cow::Owned(value)),
            },
        }
    }

    fn expand_call<'a>(&self, call: Call<'a>) -> Result<Call<'a>> {
        let call = self.matrices.expand(call)?;
        if !self.intrinsics.can_handle(&call.key) {
            return Ok(call);
        }
        let call = self.intrinsics.expand(call)?;
        if !call.is_unchanged() {
            tracing::trace!(key = %call.key, "call expanded");
        }
        Ok(call)
    }
}

impl Pass for CallDispatcher<'_> {
    fn name(&self) -> &'static str {
        "calls"
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn apply<'a>(&mut self, fragment: &'a Value) -> Result<Cow<'a, Value>> {
        self.transform(fragment)
    }
}
