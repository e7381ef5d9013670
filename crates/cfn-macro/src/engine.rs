//! orchestration of one macro invocation
//!
//! Passes run in a fixed order, each on the output of the previous one:
//! 1. [MatrixSection]: `Matrices` section, registers the matrices for step 4
//! 2. [LogGroupProcessor]: log groups from retention properties
//! 3. [ResourceProcessor]: per type conventions
//! 4. [CallDispatcher]: matrix strings and import placeholders in calls
//!
//! A pass that has nothing to do hands its input back borrowed, so an invocation on a template
//! without any shorthand never copies it.
use crate::config::Config;
use crate::dispatch::CallDispatcher;
use crate::error::Result;
use crate::log_groups::LogGroupProcessor;
use crate::matrix::{MatrixRegistry, MatrixSection};
use crate::normalize::ResourceProcessor;
use crate::value::{Map, Value};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One rewrite of the whole fragment
pub trait Pass {
    fn name(&self) -> &'static str;

    /// [Cow::Borrowed] when the fragment is returned unchanged
    fn apply<'a>(&mut self, fragment: &'a Value) -> Result<Cow<'a, Value>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: String,
    pub fragment: Value,
    #[serde(default)]
    pub template_parameter_values: Map,
}

impl Request {
    pub fn new(request_id: impl Into<String>, fragment: Value) -> Self {
        Self {
            request_id: request_id.into(),
            fragment,
            template_parameter_values: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Response {
    pub fn success(request_id: String, fragment: Value) -> Self {
        Self {
            request_id,
            status: Status::Success,
            fragment: Some(fragment),
            error_message: None,
        }
    }

    pub fn failure(request_id: String, error_message: String) -> Self {
        Self {
            request_id,
            status: Status::Failure,
            fragment: None,
            error_message: Some(error_message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Stateless between invocations; every call to [Engine::process] starts from scratch
#[derive(Debug, Clone, Default, derive_new::new)]
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle a request, failures included
    pub fn process(&self, request: Request) -> Response {
        let span = tracing::info_span!("process", request_id = %request.request_id);
        let _entered = span.enter();
        tracing::debug!(
            parameters = request.template_parameter_values.len(),
            "processing fragment"
        );

        match self.expand(&request.fragment) {
            Ok(fragment) => Response::success(request.request_id, fragment),
            Err(err) => {
                tracing::warn!(%err, "macro invocation failed");
                Response::failure(request.request_id, err.to_string())
            }
        }
    }

    /// Expand every shorthand in `fragment`
    pub fn expand(&self, fragment: &Value) -> Result<Value> {
        self.rewrite(fragment).map(Cow::into_owned)
    }

    /// Like [Engine::expand], but hands back `fragment` itself when nothing changed
    pub fn rewrite<'f>(&self, fragment: &'f Value) -> Result<Cow<'f, Value>> {
        let mut registry = MatrixRegistry::default();

        let document = run(&mut MatrixSection::new(&mut registry), Cow::Borrowed(fragment))?;
        let document = run(&mut LogGroupProcessor::new(&self.config.log_groups), document)?;
        let document = run(&mut ResourceProcessor::new(&self.config), document)?;
        run(&mut CallDispatcher::for_registry(&registry), document)
    }
}

fn run<'f>(pass: &mut dyn Pass, document: Cow<'f, Value>) -> Result<Cow<'f, Value>> {
    let rewritten = match pass.apply(&document)? {
        Cow::Owned(value) => Some(value),
        Cow::Borrowed(_) => None,
    };

    Ok(match rewritten {
        Some(value) => {
            tracing::debug!(pass = pass.name(), "fragment rewritten");
            Cow::Owned(value)
        }
        None => {
            tracing::trace!(pass = pass.name(), "fragment unchanged");
            document
        }
    })
}
