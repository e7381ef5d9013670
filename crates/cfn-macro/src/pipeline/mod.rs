//! low-code pipeline stages
//!
//! A stage in shorthand notation names its actions as keys and lists artifacts by name:
//! ```yaml
//! Name: Build
//! Actions:
//!   Compile:
//!     ActionTypeId: { Category: Build, Provider: CodeBuild }
//!     InputArtifacts: [Source]
//!     OutputArtifacts: [Binary]
//!   Test:
//!     ActionTypeId: { Category: Test, Provider: CodeBuild }
//!     InputArtifacts: [Binary]
//! ```
//! There is no `RunOrder` and usually no `Namespace`. [PipelineResolver] collects the actions of all
//! stages of a pipeline, derives the dependency graph from produced and consumed artifacts and
//! compiles run orders (`Compile` = 1, `Test` = 2) and namespaces (`build-compile`,
//! `build-test`) from it.
//!
//! Stages in the backend's native notation (`Actions` as a list) are not touched. They take part
//! in the graph through [PipelineResolver::handle_native_stage]: their outputs feed later stages
//! and their namespaces are off limits.
pub mod namespace;

use crate::error::{Error, Result};
use crate::value::{Map, Value};
use indexmap::{IndexMap, IndexSet};
use namespace::NamespaceTable;
use regex::{Captures, Regex};
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;

pub const ACTION_TYPE_ID: &str = "ActionTypeId";
pub const INPUT_ARTIFACTS: &str = "InputArtifacts";
pub const OUTPUT_ARTIFACTS: &str = "OutputArtifacts";
pub const NAMESPACE: &str = "Namespace";

/// `#{<Stage>:<Action>.<Variable>}`
static ACTION_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\{([^}.:]+:[^}.]+)\.([^}]+)\}").expect("valid variable pattern")
});

/// Category and provider of an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTypeId {
    pub category: String,
    pub owner: String,
    pub provider: String,
    pub version: String,
}

impl ActionTypeId {
    fn parse(action_key: &str, value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::invalid(format!(
                "{ACTION_TYPE_ID} of `{action_key}` must be an object with Category and Provider, found {}",
                value.kind()
            )));
        };

        let field = |name: &str, default: Option<&str>| -> Result<String> {
            match (map.get(name), default) {
                (Some(Value::String(s)), _) => Ok(s.clone()),
                (None, Some(default)) => Ok(default.to_string()),
                (Some(other), _) => Err(Error::invalid(format!(
                    "{ACTION_TYPE_ID}.{name} of `{action_key}` must be a string, found {}",
                    other.kind()
                ))),
                (None, None) => Err(Error::invalid(format!(
                    "{ACTION_TYPE_ID} of `{action_key}` is missing {name}"
                ))),
            }
        };

        Ok(Self {
            category: field("Category", None)?,
            owner: field("Owner", Some("AWS"))?,
            provider: field("Provider", None)?,
            version: field("Version", Some("1"))?,
        })
    }

    pub fn to_value(&self) -> Value {
        [
            ("Category", &self.category),
            ("Owner", &self.owner),
            ("Provider", &self.provider),
            ("Version", &self.version),
        ]
        .into_iter()
        .map(|(key, value)| (key, value.clone()))
        .collect()
    }
}

/// One action of a shorthand stage
#[derive(Debug, Clone)]
pub struct Action {
    pub stage: String,
    /// position of the stage in the pipeline
    pub position: usize,
    pub name: String,
    pub type_id: ActionTypeId,
    pub inputs: IndexSet<String>,
    pub outputs: IndexSet<String>,
}

impl Action {
    pub fn key(&self) -> String {
        action_key(&self.stage, &self.name)
    }
}

pub fn action_key(stage: &str, action: &str) -> String {
    format!("{stage}:{action}")
}

/// Run order and namespace of a compiled action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledAction {
    pub run_order: u32,
    pub namespace: String,
}

/// Result of [PipelineResolver::compile], keyed by `"<stage>:<action>"`
#[derive(Debug, Default)]
pub struct CompiledPipeline {
    actions: IndexMap<String, CompiledAction>,
}

impl CompiledPipeline {
    pub fn get(&self, stage: &str, action: &str) -> Option<&CompiledAction> {
        self.actions.get(&action_key(stage, action))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CompiledAction)> {
        self.actions.iter().map(|(key, action)| (key.as_str(), action))
    }
}

/// Dependency graph over the actions of one pipeline
#[derive(Debug, Default)]
pub struct PipelineResolver {
    stages: Vec<String>,
    /// shorthand and native stages seen so far
    positions: usize,
    actions: Vec<Action>,
    /// artifact -> index of the producing action
    producers: IndexMap<String, usize>,
    /// artifacts produced outside of shorthand stages, with the position of the producing stage
    /// (`None`: available from the start)
    provided: IndexMap<String, Option<usize>>,
    namespaces: NamespaceTable,
}

impl PipelineResolver {
    /// Register a shorthand stage
    ///
    /// `Ok(false)` means the stage is not written in shorthand notation and is none of our
    /// business. Shorthand that is malformed is an error.
    pub fn handle_stage(&mut self, stage: &Value) -> Result<bool> {
        let Some(stage_name) = stage.get_str("Name") else {
            return Ok(false);
        };
        let Some(Value::Object(actions)) = stage.get("Actions") else {
            return Ok(false);
        };
        if actions.is_empty() {
            return Ok(false);
        }

        let untyped: Vec<&str> = actions
            .iter()
            .filter(|(_, action)| action.get(ACTION_TYPE_ID).is_none())
            .map(|(name, _)| name.as_str())
            .collect();
        if untyped.len() == actions.len() {
            tracing::trace!(stage = %stage_name, "stage without action types, skipped");
            return Ok(false);
        }
        if !untyped.is_empty() {
            return Err(Error::invalid(format!(
                "stage `{stage_name}`: actions {untyped:?} have no {ACTION_TYPE_ID}"
            )));
        }
        if self.stages.iter().any(|known| known == stage_name) {
            return Err(Error::invalid(format!(
                "stage `{stage_name}` is declared twice"
            )));
        }

        // parse everything before touching the graph
        let position = self.positions;
        let mut parsed = Vec::with_capacity(actions.len());
        let mut produced: IndexMap<String, String> = IndexMap::new();
        let mut pinned: HashSet<&str> = HashSet::new();
        for (action_name, action) in actions {
            let key = action_key(stage_name, action_name);
            let type_id = match action.get(ACTION_TYPE_ID) {
                Some(type_id) => ActionTypeId::parse(&key, type_id)?,
                None => unreachable!("untyped actions are rejected above"),
            };
            let inputs = artifact_names(&key, action.get(INPUT_ARTIFACTS))?;
            let outputs = artifact_names(&key, action.get(OUTPUT_ARTIFACTS))?;

            for output in &outputs {
                let existing = match self.producers.get(output) {
                    Some(&index) => Some(self.actions[index].key()),
                    None => produced.get(output).cloned(),
                };
                if let Some(existing) = existing {
                    return Err(Error::invalid(format!(
                        "artifact `{output}` is produced by both `{existing}` and `{key}`"
                    )));
                }
                produced.insert(output.clone(), key.clone());
            }

            let namespace = match action.get(NAMESPACE) {
                None => None,
                Some(Value::String(namespace)) => {
                    if self.namespaces.is_taken(namespace) || pinned.contains(namespace.as_str()) {
                        return Err(Error::invalid(format!(
                            "namespace `{namespace}` of `{key}` is already in use"
                        )));
                    }
                    pinned.insert(namespace.as_str());
                    Some(namespace.as_str())
                }
                Some(other) => {
                    return Err(Error::invalid(format!(
                        "{NAMESPACE} of `{key}` must be a string, found {}",
                        other.kind()
                    )))
                }
            };

            parsed.push((
                Action {
                    stage: stage_name.to_string(),
                    position,
                    name: action_name.clone(),
                    type_id,
                    inputs,
                    outputs,
                },
                namespace,
            ));
        }

        self.stages.push(stage_name.to_string());
        self.positions += 1;
        for (action, namespace) in parsed {
            if let Some(namespace) = namespace {
                let pinned = self.namespaces.pin(&action.key(), namespace);
                debug_assert!(pinned, "namespace `{namespace}` was checked to be free");
            }
            let index = self.actions.len();
            for output in &action.outputs {
                self.producers.insert(output.clone(), index);
            }
            tracing::debug!(action = %action.key(), inputs = ?action.inputs, outputs = ?action.outputs, "action registered");
            self.actions.push(action);
        }

        Ok(true)
    }

    /// Register a stage in native notation, one [PipelineResolver::handle_stage] declined
    ///
    /// Its output artifacts become available to the stages after it and the namespaces of its
    /// actions are reserved.
    pub fn handle_native_stage(&mut self, stage: &Value) -> Result<()> {
        let position = self.positions;
        self.positions += 1;
        let stage_name = stage.get_str("Name").unwrap_or_default();

        for action in native_actions(stage) {
            for artifact in native_outputs(action) {
                self.provided
                    .entry(artifact.to_string())
                    .or_insert(Some(position));
            }

            if let Some(Value::String(namespace)) = action.get(NAMESPACE) {
                if !self.namespaces.reserve(namespace) {
                    let key = action_key(stage_name, action.get_str("Name").unwrap_or_default());
                    return Err(Error::invalid(format!(
                        "namespace `{namespace}` of `{key}` is already in use"
                    )));
                }
            }
        }

        tracing::trace!(stage = %stage_name, position, "native stage registered");
        Ok(())
    }

    /// Declare an artifact that is produced outside of the pipeline's stages
    pub fn provide_artifact(&mut self, name: impl Into<String>) {
        self.provided.insert(name.into(), None);
    }

    /// Compute run orders and namespaces of every registered action
    ///
    /// Actions are ordered topologically (Kahn's algorithm, ties broken by registration order).
    /// Within a stage an action runs after all same-stage actions it consumes artifacts from;
    /// independent actions share a run order.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn compile(&mut self) -> Result<CompiledPipeline> {
        let dependencies = self.dependencies()?;
        let order = self.topological_order(&dependencies)?;

        let mut run_orders = vec![1u32; self.actions.len()];
        for &index in &order {
            let action = &self.actions[index];
            for input in &action.inputs {
                if self.producers.contains_key(input) {
                    continue;
                }
                if let Some(Some(position)) = self.provided.get(input) {
                    if *position > action.position {
                        return Err(Error::invalid(format!(
                            "`{}` consumes artifact `{input}`, which is produced in a later stage",
                            action.key()
                        )));
                    }
                }
            }

            let mut run_order = 1;
            for &dependency in &dependencies[index] {
                let producer = &self.actions[dependency];
                if producer.position > action.position {
                    return Err(Error::invalid(format!(
                        "`{}` consumes an artifact of `{}`, which runs in a later stage",
                        action.key(),
                        producer.key()
                    )));
                }
                if producer.stage == action.stage {
                    run_order = run_order.max(run_orders[dependency] + 1);
                }
            }
            run_orders[index] = run_order;
        }

        let mut compiled = CompiledPipeline::default();
        for (index, action) in self.actions.iter().enumerate() {
            let key = action.key();
            let namespace = self.namespaces.resolve(&key);
            compiled.actions.insert(
                key,
                CompiledAction {
                    run_order: run_orders[index],
                    namespace,
                },
            );
        }

        tracing::debug!(actions = compiled.actions.len(), "pipeline compiled");
        Ok(compiled)
    }

    /// Namespace for `"<stage>:<action>"`, assigned on first request
    pub fn resolve_namespace(&mut self, key: &str) -> String {
        self.namespaces.resolve(key)
    }

    /// Namespace previously assigned to `"<stage>:<action>"`
    pub fn resolve(&self, name: &str) -> Result<String> {
        self.namespaces
            .get(name)
            .map(str::to_string)
            .ok_or_else(|| Error::UnknownReference(name.to_string()))
    }

    /// Rewrite `#{<Stage>:<Action>.<Variable>}` to `#{<namespace>.<Variable>}`
    ///
    /// `None` when `text` holds no such reference.
    pub fn rewrite_variables(&self, text: &str) -> Result<Option<String>> {
        if !ACTION_VARIABLE.is_match(text) {
            return Ok(None);
        }

        let mut failure = None;
        let rewritten = ACTION_VARIABLE.replace_all(text, |captures: &Captures| {
            match self.resolve(&captures[1]) {
                Ok(namespace) => format!("#{{{namespace}.{}}}", &captures[2]),
                Err(err) => {
                    failure.get_or_insert(err);
                    captures[0].to_string()
                }
            }
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(Some(rewritten.into_owned())),
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Index of the producing action for every input
    fn dependencies(&self) -> Result<Vec<Vec<usize>>> {
        let mut dependencies = Vec::with_capacity(self.actions.len());
        for action in &self.actions {
            let mut producers: IndexSet<usize> = IndexSet::new();
            for input in &action.inputs {
                match self.producers.get(input) {
                    Some(&producer) => {
                        producers.insert(producer);
                    }
                    None if self.provided.contains_key(input) => {}
                    None => {
                        return Err(Error::MissingArtifact {
                            artifact: input.clone(),
                            action: action.key(),
                        })
                    }
                }
            }
            dependencies.push(producers.into_iter().collect());
        }
        Ok(dependencies)
    }

    fn topological_order(&self, dependencies: &[Vec<usize>]) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.actions.len()];
        for (index, producers) in dependencies.iter().enumerate() {
            for &producer in producers {
                dependents[producer].push(index);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.actions.len())
            .filter(|&index| in_degree[index] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.actions.len());
        while let Some(current) = queue.pop_front() {
            order.push(current);
            for &dependent in &dependents[current] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != self.actions.len() {
            let actions = (0..self.actions.len())
                .filter(|index| in_degree[*index] > 0)
                .map(|index| self.actions[index].key())
                .collect();
            return Err(Error::CircularDependency { actions });
        }

        Ok(order)
    }
}

/// Actions of a native stage, a list or (untyped) an object
fn native_actions(stage: &Value) -> Vec<&Value> {
    match stage.get("Actions") {
        Some(Value::Array(actions)) => actions.iter().collect(),
        Some(Value::Object(actions)) => actions.values().collect(),
        _ => vec![],
    }
}

fn native_outputs(action: &Value) -> Vec<&str> {
    match action.get(OUTPUT_ARTIFACTS) {
        Some(Value::Array(outputs)) => outputs
            .iter()
            .filter_map(|output| match output {
                Value::String(name) => Some(name.as_str()),
                other => other.get_str("Name"),
            })
            .collect(),
        _ => vec![],
    }
}

/// Artifact names from `[name, ...]` or the native `[{Name: name}, ...]`
fn artifact_names(action_key: &str, value: Option<&Value>) -> Result<IndexSet<String>> {
    let Some(value) = value else {
        return Ok(IndexSet::new());
    };
    let invalid = || {
        Error::invalid(format!(
            "artifacts of `{action_key}` must be a list of names"
        ))
    };

    let Value::Array(items) = value else {
        return Err(invalid());
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(name) => Ok(name.clone()),
            Value::Object(_) => item.get_str("Name").map(str::to_string).ok_or_else(invalid),
            _ => Err(invalid()),
        })
        .collect()
}

/// `[{Name: a}, {Name: b}]`
pub fn artifact_list(names: &IndexSet<String>) -> Value {
    Value::Array(
        names
            .iter()
            .map(|name| {
                let mut artifact = Map::new();
                artifact.insert("Name".to_string(), name.as_str().into());
                Value::Object(artifact)
            })
            .collect(),
    )
}
