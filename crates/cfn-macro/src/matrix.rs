//! matrix fan-out
//!
//! A matrix is a named enumeration of values of one template parameter, declared in the top-level
//! `Matrices` section:
//! ```yaml
//! Matrices:
//!   Env:
//!     Parameter: Stage
//!     Values: [dev, prod]   # defaults to Parameters.Stage.AllowedValues
//! ```
//!
//! [MatrixSection] (the first pass of an invocation) turns the declaration into one condition per
//! value (`MatrixEnvDev`, `MatrixEnvProd`), fans out every resource tagged `Matrix: Env` into one
//! conditional copy per value (`QueueDev`, `QueueProd`) and registers the matrix in the
//! invocation's [MatrixRegistry].
//!
//! Strings of the form `Matrix:<Name>[<key>=<value>,...]` are later picked up by the
//! [MatrixExpander] when they are the argument of a `Ref` or `Fn::Sub` call:
//!
//! | call | arguments | result |
//! |------|-----------|--------|
//! | `Ref: Matrix:Env[Resource=Queue]` | `Resource` | `Fn::If: [MatrixEnvDev, {Ref: QueueDev}, {Ref: QueueProd}]` |
//! | `Fn::Sub: Matrix:Env[Prefix=app-]` | `Prefix`, `Suffix` | `Fn::Sub: ["app-${MatrixEnv}", {MatrixEnv: {Fn::If: [MatrixEnvDev, dev, prod]}}]` |
//!
//! The last value of a matrix is the fallback branch of the generated conditional.
use crate::dispatch::Call;
use crate::engine::Pass;
use crate::error::{Error, Result};
use crate::intrinsics::SUB;
use crate::util::{pascal_case, string_list};
use crate::value::{Map, Value};
use indexmap::IndexMap;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static MATRIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Matrix:([A-Za-z0-9]+)\[(.*)\]$").expect("valid matrix pattern")
});

pub const MATRICES: &str = "Matrices";
/// Resource-level key requesting fan-out
pub const MATRIX_KEY: &str = "Matrix";
const REF: &str = "Ref";
const IF: &str = "Fn::If";

/// Arguments of a matrix string, in written order
pub type MatrixArgs = IndexMap<String, String>;

/// The call a matrix string appears in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    Ref,
    Sub,
}

/// Produces the call that replaces a matrix string
pub trait MatrixGenerator: std::fmt::Debug {
    fn generate(&self, style: CallStyle, args: &MatrixArgs) -> Result<Call<'static>>;
}

/// Matrices known to one invocation
#[derive(Debug, Default)]
pub struct MatrixRegistry {
    generators: IndexMap<String, Box<dyn MatrixGenerator>>,
}

impl MatrixRegistry {
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        generator: impl MatrixGenerator + 'static,
    ) -> Option<Box<dyn MatrixGenerator>> {
        self.generators.insert(name.into(), Box::new(generator))
    }

    pub fn get(&self, name: &str) -> Option<&dyn MatrixGenerator> {
        self.generators.get(name).map(|generator| &**generator)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }
}

/// A matrix declared in the `Matrices` section
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct DimensionMatrix {
    pub name: String,
    pub values: Vec<String>,
}

impl DimensionMatrix {
    /// Condition that holds when the matrix parameter equals `value`
    pub fn condition(&self, value: &str) -> String {
        format!("Matrix{}{}", self.name, pascal_case(value))
    }

    /// Substitution variable used by `Fn::Sub` expansions
    pub fn variable(&self) -> String {
        format!("Matrix{}", self.name)
    }

    /// Nested `Fn::If` picking `branch(value)` for the active value
    fn select(&self, branch: impl Fn(&str) -> Value) -> Result<Value> {
        let mut values = self.values.iter().rev();
        let Some(last) = values.next() else {
            return Err(Error::invalid(format!("matrix `{}` has no values", self.name)));
        };

        let mut selected = branch(last);
        for value in values {
            let arguments = vec![Value::from(self.condition(value)), branch(value), selected];
            selected = [(IF, Value::Array(arguments))].into_iter().collect();
        }
        Ok(selected)
    }

    fn check_args(&self, args: &MatrixArgs, allowed: &[&str]) -> Result<()> {
        match args.keys().find(|key| !allowed.contains(&key.as_str())) {
            Some(key) => Err(Error::InvalidMatrixArguments {
                matrix: self.name.clone(),
                reason: format!("unsupported argument `{key}`, expected one of {allowed:?}"),
            }),
            None => Ok(()),
        }
    }
}

impl MatrixGenerator for DimensionMatrix {
    fn generate(&self, style: CallStyle, args: &MatrixArgs) -> Result<Call<'static>> {
        match style {
            CallStyle::Ref => {
                self.check_args(args, &["Resource"])?;
                let prefix = args.get("Resource").ok_or_else(|| Error::InvalidMatrixArguments {
                    matrix: self.name.clone(),
                    reason: "`Resource` is required in a Ref".to_string(),
                })?;

                let reference = |value: &str| -> Value {
                    [(REF, format!("{prefix}{}", pascal_case(value)))]
                        .into_iter()
                        .collect()
                };
                Call::from_owned(self.select(reference)?).map_err(|node| {
                    Error::invalid(format!(
                        "matrix `{}` produced {} instead of a call",
                        self.name,
                        node.kind()
                    ))
                })
            }
            CallStyle::Sub => {
                self.check_args(args, &["Prefix", "Suffix"])?;
                let prefix = args.get("Prefix").map(String::as_str).unwrap_or_default();
                let suffix = args.get("Suffix").map(String::as_str).unwrap_or_default();
                let variable = self.variable();

                let template = format!("{prefix}${{{variable}}}{suffix}");
                let mut params = Map::new();
                params.insert(variable, self.select(|value| Value::from(value))?);

                Ok(Call::owned(
                    SUB,
                    Value::Array(vec![template.into(), params.into()]),
                ))
            }
        }
    }
}

/// Resolves matrix strings against a registry
#[derive(Debug, derive_new::new)]
pub struct MatrixExpander<'r> {
    registry: &'r MatrixRegistry,
}

impl MatrixExpander<'_> {
    /// Replace a call whose argument is a matrix string
    ///
    /// Anything that is not a string, or a string that is not a matrix string, is handed back
    /// untouched.
    pub fn expand<'a>(&self, call: Call<'a>) -> Result<Call<'a>> {
        let Value::String(text) = call.argument.as_ref() else {
            return Ok(call);
        };
        let Some(captures) = MATRIX_PATTERN.captures(text) else {
            return Ok(call);
        };

        let name = &captures[1];
        let generator = self
            .registry
            .get(name)
            .ok_or_else(|| Error::UnknownMatrix(name.to_string()))?;

        let style = match &*call.key {
            REF => CallStyle::Ref,
            SUB => CallStyle::Sub,
            other => {
                return Err(Error::invalid(format!(
                    "`{text}` can not be used in {other}, only in {REF} and {SUB}"
                )))
            }
        };

        let args = parse_args(name, &captures[2])?;
        let expanded = generator.generate(style, &args)?;
        tracing::debug!(matrix = %name, ?style, "matrix expanded");
        Ok(expanded)
    }
}

fn parse_args(matrix: &str, raw: &str) -> Result<MatrixArgs> {
    let mut args = MatrixArgs::new();
    if raw.trim().is_empty() {
        return Ok(args);
    }

    for segment in raw.split(',') {
        let invalid = |reason: String| Error::InvalidMatrixArguments {
            matrix: matrix.to_string(),
            reason,
        };

        let Some((key, value)) = segment.split_once('=') else {
            return Err(invalid(format!("`{segment}` is not a key=value pair")));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(invalid(format!("`{segment}` has an empty key")));
        }
        if args.insert(key.to_string(), value.trim().to_string()).is_some() {
            return Err(invalid(format!("`{key}` given twice")));
        }
    }

    Ok(args)
}

/// Expands the `Matrices` section and registers its matrices
#[derive(derive_new::new)]
pub struct MatrixSection<'r> {
    registry: &'r mut MatrixRegistry,
}

impl Pass for MatrixSection<'_> {
    fn name(&self) -> &'static str {
        "matrices"
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn apply<'a>(&mut self, fragment: &'a Value) -> Result<Cow<'a, Value>> {
        let root = fragment.as_object()?;
        let Some(section) = root.get(MATRICES) else {
            let tagged = root
                .get("Resources")
                .map(Value::object_or_empty)
                .and_then(|resources| resources.values().find_map(|r| r.get_str(MATRIX_KEY)));
            return match tagged {
                Some(name) => Err(Error::UnknownMatrix(name.to_string())),
                None => Ok(Cow::Borrowed(fragment)),
            };
        };

        let parameters = root.get("Parameters").map(Value::object_or_empty);
        let mut conditions = match root.get("Conditions") {
            Some(conditions) => conditions.as_object()?.clone(),
            None => Map::new(),
        };

        let mut matrices: IndexMap<&str, DimensionMatrix> = IndexMap::new();
        for (name, declaration) in section.as_object()? {
            let matrix = declare(name, declaration, parameters)?;
            if self.registry.contains(name) {
                return Err(Error::invalid(format!("matrix `{name}` is declared twice")));
            }

            for value in &matrix.values {
                let condition = matrix.condition(value);
                if conditions.contains_key(&condition) {
                    return Err(Error::invalid(format!(
                        "condition `{condition}` of matrix `{name}` already exists"
                    )));
                }
                let parameter = declaration.get_str("Parameter").unwrap_or_default();
                let equals = vec![
                    [(REF, parameter)].into_iter().collect::<Value>(),
                    Value::from(value.as_str()),
                ];
                conditions.insert(condition, [("Fn::Equals", equals)].into_iter().collect());
            }

            tracing::debug!(matrix = %name, values = ?matrix.values, "matrix declared");
            matrices.insert(name, matrix);
        }

        let mut resources = match root.get("Resources") {
            Some(resources) => Some(fan_out(resources.as_object()?, &matrices)?),
            None => None,
        };

        let mut rewritten = Map::with_capacity(root.len() + 1);
        let mut conditions = Some(conditions);
        for (key, value) in root {
            match key.as_str() {
                MATRICES => {}
                "Conditions" => {
                    if let Some(conditions) = conditions.take() {
                        rewritten.insert(key.clone(), conditions.into());
                    }
                }
                "Resources" => {
                    if let Some(conditions) = conditions.take() {
                        rewritten.insert("Conditions".to_string(), conditions.into());
                    }
                    if let Some(resources) = resources.take() {
                        rewritten.insert(key.clone(), resources.into());
                    }
                }
                _ => {
                    rewritten.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(conditions) = conditions {
            rewritten.insert("Conditions".to_string(), conditions.into());
        }

        for (name, matrix) in matrices {
            self.registry.insert(name, matrix);
        }

        Ok(Cow::Owned(rewritten.into()))
    }
}

fn declare(name: &str, declaration: &Value, parameters: Option<&Map>) -> Result<DimensionMatrix> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::invalid(format!(
            "matrix name `{name}` must be alphanumeric"
        )));
    }

    let declaration = declaration.as_object()?;
    let Some(parameter) = declaration.get("Parameter").and_then(|p| p.as_str().ok()) else {
        return Err(Error::invalid(format!(
            "matrix `{name}` needs a `Parameter` name"
        )));
    };

    let values = match declaration.get("Values") {
        Some(values) => string_list(values)?,
        None => match parameters
            .and_then(|parameters| parameters.get(parameter))
            .and_then(|parameter| parameter.get("AllowedValues"))
        {
            Some(allowed) => string_list(allowed)?,
            None => vec![],
        },
    };
    if values.is_empty() {
        return Err(Error::invalid(format!(
            "matrix `{name}` has no values: add `Values` or `AllowedValues` to parameter `{parameter}`"
        )));
    }

    let matrix = DimensionMatrix::new(
        name.to_string(),
        values.into_iter().map(str::to_string).collect(),
    );

    let mut variants: Vec<String> = matrix.values.iter().map(|v| pascal_case(v)).collect();
    variants.sort();
    if let Some(pair) = variants.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(Error::invalid(format!(
            "values of matrix `{name}` collide on variant `{}`",
            pair[0]
        )));
    }

    Ok(matrix)
}

/// Replace every resource tagged with a matrix by one conditional copy per value
fn fan_out(resources: &Map, matrices: &IndexMap<&str, DimensionMatrix>) -> Result<Map> {
    let mut fanned = Map::with_capacity(resources.len());
    for (logical_id, resource) in resources {
        let Some(matrix_name) = resource.get(MATRIX_KEY) else {
            fanned.insert(logical_id.clone(), resource.clone());
            continue;
        };

        let matrix_name = matrix_name.as_str()?;
        let matrix = matrices
            .get(matrix_name)
            .ok_or_else(|| Error::UnknownMatrix(matrix_name.to_string()))?;
        if resource.get("Condition").is_some() {
            return Err(Error::invalid(format!(
                "resource `{logical_id}` uses matrix `{matrix_name}` and can not declare its own Condition"
            )));
        }

        for value in &matrix.values {
            let copy_id = format!("{logical_id}{}", pascal_case(value));
            if resources.contains_key(&copy_id) || fanned.contains_key(&copy_id) {
                return Err(Error::invalid(format!(
                    "matrix copy `{copy_id}` of `{logical_id}` collides with an existing resource"
                )));
            }

            let mut copy = resource.as_object()?.clone();
            copy.shift_remove(MATRIX_KEY);
            copy.insert("Condition".to_string(), matrix.condition(value).into());
            tracing::trace!(%logical_id, %copy_id, "resource fanned out");
            fanned.insert(copy_id, copy.into());
        }
    }
    Ok(fanned)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn env_registry(values: &[&str]) -> MatrixRegistry {
        let mut registry = MatrixRegistry::default();
        registry.insert(
            "Env",
            DimensionMatrix::new(
                "Env".to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            ),
        );
        registry
    }

    fn expand(registry: &MatrixRegistry, key: &str, argument: &str) -> Result<Value> {
        let argument = Value::from(argument);
        MatrixExpander::new(registry)
            .expand(Call::borrowed(key, &argument))
            .map(Call::into_value)
    }

    #[test]
    fn unknown_matrix_fails() {
        let registry = MatrixRegistry::default();
        let err = expand(&registry, "Ref", "Matrix:Unknown[Resource=Queue]").unwrap_err();
        assert!(matches!(err, Error::UnknownMatrix(name) if name == "Unknown"));
    }

    #[test]
    fn complex_argument_is_returned_by_reference() {
        let registry = env_registry(&["dev"]);
        let argument = Value::from(json!({"Fn::If": ["Cond", "Matrix:Env[Resource=Q]", "b"]}));
        let call = MatrixExpander::new(&registry)
            .expand(Call::borrowed("Ref", &argument))
            .unwrap();
        let Cow::Borrowed(returned) = call.argument else {
            panic!("argument must not be copied");
        };
        assert!(std::ptr::eq(returned, &argument));
    }

    #[test]
    fn plain_strings_are_left_alone() {
        let registry = MatrixRegistry::default();
        for text in ["Bucket", "Matrix:Env", "Matrix:Env[Resource=Q] trailing"] {
            let argument = Value::from(text);
            let call = MatrixExpander::new(&registry)
                .expand(Call::borrowed("Ref", &argument))
                .unwrap();
            assert!(call.is_unchanged());
        }
    }

    #[test]
    fn ref_style() {
        let registry = env_registry(&["dev", "stage", "us-east-1"]);
        assert_eq!(
            expand(&registry, "Ref", "Matrix:Env[Resource=Queue]").unwrap(),
            Value::from(json!({"Fn::If": [
                "MatrixEnvDev",
                {"Ref": "QueueDev"},
                {"Fn::If": ["MatrixEnvStage", {"Ref": "QueueStage"}, {"Ref": "QueueUsEast1"}]}
            ]}))
        );
    }

    #[test]
    fn single_value_is_a_plain_ref() {
        let registry = env_registry(&["dev"]);
        assert_eq!(
            expand(&registry, "Ref", "Matrix:Env[Resource=Queue]").unwrap(),
            Value::from(json!({"Ref": "QueueDev"}))
        );
    }

    #[test]
    fn arguments_are_trimmed() {
        let registry = env_registry(&["dev"]);
        assert_eq!(
            expand(&registry, "Ref", "Matrix:Env[ Resource = Queue ]").unwrap(),
            Value::from(json!({"Ref": "QueueDev"}))
        );
        assert_eq!(
            expand(&registry, "Fn::Sub", "Matrix:Env[Prefix= app-, Suffix =.fifo]").unwrap(),
            Value::from(json!({"Fn::Sub": ["app-${MatrixEnv}.fifo", {"MatrixEnv": "dev"}]}))
        );
    }

    #[test]
    fn sub_style() {
        let registry = env_registry(&["dev", "prod"]);
        assert_eq!(
            expand(&registry, "Fn::Sub", "Matrix:Env[Prefix=app-, Suffix=-logs]").unwrap(),
            Value::from(json!({"Fn::Sub": [
                "app-${MatrixEnv}-logs",
                {"MatrixEnv": {"Fn::If": ["MatrixEnvDev", "dev", "prod"]}}
            ]}))
        );
        assert_eq!(
            expand(&registry, "Fn::Sub", "Matrix:Env[]").unwrap(),
            Value::from(json!({"Fn::Sub": [
                "${MatrixEnv}",
                {"MatrixEnv": {"Fn::If": ["MatrixEnvDev", "dev", "prod"]}}
            ]}))
        );
    }

    #[test]
    fn argument_errors() {
        let registry = env_registry(&["dev"]);
        for text in [
            "Matrix:Env[Resource]",
            "Matrix:Env[Resource=A,Resource=B]",
            "Matrix:Env[Prefix=x]",
            "Matrix:Env[]",
            "Matrix:Env[=x]",
        ] {
            let err = expand(&registry, "Ref", text).unwrap_err();
            assert!(
                matches!(err, Error::InvalidMatrixArguments { .. }),
                "{text}: {err}"
            );
        }
    }

    #[test]
    fn only_ref_and_sub() {
        let registry = env_registry(&["dev"]);
        let err = expand(&registry, "Fn::GetAtt", "Matrix:Env[Resource=Queue]").unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    fn apply_section(fragment: serde_json::Value) -> (Result<Value>, MatrixRegistry) {
        let mut registry = MatrixRegistry::default();
        let fragment = Value::from(fragment);
        let result = MatrixSection::new(&mut registry)
            .apply(&fragment)
            .map(Cow::into_owned);
        (result, registry)
    }

    #[test]
    fn section_expands() {
        let (result, registry) = apply_section(json!({
            "Parameters": {"Stage": {"Type": "String", "AllowedValues": ["dev", "prod"]}},
            "Matrices": {"Env": {"Parameter": "Stage"}},
            "Resources": {
                "Queue": {"Type": "AWS::SQS::Queue", "Matrix": "Env", "Properties": {"DelaySeconds": 5}},
                "Topic": {"Type": "AWS::SNS::Topic"}
            }
        }));

        assert_eq!(
            result.unwrap(),
            Value::from(json!({
                "Parameters": {"Stage": {"Type": "String", "AllowedValues": ["dev", "prod"]}},
                "Conditions": {
                    "MatrixEnvDev": {"Fn::Equals": [{"Ref": "Stage"}, "dev"]},
                    "MatrixEnvProd": {"Fn::Equals": [{"Ref": "Stage"}, "prod"]}
                },
                "Resources": {
                    "QueueDev": {"Type": "AWS::SQS::Queue", "Properties": {"DelaySeconds": 5}, "Condition": "MatrixEnvDev"},
                    "QueueProd": {"Type": "AWS::SQS::Queue", "Properties": {"DelaySeconds": 5}, "Condition": "MatrixEnvProd"},
                    "Topic": {"Type": "AWS::SNS::Topic"}
                }
            }))
        );
        assert!(registry.contains("Env"));
    }

    #[test]
    fn section_keeps_existing_conditions() {
        let (result, _) = apply_section(json!({
            "Conditions": {"IsProd": {"Fn::Equals": [{"Ref": "Stage"}, "prod"]}},
            "Matrices": {"Az": {"Parameter": "Zone", "Values": ["a"]}}
        }));
        assert_eq!(
            result.unwrap(),
            Value::from(json!({
                "Conditions": {
                    "IsProd": {"Fn::Equals": [{"Ref": "Stage"}, "prod"]},
                    "MatrixAzA": {"Fn::Equals": [{"Ref": "Zone"}, "a"]}
                }
            }))
        );
    }

    #[test]
    fn without_section_nothing_changes() {
        let mut registry = MatrixRegistry::default();
        let fragment = Value::from(json!({"Resources": {"A": {"Type": "X"}}}));
        let result = MatrixSection::new(&mut registry).apply(&fragment).unwrap();
        assert!(matches!(result, Cow::Borrowed(_)));

        let tagged = Value::from(json!({"Resources": {"A": {"Type": "X", "Matrix": "Env"}}}));
        let err = MatrixSection::new(&mut registry).apply(&tagged).unwrap_err();
        assert!(matches!(err, Error::UnknownMatrix(name) if name == "Env"));
    }

    #[test]
    fn section_errors() {
        for fragment in [
            json!({"Matrices": {"Env": {"Values": ["a"]}}}),
            json!({"Matrices": {"Env": {"Parameter": "Stage"}}}),
            json!({"Matrices": {"Env": "Stage"}}),
            json!({"Matrices": {"my-env": {"Parameter": "Stage", "Values": ["a"]}}}),
            json!({"Matrices": {"Env": {"Parameter": "Stage", "Values": ["a-b", "a_b"]}}}),
            json!({
                "Matrices": {"Env": {"Parameter": "Stage", "Values": ["a"]}},
                "Resources": {"Q": {"Type": "X", "Matrix": "Env", "Condition": "Other"}}
            }),
            json!({
                "Matrices": {"Env": {"Parameter": "Stage", "Values": ["a"]}},
                "Resources": {"Q": {"Type": "X", "Matrix": "Env"}, "QA": {"Type": "X"}}
            }),
            json!({
                "Matrices": {"Env": {"Parameter": "Stage", "Values": ["a"]}},
                "Resources": {"Q": {"Type": "X", "Matrix": "Other"}}
            }),
        ] {
            let (result, _) = apply_section(fragment.clone());
            assert!(result.is_err(), "{fragment} must be rejected");
        }
    }
}
