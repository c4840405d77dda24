//! Validated, ordered field specifications
//!
//! A `TaskSpec` is an explicitly declared schema: an ordered list of fields
//! checked once at construction. Binding values against it fills defaults and
//! enforces the mandatory/xor/requires rules.

use crate::error::{SpecError, SpecResult};
use crate::spec::{Field, FieldType, Value, ARGS_FIELD, EXECUTABLE_FIELD};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Fields every container spec carries besides the shell ones
pub const CONTAINER_FIELD: &str = "container";
pub const IMAGE_FIELD: &str = "image";
pub const CONTAINER_XARGS_FIELD: &str = "container_xargs";
pub const BINDINGS_FIELD: &str = "bindings";

/// Bound input values, keyed by field name
pub type Inputs = BTreeMap<String, Value>;

/// An ordered, validated sequence of fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    name: String,
    fields: Vec<Field>,
}

impl TaskSpec {
    /// Build a spec from an ordered list of field declarations
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> SpecResult<Self> {
        let spec = TaskSpec {
            name: name.into(),
            fields,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// An empty spec (no fields)
    pub fn empty(name: impl Into<String>) -> Self {
        TaskSpec {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Shell command inputs: `executable` and `args` are added unless declared
    pub fn shell(fields: Vec<Field>) -> SpecResult<Self> {
        let base = vec![
            Field::new(EXECUTABLE_FIELD, FieldType::Any)
                .mandatory()
                .with_help("the first part of the command"),
            Field::new(ARGS_FIELD, FieldType::Any).with_help("trailing free-form arguments"),
        ];
        Self::new("Inputs", merge_base(base, fields))
    }

    /// Container command inputs; `engine` pre-binds the `container` field
    pub fn container(fields: Vec<Field>, engine: Option<&str>) -> SpecResult<Self> {
        let mut container = Field::new(CONTAINER_FIELD, FieldType::Str)
            .with_help("container engine executable");
        if let Some(engine) = engine {
            container = container.with_default(engine);
        }
        let base = vec![
            Field::new(EXECUTABLE_FIELD, FieldType::Any)
                .with_help("the first part of the command run inside the container"),
            Field::new(ARGS_FIELD, FieldType::Any).with_help("trailing free-form arguments"),
            container,
            Field::new(IMAGE_FIELD, FieldType::Str).with_help("container image"),
            Field::new(CONTAINER_XARGS_FIELD, FieldType::List)
                .with_help("extra arguments passed to the engine's run command"),
            Field::new(BINDINGS_FIELD, FieldType::List)
                .with_help("(local path, container path, mode) mounts"),
        ];
        Self::new("Inputs", merge_base(base, fields))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn validate(&self) -> SpecResult<()> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                if field.is_executable() || field.is_args() {
                    return Err(SpecError::DuplicateReservedField(field.name.clone()));
                }
                return Err(SpecError::DuplicateField(field.name.clone()));
            }
        }

        for field in &self.fields {
            if let Some(position) = &field.metadata.position {
                if !position.as_int().is_some_and(|p| p >= 1) {
                    return Err(SpecError::InvalidFieldMetadata {
                        field: field.name.clone(),
                        reason: format!(
                            "position should be an integer > 0, but {} given",
                            position
                        ),
                    });
                }
            }

            if field.default.is_some() {
                if field.metadata.mandatory {
                    return Err(SpecError::ConflictingDefault {
                        field: field.name.clone(),
                        reason: "default value should not be set when the field is mandatory"
                            .to_string(),
                    });
                }
                if field.metadata.output_file_template.is_some() {
                    return Err(SpecError::ConflictingDefault {
                        field: field.name.clone(),
                        reason: "default value should not be set together with output_file_template"
                            .to_string(),
                    });
                }
            }

            for other in field.metadata.xor.iter().chain(&field.metadata.requires) {
                if !seen.contains(other.as_str()) {
                    return Err(SpecError::InvalidFieldMetadata {
                        field: field.name.clone(),
                        reason: format!("refers to undeclared field '{}'", other),
                    });
                }
            }
        }

        Ok(())
    }

    /// Bind values to the spec, producing a value for every field
    ///
    /// Unbound fields take their default, or null. Fails on unknown names,
    /// missing mandatory values and violated xor/requires relations.
    pub fn resolve(&self, mut values: Inputs) -> SpecResult<Inputs> {
        if let Some(unknown) = values.keys().find(|name| self.field(name).is_none()) {
            return Err(SpecError::UnknownInput(unknown.clone()));
        }

        let mut resolved = Inputs::new();
        for field in &self.fields {
            let value = match values.remove(&field.name) {
                Some(value) if !value.is_null() => value,
                _ => field.default.clone().unwrap_or_default(),
            };
            if field.metadata.mandatory && value.is_null() {
                return Err(SpecError::MissingMandatory(field.name.clone()));
            }
            resolved.insert(field.name.clone(), value);
        }

        for field in &self.fields {
            let is_set = resolved.get(&field.name).map_or(false, Value::is_set);
            if !is_set {
                continue;
            }
            for other in &field.metadata.xor {
                if other != &field.name && resolved.get(other).map_or(false, Value::is_set) {
                    return Err(SpecError::MutuallyExclusive {
                        field: field.name.clone(),
                        other: other.clone(),
                    });
                }
            }
            for required in &field.metadata.requires {
                if !resolved.get(required).map_or(false, Value::is_set) {
                    return Err(SpecError::MissingRequirement {
                        field: field.name.clone(),
                        required: required.clone(),
                    });
                }
            }
        }

        Ok(resolved)
    }
}

/// Prepend base fields that the caller did not declare themselves
fn merge_base(base: Vec<Field>, fields: Vec<Field>) -> Vec<Field> {
    let declared: HashSet<String> = fields.iter().map(|f| f.name.clone()).collect();
    base.into_iter()
        .filter(|f| !declared.contains(&f.name))
        .chain(fields)
        .collect()
}
