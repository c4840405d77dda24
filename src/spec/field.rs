//! Field declarations

use crate::spec::Value;
use serde::{Deserialize, Serialize};

/// Name of the field that always lands at position 0
pub const EXECUTABLE_FIELD: &str = "executable";

/// Name of the free-form field that always lands at the end of the command
pub const ARGS_FIELD: &str = "args";

/// Semantic type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "integer")]
    Int,
    Float,
    #[serde(alias = "string")]
    Str,
    File,
    Directory,
    List,
    #[default]
    Any,
}

/// Per-field metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    /// Position on the command line; kept raw so a non-integer is reported
    /// by validation rather than by the YAML parser
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,

    /// Literal emitted before the value, e.g. "-n"
    #[serde(default, rename = "argstr", skip_serializing_if = "Option::is_none")]
    pub argument_template: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,

    #[serde(default)]
    pub mandatory: bool,

    /// Fields that may not be set together with this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xor: Vec<String>,

    /// Fields that must be set whenever this one is
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    /// Output path template, e.g. "{args}.out"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_template: Option<String>,

    /// Name of the output produced by `output_file_template`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_field_name: Option<String>,
}

/// A declared input or output slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(rename = "type", default)]
    pub field_type: FieldType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(flatten)]
    pub metadata: FieldMetadata,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
            default: None,
            metadata: FieldMetadata::default(),
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn at_position(mut self, position: i64) -> Self {
        self.metadata.position = Some(Value::Int(position));
        self
    }

    /// Declared position, if it is an integer
    pub fn position(&self) -> Option<i64> {
        self.metadata.position.as_ref().and_then(Value::as_int)
    }

    pub fn with_argstr(mut self, argstr: impl Into<String>) -> Self {
        self.metadata.argument_template = Some(argstr.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.metadata.help = help.into();
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.metadata.mandatory = true;
        self
    }

    pub fn xor<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.xor = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.requires = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.metadata.output_file_template = Some(template.into());
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.output_field_name = Some(name.into());
        self
    }

    pub fn is_executable(&self) -> bool {
        self.name == EXECUTABLE_FIELD
    }

    pub fn is_args(&self) -> bool {
        self.name == ARGS_FIELD
    }

    pub fn is_bool(&self) -> bool {
        self.field_type == FieldType::Bool
    }
}
