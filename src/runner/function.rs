//! Registered function tasks
//!
//! Function tasks do not carry code. They carry the name of a function that was
//! registered in this process, plus its bound arguments. A process that runs a
//! serialized task (e.g. a batch job) must register the same names before it
//! executes anything.

use crate::error::{RunError, RunResult, SpecResult};
use crate::spec::{Field, FieldType, Inputs, TaskSpec, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

/// Output name used when a function declares none
pub const DEFAULT_OUTPUT: &str = "out";

/// What a registered function hands back
#[derive(Debug, Clone, PartialEq)]
pub enum Returned {
    Single(Value),
    Tuple(Vec<Value>),
}

type Callable = dyn Fn(&Inputs) -> Result<Returned, String> + Send + Sync;

/// A named, typed function available to function tasks
#[derive(Clone)]
pub struct RegisteredFunction {
    pub name: String,
    pub input_spec: TaskSpec,
    pub output_spec: TaskSpec,
    callable: Arc<Callable>,
}

impl RegisteredFunction {
    /// Call with resolved inputs and map the return value onto the output names
    pub fn call(&self, inputs: &Inputs) -> RunResult<BTreeMap<String, Value>> {
        debug!(function = %self.name, "calling registered function");
        let returned = (self.callable)(inputs).map_err(|message| RunError::FunctionFailed {
            function: self.name.clone(),
            message,
        })?;
        map_outputs(&self.output_spec.field_names(), returned)
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.output_spec.field_names()
    }
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("name", &self.name)
            .field("inputs", &self.input_spec.field_names())
            .field("outputs", &self.output_spec.field_names())
            .finish()
    }
}

fn registry() -> &'static RwLock<HashMap<String, RegisteredFunction>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, RegisteredFunction>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a function under `name`, replacing any earlier registration
pub fn register_function<F>(
    name: impl Into<String>,
    inputs: Vec<Field>,
    outputs: Vec<&str>,
    callable: F,
) -> SpecResult<()>
where
    F: Fn(&Inputs) -> Result<Returned, String> + Send + Sync + 'static,
{
    let name = name.into();
    let input_spec = TaskSpec::new("Inputs", inputs)?;

    let output_fields = if outputs.is_empty() {
        vec![Field::new(DEFAULT_OUTPUT, FieldType::Any)]
    } else {
        outputs
            .into_iter()
            .map(|o| Field::new(o, FieldType::Any))
            .collect()
    };
    let output_spec = TaskSpec::new("Outputs", output_fields)?;

    let function = RegisteredFunction {
        name: name.clone(),
        input_spec,
        output_spec,
        callable: Arc::new(callable),
    };

    registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(name, function);
    Ok(())
}

/// Look up a registered function
pub fn lookup_function(name: &str) -> Option<RegisteredFunction> {
    registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(name)
        .cloned()
}

/// Names of all registered functions, sorted
pub fn registered_functions() -> Vec<String> {
    let mut names: Vec<String> = registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

/// Map a return value onto output names
///
/// A single value fills exactly one output. A tuple must have one element per
/// output name.
pub fn map_outputs(names: &[&str], returned: Returned) -> RunResult<BTreeMap<String, Value>> {
    match returned {
        Returned::Single(value) if names.len() == 1 => {
            Ok(BTreeMap::from([(names[0].to_string(), value)]))
        }
        Returned::Single(_) => Err(RunError::OutputArityMismatch {
            expected: names.len(),
            returned: 1,
        }),
        Returned::Tuple(values) if values.len() == names.len() => Ok(names
            .iter()
            .map(|n| n.to_string())
            .zip(values)
            .collect()),
        Returned::Tuple(values) => Err(RunError::OutputArityMismatch {
            expected: names.len(),
            returned: values.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value_fills_one_output() {
        let outputs = map_outputs(&["out"], Returned::Single(Value::Int(3))).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["out"], Value::Int(3));
    }

    #[test]
    fn test_tuple_against_single_name_is_mismatch() {
        let result = map_outputs(
            &["out"],
            Returned::Tuple(vec![Value::Int(1), Value::Int(2)]),
        );
        assert!(matches!(
            result,
            Err(RunError::OutputArityMismatch {
                expected: 1,
                returned: 2
            })
        ));
    }

    #[test]
    fn test_tuple_zips_with_names() {
        let outputs = map_outputs(
            &["sum", "product"],
            Returned::Tuple(vec![Value::Int(5), Value::Int(6)]),
        )
        .unwrap();
        assert_eq!(outputs["sum"], Value::Int(5));
        assert_eq!(outputs["product"], Value::Int(6));
    }

    #[test]
    fn test_single_value_against_two_names_is_mismatch() {
        let result = map_outputs(&["a", "b"], Returned::Single(Value::Int(1)));
        assert!(matches!(result, Err(RunError::OutputArityMismatch { .. })));
    }

    #[test]
    fn test_register_and_call() {
        register_function(
            "function_test_double",
            vec![Field::new("x", FieldType::Int)],
            vec![],
            |inputs| {
                let x = inputs.get("x").and_then(Value::as_int).ok_or("x must be an int")?;
                Ok(Returned::Single(Value::Int(x * 2)))
            },
        )
        .unwrap();

        let function = lookup_function("function_test_double").unwrap();
        assert_eq!(function.output_names(), vec![DEFAULT_OUTPUT]);

        let inputs = Inputs::from([("x".to_string(), Value::Int(21))]);
        let outputs = function.call(&inputs).unwrap();
        assert_eq!(outputs[DEFAULT_OUTPUT], Value::Int(42));
        assert!(registered_functions().contains(&"function_test_double".to_string()));
    }

    #[test]
    fn test_function_error_is_reported() {
        register_function("function_test_fail", vec![], vec!["out"], |_| {
            Err("boom".to_string())
        })
        .unwrap();

        let function = lookup_function("function_test_fail").unwrap();
        let result = function.call(&Inputs::new());
        assert!(matches!(result, Err(RunError::FunctionFailed { ref message, .. }) if message == "boom"));
    }
}
