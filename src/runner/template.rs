//! Output file name templates
//!
//! Templates reference bound inputs with the `{field}` syntax, e.g. `{args}.out`.

use crate::error::{TemplateError, TemplateResult};
use crate::spec::Inputs;
use regex::Regex;
use std::sync::OnceLock;

fn field_regex() -> &'static Regex {
    static FIELD_RE: OnceLock<Regex> = OnceLock::new();
    FIELD_RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"))
}

/// Render a template against bound inputs
///
/// Every placeholder must name a field bound to a non-null value.
pub fn render_template(template: &str, inputs: &Inputs) -> TemplateResult<String> {
    let mut missing = None;

    let rendered = field_regex().replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match inputs.get(name) {
            Some(value) if !value.is_null() => value.to_string(),
            _ => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(TemplateError::UndefinedField(name)),
        None => Ok(rendered.into_owned()),
    }
}

/// Names of the fields a template refers to
pub fn template_fields(template: &str) -> Vec<String> {
    field_regex()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Value;

    fn inputs(pairs: &[(&str, Value)]) -> Inputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_simple_template() {
        let vars = inputs(&[("args", Value::from("newfile_tmp.txt"))]);
        assert_eq!(render_template("{args}", &vars).unwrap(), "newfile_tmp.txt");
    }

    #[test]
    fn test_multiple_fields() {
        let vars = inputs(&[("stem", Value::from("brain")), ("n", Value::Int(2))]);
        let result = render_template("{stem}_{n}.nii", &vars).unwrap();
        assert_eq!(result, "brain_2.nii");
    }

    #[test]
    fn test_undefined_field() {
        let result = render_template("{missing}.txt", &Inputs::new());
        assert_eq!(result, Err(TemplateError::UndefinedField("missing".to_string())));
    }

    #[test]
    fn test_null_field_is_undefined() {
        let vars = inputs(&[("args", Value::Null)]);
        assert!(render_template("{args}", &vars).is_err());
    }

    #[test]
    fn test_no_placeholders() {
        assert_eq!(render_template("out.txt", &Inputs::new()).unwrap(), "out.txt");
    }

    #[test]
    fn test_template_fields() {
        assert_eq!(template_fields("{a}-{b}.txt"), vec!["a", "b"]);
    }
}
