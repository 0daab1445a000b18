//! Template engine implementation using minijinja.

use globset::Glob;
use minijinja::{Environment, Error, ErrorKind, State, Value};
use std::collections::HashMap;

use crate::error::ActionError;

/// Template engine with Jinja2-compatible syntax.
///
/// Used for step input binding (`with:`), command rendering (`run:`),
/// and condition evaluation (`if:`).
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with custom filters and functions.
    pub fn new() -> Self {
        let mut env = Environment::new();

        // Register custom filters
        env.add_filter("int", filter_int);
        env.add_filter("float", filter_float);
        env.add_filter("default", filter_default);
        env.add_filter("d", filter_default); // alias
        env.add_filter("tojson", filter_tojson);
        env.add_filter("fromjson", filter_fromjson);
        env.add_filter("length", filter_length);
        env.add_filter("len", filter_length); // alias
        env.add_filter("upper", filter_upper);
        env.add_filter("lower", filter_lower);
        env.add_filter("trim", filter_trim);
        env.add_filter("replace", filter_replace);
        env.add_filter("split", filter_split);
        env.add_filter("join", filter_join);
        env.add_filter("first", filter_first);
        env.add_filter("last", filter_last);

        // Register custom tests
        env.add_test("defined", test_defined);
        env.add_test("undefined", test_undefined);

        // Register condition functions
        env.add_function("changed", fn_changed);

        Self { env }
    }

    /// Render a template string with the given context.
    pub fn render(
        &self,
        template: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<String, ActionError> {
        // Quick path for non-template strings
        if !Self::is_template(template) {
            return Ok(template.to_string());
        }

        let tmpl = self.env.template_from_str(template)?;
        let ctx = context_to_value(context);

        tmpl.render(ctx)
            .map_err(|e| ActionError::Template(e.to_string()))
    }

    /// Check if a string contains template syntax.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Render a value that might be a template.
    ///
    /// If the value is a string containing template syntax, render it.
    /// Objects and arrays are rendered recursively; other values pass
    /// through unchanged.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ActionError> {
        match value {
            serde_json::Value::String(s) if Self::is_template(s) => {
                let rendered = self.render(s, context)?;
                // Try to parse as JSON, otherwise return as string
                Ok(serde_json::from_str(&rendered).unwrap_or_else(|_| serde_json::json!(rendered)))
            }
            serde_json::Value::Object(obj) => {
                let mut result = serde_json::Map::new();
                for (k, v) in obj {
                    result.insert(k.clone(), self.render_value(v, context)?);
                }
                Ok(serde_json::Value::Object(result))
            }
            serde_json::Value::Array(arr) => {
                let result: Result<Vec<_>, _> =
                    arr.iter().map(|v| self.render_value(v, context)).collect();
                Ok(serde_json::Value::Array(result?))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Evaluate a condition expression to a boolean.
    ///
    /// Bare expressions are wrapped in `{{ }}` before rendering, so both
    /// `steps.scan.status == 'success'` and `{{ env.CI }}` forms work.
    pub fn evaluate_condition(
        &self,
        condition: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool, ActionError> {
        let template = if Self::is_template(condition) {
            condition.to_string()
        } else {
            format!("{{{{ {} }}}}", condition)
        };

        let tmpl = self.env.template_from_str(&template)?;
        let rendered = tmpl
            .render(context_to_value(context))
            .map_err(|e| ActionError::Template(e.to_string()))?;
        let trimmed = rendered.trim().to_lowercase();

        Ok(matches!(trimmed.as_str(), "true" | "1" | "yes"))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a HashMap context to minijinja Value.
fn context_to_value(context: &HashMap<String, serde_json::Value>) -> Value {
    let json = serde_json::Value::Object(
        context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    Value::from_serialize(&json)
}

// Custom filters

fn filter_int(value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    if let Ok(n) = s.parse::<i64>() {
        return Ok(Value::from(n));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Ok(Value::from(f as i64));
    }
    Ok(Value::from(0i64))
}

fn filter_float(value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    if let Ok(f) = s.parse::<f64>() {
        return Ok(Value::from(f));
    }
    if let Ok(n) = s.parse::<i64>() {
        return Ok(Value::from(n as f64));
    }
    Ok(Value::from(0.0f64))
}

fn filter_default(value: Value, default: Option<Value>) -> Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or_else(|| Value::from(""))
    } else {
        value
    }
}

fn filter_tojson(value: Value) -> Result<String, Error> {
    Ok(serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string()))
}

fn filter_fromjson(value: Value) -> Result<Value, Error> {
    let s = value.to_string();
    let json: serde_json::Value = serde_json::from_str(&s).unwrap_or(serde_json::Value::Null);
    Ok(Value::from_serialize(&json))
}

fn filter_length(value: Value) -> Result<Value, Error> {
    match value.kind() {
        minijinja::value::ValueKind::String => Ok(Value::from(value.to_string().len())),
        minijinja::value::ValueKind::Seq => Ok(Value::from(value.len().unwrap_or(0))),
        minijinja::value::ValueKind::Map => Ok(Value::from(value.len().unwrap_or(0))),
        _ => Ok(Value::from(0)),
    }
}

fn filter_upper(value: Value) -> String {
    value.to_string().to_uppercase()
}

fn filter_lower(value: Value) -> String {
    value.to_string().to_lowercase()
}

fn filter_trim(value: Value) -> String {
    value.to_string().trim().to_string()
}

fn filter_replace(value: Value, old: String, new: String) -> String {
    value.to_string().replace(&old, &new)
}

fn filter_split(value: Value, sep: String) -> Vec<String> {
    value.to_string().split(&sep).map(|s| s.to_string()).collect()
}

fn filter_join(value: Value, sep: Option<String>) -> Result<String, Error> {
    let sep = sep.unwrap_or_default();
    if let Some(len) = value.len() {
        let items: Vec<String> = (0..len)
            .filter_map(|i| value.get_item(&Value::from(i)).ok())
            .map(|v| v.to_string())
            .collect();
        Ok(items.join(&sep))
    } else {
        Ok(value.to_string())
    }
}

fn filter_first(value: Value) -> Result<Value, Error> {
    if let Some(len) = value.len() {
        if len > 0 {
            return value.get_item(&Value::from(0));
        }
    }
    Ok(Value::UNDEFINED)
}

fn filter_last(value: Value) -> Result<Value, Error> {
    if let Some(len) = value.len() {
        if len > 0 {
            return value.get_item(&Value::from(len - 1));
        }
    }
    Ok(Value::UNDEFINED)
}

// Custom tests

fn test_defined(value: Value) -> bool {
    !value.is_undefined()
}

fn test_undefined(value: Value) -> bool {
    value.is_undefined()
}

// Condition functions

/// `changed(pattern)` - true if any changed file in the triggering event
/// matches the glob pattern. Reads `changed_files` from the context.
fn fn_changed(state: &State, pattern: String) -> Result<bool, Error> {
    let matcher = Glob::new(&pattern)
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("invalid glob '{}': {}", pattern, e),
            )
        })?
        .compile_matcher();

    let files = state.lookup("changed_files").unwrap_or(Value::UNDEFINED);
    if let Ok(iter) = files.try_iter() {
        for file in iter {
            if let Some(path) = file.as_str() {
                if matcher.is_match(path) {
                    return Ok(true);
                }
            }
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_template() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("name".to_string(), serde_json::json!("World"));

        let result = engine.render("Hello, {{ name }}!", &ctx).unwrap();
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_plain_string_passthrough() {
        let engine = TemplateEngine::new();
        let ctx = HashMap::new();

        let result = engine.render("cargo build --release", &ctx).unwrap();
        assert_eq!(result, "cargo build --release");
    }

    #[test]
    fn test_filter_default() {
        let engine = TemplateEngine::new();
        let ctx = HashMap::new();

        let result = engine
            .render("{{ missing | default('fallback') }}", &ctx)
            .unwrap();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_filter_length() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("items".to_string(), serde_json::json!(["a", "b", "c"]));

        let result = engine.render("{{ items | length }}", &ctx).unwrap();
        assert_eq!(result, "3");
    }

    #[test]
    fn test_filter_split_join() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("text".to_string(), serde_json::json!("a,b,c"));

        let result = engine
            .render("{{ text | split(',') | join('-') }}", &ctx)
            .unwrap();
        assert_eq!(result, "a-b-c");
    }

    #[test]
    fn test_is_template() {
        assert!(TemplateEngine::is_template("Hello {{ name }}"));
        assert!(TemplateEngine::is_template(
            "{% for x in items %}{{ x }}{% endfor %}"
        ));
        assert!(!TemplateEngine::is_template("plain text"));
    }

    #[test]
    fn test_render_value_nested() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("name".to_string(), serde_json::json!("World"));

        let value = serde_json::json!({
            "greeting": "Hello, {{ name }}!",
            "plain": "no template",
            "count": 42
        });
        let result = engine.render_value(&value, &ctx).unwrap();
        assert_eq!(result["greeting"], serde_json::json!("Hello, World!"));
        assert_eq!(result["plain"], serde_json::json!("no template"));
        assert_eq!(result["count"], serde_json::json!(42));
    }

    #[test]
    fn test_evaluate_condition_comparison() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("status".to_string(), serde_json::json!("success"));
        ctx.insert("count".to_string(), serde_json::json!(5));

        assert!(engine
            .evaluate_condition("status == 'success'", &ctx)
            .unwrap());
        assert!(!engine
            .evaluate_condition("status == 'failed'", &ctx)
            .unwrap());
        assert!(engine.evaluate_condition("count > 3", &ctx).unwrap());
        assert!(!engine.evaluate_condition("count > 10", &ctx).unwrap());
    }

    #[test]
    fn test_evaluate_condition_truthiness() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("active".to_string(), serde_json::json!(true));

        assert!(engine.evaluate_condition("active", &ctx).unwrap());

        ctx.insert("active".to_string(), serde_json::json!(false));
        assert!(!engine.evaluate_condition("active", &ctx).unwrap());
    }

    #[test]
    fn test_evaluate_condition_nested_access() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert(
            "steps".to_string(),
            serde_json::json!({"scan": {"status": "success", "outputs": {"count": "7"}}}),
        );

        assert!(engine
            .evaluate_condition("steps.scan.status == 'success'", &ctx)
            .unwrap());
        assert!(engine
            .evaluate_condition("steps.scan.outputs.count | int > 5", &ctx)
            .unwrap());
    }

    #[test]
    fn test_evaluate_condition_malformed() {
        let engine = TemplateEngine::new();
        let ctx = HashMap::new();

        assert!(engine.evaluate_condition("this is ! not ==== valid", &ctx).is_err());
    }

    #[test]
    fn test_changed_function_match() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert(
            "changed_files".to_string(),
            serde_json::json!(["src/main.rs", "docs/readme.md"]),
        );

        assert!(engine.evaluate_condition("changed('src/*.rs')", &ctx).unwrap());
        assert!(engine.evaluate_condition("changed('**/*.md')", &ctx).unwrap());
        assert!(!engine.evaluate_condition("changed('*.toml')", &ctx).unwrap());
    }

    #[test]
    fn test_changed_function_no_files() {
        let engine = TemplateEngine::new();
        let ctx = HashMap::new();

        assert!(!engine.evaluate_condition("changed('src/*.rs')", &ctx).unwrap());
    }

    #[test]
    fn test_defined_test() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("present".to_string(), serde_json::json!("x"));

        assert!(engine.evaluate_condition("present is defined", &ctx).unwrap());
        assert!(engine.evaluate_condition("missing is undefined", &ctx).unwrap());
    }

    #[test]
    fn test_loop() {
        let engine = TemplateEngine::new();
        let mut ctx = HashMap::new();
        ctx.insert("items".to_string(), serde_json::json!(["a", "b", "c"]));

        let result = engine
            .render("{% for item in items %}{{ item }}{% endfor %}", &ctx)
            .unwrap();
        assert_eq!(result, "abc");
    }
}
