use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\{\s*([^}]+)\s*\}\}").expect("interpolation pattern is valid")
});

/// Context for `${{ ... }}` interpolation in commands, paths and env values.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Pipeline variables and group/step env.
    pub variables: BTreeMap<String, String>,
    /// Matrix binding and derived variables of the current instance.
    pub matrix: BTreeMap<String, String>,
    /// Trigger bindings: `event.kind`, `event.ref`, `inputs.*`.
    pub bindings: BTreeMap<String, String>,
    pub run_id: Option<String>,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ variable }}` - direct variable lookup
    /// - `${{ env.VAR }}` - pipeline variable, falling back to the process env
    /// - `${{ matrix.key }}` - matrix value
    /// - `${{ inputs.name }}`, `${{ event.kind }}`, `${{ event.ref }}`
    /// - `${{ run.id }}`
    ///
    /// Unknown names render as the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        EXPRESSION
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .to_string()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .variables
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        if expr == "run.id" {
            return self.run_id.clone().unwrap_or_default();
        }

        if expr.starts_with("inputs.") || expr.starts_with("event.") {
            return self.bindings.get(expr).cloned().unwrap_or_default();
        }

        self.variables.get(expr).cloned().unwrap_or_default()
    }
}
