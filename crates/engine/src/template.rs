//! Step command template rendering.
//!
//! Step commands are handlebars templates with named parameters
//! (`kubectl delete pod {{name}} -n {{namespace}}`). Rendering is strict: a
//! missing parameter is an error at plan time, before anything runs.

use handlebars::Handlebars;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid regex"))
}

/// Parameter names referenced by a template, in lexical order.
#[must_use]
pub fn required_params(template: &str) -> BTreeSet<String> {
    param_regex()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Render a step command template with the given parameters.
pub fn render(step: &str, template: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let missing: Vec<String> = required_params(template)
        .into_iter()
        .filter(|p| !params.contains_key(p))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Template {
            step: step.to_string(),
            reason: format!("missing parameter(s): {}", missing.join(", ")),
        });
    }

    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry
        .render_template(template, params)
        .map_err(|e| Error::Template {
            step: step.to_string(),
            reason: e.to_string(),
        })
}
