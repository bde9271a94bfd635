//! Template rendering — `{name}` placeholder substitution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

/// Substitute `{name}` placeholders in `template` with values from `vars`.
///
/// A placeholder with no binding is logged and left in place; rendering
/// never fails. An unterminated `{` is emitted literally.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        warn!(placeholder = name, "Missing template variable");
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Format a timestamp for human display in follow-up bodies.
pub fn format_date(date: DateTime<Utc>, format: &str) -> String {
    date.format(format).to_string()
}
