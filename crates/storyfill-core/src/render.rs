//! Deterministic story renderer.

use std::collections::HashMap;

use crate::template::{TemplateDefinition, slot_type};

/// Substituted for slots nobody filled in.
const MISSING_VALUE: &str = "something";

/// Render a template with the given slot-id -> value mapping.
///
/// Values are trimmed; `sound`-type values are wrapped in double quotes
/// unless already quoted; unmapped slots render as "something". Placeholders
/// that match no slot are left literal. Same inputs always produce the same
/// string, and the function never panics.
pub fn render_story(template: &TemplateDefinition, values: &HashMap<String, String>) -> String {
    let mut rendered = template.story.clone();
    for slot in &template.slots {
        let raw = values.get(&slot.id).map(|v| v.trim()).unwrap_or("");
        let value = if raw.is_empty() {
            MISSING_VALUE.to_string()
        } else if slot_type(&slot.slot_type).quote_in_story && !is_quoted(raw) {
            format!("\"{raw}\"")
        } else {
            raw.to_string()
        };
        rendered = rendered.replace(&format!("{{{}}}", slot.id), &value);
    }
    rendered
}

fn is_quoted(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('"') && value.ends_with('"')
}
