//! Differ - Compare desired attributes with the current state
//!
//! Handlers use this to decide whether an update needs a remote call at all and
//! to reject in-place updates of attributes that force replacement.

use std::collections::HashMap;

use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{Resource, State, Value};
use crate::schema::ResourceSchema;

/// Attributes that never reach the remote API
const META_ATTRIBUTES: &[&str] = &["timeouts"];

/// Find changed attributes between desired and current state, sorted by name
pub fn changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') || META_ATTRIBUTES.contains(&key.as_str()) {
            continue;
        }

        match current.get(key) {
            Some(current_value) if current_value == desired_value => {}
            _ => changed.push(key.clone()),
        }
    }

    changed.sort();
    changed
}

/// Changed attributes the schema marks as `requires_replace`
pub fn replacement_attributes(schema: &ResourceSchema, changed: &[String]) -> Vec<String> {
    changed
        .iter()
        .filter(|name| {
            schema
                .attributes
                .get(name.as_str())
                .is_some_and(|attr| attr.requires_replace)
        })
        .cloned()
        .collect()
}

/// Changed attributes of an in-place update, or a validation error when one of
/// them can only change by replacing the resource
pub fn update_changes(
    schema: &ResourceSchema,
    from: &State,
    to: &Resource,
) -> ProviderResult<Vec<String>> {
    let changed = changed_attributes(&to.attributes, &from.attributes);
    let replace = replacement_attributes(schema, &changed);
    if !replace.is_empty() {
        return Err(ProviderError::validation(format!(
            "cannot update {} in place; the resource must be replaced",
            replace.join(", ")
        ))
        .for_resource(to.id.clone()));
    }
    Ok(changed)
}
