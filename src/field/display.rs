//! Label computation and link rendering for related entities.

use super::DisplayFn;
use crate::entity::{EntityId, Model};
use serde_json::Value;

/// Label of `model` from the display function, else from `display_field`
///
/// `Ok(None)` means neither produced a non-empty label and the caller should
/// apply its own fallback.
///
/// # Errors
///
/// Returns the display function's error message, or a description of an
/// attribute that holds an array or object.
pub(crate) fn label_for(
    model: &dyn Model,
    display: Option<&DisplayFn>,
    display_field: &str,
) -> Result<Option<String>, String> {
    let label = match display {
        Some(f) => (**f)(model).map_err(|e| e.to_string())?,
        None => match model.attribute(display_field) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(other) => {
                return Err(format!(
                    "attribute '{display_field}' is not a scalar: {other}"
                ))
            }
        },
    };
    Ok(Some(label).filter(|l| !l.trim().is_empty()))
}

/// Link label: computed label, else the identifier
pub(crate) fn link_label(
    model: &dyn Model,
    key: &EntityId,
    display: Option<&DisplayFn>,
    display_field: &str,
) -> String {
    match label_for(model, display, display_field) {
        Ok(Some(label)) => label,
        Ok(None) => key.to_string(),
        Err(e) => {
            log::debug!("label for {} {key} failed, using key: {e}", model.entity_type().name());
            key.to_string()
        }
    }
}

/// Option label: computed label, else `ID: <key>`
pub(crate) fn option_label(
    model: &dyn Model,
    key: &EntityId,
    display: Option<&DisplayFn>,
    display_field: &str,
) -> Result<String, String> {
    Ok(label_for(model, display, display_field)?.unwrap_or_else(|| format!("ID: {key}")))
}

/// `<a class="link-default" href="{base}/resources/{resource}/{id}">{label}</a>`
pub(crate) fn anchor(base_path: &str, resource_key: &str, key: &EntityId, label: &str) -> String {
    let href = format!(
        "{}/resources/{}/{}",
        base_path.trim_end_matches('/'),
        resource_key,
        key
    );
    format!(
        r#"<a class="link-default" href="{}">{}</a>"#,
        html_escape::encode_double_quoted_attribute(&href),
        html_escape::encode_safe(label)
    )
}
