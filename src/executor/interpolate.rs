use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::collab::TemplateRenderer;

/// Recursively interpolate session placeholders into action arguments.
///
/// Strings containing `{{` go through the template renderer, per the
/// contract on [`TemplateRenderer`]; other strings skip it. Objects are
/// recursed; arrays pass through unchanged (their elements are opaque
/// data, not templates); other scalars pass through unchanged. Rendering
/// is best-effort: a renderer failure keeps the original string.
pub fn interpolate<'a>(
    renderer: &'a dyn TemplateRenderer,
    session_id: Uuid,
    value: Value,
) -> BoxFuture<'a, Value> {
    Box::pin(async move {
        match value {
            Value::String(text) => {
                if !text.contains("{{") {
                    return Value::String(text);
                }
                match renderer.render(session_id, &text).await {
                    Ok(rendered) => Value::String(rendered),
                    Err(err) => {
                        debug!(error = %err, "template render failed, keeping original value");
                        Value::String(text)
                    }
                }
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, child) in map {
                    out.insert(key, interpolate(renderer, session_id, child).await);
                }
                Value::Object(out)
            }
            other => other,
        }
    })
}
