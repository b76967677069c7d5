//! Renders command results using per-bundle/per-command templates
//! (§4.8). Command-level overrides take precedence over the bundle's
//! slot; if rendering fails the `*_error` slot is used; if that also
//! fails, a hard-coded fallback is emitted.

use serde::Serialize;

use crate::model::bundle::{Bundle, Command, Templates};
use crate::model::request::CommandResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Command,
    CommandError,
    Message,
    MessageError,
}

impl Slot {
    fn error_variant(self) -> Slot {
        match self {
            Slot::Command => Slot::CommandError,
            Slot::Message => Slot::MessageError,
            other => other,
        }
    }

    fn field<'a>(self, t: &'a Templates) -> Option<&'a str> {
        match self {
            Slot::Command => t.command.as_deref(),
            Slot::CommandError => t.command_error.as_deref(),
            Slot::Message => t.message.as_deref(),
            Slot::MessageError => t.message_error.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TemplateContext<'a> {
    response: ResponseView<'a>,
    command: &'a str,
    bundle: &'a str,
    user: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseView<'a> {
    out: &'a str,
    err: &'a str,
    status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<&'a serde_json::Value>,
}

/// The built-in template used for a slot when neither the command nor
/// the bundle configures one. Most bundles never set `templates` at
/// all, so without this every successful reply would fall through to
/// the hard-coded `<error: {{status}}>` fallback.
fn default_template(slot: Slot) -> &'static str {
    match slot {
        Slot::Command | Slot::Message => "{{response.out}}",
        Slot::CommandError | Slot::MessageError => "{{response.err}}",
    }
}

/// Resolves the template string to use for `slot`, honoring
/// command-level overrides over the bundle-level slot, falling back
/// to a built-in default when neither configures one.
fn resolve_template<'a>(bundle: &'a Bundle, command: &'a Command, slot: Slot) -> &'a str {
    slot.field(&command.templates)
        .or_else(|| slot.field(&bundle.templates))
        .unwrap_or_else(|| default_template(slot))
}

/// Renders `response` for `(bundle, command)` using the given slot.
/// Falls back to the slot's `_error` variant if rendering fails, and
/// to a hard-coded `<error: {{status}}>` if that also fails.
pub fn render(
    bundle: &Bundle,
    command: &Command,
    user: &str,
    response: &CommandResponse,
    slot: Slot,
) -> String {
    let context = TemplateContext {
        response: ResponseView {
            out: &response.output,
            err: &response.output_stderr,
            status: response.status,
            json: response.structured.as_ref(),
        },
        command: &command.name,
        bundle: &bundle.name,
        user,
    };

    let tpl = resolve_template(bundle, command, slot);
    if let Ok(rendered) = render_str(tpl, &context) {
        return rendered;
    }

    let error_slot = slot.error_variant();
    if error_slot != slot {
        let tpl = resolve_template(bundle, command, error_slot);
        if let Ok(rendered) = render_str(tpl, &context) {
            return rendered;
        }
    }

    format!("<error: {}>", response.status)
}

fn render_str(template: &str, context: &TemplateContext<'_>) -> Result<String, handlebars::RenderError> {
    let mut registry = handlebars::Handlebars::new();
    registry.set_strict_mode(false);
    registry.render_template(template, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bundle::{Command, Templates};
    use chrono::Utc;
    use uuid::Uuid;

    fn bundle_with_templates(templates: Templates) -> Bundle {
        Bundle {
            gort_bundle_version: 1,
            name: "gort".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            long_description: String::new(),
            author: String::new(),
            homepage: String::new(),
            image: None,
            permissions: vec![],
            commands: Default::default(),
            templates,
            kubernetes: None,
            enabled: true,
            install_user: "admin".to_string(),
            install_timestamp: Utc::now(),
        }
    }

    fn command_with_templates(templates: Templates) -> Command {
        Command {
            name: "echo".to_string(),
            description: String::new(),
            long_description: String::new(),
            executable: vec!["/bin/echo".to_string()],
            rules: vec!["allow".to_string()],
            triggers: vec![],
            templates,
        }
    }

    #[test]
    fn command_level_template_overrides_bundle_level() {
        let bundle = bundle_with_templates(Templates {
            command: Some("bundle: {{response.out}}".to_string()),
            ..Default::default()
        });
        let command = command_with_templates(Templates {
            command: Some("command: {{response.out}}".to_string()),
            ..Default::default()
        });
        let response = CommandResponse::success(Uuid::new_v4(), 10, "hi".to_string(), String::new());
        let rendered = render(&bundle, &command, "alice", &response, Slot::Command);
        assert_eq!(rendered, "command: hi");
    }

    #[test]
    fn falls_back_to_error_slot_on_render_failure() {
        let bundle = bundle_with_templates(Templates {
            command: Some("{{#bogus}}".to_string()),
            command_error: Some("error: {{response.status}}".to_string()),
            ..Default::default()
        });
        let command = command_with_templates(Templates::default());
        let response = CommandResponse::failure(Uuid::new_v4(), 10, 1, "boom");
        let rendered = render(&bundle, &command, "alice", &response, Slot::Command);
        assert_eq!(rendered, "error: 1");
    }

    #[test]
    fn falls_back_to_hard_coded_when_everything_fails() {
        let bundle = bundle_with_templates(Templates {
            command: Some("{{#bogus}}".to_string()),
            command_error: Some("{{#also_bogus}}".to_string()),
            ..Default::default()
        });
        let command = command_with_templates(Templates::default());
        let response = CommandResponse::failure(Uuid::new_v4(), 10, 2, "boom");
        let rendered = render(&bundle, &command, "alice", &response, Slot::Command);
        assert_eq!(rendered, "<error: 2>");
    }

    #[test]
    fn no_configured_template_falls_back_to_raw_output() {
        let bundle = bundle_with_templates(Templates::default());
        let command = command_with_templates(Templates::default());
        let response = CommandResponse::success(Uuid::new_v4(), 10, "hi there".to_string(), String::new());
        let rendered = render(&bundle, &command, "alice", &response, Slot::Command);
        assert_eq!(rendered, "hi there");
    }
}
