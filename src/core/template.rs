use crate::domain::{LlmClient, Value};
use crate::utils::error::{FlowError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("static pattern"));

enum Piece<'a> {
    Text(&'a str),
    Brace(char),
    Field(&'a str),
}

fn prompt_error(message: impl Into<String>) -> FlowError {
    FlowError::PromptError {
        message: message.into(),
    }
}

fn check_literal(text: &str) -> Result<()> {
    if text.contains('{') || text.contains('}') {
        return Err(prompt_error(format!("unmatched brace in template near '{}'", text)));
    }
    Ok(())
}

fn parse(template: &str) -> Result<Vec<Piece<'_>>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in TOKEN.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let text = &template[last..whole.start()];
        check_literal(text)?;
        pieces.push(Piece::Text(text));
        match (whole.as_str(), caps.get(1)) {
            ("{{", _) => pieces.push(Piece::Brace('{')),
            ("}}", _) => pieces.push(Piece::Brace('}')),
            (_, Some(field)) => {
                let name = field.as_str().trim();
                if name.is_empty() {
                    return Err(prompt_error("empty placeholder '{}' in template"));
                }
                pieces.push(Piece::Field(name));
            }
            _ => {}
        }
        last = whole.end();
    }
    let rest = &template[last..];
    check_literal(rest)?;
    pieces.push(Piece::Text(rest));
    Ok(pieces)
}

/// Names of the `{placeholders}` used by `template`.
pub fn placeholders(template: &str) -> Result<BTreeSet<String>> {
    Ok(parse(template)?
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Field(name) => Some(name.to_string()),
            _ => None,
        })
        .collect())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fills `{name}` placeholders from `inputs`; `{{` and `}}` are literal braces.
///
/// Every placeholder needs an input and every input must be used.
pub fn format_template(template: &str, inputs: &BTreeMap<String, Value>) -> Result<String> {
    if template.is_empty() {
        return Ok(String::new());
    }
    let pieces = parse(template)?;

    let used = placeholders(template)?;
    if let Some(extra) = inputs.keys().find(|k| !used.contains(*k)) {
        return Err(prompt_error(format!(
            "input '{}' is not used by the prompt template",
            extra
        )));
    }

    let mut out = String::with_capacity(template.len());
    for piece in pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Brace(c) => out.push(c),
            Piece::Field(name) => {
                let value = inputs
                    .get(name)
                    .ok_or_else(|| prompt_error(format!("missing input '{}' for prompt template", name)))?;
                out.push_str(&render(value));
            }
        }
    }
    Ok(out)
}

/// Formats `template` and sends it to `client`. An empty prompt yields an
/// empty response without a provider call.
pub async fn complete_template(
    client: &dyn LlmClient,
    template: &str,
    inputs: &BTreeMap<String, Value>,
) -> Result<String> {
    let prompt = format_template(template, inputs)?;
    if prompt.is_empty() {
        return Ok(String::new());
    }
    client.complete(&prompt).await
}
