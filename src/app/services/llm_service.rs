use crate::core::template::{complete_template, format_template};
use crate::domain::{LlmClient, Value};
use crate::utils::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Formats prompt templates and forwards them to the configured LLM.
#[derive(Clone)]
pub struct LlmService {
    client: Arc<dyn LlmClient>,
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    pub fn format_prompt(template: &str, inputs: &BTreeMap<String, Value>) -> Result<String> {
        format_template(template, inputs)
    }

    pub async fn respond(&self, template: &str, inputs: &BTreeMap<String, Value>) -> Result<String> {
        complete_template(self.client.as_ref(), template, inputs).await
    }
}
