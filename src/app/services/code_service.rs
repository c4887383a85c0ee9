use crate::adapters::docker::Sandbox;
use crate::domain::{CodeExecutor, ContainerRuntime, Value};
use crate::utils::error::{FlowError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Renders a JSON value as a Python literal.
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        // a JSON string literal is also a valid Python string literal
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), python_literal(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// Builds the script run inside the sandbox: input assignments, the user's
/// code, then one line of JSON holding the requested outputs.
pub fn format_script(code: &str, inputs: &BTreeMap<String, Value>, outputs: &[String]) -> String {
    let mut script = String::from("# First run the input variables\n");
    for (name, value) in inputs {
        script.push_str(&format!("{} = {}\n", name, python_literal(value)));
    }

    script.push_str("\n# Then run the code\n");
    script.push_str(code.trim());

    script.push_str("\n# Finally assemble the result and serialize it\n");
    script.push_str("import json\n");
    script.push_str("result = {");
    for name in outputs {
        script.push_str(&format!("\"{}\": {},", name, name));
    }
    script.push_str("}\n");
    script.push_str("print(json.dumps(result))\n");
    script.push_str("# End of code\n\n");
    script
}

/// Reads the result object from the last non-empty line of `stdout`.
pub fn parse_result(stdout: &str) -> Result<BTreeMap<String, Value>> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| FlowError::SandboxError {
            exit_code: Some(0),
            stderr: "the script printed no result".to_string(),
        })?;

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
        _ => Err(FlowError::SandboxError {
            exit_code: Some(0),
            stderr: format!("unexpected result line: {}", line),
        }),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Runs code blocks inside the Docker sandbox.
pub struct CodeExecutionService<R: ContainerRuntime> {
    sandbox: Sandbox<R>,
    timeout: Duration,
}

impl<R: ContainerRuntime> CodeExecutionService<R> {
    pub fn new(sandbox: Sandbox<R>) -> Self {
        let timeout = Duration::from_secs(sandbox.config().exec_timeout_secs);
        Self { sandbox, timeout }
    }

    pub fn sandbox(&self) -> &Sandbox<R> {
        &self.sandbox
    }

    pub async fn execute_code(
        &self,
        code: &str,
        inputs: &BTreeMap<String, Value>,
        outputs: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        if let Some(bad) = inputs.keys().map(String::as_str).chain(outputs.iter().map(String::as_str)).find(|n| !is_identifier(n)) {
            return Err(FlowError::ValidationError {
                message: format!("'{}' is not a valid variable name", bad),
            });
        }

        let script = format_script(code, inputs, outputs);
        tracing::debug!(inputs = inputs.len(), outputs = outputs.len(), "▶️ Executing code in sandbox");

        let output = match tokio::time::timeout(self.timeout, self.sandbox.exec_script(&script)).await {
            Ok(output) => output?,
            Err(_) => {
                // the interpreter keeps running inside the container, so replace it
                tracing::warn!(seconds = self.timeout.as_secs(), "⏱️ Code execution timed out, recycling sandbox");
                if let Err(e) = self.sandbox.stop().await {
                    tracing::warn!("failed to stop sandbox after timeout: {}", e);
                }
                return Err(FlowError::Timeout {
                    operation: "code execution".to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.success() {
            return Err(FlowError::SandboxError {
                exit_code: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        parse_result(&output.stdout)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sandbox.stop().await
    }
}

#[async_trait]
impl<R: ContainerRuntime> CodeExecutor for CodeExecutionService<R> {
    async fn execute(
        &self,
        code: &str,
        inputs: &BTreeMap<String, Value>,
        outputs: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        self.execute_code(code, inputs, outputs).await
    }
}
