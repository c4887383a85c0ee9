use crate::core::port::{ConnectionHub, HubKind};
use crate::domain::{BlockId, Value};
use crate::utils::error::{FlowError, Result};
use serde_json::Map;
use std::fmt;

pub const DEFAULT_BLOCK_NAME: &str = "NO_NAME";
pub const DEFAULT_BLOCK_DESCRIPTION: &str = "NO_DESCRIPTION";
pub const DEFAULT_CODE: &str = "print('Hello World!')";
pub const LLM_RESPONSE_PORT: &str = "response";

/// What a block does when the graph runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Base,
    Variable,
    Code { code: String },
    Llm { prompt_template: String },
}

impl BlockKind {
    /// Type tag used in serialized graphs.
    pub fn type_name(&self) -> &'static str {
        match self {
            BlockKind::Base => "BaseBlock",
            BlockKind::Variable => "Variable",
            BlockKind::Code { .. } => "Code",
            BlockKind::Llm { .. } => "LLMBlock",
        }
    }

    fn short_tag(&self) -> &'static str {
        match self {
            BlockKind::Base => "BB",
            BlockKind::Variable => "V",
            BlockKind::Code { .. } => "C",
            BlockKind::Llm { .. } => "L",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    name: Option<String>,
    description: Option<String>,
    kind: BlockKind,
    inputs: ConnectionHub,
    outputs: ConnectionHub,
    changes_affect_reliability: bool,
}

impl Block {
    fn with_kind(name: Option<String>, kind: BlockKind) -> Self {
        let changes_affect_reliability = !matches!(kind, BlockKind::Variable);
        Self {
            id: BlockId::new_random(),
            name,
            description: None,
            kind,
            inputs: ConnectionHub::new(HubKind::Input),
            outputs: ConnectionHub::new(HubKind::Output),
            changes_affect_reliability,
        }
    }

    pub fn base(name: impl Into<String>) -> Self {
        Self::with_kind(Some(name.into()), BlockKind::Base)
    }

    pub fn unnamed() -> Self {
        Self::with_kind(None, BlockKind::Base)
    }

    /// A variable block holding `variables` as output ports, or a single
    /// `var1 = 0` when none are given.
    pub fn variable(name: impl Into<String>, variables: Vec<(String, Value)>) -> Result<Self> {
        let mut block = Self::with_kind(Some(name.into()), BlockKind::Variable);
        if variables.is_empty() {
            block.create_variable(Some("var1"), Value::from(0))?;
        }
        for (var, value) in variables {
            block.create_variable(Some(&var), value)?;
        }
        Ok(block)
    }

    pub fn code(name: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        let code = if code.trim().is_empty() {
            DEFAULT_CODE.to_string()
        } else {
            code
        };
        Self::with_kind(Some(name.into()), BlockKind::Code { code })
    }

    pub fn llm(name: impl Into<String>, prompt_template: impl Into<String>) -> Result<Self> {
        let mut block = Self::with_kind(
            Some(name.into()),
            BlockKind::Llm {
                prompt_template: prompt_template.into(),
            },
        );
        block.outputs.add_port(Some(LLM_RESPONSE_PORT))?;
        Ok(block)
    }

    pub(crate) fn from_parts(
        id: BlockId,
        name: Option<String>,
        description: Option<String>,
        kind: BlockKind,
        inputs: ConnectionHub,
        outputs: ConnectionHub,
    ) -> Self {
        let mut block = Self::with_kind(name, kind);
        block.id = id;
        block.description = description;
        block.inputs = inputs;
        block.outputs = outputs;
        block
    }

    pub fn with_id(mut self, id: BlockId) -> Self {
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_BLOCK_NAME)
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(DEFAULT_BLOCK_DESCRIPTION)
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut BlockKind {
        &mut self.kind
    }

    pub fn changes_affect_reliability(&self) -> bool {
        self.changes_affect_reliability
    }

    pub fn inputs(&self) -> &ConnectionHub {
        &self.inputs
    }

    pub fn outputs(&self) -> &ConnectionHub {
        &self.outputs
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut ConnectionHub {
        &mut self.inputs
    }

    pub(crate) fn outputs_mut(&mut self) -> &mut ConnectionHub {
        &mut self.outputs
    }

    pub(crate) fn hub_mut(&mut self, kind: HubKind) -> &mut ConnectionHub {
        match kind {
            HubKind::Input => &mut self.inputs,
            _ => &mut self.outputs,
        }
    }

    pub fn qualname(&self) -> String {
        format!("{}({})", self.kind.type_name(), self.name())
    }

    pub fn add_input_port(&mut self, name: Option<&str>) -> Result<String> {
        self.inputs.add_port(name)
    }

    pub fn add_output_port(&mut self, name: Option<&str>) -> Result<String> {
        self.outputs.add_port(name)
    }

    // Variables live on the output hub.

    pub fn create_variable(&mut self, name: Option<&str>, value: Value) -> Result<String> {
        let name = self.outputs.add_port(name)?;
        if let Some(port) = self.outputs.port_mut(&name) {
            port.set_value(value);
        }
        Ok(name)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.outputs.port(name).and_then(|p| p.value().value())
    }

    /// Output values by port name, in port order. Unset ports map to `null`.
    pub fn variables(&self) -> Map<String, Value> {
        self.outputs
            .ports()
            .map(|(name, port)| {
                (
                    name.to_string(),
                    port.value().value().cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    pub fn edit_variable(&mut self, name: &str, value: Value) -> Result<()> {
        let port = self
            .outputs
            .port_mut(name)
            .ok_or_else(|| FlowError::port(format!("Variable name '{}' does not exist.", name)))?;
        port.set_value(value);
        Ok(())
    }

    pub fn rename_variable(&mut self, old_name: &str, new_name: &str) -> Result<String> {
        self.ensure_unconnected(old_name)?;
        self.outputs.rename_port(old_name, new_name)
    }

    /// Connected variables must be removed through `Graph::remove_port`.
    pub fn delete_variable(&mut self, name: &str) -> Result<()> {
        self.ensure_unconnected(name)?;
        self.outputs.remove_port(name).map(|_| ())
    }

    pub fn clear_variables(&mut self) -> Result<()> {
        if !self.outputs.connections().is_empty() {
            return Err(FlowError::port(format!(
                "Block '{}' has connected variables; disconnect them first",
                self.name()
            )));
        }
        self.outputs.clear_ports().map(|_| ())
    }

    fn ensure_unconnected(&self, name: &str) -> Result<()> {
        match self.outputs.port(name) {
            Some(port) if port.is_connected() => Err(FlowError::port(format!(
                "Variable '{}' is connected; remove its connections first",
                name
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}({})>", self.kind.short_tag(), self.name())
    }
}
