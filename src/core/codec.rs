//! JSON layout of a stored graph.
//!
//! ```json
//! { "blocks": { "<block id>": { "id", "name", "description", "type", "inputs", "outputs", ... } },
//!   "connections": { "<cx id>": { "id", "from_block", "from_port", "to_block", "to_port" } },
//!   "metadata": { "name", "id" } }
//! ```
//!
//! Hubs without ports are written as `{}`. Port order is kept by the
//! insertion-ordered `serde_json::Map`.

use crate::core::block::{Block, BlockKind, DEFAULT_BLOCK_DESCRIPTION, DEFAULT_CODE};
use crate::core::graph::Graph;
use crate::core::port::{Connection, ConnectionHub, HubKind, Port, PortRef};
use crate::domain::{BlockId, ConnectionId, GraphId, Value};
use crate::utils::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
struct GraphDoc {
    blocks: Map<String, Value>,
    connections: Map<String, Value>,
    metadata: MetadataDoc,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataDoc {
    name: String,
    id: GraphId,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockDoc {
    id: BlockId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    inputs: Value,
    #[serde(default)]
    outputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt_template: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HubDoc {
    id: String,
    kind: HubKind,
    ports: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PortDoc {
    id: String,
    value: Value,
    #[serde(default)]
    connections: Vec<ConnectionId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnectionDoc {
    id: ConnectionId,
    from_block: String,
    from_port: String,
    to_block: String,
    to_port: String,
}

fn format_error(message: impl Into<String>) -> FlowError {
    FlowError::GraphFormatError {
        message: message.into(),
    }
}

fn hub_to_value(hub: &ConnectionHub) -> Result<Value> {
    if hub.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let mut ports = Map::new();
    for (name, port) in hub.ports() {
        let doc = PortDoc {
            id: port.id().to_string(),
            value: port.value().value().cloned().unwrap_or(Value::Null),
            connections: port.connections().to_vec(),
        };
        ports.insert(name.to_string(), serde_json::to_value(doc)?);
    }
    Ok(serde_json::to_value(HubDoc {
        id: hub.id().to_string(),
        kind: hub.kind(),
        ports,
    })?)
}

/// Rebuilds a hub and returns, per port name, the connection ids it listed.
fn hub_from_value(
    value: &Value,
    kind: HubKind,
) -> Result<(ConnectionHub, Vec<(String, Vec<ConnectionId>)>)> {
    let empty = match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => return Err(format_error("hub must be an object")),
    };
    if empty {
        return Ok((ConnectionHub::new(kind), Vec::new()));
    }

    let doc: HubDoc = serde_json::from_value(value.clone())?;
    let mut hub = ConnectionHub::with_id(doc.id, kind);
    let mut listed = Vec::new();
    for (name, port) in doc.ports {
        let port: PortDoc = serde_json::from_value(port)?;
        let value = (!port.value.is_null()).then_some(port.value);
        hub.insert_port(name.clone(), Port::with_id(port.id, value))?;
        listed.push((name, port.connections));
    }
    Ok((hub, listed))
}

fn block_to_value(block: &Block) -> Result<Value> {
    let (code, prompt_template) = match block.kind() {
        BlockKind::Code { code } => (Some(code.clone()), None),
        BlockKind::Llm { prompt_template } => (None, Some(prompt_template.clone())),
        _ => (None, None),
    };
    Ok(serde_json::to_value(BlockDoc {
        id: block.id().clone(),
        name: block.name().to_string(),
        description: Some(block.description().to_string()),
        kind: block.kind().type_name().to_string(),
        inputs: hub_to_value(block.inputs())?,
        outputs: hub_to_value(block.outputs())?,
        code,
        prompt_template,
    })?)
}

fn kind_from_doc(doc: &BlockDoc) -> Result<BlockKind> {
    match doc.kind.as_str() {
        "BaseBlock" => Ok(BlockKind::Base),
        "Variable" => Ok(BlockKind::Variable),
        "Code" => Ok(BlockKind::Code {
            code: doc.code.clone().unwrap_or_else(|| DEFAULT_CODE.to_string()),
        }),
        "LLMBlock" => Ok(BlockKind::Llm {
            prompt_template: doc.prompt_template.clone().unwrap_or_default(),
        }),
        other => Err(format_error(format!("unknown block type '{}'", other))),
    }
}

impl Graph {
    pub fn to_value(&self) -> Result<Value> {
        let mut blocks = Map::new();
        for block in self.blocks() {
            blocks.insert(block.id().to_string(), block_to_value(block)?);
        }

        let mut connections = Map::new();
        for connection in self.connections() {
            let doc = ConnectionDoc {
                id: connection.id.clone(),
                from_block: connection.from.block.clone(),
                from_port: connection.from.port.clone(),
                to_block: connection.to.block.clone(),
                to_port: connection.to.port.clone(),
            };
            connections.insert(connection.id.to_string(), serde_json::to_value(doc)?);
        }

        Ok(serde_json::to_value(GraphDoc {
            blocks,
            connections,
            metadata: MetadataDoc {
                name: self.name().to_string(),
                id: self.id().clone(),
            },
        })?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_value()?)?)
    }

    pub fn from_value(value: &Value) -> Result<Graph> {
        let doc: GraphDoc = serde_json::from_value(value.clone())?;
        let mut graph = Graph::with_id(doc.metadata.id, doc.metadata.name);

        // (block name, hub kind, port name, listed connection ids)
        let mut listed: Vec<(String, HubKind, String, Vec<ConnectionId>)> = Vec::new();
        for (_, block) in doc.blocks {
            let block: BlockDoc = serde_json::from_value(block)?;
            let kind = kind_from_doc(&block)?;
            let (inputs, input_lists) = hub_from_value(&block.inputs, HubKind::Input)?;
            let (outputs, output_lists) = hub_from_value(&block.outputs, HubKind::Output)?;
            for (port, ids) in input_lists {
                listed.push((block.name.clone(), HubKind::Input, port, ids));
            }
            for (port, ids) in output_lists {
                listed.push((block.name.clone(), HubKind::Output, port, ids));
            }
            let description = block
                .description
                .filter(|d| d != DEFAULT_BLOCK_DESCRIPTION);
            graph.add_block(Block::from_parts(
                block.id,
                Some(block.name),
                description,
                kind,
                inputs,
                outputs,
            ))?;
        }

        let mut connections: BTreeMap<ConnectionId, Connection> = BTreeMap::new();
        for (_, connection) in doc.connections {
            let doc: ConnectionDoc = serde_json::from_value(connection)?;
            let connection = Connection {
                id: doc.id,
                from: PortRef::new(doc.from_block, doc.from_port),
                to: PortRef::new(doc.to_block, doc.to_port),
            };
            for (end, kind) in [(&connection.from, HubKind::Output), (&connection.to, HubKind::Input)] {
                let block = graph.block(&end.block).map_err(|_| {
                    format_error(format!(
                        "connection {} references unknown block '{}'",
                        connection.id, end.block
                    ))
                })?;
                let hub = match kind {
                    HubKind::Input => block.inputs(),
                    _ => block.outputs(),
                };
                if !hub.contains(&end.port) {
                    return Err(format_error(format!(
                        "connection {} references unknown port '{}' on '{}'",
                        connection.id, end.port, end.block
                    )));
                }
            }
            connections.insert(connection.id.clone(), connection);
        }

        for (block, kind, port, ids) in listed {
            for id in ids {
                if !connections.contains_key(&id) {
                    return Err(format_error(format!(
                        "port '{}' on '{}' lists unknown connection {}",
                        port, block, id
                    )));
                }
                if let Some(target) = graph.block_mut(&block)?.hub_mut(kind).port_mut(&port) {
                    target.attach(id);
                }
            }
        }

        for connection in connections.into_values() {
            graph.attach_ports(&connection);
            graph.insert_connection_unchecked(connection);
        }
        Ok(graph)
    }

    pub fn from_json(json: &str) -> Result<Graph> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }
}
