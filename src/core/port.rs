use crate::domain::{ConnectionId, Value};
use crate::utils::error::{FlowError, Result};
use crate::utils::ids::random_identifier;
use serde::{Deserialize, Serialize};

/// A port's payload plus its availability and reliability flags.
///
/// A value is *available* once it has been set at least once and *reliable*
/// while it reflects the latest run of its producer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableValue {
    value: Option<Value>,
    available: bool,
    reliable: bool,
}

impl VariableValue {
    pub fn new(value: Option<Value>) -> Self {
        Self {
            available: value.is_some(),
            value,
            reliable: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn make_reliable(&mut self) {
        self.reliable = true;
    }

    pub fn make_unreliable(&mut self) {
        self.reliable = false;
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = Some(value);
        self.available = true;
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn get(&self) -> (Option<&Value>, bool) {
        (self.value.as_ref(), self.reliable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    id: String,
    value: VariableValue,
    connections: Vec<ConnectionId>,
}

impl Port {
    pub fn new(value: Option<Value>) -> Self {
        Self::with_id(random_identifier(32), value)
    }

    pub fn with_id(id: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            id: id.into(),
            value: VariableValue::new(value),
            connections: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &VariableValue {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut VariableValue {
        &mut self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.value.set_value(value);
    }

    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    pub(crate) fn attach(&mut self, connection: ConnectionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
            self.value.make_unreliable();
        }
    }

    pub(crate) fn detach(&mut self, connection: &ConnectionId) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c != connection);
        let removed = self.connections.len() != before;
        if removed {
            self.value.make_unreliable();
        }
        removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HubKind {
    Input,
    Output,
    Internal,
}

/// Ordered set of named ports on one side of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionHub {
    id: String,
    kind: HubKind,
    editable: bool,
    ports: Vec<(String, Port)>,
}

impl ConnectionHub {
    pub fn new(kind: HubKind) -> Self {
        Self::with_id(random_identifier(32), kind)
    }

    pub fn with_id(id: impl Into<String>, kind: HubKind) -> Self {
        Self {
            id: id.into(),
            kind,
            editable: true,
            ports: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> HubKind {
        self.kind
    }

    pub fn is_input(&self) -> bool {
        self.kind == HubKind::Input
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn set_editable(&mut self, editable: bool) {
        self.editable = editable;
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    fn check_editable(&self) -> Result<()> {
        if !self.editable {
            return Err(FlowError::HubEditError);
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|(n, _)| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Adds an empty port and returns its name. Without a name, `var{n}` is
    /// generated starting from the current port count plus one.
    pub fn add_port(&mut self, name: Option<&str>) -> Result<String> {
        self.check_editable()?;
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let mut n = self.ports.len() + 1;
                while self.contains(&format!("var{}", n)) {
                    n += 1;
                }
                format!("var{}", n)
            }
        };
        if self.contains(&name) {
            return Err(FlowError::port(format!(
                "Variable name '{}' already exists. Please use a different name.",
                name
            )));
        }
        self.ports.push((name.clone(), Port::new(None)));
        Ok(name)
    }

    pub(crate) fn insert_port(&mut self, name: String, port: Port) -> Result<()> {
        if self.contains(&name) {
            return Err(FlowError::port(format!("Variable name '{}' already exists.", name)));
        }
        self.ports.push((name, port));
        Ok(())
    }

    /// Removes a port and returns the connections it was attached to.
    pub(crate) fn remove_port(&mut self, name: &str) -> Result<Vec<ConnectionId>> {
        self.check_editable()?;
        let index = self
            .position(name)
            .ok_or_else(|| FlowError::port(format!("Variable name '{}' does not exist.", name)))?;
        let (_, port) = self.ports.remove(index);
        Ok(port.connections)
    }

    /// Renames a port in place, keeping its position.
    pub(crate) fn rename_port(&mut self, old_name: &str, new_name: &str) -> Result<String> {
        self.check_editable()?;
        if self.contains(new_name) {
            return Err(FlowError::port(format!(
                "Variable name '{}' already exists. Please use a different name.",
                new_name
            )));
        }
        let index = self
            .position(old_name)
            .ok_or_else(|| FlowError::port(format!("Variable name '{}' does not exist.", old_name)))?;
        self.ports[index].0 = new_name.to_string();
        Ok(new_name.to_string())
    }

    pub(crate) fn clear_ports(&mut self) -> Result<Vec<ConnectionId>> {
        self.check_editable()?;
        let mut detached = Vec::new();
        for (_, port) in self.ports.drain(..) {
            detached.extend(port.connections);
        }
        Ok(detached)
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn port_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn ports(&self) -> impl Iterator<Item = (&str, &Port)> {
        self.ports.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn ports_mut(&mut self) -> impl Iterator<Item = (&str, &mut Port)> {
        self.ports.iter_mut().map(|(n, p)| (n.as_str(), p))
    }

    pub fn port_names(&self) -> Vec<String> {
        self.ports.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Every attached connection, in port order, without duplicates.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut seen = Vec::new();
        for (_, port) in &self.ports {
            for id in &port.connections {
                if !seen.contains(id) {
                    seen.push(id.clone());
                }
            }
        }
        seen
    }

    pub fn make_unreliable(&mut self) {
        for (_, port) in &mut self.ports {
            port.value.make_unreliable();
        }
    }
}

/// Endpoint of a connection: a block name and a port name on that block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub block: String,
    pub port: String,
}

impl PortRef {
    pub fn new(block: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            port: port.into(),
        }
    }
}

/// Directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: PortRef,
    pub to: PortRef,
}

impl Connection {
    pub fn new(from: PortRef, to: PortRef) -> Self {
        Self {
            id: ConnectionId::new_random(),
            from,
            to,
        }
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<CX({})>", self.id)
    }
}
