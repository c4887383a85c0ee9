use crate::core::block::{Block, BlockKind};
use crate::core::port::{Connection, ConnectionHub, HubKind, PortRef};
use crate::domain::{ConnectionId, GraphId, Value};
use crate::utils::error::{FlowError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A dataflow graph of blocks wired output-port to input-port.
///
/// Blocks are keyed by name and connections by id. Every structural change goes
/// through the graph so that port connection lists and the connection table
/// stay in sync.
#[derive(Debug, Clone)]
pub struct Graph {
    id: GraphId,
    name: String,
    blocks: BTreeMap<String, Block>,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(GraphId::new_random(), name)
    }

    pub fn with_id(id: GraphId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            blocks: BTreeMap::new(),
            connections: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &GraphId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn block_names(&self) -> Vec<String> {
        self.blocks.keys().cloned().collect()
    }

    pub fn contains_block(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn block(&self, name: &str) -> Result<&Block> {
        self.blocks.get(name).ok_or_else(|| FlowError::UnknownBlock {
            name: name.to_string(),
        })
    }

    pub fn block_mut(&mut self, name: &str) -> Result<&mut Block> {
        self.blocks.get_mut(name).ok_or_else(|| FlowError::UnknownBlock {
            name: name.to_string(),
        })
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn add_block(&mut self, block: Block) -> Result<()> {
        let name = block.name().to_string();
        if self.blocks.contains_key(&name) {
            return Err(FlowError::DuplicateBlock { name });
        }
        tracing::debug!(graph = %self.id, block = %name, "adding block");
        self.blocks.insert(name, block);
        Ok(())
    }

    /// Adds a base block. Without a name, the first free `block_{n}` is used.
    pub fn add_named_block(&mut self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => (0..)
                .map(|n| format!("block_{}", n))
                .find(|candidate| !self.blocks.contains_key(candidate))
                .unwrap_or_default(),
        };
        self.add_block(Block::base(name.clone()))?;
        Ok(name)
    }

    /// Removes a block together with every connection touching it.
    pub fn remove_block(&mut self, name: &str) -> Result<Block> {
        let touching: Vec<ConnectionId> = self
            .all_connections(name)?
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        for id in touching {
            self.remove_connection(&id)?;
        }
        self.blocks.remove(name).ok_or_else(|| FlowError::UnknownBlock {
            name: name.to_string(),
        })
    }

    /// Connects `from` to `to`, creating any port that does not exist yet.
    /// Connecting the same two ports twice returns the existing connection.
    pub fn connect_blocks(
        &mut self,
        from: &str,
        to: &str,
        from_port: Option<&str>,
        to_port: Option<&str>,
    ) -> Result<ConnectionId> {
        self.block(from)?;
        self.block(to)?;
        for (block, kind, port) in [(from, HubKind::Output, from_port), (to, HubKind::Input, to_port)] {
            let hub = self.hub(block, kind)?;
            let exists = port.is_some_and(|p| hub.contains(p));
            if !exists && !hub.is_editable() {
                return Err(FlowError::HubEditError);
            }
        }

        let from_port = self.resolve_port(from, HubKind::Output, from_port)?;
        let to_port = self.resolve_port(to, HubKind::Input, to_port)?;
        Ok(self.attach(PortRef::new(from, from_port), PortRef::new(to, to_port)))
    }

    /// Connects two existing ports; nothing is created.
    pub fn connect_ports_strict(
        &mut self,
        from: &str,
        to: &str,
        from_port: &str,
        to_port: &str,
    ) -> Result<ConnectionId> {
        for (block, kind, port) in [(from, HubKind::Output, from_port), (to, HubKind::Input, to_port)] {
            if !self.hub(block, kind)?.contains(port) {
                return Err(FlowError::port(format!(
                    "Block '{}' has no port named '{}'",
                    block, port
                )));
            }
        }
        Ok(self.attach(PortRef::new(from, from_port), PortRef::new(to, to_port)))
    }

    fn hub(&self, block: &str, kind: HubKind) -> Result<&ConnectionHub> {
        let block = self.block(block)?;
        Ok(match kind {
            HubKind::Input => block.inputs(),
            _ => block.outputs(),
        })
    }

    fn resolve_port(&mut self, block: &str, kind: HubKind, port: Option<&str>) -> Result<String> {
        let hub = self.block_mut(block)?.hub_mut(kind);
        match port {
            Some(port) if hub.contains(port) => Ok(port.to_string()),
            other => hub.add_port(other),
        }
    }

    fn attach(&mut self, from: PortRef, to: PortRef) -> ConnectionId {
        if let Some(existing) = self
            .connections
            .values()
            .find(|c| c.from == from && c.to == to)
        {
            return existing.id.clone();
        }

        let mut connection = Connection::new(from, to);
        while self.connections.contains_key(&connection.id) {
            connection.id = ConnectionId::new_random();
        }
        let id = connection.id.clone();
        self.attach_ports(&connection);
        let target = connection.to.block.clone();
        self.connections.insert(id.clone(), connection);
        self.invalidate_from(&target);
        id
    }

    pub(crate) fn attach_ports(&mut self, connection: &Connection) {
        let id = &connection.id;
        if let Some(port) = self
            .blocks
            .get_mut(&connection.from.block)
            .and_then(|b| b.outputs_mut().port_mut(&connection.from.port))
        {
            port.attach(id.clone());
        }
        if let Some(port) = self
            .blocks
            .get_mut(&connection.to.block)
            .and_then(|b| b.inputs_mut().port_mut(&connection.to.port))
        {
            port.attach(id.clone());
        }
    }

    pub(crate) fn insert_connection_unchecked(&mut self, connection: Connection) {
        self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove_connection(&mut self, id: &ConnectionId) -> Result<Connection> {
        let connection = self
            .connections
            .remove(id)
            .ok_or_else(|| FlowError::UnknownConnection { id: id.to_string() })?;

        if let Some(port) = self
            .blocks
            .get_mut(&connection.from.block)
            .and_then(|b| b.outputs_mut().port_mut(&connection.from.port))
        {
            port.detach(id);
        }
        if let Some(port) = self
            .blocks
            .get_mut(&connection.to.block)
            .and_then(|b| b.inputs_mut().port_mut(&connection.to.port))
        {
            port.detach(id);
        }
        self.invalidate_from(&connection.to.block);
        Ok(connection)
    }

    /// Removes a port and every connection attached to it.
    pub fn remove_port(&mut self, block: &str, kind: HubKind, port: &str) -> Result<()> {
        let hub = self.hub(block, kind)?;
        if !hub.is_editable() {
            return Err(FlowError::HubEditError);
        }
        let attached = hub
            .port(port)
            .map(|p| p.connections().to_vec())
            .ok_or_else(|| FlowError::port(format!("Variable name '{}' does not exist.", port)))?;
        for id in attached {
            self.remove_connection(&id)?;
        }
        self.block_mut(block)?.hub_mut(kind).remove_port(port)?;
        Ok(())
    }

    /// Renames a port and rewrites the connections that reference it.
    pub fn rename_port(&mut self, block: &str, kind: HubKind, old: &str, new: &str) -> Result<()> {
        self.block_mut(block)?.hub_mut(kind).rename_port(old, new)?;
        for connection in self.connections.values_mut() {
            let end = match kind {
                HubKind::Input => &mut connection.to,
                _ => &mut connection.from,
            };
            if end.block == block && end.port == old {
                end.port = new.to_string();
            }
        }
        Ok(())
    }

    pub fn incoming_connections(&self, name: &str) -> Result<Vec<&Connection>> {
        self.block(name)?;
        Ok(self.connections.values().filter(|c| c.to.block == name).collect())
    }

    pub fn outgoing_connections(&self, name: &str) -> Result<Vec<&Connection>> {
        self.block(name)?;
        Ok(self.connections.values().filter(|c| c.from.block == name).collect())
    }

    pub fn all_connections(&self, name: &str) -> Result<Vec<&Connection>> {
        self.block(name)?;
        Ok(self
            .connections
            .values()
            .filter(|c| c.from.block == name || c.to.block == name)
            .collect())
    }

    pub fn incoming_neighbors(&self, name: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .incoming_connections(name)?
            .into_iter()
            .map(|c| c.from.block.clone())
            .collect())
    }

    pub fn outgoing_neighbors(&self, name: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .outgoing_connections(name)?
            .into_iter()
            .map(|c| c.to.block.clone())
            .collect())
    }

    pub fn all_neighbors(&self, name: &str) -> Result<BTreeSet<String>> {
        let mut neighbors = self.incoming_neighbors(name)?;
        neighbors.extend(self.outgoing_neighbors(name)?);
        Ok(neighbors)
    }

    fn closure<F>(&self, start: &str, next: F) -> Result<BTreeSet<String>>
    where
        F: Fn(&str) -> Result<BTreeSet<String>>,
    {
        self.block(start)?;
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for neighbor in next(&current)? {
                if !visited.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        Ok(visited)
    }

    /// Every block reachable from `name` ignoring direction, `name` included.
    pub fn connected_blocks(&self, name: &str) -> Result<BTreeSet<String>> {
        self.closure(name, |n| self.all_neighbors(n))
    }

    /// Every block downstream of `name`, `name` included.
    pub fn following_blocks(&self, name: &str) -> Result<BTreeSet<String>> {
        self.closure(name, |n| self.outgoing_neighbors(n))
    }

    /// Longest-path level of every block, computed with Kahn's algorithm.
    fn levels(&self) -> Result<BTreeMap<String, usize>> {
        let mut successors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut indegree: BTreeMap<&str, usize> =
            self.blocks.keys().map(|name| (name.as_str(), 0)).collect();

        for connection in self.connections.values() {
            let inserted = successors
                .entry(connection.from.block.as_str())
                .or_default()
                .insert(connection.to.block.as_str());
            if inserted {
                if let Some(count) = indegree.get_mut(connection.to.block.as_str()) {
                    *count += 1;
                }
            }
        }

        let mut levels: BTreeMap<String, usize> = BTreeMap::new();
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        for name in &queue {
            levels.insert(name.to_string(), 0);
        }

        while let Some(current) = queue.pop_front() {
            let level = levels.get(current).copied().unwrap_or(0);
            for next in successors.get(current).into_iter().flatten() {
                let entry = levels.entry(next.to_string()).or_insert(0);
                *entry = (*entry).max(level + 1);
                if let Some(count) = indegree.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        let unresolved: BTreeSet<&str> = indegree
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, _)| name)
            .collect();
        if !unresolved.is_empty() {
            let blocks = unresolved
                .iter()
                .filter(|name| on_cycle(name, &successors, &unresolved))
                .map(|name| name.to_string())
                .collect();
            return Err(FlowError::CycleError { blocks });
        }
        Ok(levels)
    }

    /// Blocks grouped by level, each group sorted by name. With `start`, only
    /// blocks following it are kept; levels stay those of the whole graph.
    pub fn evaluation_levels(&self, start: Option<&str>) -> Result<Vec<Vec<String>>> {
        let keep = start.map(|s| self.following_blocks(s)).transpose()?;
        let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (name, level) in self.levels()? {
            if keep.as_ref().is_some_and(|k| !k.contains(&name)) {
                continue;
            }
            grouped.entry(level).or_default().push(name);
        }
        Ok(grouped.into_values().collect())
    }

    pub fn evaluation_order(&self, start: Option<&str>) -> Result<Vec<String>> {
        Ok(self.evaluation_levels(start)?.into_iter().flatten().collect())
    }

    /// Marks outputs of `name` and of every downstream block unreliable.
    pub fn make_outputs_unreliable(&mut self, name: &str) -> Result<()> {
        for block in self.following_blocks(name)? {
            if let Some(block) = self.blocks.get_mut(&block) {
                block.outputs_mut().make_unreliable();
            }
        }
        Ok(())
    }

    fn invalidate_from(&mut self, name: &str) {
        if self.blocks.contains_key(name) {
            // following_blocks cannot fail for an existing block
            let _ = self.make_outputs_unreliable(name);
        }
    }

    fn transfer(&mut self, connection: &Connection) {
        let value = self
            .blocks
            .get(&connection.from.block)
            .and_then(|b| b.outputs().port(&connection.from.port))
            .map(|p| p.value().clone());
        let target = self
            .blocks
            .get_mut(&connection.to.block)
            .and_then(|b| b.inputs_mut().port_mut(&connection.to.port));
        if let (Some(value), Some(target)) = (value, target) {
            *target.value_mut() = value;
        }
    }

    /// Copies each output value of `name` to the input ports it feeds.
    pub fn push_values(&mut self, name: &str) -> Result<()> {
        let outgoing: Vec<Connection> = self
            .outgoing_connections(name)?
            .into_iter()
            .cloned()
            .collect();
        for connection in &outgoing {
            self.transfer(connection);
        }
        Ok(())
    }

    /// Copies upstream output values into the input ports of `name`. With
    /// fan-in the connection with the greatest id wins.
    pub fn pull_inputs(&mut self, name: &str) -> Result<()> {
        let incoming: Vec<Connection> = self
            .incoming_connections(name)?
            .into_iter()
            .cloned()
            .collect();
        for connection in &incoming {
            self.transfer(connection);
        }
        Ok(())
    }

    /// Sets a variable value and invalidates whatever depends on it.
    pub fn set_variable(&mut self, block: &str, variable: &str, value: Value) -> Result<()> {
        let target = self.block_mut(block)?;
        target.edit_variable(variable, value)?;
        if target.changes_affect_reliability() {
            self.make_outputs_unreliable(block)?;
        } else {
            for next in self.outgoing_neighbors(block)? {
                self.make_outputs_unreliable(&next)?;
            }
        }
        Ok(())
    }

    pub fn set_code(&mut self, block: &str, code: impl Into<String>) -> Result<()> {
        match self.block_mut(block)?.kind_mut() {
            BlockKind::Code { code: current } => *current = code.into(),
            _ => {
                return Err(FlowError::ValidationError {
                    message: format!("Block '{}' is not a code block", block),
                })
            }
        }
        self.make_outputs_unreliable(block)
    }

    pub fn set_prompt_template(&mut self, block: &str, template: impl Into<String>) -> Result<()> {
        match self.block_mut(block)?.kind_mut() {
            BlockKind::Llm { prompt_template } => *prompt_template = template.into(),
            _ => {
                return Err(FlowError::ValidationError {
                    message: format!("Block '{}' is not an LLM block", block),
                })
            }
        }
        self.make_outputs_unreliable(block)
    }

    /// One sorted `A -> B` line per pair of directly connected blocks.
    pub fn diagram(&self) -> String {
        self.connections
            .values()
            .map(|c| format!("{} -> {}", c.from.block, c.to.block))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        let block_ids = |g: &Graph| g.blocks.values().map(|b| b.id().clone()).collect::<BTreeSet<_>>();
        self.name == other.name
            && block_ids(self) == block_ids(other)
            && self.connections.keys().eq(other.connections.keys())
    }
}

/// Whether `start` can reach itself through blocks of `within`.
fn on_cycle(start: &str, successors: &BTreeMap<&str, BTreeSet<&str>>, within: &BTreeSet<&str>) -> bool {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<&str> = vec![start];
    while let Some(current) = stack.pop() {
        for next in successors.get(current).into_iter().flatten() {
            if *next == start {
                return true;
            }
            if within.contains(next) && seen.insert(*next) {
                stack.push(*next);
            }
        }
    }
    false
}
