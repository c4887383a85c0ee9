use crate::app::services::graph_manager::GraphManager;
use crate::core::{GraphRunner, RunReport};
use crate::utils::error::Result;
use std::sync::Arc;

/// Loads a stored graph, runs it and writes the computed values back.
#[derive(Clone)]
pub struct GraphExecutionService {
    graphs: GraphManager,
    runner: Arc<GraphRunner>,
}

impl GraphExecutionService {
    pub fn new(graphs: GraphManager, runner: Arc<GraphRunner>) -> Self {
        Self { graphs, runner }
    }

    pub async fn execute_graph(&self, graph_id: &str) -> Result<RunReport> {
        let mut graph = self.graphs.load_graph(graph_id).await?;
        let report = self.runner.run_all(&mut graph).await?;
        self.graphs.store_graph(graph_id, &graph).await?;
        Ok(report)
    }

    /// Runs `block` and everything downstream of it.
    pub async fn execute_from(&self, graph_id: &str, block: &str) -> Result<RunReport> {
        let mut graph = self.graphs.load_graph(graph_id).await?;
        let report = self.runner.run_after(&mut graph, block).await?;
        self.graphs.store_graph(graph_id, &graph).await?;
        Ok(report)
    }
}
