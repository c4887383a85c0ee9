use crate::core::block::{Block, BlockKind, LLM_RESPONSE_PORT};
use crate::core::graph::Graph;
use crate::core::template::complete_template;
use crate::domain::{CodeExecutor, GraphId, LlmClient, Value};
use crate::utils::error::{FlowError, Result};
use crate::utils::monitor::SystemMonitor;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// 單一 block 的執行結果
#[derive(Debug, Clone, Serialize)]
pub struct BlockOutcome {
    pub block: String,
    pub kind: String,
    pub level: usize,
    pub outputs: BTreeMap<String, Value>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

/// 整個 graph 的執行報告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub graph_id: GraphId,
    pub executed: Vec<BlockOutcome>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl RunReport {
    pub fn executed_names(&self) -> Vec<String> {
        self.executed.iter().map(|o| o.block.clone()).collect()
    }
}

/// Owned snapshot of what a block needs to run, detached from the graph so
/// that a whole level can run on separate tasks.
enum Job {
    Base {
        inputs: BTreeMap<String, Option<Value>>,
    },
    Variable {
        values: BTreeMap<String, Value>,
    },
    Code {
        code: String,
        inputs: BTreeMap<String, Value>,
        outputs: Vec<String>,
    },
    Llm {
        template: String,
        inputs: BTreeMap<String, Value>,
    },
}

fn required_inputs(block: &Block) -> Result<BTreeMap<String, Value>> {
    block
        .inputs()
        .ports()
        .map(|(name, port)| {
            port.value()
                .value()
                .cloned()
                .map(|v| (name.to_string(), v))
                .ok_or_else(|| FlowError::ValidationError {
                    message: format!("input '{}' has no value", name),
                })
        })
        .collect()
}

impl Job {
    fn for_block(block: &Block) -> Result<Self> {
        Ok(match block.kind() {
            BlockKind::Base => Job::Base {
                inputs: block
                    .inputs()
                    .ports()
                    .map(|(name, port)| (name.to_string(), port.value().value().cloned()))
                    .collect(),
            },
            BlockKind::Variable => Job::Variable {
                values: block.variables().into_iter().collect(),
            },
            BlockKind::Code { code } => Job::Code {
                code: code.clone(),
                inputs: required_inputs(block)?,
                outputs: block.outputs().port_names(),
            },
            BlockKind::Llm { prompt_template } => Job::Llm {
                template: prompt_template.clone(),
                inputs: required_inputs(block)?,
            },
        })
    }

    async fn run(self, code: &dyn CodeExecutor, llm: &dyn LlmClient) -> Result<BTreeMap<String, Value>> {
        match self {
            Job::Base { inputs } => {
                tracing::debug!(?inputs, "base block inputs");
                Ok(BTreeMap::new())
            }
            Job::Variable { values } => Ok(values),
            Job::Code {
                code: source,
                inputs,
                outputs,
            } => {
                let mut produced = code.execute(&source, &inputs, &outputs).await?;
                outputs
                    .into_iter()
                    .map(|name| {
                        produced
                            .remove(&name)
                            .map(|v| (name.clone(), v))
                            .ok_or_else(|| FlowError::ValidationError {
                                message: format!("code did not produce output '{}'", name),
                            })
                    })
                    .collect()
            }
            Job::Llm { template, inputs } => {
                let response = complete_template(llm, &template, &inputs).await?;
                Ok(BTreeMap::from([(
                    LLM_RESPONSE_PORT.to_string(),
                    Value::String(response),
                )]))
            }
        }
    }
}

fn block_failed(block: &str, error: FlowError) -> FlowError {
    match error {
        FlowError::BlockFailed { .. } => error,
        other => FlowError::BlockFailed {
            block: block.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Runs graphs level by level. Blocks that share a level run concurrently.
pub struct GraphRunner {
    code: Arc<dyn CodeExecutor>,
    llm: Arc<dyn LlmClient>,
    monitor: Option<Arc<SystemMonitor>>,
}

impl GraphRunner {
    pub fn new(code: Arc<dyn CodeExecutor>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            code,
            llm,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<SystemMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub async fn run_all(&self, graph: &mut Graph) -> Result<RunReport> {
        let levels = graph.evaluation_levels(None)?;
        self.run_levels(graph, levels).await
    }

    /// Runs `start` and every block downstream of it.
    pub async fn run_after(&self, graph: &mut Graph, start: &str) -> Result<RunReport> {
        let levels = graph.evaluation_levels(Some(start))?;
        self.run_levels(graph, levels).await
    }

    async fn run_levels(&self, graph: &mut Graph, levels: Vec<Vec<String>>) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(
            graph = %graph.id(),
            levels = levels.len(),
            "🚀 Running graph '{}'",
            graph.name()
        );

        let mut executed = Vec::new();
        for (level, names) in levels.into_iter().enumerate() {
            let mut tasks = JoinSet::new();
            for name in names {
                graph.pull_inputs(&name)?;
                let block = graph.block(&name)?;
                let kind = block.kind().type_name().to_string();
                let job = Job::for_block(block).map_err(|e| block_failed(&name, e))?;
                let code = Arc::clone(&self.code);
                let llm = Arc::clone(&self.llm);
                tasks.spawn(async move {
                    let started = Instant::now();
                    let result = job.run(code.as_ref(), llm.as_ref()).await;
                    (name, kind, result, started.elapsed())
                });
            }

            let mut finished = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                let (name, kind, result, duration) = joined.map_err(|e| FlowError::RuntimeError {
                    message: format!("block task aborted: {}", e),
                })?;
                let outputs = match result {
                    Ok(outputs) => outputs,
                    Err(e) => {
                        tracing::error!(graph = %graph.id(), block = %name, "❌ Block failed: {}", e);
                        return Err(block_failed(&name, e));
                    }
                };
                apply_outputs(graph, &name, &outputs)?;
                tracing::debug!(block = %name, ?duration, "✅ Block finished");
                finished.push(BlockOutcome {
                    block: name,
                    kind,
                    level,
                    outputs,
                    duration,
                });
            }

            finished.sort_by(|a, b| a.block.cmp(&b.block));
            for outcome in &finished {
                graph.push_values(&outcome.block)?;
            }
            executed.extend(finished);

            if let Some(monitor) = &self.monitor {
                monitor.log_stats(&format!("level {}", level));
            }
        }

        let report = RunReport {
            graph_id: graph.id().clone(),
            executed,
            duration: clock.elapsed(),
            started_at,
        };
        tracing::info!(
            graph = %report.graph_id,
            blocks = report.executed.len(),
            "✅ Graph run finished in {:?}",
            report.duration
        );
        Ok(report)
    }
}

fn apply_outputs(graph: &mut Graph, name: &str, outputs: &BTreeMap<String, Value>) -> Result<()> {
    let block = graph.block_mut(name)?;
    let is_variable = matches!(block.kind(), BlockKind::Variable);
    for (port_name, port) in block.outputs_mut().ports_mut() {
        match outputs.get(port_name) {
            Some(value) => {
                port.set_value(value.clone());
                port.value_mut().make_reliable();
            }
            None if is_variable => port.value_mut().make_reliable(),
            None => {}
        }
    }
    Ok(())
}
