//! Per-connection pipeline
//!
//! A [`ConnectionPipeline`] owns the module instances cloned for one
//! connection. Instances are kept sorted by priority (ties by registration
//! order) so that walking the phases in order and filtering by membership
//! yields the execution order directly. Dropping the pipeline detaches every
//! instance, whichever way the connection ends.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use super::ExecutionProcess;
use crate::error::ModuleError;
use crate::module::{Client, ConnectionId, Module, PipelinePhase, Query};
use crate::state::QueryTimer;

pub struct ConnectionPipeline {
    process: Arc<ExecutionProcess>,
    connection_id: ConnectionId,
    client: Client,
    instances: Vec<Box<dyn Module>>,
    closed: bool,
}

impl ConnectionPipeline {
    pub(crate) fn new(
        process: Arc<ExecutionProcess>,
        client: Client,
        mut instances: Vec<(usize, Box<dyn Module>)>,
    ) -> Self {
        instances.sort_by(|(a_reg, a), (b_reg, b)| {
            execution_cmp((a.priority(), *a_reg), (b.priority(), *b_reg))
        });

        Self {
            process,
            connection_id: client.connection_id,
            client,
            instances: instances.into_iter().map(|(_, m)| m).collect(),
            closed: false,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> impl Iterator<Item = &dyn Module> {
        self.instances.iter().map(|m| m.as_ref())
    }

    /// Module names in the order one query visits them. A module taking part
    /// in several phases appears once per phase.
    pub fn execution_order(&self) -> Vec<&str> {
        PipelinePhase::ORDER
            .iter()
            .flat_map(|&phase| {
                self.instances
                    .iter()
                    .filter(move |m| m.category().participates_in(phase))
                    .map(|m| m.name())
            })
            .collect()
    }

    /// Rebind every instance to a new client context. The connection keeps
    /// its original id for bookkeeping.
    pub fn rebind_client(&mut self, client: Client) {
        for instance in self.instances.iter_mut() {
            instance.set_client(client.clone());
        }
        self.client = client;
    }

    /// Drive one query through every phase.
    ///
    /// Each instance's output is the next instance's input. The first module
    /// returning `None` ends the cycle with `PipelineAbort`; no later module is
    /// invoked for this query.
    pub async fn dispatch(&mut self, query: Query) -> Result<Query, ModuleError> {
        let timer = QueryTimer::new(self.process.metrics().clone());
        let mut current = query;

        for phase in PipelinePhase::ORDER {
            for instance in self
                .instances
                .iter_mut()
                .filter(|m| m.category().participates_in(phase))
            {
                match instance.exec(phase, current).await {
                    Some(next) => current = next,
                    None => {
                        let name = instance.name().to_string();
                        warn!(
                            module = %name,
                            phase = %phase,
                            connection = %self.connection_id,
                            "Pipeline aborted"
                        );
                        self.process.metrics().record_pipeline_abort(&name);
                        timer.finish();
                        return Err(ModuleError::PipelineAbort {
                            name,
                            phase: phase.to_string(),
                        });
                    }
                }
            }
        }

        timer.finish();
        Ok(current)
    }

    /// Detach and discard every instance.
    pub fn close(mut self) {
        self.teardown();
    }

    pub(crate) fn detach_all(&mut self) -> Vec<Box<dyn Module>> {
        let handle = self.process.handle();
        let mut instances = std::mem::take(&mut self.instances);
        for instance in instances.iter_mut() {
            instance.detach(handle);
        }
        instances
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let detached = self.detach_all();
        self.process.release_connection(&self.connection_id);
        debug!(
            connection = %self.connection_id,
            instances = detached.len(),
            "Detached module instances"
        );
    }
}

impl Drop for ConnectionPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Execution order of two instances: priority first, registration second.
fn execution_cmp(a: (f32, usize), b: (f32, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
}
