//! In-memory container engine for tests.
//!
//! Behaves like a single-host engine: names are unique, each running
//! container holds its host port, and starting a container whose port is held
//! by another running container fails with a port conflict. Faults can be
//! injected to exercise the orchestrator's recovery paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{Result, RuntimeError};
use crate::spec::ContainerSpec;
use crate::{ContainerHandle, ContainerRuntime, ContainerState};

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub running: bool,
}

/// Which engine call a queued fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    next_id: u64,
    unavailable: bool,
    faults: HashMap<MockOp, VecDeque<RuntimeError>>,
    calls: HashMap<MockOp, usize>,
}

#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every call fail as if the daemon were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Fail the next call of `op` with `error`. Faults queue up in order.
    pub fn inject_fault(&self, op: MockOp, error: RuntimeError) {
        self.state().faults.entry(op).or_default().push_back(error);
    }

    /// Delete a container behind the orchestrator's back.
    pub fn remove_out_of_band(&self, container_ref: &str) -> bool {
        self.state().containers.remove(container_ref).is_some()
    }

    /// Stop a container behind the orchestrator's back.
    pub fn stop_out_of_band(&self, container_ref: &str) -> bool {
        match self.state().containers.get_mut(container_ref) {
            Some(container) => {
                container.running = false;
                true
            }
            None => false,
        }
    }

    pub fn container(&self, container_ref: &str) -> Option<MockContainer> {
        self.state().containers.get(container_ref).cloned()
    }

    pub fn container_by_name(&self, name: &str) -> Option<MockContainer> {
        self.state()
            .containers
            .values()
            .find(|c| c.spec.name == name)
            .cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn running_count(&self) -> usize {
        self.state().containers.values().filter(|c| c.running).count()
    }

    /// Number of times `op` has been invoked.
    pub fn calls(&self, op: MockOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: MockOp) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        if state.unavailable {
            return Err(RuntimeError::Unavailable("mock engine is down".to_string()));
        }
        if let Some(err) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let mut state = self.enter(MockOp::Create)?;
        if state.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::NameConflict(spec.name.clone()));
        }

        state.next_id += 1;
        let id = format!("mock{:012x}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: false,
            },
        );

        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, container_ref: &str) -> Result<()> {
        let mut state = self.enter(MockOp::Start)?;
        let resolved = resolve(&state, container_ref)?;
        let port = state.containers[&resolved].spec.port.host_port;

        let port_taken = state
            .containers
            .values()
            .any(|c| c.id != resolved && c.running && c.spec.port.host_port == port);
        if port_taken {
            return Err(RuntimeError::PortConflict(format!(
                "Bind for 0.0.0.0:{port} failed: port is already allocated"
            )));
        }

        if let Some(container) = state.containers.get_mut(&resolved) {
            container.running = true;
        }
        Ok(())
    }

    async fn stop(&self, container_ref: &str) -> Result<()> {
        let mut state = self.enter(MockOp::Stop)?;
        let resolved = resolve(&state, container_ref)?;
        if let Some(container) = state.containers.get_mut(&resolved) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, container_ref: &str, force: bool) -> Result<()> {
        let mut state = self.enter(MockOp::Remove)?;
        let resolved = resolve(&state, container_ref)?;
        if state.containers[&resolved].running && !force {
            return Err(RuntimeError::CommandFailed(format!(
                "You cannot remove a running container {resolved}"
            )));
        }
        state.containers.remove(&resolved);
        Ok(())
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerState> {
        let state = self.enter(MockOp::Inspect)?;
        let resolved = resolve(&state, container_ref)?;
        let container = &state.containers[&resolved];

        Ok(ContainerState {
            id: container.id.clone(),
            name: container.spec.name.clone(),
            running: container.running,
            host_port: Some(container.spec.port.host_port),
        })
    }

    async fn ping(&self) -> Result<()> {
        if self.state().unavailable {
            return Err(RuntimeError::Unavailable("mock engine is down".to_string()));
        }
        Ok(())
    }
}

/// Look a container up by id or, like the real engine, by name.
fn resolve(state: &MockState, container_ref: &str) -> Result<String> {
    if state.containers.contains_key(container_ref) {
        return Ok(container_ref.to_string());
    }
    state
        .containers
        .values()
        .find(|c| c.spec.name == container_ref)
        .map(|c| c.id.clone())
        .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {container_ref}")))
}
