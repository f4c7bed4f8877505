//! Workspace lifecycle orchestration.
//!
//! [`WorkspaceOrchestrator`] keeps three things in step: the workspace rows in
//! the store, the containers in the engine, and the host ports those
//! containers publish. The engine is the ground truth: a stored RUNNING status
//! is confirmed with `inspect` before any decision depends on it, and rows
//! that disagree with the engine are corrected on the spot.
//!
//! Operations on one user are serialized by a per-user lock (this is what
//! makes "one running workspace per user" hold), operations on one workspace
//! by a per-workspace lock. Locks are always taken user first.

use std::sync::Arc;

use codehost_ports::PortAllocator;
use codehost_runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, RuntimeError};
use tracing::{debug, error, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::container::{build_container_spec, ContainerTarget};
use crate::error::{OrchestratorError, Result};
use crate::history::{HistoryPage, PageRequest, Pagination};
use crate::locks::KeyedLocks;
use crate::store::WorkspaceStore;
use crate::workspace::{
    validate_name, CreateWorkspaceRequest, StatusUpdate, Workspace, WorkspaceConnection,
    WorkspaceFilters,
};

#[derive(Clone)]
pub struct WorkspaceOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn WorkspaceStore>,
    runtime: Arc<dyn ContainerRuntime>,
    ports: PortAllocator,
    config: OrchestratorConfig,
    user_locks: KeyedLocks<String>,
    workspace_locks: KeyedLocks<i64>,
}

/// What the engine reports for a workspace's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observed {
    Running { host_port: Option<u16> },
    Stopped { host_port: Option<u16> },
    Missing,
}

impl Observed {
    pub(crate) fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// A started container and the host port it publishes.
struct Launched {
    container_ref: String,
    host_port: u16,
}

impl WorkspaceOrchestrator {
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        runtime: Arc<dyn ContainerRuntime>,
        config: OrchestratorConfig,
    ) -> Self {
        let ports = PortAllocator::new(config.port_range, config.probe_host);
        Self::with_allocator(store, runtime, ports, config)
    }

    pub fn with_allocator(
        store: Arc<dyn WorkspaceStore>,
        runtime: Arc<dyn ContainerRuntime>,
        ports: PortAllocator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                runtime,
                ports,
                config,
                user_locks: KeyedLocks::new(),
                workspace_locks: KeyedLocks::new(),
            }),
        }
    }

    pub fn store(&self) -> &dyn WorkspaceStore {
        self.inner.store.as_ref()
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.inner.runtime.as_ref()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Create a workspace and bring its container up.
    ///
    /// Nothing is persisted unless the container started; a container created
    /// along the way is removed again on failure.
    #[instrument(skip(self, req), fields(name = %req.name, project_id = req.project_id))]
    pub async fn create_workspace(
        &self,
        user_id: &str,
        req: CreateWorkspaceRequest,
    ) -> Result<WorkspaceConnection> {
        let draft = req.into_new_workspace(user_id)?;
        let _user = self.inner.user_locks.lock(draft.user_id.clone()).await;

        self.ensure_name_available(draft.project_id, &draft.name, None)
            .await?;
        self.ensure_no_running_workspace(&draft.user_id, None)
            .await?;

        let target = ContainerTarget::for_new(&draft, &self.inner.config.workspace_root)?;
        let launched = self.launch(&target, None, Vec::new()).await?;
        let uri = self.inner.config.connection_uri(launched.host_port);
        let draft = draft.running(launched.container_ref.clone(), uri, launched.host_port);

        let ws = match self.inner.store.insert_workspace(&draft).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "insert failed, removing the new container");
                self.discard_container(&launched.container_ref).await;
                return Err(e);
            }
        };
        self.open_session(user_id, &ws).await?;

        info!(
            workspace_id = ws.id,
            container = %ws.container_name(),
            port = launched.host_port,
            "workspace created"
        );
        Ok(WorkspaceConnection::from(&ws))
    }

    /// Record a workspace without starting anything.
    #[instrument(skip(self, req), fields(name = %req.name, project_id = req.project_id))]
    pub async fn provision_workspace(
        &self,
        user_id: &str,
        req: CreateWorkspaceRequest,
    ) -> Result<Workspace> {
        let draft = req.into_new_workspace(user_id)?;
        self.ensure_name_available(draft.project_id, &draft.name, None)
            .await?;

        let ws = self.inner.store.insert_workspace(&draft).await?;
        info!(workspace_id = ws.id, slug = %ws.slug, "workspace provisioned");
        Ok(ws)
    }

    /// Start a workspace. Starting a running workspace returns its current
    /// connection.
    #[instrument(skip(self))]
    pub async fn start_workspace(&self, user_id: &str, id: i64) -> Result<WorkspaceConnection> {
        let owner = self.require(id).await?.user_id;
        let _user = self.inner.user_locks.lock(owner.clone()).await;
        self.ensure_no_running_workspace(&owner, Some(id)).await?;

        let _guard = self.inner.workspace_locks.lock(id).await;
        let mut ws = self.require(id).await?;

        if ws.is_running() {
            match self.observe(&ws).await? {
                Observed::Running { .. } => {
                    debug!(workspace_id = id, "already running");
                    self.open_session(user_id, &ws).await?;
                    return Ok(WorkspaceConnection::from(&ws));
                }
                observed => ws = self.mark_stopped(&ws, observed.is_missing()).await?,
            }
        }

        let target = ContainerTarget::for_workspace(&ws, &self.inner.config.workspace_root)?;
        let launched = match ws.container() {
            Some(container_ref) => self.resume(&ws, container_ref, &target).await?,
            None => self.launch(&target, ws.host_port, Vec::new()).await?,
        };

        let uri = self.inner.config.connection_uri(launched.host_port);
        let update = StatusUpdate::running(launched.container_ref, uri, launched.host_port);
        let ws = self.persist(&ws, &update).await?;
        self.open_session(user_id, &ws).await?;

        info!(workspace_id = id, port = launched.host_port, "workspace started");
        Ok(WorkspaceConnection::from(&ws))
    }

    /// Stop a workspace. Stopping a stopped workspace is a no-op, and a
    /// container that disappeared from the engine counts as stopped.
    #[instrument(skip(self))]
    pub async fn stop_workspace(&self, user_id: &str, id: i64) -> Result<WorkspaceConnection> {
        let _guard = self.inner.workspace_locks.lock(id).await;
        let ws = self.require(id).await?;

        if !ws.is_running() {
            debug!(workspace_id = id, "already stopped");
            return Ok(WorkspaceConnection::from(&ws));
        }

        let container_ref = match ws.container() {
            Some(container_ref) => match self.inner.runtime.stop(container_ref).await {
                Ok(()) => Some(container_ref.to_string()),
                Err(RuntimeError::NotFound(_)) => {
                    info!(workspace_id = id, container_ref, "container already gone");
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let ws = self
            .persist(&ws, &StatusUpdate::stopped(container_ref, ws.host_port))
            .await?;
        self.close_session(user_id, &ws).await?;

        info!(workspace_id = id, "workspace stopped");
        Ok(WorkspaceConnection::from(&ws))
    }

    #[instrument(skip(self))]
    pub async fn restart_workspace(&self, user_id: &str, id: i64) -> Result<WorkspaceConnection> {
        self.stop_workspace(user_id, id).await?;
        self.start_workspace(user_id, id).await
    }

    /// Delete a stopped workspace, its container and its history.
    ///
    /// The host directory is left in place.
    #[instrument(skip(self))]
    pub async fn delete_workspace(&self, user_id: &str, id: i64) -> Result<()> {
        let _guard = self.inner.workspace_locks.lock(id).await;
        let mut ws = self.require(id).await?;

        if ws.is_running() {
            match self.observe(&ws).await? {
                Observed::Running { .. } => {
                    return Err(OrchestratorError::Conflict(format!(
                        "workspace {id} is running; stop the workspace first"
                    )));
                }
                observed => ws = self.mark_stopped(&ws, observed.is_missing()).await?,
            }
        }

        if let Some(container_ref) = ws.container() {
            match self.inner.runtime.remove(container_ref, true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self.inner.store.delete_workspace(id).await {
            error!(
                workspace_id = id,
                error = %e,
                "consistency hazard: container removed but workspace row remains"
            );
            return Err(e);
        }

        info!(workspace_id = id, user_id, "workspace deleted");
        Ok(())
    }

    /// Change the display name. The slug, container and host directory keep
    /// their original names.
    #[instrument(skip(self))]
    pub async fn rename_workspace(&self, user_id: &str, id: i64, new_name: &str) -> Result<Workspace> {
        let name = validate_name(new_name)?;
        let _guard = self.inner.workspace_locks.lock(id).await;
        let ws = self.require(id).await?;

        if ws.name == name {
            return Ok(ws);
        }
        self.ensure_name_available(ws.project_id, &name, Some(id))
            .await?;

        let renamed = self.inner.store.rename_workspace(id, &name).await?;
        info!(workspace_id = id, user_id, from = %ws.name, to = %renamed.name, "workspace renamed");
        Ok(renamed)
    }

    pub async fn get_workspace(&self, id: i64) -> Result<Workspace> {
        self.require(id).await
    }

    pub async fn list_workspaces(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>> {
        self.inner.store.list_workspaces(filters).await
    }

    pub async fn list_history(&self, id: i64, page: PageRequest) -> Result<HistoryPage> {
        self.require(id).await?;
        let items = self.inner.store.list_history(id, page).await?;
        let total = self.inner.store.count_history(id).await?;

        Ok(HistoryPage {
            items,
            pagination: Pagination::new(page, total),
        })
    }

    pub(crate) async fn lock_workspace(&self, id: i64) -> tokio::sync::OwnedMutexGuard<()> {
        self.inner.workspace_locks.lock(id).await
    }

    pub(crate) async fn require(&self, id: i64) -> Result<Workspace> {
        self.inner
            .store
            .find_workspace(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    async fn ensure_name_available(
        &self,
        project_id: i64,
        name: &str,
        except: Option<i64>,
    ) -> Result<()> {
        match self.inner.store.find_workspace_by_name(project_id, name).await? {
            Some(existing) if Some(existing.id) != except => Err(OrchestratorError::Conflict(
                format!("workspace '{name}' already exists in project {project_id}"),
            )),
            _ => Ok(()),
        }
    }

    /// Fail if the user has another workspace that is really running. A row
    /// only the store believes is running gets corrected instead.
    ///
    /// Callers hold the user lock.
    async fn ensure_no_running_workspace(&self, user_id: &str, except: Option<i64>) -> Result<()> {
        let Some(running) = self
            .inner
            .store
            .find_running_workspace_for_user(user_id)
            .await?
        else {
            return Ok(());
        };
        if Some(running.id) == except {
            return Ok(());
        }

        let _guard = self.inner.workspace_locks.lock(running.id).await;
        let running = match self.inner.store.find_workspace(running.id).await? {
            Some(ws) if ws.is_running() => ws,
            _ => return Ok(()),
        };

        match self.observe(&running).await? {
            Observed::Running { .. } => Err(OrchestratorError::Conflict(format!(
                "workspace '{}' ({}) is already running; stop it first",
                running.name, running.id
            ))),
            observed => {
                self.mark_stopped(&running, observed.is_missing()).await?;
                Ok(())
            }
        }
    }

    pub(crate) async fn observe(&self, ws: &Workspace) -> Result<Observed> {
        match ws.container() {
            Some(container_ref) => self.observe_ref(container_ref).await,
            None => Ok(Observed::Missing),
        }
    }

    async fn observe_ref(&self, container_ref: &str) -> Result<Observed> {
        match self.inner.runtime.inspect(container_ref).await {
            Ok(state) if state.running => Ok(Observed::Running {
                host_port: state.host_port,
            }),
            Ok(state) => Ok(Observed::Stopped {
                host_port: state.host_port,
            }),
            Err(RuntimeError::NotFound(_)) => Ok(Observed::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Bring an existing container back, recreating it when it is gone or
    /// cannot get its old port back.
    async fn resume(
        &self,
        ws: &Workspace,
        container_ref: &str,
        target: &ContainerTarget,
    ) -> Result<Launched> {
        let bound = match self.observe_ref(container_ref).await? {
            Observed::Missing => {
                info!(workspace_id = ws.id, container_ref, "container gone, creating a new one");
                return self.launch(target, ws.host_port, Vec::new()).await;
            }
            Observed::Running { host_port } => match host_port.or(ws.host_port) {
                Some(port) => {
                    info!(workspace_id = ws.id, container_ref, port, "adopting running container");
                    return Ok(Launched {
                        container_ref: container_ref.to_string(),
                        host_port: port,
                    });
                }
                None => {
                    warn!(workspace_id = ws.id, container_ref, "running container publishes no port, recreating");
                    self.discard_container(container_ref).await;
                    return self.launch(target, None, Vec::new()).await;
                }
            },
            Observed::Stopped { host_port } => host_port.or(ws.host_port),
        };

        let port = self
            .allocate_port(&target.container_name, bound, Vec::new())
            .await?;

        if Some(port) == bound {
            match self.inner.runtime.start(container_ref).await {
                Ok(()) => {
                    return Ok(Launched {
                        container_ref: container_ref.to_string(),
                        host_port: port,
                    })
                }
                Err(RuntimeError::PortConflict(msg)) => {
                    warn!(workspace_id = ws.id, port, %msg, "bound port taken, recreating container");
                    self.discard_container(container_ref).await;
                    return self.launch(target, None, vec![port]).await;
                }
                Err(RuntimeError::NotFound(_)) => {
                    return self.launch(target, Some(port), Vec::new()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(workspace_id = ws.id, ?bound, port, "previous port unavailable, recreating container");
        self.discard_container(container_ref).await;
        self.launch(target, Some(port), Vec::new()).await
    }

    /// Probe for a free port off the async workers; a sweep over a busy
    /// range is tens of thousands of binds.
    async fn allocate_port(
        &self,
        name: &str,
        preferred: Option<u16>,
        exclude: Vec<u16>,
    ) -> Result<u16> {
        let ports = self.inner.ports.clone();
        let name = name.to_string();
        let port = tokio::task::spawn_blocking(move || ports.allocate(&name, preferred, &exclude))
            .await
            .map_err(std::io::Error::other)??;
        Ok(port)
    }

    /// Create and start a fresh container for `target`.
    ///
    /// A port conflict reported by the engine means the probe lost a race;
    /// the port is excluded and allocation runs again, up to the configured
    /// retry limit.
    async fn launch(
        &self,
        target: &ContainerTarget,
        preferred: Option<u16>,
        mut exclude: Vec<u16>,
    ) -> Result<Launched> {
        tokio::fs::create_dir_all(&target.host_dir).await?;

        let attempts = self.inner.config.port_retry_limit + 1;
        let mut preferred = preferred;

        for attempt in 1..=attempts {
            let port = self
                .allocate_port(&target.container_name, preferred.take(), exclude.clone())
                .await?;
            let spec = build_container_spec(target, &self.inner.config.container, port);

            let handle = match self.create_container(&spec).await {
                Ok(handle) => handle,
                Err(RuntimeError::PortConflict(msg)) => {
                    warn!(port, attempt, %msg, "port taken at create, allocating again");
                    exclude.push(port);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.inner.runtime.start(&handle.id).await {
                Ok(()) => {
                    return Ok(Launched {
                        container_ref: handle.id,
                        host_port: port,
                    })
                }
                Err(RuntimeError::PortConflict(msg)) => {
                    warn!(port, attempt, %msg, "port taken at start, allocating again");
                    exclude.push(port);
                    self.discard_container(&handle.id).await;
                }
                Err(e) => {
                    self.discard_container(&handle.id).await;
                    return Err(e.into());
                }
            }
        }

        Err(OrchestratorError::Conflict(format!(
            "host port for {} still in use after {attempts} attempts",
            target.container_name
        )))
    }

    /// Create a container, clearing out a stale container holding the name.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> std::result::Result<ContainerHandle, RuntimeError> {
        match self.inner.runtime.create(spec).await {
            Err(RuntimeError::NameConflict(msg)) => {
                warn!(name = %spec.name, %msg, "removing stale container holding the name");
                match self.inner.runtime.remove(&spec.name, true).await {
                    Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.inner.runtime.create(spec).await
            }
            other => other,
        }
    }

    async fn discard_container(&self, container_ref: &str) {
        match self.inner.runtime.remove(container_ref, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {
                debug!(container_ref, "container removed");
            }
            Err(e) => warn!(container_ref, error = %e, "failed to remove container"),
        }
    }

    /// Store a runtime transition that already happened in the engine.
    pub(crate) async fn persist(&self, ws: &Workspace, update: &StatusUpdate) -> Result<Workspace> {
        self.inner
            .store
            .update_workspace_status(ws.id, update)
            .await
            .inspect_err(|e| {
                error!(
                    workspace_id = ws.id,
                    status = %update.status,
                    error = %e,
                    "consistency hazard: engine changed but the workspace row was not updated"
                )
            })
    }

    /// Correct a row the store holds as RUNNING while the engine disagrees.
    pub(crate) async fn mark_stopped(&self, ws: &Workspace, missing: bool) -> Result<Workspace> {
        warn!(
            workspace_id = ws.id,
            missing, "stored as RUNNING but the container is not running; marking STOPPED"
        );
        let container_ref = if missing { None } else { ws.container_ref.clone() };
        let updated = self
            .persist(ws, &StatusUpdate::stopped(container_ref, ws.host_port))
            .await?;
        self.close_session(&ws.user_id, &updated).await?;
        Ok(updated)
    }

    async fn open_session(&self, user_id: &str, ws: &Workspace) -> Result<()> {
        self.inner
            .store
            .open_history_session(user_id, ws.id)
            .await
            .map(|_| ())
            .inspect_err(|e| {
                error!(workspace_id = ws.id, error = %e, "consistency hazard: running workspace has no open session")
            })
    }

    async fn close_session(&self, user_id: &str, ws: &Workspace) -> Result<()> {
        self.inner
            .store
            .close_history_session(user_id, ws.id)
            .await
            .map(|_| ())
            .inspect_err(|e| {
                error!(workspace_id = ws.id, error = %e, "consistency hazard: stopped workspace kept an open session")
            })
    }
}

impl std::fmt::Debug for WorkspaceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceOrchestrator")
            .field("runtime", &self.inner.runtime.name())
            .field("ports", &self.inner.ports)
            .finish_non_exhaustive()
    }
}
