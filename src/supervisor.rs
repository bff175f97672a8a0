//! Lifecycle supervisor - the single-writer actor owning all session state
//!
//! Every mutation of the registry, the lock pair, the task list and the
//! observer attachment happens on one task: commands arrive through the
//! [`SupervisorHandle`] with a reply channel, session and task events arrive
//! on their own queues, and `tokio::select!` serializes the lot. Reader
//! threads and callers never touch shared state directly.
//!
//! The supervisor stops on its own when nothing is left to keep the daemon
//! alive - no sessions, no background tasks, no held lock. The [`run`]
//! future resolving is the one and only "may terminate" signal the embedder
//! sees.
//!
//! [`run`]: Supervisor::run

use crate::config::Config;
use crate::launcher::{build_environment, build_launch_spec, LaunchError, LaunchRequest};
use crate::locks::{LockBackend, LockError, ResourceLockManager};
use crate::notification::{presence_notification, Notification};
use crate::observer::SessionObserver;
use crate::registry::{Direction, RegistryError, SessionRegistry};
use crate::session::{Session, SessionEvent, SessionId};
use crate::store::StateStore;
use crate::task::{BackgroundTask, TaskEvent, TaskId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("supervisor is not running")]
    Stopped,
}

enum Command {
    Create {
        request: LaunchRequest,
        reply: oneshot::Sender<Result<Session, SupervisorError>>,
    },
    Remove {
        id: SessionId,
        reply: oneshot::Sender<Result<usize, SupervisorError>>,
    },
    SwitchTo {
        id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Navigate {
        direction: Direction,
        reply: oneshot::Sender<Result<Session, SupervisorError>>,
    },
    Rename {
        id: SessionId,
        name: String,
        reply: oneshot::Sender<()>,
    },
    SpawnTask {
        program: String,
        args: Vec<String>,
        reply: oneshot::Sender<Result<TaskId, SupervisorError>>,
    },
    AcquireLock {
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    ReleaseLock {
        reply: oneshot::Sender<()>,
    },
    Attach {
        observer: Box<dyn SessionObserver>,
        reply: oneshot::Sender<()>,
    },
    Detach {
        reply: oneshot::Sender<()>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<Session>>,
    },
    CurrentSession {
        reply: oneshot::Sender<Option<Session>>,
    },
    Notification {
        reply: oneshot::Sender<Notification>,
    },
    LockHeld {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable command surface. A method returning means the mutation and its
/// notification refresh have both been applied by the supervisor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl SupervisorHandle {
    /// Launch a new session and add it to the registry. Fails with
    /// `CapacityExceeded` before anything is spawned when the registry is
    /// full, and with a spawn error (no registry change) when the launch
    /// itself fails.
    pub async fn create_session(&self, request: LaunchRequest) -> Result<Session, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Create { request, reply })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Remove a session, returning the index it occupied. A session that is
    /// still running is asked to terminate instead; its `Finished` event
    /// completes the removal. Unknown sessions yield `NotFound`, which
    /// callers may treat as benign.
    pub async fn remove_session(&self, id: SessionId) -> Result<usize, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Remove { id, reply })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Make `id` the current session. Returns whether the current session
    /// actually changed; never fails.
    pub async fn switch_to(&self, id: SessionId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::SwitchTo { id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Switch to the neighbor of the current session, wrapping at either end.
    pub async fn navigate(&self, direction: Direction) -> Result<Session, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Navigate { direction, reply })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Set the user-visible session name; the empty string clears it.
    /// Unknown sessions are ignored.
    pub async fn rename(&self, id: SessionId, name: &str) {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Rename {
                id,
                name: name.to_string(),
                reply,
            })
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    /// Start a background task that keeps the daemon alive without a
    /// terminal.
    pub async fn spawn_task(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<TaskId, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SpawnTask {
                program: program.to_string(),
                args: args.to_vec(),
                reply,
            })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    pub async fn acquire_lock(&self) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::AcquireLock { reply })
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    pub async fn release_lock(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::ReleaseLock { reply }).is_err() {
            return;
        }
        let _ = rx.await;
    }

    pub async fn lock_held(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::LockHeld { reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Attach the one foreground observer, replacing any previous attachment
    /// silently. The supervisor switches to the stored current session (or
    /// the last one) so a recreated UI lands where the user left off.
    pub async fn attach(&self, observer: Box<dyn SessionObserver>) {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Attach { observer, reply })
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    /// Detach the observer and persist the current session for the next
    /// attach.
    pub async fn detach(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Detach { reply }).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Snapshot of the session list in registry order.
    pub async fn sessions(&self) -> Vec<Session> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Sessions { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn current_session(&self) -> Option<Session> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::CurrentSession { reply }).is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// What the presence notification currently says.
    pub async fn notification(&self) -> Notification {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Notification { reply }).is_err() {
            return presence_notification(0, 0, false);
        }
        rx.await.unwrap_or_else(|_| presence_notification(0, 0, false))
    }

    /// Ask every session to terminate, drop all of them and stop the
    /// supervisor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown { reply }).is_err() {
            return;
        }
        let _ = rx.await;
    }
}

/// The supervisor actor. Construct with [`Supervisor::new`], then await
/// [`Supervisor::run`] - typically from a spawned task - while issuing
/// commands through the handle.
pub struct Supervisor {
    config: Config,
    registry: SessionRegistry,
    locks: ResourceLockManager,
    tasks: Vec<BackgroundTask>,
    observer: Option<Box<dyn SessionObserver>>,
    current: Option<SessionId>,
    notification: Notification,
    store: StateStore,
    stopping: bool,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    task_tx: mpsc::UnboundedSender<TaskEvent>,
    task_rx: mpsc::UnboundedReceiver<TaskEvent>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        lock_backend: Box<dyn LockBackend>,
        store: StateStore,
    ) -> (Self, SupervisorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            registry: SessionRegistry::new(config.max_sessions),
            locks: ResourceLockManager::new(lock_backend),
            tasks: Vec::new(),
            observer: None,
            current: None,
            notification: presence_notification(0, 0, false),
            store,
            stopping: false,
            config,
            cmd_rx,
            session_tx,
            session_rx,
            task_tx,
            task_rx,
        };
        (supervisor, SupervisorHandle { cmd_tx })
    }

    /// Drive the actor until shutdown or until nothing remains to keep the
    /// daemon alive.
    pub async fn run(mut self) {
        info!("supervisor started");
        while !self.stopping {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    // Every handle is gone; nothing can ever reach us again.
                    None => break,
                },
                Some(event) = self.session_rx.recv() => self.handle_session_event(event),
                Some(event) = self.task_rx.recv() => self.handle_task_event(event),
            }
        }
        info!("supervisor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create { request, reply } => {
                let _ = reply.send(self.create_session(request));
            }
            Command::Remove { id, reply } => {
                let _ = reply.send(self.remove_session(id));
            }
            Command::SwitchTo { id, reply } => {
                let _ = reply.send(self.switch_current(id));
            }
            Command::Navigate { direction, reply } => {
                let _ = reply.send(self.navigate(direction));
            }
            Command::Rename { id, name, reply } => {
                self.rename(id, &name);
                let _ = reply.send(());
            }
            Command::SpawnTask {
                program,
                args,
                reply,
            } => {
                let _ = reply.send(self.spawn_task(&program, &args));
            }
            Command::AcquireLock { reply } => {
                let _ = reply.send(self.acquire_lock());
            }
            Command::ReleaseLock { reply } => {
                self.locks.release();
                self.update_notification();
                let _ = reply.send(());
            }
            Command::Attach { observer, reply } => {
                self.attach(observer);
                let _ = reply.send(());
            }
            Command::Detach { reply } => {
                self.detach();
                let _ = reply.send(());
            }
            Command::Sessions { reply } => {
                let _ = reply.send(self.registry.sessions());
            }
            Command::CurrentSession { reply } => {
                let current = self
                    .current
                    .and_then(|id| self.registry.find(id).cloned());
                let _ = reply.send(current);
            }
            Command::Notification { reply } => {
                let _ = reply.send(self.notification.clone());
            }
            Command::LockHeld { reply } => {
                let _ = reply.send(self.locks.is_held());
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn create_session(&mut self, request: LaunchRequest) -> Result<Session, SupervisorError> {
        // Capacity is checked before the spawn so a doomed add never has
        // side effects.
        if self.registry.len() >= self.registry.max_sessions() {
            return Err(RegistryError::CapacityExceeded {
                max: self.registry.max_sessions(),
            }
            .into());
        }

        let spec = build_launch_spec(&request, &self.config)?;
        let rows = request.rows.max(1);
        let cols = request.cols.max(1);
        let session = Session::spawn(&spec, rows, cols, self.session_tx.clone())?;

        let name = request
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                let n = &request.connection.session_name;
                (!n.is_empty()).then(|| n.clone())
            });
        if let Some(name) = name {
            session.set_name(&name);
        }

        let index = self.registry.add(session.clone())?;
        info!(
            id = %session.id(),
            pid = session.pid(),
            index,
            command = session.command(),
            "session created"
        );
        self.update_notification();
        Ok(session)
    }

    fn remove_session(&mut self, id: SessionId) -> Result<usize, SupervisorError> {
        let Some(session) = self.registry.find(id).cloned() else {
            warn!(%id, "remove requested for unknown session");
            return Err(RegistryError::NotFound.into());
        };
        if session.is_running() {
            // Never force-remove a running session: ask it to terminate and
            // let the Finished event complete the removal.
            session.finish_if_running();
            return Ok(self.registry.index_of(id).unwrap_or(0));
        }
        Ok(self.remove_now(id)?)
    }

    /// Remove the session and, when it was current, switch to the session now
    /// occupying the same index, clamped to the new end of the list.
    fn remove_now(&mut self, id: SessionId) -> Result<usize, RegistryError> {
        let (index, _) = self.registry.remove(id)?;
        info!(%id, index, "session removed");
        if self.current == Some(id) {
            self.current = None;
            if !self.registry.is_empty() {
                let next = index.min(self.registry.len() - 1);
                let next_id = self.registry.get(next).map(|s| s.id());
                if let Some(next_id) = next_id {
                    self.switch_current(next_id);
                }
            }
        }
        self.update_notification();
        Ok(index)
    }

    fn switch_current(&mut self, id: SessionId) -> bool {
        if self.registry.find(id).is_none() || self.current == Some(id) {
            return false;
        }
        self.current = Some(id);
        debug!(%id, "current session changed");
        true
    }

    fn navigate(&mut self, direction: Direction) -> Result<Session, SupervisorError> {
        let next = match self.current {
            Some(current) => self.registry.neighbor(current, direction)?,
            // No current session yet: pick up where the user left off.
            None => self
                .stored_current_or_last()
                .ok_or(RegistryError::Empty)?,
        };
        self.switch_current(next.id());
        Ok(next)
    }

    fn rename(&mut self, id: SessionId, name: &str) {
        match self.registry.find(id).cloned() {
            Some(session) => {
                session.set_name(name);
                self.update_notification();
            }
            None => warn!(%id, "rename requested for unknown session"),
        }
    }

    fn spawn_task(&mut self, program: &str, args: &[String]) -> Result<TaskId, SupervisorError> {
        std::fs::create_dir_all(&self.config.home_dir).map_err(LaunchError::Io)?;
        let env = build_environment(false, &self.config);
        let task = BackgroundTask::spawn(
            program,
            args,
            &self.config.home_dir,
            &env,
            self.task_tx.clone(),
        )?;
        let id = task.id();
        info!(%id, pid = task.pid(), command = program, "background task started");
        self.tasks.push(task);
        self.update_notification();
        Ok(id)
    }

    fn acquire_lock(&mut self) -> Result<(), SupervisorError> {
        self.locks.acquire().map_err(SupervisorError::Lock)?;
        debug!("wake and network locks held");
        self.update_notification();
        Ok(())
    }

    fn attach(&mut self, observer: Box<dyn SessionObserver>) {
        self.observer = Some(observer);
        // State may have changed while no UI was attached.
        if let Some(session) = self.stored_current_or_last() {
            self.switch_current(session.id());
        }
    }

    fn detach(&mut self) {
        self.observer = None;
        if let Err(err) = self.store.set_current_session(self.current) {
            warn!(%err, "failed to persist current session");
        }
    }

    fn shutdown(&mut self) {
        info!("shutdown requested");
        for session in self.registry.sessions() {
            session.finish_if_running();
        }
        self.registry.clear();
        self.current = None;
        self.locks.release();
        self.stopping = true;
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        // Sessions are no longer listened to once removed.
        let Some(session) = self.registry.find(event.session_id()).cloned() else {
            return;
        };

        match event {
            SessionEvent::Finished(id, status) => {
                info!(%id, status, "session finished");
                // With more than one session there is nothing left to show in
                // this slot; a sole remaining session stays visible until the
                // user dismisses it.
                if self.registry.len() > 1 {
                    if let Err(err) = self.remove_now(id) {
                        warn!(%id, %err, "failed to remove finished session");
                    }
                }
                self.notify(|o| o.on_finished(&session));
            }
            SessionEvent::OutputChanged(_) => self.notify(|o| o.on_text_changed(&session)),
            SessionEvent::TitleChanged(_) => self.notify(|o| o.on_title_changed(&session)),
            SessionEvent::Bell(_) => self.notify(|o| o.on_bell(&session)),
            SessionEvent::ClipboardText(_, ref text) => {
                self.notify(|o| o.on_clipboard_text(&session, text));
            }
            SessionEvent::ColorsChanged(_) => self.notify(|o| o.on_colors_changed(&session)),
        }
    }

    fn handle_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Exited { id, status } => {
                info!(%id, status, "background task exited");
                self.tasks.retain(|t| t.id() != id);
                self.update_notification();
            }
        }
    }

    /// Deliver an event to the observer attached right now, if any. The
    /// attachment is snapshotted once per event; with none attached the
    /// event is dropped.
    fn notify(&self, deliver: impl FnOnce(&dyn SessionObserver)) {
        if let Some(observer) = self.observer.as_deref() {
            deliver(observer);
        }
    }

    /// Recompute the presence notification after any change that affects it.
    /// When nothing remains to keep the daemon alive the supervisor stops
    /// instead.
    fn update_notification(&mut self) {
        if !self.locks.is_held() && self.registry.is_empty() && self.tasks.is_empty() {
            info!("no sessions, tasks or locks remain");
            self.stopping = true;
        } else {
            self.notification = presence_notification(
                self.registry.len(),
                self.tasks.len(),
                self.locks.is_held(),
            );
        }
    }

    /// The stored current session when it still exists, else the last one.
    fn stored_current_or_last(&self) -> Option<Session> {
        if let Some(id) = self.store.current_session() {
            if let Some(session) = self.registry.find(id) {
                return Some(session.clone());
            }
        }
        self.registry.last().cloned()
    }
}
