//! muxd library - session/process lifecycle management for terminal multiplexing

pub mod config;
pub mod launcher;
pub mod locks;
pub mod notification;
pub mod observer;
pub mod registry;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod task;

// Re-export commonly used types
pub use config::Config;
pub use launcher::{
    build_environment, build_launch_spec, parse_connection_descriptor, ConnectionParams,
    LaunchError, LaunchRequest, LaunchSpec,
};
pub use locks::{LockBackend, LockError, NoopLockBackend, ResourceLockManager};
pub use notification::{presence_notification, Notification, Priority};
pub use observer::SessionObserver;
pub use registry::{Direction, RegistryError, SessionRegistry};
pub use session::{Session, SessionEvent, SessionId};
pub use store::StateStore;
pub use supervisor::{Supervisor, SupervisorError, SupervisorHandle};
pub use task::{BackgroundTask, TaskEvent, TaskId};
