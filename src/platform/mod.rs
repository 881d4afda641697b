//! External collaborator interfaces: storage, permissions, host actions.
//!
//! The core consumes these surfaces but never implements them against a real
//! browser; the embedding extension supplies the production versions, and the
//! Noop/Static/Memory implementations here keep everything testable in
//! isolation.

pub mod host;
pub mod permissions;
pub mod storage;

pub use host::{CaptureBackend, Clipboard, HostActions, NoopCapture, NoopClipboard, NoopHost};
pub use permissions::{PermissionBroker, StaticPermissions};
pub use storage::{ChangeListener, KvStore, MemoryStore, StorageValue};
