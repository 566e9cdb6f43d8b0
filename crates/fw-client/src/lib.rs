//! Client retrieval layer for foldwatch.
//!
//! This crate owns everything between the decoded protocol connection and
//! the aggregation engine in `fw-core`:
//! - Typed protocol messages and the message source abstraction
//! - Per-client retrieval cycles with an in-flight guard, cooperative
//!   cancellation, and a heartbeat watchdog
//! - The shared client registry
//! - The persisted log mirror
//! - The protein catalog feeding credit and bonus calculations

pub mod message;
pub mod mirror;
pub mod proteins;
pub mod registry;
pub mod retrieve;
pub mod settings;

pub use message::{ClientMessage, MessageSource, QueuedSource, TransportError};
pub use mirror::{LogMirror, WriteMode};
pub use proteins::{ProteinCatalog, ProteinError, ProteinService};
pub use registry::{ClientRegistry, RegistryEvent};
pub use retrieve::{
    CancelToken, ClientEvent, MonitoredClient, RetrievalJob, RetrievalOutcome, retrieve_all,
};
pub use settings::{ClientSettings, SettingsError, DEFAULT_PORT};
