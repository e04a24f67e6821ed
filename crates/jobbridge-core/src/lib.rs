//! Bridge between asynchronous native job systems and managed event handlers.

pub mod association;
pub mod codes;
pub mod config;
pub mod error;
pub mod marshal;
pub mod native;
pub mod ops;
pub mod runtime;
pub mod trampoline;
pub mod types;

pub use association::{AssociationStats, AssociationTable, AssociationToken, Dispatch};
pub use config::{config, BridgeConfig};
pub use error::{BridgeError, HandlerFault, NativeError, Result, RuntimeFault};
pub use marshal::fetch_properties;
pub use native::{CallShape, EventProc, FetchTarget, NativeJobApi, RawPropertyValue, MAX_PROPERTIES};
pub use ops::Operation;
pub use runtime::{
    handler_fn, AttachOutcome, ClientData, JobEventHandler, LocalRuntime, ManagedRuntime,
    RuntimeEnv,
};
pub use trampoline::{global_table, job_event_trampoline, register_callback, Registration};
pub use types::{EventKind, JobHandle, PropertyId, PropertyType, PropertyValue, RawHandle};
