//! Start native jobs, get called back on completion, and read typed results.

pub mod bridge;
pub mod vm;

pub use bridge::{JobBridge, JobGuard};
pub use vm::{ConnectParams, DirEntry, GuestProcessInfo, Host, ProgramResult, Snapshot, Vm};

pub use jobbridge_core::{
    codes, ops, AssociationToken, BridgeError, ClientData, EventKind, HandlerFault,
    JobEventHandler, JobHandle, ManagedRuntime, PropertyId, PropertyType, PropertyValue, Result,
    RuntimeEnv,
};
