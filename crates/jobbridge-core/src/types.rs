use std::ffi::c_int;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type RawHandle = c_int;

/// Native handle for a job or a durable object (host, VM, snapshot).
///
/// The native library owns the handle; dropping a `JobHandle` releases
/// nothing.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(RawHandle);

impl JobHandle {
    pub const INVALID: JobHandle = JobHandle(0);

    pub const fn from_raw(raw: RawHandle) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> RawHandle {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub c_int);

impl PropertyId {
    pub const NONE: PropertyId = PropertyId(0);
    pub const META_DATA_CONTAINER: PropertyId = PropertyId(2);

    pub const HOST_HOSTTYPE: PropertyId = PropertyId(50);
    pub const HOST_API_VERSION: PropertyId = PropertyId(51);

    pub const VM_NUM_VCPUS: PropertyId = PropertyId(101);
    pub const VM_VMX_PATHNAME: PropertyId = PropertyId(103);
    pub const VM_MEMORY_SIZE: PropertyId = PropertyId(106);
    pub const VM_READ_ONLY: PropertyId = PropertyId(107);
    pub const VM_POWER_STATE: PropertyId = PropertyId(129);
    pub const VM_TOOLS_STATE: PropertyId = PropertyId(152);
    pub const VM_IS_RUNNING: PropertyId = PropertyId(196);

    pub const JOB_RESULT_ERROR_CODE: PropertyId = PropertyId(3000);
    pub const JOB_RESULT_USER_MESSAGE: PropertyId = PropertyId(3002);
    pub const JOB_RESULT_EXIT_CODE: PropertyId = PropertyId(3004);
    pub const JOB_RESULT_COMMAND_OUTPUT: PropertyId = PropertyId(3005);
    pub const JOB_RESULT_HANDLE: PropertyId = PropertyId(3010);
    pub const JOB_RESULT_GUEST_OBJECT_EXISTS: PropertyId = PropertyId(3011);
    pub const JOB_RESULT_GUEST_PROGRAM_ELAPSED_TIME: PropertyId = PropertyId(3017);
    pub const JOB_RESULT_GUEST_PROGRAM_EXIT_CODE: PropertyId = PropertyId(3018);
    pub const JOB_RESULT_ITEM_NAME: PropertyId = PropertyId(3035);
    pub const JOB_RESULT_FOUND_ITEM_DESCRIPTION: PropertyId = PropertyId(3036);
    pub const JOB_RESULT_PROCESS_ID: PropertyId = PropertyId(3051);
    pub const JOB_RESULT_PROCESS_OWNER: PropertyId = PropertyId(3052);
    pub const JOB_RESULT_PROCESS_COMMAND: PropertyId = PropertyId(3053);
    pub const JOB_RESULT_FILE_FLAGS: PropertyId = PropertyId(3054);
    pub const JOB_RESULT_PROCESS_START_TIME: PropertyId = PropertyId(3055);
    pub const JOB_RESULT_PROCESS_BEING_DEBUGGED: PropertyId = PropertyId(3057);

    pub const FOUND_ITEM_LOCATION: PropertyId = PropertyId(4010);

    pub const SNAPSHOT_DISPLAYNAME: PropertyId = PropertyId(4200);
    pub const SNAPSHOT_DESCRIPTION: PropertyId = PropertyId(4201);
    pub const SNAPSHOT_POWERSTATE: PropertyId = PropertyId(4205);

    pub const fn raw(self) -> c_int {
        self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "property#{}", self.0)
    }
}

impl From<c_int> for PropertyId {
    fn from(raw: c_int) -> Self {
        Self(raw)
    }
}

/// How a property's native value must be read.
///
/// Discovered per (handle, property) pair; never inferred from the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Any,
    Integer,
    String,
    Bool,
    Handle,
    Int64,
    Blob,
    Unknown(c_int),
}

impl PropertyType {
    pub fn from_raw(raw: c_int) -> Self {
        match raw {
            0 => PropertyType::Any,
            1 => PropertyType::Integer,
            2 => PropertyType::String,
            3 => PropertyType::Bool,
            4 => PropertyType::Handle,
            5 => PropertyType::Int64,
            6 => PropertyType::Blob,
            other => PropertyType::Unknown(other),
        }
    }

    pub fn raw(self) -> c_int {
        match self {
            PropertyType::Any => 0,
            PropertyType::Integer => 1,
            PropertyType::String => 2,
            PropertyType::Bool => 3,
            PropertyType::Handle => 4,
            PropertyType::Int64 => 5,
            PropertyType::Blob => 6,
            PropertyType::Unknown(raw) => raw,
        }
    }

    /// Whether a fetched value of this type is a native-owned buffer.
    pub fn owns_native_buffer(self) -> bool {
        matches!(self, PropertyType::String | PropertyType::Blob)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyType::Any => f.write_str("any"),
            PropertyType::Integer => f.write_str("integer"),
            PropertyType::String => f.write_str("string"),
            PropertyType::Bool => f.write_str("bool"),
            PropertyType::Handle => f.write_str("handle"),
            PropertyType::Int64 => f.write_str("int64"),
            PropertyType::Blob => f.write_str("blob"),
            PropertyType::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Integer(i32),
    String(String),
    Bool(bool),
    Handle(JobHandle),
    Int64(i64),
    Blob(Vec<u8>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyType {
        match self {
            PropertyValue::Integer(_) => PropertyType::Integer,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::Handle(_) => PropertyType::Handle,
            PropertyValue::Int64(_) => PropertyType::Int64,
            PropertyValue::Blob(_) => PropertyType::Blob,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int64(v) => Some(*v),
            PropertyValue::Integer(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<JobHandle> {
        match self {
            PropertyValue::Handle(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Blob(v) => Some(v),
            _ => None,
        }
    }
}

/// Native event kinds delivered to the trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCompleted,
    JobProgress,
    FindItem,
    Other(c_int),
}

impl EventKind {
    pub fn from_raw(raw: c_int) -> Self {
        match raw {
            2 => EventKind::JobCompleted,
            3 => EventKind::JobProgress,
            8 => EventKind::FindItem,
            other => EventKind::Other(other),
        }
    }

    pub fn raw(self) -> c_int {
        match self {
            EventKind::JobCompleted => 2,
            EventKind::JobProgress => 3,
            EventKind::FindItem => 8,
            EventKind::Other(raw) => raw,
        }
    }

    /// Only job completion ends an association's life.
    pub fn is_terminal(self) -> bool {
        self == EventKind::JobCompleted
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::JobCompleted => f.write_str("job-completed"),
            EventKind::JobProgress => f.write_str("job-progress"),
            EventKind::FindItem => f.write_str("find-item"),
            EventKind::Other(raw) => write!(f, "event({raw})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_type_tags_roundtrip_through_raw() {
        for raw in 0..=6 {
            assert_eq!(PropertyType::from_raw(raw).raw(), raw);
        }
        assert_eq!(PropertyType::from_raw(42), PropertyType::Unknown(42));
    }

    #[test]
    fn only_job_completed_is_terminal() {
        assert!(EventKind::from_raw(2).is_terminal());
        assert!(!EventKind::from_raw(3).is_terminal());
        assert!(!EventKind::from_raw(8).is_terminal());
        assert!(!EventKind::from_raw(99).is_terminal());
    }

    #[test]
    fn property_value_serializes_tagged() {
        let v = PropertyValue::String("abc".to_string());
        let json = serde_json::to_string(&v).expect("serialize");
        assert_eq!(json, r#"{"type":"string","value":"abc"}"#);
        let back: PropertyValue = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, v);
    }

    #[test]
    fn invalid_handle_is_zero() {
        assert!(!JobHandle::INVALID.is_valid());
        assert!(JobHandle::from_raw(7).is_valid());
        assert_eq!(JobHandle::default(), JobHandle::INVALID);
    }
}
