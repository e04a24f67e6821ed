//! Numeric error codes surfaced to callers.
//!
//! Native codes are the job system's own and pass through unchanged; the
//! `BRIDGE_E_*` range is owned by this crate.

pub const OK: u16 = 0;

pub const E_FAIL: u16 = 1;
pub const E_OUT_OF_MEMORY: u16 = 2;
pub const E_INVALID_ARG: u16 = 3;
pub const E_FILE_NOT_FOUND: u16 = 4;
pub const E_OBJECT_IS_BUSY: u16 = 5;
pub const E_NOT_SUPPORTED: u16 = 6;
pub const E_FILE_ERROR: u16 = 7;
pub const E_DISK_FULL: u16 = 8;
pub const E_CANCELLED: u16 = 10;
pub const E_FILE_ALREADY_EXISTS: u16 = 12;
pub const E_ALREADY_EXISTS: u16 = 23;

pub const E_INVALID_HANDLE: u16 = 1000;
pub const E_NOT_SUPPORTED_ON_HANDLE_TYPE: u16 = 1001;
pub const E_TOO_MANY_HANDLES: u16 = 1002;

pub const E_NOT_FOUND: u16 = 2000;
pub const E_TYPE_MISMATCH: u16 = 2001;

pub const E_TIMEOUT_WAITING_FOR_TOOLS: u16 = 3000;
pub const E_UNRECOGNIZED_COMMAND: u16 = 3001;
pub const E_OP_NOT_SUPPORTED_ON_GUEST: u16 = 3003;
pub const E_PROGRAM_NOT_STARTED: u16 = 3004;
pub const E_VM_NOT_RUNNING: u16 = 3006;
pub const E_VM_IS_RUNNING: u16 = 3007;
pub const E_CANNOT_CONNECT_TO_VM: u16 = 3008;
pub const E_TOOLS_NOT_RUNNING: u16 = 3016;
pub const E_GUEST_OPERATIONS_PROHIBITED: u16 = 3017;
pub const E_CANNOT_AUTHENTICATE_WITH_GUEST: u16 = 3024;
pub const E_CANNOT_POWER_ON_VM: u16 = 3041;

pub const E_VM_NOT_FOUND: u16 = 4000;
pub const E_CANNOT_READ_VM_CONFIG: u16 = 4002;
pub const E_VM_ALREADY_LOADED: u16 = 4004;

pub const E_UNRECOGNIZED_PROPERTY: u16 = 6000;
pub const E_INVALID_PROPERTY_VALUE: u16 = 6001;
pub const E_READ_ONLY_PROPERTY: u16 = 6002;
pub const E_MISSING_REQUIRED_PROPERTY: u16 = 6003;
pub const E_PROPERTY_TYPE_MISMATCH: u16 = 6005;

pub const E_SNAPSHOT_INVAL: u16 = 13000;
pub const E_SNAPSHOT_NOTFOUND: u16 = 13003;
pub const E_SNAPSHOT_EXISTS: u16 = 13004;
pub const E_SNAPSHOT_LOCKED: u16 = 13010;
pub const E_SNAPSHOT_MAXSNAPSHOTS: u16 = 13019;

pub const E_CANNOT_CONNECT_TO_HOST: u16 = 18000;
pub const E_NOT_FOR_REMOTE_HOST: u16 = 18001;
pub const E_INVALID_HOSTNAME_SPECIFICATION: u16 = 18002;

pub const E_NOT_A_FILE: u16 = 20001;
pub const E_NOT_A_DIRECTORY: u16 = 20002;
pub const E_NO_SUCH_PROCESS: u16 = 20003;
pub const E_FILE_NAME_TOO_LONG: u16 = 20004;

pub const E_TOOLS_INSTALL_ALREADY_UP_TO_DATE: u16 = 21010;
pub const E_TOOLS_INSTALL_IN_PROGRESS: u16 = 21011;

pub const E_WRAPPER_WORKSTATION_NOT_INSTALLED: u16 = 22001;
pub const E_WRAPPER_VERSION_NOT_FOUND: u16 = 22002;
pub const E_WRAPPER_SERVICEPROVIDER_NOT_FOUND: u16 = 22003;
pub const E_WRAPPER_PLAYER_NOT_INSTALLED: u16 = 22004;

pub const BRIDGE_E_TOO_MANY_PROPERTIES: u16 = 30001;
pub const BRIDGE_E_CANNOT_RETURN_UNKNOWN_PROPERTYTYPE: u16 = 30002;
pub const BRIDGE_E_ASSOCIATION_LIMIT: u16 = 30003;
pub const BRIDGE_E_STALE_ASSOCIATION: u16 = 30004;
pub const BRIDGE_E_RUNTIME_FAULT: u16 = 30005;

const NAMES: &[(u16, &str)] = &[
    (OK, "VIX_OK"),
    (E_FAIL, "VIX_E_FAIL"),
    (E_OUT_OF_MEMORY, "VIX_E_OUT_OF_MEMORY"),
    (E_INVALID_ARG, "VIX_E_INVALID_ARG"),
    (E_FILE_NOT_FOUND, "VIX_E_FILE_NOT_FOUND"),
    (E_OBJECT_IS_BUSY, "VIX_E_OBJECT_IS_BUSY"),
    (E_NOT_SUPPORTED, "VIX_E_NOT_SUPPORTED"),
    (E_FILE_ERROR, "VIX_E_FILE_ERROR"),
    (E_DISK_FULL, "VIX_E_DISK_FULL"),
    (E_CANCELLED, "VIX_E_CANCELLED"),
    (E_FILE_ALREADY_EXISTS, "VIX_E_FILE_ALREADY_EXISTS"),
    (E_ALREADY_EXISTS, "VIX_E_ALREADY_EXISTS"),
    (E_INVALID_HANDLE, "VIX_E_INVALID_HANDLE"),
    (E_NOT_SUPPORTED_ON_HANDLE_TYPE, "VIX_E_NOT_SUPPORTED_ON_HANDLE_TYPE"),
    (E_TOO_MANY_HANDLES, "VIX_E_TOO_MANY_HANDLES"),
    (E_NOT_FOUND, "VIX_E_NOT_FOUND"),
    (E_TYPE_MISMATCH, "VIX_E_TYPE_MISMATCH"),
    (E_TIMEOUT_WAITING_FOR_TOOLS, "VIX_E_TIMEOUT_WAITING_FOR_TOOLS"),
    (E_UNRECOGNIZED_COMMAND, "VIX_E_UNRECOGNIZED_COMMAND"),
    (E_OP_NOT_SUPPORTED_ON_GUEST, "VIX_E_OP_NOT_SUPPORTED_ON_GUEST"),
    (E_PROGRAM_NOT_STARTED, "VIX_E_PROGRAM_NOT_STARTED"),
    (E_VM_NOT_RUNNING, "VIX_E_VM_NOT_RUNNING"),
    (E_VM_IS_RUNNING, "VIX_E_VM_IS_RUNNING"),
    (E_CANNOT_CONNECT_TO_VM, "VIX_E_CANNOT_CONNECT_TO_VM"),
    (E_TOOLS_NOT_RUNNING, "VIX_E_TOOLS_NOT_RUNNING"),
    (E_GUEST_OPERATIONS_PROHIBITED, "VIX_E_GUEST_OPERATIONS_PROHIBITED"),
    (E_CANNOT_AUTHENTICATE_WITH_GUEST, "VIX_E_CANNOT_AUTHENTICATE_WITH_GUEST"),
    (E_CANNOT_POWER_ON_VM, "VIX_E_CANNOT_POWER_ON_VM"),
    (E_VM_NOT_FOUND, "VIX_E_VM_NOT_FOUND"),
    (E_CANNOT_READ_VM_CONFIG, "VIX_E_CANNOT_READ_VM_CONFIG"),
    (E_VM_ALREADY_LOADED, "VIX_E_VM_ALREADY_LOADED"),
    (E_UNRECOGNIZED_PROPERTY, "VIX_E_UNRECOGNIZED_PROPERTY"),
    (E_INVALID_PROPERTY_VALUE, "VIX_E_INVALID_PROPERTY_VALUE"),
    (E_READ_ONLY_PROPERTY, "VIX_E_READ_ONLY_PROPERTY"),
    (E_MISSING_REQUIRED_PROPERTY, "VIX_E_MISSING_REQUIRED_PROPERTY"),
    (E_PROPERTY_TYPE_MISMATCH, "VIX_E_PROPERTY_TYPE_MISMATCH"),
    (E_SNAPSHOT_INVAL, "VIX_E_SNAPSHOT_INVAL"),
    (E_SNAPSHOT_NOTFOUND, "VIX_E_SNAPSHOT_NOTFOUND"),
    (E_SNAPSHOT_EXISTS, "VIX_E_SNAPSHOT_EXISTS"),
    (E_SNAPSHOT_LOCKED, "VIX_E_SNAPSHOT_LOCKED"),
    (E_SNAPSHOT_MAXSNAPSHOTS, "VIX_E_SNAPSHOT_MAXSNAPSHOTS"),
    (E_CANNOT_CONNECT_TO_HOST, "VIX_E_CANNOT_CONNECT_TO_HOST"),
    (E_NOT_FOR_REMOTE_HOST, "VIX_E_NOT_FOR_REMOTE_HOST"),
    (
        E_INVALID_HOSTNAME_SPECIFICATION,
        "VIX_E_INVALID_HOSTNAME_SPECIFICATION",
    ),
    (E_NOT_A_FILE, "VIX_E_NOT_A_FILE"),
    (E_NOT_A_DIRECTORY, "VIX_E_NOT_A_DIRECTORY"),
    (E_NO_SUCH_PROCESS, "VIX_E_NO_SUCH_PROCESS"),
    (E_FILE_NAME_TOO_LONG, "VIX_E_FILE_NAME_TOO_LONG"),
    (
        E_TOOLS_INSTALL_ALREADY_UP_TO_DATE,
        "VIX_E_TOOLS_INSTALL_ALREADY_UP_TO_DATE",
    ),
    (E_TOOLS_INSTALL_IN_PROGRESS, "VIX_E_TOOLS_INSTALL_IN_PROGRESS"),
    (
        E_WRAPPER_WORKSTATION_NOT_INSTALLED,
        "VIX_E_WRAPPER_WORKSTATION_NOT_INSTALLED",
    ),
    (E_WRAPPER_VERSION_NOT_FOUND, "VIX_E_WRAPPER_VERSION_NOT_FOUND"),
    (
        E_WRAPPER_SERVICEPROVIDER_NOT_FOUND,
        "VIX_E_WRAPPER_SERVICEPROVIDER_NOT_FOUND",
    ),
    (E_WRAPPER_PLAYER_NOT_INSTALLED, "VIX_E_WRAPPER_PLAYER_NOT_INSTALLED"),
    (BRIDGE_E_TOO_MANY_PROPERTIES, "BRIDGE_E_TOO_MANY_PROPERTIES"),
    (
        BRIDGE_E_CANNOT_RETURN_UNKNOWN_PROPERTYTYPE,
        "BRIDGE_E_CANNOT_RETURN_UNKNOWN_PROPERTYTYPE",
    ),
    (BRIDGE_E_ASSOCIATION_LIMIT, "BRIDGE_E_ASSOCIATION_LIMIT"),
    (BRIDGE_E_STALE_ASSOCIATION, "BRIDGE_E_STALE_ASSOCIATION"),
    (BRIDGE_E_RUNTIME_FAULT, "BRIDGE_E_RUNTIME_FAULT"),
];

/// Native statuses carry the error code in their low 16 bits.
pub fn normalize(status: u64) -> u16 {
    (status & 0xFFFF) as u16
}

pub fn error_code_name(code: u16) -> &'static str {
    NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_known_and_unknown_codes() {
        assert_eq!(error_code_name(E_INVALID_HANDLE), "VIX_E_INVALID_HANDLE");
        assert_eq!(
            error_code_name(BRIDGE_E_TOO_MANY_PROPERTIES),
            "BRIDGE_E_TOO_MANY_PROPERTIES"
        );
        assert_eq!(error_code_name(12_345), "unknown");
    }

    #[test]
    fn normalize_keeps_low_bits() {
        assert_eq!(normalize(0x0001_0000_0000_0BB8), 3000);
        assert_eq!(normalize(0), OK);
    }

    #[test]
    fn code_table_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for (code, _) in NAMES {
            assert!(seen.insert(*code), "duplicate code {code}");
        }
    }
}
