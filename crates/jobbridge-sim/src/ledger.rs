//! Native-side allocations handed out through batched fetches.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CString};

use jobbridge_core::native::RawBlob;
use tracing::warn;

enum Allocation {
    String,
    Blob { alloc_len: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub live: usize,
    pub allocated: u64,
    pub freed: u64,
    /// Frees of pointers that were never allocated here or were already freed.
    pub bad_frees: u64,
}

#[derive(Default)]
pub struct BufferLedger {
    live: HashMap<usize, Allocation>,
    allocated: u64,
    freed: u64,
    bad_frees: u64,
}

impl BufferLedger {
    pub fn alloc_string(&mut self, s: &str) -> *mut c_char {
        // A C reader stops at the first NUL anyway.
        let bytes: Vec<u8> = s.bytes().take_while(|b| *b != 0).collect();
        let ptr = CString::new(bytes).unwrap_or_default().into_raw();
        self.live.insert(ptr as usize, Allocation::String);
        self.allocated += 1;
        ptr
    }

    pub fn alloc_blob(&mut self, data: &[u8]) -> RawBlob {
        // Zero-length boxes share a dangling address; keep every pointer unique.
        let mut owned = data.to_vec();
        if owned.is_empty() {
            owned.push(0);
        }
        let alloc_len = owned.len();
        let ptr = Box::into_raw(owned.into_boxed_slice()) as *mut u8;
        self.live.insert(ptr as usize, Allocation::Blob { alloc_len });
        self.allocated += 1;
        RawBlob {
            size: data.len() as c_int,
            value: ptr as *mut c_char,
        }
    }

    /// # Safety
    ///
    /// Pointers recorded in this ledger must not have been freed by anyone
    /// else. Unknown pointers are counted and left alone.
    pub unsafe fn free(&mut self, ptr: *mut c_void) -> bool {
        let Some(allocation) = self.live.remove(&(ptr as usize)) else {
            self.bad_frees += 1;
            warn!(?ptr, "free of unknown or already-freed buffer");
            return false;
        };
        release(ptr, allocation);
        self.freed += 1;
        true
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            live: self.live.len(),
            allocated: self.allocated,
            freed: self.freed,
            bad_frees: self.bad_frees,
        }
    }
}

unsafe fn release(ptr: *mut c_void, allocation: Allocation) {
    match allocation {
        Allocation::String => drop(CString::from_raw(ptr as *mut c_char)),
        Allocation::Blob { alloc_len } => {
            let slice = std::ptr::slice_from_raw_parts_mut(ptr as *mut u8, alloc_len);
            drop(Box::from_raw(slice));
        }
    }
}

impl Drop for BufferLedger {
    fn drop(&mut self) {
        for (addr, allocation) in self.live.drain() {
            // SAFETY: still recorded as live, so nobody freed it.
            unsafe { release(addr as *mut c_void, allocation) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn tracks_allocations_and_rejects_double_free() {
        let mut ledger = BufferLedger::default();
        let s = ledger.alloc_string("abc");
        assert_eq!(unsafe { CStr::from_ptr(s) }.to_str().unwrap(), "abc");
        let b = ledger.alloc_blob(&[]);
        assert_eq!(b.size, 0);
        let b2 = ledger.alloc_blob(&[]);
        assert_ne!(b.value, b2.value);
        assert_eq!(ledger.stats().live, 3);

        unsafe {
            assert!(ledger.free(s as *mut c_void));
            assert!(!ledger.free(s as *mut c_void));
            assert!(ledger.free(b.value as *mut c_void));
        }
        let stats = ledger.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.freed, 2);
        assert_eq!(stats.bad_frees, 1);
    }

    #[test]
    fn interior_nul_truncates() {
        let mut ledger = BufferLedger::default();
        let s = ledger.alloc_string("ab\0cd");
        assert_eq!(unsafe { CStr::from_ptr(s) }.to_bytes(), b"ab");
    }
}
