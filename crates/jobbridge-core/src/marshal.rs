//! Property marshalling: discover each property's type, run one batched
//! native fetch, convert every slot into a `PropertyValue`.
//!
//! A fetch either returns one value per requested id, in request order, or a
//! single error. Native string and blob buffers are freed exactly once on
//! every path.

use std::ffi::{c_void, CStr};

use tracing::{debug, trace};

use crate::config::config;
use crate::error::{BridgeError, Result};
use crate::native::{CallShape, FetchTarget, NativeJobApi, RawPropertyValue, MAX_PROPERTIES};
use crate::types::{JobHandle, PropertyId, PropertyType, PropertyValue};

/// Owns one native buffer until it is dropped.
struct NativeBuffer<'a, A: NativeJobApi + ?Sized> {
    api: &'a A,
    ptr: *mut c_void,
}

impl<A: NativeJobApi + ?Sized> Drop for NativeBuffer<'_, A> {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: the pointer came out of a successful batch fetch and
            // this guard is its only owner.
            unsafe { self.api.free_buffer(self.ptr) };
        }
    }
}

pub fn fetch_properties<A: NativeJobApi + ?Sized>(
    api: &A,
    target: FetchTarget,
    ids: &[PropertyId],
) -> Result<Vec<PropertyValue>> {
    let call = target.call_name();
    let handle = target.handle();

    let Some(shape) = CallShape::for_count(ids.len()) else {
        debug!(call, %handle, requested = ids.len(), "too many properties requested");
        return Err(BridgeError::TooManyProperties {
            requested: ids.len(),
            max: MAX_PROPERTIES,
        });
    };
    debug!(call, %handle, count = ids.len(), "fetch begin");

    let types = discover_types(api, handle, ids)?;

    let mut raw = [RawPropertyValue::zeroed(); MAX_PROPERTIES];
    let slots = &mut raw[..ids.len()];
    if let Err(e) = api.batch_fetch(target, shape, ids, slots) {
        debug!(call, %handle, code = e.code(), "batched fetch failed");
        return Err(e.into());
    }

    let values = convert_all(api, ids, &types, slots)?;
    debug!(call, %handle, count = values.len(), "fetch end");
    Ok(values)
}

fn discover_types<A: NativeJobApi + ?Sized>(
    api: &A,
    handle: JobHandle,
    ids: &[PropertyId],
) -> Result<Vec<PropertyType>> {
    let mut types = Vec::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
        match api.get_property_type(handle, *id) {
            Ok(kind) => types.push(kind),
            Err(e) => {
                debug!(%handle, index, %id, code = e.code(), "property type query failed");
                return Err(e.into());
            }
        }
    }
    Ok(types)
}

fn convert_all<A: NativeJobApi + ?Sized>(
    api: &A,
    ids: &[PropertyId],
    types: &[PropertyType],
    slots: &[RawPropertyValue],
) -> Result<Vec<PropertyValue>> {
    // Every buffer gets an owner before the first conversion, so an early
    // return still frees the rest.
    let mut owned: Vec<Option<NativeBuffer<'_, A>>> = types
        .iter()
        .zip(slots)
        .map(|(kind, slot)| buffer_of(*kind, slot).map(|ptr| NativeBuffer { api, ptr }))
        .collect();

    let log_values = config().log_property_values;
    let mut values = Vec::with_capacity(ids.len());
    for (index, (kind, slot)) in types.iter().zip(slots).enumerate() {
        let id = ids[index];
        let value = convert_slot(index, id, *kind, slot)?;
        drop(owned[index].take());
        if log_values {
            trace!(index, %id, ?value, "converted property");
        } else {
            trace!(index, %id, kind = %value.kind(), "converted property");
        }
        values.push(value);
    }
    Ok(values)
}

fn buffer_of(kind: PropertyType, slot: &RawPropertyValue) -> Option<*mut c_void> {
    // SAFETY: `kind` is the type the library reported for this slot.
    let ptr = unsafe {
        match kind {
            PropertyType::String => slot.string_value as *mut c_void,
            PropertyType::Blob => slot.blob_value.value as *mut c_void,
            _ => return None,
        }
    };
    (!ptr.is_null()).then_some(ptr)
}

fn convert_slot(
    index: usize,
    id: PropertyId,
    kind: PropertyType,
    slot: &RawPropertyValue,
) -> Result<PropertyValue> {
    // SAFETY: each arm reads the union field matching the discovered type;
    // buffers are still owned by the caller's guards at this point.
    let value = unsafe {
        match kind {
            PropertyType::Integer => PropertyValue::Integer(slot.int_value),
            PropertyType::Bool => PropertyValue::Bool(slot.bool_value != 0),
            PropertyType::Handle => PropertyValue::Handle(JobHandle::from_raw(slot.handle_value)),
            PropertyType::Int64 => PropertyValue::Int64(slot.int64_value),
            PropertyType::String => {
                let ptr = slot.string_value;
                if ptr.is_null() {
                    PropertyValue::String(String::new())
                } else {
                    PropertyValue::String(CStr::from_ptr(ptr).to_string_lossy().into_owned())
                }
            }
            PropertyType::Blob => {
                let blob = slot.blob_value;
                if blob.value.is_null() || blob.size <= 0 {
                    PropertyValue::Blob(Vec::new())
                } else {
                    let bytes =
                        std::slice::from_raw_parts(blob.value as *const u8, blob.size as usize);
                    PropertyValue::Blob(bytes.to_vec())
                }
            }
            PropertyType::Any | PropertyType::Unknown(_) => {
                debug!(index, %id, %kind, "cannot marshal property type");
                return Err(BridgeError::UnmarshallableProperty { index, id, kind });
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;
    use crate::error::NativeError;
    use crate::native::EventProc;
    use crate::ops::Operation;
    use std::collections::{BTreeMap, HashMap};
    use std::ffi::{c_char, c_int, CString};
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Fake {
        Int(i32),
        Str(&'static str),
        Bool(bool),
        Handle(i32),
        Int64(i64),
        Blob(&'static [u8]),
        Untyped,
    }

    #[derive(Default)]
    struct Calls {
        type_queries: usize,
        batch_fetches: Vec<usize>,
        frees: Vec<usize>,
        live_buffers: HashMap<usize, usize>,
    }

    #[derive(Default)]
    struct FakeApi {
        props: BTreeMap<i32, Fake>,
        fail_type_query_for: Option<i32>,
        fail_fetch: Option<u16>,
        calls: Mutex<Calls>,
    }

    impl FakeApi {
        fn with(props: &[(i32, Fake)]) -> Self {
            Self {
                props: props.iter().cloned().collect(),
                ..Self::default()
            }
        }

        fn native_calls(&self) -> usize {
            let c = self.calls.lock().unwrap();
            c.type_queries + c.batch_fetches.len() + c.frees.len()
        }
    }

    impl NativeJobApi for FakeApi {
        fn start_operation(
            &self,
            _op: &Operation,
            _callback: Option<EventProc>,
            _client_data: *mut c_void,
        ) -> JobHandle {
            JobHandle::INVALID
        }

        fn get_property_type(
            &self,
            _handle: JobHandle,
            id: PropertyId,
        ) -> std::result::Result<PropertyType, NativeError> {
            self.calls.lock().unwrap().type_queries += 1;
            if self.fail_type_query_for == Some(id.raw()) {
                return Err(NativeError::new(codes::E_UNRECOGNIZED_PROPERTY));
            }
            Ok(match self.props.get(&id.raw()) {
                Some(Fake::Int(_)) => PropertyType::Integer,
                Some(Fake::Str(_)) => PropertyType::String,
                Some(Fake::Bool(_)) => PropertyType::Bool,
                Some(Fake::Handle(_)) => PropertyType::Handle,
                Some(Fake::Int64(_)) => PropertyType::Int64,
                Some(Fake::Blob(_)) => PropertyType::Blob,
                Some(Fake::Untyped) => PropertyType::Any,
                None => return Err(NativeError::new(codes::E_UNRECOGNIZED_PROPERTY)),
            })
        }

        fn batch_fetch(
            &self,
            _target: FetchTarget,
            shape: CallShape,
            ids: &[PropertyId],
            out: &mut [RawPropertyValue],
        ) -> std::result::Result<(), NativeError> {
            let mut calls = self.calls.lock().unwrap();
            calls.batch_fetches.push(shape.arity());
            assert_eq!(ids.len(), shape.arity());
            assert_eq!(out.len(), shape.arity());
            if let Some(code) = self.fail_fetch {
                return Err(NativeError::new(code));
            }
            for (id, slot) in ids.iter().zip(out.iter_mut()) {
                match self.props.get(&id.raw()).cloned() {
                    Some(Fake::Int(v)) => slot.int_value = v,
                    Some(Fake::Bool(v)) => slot.bool_value = v as c_char,
                    Some(Fake::Handle(v)) => slot.handle_value = v,
                    Some(Fake::Int64(v)) => slot.int64_value = v,
                    Some(Fake::Str(s)) => {
                        let ptr = CString::new(s).unwrap().into_raw();
                        calls.live_buffers.insert(ptr as usize, 0);
                        slot.string_value = ptr;
                    }
                    Some(Fake::Blob(b)) => {
                        let len = b.len();
                        let ptr = Box::into_raw(b.to_vec().into_boxed_slice()) as *mut u8;
                        calls.live_buffers.insert(ptr as usize, len);
                        slot.blob_value = crate::native::RawBlob {
                            size: len as c_int,
                            value: ptr as *mut c_char,
                        };
                    }
                    Some(Fake::Untyped) | None => {}
                }
            }
            Ok(())
        }

        fn check_completion(&self, _job: JobHandle) -> std::result::Result<bool, NativeError> {
            Ok(true)
        }

        fn get_num_properties(
            &self,
            _job: JobHandle,
            _id: PropertyId,
        ) -> std::result::Result<c_int, NativeError> {
            Ok(0)
        }

        unsafe fn free_buffer(&self, buffer: *mut c_void) {
            let mut calls = self.calls.lock().unwrap();
            calls.frees.push(buffer as usize);
            let len = calls
                .live_buffers
                .remove(&(buffer as usize))
                .expect("free of a buffer that is not live");
            if len == 0 {
                drop(CString::from_raw(buffer as *mut c_char));
            } else {
                let slice = std::ptr::slice_from_raw_parts_mut(buffer as *mut u8, len);
                drop(Box::from_raw(slice));
            }
        }

        fn release_handle(&self, _handle: JobHandle) {}

        fn disconnect_host(&self, _host: JobHandle) {}
    }

    fn ids(raw: &[i32]) -> Vec<PropertyId> {
        raw.iter().copied().map(PropertyId).collect()
    }

    const JOB: JobHandle = JobHandle::from_raw(77);

    #[test]
    fn returns_one_value_per_id_in_request_order() {
        let api = FakeApi::with(&[
            (1, Fake::Int(11)),
            (2, Fake::Bool(true)),
            (3, Fake::Handle(9)),
            (4, Fake::Int64(1 << 40)),
            (5, Fake::Int(55)),
            (6, Fake::Int(66)),
        ]);
        for k in 0..=MAX_PROPERTIES {
            let requested: Vec<i32> = (1..=k as i32).rev().collect();
            let got = fetch_properties(&api, FetchTarget::Wait(JOB), &ids(&requested))
                .expect("fetch");
            assert_eq!(got.len(), k);
            for (value, id) in got.iter().zip(&requested) {
                let expected = match id {
                    1 => PropertyValue::Integer(11),
                    2 => PropertyValue::Bool(true),
                    3 => PropertyValue::Handle(JobHandle::from_raw(9)),
                    4 => PropertyValue::Int64(1 << 40),
                    5 => PropertyValue::Integer(55),
                    _ => PropertyValue::Integer(66),
                };
                assert_eq!(value, &expected);
            }
        }
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.batch_fetches, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn too_many_properties_makes_no_native_calls() {
        let api = FakeApi::with(&[(1, Fake::Int(1))]);
        let err = fetch_properties(&api, FetchTarget::Properties(JOB), &ids(&[1; 7]))
            .expect_err("seven ids must be rejected");
        assert!(matches!(
            err,
            BridgeError::TooManyProperties {
                requested: 7,
                max: 6
            }
        ));
        assert_eq!(err.code(), codes::BRIDGE_E_TOO_MANY_PROPERTIES);
        assert_eq!(api.native_calls(), 0);
    }

    #[test]
    fn type_query_failure_skips_batched_fetch() {
        let mut api = FakeApi::with(&[(1, Fake::Int(1)), (2, Fake::Str("x")), (3, Fake::Int(3))]);
        api.fail_type_query_for = Some(2);
        let err = fetch_properties(&api, FetchTarget::Wait(JOB), &ids(&[1, 2, 3]))
            .expect_err("type query fails");
        assert_eq!(err.code(), codes::E_UNRECOGNIZED_PROPERTY);
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.type_queries, 2);
        assert!(calls.batch_fetches.is_empty());
        assert!(calls.frees.is_empty());
    }

    #[test]
    fn string_is_copied_and_freed_once() {
        let api = FakeApi::with(&[(7, Fake::Str("abc"))]);
        let got = fetch_properties(&api, FetchTarget::Properties(JOB), &ids(&[7])).expect("fetch");
        assert_eq!(got, vec![PropertyValue::String("abc".to_string())]);
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.frees.len(), 1);
        assert!(calls.live_buffers.is_empty());
    }

    #[test]
    fn blob_is_copied_and_freed_once() {
        let api = FakeApi::with(&[(8, Fake::Blob(b"\x00\x01\xff"))]);
        let got = fetch_properties(&api, FetchTarget::Properties(JOB), &ids(&[8])).expect("fetch");
        assert_eq!(got, vec![PropertyValue::Blob(vec![0, 1, 255])]);
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.frees.len(), 1);
        assert!(calls.live_buffers.is_empty());
    }

    #[test]
    fn untyped_property_fails_and_still_frees_every_buffer() {
        let api = FakeApi::with(&[
            (1, Fake::Str("before")),
            (2, Fake::Untyped),
            (3, Fake::Str("after")),
            (4, Fake::Blob(b"tail")),
        ]);
        let err = fetch_properties(&api, FetchTarget::Wait(JOB), &ids(&[1, 2, 3, 4]))
            .expect_err("untyped slot");
        match err {
            BridgeError::UnmarshallableProperty { index, id, kind } => {
                assert_eq!(index, 1);
                assert_eq!(id, PropertyId(2));
                assert_eq!(kind, PropertyType::Any);
            }
            other => panic!("unexpected error: {other}"),
        }
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.frees.len(), 3);
        assert!(calls.live_buffers.is_empty());
    }

    #[test]
    fn batched_fetch_error_is_passed_through() {
        let mut api = FakeApi::with(&[(1, Fake::Str("never"))]);
        api.fail_fetch = Some(codes::E_VM_NOT_RUNNING);
        let err = fetch_properties(&api, FetchTarget::Wait(JOB), &ids(&[1])).expect_err("fails");
        assert_eq!(err.code(), codes::E_VM_NOT_RUNNING);
        assert!(api.calls.lock().unwrap().frees.is_empty());
    }
}
