//! Associations between outstanding native jobs and managed event handlers.
//!
//! The native library never sees a pointer into this table. It is handed an
//! `AssociationToken` packed into its client-data word; the token names a
//! slot and the slot's generation at registration time. Teardown bumps the
//! generation, so a late or duplicated callback resolves to nothing instead
//! of to freed memory.
//!
//! Slot lifecycle:
//!
//! ```text
//! Vacant --register--> Live --terminal event--> Completing --handler returns--> Vacant (gen+1)
//!                       |  ^
//!                       |  +-- non-terminal events
//!                       +--cancel--> Vacant (gen+1)
//! ```

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, HandlerFault, Result, RuntimeFault};
use crate::runtime::{ClientData, JobEventHandler, ManagedRuntime, RuntimeEnv};
use crate::types::{EventKind, JobHandle};

const HALF_BITS: u32 = usize::BITS / 2;
const HALF_MASK: usize = (1usize << HALF_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociationToken {
    index: u32,
    generation: u32,
}

impl AssociationToken {
    /// Largest slot index that still packs into a pointer-sized word.
    const MAX_INDEX: usize = HALF_MASK - 1;

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the token into the native client-data word. Never null.
    pub fn to_client_data(self) -> *mut c_void {
        let generation = (self.generation as usize) & HALF_MASK;
        let word = (generation << HALF_BITS) | (self.index as usize + 1);
        word as *mut c_void
    }

    pub fn from_client_data(client_data: *mut c_void) -> Option<Self> {
        let word = client_data as usize;
        let low = word & HALF_MASK;
        if low == 0 {
            return None;
        }
        Some(Self {
            index: (low - 1) as u32,
            generation: (word >> HALF_BITS) as u32,
        })
    }
}

impl fmt::Display for AssociationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

/// Durable references held for one outstanding job.
pub struct Association {
    runtime: Arc<dyn ManagedRuntime>,
    handler: Arc<dyn JobEventHandler>,
    client_data: Option<ClientData>,
}

enum SlotState {
    Vacant,
    Live(Arc<Association>),
    Completing,
}

struct Slot {
    generation: u32,
    state: SlotState,
}

struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Slots {
    fn matching(&mut self, token: AssociationToken) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(token.index as usize)?;
        let expected = (slot.generation as usize & HALF_MASK) as u32;
        let given = (token.generation as usize & HALF_MASK) as u32;
        (expected == given).then_some(slot)
    }

    fn vacate(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Vacant;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.live -= 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationStats {
    pub live: usize,
    pub registered: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub stale_events: u64,
    pub handler_faults: u64,
}

#[derive(Default)]
struct Counters {
    registered: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    stale_events: AtomicU64,
    handler_faults: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The handler ran. `completed` is set when this was the terminal event
    /// and the association is gone.
    Delivered {
        completed: bool,
        fault: Option<HandlerFault>,
    },
    /// The token resolved to no live association; nothing was touched.
    Stale,
}

pub struct AssociationTable {
    inner: Mutex<Slots>,
    config: BridgeConfig,
    counters: Counters,
}

impl AssociationTable {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            config,
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slot state is only mutated in short critical sections that cannot
        // panic halfway, so a poisoned lock still guards consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(
        &self,
        runtime: Arc<dyn ManagedRuntime>,
        handler: Arc<dyn JobEventHandler>,
        client_data: Option<ClientData>,
    ) -> Result<AssociationToken> {
        let association = Arc::new(Association {
            runtime,
            handler,
            client_data,
        });

        let mut inner = self.lock();
        let limit = (self.config.max_live_associations as usize).min(AssociationToken::MAX_INDEX + 1);
        if inner.live >= limit {
            warn!(live = inner.live, "association limit reached");
            return Err(BridgeError::AssociationLimit { live: inner.live });
        }
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(Slot {
                    generation: 0,
                    state: SlotState::Vacant,
                });
                (inner.slots.len() - 1) as u32
            }
        };
        let slot = &mut inner.slots[index as usize];
        slot.state = SlotState::Live(association);
        let token = AssociationToken {
            index,
            generation: slot.generation,
        };
        inner.live += 1;
        drop(inner);

        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        debug!(%token, "association registered");
        Ok(token)
    }

    /// Live or mid-completion.
    pub fn is_registered(&self, token: AssociationToken) -> bool {
        let mut inner = self.lock();
        matches!(
            inner.matching(token).map(|s| &s.state),
            Some(SlotState::Live(_)) | Some(SlotState::Completing)
        )
    }

    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn stats(&self) -> AssociationStats {
        AssociationStats {
            live: self.live(),
            registered: self.counters.registered.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            stale_events: self.counters.stale_events.load(Ordering::Relaxed),
            handler_faults: self.counters.handler_faults.load(Ordering::Relaxed),
        }
    }

    /// Forcibly tears down a live association whose job will not complete.
    ///
    /// The native library must not call back with this token afterwards; if
    /// it does, the callback is treated as stale.
    pub fn cancel(&self, token: AssociationToken) -> Result<()> {
        let released = {
            let mut inner = self.lock();
            let taken = match inner.matching(token) {
                Some(slot) => std::mem::replace(&mut slot.state, SlotState::Vacant),
                None => SlotState::Vacant,
            };
            match taken {
                SlotState::Live(association) => {
                    inner.vacate(token.index);
                    association
                }
                SlotState::Completing => {
                    if let Some(slot) = inner.matching(token) {
                        slot.state = SlotState::Completing;
                    }
                    debug!(%token, "cancel raced with completion");
                    return Ok(());
                }
                SlotState::Vacant => return Err(BridgeError::StaleToken { token }),
            }
        };
        drop(released);
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(%token, "association cancelled");
        Ok(())
    }

    /// Delivers one native event to the handler registered under `token`.
    ///
    /// The handler runs with the table unlocked, on the calling thread,
    /// attached to the association's runtime for the duration of the call.
    pub fn dispatch(
        &self,
        token: AssociationToken,
        job: JobHandle,
        event: EventKind,
        more_info: JobHandle,
    ) -> std::result::Result<Dispatch, RuntimeFault> {
        let terminal = event.is_terminal();
        let found = {
            let mut inner = self.lock();
            match inner.matching(token) {
                Some(slot) => match std::mem::replace(&mut slot.state, SlotState::Completing) {
                    SlotState::Live(association) => {
                        if !terminal {
                            slot.state = SlotState::Live(Arc::clone(&association));
                        }
                        Some(association)
                    }
                    other => {
                        slot.state = other;
                        None
                    }
                },
                None => None,
            }
        };
        let Some(association) = found else {
            self.note_stale(token, job, event);
            return Ok(Dispatch::Stale);
        };

        let invoked = invoke(&association, job, event, more_info);

        if terminal {
            self.lock().vacate(token.index);
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(%token, %job, "association completed");
        }
        drop(association);

        let fault = invoked?;
        if fault.is_some() {
            self.counters.handler_faults.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Dispatch::Delivered {
            completed: terminal,
            fault,
        })
    }

    fn note_stale(&self, token: AssociationToken, job: JobHandle, event: EventKind) {
        self.counters.stale_events.fetch_add(1, Ordering::Relaxed);
        if self.config.strict_stale_events {
            error!(%token, %job, %event, "callback for unknown association");
        } else {
            warn!(%token, %job, %event, "callback for unknown association");
        }
    }
}

fn invoke(
    association: &Association,
    job: JobHandle,
    event: EventKind,
    more_info: JobHandle,
) -> std::result::Result<Option<HandlerFault>, RuntimeFault> {
    let env = RuntimeEnv::attach(association.runtime.as_ref())?;
    debug!(%job, %event, "invoking event handler");
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        association.handler.callback(
            &env,
            job,
            event,
            more_info,
            association.client_data.as_ref(),
        )
    }));
    let fault = match result {
        Ok(Ok(())) => None,
        Ok(Err(fault)) => Some(fault),
        Err(payload) => Some(HandlerFault::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    };
    if let Some(fault) = &fault {
        association.runtime.report_handler_fault(fault);
    }
    env.detach()?;
    Ok(fault)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{handler_fn, LocalRuntime};
    use std::sync::Barrier;

    type Seen = Arc<Mutex<Vec<(EventKind, bool)>>>;

    fn table() -> AssociationTable {
        AssociationTable::new(BridgeConfig::default())
    }

    #[test]
    fn token_survives_client_data_packing() {
        let token = AssociationToken {
            index: 41,
            generation: 7,
        };
        let word = token.to_client_data();
        assert!(!word.is_null());
        assert_eq!(AssociationToken::from_client_data(word), Some(token));
        assert_eq!(AssociationToken::from_client_data(std::ptr::null_mut()), None);
    }

    #[test]
    fn progress_then_completion_tears_down_once_after_last_call() {
        let table = Arc::new(table());
        let rt = Arc::new(LocalRuntime::new());
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let client: ClientData = Arc::new("ctx".to_string());

        let token_cell: Arc<Mutex<Option<AssociationToken>>> = Arc::new(Mutex::new(None));
        let handler = {
            let seen = Arc::clone(&seen);
            let table = Arc::clone(&table);
            let token_cell = Arc::clone(&token_cell);
            let expected = Arc::clone(&client);
            handler_fn(move |env, job, event, _more, cd| {
                assert!(env.attached_here());
                assert_eq!(job, JobHandle::from_raw(5));
                let cd = cd.expect("client data");
                assert!(Arc::ptr_eq(cd, &expected));
                let token = token_cell.lock().unwrap().expect("token");
                seen.lock().unwrap().push((event, table.is_registered(token)));
                Ok(())
            })
        };

        let token = table
            .register(rt.clone(), Arc::clone(&handler), Some(Arc::clone(&client)))
            .expect("register");
        *token_cell.lock().unwrap() = Some(token);
        assert_eq!(table.live(), 1);

        let job = JobHandle::from_raw(5);
        for event in [EventKind::JobProgress, EventKind::JobProgress] {
            let d = table
                .dispatch(token, job, event, JobHandle::INVALID)
                .expect("dispatch");
            assert_eq!(
                d,
                Dispatch::Delivered {
                    completed: false,
                    fault: None
                }
            );
            assert!(table.is_registered(token));
        }
        let d = table
            .dispatch(token, job, EventKind::JobCompleted, JobHandle::INVALID)
            .expect("dispatch");
        assert_eq!(
            d,
            Dispatch::Delivered {
                completed: true,
                fault: None
            }
        );

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventKind::JobProgress, true),
                (EventKind::JobProgress, true),
                (EventKind::JobCompleted, true),
            ]
        );
        assert!(!table.is_registered(token));
        assert_eq!(table.live(), 0);
        assert_eq!(table.stats().completed, 1);
        assert_eq!(Arc::strong_count(&handler), 1);
        // The test's copy plus the one captured by the handler.
        assert_eq!(Arc::strong_count(&client), 2);
        assert_eq!(rt.attach_count(), 3);
        assert_eq!(rt.detach_count(), 3);
    }

    #[test]
    fn duplicate_terminal_event_is_stale_and_not_delivered() {
        let table = table();
        let rt = Arc::new(LocalRuntime::new());
        let calls = Arc::new(AtomicU64::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            handler_fn(move |_env, _job, _event, _more, _cd| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let token = table.register(rt, handler, None).expect("register");
        let job = JobHandle::from_raw(1);
        table
            .dispatch(token, job, EventKind::JobCompleted, JobHandle::INVALID)
            .expect("first");
        let second = table
            .dispatch(token, job, EventKind::JobCompleted, JobHandle::INVALID)
            .expect("second");
        assert_eq!(second, Dispatch::Stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(table.stats().stale_events, 1);
    }

    #[test]
    fn reused_slot_rejects_the_old_token() {
        let table = table();
        let rt: Arc<dyn ManagedRuntime> = Arc::new(LocalRuntime::new());
        let noop = handler_fn(|_env, _job, _event, _more, _cd| Ok(()));
        let old = table
            .register(rt.clone(), noop.clone(), None)
            .expect("register");
        table.cancel(old).expect("cancel");
        let new = table.register(rt, noop, None).expect("register again");
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());

        let d = table
            .dispatch(old, JobHandle::from_raw(3), EventKind::JobProgress, JobHandle::INVALID)
            .expect("dispatch");
        assert_eq!(d, Dispatch::Stale);
        assert!(table.is_registered(new));
        assert!(matches!(
            table.cancel(old),
            Err(BridgeError::StaleToken { .. })
        ));
    }

    #[test]
    fn handler_errors_and_panics_are_recorded_not_propagated() {
        let table = table();
        let rt = Arc::new(LocalRuntime::new());
        let handler = handler_fn(|_env, _job, event, _more, _cd| match event {
            EventKind::JobProgress => Err(HandlerFault::raised("bad progress")),
            _ => panic!("boom"),
        });
        let token = table
            .register(rt.clone(), handler, None)
            .expect("register");
        let job = JobHandle::from_raw(9);

        let d = table
            .dispatch(token, job, EventKind::JobProgress, JobHandle::INVALID)
            .expect("dispatch");
        assert_eq!(
            d,
            Dispatch::Delivered {
                completed: false,
                fault: Some(HandlerFault::raised("bad progress"))
            }
        );
        let d = table
            .dispatch(token, job, EventKind::JobCompleted, JobHandle::INVALID)
            .expect("dispatch");
        assert!(matches!(
            d,
            Dispatch::Delivered {
                completed: true,
                fault: Some(HandlerFault::Panicked { .. })
            }
        ));
        assert_eq!(rt.recorded_faults().len(), 2);
        assert_eq!(rt.attach_count(), rt.detach_count());
        assert_eq!(table.stats().handler_faults, 2);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn limit_bounds_live_associations() {
        let table = AssociationTable::new(BridgeConfig {
            max_live_associations: 2,
            ..BridgeConfig::default()
        });
        let rt: Arc<dyn ManagedRuntime> = Arc::new(LocalRuntime::new());
        let noop = handler_fn(|_env, _job, _event, _more, _cd| Ok(()));
        let a = table.register(rt.clone(), noop.clone(), None).expect("a");
        table.register(rt.clone(), noop.clone(), None).expect("b");
        let err = table
            .register(rt.clone(), noop.clone(), None)
            .expect_err("third exceeds limit");
        assert!(matches!(err, BridgeError::AssociationLimit { live: 2 }));
        table.cancel(a).expect("cancel");
        table.register(rt, noop, None).expect("room again");
    }

    #[test]
    fn already_attached_thread_is_not_detached() {
        let table = table();
        let rt = Arc::new(LocalRuntime::new());
        let handler = handler_fn(|env, _job, _event, _more, _cd| {
            assert!(!env.attached_here());
            Ok(())
        });
        let token = table.register(rt.clone(), handler, None).expect("register");
        let outer = RuntimeEnv::attach(rt.as_ref()).expect("attach");
        table
            .dispatch(token, JobHandle::from_raw(2), EventKind::JobCompleted, JobHandle::INVALID)
            .expect("dispatch");
        assert!(rt.is_current_thread_attached());
        outer.detach().expect("detach");
        assert_eq!(rt.attach_count(), 1);
        assert_eq!(rt.detach_count(), 1);
    }

    #[test]
    fn concurrent_dispatch_keeps_client_data_apart() {
        let table = Arc::new(table());
        let rt = Arc::new(LocalRuntime::new());
        let mismatches = Arc::new(AtomicU64::new(0));

        let mut tokens = Vec::new();
        for tag in 0..2u32 {
            let mismatches = Arc::clone(&mismatches);
            let handler = handler_fn(move |_env, job, _event, _more, cd| {
                let seen = cd
                    .and_then(|cd| cd.downcast_ref::<u32>())
                    .copied()
                    .expect("u32 client data");
                if seen as i32 != job.raw() {
                    mismatches.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            });
            let cd: ClientData = Arc::new(tag);
            tokens.push(table.register(rt.clone(), handler, Some(cd)).expect("register"));
        }

        let barrier = Arc::new(Barrier::new(2));
        let threads: Vec<_> = tokens
            .into_iter()
            .enumerate()
            .map(|(tag, token)| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let job = JobHandle::from_raw(tag as i32);
                    for _ in 0..200 {
                        table
                            .dispatch(token, job, EventKind::JobProgress, JobHandle::INVALID)
                            .expect("progress");
                    }
                    table
                        .dispatch(token, job, EventKind::JobCompleted, JobHandle::INVALID)
                        .expect("completed");
                })
            })
            .collect();
        for t in threads {
            t.join().expect("join");
        }
        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
        assert_eq!(table.live(), 0);
        assert_eq!(rt.attach_count(), 402);
        assert_eq!(rt.detach_count(), 402);
    }
}
