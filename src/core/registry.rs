//! Handle registry: the single source of truth for which print operations are live.
//!
//! Ids come from a monotonically increasing counter and are never reissued, so any
//! id below the counter that has no entry is known to be disposed, and any id at or
//! above it was never handed out. The mutex is held only for map bookkeeping; the
//! native operation is checked out while a facility call runs and a second call on
//! the same handle during that window gets `Busy`. Disposing a checked-out handle
//! retires it at once and releases the native operation when the running call
//! checks it back in.
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::facility::{ContextRef, NativeOperation, PreviewOutcome};
use crate::core::settings::PrintSettings;
use crate::core::state::{OperationState, Transition};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(NonZeroU64);

impl HandleId {
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Pointer-sized token handed across the C boundary. Never dereferenced.
    pub fn to_raw(self) -> *mut c_void {
        std::ptr::without_provenance_mut(self.0.get() as usize)
    }

    pub fn from_raw(ptr: *mut c_void) -> Option<HandleId> {
        NonZeroU64::new(ptr.addr() as u64).map(HandleId)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OperationRecord {
    pub context: ContextRef,
    pub state: OperationState,
    pub settings: PrintSettings,
    pub preview: Option<PreviewOutcome>,
}

struct Entry {
    record: OperationRecord,
    native: Option<Box<dyn NativeOperation>>,
    dispose_pending: bool,
}

/// Outcome of [`Registry::remove`].
pub enum Release {
    /// The handle is retired and its native operation is handed back for release.
    Now(OperationRecord, Box<dyn NativeOperation>),
    /// The handle is retired; a call still holds the native operation and drops
    /// it when it checks back in.
    Deferred(OperationRecord),
}

struct Inner {
    next_id: u64,
    live: HashMap<HandleId, Entry>,
}

impl Inner {
    fn active(&self, id: HandleId) -> Option<&Entry> {
        self.live.get(&id).filter(|entry| !entry.dispose_pending)
    }

    fn active_mut(&mut self, id: HandleId) -> Option<&mut Entry> {
        self.live.get_mut(&id).filter(|entry| !entry.dispose_pending)
    }
}

pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Registry")
            .field("next_id", &inner.next_id)
            .field("live", &inner.live.len())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                live: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(
        &self,
        context: ContextRef,
        native: Box<dyn NativeOperation>,
    ) -> Result<HandleId, Error> {
        let mut inner = self.lock();
        let raw = inner.next_id;
        if usize::try_from(raw).is_err() {
            return Err(Error::new(ErrorKind::Internal).with_message("handle space exhausted"));
        }
        let id = NonZeroU64::new(raw)
            .map(HandleId)
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("handle counter wrapped"))?;
        inner.next_id = raw
            .checked_add(1)
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("handle space exhausted"))?;
        inner.live.insert(
            id,
            Entry {
                record: OperationRecord {
                    context,
                    state: OperationState::Created,
                    settings: PrintSettings::default(),
                    preview: None,
                },
                native: Some(native),
                dispose_pending: false,
            },
        );
        Ok(id)
    }

    /// Current state; `Disposed` for retired ids, `InvalidHandle` for ids never issued.
    pub fn state(&self, id: HandleId) -> Result<OperationState, Error> {
        let inner = self.lock();
        match inner.active(id) {
            Some(entry) => Ok(entry.record.state),
            None => retired_or_unknown(&inner, id).map(|_| OperationState::Disposed),
        }
    }

    pub fn record(&self, id: HandleId) -> Result<OperationRecord, Error> {
        let inner = self.lock();
        match inner.active(id) {
            Some(entry) => Ok(entry.record.clone()),
            None => Err(missing(&inner, id)),
        }
    }

    /// Operations still holding a native resource, including retired handles
    /// whose release waits on a running call.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Takes the native operation out for a facility call, after checking that the
    /// transition is legal from the current state.
    pub fn checkout(&self, id: HandleId, transition: Transition) -> Result<Checkout<'_>, Error> {
        let mut inner = self.lock();
        if inner.active(id).is_none() {
            return Err(missing(&inner, id));
        }
        let entry = inner
            .active_mut(id)
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_handle(id.get()))?;
        entry
            .record
            .state
            .apply(transition)
            .map_err(|err| err.with_handle(id.get()))?;
        let native = entry.native.take().ok_or_else(|| busy(id))?;
        Ok(Checkout {
            registry: self,
            id,
            record: entry.record.clone(),
            native: Some(native),
        })
    }

    /// Retires the handle. A checked-out operation stays in the map, marked, until
    /// the call holding it checks in.
    pub fn remove(&self, id: HandleId) -> Result<Release, Error> {
        let mut inner = self.lock();
        let checked_out = match inner.active_mut(id) {
            None => return Err(missing(&inner, id)),
            Some(entry) if entry.native.is_none() => {
                entry.dispose_pending = true;
                true
            }
            Some(_) => false,
        };
        if checked_out {
            let record = inner
                .live
                .get(&id)
                .map(|entry| entry.record.clone())
                .ok_or_else(|| Error::new(ErrorKind::Internal).with_handle(id.get()))?;
            return Ok(Release::Deferred(record));
        }
        let entry = inner
            .live
            .remove(&id)
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_handle(id.get()))?;
        let native = entry.native.ok_or_else(|| busy(id))?;
        Ok(Release::Now(entry.record, native))
    }

    fn checkin(
        &self,
        id: HandleId,
        native: Box<dyn NativeOperation>,
        update: impl FnOnce(&mut OperationRecord),
    ) {
        let mut inner = self.lock();
        let retired = match inner.live.get_mut(&id) {
            Some(entry) if !entry.dispose_pending => {
                update(&mut entry.record);
                entry.native = Some(native);
                return;
            }
            Some(_) => true,
            None => false,
        };
        if retired {
            inner.live.remove(&id);
        }
        drop(inner);
        drop(native);
        debug!(handle = %id, "retired operation released after its call");
    }
}

/// A native operation checked out of the registry for the duration of one call.
///
/// Dropping it without [`Checkout::finish`] puts the operation back unchanged, which
/// keeps the handle usable when a facility call fails or unwinds.
pub struct Checkout<'a> {
    registry: &'a Registry,
    id: HandleId,
    record: OperationRecord,
    native: Option<Box<dyn NativeOperation>>,
}

impl Checkout<'_> {
    pub fn record(&self) -> &OperationRecord {
        &self.record
    }

    pub fn native(&mut self) -> Result<&mut (dyn NativeOperation + 'static), Error> {
        self.native
            .as_deref_mut()
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_handle(self.id.get()))
    }

    pub fn finish(mut self, update: impl FnOnce(&mut OperationRecord)) {
        if let Some(native) = self.native.take() {
            self.registry.checkin(self.id, native, update);
        }
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(native) = self.native.take() {
            self.registry.checkin(self.id, native, |_| {});
        }
    }
}

fn retired_or_unknown(inner: &Inner, id: HandleId) -> Result<(), Error> {
    if id.get() < inner.next_id {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::InvalidHandle)
            .with_message("handle was never issued")
            .with_handle(id.get()))
    }
}

fn missing(inner: &Inner, id: HandleId) -> Error {
    match retired_or_unknown(inner, id) {
        Ok(()) => Error::new(ErrorKind::InvalidHandle)
            .with_message("handle already disposed")
            .with_handle(id.get()),
        Err(err) => err,
    }
}

fn busy(id: HandleId) -> Error {
    Error::new(ErrorKind::Busy)
        .with_message("operation is in use by another call")
        .with_hint("Calls on one handle must not overlap.")
        .with_handle(id.get())
}
