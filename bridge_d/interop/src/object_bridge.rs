//! Native resources attached to managed instances.
//!
//! Every bridged instance walks `Unconstructed -> Constructing -> Live ->
//! Destructing -> Destroyed`. Instance calls are admitted only while `Live`,
//! and the destruction hook never overlaps an admitted call: a destroy coming
//! from another thread waits for in-flight calls to drain, a destroy coming
//! from inside a call on the same instance is deferred until that call leaves.

use log::{debug, error, warn};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use api::{BoundMember, NativeFault, NativeHandle, ObjectId};

use crate::fault::catch_native;
use crate::InteropError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconstructed,
    Constructing,
    Live,
    Destructing,
    Destroyed,
}

type Resource = Box<dyn Any + Send>;
type ConstructFn = dyn Fn(NativeHandle) -> Result<Resource, NativeFault> + Send + Sync;
type DestroyFn = dyn Fn(NativeHandle, Resource) + Send + Sync;

/// Construction and destruction hooks of a bridged type.
#[derive(Clone)]
pub struct LifecycleHooks {
    construct: Arc<ConstructFn>,
    destroy: Arc<DestroyFn>,
}

impl LifecycleHooks {
    /// `construct` builds the native resource for a freshly allocated handle;
    /// `destroy` receives it back exactly once.
    pub fn new<T, C, D>(construct: C, destroy: D) -> Self
    where
        T: Send + 'static,
        C: Fn(NativeHandle) -> Result<T, NativeFault> + Send + Sync + 'static,
        D: Fn(NativeHandle, T) + Send + Sync + 'static,
    {
        Self {
            construct: Arc::new(move |handle: NativeHandle| {
                construct(handle).map(|resource| Box::new(resource) as Resource)
            }),
            destroy: Arc::new(move |handle: NativeHandle, resource: Resource| {
                match resource.downcast::<T>() {
                    Ok(resource) => destroy(handle, *resource),
                    Err(_) => error!("Resource behind {} changed type before destruction", handle),
                }
            }),
        }
    }
}

struct SlotState {
    lifecycle: LifecycleState,
    in_flight: Vec<ThreadId>,
    destroy_pending: bool,
}

struct Slot {
    object: ObjectId,
    type_name: String,
    handle: NativeHandle,
    destroy: Arc<DestroyFn>,
    state: Mutex<SlotState>,
    changed: Condvar,
    resource: Mutex<Option<Resource>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Table of bridged instances and the native handles bound to them.
pub struct ObjectBridge {
    next_handle: AtomicU64,
    instances: RwLock<HashMap<ObjectId, Arc<Slot>>>,
    handles: RwLock<HashMap<NativeHandle, Arc<Slot>>>,
}

impl Default for ObjectBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectBridge {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            instances: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, object: ObjectId) -> Option<Arc<Slot>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object)
            .cloned()
    }

    fn slot_by_handle(&self, handle: NativeHandle) -> Option<Arc<Slot>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    pub fn state(&self, object: ObjectId) -> LifecycleState {
        self.slot(object)
            .map(|slot| lock(&slot.state).lifecycle)
            .unwrap_or(LifecycleState::Unconstructed)
    }

    /// Number of instances currently holding a live handle.
    pub fn live_count(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs the construction hook for `object` and makes it `Live`.
    ///
    /// On failure the instance stays `Unconstructed` and no handle survives.
    pub fn construct(
        &self,
        object: ObjectId,
        type_name: &str,
        hooks: &LifecycleHooks,
    ) -> Result<NativeHandle, InteropError> {
        let member = format!("{}::.ctor", type_name);
        let handle = NativeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot {
            object,
            type_name: type_name.to_string(),
            handle,
            destroy: hooks.destroy.clone(),
            state: Mutex::new(SlotState {
                lifecycle: LifecycleState::Constructing,
                in_flight: Vec::new(),
                destroy_pending: false,
            }),
            changed: Condvar::new(),
            resource: Mutex::new(None),
        });

        {
            let mut instances = self
                .instances
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = instances.get(&object) {
                let state = lock(&existing.state).lifecycle;
                if state != LifecycleState::Destroyed {
                    return Err(InteropError::InvalidLifecycleState { member, state });
                }
            }
            instances.insert(object, slot.clone());
        }

        debug!("Constructing {} {} as {}", type_name, object, handle);
        match catch_native(&member, || (hooks.construct)(handle)) {
            Ok(resource) => {
                *lock(&slot.resource) = Some(resource);
                self.handles
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(handle, slot.clone());
                lock(&slot.state).lifecycle = LifecycleState::Live;
                slot.changed.notify_all();
                Ok(handle)
            }
            Err(fault) => {
                self.instances
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&object);
                lock(&slot.state).lifecycle = LifecycleState::Unconstructed;
                slot.changed.notify_all();
                warn!("Construction of {} {} failed: {}", type_name, object, fault);
                Err(InteropError::NativeFault { member, fault })
            }
        }
    }

    /// Admits an instance call on `object`. The call stays admitted until the
    /// returned guard is dropped.
    pub fn enter(
        &self,
        object: ObjectId,
        member: &BoundMember,
    ) -> Result<CallGuard<'_>, InteropError> {
        let slot = self
            .slot(object)
            .ok_or_else(|| InteropError::InvalidLifecycleState {
                member: member.to_string(),
                state: LifecycleState::Unconstructed,
            })?;

        let mut state = lock(&slot.state);
        if state.lifecycle != LifecycleState::Live || state.destroy_pending {
            let reported = if state.destroy_pending {
                LifecycleState::Destructing
            } else {
                state.lifecycle
            };
            return Err(InteropError::InvalidLifecycleState {
                member: member.to_string(),
                state: reported,
            });
        }
        state.in_flight.push(thread::current().id());
        drop(state);

        Ok(CallGuard {
            bridge: self,
            slot,
            _thread_bound: PhantomData,
        })
    }

    /// Destruction notification for `object`.
    ///
    /// Returns `true` when this call ran the destruction hook. Repeated
    /// notifications, and notifications for instances that were never
    /// bridged, are no-ops.
    pub fn destroy(&self, object: ObjectId) -> bool {
        match self.slot(object) {
            Some(slot) => self.destroy_slot(&slot),
            None => false,
        }
    }

    /// Explicit release from the native side. Same semantics as [`destroy`](Self::destroy).
    pub fn release(&self, handle: NativeHandle) -> bool {
        match self.slot_by_handle(handle) {
            Some(slot) => self.destroy_slot(&slot),
            None => false,
        }
    }

    fn destroy_slot(&self, slot: &Arc<Slot>) -> bool {
        let me = thread::current().id();
        let mut state = lock(&slot.state);
        while state.lifecycle == LifecycleState::Constructing {
            state = slot
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.lifecycle != LifecycleState::Live || state.destroy_pending {
            return false;
        }
        if state.in_flight.contains(&me) {
            debug!(
                "Deferring destruction of {} until its in-flight call returns",
                slot.handle
            );
            state.destroy_pending = true;
            return false;
        }

        state.lifecycle = LifecycleState::Destructing;
        while !state.in_flight.is_empty() {
            state = slot
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(state);

        self.finish_destroy(slot);
        true
    }

    fn finish_destroy(&self, slot: &Slot) {
        self.handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot.handle);

        let resource = lock(&slot.resource).take();
        if let Some(resource) = resource {
            let member = format!("{}::.dtor", slot.type_name);
            let destroy = slot.destroy.clone();
            let handle = slot.handle;
            let result = catch_native(&member, move || {
                destroy(handle, resource);
                Ok::<(), NativeFault>(())
            });
            if let Err(fault) = result {
                error!("Destruction hook of {} faulted: {}", handle, fault);
            }
        }

        lock(&slot.state).lifecycle = LifecycleState::Destroyed;
        slot.changed.notify_all();
        debug!("Destroyed {} {} ({})", slot.type_name, slot.object, slot.handle);
    }

    /// Runs `f` on the native resource behind `handle`.
    ///
    /// Fails with [`InteropError::UseAfterRelease`] once the handle has been
    /// released. `f` must not access the same handle again.
    pub fn with_resource<T: 'static, R>(
        &self,
        handle: NativeHandle,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, InteropError> {
        let slot = self
            .slot_by_handle(handle)
            .ok_or(InteropError::UseAfterRelease(handle))?;
        let mut guard = lock(&slot.resource);
        let resource = guard
            .as_mut()
            .ok_or(InteropError::UseAfterRelease(handle))?;
        let typed = (**resource)
            .downcast_mut::<T>()
            .ok_or(InteropError::ResourceType {
                handle,
                expected: std::any::type_name::<T>(),
            })?;
        Ok(f(typed))
    }

    /// Handle of a live instance, for passing it across the boundary.
    pub fn handle_of(&self, object: ObjectId) -> Result<NativeHandle, InteropError> {
        let slot = self
            .slot(object)
            .ok_or_else(|| InteropError::InvalidLifecycleState {
                member: object.to_string(),
                state: LifecycleState::Unconstructed,
            })?;
        let state = lock(&slot.state);
        if state.lifecycle == LifecycleState::Live && !state.destroy_pending {
            Ok(slot.handle)
        } else {
            Err(InteropError::InvalidLifecycleState {
                member: object.to_string(),
                state: state.lifecycle,
            })
        }
    }

    /// Managed instance a live handle belongs to.
    pub fn object_of(&self, handle: NativeHandle) -> Result<ObjectId, InteropError> {
        self.slot_by_handle(handle)
            .map(|slot| slot.object)
            .ok_or(InteropError::UseAfterRelease(handle))
    }

    /// Drops the record of a destroyed instance once the managed runtime has
    /// reclaimed its identity.
    pub fn forget(&self, object: ObjectId) {
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let destroyed = instances
            .get(&object)
            .map(|slot| lock(&slot.state).lifecycle == LifecycleState::Destroyed)
            .unwrap_or(false);
        if destroyed {
            instances.remove(&object);
        }
    }
}

/// An admitted instance call. Dropping it ends the call.
///
/// The call is tracked by the thread that entered it, so the guard cannot
/// leave that thread:
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<interop::CallGuard<'static>>();
/// ```
pub struct CallGuard<'a> {
    bridge: &'a ObjectBridge,
    slot: Arc<Slot>,
    _thread_bound: PhantomData<*const ()>,
}

impl CallGuard<'_> {
    /// Receiver handle of the admitted call.
    pub fn handle(&self) -> NativeHandle {
        self.slot.handle
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = lock(&self.slot.state);
        if let Some(pos) = state.in_flight.iter().position(|id| *id == me) {
            state.in_flight.swap_remove(pos);
        }

        if state.destroy_pending && state.in_flight.is_empty() {
            state.destroy_pending = false;
            state.lifecycle = LifecycleState::Destructing;
            drop(state);
            self.bridge.finish_destroy(&self.slot);
        } else {
            drop(state);
            self.slot.changed.notify_all();
        }
    }
}
