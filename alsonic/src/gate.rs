//! Render gate: the lock shared between the render thread and API threads.
//!
//! The render thread must never block, so it only ever *tries* the gate
//! ([`RenderGate::try_render`]). API threads take the gate exclusively
//! ([`RenderGate::lock`]) and wait, by sleep-polling, for any render pass that is
//! already inside to leave.
//!
//! Two counters implement this:
//! - `try_count` is raised by the render thread on entry and lowered on exit.
//! - `acquire_count` is raised by an editor before it waits and lowered when it is done.
//!
//! Each side writes its own counter and then reads the other one. That store/load
//! pair on different atomics needs a single total order, so both counters use
//! `SeqCst` (which also gives the acquire/release edges that publish the guarded
//! data between the two sides). At least one side always observes the other: either
//! the render pass sees the editor and backs off, or the editor sees the render pass
//! and waits for it.

use crate::error::{AlSonicError, Result};
use std::cell::{Cell, UnsafeCell};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_micros(100);
const SLOW_WAIT: Duration = Duration::from_millis(50);

thread_local! {
    static RENDER_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as the render thread for as long as it is alive.
pub(crate) struct RenderThreadScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl RenderThreadScope {
    pub(crate) fn enter() -> Self {
        RENDER_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for RenderThreadScope {
    fn drop(&mut self) {
        RENDER_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// True while the calling thread is inside a render pass
pub fn on_render_thread() -> bool {
    RENDER_DEPTH.with(|depth| depth.get() > 0)
}

/// Data shared between the render thread and API threads.
pub struct RenderGate<T> {
    try_count: AtomicU32,
    acquire_count: AtomicU32,
    editors: Mutex<()>,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is only handed out through `RenderTryer` and
// `RenderLocker`. Editors are serialised by `editors`, at most one tryer can exist
// (a second one sees a non-zero `try_count`), and the counter protocol above keeps
// tryers and lockers apart.
unsafe impl<T: Send> Send for RenderGate<T> {}
unsafe impl<T: Send> Sync for RenderGate<T> {}

impl<T> RenderGate<T> {
    pub fn new(value: T) -> Self {
        Self {
            try_count: AtomicU32::new(0),
            acquire_count: AtomicU32::new(0),
            editors: Mutex::new(()),
            value: UnsafeCell::new(value),
        }
    }

    /// Non-blocking acquire for the render thread.
    ///
    /// Returns `None` when an editor holds (or is waiting for) the gate, or when a
    /// render pass is already inside. The caller must then produce silence and move on.
    pub fn try_render(&self) -> Option<RenderTryer<'_, T>> {
        if self.try_count.fetch_add(1, Ordering::SeqCst) != 0 {
            self.try_count.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        if self.acquire_count.load(Ordering::SeqCst) != 0 {
            self.try_count.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(RenderTryer { gate: self })
    }

    /// Exclusive acquire for API threads.
    ///
    /// Waits for an in-flight render pass to leave. On the render thread there is
    /// nothing to wait for; if that thread is itself inside this gate the edit is
    /// refused rather than deadlocking.
    pub fn lock(&self) -> Result<RenderLocker<'_, T>> {
        let editor = self.editors.lock().unwrap_or_else(PoisonError::into_inner);

        if on_render_thread() && self.try_count.load(Ordering::SeqCst) != 0 {
            return Err(AlSonicError::InvalidOperation(
                "Cannot edit an object from inside its own render pass".to_string(),
            ));
        }

        self.acquire_count.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let mut warned = false;
        while self.try_count.load(Ordering::SeqCst) != 0 {
            std::thread::sleep(POLL_INTERVAL);
            if !warned && started.elapsed() > SLOW_WAIT {
                log::warn!(
                    "Render gate edit waited more than {:?} for a render pass",
                    SLOW_WAIT
                );
                warned = true;
            }
        }

        Ok(RenderLocker {
            gate: self,
            _editor: editor,
        })
    }
}

/// Render-side guard returned by [`RenderGate::try_render`].
pub struct RenderTryer<'a, T> {
    gate: &'a RenderGate<T>,
}

impl<T> Deref for RenderTryer<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see `RenderGate`; this is the only live guard.
        unsafe { &*self.gate.value.get() }
    }
}

impl<T> DerefMut for RenderTryer<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `RenderGate`; this is the only live guard.
        unsafe { &mut *self.gate.value.get() }
    }
}

impl<T> Drop for RenderTryer<'_, T> {
    fn drop(&mut self) {
        self.gate.try_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// API-side guard returned by [`RenderGate::lock`].
pub struct RenderLocker<'a, T> {
    gate: &'a RenderGate<T>,
    _editor: MutexGuard<'a, ()>,
}

impl<T> Deref for RenderLocker<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see `RenderGate`; this is the only live guard.
        unsafe { &*self.gate.value.get() }
    }
}

impl<T> DerefMut for RenderLocker<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `RenderGate`; this is the only live guard.
        unsafe { &mut *self.gate.value.get() }
    }
}

impl<T> Drop for RenderLocker<'_, T> {
    fn drop(&mut self) {
        // `_editor` is released after this body runs, so the next editor can only
        // start once the counter is back down.
        self.gate.acquire_count.fetch_sub(1, Ordering::SeqCst);
    }
}
