//! Event loop registry and wire encoding.
//!
//! The guest owns its scheduling but cannot ask the host for callbacks into
//! arbitrary functions. Instead it creates an *event loop* (a numeric
//! handle), arms animation frames on it, and receives every frame and key
//! event through one exported callback:
//!
//! ```text
//! event_loop_cb(loop_id, kind, code, char, flags)
//! ```
//!
//! The registry never calls the guest itself. Deliveries are resolved in two
//! steps so the caller can release its borrow of the store between them:
//!
//! 1. snapshot the targets ([`EventLoopRegistry::take_due_frames`],
//!    [`EventLoopRegistry::keyboard_targets`])
//! 2. for each target, ask the registry for the encoded event
//!    ([`EventLoopRegistry::fire_frame`], [`EventLoopRegistry::deliver_key`])
//!    immediately before invoking the guest
//!
//! Step 2 looks the loop up by id and checks `dead` at delivery time, so an
//! earlier dispatch in the same batch that kills or disposes a loop stops
//! every later delivery to it.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, trace};

use frame_bridge_common::{KeyEventKind, KeyboardEvent};

/// Event loop identifier handed to the guest.
pub type LoopId = u32;

/// Char field value for keys that do not produce exactly one UTF-16 unit.
pub const NO_CHAR: u32 = 0xFFFF_FFFF;

/// Modifier bit: shift held.
pub const MOD_SHIFT: u32 = 1 << 0;
/// Modifier bit: control held.
pub const MOD_CTRL: u32 = 1 << 1;
/// Modifier bit: alt held.
pub const MOD_ALT: u32 = 1 << 2;

/// Event kind field of the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventKind {
    AnimationFrame = 0,
    KeyDown = 1,
    KeyUp = 2,
}

impl EventKind {
    /// Wire value of the kind.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl From<KeyEventKind> for EventKind {
    fn from(kind: KeyEventKind) -> Self {
        match kind {
            KeyEventKind::Down => EventKind::KeyDown,
            KeyEventKind::Up => EventKind::KeyUp,
        }
    }
}

/// An event encoded for the guest callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireEvent {
    pub loop_id: LoopId,
    pub kind: EventKind,
    pub code: u32,
    pub chr: u32,
    pub flags: u32,
}

impl WireEvent {
    /// Animation frame for `loop_id`. Trailing fields are always zero.
    pub const fn animation_frame(loop_id: LoopId) -> Self {
        Self {
            loop_id,
            kind: EventKind::AnimationFrame,
            code: 0,
            chr: 0,
            flags: 0,
        }
    }

    /// Keyboard event for `loop_id`.
    pub fn key(loop_id: LoopId, kind: KeyEventKind, event: &KeyboardEvent) -> Self {
        Self {
            loop_id,
            kind: kind.into(),
            code: event.code,
            chr: char_code(&event.key),
            flags: modifier_flags(event),
        }
    }

    /// Callback arguments `(loop_id, kind, code, char, flags)`.
    pub const fn args(&self) -> (u32, u32, u32, u32, u32) {
        (self.loop_id, self.kind.code(), self.code, self.chr, self.flags)
    }
}

/// UTF-16 code unit of a single-unit key value, otherwise [`NO_CHAR`].
///
/// Key names such as `"Shift"` and characters outside the BMP (two code
/// units) both yield [`NO_CHAR`].
pub fn char_code(key: &str) -> u32 {
    let mut units = key.encode_utf16();
    match (units.next(), units.next()) {
        (Some(unit), None) => u32::from(unit),
        _ => NO_CHAR,
    }
}

/// Modifier bitmask of a key event.
pub fn modifier_flags(event: &KeyboardEvent) -> u32 {
    let mut flags = 0;
    if event.shift {
        flags |= MOD_SHIFT;
    }
    if event.ctrl {
        flags |= MOD_CTRL;
    }
    if event.alt {
        flags |= MOD_ALT;
    }
    flags
}

/// Opaque handle of an armed frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(u64);

/// A frame callback waiting for the next frame tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledFrame {
    pub handle: FrameHandle,
    pub loop_id: LoopId,
}

#[derive(Debug)]
struct EventLoop {
    dead: bool,
    pending_frame: Option<FrameHandle>,
}

/// Owner of every event loop of a guest session.
///
/// Lives in the store data and is only touched from the thread driving the
/// guest, so it needs no locking.
#[derive(Debug, Default)]
pub struct EventLoopRegistry {
    loops: HashMap<LoopId, EventLoop>,
    last_id: LoopId,
    last_handle: u64,
    frame_queue: Vec<ScheduledFrame>,
    keyboard: BTreeSet<LoopId>,
}

impl EventLoopRegistry {
    /// Create an empty registry. The first loop gets id 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loop, subscribe it to keyboard input and return its id.
    pub fn create(&mut self) -> LoopId {
        self.last_id += 1;
        let id = self.last_id;

        self.loops.insert(
            id,
            EventLoop {
                dead: false,
                pending_frame: None,
            },
        );
        self.keyboard.insert(id);

        debug!(loop_id = id, "Event loop created");
        id
    }

    /// Arm the next animation frame for `id`.
    ///
    /// Returns `false` for unknown ids. A dead loop accepts the request and
    /// ignores it. A loop that already has a frame pending keeps it.
    pub fn arm_frame(&mut self, id: LoopId) -> bool {
        let Some(event_loop) = self.loops.get_mut(&id) else {
            debug!(loop_id = id, "Frame requested for unknown event loop");
            return false;
        };

        if event_loop.dead {
            trace!(loop_id = id, "Frame request on dead event loop ignored");
            return true;
        }

        if event_loop.pending_frame.is_some() {
            trace!(loop_id = id, "Frame already pending");
            return true;
        }

        self.last_handle += 1;
        let handle = FrameHandle(self.last_handle);
        event_loop.pending_frame = Some(handle);
        self.frame_queue.push(ScheduledFrame {
            handle,
            loop_id: id,
        });

        trace!(loop_id = id, handle = handle.0, "Frame armed");
        true
    }

    /// Take every frame armed before this tick.
    ///
    /// Frames armed while these are being fired land in the next tick.
    pub fn take_due_frames(&mut self) -> Vec<ScheduledFrame> {
        std::mem::take(&mut self.frame_queue)
    }

    /// Put frames taken by [`Self::take_due_frames`] but never fired back at
    /// the head of the queue.
    pub fn restore_frames(&mut self, frames: impl IntoIterator<Item = ScheduledFrame>) {
        let newer = std::mem::take(&mut self.frame_queue);
        self.frame_queue.extend(frames);
        self.frame_queue.extend(newer);
    }

    /// Resolve a due frame into the event to dispatch.
    ///
    /// Clears the loop's pending frame first, then checks `dead`. Returns
    /// `None` when the loop is gone, dead, or the handle is stale.
    pub fn fire_frame(&mut self, frame: ScheduledFrame) -> Option<WireEvent> {
        let Some(event_loop) = self.loops.get_mut(&frame.loop_id) else {
            trace!(loop_id = frame.loop_id, "Frame for disposed event loop dropped");
            return None;
        };

        if event_loop.pending_frame != Some(frame.handle) {
            trace!(loop_id = frame.loop_id, "Stale frame handle dropped");
            return None;
        }
        event_loop.pending_frame = None;

        if event_loop.dead {
            trace!(loop_id = frame.loop_id, "Frame for dead event loop dropped");
            return None;
        }

        Some(WireEvent::animation_frame(frame.loop_id))
    }

    /// Ids subscribed to keyboard input, in subscription order.
    pub fn keyboard_targets(&self) -> Vec<LoopId> {
        self.keyboard.iter().copied().collect()
    }

    /// Resolve a keyboard event for one subscriber.
    ///
    /// Returns `None` when the loop is gone or dead.
    pub fn deliver_key(
        &self,
        id: LoopId,
        kind: KeyEventKind,
        event: &KeyboardEvent,
    ) -> Option<WireEvent> {
        match self.loops.get(&id) {
            Some(event_loop) if !event_loop.dead => Some(WireEvent::key(id, kind, event)),
            _ => {
                trace!(loop_id = id, %kind, "Key event for dead event loop dropped");
                None
            }
        }
    }

    /// Mark `id` dead. The entry stays registered.
    ///
    /// Returns `false` for unknown ids.
    pub fn mark_dead(&mut self, id: LoopId) -> bool {
        match self.loops.get_mut(&id) {
            Some(event_loop) => {
                event_loop.dead = true;
                debug!(loop_id = id, "Event loop marked dead");
                true
            }
            None => false,
        }
    }

    /// Kill `id`, withdraw its pending frame, unsubscribe it from keyboard
    /// input and evict it. The id is never reused.
    ///
    /// Returns `false` for unknown ids.
    pub fn dispose(&mut self, id: LoopId) -> bool {
        let Some(mut event_loop) = self.loops.remove(&id) else {
            return false;
        };
        event_loop.dead = true;

        if let Some(handle) = event_loop.pending_frame.take() {
            self.frame_queue.retain(|frame| frame.handle != handle);
        }
        self.keyboard.remove(&id);

        debug!(loop_id = id, "Event loop disposed");
        true
    }

    /// Returns `true` if `id` is registered (alive or dead).
    pub fn contains(&self, id: LoopId) -> bool {
        self.loops.contains_key(&id)
    }

    /// Dead flag of `id`, or `None` if it is not registered.
    pub fn is_dead(&self, id: LoopId) -> Option<bool> {
        self.loops.get(&id).map(|event_loop| event_loop.dead)
    }

    /// Pending frame of `id`, if any.
    pub fn pending_frame(&self, id: LoopId) -> Option<FrameHandle> {
        self.loops.get(&id).and_then(|event_loop| event_loop.pending_frame)
    }

    /// Returns `true` if any frame is waiting for the next tick.
    pub fn has_pending_frames(&self) -> bool {
        !self.frame_queue.is_empty()
    }

    /// Number of registered loops.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns `true` if no loop is registered.
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Number of registered loops that are not dead.
    pub fn live_count(&self) -> usize {
        self.loops.values().filter(|event_loop| !event_loop.dead).count()
    }
}
