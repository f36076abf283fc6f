// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The object and event bus underneath every long-lived engine entity.
//!
//! Each entity embeds an [`ObjectCore`]: a unique 32-bit id, a user-data map
//! keyed by opaque tokens, and a prioritised event-listener list. Events are
//! dispatched from a snapshot of the listener list, so a callback may remove
//! itself or any other listener without invalidating the walk, and each
//! listener is delivered to at most once per emit.

use std::{
    any::Any,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use hashbrown::HashMap;

use crate::{
    buffer::BufferKey,
    compositor::{RegionKey, State},
    input::{DeviceEvent, DeviceKey},
    output::OutputId,
    plane::PlaneKey,
    seat::SeatKey,
    subsurface::SubsurfaceKey,
    surface::SurfaceKey,
    view::ViewKey,
};

/// Engine-wide unique id of an object, allocated by the compositor instance
/// and released on destruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) u32);

/// A typed reference to any engine object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Compositor,
    Subcompositor,
    Surface(SurfaceKey),
    Subsurface(SubsurfaceKey),
    Buffer(BufferKey),
    Region(RegionKey),
    View(ViewKey),
    Output(OutputId),
    Plane(PlaneKey),
    Seat(SeatKey),
    Pointer(SeatKey),
    Keyboard(SeatKey),
    Touch(SeatKey),
    Device(DeviceKey),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Matches every event when used to register a listener. Emitting it is
    /// forbidden.
    All,
    ObjectDestroy,

    OutputAdd,
    OutputRemove,
    SeatAdd,
    SeatRemove,
    SurfaceAdd,
    SurfaceRemove,
    ViewAdd,
    ViewRemove,
    InputDeviceAdd,
    InputDeviceRemove,

    OutputModeChange,
    OutputMove,

    SurfaceCommit,
    BufferRelease,
    ViewStackChange,

    SeatPointerAdd,
    SeatPointerRemove,
    SeatKeyboardAdd,
    SeatKeyboardRemove,
    SeatTouchAdd,
    SeatTouchRemove,

    FocusEnter,
    FocusLeave,

    PointerMotion,
    PointerButton,
    PointerAxis,
    KeyboardKey,
    TouchDown,
    TouchUp,
    TouchMotion,
    TouchFrame,

    DevicePointerMotion,
    DevicePointerMotionAbsolute,
    DevicePointerButton,
    DevicePointerAxis,
    DeviceKeyboardKey,
    DeviceTouchDown,
    DeviceTouchUp,
    DeviceTouchMotion,
    DeviceTouchFrame,
}

#[derive(Debug, Copy, Clone)]
pub enum EventInfo {
    None,
    Object(ObjectRef),
    Input(DeviceEvent),
}

impl EventInfo {
    pub fn object(&self) -> Option<ObjectRef> {
        match self {
            EventInfo::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    pub fn input(&self) -> Option<DeviceEvent> {
        match self {
            EventInfo::Input(ev) => Some(*ev),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub info: EventInfo,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            info: EventInfo::None,
        }
    }

    pub fn with_object(kind: EventKind, object: ObjectRef) -> Self {
        Self {
            kind,
            info: EventInfo::Object(object),
        }
    }

    pub fn with_input(kind: EventKind, input: DeviceEvent) -> Self {
        Self {
            kind,
            info: EventInfo::Input(input),
        }
    }
}

/// Listener callbacks run against the whole engine state, and receive the
/// object the event was emitted on.
pub type EventCallback = Rc<dyn Fn(&mut State, ObjectRef, &Event)>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// An opaque token identifying a user-data slot on an object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UserDataKey(u64);

impl UserDataKey {
    pub fn unique() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct Listener {
    id: ListenerId,
    kind: EventKind,
    priority: i32,
    callback: EventCallback,
}

pub struct ObjectCore {
    id: ObjectId,
    listeners: Vec<Listener>,
    user_data: HashMap<UserDataKey, Box<dyn Any>>,
}

impl ObjectCore {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self {
            id,
            listeners: Vec::new(),
            user_data: HashMap::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn add_listener(
        &mut self,
        kind: EventKind,
        priority: i32,
        callback: EventCallback,
    ) -> ListenerId {
        let id = ListenerId::next();
        let listener = Listener {
            id,
            kind,
            priority,
            callback,
        };

        // Higher priority first; among equals, the newest listener wins.
        let pos = self
            .listeners
            .iter()
            .position(|l| priority >= l.priority)
            .unwrap_or(self.listeners.len());
        self.listeners.insert(pos, listener);

        id
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        let len = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != len
    }

    pub(crate) fn set_listener_priority(&mut self, id: ListenerId, priority: i32) -> bool {
        let Some(pos) = self.listeners.iter().position(|l| l.id == id) else {
            return false;
        };

        let mut listener = self.listeners.remove(pos);
        listener.priority = priority;
        let pos = self
            .listeners
            .iter()
            .position(|l| priority >= l.priority)
            .unwrap_or(self.listeners.len());
        self.listeners.insert(pos, listener);

        true
    }

    pub(crate) fn contains_listener(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|l| l.id == id)
    }

    pub(crate) fn snapshot(&self, kind: EventKind) -> Vec<(ListenerId, EventCallback)> {
        self.listeners
            .iter()
            .filter(|l| l.kind == EventKind::All || l.kind == kind)
            .map(|l| (l.id, l.callback.clone()))
            .collect()
    }

    pub fn set_user_data<T: 'static>(&mut self, key: UserDataKey, data: T) {
        self.user_data.insert(key, Box::new(data));
    }

    pub fn user_data<T: 'static>(&self, key: UserDataKey) -> Option<&T> {
        self.user_data.get(&key).and_then(|d| d.downcast_ref())
    }

    pub fn take_user_data<T: 'static>(&mut self, key: UserDataKey) -> Option<T> {
        self.user_data
            .remove(&key)
            .and_then(|d| d.downcast().ok())
            .map(|b| *b)
    }
}

/// Per-engine object id allocation and the id-to-object lookup table. Ids
/// are reused after release; the table never shrinks below its high-water
/// capacity.
pub(crate) struct ObjectTable {
    next: u32,
    free: Vec<u32>,
    map: HashMap<ObjectId, ObjectRef>,
}

impl ObjectTable {
    pub(crate) fn new() -> Self {
        Self {
            next: 1,
            free: Vec::new(),
            map: HashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, object: ObjectRef) -> ObjectCore {
        let id = match self.free.pop() {
            Some(raw) => ObjectId(raw),
            None => {
                let id = ObjectId(self.next);
                self.next += 1;
                id
            }
        };

        self.map.insert(id, object);
        ObjectCore::new(id)
    }

    pub(crate) fn release(&mut self, id: ObjectId) {
        if self.map.remove(&id).is_some() {
            self.free.push(id.0);
        }
    }

    pub(crate) fn lookup(&self, id: ObjectId) -> Option<ObjectRef> {
        self.map.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn listener_priority_order() {
        let mut table = ObjectTable::new();
        let mut core = table.register(ObjectRef::Compositor);

        let noop: EventCallback = Rc::new(|_, _, _| {});
        let low = core.add_listener(EventKind::SurfaceCommit, -5, noop.clone());
        let high = core.add_listener(EventKind::SurfaceCommit, 10, noop.clone());
        let mid = core.add_listener(EventKind::SurfaceCommit, 0, noop.clone());
        let all = core.add_listener(EventKind::All, 0, noop);

        let order: Vec<_> = core
            .snapshot(EventKind::SurfaceCommit)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, vec![high, all, mid, low]);

        // The `All` listener observes unrelated events too.
        let order: Vec<_> = core
            .snapshot(EventKind::BufferRelease)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, vec![all]);

        core.set_listener_priority(low, 20);
        let order: Vec<_> = core
            .snapshot(EventKind::SurfaceCommit)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, vec![low, high, all, mid]);
    }

    #[test]
    fn ids_are_reused() {
        let mut table = ObjectTable::new();
        let a = table.register(ObjectRef::Compositor);
        let b = table.register(ObjectRef::Subcompositor);

        assert_eq!(table.lookup(a.id()), Some(ObjectRef::Compositor));

        let released = a.id();
        table.release(released);
        assert_eq!(table.lookup(released), None);

        let c = table.register(ObjectRef::Compositor);
        assert_eq!(c.id(), released);
        assert_eq!(table.lookup(b.id()), Some(ObjectRef::Subcompositor));
    }

    #[test]
    fn user_data_roundtrip() {
        let mut table = ObjectTable::new();
        let mut core = table.register(ObjectRef::Compositor);

        let key = UserDataKey::unique();
        let other = UserDataKey::unique();

        core.set_user_data(key, 42u32);
        assert_eq!(core.user_data::<u32>(key), Some(&42));
        assert_eq!(core.user_data::<u32>(other), None);

        assert_eq!(core.take_user_data::<u32>(key), Some(42));
        assert_eq!(core.user_data::<u32>(key), None);
    }
}
