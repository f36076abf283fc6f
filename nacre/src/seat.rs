// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Seats aggregate the capabilities of their attached input devices and
//! route device events into the pointer, keyboard, and touch state
//! machines.

use tracing::debug;
use wayland_server::{backend::GlobalId, protocol::wl_seat, Resource as _};

use crate::{
    compositor::State,
    input::{caps_to_wl, DeviceKey, CAP_KEYBOARD, CAP_POINTER, CAP_TOUCH},
    keyboard::Keyboard,
    object::{Event, EventKind, ListenerId, ObjectCore, ObjectRef},
    pointer::Pointer,
    touch::Touch,
};

slotmap::new_key_type! { pub struct SeatKey; }

struct DeviceEntry {
    device: DeviceKey,
    listener: Option<ListenerId>,
}

pub struct Seat {
    pub(crate) core: ObjectCore,
    pub(crate) name: String,
    pub(crate) global: Option<GlobalId>,
    pub(crate) resources: Vec<wl_seat::WlSeat>,

    pub(crate) caps: u32,

    pub(crate) pointer: Option<Pointer>,
    pub(crate) keyboard: Option<Keyboard>,
    pub(crate) touch: Option<Touch>,

    devices: Vec<DeviceEntry>,
}

impl Seat {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn caps(&self) -> u32 {
        self.caps
    }

    pub fn pointer(&self) -> Option<&Pointer> {
        self.pointer.as_ref()
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        self.keyboard.as_ref()
    }

    pub fn touch(&self) -> Option<&Touch> {
        self.touch.as_ref()
    }
}

impl State {
    /// Creates a seat and announces its wl_seat global.
    pub fn add_seat(&mut self, name: &str) -> SeatKey {
        let key = self.seats.insert_with_key(|k| Seat {
            core: self.objects.register(ObjectRef::Seat(k)),
            name: name.to_owned(),
            global: None,
            resources: Vec::new(),
            caps: 0,
            pointer: None,
            keyboard: None,
            touch: None,
            devices: Vec::new(),
        });

        let global = self.dh.create_global::<State, wl_seat::WlSeat, SeatKey>(4, key);
        self.seats[key].global = Some(global);

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::SeatAdd, ObjectRef::Seat(key)),
        );

        key
    }

    pub fn destroy_seat(&mut self, key: SeatKey) {
        if !self.seats.contains_key(key) {
            return;
        }

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::SeatRemove, ObjectRef::Seat(key)),
        );

        // Drop every capability, cancelling grabs and focus on the way.
        self.seat_apply_caps(key, 0);

        let entries: Vec<_> = self.seats[key]
            .devices
            .drain(..)
            .map(|e| (e.device, e.listener))
            .collect();
        for (device, listener) in entries {
            if let Some(listener) = listener {
                self.remove_listener(ObjectRef::Device(device), listener);
            }
        }

        self.finish_object(ObjectRef::Seat(key));

        let seat = self.seats.remove(key).unwrap();
        if let Some(global) = seat.global {
            self.dh.remove_global::<State>(global);
        }
        self.objects.release(seat.core.id());
    }

    pub fn find_seat(&self, name: &str) -> Option<SeatKey> {
        self.seats
            .iter()
            .find(|(_, seat)| seat.name == name)
            .map(|(key, _)| key)
    }

    pub fn seat(&self, key: SeatKey) -> Option<&Seat> {
        self.seats.get(key)
    }

    pub fn seat_keys(&self) -> Vec<SeatKey> {
        self.seats.keys().collect()
    }

    /// Attaches an input device. The seat's capabilities grow by the
    /// device's, new capability substructures are created, and the change
    /// is broadcast to every bound resource.
    pub fn seat_add_input_device(&mut self, key: SeatKey, device: DeviceKey) {
        if self.seats[key].devices.iter().any(|e| e.device == device) {
            return;
        }

        self.seats[key].devices.push(DeviceEntry {
            device,
            listener: None,
        });

        self.seat_update_caps(key);

        let listener = self.add_listener(
            ObjectRef::Device(device),
            EventKind::All,
            0,
            std::rc::Rc::new(move |state: &mut State, _, event| {
                state.seat_handle_device_event(key, device, event);
            }),
        );

        if let Some(entry) = self.seats[key]
            .devices
            .iter_mut()
            .find(|e| e.device == device)
        {
            entry.listener = listener;
        }
    }

    /// Detaches an input device, shrinking the seat's capabilities.
    pub fn seat_remove_input_device(&mut self, key: SeatKey, device: DeviceKey) {
        let Some(pos) = self.seats[key].devices.iter().position(|e| e.device == device) else {
            return;
        };

        let entry = self.seats[key].devices.remove(pos);
        if let Some(listener) = entry.listener {
            self.remove_listener(ObjectRef::Device(device), listener);
        }

        self.seat_update_caps(key);
    }

    fn seat_update_caps(&mut self, key: SeatKey) {
        let caps = self.seats[key]
            .devices
            .iter()
            .filter_map(|e| self.devices.get(e.device))
            .fold(0, |acc, d| acc | d.caps);

        if caps != self.seats[key].caps {
            self.seat_apply_caps(key, caps);
        }
    }

    fn seat_apply_caps(&mut self, key: SeatKey, caps: u32) {
        debug!(seat = %self.seats[key].name, caps, "seat capabilities changed");

        self.seats[key].caps = caps;

        if caps & CAP_POINTER != 0 && self.seats[key].pointer.is_none() {
            let pointer = Pointer::new(self.objects.register(ObjectRef::Pointer(key)));
            self.seats[key].pointer = Some(pointer);
            self.emit(
                ObjectRef::Seat(key),
                Event::with_object(EventKind::SeatPointerAdd, ObjectRef::Pointer(key)),
            );
        } else if caps & CAP_POINTER == 0 && self.seats[key].pointer.is_some() {
            self.emit(
                ObjectRef::Seat(key),
                Event::with_object(EventKind::SeatPointerRemove, ObjectRef::Pointer(key)),
            );
            self.teardown_pointer(key);
        }

        if caps & CAP_KEYBOARD != 0 && self.seats[key].keyboard.is_none() {
            let keyboard = Keyboard::new(self.objects.register(ObjectRef::Keyboard(key)));
            self.seats[key].keyboard = Some(keyboard);
            self.emit(
                ObjectRef::Seat(key),
                Event::with_object(EventKind::SeatKeyboardAdd, ObjectRef::Keyboard(key)),
            );
        } else if caps & CAP_KEYBOARD == 0 && self.seats[key].keyboard.is_some() {
            self.emit(
                ObjectRef::Seat(key),
                Event::with_object(EventKind::SeatKeyboardRemove, ObjectRef::Keyboard(key)),
            );
            self.teardown_keyboard(key);
        }

        if caps & CAP_TOUCH != 0 && self.seats[key].touch.is_none() {
            let touch = Touch::new(self.objects.register(ObjectRef::Touch(key)));
            self.seats[key].touch = Some(touch);
            self.emit(
                ObjectRef::Seat(key),
                Event::with_object(EventKind::SeatTouchAdd, ObjectRef::Touch(key)),
            );
        } else if caps & CAP_TOUCH == 0 && self.seats[key].touch.is_some() {
            self.emit(
                ObjectRef::Seat(key),
                Event::with_object(EventKind::SeatTouchRemove, ObjectRef::Touch(key)),
            );
            self.teardown_touch(key);
        }

        let seat = &self.seats[key];
        for resource in &seat.resources {
            resource.capabilities(caps_to_wl(caps));
        }
    }

    fn seat_handle_device_event(&mut self, key: SeatKey, device: DeviceKey, event: &Event) {
        if !self.seats.contains_key(key) {
            return;
        }

        match event.kind {
            EventKind::ObjectDestroy => {
                self.seat_remove_input_device(key, device);
            }
            EventKind::DevicePointerMotion
            | EventKind::DevicePointerMotionAbsolute
            | EventKind::DevicePointerButton
            | EventKind::DevicePointerAxis => {
                if let Some(input) = event.info.input() {
                    self.pointer_handle_event(key, input);
                }
            }
            EventKind::DeviceKeyboardKey => {
                if let Some(input) = event.info.input() {
                    self.keyboard_handle_event(key, input);
                }
            }
            EventKind::DeviceTouchDown
            | EventKind::DeviceTouchUp
            | EventKind::DeviceTouchMotion
            | EventKind::DeviceTouchFrame => {
                if let Some(input) = event.info.input() {
                    self.touch_handle_event(key, input);
                }
            }
            _ => (),
        }
    }

    /// Sends the capability bitmask (and name) to a newly bound resource.
    pub(crate) fn seat_send_initial_state(&mut self, key: SeatKey, resource: &wl_seat::WlSeat) {
        let Some(seat) = self.seats.get(key) else {
            return;
        };

        resource.capabilities(caps_to_wl(seat.caps));
        if resource.version() >= 2 {
            resource.name(seat.name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn capability_aggregation_creates_and_destroys_devices() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let seat = state.add_seat("seat0");
        assert_eq!(state.seats[seat].caps(), 0);

        let mouse = state.create_input_device(CAP_POINTER, None);
        let kbd = state.create_input_device(CAP_KEYBOARD, None);

        state.seat_add_input_device(seat, mouse);
        assert_eq!(state.seats[seat].caps(), CAP_POINTER);
        assert!(state.seats[seat].pointer().is_some());
        assert!(state.seats[seat].keyboard().is_none());

        state.seat_add_input_device(seat, kbd);
        assert_eq!(state.seats[seat].caps(), CAP_POINTER | CAP_KEYBOARD);
        assert!(state.seats[seat].keyboard().is_some());

        state.seat_remove_input_device(seat, mouse);
        assert_eq!(state.seats[seat].caps(), CAP_KEYBOARD);
        assert!(state.seats[seat].pointer().is_none());
        assert!(state.seats[seat].keyboard().is_some());
    }

    #[test]
    fn device_destruction_detaches_from_seat() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let seat = state.add_seat("seat0");
        let mouse = state.create_input_device(CAP_POINTER, None);
        state.seat_add_input_device(seat, mouse);
        assert!(state.seats[seat].pointer().is_some());

        state.destroy_input_device(mouse);
        assert_eq!(state.seats[seat].caps(), 0);
        assert!(state.seats[seat].pointer().is_none());
    }

    #[test]
    fn seat_emits_capability_events() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let seat = state.add_seat("seat0");

        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        for kind in [EventKind::SeatPointerAdd, EventKind::SeatPointerRemove] {
            let log = log.clone();
            state.add_listener(
                ObjectRef::Seat(seat),
                kind,
                0,
                std::rc::Rc::new(move |_, _, event| {
                    log.borrow_mut().push(event.kind);
                }),
            );
        }

        let mouse = state.create_input_device(CAP_POINTER, None);
        state.seat_add_input_device(seat, mouse);
        state.seat_remove_input_device(seat, mouse);

        assert_eq!(
            log.borrow().as_slice(),
            &[EventKind::SeatPointerAdd, EventKind::SeatPointerRemove]
        );
    }
}
