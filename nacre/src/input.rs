// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::protocol::{wl_keyboard, wl_pointer, wl_seat};

use crate::{
    compositor::State,
    object::{Event, EventInfo, EventKind, ObjectCore, ObjectRef},
};

slotmap::new_key_type! { pub struct DeviceKey; }

pub const CAP_POINTER: u32 = 1;
pub const CAP_KEYBOARD: u32 = 2;
pub const CAP_TOUCH: u32 = 4;

pub(crate) fn caps_to_wl(caps: u32) -> wl_seat::Capability {
    wl_seat::Capability::from_bits_truncate(caps)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ButtonState {
    Released,
    Pressed,
}

impl From<ButtonState> for wl_pointer::ButtonState {
    fn from(value: ButtonState) -> Self {
        match value {
            ButtonState::Pressed => wl_pointer::ButtonState::Pressed,
            ButtonState::Released => wl_pointer::ButtonState::Released,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyState {
    Released,
    Pressed,
}

impl From<KeyState> for wl_keyboard::KeyState {
    fn from(value: KeyState) -> Self {
        match value {
            KeyState::Pressed => wl_keyboard::KeyState::Pressed,
            KeyState::Released => wl_keyboard::KeyState::Released,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointerAxis {
    Vertical,
    Horizontal,
}

impl From<PointerAxis> for wl_pointer::Axis {
    fn from(value: PointerAxis) -> Self {
        match value {
            PointerAxis::Vertical => wl_pointer::Axis::VerticalScroll,
            PointerAxis::Horizontal => wl_pointer::Axis::HorizontalScroll,
        }
    }
}

/// An event produced by an input backend on a device object. The seat that
/// the device is attached to translates these into focused-view dispatch.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DeviceEvent {
    PointerMotion { time: u32, dx: f64, dy: f64 },
    PointerMotionAbsolute { time: u32, x: f64, y: f64 },
    PointerButton { time: u32, button: u32, state: ButtonState },
    PointerAxis { time: u32, axis: PointerAxis, value: f64 },
    KeyboardKey { time: u32, key: u32, state: KeyState },
    TouchDown { time: u32, slot: i32, x: f64, y: f64 },
    TouchUp { time: u32, slot: i32 },
    TouchMotion { time: u32, slot: i32, x: f64, y: f64 },
    TouchFrame { time: u32 },
}

impl DeviceEvent {
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            DeviceEvent::PointerMotion { .. } => EventKind::DevicePointerMotion,
            DeviceEvent::PointerMotionAbsolute { .. } => EventKind::DevicePointerMotionAbsolute,
            DeviceEvent::PointerButton { .. } => EventKind::DevicePointerButton,
            DeviceEvent::PointerAxis { .. } => EventKind::DevicePointerAxis,
            DeviceEvent::KeyboardKey { .. } => EventKind::DeviceKeyboardKey,
            DeviceEvent::TouchDown { .. } => EventKind::DeviceTouchDown,
            DeviceEvent::TouchUp { .. } => EventKind::DeviceTouchUp,
            DeviceEvent::TouchMotion { .. } => EventKind::DeviceTouchMotion,
            DeviceEvent::TouchFrame { .. } => EventKind::DeviceTouchFrame,
        }
    }
}

/// A physical (or emulated) input device, fed by an input backend.
pub struct InputDevice {
    pub(crate) core: ObjectCore,
    pub(crate) caps: u32,
    pub(crate) backend: Option<Box<dyn crate::backend::InputDeviceBackend>>,
}

impl InputDevice {
    pub fn caps(&self) -> u32 {
        self.caps
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.backend.as_ref().and_then(|b| b.property(key))
    }
}

impl State {
    /// Creates an input device with the given capability bitmask. Emits
    /// `InputDeviceAdd` on the compositor.
    pub fn create_input_device(
        &mut self,
        caps: u32,
        backend: Option<Box<dyn crate::backend::InputDeviceBackend>>,
    ) -> DeviceKey {
        let key = self.devices.insert_with_key(|k| InputDevice {
            core: self.objects.register(ObjectRef::Device(k)),
            caps,
            backend,
        });

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::InputDeviceAdd, ObjectRef::Device(key)),
        );

        key
    }

    /// Destroys an input device. Seats listening on the device detach it in
    /// response to the destroy event.
    pub fn destroy_input_device(&mut self, key: DeviceKey) {
        if !self.devices.contains_key(key) {
            return;
        }

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::InputDeviceRemove, ObjectRef::Device(key)),
        );

        self.finish_object(ObjectRef::Device(key));
        let device = self.devices.remove(key).unwrap();
        self.objects.release(device.core.id());
    }

    /// Entry point for input backends: emit a decoded event on the device
    /// object. Seats attached to the device route it to their pointer,
    /// keyboard or touch state machine.
    pub fn post_device_event(&mut self, device: DeviceKey, event: DeviceEvent) {
        if !self.devices.contains_key(device) {
            return;
        }

        self.emit(
            ObjectRef::Device(device),
            Event {
                kind: event.kind(),
                info: EventInfo::Input(event),
            },
        );
    }
}
