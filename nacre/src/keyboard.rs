// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The per-seat keyboard state machine.
//!
//! Tracks the pressed-key array and the xkb state derived from the current
//! keymap. Keymap changes are deferred until no keys are held so that a
//! client never observes a key released under a different keymap than it
//! was pressed with.

use std::{
    fs::File,
    io::Write as _,
    os::fd::{AsFd as _, AsRawFd as _, BorrowedFd},
    rc::Rc,
};

use cstr::cstr;
use nix::{
    fcntl::{fcntl, FcntlArg, SealFlag},
    sys::memfd::{memfd_create, MemFdCreateFlag},
};
use tracing::warn;
use wayland_server::{protocol::wl_keyboard, Resource as _};
use xkbcommon::xkb;

use crate::{
    compositor::State,
    input::{DeviceEvent, KeyState},
    object::{Event, EventKind, ListenerId, ObjectCore, ObjectRef},
    seat::SeatKey,
    view::ViewKey,
};

/// The serialized keymap handed to clients as a read-only fd. The fd is a
/// sealed memfd, so the mapping clients make of it can never change or
/// shrink underneath them. The advertised length includes the terminating
/// NUL xkb expects.
pub(crate) struct KeymapFile {
    file: File,
    len: u32,
}

impl KeymapFile {
    fn new(text: &str) -> anyhow::Result<Self> {
        let fd = memfd_create(
            cstr!("nacre-keymap"),
            MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
        )?;

        let mut file = File::from(fd);
        file.write_all(text.as_bytes())?;
        file.write_all(&[0])?;

        fcntl(
            file.as_raw_fd(),
            FcntlArg::F_ADD_SEALS(
                SealFlag::F_SEAL_SEAL
                    | SealFlag::F_SEAL_WRITE
                    | SealFlag::F_SEAL_SHRINK
                    | SealFlag::F_SEAL_GROW,
            ),
        )?;

        Ok(Self {
            file,
            len: text.len() as u32 + 1,
        })
    }

    pub(crate) fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }

    pub(crate) fn len(&self) -> u32 {
        self.len
    }
}

pub trait KeyboardGrab {
    fn key(&self, state: &mut State, seat: SeatKey, time: u32, key: u32, value: KeyState);
    fn modifiers(
        &self,
        state: &mut State,
        seat: SeatKey,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    );
    fn cancel(&self, state: &mut State, seat: SeatKey);
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Modifiers {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

pub struct Keyboard {
    pub(crate) core: ObjectCore,
    pub(crate) resources: Vec<wl_keyboard::WlKeyboard>,

    pub(crate) focus: Option<ViewKey>,
    pub(crate) focus_serial: u32,
    pub(crate) focus_destroy_listener: Option<ListenerId>,

    pub(crate) grabs: Vec<Rc<dyn KeyboardGrab>>,

    pub(crate) keys: Vec<u32>,

    pub(crate) keymap: Option<xkb::Keymap>,
    pub(crate) keymap_file: Option<KeymapFile>,
    pub(crate) pending_keymap: Option<xkb::Keymap>,
    pub(crate) xkb_state: Option<xkb::State>,
    pub(crate) mods: Modifiers,
}

impl Keyboard {
    pub(crate) fn new(core: ObjectCore) -> Self {
        Self {
            core,
            resources: Vec::new(),
            focus: None,
            focus_serial: 0,
            focus_destroy_listener: None,
            grabs: Vec::new(),
            keys: Vec::new(),
            keymap: None,
            keymap_file: None,
            pending_keymap: None,
            xkb_state: None,
            mods: Modifiers::default(),
        }
    }

    pub fn focus(&self) -> Option<ViewKey> {
        self.focus
    }

    pub fn pressed_keys(&self) -> &[u32] {
        &self.keys
    }

    pub fn modifiers(&self) -> Modifiers {
        self.mods
    }

    fn serialize_modifiers(&self) -> Option<Modifiers> {
        let state = self.xkb_state.as_ref()?;

        Some(Modifiers {
            depressed: state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
            latched: state.serialize_mods(xkb::STATE_MODS_LATCHED),
            locked: state.serialize_mods(xkb::STATE_MODS_LOCKED),
            group: state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
        })
    }
}

impl State {
    pub fn keyboard(&self, seat: SeatKey) -> Option<&Keyboard> {
        self.seats.get(seat)?.keyboard.as_ref()
    }

    pub(crate) fn keyboard_mut(&mut self, seat: SeatKey) -> Option<&mut Keyboard> {
        self.seats.get_mut(seat)?.keyboard.as_mut()
    }

    pub(crate) fn teardown_keyboard(&mut self, seat: SeatKey) {
        self.keyboard_cancel_grabs(seat);

        let Some(keyboard) = self.seats[seat].keyboard.as_mut() else {
            return;
        };

        let focus = keyboard.focus.take();
        let listener = keyboard.focus_destroy_listener.take();
        let id = keyboard.core.id();

        if let (Some(focus), Some(listener)) = (focus, listener) {
            self.remove_listener(ObjectRef::View(focus), listener);
        }

        self.objects.release(id);
        self.seats[seat].keyboard = None;
    }

    pub fn keyboard_push_grab(&mut self, seat: SeatKey, grab: Rc<dyn KeyboardGrab>) {
        if let Some(keyboard) = self.keyboard_mut(seat) {
            keyboard.grabs.push(grab);
        }
    }

    pub fn keyboard_pop_grab(&mut self, seat: SeatKey) -> Option<Rc<dyn KeyboardGrab>> {
        self.keyboard_mut(seat)?.grabs.pop()
    }

    pub(crate) fn keyboard_top_grab(&self, seat: SeatKey) -> Option<Rc<dyn KeyboardGrab>> {
        self.keyboard(seat)?.grabs.last().cloned()
    }

    fn keyboard_cancel_grabs(&mut self, seat: SeatKey) {
        loop {
            let Some(keyboard) = self.keyboard_mut(seat) else {
                return;
            };

            if keyboard.grabs.len() > 1 {
                let grab = keyboard.grabs.pop().unwrap();
                grab.cancel(self, seat);
            } else {
                if let Some(grab) = keyboard.grabs.last().cloned() {
                    grab.cancel(self, seat);
                }
                return;
            }
        }
    }

    pub(crate) fn keyboard_handle_event(&mut self, seat: SeatKey, event: DeviceEvent) {
        let DeviceEvent::KeyboardKey { time, key, state: value } = event else {
            return;
        };

        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };

        // Update the pressed-key array.
        keyboard.keys.retain(|k| *k != key);
        if value == KeyState::Pressed {
            keyboard.keys.push(key);
        }

        if let Some(grab) = self.keyboard_top_grab(seat) {
            grab.key(self, seat, time, key, value);
        }

        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };
        if keyboard.pending_keymap.is_some() && keyboard.keys.is_empty() {
            self.keyboard_apply_keymap(seat);
        }

        self.keyboard_update_key(seat, key, value);

        self.emit(
            ObjectRef::Keyboard(seat),
            Event::with_input(EventKind::KeyboardKey, event),
        );
    }

    fn keyboard_update_key(&mut self, seat: SeatKey, key: u32, value: KeyState) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };

        let Some(xkb_state) = keyboard.xkb_state.as_mut() else {
            return;
        };

        let direction = match value {
            KeyState::Pressed => xkb::KeyDirection::Down,
            KeyState::Released => xkb::KeyDirection::Up,
        };

        // Evdev scancodes are offset by 8 from xkb keycodes.
        xkb_state.update_key(xkb::Keycode::new(key + 8), direction);

        self.keyboard_update_modifiers(seat);
    }

    fn keyboard_update_modifiers(&mut self, seat: SeatKey) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };

        let Some(mods) = keyboard.serialize_modifiers() else {
            return;
        };

        if mods == keyboard.mods {
            return;
        }
        keyboard.mods = mods;

        if let Some(grab) = self.keyboard_top_grab(seat) {
            grab.modifiers(
                self,
                seat,
                mods.depressed,
                mods.latched,
                mods.locked,
                mods.group,
            );
        }
    }

    /// Sets a new keymap. If keys are currently pressed the change is
    /// deferred until the last one is released.
    pub fn keyboard_set_keymap(&mut self, seat: SeatKey, keymap: Option<xkb::Keymap>) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };

        keyboard.pending_keymap = keymap;
        if keyboard.keys.is_empty() {
            self.keyboard_apply_keymap(seat);
        }
    }

    fn keyboard_apply_keymap(&mut self, seat: SeatKey) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };

        let pending = keyboard.pending_keymap.take();

        match pending {
            Some(keymap) => {
                let text = keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1);
                let file = match KeymapFile::new(&text) {
                    Ok(file) => file,
                    Err(err) => {
                        warn!(?err, "failed to create keymap fd");
                        keyboard.keymap = None;
                        keyboard.keymap_file = None;
                        keyboard.xkb_state = None;
                        return;
                    }
                };

                let mut new_state = xkb::State::new(&keymap);

                // Latched and locked modifiers survive the keymap change.
                let carried = keyboard.serialize_modifiers().unwrap_or_default();
                new_state.update_mask(0, carried.latched, carried.locked, 0, 0, 0);

                keyboard.keymap = Some(keymap);
                keyboard.xkb_state = Some(new_state);
                keyboard.keymap_file = Some(file);

                let (fd_resources, len): (Vec<_>, u32) = {
                    let file = keyboard.keymap_file.as_ref().unwrap();
                    (keyboard.resources.clone(), file.len())
                };
                for resource in fd_resources {
                    let keyboard = self.keyboard(seat).unwrap();
                    let file = keyboard.keymap_file.as_ref().unwrap();
                    resource.keymap(wl_keyboard::KeymapFormat::XkbV1, file.as_fd(), len);
                }

                self.keyboard_update_modifiers(seat);

                let keyboard = self.keyboard(seat).unwrap();
                let mods = keyboard.mods;
                if mods.latched != 0 || mods.locked != 0 {
                    let serial = self.serial.next();
                    let keyboard = self.keyboard(seat).unwrap();
                    for resource in &keyboard.resources {
                        resource.modifiers(
                            serial,
                            mods.depressed,
                            mods.latched,
                            mods.locked,
                            mods.group,
                        );
                    }
                }
            }
            None => {
                keyboard.keymap = None;
                keyboard.keymap_file = None;
                keyboard.xkb_state = None;
                keyboard.mods = Modifiers::default();
            }
        }
    }

    /// Moves keyboard focus. Like the pointer, the focus view's destruction
    /// clears focus and cancels any grabs above the default.
    pub fn keyboard_set_focus(&mut self, seat: SeatKey, focus: Option<ViewKey>) {
        let Some(keyboard) = self.keyboard_mut(seat) else {
            return;
        };

        if keyboard.focus == focus {
            return;
        }

        let old = keyboard.focus.take();
        let old_listener = keyboard.focus_destroy_listener.take();

        if let Some(old) = old {
            if let Some(listener) = old_listener {
                self.remove_listener(ObjectRef::View(old), listener);
            }

            self.emit(
                ObjectRef::Keyboard(seat),
                Event::with_object(EventKind::FocusLeave, ObjectRef::View(old)),
            );
            self.emit(
                ObjectRef::View(old),
                Event::with_object(EventKind::FocusLeave, ObjectRef::Keyboard(seat)),
            );
        }

        if let Some(keyboard) = self.keyboard_mut(seat) {
            keyboard.focus = focus;
        }

        if let Some(new) = focus {
            let serial = self.serial.next();
            let listener = self.add_listener(
                ObjectRef::View(new),
                EventKind::ObjectDestroy,
                0,
                Rc::new(move |state: &mut State, _, _| {
                    if let Some(keyboard) = state.keyboard_mut(seat) {
                        keyboard.focus = None;
                        keyboard.focus_destroy_listener = None;
                    }
                    state.keyboard_cancel_grabs(seat);
                }),
            );

            if let Some(keyboard) = self.keyboard_mut(seat) {
                keyboard.focus_serial = serial;
                keyboard.focus_destroy_listener = listener;
            }

            self.emit(
                ObjectRef::Keyboard(seat),
                Event::with_object(EventKind::FocusEnter, ObjectRef::View(new)),
            );
            self.emit(
                ObjectRef::View(new),
                Event::with_object(EventKind::FocusEnter, ObjectRef::Keyboard(seat)),
            );
        }
    }

    pub fn keyboard_focus(&self, seat: SeatKey) -> Option<ViewKey> {
        self.keyboard(seat)?.focus
    }

    fn keyboard_resources_for_view(
        &self,
        seat: SeatKey,
        view: ViewKey,
    ) -> Vec<wl_keyboard::WlKeyboard> {
        let Some(surface) = self
            .views
            .get(view)
            .and_then(|v| v.surface)
            .and_then(|s| self.surfaces.get(s))
            .and_then(|s| s.resource.clone())
        else {
            return Vec::new();
        };

        self.keyboard(seat)
            .map(|k| {
                k.resources
                    .iter()
                    .filter(|r| r.is_alive() && r.id().same_client_as(&surface.id()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn keyboard_send_enter(&mut self, seat: SeatKey, view: ViewKey) {
        let serial = self.serial.next();
        let Some(surface) = self
            .views
            .get(view)
            .and_then(|v| v.surface)
            .and_then(|s| self.surfaces.get(s))
            .and_then(|s| s.resource.clone())
        else {
            return;
        };

        let keys: Vec<u8> = self
            .keyboard(seat)
            .map(|k| k.keys.iter().flat_map(|k| k.to_ne_bytes()).collect())
            .unwrap_or_default();

        if let Some(keyboard) = self.keyboard_mut(seat) {
            keyboard.focus_serial = serial;
        }

        for resource in self.keyboard_resources_for_view(seat, view) {
            resource.enter(serial, &surface, keys.clone());
        }
    }

    pub fn keyboard_send_leave(&mut self, seat: SeatKey, view: ViewKey) {
        let serial = self.serial.next();
        let Some(surface) = self
            .views
            .get(view)
            .and_then(|v| v.surface)
            .and_then(|s| self.surfaces.get(s))
            .and_then(|s| s.resource.clone())
        else {
            return;
        };

        for resource in self.keyboard_resources_for_view(seat, view) {
            resource.leave(serial, &surface);
        }
    }

    pub fn keyboard_send_key(
        &mut self,
        seat: SeatKey,
        view: ViewKey,
        time: u32,
        key: u32,
        value: KeyState,
    ) {
        let serial = self.serial.next();
        for resource in self.keyboard_resources_for_view(seat, view) {
            resource.key(serial, time, key, value.into());
        }
    }

    pub fn keyboard_send_modifiers(
        &mut self,
        seat: SeatKey,
        view: ViewKey,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    ) {
        let serial = self.serial.next();
        for resource in self.keyboard_resources_for_view(seat, view) {
            resource.modifiers(serial, depressed, latched, locked, group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use crate::input::CAP_KEYBOARD;
    use pretty_assertions::assert_eq;

    #[test]
    fn pressed_key_array_tracks_state() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let seat = state.add_seat("seat0");
        let dev = state.create_input_device(CAP_KEYBOARD, None);
        state.seat_add_input_device(seat, dev);

        let press = |state: &mut State, key, value| {
            state.post_device_event(
                dev,
                DeviceEvent::KeyboardKey {
                    time: 0,
                    key,
                    state: value,
                },
            );
        };

        press(state, 30, KeyState::Pressed);
        press(state, 31, KeyState::Pressed);
        assert_eq!(state.keyboard(seat).unwrap().pressed_keys(), &[30, 31]);

        press(state, 30, KeyState::Released);
        assert_eq!(state.keyboard(seat).unwrap().pressed_keys(), &[31]);

        // A repeated press is not duplicated.
        press(state, 31, KeyState::Pressed);
        assert_eq!(state.keyboard(seat).unwrap().pressed_keys(), &[31]);
    }
}
