// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The shell's grab handlers.
//!
//! The default grabs do plain focus-follows-pointer dispatch. Interactive
//! move/resize and popups push their grabs on top and pop them when they
//! end, so nesting composes without hand-stashed previous grabs.

use std::cell::Cell;

use wayland_server::Resource as _;

use crate::{
    compositor::State,
    input::{ButtonState, KeyState, PointerAxis},
    keyboard::KeyboardGrab,
    pointer::PointerGrab,
    seat::SeatKey,
    shell::surface::{ShellSurfaceKey, ShellSurfaceResource, RESIZE_EDGE_BOTTOM, RESIZE_EDGE_LEFT, RESIZE_EDGE_RIGHT, RESIZE_EDGE_TOP},
    touch::TouchGrab,
    view::ViewKey,
};

const BTN_LEFT: u32 = 0x110;

fn view_client_id(state: &State, view: ViewKey) -> Option<wayland_server::backend::ClientId> {
    state
        .views
        .get(view)
        .and_then(|v| v.surface())
        .and_then(|s| state.surfaces.get(s))
        .and_then(|s| s.resource())
        .and_then(|r| r.client())
        .map(|c| c.id())
}

fn shell_surface_client_id(
    state: &State,
    key: ShellSurfaceKey,
) -> Option<wayland_server::backend::ClientId> {
    let resource = state.shell_ref()?.surfaces.get(key)?.resource.as_ref()?;

    let client = match resource {
        ShellSurfaceResource::WlShell(r) => r.client(),
        ShellSurfaceResource::XdgToplevel { toplevel, .. } => toplevel.client(),
        ShellSurfaceResource::XdgPopup { popup, .. } => popup.client(),
    };

    client.map(|c| c.id())
}

/// Focus-follows-pointer dispatch to the picked view's client.
pub(crate) struct DefaultPointerGrab;

fn pointer_focus_motion(state: &mut State, seat: SeatKey, time: u32, x: f64, y: f64) {
    let picked = state.pick_view(x, y);
    let view = picked.map(|(v, ..)| v);
    let focus = state.pointer_focus(seat);

    if focus != view {
        if let Some(old) = focus {
            state.pointer_send_leave(seat, old);
        }

        state.pointer_set_focus(seat, view);

        if let Some((v, lx, ly)) = picked {
            state.pointer_send_enter(seat, v, lx, ly);
        }
    }

    if let Some((v, lx, ly)) = picked {
        state.pointer_send_motion(seat, v, time, lx, ly);
    }
}

impl PointerGrab for DefaultPointerGrab {
    fn motion(&self, state: &mut State, seat: SeatKey, time: u32, x: f64, y: f64) {
        pointer_focus_motion(state, seat, time, x, y);
    }

    fn button(&self, state: &mut State, seat: SeatKey, time: u32, button: u32, value: ButtonState) {
        let focus = state.pointer_focus(seat);

        if value == ButtonState::Pressed {
            // Clicking moves keyboard focus and raises the window.
            if state.keyboard(seat).is_some() {
                state.shell_move_keyboard_focus(seat, focus);
            }

            if let Some(shsurf) = focus
                .and_then(|v| state.views.get(v))
                .and_then(|v| v.surface())
                .and_then(|s| state.shell_surface_for(s))
            {
                state.shell_surface_stack_top(shsurf, false);
            }
        }

        if let Some(focus) = focus {
            state.pointer_send_button(seat, focus, time, button, value);
        }
    }

    fn axis(&self, state: &mut State, seat: SeatKey, time: u32, axis: PointerAxis, value: f64) {
        if let Some(focus) = state.pointer_focus(seat) {
            state.pointer_send_axis(seat, focus, time, axis, value);
        }
    }

    fn cancel(&self, _state: &mut State, _seat: SeatKey) {}
}

pub(crate) struct DefaultKeyboardGrab;

impl KeyboardGrab for DefaultKeyboardGrab {
    fn key(&self, state: &mut State, seat: SeatKey, time: u32, key: u32, value: KeyState) {
        if let Some(focus) = state.keyboard_focus(seat) {
            state.keyboard_send_key(seat, focus, time, key, value);
        }
    }

    fn modifiers(
        &self,
        state: &mut State,
        seat: SeatKey,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    ) {
        if let Some(focus) = state.keyboard_focus(seat) {
            state.keyboard_send_modifiers(seat, focus, depressed, latched, locked, group);
        }
    }

    fn cancel(&self, _state: &mut State, _seat: SeatKey) {}
}

pub(crate) struct DefaultTouchGrab;

impl TouchGrab for DefaultTouchGrab {
    fn down(&self, state: &mut State, seat: SeatKey, time: u32, slot: i32, x: f64, y: f64) {
        let Some(focus) = state.touch(seat).and_then(|t| t.point(slot)).and_then(|p| p.focus())
        else {
            return;
        };

        let (lx, ly) = state.view_local_coordinate(focus, x, y);
        state.touch_send_down(seat, focus, time, slot, lx, ly);
    }

    fn up(&self, state: &mut State, seat: SeatKey, time: u32, slot: i32) {
        let Some(focus) = state.touch(seat).and_then(|t| t.point(slot)).and_then(|p| p.focus())
        else {
            return;
        };

        state.touch_send_up(seat, focus, time, slot);
    }

    fn motion(&self, state: &mut State, seat: SeatKey, time: u32, slot: i32, x: f64, y: f64) {
        let Some(focus) = state.touch(seat).and_then(|t| t.point(slot)).and_then(|p| p.focus())
        else {
            return;
        };

        let (lx, ly) = state.view_local_coordinate(focus, x, y);
        state.touch_send_motion(seat, focus, time, slot, lx, ly);
    }

    fn frame(&self, state: &mut State, seat: SeatKey) {
        let mut seen = Vec::new();
        let focuses: Vec<ViewKey> = state
            .touch(seat)
            .map(|t| t.points().iter().filter_map(|p| p.focus()).collect())
            .unwrap_or_default();

        for focus in focuses {
            if !seen.contains(&focus) {
                seen.push(focus);
                state.touch_send_frame(seat, focus);
            }
        }
    }

    fn cancel(&self, _state: &mut State, _seat: SeatKey) {}
}

/// Interactive move: the view follows the pointer at a fixed offset until
/// the left button is released.
pub(crate) struct MoveGrab {
    pub shsurf: ShellSurfaceKey,
}

impl PointerGrab for MoveGrab {
    fn motion(&self, state: &mut State, seat: SeatKey, _time: u32, x: f64, y: f64) {
        let _ = seat;
        let Some(shsurf) = state.shell_ref().and_then(|s| s.surfaces.get(self.shsurf)) else {
            return;
        };

        let view = shsurf.view;
        let (dx, dy) = shsurf.move_offset;
        state.view_set_position(view, dx + x, dy + y);
    }

    fn button(
        &self,
        state: &mut State,
        seat: SeatKey,
        _time: u32,
        button: u32,
        value: ButtonState,
    ) {
        if button == BTN_LEFT && value == ButtonState::Released {
            state.pointer_pop_grab(seat);
        }
    }

    fn axis(&self, _state: &mut State, _seat: SeatKey, _time: u32, _axis: PointerAxis, _value: f64) {
    }

    fn cancel(&self, _state: &mut State, _seat: SeatKey) {}
}

/// Interactive resize: each motion proposes a new size via configure; the
/// commit path anchors the window at the opposite edge.
pub(crate) struct ResizeGrab {
    pub shsurf: ShellSurfaceKey,
}

impl PointerGrab for ResizeGrab {
    fn motion(&self, state: &mut State, _seat: SeatKey, _time: u32, x: f64, y: f64) {
        let Some(shsurf) = state.shell_ref().and_then(|s| s.surfaces.get(self.shsurf)) else {
            return;
        };

        let resize = shsurf.resize;
        let mut dx = 0.0;
        let mut dy = 0.0;

        if resize.edges & RESIZE_EDGE_LEFT != 0 {
            dx = resize.px - x;
        } else if resize.edges & RESIZE_EDGE_RIGHT != 0 {
            dx = x - resize.px;
        }

        if resize.edges & RESIZE_EDGE_TOP != 0 {
            dy = resize.py - y;
        } else if resize.edges & RESIZE_EDGE_BOTTOM != 0 {
            dy = y - resize.py;
        }

        let w = (resize.vw + dx as i32).max(1);
        let h = (resize.vh + dy as i32).max(1);
        state.shell_surface_send_configure(self.shsurf, w, h);
    }

    fn button(
        &self,
        state: &mut State,
        seat: SeatKey,
        _time: u32,
        button: u32,
        value: ButtonState,
    ) {
        if button == BTN_LEFT && value == ButtonState::Released {
            if let Some(shsurf) = state.shell_mut().and_then(|s| s.surfaces.get_mut(self.shsurf)) {
                shsurf.resize.resizing = false;
                shsurf.resize.edges = 0;
            }

            state.pointer_pop_grab(seat);
        }
    }

    fn axis(&self, _state: &mut State, _seat: SeatKey, _time: u32, _axis: PointerAxis, _value: f64) {
    }

    fn cancel(&self, state: &mut State, _seat: SeatKey) {
        if let Some(shsurf) = state.shell_mut().and_then(|s| s.surfaces.get_mut(self.shsurf)) {
            shsurf.resize.resizing = false;
            shsurf.resize.edges = 0;
        }
    }
}

/// A popup's pointer grab. Clicks on surfaces of other clients (or on
/// nothing) break the grab once a button has been released.
pub(crate) struct PopupGrab {
    pub shsurf: ShellSurfaceKey,
    pub button_up: Cell<bool>,
}

impl PointerGrab for PopupGrab {
    fn motion(&self, state: &mut State, seat: SeatKey, time: u32, x: f64, y: f64) {
        pointer_focus_motion(state, seat, time, x, y);
    }

    fn button(&self, state: &mut State, seat: SeatKey, time: u32, button: u32, value: ButtonState) {
        let focus = state.pointer_focus(seat);
        let focus_client = focus.and_then(|v| view_client_id(state, v));
        let owner_client = shell_surface_client_id(state, self.shsurf);

        if focus_client.is_some() && focus_client == owner_client {
            if let Some(focus) = focus {
                state.pointer_send_button(seat, focus, time, button, value);
            }
        } else if self.button_up.get() {
            state.shell_surface_end_popup_grab(self.shsurf);
        }

        if value == ButtonState::Released {
            self.button_up.set(true);
        }
    }

    fn axis(&self, _state: &mut State, _seat: SeatKey, _time: u32, _axis: PointerAxis, _value: f64) {
    }

    fn cancel(&self, state: &mut State, _seat: SeatKey) {
        state.shell_surface_end_popup_grab(self.shsurf);
    }
}
