// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The per-seat pointer state machine.
//!
//! Grabs form an explicit stack; the handler on top receives every motion,
//! button, and axis event. The shell pushes move/resize/popup grabs on top
//! of its default grab and pops them when they end. Destruction of the
//! focus view clears focus and cancels the grabs above the default.

use std::rc::Rc;

use wayland_server::{protocol::wl_pointer, Resource as _};

use crate::{
    compositor::State,
    input::{ButtonState, DeviceEvent, PointerAxis},
    object::{Event, EventKind, ListenerId, ObjectCore, ObjectRef},
    region::Region,
    seat::SeatKey,
    surface::SurfaceKey,
    view::ViewKey,
};

pub trait PointerGrab {
    fn motion(&self, state: &mut State, seat: SeatKey, time: u32, x: f64, y: f64);
    fn button(&self, state: &mut State, seat: SeatKey, time: u32, button: u32, value: ButtonState);
    fn axis(&self, state: &mut State, seat: SeatKey, time: u32, axis: PointerAxis, value: f64);
    fn cancel(&self, state: &mut State, seat: SeatKey);
}

pub struct Pointer {
    pub(crate) core: ObjectCore,
    pub(crate) resources: Vec<wl_pointer::WlPointer>,

    pub(crate) focus: Option<ViewKey>,
    pub(crate) focus_serial: u32,
    pub(crate) focus_destroy_listener: Option<ListenerId>,

    pub(crate) grabs: Vec<Rc<dyn PointerGrab>>,

    pub(crate) time: u32,
    pub(crate) x: f64,
    pub(crate) y: f64,
    /// Focus-local coordinates of the last dispatched position.
    pub(crate) vx: f64,
    pub(crate) vy: f64,

    pub(crate) clamp: (f64, f64, f64, f64),
    pub(crate) x_velocity: f64,
    pub(crate) y_velocity: f64,

    pub(crate) cursor_view: Option<ViewKey>,
    pub(crate) hotspot: (i32, i32),
}

impl Pointer {
    pub(crate) fn new(core: ObjectCore) -> Self {
        Self {
            core,
            resources: Vec::new(),
            focus: None,
            focus_serial: 0,
            focus_destroy_listener: None,
            grabs: Vec::new(),
            time: 0,
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            clamp: (f64::MIN, f64::MIN, f64::MAX, f64::MAX),
            x_velocity: 1.0,
            y_velocity: 1.0,
            cursor_view: None,
            hotspot: (0, 0),
        }
    }

    pub fn focus(&self) -> Option<ViewKey> {
        self.focus
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.x_velocity, self.y_velocity)
    }

    pub fn clamp_area(&self) -> (f64, f64, f64, f64) {
        self.clamp
    }

    pub fn cursor_view(&self) -> Option<ViewKey> {
        self.cursor_view
    }

    pub fn hotspot(&self) -> (i32, i32) {
        self.hotspot
    }

    fn clamp_position(&mut self) -> bool {
        let mut clamped = false;

        if self.x < self.clamp.0 {
            self.x = self.clamp.0;
            clamped = true;
        }
        if self.x > self.clamp.2 {
            self.x = self.clamp.2;
            clamped = true;
        }
        if self.y < self.clamp.1 {
            self.y = self.clamp.1;
            clamped = true;
        }
        if self.y > self.clamp.3 {
            self.y = self.clamp.3;
            clamped = true;
        }

        clamped
    }
}

impl State {
    pub fn pointer(&self, seat: SeatKey) -> Option<&Pointer> {
        self.seats.get(seat)?.pointer.as_ref()
    }

    pub(crate) fn pointer_mut(&mut self, seat: SeatKey) -> Option<&mut Pointer> {
        self.seats.get_mut(seat)?.pointer.as_mut()
    }

    pub(crate) fn teardown_pointer(&mut self, seat: SeatKey) {
        self.pointer_cancel_grabs(seat);

        let Some(pointer) = self.seats[seat].pointer.as_mut() else {
            return;
        };

        let focus = pointer.focus.take();
        let listener = pointer.focus_destroy_listener.take();
        let id = pointer.core.id();

        if let (Some(focus), Some(listener)) = (focus, listener) {
            self.remove_listener(ObjectRef::View(focus), listener);
        }

        self.objects.release(id);
        self.seats[seat].pointer = None;
    }

    pub fn pointer_push_grab(&mut self, seat: SeatKey, grab: Rc<dyn PointerGrab>) {
        if let Some(pointer) = self.pointer_mut(seat) {
            pointer.grabs.push(grab);
        }
    }

    pub fn pointer_pop_grab(&mut self, seat: SeatKey) -> Option<Rc<dyn PointerGrab>> {
        self.pointer_mut(seat)?.grabs.pop()
    }

    pub(crate) fn pointer_top_grab(&self, seat: SeatKey) -> Option<Rc<dyn PointerGrab>> {
        self.pointer(seat)?.grabs.last().cloned()
    }

    /// Cancels everything above the default grab, then the default itself.
    fn pointer_cancel_grabs(&mut self, seat: SeatKey) {
        loop {
            let Some(pointer) = self.pointer_mut(seat) else {
                return;
            };

            if pointer.grabs.len() > 1 {
                let grab = pointer.grabs.pop().unwrap();
                grab.cancel(self, seat);
            } else {
                if let Some(grab) = pointer.grabs.last().cloned() {
                    grab.cancel(self, seat);
                }
                return;
            }
        }
    }

    /// Feeds one device event into the pointer state machine.
    pub(crate) fn pointer_handle_event(&mut self, seat: SeatKey, event: DeviceEvent) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };

        match event {
            DeviceEvent::PointerMotionAbsolute { time, x, y } => {
                pointer.time = time;
                self.pointer_set_position(seat, time, x, y);
            }
            DeviceEvent::PointerMotion { time, dx, dy } => {
                pointer.time = time;
                let x = pointer.x + dx * pointer.x_velocity;
                let y = pointer.y + dy * pointer.y_velocity;
                self.pointer_set_position(seat, time, x, y);
            }
            DeviceEvent::PointerButton {
                time,
                button,
                state: value,
            } => {
                pointer.time = time;
                if let Some(grab) = self.pointer_top_grab(seat) {
                    grab.button(self, seat, time, button, value);
                }

                self.emit_pointer_event(seat, EventKind::PointerButton, event);
            }
            DeviceEvent::PointerAxis { time, axis, value } => {
                pointer.time = time;
                if let Some(grab) = self.pointer_top_grab(seat) {
                    grab.axis(self, seat, time, axis, value);
                }

                self.emit_pointer_event(seat, EventKind::PointerAxis, event);
            }
            _ => (),
        }
    }

    fn emit_pointer_event(&mut self, seat: SeatKey, kind: EventKind, event: DeviceEvent) {
        if self.pointer(seat).is_some() {
            self.emit(ObjectRef::Pointer(seat), Event::with_input(kind, event));
        }
    }

    fn pointer_set_position(&mut self, seat: SeatKey, time: u32, x: f64, y: f64) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };

        if x == pointer.x && y == pointer.y {
            return;
        }

        pointer.x = x;
        pointer.y = y;
        pointer.clamp_position();

        let (x, y) = (pointer.x, pointer.y);
        let cursor = pointer.cursor_view;
        let hotspot = pointer.hotspot;

        if let Some(cursor) = cursor {
            self.view_set_position(cursor, x - hotspot.0 as f64, y - hotspot.1 as f64);
        }

        if let Some(grab) = self.pointer_top_grab(seat) {
            grab.motion(self, seat, time, x, y);
        }

        self.emit_pointer_event(
            seat,
            EventKind::PointerMotion,
            DeviceEvent::PointerMotionAbsolute { time, x, y },
        );
    }

    /// Restricts the cursor to a rectangle. The position is re-clamped
    /// immediately, replaying motion if it moved.
    pub fn pointer_set_clamp(
        &mut self,
        seat: SeatKey,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
    ) -> bool {
        if x1 < x0 || y1 < y0 {
            return false;
        }

        let Some(pointer) = self.pointer_mut(seat) else {
            return false;
        };

        pointer.clamp = (x0, y0, x1, y1);

        if pointer.clamp_position() {
            let (time, x, y) = (pointer.time, pointer.x, pointer.y);

            if let Some(grab) = self.pointer_top_grab(seat) {
                grab.motion(self, seat, time, x, y);
            }

            self.emit_pointer_event(
                seat,
                EventKind::PointerMotion,
                DeviceEvent::PointerMotionAbsolute { time, x, y },
            );
        }

        true
    }

    pub fn pointer_set_velocity(&mut self, seat: SeatKey, vx: f64, vy: f64) {
        if let Some(pointer) = self.pointer_mut(seat) {
            pointer.x_velocity = vx;
            pointer.y_velocity = vy;
        }
    }

    /// Moves pointer focus, sending nothing on the wire by itself; grabs
    /// pair this with enter/leave sends. The focus view's destruction
    /// forces focus back to null and cancels the active grabs.
    pub fn pointer_set_focus(&mut self, seat: SeatKey, focus: Option<ViewKey>) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };

        if pointer.focus == focus {
            return;
        }

        let old = pointer.focus.take();
        let old_listener = pointer.focus_destroy_listener.take();

        if let Some(old) = old {
            if let Some(listener) = old_listener {
                self.remove_listener(ObjectRef::View(old), listener);
            }

            self.emit(
                ObjectRef::Pointer(seat),
                Event::with_object(EventKind::FocusLeave, ObjectRef::View(old)),
            );
            self.emit(
                ObjectRef::View(old),
                Event::with_object(EventKind::FocusLeave, ObjectRef::Pointer(seat)),
            );
        }

        if let Some(pointer) = self.pointer_mut(seat) {
            pointer.focus = focus;
        }

        if let Some(new) = focus {
            let serial = self.serial.next();
            let listener = self.add_listener(
                ObjectRef::View(new),
                EventKind::ObjectDestroy,
                0,
                Rc::new(move |state: &mut State, _, _| {
                    state.pointer_focus_destroyed(seat);
                }),
            );

            if let Some(pointer) = self.pointer_mut(seat) {
                pointer.focus_serial = serial;
                pointer.focus_destroy_listener = listener;
            }

            self.emit(
                ObjectRef::Pointer(seat),
                Event::with_object(EventKind::FocusEnter, ObjectRef::View(new)),
            );
            self.emit(
                ObjectRef::View(new),
                Event::with_object(EventKind::FocusEnter, ObjectRef::Pointer(seat)),
            );
        }
    }

    fn pointer_focus_destroyed(&mut self, seat: SeatKey) {
        if let Some(pointer) = self.pointer_mut(seat) {
            pointer.focus = None;
            pointer.focus_destroy_listener = None;
        }

        self.pointer_cancel_grabs(seat);
    }

    pub fn pointer_focus(&self, seat: SeatKey) -> Option<ViewKey> {
        self.pointer(seat)?.focus
    }

    fn pointer_resources_for_view(&self, seat: SeatKey, view: ViewKey) -> Vec<wl_pointer::WlPointer> {
        let Some(surface) = self
            .views
            .get(view)
            .and_then(|v| v.surface)
            .and_then(|s| self.surfaces.get(s))
            .and_then(|s| s.resource.clone())
        else {
            return Vec::new();
        };

        self.pointer(seat)
            .map(|p| {
                p.resources
                    .iter()
                    .filter(|r| r.is_alive() && r.id().same_client_as(&surface.id()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn pointer_send_enter(&mut self, seat: SeatKey, view: ViewKey, x: f64, y: f64) {
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

        if let Some(pointer) = self.pointer_mut(seat) {
            pointer.focus_serial = serial;
            pointer.vx = x;
            pointer.vy = y;
        }

        for resource in self.pointer_resources_for_view(seat, view) {
            resource.enter(serial, &surface, x, y);
        }
    }

    pub fn pointer_send_leave(&mut self, seat: SeatKey, view: ViewKey) {
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

        for resource in self.pointer_resources_for_view(seat, view) {
            resource.leave(serial, &surface);
        }
    }

    pub fn pointer_send_motion(&mut self, seat: SeatKey, view: ViewKey, time: u32, x: f64, y: f64) {
        if let Some(pointer) = self.pointer_mut(seat) {
            pointer.vx = x;
            pointer.vy = y;
        }

        for resource in self.pointer_resources_for_view(seat, view) {
            resource.motion(time, x, y);
        }

        self.emit(
            ObjectRef::View(view),
            Event::with_input(
                EventKind::PointerMotion,
                DeviceEvent::PointerMotionAbsolute { time, x, y },
            ),
        );
    }

    pub fn pointer_send_button(
        &mut self,
        seat: SeatKey,
        view: ViewKey,
        time: u32,
        button: u32,
        value: ButtonState,
    ) {
        let serial = self.serial.next();
        for resource in self.pointer_resources_for_view(seat, view) {
            resource.button(serial, time, button, value.into());
        }

        self.emit(
            ObjectRef::View(view),
            Event::with_input(
                EventKind::PointerButton,
                DeviceEvent::PointerButton {
                    time,
                    button,
                    state: value,
                },
            ),
        );
    }

    pub fn pointer_send_axis(
        &mut self,
        seat: SeatKey,
        view: ViewKey,
        time: u32,
        axis: PointerAxis,
        value: f64,
    ) {
        for resource in self.pointer_resources_for_view(seat, view) {
            resource.axis(time, axis.into(), value);
        }

        self.emit(
            ObjectRef::View(view),
            Event::with_input(
                EventKind::PointerAxis,
                DeviceEvent::PointerAxis { time, axis, value },
            ),
        );
    }

    /// Handles wl_pointer.set_cursor. The cursor surface is unpickable and
    /// tracks the pointer at an offset given by the hotspot.
    pub fn pointer_set_cursor(
        &mut self,
        seat: SeatKey,
        surface: Option<SurfaceKey>,
        hotspot_x: i32,
        hotspot_y: i32,
    ) {
        let Some(pointer) = self.pointer_mut(seat) else {
            return;
        };

        let cursor_view = match pointer.cursor_view {
            Some(view) => view,
            None => {
                let view = self.add_view();
                if let Some(pointer) = self.pointer_mut(seat) {
                    pointer.cursor_view = Some(view);
                }
                view
            }
        };

        let Some(surface) = surface else {
            self.view_set_surface(cursor_view, None);
            return;
        };

        let role = self.surfaces[surface].role().map(|r| r.to_owned());
        match role.as_deref() {
            None => {
                self.surface_set_role(surface, "wl_pointer-cursor");
            }
            Some("wl_pointer-cursor") => (),
            Some(_) => return,
        }

        if self.views[cursor_view].surface() != Some(surface) {
            {
                let surf = &mut self.surfaces[surface];
                surf.pickable = false;
                surf.input = Region::new();
            }
            self.view_set_surface(cursor_view, Some(surface));
        }

        let pointer = self.pointer_mut(seat).unwrap();
        pointer.hotspot = (hotspot_x, hotspot_y);
        let (x, y) = (pointer.x, pointer.y);

        self.view_set_position(
            cursor_view,
            x - hotspot_x as f64,
            y - hotspot_y as f64,
        );
        self.view_map(cursor_view);
    }
}
