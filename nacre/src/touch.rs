// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The per-seat touch state machine: a list of touch points keyed by slot
//! id, each with its own focus view.

use std::rc::Rc;

use wayland_server::{protocol::wl_touch, Resource as _};

use crate::{
    compositor::State,
    input::DeviceEvent,
    object::{Event, EventKind, ListenerId, ObjectCore, ObjectRef},
    seat::SeatKey,
    view::ViewKey,
};

pub trait TouchGrab {
    fn down(&self, state: &mut State, seat: SeatKey, time: u32, slot: i32, x: f64, y: f64);
    fn up(&self, state: &mut State, seat: SeatKey, time: u32, slot: i32);
    fn motion(&self, state: &mut State, seat: SeatKey, time: u32, slot: i32, x: f64, y: f64);
    fn frame(&self, state: &mut State, seat: SeatKey);
    fn cancel(&self, state: &mut State, seat: SeatKey);
}

pub struct TouchPoint {
    pub(crate) slot: i32,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) focus: Option<ViewKey>,
    pub(crate) focus_serial: u32,
    pub(crate) focus_destroy_listener: Option<ListenerId>,
}

impl TouchPoint {
    pub fn slot(&self) -> i32 {
        self.slot
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn focus(&self) -> Option<ViewKey> {
        self.focus
    }
}

pub struct Touch {
    pub(crate) core: ObjectCore,
    pub(crate) resources: Vec<wl_touch::WlTouch>,
    pub(crate) points: Vec<TouchPoint>,
    pub(crate) grabs: Vec<Rc<dyn TouchGrab>>,
}

impl Touch {
    pub(crate) fn new(core: ObjectCore) -> Self {
        Self {
            core,
            resources: Vec::new(),
            points: Vec::new(),
            grabs: Vec::new(),
        }
    }

    pub fn points(&self) -> &[TouchPoint] {
        &self.points
    }

    pub fn point(&self, slot: i32) -> Option<&TouchPoint> {
        self.points.iter().find(|p| p.slot == slot)
    }
}

impl State {
    pub fn touch(&self, seat: SeatKey) -> Option<&Touch> {
        self.seats.get(seat)?.touch.as_ref()
    }

    pub(crate) fn touch_mut(&mut self, seat: SeatKey) -> Option<&mut Touch> {
        self.seats.get_mut(seat)?.touch.as_mut()
    }

    pub(crate) fn teardown_touch(&mut self, seat: SeatKey) {
        self.touch_cancel_grabs(seat);

        let Some(touch) = self.seats[seat].touch.as_mut() else {
            return;
        };

        let id = touch.core.id();
        let listeners: Vec<_> = touch
            .points
            .drain(..)
            .filter_map(|p| p.focus.zip(p.focus_destroy_listener))
            .collect();

        for (view, listener) in listeners {
            self.remove_listener(ObjectRef::View(view), listener);
        }

        self.objects.release(id);
        self.seats[seat].touch = None;
    }

    pub fn touch_push_grab(&mut self, seat: SeatKey, grab: Rc<dyn TouchGrab>) {
        if let Some(touch) = self.touch_mut(seat) {
            touch.grabs.push(grab);
        }
    }

    pub fn touch_pop_grab(&mut self, seat: SeatKey) -> Option<Rc<dyn TouchGrab>> {
        self.touch_mut(seat)?.grabs.pop()
    }

    pub(crate) fn touch_top_grab(&self, seat: SeatKey) -> Option<Rc<dyn TouchGrab>> {
        self.touch(seat)?.grabs.last().cloned()
    }

    fn touch_cancel_grabs(&mut self, seat: SeatKey) {
        loop {
            let Some(touch) = self.touch_mut(seat) else {
                return;
            };

            if touch.grabs.len() > 1 {
                let grab = touch.grabs.pop().unwrap();
                grab.cancel(self, seat);
            } else {
                if let Some(grab) = touch.grabs.last().cloned() {
                    grab.cancel(self, seat);
                }
                return;
            }
        }
    }

    pub(crate) fn touch_handle_event(&mut self, seat: SeatKey, event: DeviceEvent) {
        if self.touch(seat).is_none() {
            return;
        }

        match event {
            DeviceEvent::TouchDown { time, slot, x, y } => {
                self.touch_add_point(seat, slot, x, y);

                let focus = self.pick_view(x, y).map(|(view, ..)| view);
                self.touch_set_point_focus(seat, slot, focus);

                if let Some(grab) = self.touch_top_grab(seat) {
                    grab.down(self, seat, time, slot, x, y);
                }

                self.emit(
                    ObjectRef::Touch(seat),
                    Event::with_input(EventKind::TouchDown, event),
                );
            }
            DeviceEvent::TouchUp { time, slot } => {
                if let Some(grab) = self.touch_top_grab(seat) {
                    grab.up(self, seat, time, slot);
                }

                self.touch_remove_point(seat, slot);

                self.emit(
                    ObjectRef::Touch(seat),
                    Event::with_input(EventKind::TouchUp, event),
                );
            }
            DeviceEvent::TouchMotion { time, slot, x, y } => {
                let Some(point) = self
                    .touch_mut(seat)
                    .and_then(|t| t.points.iter_mut().find(|p| p.slot == slot))
                else {
                    return;
                };

                point.x = x;
                point.y = y;

                if let Some(grab) = self.touch_top_grab(seat) {
                    grab.motion(self, seat, time, slot, x, y);
                }

                self.emit(
                    ObjectRef::Touch(seat),
                    Event::with_input(EventKind::TouchMotion, event),
                );
            }
            DeviceEvent::TouchFrame { .. } => {
                if let Some(grab) = self.touch_top_grab(seat) {
                    grab.frame(self, seat);
                }

                self.emit(
                    ObjectRef::Touch(seat),
                    Event::with_input(EventKind::TouchFrame, event),
                );
            }
            _ => (),
        }
    }

    pub fn touch_add_point(&mut self, seat: SeatKey, slot: i32, x: f64, y: f64) {
        let Some(touch) = self.touch_mut(seat) else {
            return;
        };

        match touch.points.iter_mut().find(|p| p.slot == slot) {
            Some(point) => {
                point.x = x;
                point.y = y;
            }
            None => touch.points.push(TouchPoint {
                slot,
                x,
                y,
                focus: None,
                focus_serial: 0,
                focus_destroy_listener: None,
            }),
        }
    }

    pub fn touch_remove_point(&mut self, seat: SeatKey, slot: i32) {
        self.touch_set_point_focus(seat, slot, None);

        if let Some(touch) = self.touch_mut(seat) {
            touch.points.retain(|p| p.slot != slot);
        }
    }

    /// Sets the focus view of one touch point, watching the view for
    /// destruction.
    pub fn touch_set_point_focus(&mut self, seat: SeatKey, slot: i32, focus: Option<ViewKey>) {
        let Some(point) = self
            .touch_mut(seat)
            .and_then(|t| t.points.iter_mut().find(|p| p.slot == slot))
        else {
            return;
        };

        if point.focus == focus {
            return;
        }

        let old = point.focus.take();
        let old_listener = point.focus_destroy_listener.take();

        if let Some(old) = old {
            if let Some(listener) = old_listener {
                self.remove_listener(ObjectRef::View(old), listener);
            }

            self.emit(
                ObjectRef::Touch(seat),
                Event::with_object(EventKind::FocusLeave, ObjectRef::View(old)),
            );
            self.emit(
                ObjectRef::View(old),
                Event::with_object(EventKind::FocusLeave, ObjectRef::Touch(seat)),
            );
        }

        if let Some(new) = focus {
            let serial = self.serial.next();
            let listener = self.add_listener(
                ObjectRef::View(new),
                EventKind::ObjectDestroy,
                0,
                Rc::new(move |state: &mut State, _, _| {
                    state.touch_set_point_focus(seat, slot, None);
                    state.touch_cancel_grabs(seat);
                }),
            );

            if let Some(point) = self
                .touch_mut(seat)
                .and_then(|t| t.points.iter_mut().find(|p| p.slot == slot))
            {
                point.focus = Some(new);
                point.focus_serial = serial;
                point.focus_destroy_listener = listener;
            }

            self.emit(
                ObjectRef::Touch(seat),
                Event::with_object(EventKind::FocusEnter, ObjectRef::View(new)),
            );
            self.emit(
                ObjectRef::View(new),
                Event::with_object(EventKind::FocusEnter, ObjectRef::Touch(seat)),
            );
        }
    }

    fn touch_resources_for_view(&self, seat: SeatKey, view: ViewKey) -> Vec<wl_touch::WlTouch> {
        let Some(surface) = self
            .views
            .get(view)
            .and_then(|v| v.surface)
            .and_then(|s| self.surfaces.get(s))
            .and_then(|s| s.resource.clone())
        else {
            return Vec::new();
        };

        self.touch(seat)
            .map(|t| {
                t.resources
                    .iter()
                    .filter(|r| r.is_alive() && r.id().same_client_as(&surface.id()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn touch_send_down(
        &mut self,
        seat: SeatKey,
        view: ViewKey,
        time: u32,
        slot: i32,
        x: f64,
        y: f64,
    ) {
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

        for resource in self.touch_resources_for_view(seat, view) {
            resource.down(serial, time, &surface, slot, x, y);
        }
    }

    pub fn touch_send_up(&mut self, seat: SeatKey, view: ViewKey, time: u32, slot: i32) {
        let serial = self.serial.next();
        for resource in self.touch_resources_for_view(seat, view) {
            resource.up(serial, time, slot);
        }
    }

    pub fn touch_send_motion(
        &mut self,
        seat: SeatKey,
        view: ViewKey,
        time: u32,
        slot: i32,
        x: f64,
        y: f64,
    ) {
        for resource in self.touch_resources_for_view(seat, view) {
            resource.motion(time, slot, x, y);
        }
    }

    pub fn touch_send_frame(&mut self, seat: SeatKey, view: ViewKey) {
        for resource in self.touch_resources_for_view(seat, view) {
            resource.frame();
        }
    }
}
