// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The desktop window-management layer.
//!
//! Built entirely on the public engine surface: surface roles, the
//! configure/ack dance, toplevel/popup/transient/maximize/fullscreen
//! states, interactive move and resize grabs, and the wl_shell,
//! xdg_wm_base, and private nacre_shell globals.

mod grabs;
mod nacre_shell;
mod protocols;
mod surface;
mod wl_shell;
mod xdg_shell;

use std::time;

use hashbrown::HashMap;
use slotmap::SlotMap;
use tracing::{debug, warn};
use wayland_server::{
    backend::GlobalId,
    protocol::wl_shell as wl_shell_proto,
    Resource as _,
};
use wayland_protocols::xdg::shell::server::xdg_wm_base;

pub use surface::{
    FullscreenMethod, ShellSurface, ShellSurfaceKey, ShellSurfaceResource, ShellSurfaceType,
    RESIZE_EDGE_BOTTOM, RESIZE_EDGE_LEFT, RESIZE_EDGE_RIGHT, RESIZE_EDGE_TOP,
};

use crate::{
    compositor::{State, TimerId},
    input::DeviceKey,
    object::{EventKind, ListenerId, ObjectRef, UserDataKey},
    output::OutputId,
    region::Rect,
    seat::SeatKey,
};

/// How long a client gets to answer a ping before it is marked
/// unresponsive.
pub(crate) const PING_TIMEOUT: time::Duration = time::Duration::from_millis(200);

slotmap::new_key_type! { pub struct ShellClientKey; }
slotmap::new_key_type! { pub(crate) struct PositionerKey; }

/// The wire object a shell client bound, used for pings.
pub(crate) enum ShellClientKind {
    WlShell(wl_shell_proto::WlShell),
    Xdg(xdg_wm_base::XdgWmBase),
}

pub struct ShellClient {
    pub(crate) kind: ShellClientKind,

    pub(crate) ping_timer: Option<TimerId>,
    pub(crate) need_pong: bool,
    pub(crate) ping_serial: u32,
    pub(crate) unresponsive: bool,
}

impl ShellClient {
    pub fn is_unresponsive(&self) -> bool {
        self.unresponsive
    }
}

/// Panel-style strips reserved at the edges of an output, excluded from
/// the workarea that maximized windows fill.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ExclusionInsets {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Default, Copy, Clone)]
pub(crate) struct Positioner {
    pub anchor_rect: Rect,
    pub size: (i32, i32),
    pub offset: (i32, i32),
}

impl Positioner {
    /// The popup's position relative to its parent window geometry.
    pub(crate) fn position(&self) -> (i32, i32) {
        (
            self.anchor_rect.x1 + self.offset.0,
            self.anchor_rect.y1 + self.offset.1,
        )
    }
}

struct ShellSeat {
    seat: SeatKey,
    listeners: Vec<ListenerId>,
}

pub struct DesktopShell {
    /// Maps a surface object to its shell surface via object user data.
    pub(crate) surface_key: UserDataKey,

    pub(crate) clients: SlotMap<ShellClientKey, ShellClient>,
    pub(crate) surfaces: SlotMap<ShellSurfaceKey, ShellSurface>,
    pub(crate) positioners: SlotMap<PositionerKey, Positioner>,

    seats: Vec<ShellSeat>,
    exclusions: HashMap<u32, ExclusionInsets>,

    pub(crate) cursor_view: Option<crate::view::ViewKey>,

    globals: Vec<GlobalId>,
}

/// Installs the desktop shell: window-management listeners, per-seat input
/// defaults, and the three shell globals.
pub fn desktop_shell_init(state: &mut State) {
    if state.shell.is_some() {
        warn!("desktop shell is already initialized");
        return;
    }

    state.shell = Some(DesktopShell {
        surface_key: UserDataKey::unique(),
        clients: SlotMap::default(),
        surfaces: SlotMap::default(),
        positioners: SlotMap::default(),
        seats: Vec::new(),
        exclusions: HashMap::new(),
        cursor_view: None,
        globals: Vec::new(),
    });

    state.add_listener(
        ObjectRef::Compositor,
        EventKind::InputDeviceAdd,
        0,
        std::rc::Rc::new(|state: &mut State, _, event| {
            if let Some(ObjectRef::Device(device)) = event.info.object() {
                state.shell_add_input_device(device);
            }
        }),
    );
    state.add_listener(
        ObjectRef::Compositor,
        EventKind::SeatAdd,
        0,
        std::rc::Rc::new(|state: &mut State, _, event| {
            if let Some(ObjectRef::Seat(seat)) = event.info.object() {
                state.shell_add_seat(seat);
            }
        }),
    );
    state.add_listener(
        ObjectRef::Compositor,
        EventKind::SeatRemove,
        0,
        std::rc::Rc::new(|state: &mut State, _, event| {
            if let Some(ObjectRef::Seat(seat)) = event.info.object() {
                state.shell_remove_seat(seat);
            }
        }),
    );

    // Seed state for seats and devices that predate the shell.
    for seat in state.seat_keys() {
        state.shell_add_seat(seat);
    }
    let devices: Vec<DeviceKey> = state.devices.keys().collect();
    for device in devices {
        state.shell_add_input_device(device);
    }

    let dh = state.dh.clone();
    let globals = vec![
        dh.create_global::<State, wl_shell_proto::WlShell, ()>(1, ()),
        dh.create_global::<State, xdg_wm_base::XdgWmBase, ()>(2, ()),
        dh.create_global::<State, protocols::nacre_shell::NacreShell, ()>(1, ()),
    ];
    state.shell.as_mut().unwrap().globals = globals;

    debug!("desktop shell initialized");
}

impl State {
    pub(crate) fn shell_ref(&self) -> Option<&DesktopShell> {
        self.shell.as_ref()
    }

    pub(crate) fn shell_mut(&mut self) -> Option<&mut DesktopShell> {
        self.shell.as_mut()
    }

    /// Finds the shell surface decorating a surface, if any.
    pub fn shell_surface_for(&self, surface: crate::surface::SurfaceKey) -> Option<ShellSurfaceKey> {
        let key = self.shell_ref()?.surface_key;
        self.user_data::<ShellSurfaceKey>(ObjectRef::Surface(surface), key)
            .copied()
    }

    pub fn shell_surface(&self, key: ShellSurfaceKey) -> Option<&ShellSurface> {
        self.shell_ref()?.surfaces.get(key)
    }

    /// Routes a new input device to the seat named by its `seat_name`
    /// property, creating the seat on first use.
    fn shell_add_input_device(&mut self, device: DeviceKey) {
        let target = self
            .devices
            .get(device)
            .and_then(|d| d.property("seat_name"))
            .unwrap_or_else(|| "seat0".to_owned());

        let seat = match self.find_seat(&target) {
            Some(seat) => seat,
            None => self.add_seat(&target),
        };

        self.seat_add_input_device(seat, device);
    }

    fn shell_add_seat(&mut self, seat: SeatKey) {
        let Some(shell) = self.shell_ref() else {
            return;
        };
        if shell.seats.iter().any(|s| s.seat == seat) {
            return;
        }

        let mut listeners = Vec::new();

        listeners.extend(self.add_listener(
            ObjectRef::Seat(seat),
            EventKind::SeatPointerAdd,
            0,
            std::rc::Rc::new(move |state: &mut State, _, _| {
                state.pointer_push_grab(seat, std::rc::Rc::new(grabs::DefaultPointerGrab));
            }),
        ));
        listeners.extend(self.add_listener(
            ObjectRef::Seat(seat),
            EventKind::SeatKeyboardAdd,
            0,
            std::rc::Rc::new(move |state: &mut State, _, _| {
                state.keyboard_push_grab(seat, std::rc::Rc::new(grabs::DefaultKeyboardGrab));
            }),
        ));
        listeners.extend(self.add_listener(
            ObjectRef::Seat(seat),
            EventKind::SeatTouchAdd,
            0,
            std::rc::Rc::new(move |state: &mut State, _, _| {
                state.touch_push_grab(seat, std::rc::Rc::new(grabs::DefaultTouchGrab));
            }),
        ));

        // Devices attached before the shell came up.
        if self.pointer(seat).is_some() {
            self.pointer_push_grab(seat, std::rc::Rc::new(grabs::DefaultPointerGrab));
        }
        if self.keyboard(seat).is_some() {
            self.keyboard_push_grab(seat, std::rc::Rc::new(grabs::DefaultKeyboardGrab));
        }
        if self.touch(seat).is_some() {
            self.touch_push_grab(seat, std::rc::Rc::new(grabs::DefaultTouchGrab));
        }

        if let Some(shell) = self.shell_mut() {
            shell.seats.push(ShellSeat { seat, listeners });
        }
    }

    fn shell_remove_seat(&mut self, seat: SeatKey) {
        let Some(shell) = self.shell_mut() else {
            return;
        };

        let Some(pos) = shell.seats.iter().position(|s| s.seat == seat) else {
            return;
        };

        let entry = shell.seats.remove(pos);
        for listener in entry.listeners {
            self.remove_listener(ObjectRef::Seat(seat), listener);
        }
    }

    /// Publishes panel exclusion strips for an output; maximized windows
    /// fill what remains.
    pub fn shell_set_panel_exclusion(&mut self, output: OutputId, insets: ExclusionInsets) {
        if let Some(shell) = self.shell_mut() {
            shell.exclusions.insert(output.raw(), insets);
        }
    }

    /// The workarea: the output rectangle minus any published panel
    /// strips.
    pub fn shell_output_workarea(&self, output: OutputId) -> Rect {
        let rect = self
            .output(output)
            .map(|o| o.geometry_rect())
            .unwrap_or_default();

        let insets = self
            .shell_ref()
            .and_then(|shell| shell.exclusions.get(&output.raw()).copied())
            .unwrap_or_default();

        Rect {
            x1: rect.x1 + insets.left,
            y1: rect.y1 + insets.top,
            x2: (rect.x2 - insets.right).max(rect.x1 + insets.left),
            y2: (rect.y2 - insets.bottom).max(rect.y1 + insets.top),
        }
    }

    // ---- Ping/pong liveness.

    /// Pings the client owning a shell surface. The first ping arms a
    /// one-shot timer; a matching pong disarms it. An unresponsive client
    /// takes the timeout path immediately.
    pub(crate) fn shell_surface_ping(&mut self, key: ShellSurfaceKey) {
        let Some(shell) = self.shell_ref() else {
            return;
        };
        let Some(shsurf) = shell.surfaces.get(key) else {
            return;
        };
        let Some(client_key) = shsurf.client else {
            return;
        };

        let Some(client) = shell.clients.get(client_key) else {
            return;
        };

        if client.unresponsive {
            self.shell_client_ping_timeout(client_key);
            return;
        }

        let serial = self.serial.next();

        let shell = self.shell_mut().unwrap();
        let client = shell.clients.get_mut(client_key).unwrap();
        let old_timer = client.ping_timer.take();
        client.ping_serial = serial;
        client.need_pong = true;

        // Send on the wire object appropriate to the role.
        match (&client.kind, shell.surfaces[key].resource.as_ref()) {
            (_, Some(ShellSurfaceResource::WlShell(resource))) => resource.ping(serial),
            (ShellClientKind::Xdg(base), Some(_)) => base.ping(serial),
            _ => (),
        }

        if let Some(timer) = old_timer {
            self.cancel_timer(timer);
        }

        let timer = self.add_timer(PING_TIMEOUT, move |state| {
            state.shell_client_ping_timeout(client_key);
        });

        if let Some(client) = self.shell_mut().and_then(|s| s.clients.get_mut(client_key)) {
            client.ping_timer = Some(timer);
        }
    }

    fn shell_client_ping_timeout(&mut self, client: ShellClientKey) {
        if let Some(client) = self.shell_mut().and_then(|s| s.clients.get_mut(client)) {
            client.unresponsive = true;
            client.ping_timer = None;
        }

        warn!("shell client is unresponsive");
    }

    pub(crate) fn shell_client_handle_pong(&mut self, client_key: ShellClientKey, serial: u32) {
        let timer = {
            let Some(client) = self.shell_mut().and_then(|s| s.clients.get_mut(client_key))
            else {
                return;
            };

            if !client.need_pong || client.ping_serial != serial {
                return;
            }

            client.unresponsive = false;
            client.need_pong = false;
            client.ping_serial = 0;
            client.ping_timer.take()
        };

        if let Some(timer) = timer {
            self.cancel_timer(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use crate::output::OutputId;
    use pretty_assertions::assert_eq;

    #[test]
    fn workarea_subtracts_panel_strips() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        desktop_shell_init(state);

        let output = add_test_output(state, "wa-0", 1920, 1080);
        assert_eq!(
            state.shell_output_workarea(output),
            Rect::new(0, 0, 1920, 1080)
        );

        state.shell_set_panel_exclusion(
            output,
            ExclusionInsets {
                top: 24,
                ..Default::default()
            },
        );
        assert_eq!(
            state.shell_output_workarea(output),
            Rect::new(0, 24, 1920, 1080)
        );

        // Unknown outputs have an empty workarea.
        assert_eq!(
            state.shell_output_workarea(OutputId(31)),
            Rect::default()
        );
    }

    #[test]
    fn shell_routes_devices_to_named_seats() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        desktop_shell_init(state);

        struct Named(&'static str);
        impl crate::backend::InputDeviceBackend for Named {
            fn property(&self, key: &str) -> Option<String> {
                (key == "seat_name").then(|| self.0.to_owned())
            }
        }

        let dev = state.create_input_device(crate::input::CAP_POINTER, Some(Box::new(Named("chair"))));
        let _ = dev;

        let seat = state.find_seat("chair").expect("seat created on demand");
        assert!(state.pointer(seat).is_some());

        // The default grab was installed by the shell.
        assert!(state.pointer_top_grab(seat).is_some());

        // An anonymous device lands on seat0.
        let _dev2 = state.create_input_device(crate::input::CAP_KEYBOARD, None);
        let seat0 = state.find_seat("seat0").unwrap();
        assert!(state.keyboard(seat0).is_some());
    }
}
