// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Shell surfaces: the window-management state wrapped around a surface.
//!
//! A shell surface owns a dedicated view and tracks a current and a
//! requested ("next") window type. Type requests record the type and a
//! mapper; the surface maps on the first commit after the client acked the
//! matching configure.

use tracing::{debug, warn};
use wayland_protocols::xdg::shell::server::{xdg_popup, xdg_surface, xdg_toplevel};
use wayland_server::protocol::wl_shell_surface;

use crate::{
    compositor::State,
    object::{EventKind, ListenerId, ObjectRef},
    output::{OutputId, OutputMode, MODE_CURRENT},
    region::Rect,
    seat::SeatKey,
    shell::{grabs, ShellClientKey},
    surface::SurfaceKey,
    transform::Matrix,
    view::ViewKey,
};

slotmap::new_key_type! { pub struct ShellSurfaceKey; }

pub const RESIZE_EDGE_TOP: u32 = 1;
pub const RESIZE_EDGE_BOTTOM: u32 = 2;
pub const RESIZE_EDGE_LEFT: u32 = 4;
pub const RESIZE_EDGE_RIGHT: u32 = 8;

pub enum ShellSurfaceResource {
    WlShell(wl_shell_surface::WlShellSurface),
    XdgToplevel {
        xdg_surface: xdg_surface::XdgSurface,
        toplevel: xdg_toplevel::XdgToplevel,
    },
    XdgPopup {
        xdg_surface: xdg_surface::XdgSurface,
        popup: xdg_popup::XdgPopup,
    },
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ShellSurfaceType {
    #[default]
    None,
    Toplevel,
    Transient,
    Popup,
    Maximized,
    Fullscreen,
    Minimized,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FullscreenMethod {
    #[default]
    Default,
    Scale,
    Driver,
    Fill,
}

#[derive(Default, Copy, Clone)]
pub(crate) struct PopupState {
    pub x: f64,
    pub y: f64,
    pub seat: Option<SeatKey>,
    pub serial: u32,
}

#[derive(Default, Copy, Clone)]
pub(crate) struct FullscreenState {
    pub method: FullscreenMethod,
    pub framerate: u32,
    pub output: Option<OutputId>,
}

#[derive(Default, Copy, Clone)]
pub(crate) struct ResizeState {
    pub px: f64,
    pub py: f64,
    pub vw: i32,
    pub vh: i32,
    pub edges: u32,
    pub resizing: bool,
}

#[derive(Default, Copy, Clone)]
pub(crate) struct SavedState {
    pub x: f64,
    pub y: f64,
    pub w: i32,
    pub h: i32,
    pub mode: Option<OutputMode>,
}

pub struct ShellSurface {
    pub(crate) client: Option<ShellClientKey>,
    pub(crate) surface: SurfaceKey,
    pub(crate) view: ViewKey,
    pub(crate) resource: Option<ShellSurfaceResource>,

    pub(crate) parent: Option<SurfaceKey>,
    pub(crate) children: Vec<ShellSurfaceKey>,

    pub(crate) title: Option<String>,
    pub(crate) class: Option<String>,

    /// Window geometry: position in global space plus logical size.
    pub(crate) geometry: (f64, f64, i32, i32),
    pub(crate) next_geometry: Option<(f64, f64, i32, i32)>,

    pub(crate) kind: ShellSurfaceType,
    pub(crate) next_kind: ShellSurfaceType,
    pub(crate) mapped: bool,
    pub(crate) ack_configure: bool,
    pub(crate) has_keyboard_focus: bool,

    pub(crate) popup: PopupState,
    pub(crate) transient_offset: (f64, f64),
    pub(crate) maximized_output: Option<OutputId>,
    pub(crate) fullscreen: FullscreenState,
    pub(crate) saved: SavedState,

    pub(crate) move_offset: (f64, f64),
    pub(crate) resize: ResizeState,
    pub(crate) last_size: (i32, i32),

    pub(crate) popup_grab: Option<std::rc::Weak<dyn crate::pointer::PointerGrab>>,
    pub(crate) last_configure: Option<(i32, i32)>,
    pub(crate) listeners: Vec<(ObjectRef, ListenerId)>,
}

impl ShellSurface {
    pub fn surface(&self) -> SurfaceKey {
        self.surface
    }

    pub fn view(&self) -> ViewKey {
        self.view
    }

    pub fn kind(&self) -> ShellSurfaceType {
        self.kind
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    fn is_immobile(&self) -> bool {
        matches!(
            self.kind,
            ShellSurfaceType::Fullscreen | ShellSurfaceType::Maximized | ShellSurfaceType::Minimized
        )
    }
}

impl State {
    pub(crate) fn create_shell_surface(
        &mut self,
        client: Option<ShellClientKey>,
        surface: SurfaceKey,
    ) -> ShellSurfaceKey {
        let view = self.add_view();
        self.view_set_surface(view, Some(surface));

        let key = self.shell_mut().unwrap().surfaces.insert(ShellSurface {
            client,
            surface,
            view,
            resource: None,
            parent: None,
            children: Vec::new(),
            title: None,
            class: None,
            geometry: (0.0, 0.0, 0, 0),
            next_geometry: None,
            kind: ShellSurfaceType::None,
            next_kind: ShellSurfaceType::None,
            mapped: false,
            ack_configure: true,
            has_keyboard_focus: false,
            popup: PopupState::default(),
            transient_offset: (0.0, 0.0),
            maximized_output: None,
            fullscreen: FullscreenState::default(),
            saved: SavedState::default(),
            move_offset: (0.0, 0.0),
            resize: ResizeState::default(),
            last_size: (0, 0),
            popup_grab: None,
            last_configure: None,
            listeners: Vec::new(),
        });

        let surface_key = self.shell_ref().unwrap().surface_key;
        self.set_user_data(ObjectRef::Surface(surface), surface_key, key);

        let mut listeners = Vec::new();
        listeners.extend(
            self.add_listener(
                ObjectRef::Surface(surface),
                EventKind::ObjectDestroy,
                0,
                std::rc::Rc::new(move |state: &mut State, _, _| {
                    state.shell_surface_handle_surface_destroy(key);
                }),
            )
            .map(|l| (ObjectRef::Surface(surface), l)),
        );
        listeners.extend(
            self.add_listener(
                ObjectRef::Surface(surface),
                EventKind::SurfaceCommit,
                0,
                std::rc::Rc::new(move |state: &mut State, _, _| {
                    state.shell_surface_handle_commit(key);
                }),
            )
            .map(|l| (ObjectRef::Surface(surface), l)),
        );
        listeners.extend(
            self.add_listener(
                ObjectRef::View(view),
                EventKind::FocusEnter,
                0,
                std::rc::Rc::new(move |state: &mut State, _, event| {
                    state.shell_surface_handle_focus(key, EventKind::FocusEnter, event);
                }),
            )
            .map(|l| (ObjectRef::View(view), l)),
        );
        listeners.extend(
            self.add_listener(
                ObjectRef::View(view),
                EventKind::FocusLeave,
                0,
                std::rc::Rc::new(move |state: &mut State, _, event| {
                    state.shell_surface_handle_focus(key, EventKind::FocusLeave, event);
                }),
            )
            .map(|l| (ObjectRef::View(view), l)),
        );

        self.shell_mut().unwrap().surfaces[key].listeners = listeners;
        key
    }

    fn shell_surface_handle_surface_destroy(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        if shsurf.kind == ShellSurfaceType::Popup {
            self.shell_surface_end_popup_grab(key);
        }

        let shell = self.shell_mut().unwrap();
        let shsurf = &mut shell.surfaces[key];
        let listeners = std::mem::take(&mut shsurf.listeners);
        let children = std::mem::take(&mut shsurf.children);
        let view = shsurf.view;

        for (object, listener) in listeners {
            self.remove_listener(object, listener);
        }

        for child in children {
            self.shell_surface_set_parent(child, None);
        }

        self.destroy_view(view);

        if let Some(shell) = self.shell_mut() {
            if let Some(shsurf) = shell.surfaces.remove(key) {
                if let Some(parent) = shsurf.parent {
                    if let Some(parent_key) = shell
                        .surfaces
                        .iter()
                        .find(|(_, s)| s.surface == parent)
                        .map(|(k, _)| k)
                    {
                        shell.surfaces[parent_key].children.retain(|c| *c != key);
                    }
                }
            }
        }
    }

    /// Runs on every commit of the decorated surface: adopts acked window
    /// geometry, maps the surface once its configure is acked, and anchors
    /// interactive resizes at the correct edge.
    pub(crate) fn shell_surface_handle_commit(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) else {
            return;
        };

        if let Some(next) = shsurf.next_geometry.take() {
            shsurf.geometry = next;
        }

        let should_map =
            !shsurf.mapped && shsurf.ack_configure && shsurf.next_kind != ShellSurfaceType::None;

        if should_map {
            let next = shsurf.next_kind;
            shsurf.mapped = true;
            shsurf.kind = next;
            shsurf.next_kind = ShellSurfaceType::None;

            self.shell_surface_map(key, next);
        }

        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };
        let view = shsurf.view;
        let (vw, vh) = self.views[view].size();
        let (lw, lh) = shsurf.last_size;
        let edges = shsurf.resize.edges;

        let (sx, sy) = (vw - lw, vh - lh);
        if sx != 0 || sy != 0 {
            let (mut vx, mut vy) = self.views[view].position();

            if edges & RESIZE_EDGE_LEFT != 0 {
                vx -= sx as f64;
            }
            if edges & RESIZE_EDGE_TOP != 0 {
                vy -= sy as f64;
            }

            self.view_set_position(view, vx, vy);

            if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
                shsurf.last_size = (vw, vh);
            }
        }
    }

    fn shell_surface_handle_focus(
        &mut self,
        key: ShellSurfaceKey,
        kind: EventKind,
        event: &crate::object::Event,
    ) {
        match event.info.object() {
            Some(ObjectRef::Pointer(_)) => {
                // A pointer entering the window doubles as a liveness probe.
                if kind == EventKind::FocusEnter {
                    self.shell_surface_ping(key);
                }
            }
            Some(ObjectRef::Keyboard(_)) => {
                let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) else {
                    return;
                };

                shsurf.has_keyboard_focus = kind == EventKind::FocusEnter;

                // Advertise the activation change.
                self.shell_surface_send_configure(key, 0, 0);
            }
            _ => (),
        }
    }

    // ---- Configure/ack.

    /// Sends a configure appropriate to the wire role. For xdg surfaces a
    /// fresh serial gates mapping until the client acks; wl_shell has no
    /// ack, so the gate opens immediately.
    pub(crate) fn shell_surface_send_configure(&mut self, key: ShellSurfaceKey, w: i32, h: i32) {
        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.last_configure = Some((w, h));
        }

        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        match shsurf.resource.as_ref() {
            Some(ShellSurfaceResource::WlShell(resource)) => {
                resource.configure(wl_shell_surface::Resize::empty(), w, h);
                if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
                    shsurf.ack_configure = true;
                }
            }
            Some(ShellSurfaceResource::XdgToplevel {
                xdg_surface,
                toplevel,
            }) => {
                let mut states: Vec<xdg_toplevel::State> = Vec::new();
                match shsurf.next_kind {
                    ShellSurfaceType::Maximized => states.push(xdg_toplevel::State::Maximized),
                    ShellSurfaceType::Fullscreen => states.push(xdg_toplevel::State::Fullscreen),
                    _ => (),
                }
                if shsurf.resize.resizing {
                    states.push(xdg_toplevel::State::Resizing);
                }
                if shsurf.has_keyboard_focus {
                    states.push(xdg_toplevel::State::Activated);
                }

                let raw_states: Vec<u8> = states
                    .into_iter()
                    .flat_map(|st| {
                        let v: u32 = st.into();
                        v.to_ne_bytes()
                    })
                    .collect();

                let toplevel = toplevel.clone();
                let xdg_surface = xdg_surface.clone();
                let serial = self.serial.next();

                toplevel.configure(w, h, raw_states);
                xdg_surface.configure(serial);

                if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
                    shsurf.ack_configure = false;
                }
            }
            Some(ShellSurfaceResource::XdgPopup { xdg_surface, popup }) => {
                let (x, y) = (shsurf.popup.x as i32, shsurf.popup.y as i32);
                let popup = popup.clone();
                let xdg_surface = xdg_surface.clone();
                let serial = self.serial.next();

                popup.configure(x, y, w, h);
                xdg_surface.configure(serial);

                if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
                    shsurf.ack_configure = false;
                }
            }
            None => (),
        }
    }

    pub(crate) fn shell_surface_ack_configure(&mut self, key: ShellSurfaceKey, _serial: u32) {
        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.ack_configure = true;
        }
    }

    pub(crate) fn shell_surface_set_geometry(
        &mut self,
        key: ShellSurfaceKey,
        x: f64,
        y: f64,
        w: i32,
        h: i32,
    ) {
        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.next_geometry = Some((x, y, w, h));
        }
    }

    pub(crate) fn shell_surface_set_title(&mut self, key: ShellSurfaceKey, title: &str) {
        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.title = Some(title.to_owned());
        }
    }

    pub(crate) fn shell_surface_set_class(&mut self, key: ShellSurfaceKey, class: &str) {
        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.class = Some(class.to_owned());
        }
    }

    /// Links the shell surface under a parent surface, so that transforms
    /// may inherit and transient/popup hierarchies tear down together.
    pub(crate) fn shell_surface_set_parent(
        &mut self,
        key: ShellSurfaceKey,
        parent: Option<SurfaceKey>,
    ) {
        let Some(shell) = self.shell_mut() else {
            return;
        };
        let Some(shsurf) = shell.surfaces.get_mut(key) else {
            return;
        };

        let old_parent = shsurf.parent.take();
        shsurf.parent = parent;
        let view = shsurf.view;

        if let Some(old) = old_parent {
            if let Some((parent_key, _)) = shell.surfaces.iter().find(|(_, s)| s.surface == old) {
                shell.surfaces[parent_key].children.retain(|c| *c != key);
            }
        }

        let parent_view = parent.and_then(|p| {
            let shell = self.shell_mut()?;
            let (parent_key, parent_view) = shell
                .surfaces
                .iter()
                .find(|(_, s)| s.surface == p)
                .map(|(k, s)| (k, s.view))?;
            shell.surfaces[parent_key].children.push(key);
            Some(parent_view)
        });

        self.view_set_parent(view, parent_view);
    }

    // ---- Type transitions.

    fn shell_surface_set_type(&mut self, key: ShellSurfaceKey, kind: ShellSurfaceType) {
        let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) else {
            return;
        };

        if shsurf.kind == kind || shsurf.next_kind == kind {
            return;
        }

        shsurf.next_kind = kind;
        shsurf.mapped = false;
    }

    pub(crate) fn shell_surface_set_toplevel(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        let kind = shsurf.kind;
        let saved = shsurf.saved;
        let fullscreen = shsurf.fullscreen;

        // Leaving driver fullscreen restores the previously chosen mode.
        if kind == ShellSurfaceType::Fullscreen && fullscreen.method == FullscreenMethod::Driver {
            if let (Some(output), Some(mode)) = (fullscreen.output, saved.mode) {
                self.switch_output_mode(output, mode.w, mode.h, mode.refresh);
            }
        }

        if matches!(
            kind,
            ShellSurfaceType::Fullscreen | ShellSurfaceType::Maximized | ShellSurfaceType::Minimized
        ) {
            self.shell_surface_send_configure(key, saved.w, saved.h);
        }

        self.shell_surface_set_parent(key, None);
        self.shell_surface_set_type(key, ShellSurfaceType::Toplevel);
    }

    pub(crate) fn shell_surface_set_transient(
        &mut self,
        key: ShellSurfaceKey,
        parent: SurfaceKey,
        x: f64,
        y: f64,
    ) {
        self.shell_surface_set_parent(key, Some(parent));

        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.transient_offset = (x, y);
        }

        self.shell_surface_set_type(key, ShellSurfaceType::Transient);
    }

    pub(crate) fn shell_surface_set_popup(
        &mut self,
        key: ShellSurfaceKey,
        seat: Option<SeatKey>,
        parent: SurfaceKey,
        x: f64,
        y: f64,
        serial: u32,
    ) {
        self.shell_surface_set_parent(key, Some(parent));

        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.popup = PopupState {
                x,
                y,
                seat,
                serial,
            };
        }

        self.shell_surface_set_type(key, ShellSurfaceType::Popup);
    }

    pub(crate) fn shell_surface_set_maximized(
        &mut self,
        key: ShellSurfaceKey,
        output: Option<OutputId>,
    ) {
        self.shell_surface_set_parent(key, None);

        let output = output.or_else(|| self.shell_surface_pick_output(key));
        self.shell_surface_save_geometry(key);

        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.maximized_output = output;
        }

        self.shell_surface_set_type(key, ShellSurfaceType::Maximized);

        let area = output
            .map(|o| self.shell_output_workarea(o))
            .unwrap_or_default();
        self.shell_surface_send_configure(key, area.width(), area.height());
    }

    pub(crate) fn shell_surface_unset_maximized(&mut self, key: ShellSurfaceKey) {
        self.shell_surface_set_toplevel(key);
    }

    pub(crate) fn shell_surface_set_fullscreen(
        &mut self,
        key: ShellSurfaceKey,
        output: Option<OutputId>,
        method: FullscreenMethod,
        framerate: u32,
    ) {
        self.shell_surface_set_parent(key, None);

        let output = output.or_else(|| self.shell_surface_pick_output(key));
        self.shell_surface_save_geometry(key);

        let current_mode = output
            .and_then(|o| self.output(o))
            .map(|o| *o.current_mode());

        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.fullscreen = FullscreenState {
                method,
                framerate,
                output,
            };
            shsurf.saved.mode = current_mode;
        }

        self.shell_surface_set_type(key, ShellSurfaceType::Fullscreen);

        // The driver method switches the mode up front, so the configure
        // already names the post-switch size.
        if method == FullscreenMethod::Driver {
            if let Some(output) = output {
                let shsurf = &self.shell_ref().unwrap().surfaces[key];
                let view = shsurf.view;
                let buffer_scale = self
                    .surfaces
                    .get(shsurf.surface)
                    .map(|s| s.buffer_scale())
                    .unwrap_or(1);
                let (vw, vh) = self.views[view].size();

                self.switch_output_mode(
                    output,
                    vw.max(1) * buffer_scale,
                    vh.max(1) * buffer_scale,
                    framerate as i32,
                );
            }
        }

        let geom = output
            .and_then(|o| self.output(o))
            .map(|o| (o.geometry().w, o.geometry().h))
            .unwrap_or((0, 0));
        self.shell_surface_send_configure(key, geom.0, geom.1);
    }

    pub(crate) fn shell_surface_unset_fullscreen(&mut self, key: ShellSurfaceKey) {
        self.shell_surface_set_toplevel(key);
    }

    pub(crate) fn shell_surface_set_minimized(&mut self, key: ShellSurfaceKey) {
        self.shell_surface_set_type(key, ShellSurfaceType::Minimized);
    }

    fn shell_surface_save_geometry(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        let view = shsurf.view;
        let (x, y) = self.views[view].position();
        let (gw, gh) = (shsurf.geometry.2, shsurf.geometry.3);
        let (w, h) = if gw > 0 && gh > 0 {
            (gw, gh)
        } else {
            self.views[view].size()
        };

        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.saved.x = x;
            shsurf.saved.y = y;
            shsurf.saved.w = w;
            shsurf.saved.h = h;
        }
    }

    /// The output the window management policy targets when the client did
    /// not name one: the output under the view, or the first one.
    fn shell_surface_pick_output(&mut self, key: ShellSurfaceKey) -> Option<OutputId> {
        let view = self.shell_ref()?.surfaces.get(key)?.view;
        let (x, y) = self.views.get(view)?.position();

        let mut fallback = None;
        for id in self.output_ids() {
            let rect = self.output(id)?.geometry_rect();
            if fallback.is_none() {
                fallback = Some(id);
            }
            if rect.contains_point(x as i32, y as i32) {
                return Some(id);
            }
        }

        fallback
    }

    // ---- Mapping.

    fn shell_surface_map(&mut self, key: ShellSurfaceKey, kind: ShellSurfaceType) {
        match kind {
            ShellSurfaceType::None => (),
            ShellSurfaceType::Toplevel => self.shell_surface_map_toplevel(key),
            ShellSurfaceType::Transient => self.shell_surface_map_transient(key),
            ShellSurfaceType::Popup => self.shell_surface_map_popup(key),
            ShellSurfaceType::Maximized => self.shell_surface_map_maximized(key),
            ShellSurfaceType::Fullscreen => self.shell_surface_map_fullscreen(key),
            ShellSurfaceType::Minimized => self.shell_surface_map_minimized(key),
        }
    }

    fn shell_surface_map_toplevel(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        let view = shsurf.view;
        let came_from = shsurf.kind;
        let saved = shsurf.saved;

        if matches!(
            came_from,
            ShellSurfaceType::Fullscreen | ShellSurfaceType::Maximized | ShellSurfaceType::Minimized
        ) {
            self.view_set_position(view, saved.x, saved.y);
            self.view_set_transform(view, Matrix::identity());
        } else {
            self.shell_surface_set_initial_position(key);

            // A fresh toplevel takes keyboard focus on every seat.
            for seat in self.seat_keys() {
                if self.keyboard(seat).is_some() {
                    self.shell_move_keyboard_focus(seat, Some(view));
                }
            }
        }

        self.view_map(view);
    }

    fn shell_surface_map_transient(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };
        let view = shsurf.view;
        let offset = shsurf.transient_offset;

        let parent_view = self.views.get(view).and_then(|v| v.parent());
        let (px, py) = parent_view
            .map(|p| self.views[p].position())
            .unwrap_or((0.0, 0.0));

        self.view_set_position(view, px + offset.0, py + offset.1);
        self.view_map(view);
    }

    fn shell_surface_map_popup(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };
        let view = shsurf.view;
        let popup = shsurf.popup;

        // Inherit first: the position that follows is parent-relative.
        self.view_set_transform_inherit(view, true);
        self.view_set_position(view, popup.x, popup.y);
        self.view_map(view);
        self.view_stack_top(view, true);

        self.shell_surface_add_popup_grab(key);
    }

    fn shell_surface_map_maximized(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };
        let view = shsurf.view;
        let output = shsurf.maximized_output;

        let area = output
            .map(|o| self.shell_output_workarea(o))
            .unwrap_or_default();

        self.view_set_position(view, area.x1 as f64, area.y1 as f64);
        self.view_map(view);
        self.view_stack_top(view, true);
    }

    fn shell_surface_map_minimized(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        self.view_unmap(shsurf.view);
    }

    fn shell_surface_map_fullscreen(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        let view = shsurf.view;
        let fullscreen = shsurf.fullscreen;
        let Some(output) = fullscreen.output else {
            self.view_map(view);
            return;
        };

        let (vw, vh) = {
            let (w, h) = self.views[view].size();
            (w.max(1), h.max(1))
        };

        let scale = match fullscreen.method {
            FullscreenMethod::Scale => {
                let geom = self.output(output).unwrap().geometry();
                let output_aspect = geom.w as f64 / geom.h as f64;
                let view_aspect = vw as f64 / vh as f64;

                if output_aspect < view_aspect {
                    geom.w as f64 / vw as f64
                } else {
                    geom.h as f64 / vh as f64
                }
            }
            FullscreenMethod::Driver => {
                let buffer_scale = self
                    .surfaces
                    .get(self.shell_ref().unwrap().surfaces[key].surface)
                    .map(|s| s.buffer_scale())
                    .unwrap_or(1);

                self.switch_output_mode(
                    output,
                    vw * buffer_scale,
                    vh * buffer_scale,
                    fullscreen.framerate as i32,
                );

                1.0
            }
            FullscreenMethod::Default | FullscreenMethod::Fill => 1.0,
        };

        if scale != 1.0 {
            self.view_set_transform(view, Matrix::scale(scale, scale));
        }

        // Center on the (possibly just switched) output.
        let geom = self.output(output).unwrap().geometry();
        let x = geom.x as f64 + (geom.w as f64 - vw as f64 * scale) / 2.0;
        let y = geom.y as f64 + (geom.h as f64 - vh as f64 * scale) / 2.0;

        self.view_set_position(view, x, y);
        self.view_map(view);
        self.view_stack_top(view, true);
    }

    /// Picks the smallest mode at least as large as the requested size and
    /// switches to it.
    fn switch_output_mode(&mut self, output: OutputId, w: i32, h: i32, refresh: i32) {
        let mut best: Option<OutputMode> = None;

        for index in 0..self.output_mode_count(output) {
            let Some(mode) = self.output_mode(output, index) else {
                continue;
            };
            if mode.flags & MODE_CURRENT != 0 && mode.w == w && mode.h == h {
                return;
            }

            if mode.w >= w && mode.h >= h {
                match best {
                    Some(b) if b.w <= mode.w && b.h <= mode.h => (),
                    _ => best = Some(mode),
                }
            }
        }

        if let Some(mut mode) = best {
            if refresh > 0 {
                mode.refresh = refresh;
            }
            if !self.output_set_mode(output, &mode) {
                warn!(?mode, "output rejected mode switch");
            }
        }
    }

    /// Places a fresh toplevel near the pointer, clamped inside the
    /// pointer's output.
    fn shell_surface_set_initial_position(&mut self, key: ShellSurfaceKey) {
        let Some(view) = self.shell_ref().and_then(|s| s.surfaces.get(key)).map(|s| s.view)
        else {
            return;
        };

        let pointer_pos = self
            .seat_keys()
            .into_iter()
            .find_map(|seat| self.pointer(seat).map(|p| p.position()));

        let Some((px, py)) = pointer_pos else {
            self.view_set_position(view, 0.0, 0.0);
            return;
        };

        let output_rect = self
            .output_ids()
            .into_iter()
            .map(|id| self.output(id).unwrap().geometry_rect())
            .find(|rect| rect.contains_point(px as i32, py as i32))
            .or_else(|| {
                self.output_ids()
                    .first()
                    .map(|id| self.output(*id).unwrap().geometry_rect())
            });

        let (vw, vh) = self.views[view].size();
        let (mut x, mut y) = (px, py);

        if let Some(rect) = output_rect {
            if px <= rect.x1 as f64 {
                x = rect.x1 as f64;
            } else if px + vw as f64 > rect.x2 as f64 {
                x = (rect.x2 - vw) as f64;
            }

            if py <= rect.y1 as f64 {
                y = rect.y1 as f64;
            } else if py + vh as f64 > rect.y2 as f64 {
                y = (rect.y2 - vh) as f64;
            }
        }

        self.view_set_position(view, x, y);
    }

    /// Moves keyboard focus with the wire leave/enter pair.
    pub(crate) fn shell_move_keyboard_focus(&mut self, seat: SeatKey, view: Option<ViewKey>) {
        let old = self.keyboard_focus(seat);
        if old == view {
            return;
        }

        if let Some(old) = old {
            self.keyboard_send_leave(seat, old);
        }
        self.keyboard_set_focus(seat, view);
        if let Some(view) = view {
            self.keyboard_send_enter(seat, view);
        }
    }

    // ---- Interactive move and resize.

    /// Starts an interactive move driven by the seat's pointer. Suppressed
    /// for fullscreen, maximized, and minimized surfaces.
    pub(crate) fn shell_surface_move(&mut self, key: ShellSurfaceKey, seat: SeatKey, _serial: u32) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        if shsurf.is_immobile() {
            return;
        }

        let view = shsurf.view;
        let Some(pointer) = self.pointer(seat) else {
            return;
        };

        let (px, py) = pointer.position();
        let (vx, vy) = self.views[view].position();

        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.move_offset = (vx - px, vy - py);
        }

        debug!(dx = vx - px, dy = vy - py, "starting interactive move");
        self.pointer_push_grab(seat, std::rc::Rc::new(grabs::MoveGrab { shsurf: key }));
    }

    /// Starts an interactive resize anchored at the given edge mask.
    pub(crate) fn shell_surface_resize(
        &mut self,
        key: ShellSurfaceKey,
        seat: SeatKey,
        _serial: u32,
        edges: u32,
    ) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        if shsurf.is_immobile() {
            return;
        }

        let view = shsurf.view;
        let is_xdg = matches!(
            shsurf.resource,
            Some(ShellSurfaceResource::XdgToplevel { .. })
        );

        let Some(pointer) = self.pointer(seat) else {
            return;
        };
        let (px, py) = pointer.position();

        let (gw, gh) = {
            let shsurf = &self.shell_ref().unwrap().surfaces[key];
            if shsurf.geometry.2 > 0 && shsurf.geometry.3 > 0 {
                (shsurf.geometry.2, shsurf.geometry.3)
            } else {
                self.views[view].size()
            }
        };

        let view_size = self.views[view].size();
        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.resize = ResizeState {
                px,
                py,
                vw: gw,
                vh: gh,
                edges,
                resizing: true,
            };
            shsurf.last_size = view_size;
        }

        if is_xdg {
            // Advertise the resizing state right away.
            self.shell_surface_send_configure(key, 0, 0);
        }

        debug!(edges, "starting interactive resize");
        self.pointer_push_grab(seat, std::rc::Rc::new(grabs::ResizeGrab { shsurf: key }));
    }

    // ---- Popup grabs.

    fn shell_surface_add_popup_grab(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        let Some(seat) = shsurf.popup.seat else {
            // No pointer-bearing seat was given; the popup cannot grab.
            self.shell_surface_send_popup_done(key);
            return;
        };

        if self.pointer(seat).is_none() {
            self.shell_surface_send_popup_done(key);
            return;
        }

        let grab: std::rc::Rc<dyn crate::pointer::PointerGrab> =
            std::rc::Rc::new(grabs::PopupGrab {
                shsurf: key,
                button_up: std::cell::Cell::new(false),
            });

        if let Some(shsurf) = self.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
            shsurf.popup_grab = Some(std::rc::Rc::downgrade(&grab));
        }

        self.pointer_push_grab(seat, grab);
    }

    /// Ends a popup grab: restores the previous pointer grab and tells the
    /// client the popup is done.
    pub(crate) fn shell_surface_end_popup_grab(&mut self, key: ShellSurfaceKey) {
        let seat = self
            .shell_ref()
            .and_then(|s| s.surfaces.get(key))
            .and_then(|s| s.popup.seat);

        let ours = self
            .shell_mut()
            .and_then(|s| s.surfaces.get_mut(key))
            .and_then(|s| s.popup_grab.take())
            .and_then(|weak| weak.upgrade());

        if let (Some(seat), Some(ours)) = (seat, ours) {
            let on_top = self
                .pointer_top_grab(seat)
                .map(|top| std::rc::Rc::ptr_eq(&top, &ours))
                .unwrap_or(false);

            if on_top {
                self.pointer_pop_grab(seat);
            }
        }

        self.shell_surface_send_popup_done(key);
    }

    fn shell_surface_send_popup_done(&mut self, key: ShellSurfaceKey) {
        let Some(shsurf) = self.shell_ref().and_then(|s| s.surfaces.get(key)) else {
            return;
        };

        match shsurf.resource.as_ref() {
            Some(ShellSurfaceResource::XdgPopup { popup, .. }) => popup.popup_done(),
            Some(ShellSurfaceResource::WlShell(resource))
                if shsurf.kind == ShellSurfaceType::Popup =>
            {
                resource.popup_done()
            }
            _ => (),
        }
    }

    /// Raises a shell surface (and its subtree) to the front.
    pub fn shell_surface_stack_top(&mut self, key: ShellSurfaceKey, subtree: bool) {
        if let Some(view) = self.shell_ref().and_then(|s| s.surfaces.get(key)).map(|s| s.view) {
            self.view_stack_top(view, subtree);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use crate::input::{ButtonState, DeviceEvent, CAP_POINTER};
    use crate::output::{OutputMode, MODE_CURRENT};
    use crate::shell::desktop_shell_init;
    use pretty_assertions::assert_eq;

    const BTN_LEFT: u32 = 0x110;

    struct Shelled {
        seat: crate::seat::SeatKey,
        device: crate::input::DeviceKey,
    }

    fn shell_fixture(state: &mut State) -> Shelled {
        desktop_shell_init(state);
        let device = state.create_input_device(CAP_POINTER, None);
        let seat = state.find_seat("seat0").unwrap();
        Shelled { seat, device }
    }

    fn make_toplevel(state: &mut State, w: i32, h: i32) -> (SurfaceKey, ShellSurfaceKey, ViewKey) {
        let surface = state.create_surface(None);
        state.surface_set_role(surface, "xdg_toplevel");
        let key = state.create_shell_surface(None, surface);
        state.shell_surface_set_toplevel(key);

        let buffer = test_buffer_with_size(state, w, h);
        state.surface_attach(surface, Some(buffer), 0, 0);
        state.commit_surface(surface);

        let view = state.shell_ref().unwrap().surfaces[key].view();
        (surface, key, view)
    }

    fn move_pointer(state: &mut State, device: crate::input::DeviceKey, x: f64, y: f64) {
        state.post_device_event(device, DeviceEvent::PointerMotionAbsolute { time: 0, x, y });
    }

    fn click(state: &mut State, device: crate::input::DeviceKey, value: ButtonState) {
        state.post_device_event(
            device,
            DeviceEvent::PointerButton {
                time: 0,
                button: BTN_LEFT,
                state: value,
            },
        );
    }

    #[test]
    fn toplevel_maps_after_ack_and_commit() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let _io = shell_fixture(state);
        add_test_output(state, "shell-0", 1920, 1080);

        let (_, key, view) = make_toplevel(state, 400, 300);

        let shsurf = &state.shell_ref().unwrap().surfaces[key];
        assert_eq!(shsurf.kind(), ShellSurfaceType::Toplevel);
        assert!(shsurf.mapped);
        assert!(state.views[view].is_mapped());
        assert_eq!(state.views[view].size(), (400, 300));
    }

    #[test]
    fn interactive_move_preserves_pointer_offset() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let io = shell_fixture(state);
        add_test_output(state, "shell-0", 1920, 1080);

        let (_, key, view) = make_toplevel(state, 400, 300);
        state.view_set_position(view, 100.0, 100.0);
        move_pointer(state, io.device, 200.0, 200.0);

        state.shell_surface_move(key, io.seat, 0);
        let dx0 = state.views[view].position().0 - state.pointer(io.seat).unwrap().position().0;

        for (px, py) in [(250.0, 260.0), (90.0, 400.0), (700.0, 10.0)] {
            move_pointer(state, io.device, px, py);
            let (vx, vy) = state.views[view].position();
            assert_eq!(vx - px, dx0);
            assert_eq!(vy - py, -100.0);
        }

        // Releasing the button pops the grab; motion stops following.
        click(state, io.device, ButtonState::Pressed);
        click(state, io.device, ButtonState::Released);
        let before = state.views[view].position();
        move_pointer(state, io.device, 500.0, 500.0);
        assert_eq!(state.views[view].position(), before);
    }

    #[test]
    fn interactive_resize_from_bottom_right() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let io = shell_fixture(state);
        add_test_output(state, "shell-0", 1920, 1080);

        let (surface, key, view) = make_toplevel(state, 400, 300);
        state.view_set_position(view, 100.0, 100.0);
        move_pointer(state, io.device, 520.0, 420.0);

        state.shell_surface_resize(
            key,
            io.seat,
            0,
            RESIZE_EDGE_BOTTOM | RESIZE_EDGE_RIGHT,
        );
        assert!(state.shell_ref().unwrap().surfaces[key].resize.resizing);

        move_pointer(state, io.device, 570.0, 440.0);
        assert_eq!(
            state.shell_ref().unwrap().surfaces[key].last_configure,
            Some((450, 320))
        );

        // The client commits a buffer of the proposed size.
        let buffer = test_buffer_with_size(state, 450, 320);
        state.surface_attach(surface, Some(buffer), 0, 0);
        state.commit_surface(surface);

        assert_eq!(state.views[view].position(), (100.0, 100.0));
        assert_eq!(
            state.shell_ref().unwrap().surfaces[key].last_size,
            (450, 320)
        );

        click(state, io.device, ButtonState::Pressed);
        click(state, io.device, ButtonState::Released);
        assert!(!state.shell_ref().unwrap().surfaces[key].resize.resizing);
    }

    #[test]
    fn interactive_resize_anchors_left_edge() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let io = shell_fixture(state);
        add_test_output(state, "shell-0", 1920, 1080);

        let (surface, key, view) = make_toplevel(state, 400, 300);
        state.view_set_position(view, 100.0, 100.0);
        move_pointer(state, io.device, 100.0, 200.0);

        state.shell_surface_resize(key, io.seat, 0, RESIZE_EDGE_LEFT);

        // Dragging left grows the window; the right edge stays put.
        move_pointer(state, io.device, 60.0, 200.0);
        assert_eq!(
            state.shell_ref().unwrap().surfaces[key].last_configure,
            Some((440, 300))
        );

        let buffer = test_buffer_with_size(state, 440, 300);
        state.surface_attach(surface, Some(buffer), 0, 0);
        state.commit_surface(surface);

        assert_eq!(state.views[view].position(), (60.0, 100.0));
        assert_eq!(state.views[view].size(), (440, 300));
    }

    #[test]
    fn popup_grab_breaks_on_outside_click() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let io = shell_fixture(state);
        add_test_output(state, "shell-0", 1920, 1080);

        let (t_surface, _t_key, t_view) = make_toplevel(state, 400, 300);
        state.view_set_position(t_view, 0.0, 0.0);
        state.view_update(t_view);

        // A popup at (50, 50) relative to the toplevel.
        let p_surface = state.create_surface(None);
        state.surface_set_role(p_surface, "xdg_popup");
        let p_key = state.create_shell_surface(None, p_surface);
        state.shell_surface_set_popup(p_key, Some(io.seat), t_surface, 50.0, 50.0, 1234);

        let buffer = test_buffer_with_size(state, 100, 100);
        state.surface_attach(p_surface, Some(buffer), 0, 0);
        state.commit_surface(p_surface);

        // Default grab plus the popup grab.
        assert_eq!(state.pointer(io.seat).unwrap().grabs.len(), 2);

        // Moving inside the toplevel keeps the grab.
        move_pointer(state, io.device, 200.0, 200.0);
        assert_eq!(state.pointer(io.seat).unwrap().grabs.len(), 2);

        // Click-release inside, then a click outside every surface breaks
        // the grab.
        click(state, io.device, ButtonState::Pressed);
        click(state, io.device, ButtonState::Released);
        move_pointer(state, io.device, 1500.0, 900.0);
        click(state, io.device, ButtonState::Pressed);

        assert_eq!(state.pointer(io.seat).unwrap().grabs.len(), 1);
        assert!(state.shell_ref().unwrap().surfaces[p_key].popup_grab.is_none());
    }

    #[test]
    fn maximize_fills_workarea() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let _io = shell_fixture(state);
        let output = add_test_output(state, "shell-0", 1920, 1080);

        state.shell_set_panel_exclusion(
            output,
            crate::shell::ExclusionInsets {
                top: 24,
                ..Default::default()
            },
        );

        let (surface, key, view) = make_toplevel(state, 400, 300);
        state.view_set_position(view, 200.0, 200.0);

        state.shell_surface_set_maximized(key, Some(output));
        assert_eq!(
            state.shell_ref().unwrap().surfaces[key].last_configure,
            Some((1920, 1056))
        );

        let buffer = test_buffer_with_size(state, 1920, 1056);
        state.surface_attach(surface, Some(buffer), 0, 0);
        state.commit_surface(surface);

        let workarea = state.shell_output_workarea(output);
        assert_eq!(
            state.views[view].position(),
            (workarea.x1 as f64, workarea.y1 as f64)
        );
        assert_eq!(
            state.views[view].size(),
            (workarea.width(), workarea.height())
        );
        assert_eq!(
            state.shell_ref().unwrap().surfaces[key].kind(),
            ShellSurfaceType::Maximized
        );

        // Unmaximize proposes the saved geometry again.
        state.shell_surface_unset_maximized(key);
        assert_eq!(
            state.shell_ref().unwrap().surfaces[key].last_configure,
            Some((400, 300))
        );
    }

    #[test]
    fn fullscreen_driver_picks_smallest_fitting_mode() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let _io = shell_fixture(state);

        let (output, log) = stub_output(
            state,
            "shell-0",
            vec![
                OutputMode {
                    w: 800,
                    h: 600,
                    refresh: 60_000,
                    flags: 0,
                },
                OutputMode {
                    w: 1024,
                    h: 768,
                    refresh: 60_000,
                    flags: 0,
                },
                OutputMode {
                    w: 1920,
                    h: 1080,
                    refresh: 60_000,
                    flags: MODE_CURRENT,
                },
            ],
        );

        let (surface, key, view) = make_toplevel(state, 1000, 750);

        state.shell_surface_set_fullscreen(
            key,
            Some(output),
            FullscreenMethod::Driver,
            0,
        );

        // The smallest mode that fits 1000x750 is 1024x768.
        {
            let log = log.borrow();
            let switched = log.set_modes.last().unwrap();
            assert_eq!((switched.w, switched.h), (1024, 768));
        }
        assert_eq!(
            state.shell_ref().unwrap().surfaces[key].last_configure,
            Some((1024, 768))
        );

        // Committing maps fullscreen, centered on the new mode.
        state.commit_surface(surface);
        assert_eq!(state.views[view].position(), (12.0, 9.0));

        // Back to toplevel restores the original mode.
        state.shell_surface_set_toplevel(key);
        let log = log.borrow();
        let restored = log.set_modes.last().unwrap();
        assert_eq!((restored.w, restored.h), (1920, 1080));
    }

    #[test]
    fn focus_enter_fires_once_per_focus_change() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let io = shell_fixture(state);
        add_test_output(state, "shell-0", 1920, 1080);

        let (_, _, view) = make_toplevel(state, 400, 300);

        let enters = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let leaves = std::rc::Rc::new(std::cell::Cell::new(0u32));

        let e = enters.clone();
        state.add_listener(
            ObjectRef::View(view),
            EventKind::FocusEnter,
            0,
            std::rc::Rc::new(move |_, _, _| e.set(e.get() + 1)),
        );
        let l = leaves.clone();
        state.add_listener(
            ObjectRef::View(view),
            EventKind::FocusLeave,
            0,
            std::rc::Rc::new(move |_, _, _| l.set(l.get() + 1)),
        );

        state.pointer_set_focus(io.seat, Some(view));
        state.pointer_set_focus(io.seat, Some(view));
        assert_eq!(enters.get(), 1);

        state.pointer_set_focus(io.seat, None);
        assert_eq!(leaves.get(), 1);
        assert_eq!(state.pointer_focus(io.seat), None);
    }

    #[test]
    fn focus_view_destruction_cancels_grabs() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let io = shell_fixture(state);
        add_test_output(state, "shell-0", 1920, 1080);

        let (_, key, view) = make_toplevel(state, 400, 300);
        state.view_update(view);
        move_pointer(state, io.device, 50.0, 50.0);
        assert_eq!(state.pointer_focus(io.seat), Some(view));

        state.shell_surface_move(key, io.seat, 0);
        assert_eq!(state.pointer(io.seat).unwrap().grabs.len(), 2);

        state.destroy_view(view);

        assert_eq!(state.pointer_focus(io.seat), None);
        assert_eq!(state.pointer(io.seat).unwrap().grabs.len(), 1);
    }
}
