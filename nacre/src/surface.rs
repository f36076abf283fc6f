// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Double-buffered client drawables.
//!
//! Client requests mutate a surface's pending state; `commit` promotes
//! pending to current atomically and schedules a repaint. A surface is not
//! visible by itself; views place it in the scene.

use std::mem;

use tracing::trace;
use wayland_server::{
    protocol::{wl_callback, wl_surface},
    Resource as _,
};

use crate::{
    buffer::BufferKey,
    compositor::State,
    object::{Event, EventKind, ListenerId, ObjectCore, ObjectRef},
    output::OutputId,
    region::{Rect, Region},
    subsurface::SubsurfaceKey,
    transform::Transform,
    view::{ViewKey, VIEW_CONTENT_DIRTY},
};

slotmap::new_key_type! { pub struct SurfaceKey; }

/// One half of the double-buffered surface state.
pub struct SurfaceState {
    pub buffer: Option<BufferKey>,
    pub offset: (i32, i32),
    pub newly_attached: bool,
    pub transform: Transform,
    pub scale: i32,
    pub damage: Region,
    pub opaque: Region,
    pub input: Region,
    pub frame_callbacks: Vec<wl_callback::WlCallback>,
    pub(crate) buffer_destroy_listener: Option<ListenerId>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            buffer: None,
            offset: (0, 0),
            newly_attached: false,
            transform: Transform::Normal,
            scale: 1,
            damage: Region::new(),
            opaque: Region::new(),
            input: Region::infinite(),
            frame_callbacks: Vec::new(),
            buffer_destroy_listener: None,
        }
    }
}

/// The committed buffer attachment of a surface.
#[derive(Default)]
pub(crate) struct BufferRef {
    pub buffer: Option<BufferKey>,
    pub offset: (i32, i32),
    pub transform: Transform,
    pub scale: i32,
    pub flushed: bool,
    pub destroy_listener: Option<ListenerId>,
    pub release_listener: Option<ListenerId>,
}

pub struct Surface {
    pub(crate) core: ObjectCore,
    pub(crate) resource: Option<wl_surface::WlSurface>,

    pub(crate) pending: SurfaceState,

    pub(crate) buffer: BufferRef,
    /// Surface size in surface-local space, derived from the buffer size
    /// under the committed transform and scale.
    pub(crate) size: (i32, i32),
    pub(crate) damage: Region,
    pub(crate) opaque: Region,
    pub(crate) input: Region,
    pub(crate) pickable: bool,
    pub(crate) frame_callbacks: Vec<wl_callback::WlCallback>,

    pub(crate) role: Option<String>,
    pub(crate) views: Vec<ViewKey>,
    pub(crate) subsurfaces: Vec<SubsurfaceKey>,
    pub(crate) subsurfaces_pending: Vec<SubsurfaceKey>,
    pub(crate) sub: Option<SubsurfaceKey>,
}

impl Surface {
    pub fn resource(&self) -> Option<&wl_surface::WlSurface> {
        self.resource.as_ref()
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn size(&self) -> (i32, i32) {
        self.size
    }

    pub fn buffer(&self) -> Option<BufferKey> {
        self.buffer.buffer
    }

    pub fn buffer_offset(&self) -> (i32, i32) {
        self.buffer.offset
    }

    pub fn buffer_transform(&self) -> Transform {
        self.buffer.transform
    }

    pub fn buffer_scale(&self) -> i32 {
        self.buffer.scale
    }

    pub fn damage_region(&self) -> &Region {
        &self.damage
    }

    pub fn opaque_region(&self) -> &Region {
        &self.opaque
    }

    pub fn input_region(&self) -> &Region {
        &self.input
    }

    pub fn views(&self) -> &[ViewKey] {
        &self.views
    }

    pub fn pending(&self) -> &SurfaceState {
        &self.pending
    }
}

impl State {
    pub fn create_surface(&mut self, resource: Option<wl_surface::WlSurface>) -> SurfaceKey {
        let key = self.surfaces.insert_with_key(|k| Surface {
            core: self.objects.register(ObjectRef::Surface(k)),
            resource,
            pending: SurfaceState::default(),
            buffer: BufferRef {
                scale: 1,
                ..Default::default()
            },
            size: (0, 0),
            damage: Region::new(),
            opaque: Region::new(),
            input: Region::infinite(),
            pickable: true,
            frame_callbacks: Vec::new(),
            role: None,
            views: Vec::new(),
            subsurfaces: Vec::new(),
            subsurfaces_pending: Vec::new(),
            sub: None,
        });

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::SurfaceAdd, ObjectRef::Surface(key)),
        );

        key
    }

    pub fn destroy_surface(&mut self, key: SurfaceKey) {
        if !self.surfaces.contains_key(key) {
            return;
        }

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::SurfaceRemove, ObjectRef::Surface(key)),
        );

        // Detach the pending buffer listener before tearing down the object.
        let pending_listener = {
            let surface = &mut self.surfaces[key];
            surface
                .pending
                .buffer
                .map(|b| (b, surface.pending.buffer_destroy_listener.take()))
        };
        if let Some((buffer, Some(listener))) = pending_listener {
            self.remove_listener(ObjectRef::Buffer(buffer), listener);
        }

        self.finish_object(ObjectRef::Surface(key));

        if let Some(sub) = self.surfaces[key].sub {
            self.teardown_subsurface(sub);
        }

        for view in self.surfaces[key].views.clone() {
            self.view_set_surface(view, None);
        }

        let current = {
            let surface = &mut self.surfaces[key];
            surface.buffer.buffer.take().map(|b| {
                (
                    b,
                    surface.buffer.destroy_listener.take(),
                    surface.buffer.release_listener.take(),
                    surface.buffer.flushed,
                )
            })
        };
        if let Some((buffer, destroy, release, flushed)) = current {
            if let Some(l) = destroy {
                self.remove_listener(ObjectRef::Buffer(buffer), l);
            }
            if let Some(l) = release {
                self.remove_listener(ObjectRef::Buffer(buffer), l);
            }
            if !flushed {
                self.buffer_unreference(buffer);
            }
        }

        let surface = self.surfaces.remove(key).unwrap();
        self.objects.release(surface.core.id());
    }

    /// Handles wl_surface.attach: stores the pending buffer and offset and
    /// watches it for destruction.
    pub fn surface_attach(&mut self, key: SurfaceKey, buffer: Option<BufferKey>, x: i32, y: i32) {
        let surface = &mut self.surfaces[key];
        let old = surface.pending.buffer;
        let old_listener = surface.pending.buffer_destroy_listener.take();

        surface.pending.buffer = buffer;
        surface.pending.offset = (x, y);
        surface.pending.newly_attached = true;

        if let (Some(old), Some(listener)) = (old, old_listener) {
            self.remove_listener(ObjectRef::Buffer(old), listener);
        }

        if let Some(buffer) = buffer {
            let listener = self.add_listener(
                ObjectRef::Buffer(buffer),
                EventKind::ObjectDestroy,
                0,
                std::rc::Rc::new(move |state: &mut State, _, _| {
                    if let Some(surface) = state.surfaces.get_mut(key) {
                        surface.pending.buffer = None;
                        surface.pending.buffer_destroy_listener = None;
                    }
                }),
            );
            self.surfaces[key].pending.buffer_destroy_listener = listener;
        }
    }

    pub fn surface_damage(&mut self, key: SurfaceKey, x: i32, y: i32, w: i32, h: i32) {
        self.surfaces[key]
            .pending
            .damage
            .union_rect(Rect::from_size(x, y, w, h));
    }

    pub fn surface_frame(&mut self, key: SurfaceKey, callback: wl_callback::WlCallback) {
        self.surfaces[key].pending.frame_callbacks.push(callback);
    }

    /// A `None` region resets opacity to nothing.
    pub fn surface_set_opaque_region(&mut self, key: SurfaceKey, region: Option<&Region>) {
        let surface = &mut self.surfaces[key];
        match region {
            Some(r) => surface.pending.opaque = r.clone(),
            None => surface.pending.opaque.clear(),
        }
    }

    /// A `None` region resets input to everywhere.
    pub fn surface_set_input_region(&mut self, key: SurfaceKey, region: Option<&Region>) {
        let surface = &mut self.surfaces[key];
        match region {
            Some(r) => surface.pending.input = r.clone(),
            None => surface.pending.input = Region::infinite(),
        }
    }

    pub fn surface_set_buffer_transform(&mut self, key: SurfaceKey, transform: Transform) {
        self.surfaces[key].pending.transform = transform;
    }

    pub fn surface_set_buffer_scale(&mut self, key: SurfaceKey, scale: i32) {
        debug_assert!(scale >= 1);
        self.surfaces[key].pending.scale = scale;
    }

    /// The role may be set once and never changes afterwards.
    pub fn surface_set_role(&mut self, key: SurfaceKey, role: &str) -> bool {
        let surface = &mut self.surfaces[key];
        if surface.role.is_some() {
            return false;
        }

        surface.role = Some(role.to_owned());
        true
    }

    /// Handles wl_surface.commit. A synchronized subsurface commits into its
    /// cache instead of promoting pending state.
    pub fn commit_surface(&mut self, key: SurfaceKey) {
        if let Some(sub) = self.surfaces[key].sub {
            if self.subsurface_effectively_synchronized(sub) {
                self.subsurface_commit_to_cache(sub);
                return;
            }
        }

        let mut state = mem::take(&mut self.surfaces[key].pending);
        self.commit_surface_state(key, &mut state);
        self.surfaces[key].pending = state;
    }

    /// Applies a source state (pending or a subsurface cache) to current.
    pub(crate) fn commit_surface_state(&mut self, key: SurfaceKey, state: &mut SurfaceState) {
        let attached = state.newly_attached;

        if state.newly_attached {
            let old = {
                let surface = &mut self.surfaces[key];
                surface.buffer.buffer.take().map(|b| {
                    (
                        b,
                        surface.buffer.destroy_listener.take(),
                        surface.buffer.release_listener.take(),
                        surface.buffer.flushed,
                    )
                })
            };

            if let Some((old, destroy, release, flushed)) = old {
                if let Some(l) = destroy {
                    self.remove_listener(ObjectRef::Buffer(old), l);
                }
                if let Some(l) = release {
                    self.remove_listener(ObjectRef::Buffer(old), l);
                }
                if !flushed {
                    self.buffer_unreference(old);
                }
            }

            if let Some(buffer) = state.buffer {
                if let Some(l) = state.buffer_destroy_listener.take() {
                    self.remove_listener(ObjectRef::Buffer(buffer), l);
                }

                self.buffer_reference(buffer);

                let release = self.add_listener(
                    ObjectRef::Buffer(buffer),
                    EventKind::BufferRelease,
                    0,
                    std::rc::Rc::new(move |state: &mut State, object, _| {
                        state.surface_handle_buffer_release(key, object);
                    }),
                );
                let destroy = self.add_listener(
                    ObjectRef::Buffer(buffer),
                    EventKind::ObjectDestroy,
                    0,
                    std::rc::Rc::new(move |state: &mut State, _, _| {
                        if let Some(surface) = state.surfaces.get_mut(key) {
                            surface.buffer.buffer = None;
                            surface.buffer.destroy_listener = None;
                            surface.buffer.release_listener = None;
                        }
                        state.surface_update_size(key);
                    }),
                );

                let surface = &mut self.surfaces[key];
                surface.buffer.release_listener = release;
                surface.buffer.destroy_listener = destroy;
            }

            {
                let surface = &mut self.surfaces[key];
                surface.buffer.buffer = state.buffer;
                surface.buffer.offset.0 += state.offset.0;
                surface.buffer.offset.1 += state.offset.1;
                surface.buffer.flushed = false;
            }

            state.newly_attached = false;
            state.buffer = None;
            state.offset = (0, 0);

            self.attach_surface_to_outputs(key);
        }

        {
            let surface = &mut self.surfaces[key];
            surface.buffer.transform = state.transform;
            surface.buffer.scale = state.scale;
        }
        self.surface_update_size(key);

        let surface = &mut self.surfaces[key];
        surface
            .frame_callbacks
            .append(&mut state.frame_callbacks);
        surface.damage = mem::take(&mut state.damage);
        surface.opaque = state.opaque.clone();
        surface.input = state.input.clone();

        trace!(surface = ?surface.core.id(), size = ?surface.size, "surface commit");

        for view in self.surfaces[key].views.clone() {
            let size = self.surfaces[key].size;
            self.view_resize(view, size.0, size.1);
            self.view_mark_dirty(view, VIEW_CONTENT_DIRTY);
        }

        // A commit with nothing to show triggers no repaint; the damage
        // flush path repaints exactly what changed.
        if attached || !self.surfaces[key].damage.is_empty() {
            self.schedule_repaint_all();
        }

        self.emit(ObjectRef::Surface(key), Event::new(EventKind::SurfaceCommit));
    }

    fn surface_handle_buffer_release(&mut self, key: SurfaceKey, buffer: ObjectRef) {
        let Some(surface) = self.surfaces.get_mut(key) else {
            return;
        };

        surface.buffer.buffer = None;
        let destroy = surface.buffer.destroy_listener.take();
        let release = surface.buffer.release_listener.take();

        if let Some(l) = destroy {
            self.remove_listener(buffer, l);
        }
        if let Some(l) = release {
            self.remove_listener(buffer, l);
        }
    }

    /// Recomputes the surface size from the buffer size under the committed
    /// transform and scale.
    pub(crate) fn surface_update_size(&mut self, key: SurfaceKey) {
        let buffer_size = self.surfaces[key]
            .buffer
            .buffer
            .and_then(|b| self.buffers.get(b))
            .and_then(|b| b.size);

        let surface = &mut self.surfaces[key];
        surface.size = match buffer_size {
            Some((w, h)) => {
                let (w, h) = if surface.buffer.transform.swaps_axes() {
                    (h, w)
                } else {
                    (w, h)
                };
                (w / surface.buffer.scale, h / surface.buffer.scale)
            }
            None => (0, 0),
        };
    }

    /// Asks every output backend to let its renderer attach the surface,
    /// recording the reported buffer dimensions.
    fn attach_surface_to_outputs(&mut self, key: SurfaceKey) {
        let ids: Vec<OutputId> = self.outputs.keys().map(|id| OutputId(*id)).collect();

        for id in ids {
            let Some(mut backend) = self.outputs.get_mut(&id.0).and_then(|o| o.backend.take())
            else {
                continue;
            };

            let reported = backend.attach_surface(self, key);

            if let Some(output) = self.outputs.get_mut(&id.0) {
                output.backend = Some(backend);
            }

            if let Some(size) = reported {
                if let Some(buffer) = self.surfaces[key].buffer.buffer {
                    if let Some(buffer) = self.buffers.get_mut(buffer) {
                        buffer.size = Some(size);
                    }
                }
            }
        }
    }

    /// Sends `done` on every retired frame callback. Each callback fires at
    /// most once.
    pub(crate) fn surface_send_frame_callbacks(&mut self, key: SurfaceKey, time: u32) {
        let Some(surface) = self.surfaces.get_mut(key) else {
            return;
        };

        for callback in surface.frame_callbacks.drain(..) {
            callback.done(time);
        }
    }

    /// Pushes accumulated surface damage out: into the planes showing the
    /// surface, and to the output backends (e.g. for texture uploads).
    pub(crate) fn surface_flush_damage(&mut self, key: SurfaceKey) {
        if self.surfaces[key].damage.is_empty() {
            return;
        }

        for view in self.surfaces[key].views.clone() {
            self.view_surface_damage(view);
        }

        let ids: Vec<u32> = self.outputs.keys().copied().collect();
        let mut keep_buffer = ids.is_empty();
        for id in ids {
            let Some(mut backend) = self.outputs.get_mut(&id).and_then(|o| o.backend.take()) else {
                continue;
            };

            keep_buffer |= backend.flush_surface_damage(self, key);

            if let Some(output) = self.outputs.get_mut(&id) {
                output.backend = Some(backend);
            }
        }

        let surface = &mut self.surfaces[key];
        surface.damage.clear();

        if !keep_buffer {
            if let Some(buffer) = surface.buffer.buffer {
                surface.buffer.flushed = true;
                self.buffer_unreference(buffer);
            }
        }
    }

    pub(crate) fn surface_send_enter(&mut self, key: SurfaceKey, output: OutputId) {
        let Some(surface) = self.surfaces.get(key) else {
            return;
        };
        let Some(resource) = &surface.resource else {
            return;
        };
        let Some(output) = self.outputs.get(&output.0) else {
            return;
        };

        for wl_output in output
            .resources
            .iter()
            .filter(|r| r.id().same_client_as(&resource.id()))
        {
            resource.enter(wl_output);
        }
    }

    pub(crate) fn surface_send_leave(&mut self, key: SurfaceKey, output: OutputId) {
        let Some(surface) = self.surfaces.get(key) else {
            return;
        };
        let Some(resource) = &surface.resource else {
            return;
        };
        let Some(output) = self.outputs.get(&output.0) else {
            return;
        };

        for wl_output in output
            .resources
            .iter()
            .filter(|r| r.id().same_client_as(&resource.id()))
        {
            resource.leave(wl_output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn commit_clears_pending() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let surface = state.create_surface(None);
        let buffer = test_buffer(state);

        state.surface_attach(surface, Some(buffer), 3, 4);
        state.surface_damage(surface, 0, 0, 64, 64);
        state.commit_surface(surface);

        let surf = &state.surfaces[surface];
        assert_eq!(surf.pending.buffer, None);
        assert!(!surf.pending.newly_attached);
        assert!(surf.pending.damage.is_empty());
        assert_eq!(surf.buffer.buffer, Some(buffer));
        assert_eq!(surf.buffer.offset, (3, 4));
        assert_eq!(state.buffers[buffer].ref_count, 1);
    }

    #[test]
    fn commit_with_empty_pending_is_idempotent() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let surface = state.create_surface(None);
        let buffer = test_buffer(state);
        state.surface_attach(surface, Some(buffer), 0, 0);
        state.surface_damage(surface, 0, 0, 10, 10);
        state.commit_surface(surface);

        let snapshot = |state: &State| {
            let s = &state.surfaces[surface];
            (
                s.buffer.buffer,
                s.buffer.offset,
                s.size,
                s.damage.clone(),
                s.opaque.clone(),
                s.input.clone(),
            )
        };

        state.commit_surface(surface);
        let first = snapshot(state);
        state.commit_surface(surface);
        assert_eq!(snapshot(state), first);
        assert_eq!(state.buffers[buffer].ref_count, 1);
    }

    #[test]
    fn attach_offsets_accumulate() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let surface = state.create_surface(None);
        let buffer = test_buffer(state);

        state.surface_attach(surface, Some(buffer), 5, 5);
        state.commit_surface(surface);
        state.surface_attach(surface, Some(buffer), -2, 1);
        state.commit_surface(surface);

        assert_eq!(state.surfaces[surface].buffer.offset, (3, 6));
    }

    #[test]
    fn role_is_set_once() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let surface = state.create_surface(None);
        assert!(state.surface_set_role(surface, "xdg_toplevel"));
        assert!(!state.surface_set_role(surface, "xdg_popup"));
        assert_eq!(state.surfaces[surface].role(), Some("xdg_toplevel"));
    }

    #[test]
    fn buffer_destruction_clears_pending_attachment() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let surface = state.create_surface(None);
        let buffer = test_buffer(state);

        state.surface_attach(surface, Some(buffer), 0, 0);
        state.buffer_destroyed(buffer);

        assert_eq!(state.surfaces[surface].pending.buffer, None);

        // Committing afterwards attaches nothing.
        state.commit_surface(surface);
        assert_eq!(state.surfaces[surface].buffer.buffer, None);
        assert_eq!(state.surfaces[surface].size, (0, 0));
    }
}
