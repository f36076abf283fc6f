// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Parented surfaces with synchronized and desynchronized commit modes.
//!
//! A synchronized subsurface's commits land in a cached state that flushes
//! into the current state only when the parent commits. Relative position
//! and sibling restacks always apply on the parent's commit.

use std::mem;

use crate::{
    compositor::State,
    object::{EventKind, ListenerId, ObjectCore, ObjectRef},
    surface::{SurfaceKey, SurfaceState},
    view::ViewKey,
};

slotmap::new_key_type! { pub struct SubsurfaceKey; }

pub struct Subsurface {
    pub(crate) core: ObjectCore,
    pub(crate) surface: SurfaceKey,
    pub(crate) parent: SurfaceKey,

    pub(crate) position: (i32, i32),
    pub(crate) pending_position: (i32, i32),

    pub(crate) synchronized: bool,
    pub(crate) cache: SurfaceState,
    pub(crate) cached: bool,
    pub(crate) restacked: bool,

    pub(crate) parent_destroy_listener: Option<ListenerId>,
    pub(crate) parent_commit_listener: Option<ListenerId>,
}

impl Subsurface {
    pub fn surface(&self) -> SurfaceKey {
        self.surface
    }

    pub fn parent(&self) -> SurfaceKey {
        self.parent
    }

    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn synchronized(&self) -> bool {
        self.synchronized
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubsurfaceError {
    RoleTaken,
    OwnParent,
    NotSibling,
}

impl State {
    /// Subsurface-ifies `surface` under `parent`. Fails if the surface
    /// already has a role, already is a subsurface, or the link would make a
    /// surface its own ancestor.
    pub fn create_subsurface(
        &mut self,
        surface: SurfaceKey,
        parent: SurfaceKey,
    ) -> Result<SubsurfaceKey, SubsurfaceError> {
        if surface == parent || self.is_surface_ancestor(surface, parent) {
            return Err(SubsurfaceError::OwnParent);
        }

        if self.surfaces[surface].sub.is_some() || !self.surface_set_role(surface, "wl_subsurface")
        {
            return Err(SubsurfaceError::RoleTaken);
        }

        let key = self.subsurfaces.insert_with_key(|k| Subsurface {
            core: self.objects.register(ObjectRef::Subsurface(k)),
            surface,
            parent,
            position: (0, 0),
            pending_position: (0, 0),
            synchronized: true,
            cache: SurfaceState::default(),
            cached: false,
            restacked: false,
            parent_destroy_listener: None,
            parent_commit_listener: None,
        });

        self.surfaces[surface].sub = Some(key);

        // The youngest sibling is top-most.
        self.surfaces[parent].subsurfaces.insert(0, key);
        self.surfaces[parent].subsurfaces_pending.insert(0, key);

        let destroy = self.add_listener(
            ObjectRef::Surface(parent),
            EventKind::ObjectDestroy,
            0,
            std::rc::Rc::new(move |state: &mut State, _, _| {
                state.teardown_subsurface(key);
            }),
        );
        let commit = self.add_listener(
            ObjectRef::Surface(parent),
            EventKind::SurfaceCommit,
            0,
            std::rc::Rc::new(move |state: &mut State, _, _| {
                state.subsurface_handle_parent_commit(key);
            }),
        );

        let sub = &mut self.subsurfaces[key];
        sub.parent_destroy_listener = destroy;
        sub.parent_commit_listener = commit;

        self.subsurface_create_views(key);

        Ok(key)
    }

    /// Creates one child view per parent view, inheriting the parent's
    /// transform.
    fn subsurface_create_views(&mut self, key: SubsurfaceKey) {
        let (surface, parent) = {
            let sub = &self.subsurfaces[key];
            (sub.surface, sub.parent)
        };

        for parent_view in self.surfaces[parent].views.clone() {
            let view = self.add_view();
            self.view_set_surface(view, Some(surface));
            self.view_set_parent(view, Some(parent_view));
            self.view_set_transform_inherit(view, true);
            self.view_map(view);
        }
    }

    pub(crate) fn teardown_subsurface(&mut self, key: SubsurfaceKey) {
        let Some(sub) = self.subsurfaces.get(key) else {
            return;
        };
        let surface = sub.surface;
        let parent = sub.parent;

        self.finish_object(ObjectRef::Subsurface(key));

        let sub = &mut self.subsurfaces[key];
        let destroy = sub.parent_destroy_listener.take();
        let commit = sub.parent_commit_listener.take();
        let mut cache = mem::take(&mut sub.cache);

        if let Some(l) = destroy {
            self.remove_listener(ObjectRef::Surface(parent), l);
        }
        if let Some(l) = commit {
            self.remove_listener(ObjectRef::Surface(parent), l);
        }
        if let (Some(buffer), Some(l)) = (cache.buffer, cache.buffer_destroy_listener.take()) {
            self.remove_listener(ObjectRef::Buffer(buffer), l);
        }

        if let Some(parent) = self.surfaces.get_mut(parent) {
            parent.subsurfaces.retain(|s| *s != key);
            parent.subsurfaces_pending.retain(|s| *s != key);
        }

        let views: Vec<ViewKey> = self
            .surfaces
            .get(surface)
            .map(|s| s.views.clone())
            .unwrap_or_default();
        for view in views {
            self.destroy_view(view);
        }

        if let Some(surface) = self.surfaces.get_mut(surface) {
            surface.sub = None;
        }

        let sub = self.subsurfaces.remove(key).unwrap();
        self.objects.release(sub.core.id());
    }

    pub fn subsurface_set_position(&mut self, key: SubsurfaceKey, x: i32, y: i32) {
        self.subsurfaces[key].pending_position = (x, y);
    }

    pub fn subsurface_set_sync(&mut self, key: SubsurfaceKey) {
        self.subsurfaces[key].synchronized = true;
    }

    /// Leaves synchronized mode. Any cached state applies immediately.
    pub fn subsurface_set_desync(&mut self, key: SubsurfaceKey) {
        let sub = &mut self.subsurfaces[key];
        if !sub.synchronized {
            return;
        }

        sub.synchronized = false;
        if sub.cached {
            self.subsurface_flush_cache(key);
        }
    }

    /// A subsurface is in effective sync mode if it or any ancestor
    /// subsurface is synchronized.
    pub(crate) fn subsurface_effectively_synchronized(&self, key: SubsurfaceKey) -> bool {
        let mut current = Some(key);
        while let Some(k) = current {
            let sub = &self.subsurfaces[k];
            if sub.synchronized {
                return true;
            }
            current = self.surfaces.get(sub.parent).and_then(|s| s.sub);
        }

        false
    }

    fn is_surface_ancestor(&self, candidate: SurfaceKey, of: SurfaceKey) -> bool {
        let mut current = self.surfaces.get(of).and_then(|s| s.sub);
        while let Some(sub) = current {
            let parent = self.subsurfaces[sub].parent;
            if parent == candidate {
                return true;
            }
            current = self.surfaces.get(parent).and_then(|s| s.sub);
        }

        false
    }

    /// Re-anchors the subsurface above a sibling in the pending order,
    /// applied on the next parent commit.
    pub fn subsurface_place_above(
        &mut self,
        key: SubsurfaceKey,
        sibling: SurfaceKey,
    ) -> Result<(), SubsurfaceError> {
        self.subsurface_restack(key, sibling, true)
    }

    pub fn subsurface_place_below(
        &mut self,
        key: SubsurfaceKey,
        sibling: SurfaceKey,
    ) -> Result<(), SubsurfaceError> {
        self.subsurface_restack(key, sibling, false)
    }

    fn subsurface_restack(
        &mut self,
        key: SubsurfaceKey,
        sibling: SurfaceKey,
        above: bool,
    ) -> Result<(), SubsurfaceError> {
        let (surface, parent) = {
            let sub = &self.subsurfaces[key];
            (sub.surface, sub.parent)
        };

        if sibling == surface {
            return Err(SubsurfaceError::OwnParent);
        }

        let Some(sibling_sub) = self.surfaces.get(sibling).and_then(|s| s.sub) else {
            return Err(SubsurfaceError::NotSibling);
        };

        let sibling_parent = self.subsurfaces[sibling_sub].parent;
        if sibling_parent != parent && sibling != parent {
            return Err(SubsurfaceError::NotSibling);
        }

        let pending = &mut self.surfaces[parent].subsurfaces_pending;
        pending.retain(|s| *s != key);
        let anchor = pending
            .iter()
            .position(|s| *s == sibling_sub)
            .unwrap_or(pending.len());
        let index = if above { anchor } else { anchor + 1 };
        pending.insert(index.min(pending.len()), key);

        self.subsurfaces[key].restacked = true;
        Ok(())
    }

    /// wl_surface.commit on a synchronized subsurface: the pending state is
    /// folded into the cache instead of being promoted.
    pub(crate) fn subsurface_commit_to_cache(&mut self, key: SubsurfaceKey) {
        let surface = self.subsurfaces[key].surface;
        let mut pending = mem::take(&mut self.surfaces[surface].pending);

        if pending.newly_attached {
            let old = {
                let sub = &mut self.subsurfaces[key];
                sub.cache.buffer.take().map(|b| (b, sub.cache.buffer_destroy_listener.take()))
            };
            if let Some((old, Some(listener))) = old {
                self.remove_listener(ObjectRef::Buffer(old), listener);
            }

            if let Some(buffer) = pending.buffer {
                if let Some(l) = pending.buffer_destroy_listener.take() {
                    self.remove_listener(ObjectRef::Buffer(buffer), l);
                }

                let listener = self.add_listener(
                    ObjectRef::Buffer(buffer),
                    EventKind::ObjectDestroy,
                    0,
                    std::rc::Rc::new(move |state: &mut State, _, _| {
                        if let Some(sub) = state.subsurfaces.get_mut(key) {
                            sub.cache.buffer = None;
                            sub.cache.buffer_destroy_listener = None;
                        }
                    }),
                );
                self.subsurfaces[key].cache.buffer_destroy_listener = listener;
            }

            let sub = &mut self.subsurfaces[key];
            sub.cache.buffer = pending.buffer.take();
            sub.cache.offset.0 += pending.offset.0;
            sub.cache.offset.1 += pending.offset.1;
            sub.cache.newly_attached = true;

            pending.newly_attached = false;
            pending.offset = (0, 0);
        }

        let sub = &mut self.subsurfaces[key];
        sub.cache.transform = pending.transform;
        sub.cache.scale = pending.scale;
        sub.cache.damage.union(&pending.damage);
        pending.damage.clear();
        sub.cache.opaque = pending.opaque.clone();
        sub.cache.input = pending.input.clone();
        sub.cache
            .frame_callbacks
            .append(&mut pending.frame_callbacks);
        sub.cached = true;

        self.surfaces[surface].pending = pending;
    }

    fn subsurface_flush_cache(&mut self, key: SubsurfaceKey) {
        let surface = self.subsurfaces[key].surface;
        let mut cache = mem::take(&mut self.subsurfaces[key].cache);
        self.subsurfaces[key].cached = false;

        self.commit_surface_state(surface, &mut cache);

        // Preserve sticky fields for the next cache fill.
        let sub = &mut self.subsurfaces[key];
        sub.cache.transform = cache.transform;
        sub.cache.scale = cache.scale;
        sub.cache.opaque = cache.opaque.clone();
        sub.cache.input = cache.input.clone();
    }

    /// Runs when the parent surface commits: applies the pending relative
    /// position and sibling order, and flushes the cache in sync mode.
    pub(crate) fn subsurface_handle_parent_commit(&mut self, key: SubsurfaceKey) {
        let Some(sub) = self.subsurfaces.get_mut(key) else {
            return;
        };

        let surface = sub.surface;
        let parent = sub.parent;
        sub.position = sub.pending_position;
        let position = sub.position;
        let restacked = mem::take(&mut sub.restacked);
        let flush = sub.cached;

        for view in self.surfaces[surface].views.clone() {
            self.view_set_position(view, position.0 as f64, position.1 as f64);
        }

        if restacked {
            let order = self.surfaces[parent].subsurfaces_pending.clone();
            self.surfaces[parent].subsurfaces = order;
            self.restack_subsurface_views(parent);
        }

        if flush {
            self.subsurface_flush_cache(key);
        }
    }

    /// Re-stacks subsurface views above their parent views, bottom-most
    /// sibling first so the top-most sibling ends up on top.
    fn restack_subsurface_views(&mut self, parent: SurfaceKey) {
        let order = self.surfaces[parent].subsurfaces.clone();

        for sub in order.iter().rev() {
            let surface = self.subsurfaces[*sub].surface;
            for view in self.surfaces[surface].views.clone() {
                let Some(parent_view) = self.views.get(view).and_then(|v| v.parent) else {
                    continue;
                };
                self.view_stack_above(view, parent_view, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use pretty_assertions::assert_eq;

    fn setup(state: &mut State) -> (SurfaceKey, SurfaceKey, SubsurfaceKey) {
        let parent = state.create_surface(None);
        // The parent needs a view for child views to attach to.
        let view = state.add_view();
        state.view_set_surface(view, Some(parent));
        state.view_map(view);

        let child = state.create_surface(None);
        let sub = state.create_subsurface(child, parent).unwrap();
        (parent, child, sub)
    }

    #[test]
    fn sync_commit_is_cached_until_parent_commit() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (parent, child, sub) = setup(state);

        let buffer = test_buffer(state);
        state.surface_attach(child, Some(buffer), 0, 0);
        state.surface_damage(child, 0, 0, 16, 16);
        state.commit_surface(child);

        // Nothing applied yet.
        assert_eq!(state.surfaces[child].buffer.buffer, None);
        assert!(state.subsurfaces[sub].cached);

        state.commit_surface(parent);
        assert_eq!(state.surfaces[child].buffer.buffer, Some(buffer));
        assert!(!state.subsurfaces[sub].cached);
    }

    #[test]
    fn desync_applies_cache_and_commits_directly() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (_, child, sub) = setup(state);

        let red = test_buffer(state);
        state.surface_attach(child, Some(red), 0, 0);
        state.commit_surface(child);
        assert_eq!(state.surfaces[child].buffer.buffer, None);

        state.subsurface_set_desync(sub);
        assert_eq!(state.surfaces[child].buffer.buffer, Some(red));

        let blue = test_buffer(state);
        state.surface_attach(child, Some(blue), 0, 0);
        state.commit_surface(child);
        assert_eq!(state.surfaces[child].buffer.buffer, Some(blue));
    }

    #[test]
    fn position_applies_on_parent_commit() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (parent, child, sub) = setup(state);

        state.subsurface_set_position(sub, 30, 40);
        let view = state.surfaces[child].views[0];
        assert_eq!(state.views[view].position(), (0.0, 0.0));

        state.commit_surface(parent);
        assert_eq!(state.views[view].position(), (30.0, 40.0));
    }

    #[test]
    fn surface_cannot_become_its_own_ancestor() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let a = state.create_surface(None);
        let b = state.create_surface(None);
        state.create_subsurface(b, a).unwrap();

        assert_eq!(
            state.create_subsurface(a, b),
            Err(SubsurfaceError::OwnParent)
        );
        assert_eq!(state.create_subsurface(a, a), Err(SubsurfaceError::OwnParent));
    }

    #[test]
    fn restack_applies_on_parent_commit() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (parent, _, sub_a) = setup(state);

        let c = state.create_surface(None);
        let sub_c = state.create_subsurface(c, parent).unwrap();

        // Youngest is top-most.
        assert_eq!(state.surfaces[parent].subsurfaces, vec![sub_c, sub_a]);

        let a_surface = state.subsurfaces[sub_a].surface;
        state.subsurface_place_above(sub_a, c).unwrap();
        assert_eq!(state.surfaces[parent].subsurfaces, vec![sub_c, sub_a]);

        state.commit_surface(parent);
        assert_eq!(state.surfaces[parent].subsurfaces, vec![sub_a, sub_c]);

        // And the sibling check rejects strangers.
        let stranger = state.create_surface(None);
        assert_eq!(
            state.subsurface_place_above(sub_a, stranger),
            Err(SubsurfaceError::NotSibling)
        );
        assert_eq!(
            state.subsurface_place_above(sub_a, a_surface),
            Err(SubsurfaceError::OwnParent)
        );
    }
}
