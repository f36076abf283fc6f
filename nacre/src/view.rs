// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Views: instances of surfaces in the global scene.
//!
//! The compositor keeps a single front-first z-ordered list of views.
//! Geometry and active flags are recomputed lazily from dirty bits during
//! repaint, with parents updated before their children.

use crate::{
    compositor::State,
    object::{Event, EventKind, ObjectCore, ObjectRef},
    output::{OutputId, MAX_OUTPUT_COUNT},
    plane::PlaneKey,
    region::{Rect, Region},
    surface::SurfaceKey,
    transform::Matrix,
};

slotmap::new_key_type! { pub struct ViewKey; }

pub const VIEW_GEOMETRY_DIRTY: u32 = 1 << 0;
pub const VIEW_ACTIVE_DIRTY: u32 = 1 << 1;
pub const VIEW_Z_ORDER_DIRTY: u32 = 1 << 2;
pub const VIEW_CONTENT_DIRTY: u32 = 1 << 3;

/// Binds a view into one plane of one output: the view-to-output transform
/// and the visible region after opaque occlusion, in output-local space.
pub struct PlaneEntry {
    pub(crate) plane: Option<PlaneKey>,
    pub(crate) transform: Matrix,
    pub(crate) inverse: Matrix,
    pub(crate) visible: Region,
    pub(crate) need_damage: bool,
    pub(crate) need_transform_update: bool,
}

impl Default for PlaneEntry {
    fn default() -> Self {
        Self {
            plane: None,
            transform: Matrix::identity(),
            inverse: Matrix::identity(),
            visible: Region::new(),
            need_damage: false,
            need_transform_update: true,
        }
    }
}

impl PlaneEntry {
    pub fn visible_region(&self) -> &Region {
        &self.visible
    }

    pub fn transform(&self) -> &Matrix {
        &self.transform
    }

    pub fn inverse(&self) -> &Matrix {
        &self.inverse
    }
}

pub struct View {
    pub(crate) core: ObjectCore,
    pub(crate) dirty: u32,

    pub(crate) parent: Option<ViewKey>,
    pub(crate) children: Vec<ViewKey>,

    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) w: i32,
    pub(crate) h: i32,
    pub(crate) transform: Matrix,
    pub(crate) inherit_transform: bool,

    pub(crate) global_transform: Matrix,
    pub(crate) global_transform_inverse: Matrix,
    pub(crate) bounding: Region,
    pub(crate) opaque: Region,

    pub(crate) active: bool,
    pub(crate) mapped: bool,

    pub(crate) surface: Option<SurfaceKey>,

    pub(crate) output_overlap: u32,
    pub(crate) plane_entries: Vec<PlaneEntry>,
}

impl View {
    pub fn parent(&self) -> Option<ViewKey> {
        self.parent
    }

    pub fn children(&self) -> &[ViewKey] {
        &self.children
    }

    pub fn surface(&self) -> Option<SurfaceKey> {
        self.surface
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn size(&self) -> (i32, i32) {
        (self.w, self.h)
    }

    pub fn transform(&self) -> &Matrix {
        &self.transform
    }

    pub fn inherits_transform(&self) -> bool {
        self.inherit_transform
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn output_overlap(&self) -> u32 {
        self.output_overlap
    }

    pub fn bounding_region(&self) -> &Region {
        &self.bounding
    }

    pub fn opaque_region(&self) -> &Region {
        &self.opaque
    }

    pub fn plane_entry(&self, output: OutputId) -> &PlaneEntry {
        &self.plane_entries[output.0 as usize]
    }
}

enum StackTarget {
    Top,
    Bottom,
    Above(ViewKey),
    Below(ViewKey),
}

impl State {
    pub fn add_view(&mut self) -> ViewKey {
        let key = self.views.insert_with_key(|k| View {
            core: self.objects.register(ObjectRef::View(k)),
            dirty: 0,
            parent: None,
            children: Vec::new(),
            x: 0.0,
            y: 0.0,
            w: 0,
            h: 0,
            transform: Matrix::identity(),
            inherit_transform: false,
            global_transform: Matrix::identity(),
            global_transform_inverse: Matrix::identity(),
            bounding: Region::new(),
            opaque: Region::new(),
            active: false,
            mapped: false,
            surface: None,
            output_overlap: 0,
            plane_entries: (0..MAX_OUTPUT_COUNT).map(|_| PlaneEntry::default()).collect(),
        });

        self.view_list.insert(0, key);
        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::ViewAdd, ObjectRef::View(key)),
        );

        key
    }

    pub fn destroy_view(&mut self, key: ViewKey) {
        if !self.views.contains_key(key) {
            return;
        }

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::ViewRemove, ObjectRef::View(key)),
        );
        self.finish_object(ObjectRef::View(key));

        for id in 0..MAX_OUTPUT_COUNT as u32 {
            self.plane_entry_set_plane(key, OutputId(id), None);
        }

        for child in self.views[key].children.clone() {
            self.destroy_view(child);
        }

        if let Some(parent) = self.views[key].parent {
            if let Some(parent) = self.views.get_mut(parent) {
                parent.children.retain(|c| *c != key);
            }
        }

        self.view_list.retain(|v| *v != key);

        if let Some(surface) = self.views[key].surface {
            if let Some(surface) = self.surfaces.get_mut(surface) {
                surface.views.retain(|v| *v != key);
            }
        }

        let view = self.views.remove(key).unwrap();
        self.objects.release(view.core.id());
        self.schedule_repaint_all();
    }

    pub fn view_set_surface(&mut self, key: ViewKey, surface: Option<SurfaceKey>) {
        if self.views[key].surface == surface {
            return;
        }

        if let Some(old) = self.views[key].surface {
            if let Some(old) = self.surfaces.get_mut(old) {
                old.views.retain(|v| *v != key);
            }
        }

        self.views[key].surface = surface;

        if let Some(new) = surface {
            self.surfaces[new].views.push(key);
        }

        self.view_mark_dirty(key, VIEW_GEOMETRY_DIRTY);
    }

    pub fn view_set_parent(&mut self, key: ViewKey, parent: Option<ViewKey>) {
        if self.views[key].parent == parent {
            return;
        }

        if let Some(old) = self.views[key].parent {
            if let Some(old) = self.views.get_mut(old) {
                old.children.retain(|c| *c != key);
            }
        }

        self.views[key].parent = parent;

        if let Some(new) = parent {
            self.views[new].children.push(key);
        }

        self.view_mark_dirty(key, VIEW_ACTIVE_DIRTY | VIEW_GEOMETRY_DIRTY);
    }

    /// Toggles whether the view's transform composes with its parent's.
    /// The view's position and transform are rewritten so that its global
    /// placement does not change.
    pub fn view_set_transform_inherit(&mut self, key: ViewKey, inherit: bool) {
        let view = &self.views[key];
        if view.inherit_transform == inherit {
            return;
        }

        if view.inherit_transform {
            // Local placement becomes global placement.
            let (x, y) = view.global_transform.translation();
            let mut transform = view.global_transform;
            transform.translate_by(-x, -y);

            let view = &mut self.views[key];
            view.x = x;
            view.y = y;
            view.transform = transform;
        } else if let Some(parent) = view.parent {
            // Global placement becomes parent-local placement.
            if let Some(parent_inverse) = self.views[parent].global_transform.inverse() {
                let mut transform = parent_inverse.mul(&self.views[key].global_transform);
                let (x, y) = transform.translation();
                transform.translate_by(-x, -y);

                let view = &mut self.views[key];
                view.x = x;
                view.y = y;
                view.transform = transform;
            }
        }

        self.views[key].inherit_transform = inherit;
        self.view_mark_dirty(key, VIEW_GEOMETRY_DIRTY);
    }

    pub fn view_resize(&mut self, key: ViewKey, w: i32, h: i32) {
        let view = &mut self.views[key];
        if view.w == w && view.h == h {
            return;
        }

        view.w = w;
        view.h = h;
        self.view_mark_dirty(key, VIEW_GEOMETRY_DIRTY);
    }

    pub fn view_set_position(&mut self, key: ViewKey, x: f64, y: f64) {
        let view = &mut self.views[key];
        if view.x == x && view.y == y {
            return;
        }

        view.x = x;
        view.y = y;
        self.view_mark_dirty(key, VIEW_GEOMETRY_DIRTY);
    }

    pub fn view_set_transform(&mut self, key: ViewKey, transform: Matrix) {
        self.views[key].transform = transform;
        self.view_mark_dirty(key, VIEW_GEOMETRY_DIRTY);
    }

    pub fn view_map(&mut self, key: ViewKey) {
        let view = &mut self.views[key];
        if view.mapped {
            return;
        }

        view.mapped = true;
        self.view_mark_dirty(key, VIEW_ACTIVE_DIRTY);
    }

    pub fn view_unmap(&mut self, key: ViewKey) {
        let view = &mut self.views[key];
        if !view.mapped {
            return;
        }

        view.mapped = false;
        self.view_mark_dirty(key, VIEW_ACTIVE_DIRTY);
    }

    pub fn view_above(&self, key: ViewKey) -> Option<ViewKey> {
        let pos = self.view_list.iter().position(|v| *v == key)?;
        pos.checked_sub(1).map(|p| self.view_list[p])
    }

    pub fn view_below(&self, key: ViewKey) -> Option<ViewKey> {
        let pos = self.view_list.iter().position(|v| *v == key)?;
        self.view_list.get(pos + 1).copied()
    }

    pub fn view_stack_above(&mut self, key: ViewKey, below: ViewKey, subtree: bool) {
        self.view_stack(key, StackTarget::Above(below), subtree);
    }

    pub fn view_stack_below(&mut self, key: ViewKey, above: ViewKey, subtree: bool) {
        self.view_stack(key, StackTarget::Below(above), subtree);
    }

    pub fn view_stack_top(&mut self, key: ViewKey, subtree: bool) {
        self.view_stack(key, StackTarget::Top, subtree);
    }

    pub fn view_stack_bottom(&mut self, key: ViewKey, subtree: bool) {
        self.view_stack(key, StackTarget::Bottom, subtree);
    }

    /// Collects the view and, in z order, its descendants: the run of views
    /// that moves together when `subtree` stacking is requested.
    fn collect_subtree(&self, key: ViewKey, out: &mut Vec<ViewKey>) {
        out.push(key);
        for child in &self.views[key].children {
            self.collect_subtree(*child, out);
        }
    }

    fn view_stack(&mut self, key: ViewKey, target: StackTarget, subtree: bool) {
        let mut moved = Vec::new();
        if subtree {
            self.collect_subtree(key, &mut moved);
        } else {
            moved.push(key);
        }

        match target {
            StackTarget::Above(pivot) | StackTarget::Below(pivot) if moved.contains(&pivot) => {
                return
            }
            _ => (),
        }

        let old_list = self.view_list.clone();
        self.view_list.retain(|v| !moved.contains(v));

        let index = match target {
            StackTarget::Top => 0,
            StackTarget::Bottom => self.view_list.len(),
            StackTarget::Above(pivot) => self
                .view_list
                .iter()
                .position(|v| *v == pivot)
                .unwrap_or(0),
            StackTarget::Below(pivot) => self
                .view_list
                .iter()
                .position(|v| *v == pivot)
                .map(|p| p + 1)
                .unwrap_or(self.view_list.len()),
        };

        for (i, v) in moved.iter().enumerate() {
            self.view_list.insert(index + i, *v);
        }

        if self.view_list != old_list {
            for v in moved {
                self.emit(ObjectRef::View(v), Event::new(EventKind::ViewStackChange));
                self.view_mark_dirty(v, VIEW_Z_ORDER_DIRTY);
            }
        }
    }

    /// Marks a view dirty, propagating geometry and active dirt through the
    /// whole subtree. Placement changes schedule a repaint; content dirt
    /// alone does not, since repaints for content are driven by the damage
    /// the commit actually carried.
    pub(crate) fn view_mark_dirty(&mut self, key: ViewKey, flag: u32) {
        let Some(view) = self.views.get_mut(key) else {
            return;
        };

        if view.dirty & flag == flag {
            return;
        }

        view.dirty |= flag;

        if flag & VIEW_GEOMETRY_DIRTY != 0 {
            for entry in &mut view.plane_entries {
                entry.need_transform_update = true;
            }
            for child in view.children.clone() {
                self.view_mark_dirty(child, VIEW_GEOMETRY_DIRTY);
            }
        }

        if flag & VIEW_ACTIVE_DIRTY != 0 {
            for child in self.views[key].children.clone() {
                self.view_mark_dirty(child, VIEW_ACTIVE_DIRTY);
            }
        }

        if flag & !VIEW_CONTENT_DIRTY != 0 {
            self.schedule_repaint_all();
        }
    }

    pub(crate) fn plane_entry_set_plane(
        &mut self,
        key: ViewKey,
        output: OutputId,
        plane: Option<PlaneKey>,
    ) {
        let index = output.0 as usize;
        let entry = &mut self.views[key].plane_entries[index];
        if entry.plane == plane {
            return;
        }

        if let Some(old) = entry.plane.take() {
            let visible = std::mem::take(&mut entry.visible);
            self.plane_add_damage(old, &visible);
        }

        let entry = &mut self.views[key].plane_entries[index];
        entry.plane = plane;

        if plane.is_some() {
            entry.visible = Region::new();
            entry.need_damage = true;
        }
    }

    /// Assigns the view to a plane on the given output, or detaches it when
    /// `plane` is `None`. The plane must belong to the output.
    pub fn view_assign_plane(&mut self, key: ViewKey, output: OutputId, plane: Option<PlaneKey>) {
        if let Some(plane) = plane {
            let ok = self.planes.get(plane).map(|p| p.output) == Some(output);
            debug_assert!(ok, "plane output mismatch");
            if !ok {
                return;
            }
        }

        self.plane_entry_set_plane(key, output, plane);
    }

    /// Recomputes the derived state of a dirty view: the active flag, the
    /// global transform and its inverse, the bounding and opaque regions,
    /// and the set of outputs the view overlaps.
    pub(crate) fn view_update(&mut self, key: ViewKey) {
        if self.views[key].dirty == 0 {
            return;
        }

        // The parent runs first; our transform and active flag depend on it.
        let active = match self.views[key].parent {
            Some(parent) => {
                self.view_update(parent);
                self.views[parent].active && self.views[key].mapped
            }
            None => self.views[key].mapped,
        };

        {
            let view = &mut self.views[key];
            if view.active == active {
                view.dirty &= !VIEW_ACTIVE_DIRTY;
            }
            if view.dirty == 0 {
                return;
            }
            view.active = active;
        }

        // Damage for deactivation is handled when the view is detached from
        // its planes during repaint.
        if !active {
            return;
        }

        // Content-only dirt flows through the surface damage flush; only
        // placement changes need the unmap-and-remap treatment below.
        if self.views[key].dirty & !VIEW_CONTENT_DIRTY == 0 {
            self.views[key].dirty = 0;
            return;
        }

        // The update is treated as an unmap and remap: old visible regions
        // are damaged now, and the new ones when they are recomputed on the
        // next plane update.
        for index in 0..MAX_OUTPUT_COUNT {
            let entry = &self.views[key].plane_entries[index];
            if let Some(plane) = entry.plane {
                let visible = entry.visible.clone();
                self.plane_add_damage(plane, &visible);
            }
        }

        if self.views[key].dirty & VIEW_GEOMETRY_DIRTY != 0 {
            let (global, inverse) = {
                let view = &self.views[key];
                let mut global = Matrix::translate(view.x, view.y).mul(&view.transform);
                if view.inherit_transform {
                    if let Some(parent) = view.parent {
                        global = self.views[parent].global_transform.mul(&global);
                    }
                }

                let inverse = global.inverse().unwrap_or_else(Matrix::identity);
                (global, inverse)
            };

            let bounding = {
                let view = &self.views[key];
                let mut bounding = Region::from_rect(Rect::from_size(0, 0, view.w, view.h));
                bounding.transform(&global);
                bounding
            };

            let opaque = {
                let view = &self.views[key];
                match view.surface {
                    Some(surface) if global.is_translation() => {
                        let (tx, ty) = global.translation();
                        let mut opaque = self.surfaces[surface].opaque.clone();
                        opaque.intersect_rect(Rect::from_size(0, 0, view.w, view.h));
                        opaque.translate(tx as i32, ty as i32);
                        opaque
                    }
                    _ => Region::new(),
                }
            };

            {
                let view = &mut self.views[key];
                view.global_transform = global;
                view.global_transform_inverse = inverse;
                view.bounding = bounding;
                view.opaque = opaque;
            }

            // Output overlap; diffs drive enter/leave.
            let prev = self.views[key].output_overlap;
            let mut overlap = 0u32;
            let outputs: Vec<(u32, Rect)> = self
                .outputs
                .iter()
                .map(|(id, o)| (*id, o.geometry_rect()))
                .collect();

            for (id, rect) in outputs {
                let bit = 1u32 << id;
                if self.views[key].bounding.overlaps_rect(&rect) {
                    overlap |= bit;
                    if prev & bit == 0 {
                        if let Some(surface) = self.views[key].surface {
                            self.surface_send_enter(surface, OutputId(id));
                        }
                    }
                } else if prev & bit != 0 {
                    if let Some(surface) = self.views[key].surface {
                        self.surface_send_leave(surface, OutputId(id));
                    }
                }
            }
            self.views[key].output_overlap = overlap;
        }

        let view = &mut self.views[key];
        for entry in &mut view.plane_entries {
            entry.need_damage = true;
        }
        view.dirty = 0;
    }

    /// Adds the surface's current damage to every plane showing this view.
    pub(crate) fn view_surface_damage(&mut self, key: ViewKey) {
        let Some(surface) = self.views[key].surface else {
            return;
        };

        for index in 0..MAX_OUTPUT_COUNT {
            let Some(plane) = self.views[key].plane_entries[index].plane else {
                continue;
            };
            let Some(output_id) = self.planes.get(plane).map(|p| p.output) else {
                continue;
            };
            let Some(output) = self.outputs.get(&output_id.0) else {
                continue;
            };

            let mut damage = self.surfaces[surface].damage.clone();
            let view = &self.views[key];
            damage.intersect_rect(Rect::from_size(0, 0, view.w, view.h));
            damage.transform(&view.global_transform);

            let geom = output.geometry();
            damage.to_output_local(geom.x, geom.y, geom.w, geom.h, geom.transform, output.scale());
            damage.intersect(&view.plane_entries[index].visible);

            self.plane_add_damage(plane, &damage);
        }
    }

    /// Maps a global coordinate into view-local space.
    pub fn view_local_coordinate(&self, key: ViewKey, gx: f64, gy: f64) -> (f64, f64) {
        self.views[key]
            .global_transform_inverse
            .transform_point(gx, gy)
    }

    /// Maps a view-local coordinate into global space.
    pub fn view_global_coordinate(&self, key: ViewKey, lx: f64, ly: f64) -> (f64, f64) {
        self.views[key].global_transform.transform_point(lx, ly)
    }

    /// Picks the front-most view whose surface accepts input at the given
    /// global position, returning the view-local coordinates as well.
    pub fn pick_view(&self, x: f64, y: f64) -> Option<(ViewKey, f64, f64)> {
        for key in &self.view_list {
            let view = &self.views[*key];

            let Some(surface) = view.surface else {
                continue;
            };
            let surface = &self.surfaces[surface];
            if !surface.pickable {
                continue;
            }

            if !view.bounding.contains_point(x as i32, y as i32) {
                continue;
            }

            let (lx, ly) = view.global_transform_inverse.transform_point(x, y);
            let (ilx, ily) = (lx as i32, ly as i32);
            if ilx < 0 || ily < 0 || ilx >= view.w || ily >= view.h {
                continue;
            }

            if !surface.input.contains_point(ilx, ily) {
                continue;
            }

            return Some((*key, lx, ly));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn active_follows_mapped_and_parent() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let parent = state.add_view();
        let child = state.add_view();
        state.view_set_parent(child, Some(parent));

        state.view_map(child);
        state.view_update(child);
        assert!(!state.views[child].active);

        state.view_map(parent);
        state.view_mark_dirty(child, VIEW_ACTIVE_DIRTY);
        state.view_update(child);
        assert!(state.views[parent].active);
        assert!(state.views[child].active);

        state.view_unmap(parent);
        state.view_update(child);
        assert!(!state.views[child].active);
        assert!(state.views[child].mapped);
    }

    #[test]
    fn stack_top_keeps_subtree_contiguous() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let a = state.add_view();
        let a1 = state.add_view();
        let a2 = state.add_view();
        state.view_set_parent(a1, Some(a));
        state.view_set_parent(a2, Some(a));

        let b = state.add_view();
        let c = state.add_view();

        state.view_stack_top(a, true);
        assert_eq!(&state.view_list[..3], &[a, a1, a2]);

        // Every descendant of `a` comes after it and before any outsider.
        let pos = |v| state.view_list.iter().position(|x| *x == v).unwrap();
        assert!(pos(a) < pos(a1) && pos(a1) < pos(b).min(pos(c)));
        assert!(pos(a2) < pos(b).min(pos(c)));

        state.view_stack_bottom(a, true);
        let len = state.view_list.len();
        assert_eq!(&state.view_list[len - 3..], &[a, a1, a2]);

        state.view_stack_above(b, c, false);
        assert_eq!(state.view_below(b), Some(c));
    }

    #[test]
    fn stack_change_emits_event() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let a = state.add_view();
        let _b = state.add_view();

        let fired = std::rc::Rc::new(std::cell::Cell::new(0));
        let fired2 = fired.clone();
        state.add_listener(
            ObjectRef::View(a),
            EventKind::ViewStackChange,
            0,
            std::rc::Rc::new(move |_, _, _| {
                fired2.set(fired2.get() + 1);
            }),
        );

        state.view_stack_top(a, false);
        assert_eq!(fired.get(), 1);

        // Already on top; no event.
        state.view_stack_top(a, false);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn inherit_transform_preserves_global_position() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let parent = state.add_view();
        state.view_set_position(parent, 100.0, 50.0);
        state.view_map(parent);

        let child = state.add_view();
        state.view_set_parent(child, Some(parent));
        state.view_set_position(child, 130.0, 80.0);
        state.view_map(child);
        state.view_update(child);

        let before = state.view_global_coordinate(child, 0.0, 0.0);
        assert_eq!(before, (130.0, 80.0));

        state.view_set_transform_inherit(child, true);
        state.view_update(child);
        let after = state.view_global_coordinate(child, 0.0, 0.0);
        assert_eq!(after, before);
        assert_eq!(state.views[child].position(), (30.0, 30.0));
    }

    #[test]
    fn pick_respects_order_and_input_region() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let back_surface = state.create_surface(None);
        let back = state.add_view();
        state.view_set_surface(back, Some(back_surface));
        state.view_resize(back, 100, 100);
        state.view_map(back);

        let front_surface = state.create_surface(None);
        let front = state.add_view();
        state.view_set_surface(front, Some(front_surface));
        state.view_resize(front, 50, 50);
        state.view_set_position(front, 25.0, 25.0);
        state.view_map(front);

        state.view_stack_top(front, false);
        state.view_update(back);
        state.view_update(front);

        // The front view wins inside its bounds, the back one elsewhere.
        let (hit, lx, ly) = state.pick_view(30.0, 30.0).unwrap();
        assert_eq!(hit, front);
        assert_eq!((lx, ly), (5.0, 5.0));

        let (hit, ..) = state.pick_view(10.0, 10.0).unwrap();
        assert_eq!(hit, back);

        assert_eq!(state.pick_view(200.0, 200.0), None);

        // Shrinking the front input region passes the point through.
        let region = crate::region::Region::from_rect(Rect::from_size(0, 0, 10, 10));
        state.surface_set_input_region(front_surface, Some(&region));
        state.commit_surface(front_surface);

        let (hit, ..) = state.pick_view(30.0, 30.0).unwrap();
        assert_eq!(hit, back);
    }

    #[test]
    fn update_reports_output_overlap() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let output = add_test_output(state, "overlap-0", 1920, 1080);
        let id = state.outputs[&output.0].id();

        let surface = state.create_surface(None);
        let view = state.add_view();
        state.view_set_surface(view, Some(surface));
        state.view_resize(view, 100, 100);
        state.view_map(view);
        state.view_update(view);

        assert_eq!(state.views[view].output_overlap & (1 << id.0), 1 << id.0);

        state.view_set_position(view, 5000.0, 5000.0);
        state.view_update(view);
        assert_eq!(state.views[view].output_overlap, 0);
    }
}
