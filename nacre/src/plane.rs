// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Output compositing layers.
//!
//! Views assigned to the same plane are composited together; planes stack
//! within an output, bottom to top, with the primary plane created first.
//! Each repaint recomputes per-plane visible regions with front-to-back
//! opaque culling.

use crate::{
    compositor::State,
    object::{ObjectCore, ObjectRef},
    output::OutputId,
    region::Region,
    transform::output_matrix,
    view::ViewKey,
};

slotmap::new_key_type! { pub struct PlaneKey; }

pub struct Plane {
    pub(crate) core: ObjectCore,
    pub(crate) output: OutputId,
    /// Views currently assigned to this plane, front-first, rebuilt each
    /// repaint.
    pub(crate) entries: Vec<ViewKey>,
    pub(crate) damage: Region,
    pub(crate) clip: Region,
}

impl Plane {
    pub fn output(&self) -> OutputId {
        self.output
    }

    /// The render list: views on this plane in z order, front first.
    pub fn render_list(&self) -> &[ViewKey] {
        &self.entries
    }

    /// The region that has changed since the backend last processed it.
    pub fn damage_region(&self) -> &Region {
        &self.damage
    }

    /// The region obscured by planes in front of this one. The visible
    /// damage is `damage - clip`.
    pub fn clip_region(&self) -> &Region {
        &self.clip
    }
}

impl State {
    /// Creates a plane on the output. With `below` given, the plane is
    /// stacked directly underneath it; otherwise it goes on top. The first
    /// plane a backend creates is the bottom-most, primary plane.
    pub fn add_plane(&mut self, output: OutputId, below: Option<PlaneKey>) -> Option<PlaneKey> {
        if let Some(below) = below {
            if self.planes.get(below).map(|p| p.output) != Some(output) {
                return None;
            }
        }

        let key = self.planes.insert_with_key(|k| Plane {
            core: self.objects.register(ObjectRef::Plane(k)),
            output,
            entries: Vec::new(),
            damage: Region::new(),
            clip: Region::new(),
        });

        let list = &mut self.outputs.get_mut(&output.0)?.plane_list;
        match below.and_then(|b| list.iter().position(|p| *p == b)) {
            Some(pos) => list.insert(pos, key),
            None => list.push(key),
        }

        Some(key)
    }

    pub fn destroy_plane(&mut self, key: PlaneKey) {
        let Some(plane) = self.planes.get(key) else {
            return;
        };
        let output = plane.output;

        self.finish_object(ObjectRef::Plane(key));

        for view in self.planes[key].entries.clone() {
            self.plane_entry_set_plane(view, output, None);
        }

        if let Some(output) = self.outputs.get_mut(&output.0) {
            output.plane_list.retain(|p| *p != key);
        }

        let plane = self.planes.remove(key).unwrap();
        self.objects.release(plane.core.id());
    }

    /// Accumulates damage on the plane and schedules a repaint of its
    /// output. A `None`-like empty region is ignored.
    pub(crate) fn plane_add_damage(&mut self, key: PlaneKey, damage: &Region) {
        let Some(plane) = self.planes.get_mut(key) else {
            return;
        };

        if damage.is_empty() {
            return;
        }

        plane.damage.union(damage);
        let output = plane.output;
        self.schedule_repaint(output);
    }

    /// Damages the entire output area of the plane.
    pub fn plane_add_damage_whole(&mut self, key: PlaneKey) {
        let Some(plane) = self.planes.get(key) else {
            return;
        };
        let output = plane.output;

        let Some(rect) = self
            .outputs
            .get(&output.0)
            .map(|o| o.geometry_rect().translated(-o.geometry().x, -o.geometry().y))
        else {
            return;
        };

        self.planes[key].damage.union_rect(rect);
        self.schedule_repaint(output);
    }

    /// Subtracts a region the backend has already processed from the
    /// plane's damage.
    pub fn plane_subtract_damage(&mut self, key: PlaneKey, damage: &Region) {
        if let Some(plane) = self.planes.get_mut(key) {
            plane.damage.subtract(damage);
        }
    }

    /// Clears the plane's damage once the backend has processed it.
    pub fn plane_clear_damage(&mut self, key: PlaneKey) {
        if let Some(plane) = self.planes.get_mut(key) {
            plane.damage.clear();
        }
    }

    /// Rebuilds one plane's entry list and visible regions from the
    /// output's view list. `clip` carries the accumulated opaque region of
    /// the planes above, in global space, and grows by this plane's opaque
    /// region.
    pub(crate) fn plane_update(&mut self, key: PlaneKey, view_list: &[ViewKey], clip: &mut Region) {
        let output_id = self.planes[key].output;
        let (geom, scale) = {
            let output = &self.outputs[&output_id.0];
            (output.geometry().clone(), output.scale())
        };
        let output_rect = self.outputs[&output_id.0].geometry_rect();
        let to_output = output_matrix(
            geom.x as f64,
            geom.y as f64,
            geom.w as f64,
            geom.h as f64,
            geom.transform,
            scale,
        );

        let mut plane_clip = Region::new();
        let mut entries = Vec::new();

        for view_key in view_list {
            let index = output_id.0 as usize;
            if self.views[*view_key].plane_entries[index].plane != Some(key) {
                continue;
            }

            entries.push(*view_key);

            let view = &mut self.views[*view_key];
            let entry = &mut view.plane_entries[index];

            if entry.need_transform_update {
                entry.transform = to_output.mul(&view.global_transform);
                entry.inverse = entry
                    .transform
                    .inverse()
                    .unwrap_or_else(crate::transform::Matrix::identity);
                entry.need_transform_update = false;
            }

            // Visible region in output space: what is left of the bounding
            // region after subtracting everything already known opaque in
            // front, clipped to the output.
            let mut visible = view.bounding.clone();
            visible.subtract(&plane_clip);
            visible.intersect_rect(output_rect);
            visible.to_output_local(geom.x, geom.y, geom.w, geom.h, geom.transform, scale);
            entry.visible = visible;

            // This view's opaque region occludes everything below it.
            let opaque = view.opaque.clone();
            plane_clip.union(&opaque);

            let (need_damage, visible) = {
                let entry = &mut self.views[*view_key].plane_entries[index];
                (std::mem::take(&mut entry.need_damage), entry.visible.clone())
            };
            if need_damage {
                self.plane_add_damage(key, &visible);
            }

            // Flush any pending surface damage (e.g. texture uploads).
            if let Some(surface) = self.views[*view_key].surface {
                self.surface_flush_damage(surface);
            }
        }

        self.planes[key].entries = entries;
        self.planes[key].clip = clip.clone();

        let mut output_local_clip = plane_clip;
        output_local_clip.to_output_local(geom.x, geom.y, geom.w, geom.h, geom.transform, scale);
        clip.union(&output_local_clip);
    }
}
