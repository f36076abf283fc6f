// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Outputs and the per-output repaint pipeline.
//!
//! Repaints are batched: surface commits mark views dirty and schedule a
//! repaint, which runs when the backend reports the previous frame is
//! finished (or immediately on the first frame of a loop). The repaint
//! updates every view, rebuilds the output's view list, lets the backend
//! distribute views over planes, recomputes per-plane visible regions, and
//! retires frame callbacks.

use tracing::trace;
use wayland_server::{backend::GlobalId, protocol::wl_output, Resource as _};

use crate::{
    compositor::State,
    backend::OutputBackend,
    object::{Event, EventKind, ObjectCore, ObjectRef},
    plane::PlaneKey,
    region::{Rect, Region},
    transform::Transform,
    view::ViewKey,
};

/// One bit per output in the compositor's id allocator.
pub const MAX_OUTPUT_COUNT: usize = 32;

const FPS_TICK_COUNT: usize = 10;

pub const MODE_INVALID: u32 = 0x1;
pub const MODE_CURRENT: u32 = 0x2;
pub const MODE_PREFERRED: u32 = 0x4;

/// A display mode. Refresh is in milli-hertz.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct OutputMode {
    pub w: i32,
    pub h: i32,
    pub refresh: i32,
    pub flags: u32,
}

fn mode_flags_to_wl(flags: u32) -> wl_output::Mode {
    wl_output::Mode::from_bits_truncate((flags & (MODE_CURRENT | MODE_PREFERRED)) >> 1)
}

/// The output's id doubles as its bit index in view overlap masks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OutputId(pub(crate) u32);

impl OutputId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct OutputGeometry {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub subpixel: wl_output::Subpixel,
    pub maker: String,
    pub model: String,
    pub transform: Transform,
}

#[derive(Default)]
pub(crate) struct FrameState {
    pub scheduled: bool,
    pub pending: bool,
    pub time: Option<rustix::time::Timespec>,
    pub count: u32,

    pub print_fps: bool,
    pub ticks: [u32; FPS_TICK_COUNT],
    pub tick_index: usize,
    pub total_time: u32,
}

pub struct Output {
    pub(crate) core: ObjectCore,
    pub(crate) id: OutputId,
    pub(crate) name: String,

    pub(crate) global: Option<GlobalId>,
    pub(crate) resources: Vec<wl_output::WlOutput>,

    pub(crate) geometry: OutputGeometry,
    pub(crate) scale: i32,
    pub(crate) current_mode: OutputMode,

    pub(crate) backend: Option<Box<dyn OutputBackend>>,

    pub(crate) frame: FrameState,

    /// Planes, bottom to top; the primary plane is created first.
    pub(crate) plane_list: Vec<PlaneKey>,
    /// Views overlapping this output in z order, rebuilt each repaint.
    pub(crate) view_list: Vec<ViewKey>,
}

impl Output {
    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &OutputGeometry {
        &self.geometry
    }

    /// The output's rectangle in the global space.
    pub fn geometry_rect(&self) -> Rect {
        Rect::from_size(self.geometry.x, self.geometry.y, self.geometry.w, self.geometry.h)
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }

    pub fn current_mode(&self) -> &OutputMode {
        &self.current_mode
    }

    pub fn planes(&self) -> &[PlaneKey] {
        &self.plane_list
    }

    pub fn view_list(&self) -> &[ViewKey] {
        &self.view_list
    }

    /// The time of the last finished frame, in milliseconds.
    pub(crate) fn frame_time_msec(&self) -> u32 {
        match self.frame.time {
            Some(ts) => (ts.tv_sec as i64 * 1000 + ts.tv_nsec as i64 / 1_000_000) as u32,
            None => 0,
        }
    }

    fn logical_size_for_mode(&self, mode: &OutputMode) -> (i32, i32) {
        if self.geometry.transform.swaps_axes() {
            (mode.h / self.scale, mode.w / self.scale)
        } else {
            (mode.w / self.scale, mode.h / self.scale)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("an output named {0:?} already exists")]
    NameTaken(String),
    #[error("all {MAX_OUTPUT_COUNT} output ids are in use")]
    IdsExhausted,
}

impl State {
    /// Creates an output backed by `backend` and announces its global.
    pub fn add_output(
        &mut self,
        backend: Box<dyn OutputBackend>,
        name: &str,
        transform: Transform,
        scale: i32,
    ) -> Result<OutputId, OutputError> {
        if self.outputs.values().any(|o| o.name == name) {
            return Err(OutputError::NameTaken(name.to_owned()));
        }

        let raw = (!self.output_ids).trailing_zeros();
        if raw >= MAX_OUTPUT_COUNT as u32 {
            return Err(OutputError::IdsExhausted);
        }

        let id = OutputId(raw);
        self.output_ids |= 1 << raw;

        let geometry = OutputGeometry {
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            subpixel: backend.subpixel_order(),
            maker: backend.maker_name(),
            model: backend.model_name(),
            transform,
        };

        let print_fps = std::env::var("NACRE_DEBUG_FPS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(0)
            != 0;

        let output = Output {
            core: self.objects.register(ObjectRef::Output(id)),
            id,
            name: name.to_owned(),
            global: None,
            resources: Vec::new(),
            geometry,
            scale: scale.max(1),
            current_mode: OutputMode::default(),
            backend: Some(backend),
            frame: FrameState {
                print_fps,
                ..Default::default()
            },
            plane_list: Vec::new(),
            view_list: Vec::new(),
        };

        self.outputs.insert(raw, output);
        self.output_refresh_mode(id);

        let global = self.dh.create_global::<State, wl_output::WlOutput, OutputId>(2, id);
        self.outputs.get_mut(&raw).unwrap().global = Some(global);

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::OutputAdd, ObjectRef::Output(id)),
        );

        Ok(id)
    }

    pub fn destroy_output(&mut self, id: OutputId) {
        if !self.outputs.contains_key(&id.0) {
            return;
        }

        self.emit(
            ObjectRef::Compositor,
            Event::with_object(EventKind::OutputRemove, ObjectRef::Output(id)),
        );
        self.finish_object(ObjectRef::Output(id));

        for plane in self.outputs[&id.0].plane_list.clone() {
            self.destroy_plane(plane);
        }

        let mut output = self.outputs.remove(&id.0).unwrap();
        if let Some(mut backend) = output.backend.take() {
            backend.destroy();
        }
        if let Some(global) = output.global.take() {
            self.dh.remove_global::<State>(global);
        }

        self.output_ids &= !(1 << id.0);
        self.repaint_idle.retain(|o| *o != id);
        self.objects.release(output.core.id());
    }

    pub fn find_output(&self, name: &str) -> Option<OutputId> {
        self.outputs
            .values()
            .find(|o| o.name == name)
            .map(|o| o.id)
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id.0)
    }

    pub fn output_ids(&self) -> Vec<OutputId> {
        self.outputs.keys().map(|id| OutputId(*id)).collect()
    }

    /// Moves the output's origin in global space.
    pub fn output_move(&mut self, id: OutputId, x: i32, y: i32) {
        let Some(output) = self.outputs.get_mut(&id.0) else {
            return;
        };

        if output.geometry.x == x && output.geometry.y == y {
            return;
        }

        output.geometry.x = x;
        output.geometry.y = y;

        self.output_send_geometry(id);
        self.emit(ObjectRef::Output(id), Event::new(EventKind::OutputMove));
        self.schedule_repaint(id);
    }

    pub fn output_mode_count(&self, id: OutputId) -> usize {
        self.outputs
            .get(&id.0)
            .and_then(|o| o.backend.as_ref())
            .map(|b| b.mode_count())
            .unwrap_or(0)
    }

    pub fn output_mode(&self, id: OutputId, index: usize) -> Option<OutputMode> {
        self.outputs.get(&id.0)?.backend.as_ref()?.mode(index)
    }

    /// Switches the output mode through the backend. Backends should call
    /// [`State::output_mode_changed`] once the mode is actually applied.
    pub fn output_set_mode(&mut self, id: OutputId, mode: &OutputMode) -> bool {
        let Some(output) = self.outputs.get_mut(&id.0) else {
            return false;
        };
        let current = output.current_mode;
        if current.w == mode.w && current.h == mode.h && current.refresh == mode.refresh {
            return true;
        }

        let ok = output
            .backend
            .as_mut()
            .map(|b| b.set_mode(mode))
            .unwrap_or(false);
        if ok {
            self.output_mode_changed(id);
        }

        ok
    }

    /// Backend upcall: re-reads the current mode and broadcasts it.
    pub fn output_mode_changed(&mut self, id: OutputId) {
        self.output_refresh_mode(id);
        self.emit(ObjectRef::Output(id), Event::new(EventKind::OutputModeChange));

        for plane in self.outputs[&id.0].plane_list.clone() {
            self.plane_add_damage_whole(plane);
        }
    }

    fn output_refresh_mode(&mut self, id: OutputId) {
        let count = self.output_mode_count(id);
        let mut current = None;
        for index in 0..count {
            match self.output_mode(id, index) {
                Some(mode) if mode.flags & MODE_CURRENT != 0 => {
                    current = Some(mode);
                    break;
                }
                _ => (),
            }
        }

        let Some(mode) = current else {
            return;
        };

        let output = self.outputs.get_mut(&id.0).unwrap();
        output.current_mode = mode;
        let (w, h) = output.logical_size_for_mode(&mode);
        output.geometry.w = w;
        output.geometry.h = h;

        for resource in &output.resources {
            resource.mode(mode_flags_to_wl(mode.flags), mode.w, mode.h, mode.refresh);
            resource.done();
        }
    }

    fn output_send_geometry(&mut self, id: OutputId) {
        let output = &self.outputs[&id.0];
        for resource in &output.resources {
            resource.geometry(
                output.geometry.x,
                output.geometry.y,
                output.geometry.w,
                output.geometry.h,
                output.geometry.subpixel,
                output.geometry.maker.clone(),
                output.geometry.model.clone(),
                output.geometry.transform.to_wl(),
            );
        }
    }

    /// Sends the full output description to a newly bound resource.
    pub(crate) fn output_send_initial_state(&mut self, id: OutputId, resource: &wl_output::WlOutput) {
        let Some(output) = self.outputs.get(&id.0) else {
            return;
        };

        resource.geometry(
            output.geometry.x,
            output.geometry.y,
            output.geometry.w,
            output.geometry.h,
            output.geometry.subpixel,
            output.geometry.maker.clone(),
            output.geometry.model.clone(),
            output.geometry.transform.to_wl(),
        );
        resource.scale(output.scale);

        for index in 0..self.output_mode_count(id) {
            if let Some(mode) = self.output_mode(id, index) {
                resource.mode(mode_flags_to_wl(mode.flags), mode.w, mode.h, mode.refresh);
            }
        }

        resource.done();
    }

    /// Adds damage to every plane of the output.
    pub fn output_add_damage(&mut self, id: OutputId, damage: Option<&Region>) {
        let Some(output) = self.outputs.get(&id.0) else {
            return;
        };

        for plane in output.plane_list.clone() {
            match damage {
                Some(damage) => self.plane_add_damage(plane, damage),
                None => self.plane_add_damage_whole(plane),
            }
        }
    }

    /// Requests a repaint for the output, coalescing with other pending
    /// requests. If a frame is in flight the repaint runs when it finishes.
    pub fn schedule_repaint(&mut self, id: OutputId) {
        let Some(output) = self.outputs.get_mut(&id.0) else {
            return;
        };

        if output.frame.scheduled {
            return;
        }
        output.frame.scheduled = true;

        if output.frame.pending {
            return;
        }

        // Batched into the next idle tick so commits coalesce.
        if !self.repaint_idle.contains(&id) {
            self.repaint_idle.push(id);
        }
    }

    pub(crate) fn schedule_repaint_all(&mut self) {
        for id in self.output_ids() {
            self.schedule_repaint(id);
        }
    }

    /// Runs the batched repaint starts. Called by the event loop once per
    /// dispatch round.
    pub fn flush_idle_repaints(&mut self) {
        let pending = std::mem::take(&mut self.repaint_idle);
        for id in pending {
            let Some(mut backend) = self.outputs.get_mut(&id.0).and_then(|o| o.backend.take())
            else {
                continue;
            };

            backend.start_repaint_loop(self, id);

            if let Some(output) = self.outputs.get_mut(&id.0) {
                output.backend = Some(backend);
            }
        }
    }

    /// Backend upcall: the frame the backend was presenting is done. Must
    /// be called exactly once per frame; runs the next repaint if one is
    /// scheduled.
    pub fn finish_frame(&mut self, id: OutputId, ts: Option<rustix::time::Timespec>) {
        let time = ts.unwrap_or_else(|| self.current_time());

        let Some(output) = self.outputs.get_mut(&id.0) else {
            return;
        };

        output.frame.pending = false;

        if output.frame.print_fps && output.frame.count > 0 {
            if let Some(last) = output.frame.time {
                let tick = ((time.tv_sec - last.tv_sec) * 1000
                    + (time.tv_nsec - last.tv_nsec) / 1_000_000) as u32;

                output.frame.total_time += tick;
                output.frame.total_time -= output.frame.ticks[output.frame.tick_index];
                output.frame.ticks[output.frame.tick_index] = tick;

                output.frame.tick_index = (output.frame.tick_index + 1) % FPS_TICK_COUNT;

                let tick_count = (output.frame.count as usize).min(FPS_TICK_COUNT);
                if output.frame.total_time > 0 {
                    trace!(
                        output = %output.name,
                        fps = (tick_count as f64 * 1000.0) / output.frame.total_time as f64,
                        "frame finished"
                    );
                }
            }
        }

        output.frame.count += 1;
        output.frame.time = Some(time);

        if output.frame.scheduled {
            self.repaint_output(id);
        }
    }

    /// One full repaint of the output.
    pub(crate) fn repaint_output(&mut self, id: OutputId) {
        // Settle dirty geometry and active flags first.
        for view in self.view_list.clone() {
            self.view_update(view);
        }

        // Views visible on this output, front to back. Everything else is
        // detached from whatever plane it held here.
        let mut view_list = Vec::new();
        for view_key in self.view_list.clone() {
            let view = &self.views[view_key];
            let visible =
                view.active && view.output_overlap & (1 << id.0) != 0 && view.surface.is_some();

            if visible {
                view_list.push(view_key);
            } else {
                self.view_assign_plane(view_key, id, None);
            }
        }
        self.outputs.get_mut(&id.0).unwrap().view_list = view_list.clone();

        if let Some(mut backend) = self.outputs.get_mut(&id.0).and_then(|o| o.backend.take()) {
            backend.assign_planes(self, id, &view_list);
            if let Some(output) = self.outputs.get_mut(&id.0) {
                output.backend = Some(backend);
            }
        }

        // Update planes top to bottom, accumulating the opaque clip.
        let plane_list = self.outputs[&id.0].plane_list.clone();
        let mut clip = Region::new();
        for plane in plane_list.iter().rev() {
            self.plane_update(*plane, &view_list, &mut clip);
        }

        if let Some(mut backend) = self.outputs.get_mut(&id.0).and_then(|o| o.backend.take()) {
            backend.repaint(self, id, &plane_list);
            if let Some(output) = self.outputs.get_mut(&id.0) {
                output.backend = Some(backend);
            }
        }

        let time = {
            let output = self.outputs.get_mut(&id.0).unwrap();
            output.frame.pending = true;
            output.frame.scheduled = false;
            output.frame_time_msec()
        };

        for view_key in view_list {
            if let Some(surface) = self.views.get(view_key).and_then(|v| v.surface) {
                self.surface_send_frame_callbacks(surface, time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_util::*;
    use pretty_assertions::assert_eq;

    fn mode(w: i32, h: i32, flags: u32) -> OutputMode {
        OutputMode {
            w,
            h,
            refresh: 60_000,
            flags,
        }
    }

    #[test]
    fn schedule_repaint_coalesces_into_one_loop_start() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (output, log) = stub_output(state, "out-0", vec![mode(640, 480, MODE_CURRENT)]);

        state.schedule_repaint(output);
        state.schedule_repaint(output);
        state.schedule_repaint(output);
        assert_eq!(state.repaint_idle.len(), 1);

        state.flush_idle_repaints();
        assert!(state.repaint_idle.is_empty());
        assert_eq!(log.borrow().start_loops, 1);
        assert_eq!(log.borrow().repaints.len(), 0);

        // The loop start completes the first frame, which runs the one
        // batched repaint.
        fix.pump();
        assert_eq!(log.borrow().repaints.len(), 1);
    }

    #[test]
    fn repaint_waits_for_the_frame_in_flight() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (output, log) = stub_output(state, "out-0", vec![mode(640, 480, MODE_CURRENT)]);

        state.schedule_repaint(output);
        fix.pump();

        let state = &mut fix.state;
        assert!(state.outputs[&output.raw()].frame.pending);
        assert_eq!(log.borrow().repaints.len(), 1);

        // Scheduling mid-frame neither starts a new loop nor repaints; the
        // frame completion drains the scheduled flag.
        state.schedule_repaint(output);
        assert!(state.repaint_idle.is_empty());
        assert_eq!(log.borrow().repaints.len(), 1);

        state.finish_frame(output, None);
        assert_eq!(log.borrow().repaints.len(), 2);
        assert_eq!(log.borrow().start_loops, 1);
    }

    #[test]
    fn finish_frame_without_scheduled_repaint_idles() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (output, log) = stub_output(state, "out-0", vec![mode(640, 480, MODE_CURRENT)]);

        state.finish_frame(output, None);

        assert_eq!(log.borrow().repaints.len(), 0);
        let frame = &state.outputs[&output.raw()].frame;
        assert!(!frame.pending);
        assert!(!frame.scheduled);
        assert_eq!(frame.count, 1);
        assert!(frame.time.is_some());
    }

    #[test]
    fn finish_frame_runs_the_scheduled_repaint() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (output, log) = stub_output(state, "out-0", vec![mode(640, 480, MODE_CURRENT)]);

        state.schedule_repaint(output);
        state.finish_frame(output, None);

        assert_eq!(log.borrow().repaints.len(), 1);
        let frame = &state.outputs[&output.raw()].frame;
        assert!(frame.pending);
        assert!(!frame.scheduled);
    }

    #[test]
    fn set_mode_updates_current_mode_and_geometry() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;
        let (output, log) = stub_output(
            state,
            "out-0",
            vec![mode(640, 480, MODE_CURRENT), mode(1024, 768, 0)],
        );

        let target = mode(1024, 768, 0);
        assert!(state.output_set_mode(output, &target));
        assert_eq!(log.borrow().set_modes.len(), 1);

        let o = state.output(output).unwrap();
        assert_eq!((o.current_mode().w, o.current_mode().h), (1024, 768));
        assert_eq!((o.geometry().w, o.geometry().h), (1024, 768));

        // Setting the already-current mode succeeds without a backend call.
        assert!(state.output_set_mode(output, &target));
        assert_eq!(log.borrow().set_modes.len(), 1);
    }
}
