// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Interfaces the core consumes from external backend implementations.
//!
//! Output backends drive physical (or virtual) displays and own the vsync
//! source; they must call [`State::finish_frame`] exactly once per frame.
//! Renderers paint plane render lists into a target. Input device backends
//! expose device capabilities and properties, and push decoded events via
//! [`State::post_device_event`].
//!
//! [`State::finish_frame`]: crate::State::finish_frame
//! [`State::post_device_event`]: crate::State::post_device_event

use std::sync::atomic::{AtomicU64, Ordering};

use wayland_server::protocol::{wl_output, wl_shm};

use crate::{
    compositor::State,
    output::{OutputId, OutputMode},
    plane::PlaneKey,
    region::{Rect, Region},
    surface::SurfaceKey,
    view::ViewKey,
    Error,
};

pub trait OutputBackend {
    fn destroy(&mut self) {}

    fn subpixel_order(&self) -> wl_output::Subpixel;
    fn maker_name(&self) -> String;
    fn model_name(&self) -> String;

    fn mode_count(&self) -> usize;
    fn mode(&self, index: usize) -> Option<OutputMode>;
    fn set_mode(&mut self, mode: &OutputMode) -> bool;

    /// Distributes the output's views over planes. Views the backend does
    /// not move stay on whatever plane they were assigned to before; the
    /// backend is responsible for putting new views on its primary plane.
    fn assign_planes(&mut self, state: &mut State, output: OutputId, views: &[ViewKey]);

    /// Kicks off the frame loop. The backend must arrange for
    /// `finish_frame` to be called once it is ready to draw.
    fn start_repaint_loop(&mut self, state: &mut State, output: OutputId);

    /// Paints the planes. The backend consumes (and then clears or
    /// subtracts) each plane's damage region.
    fn repaint(&mut self, state: &mut State, output: OutputId, planes: &[PlaneKey]);

    /// Lets the backend's renderer attach the surface's current buffer,
    /// reporting the buffer dimensions back to the core.
    fn attach_surface(&mut self, state: &State, surface: SurfaceKey) -> Option<(i32, i32)>;

    /// Uploads pending surface damage (e.g. shared-memory texture uploads).
    /// Returns true if the core must keep the client buffer alive after the
    /// flush.
    fn flush_surface_damage(&mut self, state: &State, surface: SurfaceKey) -> bool;
}

/// Capabilities and properties of a device, opaque to the core.
pub trait InputDeviceBackend {
    fn property(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RendererId(u64);

impl RendererId {
    pub fn unique() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A render destination created by (and only usable with) one renderer.
pub trait RenderTarget {
    fn renderer(&self) -> RendererId;

    /// Frames since this target's back buffer was last presented; `None`
    /// when unknown, forcing a full repaint.
    fn buffer_age(&self) -> Option<usize> {
        None
    }
}

pub trait Renderer {
    fn id(&self) -> RendererId;

    /// Makes `target` current. Targets belong to the renderer that created
    /// them; anything else is rejected.
    fn set_target(&mut self, target: Box<dyn RenderTarget>) -> Result<(), Error>;

    fn attach_surface(&mut self, state: &State, surface: SurfaceKey) -> Option<(i32, i32)>;
    fn flush_surface_damage(&mut self, state: &State, surface: SurfaceKey) -> bool;

    fn read_pixels(&mut self, rect: Rect, format: wl_shm::Format) -> Option<Vec<u8>>;

    fn repaint_output(
        &mut self,
        state: &State,
        output: OutputId,
        render_list: &[ViewKey],
        damage: &Region,
    );
}

/// The ownership check behind [`Renderer::set_target`].
pub fn check_target(renderer: &dyn Renderer, target: &dyn RenderTarget) -> Result<(), Error> {
    if renderer.id() == target.renderer() {
        Ok(())
    } else {
        Err(Error::TargetMismatch)
    }
}

/// How many frames of damage a renderer keeps for buffer-age repaints.
pub const MAX_BUFFER_COUNT: usize = 3;

/// The damage ring used by double- or triple-buffered renderers. If the
/// target reports its back buffer is `n` frames old, the repaint region is
/// the incoming damage plus the damage of the `n - 1` frames in between;
/// without a usable age the whole output is repainted.
#[derive(Default)]
pub struct DamageHistory {
    damages: [Region; MAX_BUFFER_COUNT],
    index: usize,
}

impl DamageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the damage drawn into the current back buffer.
    pub fn push(&mut self, damage: Region) {
        self.damages[self.index] = damage;
        self.index = (self.index + 1) % MAX_BUFFER_COUNT;
    }

    /// The region to repaint for a back buffer of the given age, before the
    /// current frame's damage is pushed.
    pub fn accumulate(&self, age: Option<usize>, incoming: &Region, output_rect: Rect) -> Region {
        let Some(age) = age else {
            return Region::from_rect(output_rect);
        };

        if age == 0 || age > MAX_BUFFER_COUNT {
            return Region::from_rect(output_rect);
        }

        let mut out = incoming.clone();
        for i in 1..age {
            let slot = (self.index + MAX_BUFFER_COUNT - i) % MAX_BUFFER_COUNT;
            out.union(&self.damages[slot]);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn r(x: i32, y: i32, w: i32, h: i32) -> Region {
        Region::from_rect(Rect::from_size(x, y, w, h))
    }

    #[test]
    fn damage_history_accumulates_by_age() {
        let mut history = DamageHistory::new();
        let output = Rect::from_size(0, 0, 1920, 1080);

        history.push(r(0, 0, 10, 10)); // two frames ago
        history.push(r(50, 50, 10, 10)); // last frame

        let incoming = r(100, 100, 10, 10);

        // Age 1: the buffer already contains last frame's content.
        assert_eq!(history.accumulate(Some(1), &incoming, output), incoming);

        // Age 2: also repaint what changed last frame.
        let mut expected = incoming.clone();
        expected.union(&r(50, 50, 10, 10));
        assert_eq!(history.accumulate(Some(2), &incoming, output), expected);

        // Age 3: both stored frames.
        expected.union(&r(0, 0, 10, 10));
        assert_eq!(history.accumulate(Some(3), &incoming, output), expected);

        // Unknown or out-of-range age: full repaint.
        assert_eq!(
            history.accumulate(None, &incoming, output),
            Region::from_rect(output)
        );
        assert_eq!(
            history.accumulate(Some(4), &incoming, output),
            Region::from_rect(output)
        );
    }
}
