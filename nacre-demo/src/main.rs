// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! A headless compositor: one virtual output ticking at a fixed refresh
//! rate, the desktop shell, and no rendering. Useful for driving clients
//! in tests and for poking at the engine with WAYLAND_DEBUG=1.

use std::time;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use wayland_server::protocol::wl_output;

use nacre::{
    backend::OutputBackend,
    output::{OutputMode, MODE_CURRENT, MODE_PREFERRED},
    plane::PlaneKey,
    surface::SurfaceKey,
    view::ViewKey,
    OutputId, State, Transform,
};

#[derive(Parser)]
#[command(name = "nacre-demo", about)]
struct Args {
    /// Socket name to listen on (defaults to the first free wayland-N).
    #[arg(long)]
    socket: Option<String>,

    #[arg(long, default_value_t = 1920)]
    width: i32,

    #[arg(long, default_value_t = 1080)]
    height: i32,

    /// Refresh rate in milli-hertz.
    #[arg(long, default_value_t = 60_000)]
    refresh: i32,
}

/// An output with no pixels behind it. Frame completions come from a
/// timer ticking at the mode's refresh rate.
struct HeadlessOutput {
    mode: OutputMode,
    primary: Option<PlaneKey>,
}

impl HeadlessOutput {
    fn new(width: i32, height: i32, refresh: i32) -> Self {
        Self {
            mode: OutputMode {
                w: width,
                h: height,
                refresh,
                flags: MODE_CURRENT | MODE_PREFERRED,
            },
            primary: None,
        }
    }

    fn frame_interval(&self) -> time::Duration {
        time::Duration::from_secs_f64(1000.0 / self.mode.refresh.max(1) as f64)
    }
}

impl OutputBackend for HeadlessOutput {
    fn subpixel_order(&self) -> wl_output::Subpixel {
        wl_output::Subpixel::Unknown
    }

    fn maker_name(&self) -> String {
        "nacre".to_owned()
    }

    fn model_name(&self) -> String {
        "headless".to_owned()
    }

    fn mode_count(&self) -> usize {
        1
    }

    fn mode(&self, index: usize) -> Option<OutputMode> {
        (index == 0).then_some(self.mode)
    }

    fn set_mode(&mut self, mode: &OutputMode) -> bool {
        self.mode.w = mode.w;
        self.mode.h = mode.h;
        self.mode.refresh = mode.refresh;
        true
    }

    fn assign_planes(&mut self, state: &mut State, output: OutputId, views: &[ViewKey]) {
        let primary = match self.primary {
            Some(plane) => plane,
            None => {
                let plane = state.add_plane(output, None).expect("output went away");
                self.primary = Some(plane);
                plane
            }
        };

        for view in views {
            state.view_assign_plane(*view, output, Some(primary));
        }
    }

    fn start_repaint_loop(&mut self, state: &mut State, output: OutputId) {
        state.add_timer(time::Duration::ZERO, move |state| {
            state.finish_frame(output, None);
        });
    }

    fn repaint(&mut self, state: &mut State, output: OutputId, planes: &[PlaneKey]) {
        // Nothing draws; accepting the damage is the whole job.
        for plane in planes {
            state.plane_clear_damage(*plane);
        }

        let interval = self.frame_interval();
        state.add_timer(interval, move |state| {
            state.finish_frame(output, None);
        });
    }

    fn attach_surface(&mut self, state: &State, surface: SurfaceKey) -> Option<(i32, i32)> {
        // Shm buffers carry their dimensions; nothing else is supported
        // headlessly.
        let buffer = state.surface(surface)?.buffer()?;
        let info = state.buffer(buffer)?.shm_info()?;
        Some((info.width, info.height))
    }

    fn flush_surface_damage(&mut self, _state: &State, _surface: SurfaceKey) -> bool {
        // The client buffer is the only copy of the content.
        true
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut compositor =
        nacre::Compositor::new(args.socket.as_deref()).context("creating compositor")?;

    nacre::shell::desktop_shell_init(&mut compositor.state);

    compositor.state.add_output(
        Box::new(HeadlessOutput::new(args.width, args.height, args.refresh)),
        "headless-0",
        Transform::Normal,
        1,
    )?;

    info!(
        socket = ?compositor.state.socket_name(),
        width = args.width,
        height = args.height,
        "compositor running"
    );

    compositor.run()
}
