// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! A Wayland display-server library.
//!
//! The engine accepts connections from graphical clients, owns a scene
//! graph of surfaces and views, dispatches input across seats, and drives
//! per-output repaint cycles with damage tracking. Pixel-level rendering,
//! display enumeration, and input-device decoding stay behind the traits
//! in [`backend`]; the desktop window-management layer lives in [`shell`]
//! and is opt-in via [`shell::desktop_shell_init`].
//!
//! ```no_run
//! # fn run(output_backend: Box<dyn nacre::backend::OutputBackend>) -> anyhow::Result<()> {
//! let mut compositor = nacre::Compositor::new(None)?;
//! nacre::shell::desktop_shell_init(&mut compositor.state);
//!
//! compositor.state.add_output(
//!     output_backend,
//!     "virtual-0",
//!     nacre::Transform::Normal,
//!     1,
//! )?;
//! compositor.run()
//! # }
//! ```

pub mod backend;
pub mod buffer;
pub mod compositor;
pub mod data_device;
mod dispatch;
pub mod input;
pub mod keyboard;
pub mod object;
pub mod output;
pub mod plane;
pub mod pointer;
pub mod region;
pub mod seat;
mod serial;
pub mod shell;
pub mod shm;
pub mod subsurface;
pub mod surface;
pub mod touch;
pub mod transform;
pub mod view;

pub use compositor::{Compositor, State};
pub use object::{Event, EventInfo, EventKind, ListenerId, ObjectId, ObjectRef, UserDataKey};
pub use output::{OutputId, OutputMode};
pub use region::{Rect, Region};
pub use transform::{Matrix, Transform};

/// Errors with a contract-level meaning; protocol violations are posted on
/// the offending wire resource instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("render target belongs to a different renderer")]
    TargetMismatch,
}
