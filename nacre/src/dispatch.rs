// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

mod wl_compositor;
mod wl_data_device;
mod wl_output;
mod wl_seat;
mod wl_shm;
mod wl_subcompositor;
