// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The private shell-helper global: a trusted client supplies the
//! compositor cursor surface.

use wayland_server::Resource as _;

use crate::{compositor::State, shell::protocols::nacre_shell, surface::SurfaceKey};

impl wayland_server::GlobalDispatch<nacre_shell::NacreShell, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<nacre_shell::NacreShell>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl wayland_server::Dispatch<nacre_shell::NacreShell, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &nacre_shell::NacreShell,
        request: nacre_shell::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            nacre_shell::Request::SetCursor { surface } => {
                let surface_key = *surface.data::<SurfaceKey>().unwrap();

                let cursor_view = match state.shell_ref().and_then(|s| s.cursor_view) {
                    Some(view) => view,
                    None => {
                        let view = state.add_view();
                        if let Some(shell) = state.shell_mut() {
                            shell.cursor_view = Some(view);
                        }
                        view
                    }
                };

                if state.views[cursor_view].surface() == Some(surface_key) {
                    return;
                }

                if !state.surface_set_role(surface_key, "nacre_cursor") {
                    resource.post_error(
                        nacre_shell::Error::Role,
                        "surface already has a role".to_string(),
                    );
                    return;
                }

                state.view_set_surface(cursor_view, Some(surface_key));
                state.view_map(cursor_view);
            }
            nacre_shell::Request::Destroy => (),
            _ => unreachable!(),
        }
    }
}
