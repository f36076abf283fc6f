// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{
    protocol::{wl_shell, wl_shell_surface},
    Resource as _,
};

use crate::{
    compositor::State,
    seat::SeatKey,
    shell::{
        surface::{FullscreenMethod, ShellSurfaceKey, ShellSurfaceResource},
        ShellClient, ShellClientKey, ShellClientKind,
    },
    surface::SurfaceKey,
};

impl wayland_server::GlobalDispatch<wl_shell::WlShell, ()> for State {
    fn bind(
        state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_shell::WlShell>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let Some(shell) = state.shell.as_mut() else {
            data_init.init(resource, ShellClientKey::default());
            return;
        };

        shell.clients.insert_with_key(|k| ShellClient {
            kind: ShellClientKind::WlShell(data_init.init(resource, k)),
            ping_timer: None,
            need_pong: false,
            ping_serial: 0,
            unresponsive: false,
        });
    }
}

impl wayland_server::Dispatch<wl_shell::WlShell, ShellClientKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_shell::WlShell,
        request: wl_shell::Request,
        data: &ShellClientKey,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_shell::Request::GetShellSurface { id, surface } => {
                let surface_key = *surface.data::<SurfaceKey>().unwrap();

                if !state.surface_set_role(surface_key, "wl_shell_surface") {
                    resource.post_error(
                        wl_shell::Error::Role,
                        "surface already has a role".to_string(),
                    );
                    return;
                }

                let key = state.create_shell_surface(Some(*data), surface_key);
                let shsurf_resource = data_init.init(id, key);

                let shell = state.shell.as_mut().unwrap();
                shell.surfaces[key].resource =
                    Some(ShellSurfaceResource::WlShell(shsurf_resource));
            }
            _ => unreachable!(),
        }
    }
}

impl wayland_server::Dispatch<wl_shell_surface::WlShellSurface, ShellSurfaceKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_shell_surface::WlShellSurface,
        request: wl_shell_surface::Request,
        data: &ShellSurfaceKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let key = *data;

        match request {
            wl_shell_surface::Request::Pong { serial } => {
                if let Some(client) = state
                    .shell_ref()
                    .and_then(|s| s.surfaces.get(key))
                    .and_then(|s| s.client)
                {
                    state.shell_client_handle_pong(client, serial);
                }
            }
            wl_shell_surface::Request::Move { seat, serial } => {
                let seat = *seat.data::<SeatKey>().unwrap();
                state.shell_surface_move(key, seat, serial);
            }
            wl_shell_surface::Request::Resize {
                seat,
                serial,
                edges,
            } => {
                let seat = *seat.data::<SeatKey>().unwrap();
                let edges = edges
                    .into_result()
                    .map(|e| e.bits())
                    .unwrap_or(0);
                state.shell_surface_resize(key, seat, serial, edges);
            }
            wl_shell_surface::Request::SetToplevel => {
                state.shell_surface_set_toplevel(key);
            }
            wl_shell_surface::Request::SetTransient {
                parent,
                x,
                y,
                flags: _,
            } => {
                let parent = *parent.data::<SurfaceKey>().unwrap();
                state.shell_surface_set_transient(key, parent, x as f64, y as f64);
            }
            wl_shell_surface::Request::SetFullscreen {
                method,
                framerate,
                output,
            } => {
                let output = output
                    .as_ref()
                    .and_then(|o| o.data::<crate::output::OutputId>())
                    .copied();

                let method = match method.into_result() {
                    Ok(wl_shell_surface::FullscreenMethod::Scale) => FullscreenMethod::Scale,
                    Ok(wl_shell_surface::FullscreenMethod::Driver) => FullscreenMethod::Driver,
                    Ok(wl_shell_surface::FullscreenMethod::Fill) => FullscreenMethod::Fill,
                    _ => FullscreenMethod::Default,
                };

                state.shell_surface_set_fullscreen(key, output, method, framerate);
            }
            wl_shell_surface::Request::SetPopup {
                seat,
                serial,
                parent,
                x,
                y,
                flags: _,
            } => {
                let seat = *seat.data::<SeatKey>().unwrap();
                let parent = *parent.data::<SurfaceKey>().unwrap();
                state.shell_surface_set_popup(key, Some(seat), parent, x as f64, y as f64, serial);
            }
            wl_shell_surface::Request::SetMaximized { output } => {
                let output = output
                    .as_ref()
                    .and_then(|o| o.data::<crate::output::OutputId>())
                    .copied();
                state.shell_surface_set_maximized(key, output);
            }
            wl_shell_surface::Request::SetTitle { title } => {
                state.shell_surface_set_title(key, &title);
            }
            wl_shell_surface::Request::SetClass { class_ } => {
                state.shell_surface_set_class(key, &class_);
            }
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_shell_surface::WlShellSurface,
        data: &ShellSurfaceKey,
    ) {
        if let Some(shsurf) = state.shell_mut().and_then(|s| s.surfaces.get_mut(*data)) {
            shsurf.resource = None;
        }
    }
}
