// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The xdg-shell window-management protocol.
//!
//! Role assignment happens at `get_toplevel`/`get_popup`; the configure
//! serial handed out on `xdg_surface.configure` gates mapping until the
//! client acks it.

use wayland_protocols::xdg::shell::server::{
    xdg_popup, xdg_positioner, xdg_surface, xdg_toplevel, xdg_wm_base,
};
use wayland_server::Resource as _;

use crate::{
    compositor::State,
    region::Rect,
    seat::SeatKey,
    shell::{
        surface::{FullscreenMethod, ShellSurfaceKey, ShellSurfaceResource, ShellSurfaceType},
        Positioner, PositionerKey, ShellClient, ShellClientKey, ShellClientKind,
    },
    surface::SurfaceKey,
};

#[derive(Debug, Copy, Clone)]
pub(crate) struct XdgSurfaceData {
    pub client: ShellClientKey,
    pub surface: SurfaceKey,
}

impl wayland_server::GlobalDispatch<xdg_wm_base::XdgWmBase, ()> for State {
    fn bind(
        state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<xdg_wm_base::XdgWmBase>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let Some(shell) = state.shell.as_mut() else {
            data_init.init(resource, ShellClientKey::default());
            return;
        };

        shell.clients.insert_with_key(|k| ShellClient {
            kind: ShellClientKind::Xdg(data_init.init(resource, k)),
            ping_timer: None,
            need_pong: false,
            ping_serial: 0,
            unresponsive: false,
        });
    }
}

impl wayland_server::Dispatch<xdg_wm_base::XdgWmBase, ShellClientKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &xdg_wm_base::XdgWmBase,
        request: xdg_wm_base::Request,
        data: &ShellClientKey,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::CreatePositioner { id } => {
                let Some(shell) = state.shell.as_mut() else {
                    data_init.init(id, PositionerKey::default());
                    return;
                };

                let key = shell.positioners.insert(Positioner::default());
                data_init.init(id, key);
            }
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let surface_key = *surface.data::<SurfaceKey>().unwrap();

                if state.surfaces[surface_key].role().is_some() {
                    resource.post_error(
                        xdg_wm_base::Error::Role,
                        "surface already has a role".to_string(),
                    );
                    return;
                }

                data_init.init(
                    id,
                    XdgSurfaceData {
                        client: *data,
                        surface: surface_key,
                    },
                );
            }
            xdg_wm_base::Request::Pong { serial } => {
                state.shell_client_handle_pong(*data, serial);
            }
            xdg_wm_base::Request::Destroy => (),
            _ => unreachable!(),
        }
    }
}

impl wayland_server::Dispatch<xdg_positioner::XdgPositioner, PositionerKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &xdg_positioner::XdgPositioner,
        request: xdg_positioner::Request,
        data: &PositionerKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let Some(positioner) = state
            .shell
            .as_mut()
            .and_then(|s| s.positioners.get_mut(*data))
        else {
            return;
        };

        match request {
            xdg_positioner::Request::SetSize { width, height } => {
                if width < 1 || height < 1 {
                    resource.post_error(
                        xdg_positioner::Error::InvalidInput,
                        "size must be positive".to_string(),
                    );
                    return;
                }
                positioner.size = (width, height);
            }
            xdg_positioner::Request::SetAnchorRect {
                x,
                y,
                width,
                height,
            } => {
                positioner.anchor_rect = Rect::from_size(x, y, width, height);
            }
            xdg_positioner::Request::SetOffset { x, y } => {
                positioner.offset = (x, y);
            }
            // Anchor/gravity/constraint refinement is not implemented; the
            // anchor rect plus offset decides the placement.
            xdg_positioner::Request::SetAnchor { .. }
            | xdg_positioner::Request::SetGravity { .. }
            | xdg_positioner::Request::SetConstraintAdjustment { .. }
            | xdg_positioner::Request::SetReactive
            | xdg_positioner::Request::SetParentSize { .. }
            | xdg_positioner::Request::SetParentConfigure { .. } => (),
            xdg_positioner::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &xdg_positioner::XdgPositioner,
        data: &PositionerKey,
    ) {
        if let Some(shell) = state.shell.as_mut() {
            shell.positioners.remove(*data);
        }
    }
}

impl wayland_server::Dispatch<xdg_surface::XdgSurface, XdgSurfaceData> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &xdg_surface::XdgSurface,
        request: xdg_surface::Request,
        data: &XdgSurfaceData,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                if !state.surface_set_role(data.surface, "xdg_toplevel") {
                    resource.post_error(
                        xdg_wm_base::Error::Role,
                        "surface already has a role".to_string(),
                    );
                    return;
                }

                let key = state.create_shell_surface(Some(data.client), data.surface);
                let toplevel = data_init.init(id, key);

                let shell = state.shell.as_mut().unwrap();
                shell.surfaces[key].resource = Some(ShellSurfaceResource::XdgToplevel {
                    xdg_surface: resource.clone(),
                    toplevel,
                });

                state.shell_surface_set_toplevel(key);
            }
            xdg_surface::Request::GetPopup {
                id,
                parent,
                positioner,
            } => {
                // The parent shell surface comes from the parent resource.
                let Some(parent_surface) =
                    parent.as_ref().map(|p| p.data::<XdgSurfaceData>().unwrap().surface)
                else {
                    resource.post_error(
                        xdg_wm_base::Error::InvalidPopupParent,
                        "popups require a parent".to_string(),
                    );
                    return;
                };

                if state.shell_surface_for(parent_surface).is_none() {
                    resource.post_error(
                        xdg_wm_base::Error::InvalidPopupParent,
                        "parent has no installed role".to_string(),
                    );
                    return;
                }

                if !state.surface_set_role(data.surface, "xdg_popup") {
                    resource.post_error(
                        xdg_wm_base::Error::Role,
                        "surface already has a role".to_string(),
                    );
                    return;
                }

                let placement = positioner
                    .data::<PositionerKey>()
                    .and_then(|k| state.shell.as_ref().unwrap().positioners.get(*k))
                    .map(|p| p.position())
                    .unwrap_or((0, 0));

                let key = state.create_shell_surface(Some(data.client), data.surface);
                let popup = data_init.init(id, key);

                let shell = state.shell.as_mut().unwrap();
                shell.surfaces[key].resource = Some(ShellSurfaceResource::XdgPopup {
                    xdg_surface: resource.clone(),
                    popup,
                });

                // The grab request supplies the seat; without one the popup
                // maps ungrabbed.
                state.shell_surface_set_popup(
                    key,
                    None,
                    parent_surface,
                    placement.0 as f64,
                    placement.1 as f64,
                    0,
                );
                state.shell_surface_send_configure(key, 0, 0);
            }
            xdg_surface::Request::SetWindowGeometry {
                x,
                y,
                width,
                height,
            } => {
                if let Some(key) = state.shell_surface_for(data.surface) {
                    state.shell_surface_set_geometry(key, x as f64, y as f64, width, height);
                }
            }
            xdg_surface::Request::AckConfigure { serial } => {
                if let Some(key) = state.shell_surface_for(data.surface) {
                    state.shell_surface_ack_configure(key, serial);
                }
            }
            xdg_surface::Request::Destroy => (),
            _ => unreachable!(),
        }
    }
}

impl wayland_server::Dispatch<xdg_toplevel::XdgToplevel, ShellSurfaceKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &xdg_toplevel::XdgToplevel,
        request: xdg_toplevel::Request,
        data: &ShellSurfaceKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let key = *data;

        match request {
            xdg_toplevel::Request::SetParent { parent } => {
                let parent_surface = parent
                    .as_ref()
                    .and_then(|p| p.data::<ShellSurfaceKey>())
                    .and_then(|k| state.shell_ref().and_then(|s| s.surfaces.get(*k)))
                    .map(|s| s.surface());

                state.shell_surface_set_parent(key, parent_surface);
            }
            xdg_toplevel::Request::SetTitle { title } => {
                state.shell_surface_set_title(key, &title);
            }
            xdg_toplevel::Request::SetAppId { app_id } => {
                state.shell_surface_set_class(key, &app_id);
            }
            xdg_toplevel::Request::Move { seat, serial } => {
                let seat = *seat.data::<SeatKey>().unwrap();
                state.shell_surface_move(key, seat, serial);
            }
            xdg_toplevel::Request::Resize {
                seat,
                serial,
                edges,
            } => {
                let seat = *seat.data::<SeatKey>().unwrap();
                let edges: u32 = edges.into_result().map(|e| e.into()).unwrap_or(0);
                state.shell_surface_resize(key, seat, serial, edges);
            }
            xdg_toplevel::Request::SetMaximized => {
                state.shell_surface_set_maximized(key, None);
            }
            xdg_toplevel::Request::UnsetMaximized => {
                state.shell_surface_unset_maximized(key);
            }
            xdg_toplevel::Request::SetFullscreen { output } => {
                let output = output
                    .as_ref()
                    .and_then(|o| o.data::<crate::output::OutputId>())
                    .copied();
                state.shell_surface_set_fullscreen(key, output, FullscreenMethod::Default, 0);
            }
            xdg_toplevel::Request::UnsetFullscreen => {
                state.shell_surface_unset_fullscreen(key);
            }
            xdg_toplevel::Request::SetMinimized => {
                state.shell_surface_set_minimized(key);
            }
            xdg_toplevel::Request::ShowWindowMenu { .. } => {
                // TODO: needs a compositor-drawn menu to exist first.
            }
            xdg_toplevel::Request::SetMaxSize { .. } | xdg_toplevel::Request::SetMinSize { .. } => {
            }
            xdg_toplevel::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &xdg_toplevel::XdgToplevel,
        data: &ShellSurfaceKey,
    ) {
        let view = state.shell_mut().and_then(|s| s.surfaces.get_mut(*data)).map(|shsurf| {
            shsurf.resource = None;
            shsurf.mapped = false;
            shsurf.kind = ShellSurfaceType::None;
            shsurf.view
        });

        if let Some(view) = view {
            state.view_unmap(view);
        }
    }
}

impl wayland_server::Dispatch<xdg_popup::XdgPopup, ShellSurfaceKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &xdg_popup::XdgPopup,
        request: xdg_popup::Request,
        data: &ShellSurfaceKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let key = *data;

        match request {
            xdg_popup::Request::Grab { seat, serial } => {
                let seat = *seat.data::<SeatKey>().unwrap();

                if let Some(shsurf) = state.shell_mut().and_then(|s| s.surfaces.get_mut(key)) {
                    shsurf.popup.seat = Some(seat);
                    shsurf.popup.serial = serial;
                }
            }
            xdg_popup::Request::Reposition { positioner, token } => {
                let placement = positioner
                    .data::<PositionerKey>()
                    .and_then(|k| state.shell.as_ref()?.positioners.get(*k))
                    .map(|p| p.position());

                if let Some((x, y)) = placement {
                    let (view, popup) = {
                        let Some(shsurf) =
                            state.shell_mut().and_then(|s| s.surfaces.get_mut(key))
                        else {
                            return;
                        };
                        shsurf.popup.x = x as f64;
                        shsurf.popup.y = y as f64;
                        (shsurf.view, shsurf.resource.is_some())
                    };

                    state.view_set_position(view, x as f64, y as f64);

                    if popup {
                        if let Some(ShellSurfaceResource::XdgPopup { popup, .. }) = state
                            .shell_ref()
                            .and_then(|s| s.surfaces.get(key))
                            .and_then(|s| s.resource.as_ref())
                        {
                            popup.repositioned(token);
                        }
                        state.shell_surface_send_configure(key, 0, 0);
                    }
                }
            }
            xdg_popup::Request::Destroy => {
                state.shell_surface_end_popup_grab(key);
            }
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &xdg_popup::XdgPopup,
        data: &ShellSurfaceKey,
    ) {
        let view = state.shell_mut().and_then(|s| s.surfaces.get_mut(*data)).map(|shsurf| {
            shsurf.resource = None;
            shsurf.mapped = false;
            shsurf.kind = ShellSurfaceType::None;
            shsurf.view
        });

        if let Some(view) = view {
            state.view_unmap(view);
        }
    }
}
