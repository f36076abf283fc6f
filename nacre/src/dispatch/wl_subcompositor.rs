// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{
    protocol::{wl_subcompositor, wl_subsurface},
    Resource as _,
};

use crate::{
    compositor::State,
    subsurface::{SubsurfaceError, SubsurfaceKey},
    surface::SurfaceKey,
};

impl wayland_server::GlobalDispatch<wl_subcompositor::WlSubcompositor, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_subcompositor::WlSubcompositor>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl wayland_server::Dispatch<wl_subcompositor::WlSubcompositor, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_subcompositor::WlSubcompositor,
        request: wl_subcompositor::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_subcompositor::Request::GetSubsurface {
                id,
                surface,
                parent,
            } => {
                let surface_key = *surface.data::<SurfaceKey>().unwrap();
                let parent_key = *parent.data::<SurfaceKey>().unwrap();

                if surface_key == parent_key {
                    resource.post_error(
                        wl_subcompositor::Error::BadSurface,
                        "a surface cannot be its own parent".to_string(),
                    );
                    return;
                }

                match state.create_subsurface(surface_key, parent_key) {
                    Ok(key) => {
                        data_init.init(id, key);
                    }
                    Err(SubsurfaceError::RoleTaken) => {
                        resource.post_error(
                            wl_subcompositor::Error::BadSurface,
                            "surface already has a role".to_string(),
                        );
                    }
                    Err(SubsurfaceError::OwnParent) => {
                        resource.post_error(
                            wl_subcompositor::Error::BadSurface,
                            "surface would become its own ancestor".to_string(),
                        );
                    }
                    Err(SubsurfaceError::NotSibling) => unreachable!(),
                }
            }
            wl_subcompositor::Request::Destroy => (),
            _ => unreachable!(),
        }
    }
}

impl wayland_server::Dispatch<wl_subsurface::WlSubsurface, SubsurfaceKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_subsurface::WlSubsurface,
        request: wl_subsurface::Request,
        data: &SubsurfaceKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_subsurface::Request::SetPosition { x, y } => {
                state.subsurface_set_position(*data, x, y);
            }
            wl_subsurface::Request::PlaceAbove { sibling } => {
                let sibling = *sibling.data::<SurfaceKey>().unwrap();
                if state.subsurface_place_above(*data, sibling).is_err() {
                    resource.post_error(
                        wl_subsurface::Error::BadSurface,
                        "reference surface is not a sibling".to_string(),
                    );
                }
            }
            wl_subsurface::Request::PlaceBelow { sibling } => {
                let sibling = *sibling.data::<SurfaceKey>().unwrap();
                if state.subsurface_place_below(*data, sibling).is_err() {
                    resource.post_error(
                        wl_subsurface::Error::BadSurface,
                        "reference surface is not a sibling".to_string(),
                    );
                }
            }
            wl_subsurface::Request::SetSync => state.subsurface_set_sync(*data),
            wl_subsurface::Request::SetDesync => state.subsurface_set_desync(*data),
            wl_subsurface::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_subsurface::WlSubsurface,
        data: &SubsurfaceKey,
    ) {
        state.teardown_subsurface(*data);
    }
}
