// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{
    protocol::{wl_callback, wl_compositor, wl_region, wl_surface},
    Resource as _,
};

use crate::{
    compositor::{RegionKey, State},
    surface::SurfaceKey,
    transform::Transform,
};

impl wayland_server::GlobalDispatch<wl_compositor::WlCompositor, ()> for State {
    fn bind(
        state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let resource = data_init.init(resource, ());
        state.compositor_resources.push(resource);
    }
}

impl wayland_server::Dispatch<wl_compositor::WlCompositor, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_compositor::WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let key = state.create_surface(None);
                let resource = data_init.init(id, key);
                state.surfaces[key].resource = Some(resource);
            }
            wl_compositor::Request::CreateRegion { id } => {
                let key = state.create_region_object(None);
                let resource = data_init.init(id, key);
                state.regions[key].resource = Some(resource);
            }
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_compositor::WlCompositor,
        _data: &(),
    ) {
        state.compositor_resources.retain(|r| r.id() != resource.id());
    }
}

impl wayland_server::Dispatch<wl_surface::WlSurface, SurfaceKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        data: &SurfaceKey,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                let buffer = buffer.as_ref().and_then(|b| state.buffer_from_resource(b));
                state.surface_attach(*data, buffer, x, y);
            }
            wl_surface::Request::Damage { x, y, width, height } => {
                state.surface_damage(*data, x, y, width, height);
            }
            wl_surface::Request::DamageBuffer { x, y, width, height } => {
                // Buffer-space damage; equivalent under the common 1:1 case
                // and a safe overestimate otherwise.
                state.surface_damage(*data, x, y, width, height);
            }
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, *data);
                state.surface_frame(*data, callback);
            }
            wl_surface::Request::SetOpaqueRegion { region } => {
                let value = region
                    .as_ref()
                    .and_then(|r| r.data::<RegionKey>())
                    .and_then(|k| state.region_object(*k))
                    .map(|r| r.region().clone());
                state.surface_set_opaque_region(*data, value.as_ref());
            }
            wl_surface::Request::SetInputRegion { region } => {
                let value = region
                    .as_ref()
                    .and_then(|r| r.data::<RegionKey>())
                    .and_then(|k| state.region_object(*k))
                    .map(|r| r.region().clone());
                state.surface_set_input_region(*data, value.as_ref());
            }
            wl_surface::Request::SetBufferTransform { transform } => {
                let valid = transform
                    .into_result()
                    .ok()
                    .map(|t| Transform::from_wl(t));

                match valid {
                    Some(transform) => state.surface_set_buffer_transform(*data, transform),
                    None => {
                        resource.post_error(
                            wl_surface::Error::InvalidTransform,
                            format!("invalid buffer transform: {transform:?}"),
                        );
                    }
                }
            }
            wl_surface::Request::SetBufferScale { scale } => {
                if scale < 1 {
                    resource.post_error(
                        wl_surface::Error::InvalidScale,
                        format!("invalid buffer scale (must be >= 1): {scale}"),
                    );
                    return;
                }

                state.surface_set_buffer_scale(*data, scale);
            }
            wl_surface::Request::Commit => {
                state.commit_surface(*data);
            }
            wl_surface::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_surface::WlSurface,
        data: &SurfaceKey,
    ) {
        state.destroy_surface(*data);
    }
}

impl wayland_server::Dispatch<wl_callback::WlCallback, SurfaceKey> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_callback::WlCallback,
        _request: wl_callback::Request,
        _data: &SurfaceKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
    }
}

impl wayland_server::Dispatch<wl_region::WlRegion, RegionKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_region::WlRegion,
        request: wl_region::Request,
        data: &RegionKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_region::Request::Add { x, y, width, height } => {
                state.region_object_add(*data, x, y, width, height);
            }
            wl_region::Request::Subtract { x, y, width, height } => {
                state.region_object_subtract(*data, x, y, width, height);
            }
            wl_region::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_region::WlRegion,
        data: &RegionKey,
    ) {
        state.destroy_region_object(*data);
    }
}
