// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{
    protocol::{wl_data_device, wl_data_device_manager, wl_data_offer, wl_data_source},
    Resource as _,
};

use crate::{compositor::State, data_device::DataSource, data_device::DataSourceKey, seat::SeatKey};

impl wayland_server::GlobalDispatch<wl_data_device_manager::WlDataDeviceManager, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_data_device_manager::WlDataDeviceManager>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl wayland_server::Dispatch<wl_data_device_manager::WlDataDeviceManager, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_data_device_manager::WlDataDeviceManager,
        request: wl_data_device_manager::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device_manager::Request::CreateDataSource { id } => {
                state.data_sources.insert_with_key(|k| DataSource {
                    resource: data_init.init(id, k),
                    mime_types: Vec::new(),
                });
            }
            wl_data_device_manager::Request::GetDataDevice { id, seat } => {
                let seat = *seat.data::<SeatKey>().unwrap();
                let device = data_init.init(id, seat);
                state.add_data_device(seat, device);
            }
            _ => unreachable!(),
        }
    }
}

impl wayland_server::Dispatch<wl_data_source::WlDataSource, DataSourceKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_data_source::WlDataSource,
        request: wl_data_source::Request,
        data: &DataSourceKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_data_source::Request::Offer { mime_type } => {
                state.data_source_offer(*data, mime_type);
            }
            wl_data_source::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_data_source::WlDataSource,
        data: &DataSourceKey,
    ) {
        state.data_source_destroyed(*data);
    }
}

impl wayland_server::Dispatch<wl_data_device::WlDataDevice, SeatKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_data_device::WlDataDevice,
        request: wl_data_device::Request,
        data: &SeatKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device::Request::SetSelection { source, serial: _ } => {
                let source = source.as_ref().and_then(|s| s.data::<DataSourceKey>()).copied();
                state.set_selection(*data, source);
            }
            wl_data_device::Request::StartDrag {
                source,
                origin: _,
                icon: _,
                serial: _,
            } => {
                let source = source.as_ref().and_then(|s| s.data::<DataSourceKey>()).copied();
                state.start_drag(*data, source, resource);
            }
            wl_data_device::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_data_device::WlDataDevice,
        _data: &SeatKey,
    ) {
        state
            .data_device_list
            .retain(|(_, device)| device.id() != resource.id());
    }
}

impl wayland_server::Dispatch<wl_data_offer::WlDataOffer, DataSourceKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_data_offer::WlDataOffer,
        request: wl_data_offer::Request,
        data: &DataSourceKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let source = state.data_sources.get(*data).map(|s| s.resource.clone());

        match request {
            wl_data_offer::Request::Accept { serial: _, mime_type } => {
                if let Some(source) = source {
                    source.target(mime_type);
                }
            }
            wl_data_offer::Request::Receive { mime_type, fd } => {
                if let Some(source) = source {
                    use std::os::fd::AsFd as _;
                    source.send(mime_type, fd.as_fd());
                }
                // fd drops here, closing our copy.
            }
            wl_data_offer::Request::Destroy => (),
            _ => unreachable!(),
        }
    }
}
