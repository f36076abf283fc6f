// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{protocol::wl_output, Resource as _};

use crate::{compositor::State, output::OutputId};

impl wayland_server::GlobalDispatch<wl_output::WlOutput, OutputId> for State {
    fn bind(
        state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_output::WlOutput>,
        global_data: &OutputId,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = *global_data;
        let resource = data_init.init(resource, id);

        state.output_send_initial_state(id, &resource);
        if let Some(output) = state.outputs.get_mut(&id.raw()) {
            output.resources.push(resource);
        }
    }
}

impl wayland_server::Dispatch<wl_output::WlOutput, OutputId> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_output::WlOutput,
        request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_output::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_output::WlOutput,
        data: &OutputId,
    ) {
        if let Some(output) = state.outputs.get_mut(&data.raw()) {
            output.resources.retain(|r| r.id() != resource.id());
        }
    }
}
