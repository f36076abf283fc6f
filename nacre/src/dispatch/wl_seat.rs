// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{
    protocol::{wl_keyboard, wl_pointer, wl_seat, wl_touch},
    Resource as _,
};

use crate::{compositor::State, seat::SeatKey, surface::SurfaceKey};

impl wayland_server::GlobalDispatch<wl_seat::WlSeat, SeatKey> for State {
    fn bind(
        state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_seat::WlSeat>,
        global_data: &SeatKey,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let key = *global_data;
        let resource = data_init.init(resource, key);

        state.seat_send_initial_state(key, &resource);
        if let Some(seat) = state.seats.get_mut(key) {
            seat.resources.push(resource);
        }
    }
}

impl wayland_server::Dispatch<wl_seat::WlSeat, SeatKey> for State {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        _resource: &wl_seat::WlSeat,
        request: wl_seat::Request,
        data: &SeatKey,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let seat = *data;

        match request {
            wl_seat::Request::GetPointer { id } => {
                let resource = data_init.init(id, seat);

                let Some(pointer) = state.pointer_mut(seat) else {
                    return;
                };
                pointer.resources.push(resource.clone());

                // If this client's surface already holds focus, it learns
                // about it immediately.
                let (focus, serial, vx, vy) = {
                    let pointer = state.pointer(seat).unwrap();
                    (pointer.focus, pointer.focus_serial, pointer.vx, pointer.vy)
                };

                if let Some(surface) = focus
                    .and_then(|view| state.views.get(view))
                    .and_then(|view| view.surface)
                    .and_then(|surface| state.surfaces.get(surface))
                    .and_then(|surface| surface.resource.clone())
                {
                    if let Some(c) = surface.client() {
                        if c.id() == client.id() {
                            resource.enter(serial, &surface, vx, vy);
                        }
                    }
                }
            }
            wl_seat::Request::GetKeyboard { id } => {
                let resource = data_init.init(id, seat);

                let Some(keyboard) = state.keyboard_mut(seat) else {
                    return;
                };
                keyboard.resources.push(resource.clone());

                if resource.version() >= 4 {
                    resource.repeat_info(0, 0);
                }

                match keyboard.keymap_file.as_ref() {
                    Some(file) => {
                        resource.keymap(
                            wl_keyboard::KeymapFormat::XkbV1,
                            file.as_fd(),
                            file.len(),
                        );
                    }
                    None => {
                        use std::os::fd::AsFd as _;
                        if let Ok(null) = std::fs::File::open("/dev/null") {
                            resource.keymap(wl_keyboard::KeymapFormat::NoKeymap, null.as_fd(), 0);
                        }
                    }
                }

                let (focus, serial, keys) = {
                    let keyboard = state.keyboard(seat).unwrap();
                    let keys: Vec<u8> = keyboard
                        .keys
                        .iter()
                        .flat_map(|k| k.to_ne_bytes())
                        .collect();
                    (keyboard.focus, keyboard.focus_serial, keys)
                };

                if let Some(surface) = focus
                    .and_then(|view| state.views.get(view))
                    .and_then(|view| view.surface)
                    .and_then(|surface| state.surfaces.get(surface))
                    .and_then(|surface| surface.resource.clone())
                {
                    if let Some(c) = surface.client() {
                        if c.id() == client.id() {
                            resource.enter(serial, &surface, keys);
                        }
                    }
                }
            }
            wl_seat::Request::GetTouch { id } => {
                let resource = data_init.init(id, seat);

                if let Some(touch) = state.touch_mut(seat) {
                    touch.resources.push(resource);
                }
            }
            wl_seat::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_seat::WlSeat,
        data: &SeatKey,
    ) {
        if let Some(seat) = state.seats.get_mut(*data) {
            seat.resources.retain(|r| r.id() != resource.id());
        }
    }
}

impl wayland_server::Dispatch<wl_pointer::WlPointer, SeatKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_pointer::WlPointer,
        request: wl_pointer::Request,
        data: &SeatKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_pointer::Request::SetCursor {
                serial: _,
                surface,
                hotspot_x,
                hotspot_y,
            } => {
                let surface = surface.as_ref().map(|s| *s.data::<SurfaceKey>().unwrap());
                state.pointer_set_cursor(*data, surface, hotspot_x, hotspot_y);
            }
            wl_pointer::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_pointer::WlPointer,
        data: &SeatKey,
    ) {
        if let Some(pointer) = state.pointer_mut(*data) {
            pointer.resources.retain(|r| r.id() != resource.id());
        }
    }
}

impl wayland_server::Dispatch<wl_keyboard::WlKeyboard, SeatKey> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_keyboard::WlKeyboard,
        request: wl_keyboard::Request,
        _data: &SeatKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_keyboard::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_keyboard::WlKeyboard,
        data: &SeatKey,
    ) {
        if let Some(keyboard) = state.keyboard_mut(*data) {
            keyboard.resources.retain(|r| r.id() != resource.id());
        }
    }
}

impl wayland_server::Dispatch<wl_touch::WlTouch, SeatKey> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_touch::WlTouch,
        request: wl_touch::Request,
        _data: &SeatKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_touch::Request::Release => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &wl_touch::WlTouch,
        data: &SeatKey,
    ) {
        if let Some(touch) = state.touch_mut(*data) {
            touch.resources.retain(|r| r.id() != resource.id());
        }
    }
}
