// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{
    protocol::{wl_buffer, wl_shm, wl_shm_pool},
    Resource as _,
};

use crate::{
    buffer::{BufferKey, ShmBufferInfo},
    compositor::State,
    shm::{ShmPool, ShmPoolKey},
};

impl State {
    fn release_shm_pool(&mut self, key: ShmPoolKey) {
        let Some(pool) = self.shm_pools.get(key) else {
            return;
        };

        if !pool.resource_alive && pool.buffers == 0 {
            self.shm_pools.remove(key);
        }
    }
}

impl wayland_server::GlobalDispatch<wl_shm::WlShm, ()> for State {
    fn bind(
        _state: &mut Self,
        _handle: &wayland_server::DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_shm::WlShm>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());
        shm.format(wl_shm::Format::Argb8888);
        shm.format(wl_shm::Format::Xrgb8888);
    }
}

impl wayland_server::Dispatch<wl_shm::WlShm, ()> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_shm::Request::CreatePool { id, fd, size } => {
                if size <= 0 {
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!("invalid pool size: {size}"),
                    );
                    return;
                }

                match ShmPool::new(fd, size as usize) {
                    Ok(pool) => {
                        let key = state.shm_pools.insert(pool);
                        data_init.init(id, key);
                    }
                    Err(err) => {
                        resource.post_error(
                            wl_shm::Error::InvalidFd,
                            format!("failed to map pool: {err:#}"),
                        );
                    }
                }
            }
            _ => unreachable!(),
        }
    }
}

impl wayland_server::Dispatch<wl_shm_pool::WlShmPool, ShmPoolKey> for State {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        data: &ShmPoolKey,
        _dhandle: &wayland_server::DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let Ok(format) = format.into_result() else {
                    resource.post_error(
                        wl_shm::Error::InvalidFormat,
                        "unknown buffer format".to_string(),
                    );
                    return;
                };

                let pool_size = state.shm_pools[*data].size() as i64;
                let end = offset as i64 + stride as i64 * height as i64;
                if offset < 0
                    || width <= 0
                    || height <= 0
                    || stride < width * 4
                    || end > pool_size
                {
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!(
                            "invalid buffer geometry: {width}x{height}, stride {stride}, \
                             offset {offset} in a {pool_size} byte pool"
                        ),
                    );
                    return;
                }

                let key = state.create_buffer(
                    None,
                    Some(ShmBufferInfo {
                        pool: *data,
                        offset,
                        width,
                        height,
                        stride,
                        format,
                    }),
                );

                let buffer = data_init.init(id, key);
                state.buffers[key].resource = Some(buffer);
                state.shm_pools[*data].buffers += 1;
            }
            wl_shm_pool::Request::Resize { size } => {
                if let Err(err) = state.shm_pools[*data].resize(size as usize) {
                    resource.post_error(
                        wl_shm::Error::InvalidFd,
                        format!("failed to resize pool: {err:#}"),
                    );
                }
            }
            wl_shm_pool::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_shm_pool::WlShmPool,
        data: &ShmPoolKey,
    ) {
        if let Some(pool) = state.shm_pools.get_mut(*data) {
            pool.resource_alive = false;
        }
        state.release_shm_pool(*data);
    }
}

impl wayland_server::Dispatch<wl_buffer::WlBuffer, BufferKey> for State {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_buffer::WlBuffer,
        request: wl_buffer::Request,
        _data: &BufferKey,
        _dhandle: &wayland_server::DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_buffer::Request::Destroy => (),
            _ => unreachable!(),
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_buffer::WlBuffer,
        data: &BufferKey,
    ) {
        let pool = state.buffers.get(*data).and_then(|b| b.shm_info()).map(|s| s.pool);

        state.buffer_destroyed(*data);

        if let Some(pool) = pool {
            if let Some(p) = state.shm_pools.get_mut(pool) {
                p.buffers = p.buffers.saturating_sub(1);
            }
            state.release_shm_pool(pool);
        }
    }
}
