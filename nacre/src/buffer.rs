// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

use wayland_server::{protocol::wl_buffer, protocol::wl_shm, Resource as _};

use crate::{
    compositor::State,
    object::{Event, EventKind, ObjectCore, ObjectRef},
    shm::ShmPoolKey,
};

slotmap::new_key_type! { pub struct BufferKey; }

#[derive(Debug, Clone, Copy)]
pub struct ShmBufferInfo {
    pub pool: ShmPoolKey,
    pub offset: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: wl_shm::Format,
}

/// A reference-counted handle onto a client-supplied pixel source. The
/// buffer dimensions are unknown to the core until a renderer attaches the
/// buffer and reports them back.
pub struct Buffer {
    pub(crate) core: ObjectCore,
    pub(crate) resource: Option<wl_buffer::WlBuffer>,
    pub(crate) shm: Option<ShmBufferInfo>,
    pub(crate) ref_count: u32,
    pub(crate) size: Option<(i32, i32)>,
}

impl Buffer {
    pub fn shm_info(&self) -> Option<&ShmBufferInfo> {
        self.shm.as_ref()
    }

    pub fn resource(&self) -> Option<&wl_buffer::WlBuffer> {
        self.resource.as_ref()
    }

    /// Buffer size as reported by the renderer, if attached yet.
    pub fn size(&self) -> Option<(i32, i32)> {
        self.size
    }
}

impl State {
    pub(crate) fn create_buffer(
        &mut self,
        resource: Option<wl_buffer::WlBuffer>,
        shm: Option<ShmBufferInfo>,
    ) -> BufferKey {
        self.buffers.insert_with_key(|k| Buffer {
            core: self.objects.register(ObjectRef::Buffer(k)),
            resource,
            shm,
            ref_count: 0,
            size: None,
        })
    }

    /// Looks up the buffer wrapper for a wire resource.
    pub fn buffer_from_resource(&self, resource: &wl_buffer::WlBuffer) -> Option<BufferKey> {
        resource.data::<BufferKey>().copied().filter(|k| self.buffers.contains_key(*k))
    }

    pub fn buffer_reference(&mut self, key: BufferKey) {
        if let Some(buffer) = self.buffers.get_mut(key) {
            buffer.ref_count += 1;
        }
    }

    /// Drops one reference. When the count reaches zero the wire release is
    /// queued and `BufferRelease` is emitted; the buffer object itself stays
    /// alive until the wire resource is destroyed.
    pub fn buffer_unreference(&mut self, key: BufferKey) {
        let Some(buffer) = self.buffers.get_mut(key) else {
            return;
        };

        debug_assert!(buffer.ref_count > 0);
        buffer.ref_count = buffer.ref_count.saturating_sub(1);

        if buffer.ref_count == 0 {
            if let Some(resource) = &buffer.resource {
                resource.release();
            }

            self.emit(ObjectRef::Buffer(key), Event::new(EventKind::BufferRelease));
        }
    }

    /// Called when the wire resource is destroyed.
    pub(crate) fn buffer_destroyed(&mut self, key: BufferKey) {
        if !self.buffers.contains_key(key) {
            return;
        }

        self.finish_object(ObjectRef::Buffer(key));
        let buffer = self.buffers.remove(key).unwrap();
        self.objects.release(buffer.core.id());
    }
}
