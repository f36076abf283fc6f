// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! Selection and drag-and-drop plumbing: data sources carrying mime-type
//! lists, per-seat data devices, and offer fan-out to the focused client.
//! Transfers themselves happen over file descriptors between clients.

use tracing::debug;
use wayland_server::{
    protocol::{wl_data_device, wl_data_offer, wl_data_source},
    Resource as _,
};

use crate::{compositor::State, seat::SeatKey};

slotmap::new_key_type! { pub struct DataSourceKey; }

pub struct DataSource {
    pub(crate) resource: wl_data_source::WlDataSource,
    pub(crate) mime_types: Vec<String>,
}

impl DataSource {
    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }
}

impl State {
    pub(crate) fn data_source_destroyed(&mut self, key: DataSourceKey) {
        self.selections.retain(|_, source| *source != key);
        self.data_sources.remove(key);
    }

    pub(crate) fn data_source_offer(&mut self, key: DataSourceKey, mime_type: String) {
        if let Some(source) = self.data_sources.get_mut(key) {
            source.mime_types.push(mime_type);
        }
    }

    pub(crate) fn add_data_device(
        &mut self,
        seat: SeatKey,
        resource: wl_data_device::WlDataDevice,
    ) {
        // Late binds see the current selection right away.
        if let Some(source) = self.selections.get(&seat).copied() {
            self.send_offer_to_device(source, &resource, true);
        }

        self.data_device_list.push((seat, resource));
    }

    /// Handles wl_data_device.set_selection: remembers the seat's selection
    /// source and announces it to the focused client's data devices.
    pub(crate) fn set_selection(&mut self, seat: SeatKey, source: Option<DataSourceKey>) {
        let old = match source {
            Some(source) => self.selections.insert(seat, source),
            None => self.selections.remove(&seat),
        };

        if let Some(old) = old.filter(|old| Some(*old) != source) {
            if let Some(old) = self.data_sources.get(old) {
                old.resource.cancelled();
            }
        }

        let Some(source) = source else {
            return;
        };

        debug!(?seat, "selection set");
        self.broadcast_selection(seat, source);
    }

    fn broadcast_selection(&mut self, seat: SeatKey, source: DataSourceKey) {
        let Some(focus_surface) = self
            .keyboard_focus(seat)
            .and_then(|view| self.views.get(view))
            .and_then(|view| view.surface)
            .and_then(|surface| self.surfaces.get(surface))
            .and_then(|surface| surface.resource.clone())
        else {
            return;
        };

        let devices: Vec<_> = self
            .data_device_list
            .iter()
            .filter(|(s, device)| {
                *s == seat && device.is_alive() && device.id().same_client_as(&focus_surface.id())
            })
            .map(|(_, device)| device.clone())
            .collect();

        for device in devices {
            self.send_offer_to_device(source, &device, true);
        }
    }

    /// Creates a wl_data_offer on the device's client and advertises every
    /// mime type of the source on it.
    pub(crate) fn send_offer_to_device(
        &mut self,
        source: DataSourceKey,
        device: &wl_data_device::WlDataDevice,
        selection: bool,
    ) {
        let Some(client) = device.client() else {
            return;
        };

        let Some(mime_types) = self.data_sources.get(source).map(|s| s.mime_types.clone())
        else {
            return;
        };

        let Ok(offer) =
            client.create_resource::<wl_data_offer::WlDataOffer, DataSourceKey, State>(
                &self.dh,
                device.version(),
                source,
            )
        else {
            return;
        };

        device.data_offer(&offer);
        for mime_type in mime_types {
            offer.offer(mime_type);
        }

        if selection {
            device.selection(Some(&offer));
        }
    }

    /// Drag-and-drop skeleton: the offer is announced to the origin client
    /// immediately; there is no pointer integration yet.
    pub(crate) fn start_drag(
        &mut self,
        seat: SeatKey,
        source: Option<DataSourceKey>,
        device: &wl_data_device::WlDataDevice,
    ) {
        let _ = seat;
        let Some(source) = source else {
            return;
        };

        debug!("start_drag is a stub; announcing the offer only");
        self.send_offer_to_device(source, device, false);
    }
}
