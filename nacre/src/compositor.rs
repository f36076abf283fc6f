// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

//! The engine state and its event loop.
//!
//! [`State`] owns every object table and is the dispatch target for all
//! wire requests. [`Compositor`] wraps it with the wayland display, the
//! listening socket, and a mio poll loop; everything runs on one thread
//! and every event runs to completion before the next is dispatched.

use std::{
    ffi::{OsStr, OsString},
    os::fd::AsRawFd as _,
    sync::Arc,
    time,
};

use anyhow::Context as _;
use hashbrown::HashMap;
use slotmap::SlotMap;
use tracing::{debug, trace};
use wayland_server::{
    protocol::{wl_compositor, wl_data_device_manager, wl_region, wl_shm, wl_subcompositor},
    DisplayHandle, Resource as _,
};

use crate::{
    buffer::{Buffer, BufferKey},
    data_device::{DataSource, DataSourceKey},
    input::{DeviceKey, InputDevice},
    object::{
        Event, EventCallback, EventKind, ListenerId, ObjectCore, ObjectId, ObjectRef, ObjectTable,
        UserDataKey,
    },
    output::{Output, OutputId},
    plane::{Plane, PlaneKey},
    region::{Rect, Region},
    seat::{Seat, SeatKey},
    serial::Serial,
    shell::DesktopShell,
    shm::{ShmPool, ShmPoolKey},
    subsurface::{Subsurface, SubsurfaceKey},
    surface::{Surface, SurfaceKey},
    view::{View, ViewKey},
};

slotmap::new_key_type! { pub struct RegionKey; }

/// A bound wl_region: a mutable region value used as the source for opaque
/// and input region assignments.
pub struct RegionObject {
    pub(crate) core: ObjectCore,
    pub(crate) resource: Option<wl_region::WlRegion>,
    pub(crate) region: Region,
}

impl RegionObject {
    pub fn region(&self) -> &Region {
        &self.region
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type TimerCallback = Box<dyn FnOnce(&mut State)>;

#[derive(Default)]
pub(crate) struct Timers {
    next: u64,
    deadlines: Vec<(time::Instant, TimerId)>,
    callbacks: HashMap<TimerId, TimerCallback>,
}

pub struct State {
    pub(crate) dh: DisplayHandle,
    pub(crate) serial: Serial,
    pub(crate) socket_name: Option<OsString>,

    pub(crate) core: ObjectCore,
    pub(crate) subcompositor_core: ObjectCore,
    pub(crate) objects: ObjectTable,

    pub(crate) compositor_resources: Vec<wl_compositor::WlCompositor>,

    pub(crate) surfaces: SlotMap<SurfaceKey, Surface>,
    pub(crate) subsurfaces: SlotMap<SubsurfaceKey, Subsurface>,
    pub(crate) buffers: SlotMap<BufferKey, Buffer>,
    pub(crate) shm_pools: SlotMap<ShmPoolKey, ShmPool>,
    pub(crate) regions: SlotMap<RegionKey, RegionObject>,

    pub(crate) views: SlotMap<ViewKey, View>,
    /// Global z order, front first.
    pub(crate) view_list: Vec<ViewKey>,

    pub(crate) outputs: HashMap<u32, Output>,
    pub(crate) output_ids: u32,
    pub(crate) planes: SlotMap<PlaneKey, Plane>,

    pub(crate) seats: SlotMap<SeatKey, Seat>,
    pub(crate) devices: SlotMap<DeviceKey, InputDevice>,

    pub(crate) data_sources: SlotMap<DataSourceKey, DataSource>,
    pub(crate) data_device_list: Vec<(SeatKey, wayland_server::protocol::wl_data_device::WlDataDevice)>,
    pub(crate) selections: HashMap<SeatKey, DataSourceKey>,

    pub(crate) shell: Option<DesktopShell>,

    pub(crate) clock_id: rustix::time::ClockId,
    pub(crate) repaint_idle: Vec<OutputId>,
    pub(crate) timers: Timers,
}

impl State {
    pub fn new(dh: DisplayHandle, socket_name: Option<OsString>) -> Self {
        let mut objects = ObjectTable::new();
        let core = objects.register(ObjectRef::Compositor);
        let subcompositor_core = objects.register(ObjectRef::Subcompositor);

        let state = Self {
            dh: dh.clone(),
            serial: Serial::new(),
            socket_name,

            core,
            subcompositor_core,
            objects,

            compositor_resources: Vec::new(),

            surfaces: SlotMap::default(),
            subsurfaces: SlotMap::default(),
            buffers: SlotMap::default(),
            shm_pools: SlotMap::default(),
            regions: SlotMap::default(),

            views: SlotMap::default(),
            view_list: Vec::new(),

            outputs: HashMap::new(),
            output_ids: 0,
            planes: SlotMap::default(),

            seats: SlotMap::default(),
            devices: SlotMap::default(),

            data_sources: SlotMap::default(),
            data_device_list: Vec::new(),
            selections: HashMap::new(),

            shell: None,

            clock_id: rustix::time::ClockId::Monotonic,
            repaint_idle: Vec::new(),
            timers: Timers::default(),
        };

        dh.create_global::<State, wl_compositor::WlCompositor, ()>(4, ());
        dh.create_global::<State, wl_subcompositor::WlSubcompositor, ()>(1, ());
        dh.create_global::<State, wl_shm::WlShm, ()>(1, ());
        dh.create_global::<State, wl_data_device_manager::WlDataDeviceManager, ()>(2, ());

        state
    }

    pub fn display_handle(&self) -> &DisplayHandle {
        &self.dh
    }

    pub fn socket_name(&self) -> Option<&OsStr> {
        self.socket_name.as_deref()
    }

    pub fn next_serial(&self) -> u32 {
        self.serial.next()
    }

    /// The clock all frame times are measured against. Backends should use
    /// the same clock they time vsync with.
    pub fn set_clock_id(&mut self, id: rustix::time::ClockId) {
        self.clock_id = id;
    }

    pub fn current_time(&self) -> rustix::time::Timespec {
        rustix::time::clock_gettime(self.clock_id)
    }

    // ---- Object accessors for embedders and backends.

    pub fn surface(&self, key: SurfaceKey) -> Option<&Surface> {
        self.surfaces.get(key)
    }

    pub fn buffer(&self, key: BufferKey) -> Option<&Buffer> {
        self.buffers.get(key)
    }

    pub fn view(&self, key: ViewKey) -> Option<&View> {
        self.views.get(key)
    }

    pub fn subsurface(&self, key: SubsurfaceKey) -> Option<&Subsurface> {
        self.subsurfaces.get(key)
    }

    pub fn plane(&self, key: PlaneKey) -> Option<&Plane> {
        self.planes.get(key)
    }

    pub fn shm_pool(&self, key: ShmPoolKey) -> Option<&ShmPool> {
        self.shm_pools.get(key)
    }

    /// The global view z order, front first.
    pub fn view_z_order(&self) -> &[ViewKey] {
        &self.view_list
    }

    // ---- Object bus.

    pub(crate) fn object_core(&self, object: ObjectRef) -> Option<&ObjectCore> {
        Some(match object {
            ObjectRef::Compositor => &self.core,
            ObjectRef::Subcompositor => &self.subcompositor_core,
            ObjectRef::Surface(k) => &self.surfaces.get(k)?.core,
            ObjectRef::Subsurface(k) => &self.subsurfaces.get(k)?.core,
            ObjectRef::Buffer(k) => &self.buffers.get(k)?.core,
            ObjectRef::Region(k) => &self.regions.get(k)?.core,
            ObjectRef::View(k) => &self.views.get(k)?.core,
            ObjectRef::Output(id) => &self.outputs.get(&id.raw())?.core,
            ObjectRef::Plane(k) => &self.planes.get(k)?.core,
            ObjectRef::Seat(k) => &self.seats.get(k)?.core,
            ObjectRef::Pointer(k) => &self.seats.get(k)?.pointer.as_ref()?.core,
            ObjectRef::Keyboard(k) => &self.seats.get(k)?.keyboard.as_ref()?.core,
            ObjectRef::Touch(k) => &self.seats.get(k)?.touch.as_ref()?.core,
            ObjectRef::Device(k) => &self.devices.get(k)?.core,
        })
    }

    pub(crate) fn object_core_mut(&mut self, object: ObjectRef) -> Option<&mut ObjectCore> {
        Some(match object {
            ObjectRef::Compositor => &mut self.core,
            ObjectRef::Subcompositor => &mut self.subcompositor_core,
            ObjectRef::Surface(k) => &mut self.surfaces.get_mut(k)?.core,
            ObjectRef::Subsurface(k) => &mut self.subsurfaces.get_mut(k)?.core,
            ObjectRef::Buffer(k) => &mut self.buffers.get_mut(k)?.core,
            ObjectRef::Region(k) => &mut self.regions.get_mut(k)?.core,
            ObjectRef::View(k) => &mut self.views.get_mut(k)?.core,
            ObjectRef::Output(id) => &mut self.outputs.get_mut(&id.raw())?.core,
            ObjectRef::Plane(k) => &mut self.planes.get_mut(k)?.core,
            ObjectRef::Seat(k) => &mut self.seats.get_mut(k)?.core,
            ObjectRef::Pointer(k) => &mut self.seats.get_mut(k)?.pointer.as_mut()?.core,
            ObjectRef::Keyboard(k) => &mut self.seats.get_mut(k)?.keyboard.as_mut()?.core,
            ObjectRef::Touch(k) => &mut self.seats.get_mut(k)?.touch.as_mut()?.core,
            ObjectRef::Device(k) => &mut self.devices.get_mut(k)?.core,
        })
    }

    /// The engine-wide id of an object.
    pub fn object_id(&self, object: ObjectRef) -> Option<ObjectId> {
        self.object_core(object).map(|c| c.id())
    }

    /// Looks an object up by its engine-wide id.
    pub fn object_from_id(&self, id: ObjectId) -> Option<ObjectRef> {
        self.objects.lookup(id)
    }

    /// Registers a listener on an object. Higher priorities run earlier;
    /// `EventKind::All` observes every event of the object.
    pub fn add_listener(
        &mut self,
        object: ObjectRef,
        kind: EventKind,
        priority: i32,
        callback: EventCallback,
    ) -> Option<ListenerId> {
        self.object_core_mut(object)
            .map(|core| core.add_listener(kind, priority, callback))
    }

    pub fn remove_listener(&mut self, object: ObjectRef, listener: ListenerId) -> bool {
        self.object_core_mut(object)
            .map(|core| core.remove_listener(listener))
            .unwrap_or(false)
    }

    pub fn set_listener_priority(
        &mut self,
        object: ObjectRef,
        listener: ListenerId,
        priority: i32,
    ) -> bool {
        self.object_core_mut(object)
            .map(|core| core.set_listener_priority(listener, priority))
            .unwrap_or(false)
    }

    /// Emits an event on an object. Dispatch walks a snapshot of the
    /// listener list, so callbacks may add or remove listeners freely; each
    /// listener is delivered to at most once.
    pub fn emit(&mut self, object: ObjectRef, event: Event) {
        debug_assert!(event.kind != EventKind::All, "cannot emit the All event");
        if event.kind == EventKind::All {
            return;
        }

        let Some(snapshot) = self.object_core(object).map(|c| c.snapshot(event.kind)) else {
            return;
        };

        for (id, callback) in snapshot {
            let alive = self
                .object_core(object)
                .map(|c| c.contains_listener(id))
                .unwrap_or(false);

            if alive {
                callback(self, object, &event);
            }
        }
    }

    /// Emits `ObjectDestroy` so observers can detach cleanly before the
    /// object's state is freed.
    pub(crate) fn finish_object(&mut self, object: ObjectRef) {
        self.emit(object, Event::new(EventKind::ObjectDestroy));
    }

    pub fn set_user_data<T: 'static>(&mut self, object: ObjectRef, key: UserDataKey, data: T) {
        if let Some(core) = self.object_core_mut(object) {
            core.set_user_data(key, data);
        }
    }

    pub fn user_data<T: 'static>(&self, object: ObjectRef, key: UserDataKey) -> Option<&T> {
        self.object_core(object)?.user_data(key)
    }

    // ---- Region objects.

    pub fn create_region_object(&mut self, resource: Option<wl_region::WlRegion>) -> RegionKey {
        self.regions.insert_with_key(|k| RegionObject {
            core: self.objects.register(ObjectRef::Region(k)),
            resource,
            region: Region::new(),
        })
    }

    pub fn destroy_region_object(&mut self, key: RegionKey) {
        if !self.regions.contains_key(key) {
            return;
        }

        self.finish_object(ObjectRef::Region(key));
        let region = self.regions.remove(key).unwrap();
        self.objects.release(region.core.id());
    }

    pub fn region_object(&self, key: RegionKey) -> Option<&RegionObject> {
        self.regions.get(key)
    }

    pub fn region_object_add(&mut self, key: RegionKey, x: i32, y: i32, w: i32, h: i32) {
        if let Some(region) = self.regions.get_mut(key) {
            region.region.union_rect(Rect::from_size(x, y, w, h));
        }
    }

    pub fn region_object_subtract(&mut self, key: RegionKey, x: i32, y: i32, w: i32, h: i32) {
        if let Some(region) = self.regions.get_mut(key) {
            region.region.subtract_rect(Rect::from_size(x, y, w, h));
        }
    }

    // ---- Timers.

    /// Arms a one-shot timer. Timer callbacks run from the event loop (or
    /// [`State::run_due_timers`]).
    pub fn add_timer(
        &mut self,
        delay: time::Duration,
        callback: impl FnOnce(&mut State) + 'static,
    ) -> TimerId {
        let id = TimerId(self.timers.next);
        self.timers.next += 1;

        self.timers
            .deadlines
            .push((time::Instant::now() + delay, id));
        self.timers.callbacks.insert(id, Box::new(callback));

        id
    }

    pub fn cancel_timer(&mut self, timer: TimerId) {
        self.timers.callbacks.remove(&timer);
        self.timers.deadlines.retain(|(_, id)| *id != timer);
    }

    pub(crate) fn next_timer_deadline(&self) -> Option<time::Instant> {
        self.timers
            .deadlines
            .iter()
            .filter(|(_, id)| self.timers.callbacks.contains_key(id))
            .map(|(when, _)| *when)
            .min()
    }

    /// Runs every timer whose deadline has passed. Returns true if any ran.
    pub fn run_due_timers(&mut self) -> bool {
        let now = time::Instant::now();
        let mut ran = false;

        loop {
            let due = self
                .timers
                .deadlines
                .iter()
                .position(|(when, _)| *when <= now);

            let Some(index) = due else {
                break;
            };

            let (_, id) = self.timers.deadlines.remove(index);
            if let Some(callback) = self.timers.callbacks.remove(&id) {
                callback(self);
                ran = true;
            }
        }

        ran
    }
}

#[derive(Debug, Default)]
pub struct ClientState;

impl wayland_server::backend::ClientData for ClientState {
    fn initialized(&self, _client_id: wayland_server::backend::ClientId) {}
    fn disconnected(
        &self,
        _client_id: wayland_server::backend::ClientId,
        _reason: wayland_server::backend::DisconnectReason,
    ) {
    }
}

const DISPLAY: mio::Token = mio::Token(0);
const ACCEPT: mio::Token = mio::Token(1);

/// The engine plus its event loop: wayland display, listening socket, and
/// timer dispatch.
pub struct Compositor {
    poll: mio::Poll,
    display: wayland_server::Display<State>,
    listening_socket: Option<wayland_server::ListeningSocket>,

    pub state: State,
}

impl Compositor {
    /// Creates the compositor. With a socket name the display listens under
    /// that name in `XDG_RUNTIME_DIR`; with `None` an unused `wayland-N`
    /// name is picked.
    pub fn new(socket_name: Option<&str>) -> anyhow::Result<Self> {
        let mut display =
            wayland_server::Display::<State>::new().context("failed to create display")?;

        let listening_socket = match socket_name {
            Some(name) => wayland_server::ListeningSocket::bind(name)
                .with_context(|| format!("failed to bind socket {name:?}"))?,
            None => wayland_server::ListeningSocket::bind_auto("wayland", 1..33)
                .context("failed to bind socket")?,
        };

        let socket_name = listening_socket.socket_name().map(|n| n.to_owned());
        trace!(?socket_name, "bound wayland socket");

        let poll = mio::Poll::new()?;

        let display_fd = display.backend().poll_fd().as_raw_fd();
        poll.registry().register(
            &mut mio::unix::SourceFd(&display_fd),
            DISPLAY,
            mio::Interest::READABLE,
        )?;

        let listener_fd = listening_socket.as_raw_fd();
        poll.registry().register(
            &mut mio::unix::SourceFd(&listener_fd),
            ACCEPT,
            mio::Interest::READABLE,
        )?;

        let state = State::new(display.handle(), socket_name);

        Ok(Self {
            poll,
            display,
            listening_socket: Some(listening_socket),
            state,
        })
    }

    pub fn display_handle(&self) -> DisplayHandle {
        self.display.handle()
    }

    /// One turn of the event loop: wait for wire traffic or the next timer
    /// deadline, dispatch, then run the idle work (batched repaints).
    pub fn dispatch(&mut self) -> anyhow::Result<()> {
        let timeout = self
            .state
            .next_timer_deadline()
            .map(|deadline| deadline.saturating_duration_since(time::Instant::now()));

        let mut events = mio::Events::with_capacity(32);
        match self.poll.poll(&mut events, timeout) {
            Ok(()) => (),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        for event in events.iter() {
            match event.token() {
                ACCEPT => {
                    if let Some(socket) = &self.listening_socket {
                        if let Some(stream) = socket.accept()? {
                            let _client = self
                                .display
                                .handle()
                                .insert_client(stream, Arc::new(ClientState))?;
                            debug!("client connected");
                        }
                    }
                }
                DISPLAY => {
                    self.display
                        .dispatch_clients(&mut self.state)
                        .context("failed to dispatch the wayland display")?;
                }
                _ => unreachable!(),
            }
        }

        self.state.run_due_timers();
        self.state.flush_idle_repaints();
        self.display.flush_clients()?;

        Ok(())
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.dispatch()?;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::{cell::RefCell, rc::Rc};

    use wayland_server::protocol::wl_output;

    use super::*;
    use crate::{
        backend::OutputBackend,
        output::{OutputMode, MODE_CURRENT, MODE_PREFERRED},
        transform::Transform,
    };

    pub(crate) struct TestFixture {
        pub display: wayland_server::Display<State>,
        pub state: State,
    }

    impl TestFixture {
        pub(crate) fn new() -> Self {
            let display = wayland_server::Display::<State>::new().unwrap();
            let state = State::new(display.handle(), None);
            Self { display, state }
        }

        /// Drains idle repaints and timers until nothing is left, like the
        /// event loop does between poll wakeups.
        pub(crate) fn pump(&mut self) {
            loop {
                self.state.flush_idle_repaints();
                if !self.state.run_due_timers() {
                    break;
                }
            }
        }
    }

    pub(crate) fn test_buffer(state: &mut State) -> BufferKey {
        state.create_buffer(None, None)
    }

    pub(crate) fn test_buffer_with_size(state: &mut State, w: i32, h: i32) -> BufferKey {
        let key = state.create_buffer(None, None);
        state.buffers[key].size = Some((w, h));
        key
    }

    #[derive(Default)]
    pub(crate) struct StubLog {
        pub repaints: Vec<RepaintRecord>,
        pub start_loops: u32,
        pub set_modes: Vec<OutputMode>,
    }

    pub(crate) struct RepaintRecord {
        pub render_list: Vec<ViewKey>,
        /// (damage, clip) per plane, bottom to top.
        pub planes: Vec<(PlaneKey, Region, Region)>,
    }

    pub(crate) struct StubOutputBackend {
        pub modes: Rc<RefCell<Vec<OutputMode>>>,
        pub log: Rc<RefCell<StubLog>>,
        pub primary: Rc<std::cell::Cell<Option<PlaneKey>>>,
    }

    impl OutputBackend for StubOutputBackend {
        fn subpixel_order(&self) -> wl_output::Subpixel {
            wl_output::Subpixel::Unknown
        }

        fn maker_name(&self) -> String {
            "nacre".into()
        }

        fn model_name(&self) -> String {
            "virtual".into()
        }

        fn mode_count(&self) -> usize {
            self.modes.borrow().len()
        }

        fn mode(&self, index: usize) -> Option<OutputMode> {
            self.modes.borrow().get(index).copied()
        }

        fn set_mode(&mut self, mode: &OutputMode) -> bool {
            let mut modes = self.modes.borrow_mut();
            let Some(index) = modes
                .iter()
                .position(|m| m.w == mode.w && m.h == mode.h && m.refresh == mode.refresh)
            else {
                return false;
            };

            for m in modes.iter_mut() {
                m.flags &= !MODE_CURRENT;
            }
            modes[index].flags |= MODE_CURRENT;

            self.log.borrow_mut().set_modes.push(modes[index]);
            true
        }

        fn assign_planes(&mut self, state: &mut State, output: OutputId, views: &[ViewKey]) {
            let primary = match self.primary.get() {
                Some(plane) if state.planes.contains_key(plane) => plane,
                _ => {
                    let plane = state.add_plane(output, None).unwrap();
                    self.primary.set(Some(plane));
                    plane
                }
            };

            for view in views {
                if state.views[*view].plane_entry(output).plane.is_none() {
                    state.view_assign_plane(*view, output, Some(primary));
                }
            }
        }

        fn start_repaint_loop(&mut self, state: &mut State, output: OutputId) {
            self.log.borrow_mut().start_loops += 1;
            state.add_timer(time::Duration::ZERO, move |state| {
                state.finish_frame(output, None);
            });
        }

        fn repaint(&mut self, state: &mut State, _output: OutputId, planes: &[PlaneKey]) {
            let record = RepaintRecord {
                render_list: planes
                    .iter()
                    .flat_map(|p| state.planes[*p].render_list().to_vec())
                    .collect(),
                planes: planes
                    .iter()
                    .map(|p| {
                        let plane = &state.planes[*p];
                        (*p, plane.damage_region().clone(), plane.clip_region().clone())
                    })
                    .collect(),
            };
            self.log.borrow_mut().repaints.push(record);

            for plane in planes {
                state.plane_clear_damage(*plane);
            }
        }

        fn attach_surface(&mut self, state: &State, surface: SurfaceKey) -> Option<(i32, i32)> {
            let buffer = state.surfaces[surface].buffer()?;
            state.buffers.get(buffer)?.size()
        }

        fn flush_surface_damage(&mut self, _state: &State, _surface: SurfaceKey) -> bool {
            // Composition reads straight from the client buffer.
            true
        }
    }

    pub(crate) fn stub_output(
        state: &mut State,
        name: &str,
        modes: Vec<OutputMode>,
    ) -> (OutputId, Rc<RefCell<StubLog>>) {
        let log = Rc::new(RefCell::new(StubLog::default()));
        let backend = StubOutputBackend {
            modes: Rc::new(RefCell::new(modes)),
            log: log.clone(),
            primary: Rc::new(std::cell::Cell::new(None)),
        };

        let id = state
            .add_output(Box::new(backend), name, Transform::Normal, 1)
            .unwrap();
        (id, log)
    }

    pub(crate) fn add_test_output(state: &mut State, name: &str, w: i32, h: i32) -> OutputId {
        let (id, _) = stub_output(
            state,
            name,
            vec![OutputMode {
                w,
                h,
                refresh: 60_000,
                flags: MODE_CURRENT | MODE_PREFERRED,
            }],
        );
        id
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::test_util::*;
    use super::*;
    use crate::{
        input::{ButtonState, DeviceEvent, CAP_POINTER},
        output::{OutputMode, MODE_CURRENT, MODE_PREFERRED},
        view::VIEW_GEOMETRY_DIRTY,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn emit_survives_listener_removal_mid_walk() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let calls = Rc::new(std::cell::RefCell::new(Vec::new()));

        // The first listener removes the second during dispatch; the second
        // must not fire.
        let later: Rc<std::cell::Cell<Option<ListenerId>>> =
            Rc::new(std::cell::Cell::new(None));

        let calls_a = calls.clone();
        let later_a = later.clone();
        state.add_listener(
            ObjectRef::Compositor,
            EventKind::SeatAdd,
            10,
            Rc::new(move |state, object, _| {
                calls_a.borrow_mut().push("first");
                if let Some(id) = later_a.take() {
                    state.remove_listener(object, id);
                }
            }),
        );

        let calls_b = calls.clone();
        let second = state
            .add_listener(
                ObjectRef::Compositor,
                EventKind::SeatAdd,
                0,
                Rc::new(move |_, _, _| {
                    calls_b.borrow_mut().push("second");
                }),
            )
            .unwrap();
        later.set(Some(second));

        state.add_seat("seat0");
        assert_eq!(calls.borrow().as_slice(), &["first"]);

        // With nothing left to remove, both deliveries happen (the seat
        // listener was removed, the first one remains).
        state.add_seat("seat1");
        assert_eq!(calls.borrow().as_slice(), &["first", "first"]);
    }

    #[test]
    fn single_toplevel_repaint_cycle() {
        // A wallpaper-style client: one full-screen surface, committed
        // once; expect exactly one backend repaint covering the output and
        // a retired frame callback slot, then an empty repaint after an
        // empty commit.
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let (output, log) = stub_output(
            state,
            "stub-0",
            vec![OutputMode {
                w: 1920,
                h: 1080,
                refresh: 60_000,
                flags: MODE_CURRENT | MODE_PREFERRED,
            }],
        );

        let surface = state.create_surface(None);
        let view = state.add_view();
        state.view_set_surface(view, Some(surface));
        state.view_map(view);

        let buffer = test_buffer_with_size(state, 1920, 1080);
        state.surface_attach(surface, Some(buffer), 0, 0);
        state.surface_damage(surface, 0, 0, 1920, 1080);
        state.commit_surface(surface);

        fix.pump();

        {
            let log = log.borrow();
            assert_eq!(log.start_loops, 1);
            assert_eq!(log.repaints.len(), 1);

            let repaint = &log.repaints[0];
            assert_eq!(repaint.render_list, vec![view]);
            assert_eq!(
                repaint.planes[0].1,
                Region::from_rect(Rect::from_size(0, 0, 1920, 1080))
            );
        }

        let state = &mut fix.state;
        assert_eq!(state.surfaces[surface].size(), (1920, 1080));

        // A commit with no damage produces no repaint at all.
        state.commit_surface(surface);
        state.finish_frame(output, None);
        fix.pump();

        let log = log.borrow();
        assert_eq!(log.repaints.len(), 1);
        assert_eq!(log.start_loops, 1);
    }

    #[test]
    fn opaque_occlusion_masks_damage() {
        // Two stacked views; the back one's damage is clipped by the
        // opaque front one.
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let (output, log) = stub_output(
            state,
            "stub-0",
            vec![OutputMode {
                w: 200,
                h: 100,
                refresh: 60_000,
                flags: MODE_CURRENT,
            }],
        );

        // Surface A covers the whole output and declares itself opaque.
        let a = state.create_surface(None);
        let a_view = state.add_view();
        state.view_set_surface(a_view, Some(a));
        state.view_map(a_view);
        let a_buf = test_buffer_with_size(state, 200, 100);
        state.surface_attach(a, Some(a_buf), 0, 0);
        state.surface_set_opaque_region(
            a,
            Some(&Region::from_rect(Rect::from_size(0, 0, 200, 100))),
        );
        state.surface_damage(a, 0, 0, 200, 100);
        state.commit_surface(a);

        // Surface B covers the right half, opaque, stacked on top.
        let b = state.create_surface(None);
        let b_view = state.add_view();
        state.view_set_surface(b_view, Some(b));
        state.view_set_position(b_view, 100.0, 0.0);
        state.view_map(b_view);
        let b_buf = test_buffer_with_size(state, 100, 100);
        state.surface_attach(b, Some(b_buf), 0, 0);
        state.surface_set_opaque_region(
            b,
            Some(&Region::from_rect(Rect::from_size(0, 0, 100, 100))),
        );
        state.surface_damage(b, 0, 0, 100, 100);
        state.commit_surface(b);

        state.view_stack_top(b_view, false);
        fix.pump();

        let state = &mut fix.state;

        // A's visible region excludes B's opaque half.
        let a_visible = state.views[a_view].plane_entry(output).visible_region();
        assert_eq!(
            *a_visible,
            Region::from_rect(Rect::from_size(0, 0, 100, 100))
        );
        let b_visible = state.views[b_view].plane_entry(output).visible_region();
        assert_eq!(
            *b_visible,
            Region::from_rect(Rect::from_size(100, 0, 100, 100))
        );

        // Commit damage on A alone: the next repaint's damage stays within
        // A's visible half.
        let first_repaints = log.borrow().repaints.len();
        state.surface_damage(a, 0, 0, 200, 100);
        state.commit_surface(a);
        state.finish_frame(output, None);
        fix.pump();

        let log = log.borrow();
        assert!(log.repaints.len() > first_repaints);
        let damage = &log.repaints.last().unwrap().planes[0].1;
        assert_eq!(
            damage.contains_rect(&Rect::from_size(100, 0, 100, 100)),
            crate::region::Containment::Out
        );
    }

    #[test]
    fn default_clock_is_monotonic() {
        let fix = TestFixture::new();
        let a = fix.state.current_time();
        let b = fix.state.current_time();
        assert!(
            b.tv_sec > a.tv_sec || (b.tv_sec == a.tv_sec && b.tv_nsec >= a.tv_nsec)
        );
    }

    #[test]
    fn pointer_events_reach_listeners() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let seat = state.add_seat("seat0");
        let dev = state.create_input_device(CAP_POINTER, None);
        state.seat_add_input_device(seat, dev);

        let motions = Rc::new(std::cell::RefCell::new(Vec::new()));
        let motions2 = motions.clone();
        state.add_listener(
            ObjectRef::Pointer(seat),
            EventKind::PointerMotion,
            0,
            Rc::new(move |_, _, event| {
                if let Some(DeviceEvent::PointerMotionAbsolute { x, y, .. }) = event.info.input() {
                    motions2.borrow_mut().push((x, y));
                }
            }),
        );

        state.post_device_event(
            dev,
            DeviceEvent::PointerMotionAbsolute {
                time: 1,
                x: 10.0,
                y: 20.0,
            },
        );
        state.post_device_event(
            dev,
            DeviceEvent::PointerMotion {
                time: 2,
                dx: 5.0,
                dy: -5.0,
            },
        );
        state.post_device_event(
            dev,
            DeviceEvent::PointerButton {
                time: 3,
                button: 0x110,
                state: ButtonState::Pressed,
            },
        );

        assert_eq!(motions.borrow().as_slice(), &[(10.0, 20.0), (15.0, 15.0)]);
        assert_eq!(state.pointer(seat).unwrap().position(), (15.0, 15.0));
    }

    #[test]
    fn repaint_schedule_coalesces() {
        let mut fix = TestFixture::new();
        let state = &mut fix.state;

        let (output, log) = stub_output(
            state,
            "stub-0",
            vec![OutputMode {
                w: 64,
                h: 64,
                refresh: 60_000,
                flags: MODE_CURRENT,
            }],
        );

        let surface = state.create_surface(None);
        let view = state.add_view();
        state.view_set_surface(view, Some(surface));
        state.view_map(view);

        // Many dirty marks, one repaint.
        state.view_mark_dirty(view, VIEW_GEOMETRY_DIRTY);
        state.schedule_repaint(output);
        state.schedule_repaint(output);
        fix.pump();

        assert_eq!(log.borrow().start_loops, 1);
        assert_eq!(log.borrow().repaints.len(), 1);
    }
}
