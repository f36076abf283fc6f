// Copyright 2025 the nacre authors
//
// SPDX-License-Identifier: MIT

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(missing_docs)]

use wayland_server;
use wayland_server::protocol::*;

pub mod __interfaces {
    use wayland_server::backend as wayland_backend;
    use wayland_server::protocol::__interfaces::*;
    wayland_scanner::generate_interfaces!("src/shell/protocols/nacre-shell.xml");
}

use self::__interfaces::*;
wayland_scanner::generate_server_code!("src/shell/protocols/nacre-shell.xml");
