//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//Not every test binary uses every helper
#![allow(dead_code)]

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::ops;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

lazy_static! {
    static ref CUR_PORT: Mutex<u16> = Mutex::new(49151);
}

///Find available ports to use for tests
///
/// Returns a vector of `num_ports` port numbers that are available
/// for TCP. Every invocation will return a set not used by any prior
/// invocation, so that if this function is used by multiple
/// concurrent tests they won't race with each other. There is
/// inevitably still a race with other unrelated processes on the
/// system which might grab the ports between when we call this
/// function and when the server starts up.
pub fn find_ports(num_ports: usize) -> Vec<u16> {
    let mut ports = Vec::with_capacity(num_ports);
    let mut cur_port = CUR_PORT.lock().unwrap();

    while ports.len() < num_ports {
        if *cur_port == 65535 {
            panic!("Couldn't find enough available ports");
        }
        *cur_port += 1;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), *cur_port);
        if TcpListener::bind(&addr).is_ok() {
            ports.push(*cur_port);
        }
    }

    ports
}

///Block until something is accepting TCP connections on `port`.
pub fn await_listening(port: u16) {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(250)).is_ok() {
            return;
        }
        if Instant::now() > deadline {
            panic!("Server never started listening on port {}", port);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

///Path to one of this package's binaries, next to the test binary.
pub fn bin_path(name: &str) -> PathBuf {
    let testbin_path = std::env::current_exe().unwrap();
    let testbin_dir = testbin_path.parent().unwrap();
    let bin_dir = testbin_dir.parent().unwrap();
    let mut path = bin_dir.to_owned();
    path.push(name);
    path.set_extension(std::env::consts::EXE_EXTENSION);
    assert!(path.exists(), "no binary at {:?}", path);
    path
}

///Path to the committed test certificates.
pub fn cert_dir() -> PathBuf {
    let mut dir = PathBuf::new();
    dir.push(env!("CARGO_MANIFEST_DIR"));
    dir.push("tests");
    dir.push("test_certs");
    assert!(dir.exists());
    dir
}

///Wrapper around a Child that kills it and collects its exit status
/// when dropped
pub struct ChildWrapper {
    child: Option<process::Child>,
}

impl ChildWrapper {
    pub fn wait_with_output(mut self) -> io::Result<process::Output> {
        mem::replace(&mut self.child, None)
            .unwrap()
            .wait_with_output()
    }
}

impl Drop for ChildWrapper {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            if child.try_wait().unwrap().is_none() {
                let _ = child.kill();
                child.wait().unwrap();
            }
        }
    }
}

impl ops::Deref for ChildWrapper {
    type Target = process::Child;
    fn deref(&self) -> &process::Child {
        self.child.as_ref().unwrap()
    }
}

impl ops::DerefMut for ChildWrapper {
    fn deref_mut(&mut self) -> &mut process::Child {
        self.child.as_mut().unwrap()
    }
}

impl From<process::Child> for ChildWrapper {
    fn from(child: process::Child) -> ChildWrapper {
        ChildWrapper { child: Some(child) }
    }
}
