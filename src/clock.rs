//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//!Stepping the system clock
//!
//!Setting the realtime clock needs root or CAP_SYS_TIME. This is kept
//! to a single narrow entry point so deployments can delegate it to a
//! privileged helper and sandbox everything else.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

///Shift a point in time by a signed offset in seconds.
pub fn adjusted(now: SystemTime, offset_secs: f64) -> SystemTime {
    if offset_secs >= 0.0 {
        now + Duration::from_secs_f64(offset_secs)
    } else {
        now - Duration::from_secs_f64(-offset_secs)
    }
}

///Step the realtime clock to `t`. Fails with
/// `io::ErrorKind::PermissionDenied` when we lack CAP_SYS_TIME.
pub fn set_time(t: SystemTime) -> io::Result<()> {
    let since_epoch = t
        .duration_since(UNIX_EPOCH)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "time predates the epoch"))?;

    let timespec = libc::timespec {
        tv_sec: since_epoch.as_secs() as libc::time_t,
        tv_nsec: since_epoch.subsec_nanos() as libc::c_long,
    };

    let rc = unsafe { libc::clock_settime(libc::CLOCK_REALTIME, &timespec) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
