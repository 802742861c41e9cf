//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//! THIS CRATE IS NOT A LIBRARY.
//!
//! The API exposed by this crate is intended only for internal use by
//! the `ntsclient` and `ntskeserver` binaries and carries no stability
//! guarantees whatsoever. The two programs interoperate on the wire:
//! cookies minted by `ntskeserver` are opaque to clients but must
//! remain decryptable by any server holding the same cookie secret,
//! so the cookie layout in the `cookie` module is versioned along
//! with the package.

pub mod aead;
pub mod client;
pub mod clock;
pub mod config;
pub mod cookie;
pub mod ke;
pub mod logging;
pub mod ntp;
pub mod records;
pub mod server;
