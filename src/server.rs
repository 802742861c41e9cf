//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//!The NTS-KE accept loop
//!
//!One task per accepted connection, each bounded by a session
//! timeout. Connections share nothing mutable; the context is
//! read-only for the life of the process.

use crate::ke::{self, ServerContext};
use log::debug;
use std::sync::Arc;
use tokio::io;
use tokio::net::TcpListener;
use tokio::time;

///How long one NTS-KE session may take before its task is dropped
const SESSION_TIMEOUT: time::Duration = time::Duration::from_secs(5);

///Serve NTS-KE sessions forever.
pub async fn serve(
    listener: TcpListener,
    acceptor: tokio_rustls::TlsAcceptor,
    ctx: Arc<ServerContext>,
) -> io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((tcp_stream, peer_addr)) => {
                let acceptor = acceptor.clone();
                let ctx = ctx.clone();
                tokio::spawn(time::timeout(SESSION_TIMEOUT, async move {
                    match acceptor.accept(tcp_stream).await {
                        Ok(mut tls_stream) => {
                            match ke::serve_ntske(&ctx, &mut tls_stream).await {
                                Ok(()) => {
                                    debug!("Successful NTS-KE session with {}", peer_addr)
                                }
                                Err(e) => debug!("In NTS-KE session with {}: {}", peer_addr, e),
                            }
                        }
                        Err(e) => debug!("In TLS handshake with {}: {}", peer_addr, e),
                    }
                }));
            }
            //Yes, this is non-fatal. accept(2) can return errors for
            // a lot of silly, transient reasons like EHOSTUNREACH
            Err(e) => debug!("Accepting a TCP connection: {}", e),
        }
    }
}
