//Copyright 2021, Akamai Technologies, Inc.
//SPDX-License-Identifier: Apache-2.0

//!The client polling loop
//!
//!Each round runs one NTS-KE exchange and then spends the cookies it
//! yielded, one NTP query per cookie, sleeping the configured
//! interval between queries. Any query or validation failure abandons
//! the remaining cookies and forces a fresh exchange; stale session
//! keys aren't worth spending more cookies on.
//
//TODO: a server that issues N cookies stretches the time between
// exchanges to roughly N * interval, since the interval sleep also
// runs between cookies. Deliberate for now; revisit whether the
// inter-cookie sleep should be shorter than the inter-exchange one.

use crate::clock;
use crate::config::ClientConfig;
use crate::ke::{Data, ExchangeError, KeyExchange};
use crate::ntp::{self, NtpError, QueryOptions, Response};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::io;
use tokio::time::sleep;

///How long to wait before retrying a failed key exchange
pub const KE_RETRY_DELAY: Duration = Duration::from_secs(10);

///Run one complete key exchange against the configured server.
async fn key_exchange(cfg: &ClientConfig) -> Result<Data, ExchangeError> {
    let mut ke = KeyExchange::connect(&cfg.server, &cfg.tls_connector, cfg.debug).await?;
    ke.exchange().await?;
    ke.export_keys()?;
    Ok(ke.into_data())
}

fn log_exchange(data: &Data) {
    debug!(
        "NTS-KE exchange yielded c2s {:x?} s2c {:x?} server {} port {} algo {}",
        data.c2s_key, data.s2c_key, data.server, data.port, data.algo.0
    );
    for (i, cookie) in data.cookies.iter().enumerate() {
        debug!("cookie #{}: {:x?}", i + 1, cookie);
    }
}

///Report a validated response and, unless this is a dry run, step the
/// clock by its offset. Not being allowed to set the clock is
/// reported but doesn't stop the loop; offsets are still useful
/// output.
fn apply_response(cfg: &ClientConfig, data: &Data, response: &Response) {
    if cfg.dry_run || cfg.verbose || cfg.debug {
        let time: DateTime<Local> = response.time.into();
        info!(
            "Network time on {}:{} {}. Local clock off by {:.6} s.",
            data.server, data.port, time, response.clock_offset
        );
    }
    if cfg.dry_run {
        debug!("Dry-run, not setting system time");
        return;
    }
    let target = clock::adjusted(SystemTime::now(), response.clock_offset);
    if let Err(e) = clock::set_time(target) {
        warn!("Couldn't set system time: {}", e);
    }
}

///Spend the cookies from one exchange, one query each. The query
/// itself is passed in so the policy here can be tested without a
/// network. Returns after the last cookie, or early after the first
/// failure; either way the caller's next move is a fresh exchange.
pub async fn consume_cookies<Q, F>(cfg: &ClientConfig, data: &Data, mut query: Q)
where
    Q: FnMut(String, QueryOptions) -> F,
    F: Future<Output = Result<Response, NtpError>>,
{
    let interval = Duration::from_secs(cfg.interval);

    for cookie in &data.cookies {
        let opts = QueryOptions {
            port: data.port,
            nts: true,
            c2s: data.c2s_key.clone(),
            s2c: data.s2c_key.clone(),
            cookie: cookie.clone(),
            debug: cfg.debug,
        };

        match query(data.server.clone(), opts).await {
            Ok(response) => match response.validate() {
                Ok(()) => apply_response(cfg, data, &response),
                Err(e) => {
                    warn!("NTP response validation error: {}", e);
                    sleep(interval).await;
                    return;
                }
            },
            Err(e) => {
                warn!("NTP query failed: {}", e);
                sleep(interval).await;
                return;
            }
        }

        sleep(interval).await;
    }
}

///The polling loop. Never returns; the process ends by signal.
pub async fn run(cfg: &ClientConfig) -> io::Result<()> {
    loop {
        let data = match key_exchange(cfg).await {
            Ok(data) => data,
            Err(e) => {
                warn!("key exchange with {} failed: {}", cfg.server, e);
                sleep(KE_RETRY_DELAY).await;
                continue;
            }
        };

        if cfg.debug {
            log_exchange(&data);
        }

        consume_cookies(cfg, &data, |server, opts| async move {
            ntp::query(&server, opts).await
        })
        .await;
    }
}
