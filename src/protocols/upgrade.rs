//! HTTP/1.1 upgrades (exec, attach, port-forward streams).
//!
//! Once the upstream answers `101 Switching Protocols` and the client has received that
//! answer, both sides are raw byte streams and are joined until either one closes.

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use metrics::counter;
use tokio::io::copy_bidirectional;
use tracing::{debug, warn};

/// Join the client connection and the upstream connection on a background task
///
/// The task outlives the request that started it; it ends when either side closes.
pub fn splice(cluster: String, client: OnUpgrade, upstream: reqwest::Response) {
    tokio::spawn(async move {
        let mut upstream = match upstream.upgrade().await {
            Ok(io) => io,
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "Upstream upgrade failed");
                counter!("forward_errors_total", "cluster" => cluster).increment(1);
                return;
            }
        };

        let mut client = match client.await {
            Ok(io) => TokioIo::new(io),
            Err(e) => {
                warn!(cluster = %cluster, error = %e, "Client upgrade failed");
                return;
            }
        };

        match copy_bidirectional(&mut client, &mut upstream).await {
            Ok((sent, received)) => {
                debug!(cluster = %cluster, sent, received, "Upgraded stream closed");
            }
            Err(e) => {
                debug!(cluster = %cluster, error = %e, "Upgraded stream ended with error");
            }
        }
    });
}
