//! Network reachability as seen by the sync worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Atomic online flag, kept current by whoever watches the network.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!("[SYNC] Connectivity: {}", if online { "online" } else { "offline" });
        }
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// `host:port` to dial for a backend base URL.
pub fn backend_address(base_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(base_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Whether a TCP connection to `addr` opens within `timeout`.
pub async fn is_reachable(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("[SYNC] {} not reachable: {}", addr, e);
            false
        }
        Err(_) => {
            debug!("[SYNC] {} not reachable: timed out", addr);
            false
        }
    }
}
