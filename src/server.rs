//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DnsServerConfig;
use crate::error::GslbError;
use crate::resolver::GslbHandler;

/// Idle timeout applied to TCP DNS connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period for in-flight responses at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// UDP+TCP DNS server fronting the GSLB handler.
pub struct DnsServer {
    cnf: DnsServerConfig,
    handler: GslbHandler,
}

impl DnsServer {
    /// Create a server serving `handler` on the configured address.
    pub fn new(cnf: DnsServerConfig, handler: GslbHandler) -> Self {
        Self { cnf, handler }
    }

    /// Bind and serve until `cancel` fires, then drain gracefully.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), GslbError> {
        let mut server = ServerFuture::new(self.handler);

        let udp_socket = UdpSocket::bind(self.cnf.listen).await?;
        info!(addr = %self.cnf.listen, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.cnf.listen).await?;
        info!(addr = %self.cnf.listen, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!(error = %e, "DNS server error");
                }
            }
        }

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, server.shutdown_gracefully())
            .await
            .is_err()
        {
            warn!("timed out draining in-flight DNS responses");
        }
        info!("DNS server stopped");
        Ok(())
    }
}
