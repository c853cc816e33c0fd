//! Sources of raw connections to the ADB server

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;

use adblib_core::prelude::*;
use adblib_core::AdbSessionConfig;

use crate::channel::{with_deadline, AdbChannel, AdbStreamChannel};

/// Opens duplex connections to the ADB server
///
/// Everything in this crate reaches the server through a provider, so tests
/// can substitute an in-memory server.
pub trait AdbChannelProvider: Send + Sync {
    fn create_channel(&self, timeout: Duration) -> BoxFuture<'_, Result<Box<dyn AdbChannel>>>;
}

/// Provider connecting over TCP to `host:port`
#[derive(Debug, Clone)]
pub struct TcpChannelProvider {
    host: String,
    port: u16,
}

impl TcpChannelProvider {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_config(config: &AdbSessionConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AdbChannelProvider for TcpChannelProvider {
    fn create_channel(&self, timeout: Duration) -> BoxFuture<'_, Result<Box<dyn AdbChannel>>> {
        Box::pin(async move {
            let address = self.address();
            let stream = with_deadline("connect to ADB server", timeout, async {
                TcpStream::connect(&address).await.map_err(|e| {
                    debug!("Failed to connect to {}: {}", address, e);
                    Error::from(e)
                })
            })
            .await?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY on ADB connection: {}", e);
            }
            trace!("Opened ADB server connection to {}", address);
            Ok(Box::new(AdbStreamChannel::new(stream)) as Box<dyn AdbChannel>)
        })
    }
}
