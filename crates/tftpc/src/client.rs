//! File-level TFTP client
//!
//! Wraps a [`TransferSession`] with name resolution, socket setup and local
//! file handling.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, TftpError};
use crate::events::TransferObserver;
use crate::session::{LocalEnd, TransferRequest, TransferSession, TransferSummary};
use crate::transport::UdpTransport;

pub struct TftpClient {
    config: ClientConfig,
    cancel: CancellationToken,
}

impl TftpClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel in-flight transfers when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve the configured server host and port.
    pub async fn resolve_server(&self) -> Result<SocketAddr> {
        let host = self.config.server.as_str();
        let mut addrs = tokio::net::lookup_host((host, self.config.port)).await?;
        addrs
            .next()
            .ok_or_else(|| TftpError::Config(format!("Could not resolve server '{}'", host)))
    }

    /// Download `remote` into `local`.
    ///
    /// Data lands in `<local>.tmp` first; the file only appears under its
    /// final name once the transfer completed, and the partial file is
    /// removed otherwise.
    pub async fn get(
        &self,
        remote: &str,
        local: &Path,
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<TransferSummary> {
        let server = self.resolve_server().await?;
        let transport = UdpTransport::bind_for(server, self.config.recv_buffer_kb)?;

        let mut request =
            TransferRequest::download(remote).with_block_size(self.config.block_size);
        if !self.config.request_tsize {
            request = request.without_transfer_size();
        }

        info!("Downloading {} from {} to {}", remote, server, local.display());

        let tmp_path = temp_path(local);
        let mut file = File::create(&tmp_path).await?;

        let mut session =
            TransferSession::new(&transport, server, request, self.config.retry_timer())
                .with_cancellation(self.cancel.clone());
        let result = session.run(LocalEnd::Sink(&mut file), observer).await;
        drop(file);

        match result {
            Ok(summary) => {
                tokio::fs::rename(&tmp_path, local).await?;
                debug!("Moved {} to {}", tmp_path.display(), local.display());
                Ok(summary)
            }
            Err(err) => {
                if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
                    warn!("Failed to remove {}: {}", tmp_path.display(), e);
                }
                Err(err)
            }
        }
    }

    /// Upload `local` as `remote`, declaring its size when tsize is enabled.
    pub async fn put(
        &self,
        local: &Path,
        remote: &str,
        observer: &mut (dyn TransferObserver + Send),
    ) -> Result<TransferSummary> {
        let mut file = File::open(local).await?;
        let size = file.metadata().await?.len();

        let server = self.resolve_server().await?;
        let transport = UdpTransport::bind_for(server, self.config.recv_buffer_kb)?;

        let declared = self.config.request_tsize.then_some(size);
        let request =
            TransferRequest::upload(remote, declared).with_block_size(self.config.block_size);

        info!(
            "Uploading {} ({} bytes) to {} as {}",
            local.display(),
            size,
            server,
            remote
        );

        let mut session =
            TransferSession::new(&transport, server, request, self.config.retry_timer())
                .with_cancellation(self.cancel.clone());
        session.run(LocalEnd::Source(&mut file), observer).await
    }
}

fn temp_path(local: &Path) -> PathBuf {
    let mut name = OsString::from(local.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/tmp/out/image.bin")),
            PathBuf::from("/tmp/out/image.bin.tmp")
        );
        assert_eq!(temp_path(Path::new("boot")), PathBuf::from("boot.tmp"));
    }

    #[tokio::test]
    async fn resolves_ip_literal_with_configured_port()
    -> std::result::Result<(), Box<dyn std::error::Error>> {
        let client = TftpClient::new(ClientConfig {
            server: "127.0.0.1".to_string(),
            port: 6969,
            ..Default::default()
        });
        let addr = client.resolve_server().await?;
        assert_eq!(addr, "127.0.0.1:6969".parse::<SocketAddr>()?);
        Ok(())
    }
}
