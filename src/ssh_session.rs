use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use log::{info, warn};
use russh::client::{self, Handle};
use russh::keys::ssh_key::PublicKey;
use russh::Disconnect;

use rustedbytes_sftpc::{SessionConfig, SftpSession};

pub struct SshClient {
    host: String,
}

impl client::Handler for SshClient {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        warn!(
            "accepting unverified {} host key from {}",
            server_public_key.algorithm(),
            self.host
        );
        Ok(true)
    }
}

/// An authenticated SSH connection able to open SFTP channels.
pub struct SshConnection {
    handle: Handle<SshClient>,
}

impl SshConnection {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        inactivity_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(inactivity_timeout),
            ..Default::default()
        });
        let handler = SshClient {
            host: host.to_string(),
        };

        info!("connecting to {host}:{port}");
        let mut handle = client::connect(config, (host, port), handler)
            .await
            .with_context(|| format!("connecting to {host}:{port}"))?;

        let auth = handle
            .authenticate_password(username, password)
            .await
            .context("password authentication")?;
        if !auth.success() {
            bail!("authentication rejected for user {username}");
        }
        info!("authenticated as {username}");

        Ok(Self { handle })
    }

    /// Opens a session channel, starts the `sftp` subsystem on it and
    /// negotiates an SFTP session over the channel stream.
    pub async fn open_sftp(&self, config: SessionConfig) -> anyhow::Result<SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .context("opening session channel")?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .context("requesting sftp subsystem")?;

        let session = SftpSession::connect(channel.into_stream(), config)
            .await
            .context("starting SFTP session")?;
        info!(
            "SFTP version {} ready, working directory {}",
            session.protocol_version(),
            session.working_directory().unwrap_or_default()
        );
        Ok(session)
    }

    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .context("disconnecting")?;
        Ok(())
    }
}
