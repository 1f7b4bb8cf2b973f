use async_trait::async_trait;
use std::process::{Command, Stdio};

use crate::{error::OpenError, model::is_http_url};

/// Opens a URL in the user's browser.
#[async_trait]
pub trait TabOpener: Send + Sync {
    async fn open(&self, url: &str, activate: bool) -> Result<(), OpenError>;
}

/// Hands the URL to the platform opener (`open` on macOS, `xdg-open`
/// elsewhere).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl SystemBrowser {
    fn command(url: &str, activate: bool) -> Command {
        #[cfg(target_os = "macos")]
        {
            let mut command = Command::new("open");
            if !activate {
                command.arg("-g");
            }
            command.arg(url);
            command
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = activate;
            let mut command = Command::new("xdg-open");
            command.arg(url);
            command
        }
    }
}

#[async_trait]
impl TabOpener for SystemBrowser {
    async fn open(&self, url: &str, activate: bool) -> Result<(), OpenError> {
        if !is_http_url(url) {
            return Err(OpenError::InvalidUrl(url.to_string()));
        }

        let mut command = Self::command(url, activate);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let status = tokio::task::spawn_blocking(move || command.status())
            .await
            .map_err(|error| OpenError::Launch(error.to_string()))?
            .map_err(|error| OpenError::Launch(error.to_string()))?;
        if !status.success() {
            return Err(OpenError::Launch(format!("opener exited with {status}")));
        }
        tracing::info!(%url, activate, "opened url");
        Ok(())
    }
}
