use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    domain::{ChatId, MessageBody, SourceMessage},
    errors::ProviderError,
    ports::ChannelProvider,
};

/// Successful outcome of reproducing one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transferred {
    /// The target confirmed a text or media send.
    Sent,
    /// Nothing to reproduce; counts as delivered.
    NothingToSend,
    /// Service message; intentionally not reproduced and not recorded.
    ServiceSkipped,
}

impl Transferred {
    /// Whether the id belongs in the ledger.
    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::Sent | Self::NothingToSend)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// Retry the same message after waiting.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("{0}")]
    Permanent(String),
}

impl From<ProviderError> for TransferError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::RateLimited(d) => Self::RateLimited(d),
            ProviderError::Failed(detail) => Self::Permanent(detail),
        }
    }
}

/// Reproduces a single source message in the target channel.
pub struct TransferExecutor {
    provider: Arc<dyn ChannelProvider>,
    temp_dir: PathBuf,
}

impl TransferExecutor {
    pub fn new(provider: Arc<dyn ChannelProvider>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            temp_dir: temp_dir.into(),
        }
    }

    pub async fn transfer(
        &self,
        message: &SourceMessage,
        target: ChatId,
    ) -> Result<Transferred, TransferError> {
        match &message.body {
            MessageBody::Service => Ok(Transferred::ServiceSkipped),
            MessageBody::Media { caption, .. } => {
                let path = self
                    .provider
                    .download_media(message, &self.temp_dir)
                    .await?;
                let local = TempMedia::new(path);
                self.provider
                    .send_media(target, message, local.path(), caption.as_deref().unwrap_or(""))
                    .await?;
                Ok(Transferred::Sent)
            }
            MessageBody::Text(text) if !text.trim().is_empty() => {
                self.provider.send_text(target, text).await?;
                Ok(Transferred::Sent)
            }
            MessageBody::Text(_) | MessageBody::Empty => Ok(Transferred::NothingToSend),
            MessageBody::Unavailable(reason) => Err(TransferError::Permanent(format!(
                "source message cannot be copied: {reason}"
            ))),
        }
    }
}

/// Downloaded media file, removed when dropped on every exit path.
struct TempMedia {
    path: PathBuf,
}

impl TempMedia {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempMedia {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove temp media");
            }
        }
    }
}
