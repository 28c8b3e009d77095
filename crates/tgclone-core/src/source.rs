//! Ordered enumeration of a channel's history.

use std::sync::Arc;

use crate::{
    backoff::BackoffController,
    domain::{ChatId, MessageId, SourceMessage},
    errors::ProviderError,
    ports::ChannelProvider,
};

/// Inclusive id bounds for a range clone. Open on either side when `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdRange {
    pub start: Option<i32>,
    pub end: Option<i32>,
}

impl IdRange {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn between(start: i32, end: i32) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.start.map_or(true, |s| id.0 >= s) && self.end.map_or(true, |e| id.0 <= e)
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl std::fmt::Display for IdRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.start, self.end) {
            (None, None) => write!(f, "all"),
            (s, e) => write!(
                f,
                "{}..={}",
                s.map(|v| v.to_string()).unwrap_or_default(),
                e.map(|v| v.to_string()).unwrap_or_default()
            ),
        }
    }
}

/// Result of an enumeration. `error` is set when paging stopped early; the
/// messages collected up to that point are still usable.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub messages: Vec<SourceMessage>,
    pub pages: usize,
    pub error: Option<ProviderError>,
}

impl FetchOutcome {
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

pub struct MessageSource {
    provider: Arc<dyn ChannelProvider>,
    page_size: usize,
}

impl MessageSource {
    pub fn new(provider: Arc<dyn ChannelProvider>, page_size: usize) -> Self {
        Self {
            provider,
            page_size: page_size.max(1),
        }
    }

    /// Fetch the whole history newest-to-oldest, then return it ascending by id,
    /// restricted to `range`. Rate limits are waited out; any other page failure
    /// ends paging and is reported in `FetchOutcome::error`.
    pub async fn fetch_ordered(
        &self,
        channel: ChatId,
        range: IdRange,
        backoff: &mut BackoffController,
    ) -> FetchOutcome {
        let mut out = FetchOutcome::default();
        let mut cursor: Option<MessageId> = None;

        loop {
            let page = match self
                .provider
                .fetch_history_page(channel, cursor, self.page_size)
                .await
            {
                Ok(page) => page,
                Err(ProviderError::RateLimited(d)) => {
                    backoff.wait(d).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        channel = channel.0,
                        pages = out.pages,
                        collected = out.messages.len(),
                        error = %e,
                        "history enumeration stopped early"
                    );
                    out.error = Some(e);
                    break;
                }
            };

            if page.is_empty() {
                break;
            }
            out.pages += 1;

            let Some(oldest) = page.iter().map(|m| m.id).min() else {
                break;
            };
            out.messages
                .extend(page.into_iter().filter(|m| range.contains(m.id)));

            if cursor.is_some_and(|prev| oldest >= prev) {
                tracing::warn!(cursor = %oldest, "provider cursor did not move back, stopping");
                break;
            }
            cursor = Some(oldest);

            // Everything further back is below the range.
            if range.start.is_some_and(|s| oldest.0 <= s) {
                break;
            }
        }

        out.messages.sort_by_key(|m| m.id);
        out.messages.dedup_by_key(|m| m.id);
        tracing::info!(
            channel = channel.0,
            pages = out.pages,
            messages = out.messages.len(),
            range = %range,
            "history collected"
        );
        out
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory provider shared by the core tests.

    use std::{
        collections::{BTreeMap, HashMap},
        path::{Path, PathBuf},
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;

    use crate::{
        domain::{ChatId, MessageBody, MessageId, SourceMessage},
        errors::{ProviderError, ProviderResult},
        ports::ChannelProvider,
    };

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Call {
        Page(Option<i32>),
        Text(i32),
        Media(i32),
        Download(i32),
    }

    #[derive(Default)]
    pub struct FakeProvider {
        pub history: BTreeMap<i32, SourceMessage>,
        pub calls: Mutex<Vec<Call>>,
        pub sent: Mutex<Vec<String>>,
        pub send_times: Mutex<Vec<(i32, tokio::time::Instant)>>,
        /// Scripted failures for sends, consumed in order per message id.
        pub send_failures: Mutex<HashMap<i32, Vec<ProviderError>>>,
        /// Fail the n-th page fetch (0-based).
        pub fail_page: Option<usize>,
        pub fail_download: bool,
    }

    impl FakeProvider {
        pub fn with_messages(msgs: Vec<SourceMessage>) -> Self {
            Self {
                history: msgs.into_iter().map(|m| (m.id.0, m)).collect(),
                ..Self::default()
            }
        }

        pub fn text_channel(ids: impl IntoIterator<Item = i32>) -> Self {
            Self::with_messages(
                ids.into_iter()
                    .map(|i| SourceMessage::text(i, &format!("msg {i}")))
                    .collect(),
            )
        }

        pub fn fail_send(&self, id: i32, errors: Vec<ProviderError>) {
            self.send_failures.lock().unwrap().insert(id, errors);
        }

        pub fn rate_limit_once(&self, id: i32, secs: u64) {
            self.fail_send(id, vec![ProviderError::RateLimited(Duration::from_secs(secs))]);
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn send_attempts(&self) -> Vec<i32> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Text(i) | Call::Media(i) => Some(i),
                    _ => None,
                })
                .collect()
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn send_times_of(&self, id: i32) -> Vec<tokio::time::Instant> {
            self.send_times
                .lock()
                .unwrap()
                .iter()
                .filter(|(i, _)| *i == id)
                .map(|(_, t)| *t)
                .collect()
        }

        fn scripted_failure(&self, id: i32) -> Option<ProviderError> {
            self.send_times
                .lock()
                .unwrap()
                .push((id, tokio::time::Instant::now()));
            let mut map = self.send_failures.lock().unwrap();
            let queue = map.get_mut(&id)?;
            if queue.is_empty() {
                return None;
            }
            Some(queue.remove(0))
        }

        fn id_for_text(&self, text: &str) -> i32 {
            self.history
                .values()
                .find(|m| matches!(&m.body, MessageBody::Text(t) if t == text))
                .map(|m| m.id.0)
                .unwrap_or(-1)
        }
    }

    #[async_trait]
    impl ChannelProvider for FakeProvider {
        async fn fetch_history_page(
            &self,
            _channel: ChatId,
            before: Option<MessageId>,
            page_size: usize,
        ) -> ProviderResult<Vec<SourceMessage>> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.iter().filter(|c| matches!(c, Call::Page(_))).count();
                calls.push(Call::Page(before.map(|b| b.0)));
                n
            };
            if self.fail_page == Some(n) {
                return Err(ProviderError::Failed("page fetch failed".to_string()));
            }
            let upper = before.map(|b| b.0).unwrap_or(i32::MAX);
            Ok(self
                .history
                .range(..upper)
                .rev()
                .take(page_size)
                .map(|(_, m)| m.clone())
                .collect())
        }

        async fn send_text(&self, _channel: ChatId, text: &str) -> ProviderResult<()> {
            let id = self.id_for_text(text);
            self.calls.lock().unwrap().push(Call::Text(id));
            if let Some(e) = self.scripted_failure(id) {
                return Err(e);
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_media(
            &self,
            _channel: ChatId,
            message: &SourceMessage,
            blob: &Path,
            caption: &str,
        ) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(Call::Media(message.id.0));
            if !blob.exists() {
                return Err(ProviderError::Failed("blob missing".to_string()));
            }
            if let Some(e) = self.scripted_failure(message.id.0) {
                return Err(e);
            }
            self.sent
                .lock()
                .unwrap()
                .push(format!("media:{}:{caption}", message.id.0));
            Ok(())
        }

        async fn download_media(
            &self,
            message: &SourceMessage,
            dest_dir: &Path,
        ) -> ProviderResult<PathBuf> {
            self.calls.lock().unwrap().push(Call::Download(message.id.0));
            if self.fail_download {
                return Err(ProviderError::Failed("download failed".to_string()));
            }
            std::fs::create_dir_all(dest_dir).map_err(|e| ProviderError::Failed(e.to_string()))?;
            let path = dest_dir.join(format!("media_{}.bin", message.id.0));
            std::fs::write(&path, b"blob").map_err(|e| ProviderError::Failed(e.to_string()))?;
            Ok(path)
        }
    }
}
