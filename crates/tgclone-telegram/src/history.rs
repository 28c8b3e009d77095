//! Channel history over the Bot API, which has no history call.
//!
//! Each id is inspected by forwarding it into a scratch chat and deleting the
//! copy. Pages walk ids downward from the channel's newest id.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use teloxide::{prelude::*, types::Message, RequestError};

use tgclone_core::{
    domain::{ChatId, MediaKind, MediaRef, MessageBody, MessageId, SourceMessage},
    errors::{ProviderError, ProviderResult},
};

/// Text of the throwaway message posted to learn a channel's newest id.
const HEAD_MARKER: &str = "·";

const UNFORWARDABLE: &str = "forwarding refused (protected content or service message)";

/// Raw Bot API calls the history walk needs.
#[async_trait]
pub(crate) trait ForwardApi: Send + Sync {
    /// Post a silent marker in `channel`, delete it, and return its id.
    async fn post_marker(&self, channel: ChatId) -> Result<i32, RequestError>;

    /// Forward `id` into the scratch chat, delete the copy, and return what it carried.
    async fn inspect(&self, channel: ChatId, id: i32) -> Result<MessageBody, RequestError>;
}

pub(crate) struct BotForwarder {
    bot: Bot,
    scratch: ChatId,
}

impl BotForwarder {
    pub(crate) fn new(bot: Bot, scratch: ChatId) -> Self {
        Self { bot, scratch }
    }
}

#[async_trait]
impl ForwardApi for BotForwarder {
    async fn post_marker(&self, channel: ChatId) -> Result<i32, RequestError> {
        let chat = teloxide::types::ChatId(channel.0);
        let marker = self
            .bot
            .send_message(chat, HEAD_MARKER)
            .disable_notification(true)
            .await?;
        if let Err(e) = self.bot.delete_message(chat, marker.id).await {
            tracing::warn!(channel = channel.0, error = %e, "failed to delete head marker");
        }
        Ok(marker.id.0)
    }

    async fn inspect(&self, channel: ChatId, id: i32) -> Result<MessageBody, RequestError> {
        let scratch = teloxide::types::ChatId(self.scratch.0);
        let copy = self
            .bot
            .forward_message(
                scratch,
                teloxide::types::ChatId(channel.0),
                teloxide::types::MessageId(id),
            )
            .disable_notification(true)
            .await?;
        let body = body_of(&copy);
        if let Err(e) = self.bot.delete_message(scratch, copy.id).await {
            tracing::warn!(message_id = id, error = %e, "failed to delete forwarded copy");
        }
        Ok(body)
    }
}

/// How an id looked when it could not be forwarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ForwardMiss {
    /// Deleted or never existed.
    Missing,
    /// Exists, but the Bot API refuses to forward it. Protected content and
    /// service messages produce the same reply.
    Unforwardable,
}

pub(crate) fn classify_forward_error(text: &str) -> Option<ForwardMiss> {
    let t = text.to_lowercase();
    if t.contains("message to forward not found") || t.contains("message_id_invalid") {
        return Some(ForwardMiss::Missing);
    }
    if t.contains("can't be forwarded") || t.contains("cant be forwarded") {
        return Some(ForwardMiss::Unforwardable);
    }
    None
}

pub(crate) fn map_request_error(e: RequestError) -> ProviderError {
    match e {
        RequestError::RetryAfter(d) => ProviderError::RateLimited(d),
        other => ProviderError::Failed(format!("telegram error: {other}")),
    }
}

/// Reduce a forwarded copy to what re-sending needs.
pub(crate) fn body_of(msg: &Message) -> MessageBody {
    let caption = msg.caption().map(str::to_string);
    let media = |kind, file_id: &str, file_name: Option<&String>| MessageBody::Media {
        media: MediaRef {
            kind,
            file_id: file_id.to_string(),
            file_name: file_name.cloned(),
        },
        caption: caption.clone(),
    };

    if let Some(text) = msg.text() {
        return MessageBody::Text(text.to_string());
    }
    if let Some(best) = msg.photo().and_then(|sizes| sizes.last()) {
        return media(MediaKind::Photo, &best.file.id, None);
    }
    if let Some(v) = msg.video() {
        return media(MediaKind::Video, &v.file.id, v.file_name.as_ref());
    }
    if let Some(a) = msg.animation() {
        return media(MediaKind::Animation, &a.file.id, a.file_name.as_ref());
    }
    if let Some(a) = msg.audio() {
        return media(MediaKind::Audio, &a.file.id, a.file_name.as_ref());
    }
    if let Some(v) = msg.voice() {
        return media(MediaKind::Voice, &v.file.id, None);
    }
    if let Some(d) = msg.document() {
        return media(MediaKind::Document, &d.file.id, d.file_name.as_ref());
    }
    MessageBody::Empty
}

/// The enumeration in progress, from its newest page to its empty page.
struct Enumeration {
    channel: ChatId,
    head: i32,
    first_page_done: bool,
    /// Finished inspections below the cursor, so a page retried after a rate limit
    /// does not repeat them.
    seen: BTreeMap<i32, Option<SourceMessage>>,
}

impl Enumeration {
    fn new(channel: ChatId, head: i32) -> Self {
        Self {
            channel,
            head,
            first_page_done: false,
            seen: BTreeMap::new(),
        }
    }
}

/// Pages of history built from per-id inspections.
///
/// A page for `before` covers ids `before-1` downward, skipping missing ids,
/// until `page_size` messages are found or id 1 was inspected. Every enumeration
/// (a page with no `before`) learns the head again and starts with no cached
/// inspections.
pub(crate) struct HistoryWalker {
    api: Box<dyn ForwardApi>,
    head_hint: Option<i32>,
    current: Mutex<Option<Enumeration>>,
}

impl HistoryWalker {
    pub(crate) fn new(api: Box<dyn ForwardApi>, head_hint: Option<i32>) -> Self {
        Self {
            api,
            head_hint,
            current: Mutex::new(None),
        }
    }

    pub(crate) async fn fetch_page(
        &self,
        channel: ChatId,
        before: Option<MessageId>,
        page_size: usize,
    ) -> ProviderResult<Vec<SourceMessage>> {
        let result = self.walk_page(channel, before, page_size).await;
        match &result {
            Ok(page) if page.is_empty() => *self.state() = None,
            Ok(_) => {
                if let Some(e) = self.state().as_mut() {
                    e.first_page_done = true;
                }
            }
            Err(ProviderError::RateLimited(_)) => {}
            Err(_) => *self.state() = None,
        }
        result
    }

    async fn walk_page(
        &self,
        channel: ChatId,
        before: Option<MessageId>,
        page_size: usize,
    ) -> ProviderResult<Vec<SourceMessage>> {
        let upper = match before {
            Some(b) => {
                self.continue_below(channel, b);
                b.0 - 1
            }
            None => self.newest(channel).await?,
        };

        let mut page = Vec::with_capacity(page_size);
        let mut id = upper;
        while id >= 1 && page.len() < page_size {
            if let Some(msg) = self.inspect_id(channel, id).await? {
                page.push(msg);
            }
            id -= 1;
        }
        tracing::debug!(
            channel = channel.0,
            from = upper,
            to = id + 1,
            found = page.len(),
            "history page inspected"
        );
        Ok(page)
    }

    /// Head for a fresh enumeration. Only a retry of the newest page after a
    /// rate limit reuses the enumeration in progress.
    async fn newest(&self, channel: ChatId) -> ProviderResult<i32> {
        let retry = self
            .state()
            .as_ref()
            .filter(|e| e.channel == channel && !e.first_page_done)
            .map(|e| e.head);
        if let Some(head) = retry {
            return Ok(head);
        }

        let head = match self.head_hint {
            Some(hint) => hint,
            None => {
                let marker = self
                    .api
                    .post_marker(channel)
                    .await
                    .map_err(map_request_error)?;
                let head = marker - 1;
                tracing::info!(channel = channel.0, head, "discovered newest message id");
                head
            }
        };
        *self.state() = Some(Enumeration::new(channel, head));
        Ok(head)
    }

    /// Move the cursor below `before`; inspections at or above it are dropped.
    fn continue_below(&self, channel: ChatId, before: MessageId) {
        let mut state = self.state();
        match state.as_mut() {
            Some(e) if e.channel == channel => {
                e.first_page_done = true;
                drop(e.seen.split_off(&before.0));
            }
            _ => *state = Some(Enumeration::new(channel, before.0 - 1)),
        }
    }

    async fn inspect_id(&self, channel: ChatId, id: i32) -> ProviderResult<Option<SourceMessage>> {
        let cached = self
            .state()
            .as_ref()
            .filter(|e| e.channel == channel)
            .and_then(|e| e.seen.get(&id).cloned());
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let result = match self.api.inspect(channel, id).await {
            Ok(body) => Some(SourceMessage {
                id: MessageId(id),
                body,
            }),
            Err(RequestError::Api(api)) => match classify_forward_error(&api.to_string()) {
                Some(ForwardMiss::Missing) => None,
                Some(ForwardMiss::Unforwardable) => {
                    tracing::warn!(channel = channel.0, message_id = id, "message cannot be forwarded");
                    Some(SourceMessage {
                        id: MessageId(id),
                        body: MessageBody::Unavailable(UNFORWARDABLE.to_string()),
                    })
                }
                None => return Err(map_request_error(RequestError::Api(api))),
            },
            Err(e) => return Err(map_request_error(e)),
        };

        let mut state = self.state();
        if let Some(e) = state.as_mut().filter(|e| e.channel == channel) {
            e.seen.insert(id, result.clone());
        }
        Ok(result)
    }

    fn state(&self) -> MutexGuard<'_, Option<Enumeration>> {
        match self.current.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
