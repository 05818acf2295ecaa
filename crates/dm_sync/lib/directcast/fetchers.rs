use std::sync::Arc;

use futures::future::BoxFuture;
use herocast_core::models::{ConversationCategory, DirectCastMessage, InboxEntry};

use super::client::{DirectCastClient, ListQuery, MessageTarget, DEFAULT_PAGE_LIMIT};
use super::error::DirectCastError;
use crate::pagination::{Page, PageFetcher};

/// Inbox pages: one conversation page and one group page fetched together.
///
/// Conversations come first, then groups. The next cursor is the conversation cursor, falling
/// back to the group cursor once conversations run out.
pub struct InboxFetcher {
    client: Arc<DirectCastClient>,
    category: Option<ConversationCategory>,
    limit: u32,
}

impl InboxFetcher {
    pub fn new(client: Arc<DirectCastClient>, category: Option<ConversationCategory>) -> Self {
        Self {
            client,
            category,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_limit(self, limit: u32) -> Self {
        Self { limit, ..self }
    }
}

impl PageFetcher for InboxFetcher {
    type Item = InboxEntry;
    type Error = DirectCastError;

    fn fetch_page<'a>(
        &'a self,
        cursor: Option<String>,
    ) -> BoxFuture<'a, Result<Page<InboxEntry>, DirectCastError>> {
        Box::pin(async move {
            let query = ListQuery {
                category: self.category,
                cursor,
                limit: self.limit,
            };
            let (conversations, groups) = tokio::try_join!(
                self.client.conversation_list(&query),
                self.client.group_list(&query)
            )?;

            let next_cursor = conversations
                .next_cursor()
                .or_else(|| groups.next_cursor())
                .map(str::to_string);
            let items = conversations
                .result
                .conversations
                .into_iter()
                .map(InboxEntry::Conversation)
                .chain(groups.result.groups.into_iter().map(InboxEntry::Group))
                .collect();

            Ok(Page { items, next_cursor })
        })
    }
}

/// Message pages for a single conversation or group.
pub struct MessageFetcher {
    client: Arc<DirectCastClient>,
    target: MessageTarget,
    limit: u32,
}

impl MessageFetcher {
    pub fn new(client: Arc<DirectCastClient>, target: MessageTarget) -> Self {
        Self {
            client,
            target,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_limit(self, limit: u32) -> Self {
        Self { limit, ..self }
    }

    pub fn target(&self) -> &MessageTarget {
        &self.target
    }
}

impl PageFetcher for MessageFetcher {
    type Item = DirectCastMessage;
    type Error = DirectCastError;

    fn fetch_page<'a>(
        &'a self,
        cursor: Option<String>,
    ) -> BoxFuture<'a, Result<Page<DirectCastMessage>, DirectCastError>> {
        Box::pin(async move {
            let page = self
                .client
                .message_list(&self.target, cursor.as_deref(), self.limit)
                .await?;
            let next_cursor = page.next_cursor().map(str::to_string);
            Ok(Page {
                items: page.result.messages,
                next_cursor,
            })
        })
    }
}
