use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Inbox folder a conversation or group lives in.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConversationCategory {
    #[default]
    Default,
    Request,
    Archived,
}

impl ConversationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Request => "request",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ConversationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationCategory {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "request" => Ok(Self::Request),
            "archived" => Ok(Self::Archived),
            other => Err(format!(
                "unknown conversation category `{other}` (expected default, request or archived)"
            )),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub fid: u64,
    pub text_index: u32,
    pub length: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectCastMessage {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    pub message_id: String,
    pub sender_fid: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub creation_timestamp: i64,
    #[serde(default, deserialize_with = "deserialize_bool_tolerant")]
    pub is_deleted: bool,
    #[serde(default, deserialize_with = "deserialize_bool_tolerant")]
    pub is_programmatic: bool,
    #[serde(default)]
    pub in_reply_to_message_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    #[serde(default, rename = "messageTTLDays")]
    pub message_ttl_days: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_bool_tolerant")]
    pub members_can_invite: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectCastConversation {
    pub conversation_id: String,
    #[serde(default)]
    pub participant_fids: Vec<u64>,
    #[serde(default)]
    pub settings: ConversationSettings,
    #[serde(default)]
    pub creation_timestamp: i64,
    #[serde(default)]
    pub last_modified_timestamp: i64,
    #[serde(default)]
    pub last_message: Option<DirectCastMessage>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectCastGroup {
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub admin_fids: Vec<u64>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub settings: ConversationSettings,
    #[serde(default)]
    pub creation_timestamp: i64,
    #[serde(default)]
    pub last_modified_timestamp: i64,
    #[serde(default)]
    pub last_message: Option<DirectCastMessage>,
}

/// Cursor envelope returned next to every list result.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NextCursor {
    pub cursor: String,
}

/// Generic DirectCast list envelope: `{ result, next: { cursor } }`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Paginated<T> {
    pub result: T,
    #[serde(default)]
    pub next: Option<NextCursor>,
}

impl<T> Paginated<T> {
    /// Empty cursors are treated as the end of the list.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next
            .as_ref()
            .map(|next| next.cursor.as_str())
            .filter(|cursor| !cursor.is_empty())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversationListResult {
    #[serde(default)]
    pub conversations: Vec<DirectCastConversation>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupListResult {
    #[serde(default)]
    pub groups: Vec<DirectCastGroup>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageListResult {
    #[serde(default)]
    pub messages: Vec<DirectCastMessage>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SendMessageResult {
    #[serde(default)]
    pub message: Option<DirectCastMessage>,
}

/// Error body DirectCast (and our own proxy routes) attach to non-2xx responses.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

impl ApiErrorBody {
    pub fn best_message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|message| !message.trim().is_empty())
    }
}

/// Row of the Supabase `channel` table.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_string_or_null")]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_string_or_null")]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One row of the merged inbox list.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InboxEntry {
    Conversation(DirectCastConversation),
    Group(DirectCastGroup),
}

impl InboxEntry {
    /// Stable identity across pages; conversation and group IDs never collide.
    pub fn identity_key(&self) -> &str {
        match self {
            Self::Conversation(conversation) => &conversation.conversation_id,
            Self::Group(group) => &group.group_id,
        }
    }

    pub fn last_modified_timestamp(&self) -> i64 {
        match self {
            Self::Conversation(conversation) => conversation.last_modified_timestamp,
            Self::Group(group) => group.last_modified_timestamp,
        }
    }

    pub fn last_message(&self) -> Option<&DirectCastMessage> {
        match self {
            Self::Conversation(conversation) => conversation.last_message.as_ref(),
            Self::Group(group) => group.last_message.as_ref(),
        }
    }
}

/// Deserializes a bool while tolerating upstream schema drift.
///
/// Missing, null and unrecognized shapes become `false`.
fn deserialize_bool_tolerant<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_bool_tolerant).unwrap_or(false))
}

fn deserialize_string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn value_to_bool_tolerant(value: Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Array(values) => values.into_iter().next().and_then(value_to_bool_tolerant),
        Value::Null | Value::Object(_) => None,
    }
}
