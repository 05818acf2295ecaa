use std::time::Duration;

use crate::build_info;
use clap::{ArgGroup, Args, Parser, Subcommand};
use herocast_core::models::ConversationCategory;
use herocast_core::segmenter::{MAX_POST_LENGTH, MAX_THREAD_POSTS};
use herocast_core::RetryConfig;

use crate::directcast::{MessageTarget, DEFAULT_PAGE_LIMIT};

#[derive(Parser, Debug)]
#[command(
    about = "DirectCast inbox sync and thread tools for herocast",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List inbox conversations and groups
    Conversations(ConversationsArgs),
    /// List messages in one conversation or group
    Messages(MessagesArgs),
    /// Send a direct message, optionally split into several
    Send(SendArgs),
    /// Split text into thread-sized posts without sending anything
    Split(SplitArgs),
    /// Resolve channel URLs through the cached Supabase lookup
    Channel(ChannelArgs),
    /// Keep a feed fresh in the foreground and serve /health and /metrics
    Watch(WatchArgs),
}

/// Connection and logging flags shared by every networked subcommand.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long = "api-url")]
    pub api_url: Option<String>,
    #[arg(long = "api-key")]
    /// Overrides DIRECTCAST_API_KEY
    pub api_key: Option<String>,
    #[arg(long = "account-id")]
    pub account_id: Option<String>,
    #[arg(long = "requests-per-minute")]
    pub requests_per_minute: Option<u32>,
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    #[arg(long = "retry-attempts", default_value_t = 3)]
    /// Total attempts per request, the first one included
    pub retry_attempts: u32,
    #[arg(long = "retry-base-ms", default_value_t = 1000)]
    pub retry_base_ms: u64,
    #[arg(long = "retry-max-ms", default_value_t = 10_000)]
    pub retry_max_ms: u64,
    #[arg(long = "retry-factor", default_value_t = 2.0)]
    pub retry_factor: f64,
}

impl RetryArgs {
    pub fn to_config(&self, jitter_fraction: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            backoff_factor: self.retry_factor,
            jitter_fraction,
        }
    }
}

/// `--conversation <id>` or `--group <id>`, exactly one.
#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("target").required(true).args(["conversation", "group"])))]
pub struct TargetArgs {
    #[arg(long)]
    pub conversation: Option<String>,
    #[arg(long)]
    pub group: Option<String>,
}

impl TargetArgs {
    pub fn target(&self) -> Option<MessageTarget> {
        match (&self.conversation, &self.group) {
            (Some(id), _) => Some(MessageTarget::Conversation(id.clone())),
            (None, Some(id)) => Some(MessageTarget::Group(id.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConversationsArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub retry: RetryArgs,
    #[arg(long)]
    pub category: Option<ConversationCategory>,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    pub limit: u32,
    #[arg(long, default_value_t = 1)]
    /// Number of pages to load before printing
    pub pages: u32,
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MessagesArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub retry: RetryArgs,
    #[command(flatten)]
    pub target: TargetArgs,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    pub limit: u32,
    #[arg(long, default_value_t = 1)]
    pub pages: u32,
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub retry: RetryArgs,
    #[command(flatten)]
    pub target: TargetArgs,
    /// Message text, or `-` to read stdin
    pub text: String,
    #[arg(long = "reply-to")]
    pub reply_to: Option<String>,
    #[arg(long, default_value_t = false)]
    /// Split text longer than one message into consecutive messages
    pub split: bool,
    #[arg(long = "max-messages", default_value_t = MAX_THREAD_POSTS)]
    pub max_messages: usize,
    #[arg(long = "allow-truncate", default_value_t = false)]
    /// Send what fits when splitting would drop text
    pub allow_truncate: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    /// Text to split, or `-` to read stdin
    pub text: String,
    #[arg(long = "max-length", default_value_t = MAX_POST_LENGTH)]
    pub max_length: usize,
    #[arg(long = "max-posts", default_value_t = MAX_THREAD_POSTS)]
    pub max_posts: usize,
    #[arg(long, default_value_t = false)]
    pub json: bool,
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,
}

#[derive(Args, Debug, Clone)]
pub struct ChannelArgs {
    #[arg(required = true)]
    pub urls: Vec<String>,
    #[arg(long = "supabase-url")]
    pub supabase_url: Option<String>,
    #[arg(long = "supabase-anon-key")]
    pub supabase_anon_key: Option<String>,
    #[arg(long, default_value_t = false)]
    pub json: bool,
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub retry: RetryArgs,
    #[arg(long)]
    /// Watch this conversation instead of the inbox
    pub conversation: Option<String>,
    #[arg(long, conflicts_with = "conversation")]
    /// Watch this group instead of the inbox
    pub group: Option<String>,
    #[arg(long)]
    pub category: Option<ConversationCategory>,
    #[arg(long = "interval-secs", default_value_t = 120)]
    pub interval_secs: u64,
    #[arg(long = "metrics-bind", default_value = "0.0.0.0:3000")]
    pub metrics_bind: String,
}

impl WatchArgs {
    pub fn target(&self) -> Option<MessageTarget> {
        TargetArgs {
            conversation: self.conversation.clone(),
            group: self.group.clone(),
        }
        .target()
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
