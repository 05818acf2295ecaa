use crate::{
    cache::{ChannelDirectory, SupabaseChannelSource},
    cli::{
        ChannelArgs, CommonArgs, ConversationsArgs, MessagesArgs, RetryArgs, SendArgs, SplitArgs,
        WatchArgs,
    },
    config::Config,
    credentials::CredentialStore,
    debounce::{Debouncer, LOAD_MORE_DEBOUNCE},
    directcast::{
        ClientSettings, DirectCastClient, DirectCastError, InboxFetcher, MessageFetcher,
        SendMessage, MAX_PAGE_LIMIT, REQUEST_TIMEOUT,
    },
    logging::{format_error_report, init_logging, LoggingContext},
    pagination::{FeedError, FeedOptions, FeedSnapshot, PageFetcher, PaginatedFeed},
    refresh::{AutoRefresher, Visibility},
    resilience::{run_with_retry, RetryTerminal},
    server::{feed_metrics, monitoring::FeedMetrics, setup_server_with_addr},
    state::AppState,
};
use dotenv::dotenv;
use herocast_core::backoff::{CONVERSATION_JITTER, DIRECT_MESSAGE_JITTER};
use herocast_core::errors::format_error_message;
use herocast_core::models::{DirectCastMessage, InboxEntry};
use herocast_core::segmenter::MAX_MESSAGE_LENGTH;
use herocast_core::{segment, ErrorCategory};
use serde::Serialize;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

const SERVICE: &str = "dm_sync";
/// Exit code for a run stopped by SIGINT/SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;
const PREVIEW_CHARS: usize = 80;

fn start_logging(mode: &str, log_level: &str) -> LoggingContext {
    dotenv().ok();
    init_logging(SERVICE, mode, log_level)
}

fn usage_error(message: &str) -> i32 {
    error!(event = "invalid_arguments", error = %message, "invalid arguments");
    eprintln!("{message}");
    2
}

#[derive(Error, Debug)]
enum SessionError {
    #[error("{0}")]
    Config(String),
    #[error("failed to build DirectCast client: {0}")]
    Client(#[from] DirectCastError),
}

impl SessionError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Client(_) => 1,
        }
    }
}

/// Resolved configuration plus the client built from it.
struct Session {
    config: Config,
    credentials: CredentialStore,
    client: Arc<DirectCastClient>,
}

/// Applies command-line overrides on top of the environment.
pub fn resolve_config(common: &CommonArgs, base: Config) -> Result<Config, String> {
    let mut config = base;
    if let Some(api_url) = &common.api_url {
        config.directcast_api_url = api_url.clone();
    }
    if let Some(api_key) = &common.api_key {
        config.directcast_api_key = Some(api_key.clone());
    }
    if let Some(account_id) = &common.account_id {
        config.account_id = account_id.clone();
    }
    if let Some(requests_per_minute) = common.requests_per_minute {
        config.requests_per_minute = NonZeroU32::new(requests_per_minute)
            .ok_or_else(|| "--requests-per-minute must be > 0".to_string())?;
    }
    if config.account_id.trim().is_empty() {
        return Err("--account-id must not be empty".to_string());
    }
    Ok(config)
}

fn open_session(common: &CommonArgs) -> Result<Session, SessionError> {
    let config = Config::from_env().map_err(|err| SessionError::Config(err.to_string()))?;
    let config = resolve_config(common, config).map_err(SessionError::Config)?;
    let api_key = config.directcast_api_key.clone().ok_or_else(|| {
        SessionError::Config("DIRECTCAST_API_KEY is required (env var or --api-key)".to_string())
    })?;

    let credentials = CredentialStore::new();
    credentials.set(config.account_id.clone(), api_key);

    let mut settings = ClientSettings::new(&config.directcast_api_url, &config.account_id);
    settings.requests_per_minute = config.requests_per_minute;
    let client = DirectCastClient::new(settings, credentials.clone())?;

    info!(
        event = "session_opened",
        account_id = %config.account_id,
        api_url = %config.directcast_api_url,
        requests_per_minute = config.requests_per_minute.get(),
        "DirectCast session ready"
    );

    Ok(Session {
        config,
        credentials,
        client: Arc::new(client),
    })
}

fn open_session_or_exit(common: &CommonArgs) -> Result<Session, i32> {
    open_session(common).map_err(|err| {
        error!(event = "session_failed", error = %err, "could not open DirectCast session");
        eprintln!("{err}");
        err.exit_code()
    })
}

pub fn validate_retry_args(args: &RetryArgs) -> Result<(), String> {
    args.to_config(DIRECT_MESSAGE_JITTER)
        .validate()
        .map_err(|err| format!("invalid retry flags: {err}"))
}

pub fn validate_list_args(limit: u32, pages: u32) -> Result<(), String> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(format!("--limit must be in 1..={MAX_PAGE_LIMIT}, got {limit}"));
    }
    if pages == 0 {
        return Err("--pages must be > 0".to_string());
    }
    Ok(())
}

pub fn validate_send_args(args: &SendArgs) -> Result<(), String> {
    validate_retry_args(&args.retry)?;
    if args.max_messages == 0 {
        return Err("--max-messages must be > 0".to_string());
    }
    if let Some(reply_to) = &args.reply_to {
        if reply_to.trim().is_empty() {
            return Err("--reply-to must not be empty".to_string());
        }
    }
    Ok(())
}

pub fn validate_split_args(args: &SplitArgs) -> Result<(), String> {
    if args.max_length == 0 {
        return Err("--max-length must be > 0".to_string());
    }
    if args.max_posts == 0 {
        return Err("--max-posts must be > 0".to_string());
    }
    Ok(())
}

/// Validates watch flags and returns the parsed metrics address.
pub fn validate_watch_args(args: &WatchArgs) -> Result<SocketAddr, String> {
    validate_retry_args(&args.retry)?;
    if args.interval_secs == 0 {
        return Err("--interval-secs must be > 0".to_string());
    }
    args.metrics_bind.parse::<SocketAddr>().map_err(|err| {
        format!(
            "invalid --metrics-bind address `{}`: {err}",
            args.metrics_bind
        )
    })
}

/// Splits outgoing text into the messages `send` will deliver, in order.
pub fn plan_send(
    text: &str,
    split: bool,
    max_messages: usize,
    allow_truncate: bool,
) -> Result<Vec<String>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("message text is empty".to_string());
    }
    if !split {
        if text.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(format!(
                "message exceeds {MAX_MESSAGE_LENGTH} characters; pass --split to send it as several messages"
            ));
        }
        return Ok(vec![text.to_string()]);
    }

    let plan = segment(text, MAX_MESSAGE_LENGTH, max_messages);
    if plan.truncated {
        if !allow_truncate {
            return Err(format!(
                "text needs more than {max_messages} messages; pass --allow-truncate to send the first {max_messages}"
            ));
        }
        warn!(
            event = "send_truncated",
            max_messages,
            "text did not fit; sending the leading messages only"
        );
    }
    Ok(plan.segments)
}

async fn read_text(raw: &str) -> Result<String, String> {
    if raw != "-" {
        return Ok(raw.to_string());
    }
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .map_err(|err| format!("failed to read stdin: {err}"))?;
    Ok(buffer)
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!(event = "signal_received", signal = "SIGTERM", "shutting down"),
                    _ = ctrl_c() => {}
                }
                return;
            }
            Err(err) => {
                warn!(event = "signal_handler_failed", signal = "SIGTERM", error = %err, "SIGTERM handler unavailable");
            }
        }
    }
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(event = "signal_received", signal = "SIGINT", "shutting down"),
        Err(err) => {
            warn!(event = "signal_handler_failed", signal = "SIGINT", error = %err, "SIGINT handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(encoded) => {
            println!("{encoded}");
            0
        }
        Err(err) => {
            error!(event = "output_encode_failed", error = %err, "failed to encode output");
            1
        }
    }
}

fn report_feed_error(label: &str, error: &FeedError) -> i32 {
    error!(
        event = "feed_failed",
        feed = %label,
        category = error.category.as_str(),
        can_retry = error.can_retry,
        detail = %error.detail,
        "feed load failed"
    );
    eprintln!("{}", error.message);
    1
}

fn preview(message: &DirectCastMessage) -> String {
    if message.is_deleted {
        return "[deleted]".to_string();
    }
    let flattened = message.message.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= PREVIEW_CHARS {
        return flattened;
    }
    let mut cut: String = flattened.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

pub fn render_inbox_entry(entry: &InboxEntry) -> String {
    let last = entry
        .last_message()
        .map(|message| format!("  last: {}", preview(message)))
        .unwrap_or_default();
    match entry {
        InboxEntry::Conversation(conversation) => format!(
            "conversation {}  fids={:?}  updated={}{last}",
            conversation.conversation_id,
            conversation.participant_fids,
            conversation.last_modified_timestamp
        ),
        InboxEntry::Group(group) => format!(
            "group {}  \"{}\"  members={}  updated={}{last}",
            group.group_id, group.name, group.member_count, group.last_modified_timestamp
        ),
    }
}

pub fn render_message(message: &DirectCastMessage) -> String {
    let reply = message
        .in_reply_to_message_id
        .as_deref()
        .map(|id| format!(" (reply to {id})"))
        .unwrap_or_default();
    format!(
        "{} {} fid:{}{reply}: {}",
        message.creation_timestamp,
        message.message_id,
        message.sender_fid,
        preview(message)
    )
}

/// Loads `pages` pages, stopping early on error or when the list runs out.
async fn load_pages<F: PageFetcher>(feed: &PaginatedFeed<F>, pages: u32) -> FeedSnapshot<F::Item> {
    feed.refresh();
    feed.wait_until_settled().await;
    for _ in 1..pages {
        let snapshot = feed.snapshot();
        if snapshot.error.is_some() || !feed.load_more() {
            return snapshot;
        }
        feed.wait_until_settled().await;
    }
    feed.snapshot()
}

async fn print_feed<F>(
    feed: PaginatedFeed<F>,
    pages: u32,
    json: bool,
    render: fn(&F::Item) -> String,
) -> i32
where
    F: PageFetcher,
    F::Item: Serialize,
{
    let label = feed.options().label.clone();
    let snapshot = tokio::select! {
        snapshot = load_pages(&feed, pages) => snapshot,
        _ = shutdown_signal() => {
            feed.cancel();
            return EXIT_INTERRUPTED;
        }
    };

    if let Some(error) = &snapshot.error {
        // Pages loaded before the failure are still worth printing.
        if snapshot.items.is_empty() {
            return report_feed_error(&label, error);
        }
        report_feed_error(&label, error);
    }

    info!(
        event = "feed_loaded",
        feed = %label,
        items = snapshot.items.len(),
        has_more = snapshot.has_more,
        "feed loaded"
    );
    let code = if json {
        print_json(&snapshot.items)
    } else {
        for item in &snapshot.items {
            println!("{}", render(item));
        }
        0
    };
    if snapshot.error.is_some() {
        1
    } else {
        code
    }
}

pub async fn run_conversations(args: ConversationsArgs) -> i32 {
    let context = start_logging("conversations", &args.common.log_level);
    conversations(args).instrument(context.root_span()).await
}

async fn conversations(args: ConversationsArgs) -> i32 {
    if let Err(message) =
        validate_list_args(args.limit, args.pages).and_then(|()| validate_retry_args(&args.retry))
    {
        return usage_error(&message);
    }
    let session = match open_session_or_exit(&args.common) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let account_id = session.config.account_id.clone();
    let options = FeedOptions::new(&account_id, format!("inbox:{account_id}"))
        .with_retry(args.retry.to_config(CONVERSATION_JITTER));
    let fetcher = InboxFetcher::new(session.client.clone(), args.category).with_limit(args.limit);
    let feed = PaginatedFeed::new(
        fetcher,
        options,
        session.credentials.clone(),
        FeedMetrics::detached(),
    );
    print_feed(feed, args.pages, args.json, render_inbox_entry).await
}

pub async fn run_messages(args: MessagesArgs) -> i32 {
    let context = start_logging("messages", &args.common.log_level);
    messages(args).instrument(context.root_span()).await
}

async fn messages(args: MessagesArgs) -> i32 {
    if let Err(message) =
        validate_list_args(args.limit, args.pages).and_then(|()| validate_retry_args(&args.retry))
    {
        return usage_error(&message);
    }
    let Some(target) = args.target.target() else {
        return usage_error("--conversation or --group is required");
    };
    let session = match open_session_or_exit(&args.common) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let options = FeedOptions::new(&session.config.account_id, target.label())
        .with_retry(args.retry.to_config(DIRECT_MESSAGE_JITTER));
    let fetcher = MessageFetcher::new(session.client.clone(), target).with_limit(args.limit);
    let feed = PaginatedFeed::new(
        fetcher,
        options,
        session.credentials.clone(),
        FeedMetrics::detached(),
    );
    print_feed(feed, args.pages, args.json, render_message).await
}

pub async fn run_send(args: SendArgs) -> i32 {
    let context = start_logging("send", &args.common.log_level);
    send(args).instrument(context.root_span()).await
}

async fn send(args: SendArgs) -> i32 {
    if let Err(message) = validate_send_args(&args) {
        return usage_error(&message);
    }
    let Some(target) = args.target.target() else {
        return usage_error("--conversation or --group is required");
    };
    let text = match read_text(&args.text).await {
        Ok(text) => text,
        Err(message) => return usage_error(&message),
    };
    let plan = match plan_send(&text, args.split, args.max_messages, args.allow_truncate) {
        Ok(plan) => plan,
        Err(message) => return usage_error(&message),
    };
    let session = match open_session_or_exit(&args.common) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let retry = args.retry.to_config(DIRECT_MESSAGE_JITTER);
    let cancel = CancellationToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let total = plan.len();
    let mut code = 0;
    for (index, body) in plan.into_iter().enumerate() {
        let mut request = SendMessage::new(&target, body);
        if index == 0 {
            if let Some(reply_to) = &args.reply_to {
                request = request.in_reply_to(reply_to.clone());
            }
        }
        if let Err(err) = request.validate() {
            code = usage_error(&err.to_string());
            break;
        }

        let outcome = run_with_retry(
            &retry,
            &cancel,
            |_| session.client.send_message(&request),
            |notice| {
                warn!(
                    event = "send_retry_scheduled",
                    thread = %target.label(),
                    attempt = notice.attempt,
                    delay_ms = notice.delay.as_millis() as u64,
                    category = notice.classification.category.as_str(),
                    error = %notice.error,
                    "send failed, retrying"
                );
            },
        )
        .await;

        match outcome {
            Ok(sent) => {
                let message_id = sent
                    .value
                    .message
                    .map(|message| message.message_id)
                    .unwrap_or_else(|| "(no id returned)".to_string());
                info!(
                    event = "message_sent",
                    thread = %target.label(),
                    part = index + 1,
                    total,
                    attempts = sent.attempts,
                    message_id = %message_id,
                    "message sent"
                );
                println!("sent {}/{total} {message_id}", index + 1);
            }
            Err(RetryTerminal::Cancelled) => {
                warn!(event = "send_cancelled", sent = index, total, "send interrupted");
                eprintln!("send interrupted after {index} of {total} messages");
                code = EXIT_INTERRUPTED;
                break;
            }
            Err(RetryTerminal::Failed(failure)) => {
                if failure.classification.category == ErrorCategory::Auth {
                    session.credentials.invalidate(&session.config.account_id);
                }
                error!(
                    event = "send_failed",
                    thread = %target.label(),
                    attempts = failure.attempts,
                    exhausted_retryable = failure.exhausted_retryable,
                    category = failure.classification.category.as_str(),
                    "{}",
                    format_error_report(&failure.error)
                );
                eprintln!(
                    "{}",
                    format_error_message(&failure.classification, &failure.error.to_string())
                );
                if index > 0 {
                    eprintln!("{index} of {total} messages were sent before the failure");
                }
                code = 1;
                break;
            }
        }
    }

    signal_task.abort();
    code
}

#[derive(Serialize)]
struct SplitOutput<'a> {
    segments: &'a [String],
    truncated: bool,
}

pub async fn run_split(args: SplitArgs) -> i32 {
    let context = start_logging("split", &args.log_level);
    split(args).instrument(context.root_span()).await
}

async fn split(args: SplitArgs) -> i32 {
    if let Err(message) = validate_split_args(&args) {
        return usage_error(&message);
    }
    let text = match read_text(&args.text).await {
        Ok(text) => text,
        Err(message) => return usage_error(&message),
    };

    let plan = segment(&text, args.max_length, args.max_posts);
    if plan.truncated {
        warn!(
            event = "split_truncated",
            max_posts = args.max_posts,
            "text exceeded the post limit; the remainder was dropped"
        );
    }

    if args.json {
        return print_json(&SplitOutput {
            segments: &plan.segments,
            truncated: plan.truncated,
        });
    }
    for (index, post) in plan.segments.iter().enumerate() {
        if index > 0 {
            println!("---");
        }
        println!("{post}");
    }
    if plan.truncated {
        eprintln!(
            "text exceeded {} posts; the remainder was dropped",
            args.max_posts
        );
    }
    0
}

pub async fn run_channel(args: ChannelArgs) -> i32 {
    let context = start_logging("channel", &args.log_level);
    channel(args).instrument(context.root_span()).await
}

async fn channel(args: ChannelArgs) -> i32 {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => return usage_error(&err.to_string()),
    };
    let Some(supabase_url) = args.supabase_url.clone().or(config.supabase_url) else {
        return usage_error("SUPABASE_URL is required (env var or --supabase-url)");
    };
    let Some(anon_key) = args.supabase_anon_key.clone().or(config.supabase_anon_key) else {
        return usage_error("SUPABASE_ANON_KEY is required (env var or --supabase-anon-key)");
    };
    let http = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(http) => http,
        Err(err) => {
            error!(event = "http_client_failed", "{}", format_error_report(&err));
            return 1;
        }
    };

    let directory = ChannelDirectory::new(SupabaseChannelSource::new(http, &supabase_url, anon_key));
    let mut found = Vec::new();
    let mut failed = false;
    for url in &args.urls {
        match directory.lookup(url).await {
            Ok(Some(channel)) => {
                if !args.json {
                    println!("{url}\t{}\t{}", channel.id, channel.name);
                }
                found.push(channel);
            }
            Ok(None) => {
                info!(event = "channel_not_found", url = %url, "no channel for url");
                eprintln!("no channel found for {url}");
            }
            Err(err) => {
                error!(event = "channel_lookup_failed", url = %url, "{}", format_error_report(&err));
                eprintln!("channel lookup failed for {url}: {err}");
                failed = true;
            }
        }
    }
    debug!(event = "channel_cache_size", cached = directory.cached_len(), "channel cache state");

    if args.json && print_json(&found) != 0 {
        return 1;
    }
    if failed {
        1
    } else {
        0
    }
}

/// Interactive commands read from stdin while watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchCommand {
    More,
    Refresh,
    Retry,
    Hide,
    Show,
    List,
    Quit,
}

impl WatchCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "more" | "m" => Some(Self::More),
            "refresh" | "r" => Some(Self::Refresh),
            "retry" => Some(Self::Retry),
            "hide" | "hidden" => Some(Self::Hide),
            "show" | "visible" => Some(Self::Show),
            "list" | "ls" => Some(Self::List),
            "quit" | "q" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// One-line status of a feed, printed whenever it changes.
pub fn summarize<T>(label: &str, snapshot: &FeedSnapshot<T>) -> String {
    let mut line = format!("[{label}] {} items", snapshot.items.len());
    if snapshot.is_loading {
        line.push_str(", loading");
    } else if snapshot.retry.is_retrying {
        line.push_str(&format!(", retrying (attempt {})", snapshot.retry.attempts));
    } else if let Some(error) = &snapshot.error {
        line.push_str(&format!(", error: {}", error.message));
        if error.can_retry {
            line.push_str(" (type `retry`)");
        }
    } else if snapshot.has_more {
        line.push_str(", more available (type `more`)");
    }
    line
}

pub async fn run_watch(args: WatchArgs) -> i32 {
    let context = start_logging("watch", &args.common.log_level);
    watch_command(args).instrument(context.root_span()).await
}

async fn watch_command(args: WatchArgs) -> i32 {
    let addr = match validate_watch_args(&args) {
        Ok(addr) => addr,
        Err(message) => return usage_error(&message),
    };
    let session = match open_session_or_exit(&args.common) {
        Ok(session) => session,
        Err(code) => return code,
    };

    let state = Arc::new(AppState::new(CancellationToken::new()));
    let server_handle = match setup_server_with_addr(state.clone(), addr).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(event = "metrics_server_bind_failed", addr = %addr, "{}", format_error_report(&err));
            return 1;
        }
    };
    info!(event = "metrics_server_started", addr = %addr, "serving /health and /metrics");

    let signal_task = {
        let shutdown = state.shutdown_token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
    };

    let metrics = feed_metrics(&state).await;
    let interval = Duration::from_secs(args.interval_secs);
    let account_id = session.config.account_id.clone();
    let code = match args.target() {
        Some(target) => {
            let options = FeedOptions::new(&account_id, target.label())
                .with_retry(args.retry.to_config(DIRECT_MESSAGE_JITTER));
            let fetcher = MessageFetcher::new(session.client.clone(), target);
            let feed = PaginatedFeed::new(fetcher, options, session.credentials.clone(), metrics);
            watch_feed(Arc::new(feed), &state, interval, render_message).await
        }
        None => {
            let options = FeedOptions::new(&account_id, format!("inbox:{account_id}"))
                .with_retry(args.retry.to_config(CONVERSATION_JITTER));
            let fetcher = InboxFetcher::new(session.client.clone(), args.category);
            let feed = PaginatedFeed::new(fetcher, options, session.credentials.clone(), metrics);
            watch_feed(Arc::new(feed), &state, interval, render_inbox_entry).await
        }
    };

    state.shutdown_token.cancel();
    signal_task.abort();
    if let Err(err) = server_handle.await {
        warn!(event = "metrics_server_join_failed", error = %err, "metrics server task ended abnormally");
    }
    info!(event = "watch_stopped", "watch stopped");
    code
}

async fn watch_feed<F: PageFetcher>(
    feed: Arc<PaginatedFeed<F>>,
    state: &AppState,
    interval: Duration,
    render: fn(&F::Item) -> String,
) -> i32 {
    let label = feed.options().label.clone();
    let (visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);
    let refresher = AutoRefresher::spawn(
        Arc::downgrade(&feed),
        interval,
        visibility_rx,
        &state.shutdown_token,
    );
    let load_more = {
        let feed = Arc::downgrade(&feed);
        Debouncer::new(LOAD_MORE_DEBOUNCE, move |()| {
            if let Some(feed) = feed.upgrade() {
                if !feed.load_more() {
                    debug!(event = "load_more_ignored", "feed busy or exhausted");
                }
            }
        })
    };

    let mut revisions = feed.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_summary = String::new();

    info!(event = "watch_started", feed = %label, interval_secs = interval.as_secs(), "watching feed");
    feed.refresh();

    loop {
        tokio::select! {
            _ = state.shutdown_token.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let summary = summarize(&label, &feed.snapshot());
                if summary != last_summary {
                    eprintln!("{summary}");
                    last_summary = summary;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match WatchCommand::parse(&line) {
                    Some(WatchCommand::More) => load_more.schedule(()),
                    Some(WatchCommand::Refresh) => feed.refresh(),
                    Some(WatchCommand::Retry) => {
                        if !feed.retry_after_error() {
                            eprintln!("nothing to retry");
                        }
                    }
                    Some(WatchCommand::Hide) => {
                        visibility_tx.send_replace(Visibility::Hidden);
                    }
                    Some(WatchCommand::Show) => {
                        visibility_tx.send_replace(Visibility::Visible);
                    }
                    Some(WatchCommand::List) => {
                        for item in &feed.snapshot().items {
                            println!("{}", render(item));
                        }
                    }
                    Some(WatchCommand::Quit) => state.shutdown_token.cancel(),
                    None => eprintln!(
                        "unknown command `{}` (more, refresh, retry, hide, show, list, quit)",
                        line.trim()
                    ),
                },
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(event = "stdin_read_failed", error = %err, "stopped reading commands");
                    stdin_open = false;
                }
            },
        }
    }

    load_more.cancel_pending();
    refresher.join().await;
    feed.cancel();
    0
}
