use dm_sync_lib::{
    cli::{parse_args, Command},
    commands::{run_channel, run_conversations, run_messages, run_send, run_split, run_watch},
};

#[tokio::main]
async fn main() {
    let cli = parse_args();
    let code = match cli.command {
        Command::Conversations(args) => run_conversations(args).await,
        Command::Messages(args) => run_messages(args).await,
        Command::Send(args) => run_send(args).await,
        Command::Split(args) => run_split(args).await,
        Command::Channel(args) => run_channel(args).await,
        Command::Watch(args) => run_watch(args).await,
    };
    // Exit directly; a pending stdin read would otherwise hold the runtime open.
    std::process::exit(code);
}
