//! Logs in, mounts one group and prints everything pushed to it for a while.
//! Handy for checking the broker wiring against a running backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use wayfarer::client::config::ClientConfig;
use wayfarer::client::models::group_view::{GroupView, ViewSettings};
use wayfarer::client::services::api_client::ApiClient;
use wayfarer::client::services::auth_service::AuthService;
use wayfarer::client::services::groups_service::{GroupBackend, GroupsService};
use wayfarer::client::services::websocket_client::{ChannelStatus, RealtimeChannel, StompChannel};
use wayfarer::client::utils::session_store::SessionStore;
use wayfarer::utils::logger::WayfarerLogger;

#[derive(Debug, Parser)]
#[command(name = "group_probe")]
struct Args {
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    group: String,
    /// Chat message to send once connected
    #[arg(long)]
    say: Option<String>,
    #[arg(long, default_value_t = 30)]
    seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    WayfarerLogger::init(&config.log_level);
    let args = Args::parse();

    let session = SessionStore::in_memory();
    let api = ApiClient::new(&config, session.clone())?;
    let me = AuthService::new(api.clone())
        .login(&args.username, &args.password)
        .await
        .context("login failed")?;
    println!("LOGIN -> {} ({})", me.username, me.user_id);

    let backend: Arc<dyn GroupBackend> = Arc::new(GroupsService::new(api));
    let ws_url = config.ws_url.clone();
    let token = me.token.clone();
    let policy = config.reconnect;
    let view = GroupView::mount(&args.group, me, backend, ViewSettings::from_config(&config), move || {
        Arc::new(StompChannel::connect(&ws_url, Some(token), policy)) as Arc<dyn RealtimeChannel>
    })
    .await
    .context("could not open group")?;

    let state = view.snapshot().await;
    println!(
        "GROUP -> {} · {} messages · {} polls · {} tasks",
        state.group.trip_name,
        state.chat.len(),
        state.polls.polls().len(),
        state.checklist.items().len()
    );

    let mut events = view.events();
    let mut status = view.channel_status();
    if let Some(text) = args.say.as_deref() {
        let _ = tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| *s == ChannelStatus::Open)).await;
        println!("SEND -> {}", view.send_chat(text).await?);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(args.seconds));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => println!("EVENT -> {:?}", event),
                Err(_) => break,
            },
        }
    }

    view.unmount().await;
    println!("DONE");
    Ok(())
}
