use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use crate::client::config::ClientConfig;
use crate::client::models::group_view::{GroupView, ViewSettings};
use crate::client::models::messages::GroupEvent;
use crate::client::services::api_client::ApiClient;
use crate::client::services::auth_service::AuthService;
use crate::client::services::flights_service::{parse_departure, FlightsService, ReservationsService};
use crate::client::services::groups_service::{GroupBackend, GroupsService};
use crate::client::services::message_parser::format_time;
use crate::client::services::users_service::UsersService;
use crate::client::services::websocket_client::{RealtimeChannel, StompChannel};
use crate::client::utils::session_store::{Session, SessionStore};
use crate::common::protocol::MAX_MESSAGE_SIZE;
use crate::common::{ClientError, CreateTripGroupPayload};

#[derive(Debug, Parser)]
#[command(name = "wayfarer-cli", about = "Trip planner client: groups, chat, polls and checklists")]
pub struct CliArgs {
    /// REST base url, overrides API_BASE_URL
    #[arg(long)]
    pub api_url: Option<String>,
    /// Auth base url, overrides AUTH_BASE_URL
    #[arg(long)]
    pub auth_url: Option<String>,
    /// STOMP endpoint, overrides WS_URL
    #[arg(long)]
    pub ws_url: Option<String>,
    /// Keep the session in this file instead of the OS keyring
    #[arg(long)]
    pub session_file: Option<PathBuf>,
    /// Do not persist the session at all
    #[arg(long)]
    pub no_persist: bool,
    #[arg(long)]
    pub log_level: Option<String>,
}

impl CliArgs {
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.api_url {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = &self.auth_url {
            config.auth_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = &self.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(path) = &self.session_file {
            config.session_file = path.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }

    fn session_store(&self, config: &ClientConfig) -> SessionStore {
        if self.no_persist {
            SessionStore::in_memory()
        } else if self.session_file.is_some() {
            SessionStore::file(config.session_file.clone())
        } else {
            SessionStore::from_config(config)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Help,
    Login { username: String, password: String },
    Register { username: String, email: String, password: String },
    Logout,
    WhoAmI,
    Users { query: String },
    Groups { all: bool },
    CreateGroup { name: String },
    AddMember { user_id: String },
    Open { group_id: String },
    Close,
    Say { text: String },
    History,
    Chat,
    Polls,
    Vote { poll_id: String, option_id: String },
    CreatePoll { question: String, options: Vec<String>, anonymous: bool },
    EditPoll { poll_id: String, question: String, options: Vec<String> },
    DeletePoll { poll_id: String },
    Checklist,
    AddTask { task: String },
    EditTask { item_id: i64, task: String },
    ToggleTask { item_id: i64 },
    DeleteTask { item_id: i64 },
    Flights { origin: String, destination: String, departure: String },
    Reservations,
    Quit,
}

const HELP: &str = "\
/login <user> <pass>            /register <user> <email> <pass>   /logout   /whoami
/users [filter]                 /groups [all]                     /create_group <name>
/open <group_id>                /close                            /add_member <user_id>
<text> or /say <text>           /history (older messages)         /chat
/polls                          /vote <poll_id> <option_id>
/poll_create [--anon] <question> | <option> | <option> ...        /poll_delete <poll_id>
/poll_edit <poll_id> <question> | <option> | <option> ...
/checklist                      /task_add <task>                  /task_edit <id> <task>
/task_toggle <id>               /task_delete <id>
/flights <from> <to> <YYYY-MM-DDTHH:MM>                           /reservations
/quit";

fn item_id(raw: &str) -> Result<i64, String> {
    raw.parse::<i64>().map_err(|_| format!("'{}' is not a checklist item id", raw))
}

/// Parses one input line. Text without a leading slash is a chat message.
pub fn parse_command(line: &str) -> Result<CliCommand, String> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(CliCommand::Say { text: line.to_string() });
    }
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    let usage = |u: &str| -> Result<CliCommand, String> { Err(format!("usage: {}", u)) };

    Ok(match (command, args.as_slice()) {
        ("/help", _) => CliCommand::Help,
        ("/login", [user, pass]) => CliCommand::Login { username: user.to_string(), password: pass.to_string() },
        ("/login", _) => return usage("/login <user> <pass>"),
        ("/register", [user, email, pass]) => CliCommand::Register {
            username: user.to_string(),
            email: email.to_string(),
            password: pass.to_string(),
        },
        ("/register", _) => return usage("/register <user> <email> <pass>"),
        ("/logout", _) => CliCommand::Logout,
        ("/whoami", _) => CliCommand::WhoAmI,
        ("/users", _) => CliCommand::Users { query: rest.to_string() },
        ("/groups", []) => CliCommand::Groups { all: false },
        ("/groups", ["all"]) => CliCommand::Groups { all: true },
        ("/groups", _) => return usage("/groups [all]"),
        ("/create_group", [_, ..]) => CliCommand::CreateGroup { name: rest.to_string() },
        ("/create_group", []) => return usage("/create_group <name>"),
        ("/add_member", [user_id]) => CliCommand::AddMember { user_id: user_id.to_string() },
        ("/add_member", _) => return usage("/add_member <user_id>"),
        ("/open", [group_id]) => CliCommand::Open { group_id: group_id.to_string() },
        ("/open", _) => return usage("/open <group_id>"),
        ("/close", _) => CliCommand::Close,
        ("/say", _) => CliCommand::Say { text: rest.to_string() },
        ("/history", _) => CliCommand::History,
        ("/chat", _) => CliCommand::Chat,
        ("/polls", _) => CliCommand::Polls,
        ("/vote", [poll_id, option_id]) => CliCommand::Vote { poll_id: poll_id.to_string(), option_id: option_id.to_string() },
        ("/vote", _) => return usage("/vote <poll_id> <option_id>"),
        ("/poll_create", _) => {
            let (anonymous, body) = match rest.strip_prefix("--anon") {
                Some(b) => (true, b.trim()),
                None => (false, rest),
            };
            let mut parts = body.split('|').map(str::trim);
            let question = parts.next().unwrap_or("").to_string();
            let options: Vec<String> = parts.map(str::to_string).collect();
            if question.is_empty() {
                return usage("/poll_create [--anon] <question> | <option> | <option> ...");
            }
            CliCommand::CreatePoll { question, options, anonymous }
        }
        ("/poll_edit", [poll_id, _, ..]) => {
            let mut parts = rest[poll_id.len()..].split('|').map(str::trim);
            let question = parts.next().unwrap_or("").to_string();
            CliCommand::EditPoll { poll_id: poll_id.to_string(), question, options: parts.map(str::to_string).collect() }
        }
        ("/poll_edit", _) => return usage("/poll_edit <poll_id> <question> | <option> | <option> ..."),
        ("/poll_delete", [poll_id]) => CliCommand::DeletePoll { poll_id: poll_id.to_string() },
        ("/poll_delete", _) => return usage("/poll_delete <poll_id>"),
        ("/checklist", _) => CliCommand::Checklist,
        ("/task_add", [_, ..]) => CliCommand::AddTask { task: rest.to_string() },
        ("/task_add", []) => return usage("/task_add <task>"),
        ("/task_edit", [id, _, ..]) => {
            let task = rest[id.len()..].trim().to_string();
            CliCommand::EditTask { item_id: item_id(id)?, task }
        }
        ("/task_edit", _) => return usage("/task_edit <id> <task>"),
        ("/task_toggle", [id]) => CliCommand::ToggleTask { item_id: item_id(id)? },
        ("/task_toggle", _) => return usage("/task_toggle <id>"),
        ("/task_delete", [id]) => CliCommand::DeleteTask { item_id: item_id(id)? },
        ("/task_delete", _) => return usage("/task_delete <id>"),
        ("/flights", [origin, destination, departure]) => CliCommand::Flights {
            origin: origin.to_string(),
            destination: destination.to_string(),
            departure: departure.to_string(),
        },
        ("/flights", _) => return usage("/flights <from> <to> <YYYY-MM-DDTHH:MM>"),
        ("/reservations", _) => CliCommand::Reservations,
        ("/quit", _) | ("/exit", _) => CliCommand::Quit,
        (other, _) => return Err(format!("unknown command {} (try /help)", other)),
    })
}

struct OpenGroup {
    view: Arc<GroupView>,
    printer: JoinHandle<()>,
}

impl OpenGroup {
    async fn close(self) {
        self.printer.abort();
        self.view.unmount().await;
    }
}

fn print_event(event: GroupEvent, me: &str) {
    match event {
        GroupEvent::ChatReceived(m) => {
            let marker = if m.sender_id == me { ">" } else { " " };
            println!("{}[{}] {}: {}", marker, format_time(m.timestamp.as_deref()), m.sender_username, m.content);
        }
        GroupEvent::PollUpdated(u) => println!("[POLL] {} updated", u.poll_id),
        GroupEvent::StatusChanged(s) => println!("[CLIENT] realtime channel {}", s),
        GroupEvent::Error(e) => println!("[CLIENT] {}", e),
        _ => {}
    }
}

/// Interactive shell over the client services.
pub struct Cli {
    config: ClientConfig,
    session: SessionStore,
    auth: AuthService,
    users: UsersService,
    groups: GroupsService,
    flights: FlightsService,
    reservations: ReservationsService,
    open: Option<OpenGroup>,
}

impl Cli {
    pub fn new(config: ClientConfig, session: SessionStore) -> anyhow::Result<Self> {
        let api = ApiClient::new(&config, session.clone())?;
        Ok(Self {
            auth: AuthService::new(api.clone()),
            users: UsersService::new(api.clone()),
            groups: GroupsService::new(api.clone()),
            flights: FlightsService::new(api.clone()),
            reservations: ReservationsService::new(api),
            config,
            session,
            open: None,
        })
    }

    fn require_session(&self) -> Result<Session, ClientError> {
        self.session.get_session().ok_or(ClientError::Unauthorized)
    }

    fn require_group(&self) -> Result<Arc<GroupView>, ClientError> {
        self.open
            .as_ref()
            .map(|g| g.view.clone())
            .ok_or_else(|| ClientError::validation("open a group first (/open <group_id>)"))
    }

    async fn close_group(&mut self) {
        if let Some(open) = self.open.take() {
            open.close().await;
        }
    }

    /// Executes one command. Returns false when the shell should exit.
    pub async fn execute(&mut self, command: CliCommand, input: &mut (impl AsyncBufReadExt + Unpin)) -> Result<bool, ClientError> {
        match command {
            CliCommand::Help => println!("{}", HELP),
            CliCommand::Quit => return Ok(false),
            CliCommand::Login { username, password } => {
                let s = self.auth.login(&username, &password).await?;
                println!("[CLIENT] Welcome back, {}", s.username);
            }
            CliCommand::Register { username, email, password } => {
                let s = self.auth.register(&username, &email, &password).await?;
                println!("[CLIENT] Account created, logged in as {}", s.username);
            }
            CliCommand::Logout => {
                self.close_group().await;
                self.auth.logout()?;
                println!("[CLIENT] Logged out");
            }
            CliCommand::WhoAmI => match self.auth.current() {
                Some(s) => println!("[CLIENT] {} ({}, {})", s.username, s.user_id, s.role),
                None => println!("[CLIENT] Not logged in"),
            },
            CliCommand::Users { query } => {
                self.require_session()?;
                let all = self.users.list_all().await?;
                for u in UsersService::filter(&all, &query) {
                    println!("  {}  {}  {}  {}", u.user_id, u.username, u.email, u.role);
                }
            }
            CliCommand::Groups { all } => {
                let me = self.require_session()?;
                let list = if all && me.is_admin() {
                    self.groups.list_all().await?
                } else {
                    self.groups.list_for_user(&me.user_id).await?
                };
                if list.is_empty() {
                    println!("[CLIENT] No groups yet");
                }
                for g in list {
                    println!("  {}  {}  ({} members)", g.trip_group_id, g.trip_name, g.members.len());
                }
            }
            CliCommand::CreateGroup { name } => {
                let me = self.require_session()?;
                let payload = CreateTripGroupPayload { trip_name: name, ..Default::default() };
                let g = self.groups.create(&me.user_id, &payload).await?;
                println!("[CLIENT] Created group {} ({})", g.trip_name, g.trip_group_id);
            }
            CliCommand::AddMember { user_id } => {
                let view = self.require_group()?;
                self.groups.add_member(view.group_id(), &user_id).await?;
                view.refresh_group().await?;
                println!("[CLIENT] Member added");
            }
            CliCommand::Open { group_id } => {
                let me = self.require_session()?;
                self.close_group().await;
                let backend: Arc<dyn GroupBackend> = Arc::new(self.groups.clone());
                let ws_url = self.config.ws_url.clone();
                let token = me.token.clone();
                let policy = self.config.reconnect;
                let view = GroupView::mount(&group_id, me.clone(), backend, ViewSettings::from_config(&self.config), move || {
                    Arc::new(StompChannel::connect(&ws_url, Some(token), policy)) as Arc<dyn RealtimeChannel>
                })
                .await?;
                let view = Arc::new(view);
                let state = view.snapshot().await;
                println!("[CLIENT] {} · {} members · {} polls · {} tasks", state.group.trip_name, state.group.members.len(), state.polls.polls().len(), state.checklist.items().len());
                for line in view.chat_lines().await {
                    println!("  [{}] {}: {}", line.time, line.sender, line.content);
                }
                if let Some(e) = state.last_error {
                    println!("[CLIENT] Partially loaded: {}", e);
                }
                let mut events = view.events();
                let user_id = me.user_id.clone();
                let printer = tokio::spawn(async move {
                    while let Ok(event) = events.recv().await {
                        if event == GroupEvent::Unmounted {
                            break;
                        }
                        print_event(event, &user_id);
                    }
                });
                self.open = Some(OpenGroup { view, printer });
            }
            CliCommand::Close => self.close_group().await,
            CliCommand::Say { text } => {
                let view = self.require_group()?;
                if text.len() > MAX_MESSAGE_SIZE {
                    println!("[CLIENT] Message too long (max {} characters)", MAX_MESSAGE_SIZE);
                } else if !view.send_chat(&text).await? && !text.trim().is_empty() {
                    println!("[CLIENT] Not connected, message not sent");
                }
            }
            CliCommand::History => {
                let view = self.require_group()?;
                let added = view.load_older_messages().await?;
                println!("[CLIENT] Loaded {} older messages", added);
            }
            CliCommand::Chat => {
                let view = self.require_group()?;
                for line in view.chat_lines().await {
                    let pad = if line.highlighted { "            " } else { "" };
                    println!("{}[{}] {}: {}", pad, line.time, line.sender, line.content);
                }
            }
            CliCommand::Polls => {
                let view = self.require_group()?;
                let polls = view.read(|s| s.polls.polls().to_vec()).await;
                for poll in polls {
                    println!("  {} {}{}", poll.poll_id, poll.question, if poll.anonymous { " (anonymous)" } else { "" });
                    for line in view.poll_lines(&poll.poll_id).await {
                        let mark = if line.selected { "*" } else { " " };
                        println!("    {} {} {:<24} {:>3} votes {:>5.1}%", mark, line.option_id, line.text, line.votes, line.percent);
                    }
                }
            }
            CliCommand::Vote { poll_id, option_id } => {
                let view = self.require_group()?;
                if !view.vote(&poll_id, &option_id).await? {
                    println!("[CLIENT] Vote already recorded");
                }
            }
            CliCommand::CreatePoll { question, options, anonymous } => {
                let view = self.require_group()?;
                view.create_poll(&question, &options, anonymous).await?;
                println!("[CLIENT] Poll created");
            }
            CliCommand::EditPoll { poll_id, question, options } => {
                let view = self.require_group()?;
                view.edit_poll(&poll_id, &question, &options).await?;
                println!("[CLIENT] Poll updated");
            }
            CliCommand::DeletePoll { poll_id } => {
                let view = self.require_group()?;
                let question = view.read(|s| s.polls.poll(&poll_id).map(|p| p.question.clone())).await;
                let Some(question) = question else {
                    return Err(ClientError::validation(format!("unknown poll {}", poll_id)));
                };
                print!("Delete poll \"{}\"? [y/N] ", question);
                let _ = std::io::stdout().flush();
                let mut answer = String::new();
                input.read_line(&mut answer).await?;
                let yes = matches!(answer.trim(), "y" | "Y" | "yes");
                if view.delete_poll(&poll_id, &move |_: &str| yes).await? {
                    println!("[CLIENT] Poll deleted");
                }
            }
            CliCommand::Checklist => {
                let view = self.require_group()?;
                let (items, progress) = view.read(|s| (s.checklist.items().to_vec(), s.checklist.progress())).await;
                println!("  {}/{} done ({:.0}%)", progress.done, progress.total, progress.percent());
                for item in items {
                    let id = item.item_id.map(|i| i.to_string()).unwrap_or_else(|| "-".into());
                    println!("  [{}] {} {} ({})", if item.done { "x" } else { " " }, id, item.task, item.assigned_to);
                }
            }
            CliCommand::AddTask { task } => {
                let view = self.require_group()?;
                view.add_checklist_item(&task, "", None).await?;
            }
            CliCommand::EditTask { item_id, task } => {
                let view = self.require_group()?;
                view.edit_checklist_item(item_id, &task, None).await?;
            }
            CliCommand::ToggleTask { item_id } => {
                let view = self.require_group()?;
                view.toggle_checklist_item(item_id).await?;
            }
            CliCommand::DeleteTask { item_id } => {
                let view = self.require_group()?;
                view.delete_checklist_item(item_id).await?;
            }
            CliCommand::Flights { origin, destination, departure } => {
                self.require_session()?;
                let when = parse_departure(&departure)?;
                let flights = self.flights.search(&origin, &destination, &when).await?;
                if flights.is_empty() {
                    println!("[CLIENT] No flights found");
                }
                for f in flights {
                    println!("  {} {} {} -> {} {} {:.2}", f.flight_number, f.airline, f.origin_airport_name, f.destination_airport_name, f.departure_time, f.price);
                }
            }
            CliCommand::Reservations => {
                let me = self.require_session()?;
                for r in self.reservations.for_user(&me.user_id).await? {
                    println!("  {} {} seat {} {:?}", r.reservation_id, r.flight.flight_number, r.seat_number, r.status);
                }
            }
        }
        Ok(true)
    }
}

pub async fn run(args: CliArgs) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env();
    args.apply(&mut config);
    let session = args.session_store(&config);
    if let Some(s) = session.restore() {
        info!("Restored session for {}", s.username);
        println!("[CLIENT] Logged in as {}", s.username);
    }

    let mut cli = Cli::new(config, session)?;
    println!("[CLIENT] Welcome! Type /help for the list of commands.");
    let mut input = BufReader::new(stdin());
    let mut line = String::new();
    loop {
        line.clear();
        print!("> ");
        std::io::stdout().flush()?;
        if input.read_line(&mut line).await? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(e) => {
                println!("[CLIENT] {}", e);
                continue;
            }
        };
        match cli.execute(command, &mut input).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_auth_failure() => {
                cli.close_group().await;
                println!("[CLIENT] Please log in again (/login <user> <pass>)");
            }
            Err(e) => {
                warn!("Command failed: {}", e);
                println!("[CLIENT] {}", e);
            }
        }
    }
    cli.close_group().await;
    println!("[CLIENT] Bye");
    Ok(())
}
