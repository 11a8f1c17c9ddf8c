#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{anyhow, Result};
use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod credentials;
mod ui;
mod utils;

use crate::{
    credentials::{load_credentials, save_credentials, Credentials},
    ui::{ChatUI, TypingSignal, TypingTracker, UiAction},
};
use chatwire::{
    config::{self, ClientConfig},
    models::OutgoingFile,
    store::ConversationStore,
    transport::Transport,
    HttpResourceClient,
};

/// Input left idle this long sends a typing stop.
const TYPING_IDLE: Duration = Duration::from_secs(2);

/// Command line arguments for chatwire
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatwire: a terminal client for a REST + WebSocket chat server.",
    long_about = "chatwire connects to a chat server's REST API and per-conversation sockets.\n\n\
    Settings are read from config.json in the config directory, then CHATWIRE_API_URL,\n\
    CHATWIRE_WS_URL and CHATWIRE_TOKEN, then the flags below."
)]
struct Args {
    /// REST API base URL, e.g. http://localhost:8000/api
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Socket base URL, e.g. ws://localhost:8000
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Access token for the API and socket
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Save the token for later sessions
    #[arg(long)]
    save_token: bool,

    /// Directory for config.json, credentials.json and the log file
    #[arg(long, value_name = "PATH")]
    config_dir: Option<PathBuf>,

    /// Log file (defaults to chatwire.log in the config directory)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

/// Token precedence: CLI flag, then environment, then saved credentials.
fn resolve_token(args: &Args, config: &ClientConfig) -> Result<Option<String>> {
    if let Some(token) = &args.token {
        return Ok(Some(token.clone()));
    }
    if let Some(token) = &config.token {
        return Ok(Some(token.clone()));
    }
    match load_credentials()? {
        Some(saved) if saved.api_url == config.api_url => Ok(saved.get_token()),
        Some(saved) => {
            warn!(
                "Saved token is for {}, not {}; ignoring it",
                saved.api_url, config.api_url
            );
            Ok(None)
        }
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.config_dir {
        config::set_config_dir_override(dir.clone())?;
    }

    let mut config = ClientConfig::load()?;
    if let Some(url) = &args.api_url {
        config.api_url = url.clone();
    }
    if let Some(url) = &args.ws_url {
        config.ws_url = url.clone();
    }

    // Without a usable config directory, log to stderr
    let log_file_path = match (&args.log_file, &config.log_file) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(path)) => Some(PathBuf::from(path)),
        (None, None) => config::config_dir().ok().map(|dir| dir.join("chatwire.log")),
    };
    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    utils::setup_logging(log_file_path.as_deref(), level)?;

    info!("chatwire starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    if let Some(path) = &log_file_path {
        info!("Logging to file: {}", path.display());
    }
    info!("API at {}, sockets at {}", config.api_url, config.ws_url);

    let token = resolve_token(&args, &config)?.ok_or_else(|| {
        anyhow!("No access token: pass --token or set {}", config::ENV_TOKEN)
    })?;

    if args.save_token {
        let credentials = Credentials::new(&config.api_url, &token);
        if let Err(e) = save_credentials(&credentials) {
            eprintln!("Warning: Failed to save credentials: {}", e);
        }
    }

    let resources = Arc::new(HttpResourceClient::new(
        &config.api_url,
        Some(token.clone()),
        config.http_timeout(),
    ));
    let transport = Transport::websocket(config.transport_config());
    let store = Arc::new(ConversationStore::new(
        resources,
        transport,
        Some(token),
        config.store_settings(),
    ));

    let mut terminal = ui::setup_terminal()?;
    let mut chat_ui = ChatUI::new();

    {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.load_conversations().await });
    }

    let result = run_main_loop(&mut chat_ui, &mut terminal, &store).await;

    store.close();
    ui::restore_terminal(terminal)?;

    if let Err(e) = &result {
        error!("Main loop failed: {}", e);
    }
    println!("Chat session ended.");
    result
}

async fn run_main_loop(
    chat_ui: &mut ChatUI,
    terminal: &mut ui::Terminal<ui::CrosstermBackend<io::Stdout>>,
    store: &Arc<ConversationStore>,
) -> Result<()> {
    let mut changes = store.changes();
    let mut typing = TypingTracker::new(TYPING_IDLE);

    loop {
        let snapshot = store.snapshot();
        chat_ui.sync(&snapshot);
        terminal.draw(|f| chat_ui.draw(f, &snapshot))?;

        let action = chat_ui.handle_input(&snapshot)?;
        let edited = action == Some(UiAction::InputChanged);
        if let Some(signal) = typing.update(chat_ui.has_input(), edited, Instant::now()) {
            send_typing(store, signal);
        }

        match action {
            Some(UiAction::Quit) => {
                info!("Quit requested");
                break;
            }
            Some(UiAction::InputChanged) | None => {}
            Some(UiAction::Send(text)) => {
                if let Some(signal) = typing.sent() {
                    send_typing(store, signal);
                }
                spawn_action(store, move |store| async move { store.send_message(&text).await });
            }
            Some(UiAction::SendFile(path)) => match read_upload(store, &path).await {
                Ok(Some(file)) => {
                    spawn_action(store, move |store| async move { store.send_file(file).await });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Could not read {}: {}", path.display(), e);
                    chat_ui.set_notice(&format!("Could not read {}", path.display()));
                }
            },
            Some(action) => dispatch(store, action),
        }

        // Wake on a state change or after a short tick for input polling
        if tokio::time::timeout(Duration::from_millis(50), changes.changed())
            .await
            .is_ok_and(|changed| changed.is_err())
        {
            debug!("Store change channel closed");
            break;
        }
    }
    Ok(())
}

/// Read a picked file, checking its size on disk before loading it.
/// `Ok(None)` means the store rejected the size.
async fn read_upload(store: &ConversationStore, path: &Path) -> io::Result<Option<OutgoingFile>> {
    let size = tokio::fs::metadata(path).await?.len();
    if !store.check_upload_size(size) {
        return Ok(None);
    }
    let data = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    Ok(Some(OutgoingFile::new(&name, utils::guess_mime_type(path), data)))
}

fn send_typing(store: &ConversationStore, signal: TypingSignal) {
    match signal {
        TypingSignal::Start => store.start_typing(),
        TypingSignal::Stop => store.stop_typing(),
    }
}

fn spawn_action<F, Fut>(store: &Arc<ConversationStore>, action: F)
where
    F: FnOnce(Arc<ConversationStore>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(action(Arc::clone(store)));
}

fn dispatch(store: &Arc<ConversationStore>, action: UiAction) {
    match action {
        UiAction::Select(conversation) => spawn_action(store, move |store| async move {
            store.select_conversation(conversation).await
        }),
        UiAction::Search(query) => {
            spawn_action(store, move |store| async move { store.search_users(&query).await })
        }
        UiAction::OpenChat(user_id) => spawn_action(store, move |store| async move {
            if let Some(conversation) = store.create_private_chat(user_id).await {
                store.search_users("").await;
                store.select_conversation(conversation).await;
            }
        }),
        UiAction::LoadMore(page) => {
            spawn_action(store, move |store| async move { store.load_more_messages(page).await })
        }
        UiAction::MarkRead(message_id) => store.mark_message_read(message_id),
        UiAction::DismissError => store.clear_error(),
        other => debug!("Action {:?} handled by the main loop", other),
    }
}
