use colabri_sync::sync::Origin;
use colabri_sync::{Config, ConnectionManager, DocumentBuffer, EditOutcome, SyncController};
use std::panic;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Configuration first, so its log level can seed the filter. Load only
    // returns errors; they are logged once tracing is up.
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("colabri_sync=debug,{}", config.log_level).into()),
        )
        .init();

    match &loaded {
        Ok(config) => info!("Configuration loaded, endpoint {}", config.endpoint),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            warn!("Using default configuration");
        }
    }

    let manager = ConnectionManager::new(config.endpoint.clone(), config.reconnect_policy());
    let controller = SyncController::attach(manager.clone(), DocumentBuffer::default());

    // Connection indicator
    let mut status = manager.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            println!("[connection] {current}");
        }
    });

    // Presence
    let mut users = controller.subscribe_presence();
    tokio::spawn(async move {
        while users.changed().await.is_ok() {
            let count = *users.borrow_and_update();
            println!("[presence] {count} users online");
        }
    });

    // Re-render on remote writes only; local ones are already on screen
    let mut renders = controller.buffer().subscribe();
    tokio::spawn(async move {
        while renders.changed().await.is_ok() {
            let snapshot = renders.borrow_and_update().clone();
            if snapshot.origin == Origin::Remote {
                println!("[document r{}]\n{}", snapshot.revision, snapshot.text);
            }
        }
    });

    info!("Connecting to {}", config.endpoint);
    if let Err(e) = manager.connect().await {
        error!("Initial connection failed: {}", e);
        warn!("Edits stay local until /connect succeeds");
    }

    println!("Type a line to append it to the document. Commands: /show /users /connect /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match line.trim() {
            "/quit" => break,
            "/show" => println!("{}", controller.buffer().text()),
            "/users" => println!("[presence] {} users online", controller.users_count()),
            "/connect" => {
                if let Err(e) = manager.connect().await {
                    warn!("Connection failed: {}", e);
                }
            }
            _ => {
                let mut text = controller.buffer().text();
                text.push_str(&line);
                text.push('\n');
                if controller.local_edit(&text) == EditOutcome::LocalOnly {
                    println!("[offline] edit kept locally");
                }
            }
        }
    }

    controller.detach();
    manager.disconnect();
    info!("Client stopped");
}
