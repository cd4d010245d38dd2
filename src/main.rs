use dishchat::api::client::{ApiClient, ChatBackend};
use dishchat::api::events::ChatEvent;
use dishchat::api::models::{InitialQuery, MessageId, Role};
use dishchat::app::Settings;
use dishchat::chat::starter::start_conversation;
use dishchat::storage::SqliteSlot;
use dishchat::ui::{ChatView, Sidebar};
use log::error;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match dishchat::utils::block_on(run()) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("{e}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("could not start runtime: {e}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let settings = Settings::load();
    let backend: Arc<dyn ChatBackend> = Arc::new(ApiClient::new(&settings.base_url, settings.request_timeout())?);

    let Some(chat_id) = std::env::args().nth(1) else {
        let mut sidebar = Sidebar::new(settings.recents_limit);
        sidebar.reload(&*backend).await?;
        println!("Library");
        for line in sidebar.lines() {
            println!("  {line}");
        }
        return Ok(());
    };

    let slot = Arc::new(SqliteSlot::open(settings.data_dir.as_deref())?);
    let (mut view, mut events) = ChatView::open(Arc::clone(&backend), &chat_id, slot, &settings);
    if let Err(e) = view.load_history().await {
        eprintln!("{e}");
    }
    if let Some(every) = settings.refresh_interval() {
        view.start_auto_refresh(every);
    }
    let mut printer = Printer::default();
    printer.draw(&mut view);
    if !view.input().is_empty() {
        println!("(restored draft) {}", view.input());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/refresh" => view.refresh(),
                    "/queries" => {
                        for (i, q) in view.user_queries().iter().enumerate() {
                            println!("  {}. {q}", i + 1);
                        }
                    }
                    cmd if cmd.starts_with("/new ") => new_conversation(&*backend, &cmd[5..]).await,
                    _ => {
                        view.edit(&line);
                        if let Err(e) = view.submit() {
                            println!("! {e}");
                        }
                    }
                }
            }
            Some(event) = events.recv() => match event {
                ChatEvent::Error(banner) => {
                    println!("! {banner}");
                    view.dismiss_error();
                }
                ChatEvent::MessagesChanged | ChatEvent::RevealProgress { .. } | ChatEvent::PendingChanged(_) => {
                    printer.draw(&mut view);
                }
                ChatEvent::DraftSaved => {}
            },
        }
    }
    view.close();
    Ok(())
}

async fn new_conversation(backend: &dyn ChatBackend, args: &str) {
    let parts: Vec<&str> = args.split('|').map(str::trim).collect();
    let [dish, restaurant, location, query] = parts.as_slice() else {
        println!("usage: /new <dish>|<restaurant>|<location>|<query>");
        return;
    };
    let mut initial = InitialQuery::new(*dish, *location, *query);
    if !restaurant.is_empty() {
        initial = initial.with_restaurant(*restaurant);
    }
    match start_conversation(backend, &initial).await {
        Ok(Some(chat_id)) => println!("started chat {chat_id}"),
        Ok(None) => println!("a dish and a question are required"),
        Err(e) => println!("! Failed to start chat: {e}"),
    }
}

/// Prints only the lines of each message that have not been printed yet.
#[derive(Default)]
struct Printer {
    printed: HashMap<MessageId, usize>,
}

impl Printer {
    fn draw(&mut self, view: &mut ChatView) {
        for message in view.render() {
            let lines = message.to_lines();
            let done = self.printed.entry(message.message_id.clone()).or_insert(0);
            let prefix = match message.role {
                Role::User => "you> ",
                Role::Assistant => "bot> ",
                Role::Loading => "...  ",
            };
            for line in lines.iter().skip(*done) {
                println!("{prefix}{line}");
            }
            *done = (*done).max(lines.len());
        }
    }
}
