//! Sidekick - Rust 任务执行智能体
//!
//! 入口：初始化日志、加载配置、激活最新会话，然后运行行式终端交互。

use std::io::Write;

use anyhow::Context;
use sidekick::config::{load_config, AppConfig};
use sidekick::core::{create_agent_builder, AgentError, SessionSupervisor};
use sidekick::react::{DisplayMessage, DisplayRole, TurnStream};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands:
  /criteria <text>   success criteria for following requests (empty resets to default)
  /new [name]        start a new session
  /switch <id>       switch to an existing session
  /rename <name>     rename the current session
  /sessions          list sessions
  /reset             fresh capabilities for the current session
  /resume            continue an interrupted turn
  /quit              exit";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Ask(&'a str),
    Criteria(&'a str),
    New(Option<&'a str>),
    Switch(&'a str),
    Rename(&'a str),
    Sessions,
    Reset,
    Resume,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Ask(line);
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };
    match cmd {
        "criteria" => Command::Criteria(arg),
        "new" => Command::New(Some(arg).filter(|a| !a.is_empty())),
        "switch" if !arg.is_empty() => Command::Switch(arg),
        "rename" if !arg.is_empty() => Command::Rename(arg),
        "sessions" => Command::Sessions,
        "reset" => Command::Reset,
        "resume" => Command::Resume,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(line),
    }
}

fn print_message(message: &DisplayMessage) {
    if message.role == DisplayRole::User {
        return;
    }
    match message.title() {
        Some(title) => println!("  [{title}] {}", message.content),
        None => println!("{}\n", message.content),
    }
}

fn print_history(history: &[DisplayMessage]) {
    for m in history {
        match m.role {
            DisplayRole::User => println!("> {}", m.content),
            DisplayRole::Assistant => println!("{}\n", m.content),
        }
    }
}

/// 打印新增的快照消息；Ctrl+C 取消本轮
async fn stream_turn(mut stream: TurnStream, mut shown: usize) {
    loop {
        tokio::select! {
            snapshot = stream.next_snapshot() => match snapshot {
                Some(snapshot) => {
                    for m in snapshot.messages.iter().skip(shown) {
                        print_message(m);
                    }
                    shown = shown.max(snapshot.len());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("(cancelling...)");
                stream.cancel();
            }
        }
    }
    match stream.finish().await {
        Ok(outcome) if outcome.user_input_needed => println!("(more input needed)"),
        Ok(_) => {}
        Err(e) => eprintln!("Error: {e}"),
    }
}

async fn show_history(supervisor: &SessionSupervisor) -> Result<(), AgentError> {
    print_history(&supervisor.history().await?);
    Ok(())
}

/// 执行一条命令；错误交给调用方打印，交互继续
async fn run_command(
    supervisor: &mut SessionSupervisor,
    command: Command<'_>,
    criteria: &mut Option<String>,
) -> Result<(), AgentError> {
    match command {
        Command::Quit => {}
        Command::Help => println!("{HELP}"),
        Command::Unknown(cmd) => println!("Unknown command: {cmd}\n{HELP}"),
        Command::Criteria(text) => {
            *criteria = Some(text.to_string()).filter(|c| !c.is_empty());
            println!("Success criteria: {}", criteria.as_deref().unwrap_or("(default)"));
        }
        Command::Ask(text) => {
            let prior = supervisor.history().await?;
            let shown = prior.len();
            if let Some(active) = supervisor.active() {
                let stream = active.orchestrator.run_turn(text, criteria.as_deref(), prior);
                stream_turn(stream, shown + 1).await;
            }
        }
        Command::Resume => {
            let prior = supervisor.history().await?;
            let shown = prior.len();
            if let Some(active) = supervisor.active() {
                match active.orchestrator.resume_turn(prior).await? {
                    Some(stream) => stream_turn(stream, shown + 1).await,
                    None => println!("Nothing to resume."),
                }
            }
        }
        Command::New(name) => {
            let a = supervisor.create(name).await?;
            println!("New session \"{}\" ({})", a.session.name, a.session.id);
        }
        Command::Switch(id) => {
            let a = supervisor.switch_to(id).await?;
            println!("Switched to \"{}\" ({})", a.session.name, a.session.id);
            show_history(supervisor).await?;
        }
        Command::Rename(name) => {
            if supervisor.rename(name).await? {
                println!("Renamed to \"{name}\"");
            }
        }
        Command::Reset => {
            let a = supervisor.reset().await?;
            println!("Session \"{}\" reset", a.session.name);
        }
        Command::Sessions => {
            let list = supervisor.list().await?;
            let current = supervisor.active().map(|a| a.session.id.clone());
            for s in list {
                let marker = if current.as_deref() == Some(s.id.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {}  {}  {}",
                    s.id,
                    s.created_at.format("%Y-%m-%d %H:%M"),
                    s.name
                );
            }
        }
    }
    Ok(())
}

fn load_or_default() -> AppConfig {
    match load_config(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "invalid configuration, using defaults");
            AppConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sidekick::observability::init();

    let cfg = load_or_default();
    let (builder, sessions) = create_agent_builder(&cfg).context("Failed to create agent")?;
    let mut supervisor = SessionSupervisor::new(builder, sessions);
    let active = supervisor.start().await.context("Failed to open session")?;
    println!(
        "Sidekick: session \"{}\" ({}), capabilities: {}",
        active.session.name,
        active.session.id,
        active.orchestrator.capability_names().join(", ")
    );
    println!("Type /help for commands.\n");
    if let Err(e) = show_history(&supervisor).await {
        eprintln!("Error: {e}");
    }

    let mut criteria: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Command::Quit => break,
            command => {
                if let Err(e) = run_command(&mut supervisor, command, &mut criteria).await {
                    eprintln!("Error: {e}");
                }
            }
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_parsed() {
        assert_eq!(parse_command("hello there"), Command::Ask("hello there"));
        assert_eq!(parse_command("/new"), Command::New(None));
        assert_eq!(parse_command("/new  Trip plans "), Command::New(Some("Trip plans")));
        assert_eq!(parse_command("/switch abc"), Command::Switch("abc"));
        assert_eq!(parse_command("/switch"), Command::Unknown("/switch"));
        assert_eq!(parse_command("/criteria"), Command::Criteria(""));
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("/bogus x"), Command::Unknown("/bogus x"));
    }

    #[tokio::test]
    async fn history_failure_is_reported_and_the_session_stays_usable() {
        use std::sync::Arc;

        use sidekick::core::AgentBuilder;
        use sidekick::llm::ScriptedReasoner;
        use sidekick::memory::{
            Database, SessionStore, SqliteCheckpointStore, SqliteProfileStore,
            SqliteTranscriptStore,
        };

        let dir = tempfile::TempDir::new().unwrap();
        let main_db = Database::new(dir.path().join("sidekick.db"));
        let sessions = SessionStore::open(main_db.clone()).unwrap();
        let builder = AgentBuilder::new(
            Arc::new(ScriptedReasoner::new()),
            Arc::new(SqliteProfileStore::open(main_db.clone()).unwrap()),
            Arc::new(SqliteTranscriptStore::open(main_db).unwrap()),
            Arc::new(
                SqliteCheckpointStore::open(Database::new(dir.path().join("checkpoints.db")))
                    .unwrap(),
            ),
        );
        let mut supervisor = SessionSupervisor::new(builder, sessions);
        let id = supervisor.start().await.unwrap().session.id.clone();

        rusqlite::Connection::open(dir.path().join("sidekick.db"))
            .unwrap()
            .execute_batch("DROP TABLE chat_history")
            .unwrap();

        let mut criteria = None;
        for command in [Command::Ask("hello"), Command::Resume, Command::Switch(&id)] {
            let err = run_command(&mut supervisor, command, &mut criteria).await.unwrap_err();
            assert!(matches!(err, AgentError::Persistence(_)));
        }
        run_command(&mut supervisor, Command::Criteria("be brief"), &mut criteria)
            .await
            .unwrap();
        assert_eq!(criteria.as_deref(), Some("be brief"));
        assert_eq!(supervisor.active().unwrap().session.id, id);
        supervisor.shutdown().await;
    }
}
