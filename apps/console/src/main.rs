use std::{
    io::{BufRead, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ledger_integration::{EventSource, InMemoryLedger};
use mirror_core::{
    read_history, render, render_history, LedgerSession, LiveMirror, MirrorOptions, MirrorTarget,
    TextRenderer,
};
use shared::domain::{AccountId, ContractAddress, GameId};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod peer;

use config::{load_settings, Settings, DEFAULT_CONFIG_PATH};
use peer::SimulatedPeer;

#[derive(Parser, Debug)]
#[command(about = "Mirror live ledger chat and move events in the terminal")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long)]
    contract: Option<String>,
    #[arg(long)]
    account: Option<String>,
    #[arg(long)]
    title: Option<String>,
    /// Number of most recent events kept on screen.
    #[arg(long)]
    capacity: Option<usize>,
    /// Run a simulated second participant that acts every N milliseconds.
    #[arg(long)]
    peer_interval_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Tail the chat room and send each typed line as a message.
    Chat,
    /// Tail move events; with --game, typed `x y` lines are played as moves.
    Moves {
        #[arg(long)]
        game: Option<u64>,
    },
    /// Tail the chat of one game and send each typed line to it.
    GameChat {
        #[arg(long)]
        game: u64,
    },
    /// Print every event recorded so far and exit.
    History {
        #[arg(long, value_enum, default_value_t = HistoryKind::Chat)]
        kind: HistoryKind,
        #[arg(long)]
        game: Option<u64>,
        /// One JSON object per line instead of text.
        #[arg(long)]
        json: bool,
        /// Let the simulated peer act this many times before reading.
        #[arg(long, default_value_t = 0)]
        seed: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum HistoryKind {
    Chat,
    Moves,
    GameChat,
}

impl Cli {
    fn apply_overrides(&self, mut settings: Settings) -> Settings {
        if let Some(v) = &self.contract {
            settings.contract = v.clone();
        }
        if let Some(v) = &self.account {
            settings.account = v.clone();
        }
        if let Some(v) = &self.title {
            settings.user_title = v.clone();
        }
        if let Some(v) = self.capacity {
            settings.ring_capacity = v;
        }
        if let Some(v) = self.peer_interval_ms {
            settings.peer_interval_ms = v;
        }
        settings
    }
}

fn history_target(kind: HistoryKind, game: Option<u64>) -> Result<MirrorTarget> {
    Ok(match kind {
        HistoryKind::Chat => MirrorTarget::ChatRoom,
        HistoryKind::Moves => MirrorTarget::Moves {
            game_id: game.map(GameId),
        },
        HistoryKind::GameChat => match game {
            Some(game) => MirrorTarget::GameChat {
                game_id: GameId(game),
            },
            None => bail!("--kind game-chat requires --game <id>"),
        },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = cli.apply_overrides(load_settings(&cli.config));

    let contract = ContractAddress::new(settings.contract.clone());
    let account = AccountId::new(settings.account.clone());
    let ledger = InMemoryLedger::new();
    ledger.register_user(&contract, &account, settings.user_title.clone());
    let source: Arc<dyn EventSource> = ledger.clone();
    let session = LedgerSession::new(
        account.clone(),
        contract.clone(),
        source,
        Arc::new(ledger.submitter(contract, account)),
    );

    match cli.command {
        Command::Chat => run_mirror(&session, &ledger, MirrorTarget::ChatRoom, &settings).await,
        Command::Moves { game } => {
            let target = MirrorTarget::Moves {
                game_id: game.map(GameId),
            };
            run_mirror(&session, &ledger, target, &settings).await
        }
        Command::GameChat { game } => {
            let target = MirrorTarget::GameChat {
                game_id: GameId(game),
            };
            run_mirror(&session, &ledger, target, &settings).await
        }
        Command::History {
            kind,
            game,
            json,
            seed,
        } => {
            let target = history_target(kind, game)?;
            run_history(&session, &ledger, target, json, seed).await
        }
    }
}

async fn run_mirror(
    session: &LedgerSession,
    ledger: &Arc<InMemoryLedger>,
    target: MirrorTarget,
    settings: &Settings,
) -> Result<()> {
    let options =
        MirrorOptions::with_capacity(settings.ring_capacity)?.header(settings.header_for(target));
    let renderer = render::shared(TextRenderer::with_prompt(
        std::io::stdout(),
        settings.prompt.clone(),
    ));
    let mirror = LiveMirror::start(session, target, options, renderer)
        .await
        .context("failed to start live mirror")?;

    let peer = (settings.peer_interval_ms > 0).then(|| {
        SimulatedPeer::new(ledger, session.contract().clone(), target)
            .spawn(Duration::from_millis(settings.peer_interval_ms))
    });

    print!("{}", settings.prompt);
    std::io::stdout().flush().context("failed to write prompt")?;

    let mut input = spawn_stdin_reader();
    let report = mirror
        .run_send_loop_until(&mut input, shutdown_signal())
        .await;
    if let Some(peer) = peer {
        peer.abort();
    }

    let report = report?;
    info!(
        submitted = report.submitted,
        failed = report.failed,
        rejected = report.rejected_input,
        exit = ?report.exit,
        "console: session ended"
    );
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "console: cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "console: cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("console: interrupted by ctrl-c"),
        _ = terminate => info!("console: terminated by signal"),
    }
}

/// Blocking stdin reads run on their own thread so an interrupt never waits for Enter.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "console: stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}

async fn run_history(
    session: &LedgerSession,
    ledger: &Arc<InMemoryLedger>,
    target: MirrorTarget,
    json: bool,
    seed: u32,
) -> Result<()> {
    if seed > 0 {
        let mut peer = SimulatedPeer::new(ledger, session.contract().clone(), target);
        for _ in 0..seed {
            peer.play_turn().await.context("seeding history")?;
        }
    }

    let events = read_history(session, target.filter(session.contract().clone())).await?;

    if json {
        let mut out = std::io::stdout().lock();
        for event in &events {
            serde_json::to_writer(&mut out, event)?;
            writeln!(out)?;
        }
        out.flush()?;
    } else {
        let mut renderer = TextRenderer::with_prompt(std::io::stdout(), "");
        render_history(&mut renderer, &events)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
