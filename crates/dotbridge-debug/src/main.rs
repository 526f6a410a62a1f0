use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;

use dotbridge_debug::{
    DebugSession, DebuggerCommand, LaunchProfile, LaunchStrategy, SessionConfig, SessionOutcome,
};

#[derive(Debug, Parser)]
#[command(
    name = "dotbridge-debug",
    about = "Debug Adapter Protocol proxy between an editor and a .NET debugger"
)]
struct Cli {
    /// Address to listen on for the editor's DAP client.
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: SocketAddr,

    /// Project the session belongs to.
    #[arg(long)]
    project: PathBuf,

    /// Program to launch (built output path).
    #[arg(long)]
    program: Option<PathBuf>,

    /// Working directory for the debuggee.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Argument passed to the debuggee (repeatable).
    #[arg(long = "app-arg")]
    app_args: Vec<String>,

    /// KEY=VALUE environment override for the debuggee (repeatable).
    #[arg(long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    #[arg(long, value_enum, default_value = "launch")]
    strategy: StrategyKind,

    /// Process id for the attach strategies.
    #[arg(long)]
    process_id: Option<u32>,

    /// Startup hook assembly for the run-in-terminal strategy.
    #[arg(long)]
    startup_hook: Option<PathBuf>,

    /// Seconds to wait for the client connection.
    #[arg(long, default_value_t = 30)]
    accept_timeout: u64,

    /// Debugger command line, e.g. `-- netcoredbg --interpreter=vscode`.
    #[arg(required = true, num_args = 1.., last = true)]
    debugger: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyKind {
    Launch,
    Attach,
    RunInTerminal,
    TestHost,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn build_config(cli: Cli) -> Result<SessionConfig, String> {
    let strategy = match cli.strategy {
        StrategyKind::Launch => LaunchStrategy::Launch,
        StrategyKind::Attach => LaunchStrategy::AttachToProcess {
            process_id: cli.process_id.ok_or("--process-id is required for attach")?,
        },
        StrategyKind::RunInTerminal => LaunchStrategy::RunInTerminal {
            startup_hook: cli.startup_hook.clone(),
        },
        StrategyKind::TestHost => LaunchStrategy::TestHostAttach {
            process_id: cli.process_id.ok_or("--process-id is required for test-host")?,
        },
    };

    let profile = LaunchProfile {
        program: cli.program,
        cwd: cli.cwd,
        args: cli.app_args,
        env: cli.env.into_iter().collect(),
        strategy,
    };

    let mut debugger = cli.debugger.into_iter();
    let Some(program) = debugger.next() else {
        return Err("debugger command line is empty".to_string());
    };
    let debugger = DebuggerCommand {
        program,
        args: debugger.collect(),
    };

    let mut config = SessionConfig::new(cli.project, debugger, profile);
    config.listen = cli.listen;
    config.accept_timeout = Duration::from_secs(cli.accept_timeout);
    Ok(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match build_config(cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("dotbridge-debug: {message}");
            std::process::exit(2);
        }
    };

    let session = match DebugSession::start(config) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("dotbridge-debug: {err}");
            std::process::exit(1);
        }
    };

    // The editor reads the port from this line to connect its DAP client.
    println!("DAP {}", session.local_addr());
    info!(addr = %session.local_addr(), "proxy listening");

    match session.wait() {
        SessionOutcome::Completed => {}
        SessionOutcome::Canceled => {
            eprintln!("dotbridge-debug: no client connected");
            std::process::exit(3);
        }
        SessionOutcome::Faulted(reason) => {
            eprintln!("dotbridge-debug: {reason}");
            std::process::exit(1);
        }
    }
}
