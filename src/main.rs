use std::sync::Arc;

use clap::Parser;
use dapadapter::{
    AdapterLaunch, DapSession, DriverConfig, DriverEvent, FileSourceLookup, OutputChannel,
};

/// Headless driver harness: spawns a debug adapter, launches a program and
/// prints driver notifications. Console input is forwarded to the adapter.
#[derive(Parser)]
#[command(name = "dapdbg", version)]
struct Cli {
    /// Debug adapter executable
    #[arg(long)]
    adapter: String,

    /// Extra argument for the adapter (repeatable)
    #[arg(long = "adapter-arg")]
    adapter_args: Vec<String>,

    /// Adapter id sent in the initialize request
    #[arg(long, default_value = "dapdbg")]
    adapter_id: String,

    /// Stop at program entry
    #[arg(long)]
    stop_on_entry: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,

    /// Program to debug
    program: String,

    /// Program arguments
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_level(cli.log_level)
        .with_module_level("dapadapter", log::LevelFilter::Trace)
        .init()
        .unwrap();

    log::info!("dapdbg starting, adapter: {}", cli.adapter);

    if let Err(err) = run(cli).await {
        log::error!("session failed: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> dapadapter::Result<()> {
    let mut launch = AdapterLaunch::new(&cli.adapter);
    launch.args = cli.adapter_args.clone();

    let mut config = DriverConfig::new(&cli.adapter_id);
    config.source_lookup = Arc::new(FileSourceLookup);

    let (session, mut events) = DapSession::spawn(&launch, config)?;
    let session = Arc::new(session);

    session.initialize().await?;
    session
        .launch_program(&cli.program, &cli.args, cli.stop_on_entry)
        .await?;

    // Forward our own stdin to the adapter process.
    let stdin_session = session.clone();
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stdin_session.pass_stdin(&format!("{line}\n")).await.is_err() {
                break;
            }
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            DriverEvent::Output { channel, text } => {
                let tag = match channel {
                    OutputChannel::DebuggeeStdout => "out",
                    OutputChannel::DebuggeeStderr => "err",
                    OutputChannel::Debugger => "dbg",
                };
                println!("[{tag}] {}", text.trim_end());
            }
            DriverEvent::Stopped(stop) => {
                let frame = stop
                    .frame
                    .as_ref()
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| "<no frame>".to_string());
                println!("stopped ({}) in {frame}", stop.reason);
            }
            DriverEvent::Continued { .. } => println!("continued"),
            DriverEvent::Exited { exit_code } => {
                println!("exited with code {exit_code}");
                break;
            }
            DriverEvent::Terminated => {
                println!("terminated");
                break;
            }
            other => log::debug!("event: {other:?}"),
        }
    }

    session.close().await;
    Ok(())
}
