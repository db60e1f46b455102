//! CLI entry point.
//!
//! Picks the LSP transport (`--stdio` or `--socket`; `--node-ipc` exists for
//! flag parity but has no Rust counterpart), wires logging to stderr, and
//! serves the bridge.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

use tsbridge::{Backend, BridgeOptions};

/// Bridges LSP editors to the TypeScript tsserver process.
#[derive(Parser, Debug)]
#[command(name = "tsbridge")]
#[command(version)]
struct Args {
    /// Speak LSP over stdin/stdout.
    #[arg(long)]
    stdio: bool,

    /// Speak LSP over a Node IPC channel (unsupported).
    #[arg(long = "node-ipc")]
    node_ipc: bool,

    /// Connect to the editor on this local TCP port.
    #[arg(long, value_name = "PORT")]
    socket: Option<u16>,

    /// Path to a tsserver executable or tsserver.js.
    #[arg(long = "tsserver-path", value_name = "PATH")]
    tsserver_path: Option<PathBuf>,

    /// Where tsserver should write its own log.
    #[arg(long = "tsserver-logFile", value_name = "PATH")]
    tsserver_log_file: Option<PathBuf>,

    /// tsserver log verbosity (terse, normal, requestTime, verbose).
    #[arg(long = "tsserver-log-verbosity", value_name = "LEVEL")]
    tsserver_log_verbosity: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the LSP channel; everything we log goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let transports = [args.stdio, args.node_ipc, args.socket.is_some()]
        .iter()
        .filter(|enabled| **enabled)
        .count();
    if transports != 1 {
        eprintln!("exactly one of --stdio, --node-ipc or --socket is required");
        std::process::exit(1);
    }
    if args.node_ipc {
        bail!("--node-ipc is not supported by this server; use --stdio or --socket");
    }

    let options = BridgeOptions {
        tsserver_path: args.tsserver_path,
        tsserver_log_file: args
            .tsserver_log_file
            .or_else(|| std::env::var_os("TSSERVER_LOG_FILE").map(PathBuf::from)),
        tsserver_log_verbosity: args.tsserver_log_verbosity,
    };

    let (service, socket) = LspService::build(move |client| Backend::new(client, options.clone()))
        .custom_method("textDocument/calls", Backend::calls)
        .finish();

    match args.socket {
        Some(port) => {
            let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .with_context(|| format!("could not connect to the editor on port {port}"))?;
            let (read, write) = tokio::io::split(stream);
            Server::new(read, write, socket).serve(service).await;
        }
        None => {
            Server::new(tokio::io::stdin(), tokio::io::stdout(), socket)
                .serve(service)
                .await;
        }
    }
    Ok(())
}
