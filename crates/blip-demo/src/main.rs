//! BLIP demo binary.
//!
//! Demonstrates a basic request/response exchange: a client sends an
//! `Echo`-profile request over a real `BLIP_3` WebSocket and prints the
//! echoed response.
//!
//! # Usage
//!
//! ```bash
//! blip-demo server --bind 127.0.0.1:4433
//! blip-demo client --url ws://127.0.0.1:4433 --message "hi"
//! ```

use std::sync::Arc;

use blip_core::{ConnectionConfig, HandlerOutcome};
use blip_proto::MessageBuilder;
use blip_transport::{Listener, MessageOutcome, NullDelegate};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// BLIP protocol demo
#[derive(Parser, Debug)]
#[command(name = "blip-demo")]
#[command(about = "Demonstrates a BLIP Echo request/response over a WebSocket")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a server that echoes every `Echo`-profile request it receives.
    Server {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:4433")]
        bind: String,
    },
    /// Connect to a server and send one `Echo` request.
    Client {
        /// WebSocket URL to dial, e.g. ws://127.0.0.1:4433
        #[arg(short, long)]
        url: String,
        /// Body to echo
        #[arg(short, long, default_value = "hi")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Server { bind } => run_server(&bind).await,
        Command::Client { url, message } => run_client(&url, &message).await,
    }
}

async fn run_server(bind: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::bind(bind).await?;
    tracing::info!("blip-demo server listening on {}", listener.local_addr()?);

    loop {
        let (handle, task) = listener
            .accept(ConnectionConfig::default(), configure_echo_handler, Arc::new(NullDelegate))
            .await?;
        tracing::info!("accepted a BLIP_3 connection");
        // Keep the handle alive for the connection's lifetime; the demo
        // only needs the handler, so the connection drives itself.
        drop(handle);
        tokio::spawn(async move {
            let _ = task.await;
            tracing::info!("connection closed");
        });
    }
}

fn configure_echo_handler(connection: &mut blip_core::Connection) {
    connection.set_request_handler("Echo", |request: &blip_proto::CompletedMessage| {
        Ok(HandlerOutcome::Respond(MessageBuilder::new().body(request.body.clone())))
    });
}

async fn run_client(url: &str, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (handle, _task) =
        blip_transport::dial(url, ConnectionConfig::default(), |_| {}, Arc::new(NullDelegate)).await?;

    let outcome = handle
        .send_request(MessageBuilder::new().profile("Echo").body(Bytes::from(message.to_string())))
        .await?;

    match outcome {
        MessageOutcome::Response(response) => {
            let body = String::from_utf8_lossy(&response.body);
            tracing::info!("echoed back: {body}");
        },
        MessageOutcome::Disconnected => tracing::warn!("connection dropped before a response arrived"),
    }

    handle.close(1000, "done");
    Ok(())
}
