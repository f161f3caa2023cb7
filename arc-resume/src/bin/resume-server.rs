//! Session resumption demo server
//!
//! Accepts TLS connections one at a time and reports, for each completed handshake,
//! whether a new session was issued or a cached one resumed.

#![deny(unsafe_code)]
#![allow(clippy::print_stdout)]

use std::process::ExitCode;
use std::time::Duration;

use arc_resume::{
    DEFAULT_PORT, DEFAULT_SESSION_ID_CONTEXT, PemFileIdentity, ServerRole, TlsConfig, TracingConfig,
    init_tracing, transport,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};

/// TLS session resumption demo server
#[derive(Parser, Debug)]
#[command(name = "resume-server", author, version, about)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// PEM certificate chain
    #[arg(long, default_value = "server.crt")]
    cert: String,

    /// PEM private key
    #[arg(long, default_value = "server.key")]
    key: String,

    /// Session id context stamped on issued sessions
    #[arg(long, default_value = DEFAULT_SESSION_ID_CONTEXT)]
    context: String,

    /// Maximum number of cached sessions
    #[arg(long, default_value_t = arc_resume::DEFAULT_SERVER_CACHE_SIZE)]
    cache_size: usize,

    /// Session lifetime in seconds
    #[arg(long, default_value_t = 300)]
    session_lifetime: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&TracingConfig { log_level: args.log_level, ..Default::default() });

    let config = TlsConfig::new()
        .with_session_id_context(args.context)
        .with_server_cache(args.cache_size)
        .with_session_lifetime(Duration::from_secs(args.session_lifetime))
        .with_tracing();
    let identity = PemFileIdentity::new(&args.cert, &args.key);

    let server = match ServerRole::new(&config, &identity) {
        Ok(server) => server,
        Err(err) => {
            error!(code = %err.code(), "{}", err);
            return ExitCode::FAILURE;
        }
    };
    let listener = match transport::listen(&format!("{}:{}", args.bind, args.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(code = %err.code(), "{}", err);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            on_signal.cancel();
        }
    });

    let result = server
        .run(listener, shutdown, |outcome| {
            if let Some(id) = &outcome.session_id {
                if outcome.reused {
                    println!("RESUMED SESSION: {}", id);
                } else {
                    println!("NEW SESSION: {}", id);
                }
            }
        })
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = %err.code(), "{}", err);
            ExitCode::FAILURE
        }
    }
}
