//! Session resumption demo client
//!
//! Connects to the demo server several times with one shared session store and prints
//! the session id and whether it was reused after each handshake.

#![deny(unsafe_code)]
#![allow(clippy::print_stdout)]

use std::process::ExitCode;
use std::time::Duration;

use arc_resume::{
    ClientRole, DEFAULT_PORT, RetryPolicy, TlsConfig, TracingConfig, init_tracing,
};
use clap::Parser;
use tracing::{Level, error};

/// TLS session resumption demo client
#[derive(Parser, Debug)]
#[command(name = "resume-client", author, version, about)]
struct Args {
    /// Server host name, checked against the certificate
    #[arg(long, default_value = "session-reuse-server")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connect to this address instead of resolving the host name
    #[arg(long)]
    connect: Option<String>,

    /// PEM file with trusted CA certificates (system roots if omitted)
    #[arg(long)]
    ca: Option<String>,

    /// Number of handshakes
    #[arg(short = 'n', long, default_value_t = 2)]
    handshakes: u32,

    /// Pause between handshakes in milliseconds
    #[arg(long, default_value_t = 1000)]
    pause_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: Level,
}

fn banner(attempt: u32) -> String {
    match attempt {
        1 => "=== FIRST HANDSHAKE ===".to_string(),
        2 => "=== SECOND HANDSHAKE (should reuse) ===".to_string(),
        n => format!("=== HANDSHAKE {} (should reuse) ===", n),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&TracingConfig { log_level: args.log_level, ..Default::default() });

    let mut config = TlsConfig::new().with_retry_policy(RetryPolicy::default());
    if let Some(ca) = &args.ca {
        config = config.with_ca_certs(ca);
    }
    let addr = args.connect.clone().unwrap_or_else(|| format!("{}:{}", args.host, args.port));

    let client = match ClientRole::new(&config, addr, &args.host) {
        Ok(client) => client,
        Err(err) => {
            error!(code = %err.code(), "{}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    for attempt in 1..=args.handshakes {
        if attempt > 1 {
            tokio::time::sleep(Duration::from_millis(args.pause_ms)).await;
        }
        println!("{}", banner(attempt));
        match client.connect_once().await {
            Ok(outcome) => {
                let id = outcome.session_id.map(|id| id.to_hex()).unwrap_or_default();
                println!(
                    "CLIENT: session-id {}  reused={}",
                    id,
                    if outcome.reused { "YES" } else { "NO" }
                );
            }
            Err(err) if err.is_fatal() => {
                error!(code = %err.code(), "{}", err);
                return ExitCode::FAILURE;
            }
            Err(err) => {
                println!("CLIENT: handshake failed: {}", err);
                failed = true;
            }
        }
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}
