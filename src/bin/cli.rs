//! netsession CLI Client
//!
//! Connects to a server, sends stdin lines and prints what comes back.

use std::io::BufRead;
use std::thread;

use clap::Parser;
use netsession::{AddressFamily, Config, Engine, ExecutionMode, NetEvent, Transport};
use tracing_subscriber::{fmt, EnvFilter};

/// netsession CLI
#[derive(Parser, Debug)]
#[command(name = "netsession-cli")]
#[command(about = "Interactive TCP/UDP client")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Address family (ipv4 | ipv6)
    #[arg(short, long, default_value = "ipv4")]
    family: AddressFamily,

    /// Transport (tcp | udp)
    #[arg(short, long, default_value = "tcp")]
    transport: Transport,

    /// Receive on a dedicated thread instead of the event loop (TCP only)
    #[arg(short, long)]
    worker: bool,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netsession=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let mode = if args.worker {
        ExecutionMode::WorkerThread
    } else {
        ExecutionMode::EventLoop
    };
    let config = Config::builder()
        .family(args.family)
        .transport(args.transport)
        .execution_mode(mode)
        .build();

    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let id = match engine.start_client(args.family, args.transport, &args.host, args.port) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Printer: ends the loop once the session is gone
    let events = engine.event_receiver();
    let handle = engine.handle();
    thread::spawn(move || {
        for event in events.iter() {
            match event {
                NetEvent::Connected { remote, .. } => println!("connected to {}", remote),
                NetEvent::DataReceived { bytes, source, .. } => {
                    let text = String::from_utf8_lossy(&bytes);
                    match source {
                        Some(source) => println!("{}: {}", source, text.trim_end()),
                        None => println!("{}", text.trim_end()),
                    }
                }
                NetEvent::Disconnected { id: gone } if gone == id => {
                    println!("disconnected");
                    let _ = handle.shutdown();
                    break;
                }
                NetEvent::Disconnected { .. } => {}
                NetEvent::Error { kind, detail, .. } => {
                    eprintln!("error ({:?}): {}", kind, detail);
                    if kind == netsession::NetErrorKind::Connect {
                        let _ = handle.shutdown();
                        break;
                    }
                }
            }
        }
    });

    // Reader: each stdin line becomes one send
    let handle = engine.handle();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(mut line) = line else { break };
            line.push('\n');
            if handle.send(id, line.into_bytes()).is_err() {
                return;
            }
        }
        let _ = handle.disconnect(id);
        let _ = handle.shutdown();
    });

    if let Err(e) = engine.run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
