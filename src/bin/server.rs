//! netsession Server Binary
//!
//! Starts a TCP or UDP server and logs session events.

use std::io::BufRead;
use std::thread;

use clap::Parser;
use netsession::{
    AddressFamily, Config, Engine, EngineHandle, NetEvent, SessionId, Transport,
};
use tracing_subscriber::{fmt, EnvFilter};

/// netsession Server
#[derive(Parser, Debug)]
#[command(name = "netsession-server")]
#[command(about = "TCP/UDP server driven by a single event loop")]
#[command(version)]
struct Args {
    /// Address family (ipv4 | ipv6)
    #[arg(short, long, default_value = "ipv4")]
    family: AddressFamily,

    /// Transport (tcp | udp)
    #[arg(short, long, default_value = "tcp")]
    transport: Transport,

    /// Local port
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Upper bound for a single receive, in bytes
    #[arg(long, default_value = "1024")]
    recv_buffer: usize,

    /// Send every received payload back to its sender
    #[arg(long)]
    echo: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netsession=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("netsession server v{}", netsession::VERSION);

    let config = Config::builder()
        .family(args.family)
        .transport(args.transport)
        .port(args.port)
        .max_connections(args.max_connections)
        .recv_buffer_size(args.recv_buffer)
        .build();

    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to create engine: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.start() {
        tracing::error!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    if let Some(addr) = engine.server_local_addr() {
        tracing::info!("Listening on {} ({})", addr, args.transport);
    }

    let events = engine.event_receiver();
    let handle = engine.handle();
    let echo = args.echo;
    thread::spawn(move || {
        for event in events.iter() {
            on_event(&handle, &event, echo);
        }
    });

    let handle = engine.handle();
    thread::spawn(move || read_commands(handle));

    if let Err(e) = engine.run() {
        tracing::error!("Event loop error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

fn on_event(handle: &EngineHandle, event: &NetEvent, echo: bool) {
    match event {
        NetEvent::Connected { id, remote } => println!("[{}] connected from {}", id, remote),
        NetEvent::Disconnected { id } => println!("[{}] disconnected", id),
        NetEvent::DataReceived { id, bytes, source } => {
            let text = String::from_utf8_lossy(bytes);
            match source {
                Some(source) => println!("[{}] {} from {}: {}", id, bytes.len(), source, text.trim_end()),
                None => println!("[{}] {}: {}", id, bytes.len(), text.trim_end()),
            }

            if echo {
                let result = match source {
                    Some(source) => handle.send_to(*id, *source, bytes.clone()),
                    None => handle.send(*id, bytes.clone()),
                };
                if let Err(e) = result {
                    tracing::warn!("Echo failed: {}", e);
                }
            }
        }
        NetEvent::Error { scope, kind, detail } => {
            println!("error ({:?}, {:?}): {}", scope, kind, detail)
        }
    }
}

/// Console commands: `send <id> <text>`, `reply <text>`, `kick <id>`, `stop`, `quit`
fn read_commands(handle: EngineHandle) {
    let stdin = std::io::stdin();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));

        let result = match word {
            "" => continue,
            "send" => match parse_target(rest) {
                Some((id, text)) => handle.send(id, text.as_bytes().to_vec()),
                None => {
                    println!("usage: send <id> <text>");
                    continue;
                }
            },
            "reply" => handle.reply(rest.as_bytes().to_vec()),
            "kick" => match rest.trim().parse() {
                Ok(raw) => handle.disconnect(SessionId::new(raw)),
                Err(_) => {
                    println!("usage: kick <id>");
                    continue;
                }
            },
            "stop" => handle.stop(),
            "quit" => {
                let _ = handle.shutdown();
                break;
            }
            other => {
                println!("unknown command '{}'", other);
                continue;
            }
        };

        if let Err(e) = result {
            tracing::warn!("Command failed: {}", e);
            break;
        }
    }
}

fn parse_target(rest: &str) -> Option<(SessionId, &str)> {
    let (id, text) = rest.split_once(' ')?;
    let id = id.parse().ok()?;
    Some((SessionId::new(id), text))
}
