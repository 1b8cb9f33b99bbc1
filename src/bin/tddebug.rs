//! TDDebug CLI binary.
//!
//! # Commands
//!
//! - `encode` - Build a frame from a message type and parameters
//! - `decode` - Show the type and parameters of a frame
//! - `listen` - Run a debugger node on TCP
//! - `connect` - Run a debuggee node that reports to a debugger

use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use tddebug::{
    catalog::make_symbolic,
    codec::{Command, WireCodec},
    protocol::{AcceptPolicy, HandshakeState, KvpUpdate},
    transport::event_channel,
    Config, LoggingHandlers, MessageType, Node, NodeHandle, PeerId, TcpTransport, VERSION,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tddebug")]
#[command(version = VERSION)]
#[command(about = "TDDebug - peer-to-peer debug messaging", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/tddebug/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a frame
    Encode {
        /// Message type name (e.g. LogMessage) or token
        #[arg(short = 't', long = "type")]
        message_type: String,

        /// Parameters as KEY=VALUE
        params: Vec<String>,
    },

    /// Decode a frame
    Decode {
        /// Frame (or - for stdin)
        input: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a debugger node that accepts debuggees
    Listen {
        /// Listen address (overrides config)
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Display name (overrides config)
        #[arg(short, long)]
        name: Option<String>,

        /// Accept policy: grant, refuse, manual (default: grant)
        #[arg(long)]
        policy: Option<AcceptPolicy>,
    },

    /// Run a debuggee node that reports to a debugger
    Connect {
        /// Debugger address
        addr: SocketAddr,

        /// Display name (overrides config)
        #[arg(short, long)]
        name: Option<String>,

        /// Log lines to send once granted
        #[arg(long = "log")]
        logs: Vec<String>,

        /// Key-value pairs to send once granted, as KEY=VALUE
        #[arg(long = "kvp")]
        kvps: Vec<String>,

        /// Seconds to stay connected after reporting
        #[arg(long, default_value = "0")]
        linger: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            message_type,
            params,
        } => cmd_encode(cli.config, &message_type, &params),
        Commands::Decode { input, json } => cmd_decode(cli.config, input, json),
        Commands::Listen {
            listen,
            name,
            policy,
        } => {
            init_logging(cli.verbose);
            cmd_listen(cli.config, listen, name, policy)
        },
        Commands::Connect {
            addr,
            name,
            logs,
            kvps,
            linger,
        } => {
            init_logging(cli.verbose);
            cmd_connect(cli.config, addr, name, &logs, &kvps, linger)
        },
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Ok(Config::load(path.as_deref())?)
}

fn codec(config: &Config) -> WireCodec {
    WireCodec::with_delimiters(config.codec.delimiter_set())
}

fn split_pair(pair: &str) -> anyhow::Result<(&str, &str)> {
    pair.split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got {pair:?}"))
}

fn cmd_encode(config: Option<PathBuf>, message_type: &str, params: &[String]) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let ty = MessageType::from_name(message_type)
        .or_else(|| MessageType::lookup(message_type))
        .with_context(|| format!("unknown message type: {message_type}"))?;

    let mut command = Command::new(ty);
    for pair in params {
        let (key, value) = split_pair(pair)?;
        command = command.param(key, value);
    }

    println!("{}", codec(&config).encode(&command)?);
    Ok(())
}

fn cmd_decode(config: Option<PathBuf>, input: Option<String>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let raw = read_input(input)?;
    let raw = raw.trim_end_matches(['\r', '\n']);
    let frame = codec(&config).decode_frame(raw);

    if json {
        let params: Vec<_> = frame
            .command
            .params
            .iter()
            .map(|(k, v)| serde_json::json!({ "name": k, "value": v }))
            .collect();
        let output = serde_json::json!({
            "type": frame.command.message_type.name(),
            "token": frame.token,
            "delimiter": frame.delimiter.map(String::from),
            "params": params,
            "malformed": frame.malformed,
            "symbolic": make_symbolic(raw),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Type:      {}", frame.command.message_type);
        if frame.is_unknown() {
            println!("Token:     {}", frame.token);
        }
        for (key, value) in frame.command.params.iter() {
            println!("  {key} = {value}");
        }
        for part in &frame.malformed {
            println!("  (skipped) {part}");
        }
        println!("Symbolic:  {}", make_symbolic(raw));
    }
    Ok(())
}

fn cmd_listen(
    config: Option<PathBuf>,
    listen: Option<SocketAddr>,
    name: Option<String>,
    policy: Option<AcceptPolicy>,
) -> anyhow::Result<()> {
    let mut config = load_config(config)?;
    if let Some(name) = name {
        config.node.name = name;
    }
    config.node.accept_policy = policy.unwrap_or(AcceptPolicy::Grant);
    let addr: SocketAddr = match listen {
        Some(addr) => addr,
        None => config.transport.listen.parse()?,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (tx, rx) = event_channel();
        let transport = TcpTransport::with_max_frame(tx, config.transport.max_frame_bytes);
        let bound = transport.listen(addr).await?;
        tracing::info!(name = %config.node.name, "debugger listening on {}", bound);

        let node = Node::spawn(config, Arc::new(transport), rx, LoggingHandlers);
        tokio::signal::ctrl_c().await?;
        node.shutdown().await?;
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_connect(
    config: Option<PathBuf>,
    addr: SocketAddr,
    name: Option<String>,
    logs: &[String],
    kvps: &[String],
    linger: u64,
) -> anyhow::Result<()> {
    let mut config = load_config(config)?;
    if let Some(name) = name {
        config.node.name = name;
    }
    let updates = kvps
        .iter()
        .map(|pair| split_pair(pair).map(|(k, v)| KvpUpdate::new(Uuid::new_v4(), k, v)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (tx, rx) = event_channel();
        let transport = TcpTransport::with_max_frame(tx, config.transport.max_frame_bytes);
        let peer = transport.connect(addr).await?;
        let node = Node::spawn(config, Arc::new(transport), rx, LoggingHandlers);

        node.request_connection(&peer).await?;
        wait_for_state(&node, &peer, HandshakeState::GrantedAsDebuggee).await?;
        tracing::info!(peer = %peer, "granted as debuggee");

        for line in logs {
            node.send_log(&peer, line).await?;
        }
        for update in &updates {
            node.send_kvp(&peer, update).await?;
        }

        tokio::time::sleep(Duration::from_secs(linger)).await;
        node.close(&peer).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        node.shutdown().await?;
        Ok::<_, anyhow::Error>(())
    })
}

async fn wait_for_state(node: &NodeHandle, peer: &PeerId, wanted: HandshakeState) -> anyhow::Result<()> {
    for _ in 0..50 {
        let state = node
            .sessions()
            .await?
            .into_iter()
            .find(|s| &s.peer == peer)
            .map(|s| s.state);
        match state {
            Some(state) if state == wanted => return Ok(()),
            Some(HandshakeState::Idle) => bail!("debugger at {peer} refused the connection"),
            Some(HandshakeState::Disconnected) | None => bail!("lost connection to {peer}"),
            _ => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    bail!("timed out waiting for {peer} to grant the connection")
}

fn read_input(input: Option<String>) -> anyhow::Result<String> {
    match input.as_deref() {
        Some("-") | None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        },
        Some(s) => Ok(s.to_string()),
    }
}
