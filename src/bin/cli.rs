//! blobdepot CLI Client
//!
//! Runs a one-shot agent against a depot.

use blobdepot::agent::{Agent, Completion, Outcome};
use blobdepot::network::TcpLink;
use blobdepot::protocol::{AgentMessage, CommitItem, DepotMessage, ResolveItem, ResolveStatus};
use blobdepot::types::{BlobLocator, ChannelKindId};
use blobdepot::{Config, DepotLink, Result};
use clap::{Parser, Subcommand};

/// blobdepot CLI
#[derive(Parser, Debug)]
#[command(name = "blobdepot-cli")]
#[command(about = "CLI for a blobdepot depot")]
struct Args {
    /// Depot address
    #[arg(short, long, default_value = "127.0.0.1:7480")]
    server: String,

    /// Tablet id of the depot
    #[arg(short, long, default_value = "1")]
    tablet_id: u64,

    /// Agent instance id
    #[arg(long, default_value = "1")]
    instance_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register and print the channel-kind table
    Register,

    /// Lease identifiers
    Allocate {
        #[arg(short, long, default_value = "data")]
        kind: ChannelKindId,

        #[arg(short, long, default_value = "10")]
        count: u32,
    },

    /// Commit a freshly leased blob under a key
    Commit {
        #[arg(short, long, default_value = "data")]
        kind: ChannelKindId,

        /// Hex key; defaults to the blob id of the leased identifier
        #[arg(long)]
        key: Option<String>,

        /// Blob size in bytes
        #[arg(long, default_value = "0")]
        size: u32,

        #[arg(long, default_value = "")]
        meta: String,
    },

    /// Resolve a key range (hex bounds, inclusive)
    Resolve {
        #[arg(long)]
        begin: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// 0 = unlimited
        #[arg(long, default_value = "0")]
        max_keys: u32,

        #[arg(long)]
        reverse: bool,
    },
}

const CALLER: u64 = 1;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("(error) {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::builder().build();
    let link = TcpLink::new(&args.server, &config);
    let mut agent = Agent::new(&config, args.instance_id, link);
    agent.connect()?;
    pump_until(&mut agent, |agent| agent.generation() > 0)?;

    match args.command {
        Commands::Register => {
            println!("generation: {}", agent.generation());
            println!("decommit group: {:?}", agent.decommit_group_id());
            for kind in [ChannelKindId::System, ChannelKindId::Data, ChannelKindId::Log] {
                if let Some(entry) = agent.channel_kind(kind) {
                    let channels: Vec<String> = entry.channels().map(|c| c.to_string()).collect();
                    println!("{}: channels {}", kind, channels.join(","));
                }
            }
        }
        Commands::Allocate { kind, count } => {
            for _ in 0..count {
                let leased = lease(&mut agent, kind)?;
                println!("{} @ group {}", leased.seq_id, leased.group_id);
            }
        }
        Commands::Commit {
            kind,
            key,
            size,
            meta,
        } => {
            let leased = lease(&mut agent, kind)?;
            let locator = BlobLocator::new(leased.group_id, leased.seq_id, size);
            let key = match key {
                Some(hex) => parse_hex(&hex)?,
                None => locator.blob_id(args.tablet_id).to_bytes().to_vec(),
            };
            println!("key {}", to_hex(&key));
            let items = vec![CommitItem {
                key,
                locator,
                meta: meta.into_bytes(),
            }];
            for completion in request(&mut agent, AgentMessage::CommitBlobSeq { items })? {
                print_completion(&completion);
            }
        }
        Commands::Resolve {
            begin,
            end,
            max_keys,
            reverse,
        } => {
            let mut item = ResolveItem::range(
                begin.as_deref().map(parse_hex).transpose()?,
                end.as_deref().map(parse_hex).transpose()?,
            );
            item.max_keys = max_keys;
            item.reverse = reverse;
            for completion in request(&mut agent, AgentMessage::Resolve { items: vec![item] })? {
                print_completion(&completion);
            }
        }
    }
    Ok(())
}

/// Feed depot messages to the agent until `done` holds
fn pump_until<F>(agent: &mut Agent<TcpLink>, mut done: F) -> Result<()>
where
    F: FnMut(&mut Agent<TcpLink>) -> bool,
{
    while !done(agent) {
        match agent.link_mut().recv() {
            Ok(envelope) => agent.handle_response(envelope)?,
            Err(e) => {
                agent.on_disconnect();
                return Err(e);
            }
        }
    }
    Ok(())
}

fn lease(agent: &mut Agent<TcpLink>, kind: ChannelKindId) -> Result<blobdepot::agent::LeasedId> {
    loop {
        if let Some(leased) = agent.next_sequence_id(kind)? {
            return Ok(leased);
        }
        if agent.channel_kind(kind).is_none() {
            return Err(blobdepot::DepotError::Config(format!("depot has no {} channels", kind)));
        }
        let link = agent.link_mut();
        if !link.is_connected() {
            return Err(blobdepot::DepotError::Disconnected);
        }
        let envelope = link.recv()?;
        agent.handle_response(envelope)?;
    }
}

/// Issue one caller request and collect every completion up to the last page
fn request(agent: &mut Agent<TcpLink>, message: AgentMessage) -> Result<Vec<Completion>> {
    let request_id = agent.issue(message, CALLER)?;
    let mut collected = Vec::new();
    loop {
        let envelope = agent.link_mut().recv()?;
        agent.handle_response(envelope)?;
        for completion in agent.take_completions() {
            if completion.request_id != request_id {
                continue;
            }
            let last = !matches!(
                completion.outcome,
                Outcome::Response(DepotMessage::ResolveResult {
                    status: ResolveStatus::Overrun,
                    ..
                })
            );
            collected.push(completion);
            if last {
                return Ok(collected);
            }
        }
    }
}

fn print_completion(completion: &Completion) {
    match &completion.outcome {
        Outcome::Disconnected => println!("(disconnected)"),
        Outcome::Response(DepotMessage::CommitBlobSeqResult { items }) => {
            for (i, status) in items.iter().enumerate() {
                println!("item {}: {:?}", i, status);
            }
        }
        Outcome::Response(DepotMessage::ResolveResult {
            status,
            resolved_keys,
        }) => {
            for key in resolved_keys {
                println!("{}", to_hex(&key.key));
                for chain in &key.value_chain {
                    println!(
                        "  group {} blob {} [{}..{})",
                        chain.group_id, chain.blob_id, chain.subrange_begin, chain.subrange_end
                    );
                }
            }
            if let ResolveStatus::Error(reason) = status {
                println!("(error) {}", reason);
            }
        }
        Outcome::Response(other) => println!("{:?}", other),
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(blobdepot::DepotError::Config(format!("odd-length hex key {}", s)));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| blobdepot::DepotError::Config(format!("bad hex key {}: {}", s, e)))
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
