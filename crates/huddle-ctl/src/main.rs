//! huddle-ctl — run and poke a rendezvous endpoint from the command line.

use anyhow::{Context, Result};

use huddle_core::config::HuddleConfig;
use huddle_ipc::{ChannelEvent, IpcChannel, IpcServer, PeerStatus, ServerEvent};

// ── Subcommand handlers ───────────────────────────────────────────────────────

/// Run the coordinator and join it with an in-process peer, so this
/// instance shows up in the directory like any other.
async fn cmd_serve(config: HuddleConfig, identity: String) -> Result<()> {
    let (server, mut server_events) = IpcServer::bind(&config)
        .await
        .context("failed to start endpoint")?;
    println!("endpoint listening at {}", server.endpoint_path().display());

    let (channel, mut events) = IpcChannel::connect(&config, &identity)
        .await
        .context("failed to join own endpoint")?;
    println!("serving as '{}' — ctrl-c to stop", channel.identity());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = server_events.recv() => match event {
                Some(ServerEvent::DirectoryChanged(ids)) => println!("directory: {}", ids.join(", ")),
                Some(ServerEvent::Message(msg)) => {
                    println!("[{}] {} {}", msg.sender_id, msg.method.as_str(), msg.args.join(" "));
                }
                None => break,
            },
            event = events.recv() => {
                if !print_channel_event(event) {
                    break;
                }
            }
        }
    }

    channel.close().await;
    server.shutdown().await;
    Ok(())
}

async fn cmd_join(config: HuddleConfig, identity: String) -> Result<()> {
    let (channel, mut events) = IpcChannel::connect(&config, &identity)
        .await
        .context("failed to join endpoint — is an instance serving?")?;
    println!("joined as '{}' — ctrl-c to leave", channel.identity());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                if !print_channel_event(event) {
                    break;
                }
            }
        }
    }

    channel.close().await;
    Ok(())
}

async fn cmd_send(
    config: HuddleConfig,
    identity: String,
    method: &str,
    args: Vec<String>,
) -> Result<()> {
    let (channel, _events) = IpcChannel::connect(&config, &identity)
        .await
        .context("failed to join endpoint — is an instance serving?")?;
    channel
        .broadcast(method, args)
        .await
        .context("broadcast failed")?;
    println!("sent '{}' to all peers", method);
    channel.close().await;
    Ok(())
}

async fn cmd_peers(config: HuddleConfig) -> Result<()> {
    let (channel, mut events) = IpcChannel::connect(&config, "huddle-ctl")
        .await
        .context("failed to join endpoint — is an instance serving?")?;

    // The coordinator pushes a directory right after the handshake.
    let wait = std::time::Duration::from_secs(3);
    let ids = tokio::time::timeout(wait, async {
        while let Some(event) = events.recv().await {
            if let ChannelEvent::Directory(ids) = event {
                return Some(ids);
            }
        }
        None
    })
    .await
    .context("no directory received")?
    .context("channel closed before a directory arrived")?;

    println!("connected instances ({}):", ids.len());
    for id in &ids {
        if id.as_str() == "huddle-ctl" {
            continue;
        }
        println!("  {}", if id.is_empty() { "(unidentified)" } else { id });
    }

    channel.close().await;
    Ok(())
}

/// Returns false once the channel is finished.
fn print_channel_event(event: Option<ChannelEvent>) -> bool {
    match event {
        Some(ChannelEvent::Peer { id, status }) => {
            let verb = match status {
                PeerStatus::Connected => "joined",
                PeerStatus::Disconnected => "left",
            };
            println!("peer '{}' {}", id, verb);
            true
        }
        Some(ChannelEvent::Directory(ids)) => {
            println!("directory: {}", ids.join(", "));
            true
        }
        Some(ChannelEvent::Message(msg)) => {
            println!("[{}] {} {}", msg.sender_id, msg.method.as_str(), msg.args.join(" "));
            true
        }
        Some(ChannelEvent::Closed) => {
            println!("connection closed");
            false
        }
        None => false,
    }
}

fn print_usage() {
    println!("Usage: huddle-ctl [--name <endpoint>] [--id <identity>] <command>");
    println!();
    println!("Commands:");
    println!("  serve                   Run the coordinator and join it");
    println!("  join                    Join a running endpoint and print events");
    println!("  send <method> [args..]  Broadcast one message and exit");
    println!("  peers                   Print the current directory and exit");
    println!();
    println!("Options:");
    println!("  --name <endpoint>   Rendezvous name (default: from config)");
    println!("  --id <identity>     Identity to announce (default: instance-<pid>)");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = HuddleConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = HuddleConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HuddleConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --name / --id options
    let mut identity: Option<String> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                i += 1;
                config.endpoint.name = args.get(i).context("--name requires a value")?.clone();
            }
            "--id" => {
                i += 1;
                identity = Some(args.get(i).context("--id requires a value")?.clone());
            }
            other => remaining.push(other),
        }
        i += 1;
    }
    let identity = identity.unwrap_or_else(|| format!("instance-{}", std::process::id()));

    match remaining.as_slice() {
        ["serve"] => cmd_serve(config, identity).await,
        ["join"] => cmd_join(config, identity).await,
        ["send", method, rest @ ..] => {
            let args = rest.iter().map(|s| s.to_string()).collect();
            cmd_send(config, identity, method, args).await
        }
        ["peers"] => cmd_peers(config).await,
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
