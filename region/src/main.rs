use clap::Parser;
use log::{error, info, warn};
use protocol::messages::{self, SimulatorChat};
use region::{
    AgentCircuitData, AgentCircuitManager, Authorizer, OpenAuthorizer, PacketServer, RegionConfig, RegionServer,
    ThrottleCategory,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// IP address to bind to (overrides the config file)
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// UDP port to listen on (overrides the config file)
    #[clap(short, long)]
    port: Option<u16>,
    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Pre-authorised circuit as code:agent_uuid:session_uuid (repeatable)
    #[clap(long = "circuit")]
    circuits: Vec<String>,
    /// Accept any circuit code without authorisation
    #[clap(long)]
    open: bool,
}

/// Starts a region transport and relays local chat between circuits.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RegionConfig::load(path)?,
        None => RegionConfig::default(),
    };
    if let Some(host) = &args.host {
        config.bind.set_ip(host.parse()?);
    }
    if let Some(port) = args.port {
        config.bind.set_port(port);
    }

    let authorizer: Arc<dyn Authorizer> = if args.open {
        warn!("Accepting every circuit code");
        Arc::new(OpenAuthorizer)
    } else {
        let manager = AgentCircuitManager::new();
        for entry in &args.circuits {
            let data = parse_circuit(entry)?;
            info!("Expecting agent {} on circuit {}", data.agent_id, data.circuit_code);
            manager.add_new_circuit(data);
        }
        Arc::new(manager)
    };

    let server = RegionServer::bind(config, authorizer).await?;
    register_chat_relay(server.core());

    let mut events = server.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!("{:?}", event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = server.shutdown_handle();
    let mut run = tokio::spawn(server.run());

    tokio::select! {
        result = &mut run => match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Region stopped with error: {}", e),
            Err(e) => error!("Region task panicked: {}", e),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
            run.await??;
        }
    }

    event_log.abort();
    Ok(())
}

fn parse_circuit(entry: &str) -> Result<AgentCircuitData, Box<dyn Error>> {
    let mut parts = entry.split(':');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(code), Some(agent), Some(session), None) => Ok(AgentCircuitData::new(
            code.parse()?,
            agent.parse()?,
            session.parse()?,
        )),
        _ => Err(format!("expected code:agent:session, got {:?}", entry).into()),
    }
}

/// Echoes every ChatFromViewer to all circuits as ChatFromSimulator.
fn register_chat_relay(core: &Arc<PacketServer>) {
    let weak: Weak<PacketServer> = Arc::downgrade(core);
    core.handlers().register("ChatFromViewer", move |circuit, message| {
        let Some(server) = weak.upgrade() else {
            return;
        };
        let text = message
            .field("ChatData", "Message")
            .and_then(|v| v.as_text())
            .unwrap_or_default();
        let chat_type = message
            .field("ChatData", "Type")
            .and_then(|v| v.as_u8())
            .unwrap_or(1);

        let name = circuit.agent_id.to_string();
        let relayed = messages::chat_from_simulator(&SimulatorChat {
            from_name: &name,
            source: circuit.agent_id,
            owner: circuit.agent_id,
            source_type: 1,
            chat_type,
            position: [128.0, 128.0, 25.0],
            text: &text,
        });
        let reached = server.broadcast(&relayed, ThrottleCategory::Task, true);
        info!("Chat from circuit {} relayed to {} circuits", circuit.code, reached);
    });
}
