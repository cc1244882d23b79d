use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;
use viewer::ViewerConnection;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Region address to connect to
    #[arg(short = 'r', long, default_value = "127.0.0.1:9000")]
    region: SocketAddr,

    /// Circuit code handed out at login (random if omitted)
    #[arg(short = 'c', long)]
    code: Option<u32>,

    /// Agent id (random if omitted)
    #[arg(long)]
    agent: Option<Uuid>,

    /// Session id (random if omitted)
    #[arg(long)]
    session: Option<Uuid>,

    /// Chat lines to send once connected
    #[arg(short = 'm', long = "message")]
    messages: Vec<String>,

    /// Number of pings to send
    #[arg(short = 'p', long, default_value = "3")]
    pings: u32,

    /// Seconds to listen for region traffic before logging out
    #[arg(short = 'l', long, default_value = "5")]
    linger: u64,
}

fn random_uuid() -> Uuid {
    uuid::Builder::from_random_bytes(rand::random()).into_uuid()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let code = args.code.unwrap_or_else(rand::random);
    let agent = args.agent.unwrap_or_else(random_uuid);
    let session = args.session.unwrap_or_else(random_uuid);

    info!("Connecting to {} with circuit {}", args.region, code);
    info!("Agent {} session {}", agent, session);

    let mut viewer = ViewerConnection::connect(args.region, code, agent, session).await?;
    viewer.use_circuit_code(Duration::from_secs(5)).await?;

    for _ in 0..args.pings {
        match viewer.ping(Duration::from_secs(2)).await {
            Ok(rtt) => info!("Ping: {:.1} ms", rtt.as_secs_f64() * 1000.0),
            Err(e) => warn!("Ping failed: {}", e),
        }
    }

    for text in &args.messages {
        viewer.chat(text).await?;
    }

    let deadline = Instant::now() + Duration::from_secs(args.linger);
    while Instant::now() < deadline {
        match viewer.recv(Duration::from_millis(500)).await? {
            Some(packet) => info!("{} seq {}", packet.name(), packet.sequence),
            None => {
                viewer.flush_acks().await?;
                viewer.resend_overdue(Duration::from_millis(protocol::RESEND_TIMEOUT_MS)).await?;
            }
        }
    }

    viewer.logout(Duration::from_secs(5)).await?;
    Ok(())
}
