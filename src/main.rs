use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use didwire::agent::Agent;
use didwire::basicmessage::{self, BasicMessageModule};
use didwire::connection;
use didwire::handshake::{ConnectionsModule, Invitee, Inviter};
use transport::{serve_inbound, HttpTransport};
use wallet::WalletDirectory;

#[derive(Parser)]
#[command(about = "Decentralized identity messaging agent")]
struct Args {
    /// Human-readable label presented to peers
    #[arg(long, default_value = "didwire-agent")]
    label: String,

    /// Hostname peers use to reach this agent
    #[arg(long, default_value = "localhost")]
    hostname: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Wallet name
    #[arg(long, default_value = "agent")]
    wallet: String,

    #[arg(long, default_value = "")]
    passphrase: String,

    /// Start from a fresh wallet every run
    #[arg(long)]
    ephemeral: bool,

    /// Accept this invite URL as the invitee instead of issuing an invite
    #[arg(long)]
    invite: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let directory = WalletDirectory::new();
    let transport = Arc::new(HttpTransport::new());
    let mut agent = Agent::new(&args.hostname, args.port, directory, transport.clone());
    agent
        .connect_wallet(&args.wallet, &args.passphrase, args.ephemeral)
        .await?;
    let wallet = agent.wallet()?;

    let (content_tx, mut content_rx) = mpsc::unbounded_channel();
    agent.register_module(
        basicmessage::FAMILY,
        Arc::new(BasicMessageModule::new(content_tx)?),
    )?;

    // Bind the inbound listener before the handshake so the peer's reply
    // has somewhere to land.
    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let _listener = serve_inbound(addr, agent.inbound_sender());

    let endpoint = agent.endpoint().to_string();
    let connections = match &args.invite {
        Some(invite_url) => {
            let mut invitee =
                Invitee::new(wallet.clone(), transport.clone(), &args.label, &endpoint);
            invitee.accept_invite(invite_url)?;
            invitee.send_request().await?;
            invitee.start_listening()?;
            info!("Connection request sent, awaiting response");
            ConnectionsModule::new(None, Some(Arc::new(Mutex::new(invitee))))?
        }
        None => {
            let mut inviter =
                Inviter::new(wallet.clone(), transport.clone(), &args.label, &endpoint);
            let invite_url = inviter.issue_invite().await?;
            println!("Invite: {invite_url}");
            inviter.start_listening()?;
            ConnectionsModule::new(Some(Arc::new(Mutex::new(inviter))), None)?
        }
    };
    agent.register_module(connection::FAMILY, Arc::new(connections))?;

    tokio::spawn(async move {
        while let Some(content) = content_rx.recv().await {
            println!("Message: {content}");
        }
    });

    agent.start().await?;
    Ok(())
}
