//! Standalone callback server with a demo echo handler, mainly for smoke
//! testing against an orchestrator.

use clap::Parser;
use tether::{CallbackServer, OutboundClient};
use tether_proto::{InvokeRequest, InvokeResponse};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tetherd", about = "Tether app callback server")]
struct Cli {
    /// Listen address for inbound callback calls.
    #[arg(long, default_value = "127.0.0.1:50052")]
    addr: String,
    /// Dial out to an orchestrator at this address instead of listening.
    #[arg(long)]
    orchestrator: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info")),
        )
        .init();

    let cli = Cli::parse();
    let server = match cli.orchestrator {
        Some(addr) => {
            let client = OutboundClient::connect(&addr).await?;
            CallbackServer::from_outbound(client).await?
        }
        None => CallbackServer::from_address(&cli.addr).await?,
    };

    server.add_invocation_handler("echo", |request: InvokeRequest| async move {
        Ok::<_, tonic::Status>(InvokeResponse {
            data: request.data,
            content_type: request.content_type,
        })
    });

    server.start().await?;
    Ok(())
}
