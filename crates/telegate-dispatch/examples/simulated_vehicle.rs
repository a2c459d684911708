use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use telegate_core::config::{
    Settings, CLIENT_ENDPOINTS, MOVE_REQUEST_CMD, NET_CHANNEL_TYPE, SERVER_HOST, SERVER_PORT,
};
use telegate_dispatch::{ActionCapability, ActionHandler, GatewayContext, MovementCommand};
use telegate_transport::Protocol;

/// Battery charger mounted on vehicle V1
#[derive(Debug)]
struct Charger;

#[async_trait]
impl ActionHandler for Charger {
    async fn handle(&self, protocol: Protocol) -> telegate_dispatch::Result<()> {
        let level = protocol.field("level").and_then(|v| v.as_integer());
        info!("Charger on [{}] reports level {:?}", protocol.device_id(), level);
        Ok(())
    }
}

impl ActionCapability for Charger {
    fn device_id(&self) -> &str {
        "A001"
    }

    fn vehicle_id(&self) -> &str {
        "V1"
    }

    fn action_key(&self) -> &str {
        "charge"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Gateway listening on an ephemeral loopback port
    let settings = Settings::from_pairs(&[
        (NET_CHANNEL_TYPE, "TCP"),
        (SERVER_HOST, "127.0.0.1"),
        (SERVER_PORT, "0"),
        (CLIENT_ENDPOINTS, "A001=127.0.0.1:4001"),
        (MOVE_REQUEST_CMD, "move"),
    ])?;
    let context = GatewayContext::from_settings(settings)?;
    context.register_action(Arc::new(Charger))?;

    let mut transport = context.start_transport().await?;
    let addr = transport
        .local_addr()
        .ok_or("transport did not report a listen address")?;
    info!("Gateway listening on {}", addr);

    // The vehicle side: connect, report, acknowledge whatever arrives
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let vehicle = tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        write_half
            .write_all(b"{\"deviceId\":\"A001\",\"cmdKey\":\"charge\",\"payload\":{\"level\":87}}\n")
            .await?;

        while let Some(line) = lines.next_line().await? {
            let command: serde_json::Value = serde_json::from_str(&line)?;
            info!("Vehicle received {}", command);
            let ack = serde_json::json!({
                "deviceId": "A001",
                "cmdKey": "charge",
                "correlationId": command["correlationId"],
            });
            write_half.write_all(format!("{}\n", ack).as_bytes()).await?;
        }
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
    });

    // Wait for the report so the vehicle's channel is known
    tokio::time::sleep(Duration::from_millis(200)).await;

    let request = context.move_request(
        "A001",
        vec![
            MovementCommand::new(Some("P1"), "P2", "P3"),
            MovementCommand::new(Some("P2"), "P3", "P3").with_operation("charge"),
        ],
    )?;
    let handle = context.send_request("A001", &request)?;
    info!("Move command {} sent", handle.correlation_id());
    let outcome = handle.outcome().await;
    if outcome.is_acknowledged() {
        info!("Vehicle acknowledged: {:?}", outcome);
    } else {
        warn!("Vehicle never acknowledged: {:?}", outcome);
    }

    // Station action on the same vehicle, built from its registered route
    let charge = context.action_request("charge")?.with_param("level", 100i64);
    let handle = context.send_request("A001", &charge)?;
    info!("Charge outcome: {:?}", handle.outcome().await);

    transport.shutdown();
    context.reset();
    vehicle.abort();
    Ok(())
}
