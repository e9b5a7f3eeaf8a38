//! Minimal alerta-client usage: identify into a neighborhood, print
//! everything the room receives, send one notice.
//!
//! Run against a local alertad:
//!   cargo run --example basic -- ws://localhost:3000 42 7

use std::time::Duration;

use alerta_client::{AlertaClient, AlertaConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let mut args = std::env::args().skip(1);
    let server = args.next().unwrap_or_else(|| "ws://localhost:3000".into());
    let user = args.next().unwrap_or_else(|| "42".into());
    let vecindario = args.next().unwrap_or_else(|| "7".into());

    let client = AlertaClient::connect(AlertaConfig::new(server, user, vecindario.clone()));

    let _alarms = client.on_new_alarm(|alarm| {
        println!(
            "🚨 {} — {} (por {})",
            alarm.alarma.as_ref().map(|a| a.tipo.as_str()).unwrap_or("?"),
            alarm.mensaje,
            alarm.emisor
        );
    });
    let _notices = client.on_notification(|n| {
        println!("📢 [{}] {} (por {})", n.tipo, n.mensaje, n.emisor);
    });

    // Wait for the identify handshake before talking.
    tokio::time::sleep(Duration::from_secs(1)).await;

    client
        .send_notification(vecindario, "hola vecinos", None, Some("ejemplo".into()))
        .await
        .expect("send failed");

    // Keep listening until interrupted.
    tokio::signal::ctrl_c().await.expect("signal handler");
    client.shutdown().await;
}
