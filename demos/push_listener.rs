// ABOUTME: Example demonstrating push-frame delivery alongside normal command replies
// ABOUTME: Subscribes to a channel and prints push frames as they arrive, independent of replies

use resp3_core::config::SessionOptions;
use resp3_core::session::Session;
use resp3_core::value::Arg;
use std::error::Error;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let host = std::env::var("RESP3_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port: u16 = std::env::var("RESP3_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    let channel = std::env::args().nth(1).unwrap_or_else(|| "demo".to_string());

    let options = SessionOptions::new().with_host(host).with_port(port);
    let (session, mut pushes) = Session::connect(options).await?;

    let listener = tokio::spawn(async move {
        while let Some(push) = pushes.recv().await {
            info!(value = ?push.value, "push frame received");
        }
    });

    session
        .send("SUBSCRIBE", vec![Arg::from(channel.as_str())])
        .await?;
    println!("subscribed to {channel}, waiting for push frames (ctrl-c to exit)");

    tokio::signal::ctrl_c().await?;
    session.close().await?;
    listener.abort();
    Ok(())
}
