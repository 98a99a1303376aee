// ABOUTME: Minimal example demonstrating the public send surface against a RESP3 server
// ABOUTME: Connects, issues PING and GET/SET, and prints the decoded replies

use resp3_core::config::SessionOptions;
use resp3_core::session::Session;
use resp3_core::value::Arg;
use std::error::Error;
use tracing::Level;
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

    let options = SessionOptions::new().with_host(host).with_port(port);
    let (session, mut pushes) = Session::connect(options).await?;

    // Push frames are unrelated to this demo's commands but must still be
    // drained so the channel doesn't pile up.
    tokio::spawn(async move { while pushes.recv().await.is_some() {} });

    let pong = session.send("PING", vec![Arg::from("hello")]).await?;
    println!("PING -> {pong:?}");

    session
        .send(
            "SET",
            vec![Arg::from("resp3-core:demo"), Arg::from("it works")],
        )
        .await?;
    let value = session.send("GET", vec![Arg::from("resp3-core:demo")]).await?;
    println!("GET -> {value:?}");

    session.close().await?;
    Ok(())
}
