//! Connects to a notebook session channel and logs its lifecycle.
//!
//! Answers every `exec` request with an input reply to show the outbound path.
//!
//! ```sh
//! RUST_LOG=info,notebook_session_client=debug \
//!     cargo run --example session -- http://localhost:8888 <session-id> [username]
//! ```

use std::sync::Arc;

use futures::StreamExt as _;
use notebook_session_client::ConnectionManager;
use notebook_session_client::events::{BroadcastNotifier, Event};
use notebook_session_client::protocol::SessionIdentity;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let master_url = args
        .next()
        .unwrap_or_else(|| "http://localhost:8888".to_owned());
    let session_id = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: session <master-url> <session-id> [username]"))?;
    let username = args.next().unwrap_or_default();

    let bus = Arc::new(BroadcastNotifier::default());
    let mut notifications = Box::pin(bus.stream());

    let connection = ConnectionManager::builder()
        .identity(SessionIdentity::new(&master_url, session_id, username)?)
        .notifier(bus)
        .build()?;
    info!(endpoint = %connection.endpoint(), "Starting channel");
    connection.start_channel()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping channel");
                connection.stop_channel();
                break;
            }
            notification = notifications.next() => {
                let Some(notification) = notification else {
                    break;
                };
                info!(event = %notification.name(), session = %notification.remote.session_id);

                match notification.event {
                    Event::Exec { exec } => {
                        info!(%exec, "Execution requested");
                        if let Err(e) = connection.send_input_reply(exec.to_string()) {
                            warn!(error = %e, "Unable to answer");
                        }
                    }
                    Event::ConnectionFailed { master_url, attempt } => {
                        warn!(%master_url, attempt, "Connection failed");
                    }
                    Event::ConnectionDead { reconnect_attempt } => {
                        warn!(reconnect_attempt, "Giving up");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
