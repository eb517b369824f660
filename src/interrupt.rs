//! Interrupt handling
//!
//! Ctrl-C cancels a [`CancellationToken`]. Workers finish the height they
//! are on and stop claiming new ones; the sink then flushes what it can.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first Ctrl-C. The task also ends quietly if the
/// token is cancelled some other way.
pub fn install_ctrl_c_handler(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    eprintln!("\nInterrupt received: finishing in-flight blocks and flushing results...");
                    info!("Interrupt received, cancelling audit");
                    token.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            },
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_exits_when_token_cancelled() {
        let token = CancellationToken::new();
        let handle = install_ctrl_c_handler(token.clone());
        token.cancel();
        handle.await.unwrap();
    }
}
