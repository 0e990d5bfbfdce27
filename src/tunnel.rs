//! Reverse-tunnel contract and liveness observation.
//!
//! The tunnel itself (a user-local reverse proxy that lets backend probes
//! reach private endpoints) lives outside this crate. The polling engine
//! only needs to know whether it is still alive: `keep_alive` settling in
//! *either* direction means it is not, and every result still pending at
//! that point is synthesised as a tunnel failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::warn;

/// A live reverse tunnel.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Resolves on graceful close and errors on failure. Both outcomes mean
    /// the tunnel is gone.
    async fn keep_alive(&self) -> anyhow::Result<()>;
}

/// Spawns a watcher on the tunnel's `keep_alive` and returns the liveness
/// flag it feeds.
///
/// The flag starts out `true` and flips to `false` exactly once; it never
/// goes back up.
pub fn watch_liveness(tunnel: Arc<dyn Tunnel>) -> Arc<AtomicBool> {
    let connected = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&connected);
    tokio::spawn(async move {
        if let Err(error) = tunnel.keep_alive().await {
            warn!("tunnel keep-alive failed: {error:#}");
        }
        flag.store(false, Ordering::SeqCst);
    });
    connected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::sync::oneshot;

    struct ScriptedTunnel {
        outcome: Mutex<Option<oneshot::Receiver<anyhow::Result<()>>>>,
    }

    #[async_trait]
    impl Tunnel for ScriptedTunnel {
        async fn keep_alive(&self) -> anyhow::Result<()> {
            let rx = self.outcome.lock().await.take().expect("keep_alive polled twice");
            rx.await.expect("tunnel script dropped")
        }
    }

    fn scripted() -> (Arc<ScriptedTunnel>, oneshot::Sender<anyhow::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        let tunnel = Arc::new(ScriptedTunnel {
            outcome: Mutex::new(Some(rx)),
        });
        (tunnel, tx)
    }

    async fn wait_for_drop(flag: &AtomicBool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while flag.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("liveness flag never dropped");
    }

    #[tokio::test]
    async fn graceful_close_flips_the_flag() {
        let (tunnel, tx) = scripted();
        let connected = watch_liveness(tunnel);
        assert!(connected.load(Ordering::SeqCst));

        tx.send(Ok(())).unwrap();
        wait_for_drop(&connected).await;
    }

    #[tokio::test]
    async fn failure_flips_the_flag_too() {
        let (tunnel, tx) = scripted();
        let connected = watch_liveness(tunnel);

        tx.send(Err(anyhow::anyhow!("connection reset"))).unwrap();
        wait_for_drop(&connected).await;
    }
}
