use std::sync::Arc;

use chrono::Utc;
use tokio::time;
use tracing::{debug, warn};

use crate::config::Config;
use crate::transport::SignalingTransport;

/// Best-effort housekeeping: on a fixed interval, drop signaling rows older
/// than the retention window from the backing store. Runs independently of
/// any session; failures are logged and swallowed.
pub async fn task<T: SignalingTransport>(transport: Arc<T>, config: Config) {
    let retention = chrono::Duration::milliseconds(config.retention.as_millis() as i64);
    let mut tick = time::interval(config.cleanup_interval);
    loop {
        tick.tick().await;
        let cutoff = Utc::now() - retention;
        match transport.purge_older_than(cutoff).await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "reaped stale signaling rows"),
            Err(e) => warn!(error = %e, "signaling cleanup failed"),
        }
    }
}
