//! A board replica kept live by `SyncClient` over the websocket gateway.

use std::time::Duration;

use canvas::config::CanvasConfig;
use canvas::palette::{ColorIndex, Palette};
use canvas::replica::{BoardReplica, PaintEvent};
use canvas::sync::{BoardId, SyncClient, SyncStats, SyncStatus};
use tracing::{info, warn};

use crate::error::CliError;
use crate::gateway::WsGateway;

/// How often hosts should call [`LiveBoard::pump`].
pub const PUMP_INTERVAL: Duration = Duration::from_millis(20);
const ACTOR: &str = "cli";

pub struct LiveBoard {
    sync: SyncClient<WsGateway>,
    replica: BoardReplica,
    last_status: SyncStatus,
}

#[allow(clippy::cast_precision_loss)]
fn now() -> f64 {
    frames::now_ms() as f64
}

impl LiveBoard {
    /// Subscribe and request the first snapshot. Call inside a tokio runtime.
    #[must_use]
    pub fn connect(base_url: &str, board_id: BoardId) -> Self {
        let config = CanvasConfig::default();
        let replica = BoardReplica::new(config.board_width, config.board_height, Palette::default());
        let mut sync = SyncClient::new(WsGateway::new(base_url), board_id)
            .with_actor(ACTOR)
            .with_backoff(config.backoff());
        sync.connect(now());
        Self { sync, replica, last_status: SyncStatus::Idle }
    }

    /// Apply whatever the gateway delivered since the last call.
    pub fn pump(&mut self) -> usize {
        let handled = self.sync.pump(now(), &mut self.replica);
        let status = self.sync.status();
        if *status != self.last_status {
            match status {
                SyncStatus::Failed(e) => warn!(board = %self.sync.board_id(), error = %e, "sync failed"),
                other => info!(board = %self.sync.board_id(), status = ?other, "sync status changed"),
            }
            self.last_status = status.clone();
        }
        handled
    }

    /// Pump until the first snapshot is applied.
    ///
    /// # Errors
    ///
    /// [`CliError::Sync`] when the initial load fails, [`CliError::Timeout`]
    /// when it does not finish within `timeout`.
    pub async fn wait_live(&mut self, timeout: Duration) -> Result<(), CliError> {
        let wait = async {
            let mut ticker = tokio::time::interval(PUMP_INTERVAL);
            loop {
                ticker.tick().await;
                self.pump();
                match self.sync.status() {
                    SyncStatus::Live => return Ok(()),
                    SyncStatus::Failed(e) => return Err(CliError::Sync(e.clone())),
                    _ => {}
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CliError::Timeout("board snapshot"))?
    }

    /// Optimistic paint. `None` when the cell already held `color`.
    ///
    /// # Errors
    ///
    /// Store errors for cells off the board or colors off the palette.
    pub fn paint(&mut self, x: i64, y: i64, color: ColorIndex) -> Result<Option<PaintEvent>, CliError> {
        Ok(self.sync.paint(&mut self.replica, x, y, color, now())?)
    }

    #[must_use]
    pub fn replica(&self) -> &BoardReplica {
        &self.replica
    }

    #[must_use]
    pub fn online_peers(&self) -> usize {
        self.sync.online_peers()
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn close(&mut self) {
        self.sync.close();
    }
}
