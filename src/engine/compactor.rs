use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::model::Event;
use crate::store::StoreError;
use crate::wal::Frame;

use super::{Engine, WalCommand};

impl Engine {
    /// Rewrite the WAL as the minimal set of frames that recreates the
    /// current state: a leading frame with the id sequences, then one frame
    /// per room holding the room, its reservations and then its restrictions.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        // Holding the catalog lock and a read lock on every room means no
        // commit is in flight while the snapshot is taken and swapped in.
        let _catalog = self.catalog_lock.write().await;
        let states = self.tables.room_states();
        let mut guards = Vec::with_capacity(states.len());
        for rs in &states {
            guards.push(rs.read().await);
        }

        let mut frames: Vec<Frame> = vec![vec![self.tables.ids.snapshot()]];
        frames.extend(guards.iter().map(|guard| {
            let mut frame = vec![Event::RoomCreated {
                room: guard.room.clone(),
            }];
            frame.extend(guard.reservations.values().map(|r| Event::ReservationInserted {
                reservation: r.clone(),
            }));
            frame.extend(guard.restrictions.iter().map(|r| Event::RestrictionInserted {
                restriction: r.clone(),
            }));
            frame
        }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { frames, response: tx })
            .await
            .map_err(|_| StoreError::WriterGone)?;
        rx.await
            .map_err(|_| StoreError::WriterGone)?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Background task that compacts the WAL once enough frames have piled up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => warn!(error = %e, "WAL compaction failed"),
        }
    }
}
