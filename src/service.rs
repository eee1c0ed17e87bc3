use std::sync::Arc;

use tracing::info;

use crate::availability::AvailabilityResolver;
use crate::booking::{BookingOrchestrator, MailAddresses};
use crate::catalog::RoomCatalog;
use crate::config::Config;
use crate::error::BookingError;
use crate::ledger::ReservationLedger;
use crate::mail::MailQueue;
use crate::store::BookingStore;

/// The booking core wired over one store. Cheap to clone; every clone
/// shares the same store and mail queue.
#[derive(Clone)]
pub struct Bookings {
    pub catalog: RoomCatalog,
    pub availability: AvailabilityResolver,
    pub reservations: ReservationLedger,
    pub orchestrator: BookingOrchestrator,
}

impl Bookings {
    pub fn new(store: Arc<dyn BookingStore>, config: &Config, mail: MailQueue) -> Self {
        let timeout = config.op_timeout;
        Self {
            catalog: RoomCatalog::new(store.clone(), timeout),
            availability: AvailabilityResolver::new(store.clone(), timeout),
            reservations: ReservationLedger::new(store.clone(), timeout),
            orchestrator: BookingOrchestrator::new(
                store,
                timeout,
                mail,
                MailAddresses {
                    from: config.mail_from.clone(),
                    owner: config.owner_email.clone(),
                },
            ),
        }
    }

    /// Create `names` as rooms if the catalog is empty. Returns how many
    /// rooms were added.
    pub async fn seed_rooms(&self, names: &[String]) -> Result<usize, BookingError> {
        if !self.catalog.list().await?.is_empty() {
            return Ok(0);
        }
        for name in names {
            self.catalog.add(name).await?;
        }
        info!(rooms = names.len(), "seeded room catalog");
        Ok(names.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn seeding_runs_once() {
        let (mail, _rx) = MailQueue::new(8);
        let config = Config::default();
        let bookings = Bookings::new(Arc::new(MemoryStore::new()), &config, mail);

        assert_eq!(bookings.seed_rooms(&config.seed_rooms).await.unwrap(), 2);
        assert_eq!(bookings.seed_rooms(&config.seed_rooms).await.unwrap(), 0);
        let names: Vec<_> = bookings
            .catalog
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["General's Quarters", "Major's Suite"]);
    }

    #[tokio::test]
    async fn components_share_one_store() {
        let (mail, _rx) = MailQueue::new(8);
        let config = Config::default();
        let bookings = Bookings::new(Arc::new(MemoryStore::new()), &config, mail);
        bookings.seed_rooms(&config.seed_rooms).await.unwrap();
        let room = bookings.catalog.list().await.unwrap()[0].clone();

        let id = bookings
            .orchestrator
            .book_room(submission(room.id, "2022-06-20", "2022-06-22"))
            .await
            .unwrap();
        assert!(
            !bookings
                .availability
                .is_room_available(room.id, date("2022-06-21"), date("2022-06-22"))
                .await
                .unwrap()
        );
        assert_eq!(bookings.reservations.get_by_id(id).await.unwrap().room_name, room.name);
        assert_eq!(bookings.reservations.list_unprocessed().await.unwrap().len(), 1);
    }
}
