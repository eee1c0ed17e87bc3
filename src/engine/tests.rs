use super::*;
use crate::model::fixtures::*;
use crate::store::{BookingStore, ReservationFilter, RoomTxn};
use std::time::Duration;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("bookings_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(path.with_extension("wal.tmp"));
    path
}

fn reservation_draft(room_id: RoomId, start: &str, end: &str) -> NewReservation {
    NewReservation {
        guest: guest("Asdan"),
        stay: stay(start, end),
        room_id,
    }
}

fn linked(room_id: RoomId, reservation_id: ReservationId, start: &str, end: &str) -> NewRestriction {
    NewRestriction {
        stay: stay(start, end),
        room_id,
        reservation_id: Some(reservation_id),
        kind: RestrictionKind::Reservation,
    }
}

/// Reservation plus linked restriction in one committed transaction.
async fn book(engine: &Engine, room_id: RoomId, start: &str, end: &str) -> ReservationId {
    let mut txn = engine.begin(room_id).await.unwrap().unwrap();
    let id = txn.insert_reservation(reservation_draft(room_id, start, end)).unwrap();
    txn.insert_restriction(linked(room_id, id, start, end)).unwrap();
    txn.commit().await.unwrap();
    id
}

#[tokio::test]
async fn engine_create_room_and_book() {
    let path = test_wal_path("create_and_book.wal");
    let engine = Engine::open(path).unwrap();

    let room = engine.insert_room("General's Quarters".into()).await.unwrap();
    assert_eq!(engine.get_room(room.id).await.unwrap().unwrap().name, "General's Quarters");

    let id = book(&engine, room.id, "2022-06-20", "2022-06-22").await;
    let listing = engine.get_reservation(id).await.unwrap().unwrap();
    assert_eq!(listing.room_name, "General's Quarters");
    assert_eq!(engine.reservation_room(id).await.unwrap(), Some(room.id));

    let hits = engine
        .overlapping_restrictions(room.id, &stay("2022-06-21", "2022-06-23"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].reservation_id, Some(id));
    assert!(
        engine
            .overlapping_restrictions(room.id, &stay("2022-06-22", "2022-06-23"))
            .await
            .unwrap()
            .unwrap()
            .is_empty()
    );
    assert!(engine.overlapping_restrictions(99, &stay("2022-06-22", "2022-06-23")).await.unwrap().is_none());
}

#[tokio::test]
async fn dropped_transaction_leaves_no_trace() {
    let path = test_wal_path("rollback.wal");
    {
        let engine = Engine::open(path.clone()).unwrap();
        let room = engine.insert_room("General's Quarters".into()).await.unwrap();
        {
            let mut txn = engine.begin(room.id).await.unwrap().unwrap();
            let id = txn
                .insert_reservation(reservation_draft(room.id, "2022-06-20", "2022-06-22"))
                .unwrap();
            txn.insert_restriction(linked(room.id, id, "2022-06-20", "2022-06-22"))
                .unwrap();
        }
        assert!(engine.list_reservations(ReservationFilter::All).await.unwrap().is_empty());
        assert!(engine.blocked_rooms(&stay("2022-06-01", "2022-07-01")).await.unwrap().is_empty());
    }

    let engine = Engine::open(path).unwrap();
    assert_eq!(engine.list_rooms().await.unwrap().len(), 1);
    assert!(engine.list_reservations(ReservationFilter::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn replay_restores_state_and_sequences() {
    let path = test_wal_path("replay.wal");
    let (room_id, kept, deleted) = {
        let engine = Engine::open(path.clone()).unwrap();
        let room = engine.insert_room("General's Quarters".into()).await.unwrap();
        let kept = book(&engine, room.id, "2022-06-20", "2022-06-22").await;
        let deleted = book(&engine, room.id, "2022-07-01", "2022-07-03").await;

        let mut txn = engine.begin(room.id).await.unwrap().unwrap();
        assert!(txn.set_processed(kept, true).unwrap());
        let mut details = guest("Asdan");
        details.phone = "555-0100".into();
        assert!(txn.update_guest(kept, details).unwrap());
        assert!(txn.delete_reservation(deleted).unwrap());
        txn.commit().await.unwrap();
        (room.id, kept, deleted)
    };

    let engine = Engine::open(path).unwrap();
    let listing = engine.get_reservation(kept).await.unwrap().unwrap();
    assert!(listing.reservation.processed);
    assert_eq!(listing.reservation.guest.phone, "555-0100");
    assert!(engine.get_reservation(deleted).await.unwrap().is_none());

    let restrictions = engine
        .overlapping_restrictions(room_id, &stay("2022-01-01", "2023-01-01"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restrictions.len(), 1);

    let next = book(&engine, room_id, "2022-08-01", "2022-08-02").await;
    assert!(next > deleted);
    let room = engine.insert_room("Major's Suite".into()).await.unwrap();
    assert!(room.id > room_id);
}

#[tokio::test]
async fn delete_cascades_and_clears_indexes() {
    let path = test_wal_path("cascade.wal");
    let engine = Engine::open(path).unwrap();
    let room = engine.insert_room("General's Quarters".into()).await.unwrap();
    let id = book(&engine, room.id, "2022-06-20", "2022-06-22").await;
    let restriction_id = engine
        .overlapping_restrictions(room.id, &stay("2022-06-20", "2022-06-22"))
        .await
        .unwrap()
        .unwrap()[0]
        .id;
    assert_eq!(engine.restriction_room(restriction_id).await.unwrap(), Some(room.id));

    let mut txn = engine.begin(room.id).await.unwrap().unwrap();
    assert!(txn.delete_reservation(id).unwrap());
    txn.commit().await.unwrap();

    assert_eq!(engine.reservation_room(id).await.unwrap(), None);
    assert_eq!(engine.restriction_room(restriction_id).await.unwrap(), None);
    assert!(engine.get_restriction(restriction_id).await.unwrap().is_none());
    assert!(engine.blocked_rooms(&stay("2022-06-20", "2022-06-22")).await.unwrap().is_empty());
}

#[tokio::test]
async fn exclusion_backstop_rejects_overlap() {
    let path = test_wal_path("exclusion.wal");
    let engine = Engine::open(path).unwrap();
    let room = engine.insert_room("General's Quarters".into()).await.unwrap();
    book(&engine, room.id, "2022-06-20", "2022-06-22").await;

    let mut txn = engine.begin(room.id).await.unwrap().unwrap();
    let err = txn
        .insert_restriction(NewRestriction {
            stay: stay("2022-06-21", "2022-06-25"),
            room_id: room.id,
            reservation_id: None,
            kind: RestrictionKind::OwnerBlock,
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Exclusion { room_id, .. } if room_id == room.id));

    let other = engine.insert_room("Major's Suite".into()).await.unwrap();
    let err = txn
        .insert_reservation(reservation_draft(other.id, "2022-06-21", "2022-06-25"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transactions_on_one_room_serialize() {
    let path = test_wal_path("serialize.wal");
    let engine = Arc::new(Engine::open(path).unwrap());
    let room_id = engine.insert_room("General's Quarters".into()).await.unwrap().id;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let query = stay("2022-06-20", "2022-06-22");
                let mut txn = engine.begin(room_id).await.unwrap().unwrap();
                if !txn.overlapping(&query).is_empty() {
                    return false;
                }
                tokio::task::yield_now().await;
                let id = txn
                    .insert_reservation(reservation_draft(room_id, "2022-06-20", "2022-06-22"))
                    .unwrap();
                txn.insert_restriction(linked(room_id, id, "2022-06-20", "2022-06-22"))
                    .unwrap();
                txn.commit().await.unwrap();
                true
            })
        })
        .collect();

    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(engine.list_reservations(ReservationFilter::All).await.unwrap().len(), 1);
}

#[tokio::test]
async fn commit_finishes_after_caller_gives_up() {
    let path = test_wal_path("abandoned_commit.wal");
    let engine = Engine::open(path.clone()).unwrap();
    let room = engine.insert_room("General's Quarters".into()).await.unwrap();

    let mut txn = engine.begin(room.id).await.unwrap().unwrap();
    let id = txn
        .insert_reservation(reservation_draft(room.id, "2022-06-20", "2022-06-22"))
        .unwrap();
    txn.insert_restriction(linked(room.id, id, "2022-06-20", "2022-06-22"))
        .unwrap();
    let _ = tokio::time::timeout(Duration::from_nanos(1), txn.commit()).await;

    // Taking the room lock waits for the commit task to finish.
    drop(engine.begin(room.id).await.unwrap());
    assert!(engine.get_reservation(id).await.unwrap().is_some());
    drop(engine);
    let engine = Engine::open(path).unwrap();
    assert!(engine.get_reservation(id).await.unwrap().is_some());
}

#[tokio::test]
async fn compaction_shrinks_wal_and_preserves_state() {
    let path = test_wal_path("compact.wal");
    let room_id = {
        let engine = Engine::open(path.clone()).unwrap();
        let room = engine.insert_room("General's Quarters".into()).await.unwrap();
        engine.insert_room("Major's Suite".into()).await.unwrap();
        let id = book(&engine, room.id, "2022-06-20", "2022-06-22").await;
        for i in 0..20 {
            let mut txn = engine.begin(room.id).await.unwrap().unwrap();
            txn.set_processed(id, i % 2 == 0).unwrap();
            txn.commit().await.unwrap();
        }
        for day in 1..10 {
            let start = format!("2022-09-{day:02}");
            let end = format!("2022-09-{:02}", day + 1);
            let rid = book(&engine, room.id, &start, &end).await;
            let mut txn = engine.begin(room.id).await.unwrap().unwrap();
            txn.delete_reservation(rid).unwrap();
            txn.commit().await.unwrap();
        }
        assert!(engine.wal_appends_since_compact().await > 0);

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compaction should shrink WAL: {before} -> {after}");
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        book(&engine, room.id, "2022-10-01", "2022-10-03").await;
        room.id
    };

    let engine = Engine::open(path).unwrap();
    assert_eq!(engine.list_rooms().await.unwrap().len(), 2);
    let all = engine.list_reservations(ReservationFilter::All).await.unwrap();
    assert_eq!(all.len(), 2);
    let blocked = engine
        .blocked_rooms(&stay("2022-06-21", "2022-06-22"))
        .await
        .unwrap();
    assert!(blocked.contains(&room_id));
    assert!(
        engine
            .blocked_rooms(&stay("2022-09-01", "2022-09-10"))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn compaction_keeps_ids_of_deleted_rows_retired() {
    let path = test_wal_path("compact_ids.wal");
    let (room_id, deleted, removed_block) = {
        let engine = Engine::open(path.clone()).unwrap();
        let room = engine.insert_room("General's Quarters".into()).await.unwrap();
        book(&engine, room.id, "2022-06-20", "2022-06-22").await;
        let deleted = book(&engine, room.id, "2022-07-01", "2022-07-03").await;

        let mut txn = engine.begin(room.id).await.unwrap().unwrap();
        let block = txn
            .insert_restriction(NewRestriction {
                stay: stay("2022-08-01", "2022-08-05"),
                room_id: room.id,
                reservation_id: None,
                kind: RestrictionKind::OwnerBlock,
            })
            .unwrap();
        txn.commit().await.unwrap();

        let mut txn = engine.begin(room.id).await.unwrap().unwrap();
        assert!(txn.delete_reservation(deleted).unwrap());
        assert!(txn.remove_restriction(block).unwrap());
        txn.commit().await.unwrap();

        engine.compact_wal().await.unwrap();
        (room.id, deleted, block)
    };

    let engine = Engine::open(path).unwrap();
    let next = book(&engine, room_id, "2022-09-01", "2022-09-02").await;
    assert!(next > deleted, "reservation id {next} reused after compaction");
    let restriction = engine
        .overlapping_restrictions(room_id, &stay("2022-09-01", "2022-09-02"))
        .await
        .unwrap()
        .unwrap()[0]
        .id;
    assert!(restriction > removed_block);
    assert!(engine.get_reservation(deleted).await.unwrap().is_none());
}

#[tokio::test]
async fn background_compactor_runs_past_threshold() {
    let path = test_wal_path("compactor.wal");
    let engine = Arc::new(Engine::open(path.clone()).unwrap());
    let room = engine.insert_room("General's Quarters".into()).await.unwrap();
    for day in 1..6 {
        let start = format!("2022-09-{day:02}");
        let end = format!("2022-09-{:02}", day + 1);
        book(&engine, room.id, &start, &end).await;
    }
    assert!(engine.wal_appends_since_compact().await >= 5);

    let task = tokio::spawn(run_compactor(engine.clone(), 3, Duration::from_millis(10)));
    let mut compacted = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if engine.wal_appends_since_compact().await == 0 {
            compacted = true;
            break;
        }
    }
    task.abort();
    assert!(compacted);
    assert_eq!(engine.list_reservations(ReservationFilter::All).await.unwrap().len(), 5);
}
