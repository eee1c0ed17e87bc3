use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::model::{Reservation, DATE_FORMAT};

/// One outgoing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailData {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl MailData {
    /// Confirmation sent to the guest after a successful booking.
    pub fn guest_confirmation(reservation: &Reservation, room_name: &str, from: &str) -> Self {
        Self {
            to: reservation.guest.email.clone(),
            from: from.to_string(),
            subject: "Reservation Confirmation".to_string(),
            body: format!(
                "<strong>Reservation Confirmation</strong><br>\
                 Dear {}:<br>\
                 This is to confirm your reservation of the {} from {} to {}.",
                reservation.guest.first_name,
                room_name,
                reservation.stay.start().format(DATE_FORMAT),
                reservation.stay.end().format(DATE_FORMAT),
            ),
        }
    }

    /// Notice sent to the property owner after a successful booking.
    pub fn owner_notification(reservation: &Reservation, room_name: &str, from: &str, owner: &str) -> Self {
        Self {
            to: owner.to_string(),
            from: from.to_string(),
            subject: "Reservation Notification".to_string(),
            body: format!(
                "<strong>Reservation Notification</strong><br>\
                 A reservation has been made for the {} from {} to {}.",
                room_name,
                reservation.stay.start().format(DATE_FORMAT),
                reservation.stay.end().format(DATE_FORMAT),
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("delivery to {to} failed: {reason}")]
    Delivery { to: String, reason: String },
}

/// Delivers mail. Implementations live outside the booking core.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: &MailData) -> Result<(), MailError>;
}

/// Transport that only logs each message.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, mail: &MailData) -> Result<(), MailError> {
        info!(to = %mail.to, subject = %mail.subject, "mail");
        Ok(())
    }
}

/// Sending half of the mail queue. Enqueueing never blocks and never fails
/// the caller: a full or closed queue drops the message with a warning.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<MailData>,
}

impl MailQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MailData>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, mail: MailData) {
        match self.tx.try_send(mail) {
            Ok(()) => {}
            Err(TrySendError::Full(mail)) => {
                metrics::counter!(crate::observability::MAIL_DROPPED_TOTAL).increment(1);
                warn!(to = %mail.to, subject = %mail.subject, "mail queue full, dropping message");
            }
            Err(TrySendError::Closed(mail)) => {
                metrics::counter!(crate::observability::MAIL_DROPPED_TOTAL).increment(1);
                warn!(to = %mail.to, subject = %mail.subject, "mailer stopped, dropping message");
            }
        }
    }
}

/// Background task that hands queued mail to the transport until every
/// sender is dropped.
pub async fn run_mailer(mut rx: mpsc::Receiver<MailData>, transport: Arc<dyn MailTransport>) {
    while let Some(mail) = rx.recv().await {
        match transport.deliver(&mail).await {
            Ok(()) => {
                metrics::counter!(crate::observability::MAIL_DELIVERIES_TOTAL, "status" => "sent")
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!(crate::observability::MAIL_DELIVERIES_TOTAL, "status" => "failed")
                    .increment(1);
                warn!(error = %e, "mail delivery failed");
            }
        }
    }
    debug!("mailer stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Transport that records every message it is asked to deliver.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<MailData>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, mail: &MailData) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;
    use crate::model::fixtures::*;
    use chrono::Utc;

    fn mail(to: &str) -> MailData {
        MailData {
            to: to.to_string(),
            from: "me@here.com".to_string(),
            subject: "hello".to_string(),
            body: "body".to_string(),
        }
    }

    #[tokio::test]
    async fn mailer_delivers_queued_mail() {
        let (queue, rx) = MailQueue::new(8);
        let transport = Arc::new(RecordingTransport::default());
        queue.enqueue(mail("a@example.com"));
        queue.enqueue(mail("b@example.com"));
        drop(queue);

        run_mailer(rx, transport.clone()).await;
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "a@example.com");
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (queue, mut rx) = MailQueue::new(1);
        queue.enqueue(mail("a@example.com"));
        queue.enqueue(mail("b@example.com"));
        assert_eq!(rx.recv().await.unwrap().to, "a@example.com");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_is_not_an_error() {
        let (queue, rx) = MailQueue::new(1);
        drop(rx);
        queue.enqueue(mail("a@example.com"));
    }

    #[test]
    fn confirmation_mentions_room_and_dates() {
        let now = Utc::now();
        let reservation = Reservation {
            id: 1,
            guest: guest("Asdan"),
            stay: stay("2022-06-20", "2022-06-22"),
            room_id: 1,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        let m = MailData::guest_confirmation(&reservation, "General's Quarters", "me@here.com");
        assert_eq!(m.to, "asdan@example.com");
        assert!(m.body.contains("General's Quarters"));
        assert!(m.body.contains("2022-06-20"));

        let o = MailData::owner_notification(&reservation, "General's Quarters", "me@here.com", "owner@here.com");
        assert_eq!(o.to, "owner@here.com");
        assert!(o.body.contains("2022-06-22"));
    }
}
