//! Notification port.
//!
//! Rendering and delivery of notifications (email templates, admin pings)
//! are outside the pipeline core; the processor only needs a seam to invoke
//! after a ticket is durably stored. Delivery failures are logged by the
//! caller and never fail the message: the ticket is already persisted, and
//! redelivering would only duplicate the notification.

use crate::ticket::Ticket;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by notification delivery.
#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    /// The notification dependency was unavailable or rejected the send.
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Side-effecting notification dependency invoked by the processor.
pub trait Notifier: Send + Sync {
    /// Announce a newly stored ticket (to admins, and as a receipt to the
    /// submitter).
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::DeliveryFailed`] when the underlying channel
    /// rejects the send. Callers log this; they do not propagate it.
    fn ticket_received<'a>(
        &'a self,
        ticket: &'a Ticket,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;
}
