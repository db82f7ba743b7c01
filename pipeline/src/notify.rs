//! Notifier implementations.
//!
//! Rendering real email is out of scope for the pipeline; the default
//! production notifier emits a structured log line that downstream delivery
//! tooling (or a human watching the logs in development) picks up.

use std::future::Future;
use std::pin::Pin;
use tracing::info;
use waypost_core::notify::{Notifier, NotifyError};
use waypost_core::ticket::Ticket;

/// Notifier that logs the notification instead of delivering it.
#[derive(Clone, Debug, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    /// Create a tracing notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for TracingNotifier {
    fn ticket_received<'a>(
        &'a self,
        ticket: &'a Ticket,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                ticket_id = %ticket.ticket_id,
                ticket_type = %ticket.ticket_type(),
                to = %ticket.submitter_email,
                "Ticket received notification"
            );
            Ok(())
        })
    }
}
