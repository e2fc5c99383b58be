use std::sync::Arc;

pub mod booking;
pub mod cache;
pub mod error;
pub mod session;
pub mod transport;

pub use booking::{
    BookingDesk, BookingDraft, BookingObserver, BookingOrchestrator, BookingPhase, NoopObserver,
    PaymentAttempt, PaymentOutcome, PaymentPolling, ReservedBooking, StepOutcome,
};
pub use cache::{MemorySessionCache, SessionCache};
pub use error::ClientError;
pub use session::{AdminData, AdminResource, AuthOutcome, ReconcileOutcome, SessionManager};
pub use transport::{BackendApi, HttpBackend};

/// Session manager and booking desk wired to the same backend.
pub struct BookingClient {
    pub session: Arc<SessionManager>,
    pub desk: BookingDesk,
}

impl BookingClient {
    pub fn new(
        api: Arc<dyn BackendApi>,
        cache: Arc<dyn SessionCache>,
        polling: PaymentPolling,
    ) -> Self {
        let session = SessionManager::new(api.clone(), cache);
        let desk = BookingDesk::new(api, session.clone(), polling);
        Self { session, desk }
    }
}

#[cfg(test)]
#[path = "tests/stub_backend.rs"]
mod stub_backend;

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;

#[cfg(test)]
#[path = "tests/booking_tests.rs"]
mod booking_tests;
