use std::{
    collections::HashSet,
    mem,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Local, NaiveDate, Utc};
use shared::{
    domain::{AdventureId, BookingId, BookingStatus, Session},
    protocol::{CreateBookingRequest, InitiatePaymentRequest, PaymentReceipt},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    session::{SessionManager, LOGIN_ROUTE},
    transport::BackendApi,
};

pub const MIN_PAYER_PHONE_LEN: usize = 10;
const MAX_STATUS_PAGES: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentPolling {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PaymentPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 20,
        }
    }
}

/// Trip details collected before a booking is created. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub adventure_id: AdventureId,
    pub trip_date: Option<NaiveDate>,
    pub guest_count: u32,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub special_requests: String,
}

impl BookingDraft {
    pub fn new(adventure_id: AdventureId) -> Self {
        Self {
            adventure_id,
            trip_date: None,
            guest_count: 1,
            customer_name: String::new(),
            customer_email: String::new(),
            customer_phone: String::new(),
            special_requests: String::new(),
        }
    }

    /// Fills contact fields the user has not typed yet from their session.
    pub fn prefill_from(&mut self, session: &Session) {
        if self.customer_name.trim().is_empty() {
            self.customer_name = session.display_name.clone();
        }
        if self.customer_email.trim().is_empty() {
            self.customer_email = session.email.clone();
        }
        if self.customer_phone.trim().is_empty() {
            if let Some(phone) = &session.phone_number {
                self.customer_phone = phone.clone();
            }
        }
    }

    pub fn validate(&self, today: NaiveDate) -> Result<CreateBookingRequest, ClientError> {
        let Some(trip_date) = self.trip_date else {
            return Err(ClientError::validation("choose a trip date"));
        };
        if trip_date < today {
            return Err(ClientError::validation("trip date cannot be in the past"));
        }
        if self.guest_count < 1 {
            return Err(ClientError::validation("at least one guest is required"));
        }
        let missing: Vec<&str> = [
            ("name", &self.customer_name),
            ("email", &self.customer_email),
            ("phone", &self.customer_phone),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();
        if !missing.is_empty() {
            return Err(ClientError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        Ok(CreateBookingRequest {
            adventure_id: self.adventure_id,
            adventure_date: trip_date,
            number_of_people: self.guest_count,
            customer_name: self.customer_name.trim().to_string(),
            customer_email: self.customer_email.trim().to_string(),
            customer_phone: self.customer_phone.trim().to_string(),
            special_requests: self.special_requests.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedBooking {
    pub booking_id: BookingId,
    /// Whole shillings: unit price times guest count.
    pub total_amount: u64,
    pub status: BookingStatus,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub booking_id: BookingId,
    pub payer_phone: String,
    pub initiated_at: DateTime<Utc>,
    pub receipt: Option<PaymentReceipt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Confirmed,
    Failed,
    /// Nothing conclusive came back in time; the user should check the
    /// booking status later.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingPhase {
    Collecting {
        draft: BookingDraft,
        error: Option<ClientError>,
    },
    Submitting {
        draft: BookingDraft,
    },
    AwaitingPayment {
        draft: BookingDraft,
        booking: ReservedBooking,
        error: Option<ClientError>,
    },
    ConfirmingPayment {
        draft: BookingDraft,
        booking: ReservedBooking,
        attempt: PaymentAttempt,
    },
    Settled {
        draft: BookingDraft,
        booking: ReservedBooking,
        attempt: PaymentAttempt,
        outcome: PaymentOutcome,
    },
    Cancelled,
}

impl BookingPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Collecting { .. } => "collecting",
            Self::Submitting { .. } => "submitting",
            Self::AwaitingPayment { .. } => "awaiting_payment",
            Self::ConfirmingPayment { .. } => "confirming_payment",
            Self::Settled { .. } => "settled",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn draft(&self) -> Option<&BookingDraft> {
        match self {
            Self::Collecting { draft, .. }
            | Self::Submitting { draft }
            | Self::AwaitingPayment { draft, .. }
            | Self::ConfirmingPayment { draft, .. }
            | Self::Settled { draft, .. } => Some(draft),
            Self::Cancelled => None,
        }
    }

    pub fn booking(&self) -> Option<&ReservedBooking> {
        match self {
            Self::AwaitingPayment { booking, .. }
            | Self::ConfirmingPayment { booking, .. }
            | Self::Settled { booking, .. } => Some(booking),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled { .. } | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced(BookingPhase),
    Ignored,
    /// Cancelled while in flight; the response was dropped.
    Stale,
    Rejected {
        error: ClientError,
        redirect: Option<&'static str>,
    },
}

/// Told exactly once each time a flow settles.
pub trait BookingObserver: Send + Sync {
    fn on_booking_completed(&self, outcome: PaymentOutcome, booking_id: BookingId);
}

impl<F> BookingObserver for F
where
    F: Fn(PaymentOutcome, BookingId) + Send + Sync,
{
    fn on_booking_completed(&self, outcome: PaymentOutcome, booking_id: BookingId) {
        self(outcome, booking_id)
    }
}

pub struct NoopObserver;

impl BookingObserver for NoopObserver {
    fn on_booking_completed(&self, _outcome: PaymentOutcome, _booking_id: BookingId) {}
}

type InflightPayments = Arc<StdMutex<HashSet<BookingId>>>;

/// Opens booking flows that share one payment in-flight registry, so a
/// booking id is never charged by two flows at once.
pub struct BookingDesk {
    api: Arc<dyn BackendApi>,
    session: Arc<SessionManager>,
    polling: PaymentPolling,
    inflight_payments: InflightPayments,
}

impl BookingDesk {
    pub fn new(
        api: Arc<dyn BackendApi>,
        session: Arc<SessionManager>,
        polling: PaymentPolling,
    ) -> Self {
        Self {
            api,
            session,
            polling,
            inflight_payments: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub fn open(
        &self,
        adventure_id: AdventureId,
        unit_price: u64,
        observer: Arc<dyn BookingObserver>,
    ) -> BookingOrchestrator {
        let mut draft = BookingDraft::new(adventure_id);
        if let Some(session) = self.session.current() {
            draft.prefill_from(&session);
        }
        BookingOrchestrator {
            api: self.api.clone(),
            session: self.session.clone(),
            polling: self.polling,
            inflight_payments: self.inflight_payments.clone(),
            observer,
            unit_price,
            inner: Mutex::new(FlowState {
                phase: BookingPhase::Collecting { draft, error: None },
                generation: 0,
            }),
        }
    }
}

struct FlowState {
    phase: BookingPhase,
    /// Bumped on cancel; responses carrying an older value are dropped.
    generation: u64,
}

/// Removes its booking id from the in-flight registry when dropped.
struct PaymentClaim {
    registry: InflightPayments,
    booking_id: BookingId,
}

impl PaymentClaim {
    fn acquire(registry: &InflightPayments, booking_id: BookingId) -> Option<Self> {
        let inserted = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(booking_id);
        inserted.then(|| Self {
            registry: registry.clone(),
            booking_id,
        })
    }
}

impl Drop for PaymentClaim {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.booking_id);
    }
}

pub struct BookingOrchestrator {
    api: Arc<dyn BackendApi>,
    session: Arc<SessionManager>,
    polling: PaymentPolling,
    inflight_payments: InflightPayments,
    observer: Arc<dyn BookingObserver>,
    unit_price: u64,
    inner: Mutex<FlowState>,
}

impl BookingOrchestrator {
    pub async fn phase(&self) -> BookingPhase {
        self.inner.lock().await.phase.clone()
    }

    pub async fn booking_id(&self) -> Option<BookingId> {
        self.inner
            .lock()
            .await
            .phase
            .booking()
            .map(|booking| booking.booking_id)
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub async fn edit_draft(&self, edit: impl FnOnce(&mut BookingDraft)) -> bool {
        let mut guard = self.inner.lock().await;
        match &mut guard.phase {
            BookingPhase::Collecting { draft, error } => {
                edit(draft);
                *error = None;
                true
            }
            other => {
                debug!(phase = other.name(), "draft is locked");
                false
            }
        }
    }

    pub async fn submit(&self) -> StepOutcome {
        let (request, total_amount, generation) = {
            let mut guard = self.inner.lock().await;
            let draft = match &guard.phase {
                BookingPhase::Collecting { draft, .. } => draft.clone(),
                other => {
                    debug!(phase = other.name(), "submit ignored");
                    return StepOutcome::Ignored;
                }
            };

            let prepared = self.require_session().and_then(|()| {
                let request = draft.validate(Local::now().date_naive())?;
                let total = self.total_for(draft.guest_count)?;
                Ok((request, total))
            });
            match prepared {
                Ok((request, total)) => {
                    guard.phase = BookingPhase::Submitting { draft };
                    (request, total, guard.generation)
                }
                Err(error) => {
                    let redirect = redirect_for(&error);
                    guard.phase = BookingPhase::Collecting {
                        draft,
                        error: Some(error.clone()),
                    };
                    return StepOutcome::Rejected { error, redirect };
                }
            }
        };

        let result = self.api.create_booking(&request).await;

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!("dropping create-booking response for a cancelled flow");
            return StepOutcome::Stale;
        }
        let draft = match mem::replace(&mut guard.phase, BookingPhase::Cancelled) {
            BookingPhase::Submitting { draft } => draft,
            other => {
                guard.phase = other;
                return StepOutcome::Stale;
            }
        };

        match result {
            Ok(booking) => {
                info!(
                    booking_id = %booking.booking_id,
                    adventure_id = %request.adventure_id,
                    total_amount,
                    "booking created"
                );
                guard.phase = BookingPhase::AwaitingPayment {
                    draft,
                    booking: ReservedBooking {
                        booking_id: booking.booking_id,
                        total_amount,
                        status: booking.status,
                        reference: booking.booking_reference,
                    },
                    error: None,
                };
                StepOutcome::Advanced(guard.phase.clone())
            }
            Err(error) => {
                warn!(%error, adventure_id = %request.adventure_id, "booking creation failed");
                let redirect = redirect_for(&error);
                guard.phase = BookingPhase::Collecting {
                    draft,
                    error: Some(error.clone()),
                };
                StepOutcome::Rejected { error, redirect }
            }
        }
    }

    pub async fn initiate_payment(&self, payer_phone: &str) -> StepOutcome {
        let payer_phone = payer_phone.trim().to_string();
        let (attempt, generation, _claim) = {
            let mut guard = self.inner.lock().await;
            let (draft, booking) = match &guard.phase {
                BookingPhase::AwaitingPayment { draft, booking, .. } => {
                    (draft.clone(), booking.clone())
                }
                other => {
                    debug!(phase = other.name(), "payment trigger ignored");
                    return StepOutcome::Ignored;
                }
            };

            let checked = self.require_session().and_then(|()| {
                if payer_phone.chars().count() < MIN_PAYER_PHONE_LEN {
                    return Err(ClientError::validation(format!(
                        "phone number must be at least {MIN_PAYER_PHONE_LEN} digits"
                    )));
                }
                Ok(())
            });
            if let Err(error) = checked {
                let redirect = redirect_for(&error);
                guard.phase = BookingPhase::AwaitingPayment {
                    draft,
                    booking,
                    error: Some(error.clone()),
                };
                return StepOutcome::Rejected { error, redirect };
            }

            let Some(claim) = PaymentClaim::acquire(&self.inflight_payments, booking.booking_id)
            else {
                debug!(booking_id = %booking.booking_id, "payment already in flight for booking");
                return StepOutcome::Ignored;
            };

            let attempt = PaymentAttempt {
                booking_id: booking.booking_id,
                payer_phone,
                initiated_at: Utc::now(),
                receipt: None,
            };
            guard.phase = BookingPhase::ConfirmingPayment {
                draft,
                booking,
                attempt: attempt.clone(),
            };
            (attempt, guard.generation, claim)
        };

        let request = InitiatePaymentRequest {
            booking_id: attempt.booking_id,
            phone_number: attempt.payer_phone.clone(),
        };
        match self.api.initiate_payment(&request).await {
            Ok(receipt) => {
                let mut guard = self.inner.lock().await;
                if guard.generation != generation {
                    return StepOutcome::Stale;
                }
                if let BookingPhase::ConfirmingPayment { attempt, .. } = &mut guard.phase {
                    attempt.receipt = Some(receipt);
                }
                info!(booking_id = %request.booking_id, "payment prompt sent");
            }
            Err(error) if error.is_outcome_unknown() => {
                warn!(
                    %error,
                    booking_id = %request.booking_id,
                    "payment request outcome unknown; checking booking status"
                );
            }
            Err(error) => {
                warn!(%error, booking_id = %request.booking_id, "payment initiation failed");
                let mut guard = self.inner.lock().await;
                if guard.generation != generation {
                    return StepOutcome::Stale;
                }
                return match mem::replace(&mut guard.phase, BookingPhase::Cancelled) {
                    BookingPhase::ConfirmingPayment { draft, booking, .. } => {
                        let redirect = redirect_for(&error);
                        guard.phase = BookingPhase::AwaitingPayment {
                            draft,
                            booking,
                            error: Some(error.clone()),
                        };
                        StepOutcome::Rejected { error, redirect }
                    }
                    other => {
                        guard.phase = other;
                        StepOutcome::Stale
                    }
                };
            }
        }

        let Some(outcome) = self.await_confirmation(attempt.booking_id, generation).await else {
            return StepOutcome::Stale;
        };
        self.settle(generation, outcome).await
    }

    /// Starts a new payment attempt for a booking whose previous attempt
    /// failed or stayed inconclusive. The booking and draft are kept.
    pub async fn retry_payment(&self) -> bool {
        let mut guard = self.inner.lock().await;
        match mem::replace(&mut guard.phase, BookingPhase::Cancelled) {
            BookingPhase::Settled {
                draft,
                booking,
                outcome,
                ..
            } if outcome != PaymentOutcome::Confirmed => {
                guard.phase = BookingPhase::AwaitingPayment {
                    draft,
                    booking,
                    error: None,
                };
                true
            }
            other => {
                guard.phase = other;
                false
            }
        }
    }

    /// Discards the flow. In-flight requests are not aborted; their responses
    /// are dropped when they arrive.
    pub async fn cancel(&self) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.phase.is_terminal() {
            return false;
        }
        info!(phase = guard.phase.name(), "booking flow cancelled");
        guard.generation += 1;
        guard.phase = BookingPhase::Cancelled;
        true
    }

    /// `None` means the flow was cancelled meanwhile.
    async fn await_confirmation(
        &self,
        booking_id: BookingId,
        generation: u64,
    ) -> Option<PaymentOutcome> {
        for attempt in 1..=self.polling.max_attempts {
            tokio::time::sleep(self.polling.interval).await;
            if self.inner.lock().await.generation != generation {
                return None;
            }

            match self.polled_status(booking_id).await {
                Ok(Some(status)) if status.is_paid() => return Some(PaymentOutcome::Confirmed),
                Ok(Some(BookingStatus::Cancelled)) => return Some(PaymentOutcome::Failed),
                Ok(Some(_)) => debug!(%booking_id, attempt, "booking still pending"),
                Ok(None) => debug!(%booking_id, attempt, "booking not listed yet"),
                Err(error) if error.requires_reauth() => {
                    warn!(%error, %booking_id, "lost session while confirming payment");
                    return Some(PaymentOutcome::Unknown);
                }
                Err(error) => {
                    warn!(%error, %booking_id, attempt, "booking status poll failed");
                }
            }
        }
        Some(PaymentOutcome::Unknown)
    }

    async fn polled_status(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<BookingStatus>, ClientError> {
        let mut page = 1;
        loop {
            let listing = self.api.my_bookings_page(page).await?;
            if let Some(booking) = listing
                .bookings
                .iter()
                .find(|booking| booking.booking_id == booking_id)
            {
                return Ok(Some(booking.status));
            }
            let last_page = listing.pages.unwrap_or(1).min(MAX_STATUS_PAGES);
            if listing.bookings.is_empty() || page >= last_page {
                return Ok(None);
            }
            page += 1;
        }
    }

    async fn settle(&self, generation: u64, outcome: PaymentOutcome) -> StepOutcome {
        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            return StepOutcome::Stale;
        }
        let (draft, mut booking, attempt) =
            match mem::replace(&mut guard.phase, BookingPhase::Cancelled) {
                BookingPhase::ConfirmingPayment {
                    draft,
                    booking,
                    attempt,
                } => (draft, booking, attempt),
                other => {
                    guard.phase = other;
                    return StepOutcome::Stale;
                }
            };

        if outcome == PaymentOutcome::Confirmed {
            booking.status = BookingStatus::Confirmed;
        }
        let booking_id = booking.booking_id;
        info!(%booking_id, ?outcome, "booking flow settled");
        guard.phase = BookingPhase::Settled {
            draft,
            booking,
            attempt,
            outcome,
        };
        let settled = guard.phase.clone();
        drop(guard);

        self.observer.on_booking_completed(outcome, booking_id);
        StepOutcome::Advanced(settled)
    }

    fn require_session(&self) -> Result<(), ClientError> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(ClientError::Unauthorized(
                "sign in to book an adventure".into(),
            ))
        }
    }

    fn total_for(&self, guest_count: u32) -> Result<u64, ClientError> {
        self.unit_price
            .checked_mul(u64::from(guest_count))
            .ok_or_else(|| ClientError::validation("booking total is too large"))
    }
}

fn redirect_for(error: &ClientError) -> Option<&'static str> {
    error.requires_reauth().then_some(LOGIN_ROUTE)
}
