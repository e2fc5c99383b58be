use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    cookie::{CookieStore, Jar},
    Client, RequestBuilder,
};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Adventure, AdventureId, Booking, BookingId, DashboardReport, Session},
    error::ErrorBody,
    protocol::{
        adventure_path, bookings_page_path, cancel_booking_path, BookingEnvelope, BookingsPage, CheckAuthResponse,
        CreateBookingRequest, InitiatePaymentRequest, LoginRequest, PaymentReceipt,
        RegisterRequest, UserEnvelope, UsersPage, ADMIN_BOOKINGS_PATH, ADMIN_DASHBOARD_PATH,
        ADMIN_USERS_PATH, ADVENTURES_PATH, BOOKINGS_PATH, CHECK_AUTH_PATH, INITIATE_PAYMENT_PATH,
        LOGIN_PATH, LOGOUT_PATH, ME_PATH, REGISTER_PATH,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::error::ClientError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<Session, ClientError>;
    async fn register(&self, request: &RegisterRequest) -> Result<Session, ClientError>;
    async fn logout(&self) -> Result<(), ClientError>;
    async fn check_session(&self) -> Result<CheckAuthResponse, ClientError>;
    async fn current_user(&self) -> Result<Session, ClientError>;
    async fn admin_dashboard(&self) -> Result<DashboardReport, ClientError>;
    async fn admin_users(&self) -> Result<UsersPage, ClientError>;
    async fn admin_bookings(&self) -> Result<Vec<Booking>, ClientError>;
    async fn list_adventures(&self) -> Result<Vec<Adventure>, ClientError>;
    async fn adventure(&self, adventure_id: AdventureId) -> Result<Adventure, ClientError>;
    async fn create_booking(&self, request: &CreateBookingRequest)
        -> Result<Booking, ClientError>;
    async fn initiate_payment(
        &self,
        request: &InitiatePaymentRequest,
    ) -> Result<PaymentReceipt, ClientError>;
    async fn my_bookings(&self) -> Result<Vec<Booking>, ClientError>;
    async fn my_bookings_page(&self, page: u64) -> Result<BookingsPage, ClientError>;
    async fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, ClientError>;
}

/// [`BackendApi`] over HTTP with a shared cookie jar, so the session cookie
/// set by login travels with every later call.
pub struct HttpBackend {
    http: Client,
    base_url: String,
    origin: Url,
    cookies: Arc<Jar>,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::with_cookie_jar(base_url, timeout, Arc::new(Jar::default()))
    }

    pub fn with_cookie_jar(base_url: &str, timeout: Duration, cookies: Arc<Jar>) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let origin = Url::parse(&base_url)
            .with_context(|| format!("invalid booking API base url '{base_url}'"))?;
        let http = Client::builder()
            .cookie_provider(cookies.clone())
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            origin,
            cookies,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cookie_header(&self) -> Option<String> {
        self.cookies
            .cookies(&self.origin)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// Re-seeds the jar from a header produced by [`Self::cookie_header`].
    pub fn restore_cookies(&self, header: &str) {
        for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            self.cookies.add_cookie_str(pair, &self.origin);
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(path, self.http.get(self.url(path))).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.execute(path, self.http.post(self.url(path)).json(body))
            .await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let bytes = self.send(path, request).await?;
        serde_json::from_slice(&bytes).map_err(|err| ClientError::malformed(path, err))
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Vec<u8>, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        debug!(path, status = status.as_u16(), "booking api response");
        if !status.is_success() {
            let body = serde_json::from_slice::<ErrorBody>(&bytes).ok();
            return Err(ClientError::from_status(status.as_u16(), body));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn login(&self, request: &LoginRequest) -> Result<Session, ClientError> {
        let envelope: UserEnvelope = self.post_json(LOGIN_PATH, request).await?;
        Ok(envelope.user)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<Session, ClientError> {
        let envelope: UserEnvelope = self.post_json(REGISTER_PATH, request).await?;
        Ok(envelope.user)
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.send(LOGOUT_PATH, self.http.post(self.url(LOGOUT_PATH)))
            .await
            .map(|_| ())
    }

    async fn check_session(&self) -> Result<CheckAuthResponse, ClientError> {
        let response: CheckAuthResponse = self.get_json(CHECK_AUTH_PATH).await?;
        if response.authenticated && response.user.is_none() {
            return Err(ClientError::malformed(
                CHECK_AUTH_PATH,
                "authenticated without a user record",
            ));
        }
        Ok(response)
    }

    async fn current_user(&self) -> Result<Session, ClientError> {
        let envelope: UserEnvelope = self.get_json(ME_PATH).await?;
        Ok(envelope.user)
    }

    async fn admin_dashboard(&self) -> Result<DashboardReport, ClientError> {
        self.get_json(ADMIN_DASHBOARD_PATH).await
    }

    async fn admin_users(&self) -> Result<UsersPage, ClientError> {
        self.get_json(ADMIN_USERS_PATH).await
    }

    async fn admin_bookings(&self) -> Result<Vec<Booking>, ClientError> {
        let page: BookingsPage = self.get_json(ADMIN_BOOKINGS_PATH).await?;
        Ok(page.bookings)
    }

    async fn list_adventures(&self) -> Result<Vec<Adventure>, ClientError> {
        self.get_json(ADVENTURES_PATH).await
    }

    async fn adventure(&self, adventure_id: AdventureId) -> Result<Adventure, ClientError> {
        self.get_json(&adventure_path(adventure_id)).await
    }

    async fn create_booking(
        &self,
        request: &CreateBookingRequest,
    ) -> Result<Booking, ClientError> {
        let envelope: BookingEnvelope = self.post_json(BOOKINGS_PATH, request).await?;
        Ok(envelope.booking)
    }

    async fn initiate_payment(
        &self,
        request: &InitiatePaymentRequest,
    ) -> Result<PaymentReceipt, ClientError> {
        let bytes = self
            .send(
                INITIATE_PAYMENT_PATH,
                self.http.post(self.url(INITIATE_PAYMENT_PATH)).json(request),
            )
            .await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(PaymentReceipt::default());
        }
        match serde_json::from_slice(&bytes) {
            Ok(receipt) => Ok(receipt),
            Err(error) => {
                // The charge prompt was accepted; only the echo is unreadable.
                warn!(%error, booking_id = %request.booking_id, "ignoring unreadable payment receipt");
                Ok(PaymentReceipt::default())
            }
        }
    }

    async fn my_bookings(&self) -> Result<Vec<Booking>, ClientError> {
        let page: BookingsPage = self.get_json(BOOKINGS_PATH).await?;
        Ok(page.bookings)
    }

    async fn my_bookings_page(&self, page: u64) -> Result<BookingsPage, ClientError> {
        self.get_json(&bookings_page_path(page)).await
    }

    async fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, ClientError> {
        let path = cancel_booking_path(booking_id);
        let envelope: BookingEnvelope = self
            .execute(&path, self.http.post(self.url(&path)))
            .await?;
        Ok(envelope.booking)
    }
}
