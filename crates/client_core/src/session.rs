use std::sync::Arc;

use shared::{
    domain::{Booking, DashboardReport, Session, UserSummary},
    protocol::{CheckAuthResponse, LoginRequest, RegisterRequest},
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{cache::SessionCache, error::ClientError, transport::BackendApi};

pub const ADMIN_LANDING_ROUTE: &str = "/admin/dashboard";
pub const DEFAULT_LANDING_ROUTE: &str = "/";
pub const LOGIN_ROUTE: &str = "/login";
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub session: Session,
    /// Advisory route for the caller to navigate to.
    pub redirect: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub authenticated: bool,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminResource {
    Dashboard,
    Users,
    Bookings,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminData {
    Dashboard(DashboardReport),
    Users(Vec<UserSummary>),
    Bookings(Vec<Booking>),
}

/// Owns the visible session. Reconciles the session-check endpoint, the
/// durable cache and anonymity, in that order of trust.
pub struct SessionManager {
    api: Arc<dyn BackendApi>,
    cache: Arc<dyn SessionCache>,
    current: watch::Sender<Option<Session>>,
    /// Held across the cache write and the publish so both follow the same
    /// last-writer order.
    write_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn BackendApi>, cache: Arc<dyn SessionCache>) -> Arc<Self> {
        let (current, _) = watch::channel(None);
        Arc::new(Self {
            api,
            cache,
            current,
            write_lock: Mutex::new(()),
        })
    }

    pub fn current(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|session| session.is_admin)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<AuthOutcome, ClientError> {
        if identifier.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation(
                "username or email and password are required",
            ));
        }

        let request = LoginRequest::from_identifier(identifier, password);
        let session = self.api.login(&request).await.map_err(|error| {
            warn!(%error, "login failed");
            error
        })?;

        let redirect = landing_route(&session);
        info!(user_id = %session.user_id, is_admin = session.is_admin, "logged in");
        self.adopt(session.clone()).await;
        Ok(AuthOutcome { session, redirect })
    }

    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirmation: &str,
    ) -> Result<AuthOutcome, ClientError> {
        validate_signup(username, email, password, confirmation)?;

        let request = RegisterRequest {
            username: username.trim().to_string(),
            email: email.trim().to_ascii_lowercase(),
            password: password.to_string(),
        };
        let mut session = self.api.register(&request).await.map_err(|error| {
            warn!(%error, "signup failed");
            error
        })?;

        if session.is_admin {
            warn!(user_id = %session.user_id, "registration returned an admin account; not elevating");
            session.is_admin = false;
        }
        info!(user_id = %session.user_id, "account created");
        self.adopt(session.clone()).await;
        Ok(AuthOutcome {
            session,
            redirect: DEFAULT_LANDING_ROUTE,
        })
    }

    /// Clears the local session whatever the server answers.
    pub async fn logout(&self) {
        if let Err(error) = self.api.logout().await {
            warn!(%error, "remote logout failed; clearing local session anyway");
        }
        self.forget().await;
        info!("logged out");
    }

    pub async fn reconcile(&self) -> ReconcileOutcome {
        let cached = match self.cache.load().await {
            Ok(cached) => cached,
            Err(error) => {
                warn!(%error, "session cache unreadable; treating as empty");
                None
            }
        };

        if let Some(cached) = &cached {
            let _guard = self.write_lock.lock().await;
            if self.current.borrow().is_none() {
                self.publish(Some(cached.clone()));
            }
        }

        match self.api.check_session().await {
            Ok(CheckAuthResponse {
                authenticated: true,
                user: Some(user),
            }) => {
                debug!(user_id = %user.user_id, "session confirmed by server");
                self.adopt(user).await;
            }
            Ok(_) | Err(ClientError::Unauthorized(_)) => {
                if cached.is_some() {
                    info!("server reports no active session; discarding cached session");
                }
                self.forget().await;
            }
            Err(error) => {
                if cached.is_some() {
                    warn!(%error, "session check failed; keeping cached session");
                } else {
                    warn!(%error, "session check failed and no cached session exists");
                }
            }
        }

        self.outcome()
    }

    pub async fn refresh_profile(&self) -> Result<Session, ClientError> {
        match self.api.current_user().await {
            Ok(session) => {
                self.adopt(session.clone()).await;
                Ok(session)
            }
            Err(error) => {
                if error.requires_reauth() {
                    self.forget().await;
                }
                Err(error)
            }
        }
    }

    /// Non-admin sessions get `None` without any request.
    pub async fn fetch_privileged(&self, resource: AdminResource) -> Option<AdminData> {
        if !self.is_admin() {
            debug!(?resource, "privileged fetch skipped for non-admin session");
            return None;
        }

        let result = match resource {
            AdminResource::Dashboard => self.api.admin_dashboard().await.map(AdminData::Dashboard),
            AdminResource::Users => self
                .api
                .admin_users()
                .await
                .map(|page| AdminData::Users(page.users)),
            AdminResource::Bookings => self.api.admin_bookings().await.map(AdminData::Bookings),
        };

        match result {
            Ok(data) => Some(data),
            Err(error) => {
                warn!(?resource, %error, "privileged fetch failed");
                if error.requires_reauth() {
                    self.reconcile().await;
                }
                None
            }
        }
    }

    fn outcome(&self) -> ReconcileOutcome {
        let current = self.current.borrow();
        ReconcileOutcome {
            authenticated: current.is_some(),
            is_admin: current.as_ref().is_some_and(|session| session.is_admin),
        }
    }

    async fn adopt(&self, session: Session) {
        let _guard = self.write_lock.lock().await;
        if let Err(error) = self.cache.store(&session).await {
            warn!(%error, "failed to mirror session into cache");
        }
        self.publish(Some(session));
    }

    async fn forget(&self) {
        let _guard = self.write_lock.lock().await;
        if let Err(error) = self.cache.clear().await {
            warn!(%error, "failed to clear cached session");
        }
        self.publish(None);
    }

    fn publish(&self, session: Option<Session>) {
        self.current.send_replace(session);
    }
}

fn landing_route(session: &Session) -> &'static str {
    if session.is_admin {
        ADMIN_LANDING_ROUTE
    } else {
        DEFAULT_LANDING_ROUTE
    }
}

fn validate_signup(
    username: &str,
    email: &str,
    password: &str,
    confirmation: &str,
) -> Result<(), ClientError> {
    if username.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
        return Err(ClientError::validation(
            "username, email and password are required",
        ));
    }
    if !email.contains('@') {
        return Err(ClientError::validation("enter a valid email address"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ClientError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password != confirmation {
        return Err(ClientError::validation("passwords do not match"));
    }
    Ok(())
}
