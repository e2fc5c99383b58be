use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{AdventureId, Booking, BookingId, PaymentId, Session, UserSummary};

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REGISTER_PATH: &str = "/api/auth/register";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const CHECK_AUTH_PATH: &str = "/api/auth/check-auth";
pub const ME_PATH: &str = "/api/auth/me";
pub const ADMIN_DASHBOARD_PATH: &str = "/api/admin/dashboard";
pub const ADMIN_USERS_PATH: &str = "/api/admin/users";
pub const ADMIN_BOOKINGS_PATH: &str = "/api/admin/bookings";
pub const ADVENTURES_PATH: &str = "/api/adventures/";
pub const BOOKINGS_PATH: &str = "/api/bookings/";
pub const INITIATE_PAYMENT_PATH: &str = "/api/bookings/initiate-payment";

pub fn adventure_path(adventure_id: AdventureId) -> String {
    format!("/api/adventures/{}", adventure_id.0)
}

/// The caller's bookings are listed newest first, ten per page.
pub fn bookings_page_path(page: u64) -> String {
    format!("{BOOKINGS_PATH}?page={page}")
}

pub fn cancel_booking_path(booking_id: BookingId) -> String {
    format!("/api/bookings/{}/cancel", booking_id.0)
}

/// Login body. Exactly one of `username` / `email` is set, chosen by whether
/// the identifier contains `@`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    pub fn from_identifier(identifier: &str, password: impl Into<String>) -> Self {
        let identifier = identifier.trim();
        let (username, email) = if identifier.contains('@') {
            (None, Some(identifier.to_ascii_lowercase()))
        } else {
            (Some(identifier.to_string()), None)
        };
        Self {
            username,
            email,
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `{ user: Session }` returned by login, register and `me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAuthResponse {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Session>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersPage {
    pub users: Vec<UserSummary>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde(default)]
    pub current_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingsPage {
    pub bookings: Vec<Booking>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde(default)]
    pub current_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEnvelope {
    pub booking: Booking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub adventure_id: AdventureId,
    pub adventure_date: NaiveDate,
    pub number_of_people: u32,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub special_requests: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub booking_id: BookingId,
    pub phone_number: String,
}

/// Whatever the payment service chose to echo back; every field is optional
/// because a bare 2xx already means the charge prompt was accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    #[serde(default)]
    pub booking_id: Option<BookingId>,
    #[serde(default)]
    pub payment_id: Option<PaymentId>,
    #[serde(default)]
    pub checkout_request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_with_at_sign_is_sent_as_email() {
        let request = LoginRequest::from_identifier(" Admin456@Gmail.com ", "admin456");
        let body = serde_json::to_value(&request).expect("encode");
        assert_eq!(body["email"], "admin456@gmail.com");
        assert!(body.get("username").is_none());
    }

    #[test]
    fn plain_identifier_is_sent_as_username() {
        let request = LoginRequest::from_identifier("wanjiru", "secret1");
        let body = serde_json::to_value(&request).expect("encode");
        assert_eq!(body["username"], "wanjiru");
        assert!(body.get("email").is_none());
    }

    #[test]
    fn create_booking_encodes_iso_date() {
        let request = CreateBookingRequest {
            adventure_id: AdventureId(102),
            adventure_date: NaiveDate::from_ymd_opt(2030, 3, 14).expect("date"),
            number_of_people: 2,
            customer_name: "Achieng".into(),
            customer_email: "achieng@example.com".into(),
            customer_phone: "0712345678".into(),
            special_requests: String::new(),
        };
        let body = serde_json::to_value(&request).expect("encode");
        assert_eq!(body["adventure_id"], 102);
        assert_eq!(body["adventure_date"], "2030-03-14");
        assert_eq!(body["number_of_people"], 2);
    }

    #[test]
    fn empty_payment_body_is_an_empty_receipt() {
        let receipt: PaymentReceipt = serde_json::from_str("{}").expect("decode");
        assert_eq!(receipt, PaymentReceipt::default());
    }
}
