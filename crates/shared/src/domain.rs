use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(AdventureId);
id_newtype!(BookingId);
id_newtype!(PaymentId);

/// Authenticated identity of the current actor, as returned by the auth
/// endpoints and mirrored into the durable cache under the `user` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "id")]
    pub user_id: UserId,
    #[serde(rename = "username")]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Payment for the booking has been accepted by the booking service.
    pub fn is_paid(self) -> bool {
        matches!(self, Self::Confirmed | Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Read-only projection of a server-side booking record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    #[serde(rename = "id")]
    pub booking_id: BookingId,
    #[serde(default)]
    pub adventure_id: Option<AdventureId>,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub booking_reference: Option<String>,
    #[serde(default)]
    pub adventure_date: Option<String>,
    #[serde(default)]
    pub number_of_people: Option<u32>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adventure {
    pub id: AdventureId,
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub max_capacity: Option<u32>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Adventure {
    /// Per-guest price in whole shillings, or `None` when the listed price is
    /// not a usable amount.
    pub fn unit_price(&self) -> Option<u64> {
        if !self.price.is_finite() || self.price < 0.0 || self.price > u64::MAX as f64 {
            return None;
        }
        Some(self.price.round() as u64)
    }
}

/// Row of the admin users listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub bookings_count: Option<u32>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardStats {
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub total_adventures: u64,
    #[serde(default)]
    pub total_bookings: u64,
    #[serde(default)]
    pub total_revenue: f64,
    #[serde(default)]
    pub recent_users: u64,
    #[serde(default)]
    pub recent_bookings: u64,
    #[serde(default)]
    pub recent_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRevenue {
    pub year: i32,
    pub month: u32,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardAnalytics {
    #[serde(default)]
    pub booking_status: Vec<StatusCount>,
    #[serde(default)]
    pub payment_status: Vec<StatusCount>,
    #[serde(default)]
    pub monthly_revenue: Vec<MonthlyRevenue>,
}

/// Admin dashboard payload: headline counters plus optional breakdowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardReport {
    pub dashboard: DashboardStats,
    #[serde(default)]
    pub analytics: Option<DashboardAnalytics>,
}

fn default_true() -> bool {
    true
}

/// Accepts naive ISO timestamps (`2024-05-01T10:00:00.123456`), RFC 3339 and
/// bare dates. Anything else decodes as `None` rather than failing the record.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_utc());
    }
    if let Ok(parsed) = raw.parse::<NaiveDateTime>() {
        return Some(parsed);
    }
    raw.parse::<NaiveDate>()
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_record_with_naive_timestamp() {
        let session: Session = serde_json::from_str(
            r#"{"id":1,"username":"admin456","email":"admin456@gmail.com","is_admin":true,
                "phone_number":null,"created_at":"2024-05-01T10:00:00.123456","bookings_count":3}"#,
        )
        .expect("decode session");
        assert_eq!(session.user_id, UserId(1));
        assert_eq!(session.display_name, "admin456");
        assert!(session.is_admin);
        assert!(session.created_at.is_some());
    }

    #[test]
    fn unparseable_timestamp_does_not_fail_the_record() {
        let session: Session =
            serde_json::from_str(r#"{"id":2,"username":"jo","created_at":"yesterday"}"#)
                .expect("decode session");
        assert_eq!(session.created_at, None);
        assert!(!session.is_admin);
    }

    #[test]
    fn cached_session_survives_reencoding() {
        let session: Session = serde_json::from_str(
            r#"{"id":7,"username":"wanjiru","email":"w@example.com","created_at":"2024-01-02T03:04:05"}"#,
        )
        .expect("decode");
        let encoded = serde_json::to_string(&session).expect("encode");
        let decoded: Session = serde_json::from_str(&encoded).expect("decode again");
        assert_eq!(decoded, session);
    }

    #[test]
    fn booking_with_only_an_id_defaults_to_pending() {
        let booking: Booking = serde_json::from_str(r#"{"id":55}"#).expect("decode booking");
        assert_eq!(booking.booking_id, BookingId(55));
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(!booking.status.is_paid());
    }

    #[test]
    fn adventure_unit_price_rounds_to_whole_shillings() {
        let adventure: Adventure =
            serde_json::from_str(r#"{"id":102,"title":"Hell's Gate","price":14000.0}"#)
                .expect("decode adventure");
        assert_eq!(adventure.unit_price(), Some(14_000));

        let broken = Adventure {
            price: -1.0,
            ..adventure
        };
        assert_eq!(broken.unit_price(), None);
    }
}
