//! Domain records and JSON wire shapes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::Rfc3339Seconds;

/// A registered account. `login` is the natural key carried in the token
/// subject; the record is immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
}

/// Lifecycle state of an uploaded order.
///
/// Transitions form a partial order: `New -> Processing -> {Processed |
/// Invalid}`, with `New -> Invalid` also allowed. `Processed` and
/// `Invalid` are terminal; the accrual pipeline never touches an order
/// again once it has reached one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    /// True for statuses from which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized status string coming out of storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status '{0}'")]
pub struct ParseOrderStatusError(pub String);

impl FromStr for OrderStatus {
    type Err = ParseOrderStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(ParseOrderStatusError(other.to_string())),
        }
    }
}

/// An order row as stored: the number, its owner, and where it is in the
/// accrual lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// An order joined with the sum of its accrual entries (0.0 when none).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderWithAccrual {
    pub order: OrderRecord,
    pub accrual: f64,
}

/// Append-only accrual inflow. At most one entry per order.
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualEntry {
    pub order_id: String,
    pub amount: f64,
    pub processed_at: DateTime<Utc>,
}

/// Append-only withdrawal outflow, keyed by its own order number.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalEntry {
    pub order_id: String,
    pub user_id: Uuid,
    pub amount: f64,
    pub processed_at: DateTime<Utc>,
}

// ── JSON wire shapes ────────────────────────────────────────────────────

/// Order as returned by `GET /api/user/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
    pub uploaded_at: Rfc3339Seconds,
}

/// Balance as returned by `GET /api/user/balance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub current: f64,
    pub withdrawn: f64,
}

/// Withdrawal history item for `GET /api/user/withdrawals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalItem {
    pub order: String,
    pub sum: f64,
    pub processed_at: Rfc3339Seconds,
}

/// Registration/login request body. Fields are optional on the wire and
/// validated before use; absence is a 400, not a panic.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub login: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Both fields present and non-empty.
    pub fn validated(&self) -> Option<(&str, &str)> {
        match (self.login.as_deref(), self.password.as_deref()) {
            (Some(l), Some(p)) if !l.is_empty() && !p.is_empty() => Some((l, p)),
            _ => None,
        }
    }
}

/// `POST /api/user/balance/withdraw` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequest {
    pub order: Option<String>,
    pub sum: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Processed.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            OrderStatus::New,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn order_omits_absent_accrual() {
        let order = Order {
            number: "12345678903".into(),
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Rfc3339Seconds(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        };
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("accrual").is_none());
        assert_eq!(json["status"], "NEW");
        assert_eq!(json["uploaded_at"], "2024-01-02T03:04:05Z");
    }

    #[test]
    fn credentials_validation() {
        let ok = Credentials {
            login: Some("u".into()),
            password: Some("p".into()),
        };
        assert_eq!(ok.validated(), Some(("u", "p")));

        let missing = Credentials {
            login: Some("u".into()),
            password: None,
        };
        assert!(missing.validated().is_none());

        let empty = Credentials {
            login: Some("".into()),
            password: Some("p".into()),
        };
        assert!(empty.validated().is_none());
    }
}
