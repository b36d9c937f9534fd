//! Payment records and the access window they open.
//!
//! Paying buys a time-bounded allow-list grant. The grant is never reported by
//! the server, so the client derives it: the window opens at the record's
//! `created_at` and closes `whitelist_duration` later. Every decision about
//! whether to pay again hinges on [`AccessWindow::state_at`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::money_amount::MoneyAmount;
use crate::timestamp::UnixTimestamp;
use crate::transaction::TransactionId;

/// A completed transfer. Replaced, never mutated, when a new cycle pays again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub transaction_id: TransactionId,
    pub address: String,
    pub amount: MoneyAmount,
    pub created_at: UnixTimestamp,
}

impl PaymentRecord {
    /// The access window this payment opened.
    pub fn window(&self, whitelist_duration: Duration) -> AccessWindow {
        AccessWindow {
            opened_at: self.created_at,
            duration: whitelist_duration,
        }
    }
}

/// Validity interval of the current allow-list grant: `[opened_at, opened_at + duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessWindow {
    pub opened_at: UnixTimestamp,
    pub duration: Duration,
}

impl AccessWindow {
    pub fn expires_at(&self) -> UnixTimestamp {
        self.opened_at + self.duration
    }

    /// Expired once `now - opened_at >= duration`.
    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        now.saturating_since(self.opened_at) >= self.duration
    }

    pub fn remaining_at(&self, now: UnixTimestamp) -> Duration {
        self.duration
            .saturating_sub(now.saturating_since(self.opened_at))
    }

    pub fn state_at(&self, now: UnixTimestamp) -> WindowState {
        if self.is_expired_at(now) {
            WindowState::Expired
        } else {
            WindowState::Valid
        }
    }
}

/// Access window as seen by the payment decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowState {
    /// Nothing was paid yet in this controller.
    Absent,
    Valid,
    Expired,
}

impl WindowState {
    pub fn of(window: Option<&AccessWindow>, now: UnixTimestamp) -> Self {
        window.map_or(WindowState::Absent, |w| w.state_at(now))
    }

    /// Absent and expired windows both mean the grant is not in force.
    pub fn is_lapsed(&self) -> bool {
        !matches!(self, WindowState::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_at(created_at: UnixTimestamp) -> PaymentRecord {
        PaymentRecord {
            transaction_id: TransactionId::from_hash([7; 32]),
            address: "0xaa".to_string(),
            amount: MoneyAmount::parse("0.01").unwrap(),
            created_at,
        }
    }

    #[test]
    fn test_fixed_window_check() {
        let t0 = UnixTimestamp::from_secs(1_700_000_000);
        let window = record_at(t0).window(Duration::from_secs(60));
        assert!(!window.is_expired_at(t0 + Duration::from_secs(5)));
        assert!(window.is_expired_at(t0 + Duration::from_secs(65)));
        assert_eq!(window.expires_at(), t0 + Duration::from_secs(60));
        assert_eq!(
            window.remaining_at(t0 + Duration::from_secs(5)),
            Duration::from_secs(55)
        );
    }

    #[test]
    fn test_boundary_is_expired() {
        let t0 = UnixTimestamp::from_secs(10);
        let window = record_at(t0).window(Duration::from_secs(60));
        assert!(!window.is_expired_at(t0 + Duration::from_millis(59_999)));
        assert!(window.is_expired_at(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_clock_before_window_is_valid() {
        let t0 = UnixTimestamp::from_secs(100);
        let window = record_at(t0).window(Duration::from_secs(60));
        assert_eq!(window.state_at(UnixTimestamp::from_secs(50)), WindowState::Valid);
    }

    #[test]
    fn test_window_state_of() {
        let now = UnixTimestamp::from_secs(100);
        assert_eq!(WindowState::of(None, now), WindowState::Absent);
        assert!(WindowState::Absent.is_lapsed());
        assert!(WindowState::Expired.is_lapsed());
        assert!(!WindowState::Valid.is_lapsed());
    }

    proptest! {
        #[test]
        fn prop_window_round_trip(
            created in 0u64..4_000_000_000_000,
            duration_ms in 1u64..86_400_000,
            offset in 0u64..172_800_000,
        ) {
            let t = UnixTimestamp::from_millis(created);
            let window = record_at(t).window(Duration::from_millis(duration_ms));
            let queried = UnixTimestamp::from_millis(created + offset);
            prop_assert_eq!(window.is_expired_at(queried), offset >= duration_ms);
        }
    }
}
