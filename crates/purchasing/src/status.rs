use serde::{Deserialize, Serialize};

use stockroom_core::DomainError;

/// Purchase order status lifecycle.
///
/// ```text
/// draft -> approved -> sent -> partially_received -> received
///   \          \         \
///    +----------+---------+--> cancelled
/// ```
///
/// `received` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    Sent,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub const ALL: [PurchaseOrderStatus; 6] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Approved,
        PurchaseOrderStatus::Sent,
        PurchaseOrderStatus::PartiallyReceived,
        PurchaseOrderStatus::Received,
        PurchaseOrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Approved => "approved",
            PurchaseOrderStatus::Sent => "sent",
            PurchaseOrderStatus::PartiallyReceived => "partially_received",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    /// Legal successors of this status.
    pub fn allowed_transitions(self) -> &'static [PurchaseOrderStatus] {
        use PurchaseOrderStatus::*;
        match self {
            Draft => &[Approved, Cancelled],
            Approved => &[Sent, Cancelled],
            Sent => &[PartiallyReceived, Received, Cancelled],
            PartiallyReceived => &[Received],
            Received | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: PurchaseOrderStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Whether goods may be received against an order in this status.
    pub fn accepts_receipts(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Sent | PurchaseOrderStatus::PartiallyReceived
        )
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PurchaseOrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                DomainError::invalid_argument(format!("unknown purchase order status '{s}'"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PurchaseOrderStatus::*;

    #[test]
    fn transition_table_matches_lifecycle() {
        let expected = [
            (Draft, vec![Approved, Cancelled]),
            (Approved, vec![Sent, Cancelled]),
            (Sent, vec![PartiallyReceived, Received, Cancelled]),
            (PartiallyReceived, vec![Received]),
            (Received, vec![]),
            (Cancelled, vec![]),
        ];

        for (from, allowed) in expected {
            for to in PurchaseOrderStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn only_received_and_cancelled_are_terminal() {
        let terminal: Vec<_> = PurchaseOrderStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![Received, Cancelled]);
    }

    #[test]
    fn status_names_round_trip() {
        for status in PurchaseOrderStatus::ALL {
            assert_eq!(status.as_str().parse::<PurchaseOrderStatus>().unwrap(), status);
        }
        assert!("closed".parse::<PurchaseOrderStatus>().is_err());
    }
}
