use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Demand observed on one calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandPoint {
    pub date: NaiveDate,
    pub quantity: Decimal,
}

/// Bucket outbound quantities into one point per day over `[from, to]`.
///
/// Days without demand are present with quantity zero; events outside the
/// window are ignored.
pub fn daily_demand<I>(events: I, from: NaiveDate, to: NaiveDate) -> Vec<DemandPoint>
where
    I: IntoIterator<Item = (DateTime<Utc>, Decimal)>,
{
    if from > to {
        return Vec::new();
    }

    let mut totals: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for (at, quantity) in events {
        let day = at.date_naive();
        if day >= from && day <= to {
            *totals.entry(day).or_default() += quantity;
        }
    }

    let mut points = Vec::new();
    let mut day = from;
    while day <= to {
        points.push(DemandPoint {
            date: day,
            quantity: totals.get(&day).copied().unwrap_or_default(),
        });
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn buckets_by_day_and_fills_gaps() {
        let from = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        let events = vec![
            (Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(), dec!(3)),
            (Utc.with_ymd_and_hms(2024, 5, 1, 17, 0, 0).unwrap(), dec!(2)),
            (Utc.with_ymd_and_hms(2024, 5, 3, 9, 0, 0).unwrap(), dec!(7)),
            (Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap(), dec!(100)),
        ];

        let points = daily_demand(events, from, to);
        let quantities: Vec<Decimal> = points.iter().map(|p| p.quantity).collect();

        assert_eq!(points.len(), 4);
        assert_eq!(quantities, vec![dec!(5), dec!(0), dec!(7), dec!(0)]);
        assert_eq!(points[0].date, from);
    }

    #[test]
    fn inverted_window_is_empty() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let earlier = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert!(daily_demand(Vec::new(), day, earlier).is_empty());
    }
}
