//! `--sample` parsing
//!
//! Format: `name:rate[,name:rate...]` where `name` is an event short name
//! (`casgstatus`, `makeslice`, `makemap`, `newobject`, `newgoroutine`,
//! `goexit`) and `rate` a probability in `[0, 1]`. Rates become integer
//! percentages for the `SAMPLING_RATES` eBPF map.

use std::collections::BTreeMap;
use std::str::FromStr;

use xgotop_common::EventType;

use crate::domain::SamplingError;

/// Per-event-type admission percentages (0-100)
///
/// Types without an entry keep the in-kernel default of 100.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplingRates(BTreeMap<EventType, u32>);

impl SamplingRates {
    #[must_use]
    pub fn get(&self, event_type: EventType) -> Option<u32> {
        self.0.get(&event_type).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventType, u32)> + '_ {
        self.0.iter().map(|(ty, pct)| (*ty, *pct))
    }
}

impl FromStr for SamplingRates {
    type Err = SamplingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_sampling_rates(s)
    }
}

/// Parse a `--sample` value.
///
/// Names and rates are trimmed, later duplicates override earlier ones, and
/// rates are rounded half away from zero (`0.005` → 1%, `0.001` → 0%).
///
/// # Errors
/// - [`SamplingError::InvalidFormat`] unless a pair has exactly one `:`
/// - [`SamplingError::UnknownEvent`] for an unrecognised name
/// - [`SamplingError::InvalidRate`] if the rate is not a number
/// - [`SamplingError::OutOfRange`] if the rate is outside `[0, 1]`
pub fn parse_sampling_rates(input: &str) -> Result<SamplingRates, SamplingError> {
    let mut rates = BTreeMap::new();
    if input.is_empty() {
        return Ok(SamplingRates(rates));
    }

    for pair in input.split(',') {
        let mut parts = pair.split(':');
        let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(SamplingError::InvalidFormat(pair.to_string()));
        };

        let name = name.trim();
        let event_type =
            EventType::from_name(name).ok_or_else(|| SamplingError::UnknownEvent(name.to_string()))?;

        let rate: f64 = value.trim().parse().map_err(|e: std::num::ParseFloatError| {
            SamplingError::InvalidRate { name: name.to_string(), reason: e.to_string() }
        })?;

        if !(0.0..=1.0).contains(&rate) {
            return Err(SamplingError::OutOfRange(rate));
        }

        rates.insert(event_type, to_percentage(rate));
    }

    Ok(SamplingRates(rates))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_percentage(rate: f64) -> u32 {
    // f64::round rounds half away from zero; rate is within [0, 1]
    (rate * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(pairs: &[(EventType, u32)]) -> SamplingRates {
        SamplingRates(pairs.iter().copied().collect())
    }

    #[test]
    fn test_single_rates() {
        assert_eq!(parse_sampling_rates("makemap:0.01"), Ok(rates(&[(EventType::AllocateMap, 1)])));
        assert_eq!(
            parse_sampling_rates("newgoroutine:0.1"),
            Ok(rates(&[(EventType::GoroutineCreated, 10)]))
        );
        assert_eq!(
            parse_sampling_rates("newobject:1.0"),
            Ok(rates(&[(EventType::AllocateObject, 100)]))
        );
        assert_eq!(parse_sampling_rates("makemap:0"), Ok(rates(&[(EventType::AllocateMap, 0)])));
    }

    #[test]
    fn test_all_event_names() {
        let parsed = parse_sampling_rates(
            "casgstatus:0.05,makeslice:0.1,makemap:0.2,newobject:0.5,newgoroutine:0.8,goexit:0.95",
        )
        .unwrap();
        assert_eq!(
            parsed,
            rates(&[
                (EventType::StatusChange, 5),
                (EventType::AllocateSlice, 10),
                (EventType::AllocateMap, 20),
                (EventType::AllocateObject, 50),
                (EventType::GoroutineCreated, 80),
                (EventType::GoroutineExited, 95),
            ])
        );
    }

    #[test]
    fn test_rounding() {
        assert_eq!(parse_sampling_rates("makemap:0.001").unwrap().get(EventType::AllocateMap), Some(0));
        assert_eq!(parse_sampling_rates("makemap:0.005").unwrap().get(EventType::AllocateMap), Some(1));
        assert_eq!(
            parse_sampling_rates("makemap:0.123456789").unwrap().get(EventType::AllocateMap),
            Some(12)
        );
    }

    #[test]
    fn test_whitespace_and_duplicates() {
        assert_eq!(
            parse_sampling_rates(" makemap : 0.5 , newgoroutine : 0.1 "),
            Ok(rates(&[(EventType::AllocateMap, 50), (EventType::GoroutineCreated, 10)]))
        );
        assert_eq!(
            parse_sampling_rates("makemap:0.1,makemap:0.5"),
            Ok(rates(&[(EventType::AllocateMap, 50)]))
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_sampling_rates("").unwrap().is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_sampling_rates("makemap0.5"), Err(SamplingError::InvalidFormat(_))));
        assert!(matches!(
            parse_sampling_rates("makemap:0.5:extra"),
            Err(SamplingError::InvalidFormat(_))
        ));
        assert_eq!(
            parse_sampling_rates(":0.5"),
            Err(SamplingError::UnknownEvent(String::new()))
        );
        assert_eq!(
            parse_sampling_rates("nonexistent:0.5"),
            Err(SamplingError::UnknownEvent("nonexistent".to_string()))
        );
        assert!(matches!(
            parse_sampling_rates("makemap:"),
            Err(SamplingError::InvalidRate { ref name, .. }) if name == "makemap"
        ));
        assert!(matches!(
            parse_sampling_rates("makemap:abc"),
            Err(SamplingError::InvalidRate { .. })
        ));
        assert_eq!(parse_sampling_rates("makemap:1.1"), Err(SamplingError::OutOfRange(1.1)));
        assert_eq!(parse_sampling_rates("makemap:-0.1"), Err(SamplingError::OutOfRange(-0.1)));
    }

    #[test]
    fn test_error_messages() {
        let err = parse_sampling_rates("makemap:abc").unwrap_err();
        assert!(err.to_string().starts_with("invalid rate for makemap"));
        let err = parse_sampling_rates("makemap:2").unwrap_err();
        assert!(err.to_string().contains("must be between 0 and 1"));
    }
}
