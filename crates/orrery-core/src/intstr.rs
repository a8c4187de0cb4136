//! Integer-or-percentage values used by rollout bounds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Either an absolute count or a percentage of a total.
///
/// Serialises as a bare integer or a string such as `"25%"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrPercent {
    /// Absolute value.
    Int(i32),
    /// Percentage string, e.g. `"25%"`.
    Percent(String),
}

impl IntOrPercent {
    /// Resolve against `total`, rounding percentages up or down.
    pub fn scaled_value(&self, total: i32, round_up: bool) -> CoreResult<i32> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Percent(s) => {
                let pct: i64 = s
                    .strip_suffix('%')
                    .and_then(|n| n.trim().parse().ok())
                    .ok_or_else(|| CoreError::InvalidIntOrPercent(s.clone()))?;
                let out_of_range = || CoreError::InvalidIntOrPercent(s.clone());
                let product = pct.checked_mul(i64::from(total)).ok_or_else(out_of_range)?;
                let scaled = if round_up {
                    product.checked_add(99).ok_or_else(out_of_range)?.div_euclid(100)
                } else {
                    product.div_euclid(100)
                };
                i32::try_from(scaled).map_err(|_| out_of_range())
            }
        }
    }
}

impl Default for IntOrPercent {
    fn default() -> Self {
        Self::Percent("25%".to_owned())
    }
}

impl fmt::Display for IntOrPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Percent(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn absolute_values_ignore_total() {
        assert_eq!(IntOrPercent::Int(3).scaled_value(10, true).unwrap(), 3);
    }

    #[test]
    fn percentages_round_in_requested_direction() {
        let quarter = IntOrPercent::Percent("25%".to_owned());
        assert_eq!(quarter.scaled_value(10, true).unwrap(), 3);
        assert_eq!(quarter.scaled_value(10, false).unwrap(), 2);
        assert_eq!(quarter.scaled_value(0, true).unwrap(), 0);
    }

    #[test]
    fn malformed_percentage_is_rejected() {
        let bad = IntOrPercent::Percent("a lot".to_owned());
        assert!(bad.scaled_value(10, true).is_err());
    }

    #[test]
    fn oversized_percentage_is_rejected() {
        let huge = IntOrPercent::Percent("92233720368547758%".to_owned());
        assert!(huge.scaled_value(1000, true).is_err());
        assert!(huge.scaled_value(1000, false).is_err());

        let near_max = IntOrPercent::Percent(format!("{}%", i64::MAX));
        assert!(near_max.scaled_value(1, true).is_err());
    }

    #[test]
    fn deserialises_from_int_or_string() {
        let int: IntOrPercent = serde_json::from_str("2").unwrap();
        assert_eq!(int, IntOrPercent::Int(2));
        let pct: IntOrPercent = serde_json::from_str(r#""50%""#).unwrap();
        assert_eq!(pct, IntOrPercent::Percent("50%".to_owned()));
    }
}
