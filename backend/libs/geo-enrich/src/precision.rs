//! Geo-accuracy precision classes.

use serde::{Deserialize, Serialize};

/// Bucketed accuracy label. The variant order defines quality: a `High` fix
/// may overwrite a `Coarse` one in the presence tables, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionClass {
    Coarse,
    Medium,
    High,
}

impl PrecisionClass {
    /// Classify a reported accuracy radius in meters.
    pub fn from_accuracy_m(accuracy_m: f64) -> Self {
        if accuracy_m < 50.0 {
            PrecisionClass::High
        } else if accuracy_m < 200.0 {
            PrecisionClass::Medium
        } else {
            PrecisionClass::Coarse
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrecisionClass::Coarse => "coarse",
            PrecisionClass::Medium => "medium",
            PrecisionClass::High => "high",
        }
    }

    /// Numeric rank used in SQL comparisons (coarse=0 < medium=1 < high=2).
    pub fn rank(self) -> i16 {
        match self {
            PrecisionClass::Coarse => 0,
            PrecisionClass::Medium => 1,
            PrecisionClass::High => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coarse" => Some(PrecisionClass::Coarse),
            "medium" => Some(PrecisionClass::Medium),
            "high" => Some(PrecisionClass::High),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        assert_eq!(PrecisionClass::from_accuracy_m(0.0), PrecisionClass::High);
        assert_eq!(PrecisionClass::from_accuracy_m(20.0), PrecisionClass::High);
        assert_eq!(PrecisionClass::from_accuracy_m(49.9), PrecisionClass::High);
        assert_eq!(PrecisionClass::from_accuracy_m(50.0), PrecisionClass::Medium);
        assert_eq!(PrecisionClass::from_accuracy_m(199.9), PrecisionClass::Medium);
        assert_eq!(PrecisionClass::from_accuracy_m(200.0), PrecisionClass::Coarse);
        assert_eq!(PrecisionClass::from_accuracy_m(500.0), PrecisionClass::Coarse);
    }

    #[test]
    fn ordering_matches_quality() {
        assert!(PrecisionClass::Coarse < PrecisionClass::Medium);
        assert!(PrecisionClass::Medium < PrecisionClass::High);
        assert!(PrecisionClass::Coarse.rank() < PrecisionClass::High.rank());
    }

    #[test]
    fn string_round_trip() {
        for class in [
            PrecisionClass::Coarse,
            PrecisionClass::Medium,
            PrecisionClass::High,
        ] {
            assert_eq!(PrecisionClass::parse(class.as_str()), Some(class));
        }
        assert_eq!(PrecisionClass::parse("exact"), None);
    }
}
