use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(CaseStatus {
    New => "new",
    Processing => "processing",
    PendingInfo => "pending-info",
    Eligible => "eligible",
    Scheduled => "scheduled",
    Completed => "completed",
});

str_enum!(CasePriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

str_enum!(EligibilityStatus {
    Pending => "pending",
    Eligible => "eligible",
    NotEligible => "not-eligible",
    NeedsReview => "needs-review",
});

str_enum!(DocumentStatus {
    Uploaded => "uploaded",
    Processing => "processing",
    Processed => "processed",
    Failed => "failed",
});

str_enum!(RuleCheckStatus {
    Pending => "pending",
    Valid => "valid",
    NeedsMoreInformation => "needs_more_information",
    Deny => "deny",
});

/// How incoming additional-data fields combine with a patient's existing bag.
str_enum!(MergeStrategy {
    Replace => "replace",
    Merge => "merge",
    Append => "append",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rule_check_status_round_trips() {
        for s in ["pending", "valid", "needs_more_information", "deny"] {
            assert_eq!(RuleCheckStatus::from_str(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn unknown_status_is_invalid_enum() {
        let err = RuleCheckStatus::from_str("approved").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn case_status_uses_hyphenated_values() {
        assert_eq!(CaseStatus::PendingInfo.as_str(), "pending-info");
        assert_eq!(
            CaseStatus::from_str("pending-info").unwrap(),
            CaseStatus::PendingInfo
        );
    }
}
