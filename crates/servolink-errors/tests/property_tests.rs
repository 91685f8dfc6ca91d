//! Property-based tests for error code stability.

use proptest::prelude::*;
use servolink_errors::{ErrorKind, ErrorSeverity, ServoError};

proptest! {
    #[test]
    fn test_from_code_inverts_code(code in -20i32..=5) {
        if let Some(kind) = ErrorKind::from_code(code) {
            prop_assert_eq!(kind.code(), code);
        } else {
            prop_assert!(ErrorKind::all().all(|k| k.code() != code));
        }
    }

    #[test]
    fn test_codes_always_negative(msg in "[a-z ]{0,24}") {
        let errors = [
            ServoError::invalid_argument(msg.clone()),
            ServoError::timeout(msg.clone()),
            ServoError::already_in_progress(msg.clone()),
            ServoError::disconnected(msg.clone()),
            ServoError::access_denied(msg.clone()),
            ServoError::invalid_state(msg.clone()),
            ServoError::not_supported(msg.clone()),
            ServoError::framing(msg),
        ];
        for err in errors {
            prop_assert!(err.code() < 0);
        }
    }

    #[test]
    fn test_recoverable_matches_severity(msg in "[a-z]{1,12}") {
        let err = ServoError::disconnected(msg);
        prop_assert_eq!(err.severity(), ErrorSeverity::Critical);
        prop_assert!(!err.is_recoverable());
    }
}
