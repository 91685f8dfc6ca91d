//! Unit tests for the error taxonomy.

use servolink_errors::{ErrorKind, HomingFailure, IoFault, ResultExt, ServoError};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn test_every_kind_has_unique_code() -> TestResult {
    let mut codes: Vec<i32> = ErrorKind::all().map(ErrorKind::code).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), ErrorKind::all().count());
    Ok(())
}

#[test]
fn test_codes_match_integer_convention() -> TestResult {
    assert_eq!(ErrorKind::InvalidArgument.code(), -2);
    assert_eq!(ErrorKind::Timeout.code(), -3);
    assert_eq!(ErrorKind::AlreadyInProgress.code(), -5);
    assert_eq!(ErrorKind::Disconnected.code(), -6);
    assert_eq!(ErrorKind::AccessDenied.code(), -7);
    assert_eq!(ErrorKind::InvalidState.code(), -8);
    assert_eq!(ErrorKind::Io.code(), -9);
    assert_eq!(ErrorKind::NotSupported.code(), -10);
    assert_eq!(ErrorKind::WrongRegister.code(), -11);
    Ok(())
}

#[test]
fn test_homing_failures_are_distinct() -> TestResult {
    let all = [
        HomingFailure::Interrupted,
        HomingFailure::AttainedNotReached,
        HomingFailure::ErrorVelocityNonZero,
        HomingFailure::ErrorVelocityZero,
    ];
    for (i, a) in all.iter().enumerate() {
        for b in all.iter().skip(i + 1) {
            assert_ne!(a, b);
            assert_ne!(a.to_string(), b.to_string());
        }
    }
    let err: ServoError = HomingFailure::ErrorVelocityZero.into();
    assert_eq!(err.kind(), ErrorKind::Failed);
    Ok(())
}

#[test]
fn test_std_error_impl() -> TestResult {
    let err = ServoError::Io(IoFault::ContentMismatch);
    let _: &dyn std::error::Error = &err;
    Ok(())
}

#[test]
fn test_io_error_with_context() -> TestResult {
    let result: Result<(), std::io::Error> = Err(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "serial read",
    ));
    match result.with_context("scan") {
        Err(ServoError::Timeout(msg)) => assert!(msg.starts_with("scan: ")),
        other => return Err(format!("unexpected: {other:?}").into()),
    }
    Ok(())
}
