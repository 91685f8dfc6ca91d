//! Homing outcomes reported by the statusword homing sub-field.

/// Terminal homing sub-field value other than success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum HomingFailure {
    /// Homing was interrupted or never started
    #[error("homing procedure is interrupted or not started")]
    Interrupted,

    /// The home position was found but the target is not reached yet
    #[error("homing is attained, but target is not reached")]
    AttainedNotReached,

    /// The drive reported a homing error while the axis was still moving
    #[error("homing error occurred, velocity is not zero")]
    ErrorVelocityNonZero,

    /// The drive reported a homing error with the axis at rest
    #[error("homing error occurred, velocity is zero")]
    ErrorVelocityZero,
}
