//! Rotation reconcilers
//!
//! [`Reconciler`] drives the per-status rotation pipeline; the version diff
//! and the secret patch live in their own modules so they can be exercised
//! on their own.

mod outcome;
mod rotation;
pub mod secret_patch;
pub mod versions;

pub use outcome::{
    RotationError, RotationEvent, RotationOutcome, SecretObjectError, Stage,
    REASON_FAILED_TO_ROTATE,
};
pub use rotation::*;
