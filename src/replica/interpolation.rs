//! Smoothing of remote poses toward the latest received target

use super::{AvatarPose, Transform};

/// Default interpolation gain (per second)
pub const DEFAULT_GAIN: f32 = 10.0;

/// Fraction of the remaining distance covered in one step.
/// Never exceeds 1, so a step cannot overshoot the target.
pub fn smoothing_factor(gain: f32, dt_secs: f32) -> f32 {
    (gain * dt_secs).clamp(0.0, 1.0)
}

/// Lerp position and slerp orientation by `f`
pub fn step_transform(current: Transform, target: Transform, f: f32) -> Transform {
    Transform {
        position: current.position.lerp(target.position, f),
        rotation: current.rotation.slerp(target.rotation, f).normalize(),
    }
}

pub fn step_pose(current: &AvatarPose, target: &AvatarPose, f: f32) -> AvatarPose {
    AvatarPose {
        head: step_transform(current.head, target.head, f),
        left_hand: step_transform(current.left_hand, target.left_hand, f),
        right_hand: step_transform(current.right_hand, target.right_hand, f),
    }
}
