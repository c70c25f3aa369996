//! Local tracking input, as seen by the replica

use std::time::Duration;

use glam::{Quat, Vec3};

use super::{AvatarPose, Transform};

/// Provides the latest head and hand transforms of the local participant,
/// relative to the rig origin.
pub trait PoseSource: Send {
    fn sample(&mut self, elapsed: Duration) -> AvatarPose;
}

/// A rig that never moves
#[derive(Debug, Clone, Copy)]
pub struct StaticPose(pub AvatarPose);

impl PoseSource for StaticPose {
    fn sample(&mut self, _elapsed: Duration) -> AvatarPose {
        self.0
    }
}

/// Synthetic standing player: head bob and a slow look-around
#[derive(Debug, Clone, Copy)]
pub struct IdleMotion {
    /// Phase offset so several demo players do not move in lockstep
    pub phase: f32,
}

impl IdleMotion {
    const HEAD_HEIGHT: f32 = 1.6;
    const HAND_HEIGHT: f32 = 1.1;
    const HAND_SPREAD: f32 = 0.3;

    pub fn new(phase: f32) -> Self {
        Self { phase }
    }
}

impl PoseSource for IdleMotion {
    fn sample(&mut self, elapsed: Duration) -> AvatarPose {
        let t = elapsed.as_secs_f32() + self.phase;
        let yaw = (t * 0.5).sin() * 0.8;
        let facing = Quat::from_rotation_y(yaw);
        let bob = (t * 2.0).sin() * 0.02;

        let hand = |side: f32| Transform {
            position: Vec3::new(
                side * Self::HAND_SPREAD,
                Self::HAND_HEIGHT + (t * 1.5 + side).sin() * 0.05,
                0.2,
            ),
            rotation: facing,
        };

        AvatarPose {
            head: Transform {
                position: Vec3::new(0.0, Self::HEAD_HEIGHT + bob, 0.0),
                rotation: facing,
            },
            left_hand: hand(-1.0),
            right_hand: hand(1.0),
        }
    }
}
