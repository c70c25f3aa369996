//! Placement on the spawn circle around the room origin

use glam::Vec3;
use rand::Rng;

/// Deterministic join slot for the member at `member_index` (0-based).
///
/// Slots are evenly spaced by `360 / capacity` degrees. Two processes that
/// read the member count at the same moment get the same slot.
pub fn spawn_slot(member_index: usize, capacity: usize, radius: f32) -> Vec3 {
    let capacity = capacity.max(1);
    let angle_deg = member_index as f32 * (360.0 / capacity as f32);
    point_on_circle(angle_deg, radius)
}

/// Uniformly random point on the spawn circle, used on respawn
pub fn random_spawn_point<R: Rng>(rng: &mut R, radius: f32) -> Vec3 {
    let angle_deg = rng.gen_range(0.0..360.0);
    point_on_circle(angle_deg, radius)
}

fn point_on_circle(angle_deg: f32, radius: f32) -> Vec3 {
    let theta = angle_deg.to_radians();
    Vec3::new(radius * theta.cos(), 0.0, radius * theta.sin())
}
