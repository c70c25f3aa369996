//! Fixed-order avatar snapshot codec
//!
//! Layout (little endian, no tag, no version):
//! head pos (3×f32), head rot (4×f32 xyzw), left pos, left rot,
//! right pos, right rot, health (i32), kill count (i32).
//! The receiver decodes by position, so any change here is breaking.

use bytes::{Buf, BufMut, BytesMut};
use glam::{Quat, Vec3};

use super::{AvatarPose, Transform};

/// Encoded size of one transform
const TRANSFORM_LEN: usize = 7 * 4;
/// Encoded size of a full snapshot
pub const SNAPSHOT_LEN: usize = 3 * TRANSFORM_LEN + 2 * 4;

/// State carried by one snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvatarSnapshot {
    pub pose: AvatarPose,
    pub health: i32,
    pub kill_count: i32,
}

/// Snapshot decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("snapshot has {0} trailing bytes")]
    TrailingBytes(usize),
}

impl AvatarSnapshot {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(SNAPSHOT_LEN);
        put_transform(buf, &self.pose.head);
        put_transform(buf, &self.pose.left_hand);
        put_transform(buf, &self.pose.right_hand);
        buf.put_i32_le(self.health);
        buf.put_i32_le(self.kill_count);
    }

    #[cfg(test)]
    pub fn encode(&self) -> bytes::Bytes {
        let mut buf = BytesMut::with_capacity(SNAPSHOT_LEN);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.len() < SNAPSHOT_LEN {
            return Err(SnapshotError::Truncated {
                expected: SNAPSHOT_LEN,
                actual: bytes.len(),
            });
        }
        if bytes.len() > SNAPSHOT_LEN {
            return Err(SnapshotError::TrailingBytes(bytes.len() - SNAPSHOT_LEN));
        }

        let head = get_transform(&mut bytes);
        let left_hand = get_transform(&mut bytes);
        let right_hand = get_transform(&mut bytes);
        let health = bytes.get_i32_le();
        let kill_count = bytes.get_i32_le();

        Ok(Self {
            pose: AvatarPose {
                head,
                left_hand,
                right_hand,
            },
            health,
            kill_count,
        })
    }
}

/// Snapshot traffic counters for status reporting
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SnapshotStats {
    pub sent: u64,
    pub received: u64,
    pub rejected: u64,
    pub bytes_sent: u64,
}

impl SnapshotStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self) {
        self.received += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }
}

fn put_transform(buf: &mut BytesMut, t: &Transform) {
    buf.put_f32_le(t.position.x);
    buf.put_f32_le(t.position.y);
    buf.put_f32_le(t.position.z);
    buf.put_f32_le(t.rotation.x);
    buf.put_f32_le(t.rotation.y);
    buf.put_f32_le(t.rotation.z);
    buf.put_f32_le(t.rotation.w);
}

fn get_transform(bytes: &mut &[u8]) -> Transform {
    let position = Vec3::new(bytes.get_f32_le(), bytes.get_f32_le(), bytes.get_f32_le());
    let rotation = Quat::from_xyzw(
        bytes.get_f32_le(),
        bytes.get_f32_le(),
        bytes.get_f32_le(),
        bytes.get_f32_le(),
    );
    Transform { position, rotation }
}
