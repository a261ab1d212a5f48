//! 数值校验检查点
//!
//! 读入、链操作和写出处统一校验四元数。debug 构建直接断言，
//! release 构建重归一化并告警后继续。

use glam::{Quat, Vec3};

const UNIT_TOLERANCE: f32 = 1.0e-3;

/// 校验四元数为有限单位四元数
///
/// context 标识调用位置，用于日志定位。
#[inline]
pub fn checked_quat(q: Quat, context: &'static str) -> Quat {
    debug_assert!(
        q.is_finite() && (q.length_squared() - 1.0).abs() < UNIT_TOLERANCE,
        "corrupt quaternion at {}: {:?}",
        context,
        q
    );

    if !q.is_finite() || q.length_squared() < UNIT_TOLERANCE {
        log::warn!("[VRIK] {} 处四元数损坏，重置为单位四元数", context);
        return Quat::IDENTITY;
    }

    if (q.length_squared() - 1.0).abs() > UNIT_TOLERANCE {
        log::warn!("[VRIK] {} 处四元数偏离单位长度，已重归一化", context);
        return q.normalize();
    }

    q
}

/// 校验向量为有限值
#[inline]
pub fn checked_vec3(v: Vec3, context: &'static str) -> Vec3 {
    debug_assert!(v.is_finite(), "corrupt vector at {}: {:?}", context, v);

    if !v.is_finite() {
        log::warn!("[VRIK] {} 处向量损坏，重置为零向量", context);
        return Vec3::ZERO;
    }

    v
}
