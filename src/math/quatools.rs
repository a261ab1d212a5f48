//! Quat 工具
//!
//! 朝向构造、安全 from-to 旋转与旋转钳制。所有角度参数和返回值
//! 均为度，内部在三角函数调用处转换为弧度。

use glam::{Mat3, Quat, Vec3};

use super::float;

const EPSILON: f32 = 1.0e-8;

/// 带权重短路的归一化线性插值
#[inline]
pub fn lerp(from: Quat, to: Quat, weight: f32) -> Quat {
    if weight <= 0.0 {
        return from;
    }
    if weight >= 1.0 {
        return to;
    }
    from.lerp(to, weight)
}

/// 带权重短路的球面插值
#[inline]
pub fn slerp(from: Quat, to: Quat, weight: f32) -> Quat {
    if weight <= 0.0 {
        return from;
    }
    if weight >= 1.0 {
        return to;
    }
    from.slerp(to, weight)
}

/// 从单位四元数到 q 的线性混合
#[inline]
pub fn linear_blend(q: Quat, weight: f32) -> Quat {
    if weight <= 0.0 {
        return Quat::IDENTITY;
    }
    if weight >= 1.0 {
        return q;
    }
    Quat::IDENTITY.lerp(q, weight)
}

/// 从单位四元数到 q 的球面混合
#[inline]
pub fn spherical_blend(q: Quat, weight: f32) -> Quat {
    if weight <= 0.0 {
        return Quat::IDENTITY;
    }
    if weight >= 1.0 {
        return q;
    }
    Quat::IDENTITY.slerp(q, weight)
}

/// 两个旋转之间的角度（度）
#[inline]
pub fn angle(a: Quat, b: Quat) -> f32 {
    let dot = a.dot(b).abs().min(1.0);
    (2.0 * dot.acos()).to_degrees()
}

/// 绕轴旋转 angle 度
#[inline]
pub fn angle_axis(angle_deg: f32, axis: Vec3) -> Quat {
    let axis = axis.normalize_or_zero();
    if axis.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    Quat::from_axis_angle(axis, angle_deg.to_radians())
}

/// 从旋转 from 到旋转 to 的增量旋转
#[inline]
pub fn from_to_rotation(from: Quat, to: Quat) -> Quat {
    if from.abs_diff_eq(to, 1.0e-7) {
        return Quat::IDENTITY;
    }
    to * from.inverse()
}

/// 从方向 from 到方向 to 的最短弧旋转，退化输入返回单位四元数
pub fn from_to(from: Vec3, to: Vec3) -> Quat {
    let from = from.normalize_or_zero();
    let to = to.normalize_or_zero();
    if from.length_squared() < EPSILON || to.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    // from_rotation_arc 内部处理反向平行的情形
    Quat::from_rotation_arc(from, to)
}

/// 朝向旋转：forward 为 Z+，up 提示竖直方向
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let forward = forward.normalize_or_zero();
    if forward.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }

    let mut up = up.normalize_or_zero();
    if up.length_squared() < EPSILON {
        up = Vec3::Y;
    }

    let mut right = up.cross(forward);
    if right.length_squared() < EPSILON {
        // forward 与 up 共线，任选一条垂直轴
        right = forward.any_orthonormal_vector();
    }
    let right = right.normalize();
    let up = forward.cross(right);

    Quat::from_mat3(&Mat3::from_cols(right, up, forward))
}

/// 固定旋转轴的 from-to 旋转，避开四元数奇点附近轴翻转。
/// axis 传入前应归一化。
pub fn from_to_around_axis(from_direction: Vec3, to_direction: Vec3, axis: Vec3) -> Quat {
    let free = from_to(from_direction, to_direction);
    let (free_axis, mut angle) = free.to_axis_angle();

    if free_axis.dot(axis) < 0.0 {
        angle = -angle;
    }

    Quat::from_axis_angle(axis, angle)
}

/// 将旋转转换到另一个轴空间的修正旋转
#[inline]
pub fn rotation_to_local_space(space: Quat, rotation: Quat) -> Quat {
    (space.inverse() * rotation).inverse()
}

/// 归一化方向向量最接近的坐标轴
pub fn get_axis(v: Vec3) -> Vec3 {
    let mut closest = Vec3::X;
    let mut neg = v.x < 0.0;
    let mut max_abs_dot = v.x.abs();

    let abs_y = v.y.abs();
    if abs_y > max_abs_dot {
        max_abs_dot = abs_y;
        closest = Vec3::Y;
        neg = v.y < 0.0;
    }

    let abs_z = v.z.abs();
    if abs_z > max_abs_dot {
        closest = Vec3::Z;
        neg = v.z < 0.0;
    }

    if neg {
        -closest
    } else {
        closest
    }
}

/// 将旋转向单位四元数钳制，行为与 [`super::v3tools::clamp_direction`] 对应
pub fn clamp_rotation(rotation: Quat, clamp_weight: f32, clamp_smoothing: u32) -> Quat {
    if clamp_weight >= 1.0 {
        return Quat::IDENTITY;
    }
    if clamp_weight <= 0.0 {
        return rotation;
    }

    let angle = angle(Quat::IDENTITY, rotation);
    let dot = 1.0 - angle / 180.0;
    let target_clamp_mlp = float::clamp01(1.0 - (clamp_weight - dot) / (1.0 - dot));
    let mut clamp_mlp = float::clamp01(dot / clamp_weight);

    for _ in 0..clamp_smoothing {
        clamp_mlp = (clamp_mlp * std::f32::consts::FRAC_PI_2).sin();
    }

    Quat::IDENTITY.slerp(rotation, clamp_mlp * target_clamp_mlp)
}

/// 钳制角度值（度）
pub fn clamp_angle(angle_deg: f32, clamp_weight: f32, clamp_smoothing: u32) -> f32 {
    if clamp_weight >= 1.0 {
        return 0.0;
    }
    if clamp_weight <= 0.0 {
        return angle_deg;
    }

    let dot = 1.0 - angle_deg.abs() / 180.0;
    let target_clamp_mlp = float::clamp01(1.0 - (clamp_weight - dot) / (1.0 - dot));
    let mut clamp_mlp = float::clamp01(dot / clamp_weight);

    for _ in 0..clamp_smoothing {
        clamp_mlp = (clamp_mlp * std::f32::consts::FRAC_PI_2).sin();
    }

    float::lerp(0.0, angle_deg, clamp_mlp * target_clamp_mlp)
}

/// 从 from 向 to 旋转，但不超过 max_degrees
pub fn rotate_towards(from: Quat, to: Quat, max_degrees: f32) -> Quat {
    let angle = angle(from, to);
    if angle <= max_degrees || angle < 1.0e-4 {
        return to;
    }
    from.slerp(to, (max_degrees / angle).clamp(0.0, 1.0))
}

/// 匹配两个朝向不同的对象的旋转
pub fn match_rotation(
    target_rotation: Quat,
    target_forward_axis: Vec3,
    target_up_axis: Vec3,
    forward_axis: Vec3,
    up_axis: Vec3,
) -> Quat {
    let f = look_rotation(forward_axis, up_axis);
    let f_target = look_rotation(target_forward_axis, target_up_axis);

    target_rotation * f_target * f.inverse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_quat_eq(a: Quat, b: Quat) {
        // 四元数双覆盖
        assert!(a.dot(b).abs() > 1.0 - 1.0e-5, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_from_to_rotates_exactly() {
        let q = from_to(Vec3::X, Vec3::Y);
        let rotated = q * Vec3::X;
        assert!((rotated - Vec3::Y).length() < 1.0e-5);
    }

    #[test]
    fn test_from_to_degenerate_inputs() {
        assert_quat_eq(from_to(Vec3::ZERO, Vec3::Y), Quat::IDENTITY);
        assert_quat_eq(from_to(Vec3::X, Vec3::X), Quat::IDENTITY);
        // 反向平行也要给出确定的 180 度旋转
        let q = from_to(Vec3::X, Vec3::NEG_X);
        assert!(((q * Vec3::X) - Vec3::NEG_X).length() < 1.0e-4);
    }

    #[test]
    fn test_from_to_rotation_composes() {
        let from = Quat::from_rotation_y(0.3);
        let to = Quat::from_rotation_y(1.1);
        let delta = from_to_rotation(from, to);
        assert_quat_eq(delta * from, to);
    }

    #[test]
    fn test_look_rotation_frame() {
        let q = look_rotation(Vec3::Z, Vec3::Y);
        assert_quat_eq(q, Quat::IDENTITY);

        let q = look_rotation(Vec3::X, Vec3::Y);
        assert!(((q * Vec3::Z) - Vec3::X).length() < 1.0e-5);
        assert!(((q * Vec3::Y) - Vec3::Y).length() < 1.0e-5);
    }

    #[test]
    fn test_look_rotation_collinear_up() {
        // forward 与 up 共线时不产生 NaN
        let q = look_rotation(Vec3::Y, Vec3::Y);
        assert!(q.is_finite());
        assert_relative_eq!(q.length(), 1.0, epsilon = 1.0e-5);
    }

    #[test]
    fn test_angle_degrees() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(angle(a, b), 90.0, epsilon = 1.0e-3);
    }

    #[test]
    fn test_clamp_rotation_extremes() {
        let q = Quat::from_rotation_y(1.0);
        assert_quat_eq(clamp_rotation(q, 1.0, 2), Quat::IDENTITY);
        assert_quat_eq(clamp_rotation(q, 0.0, 2), q);
    }

    #[test]
    fn test_clamp_angle_extremes() {
        assert_relative_eq!(clamp_angle(42.0, 0.0, 2), 42.0);
        assert_relative_eq!(clamp_angle(42.0, 1.0, 2), 0.0);
    }

    #[test]
    fn test_get_axis() {
        assert_eq!(get_axis(Vec3::new(0.9, 0.1, 0.2)), Vec3::X);
        assert_eq!(get_axis(Vec3::new(-0.9, 0.1, 0.2)), Vec3::NEG_X);
        assert_eq!(get_axis(Vec3::new(0.1, 0.2, 0.9)), Vec3::Z);
    }

    #[test]
    fn test_from_to_around_axis_keeps_axis() {
        let q = from_to_around_axis(Vec3::X, Vec3::Z, Vec3::Y);
        let (axis, _) = q.to_axis_angle();
        assert!(axis.dot(Vec3::Y).abs() > 1.0 - 1.0e-4);
    }
}
