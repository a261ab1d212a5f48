//! Vec3 工具
//!
//! 方向插值、平面投影与方向钳制。权重为 0 时原样返回输入，
//! 为 1 时精确返回目标。

use glam::Vec3;

use super::float;

const EPSILON: f32 = 1.0e-8;

/// 带权重短路的线性插值
#[inline]
pub fn lerp(from: Vec3, to: Vec3, weight: f32) -> Vec3 {
    if weight <= 0.0 {
        return from;
    }
    if weight >= 1.0 {
        return to;
    }
    from.lerp(to, weight)
}

/// 方向球面插值，长度线性插值
pub fn slerp(from: Vec3, to: Vec3, weight: f32) -> Vec3 {
    if weight <= 0.0 {
        return from;
    }
    if weight >= 1.0 {
        return to;
    }

    let from_len = from.length();
    let to_len = to.length();
    if from_len < EPSILON || to_len < EPSILON {
        return from.lerp(to, weight);
    }

    let from_dir = from / from_len;
    let to_dir = to / to_len;
    let dot = from_dir.dot(to_dir).clamp(-1.0, 1.0);

    // 近平行或近反向时退化为线性插值
    if dot > 1.0 - 1.0e-6 || dot < -1.0 + 1.0e-6 {
        return from.lerp(to, weight);
    }

    let theta = dot.acos();
    let sin_theta = theta.sin();
    let a = ((1.0 - weight) * theta).sin() / sin_theta;
    let b = (weight * theta).sin() / sin_theta;

    (from_dir * a + to_dir * b) * float::lerp(from_len, to_len, weight)
}

/// 两个向量的夹角（度）
#[inline]
pub fn angle(from: Vec3, to: Vec3) -> f32 {
    let denom = from.length() * to.length();
    if denom < EPSILON {
        return 0.0;
    }
    (from.dot(to) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// 向量在轴上的投影乘以权重
#[inline]
pub fn extract_vertical(v: Vec3, vertical_axis: Vec3, weight: f32) -> Vec3 {
    if weight == 0.0 || vertical_axis.length_squared() < EPSILON {
        return Vec3::ZERO;
    }
    v.project_onto(vertical_axis) * weight
}

/// 向量在法线平面上的投影乘以权重
#[inline]
pub fn extract_horizontal(v: Vec3, normal: Vec3, weight: f32) -> Vec3 {
    if weight == 0.0 || normal.length_squared() < EPSILON {
        return Vec3::ZERO;
    }
    (v - v.project_onto(normal)) * weight
}

/// 将方向钳制到 normal_direction 周围 clamp_weight 的范围内，
/// clamp_smoothing 是结果上应用的正弦平滑迭代次数。
/// 返回钳制后的方向和是否发生了钳制。
pub fn clamp_direction(
    direction: Vec3,
    normal_direction: Vec3,
    clamp_weight: f32,
    clamp_smoothing: u32,
) -> (Vec3, bool) {
    if clamp_weight <= 0.0 {
        return (direction, false);
    }
    if clamp_weight >= 1.0 {
        return (normal_direction, true);
    }

    let angle = angle(normal_direction, direction);
    let dot = 1.0 - angle / 180.0;

    if dot > clamp_weight {
        return (direction, false);
    }

    let target_clamp_mlp = float::clamp01(1.0 - (clamp_weight - dot) / (1.0 - dot));
    let mut clamp_mlp = float::clamp01(dot / clamp_weight);

    for _ in 0..clamp_smoothing {
        clamp_mlp = (clamp_mlp * std::f32::consts::FRAC_PI_2).sin();
    }

    (
        slerp(normal_direction, direction, clamp_mlp * target_clamp_mlp),
        true,
    )
}

/// 射线与平面的交点，方向与平面平行时返回零向量
pub fn line_to_plane(origin: Vec3, direction: Vec3, plane_normal: Vec3, plane_point: Vec3) -> Vec3 {
    let dot = (plane_point - origin).dot(plane_normal);
    let normal_dot = direction.dot(plane_normal);

    if normal_dot == 0.0 {
        return Vec3::ZERO;
    }

    let dist = dot / normal_dot;
    origin + direction.normalize_or_zero() * dist
}

/// 点到平面的投影
pub fn point_to_plane(point: Vec3, plane_position: Vec3, plane_normal: Vec3) -> Vec3 {
    if plane_normal == Vec3::Y {
        return Vec3::new(point.x, plane_position.y, point.z);
    }

    let tangent = point - plane_position;
    plane_position + (tangent - tangent.project_onto_normalized(plane_normal.normalize_or_zero()))
}

/// Gram-Schmidt 正交归一化：normal 归一化，tangent 正交于 normal 并归一化
pub fn ortho_normalize(normal: &mut Vec3, tangent: &mut Vec3) {
    *normal = normal.normalize_or_zero();
    let projected = *tangent - tangent.project_onto_normalized(*normal);
    if projected.length_squared() < EPSILON {
        // tangent 与 normal 平行，任选一条垂直轴
        *tangent = normal.any_orthonormal_vector();
    } else {
        *tangent = projected.normalize();
    }
}
