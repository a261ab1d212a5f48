//! 关节旋转限制
//!
//! 单自由度限制与扭转限制，相对绑定时捕获的默认局部旋转生效。

use glam::{Quat, Vec3};

use crate::math::{quatools, v3tools};

/// 把旋转限制到绕 axis 的单自由度
pub fn limit_1dof(rotation: Quat, axis: Vec3) -> Quat {
    quatools::from_to(rotation * axis, axis) * rotation
}

/// 对旋转施加均匀扭转限制
///
/// axis 为主轴，ortho_axis 为参考正交轴，twist_limit 单位为度。
pub fn limit_twist(rotation: Quat, axis: Vec3, ortho_axis: Vec3, twist_limit: f32) -> Quat {
    let twist_limit = twist_limit.clamp(0.0, 180.0);
    if twist_limit >= 180.0 {
        return rotation;
    }

    let mut normal = rotation * axis;
    let mut ortho_tangent = ortho_axis;
    v3tools::ortho_normalize(&mut normal, &mut ortho_tangent);

    let mut rotated_ortho_tangent = rotation * ortho_axis;
    v3tools::ortho_normalize(&mut normal, &mut rotated_ortho_tangent);

    let fixed_rotation = quatools::from_to(rotated_ortho_tangent, ortho_tangent) * rotation;

    if twist_limit <= 0.0 {
        return fixed_rotation;
    }

    // 从零扭转向自由扭转旋转不超过限制角
    quatools::rotate_towards(fixed_rotation, rotation, twist_limit)
}

/// 单骨骼的旋转限制配置
///
/// 零旋转点映射到绑定时的局部旋转。
#[derive(Clone, Copy, Debug)]
pub struct RotationLimit {
    /// 限制主轴（局部空间）
    pub axis: Vec3,
    /// 绕主轴的扭转限制（度），180 表示不限制扭转
    pub twist_limit: f32,
    /// 绑定时捕获的默认局部旋转
    pub default_local_rotation: Quat,
}

impl RotationLimit {
    pub fn new(axis: Vec3, twist_limit: f32) -> Self {
        Self {
            axis,
            twist_limit,
            default_local_rotation: Quat::IDENTITY,
        }
    }

    /// 把零旋转点映射到当前局部旋转
    pub fn set_default_local_rotation(&mut self, local_rotation: Quat) {
        self.default_local_rotation = local_rotation;
    }

    /// 交换坐标分量得到的任意副轴
    #[inline]
    pub fn secondary_axis(&self) -> Vec3 {
        Vec3::new(self.axis.y, self.axis.z, self.axis.x)
    }

    /// 限制局部旋转，返回限制结果和是否发生了改变
    pub fn limited_local_rotation(&self, local_rotation: Quat) -> (Quat, bool) {
        // 先去掉默认旋转
        let rotation = self.default_local_rotation.inverse() * local_rotation;

        let limited = limit_twist(
            limit_1dof(rotation, self.axis),
            self.axis,
            self.secondary_axis(),
            self.twist_limit,
        );

        if limited.abs_diff_eq(rotation, 1.0e-6) {
            return (local_rotation, false);
        }

        (self.default_local_rotation * limited, true)
    }
}
