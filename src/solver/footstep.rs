//! 脚步状态
//!
//! 单只脚的落点插值：记录 step_from / step_to 位姿，
//! 按缓动曲线推进 step_progress，支撑权重做平滑阻尼。

use glam::{Quat, Vec3};

use crate::math::float;
use crate::math::interp::{Interp, InterpolationMode};
use crate::math::quatools;

/// 单脚落步状态机
#[derive(Clone, Debug)]
pub struct Footstep {
    /// 迈步速度（进度 / 秒）
    pub step_speed: f32,
    /// 该脚在角色空间中的站立偏移
    pub character_space_offset: Vec3,

    /// 当前脚位姿（插值结果）
    pub position: Vec3,
    pub rotation: Quat,
    /// 本次落步目标对应的根旋转
    pub step_to_root_rot: Quat,
    pub is_support_leg: bool,

    pub step_progress: f32,
    step_from: Vec3,
    step_to: Vec3,
    step_from_rot: Quat,
    step_to_rot: Quat,
    foot_relative_to_root: Quat,
    support_leg_w: f32,
    support_leg_w_v: f32,
}

impl Footstep {
    pub fn new(
        root_rotation: Quat,
        foot_position: Vec3,
        foot_rotation: Quat,
        character_space_offset: Vec3,
    ) -> Self {
        let mut footstep = Self {
            step_speed: 3.0,
            character_space_offset,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            step_to_root_rot: Quat::IDENTITY,
            is_support_leg: false,
            step_progress: 0.0,
            step_from: Vec3::ZERO,
            step_to: Vec3::ZERO,
            step_from_rot: Quat::IDENTITY,
            step_to_rot: Quat::IDENTITY,
            foot_relative_to_root: Quat::IDENTITY,
            support_leg_w: 0.0,
            support_leg_w_v: 0.0,
        };
        footstep.reset(root_rotation, foot_position, foot_rotation);
        footstep
    }

    #[inline]
    pub fn is_stepping(&self) -> bool {
        self.step_progress < 1.0
    }

    #[inline]
    pub fn step_origin(&self) -> Vec3 {
        self.step_from
    }

    /// 复位到给定位姿，不产生迈步
    pub fn reset(&mut self, root_rotation: Quat, foot_position: Vec3, foot_rotation: Quat) {
        self.position = foot_position;
        self.rotation = foot_rotation;
        self.step_from = self.position;
        self.step_to = self.position;
        self.step_from_rot = self.rotation;
        self.step_to_rot = self.rotation;
        self.step_to_root_rot = root_rotation;
        self.step_progress = 1.0;
        self.foot_relative_to_root = root_rotation.inverse() * self.rotation;
    }

    /// 开始向 p 迈步
    pub fn step_to(&mut self, p: Vec3, root_rotation: Quat) {
        self.step_from = self.position;
        self.step_to = p;
        self.step_from_rot = self.rotation;
        self.step_to_root_rot = root_rotation;
        self.step_to_rot = root_rotation * self.foot_relative_to_root;
        self.step_progress = 0.0;
    }

    /// 迈步中追踪移动的落点
    pub fn update_stepping(&mut self, p: Vec3, root_rotation: Quat, speed: f32, delta_time: f32) {
        self.step_to = self.step_to.lerp(p, delta_time * speed);
        self.step_to_rot = quatools::lerp(
            self.step_to_rot,
            root_rotation * self.foot_relative_to_root,
            delta_time * speed,
        );

        self.step_to_root_rot = self.step_to_rot * self.foot_relative_to_root.inverse();
    }

    /// 站立时随根旋转缓慢回正，超过 min_angle 才开始
    pub fn update_standing(
        &mut self,
        root_rotation: Quat,
        min_angle: f32,
        speed: f32,
        delta_time: f32,
    ) {
        if speed <= 0.0 || min_angle >= 180.0 {
            return;
        }

        let r = root_rotation * self.foot_relative_to_root;
        let angle = quatools::angle(self.rotation, r);

        if angle > min_angle {
            let max_degrees =
                (delta_time * speed * (1.0 - self.support_leg_w)).min(angle - min_angle);
            self.rotation = quatools::rotate_towards(self.rotation, r, max_degrees);
        }
    }

    /// 根旋转突变（瞬移 / 重定向）时同步脚步状态
    pub fn apply_delta_rotation(&mut self, delta: Quat, pivot: Vec3) {
        self.rotation = delta * self.rotation;
        self.step_from_rot = delta * self.step_from_rot;
        self.step_to_rot = delta * self.step_to_rot;
        self.step_to_root_rot = delta * self.step_to_root_rot;

        self.position = pivot + delta * (self.position - pivot);
        self.step_from = pivot + delta * (self.step_from - pivot);
        self.step_to = pivot + delta * (self.step_to - pivot);
    }

    /// 根位置突变时同步脚步状态
    pub fn apply_delta_position(&mut self, delta: Vec3) {
        self.position += delta;
        self.step_from += delta;
        self.step_to += delta;
    }

    /// 推进迈步插值，本帧落地时返回 true
    pub fn update(&mut self, interpolation: InterpolationMode, delta_time: f32) -> bool {
        let support_leg_w_target = if self.is_support_leg { 1.0 } else { 0.0 };
        self.support_leg_w = float::smooth_damp(
            self.support_leg_w,
            support_leg_w_target,
            &mut self.support_leg_w_v,
            0.2,
            delta_time,
        );

        if !self.is_stepping() {
            return false;
        }

        self.step_progress =
            float::move_towards(self.step_progress, 1.0, delta_time * self.step_speed);

        let stepped = self.step_progress >= 1.0;

        let step_progress_smooth = Interp::float(self.step_progress, interpolation);

        self.position = self.step_from.lerp(self.step_to, step_progress_smooth);
        self.rotation = quatools::lerp(self.step_from_rot, self.step_to_rot, step_progress_smooth);

        stepped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reset_is_not_stepping() {
        let footstep = Footstep::new(Quat::IDENTITY, Vec3::new(0.1, 0.0, 0.0), Quat::IDENTITY, Vec3::ZERO);
        assert!(!footstep.is_stepping());
        assert_relative_eq!(footstep.position.x, 0.1, epsilon = 1.0e-6);
    }

    #[test]
    fn test_step_to_starts_stepping() {
        let mut footstep = Footstep::new(Quat::IDENTITY, Vec3::ZERO, Quat::IDENTITY, Vec3::ZERO);
        footstep.step_to(Vec3::new(0.0, 0.0, 0.3), Quat::IDENTITY);
        assert!(footstep.is_stepping());
        assert_relative_eq!(footstep.step_progress, 0.0);
    }

    #[test]
    fn test_update_reaches_target_and_reports_landing() {
        let mut footstep = Footstep::new(Quat::IDENTITY, Vec3::ZERO, Quat::IDENTITY, Vec3::ZERO);
        let target = Vec3::new(0.0, 0.0, 0.3);
        footstep.step_to(target, Quat::IDENTITY);

        // step_speed 3 => 1/3 秒走完
        let mut landed = false;
        for _ in 0..40 {
            if footstep.update(InterpolationMode::InOutCubic, 0.01) {
                landed = true;
                break;
            }
        }
        assert!(landed);
        assert!((footstep.position - target).length() < 1.0e-4);
        assert!(!footstep.is_stepping());
    }

    #[test]
    fn test_update_standing_keeps_rotation_within_min_angle() {
        let mut footstep = Footstep::new(Quat::IDENTITY, Vec3::ZERO, Quat::IDENTITY, Vec3::ZERO);
        let root = Quat::from_rotation_y(10.0_f32.to_radians());

        footstep.update_standing(root, 25.0, 3.0, 0.02);
        // 偏差 10 度，小于阈值 25 度，不动
        assert!(quatools::angle(footstep.rotation, Quat::IDENTITY) < 1.0e-3);
    }

    #[test]
    fn test_update_standing_turns_towards_root_beyond_min_angle() {
        let mut footstep = Footstep::new(Quat::IDENTITY, Vec3::ZERO, Quat::IDENTITY, Vec3::ZERO);
        let root = Quat::from_rotation_y(60.0_f32.to_radians());
        let before = quatools::angle(footstep.rotation, root);

        for _ in 0..10 {
            footstep.update_standing(root, 25.0, 20.0, 0.02);
        }
        let after = quatools::angle(footstep.rotation, root);
        assert!(after < before);
        // 收敛到阈值附近即停
        assert!(after >= 25.0 - 1.0e-2);
    }

    #[test]
    fn test_support_leg_weight_ramps_up() {
        let mut footstep = Footstep::new(Quat::IDENTITY, Vec3::ZERO, Quat::IDENTITY, Vec3::ZERO);
        footstep.is_support_leg = true;
        for _ in 0..100 {
            footstep.update(InterpolationMode::None, 0.02);
        }
        assert!(footstep.support_leg_w > 0.9);
    }
}
