//! 手臂求解
//!
//! 四段解析手臂链：肩部 yaw/pitch 或 from-to 两种模式、
//! 弯曲法线启发式、前臂扭转修正与手部旋转混合。

use glam::{Quat, Vec3};

use crate::math::float;
use crate::math::interp::{Interp, InterpolationMode};
use crate::math::{quatools, v3tools};
use crate::skeleton::Pose;

use super::body_part::BodyPart;
use super::virtual_bone::VirtualBone;

/// 肩部旋转技术
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShoulderRotationMode {
    #[default]
    YawPitch,
    FromTo,
}

/// 手臂求解器
#[derive(Clone, Debug)]
pub struct Arm {
    pub part: BodyPart,

    /// 手部目标（每帧由宿主写入）
    pub target: Option<Pose>,
    /// 肘部弯向的目标点
    pub bend_goal: Option<Vec3>,

    /// 手部目标位置权重
    pub position_weight: f32,
    /// 手部目标旋转权重
    pub rotation_weight: f32,
    /// 肩部旋转技术
    pub shoulder_rotation_mode: ShoulderRotationMode,
    /// 肩部旋转权重
    pub shoulder_rotation_weight: f32,
    /// 肘部弯向 bend_goal 的权重
    pub bend_goal_weight: f32,
    /// 肘部弯曲方向的角度偏移（度）
    pub swivel_offset: f32,

    /// 手骨上从手腕指向手掌的局部轴，定义手骨朝向
    pub wrist_to_palm_axis: Vec3,
    /// 手骨上从手掌指向拇指的局部轴，定义手骨朝向
    pub palm_to_thumb_axis: Vec3,

    /// 手部目标位姿（赋值 target 时被覆盖）
    pub ik_position: Vec3,
    pub ik_rotation: Quat,

    /// 肘部弯曲方向，bend_goal 赋值时被覆盖
    pub bend_direction: Vec3,

    /// 手部位置偏移，每帧复位
    pub hand_position_offset: Vec3,

    /// 手部目标位置 / 旋转（求解期间维护）
    pub position: Vec3,
    pub rotation: Quat,

    pub has_shoulder: bool,

    chest_forward_axis: Vec3,
    chest_up_axis: Vec3,
    chest_rotation: Quat,
    chest_forward: Vec3,
    chest_up: Vec3,
    forearm_rel_to_upper_arm: Quat,

    yaw_offset_angle: f32,
    pitch_offset_angle: f32,

    warned: bool,
}

impl Default for Arm {
    fn default() -> Self {
        Self {
            part: BodyPart::default(),
            target: None,
            bend_goal: None,
            position_weight: 1.0,
            rotation_weight: 1.0,
            shoulder_rotation_mode: ShoulderRotationMode::YawPitch,
            shoulder_rotation_weight: 1.0,
            bend_goal_weight: 0.0,
            swivel_offset: 0.0,
            wrist_to_palm_axis: Vec3::ZERO,
            palm_to_thumb_axis: Vec3::ZERO,
            ik_position: Vec3::ZERO,
            ik_rotation: Quat::IDENTITY,
            bend_direction: Vec3::NEG_Z,
            hand_position_offset: Vec3::ZERO,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            has_shoulder: false,
            chest_forward_axis: Vec3::ZERO,
            chest_up_axis: Vec3::ZERO,
            chest_rotation: Quat::IDENTITY,
            chest_forward: Vec3::Z,
            chest_up: Vec3::Y,
            forearm_rel_to_upper_arm: Quat::IDENTITY,
            yaw_offset_angle: 45.0,
            pitch_offset_angle: -30.0,
            warned: false,
        }
    }
}

impl Arm {
    #[inline]
    fn upper_arm_index(&self) -> usize {
        usize::from(self.has_shoulder)
    }

    #[inline]
    pub fn shoulder(&self) -> &VirtualBone {
        &self.part.bones[0]
    }

    #[inline]
    pub fn upper_arm(&self) -> &VirtualBone {
        &self.part.bones[self.upper_arm_index()]
    }

    #[inline]
    pub fn forearm(&self) -> &VirtualBone {
        &self.part.bones[self.upper_arm_index() + 1]
    }

    #[inline]
    pub fn hand(&self) -> &VirtualBone {
        &self.part.bones[self.upper_arm_index() + 2]
    }

    /// 从读缓冲读入手臂链
    pub fn read(
        &mut self,
        positions: &[Vec3],
        rotations: &[Quat],
        has_shoulders: bool,
        root_index: usize,
        index: usize,
    ) {
        self.part
            .begin_read(positions[root_index], rotations[root_index], index);

        let shoulder_pos = positions[index];
        let shoulder_rot = rotations[index];
        let upper_arm_pos = positions[index + 1];
        let upper_arm_rot = rotations[index + 1];
        let forearm_pos = positions[index + 2];
        let forearm_rot = rotations[index + 2];
        let hand_pos = positions[index + 3];
        let hand_rot = rotations[index + 3];

        if !self.part.initiated {
            self.ik_position = hand_pos;
            self.ik_rotation = hand_rot;
            self.rotation = self.ik_rotation;

            self.has_shoulder = has_shoulders;

            let mut bones = Vec::with_capacity(if has_shoulders { 4 } else { 3 });
            if has_shoulders {
                bones.push(VirtualBone::new(shoulder_pos, shoulder_rot));
            }
            bones.push(VirtualBone::new(upper_arm_pos, upper_arm_rot));
            bones.push(VirtualBone::new(forearm_pos, forearm_rot));
            bones.push(VirtualBone::new(hand_pos, hand_rot));
            self.part.bones = bones;

            // 胸部局部的前 / 上轴，求解时重建胸部朝向
            self.chest_forward_axis =
                self.part.root_rotation.inverse() * (rotations[0] * Vec3::Z);
            self.chest_up_axis = self.part.root_rotation.inverse() * (rotations[0] * Vec3::Y);
        }

        if self.has_shoulder {
            self.part.bones[0].read(shoulder_pos, shoulder_rot);
            self.part.bones[1].read(upper_arm_pos, upper_arm_rot);
            self.part.bones[2].read(forearm_pos, forearm_rot);
            self.part.bones[3].read(hand_pos, hand_rot);
        } else {
            self.part.bones[0].read(upper_arm_pos, upper_arm_rot);
            self.part.bones[1].read(forearm_pos, forearm_rot);
            self.part.bones[2].read(hand_pos, hand_rot);
        }

        self.part.finish_read();
    }

    pub fn pre_solve(&mut self) {
        match self.target {
            Some(target) => {
                self.ik_position = target.position;
                self.ik_rotation = target.rotation;
            }
            None => {
                if !self.warned && self.position_weight > 0.0 {
                    self.warned = true;
                    log::warn!("[VRIK] 手臂目标未设置，使用读入位姿");
                }
            }
        }

        self.position = v3tools::lerp(
            self.hand().solver_position,
            self.ik_position,
            self.position_weight,
        );
        self.rotation = quatools::lerp(
            self.hand().solver_rotation,
            self.ik_rotation,
            self.rotation_weight,
        );

        if self.has_shoulder {
            self.part.bones[0].axis = self.part.bones[0].axis.normalize_or_zero();
        }
        self.forearm_rel_to_upper_arm =
            self.upper_arm().solver_rotation.inverse() * self.forearm().solver_rotation;
    }

    pub fn apply_offsets(&mut self) {
        self.position += self.hand_position_offset;
    }

    /// 手臂主求解，is_left 区分左右镜像
    pub fn solve(&mut self, is_left: bool) {
        self.chest_rotation = quatools::look_rotation(
            self.part.root_rotation * self.chest_forward_axis,
            self.part.root_rotation * self.chest_up_axis,
        );
        self.chest_forward = self.chest_rotation * Vec3::Z;
        self.chest_up = self.chest_rotation * Vec3::Y;

        if self.has_shoulder && self.shoulder_rotation_weight > 0.0 {
            match self.shoulder_rotation_mode {
                ShoulderRotationMode::YawPitch => self.solve_shoulder_yaw_pitch(is_left),
                ShoulderRotationMode::FromTo => self.solve_shoulder_from_to(is_left),
            }
        } else {
            let ua = self.upper_arm_index();
            let position = self.position;
            let bend_normal = self.bend_normal(position - self.upper_arm().solver_position);
            let position_weight = self.position_weight;
            VirtualBone::solve_trigonometric(
                &mut self.part.bones,
                ua,
                ua + 1,
                ua + 2,
                position,
                bend_normal,
                position_weight,
            );
        }

        // 前臂扭转修正：相对上臂恢复读入的扭转
        let forearm_fixed = self.upper_arm().solver_rotation * self.forearm_rel_to_upper_arm;
        let from_to = quatools::from_to(
            forearm_fixed * self.forearm().axis,
            self.hand().solver_position - self.forearm().solver_position,
        );
        let forearm_index = self.upper_arm_index() + 1;
        let position_weight = self.position_weight;
        self.part
            .rotate_to(forearm_index, from_to * forearm_fixed, position_weight);

        // 手部旋转
        let hand_index = self.upper_arm_index() + 2;
        if self.rotation_weight >= 1.0 {
            self.part.bones[hand_index].solver_rotation = self.rotation;
        } else if self.rotation_weight > 0.0 {
            let rotation = self.rotation;
            let rotation_weight = self.rotation_weight;
            let hand = &mut self.part.bones[hand_index];
            hand.solver_rotation = hand.solver_rotation.lerp(rotation, rotation_weight);
        }
    }

    fn solve_shoulder_yaw_pitch(&mut self, is_left: bool) {
        let s_dir = (self.position - self.shoulder().solver_position).normalize_or_zero();

        // 肩部 yaw
        let y_oa = if is_left {
            self.yaw_offset_angle
        } else {
            -self.yaw_offset_angle
        };
        let yaw_offset = quatools::angle_axis(
            if is_left { -90.0 } else { 90.0 } + y_oa,
            self.chest_up,
        );
        let working_space = yaw_offset * self.chest_rotation;

        let s_dir_working = working_space.inverse() * s_dir;

        let mut yaw = s_dir_working.x.atan2(s_dir_working.z).to_degrees();

        let dot_y = 1.0 - s_dir_working.dot(Vec3::Y).abs();
        yaw *= dot_y;

        yaw -= y_oa;
        yaw = Self::damper_value(yaw, -45.0 - y_oa, 45.0 - y_oa, 0.7);

        let f = self.shoulder().solver_rotation * self.shoulder().axis;
        let t = working_space * (quatools::angle_axis(yaw, Vec3::Y) * Vec3::Z);
        let yaw_rotation = quatools::from_to(f, t);

        // 肩部 pitch
        let pitch_offset =
            quatools::angle_axis(if is_left { -90.0 } else { 90.0 }, self.chest_up);
        let mut working_space = pitch_offset * self.chest_rotation;
        working_space = quatools::angle_axis(
            if is_left {
                self.pitch_offset_angle
            } else {
                -self.pitch_offset_angle
            },
            self.chest_forward,
        ) * working_space;

        let side = if is_left { Vec3::X } else { Vec3::NEG_X };
        let s_dir = self.position
            - (self.shoulder().solver_position + self.chest_rotation * side * self.part.mag);
        let s_dir_working = working_space.inverse() * s_dir;

        let mut pitch = s_dir_working.y.atan2(s_dir_working.z).to_degrees();

        pitch -= self.pitch_offset_angle;
        pitch = Self::damper_value(
            pitch,
            -45.0 - self.pitch_offset_angle,
            45.0 - self.pitch_offset_angle,
            1.0,
        );
        let pitch_rotation = quatools::angle_axis(-pitch, working_space * Vec3::X);

        // 旋转整条链
        let mut s_r = pitch_rotation * yaw_rotation;
        if self.shoulder_rotation_weight * self.position_weight < 1.0 {
            s_r = Quat::IDENTITY.lerp(s_r, self.shoulder_rotation_weight * self.position_weight);
        }
        VirtualBone::rotate_by(&mut self.part.bones, s_r);

        // 上臂-前臂-手的解析求解
        let position = self.position;
        let bend_normal = self.bend_normal(position - self.upper_arm().solver_position);
        let position_weight = self.position_weight;
        VirtualBone::solve_trigonometric(
            &mut self.part.bones,
            1,
            2,
            3,
            position,
            bend_normal,
            position_weight,
        );

        // 高举手时肩与上臂补扭转
        let p = (pitch * 2.0 * self.position_weight).clamp(0.0, 180.0);
        self.twist_shoulder_and_upper_arm(is_left, p);
    }

    fn solve_shoulder_from_to(&mut self, is_left: bool) {
        // 求解前的肩部旋转快照，扭转角比较用
        let shoulder_rotation = self.shoulder().solver_rotation;

        let r = quatools::from_to(
            (self.upper_arm().solver_position - self.shoulder().solver_position)
                .normalize_or_zero()
                + self.chest_forward,
            self.position - self.shoulder().solver_position,
        );
        let r = Quat::IDENTITY.slerp(r, 0.5 * self.shoulder_rotation_weight * self.position_weight);
        VirtualBone::rotate_by(&mut self.part.bones, r);

        let position = self.position;
        let shoulder_normal = (self.forearm().solver_position - self.shoulder().solver_position)
            .cross(self.hand().solver_position - self.shoulder().solver_position);
        let w = 0.5 * self.shoulder_rotation_weight * self.position_weight;
        VirtualBone::solve_trigonometric(
            &mut self.part.bones,
            0,
            2,
            3,
            position,
            shoulder_normal,
            w,
        );

        let bend_normal = self.bend_normal(position - self.upper_arm().solver_position);
        let position_weight = self.position_weight;
        VirtualBone::solve_trigonometric(
            &mut self.part.bones,
            1,
            2,
            3,
            position,
            bend_normal,
            position_weight,
        );

        // 高举手时肩与上臂补扭转
        let q = quatools::look_rotation(self.chest_up, self.chest_forward).inverse();
        let v_before = q * (shoulder_rotation * self.shoulder().axis);
        let v_after = q * (self.shoulder().solver_rotation * self.shoulder().axis);
        let angle_before = v_before.x.atan2(v_before.z).to_degrees();
        let angle_after = v_after.x.atan2(v_after.z).to_degrees();
        let mut pitch_angle = float::delta_angle(angle_before, angle_after);
        if is_left {
            pitch_angle = -pitch_angle;
        }
        pitch_angle = (pitch_angle * 2.0 * self.position_weight).clamp(0.0, 180.0);

        self.twist_shoulder_and_upper_arm(is_left, pitch_angle);
    }

    fn twist_shoulder_and_upper_arm(&mut self, is_left: bool, angle: f32) {
        let shoulder = &mut self.part.bones[0];
        let axis = if is_left {
            shoulder.axis
        } else {
            -shoulder.axis
        };
        shoulder.solver_rotation =
            quatools::angle_axis(angle, shoulder.solver_rotation * axis) * shoulder.solver_rotation;

        let upper_arm = &mut self.part.bones[1];
        let axis = if is_left {
            upper_arm.axis
        } else {
            -upper_arm.axis
        };
        upper_arm.solver_rotation = quatools::angle_axis(angle, upper_arm.solver_rotation * axis)
            * upper_arm.solver_rotation;
    }

    /// 限幅缓动：把 value 压进 [min, max] 并做五次方缓动
    fn damper_value(mut value: f32, min: f32, max: f32, weight: f32) -> f32 {
        let range = max - min;

        if weight < 1.0 {
            let mid = max - range * 0.5;
            let v = (value - mid) * 0.5;
            value = mid + v;
        }

        value -= min;

        let t = (value / range).clamp(0.0, 1.0);
        let t_eased = Interp::float(t, InterpolationMode::InOutQuintic);
        float::lerp(min, max, t_eased)
    }

    /// 肘部弯曲平面法线的启发式
    fn bend_normal(&mut self, dir: Vec3) -> Vec3 {
        if let Some(bend_goal) = self.bend_goal {
            self.bend_direction = bend_goal - self.part.bones[0].solver_position;
        }

        if self.bend_goal_weight < 1.0 {
            let arm_dir = self.part.bones[0].solver_rotation * self.part.bones[0].axis;

            let f = Vec3::NEG_Y;
            let t = self.chest_rotation.inverse() * dir.normalize_or_zero() + Vec3::Z;
            let q = quatools::from_to(f, t);

            let mut b = q * Vec3::NEG_Z;

            let f = self.chest_rotation.inverse() * arm_dir;
            let t = self.chest_rotation.inverse() * dir;
            let q = quatools::from_to(f, t);
            b = q * b;

            b = self.chest_rotation * b;

            b += arm_dir;
            b -= self.rotation * self.wrist_to_palm_axis;
            b -= self.rotation * self.palm_to_thumb_axis * 0.5;

            if self.bend_goal_weight > 0.0 {
                b = v3tools::slerp(b, self.bend_direction, self.bend_goal_weight);
            }

            if self.swivel_offset != 0.0 {
                b = quatools::angle_axis(self.swivel_offset, -dir) * b;
            }

            return b.cross(dir);
        }

        self.bend_direction.cross(dir)
    }

    pub fn write(&self, solved_rotations: &mut [Quat]) {
        let index = self.part.index;
        if self.has_shoulder {
            solved_rotations[index] = self.shoulder().solver_rotation;
        }
        solved_rotations[index + 1] = self.upper_arm().solver_rotation;
        solved_rotations[index + 2] = self.forearm().solver_rotation;
        solved_rotations[index + 3] = self.hand().solver_rotation;
    }

    pub fn reset_offsets(&mut self) {
        self.hand_position_offset = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// T-pose 左臂：上臂沿 +X 展开，无肩骨
    fn read_left_arm() -> Arm {
        let mut arm = Arm::default();
        // 读缓冲：0 = 根/胸，1..4 = 肩位（占位）/上臂/前臂/手
        let positions = vec![
            Vec3::new(0.0, 1.4, 0.0),
            Vec3::new(0.1, 1.4, 0.0),
            Vec3::new(0.2, 1.4, 0.0),
            Vec3::new(0.5, 1.4, 0.0),
            Vec3::new(0.8, 1.4, 0.0),
        ];
        let rotations = vec![Quat::IDENTITY; 5];
        arm.read(&positions, &rotations, false, 0, 1);
        arm
    }

    #[test]
    fn test_read_without_shoulder_has_three_bones() {
        let arm = read_left_arm();
        assert_eq!(arm.part.bones.len(), 3);
        assert_relative_eq!(arm.part.mag, 0.6, epsilon = 1.0e-5);
    }

    #[test]
    fn test_hand_reaches_target() {
        let mut arm = read_left_arm();
        let target = Vec3::new(0.4, 1.2, 0.3);
        arm.target = Some(Pose::new(target, Quat::IDENTITY));

        arm.pre_solve();
        arm.apply_offsets();
        arm.solve(true);

        assert!(
            (arm.hand().solver_position - target).length() < 1.0e-2,
            "hand = {:?}",
            arm.hand().solver_position
        );
    }

    #[test]
    fn test_hand_rotation_full_weight() {
        let mut arm = read_left_arm();
        let rot = Quat::from_rotation_x(0.5);
        arm.target = Some(Pose::new(Vec3::new(0.5, 1.2, 0.2), rot));

        arm.pre_solve();
        arm.apply_offsets();
        arm.solve(true);

        assert!(arm.hand().solver_rotation.dot(rot).abs() > 1.0 - 1.0e-5);
    }

    #[test]
    fn test_zero_position_weight_keeps_read_pose() {
        let mut arm = read_left_arm();
        arm.position_weight = 0.0;
        arm.rotation_weight = 0.0;
        arm.target = Some(Pose::new(Vec3::new(5.0, 5.0, 5.0), Quat::IDENTITY));

        arm.pre_solve();
        arm.apply_offsets();
        arm.solve(true);

        assert!((arm.hand().solver_position - Vec3::new(0.8, 1.4, 0.0)).length() < 1.0e-3);
    }

    #[test]
    fn test_bend_goal_full_weight_sets_bend_plane() {
        let mut arm = read_left_arm();
        let target = Vec3::new(0.4, 1.4, 0.2);
        arm.target = Some(Pose::new(target, Quat::IDENTITY));
        arm.bend_goal = Some(Vec3::new(0.3, 1.0, -0.2));
        arm.bend_goal_weight = 1.0;

        arm.pre_solve();
        arm.apply_offsets();
        arm.solve(true);

        // 肘部偏向弯曲目标一侧（y 向下）
        assert!(arm.forearm().solver_position.y < 1.4 + 1.0e-3);
        assert!((arm.hand().solver_position - target).length() < 1.0e-2);
    }

    #[test]
    fn test_damper_value_range() {
        let v = Arm::damper_value(0.0, -45.0, 45.0, 1.0);
        assert_relative_eq!(v, 0.0, epsilon = 1.0e-4);
        assert!(Arm::damper_value(100.0, -45.0, 45.0, 1.0) <= 45.0 + 1.0e-4);
        assert!(Arm::damper_value(-100.0, -45.0, 45.0, 1.0) >= -45.0 - 1.0e-4);
    }
}
