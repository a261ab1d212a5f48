//! 腿部求解
//!
//! 脚 / 趾目标驱动大腿-小腿-脚链：膝盖解析求解、脚跟偏移、
//! 趾骨二次求解与小腿扭转修正。

use glam::{Quat, Vec3};

use crate::math::quatools;
use crate::skeleton::Pose;

use super::body_part::BodyPart;
use super::virtual_bone::VirtualBone;

/// 腿部求解器
#[derive(Clone, Debug)]
pub struct Leg {
    pub part: BodyPart,

    /// 脚 / 趾目标（每帧由宿主或步态写入）
    pub target: Option<Pose>,
    /// 膝盖弯向的目标点
    pub bend_goal: Option<Vec3>,

    /// 脚 / 趾目标位置权重
    pub position_weight: f32,
    /// 脚 / 趾目标旋转权重
    pub rotation_weight: f32,
    /// 膝盖弯向 bend_goal 的权重
    pub bend_goal_weight: f32,
    /// 膝盖弯曲方向的角度偏移（度，-180..180）
    pub swivel_offset: f32,

    /// 脚 / 趾目标位姿（赋值 target 时被覆盖）
    pub ik_position: Vec3,
    pub ik_rotation: Quat,

    // 每帧累积、solve 后复位的偏移
    pub foot_position_offset: Vec3,
    pub heel_position_offset: Vec3,
    pub foot_rotation_offset: Quat,

    /// 最近一次读入时的腿长
    pub current_mag: f32,

    /// 末端骨骼的目标位姿（求解期间维护）
    pub position: Vec3,
    pub rotation: Quat,

    pub has_toes: bool,
    /// 大腿相对骨盆的读入位置，步态用
    pub thigh_relative_to_pelvis: Vec3,

    foot_position: Vec3,
    foot_rotation: Quat,
    bend_normal: Vec3,
    calf_rel_to_thigh: Quat,

    warned: bool,
}

impl Default for Leg {
    fn default() -> Self {
        Self {
            part: BodyPart::default(),
            target: None,
            bend_goal: None,
            position_weight: 0.0,
            rotation_weight: 0.0,
            bend_goal_weight: 0.0,
            swivel_offset: 0.0,
            ik_position: Vec3::ZERO,
            ik_rotation: Quat::IDENTITY,
            foot_position_offset: Vec3::ZERO,
            heel_position_offset: Vec3::ZERO,
            foot_rotation_offset: Quat::IDENTITY,
            current_mag: 0.0,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            has_toes: false,
            thigh_relative_to_pelvis: Vec3::ZERO,
            foot_position: Vec3::ZERO,
            foot_rotation: Quat::IDENTITY,
            bend_normal: Vec3::ZERO,
            calf_rel_to_thigh: Quat::IDENTITY,
            warned: false,
        }
    }
}

impl Leg {
    #[inline]
    pub fn thigh(&self) -> &VirtualBone {
        &self.part.bones[0]
    }

    #[inline]
    pub fn calf(&self) -> &VirtualBone {
        &self.part.bones[1]
    }

    #[inline]
    pub fn foot(&self) -> &VirtualBone {
        &self.part.bones[2]
    }

    #[inline]
    pub fn toes(&self) -> &VirtualBone {
        &self.part.bones[3]
    }

    #[inline]
    pub fn last_bone(&self) -> &VirtualBone {
        if self.has_toes {
            self.toes()
        } else {
            self.foot()
        }
    }

    /// 从读缓冲读入腿部链
    pub fn read(
        &mut self,
        positions: &[Vec3],
        rotations: &[Quat],
        has_toes: bool,
        root_index: usize,
        index: usize,
    ) {
        self.part
            .begin_read(positions[root_index], rotations[root_index], index);

        let thigh_pos = positions[index];
        let thigh_rot = rotations[index];
        let calf_pos = positions[index + 1];
        let calf_rot = rotations[index + 1];
        let foot_pos = positions[index + 2];
        let foot_rot = rotations[index + 2];

        if !self.part.initiated {
            self.has_toes = has_toes;

            let mut bones = vec![
                VirtualBone::new(thigh_pos, thigh_rot),
                VirtualBone::new(calf_pos, calf_rot),
                VirtualBone::new(foot_pos, foot_rot),
            ];

            if has_toes {
                bones.push(VirtualBone::new(positions[index + 3], rotations[index + 3]));
                self.ik_position = positions[index + 3];
                self.ik_rotation = rotations[index + 3];
            } else {
                self.ik_position = foot_pos;
                self.ik_rotation = foot_rot;
            }

            self.part.bones = bones;
            self.rotation = self.ik_rotation;
        }

        self.part.bones[0].read(thigh_pos, thigh_rot);
        self.part.bones[1].read(calf_pos, calf_rot);
        self.part.bones[2].read(foot_pos, foot_rot);
        if self.has_toes {
            self.part.bones[3].read(positions[index + 3], rotations[index + 3]);
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
                    log::warn!("[VRIK] 腿部目标未设置，使用读入位姿");
                }
            }
        }

        self.foot_position = self.foot().solver_position;
        self.foot_rotation = self.foot().solver_rotation;
        self.position = self.last_bone().solver_position;
        self.rotation = self.last_bone().solver_rotation;

        if self.rotation_weight > 0.0 {
            let offset = quatools::from_to_rotation(self.rotation, self.ik_rotation);
            self.apply_rotation_offset(offset, self.rotation_weight);
        }

        if self.position_weight > 0.0 {
            let offset = self.ik_position - self.position;
            self.apply_position_offset(offset, self.position_weight);
        }

        self.thigh_relative_to_pelvis = self.part.root_rotation.inverse()
            * (self.thigh().solver_position - self.part.root_position);
        self.calf_rel_to_thigh = self.thigh().solver_rotation.inverse() * self.calf().solver_rotation;

        // 弯曲平面法线
        self.bend_normal = (self.calf().solver_position - self.thigh().solver_position)
            .cross(self.foot().solver_position - self.calf().solver_position);
    }

    pub fn apply_offsets(&mut self) {
        let foot_position_offset = self.foot_position_offset;
        self.apply_position_offset(foot_position_offset, 1.0);
        let foot_rotation_offset = self.foot_rotation_offset;
        self.apply_rotation_offset(foot_rotation_offset, 1.0);

        // 脚跟偏移：绕末端旋转脚
        let from_to = quatools::from_to(
            self.foot_position - self.position,
            self.foot_position + self.heel_position_offset - self.position,
        );
        self.foot_position = self.position + from_to * (self.foot_position - self.position);
        self.foot_rotation = from_to * self.foot_rotation;

        // 膝盖弯向目标产生的附加偏角
        let mut b_angle = 0.0;
        if let Some(bend_goal) = self.bend_goal {
            if self.bend_goal_weight > 0.0 {
                let b = (bend_goal - self.thigh().solver_position)
                    .cross(self.foot().solver_position - self.thigh().solver_position);
                let l = quatools::look_rotation(
                    self.bend_normal,
                    self.thigh().solver_position - self.foot().solver_position,
                );
                let b_relative = l.inverse() * b;
                b_angle = b_relative.x.atan2(b_relative.z).to_degrees() * self.bend_goal_weight;
            }
        }

        let s_o = self.swivel_offset + b_angle;
        if s_o != 0.0 {
            self.bend_normal = quatools::angle_axis(
                s_o,
                self.thigh().solver_position - self.last_bone().solver_position,
            ) * self.bend_normal;
            let thigh = &mut self.part.bones[0];
            thigh.solver_rotation =
                quatools::angle_axis(-s_o, thigh.solver_rotation * thigh.axis)
                    * thigh.solver_rotation;
        }
    }

    fn apply_position_offset(&mut self, offset: Vec3, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        let offset = offset * weight;

        self.foot_position += offset;
        self.position += offset;
    }

    fn apply_rotation_offset(&mut self, offset: Quat, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        let offset = if weight < 1.0 {
            Quat::IDENTITY.lerp(offset, weight)
        } else {
            offset
        };

        self.foot_rotation = offset * self.foot_rotation;
        self.rotation = offset * self.rotation;
        self.bend_normal = offset * self.bend_normal;
        self.foot_position = self.position + offset * (self.foot_position - self.position);
    }

    pub fn solve(&mut self) {
        // 脚部解析求解
        let foot_position = self.foot_position;
        let bend_normal = self.bend_normal;
        VirtualBone::solve_trigonometric(
            &mut self.part.bones,
            0,
            1,
            2,
            foot_position,
            bend_normal,
            1.0,
        );

        // 把脚转回求解前的朝向
        let foot_rotation = self.foot_rotation;
        self.part.rotate_to(2, foot_rotation, 1.0);

        if self.has_toes {
            // 趾骨二次求解
            let b = (self.foot().solver_position - self.thigh().solver_position)
                .cross(self.toes().solver_position - self.foot().solver_position);
            let position = self.position;
            VirtualBone::solve_trigonometric(&mut self.part.bones, 0, 2, 3, position, b, 1.0);
        }

        // 小腿扭转修正：相对大腿恢复读入的扭转
        let calf_rotation = self.thigh().solver_rotation * self.calf_rel_to_thigh;
        let from_to = quatools::from_to(
            calf_rotation * self.calf().axis,
            self.foot().solver_position - self.calf().solver_position,
        );
        self.part.rotate_to(1, from_to * calf_rotation, 1.0);

        if self.has_toes {
            // 趾骨朝向保持目标旋转
            self.part.bones[3].solver_rotation = self.rotation;
        }
    }

    pub fn write(&self, solved_rotations: &mut [Quat]) {
        let index = self.part.index;
        solved_rotations[index] = self.thigh().solver_rotation;
        solved_rotations[index + 1] = self.calf().solver_rotation;
        solved_rotations[index + 2] = self.foot().solver_rotation;
        if self.has_toes {
            solved_rotations[index + 3] = self.toes().solver_rotation;
        }
    }

    pub fn reset_offsets(&mut self) {
        self.foot_position_offset = Vec3::ZERO;
        self.foot_rotation_offset = Quat::IDENTITY;
        self.heel_position_offset = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 竖直腿：大腿在 y=1，脚在地面
    fn read_leg() -> Leg {
        let mut leg = Leg::default();
        let positions = vec![
            Vec3::ZERO,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
        ];
        let rotations = vec![Quat::IDENTITY; 4];
        leg.read(&positions, &rotations, false, 0, 1);
        leg
    }

    #[test]
    fn test_read_computes_leg_length() {
        let leg = read_leg();
        assert!(leg.part.initiated);
        assert_relative_eq!(leg.part.mag, 1.0, epsilon = 1.0e-5);
        assert!(!leg.has_toes);
    }

    #[test]
    fn test_two_bone_reach() {
        // 0.5 + 0.5 的腿触达前方 0.8 处的目标
        let mut leg = read_leg();
        leg.position_weight = 1.0;
        leg.target = Some(Pose::new(Vec3::new(0.0, 0.2, 0.6), Quat::IDENTITY));

        leg.pre_solve();
        leg.apply_offsets();
        leg.solve();

        let foot = leg.foot().solver_position;
        assert!((foot - Vec3::new(0.0, 0.2, 0.6)).length() < 1.0e-2, "foot = {:?}", foot);

        // 骨长不变
        let d1 = leg.thigh().solver_position.distance(leg.calf().solver_position);
        let d2 = leg.calf().solver_position.distance(leg.foot().solver_position);
        assert_relative_eq!(d1, 0.5, epsilon = 1.0e-3);
        assert_relative_eq!(d2, 0.5, epsilon = 1.0e-3);
    }

    #[test]
    fn test_zero_weight_keeps_read_pose() {
        let mut leg = read_leg();
        leg.target = Some(Pose::new(Vec3::new(1.0, 1.0, 1.0), Quat::IDENTITY));
        // 权重为零，目标不生效
        leg.position_weight = 0.0;
        leg.rotation_weight = 0.0;

        leg.pre_solve();
        leg.apply_offsets();
        leg.solve();

        assert!((leg.foot().solver_position - Vec3::ZERO).length() < 1.0e-4);
    }

    #[test]
    fn test_rotation_weight_full_matches_target_rotation() {
        let mut leg = read_leg();
        let target_rot = Quat::from_rotation_y(0.4);
        leg.rotation_weight = 1.0;
        leg.target = Some(Pose::new(Vec3::ZERO, target_rot));

        leg.pre_solve();
        leg.apply_offsets();
        leg.solve();

        assert!(leg.foot().solver_rotation.dot(target_rot).abs() > 1.0 - 1.0e-4);
    }

    #[test]
    fn test_unreachable_target_straightens_leg() {
        let mut leg = read_leg();
        leg.position_weight = 1.0;
        leg.target = Some(Pose::new(Vec3::new(0.0, 1.0, 5.0), Quat::IDENTITY));

        leg.pre_solve();
        leg.apply_offsets();
        leg.solve();

        // 腿伸直指向目标方向
        let reach = leg.foot().solver_position.distance(leg.thigh().solver_position);
        assert_relative_eq!(reach, 1.0, epsilon = 1.0e-3);
    }
}
