//! 脊柱求解
//!
//! 头部目标驱动骨盆到头的整条脊柱：骨盆平移 / 旋转、FABRIK
//! 压缩拉伸、胸部与头部的渐进弯曲，以及可选的骨盆目标约束。

use glam::{Quat, Vec3};

use crate::math::{quatools, v3tools};
use crate::skeleton::Pose;

use super::body_part::BodyPart;
use super::leg::Leg;
use super::virtual_bone::VirtualBone;

/// 脊柱求解器
#[derive(Clone, Debug)]
pub struct Spine {
    pub part: BodyPart,

    /// 头部目标（每帧由宿主写入）
    pub head_target: Option<Pose>,
    /// 骨盆目标，坐姿骨架时有用
    pub pelvis_target: Option<Pose>,
    /// 胸部朝向目标点
    pub chest_goal: Option<Vec3>,

    /// 头部目标位置权重
    pub position_weight: f32,
    /// 头部目标旋转权重
    pub rotation_weight: f32,
    /// 骨盆目标位置权重
    pub pelvis_position_weight: f32,
    /// 骨盆目标旋转权重
    pub pelvis_rotation_weight: f32,
    /// 胸部目标权重
    pub chest_goal_weight: f32,

    /// 头部距根的最小高度
    pub min_head_height: f32,
    /// 身体跟随头部位置的程度
    pub body_pos_stiffness: f32,
    /// 身体跟随头部旋转的程度
    pub body_rot_stiffness: f32,
    /// 胸部跟随头部旋转的刚度
    pub neck_stiffness: f32,
    /// 胸部旋转钳制
    pub chest_clamp_weight: f32,
    /// 头部旋转钳制
    pub head_clamp_weight: f32,
    /// 骨盆保持动画位置的程度
    pub maintain_pelvis_position: f32,
    /// 头部目标扭过该角度（度）时自动旋转根骨骼
    pub max_root_angle: f32,

    /// 头部目标位姿（赋值 target 时被覆盖）
    pub ik_position_head: Vec3,
    pub ik_rotation_head: Quat,
    /// 骨盆目标位姿（赋值 target 时被覆盖）
    pub ik_position_pelvis: Vec3,
    pub ik_rotation_pelvis: Quat,
    /// 胸部目标点（赋值 chest_goal 时被覆盖）
    pub goal_position_chest: Vec3,

    // 每帧累积、solve 后复位的偏移
    pub pelvis_position_offset: Vec3,
    pub chest_position_offset: Vec3,
    pub head_position_offset: Vec3,
    pub pelvis_rotation_offset: Quat,
    pub chest_rotation_offset: Quat,
    pub head_rotation_offset: Quat,

    /// 步态写入的头部偏移，复位时回填到 head_position_offset
    pub locomotion_head_position_offset: Vec3,

    pub face_direction: Vec3,
    pub head_position: Vec3,
    pub head_rotation: Quat,
    pub anchor_rotation: Quat,

    anchor_relative_to_head: Quat,
    pelvis_relative_rotation: Quat,
    chest_relative_rotation: Quat,
    head_delta_position: Vec3,
    pelvis_delta_rotation: Quat,
    chest_target_rotation: Quat,
    chest_forward: Vec3,

    pub pelvis_index: usize,
    pub spine_index: usize,
    pub chest_index: usize,
    pub neck_index: usize,
    pub head_index: usize,

    pub has_chest: bool,
    pub has_neck: bool,
    pub head_height: f32,
    pub size_mlp: f32,

    warned: bool,
}

impl Default for Spine {
    fn default() -> Self {
        Self {
            part: BodyPart::default(),
            head_target: None,
            pelvis_target: None,
            chest_goal: None,
            position_weight: 1.0,
            rotation_weight: 1.0,
            pelvis_position_weight: 0.0,
            pelvis_rotation_weight: 0.0,
            chest_goal_weight: 0.0,
            min_head_height: 0.8,
            body_pos_stiffness: 0.55,
            body_rot_stiffness: 0.1,
            neck_stiffness: 0.2,
            chest_clamp_weight: 0.5,
            head_clamp_weight: 0.6,
            maintain_pelvis_position: 0.2,
            max_root_angle: 25.0,
            ik_position_head: Vec3::ZERO,
            ik_rotation_head: Quat::IDENTITY,
            ik_position_pelvis: Vec3::ZERO,
            ik_rotation_pelvis: Quat::IDENTITY,
            goal_position_chest: Vec3::ZERO,
            pelvis_position_offset: Vec3::ZERO,
            chest_position_offset: Vec3::ZERO,
            head_position_offset: Vec3::ZERO,
            pelvis_rotation_offset: Quat::IDENTITY,
            chest_rotation_offset: Quat::IDENTITY,
            head_rotation_offset: Quat::IDENTITY,
            locomotion_head_position_offset: Vec3::ZERO,
            face_direction: Vec3::Z,
            head_position: Vec3::ZERO,
            head_rotation: Quat::IDENTITY,
            anchor_rotation: Quat::IDENTITY,
            anchor_relative_to_head: Quat::IDENTITY,
            pelvis_relative_rotation: Quat::IDENTITY,
            chest_relative_rotation: Quat::IDENTITY,
            head_delta_position: Vec3::ZERO,
            pelvis_delta_rotation: Quat::IDENTITY,
            chest_target_rotation: Quat::IDENTITY,
            chest_forward: Vec3::Z,
            pelvis_index: 0,
            spine_index: 1,
            chest_index: 0,
            neck_index: 0,
            head_index: 0,
            has_chest: false,
            has_neck: false,
            head_height: 0.0,
            size_mlp: 1.0,
            warned: false,
        }
    }
}

impl Spine {
    #[inline]
    pub fn pelvis(&self) -> &VirtualBone {
        &self.part.bones[self.pelvis_index]
    }

    #[inline]
    pub fn chest(&self) -> &VirtualBone {
        if self.has_chest {
            &self.part.bones[self.chest_index]
        } else {
            &self.part.bones[self.spine_index]
        }
    }

    #[inline]
    pub fn head(&self) -> &VirtualBone {
        &self.part.bones[self.head_index]
    }

    /// 从读缓冲读入脊柱链
    #[allow(clippy::too_many_arguments)]
    pub fn read(
        &mut self,
        positions: &[Vec3],
        rotations: &[Quat],
        has_chest: bool,
        has_neck: bool,
        root_index: usize,
        index: usize,
    ) {
        self.part
            .begin_read(positions[root_index], rotations[root_index], index);

        let pelvis_pos = positions[index];
        let pelvis_rot = rotations[index];
        let spine_pos = positions[index + 1];
        let spine_rot = rotations[index + 1];
        let (chest_pos, chest_rot) = if has_chest {
            (positions[index + 2], rotations[index + 2])
        } else {
            (spine_pos, spine_rot)
        };
        let neck_pos = positions[index + 3];
        let neck_rot = rotations[index + 3];
        let head_pos = positions[index + 4];
        let head_rot = rotations[index + 4];

        if !self.part.initiated {
            self.has_chest = has_chest;
            self.has_neck = has_neck;
            self.head_height = v3tools::extract_vertical(
                head_pos - positions[0],
                rotations[0] * Vec3::Y,
                1.0,
            )
            .length();

            let mut bone_count = 3;
            if has_chest {
                bone_count += 1;
            }
            if has_neck {
                bone_count += 1;
            }

            self.chest_index = if has_chest { 2 } else { 1 };

            self.neck_index = 1;
            if has_chest {
                self.neck_index += 1;
            }
            if has_neck {
                self.neck_index += 1;
            }

            self.head_index = 2;
            if has_chest {
                self.head_index += 1;
            }
            if has_neck {
                self.head_index += 1;
            }

            let mut bones = vec![VirtualBone::new(pelvis_pos, pelvis_rot); bone_count];
            bones[1] = VirtualBone::new(spine_pos, spine_rot);
            if has_chest {
                bones[self.chest_index] = VirtualBone::new(chest_pos, chest_rot);
            }
            if has_neck {
                bones[self.neck_index] = VirtualBone::new(neck_pos, neck_rot);
            }
            bones[self.head_index] = VirtualBone::new(head_pos, head_rot);
            self.part.bones = bones;

            self.pelvis_rotation_offset = Quat::IDENTITY;
            self.chest_rotation_offset = Quat::IDENTITY;
            self.head_rotation_offset = Quat::IDENTITY;

            self.anchor_relative_to_head = head_rot.inverse() * rotations[0];
            self.pelvis_relative_rotation = head_rot.inverse() * pelvis_rot;
            self.chest_relative_rotation = head_rot.inverse() * chest_rot;

            self.chest_forward = chest_rot.inverse() * (rotations[0] * Vec3::Z);
            self.face_direction = rotations[0] * Vec3::Z;

            self.ik_position_head = head_pos;
            self.ik_rotation_head = head_rot;
            self.ik_position_pelvis = pelvis_pos;
            self.ik_rotation_pelvis = pelvis_rot;
            self.goal_position_chest = chest_pos + rotations[0] * Vec3::Z;
        }

        self.part.bones[0].read(pelvis_pos, pelvis_rot);
        self.part.bones[1].read(spine_pos, spine_rot);
        if self.has_chest {
            let chest_index = self.chest_index;
            self.part.bones[chest_index].read(chest_pos, chest_rot);
        }
        if self.has_neck {
            let neck_index = self.neck_index;
            self.part.bones[neck_index].read(neck_pos, neck_rot);
        }
        let head_index = self.head_index;
        self.part.bones[head_index].read(head_pos, head_rot);

        // 以 0.7 米脊柱长为基准的骨架尺寸系数
        let spine_length = pelvis_pos.distance(head_pos);
        self.size_mlp = spine_length / 0.7;

        self.part.finish_read();
    }

    pub fn pre_solve(&mut self) {
        match self.head_target {
            Some(target) => {
                self.ik_position_head = target.position;
                self.ik_rotation_head = target.rotation;
            }
            None => {
                if !self.warned && self.position_weight > 0.0 {
                    self.warned = true;
                    log::warn!("[VRIK] 头部目标未设置，使用读入位姿");
                }
            }
        }
        if let Some(goal) = self.chest_goal {
            self.goal_position_chest = goal;
        }
        if let Some(target) = self.pelvis_target {
            self.ik_position_pelvis = target.position;
            self.ik_rotation_pelvis = target.rotation;
        }

        self.head_position = v3tools::lerp(
            self.head().solver_position,
            self.ik_position_head,
            self.position_weight,
        );
        self.head_rotation = quatools::lerp(
            self.head().solver_rotation,
            self.ik_rotation_head,
            self.rotation_weight,
        );
    }

    pub fn apply_offsets(&mut self) {
        self.head_position += self.head_position_offset;

        // 最低头高约束，沿根骨骼的上方向
        let root_up = self.part.root_rotation * Vec3::Y;
        if (root_up - Vec3::Y).length_squared() < 1.0e-8 {
            self.head_position.y = self
                .head_position
                .y
                .max(self.part.root_position.y + self.min_head_height);
        } else {
            let to_head = self.head_position - self.part.root_position;
            let hor = v3tools::extract_horizontal(to_head, root_up, 1.0);
            let mut ver = to_head - hor;
            let dot = ver.dot(root_up);
            if dot > 0.0 {
                if ver.length() < self.min_head_height {
                    ver = ver.normalize_or_zero() * self.min_head_height;
                }
            } else {
                ver = -ver.normalize_or_zero() * self.min_head_height;
            }

            self.head_position = self.part.root_position + hor + ver;
        }

        self.head_rotation = self.head_rotation_offset * self.head_rotation;

        self.head_delta_position = self.head_position - self.head().solver_position;
        self.pelvis_delta_rotation = quatools::from_to_rotation(
            self.pelvis().solver_rotation,
            self.head_rotation * self.pelvis_relative_rotation,
        );

        self.anchor_rotation = self.head_rotation * self.anchor_relative_to_head;
    }

    fn calculate_chest_target_rotation(&mut self, root_bone: &VirtualBone, hand_positions: [Vec3; 2]) {
        self.chest_target_rotation = self.head_rotation * self.chest_relative_rotation;

        self.adjust_chest_by_hands(hand_positions);

        self.face_direction = (self.anchor_rotation * Vec3::X)
            .cross(root_bone.read_rotation * Vec3::Y)
            + self.anchor_rotation * Vec3::Z;
    }

    /// 脊柱主求解
    pub fn solve(
        &mut self,
        root_bone: &mut VirtualBone,
        legs: &mut [&mut Leg; 2],
        hand_positions: [Vec3; 2],
    ) {
        self.calculate_chest_target_rotation(root_bone, hand_positions);

        // 头部目标扭头过度时旋转根骨骼
        if self.max_root_angle < 180.0 {
            let face_dir_local = root_bone.solver_rotation.inverse() * self.face_direction;
            let angle = face_dir_local.x.atan2(face_dir_local.z).to_degrees();

            let mut rotation = 0.0;
            if angle > self.max_root_angle {
                rotation = angle - self.max_root_angle;
            }
            if angle < -self.max_root_angle {
                rotation = angle + self.max_root_angle;
            }

            root_bone.solver_rotation =
                quatools::angle_axis(rotation, root_bone.read_rotation * Vec3::Y)
                    * root_bone.solver_rotation;
        }

        let animated_pelvis_pos = self.pelvis().solver_position;

        // 平移骨盆使头部位姿贴合目标
        let head_delta_position = self.head_delta_position;
        let pelvis_delta_rotation = self.pelvis_delta_rotation;
        self.translate_pelvis(legs, head_delta_position, pelvis_delta_rotation);

        // FABRIK 压缩 / 拉伸脊柱
        let start = self
            .pelvis()
            .solver_position
            .lerp(animated_pelvis_pos, self.maintain_pelvis_position)
            + self.pelvis_position_offset
            - self.chest_position_offset;
        let target = self.head_position - self.chest_position_offset;
        let mag = self.part.mag;
        VirtualBone::solve_fabrik(&mut self.part.bones, start, target, 1.0, 1.0, 1, mag);

        // 弯向胸部目标旋转
        let chest_target_rotation = self.chest_target_rotation;
        let chest_rotation_offset = self.chest_rotation_offset;
        let chest_clamp_weight = self.chest_clamp_weight;
        let neck_stiffness = self.neck_stiffness;
        self.bend_with_offset(
            self.pelvis_index,
            self.chest_index,
            chest_target_rotation,
            chest_rotation_offset,
            chest_clamp_weight,
            false,
            neck_stiffness,
        );

        if self.chest_goal_weight > 0.0 {
            let chest = &self.part.bones[self.chest_index];
            let c = quatools::from_to(
                chest.solver_rotation * self.chest_forward,
                self.goal_position_chest - chest.solver_position,
            ) * chest.solver_rotation;
            let chest_goal_weight = self.chest_goal_weight;
            self.bend_with_offset(
                self.pelvis_index,
                self.chest_index,
                c,
                chest_rotation_offset,
                chest_clamp_weight,
                false,
                chest_goal_weight,
            );
        }

        self.inverse_translate_to_head(legs, false, false, Vec3::ZERO, 1.0);

        let start = self
            .pelvis()
            .solver_position
            .lerp(animated_pelvis_pos, self.maintain_pelvis_position)
            + self.pelvis_position_offset
            - self.chest_position_offset;
        let target = self.head_position - self.chest_position_offset;
        VirtualBone::solve_fabrik(&mut self.part.bones, start, target, 1.0, 1.0, 1, mag);

        // 头部自身的弯曲
        let head_rotation = self.head_rotation;
        let head_clamp_weight = self.head_clamp_weight;
        self.bend(
            self.neck_index,
            self.head_index,
            head_rotation,
            head_clamp_weight,
            true,
            1.0,
        );

        self.solve_pelvis();
    }

    /// 骨盆目标约束
    fn solve_pelvis(&mut self) {
        if self.pelvis_position_weight <= 0.0 {
            return;
        }

        let head_solver_rotation = self.head().solver_rotation;

        let delta = (self.ik_position_pelvis + self.pelvis_position_offset
            - self.pelvis().solver_position)
            * self.pelvis_position_weight;
        for bone in &mut self.part.bones {
            bone.solver_position += delta;
        }

        let bend_normal = self.anchor_rotation * Vec3::X;
        let head_position = self.head_position;
        let w = self.pelvis_position_weight;
        let (pelvis_i, spine_i, chest_i, neck_i, head_i) = (
            self.pelvis_index,
            self.spine_index,
            self.chest_index,
            self.neck_index,
            self.head_index,
        );
        let bones = &mut self.part.bones;

        match (self.has_chest, self.has_neck) {
            (true, true) => {
                VirtualBone::solve_trigonometric(
                    bones, pelvis_i, spine_i, head_i, head_position, bend_normal, w * 0.6,
                );
                VirtualBone::solve_trigonometric(
                    bones, spine_i, chest_i, head_i, head_position, bend_normal, w * 0.6,
                );
                VirtualBone::solve_trigonometric(
                    bones, chest_i, neck_i, head_i, head_position, bend_normal, w,
                );
            }
            (true, false) => {
                VirtualBone::solve_trigonometric(
                    bones, pelvis_i, spine_i, head_i, head_position, bend_normal, w * 0.75,
                );
                VirtualBone::solve_trigonometric(
                    bones, spine_i, chest_i, head_i, head_position, bend_normal, w,
                );
            }
            (false, true) => {
                VirtualBone::solve_trigonometric(
                    bones, pelvis_i, spine_i, head_i, head_position, bend_normal, w * 0.75,
                );
                VirtualBone::solve_trigonometric(
                    bones, spine_i, neck_i, head_i, head_position, bend_normal, w,
                );
            }
            (false, false) => {
                VirtualBone::solve_trigonometric(
                    bones, pelvis_i, spine_i, head_i, head_position, bend_normal, w,
                );
            }
        }

        let head_index = self.head_index;
        self.part.bones[head_index].solver_rotation = head_solver_rotation;
    }

    pub fn write(&self, solved_positions: &mut [Vec3], solved_rotations: &mut [Quat]) {
        let index = self.part.index;

        // 骨盆是唯一写位置的脊柱骨骼
        solved_positions[1] = self.part.bones[0].solver_position;
        solved_rotations[index] = self.part.bones[0].solver_rotation;

        solved_rotations[index + 1] = self.part.bones[1].solver_rotation;

        if self.has_chest {
            solved_rotations[index + 2] = self.part.bones[self.chest_index].solver_rotation;
        }
        if self.has_neck {
            solved_rotations[index + 3] = self.part.bones[self.neck_index].solver_rotation;
        }
        solved_rotations[index + 4] = self.part.bones[self.head_index].solver_rotation;
    }

    pub fn reset_offsets(&mut self) {
        self.pelvis_position_offset = Vec3::ZERO;
        self.chest_position_offset = Vec3::ZERO;
        // 步态每帧重建头部偏移
        self.head_position_offset = self.locomotion_head_position_offset;
        self.pelvis_rotation_offset = Quat::IDENTITY;
        self.chest_rotation_offset = Quat::IDENTITY;
        self.head_rotation_offset = Quat::IDENTITY;
    }

    /// 用手的位置调整胸部扭转
    fn adjust_chest_by_hands(&mut self, hand_positions: [Vec3; 2]) {
        let h = self.anchor_rotation.inverse();

        let p_left = h * (hand_positions[0] - self.head_position) / self.size_mlp;
        let p_right = h * (hand_positions[1] - self.head_position) / self.size_mlp;

        let mut c = Vec3::Z;
        c.x += p_left.x * p_left.x.abs();
        c.x += p_left.z * p_left.z.abs();
        c.x += p_right.x * p_right.x.abs();
        c.x -= p_right.z * p_right.z.abs();
        c.x *= 5.0;

        let q = quatools::from_to(Vec3::Z, c);
        self.chest_target_rotation = q * self.chest_target_rotation;

        let mut t = Vec3::Y;
        t.x += p_left.y;
        t.x -= p_right.y;
        t.x *= 0.5;

        let q = quatools::from_to(Vec3::Y, self.anchor_rotation * t);
        self.chest_target_rotation = q * self.chest_target_rotation;
    }

    /// 移动骨盆使头部保持锚定
    pub fn inverse_translate_to_head(
        &mut self,
        legs: &mut [&mut Leg; 2],
        limited: bool,
        use_current_leg_mag: bool,
        offset: Vec3,
        w: f32,
    ) {
        let p = self.pelvis().solver_position
            + (self.head_position + offset - self.head().solver_position)
                * w
                * (1.0 - self.pelvis_position_weight);

        let target = if limited {
            self.limit_pelvis_position(legs, p, use_current_leg_mag, 2)
        } else {
            p
        };
        self.part.move_position(target);
    }

    /// 平移并旋转骨盆
    fn translate_pelvis(
        &mut self,
        legs: &mut [&mut Leg; 2],
        mut delta_position: Vec3,
        delta_rotation: Quat,
    ) {
        // 旋转
        let p = self.head().solver_position;

        let delta_rotation =
            quatools::clamp_rotation(delta_rotation, self.chest_clamp_weight, 2);

        let mut r = Quat::IDENTITY.slerp(delta_rotation, self.body_rot_stiffness);
        r = r.slerp(
            quatools::from_to_rotation(self.pelvis().solver_rotation, self.ik_rotation_pelvis),
            self.pelvis_rotation_weight,
        );
        let pivot = self.pelvis().solver_position;
        VirtualBone::rotate_around_point(
            &mut self.part.bones,
            0,
            pivot,
            self.pelvis_rotation_offset * r,
        );

        delta_position -= self.head().solver_position - p;

        // 头部下移时身体后撤
        let mut m = self.part.root_rotation * Vec3::Z;
        m.y = 0.0;
        let back_offset = delta_position.y * 0.35 * self.head_height;
        delta_position += m * back_offset;

        let target = self.pelvis().solver_position + delta_position * self.body_pos_stiffness;
        let limited = self.limit_pelvis_position(legs, target, false, 2);
        self.part.move_position(limited);
    }

    /// 三点约束限制骨盆位置，保证脚 / 趾不被拉离目标
    fn limit_pelvis_position(
        &self,
        legs: &mut [&mut Leg; 2],
        mut pelvis_position: Vec3,
        use_current_leg_mag: bool,
        iterations: u32,
    ) -> Vec3 {
        if use_current_leg_mag {
            for leg in legs.iter_mut() {
                leg.current_mag = leg
                    .thigh()
                    .solver_position
                    .distance(leg.last_bone().solver_position);
            }
        }

        for _ in 0..iterations {
            for leg in legs.iter() {
                let delta = pelvis_position - self.pelvis().solver_position;
                let wanted_thigh_pos = leg.thigh().solver_position + delta;
                let to_wanted_thigh_pos = wanted_thigh_pos - leg.position;
                let max_mag = if use_current_leg_mag {
                    leg.current_mag
                } else {
                    leg.part.mag
                };
                let limited_thigh_pos =
                    leg.position + to_wanted_thigh_pos.clamp_length_max(max_mag);
                pelvis_position += limited_thigh_pos - wanted_thigh_pos;
            }
        }

        pelvis_position
    }

    /// 均匀或渐进地把脊柱弯向目标旋转
    fn bend(
        &mut self,
        first_index: usize,
        last_index: usize,
        target_rotation: Quat,
        clamp_weight: f32,
        uniform_weight: bool,
        w: f32,
    ) {
        if w <= 0.0 || self.part.bones.is_empty() {
            return;
        }
        let bones_count = (last_index + 1).saturating_sub(first_index);
        if bones_count < 1 {
            return;
        }

        let mut r = quatools::from_to_rotation(
            self.part.bones[last_index].solver_rotation,
            target_rotation,
        );
        r = quatools::clamp_rotation(r, clamp_weight, 2);

        for i in first_index..=last_index {
            let step = if uniform_weight {
                1.0 / bones_count as f32
            } else {
                (((i - first_index) + 1) as f32 / bones_count as f32).clamp(0.0, 1.0)
            };
            let pivot = self.part.bones[i].solver_position;
            VirtualBone::rotate_around_point(
                &mut self.part.bones,
                i,
                pivot,
                Quat::IDENTITY.slerp(r, step * w),
            );
        }
    }

    /// 同 bend，但在每一步上混入旋转偏移
    #[allow(clippy::too_many_arguments)]
    fn bend_with_offset(
        &mut self,
        first_index: usize,
        last_index: usize,
        target_rotation: Quat,
        rotation_offset: Quat,
        clamp_weight: f32,
        uniform_weight: bool,
        w: f32,
    ) {
        if w <= 0.0 || self.part.bones.is_empty() {
            return;
        }
        let bones_count = (last_index + 1).saturating_sub(first_index);
        if bones_count < 1 {
            return;
        }

        let mut r = quatools::from_to_rotation(
            self.part.bones[last_index].solver_rotation,
            target_rotation,
        );
        r = quatools::clamp_rotation(r, clamp_weight, 2);

        for i in first_index..=last_index {
            let step = if uniform_weight {
                1.0 / bones_count as f32
            } else {
                (((i - first_index) + 1) as f32 / bones_count as f32).clamp(0.0, 1.0)
            };
            let pivot = self.part.bones[i].solver_position;
            VirtualBone::rotate_around_point(
                &mut self.part.bones,
                i,
                pivot,
                Quat::IDENTITY.slerp(rotation_offset, step).slerp(r, step * w),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 直立 T-pose 的读缓冲，22 槽位
    fn read_buffers() -> (Vec<Vec3>, Vec<Quat>) {
        let mut positions = vec![Vec3::ZERO; 22];
        let rotations = vec![Quat::IDENTITY; 22];
        positions[1] = Vec3::new(0.0, 1.0, 0.0);
        positions[2] = Vec3::new(0.0, 1.2, 0.0);
        positions[3] = Vec3::new(0.0, 1.35, 0.0);
        positions[4] = Vec3::new(0.0, 1.55, 0.0);
        positions[5] = Vec3::new(0.0, 1.65, 0.0);
        positions[14] = Vec3::new(-0.1, 0.95, 0.0);
        positions[15] = Vec3::new(-0.1, 0.5, 0.0);
        positions[16] = Vec3::new(-0.1, 0.05, 0.0);
        positions[18] = Vec3::new(0.1, 0.95, 0.0);
        positions[19] = Vec3::new(0.1, 0.5, 0.0);
        positions[20] = Vec3::new(0.1, 0.05, 0.0);
        (positions, rotations)
    }

    fn read_spine() -> Spine {
        let (positions, rotations) = read_buffers();
        let mut spine = Spine::default();
        spine.read(&positions, &rotations, true, true, 0, 1);
        spine
    }

    fn read_legs() -> (Leg, Leg) {
        let (positions, rotations) = read_buffers();
        let mut left = Leg::default();
        left.read(&positions, &rotations, false, 1, 14);
        let mut right = Leg::default();
        right.read(&positions, &rotations, false, 1, 18);
        (left, right)
    }

    #[test]
    fn test_read_initiates_chain() {
        let spine = read_spine();
        // 骨盆 + 脊柱 + 胸 + 颈 + 头
        assert_eq!(spine.part.bones.len(), 5);
        assert!(spine.part.initiated);
        assert!(spine.part.mag > 0.6);
        assert_relative_eq!(spine.head_height, 1.65, epsilon = 1.0e-4);
        assert_eq!(spine.chest_index, 2);
        assert_eq!(spine.neck_index, 3);
        assert_eq!(spine.head_index, 4);
    }

    #[test]
    fn test_pre_solve_zero_weight_keeps_read_pose() {
        let mut spine = read_spine();
        spine.position_weight = 0.0;
        spine.rotation_weight = 0.0;
        spine.head_target = Some(Pose::new(Vec3::new(5.0, 5.0, 5.0), Quat::from_rotation_y(1.0)));

        spine.pre_solve();
        assert_relative_eq!(
            spine.head_position.distance(Vec3::new(0.0, 1.65, 0.0)),
            0.0,
            epsilon = 1.0e-6
        );
    }

    #[test]
    fn test_missing_head_target_warns_once() {
        let mut spine = read_spine();
        assert!(!spine.warned);

        spine.pre_solve();
        assert!(spine.warned);
        // 目标补上后不再复位
        spine.head_target = Some(Pose::new(Vec3::new(0.0, 1.6, 0.0), Quat::IDENTITY));
        spine.pre_solve();
        assert!(spine.warned);
    }

    #[test]
    fn test_missing_head_target_silent_at_zero_weight() {
        let mut spine = read_spine();
        spine.position_weight = 0.0;

        spine.pre_solve();
        assert!(!spine.warned);
    }

    #[test]
    fn test_min_head_height_clamps_low_target() {
        let mut spine = read_spine();
        spine.head_target = Some(Pose::new(Vec3::new(0.0, 0.2, 0.0), Quat::IDENTITY));

        spine.pre_solve();
        spine.apply_offsets();
        assert!(spine.head_position.y >= spine.min_head_height - 1.0e-5);
    }

    #[test]
    fn test_solve_squash_preserves_segment_lengths() {
        let mut spine = read_spine();
        let (mut left, mut right) = read_legs();
        let rest: Vec<f32> = spine
            .part
            .bones
            .windows(2)
            .map(|pair| pair[0].solver_position.distance(pair[1].solver_position))
            .collect();

        // 头部目标下压 0.3，脊柱弯曲但骨长不变
        spine.head_target = Some(Pose::new(Vec3::new(0.0, 1.35, 0.05), Quat::IDENTITY));
        spine.pre_solve();
        left.pre_solve();
        right.pre_solve();
        spine.apply_offsets();

        let mut root = VirtualBone::new(Vec3::ZERO, Quat::IDENTITY);
        let hands = [Vec3::new(-0.7, 1.5, 0.0), Vec3::new(0.7, 1.5, 0.0)];
        spine.solve(&mut root, &mut [&mut left, &mut right], hands);

        for (pair, rest_len) in spine.part.bones.windows(2).zip(&rest) {
            let len = pair[0].solver_position.distance(pair[1].solver_position);
            assert_relative_eq!(len, *rest_len, epsilon = 1.0e-3);
        }
        assert!(spine.head().solver_position.y < 1.6);
    }

    #[test]
    fn test_max_root_angle_turns_root() {
        let mut spine = read_spine();
        let (mut left, mut right) = read_legs();

        // 头部目标向后扭 150 度，根骨骼必须跟转
        spine.head_target = Some(Pose::new(
            Vec3::new(0.0, 1.65, 0.0),
            Quat::from_rotation_y(150.0_f32.to_radians()),
        ));
        spine.pre_solve();
        left.pre_solve();
        right.pre_solve();
        spine.apply_offsets();

        let mut root = VirtualBone::new(Vec3::ZERO, Quat::IDENTITY);
        let hands = [Vec3::new(-0.7, 1.5, 0.0), Vec3::new(0.7, 1.5, 0.0)];
        spine.solve(&mut root, &mut [&mut left, &mut right], hands);

        let turned = quatools::angle(Quat::IDENTITY, root.solver_rotation);
        assert!(turned > 1.0, "root turned {turned} degrees");
    }
}
