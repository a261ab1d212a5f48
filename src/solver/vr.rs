//! 全身求解编排
//!
//! 头 / 双手三点驱动的全身逆运动学：按固定顺序调度脊柱、
//! 步态、双腿、双臂求解，维护读 / 解缓冲并经 TransformAccess
//! 与宿主骨骼交换位姿。

use glam::{Quat, Vec3};

use crate::math::{quatools, v3tools};
use crate::skeleton::{BoneSlot, RotationLimit, SkeletonBinding, TransformAccess};
use crate::{Result, VrikError};

use super::arm::Arm;
use super::leg::Leg;
use super::locomotion::Locomotion;
use super::spine::Spine;
use super::virtual_bone::VirtualBone;
use super::{PositionOffset, RotationOffset};

/// 全身 IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolverVr {
    /// 求解结果在写回时的混入权重
    pub ik_position_weight: f32,
    /// true 时双脚尽量保持落地，头部目标过远时也不抬脚
    pub plant_feet: bool,

    pub spine: Spine,
    pub left_arm: Arm,
    pub right_arm: Arm,
    pub left_leg: Leg,
    pub right_leg: Leg,
    pub locomotion: Locomotion,

    pub root_bone: VirtualBone,

    binding: SkeletonBinding,
    has_chest: bool,
    has_neck: bool,
    has_shoulders: bool,
    has_toes: bool,

    read_positions: Vec<Vec3>,
    read_rotations: Vec<Quat>,
    solved_positions: [Vec3; 2],
    solved_rotations: [Quat; BoneSlot::COUNT],

    default_pelvis_position: Vec3,
    default_rotations: [Quat; BoneSlot::COUNT],

    rotation_limits: [Option<RotationLimit>; BoneSlot::COUNT],
    bind_local_rotations: [Quat; BoneSlot::COUNT],

    root_velocity: Vec3,
    body_offset: Vec3,
    last_offset: Vec3,
    support_leg_index: usize,

    initiated: bool,
    warned_plant_feet: bool,
}

impl Default for IkSolverVr {
    fn default() -> Self {
        Self {
            ik_position_weight: 1.0,
            plant_feet: true,
            spine: Spine::default(),
            left_arm: Arm::default(),
            right_arm: Arm::default(),
            left_leg: Leg::default(),
            right_leg: Leg::default(),
            locomotion: Locomotion::default(),
            root_bone: VirtualBone::new(Vec3::ZERO, Quat::IDENTITY),
            binding: SkeletonBinding::new(),
            has_chest: false,
            has_neck: false,
            has_shoulders: false,
            has_toes: false,
            read_positions: vec![Vec3::ZERO; BoneSlot::COUNT],
            read_rotations: vec![Quat::IDENTITY; BoneSlot::COUNT],
            solved_positions: [Vec3::ZERO; 2],
            solved_rotations: [Quat::IDENTITY; BoneSlot::COUNT],
            default_pelvis_position: Vec3::ZERO,
            default_rotations: [Quat::IDENTITY; BoneSlot::COUNT],
            rotation_limits: [None; BoneSlot::COUNT],
            bind_local_rotations: [Quat::IDENTITY; BoneSlot::COUNT],
            root_velocity: Vec3::ZERO,
            body_offset: Vec3::ZERO,
            last_offset: Vec3::ZERO,
            support_leg_index: 0,
            initiated: false,
            warned_plant_feet: false,
        }
    }
}

impl IkSolverVr {
    #[inline]
    pub fn initiated(&self) -> bool {
        self.initiated
    }

    #[inline]
    pub fn support_leg_index(&self) -> usize {
        self.support_leg_index
    }

    /// 绑定骨架：校验槽位完整性，记录可选骨的存在
    pub fn set_to_binding(&mut self, binding: &SkeletonBinding) -> Result<()> {
        if !binding.is_filled() {
            return Err(VrikError::InvalidReferences(format!(
                "skeleton binding is incomplete, missing: {:?}",
                binding.missing_required()
            )));
        }

        self.binding = *binding;
        self.has_chest = binding.has(BoneSlot::Chest);
        self.has_neck = binding.has(BoneSlot::Neck);
        self.has_shoulders =
            binding.has(BoneSlot::LeftShoulder) && binding.has(BoneSlot::RightShoulder);
        self.has_toes = binding.has(BoneSlot::LeftToes) && binding.has(BoneSlot::RightToes);

        Ok(())
    }

    /// 手轴配置校验，零向量无法定义手掌朝向
    pub fn validate_hand_axes(&self) -> Result<()> {
        if self.left_arm.wrist_to_palm_axis == Vec3::ZERO {
            return Err(VrikError::ZeroAxis("left arm wrist_to_palm_axis"));
        }
        if self.right_arm.wrist_to_palm_axis == Vec3::ZERO {
            return Err(VrikError::ZeroAxis("right arm wrist_to_palm_axis"));
        }
        if self.left_arm.palm_to_thumb_axis == Vec3::ZERO {
            return Err(VrikError::ZeroAxis("left arm palm_to_thumb_axis"));
        }
        if self.right_arm.palm_to_thumb_axis == Vec3::ZERO {
            return Err(VrikError::ZeroAxis("right arm palm_to_thumb_axis"));
        }
        Ok(())
    }

    /// 记录绑定姿态，瞬移后 fix_transforms 用
    pub fn store_default_state<R: TransformAccess>(&mut self, rig: &R) {
        self.default_pelvis_position = rig.world_position(BoneSlot::Pelvis);
        for &slot in BoneSlot::all() {
            if slot != BoneSlot::Root && self.binding.has(slot) {
                self.default_rotations[slot.index()] = rig.world_rotation(slot);
            }
        }
    }

    /// 回到绑定姿态，供每帧求解前消除漂移
    pub fn fix_transforms<R: TransformAccess>(&self, rig: &mut R) {
        if !self.initiated {
            return;
        }

        rig.set_world_position(BoneSlot::Pelvis, self.default_pelvis_position);
        for &slot in BoneSlot::all() {
            if slot != BoneSlot::Root && self.binding.has(slot) {
                rig.set_world_rotation(slot, self.default_rotations[slot.index()]);
            }
        }
    }

    /// 从宿主骨骼读入当前帧姿态
    pub fn read_transforms<R: TransformAccess>(&mut self, rig: &R) {
        for &slot in BoneSlot::all() {
            if self.binding.has(slot) {
                self.read_positions[slot.index()] = rig.world_position(slot);
                self.read_rotations[slot.index()] = rig.world_rotation(slot);
            }
        }
    }

    /// 把求解结果按 ik_position_weight 混入宿主骨骼
    pub fn write_transforms<R: TransformAccess>(&self, rig: &mut R) {
        for &slot in BoneSlot::all() {
            if !self.binding.has(slot) {
                continue;
            }
            let i = slot.index();

            if i < 2 {
                let position = v3tools::lerp(
                    rig.world_position(slot),
                    self.get_position(i),
                    self.ik_position_weight,
                );
                rig.set_world_position(slot, position);
            }

            let rotation = quatools::lerp(
                rig.world_rotation(slot),
                self.get_rotation(i),
                self.ik_position_weight,
            );
            rig.set_world_rotation(slot, rotation);
        }
    }

    /// 读缓冲进各肢体求解器，首帧同时完成初始化
    pub fn read(&mut self) {
        if !self.initiated {
            self.root_bone = VirtualBone::new(self.read_positions[0], self.read_rotations[0]);
        } else {
            self.root_bone
                .read(self.read_positions[0], self.read_rotations[0]);
        }

        self.spine.read(
            &self.read_positions,
            &self.read_rotations,
            self.has_chest,
            self.has_neck,
            0,
            1,
        );
        let arm_root = if self.has_chest { 3 } else { 2 };
        self.left_arm.read(
            &self.read_positions,
            &self.read_rotations,
            self.has_shoulders,
            arm_root,
            6,
        );
        self.right_arm.read(
            &self.read_positions,
            &self.read_rotations,
            self.has_shoulders,
            arm_root,
            10,
        );
        self.left_leg.read(
            &self.read_positions,
            &self.read_rotations,
            self.has_toes,
            1,
            14,
        );
        self.right_leg.read(
            &self.read_positions,
            &self.read_rotations,
            self.has_toes,
            1,
            18,
        );

        self.solved_positions[0] = self.read_positions[0];
        self.solved_positions[1] = self.read_positions[1];
        for i in 0..BoneSlot::COUNT {
            self.solved_rotations[i] = self.read_rotations[i];
        }

        if !self.initiated {
            self.locomotion
                .initiate(&self.read_positions, &self.read_rotations, self.has_toes);
            self.spine.face_direction = self.read_rotations[0] * Vec3::Z;

            // 绑定姿态的局部旋转，旋转限制的零点
            for &slot in BoneSlot::all() {
                let parent_rotation = match self.parent_slot(slot) {
                    Some(parent) => self.read_rotations[parent.index()],
                    None => Quat::IDENTITY,
                };
                self.bind_local_rotations[slot.index()] =
                    parent_rotation.inverse() * self.read_rotations[slot.index()];
            }
            for &slot in BoneSlot::all() {
                let default = self.bind_local_rotations[slot.index()];
                if let Some(limit) = self.rotation_limits[slot.index()].as_mut() {
                    limit.set_default_local_rotation(default);
                }
            }

            self.initiated = true;
        }
    }

    /// 槽位在求解骨架中的父槽位，随可选骨存在与否回退
    fn parent_slot(&self, slot: BoneSlot) -> Option<BoneSlot> {
        use BoneSlot::*;

        let spine_top = if self.has_chest { Chest } else { Spine };
        Some(match slot {
            Root => return None,
            Pelvis => Root,
            Spine => Pelvis,
            Chest => Spine,
            Neck => spine_top,
            Head => {
                if self.has_neck {
                    Neck
                } else {
                    spine_top
                }
            }
            LeftShoulder | RightShoulder => spine_top,
            LeftUpperArm => {
                if self.has_shoulders {
                    LeftShoulder
                } else {
                    spine_top
                }
            }
            RightUpperArm => {
                if self.has_shoulders {
                    RightShoulder
                } else {
                    spine_top
                }
            }
            LeftForearm => LeftUpperArm,
            LeftHand => LeftForearm,
            RightForearm => RightUpperArm,
            RightHand => RightForearm,
            LeftThigh | RightThigh => Pelvis,
            LeftCalf => LeftThigh,
            LeftFoot => LeftCalf,
            LeftToes => LeftFoot,
            RightCalf => RightThigh,
            RightFoot => RightCalf,
            RightToes => RightFoot,
        })
    }

    /// 给槽位安装旋转限制，零点取绑定姿态的局部旋转
    pub fn set_rotation_limit(&mut self, slot: BoneSlot, axis: Vec3, twist_limit: f32) {
        let mut limit = RotationLimit::new(axis, twist_limit);
        if self.initiated {
            limit.set_default_local_rotation(self.bind_local_rotations[slot.index()]);
        }
        self.rotation_limits[slot.index()] = Some(limit);
    }

    pub fn clear_rotation_limit(&mut self, slot: BoneSlot) {
        self.rotation_limits[slot.index()] = None;
    }

    #[inline]
    pub fn rotation_limit(&self, slot: BoneSlot) -> Option<&RotationLimit> {
        self.rotation_limits[slot.index()].as_ref()
    }

    /// 求解后按父子顺序施加旋转限制
    fn apply_rotation_limits(&mut self) {
        for &slot in BoneSlot::all() {
            let Some(limit) = self.rotation_limits[slot.index()] else {
                continue;
            };
            if !self.binding.has(slot) {
                continue;
            }

            let parent_rotation = match self.parent_slot(slot) {
                Some(parent) => self.solved_rotations[parent.index()],
                None => Quat::IDENTITY,
            };
            let local = parent_rotation.inverse() * self.solved_rotations[slot.index()];
            let (limited, changed) = limit.limited_local_rotation(local);
            if changed {
                self.solved_rotations[slot.index()] = parent_rotation * limited;
            }
        }
    }

    /// 单帧完整求解，调用前 read_transforms + read 必须已执行
    pub fn solve(&mut self, delta_time: f32) {
        // 预求解
        self.spine.pre_solve();
        self.left_arm.pre_solve();
        self.right_arm.pre_solve();
        self.left_leg.pre_solve();
        self.right_leg.pre_solve();

        // 脊柱与手臂偏移
        self.left_arm.apply_offsets();
        self.right_arm.apply_offsets();
        self.spine.apply_offsets();

        // 脊柱
        let hand_positions = [self.left_arm.position, self.right_arm.position];
        {
            let mut legs = [&mut self.left_leg, &mut self.right_leg];
            self.spine
                .solve(&mut self.root_bone, &mut legs, hand_positions);
        }

        if self.spine.pelvis_position_weight > 0.0 && self.plant_feet && !self.warned_plant_feet {
            self.warned_plant_feet = true;
            log::warn!("[VRIK] 骨盆位置权重大于 0 时建议关闭 plant_feet，以改善性能与稳定性");
        }

        // 步态
        if self.locomotion.weight > 0.0 {
            let out = self.locomotion.solve(
                &self.root_bone,
                &self.spine,
                &self.left_leg,
                &self.right_leg,
                &self.left_arm,
                &self.right_arm,
                self.support_leg_index,
                delta_time,
            );

            let root_up = self.root_bone.solver_rotation * Vec3::Y;

            let left_foot_position = out.left_foot_position + root_up * out.left_foot_offset;
            let right_foot_position = out.right_foot_position + root_up * out.right_foot_offset;

            self.left_leg.foot_position_offset += (left_foot_position
                - self.left_leg.last_bone().solver_position)
                * self.ik_position_weight
                * (1.0 - self.left_leg.position_weight)
                * self.locomotion.weight;
            self.right_leg.foot_position_offset += (right_foot_position
                - self.right_leg.last_bone().solver_position)
                * self.ik_position_weight
                * (1.0 - self.right_leg.position_weight)
                * self.locomotion.weight;

            self.left_leg.heel_position_offset +=
                root_up * out.left_heel_offset * self.locomotion.weight;
            self.right_leg.heel_position_offset +=
                root_up * out.right_heel_offset * self.locomotion.weight;

            let rotation_offset_left = quatools::from_to_rotation(
                self.left_leg.last_bone().solver_rotation,
                out.left_foot_rotation,
            );
            let rotation_offset_right = quatools::from_to_rotation(
                self.right_leg.last_bone().solver_rotation,
                out.right_foot_rotation,
            );

            let rotation_offset_left = Quat::IDENTITY.lerp(
                rotation_offset_left,
                self.ik_position_weight
                    * (1.0 - self.left_leg.rotation_weight)
                    * self.locomotion.weight,
            );
            let rotation_offset_right = Quat::IDENTITY.lerp(
                rotation_offset_right,
                self.ik_position_weight
                    * (1.0 - self.right_leg.rotation_weight)
                    * self.locomotion.weight,
            );

            self.left_leg.foot_rotation_offset =
                rotation_offset_left * self.left_leg.foot_rotation_offset;
            self.right_leg.foot_rotation_offset =
                rotation_offset_right * self.right_leg.foot_rotation_offset;

            // 根骨骼向双脚中点靠拢
            let foot_position_c = (self.left_leg.position + self.left_leg.foot_position_offset)
                .lerp(
                    self.right_leg.position + self.right_leg.foot_position_offset,
                    0.5,
                );
            let foot_position_c =
                v3tools::point_to_plane(foot_position_c, self.root_bone.solver_position, root_up);

            self.root_velocity +=
                (foot_position_c - self.root_bone.solver_position) * delta_time * 10.0;
            let root_velocity_v = v3tools::extract_vertical(self.root_velocity, root_up, 1.0);
            self.root_velocity -= root_velocity_v;

            let p = self.root_bone.solver_position
                + self.root_velocity * delta_time * 2.0 * self.locomotion.weight;
            self.root_bone.solver_position = p.lerp(
                foot_position_c,
                delta_time * self.locomotion.root_speed * self.locomotion.weight,
            );

            let body_y_offset = out.left_foot_offset + out.right_foot_offset;
            self.body_offset = self
                .body_offset
                .lerp(root_up * body_y_offset, delta_time * 3.0);
            self.body_offset = Vec3::ZERO.lerp(self.body_offset, self.locomotion.weight);
        }

        // 腿部偏移
        self.left_leg.apply_offsets();
        self.right_leg.apply_offsets();

        // 双腿求解；plant_feet 时做两遍以保持脚趾贴地
        if !self.plant_feet {
            let body_offset = self.body_offset;
            {
                let mut legs = [&mut self.left_leg, &mut self.right_leg];
                self.spine
                    .inverse_translate_to_head(&mut legs, false, false, body_offset, 1.0);
            }
            self.translate_and_solve_legs();
        } else {
            for pass in 0..2 {
                let body_offset = self.body_offset;
                {
                    let mut legs = [&mut self.left_leg, &mut self.right_leg];
                    self.spine.inverse_translate_to_head(
                        &mut legs,
                        true,
                        pass == 0,
                        body_offset,
                        1.0,
                    );
                }
                self.translate_and_solve_legs();
            }
        }

        // 双臂
        let chest_position = self.spine.chest().solver_position;
        let chest_rotation = self.spine.chest().solver_rotation;
        self.left_arm
            .part
            .translate_root(chest_position, chest_rotation);
        self.left_arm.solve(true);
        self.right_arm
            .part
            .translate_root(chest_position, chest_rotation);
        self.right_arm.solve(false);

        // 偏移复位
        self.spine.reset_offsets();
        self.left_leg.reset_offsets();
        self.right_leg.reset_offsets();
        self.left_arm.reset_offsets();
        self.right_arm.reset_offsets();

        let pelvis_offset = self.get_pelvis_offset(delta_time);
        self.spine.pelvis_position_offset += pelvis_offset;
        self.spine.chest_position_offset += self.spine.pelvis_position_offset;

        self.write();

        // 支撑腿：伸展最短的腿
        let left_mag = (self.left_leg.last_bone().solver_position
            - self.left_leg.thigh().solver_position)
            .length_squared();
        let right_mag = (self.right_leg.last_bone().solver_position
            - self.right_leg.thigh().solver_position)
            .length_squared();
        self.support_leg_index = usize::from(right_mag < left_mag);
    }

    fn translate_and_solve_legs(&mut self) {
        let pelvis_position = self.spine.pelvis().solver_position;
        let pelvis_rotation = self.spine.pelvis().solver_rotation;

        self.left_leg
            .part
            .translate_root(pelvis_position, pelvis_rotation);
        self.right_leg
            .part
            .translate_root(pelvis_position, pelvis_rotation);

        self.left_leg.solve();
        self.right_leg.solve();
    }

    /// 求解结果进解缓冲
    fn write(&mut self) {
        self.solved_positions[0] = self.root_bone.solver_position;
        self.solved_rotations[0] = self.root_bone.solver_rotation;

        self.spine
            .write(&mut self.solved_positions, &mut self.solved_rotations);
        self.left_leg.write(&mut self.solved_rotations);
        self.right_leg.write(&mut self.solved_rotations);
        self.left_arm.write(&mut self.solved_rotations);
        self.right_arm.write(&mut self.solved_rotations);

        self.apply_rotation_limits();
    }

    /// 解缓冲中的位置，仅根与骨盆有位置解
    #[inline]
    pub fn get_position(&self, index: usize) -> Vec3 {
        debug_assert!(index < 2, "only root and pelvis positions are solved");
        self.solved_positions[index]
    }

    #[inline]
    pub fn get_rotation(&self, index: usize) -> Quat {
        self.solved_rotations[index]
    }

    /// 给肢体累加位置偏移，作用于本帧目标
    pub fn add_position_offset(&mut self, offset: PositionOffset, value: Vec3) {
        match offset {
            PositionOffset::Pelvis => self.spine.pelvis_position_offset += value,
            PositionOffset::Chest => self.spine.chest_position_offset += value,
            PositionOffset::Head => self.spine.head_position_offset += value,
            PositionOffset::LeftHand => self.left_arm.hand_position_offset += value,
            PositionOffset::RightHand => self.right_arm.hand_position_offset += value,
            PositionOffset::LeftFoot => self.left_leg.foot_position_offset += value,
            PositionOffset::RightFoot => self.right_leg.foot_position_offset += value,
            PositionOffset::LeftHeel => self.left_leg.heel_position_offset += value,
            PositionOffset::RightHeel => self.right_leg.heel_position_offset += value,
        }
    }

    /// 给肢体累加旋转偏移，作用于本帧目标
    pub fn add_rotation_offset(&mut self, offset: RotationOffset, value: Quat) {
        match offset {
            RotationOffset::Pelvis => {
                self.spine.pelvis_rotation_offset = value * self.spine.pelvis_rotation_offset;
            }
            RotationOffset::Chest => {
                self.spine.chest_rotation_offset = value * self.spine.chest_rotation_offset;
            }
            RotationOffset::Head => {
                self.spine.head_rotation_offset = value * self.spine.head_rotation_offset;
            }
        }
    }

    /// 站在移动平台上时每帧调用
    pub fn add_platform_motion(
        &mut self,
        delta_position: Vec3,
        delta_rotation: Quat,
        platform_pivot: Vec3,
    ) {
        self.locomotion.add_delta_position(delta_position);
        self.locomotion.add_delta_rotation(delta_rotation, platform_pivot);
        self.spine.face_direction = delta_rotation * self.spine.face_direction;
    }

    /// 瞬移后复位所有插值状态
    pub fn reset<R: TransformAccess>(&mut self, rig: &R) {
        if !self.initiated {
            return;
        }

        self.read_transforms(rig);
        self.read();

        self.spine.face_direction = self.root_bone.read_rotation * Vec3::Z;
        self.locomotion
            .reset(&self.read_positions, &self.read_rotations);

        self.root_velocity = Vec3::ZERO;
        self.body_offset = Vec3::ZERO;
        self.last_offset = Vec3::ZERO;
    }

    /// 骨盆遮挡偏移的平滑衰减
    fn get_pelvis_offset(&mut self, delta_time: f32) -> Vec3 {
        if self.locomotion.weight <= 0.0 || self.locomotion.blocking_query.is_none() {
            return Vec3::ZERO;
        }

        let pelvis_position = self.spine.pelvis().solver_position;

        self.last_offset = self.last_offset.lerp(Vec3::ZERO, delta_time * 3.0);

        let mut position = pelvis_position + self.last_offset.clamp_length_max(0.75);
        position.y = pelvis_position.y;

        self.last_offset = self
            .last_offset
            .lerp(position - pelvis_position, delta_time * 15.0);
        self.last_offset
    }
}
