//! 肢体公共状态
//!
//! Spine/Arm/Leg 各自内嵌一份 BodyPart，持有虚拟骨骼链与
//! 读入时捕获的根位姿 / 链长。

use glam::{Quat, Vec3};

use crate::math::quatools;

use super::virtual_bone::VirtualBone;

/// 肢体链的共享状态
#[derive(Clone, Debug, Default)]
pub struct BodyPart {
    pub bones: Vec<VirtualBone>,
    pub initiated: bool,

    /// 读入时的根骨骼位姿
    pub root_position: Vec3,
    pub root_rotation: Quat,

    /// 链总长与其平方（读入时计算）
    pub mag: f32,
    pub sqr_mag: f32,

    /// 该肢体在读缓冲中的起始下标
    pub index: usize,
}

impl BodyPart {
    /// 读入根位姿并记录起始下标，随后由肢体填充 bones
    pub fn begin_read(&mut self, root_position: Vec3, root_rotation: Quat, index: usize) {
        self.index = index;
        self.root_position = root_position;
        self.root_rotation = root_rotation;
    }

    /// bones 填充完毕后计算链长
    pub fn finish_read(&mut self) {
        self.mag = VirtualBone::pre_solve(&mut self.bones);
        self.sqr_mag = self.mag * self.mag;
        self.initiated = true;
    }

    /// 平移整条链，使首骨骼位于 position
    pub fn move_position(&mut self, position: Vec3) {
        let delta = position - self.bones[0].solver_position;
        for bone in &mut self.bones {
            bone.solver_position += delta;
        }
    }

    /// 旋转整条链，使首骨骼朝向 rotation
    pub fn move_rotation(&mut self, rotation: Quat) {
        let delta = quatools::from_to_rotation(self.bones[0].solver_rotation, rotation);
        let pivot = self.bones[0].solver_position;
        VirtualBone::rotate_around_point(&mut self.bones, 0, pivot, delta);
    }

    /// 平移加旋转
    pub fn translate(&mut self, position: Vec3, rotation: Quat) {
        self.move_position(position);
        self.move_rotation(rotation);
    }

    /// 根骨骼移动到新位姿，整条链刚体跟随
    pub fn translate_root(&mut self, new_root_pos: Vec3, new_root_rot: Quat) {
        let delta_position = new_root_pos - self.root_position;
        self.root_position = new_root_pos;
        for bone in &mut self.bones {
            bone.solver_position += delta_position;
        }

        let delta_rotation = quatools::from_to_rotation(self.root_rotation, new_root_rot);
        self.root_rotation = new_root_rot;

        VirtualBone::rotate_around_point(&mut self.bones, 0, new_root_pos, delta_rotation);
    }

    /// 把 bone_index 处的骨骼旋转到目标朝向，其后的骨骼跟随
    pub fn rotate_to(&mut self, bone_index: usize, rotation: Quat, weight: f32) {
        if weight <= 0.0 {
            return;
        }

        let mut q = quatools::from_to_rotation(self.bones[bone_index].solver_rotation, rotation);
        if weight < 1.0 {
            q = Quat::IDENTITY.slerp(q, weight);
        }

        let pivot = self.bones[bone_index].solver_position;
        VirtualBone::rotate_around_point(&mut self.bones, bone_index, pivot, q);
    }
}
