//! 虚拟骨骼链
//!
//! 求解只在虚拟副本上进行，宿主骨骼在写出阶段才被修改。
//! 所有世界空间修正旋转统一左乘（delta * solver_rotation）。

use glam::{Quat, Vec3};

use crate::math::{quatools, validate};

/// 虚拟骨骼：读入快照 + 求解状态
#[derive(Clone, Copy, Debug)]
pub struct VirtualBone {
    pub read_position: Vec3,
    pub read_rotation: Quat,

    pub solver_position: Vec3,
    pub solver_rotation: Quat,

    /// 到下一根骨骼的距离（pre_solve 时计算）
    pub length: f32,
    pub sqr_mag: f32,
    /// 指向下一根骨骼的局部轴
    pub axis: Vec3,
}

impl VirtualBone {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        let mut bone = Self {
            read_position: Vec3::ZERO,
            read_rotation: Quat::IDENTITY,
            solver_position: Vec3::ZERO,
            solver_rotation: Quat::IDENTITY,
            length: 0.0,
            sqr_mag: 0.0,
            axis: Vec3::ZERO,
        };
        bone.read(position, rotation);
        bone
    }

    /// 读入当前帧的世界位姿
    pub fn read(&mut self, position: Vec3, rotation: Quat) {
        let rotation = validate::checked_quat(rotation, "VirtualBone::read");
        self.read_position = position;
        self.read_rotation = rotation;
        self.solver_position = position;
        self.solver_rotation = rotation;
    }

    /// 计算骨骼长度与局部轴，返回整条链的总长度
    pub fn pre_solve(bones: &mut [VirtualBone]) -> f32 {
        let mut length = 0.0;

        for i in 0..bones.len() {
            if i < bones.len() - 1 {
                let to_next = bones[i + 1].solver_position - bones[i].solver_position;
                bones[i].sqr_mag = to_next.length_squared();
                bones[i].length = bones[i].sqr_mag.sqrt();
                length += bones[i].length;

                bones[i].axis = bones[i].solver_rotation.inverse() * to_next;
            } else {
                bones[i].sqr_mag = 0.0;
                bones[i].length = 0.0;
            }
        }

        length
    }

    /// 从 index 起整段绕 point 旋转
    pub fn rotate_around_point(bones: &mut [VirtualBone], index: usize, point: Vec3, rotation: Quat) {
        let rotation = validate::checked_quat(rotation, "rotate_around_point");
        for bone in &mut bones[index..] {
            let dir = bone.solver_position - point;
            bone.solver_position = point + rotation * dir;
            bone.solver_rotation =
                validate::checked_quat(rotation * bone.solver_rotation, "rotate_around_point");
        }
    }

    /// 从 index 起整段绕 bones[index] 旋转
    pub fn rotate_index_by(bones: &mut [VirtualBone], index: usize, rotation: Quat) {
        let pivot = bones[index].solver_position;
        Self::rotate_around_point(bones, index, pivot, rotation);
    }

    /// 整条链绕首骨骼旋转
    pub fn rotate_by(bones: &mut [VirtualBone], rotation: Quat) {
        Self::rotate_index_by(bones, 0, rotation);
    }

    /// 把 bones[index] 旋转到目标朝向，其后的骨骼跟随
    pub fn rotate_to(bones: &mut [VirtualBone], index: usize, rotation: Quat) {
        let q = quatools::from_to_rotation(bones[index].solver_rotation, rotation);
        let pivot = bones[index].solver_position;
        Self::rotate_around_point(bones, index, pivot, q);
    }

    /// 把 bones[index] 的轴摆向 swing_target，其后的骨骼跟随
    pub fn swing_rotation(bones: &mut [VirtualBone], index: usize, swing_target: Vec3, weight: f32) {
        if weight <= 0.0 {
            return;
        }

        let mut r = quatools::from_to(
            bones[index].solver_rotation * bones[index].axis,
            swing_target - bones[index].solver_position,
        );
        if weight < 1.0 {
            r = Quat::IDENTITY.lerp(r, weight);
        }

        for bone in &mut bones[index..] {
            bone.solver_rotation =
                validate::checked_quat(r * bone.solver_rotation, "swing_rotation");
        }
    }

    /// 三骨解析求解，行为等价于解析双骨 IK
    pub fn solve_trigonometric(
        bones: &mut [VirtualBone],
        first: usize,
        second: usize,
        third: usize,
        target_position: Vec3,
        bend_normal: Vec3,
        weight: f32,
    ) {
        if weight <= 0.0 {
            return;
        }

        let target_position = bones[third].solver_position.lerp(target_position, weight);

        let dir = target_position - bones[first].solver_position;
        let sqr_mag = dir.length_squared();
        if sqr_mag == 0.0 {
            return;
        }
        let length = sqr_mag.sqrt();

        let sqr_mag1 =
            (bones[second].solver_position - bones[first].solver_position).length_squared();
        let sqr_mag2 =
            (bones[third].solver_position - bones[second].solver_position).length_squared();

        // 弯曲平面内的弯曲方向
        let bend_dir = dir.cross(bend_normal);

        let to_bend_point = Self::direction_to_bend_point(dir, length, bend_dir, sqr_mag1, sqr_mag2);

        // 摆第二根骨骼到解析位置
        let mut q1 = quatools::from_to(
            bones[second].solver_position - bones[first].solver_position,
            to_bend_point,
        );
        if weight < 1.0 {
            q1 = Quat::IDENTITY.lerp(q1, weight);
        }
        let pivot1 = bones[first].solver_position;
        Self::rotate_around_point(bones, first, pivot1, q1);

        // 摆末端到目标
        let mut q2 = quatools::from_to(
            bones[third].solver_position - bones[second].solver_position,
            target_position - bones[second].solver_position,
        );
        if weight < 1.0 {
            q2 = Quat::IDENTITY.lerp(q2, weight);
        }
        let pivot2 = bones[second].solver_position;
        Self::rotate_around_point(bones, second, pivot2, q2);
    }

    /// 余弦定理求弯曲点方向。注意返回向量的模不等于第一根骨骼的长度。
    fn direction_to_bend_point(
        direction: Vec3,
        direction_mag: f32,
        bend_direction: Vec3,
        sqr_mag1: f32,
        sqr_mag2: f32,
    ) -> Vec3 {
        let x = (direction_mag * direction_mag + (sqr_mag1 - sqr_mag2)) / 2.0 / direction_mag;
        // 目标超出可达范围时压平三角形
        let y = (sqr_mag1 - x * x).max(0.0).sqrt();

        if direction.length_squared() == 0.0 {
            return Vec3::ZERO;
        }
        quatools::look_rotation(direction, bend_direction) * Vec3::new(0.0, y, x)
    }

    /// 简单 FABRIK 两阶段迭代，不含旋转限制与奇点破除。
    /// 求解位置后用 swing 旋转重建骨骼朝向。
    pub fn solve_fabrik(
        bones: &mut [VirtualBone],
        start_position: Vec3,
        target_position: Vec3,
        weight: f32,
        min_normalized_target_distance: f32,
        iterations: u32,
        length: f32,
    ) {
        if weight <= 0.0 {
            return;
        }

        let mut target_position = target_position;
        if min_normalized_target_distance > 0.0 {
            let target_direction = target_position - start_position;
            let target_length = target_direction.length();
            if target_length > 0.0 {
                let max = (length * min_normalized_target_distance).max(target_length);
                target_position = start_position + target_direction / target_length * max;
            }
        }

        let last = bones.len() - 1;

        for _ in 0..iterations {
            // 前向：末端拉向目标，向根回推
            bones[last].solver_position = bones[last].solver_position.lerp(target_position, weight);

            for i in (0..last).rev() {
                bones[i].solver_position = Self::solve_fabrik_joint(
                    bones[i].solver_position,
                    bones[i + 1].solver_position,
                    bones[i].length,
                );
            }

            // 后向：根固定，向末端恢复骨长
            bones[0].solver_position = start_position;

            for i in 1..bones.len() {
                bones[i].solver_position = Self::solve_fabrik_joint(
                    bones[i].solver_position,
                    bones[i - 1].solver_position,
                    bones[i - 1].length,
                );
            }
        }

        for i in 0..last {
            let swing_target = bones[i + 1].solver_position;
            Self::swing_rotation(bones, i, swing_target, 1.0);
        }
    }

    /// 单个 FABRIK 关节：把 pos1 拉到距 pos2 恰好 length 处
    fn solve_fabrik_joint(pos1: Vec3, pos2: Vec3, length: f32) -> Vec3 {
        pos2 + (pos1 - pos2).normalize_or_zero() * length
    }

    /// CCD 迭代求解
    pub fn solve_ccd(
        bones: &mut [VirtualBone],
        target_position: Vec3,
        weight: f32,
        iterations: u32,
    ) {
        if weight <= 0.0 {
            return;
        }

        let last = bones.len() - 1;

        for _ in 0..iterations {
            for i in (0..last).rev() {
                let to_last_bone = bones[last].solver_position - bones[i].solver_position;
                let to_target = target_position - bones[i].solver_position;

                let rotation = quatools::from_to(to_last_bone, to_target);

                if weight >= 1.0 {
                    Self::rotate_index_by(bones, i, rotation);
                } else {
                    Self::rotate_index_by(bones, i, Quat::IDENTITY.lerp(rotation, weight));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Y 轴向上的竖直三骨链，骨长 len
    fn vertical_chain(len: f32) -> Vec<VirtualBone> {
        let mut bones = vec![
            VirtualBone::new(Vec3::ZERO, Quat::IDENTITY),
            VirtualBone::new(Vec3::new(0.0, len, 0.0), Quat::IDENTITY),
            VirtualBone::new(Vec3::new(0.0, 2.0 * len, 0.0), Quat::IDENTITY),
        ];
        VirtualBone::pre_solve(&mut bones);
        bones
    }

    fn chain_lengths(bones: &[VirtualBone]) -> Vec<f32> {
        (0..bones.len() - 1)
            .map(|i| (bones[i + 1].solver_position - bones[i].solver_position).length())
            .collect()
    }

    fn assert_unit_quats(bones: &[VirtualBone]) {
        for bone in bones {
            assert!(bone.solver_rotation.is_finite());
            assert_relative_eq!(bone.solver_rotation.length(), 1.0, epsilon = 1.0e-4);
        }
    }

    #[test]
    fn test_pre_solve_lengths_and_axes() {
        let mut bones = vertical_chain(0.5);
        let total = VirtualBone::pre_solve(&mut bones);
        assert_relative_eq!(total, 1.0, epsilon = 1.0e-5);
        assert_relative_eq!(bones[0].length, 0.5, epsilon = 1.0e-5);
        assert_relative_eq!(bones[2].length, 0.0);
        // 单位旋转下局部轴即世界方向
        assert!((bones[0].axis - Vec3::new(0.0, 0.5, 0.0)).length() < 1.0e-5);
    }

    #[test]
    fn test_rotate_around_point_moves_positions_and_rotations() {
        let mut bones = vertical_chain(1.0);
        let rotation = Quat::from_rotation_z(-std::f32::consts::FRAC_PI_2);
        VirtualBone::rotate_around_point(&mut bones, 0, Vec3::ZERO, rotation);

        // 竖直链被旋转到 X 轴上
        assert!((bones[2].solver_position - Vec3::new(2.0, 0.0, 0.0)).length() < 1.0e-4);
        assert_unit_quats(&bones);
    }

    #[test]
    fn test_rotate_to_matches_target_rotation() {
        let mut bones = vertical_chain(1.0);
        let target = Quat::from_rotation_y(0.7);
        VirtualBone::rotate_to(&mut bones, 1, target);
        assert!(bones[1].solver_rotation.dot(target).abs() > 1.0 - 1.0e-5);
    }

    #[test]
    fn test_trigonometric_reachable_target() {
        // 0.45 + 0.45 的链触达 0.6 处的目标
        let mut bones = vec![
            VirtualBone::new(Vec3::ZERO, Quat::IDENTITY),
            VirtualBone::new(Vec3::new(0.0, 0.45, 0.0), Quat::IDENTITY),
            VirtualBone::new(Vec3::new(0.0, 0.9, 0.0), Quat::IDENTITY),
        ];
        VirtualBone::pre_solve(&mut bones);

        let target = Vec3::new(0.6, 0.0, 0.0);
        VirtualBone::solve_trigonometric(&mut bones, 0, 1, 2, target, Vec3::Z, 1.0);

        assert!((bones[2].solver_position - target).length() < 1.0e-3);
        // 骨长不变
        for len in chain_lengths(&bones) {
            assert_relative_eq!(len, 0.45, epsilon = 1.0e-3);
        }
        assert_unit_quats(&bones);
    }

    #[test]
    fn test_trigonometric_unreachable_target_straightens_chain() {
        let mut bones = vertical_chain(0.5);
        let target = Vec3::new(5.0, 0.0, 0.0);
        VirtualBone::solve_trigonometric(&mut bones, 0, 1, 2, target, Vec3::Z, 1.0);

        // 链伸直指向目标，末端在总长处
        assert!((bones[2].solver_position - Vec3::new(1.0, 0.0, 0.0)).length() < 1.0e-3);
        for len in chain_lengths(&bones) {
            assert_relative_eq!(len, 0.5, epsilon = 1.0e-3);
        }
    }

    #[test]
    fn test_trigonometric_zero_weight_is_noop() {
        let mut bones = vertical_chain(0.5);
        let before: Vec<Vec3> = bones.iter().map(|b| b.solver_position).collect();
        VirtualBone::solve_trigonometric(&mut bones, 0, 1, 2, Vec3::X, Vec3::Z, 0.0);
        for (bone, pos) in bones.iter().zip(before) {
            assert_eq!(bone.solver_position, pos);
        }
    }

    #[test]
    fn test_fabrik_preserves_bone_lengths() {
        let mut bones = vertical_chain(0.3);
        let total = VirtualBone::pre_solve(&mut bones);

        let target = Vec3::new(0.4, 0.2, 0.1);
        VirtualBone::solve_fabrik(&mut bones, Vec3::ZERO, target, 1.0, 0.0, 4, total);

        for len in chain_lengths(&bones) {
            assert_relative_eq!(len, 0.3, epsilon = 1.0e-4);
        }
        assert!((bones[2].solver_position - target).length() < 1.0e-2);
        assert_unit_quats(&bones);
    }

    #[test]
    fn test_fabrik_min_target_distance_prevents_full_squash() {
        // 总长 1.0 的链，目标距根 0.3，最小归一化距离 0.6
        let mut bones = vertical_chain(0.5);
        let total = VirtualBone::pre_solve(&mut bones);

        let target = Vec3::new(0.3, 0.0, 0.0);
        VirtualBone::solve_fabrik(&mut bones, Vec3::ZERO, target, 1.0, 0.6, 4, total);

        let end_distance = bones[2].solver_position.length();
        assert!(end_distance > 0.5, "end_distance = {}", end_distance);
        for len in chain_lengths(&bones) {
            assert_relative_eq!(len, 0.5, epsilon = 1.0e-4);
        }
    }

    #[test]
    fn test_ccd_converges_to_target() {
        let mut bones = vec![
            VirtualBone::new(Vec3::ZERO, Quat::IDENTITY),
            VirtualBone::new(Vec3::new(0.0, 0.4, 0.0), Quat::IDENTITY),
            VirtualBone::new(Vec3::new(0.0, 0.8, 0.0), Quat::IDENTITY),
            VirtualBone::new(Vec3::new(0.0, 1.2, 0.0), Quat::IDENTITY),
        ];
        VirtualBone::pre_solve(&mut bones);

        let target = Vec3::new(0.5, 0.5, 0.2);
        VirtualBone::solve_ccd(&mut bones, target, 1.0, 16);

        assert!((bones[3].solver_position - target).length() < 1.0e-2);
        for len in chain_lengths(&bones) {
            assert_relative_eq!(len, 0.4, epsilon = 1.0e-4);
        }
        assert_unit_quats(&bones);
    }

    #[test]
    fn test_swing_rotation_aims_axis() {
        let mut bones = vertical_chain(1.0);
        let target = Vec3::new(1.0, 0.0, 0.0);
        VirtualBone::swing_rotation(&mut bones, 0, target, 1.0);

        let aimed = bones[0].solver_rotation * bones[0].axis;
        let expected = (target - bones[0].solver_position).normalize();
        assert!(aimed.normalize().dot(expected) > 1.0 - 1.0e-4);
    }
}
