//! 求解器生命周期
//!
//! 包一层状态机：初始化校验一次性完成，之后每帧固定
//! 读-解-写流程，支持暂停与瞬移复位。

use crate::skeleton::{SkeletonBinding, TransformAccess};
use crate::{Result, VrikError};

use super::vr::IkSolverVr;

/// 生命周期状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverState {
    #[default]
    Uninitiated,
    Initiated,
}

/// IkSolverVr 的宿主侧封装
#[derive(Clone, Debug, Default)]
pub struct SolverManager {
    pub solver: IkSolverVr,
    /// true 时跳过求解，用于临时接管骨骼的过场
    pub paused: bool,
    /// true 时每帧求解前把骨骼还原到绑定姿态
    pub fix_transforms: bool,

    state: SolverState,
}

impl SolverManager {
    #[inline]
    pub fn state(&self) -> SolverState {
        self.state
    }

    /// 绑定并初始化，配置错误在此处一次性失败
    pub fn initiate<R: TransformAccess>(
        &mut self,
        binding: &SkeletonBinding,
        rig: &R,
    ) -> Result<()> {
        if self.state == SolverState::Initiated {
            return Ok(());
        }

        self.solver.set_to_binding(binding)?;
        self.solver.validate_hand_axes()?;

        self.solver.store_default_state(rig);
        self.solver.read_transforms(rig);
        self.solver.read();

        self.state = SolverState::Initiated;
        Ok(())
    }

    /// 每帧求解，未初始化或权重为 0 时不触碰骨骼
    pub fn update<R: TransformAccess>(&mut self, rig: &mut R, delta_time: f32) {
        if self.state != SolverState::Initiated || self.paused {
            return;
        }
        if self.solver.ik_position_weight <= 0.0 {
            return;
        }

        if self.fix_transforms {
            self.solver.fix_transforms(rig);
        }

        self.solver.read_transforms(rig);
        self.solver.read();
        self.solver.solve(delta_time);
        self.solver.write_transforms(rig);
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// 瞬移后调用，清掉所有插值状态
    pub fn reset<R: TransformAccess>(&mut self, rig: &R) -> Result<()> {
        if self.state != SolverState::Initiated {
            return Err(VrikError::NotInitiated);
        }
        self.solver.reset(rig);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{BoneSlot, Pose};
    use crate::VrikError;
    use glam::{Quat, Vec3};
    use std::collections::HashMap;

    struct StickRig {
        positions: HashMap<BoneSlot, Vec3>,
        rotations: HashMap<BoneSlot, Quat>,
        writes: usize,
    }

    impl StickRig {
        fn new() -> Self {
            let heights = [
                (BoneSlot::Root, Vec3::ZERO),
                (BoneSlot::Pelvis, Vec3::new(0.0, 1.0, 0.0)),
                (BoneSlot::Spine, Vec3::new(0.0, 1.2, 0.0)),
                (BoneSlot::Chest, Vec3::new(0.0, 1.35, 0.0)),
                (BoneSlot::Neck, Vec3::new(0.0, 1.55, 0.0)),
                (BoneSlot::Head, Vec3::new(0.0, 1.65, 0.0)),
                (BoneSlot::LeftShoulder, Vec3::new(-0.05, 1.5, 0.0)),
                (BoneSlot::LeftUpperArm, Vec3::new(-0.2, 1.5, 0.0)),
                (BoneSlot::LeftForearm, Vec3::new(-0.45, 1.5, 0.0)),
                (BoneSlot::LeftHand, Vec3::new(-0.7, 1.5, 0.0)),
                (BoneSlot::RightShoulder, Vec3::new(0.05, 1.5, 0.0)),
                (BoneSlot::RightUpperArm, Vec3::new(0.2, 1.5, 0.0)),
                (BoneSlot::RightForearm, Vec3::new(0.45, 1.5, 0.0)),
                (BoneSlot::RightHand, Vec3::new(0.7, 1.5, 0.0)),
                (BoneSlot::LeftThigh, Vec3::new(-0.1, 0.95, 0.0)),
                (BoneSlot::LeftCalf, Vec3::new(-0.1, 0.5, 0.0)),
                (BoneSlot::LeftFoot, Vec3::new(-0.1, 0.05, 0.0)),
                (BoneSlot::LeftToes, Vec3::new(-0.1, 0.02, 0.12)),
                (BoneSlot::RightThigh, Vec3::new(0.1, 0.95, 0.0)),
                (BoneSlot::RightCalf, Vec3::new(0.1, 0.5, 0.0)),
                (BoneSlot::RightFoot, Vec3::new(0.1, 0.05, 0.0)),
                (BoneSlot::RightToes, Vec3::new(0.1, 0.02, 0.12)),
            ];

            let mut positions = HashMap::new();
            let mut rotations = HashMap::new();
            for (slot, p) in heights {
                positions.insert(slot, p);
                rotations.insert(slot, Quat::IDENTITY);
            }
            Self {
                positions,
                rotations,
                writes: 0,
            }
        }
    }

    impl TransformAccess for StickRig {
        fn world_position(&self, slot: BoneSlot) -> Vec3 {
            self.positions[&slot]
        }

        fn world_rotation(&self, slot: BoneSlot) -> Quat {
            self.rotations[&slot]
        }

        fn set_world_position(&mut self, slot: BoneSlot, position: Vec3) {
            self.positions.insert(slot, position);
            self.writes += 1;
        }

        fn set_world_rotation(&mut self, slot: BoneSlot, rotation: Quat) {
            self.rotations.insert(slot, rotation);
            self.writes += 1;
        }
    }

    fn configured_manager() -> SolverManager {
        let mut manager = SolverManager::default();
        manager.solver.left_arm.wrist_to_palm_axis = Vec3::NEG_X;
        manager.solver.left_arm.palm_to_thumb_axis = Vec3::Z;
        manager.solver.right_arm.wrist_to_palm_axis = Vec3::X;
        manager.solver.right_arm.palm_to_thumb_axis = Vec3::Z;
        manager
    }

    #[test]
    fn test_initiate_fails_on_empty_binding() {
        let rig = StickRig::new();
        let mut manager = configured_manager();
        let result = manager.initiate(&SkeletonBinding::new(), &rig);
        assert!(matches!(result, Err(VrikError::InvalidReferences(_))));
        assert_eq!(manager.state(), SolverState::Uninitiated);
    }

    #[test]
    fn test_initiate_fails_on_zero_hand_axis() {
        let rig = StickRig::new();
        let mut manager = SolverManager::default();
        let result = manager.initiate(&SkeletonBinding::full(), &rig);
        assert!(matches!(result, Err(VrikError::ZeroAxis(_))));
    }

    #[test]
    fn test_initiate_then_update_writes_rig() {
        let mut rig = StickRig::new();
        let mut manager = configured_manager();
        manager
            .initiate(&SkeletonBinding::full(), &rig)
            .unwrap();
        assert_eq!(manager.state(), SolverState::Initiated);

        manager.solver.spine.head_target = Some(Pose::new(
            Vec3::new(0.0, 1.6, 0.05),
            Quat::IDENTITY,
        ));
        manager.update(&mut rig, 1.0 / 90.0);
        assert!(rig.writes > 0);
    }

    #[test]
    fn test_update_skipped_when_paused() {
        let mut rig = StickRig::new();
        let mut manager = configured_manager();
        manager
            .initiate(&SkeletonBinding::full(), &rig)
            .unwrap();

        manager.pause();
        manager.update(&mut rig, 1.0 / 90.0);
        assert_eq!(rig.writes, 0);

        manager.resume();
        manager.update(&mut rig, 1.0 / 90.0);
        assert!(rig.writes > 0);
    }

    #[test]
    fn test_update_skipped_at_zero_weight() {
        let mut rig = StickRig::new();
        let mut manager = configured_manager();
        manager
            .initiate(&SkeletonBinding::full(), &rig)
            .unwrap();

        manager.solver.ik_position_weight = 0.0;
        manager.update(&mut rig, 1.0 / 90.0);
        assert_eq!(rig.writes, 0);
    }

    #[test]
    fn test_update_before_initiate_is_noop() {
        let mut rig = StickRig::new();
        let mut manager = configured_manager();
        manager.update(&mut rig, 1.0 / 90.0);
        assert_eq!(rig.writes, 0);
    }

    #[test]
    fn test_reset_before_initiate_fails() {
        let rig = StickRig::new();
        let mut manager = configured_manager();
        assert!(matches!(
            manager.reset(&rig),
            Err(VrikError::NotInitiated)
        ));
    }
}
