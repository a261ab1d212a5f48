//! 全身 IK 求解器
//!
//! 核心设计思想：
//! - VirtualBone: 求解期间的虚拟骨骼副本，链操作全部在其上进行
//! - BodyPart + Spine/Arm/Leg: 按肢体划分的子求解器
//! - Footstep/Locomotion: 程序化步态
//! - IkSolverVr: 每帧 read -> solve -> write 的编排
//! - SolverManager: 初始化与逐帧更新的生命周期

pub mod arm;
pub mod body_part;
pub mod footstep;
pub mod leg;
pub mod locomotion;
pub mod manager;
pub mod spine;
pub mod virtual_bone;
pub mod vr;

pub use arm::{Arm, ShoulderRotationMode};
pub use body_part::BodyPart;
pub use footstep::Footstep;
pub use leg::Leg;
pub use locomotion::{Locomotion, LocomotionOutput, ObstructionQuery};
pub use manager::{SolverManager, SolverState};
pub use spine::Spine;
pub use virtual_bone::VirtualBone;
pub use vr::IkSolverVr;

/// 位置偏移的目标骨骼
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionOffset {
    Pelvis,
    Chest,
    Head,
    LeftHand,
    RightHand,
    LeftFoot,
    RightFoot,
    LeftHeel,
    RightHeel,
}

/// 旋转偏移的目标骨骼
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationOffset {
    Pelvis,
    Chest,
    Head,
}
