//! VRIK 引擎 - 全身 VR 逆向运动学运行时
//!
//! 设计原则：
//! - 三个 6-DOF 目标（头部 + 双手）驱动约 20 根骨骼的全身姿态
//! - 虚拟骨骼链：解析三角求解 + FABRIK 迭代求解 + CCD 兜底
//! - 程序化步态状态机（重心驱动）
//! - 宿主通过 [`TransformAccess`] 提供骨骼读写，求解器不持有场景图

pub mod math;
pub mod skeleton;
pub mod solver;

use thiserror::Error;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum VrikError {
    /// 骨骼引用不完整或层级非法（初始化时致命）
    #[error("Invalid bone references: {0}")]
    InvalidReferences(String),

    /// 配置的方向轴为零向量（初始化时致命）
    #[error("Axis must not be zero: {0}")]
    ZeroAxis(&'static str),

    /// 在未初始化的求解器上调用了 update/reset
    #[error("Solver has not been initiated")]
    NotInitiated,

    /// 数值损坏（NaN / 非单位四元数）
    #[error("Numerical corruption detected at {0}")]
    NumericalCorruption(&'static str),
}

/// 引擎 Result 类型
pub type Result<T> = std::result::Result<T, VrikError>;

pub use math::curve::{AnimationCurve, Keyframe};
pub use math::interp::InterpolationMode;
pub use skeleton::{BoneSlot, Pose, RigFlags, RotationLimit, SkeletonBinding, TransformAccess};
pub use solver::manager::{SolverManager, SolverState};
pub use solver::vr::IkSolverVr;
