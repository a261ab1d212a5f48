//! 骨骼约定层
//!
//! 核心设计思想：
//! - BoneSlot: 人形骨骼的固定槽位编号，求解器内部全部按槽位寻址
//! - SkeletonBinding: 宿主骨架到槽位的填充情况与校验
//! - TransformAccess: 宿主提供的世界空间读写接口，求解器不持有场景图

pub mod rotation_limit;

pub use rotation_limit::RotationLimit;

use glam::{Quat, Vec3};

use bitflags::bitflags;

// ============================================================================
// 槽位定义
// ============================================================================

/// 人形骨骼槽位
///
/// 顺序即读缓冲布局：脊柱链、左右臂、左右腿依次排列。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BoneSlot {
    Root = 0,
    Pelvis = 1,
    Spine = 2,
    /// 可选
    Chest = 3,
    /// 可选
    Neck = 4,
    Head = 5,
    /// 可选
    LeftShoulder = 6,
    LeftUpperArm = 7,
    LeftForearm = 8,
    LeftHand = 9,
    /// 可选
    RightShoulder = 10,
    RightUpperArm = 11,
    RightForearm = 12,
    RightHand = 13,
    LeftThigh = 14,
    LeftCalf = 15,
    LeftFoot = 16,
    /// 可选
    LeftToes = 17,
    RightThigh = 18,
    RightCalf = 19,
    RightFoot = 20,
    /// 可选
    RightToes = 21,
}

impl BoneSlot {
    /// 槽位总数
    pub const COUNT: usize = 22;

    const ALL: [BoneSlot; Self::COUNT] = [
        BoneSlot::Root,
        BoneSlot::Pelvis,
        BoneSlot::Spine,
        BoneSlot::Chest,
        BoneSlot::Neck,
        BoneSlot::Head,
        BoneSlot::LeftShoulder,
        BoneSlot::LeftUpperArm,
        BoneSlot::LeftForearm,
        BoneSlot::LeftHand,
        BoneSlot::RightShoulder,
        BoneSlot::RightUpperArm,
        BoneSlot::RightForearm,
        BoneSlot::RightHand,
        BoneSlot::LeftThigh,
        BoneSlot::LeftCalf,
        BoneSlot::LeftFoot,
        BoneSlot::LeftToes,
        BoneSlot::RightThigh,
        BoneSlot::RightCalf,
        BoneSlot::RightFoot,
        BoneSlot::RightToes,
    ];

    /// 全部槽位，按读缓冲顺序
    #[inline]
    pub fn all() -> &'static [BoneSlot; Self::COUNT] {
        &Self::ALL
    }

    /// 槽位在读缓冲中的下标
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// 按下标取槽位
    #[inline]
    pub fn from_index(index: usize) -> Option<BoneSlot> {
        Self::ALL.get(index).copied()
    }

    /// 该槽位是否允许缺省
    #[inline]
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            BoneSlot::Chest
                | BoneSlot::Neck
                | BoneSlot::LeftShoulder
                | BoneSlot::RightShoulder
                | BoneSlot::LeftToes
                | BoneSlot::RightToes
        )
    }
}

bitflags! {
    /// 可选骨骼的存在标志
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct RigFlags: u8 {
        const HAS_CHEST     = 1 << 0;
        const HAS_NECK      = 1 << 1;
        /// 双侧肩骨都存在时才置位
        const HAS_SHOULDERS = 1 << 2;
        /// 双侧趾骨都存在时才置位
        const HAS_TOES      = 1 << 3;
    }
}

// ============================================================================
// 骨架绑定
// ============================================================================

/// 宿主骨架到槽位的填充情况
#[derive(Clone, Copy, Debug, Default)]
pub struct SkeletonBinding {
    present: [bool; BoneSlot::COUNT],
}

impl SkeletonBinding {
    /// 空绑定
    pub fn new() -> Self {
        Self::default()
    }

    /// 全槽位绑定（含所有可选骨骼）
    pub fn full() -> Self {
        Self {
            present: [true; BoneSlot::COUNT],
        }
    }

    /// 仅必选槽位的绑定
    pub fn required_only() -> Self {
        let mut binding = Self::new();
        for &slot in BoneSlot::all() {
            if !slot.is_optional() {
                binding.set(slot, true);
            }
        }
        binding
    }

    #[inline]
    pub fn set(&mut self, slot: BoneSlot, present: bool) {
        self.present[slot.index()] = present;
    }

    #[inline]
    pub fn has(&self, slot: BoneSlot) -> bool {
        self.present[slot.index()]
    }

    /// 所有必选槽位均已填充
    pub fn is_filled(&self) -> bool {
        BoneSlot::all()
            .iter()
            .all(|&slot| slot.is_optional() || self.has(slot))
    }

    /// 没有任何槽位被填充
    pub fn is_empty(&self) -> bool {
        self.present.iter().all(|&p| !p)
    }

    /// 推导可选骨骼标志
    ///
    /// 肩骨与趾骨必须成对出现才会置位。
    pub fn flags(&self) -> RigFlags {
        let mut flags = RigFlags::empty();
        if self.has(BoneSlot::Chest) {
            flags |= RigFlags::HAS_CHEST;
        }
        if self.has(BoneSlot::Neck) {
            flags |= RigFlags::HAS_NECK;
        }
        if self.has(BoneSlot::LeftShoulder) && self.has(BoneSlot::RightShoulder) {
            flags |= RigFlags::HAS_SHOULDERS;
        }
        if self.has(BoneSlot::LeftToes) && self.has(BoneSlot::RightToes) {
            flags |= RigFlags::HAS_TOES;
        }
        flags
    }

    /// 缺失的必选槽位列表，用于错误信息
    pub fn missing_required(&self) -> Vec<BoneSlot> {
        BoneSlot::all()
            .iter()
            .filter(|&&slot| !slot.is_optional() && !self.has(slot))
            .copied()
            .collect()
    }
}

// ============================================================================
// 公共类型
// ============================================================================

/// 6-DOF 位姿
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    #[inline]
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}

/// 宿主骨骼的世界空间读写接口
///
/// 求解器每帧先读后写，同一帧内不会与宿主并发访问同一骨骼。
/// 缺省槽位不会被访问。
pub trait TransformAccess {
    fn world_position(&self, slot: BoneSlot) -> Vec3;
    fn world_rotation(&self, slot: BoneSlot) -> Quat;
    fn set_world_position(&mut self, slot: BoneSlot, position: Vec3);
    fn set_world_rotation(&mut self, slot: BoneSlot, rotation: Quat);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_index_round_trip() {
        for &slot in BoneSlot::all() {
            assert_eq!(BoneSlot::from_index(slot.index()), Some(slot));
        }
        assert_eq!(BoneSlot::from_index(BoneSlot::COUNT), None);
    }

    #[test]
    fn test_required_only_is_filled() {
        let binding = SkeletonBinding::required_only();
        assert!(binding.is_filled());
        assert_eq!(binding.flags(), RigFlags::empty());
    }

    #[test]
    fn test_missing_required_reported() {
        let mut binding = SkeletonBinding::required_only();
        binding.set(BoneSlot::Head, false);
        assert!(!binding.is_filled());
        assert_eq!(binding.missing_required(), vec![BoneSlot::Head]);
    }

    #[test]
    fn test_shoulders_require_both_sides() {
        let mut binding = SkeletonBinding::required_only();
        binding.set(BoneSlot::LeftShoulder, true);
        assert!(!binding.flags().contains(RigFlags::HAS_SHOULDERS));
        binding.set(BoneSlot::RightShoulder, true);
        assert!(binding.flags().contains(RigFlags::HAS_SHOULDERS));
    }

    #[test]
    fn test_full_binding_flags() {
        let flags = SkeletonBinding::full().flags();
        assert_eq!(
            flags,
            RigFlags::HAS_CHEST | RigFlags::HAS_NECK | RigFlags::HAS_SHOULDERS | RigFlags::HAS_TOES
        );
    }

    #[test]
    fn test_empty_binding() {
        assert!(SkeletonBinding::new().is_empty());
        assert!(!SkeletonBinding::full().is_empty());
    }
}
