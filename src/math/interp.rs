//! 缓动函数
//!
//! 步态插值与手臂阻尼使用的多项式 / 正弦缓动。

use glam::Vec3;

/// 插值模式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InterpolationMode {
    /// 线性
    #[default]
    None,
    InSine,
    OutSine,
    InOutSine,
    InCubic,
    OutCubic,
    InOutCubic,
    InQuintic,
    OutQuintic,
    InOutQuintic,
    InBack,
    OutBack,
}

pub struct Interp;

impl Interp {
    /// 按插值模式映射 t，t 在 [0, 1] 内
    pub fn float(t: f32, mode: InterpolationMode) -> f32 {
        let ts = t * t;
        let tc = ts * t;

        match mode {
            InterpolationMode::None => t,
            InterpolationMode::InSine => 1.0 - (t * std::f32::consts::FRAC_PI_2).cos(),
            InterpolationMode::OutSine => (t * std::f32::consts::FRAC_PI_2).sin(),
            InterpolationMode::InOutSine => -0.5 * ((std::f32::consts::PI * t).cos() - 1.0),
            InterpolationMode::InCubic => tc,
            InterpolationMode::OutCubic => tc - 3.0 * ts + 3.0 * t,
            InterpolationMode::InOutCubic => -2.0 * tc + 3.0 * ts,
            InterpolationMode::InQuintic => tc * ts,
            InterpolationMode::OutQuintic => {
                tc * ts - 5.0 * ts * ts + 10.0 * tc - 10.0 * ts + 5.0 * t
            }
            InterpolationMode::InOutQuintic => {
                6.0 * tc * ts - 15.0 * ts * ts + 10.0 * tc
            }
            InterpolationMode::InBack => {
                const S: f32 = 1.70158;
                tc * (S + 1.0) - ts * S
            }
            InterpolationMode::OutBack => {
                const S: f32 = 1.70158;
                let t = t - 1.0;
                t * t * ((S + 1.0) * t + S) + 1.0
            }
        }
    }

    /// 按插值模式在两个向量之间插值
    #[inline]
    pub fn v3(v1: Vec3, v2: Vec3, t: f32, mode: InterpolationMode) -> Vec3 {
        let interp_t = Self::float(t, mode);
        v1 * (1.0 - interp_t) + v2 * interp_t
    }

    /// 以不同的升 / 降速度向目标线性逼近
    pub fn lerp_value(
        value: f32,
        target: f32,
        increase_speed: f32,
        decrease_speed: f32,
        delta_time: f32,
    ) -> f32 {
        if value == target {
            target
        } else if value < target {
            (value + delta_time * increase_speed).min(target)
        } else {
            (value - delta_time * decrease_speed).max(target)
        }
    }
}
