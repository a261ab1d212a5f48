//! 标量插值与阻尼工具

/// 线性插值
#[inline]
pub fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t.clamp(0.0, 1.0)
}

/// 反向线性插值：value 在 [a, b] 中的归一化位置
#[inline]
pub fn inverse_lerp(a: f32, b: f32, value: f32) -> f32 {
    if a == b {
        0.0
    } else {
        ((value - a) / (b - a)).clamp(0.0, 1.0)
    }
}

/// 钳制到 [0, 1]
#[inline]
pub fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// 以不超过 max_delta 的步长向目标移动
#[inline]
pub fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

/// 临界阻尼平滑（速度状态由调用方持有）
///
/// delta_time 显式传入，求解器内不存在全局时间。
pub fn smooth_damp(
    current: f32,
    target: f32,
    velocity: &mut f32,
    smooth_time: f32,
    delta_time: f32,
) -> f32 {
    let smooth_time = smooth_time.max(1.0e-4);
    if delta_time <= 0.0 {
        return current;
    }

    let omega = 2.0 / smooth_time;
    let x = omega * delta_time;
    // 指数衰减的帕德近似
    let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);

    let change = current - target;
    let temp = (*velocity + omega * change) * delta_time;
    *velocity = (*velocity - omega * temp) * exp;
    let mut output = target + (change + temp) * exp;

    // 防止越过目标
    if (target - current > 0.0) == (output > target) {
        output = target;
        *velocity = (output - target) / delta_time;
    }

    output
}

/// 两个角度（度）之间的最短差值，范围 (-180, 180]
#[inline]
pub fn delta_angle(current: f32, target: f32) -> f32 {
    let mut delta = (target - current) % 360.0;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta <= -180.0 {
        delta += 360.0;
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lerp_endpoints() {
        assert_relative_eq!(lerp(1.0, 3.0, 0.0), 1.0);
        assert_relative_eq!(lerp(1.0, 3.0, 1.0), 3.0);
        assert_relative_eq!(lerp(1.0, 3.0, 0.5), 2.0);
        // 超出范围被钳制
        assert_relative_eq!(lerp(1.0, 3.0, 2.0), 3.0);
    }

    #[test]
    fn test_move_towards_clamps_step() {
        assert_relative_eq!(move_towards(0.0, 1.0, 0.25), 0.25);
        assert_relative_eq!(move_towards(0.9, 1.0, 0.25), 1.0);
        assert_relative_eq!(move_towards(1.0, 0.0, 0.25), 0.75);
    }

    #[test]
    fn test_smooth_damp_converges() {
        let mut velocity = 0.0;
        let mut value = 0.0;
        for _ in 0..200 {
            value = smooth_damp(value, 1.0, &mut velocity, 0.2, 1.0 / 60.0);
        }
        assert!((value - 1.0).abs() < 1.0e-3);
        // 不越过目标
        assert!(value <= 1.0 + 1.0e-6);
    }

    #[test]
    fn test_delta_angle_wraps() {
        assert_relative_eq!(delta_angle(350.0, 10.0), 20.0);
        assert_relative_eq!(delta_angle(10.0, 350.0), -20.0);
        assert_relative_eq!(delta_angle(0.0, 180.0), 180.0);
    }
}
