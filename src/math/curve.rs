//! 关键帧曲线
//!
//! 步高 / 脚跟曲线使用的 Hermite 样条。求值在关键帧区间内
//! 使用归一化参数的三次 Hermite 基，范围外钳制到端点值。

/// 关键帧：时间、值与两侧切线斜率
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
    pub in_tangent: f32,
    pub out_tangent: f32,
}

impl Keyframe {
    #[inline]
    pub fn new(time: f32, value: f32) -> Self {
        Self {
            time,
            value,
            in_tangent: 0.0,
            out_tangent: 0.0,
        }
    }

    #[inline]
    pub fn with_tangents(time: f32, value: f32, in_tangent: f32, out_tangent: f32) -> Self {
        Self {
            time,
            value,
            in_tangent,
            out_tangent,
        }
    }
}

/// 关键帧动画曲线
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnimationCurve {
    keys: Vec<Keyframe>,
}

impl AnimationCurve {
    /// 创建曲线，关键帧按时间排序
    pub fn new(mut keys: Vec<Keyframe>) -> Self {
        keys.sort_unstable_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    #[inline]
    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    /// 插入关键帧，保持时间有序
    pub fn add_key(&mut self, key: Keyframe) {
        let idx = self
            .keys
            .partition_point(|k| k.time <= key.time);
        self.keys.insert(idx, key);
    }

    /// 删除关键帧
    pub fn remove_key(&mut self, index: usize) {
        if index < self.keys.len() {
            self.keys.remove(index);
        }
    }

    /// 求值
    ///
    /// 空曲线返回 0，单关键帧返回该值，t 超出范围钳制到端点。
    pub fn evaluate(&self, t: f32) -> f32 {
        let keys = &self.keys;
        match keys.len() {
            0 => return 0.0,
            1 => return keys[0].value,
            _ => {}
        }

        let first = &keys[0];
        let last = &keys[keys.len() - 1];
        if t <= first.time {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }

        // 定位区间 [k0, k1]
        let i = keys.partition_point(|k| k.time <= t) - 1;
        let k0 = &keys[i];
        let k1 = &keys[i + 1];

        let dt = k1.time - k0.time;
        if dt <= 0.0 {
            return k0.value;
        }

        let u = (t - k0.time) / dt;
        let m0 = k0.out_tangent * dt;
        let m1 = k1.in_tangent * dt;

        let u2 = u * u;
        let u3 = u2 * u;

        let a = 2.0 * u3 - 3.0 * u2 + 1.0;
        let b = u3 - 2.0 * u2 + u;
        let c = u3 - u2;
        let d = -2.0 * u3 + 3.0 * u2;

        a * k0.value + b * m0 + c * m1 + d * k1.value
    }

    /// 两点线性段
    pub fn linear(time_start: f32, value_start: f32, time_end: f32, value_end: f32) -> Self {
        let slope = (value_end - value_start) / (time_end - time_start);
        Self::new(vec![
            Keyframe::with_tangents(time_start, value_start, 0.0, slope),
            Keyframe::with_tangents(time_end, value_end, slope, 0.0),
        ])
    }

    /// 两点缓入缓出段（端点切线为零）
    pub fn ease_in_out(time_start: f32, value_start: f32, time_end: f32, value_end: f32) -> Self {
        Self::new(vec![
            Keyframe::new(time_start, value_start),
            Keyframe::new(time_end, value_end),
        ])
    }

    /// [0, 1] 上的钟形曲线，峰值在 t = 0.5 处取 magnitude
    pub fn sine_bump(magnitude: f32) -> Self {
        Self::new(vec![
            Keyframe::new(0.0, 0.0),
            Keyframe::new(0.5, magnitude),
            Keyframe::new(1.0, 0.0),
        ])
    }
}
