//! 程序化步态
//!
//! 由质心与压力中心的偏差驱动双脚落步：质心速度外推、
//! 落点评分、脚间避碰，输出双脚位姿与抬脚 / 抬踵高度。

use glam::{Quat, Vec3};

use crate::math::curve::AnimationCurve;
use crate::math::float;
use crate::math::interp::InterpolationMode;
use crate::math::{quatools, v3tools};

use super::arm::Arm;
use super::footstep::Footstep;
use super::leg::Leg;
use super::spine::Spine;
use super::virtual_bone::VirtualBone;

/// 落步前的路径遮挡查询，参数为射线原点与水平方向
pub type ObstructionQuery = fn(origin: Vec3, direction: Vec3) -> bool;

/// 双脚求解输出
#[derive(Clone, Copy, Debug, Default)]
pub struct LocomotionOutput {
    pub left_foot_position: Vec3,
    pub right_foot_position: Vec3,
    pub left_foot_rotation: Quat,
    pub right_foot_rotation: Quat,
    pub left_foot_offset: f32,
    pub right_foot_offset: f32,
    pub left_heel_offset: f32,
    pub right_heel_offset: f32,
    /// 对应脚本帧是否完成落地
    pub left_stepped: bool,
    pub right_stepped: bool,
}

/// 步态求解器
#[derive(Clone, Debug)]
pub struct Locomotion {
    /// 程序化步态的混入权重
    pub weight: f32,
    /// 双脚间距
    pub foot_distance: f32,
    /// 落点距当前脚步超过该距离才触发迈步
    pub step_threshold: f32,
    /// 脚步朝向与根朝向偏差超过该角度（度）强制迈步
    pub angle_threshold: f32,
    /// 质心-压力中心夹角的放大系数，越大越早迈步
    pub com_angle_mlp: f32,
    /// 质心速度外推的限幅
    pub max_velocity: f32,
    /// 质心速度外推的比例
    pub velocity_factor: f32,
    /// 腿伸展超过链长的该比例时强制迈步
    pub max_leg_stretch: f32,
    /// 根骨骼向双脚水平中点靠拢的速度
    pub root_speed: f32,
    /// 迈步速度
    pub step_speed: f32,
    /// 抬脚高度随归一化迈步进度的曲线
    pub step_height: AnimationCurve,
    /// 抬踵高度随归一化迈步进度的曲线
    pub heel_height: AnimationCurve,
    /// 站立时腿扭转回正的起始角度（度）
    pub relax_leg_twist_min_angle: f32,
    /// 站立时腿扭转回正的速度
    pub relax_leg_twist_speed: f32,
    /// 迈步插值模式
    pub step_interpolation: InterpolationMode,
    /// 质心近似的偏移
    pub offset: Vec3,

    /// 落步路径遮挡查询，None 表示不检测
    pub blocking_query: Option<ObstructionQuery>,
    pub raycast_radius: f32,
    pub raycast_height: f32,

    /// 质心近似（求解时更新）
    pub center_of_mass: Vec3,

    footsteps: [Footstep; 2],
    last_com_position: Vec3,
    com_velocity: Vec3,
    left_foot_index: usize,
    right_foot_index: usize,
}

impl Default for Locomotion {
    fn default() -> Self {
        Self {
            weight: 1.0,
            foot_distance: 0.3,
            step_threshold: 0.4,
            angle_threshold: 60.0,
            com_angle_mlp: 1.0,
            max_velocity: 0.4,
            velocity_factor: 0.4,
            max_leg_stretch: 1.0,
            root_speed: 20.0,
            step_speed: 3.0,
            step_height: AnimationCurve::sine_bump(0.03),
            heel_height: AnimationCurve::sine_bump(0.03),
            relax_leg_twist_min_angle: 20.0,
            relax_leg_twist_speed: 400.0,
            step_interpolation: InterpolationMode::InOutSine,
            offset: Vec3::ZERO,
            blocking_query: None,
            raycast_radius: 0.2,
            raycast_height: 0.2,
            center_of_mass: Vec3::ZERO,
            footsteps: [
                Footstep::new(Quat::IDENTITY, Vec3::ZERO, Quat::IDENTITY, Vec3::ZERO),
                Footstep::new(Quat::IDENTITY, Vec3::ZERO, Quat::IDENTITY, Vec3::ZERO),
            ],
            last_com_position: Vec3::ZERO,
            com_velocity: Vec3::ZERO,
            left_foot_index: 0,
            right_foot_index: 0,
        }
    }
}

impl Locomotion {
    /// 从读缓冲初始化双脚
    pub fn initiate(&mut self, positions: &[Vec3], rotations: &[Quat], has_toes: bool) {
        self.left_foot_index = if has_toes { 17 } else { 16 };
        self.right_foot_index = if has_toes { 21 } else { 20 };

        self.footsteps = [
            Footstep::new(
                rotations[0],
                positions[self.left_foot_index],
                rotations[self.left_foot_index],
                Vec3::NEG_X * self.foot_distance,
            ),
            Footstep::new(
                rotations[0],
                positions[self.right_foot_index],
                rotations[self.right_foot_index],
                Vec3::X * self.foot_distance,
            ),
        ];
    }

    /// 回到读入姿态，清空质心速度
    pub fn reset(&mut self, positions: &[Vec3], rotations: &[Quat]) {
        self.last_com_position =
            positions[1].lerp(positions[5], 0.25) + rotations[0] * self.offset;
        self.com_velocity = Vec3::ZERO;

        self.footsteps[0].reset(
            rotations[0],
            positions[self.left_foot_index],
            rotations[self.left_foot_index],
        );
        self.footsteps[1].reset(
            rotations[0],
            positions[self.right_foot_index],
            rotations[self.right_foot_index],
        );
    }

    /// 根旋转突变时同步脚步与质心
    pub fn add_delta_rotation(&mut self, delta: Quat, pivot: Vec3) {
        let to_last_com = self.last_com_position - pivot;
        self.last_com_position = pivot + delta * to_last_com;

        for footstep in &mut self.footsteps {
            footstep.apply_delta_rotation(delta, pivot);
        }
    }

    /// 根位置突变时同步脚步与质心
    pub fn add_delta_position(&mut self, delta: Vec3) {
        self.last_com_position += delta;

        for footstep in &mut self.footsteps {
            footstep.apply_delta_position(delta);
        }
    }

    #[inline]
    pub fn left_footstep_position(&self) -> Vec3 {
        self.footsteps[0].position
    }

    #[inline]
    pub fn right_footstep_position(&self) -> Vec3 {
        self.footsteps[1].position
    }

    #[inline]
    pub fn left_footstep_rotation(&self) -> Quat {
        self.footsteps[0].rotation
    }

    #[inline]
    pub fn right_footstep_rotation(&self) -> Quat {
        self.footsteps[1].rotation
    }

    /// 步态主求解
    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        root_bone: &VirtualBone,
        spine: &Spine,
        left_leg: &Leg,
        right_leg: &Leg,
        left_arm: &Arm,
        right_arm: &Arm,
        support_leg_index: usize,
        delta_time: f32,
    ) -> LocomotionOutput {
        let mut output = LocomotionOutput::default();
        if self.weight <= 0.0 {
            return output;
        }

        let root_up = root_bone.solver_rotation * Vec3::Y;

        let left_thigh_position = spine.pelvis().solver_position
            + spine.pelvis().solver_rotation * left_leg.thigh_relative_to_pelvis;
        let right_thigh_position = spine.pelvis().solver_position
            + spine.pelvis().solver_rotation * right_leg.thigh_relative_to_pelvis;

        self.footsteps[0].character_space_offset = Vec3::NEG_X * self.foot_distance;
        self.footsteps[1].character_space_offset = Vec3::X * self.foot_distance;

        // 根朝向的水平分量
        let mut forward = spine.face_direction;
        let forward_y = v3tools::extract_vertical(forward, root_up, 1.0);
        forward -= forward_y;
        let forward_rotation = quatools::look_rotation(forward, root_up);

        // 质心近似：骨盆、头、双手加权
        let pelvis_mass = 1.0;
        let head_mass = 1.0;
        let arm_mass = 0.2;
        let total_mass = pelvis_mass + head_mass + 2.0 * arm_mass;

        self.center_of_mass = (spine.pelvis().solver_position * pelvis_mass
            + spine.head().solver_position * head_mass
            + left_arm.position * arm_mass
            + right_arm.position * arm_mass)
            / total_mass;
        self.center_of_mass += root_bone.solver_rotation * self.offset;

        self.com_velocity = if delta_time > 0.0 {
            (self.center_of_mass - self.last_com_position) / delta_time
        } else {
            Vec3::ZERO
        };
        self.last_com_position = self.center_of_mass;
        self.com_velocity =
            self.com_velocity.clamp_length_max(self.max_velocity) * self.velocity_factor;
        let center_of_mass_v = self.center_of_mass + self.com_velocity;

        let pelvis_position_ground_level = v3tools::point_to_plane(
            spine.pelvis().solver_position,
            root_bone.solver_position,
            root_up,
        );
        let center_of_mass_v_ground_level =
            v3tools::point_to_plane(center_of_mass_v, root_bone.solver_position, root_up);

        let center_of_pressure = self.footsteps[0]
            .position
            .lerp(self.footsteps[1].position, 0.5);

        let com_dir = center_of_mass_v - center_of_pressure;
        let com_angle = v3tools::angle(com_dir, root_up) * self.com_angle_mlp;

        // 支撑腿标记
        for (i, footstep) in self.footsteps.iter_mut().enumerate() {
            footstep.is_support_leg = support_leg_index == i;
        }

        // 迈步中追踪落点，站立时回正
        for footstep in &mut self.footsteps {
            if footstep.is_stepping() {
                let step_to = center_of_mass_v_ground_level
                    + root_bone.solver_rotation * footstep.character_space_offset;

                let from = footstep.step_origin();
                if !Self::step_blocked(
                    self.blocking_query,
                    self.raycast_height,
                    from,
                    step_to,
                    root_bone.solver_position,
                ) {
                    footstep.update_stepping(step_to, forward_rotation, 10.0, delta_time);
                }
            } else {
                footstep.update_standing(
                    forward_rotation,
                    self.relax_leg_twist_min_angle,
                    self.relax_leg_twist_speed,
                    delta_time,
                );
            }
        }

        // 触发新迈步
        if self.can_step() {
            let mut step_leg_index = None;
            let mut best_value = f32::NEG_INFINITY;

            for i in 0..self.footsteps.len() {
                if self.footsteps[i].is_stepping() {
                    continue;
                }

                let mut step_to = center_of_mass_v_ground_level
                    + root_bone.solver_rotation * self.footsteps[i].character_space_offset;

                let leg_length = if i == 0 { left_leg.part.mag } else { right_leg.part.mag };
                let thigh_pos = if i == 0 {
                    left_thigh_position
                } else {
                    right_thigh_position
                };

                let thigh_distance = self.footsteps[i].position.distance(thigh_pos);

                // 腿拉伸超限时直接往骨盆正下方落脚
                let mut length_step = false;
                if thigh_distance >= leg_length * self.max_leg_stretch {
                    step_to = pelvis_position_ground_level
                        + root_bone.solver_rotation * self.footsteps[i].character_space_offset;
                    length_step = true;
                }

                // 与另一只脚的路径避碰
                let mut collision = false;
                for n in 0..self.footsteps.len() {
                    if n == i || length_step {
                        continue;
                    }
                    let close = self.footsteps[i]
                        .position
                        .distance(self.footsteps[n].position)
                        < 0.25
                        && (self.footsteps[i].position - step_to).length_squared()
                            < (self.footsteps[n].position - step_to).length_squared();
                    if !close {
                        collision = Self::line_sphere_collision(
                            self.footsteps[i].position,
                            step_to,
                            self.footsteps[n].position,
                            0.25,
                        );
                    }
                    if collision {
                        break;
                    }
                }

                let angle = quatools::angle(forward_rotation, self.footsteps[i].step_to_root_rot);

                if !collision || angle > self.angle_threshold {
                    let step_distance = self.footsteps[i].position.distance(step_to);
                    let mut s_t = float::lerp(
                        self.step_threshold,
                        self.step_threshold * 0.1,
                        com_angle * 0.015,
                    );
                    if length_step {
                        s_t *= 0.5;
                    }
                    if i == 0 {
                        s_t *= 0.9;
                    }

                    if !Self::step_blocked(
                        self.blocking_query,
                        self.raycast_height,
                        self.footsteps[i].position,
                        step_to,
                        root_bone.solver_position,
                    ) && (step_distance > s_t || angle > self.angle_threshold)
                    {
                        let value = -step_distance;
                        if value > best_value {
                            step_leg_index = Some(i);
                            best_value = value;
                        }
                    }
                }
            }

            if let Some(i) = step_leg_index {
                let step_to = center_of_mass_v_ground_level
                    + root_bone.solver_rotation * self.footsteps[i].character_space_offset;
                self.footsteps[i].step_speed = self.step_speed;
                self.footsteps[i].step_to(step_to, forward_rotation);
            }
        }

        output.left_stepped = self.footsteps[0].update(self.step_interpolation, delta_time);
        output.right_stepped = self.footsteps[1].update(self.step_interpolation, delta_time);

        output.left_foot_position = v3tools::point_to_plane(
            self.footsteps[0].position,
            left_leg.last_bone().read_position,
            root_up,
        );
        output.right_foot_position = v3tools::point_to_plane(
            self.footsteps[1].position,
            right_leg.last_bone().read_position,
            root_up,
        );

        output.left_foot_offset = self.step_height.evaluate(self.footsteps[0].step_progress);
        output.right_foot_offset = self.step_height.evaluate(self.footsteps[1].step_progress);

        output.left_heel_offset = self.heel_height.evaluate(self.footsteps[0].step_progress);
        output.right_heel_offset = self.heel_height.evaluate(self.footsteps[1].step_progress);

        output.left_foot_rotation = self.footsteps[0].rotation;
        output.right_foot_rotation = self.footsteps[1].rotation;

        output
    }

    /// 双脚都接近落地才允许下一次迈步
    fn can_step(&self) -> bool {
        self.footsteps
            .iter()
            .all(|f| !f.is_stepping() || f.step_progress >= 0.8)
    }

    fn step_blocked(
        query: Option<ObstructionQuery>,
        raycast_height: f32,
        from_position: Vec3,
        to_position: Vec3,
        root_position: Vec3,
    ) -> bool {
        let Some(query) = query else {
            return false;
        };

        let mut origin = from_position;
        origin.y = root_position.y + raycast_height;

        let mut direction = to_position - origin;
        direction.y = 0.0;

        query(origin, direction)
    }

    /// 线段与球的相交测试，脚步路径避碰用
    fn line_sphere_collision(
        line_start: Vec3,
        line_end: Vec3,
        sphere_center: Vec3,
        sphere_radius: f32,
    ) -> bool {
        let line = line_end - line_start;
        let to_sphere = sphere_center - line_start;
        let dist_to_sphere_center = to_sphere.length();
        let d = dist_to_sphere_center - sphere_radius;

        if d > line.length() {
            return false;
        }

        let q = quatools::look_rotation(line, to_sphere);
        let to_sphere_rotated = q.inverse() * to_sphere;

        if to_sphere_rotated.z < 0.0 {
            return d < 0.0;
        }

        to_sphere_rotated.y - sphere_radius < 0.0
    }
}
