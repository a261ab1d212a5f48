//! 数学工具层
//!
//! 求解器全部基于 glam 的 Vec3/Quat，这里补充引擎需要的
//! 插值、方向钳制与曲线求值工具。角度对外一律使用度。

pub mod curve;
pub mod float;
pub mod interp;
pub mod quatools;
pub mod v3tools;
pub mod validate;
