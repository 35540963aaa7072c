//! 块设备抽象
//!
//! 提供块设备接口和块级读取操作。恢复工具只读设备，没有写路径。
//!
//! - block/device.rs 定义 `BlockDevice` trait（扇区级读取）以及包装器 `BlockDev`，
//!   后者负责文件系统块大小、分区偏移和读取统计
//! - block/io.rs 在 `BlockDev` 上实现按块 / 按字节读取，所有上层读取都经过这里
//! - block/file.rs 提供基于 `std::fs::File` 的设备实现（镜像文件或块设备节点）

mod device;
mod file;
mod io;

pub use device::{BlockDevice, BlockDev};
pub use file::FileDevice;
