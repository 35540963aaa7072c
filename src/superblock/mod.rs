//! Superblock 操作模块
//!
//! 这个模块提供 ext4 superblock 的读取、验证和几何参数查询。

mod read;

pub use read::*;
