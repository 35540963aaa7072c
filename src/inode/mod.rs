//! Inode 操作模块
//!
//! 这个模块提供 ext4 inode 的定位和读取。已删除的 inode 同样可以读取。

mod read;

pub use read::*;
