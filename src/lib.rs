//! ext4_undelete: 按 inode 编号从 ext4 镜像中恢复已删除文件
//!
//! 读取 superblock、块组描述符和 inode 记录，把 inode 的块指针区域
//! （extent 树或传统间接块）展开为块映射，再把映射的数据块按逻辑顺序写入输出文件。
//!
//! 删除后的元数据不可信：
//! - inode 中记录的大小通常被清零，恢复长度取块映射的跨度
//! - 越界的物理块引用记为空洞
//! - extent 树有深度上限和已访问块集合，防止环和垃圾指针
//!
//! # 示例
//!
//! ```rust,ignore
//! use ext4_undelete::{recover_with, RecoveryOptions};
//!
//! let report = recover_with("/dev/sdb1", 1234, "undeleted_file", &RecoveryOptions::default())?;
//! println!("{} bytes recovered", report.bytes_written);
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象和 I/O 操作
//! - [`consts`] - 常量定义
//! - [`types`] - 磁盘数据结构解码
//! - [`superblock`] - Superblock 读取
//! - [`block_group`] - 块组定位
//! - [`inode`] - Inode 读取
//! - [`mapping`] - 块映射
//! - [`extent`] - Extent 树遍历
//! - [`indirect`] - 间接块遍历
//! - [`recovery`] - 恢复流程

#![deny(unsafe_code)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 数据结构定义
pub mod types;

/// Superblock 操作
pub mod superblock;

/// 块组操作
pub mod block_group;

/// Inode 操作
pub mod inode;

/// 块映射
pub mod mapping;

/// Extent 树操作
pub mod extent;

/// Indirect blocks 操作（传统 ext2/ext3 间接块寻址）
pub mod indirect;

/// 恢复流程
pub mod recovery;

#[cfg(test)]
pub(crate) mod test_utils;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result, Stage};

// 块设备
pub use block::{BlockDev, BlockDevice, FileDevice};

// Superblock
pub use superblock::{read_superblock, Superblock};

// BlockGroup
pub use block_group::{locate_inode, read_block_group_desc, BlockGroup};

// Inode
pub use inode::{read_inode, Inode};

// 块映射
pub use mapping::{BlockMapping, BlockRef, Segment};

// Extent
pub use extent::ExtentTree;

// Indirect blocks
pub use indirect::IndirectBlockMapper;

// 恢复
pub use recovery::{
    inspect, recover, recover_with, AddressingScheme, InodeReport, Recovery, RecoveryOptions,
    RecoveryReport, RecoveryWriter, UnwrittenPolicy,
};
