//! ext4 磁盘格式常量
//!
//! 只收录恢复流程实际用到的部分：
//! - superblock / 块组描述符布局
//! - inode 块指针区域
//! - extent 树
//! - 特性标志与 inode 标志

use bitflags::bitflags;

//=============================================================================
// 基础常量
//=============================================================================

/// 默认物理扇区大小（512 字节）
pub const EXT4_DEFAULT_SECTOR_SIZE: u32 = 512;

/// 最小块大小（1024 字节），也是 `log_block_size` 的基数
pub const EXT4_MIN_BLOCK_SIZE: u32 = 1024;

/// 最大块大小（65536 字节）
pub const EXT4_MAX_BLOCK_SIZE: u32 = 65536;

/// `log_block_size` 允许的最大值（1024 << 6 = 64 KiB）
pub const EXT4_MAX_LOG_BLOCK_SIZE: u32 = 6;

//=============================================================================
// Superblock 相关
//=============================================================================

/// Superblock 在设备上的字节偏移
pub const EXT4_SUPERBLOCK_OFFSET: u64 = 1024;

/// Superblock 大小（字节）
pub const EXT4_SUPERBLOCK_SIZE: usize = 1024;

/// ext4 魔数 (0xEF53)
pub const EXT4_SUPERBLOCK_MAGIC: u16 = 0xEF53;

/// 块组描述符大小（传统）
pub const EXT4_GROUP_DESC_SIZE: usize = 32;

/// 块组描述符大小（64位）
pub const EXT4_GROUP_DESC_SIZE_64: usize = 64;

/// 块组描述符最小大小
pub const EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE: usize = 32;

/// 块组描述符最大大小
pub const EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE: usize = 1024;

//=============================================================================
// Inode 相关
//=============================================================================

/// Inode 中的块指针总数（15个）
/// - 12个直接块
/// - 1个一级间接块
/// - 1个二级间接块
/// - 1个三级间接块
pub const EXT4_INODE_BLOCKS: usize = 15;

/// 块指针区域字节数（i_block，60 字节）
pub const EXT4_INODE_BLOCK_AREA_SIZE: usize = EXT4_INODE_BLOCKS * 4;

/// 直接块指针数量
pub const EXT4_INODE_DIRECT_BLOCKS: usize = 12;

/// 一级间接块索引
pub const EXT4_INODE_INDIRECT_BLOCK: usize = 12;

/// 二级间接块索引
pub const EXT4_INODE_DOUBLE_INDIRECT_BLOCK: usize = 13;

/// 三级间接块索引
pub const EXT4_INODE_TRIPLE_INDIRECT_BLOCK: usize = 14;

/// 旧的 inode 大小（不含扩展字段），也是 inode 大小下限
pub const EXT4_GOOD_OLD_INODE_SIZE: usize = 128;

/// 文件类型掩码
pub const EXT4_INODE_MODE_TYPE_MASK: u16 = 0xF000;

/// 普通文件
pub const EXT4_INODE_MODE_FILE: u16 = 0x8000;

//=============================================================================
// Extent 树
//=============================================================================

/// Extent 树魔数 (0xF30A)
pub const EXT4_EXTENT_MAGIC: u16 = 0xF30A;

/// extent header / extent / extent index 的大小都是 12 字节
pub const EXT4_EXTENT_ENTRY_SIZE: usize = 12;

/// extent 树允许的最大深度
pub const EXT4_EXTENT_MAX_DEPTH: u16 = 5;

/// 已初始化 extent 的最大长度，`len` 超过它表示 unwritten extent
pub const EXT4_EXT_INIT_MAX_LEN: u16 = 1 << 15;

//=============================================================================
// 特性标志
//=============================================================================

bitflags! {
    /// 不兼容特性（`feature_incompat`）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IncompatFeatures: u32 {
        /// 目录项包含文件类型
        const FILETYPE    = 0x0002;
        /// 需要日志恢复
        const RECOVER     = 0x0004;
        /// 元数据块组
        const META_BG     = 0x0010;
        /// 文件使用 extent
        const EXTENTS     = 0x0040;
        /// 64 位块号 / 64 字节描述符
        const BIT64       = 0x0080;
        /// flex_bg
        const FLEX_BG     = 0x0200;
        /// 数据内联
        const INLINE_DATA = 0x8000;
    }
}

bitflags! {
    /// 只读兼容特性（`feature_ro_compat`）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoCompatFeatures: u32 {
        /// 稀疏 superblock 备份
        const SPARSE_SUPER  = 0x0001;
        /// 大文件
        const LARGE_FILE    = 0x0002;
        /// i_blocks 以文件系统块为单位
        const HUGE_FILE     = 0x0008;
        /// 元数据校验和
        const METADATA_CSUM = 0x0400;
    }
}

bitflags! {
    /// inode 标志（`i_flags`）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        /// 不可变文件
        const IMMUTABLE   = 0x0000_0010;
        /// 仅追加
        const APPEND      = 0x0000_0020;
        /// 目录使用哈希树索引
        const INDEX       = 0x0000_1000;
        /// 大文件
        const HUGE_FILE   = 0x0004_0000;
        /// 使用 extent 树存储文件数据
        const EXTENTS     = 0x0008_0000;
        /// 数据内联在 inode 中
        const INLINE_DATA = 0x1000_0000;
    }
}
