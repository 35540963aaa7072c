//! ext4 数据结构定义
//!
//! 这个模块包含了直接对应磁盘格式的数据结构。
//!
//! ## 设计原则
//!
//! 1. **磁盘格式结构** - 保留 C 风格命名（便于对照ext4规范）
//! 2. **显式解码** - 每个结构都从字节切片按固定偏移解码（小端序），
//!    所有字段读取都做边界检查，不做指针强转
//! 3. **只解码需要的字段** - 恢复流程用不到的字段不进入结构体

#![allow(non_camel_case_types)] // 允许C风格命名

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::*;

//=============================================================================
// 字节切片读取
//=============================================================================

/// 缓冲区长度不足以解码目标结构
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer too short: need {needed} bytes at offset {offset}, have {actual}")]
pub struct ShortBuffer {
    /// 需要的字节数
    pub needed: usize,
    /// 读取起点
    pub offset: usize,
    /// 起点之后实际剩余的字节数
    pub actual: usize,
}

/// 解码结果
pub type DecodeResult<T> = core::result::Result<T, ShortBuffer>;

/// 取出 `data[offset..offset + len]`，越界时返回 [`ShortBuffer`]
#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> DecodeResult<&[u8]> {
    let short = ShortBuffer {
        needed: len,
        offset,
        actual: data.len().saturating_sub(offset),
    };
    let end = offset.checked_add(len).ok_or(short)?;
    data.get(offset..end).ok_or(short)
}

#[inline]
pub(crate) fn read_le_u16(data: &[u8], offset: usize) -> DecodeResult<u16> {
    ensure_slice(data, offset, 2).map(LittleEndian::read_u16)
}

#[inline]
pub(crate) fn read_le_u32(data: &[u8], offset: usize) -> DecodeResult<u32> {
    ensure_slice(data, offset, 4).map(LittleEndian::read_u32)
}

//=============================================================================
// Superblock
//=============================================================================

/// Superblock 结构（恢复所需字段）
///
/// 对应 ext4 磁盘格式中的 superblock (ext4_super_block)，注释中为字节偏移
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ext4_sblock {
    pub inodes_count: u32,      // 0: 总 inode 数
    pub blocks_count_lo: u32,   // 4: 总块数（低32位）
    pub first_data_block: u32,  // 20: 第一个数据块
    pub log_block_size: u32,    // 24: 块大小（2^(10+log_block_size)）
    pub blocks_per_group: u32,  // 32: 每组块数
    pub inodes_per_group: u32,  // 40: 每组 inode 数
    pub magic: u16,             // 56: 魔数 (0xEF53)
    pub state: u16,             // 58: 文件系统状态
    pub rev_level: u32,         // 76: 版本级别
    pub first_ino: u32,         // 84: 第一个非保留 inode
    pub inode_size: u16,        // 88: inode 大小
    pub feature_compat: u32,    // 92: 兼容特性
    pub feature_incompat: u32,  // 96: 不兼容特性
    pub feature_ro_compat: u32, // 100: 只读兼容特性
    pub volume_name: [u8; 16],  // 120: 卷名称
    pub desc_size: u16,         // 254: 组描述符大小
    pub first_meta_bg: u32,     // 260: 第一个元数据块组
    pub blocks_count_hi: u32,   // 336: 总块数（高32位）
}

impl ext4_sblock {
    /// 从 superblock 原始字节解码
    pub fn parse(buf: &[u8]) -> DecodeResult<Self> {
        ensure_slice(buf, 0, 340)?;

        let mut volume_name = [0u8; 16];
        volume_name.copy_from_slice(ensure_slice(buf, 120, 16)?);

        Ok(Self {
            inodes_count: read_le_u32(buf, 0)?,
            blocks_count_lo: read_le_u32(buf, 4)?,
            first_data_block: read_le_u32(buf, 20)?,
            log_block_size: read_le_u32(buf, 24)?,
            blocks_per_group: read_le_u32(buf, 32)?,
            inodes_per_group: read_le_u32(buf, 40)?,
            magic: read_le_u16(buf, 56)?,
            state: read_le_u16(buf, 58)?,
            rev_level: read_le_u32(buf, 76)?,
            first_ino: read_le_u32(buf, 84)?,
            inode_size: read_le_u16(buf, 88)?,
            feature_compat: read_le_u32(buf, 92)?,
            feature_incompat: read_le_u32(buf, 96)?,
            feature_ro_compat: read_le_u32(buf, 100)?,
            volume_name,
            desc_size: read_le_u16(buf, 254)?,
            first_meta_bg: read_le_u32(buf, 260)?,
            blocks_count_hi: read_le_u32(buf, 336)?,
        })
    }

    /// 获取块大小（字节）
    ///
    /// 调用前应先确认 `log_block_size` 不超过 [`EXT4_MAX_LOG_BLOCK_SIZE`]
    pub fn block_size(&self) -> u32 {
        EXT4_MIN_BLOCK_SIZE << self.log_block_size
    }

    /// 获取 inode 大小
    ///
    /// 版本 0 的文件系统没有 inode_size 字段，固定 128 字节
    pub fn inode_size(&self) -> u16 {
        if self.rev_level == 0 || self.inode_size == 0 {
            EXT4_GOOD_OLD_INODE_SIZE as u16
        } else {
            self.inode_size
        }
    }

    /// 获取总块数（合并高低32位）
    ///
    /// 只有启用 64BIT 特性时高 32 位才有意义
    pub fn blocks_count(&self) -> u64 {
        let hi = if self.feature_incompat & IncompatFeatures::BIT64.bits() != 0 {
            self.blocks_count_hi as u64
        } else {
            0
        };
        (self.blocks_count_lo as u64) | (hi << 32)
    }

    /// 验证魔数
    pub fn is_valid(&self) -> bool {
        self.magic == EXT4_SUPERBLOCK_MAGIC
    }
}

//=============================================================================
// 块组描述符
//=============================================================================

/// 块组描述符（恢复所需字段）
///
/// 对应 ext4_group_desc。32 字节描述符只有低半部分，
/// 高半部分在 64 字节描述符中才存在，否则保持 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ext4_group_desc {
    pub block_bitmap_lo: u32,      // 0: 块位图块号（低32位）
    pub inode_bitmap_lo: u32,      // 4: inode位图块号（低32位）
    pub inode_table_lo: u32,       // 8: inode表起始块号（低32位）
    pub free_blocks_count_lo: u16, // 12: 空闲块数（低16位）
    pub free_inodes_count_lo: u16, // 14: 空闲inode数（低16位）
    pub flags: u16,                // 18: 标志
    pub itable_unused_lo: u16,     // 28: 未使用inode数（低16位）

    // 64位扩展字段
    pub block_bitmap_hi: u32,      // 32: 块位图块号（高32位）
    pub inode_bitmap_hi: u32,      // 36: inode位图块号（高32位）
    pub inode_table_hi: u32,       // 40: inode表起始块号（高32位）
    pub free_blocks_count_hi: u16, // 44: 空闲块数（高16位）
    pub free_inodes_count_hi: u16, // 46: 空闲inode数（高16位）
    pub itable_unused_hi: u16,     // 50: 未使用inode数（高16位）
}

impl ext4_group_desc {
    /// 按描述符大小解码
    ///
    /// `desc_size` 大于 32 时才读取高半部分
    pub fn parse(buf: &[u8], desc_size: usize) -> DecodeResult<Self> {
        ensure_slice(buf, 0, desc_size.max(EXT4_GROUP_DESC_SIZE))?;

        let mut desc = Self {
            block_bitmap_lo: read_le_u32(buf, 0)?,
            inode_bitmap_lo: read_le_u32(buf, 4)?,
            inode_table_lo: read_le_u32(buf, 8)?,
            free_blocks_count_lo: read_le_u16(buf, 12)?,
            free_inodes_count_lo: read_le_u16(buf, 14)?,
            flags: read_le_u16(buf, 18)?,
            itable_unused_lo: read_le_u16(buf, 28)?,
            ..Self::default()
        };

        if desc_size > EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE {
            desc.block_bitmap_hi = read_le_u32(buf, 32)?;
            desc.inode_bitmap_hi = read_le_u32(buf, 36)?;
            desc.inode_table_hi = read_le_u32(buf, 40)?;
            desc.free_blocks_count_hi = read_le_u16(buf, 44)?;
            desc.free_inodes_count_hi = read_le_u16(buf, 46)?;
            desc.itable_unused_hi = read_le_u16(buf, 50)?;
        }

        Ok(desc)
    }

    /// inode 表起始块号（合并高低位）
    pub fn inode_table(&self) -> u64 {
        (self.inode_table_lo as u64) | ((self.inode_table_hi as u64) << 32)
    }
}

//=============================================================================
// Inode
//=============================================================================

/// Inode 结构（恢复所需字段）
///
/// 对应 ext4 磁盘格式中的 inode (ext4_inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ext4_inode {
    pub mode: u16,                                 // 0: 文件模式
    pub uid: u16,                                  // 2: 所有者 uid（低16位）
    pub size_lo: u32,                              // 4: 文件大小（低32位）
    pub atime: u32,                                // 8: 访问时间
    pub ctime: u32,                                // 12: inode改变时间
    pub mtime: u32,                                // 16: 修改时间
    pub dtime: u32,                                // 20: 删除时间
    pub gid: u16,                                  // 24: 组 gid（低16位）
    pub links_count: u16,                          // 26: 硬链接数
    pub blocks_count_lo: u32,                      // 28: 512B块数（低32位）
    pub flags: u32,                                // 32: 标志
    pub blocks: [u8; EXT4_INODE_BLOCK_AREA_SIZE],  // 40: 块指针区域（i_block，60字节）
    pub generation: u32,                           // 100: 文件版本
    pub size_hi: u32,                              // 108: 文件大小（高32位）
    pub blocks_high: u16,                          // 116: 块数高16位
}

impl Default for ext4_inode {
    fn default() -> Self {
        Self {
            mode: 0,
            uid: 0,
            size_lo: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
            dtime: 0,
            gid: 0,
            links_count: 0,
            blocks_count_lo: 0,
            flags: 0,
            blocks: [0; EXT4_INODE_BLOCK_AREA_SIZE],
            generation: 0,
            size_hi: 0,
            blocks_high: 0,
        }
    }
}

impl ext4_inode {
    /// 从 inode 记录原始字节解码（至少 128 字节）
    pub fn parse(buf: &[u8]) -> DecodeResult<Self> {
        ensure_slice(buf, 0, EXT4_GOOD_OLD_INODE_SIZE)?;

        let mut blocks = [0u8; EXT4_INODE_BLOCK_AREA_SIZE];
        blocks.copy_from_slice(ensure_slice(buf, 40, EXT4_INODE_BLOCK_AREA_SIZE)?);

        Ok(Self {
            mode: read_le_u16(buf, 0)?,
            uid: read_le_u16(buf, 2)?,
            size_lo: read_le_u32(buf, 4)?,
            atime: read_le_u32(buf, 8)?,
            ctime: read_le_u32(buf, 12)?,
            mtime: read_le_u32(buf, 16)?,
            dtime: read_le_u32(buf, 20)?,
            gid: read_le_u16(buf, 24)?,
            links_count: read_le_u16(buf, 26)?,
            blocks_count_lo: read_le_u32(buf, 28)?,
            flags: read_le_u32(buf, 32)?,
            blocks,
            generation: read_le_u32(buf, 100)?,
            size_hi: read_le_u32(buf, 108)?,
            blocks_high: read_le_u16(buf, 116)?,
        })
    }

    /// 获取文件大小（合并高低32位）
    pub fn file_size(&self) -> u64 {
        (self.size_lo as u64) | ((self.size_hi as u64) << 32)
    }

    /// 是否是普通文件
    pub fn is_file(&self) -> bool {
        (self.mode & EXT4_INODE_MODE_TYPE_MASK) == EXT4_INODE_MODE_FILE
    }
}

//=============================================================================
// Extent 树
//=============================================================================

/// Extent 树节点头
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ext4_extent_header {
    pub magic: u16,      // 魔数 0xF30A
    pub entries: u16,    // 当前节点中的有效 entry 数量
    pub max: u16,        // 节点中最大 entry 数量
    pub depth: u16,      // 树的深度，0 表示叶子节点
    pub generation: u32, // generation ID
}

impl ext4_extent_header {
    /// 从节点起始处解码
    pub fn parse(buf: &[u8]) -> DecodeResult<Self> {
        Ok(Self {
            magic: read_le_u16(buf, 0)?,
            entries: read_le_u16(buf, 2)?,
            max: read_le_u16(buf, 4)?,
            depth: read_le_u16(buf, 6)?,
            generation: read_le_u32(buf, 8)?,
        })
    }

    /// 检查魔数是否有效
    pub fn is_valid(&self) -> bool {
        self.magic == EXT4_EXTENT_MAGIC
    }

    /// 是否为叶子节点
    pub fn is_leaf(&self) -> bool {
        self.depth == 0
    }
}

/// Extent 叶子条目
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ext4_extent {
    pub block: u32,    // 逻辑块号（文件内偏移）
    pub len: u16,      // extent 长度（块数），最高位表示 unwritten
    pub start_hi: u16, // 物理块号高 16 位
    pub start_lo: u32, // 物理块号低 32 位
}

impl ext4_extent {
    /// 从条目起始处解码
    pub fn parse(buf: &[u8]) -> DecodeResult<Self> {
        Ok(Self {
            block: read_le_u32(buf, 0)?,
            len: read_le_u16(buf, 4)?,
            start_hi: read_le_u16(buf, 6)?,
            start_lo: read_le_u32(buf, 8)?,
        })
    }

    /// 获取逻辑块号
    pub fn logical_block(&self) -> u32 {
        self.block
    }

    /// 获取物理块号（合并高低位）
    pub fn physical_block(&self) -> u64 {
        (self.start_lo as u64) | ((self.start_hi as u64) << 32)
    }

    /// 是否为 unwritten（预分配未写入）extent
    pub fn is_unwritten(&self) -> bool {
        self.len > EXT4_EXT_INIT_MAX_LEN
    }

    /// 实际长度（去掉 unwritten 标记位）
    ///
    /// `len == 32768` 是长度为 32768 的已初始化 extent
    pub fn actual_len(&self) -> u16 {
        if self.len <= EXT4_EXT_INIT_MAX_LEN {
            self.len
        } else {
            self.len - EXT4_EXT_INIT_MAX_LEN
        }
    }
}

/// Extent 索引条目
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ext4_extent_idx {
    pub block: u32,   // 逻辑块号（覆盖范围的起始）
    pub leaf_lo: u32, // 指向的块号低 32 位
    pub leaf_hi: u16, // 指向的块号高 16 位
    pub unused: u16,  // 保留
}

impl ext4_extent_idx {
    /// 从条目起始处解码
    pub fn parse(buf: &[u8]) -> DecodeResult<Self> {
        Ok(Self {
            block: read_le_u32(buf, 0)?,
            leaf_lo: read_le_u32(buf, 4)?,
            leaf_hi: read_le_u16(buf, 8)?,
            unused: read_le_u16(buf, 10)?,
        })
    }

    /// 获取逻辑块号
    pub fn logical_block(&self) -> u32 {
        self.block
    }

    /// 获取指向的物理块号（合并高低位）
    pub fn leaf_block(&self) -> u64 {
        (self.leaf_lo as u64) | ((self.leaf_hi as u64) << 32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_slice_bounds() {
        let data = [0u8; 8];
        assert!(ensure_slice(&data, 4, 4).is_ok());
        let err = ensure_slice(&data, 6, 4).unwrap_err();
        assert_eq!(err.needed, 4);
        assert_eq!(err.actual, 2);
        assert!(ensure_slice(&data, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_superblock_parse_fields() {
        let mut buf = vec![0u8; EXT4_SUPERBLOCK_SIZE];
        buf[0..4].copy_from_slice(&2048u32.to_le_bytes());
        buf[4..8].copy_from_slice(&8192u32.to_le_bytes());
        buf[24..28].copy_from_slice(&2u32.to_le_bytes());
        buf[56..58].copy_from_slice(&EXT4_SUPERBLOCK_MAGIC.to_le_bytes());
        buf[76..80].copy_from_slice(&1u32.to_le_bytes());
        buf[88..90].copy_from_slice(&256u16.to_le_bytes());
        buf[336..340].copy_from_slice(&1u32.to_le_bytes());

        let sb = ext4_sblock::parse(&buf).unwrap();
        assert!(sb.is_valid());
        assert_eq!(sb.inodes_count, 2048);
        assert_eq!(sb.block_size(), 4096);
        assert_eq!(sb.inode_size(), 256);
        // 未启用 64BIT 时忽略高 32 位
        assert_eq!(sb.blocks_count(), 8192);

        buf[96..100].copy_from_slice(&IncompatFeatures::BIT64.bits().to_le_bytes());
        let sb = ext4_sblock::parse(&buf).unwrap();
        assert_eq!(sb.blocks_count(), (1u64 << 32) | 8192);
    }

    #[test]
    fn test_superblock_rev0_inode_size() {
        let mut sb = ext4_sblock::default();
        sb.inode_size = 256;
        assert_eq!(sb.inode_size(), 128);
    }

    #[test]
    fn test_group_desc_hi_only_for_64bit() {
        let mut buf = vec![0u8; 64];
        buf[8..12].copy_from_slice(&0x1234u32.to_le_bytes());
        buf[40..44].copy_from_slice(&0x2u32.to_le_bytes());

        let small = ext4_group_desc::parse(&buf, 32).unwrap();
        assert_eq!(small.inode_table(), 0x1234);

        let big = ext4_group_desc::parse(&buf, 64).unwrap();
        assert_eq!(big.inode_table(), (2u64 << 32) | 0x1234);

        assert!(ext4_group_desc::parse(&buf[..40], 64).is_err());
    }

    #[test]
    fn test_inode_parse_block_area() {
        let mut buf = vec![0u8; 256];
        buf[4..8].copy_from_slice(&5000u32.to_le_bytes());
        buf[108..112].copy_from_slice(&1u32.to_le_bytes());
        buf[40..44].copy_from_slice(&77u32.to_le_bytes());
        buf[96..100].copy_from_slice(&99u32.to_le_bytes());

        let inode = ext4_inode::parse(&buf).unwrap();
        assert_eq!(inode.file_size(), (1u64 << 32) | 5000);
        assert_eq!(&inode.blocks[..4], &77u32.to_le_bytes());
        assert_eq!(&inode.blocks[56..], &99u32.to_le_bytes());
        assert!(ext4_inode::parse(&buf[..100]).is_err());
    }

    #[test]
    fn test_extent_header_validation() {
        let mut header = ext4_extent_header::default();
        assert!(!header.is_valid());

        header.magic = EXT4_EXTENT_MAGIC;
        assert!(header.is_valid());
        assert!(header.is_leaf());

        header.depth = 1;
        assert!(!header.is_leaf());
    }

    #[test]
    fn test_extent_physical_block_and_len() {
        let extent = ext4_extent {
            block: 0,
            len: 32768 + 10,
            start_hi: 0xABCD,
            start_lo: 0x12345678,
        };
        assert_eq!(extent.physical_block(), 0x0000ABCD12345678u64);
        assert!(extent.is_unwritten());
        assert_eq!(extent.actual_len(), 10);

        let full = ext4_extent {
            len: 32768,
            ..extent
        };
        assert!(!full.is_unwritten());
        assert_eq!(full.actual_len(), 32768);
    }

    #[test]
    fn test_extent_idx_leaf_block() {
        let mut buf = [0u8; 12];
        buf[0..4].copy_from_slice(&100u32.to_le_bytes());
        buf[4..8].copy_from_slice(&0xDEADu32.to_le_bytes());
        buf[8..10].copy_from_slice(&1u16.to_le_bytes());
        let idx = ext4_extent_idx::parse(&buf).unwrap();
        assert_eq!(idx.logical_block(), 100);
        assert_eq!(idx.leaf_block(), (1u64 << 32) | 0xDEAD);
    }
}
