//! Inode 读取

use crate::{
    block::{BlockDev, BlockDevice},
    block_group::{self, BlockGroup},
    consts::*,
    error::{Error, ErrorKind, Result, Stage, StageExt},
    superblock::Superblock,
    types::ext4_inode,
};
use log::{debug, info};

/// 计算 inode 在设备上的字节偏移
///
/// offset = inode_table_block * block_size + index_in_group * inode_size
///
/// inode 表块号来自磁盘，溢出时返回 `ReadError`
pub fn inode_byte_offset(sb: &Superblock, bg: &BlockGroup, index_in_group: u32) -> Result<u64> {
    let table = bg.inode_table_first_block();
    table
        .checked_mul(sb.block_size() as u64)
        .and_then(|base| base.checked_add(index_in_group as u64 * sb.inode_size() as u64))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::ReadError,
                Stage::InodeRead,
                format!(
                    "inode table block {:#x} of group {} overflows the byte address space",
                    table,
                    bg.group_num()
                ),
            )
        })
}

/// 从块设备读取 inode
///
/// # 参数
///
/// * `bdev` - 块设备引用
/// * `sb` - superblock 引用
/// * `bg` - inode 所在块组
/// * `index_in_group` - 组内索引（从 0 开始）
///
/// # 说明
///
/// 不检查链接数和删除时间，删除后的 inode 正是恢复的对象
pub fn read_inode<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    sb: &Superblock,
    bg: &BlockGroup,
    index_in_group: u32,
) -> Result<ext4_inode> {
    if index_in_group >= sb.inodes_per_group() {
        return Err(Error::new(
            ErrorKind::InvalidInode,
            Stage::InodeRead,
            format!(
                "index {} exceeds inodes per group {}",
                index_in_group,
                sb.inodes_per_group()
            ),
        ));
    }

    let inode_offset = inode_byte_offset(sb, bg, index_in_group)?;

    let mut inode_buf = vec![0u8; sb.inode_size() as usize];
    bdev.read_bytes(inode_offset, &mut inode_buf)
        .at(Stage::InodeRead)?;

    ext4_inode::parse(&inode_buf)
        .map_err(|e| Error::new(ErrorKind::InvalidFilesystem, Stage::InodeRead, e.to_string()))
}

/// Inode 包装器
#[derive(Debug, Clone)]
pub struct Inode {
    pub(crate) inner: ext4_inode,
    pub(crate) inode_num: u32,
}

impl Inode {
    /// 从块设备加载 inode
    ///
    /// 依次定位块组、读取块组描述符、读取 inode 记录
    pub fn load<D: BlockDevice>(
        bdev: &mut BlockDev<D>,
        sb: &Superblock,
        inode_num: u32,
    ) -> Result<Self> {
        let (group, index) = block_group::locate_inode(sb, inode_num)?;
        let bg = BlockGroup::load(bdev, sb, group)?;
        if !bg.inode_table_in_range(bdev.total_blocks()) {
            return Err(Error::new(
                ErrorKind::ReadError,
                Stage::InodeRead,
                format!(
                    "inode table block {:#x} of group {} lies beyond the device ({} blocks)",
                    bg.inode_table_first_block(),
                    group,
                    bdev.total_blocks()
                ),
            ));
        }

        let inner = read_inode(bdev, sb, &bg, index)?;
        let inode = Self { inner, inode_num };

        info!(
            "[INODE] inode {} (group {}, index {}): links={}, dtime={}, size={}, flags={:?}",
            inode_num,
            group,
            index,
            inode.links_count(),
            inode.dtime(),
            inode.file_size(),
            inode.flags(),
        );
        if inode.is_deleted() {
            debug!("[INODE] inode {} looks deleted", inode_num);
        }

        Ok(inode)
    }

    /// 从原始 inode 数据创建
    pub fn from_raw(inner: ext4_inode, inode_num: u32) -> Self {
        Self { inner, inode_num }
    }

    /// 获取 inode 编号
    pub fn inode_num(&self) -> u32 {
        self.inode_num
    }

    /// 获取内部 inode 结构的引用
    pub fn inner(&self) -> &ext4_inode {
        &self.inner
    }

    /// 获取文件大小
    ///
    /// 删除后通常被清零，不能作为恢复长度的依据
    pub fn file_size(&self) -> u64 {
        self.inner.file_size()
    }

    /// 获取文件模式（类型 + 权限）
    pub fn mode(&self) -> u16 {
        self.inner.mode
    }

    /// 检查是否是普通文件
    pub fn is_file(&self) -> bool {
        self.inner.is_file()
    }

    /// 获取链接计数
    pub fn links_count(&self) -> u16 {
        self.inner.links_count
    }

    /// 获取删除时间
    pub fn dtime(&self) -> u32 {
        self.inner.dtime
    }

    /// 链接数为 0 或删除时间非零
    pub fn is_deleted(&self) -> bool {
        self.links_count() == 0 || self.dtime() != 0
    }

    /// 获取标志
    pub fn flags(&self) -> InodeFlags {
        InodeFlags::from_bits_retain(self.inner.flags)
    }

    /// 检查是否使用 extent
    pub fn has_extents(&self) -> bool {
        self.flags().contains(InodeFlags::EXTENTS)
    }

    /// 检查数据是否内联在 inode 中
    pub fn has_inline_data(&self) -> bool {
        self.flags().contains(InodeFlags::INLINE_DATA)
    }

    /// 块指针区域（i_block，60 字节）
    pub fn block_area(&self) -> &[u8; EXT4_INODE_BLOCK_AREA_SIZE] {
        &self.inner.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ImageBuilder, InodeSpec, MockDevice};

    #[test]
    fn test_byte_offset_formula() {
        let image = ImageBuilder::new(4096, 64).build();
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();
        let sb = Superblock::load(&mut bdev).unwrap();
        let bg = BlockGroup::load(&mut bdev, &sb, 0).unwrap();

        assert_eq!(
            inode_byte_offset(&sb, &bg, 5).unwrap(),
            ImageBuilder::INODE_TABLE_BLOCK * 4096 + 5 * sb.inode_size() as u64
        );
    }

    #[test]
    fn test_load_deleted_inode() {
        let mut root = [0u8; EXT4_INODE_BLOCK_AREA_SIZE];
        root[..4].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let image = ImageBuilder::new(1024, 256)
            .inode(12, InodeSpec::raw(root).size(0).deleted())
            .build();
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();
        let sb = Superblock::load(&mut bdev).unwrap();

        let inode = Inode::load(&mut bdev, &sb, 12).unwrap();
        assert_eq!(inode.inode_num(), 12);
        assert!(inode.is_deleted());
        assert_eq!(inode.links_count(), 0);
        assert_ne!(inode.dtime(), 0);
        assert_eq!(inode.file_size(), 0);
        assert_eq!(&inode.block_area()[..4], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(!inode.has_extents());
    }

    #[test]
    fn test_load_live_extent_inode() {
        let image = ImageBuilder::new(4096, 64)
            .inode(2, InodeSpec::extents(&[(0, 1, 40)]).size(4096))
            .build();
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();
        let sb = Superblock::load(&mut bdev).unwrap();

        let inode = Inode::load(&mut bdev, &sb, 2).unwrap();
        assert!(!inode.is_deleted());
        assert!(inode.is_file());
        assert!(inode.has_extents());
        assert_eq!(inode.file_size(), 4096);
    }

    #[test]
    fn test_load_rejects_zero() {
        let image = ImageBuilder::new(1024, 256).build();
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();
        let sb = Superblock::load(&mut bdev).unwrap();

        let err = Inode::load(&mut bdev, &sb, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInode);
    }

    #[test]
    fn test_inode_table_past_device_is_read_error() {
        let image = ImageBuilder::new(1024, 256)
            .inode_table_at(10_000)
            .build();
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();
        let sb = Superblock::load(&mut bdev).unwrap();

        let err = Inode::load(&mut bdev, &sb, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadError);
        assert_eq!(err.stage(), Stage::InodeRead);
    }

    #[test]
    fn test_garbage_64bit_inode_table_is_read_error() {
        let image = ImageBuilder::new(4096, 64)
            .with_64bit_descriptors()
            .inode_table_at(0xFFFF_FFFF_0000_0004)
            .build();
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();
        let sb = Superblock::load(&mut bdev).unwrap();
        let bg = BlockGroup::load(&mut bdev, &sb, 0).unwrap();

        let err = inode_byte_offset(&sb, &bg, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadError);
        assert_eq!(err.stage(), Stage::InodeRead);

        let err = read_inode(&mut bdev, &sb, &bg, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadError);

        let err = Inode::load(&mut bdev, &sb, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadError);
        assert_eq!(err.stage(), Stage::InodeRead);
    }
}
