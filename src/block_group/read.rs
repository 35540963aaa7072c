//! 块组描述符定位和读取

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result, Stage, StageExt},
    superblock::Superblock,
    types::ext4_group_desc,
};
use log::debug;

/// 计算 inode 所在的块组和组内索引
///
/// # 返回
///
/// `(group, index_in_group)`
///
/// # 错误
///
/// - `InvalidInode`：编号为 0 或超过 inode 总数
/// - `GroupOutOfRange`：块组号不小于块组数量（取 inode 总数和总块数推出的较小者）
pub fn locate_inode(sb: &Superblock, inode_num: u32) -> Result<(u32, u32)> {
    if inode_num == 0 {
        return Err(Error::new(
            ErrorKind::InvalidInode,
            Stage::GroupDescriptor,
            "inode number 0 is reserved",
        ));
    }
    if inode_num > sb.inodes_count() {
        return Err(Error::new(
            ErrorKind::InvalidInode,
            Stage::GroupDescriptor,
            format!(
                "inode {} exceeds inode count {}",
                inode_num,
                sb.inodes_count()
            ),
        ));
    }

    let inodes_per_group = sb.inodes_per_group();
    let group = (inode_num - 1) / inodes_per_group;
    let index = (inode_num - 1) % inodes_per_group;

    let group_count = u64::from(sb.group_count()).min(sb.block_group_count());
    if u64::from(group) >= group_count {
        return Err(Error::new(
            ErrorKind::GroupOutOfRange,
            Stage::GroupDescriptor,
            format!(
                "group {} for inode {} out of range (group count {})",
                group, inode_num, group_count
            ),
        ));
    }

    Ok((group, index))
}

/// 计算块组描述符的存储位置
///
/// # 返回
///
/// (块地址, 块内偏移) 元组
///
/// # 实现说明
///
/// 支持两种模式：
/// - 传统模式：所有块组描述符连续存储在 first_data_block + 1 位置
/// - META_BG 模式：每个 meta group 的描述符块放在该组第一个块组的开头，
///   该块组带 superblock 备份时向后挪一块
pub fn get_block_group_desc_location(sb: &Superblock, group_num: u32) -> (u64, u64) {
    let block_size = sb.block_size() as u64;
    let desc_size = sb.group_desc_size() as u64;
    let first_data_block = sb.first_data_block() as u64;
    let group = group_num as u64;

    // 每个块可以容纳多少个描述符
    let desc_per_block = block_size / desc_size;
    let metagroup = group / desc_per_block;

    let has_meta_bg = sb.incompat().contains(IncompatFeatures::META_BG);
    let first_meta_bg = sb.inner().first_meta_bg as u64;

    if has_meta_bg && metagroup >= first_meta_bg {
        let first_group = metagroup * desc_per_block;
        let group_start = first_group
            .saturating_mul(sb.blocks_per_group() as u64)
            .saturating_add(first_data_block);
        let super_blocks = u64::from(sb.has_super_in_bg(first_group));

        (
            group_start.saturating_add(super_blocks),
            (group % desc_per_block) * desc_size,
        )
    } else {
        (
            first_data_block + 1 + (group * desc_size) / block_size,
            (group * desc_size) % block_size,
        )
    }
}

/// 读取块组描述符
///
/// 只读取描述符本身（32 或 64 字节），64 位描述符时合并 inode 表高 32 位
pub fn read_block_group_desc<D: BlockDevice>(
    bdev: &mut BlockDev<D>,
    sb: &Superblock,
    group_num: u32,
) -> Result<ext4_group_desc> {
    let block_size = sb.block_size() as u64;
    let desc_size = sb.group_desc_size();

    let (gdt_block, desc_offset_in_block) = get_block_group_desc_location(sb, group_num);
    let desc_offset = gdt_block
        .checked_mul(block_size)
        .and_then(|base| base.checked_add(desc_offset_in_block))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::ReadError,
                Stage::GroupDescriptor,
                format!(
                    "descriptor block {:#x} of group {} overflows the byte address space",
                    gdt_block, group_num
                ),
            )
        })?;

    let mut desc_buf = vec![0u8; desc_size];
    bdev.read_bytes(desc_offset, &mut desc_buf)
        .at(Stage::GroupDescriptor)?;

    let desc = ext4_group_desc::parse(&desc_buf, desc_size).map_err(|e| {
        Error::new(ErrorKind::InvalidFilesystem, Stage::GroupDescriptor, e.to_string())
    })?;

    debug!(
        "[GROUP DESC] group {} at block {} +{}: inode_table={}",
        group_num,
        gdt_block,
        desc_offset_in_block,
        desc.inode_table()
    );

    Ok(desc)
}

/// BlockGroup 包装器
#[derive(Debug, Clone)]
pub struct BlockGroup {
    pub(crate) inner: ext4_group_desc,
    pub(crate) group_num: u32,
}

impl BlockGroup {
    /// 从块设备加载块组描述符
    pub fn load<D: BlockDevice>(
        bdev: &mut BlockDev<D>,
        sb: &Superblock,
        group_num: u32,
    ) -> Result<Self> {
        let inner = read_block_group_desc(bdev, sb, group_num)?;
        Ok(Self { inner, group_num })
    }

    /// 获取块组编号
    pub fn group_num(&self) -> u32 {
        self.group_num
    }

    /// 获取内部块组描述符结构的引用
    pub fn inner(&self) -> &ext4_group_desc {
        &self.inner
    }

    /// 获取 inode 表起始块号
    ///
    /// 描述符为 32 字节时高半部分不存在，解码时已置零
    pub fn inode_table_first_block(&self) -> u64 {
        self.inner.inode_table()
    }

    /// 检查 inode 表是否落在设备可寻址范围内
    pub fn inode_table_in_range(&self, total_blocks: u64) -> bool {
        self.inode_table_first_block() < total_blocks
    }
}
