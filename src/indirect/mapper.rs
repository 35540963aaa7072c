//! 间接块映射器实现
//!
//! 按指针数组顺序深度优先展开整棵间接块树，结果按逻辑块顺序追加到 [`BlockMapping`]。

use crate::block::{BlockDev, BlockDevice};
use crate::consts::{EXT4_INODE_BLOCKS, EXT4_INODE_DIRECT_BLOCKS, EXT4_INODE_INDIRECT_BLOCK};
use crate::error::{Error, ErrorKind, Result, Stage, StageExt};
use crate::mapping::BlockMapping;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};

/// 间接块映射器
pub struct IndirectBlockMapper {
    /// 每个间接块可以容纳的指针数量 (block_size / 4)
    blocks_per_indirect: u32,

    /// 每个间接层级的起始逻辑块号
    ///
    /// - limits[0] = 12 (直接块)
    /// - limits[1] = 12 + blocks_per_indirect (一级间接)
    /// - limits[2] = limits[1] + blocks_per_indirect^2 (二级间接)
    /// - limits[3] = limits[2] + blocks_per_indirect^3 (三级间接)
    block_limits: [u64; 4],

    /// 每个层级的一个指针覆盖的块数
    ///
    /// - blocks_per_level[0] = 1
    /// - blocks_per_level[1] = blocks_per_indirect
    /// - blocks_per_level[2] = blocks_per_indirect^2
    /// - blocks_per_level[3] = blocks_per_indirect^3
    blocks_per_level: [u64; 4],

    /// 物理块号上限（不含），越界指针记为空洞
    limit_blocks: u64,

    /// 逻辑块号上限（不含），起点在此之后的子树不再读取
    cap_blocks: u64,
}

impl IndirectBlockMapper {
    /// 创建新的间接块映射器
    ///
    /// # 参数
    ///
    /// - `block_size`: 文件系统块大小（字节）
    pub fn new(block_size: u32) -> Self {
        // 每个间接块能存储的指针数 = 块大小 / sizeof(u32)
        let blocks_per_indirect = block_size / 4;

        let mut block_limits = [0u64; 4];
        let mut blocks_per_level = [0u64; 4];

        block_limits[0] = EXT4_INODE_DIRECT_BLOCKS as u64;
        blocks_per_level[0] = 1;

        for i in 1..4 {
            blocks_per_level[i] = blocks_per_level[i - 1] * blocks_per_indirect as u64;
            block_limits[i] = block_limits[i - 1] + blocks_per_level[i];
        }

        Self {
            blocks_per_indirect,
            block_limits,
            blocks_per_level,
            limit_blocks: u64::MAX,
            cap_blocks: u64::MAX,
        }
    }

    /// 设置物理块号上限和逻辑块号上限
    pub fn with_limits(mut self, limit_blocks: u64, cap_blocks: u64) -> Self {
        self.limit_blocks = limit_blocks;
        self.cap_blocks = cap_blocks;
        self
    }

    /// 可寻址的最大逻辑块数
    pub fn max_blocks(&self) -> u64 {
        self.block_limits[3]
    }

    /// 第 `level` 级间接指针覆盖的第一个逻辑块（level 为 1..=3）
    pub fn level_start(&self, level: usize) -> u64 {
        self.block_limits[level - 1]
    }

    /// 展开 inode 的全部块指针
    ///
    /// # 参数
    ///
    /// - `bdev`: 块设备
    /// - `root`: inode 的块指针区域（15 个小端 u32）
    /// - `mapping`: 结果追加到这里
    ///
    /// # 说明
    ///
    /// 任意层级的零指针都是空洞，按它覆盖的整棵子树大小记录
    pub fn map_all<D: BlockDevice>(
        &self,
        bdev: &mut BlockDev<D>,
        root: &[u8],
        mapping: &mut BlockMapping,
    ) -> Result<()> {
        if root.len() < EXT4_INODE_BLOCKS * 4 {
            return Err(Error::new(
                ErrorKind::InvalidInode,
                Stage::BlockMapping,
                "block pointer area shorter than 60 bytes",
            ));
        }

        debug!(
            "[INDIRECT] {} pointers per block, max {} blocks",
            self.blocks_per_indirect,
            self.max_blocks()
        );

        for i in 0..EXT4_INODE_DIRECT_BLOCKS {
            let ptr = LittleEndian::read_u32(&root[i * 4..]);
            self.walk(bdev, ptr, 0, i as u64, mapping)?;
        }

        for level in 1..=3 {
            let slot = EXT4_INODE_INDIRECT_BLOCK + level - 1;
            let ptr = LittleEndian::read_u32(&root[slot * 4..]);
            self.walk(bdev, ptr, level, self.level_start(level), mapping)?;
        }

        Ok(())
    }

    /// 展开一个指针
    ///
    /// `level` 为 0 时 `ptr` 直接指向数据块，否则指向第 `level` 级间接块
    fn walk<D: BlockDevice>(
        &self,
        bdev: &mut BlockDev<D>,
        ptr: u32,
        level: usize,
        logical: u64,
        mapping: &mut BlockMapping,
    ) -> Result<()> {
        let covered = self.blocks_per_level[level];

        if logical >= self.cap_blocks {
            return Ok(());
        }

        if ptr == 0 {
            mapping.push_hole(logical, covered);
            return Ok(());
        }

        let block = ptr as u64;
        if block >= self.limit_blocks {
            warn!(
                "[INDIRECT] level {} pointer {:#x} for logical {} beyond device ({} blocks), \
                 recorded as lost",
                level, block, logical, self.limit_blocks
            );
            // 间接块丢失时无法得知子树实际用到多少块，只有起始逻辑块确定存在
            mapping.push_lost(logical, 1);
            mapping.push_hole(logical + 1, covered - 1);
            return Ok(());
        }

        if level == 0 {
            trace!("[INDIRECT] logical {} -> {}", logical, block);
            mapping.push_mapped(logical, block, 1);
            return Ok(());
        }

        let mut buf = vec![0u8; bdev.block_size() as usize];
        bdev.read_block(block, &mut buf).at(Stage::BlockMapping)?;
        debug!(
            "[INDIRECT] level {} block {} covers logical {}..{}",
            level,
            block,
            logical,
            logical + covered
        );

        let child_covered = self.blocks_per_level[level - 1];
        for (k, raw) in buf.chunks_exact(4).enumerate() {
            let child = LittleEndian::read_u32(raw);
            self.walk(bdev, child, level - 1, logical + k as u64 * child_covered, mapping)?;
        }

        Ok(())
    }
}
