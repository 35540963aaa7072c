//! Extent 树遍历和块映射

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result, Stage, StageExt},
    mapping::BlockMapping,
    types::{ext4_extent, ext4_extent_header, ext4_extent_idx},
};
use log::*;
use std::collections::HashSet;

/// Extent 树遍历器
///
/// 从 inode 的块指针区域出发，深度优先展开整棵树，结果追加到调用方的
/// [`BlockMapping`] 中。出错时已经展开的部分保留在映射里。
pub struct ExtentTree<'a, D: BlockDevice> {
    bdev: &'a mut BlockDev<D>,
    block_size: u32,
    /// 物理块号上限（不含）
    limit_blocks: u64,
    max_depth: u16,
    /// 已读取的节点块
    visited: HashSet<u64>,
}

impl<'a, D: BlockDevice> ExtentTree<'a, D> {
    /// 创建新的 extent 树遍历器
    ///
    /// # 参数
    ///
    /// * `bdev` - 块设备（块大小已设置为文件系统块大小）
    /// * `limit_blocks` - 可寻址物理块数，越界的引用记为空洞
    pub fn new(bdev: &'a mut BlockDev<D>, limit_blocks: u64) -> Self {
        let block_size = bdev.block_size();
        Self {
            bdev,
            block_size,
            limit_blocks,
            max_depth: EXT4_EXTENT_MAX_DEPTH,
            visited: HashSet::new(),
        }
    }

    /// 设置允许的最大树深度
    pub fn with_max_depth(mut self, max_depth: u16) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 已读取的节点块数
    pub fn nodes_read(&self) -> usize {
        self.visited.len()
    }

    /// 展开整棵 extent 树
    ///
    /// # 参数
    ///
    /// * `root` - inode 的块指针区域（60 字节）
    /// * `mapping` - 结果追加到这里
    ///
    /// # 错误
    ///
    /// - `CorruptExtentTree`：节点头损坏、深度超限或重复访问节点块
    /// - `ReadError`：读取子节点失败
    pub fn walk(&mut self, root: &[u8], mapping: &mut BlockMapping) -> Result<()> {
        let header = parse_header(root)?;

        if header.depth > self.max_depth {
            error!(
                "[EXTENT] root depth {} exceeds limit {}",
                header.depth, self.max_depth
            );
            return Err(corrupt(format!(
                "extent tree depth {} exceeds limit {}",
                header.depth, self.max_depth
            )));
        }

        debug!(
            "[EXTENT] root: depth={}, entries={}, max={}",
            header.depth, header.entries, header.max
        );

        self.walk_node(root, &header, mapping)
    }

    fn walk_node(
        &mut self,
        node: &[u8],
        header: &ext4_extent_header,
        mapping: &mut BlockMapping,
    ) -> Result<()> {
        let capacity = node.len() / EXT4_EXTENT_ENTRY_SIZE - 1;
        let entries = header.entries as usize;
        if entries > capacity {
            error!(
                "[EXTENT] node claims {} entries, room for {}",
                entries, capacity
            );
            return Err(corrupt(format!(
                "extent node claims {entries} entries but holds at most {capacity}"
            )));
        }

        for i in 0..entries {
            let entry = &node[(i + 1) * EXT4_EXTENT_ENTRY_SIZE..(i + 2) * EXT4_EXTENT_ENTRY_SIZE];
            if header.is_leaf() {
                self.map_extent(entry, mapping)?;
            } else {
                self.descend(entry, header.depth, mapping)?;
            }
        }

        Ok(())
    }

    /// 叶子节点中的一个 extent
    fn map_extent(&mut self, entry: &[u8], mapping: &mut BlockMapping) -> Result<()> {
        let extent = ext4_extent::parse(entry).map_err(|e| corrupt(e.to_string()))?;

        let logical = extent.logical_block() as u64;
        let len = extent.actual_len() as u64;
        let physical = extent.physical_block();

        if len == 0 {
            trace!("[EXTENT] empty extent at logical {}", logical);
            return Ok(());
        }

        trace!(
            "[EXTENT] logical={}..{} physical={:#x} unwritten={}",
            logical,
            logical + len,
            physical,
            extent.is_unwritten()
        );

        // 越界部分记为丢失块
        let in_range = self.limit_blocks.saturating_sub(physical).min(len);
        if in_range < len {
            warn!(
                "[EXTENT] physical blocks {:#x}..{:#x} beyond device ({} blocks), \
                 logical {}..{} recorded as lost",
                physical + in_range,
                physical + len,
                self.limit_blocks,
                logical + in_range,
                logical + len
            );
        }

        if extent.is_unwritten() {
            mapping.push_unwritten(logical, physical, in_range);
        } else {
            mapping.push_mapped(logical, physical, in_range);
        }
        mapping.push_lost(logical + in_range, len - in_range);

        Ok(())
    }

    /// 索引节点中的一个索引项：读取子节点并递归
    fn descend(&mut self, entry: &[u8], depth: u16, mapping: &mut BlockMapping) -> Result<()> {
        let idx = ext4_extent_idx::parse(entry).map_err(|e| corrupt(e.to_string()))?;
        let child = idx.leaf_block();

        if child == 0 || child >= self.limit_blocks {
            warn!(
                "[EXTENT] index for logical {} points to block {:#x} outside device ({} blocks), \
                 subtree skipped",
                idx.logical_block(),
                child,
                self.limit_blocks
            );
            // 子树的长度未知，只把起始逻辑块记为丢失
            mapping.push_lost(idx.logical_block() as u64, 1);
            return Ok(());
        }

        if !self.visited.insert(child) {
            error!("[EXTENT] node block {:#x} visited twice", child);
            return Err(corrupt(format!(
                "extent node block {child} referenced more than once"
            )));
        }

        let mut buf = vec![0u8; self.block_size as usize];
        self.bdev.read_block(child, &mut buf).at(Stage::BlockMapping)?;

        let header = parse_header(&buf)?;
        if header.depth != depth - 1 {
            error!(
                "[EXTENT] node block {:#x} has depth {}, expected {}",
                child,
                header.depth,
                depth - 1
            );
            return Err(corrupt(format!(
                "extent node block {} has depth {} under a depth {} parent",
                child, header.depth, depth
            )));
        }

        debug!(
            "[EXTENT] node block {:#x}: depth={}, entries={}",
            child, header.depth, header.entries
        );

        self.walk_node(&buf, &header, mapping)
    }
}

fn parse_header(node: &[u8]) -> Result<ext4_extent_header> {
    let header = ext4_extent_header::parse(node).map_err(|e| corrupt(e.to_string()))?;
    if !header.is_valid() {
        error!("[EXTENT] bad header magic {:#06x}", header.magic);
        return Err(corrupt(format!(
            "bad extent header magic {:#06x}",
            header.magic
        )));
    }
    Ok(header)
}

fn corrupt(message: String) -> Error {
    Error::new(ErrorKind::CorruptExtentTree, Stage::BlockMapping, message)
}
