//! 恢复流程编排
//!
//! superblock → 块组描述符 → inode → 块映射 → 输出文件。
//!
//! 只有 `CorruptExtentTree` 会留下部分输出：已经展开的区间照常写出，然后返回错误。
//! 其余错误在创建输出文件之前或写入过程中直接返回。

mod writer;

pub use writer::RecoveryWriter;

use std::fmt;
use std::path::Path;

use log::{error, info, warn};

use crate::{
    block::{BlockDev, BlockDevice, FileDevice},
    consts::*,
    error::{ErrorKind, Result},
    extent::ExtentTree,
    indirect::IndirectBlockMapper,
    inode::Inode,
    mapping::BlockMapping,
    superblock::Superblock,
};

/// unwritten extent 的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnwrittenPolicy {
    /// 写零
    #[default]
    ZeroFill,
    /// 读取磁盘上的原始字节
    ReadRaw,
}

/// 恢复选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOptions {
    /// 文件系统在设备内的字节偏移（整盘镜像时使用）
    pub partition_offset: u64,
    /// unwritten extent 的处理方式
    pub unwritten: UnwrittenPolicy,
    /// 按 inode 中记录的大小截断输出（记录的大小非零且小于恢复跨度时）
    pub trim_to_inode_size: bool,
    /// extent 树最大深度
    pub max_depth: u16,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            partition_offset: 0,
            unwritten: UnwrittenPolicy::default(),
            trim_to_inode_size: false,
            max_depth: EXT4_EXTENT_MAX_DEPTH,
        }
    }
}

/// 块寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingScheme {
    /// extent 树
    Extents,
    /// 直接 / 间接块指针
    Indirect,
    /// 数据内联在 inode 中
    Inline,
}

impl fmt::Display for AddressingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressingScheme::Extents => "extents",
            AddressingScheme::Indirect => "indirect",
            AddressingScheme::Inline => "inline",
        })
    }
}

/// 一次恢复的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 文件系统块大小
    pub block_size: u32,
    /// 恢复跨度（块）
    pub span_blocks: u64,
    /// 从设备复制的映射块数
    pub mapped_blocks: u64,
    /// 写零的空洞块数（含越界丢失的块）
    pub hole_blocks: u64,
    /// 指向设备范围外、数据已丢失的块数
    pub lost_blocks: u64,
    /// unwritten 块数
    pub unwritten_blocks: u64,
    /// 输出文件最终长度
    pub bytes_written: u64,
    /// 设备读取次数
    pub device_reads: u64,
    /// 寻址方式
    pub scheme: AddressingScheme,
}

/// inode 检查结果，不写任何输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeReport {
    /// inode 编号
    pub inode: u32,
    /// 文件模式
    pub mode: u16,
    /// 链接数
    pub links_count: u16,
    /// 删除时间
    pub dtime: u32,
    /// inode 中记录的文件大小
    pub stored_size: u64,
    /// inode 标志
    pub flags: InodeFlags,
    /// 寻址方式
    pub scheme: AddressingScheme,
    /// 文件系统块大小
    pub block_size: u32,
    /// 恢复跨度（块）
    pub span_blocks: u64,
    /// 映射块数
    pub mapped_blocks: u64,
    /// 空洞块数（含越界丢失的块）
    pub hole_blocks: u64,
    /// 越界丢失的块数
    pub lost_blocks: u64,
    /// unwritten 块数
    pub unwritten_blocks: u64,
}

impl InodeReport {
    /// 链接数为 0 或删除时间非零
    pub fn is_deleted(&self) -> bool {
        self.links_count == 0 || self.dtime != 0
    }
}

impl fmt::Display for InodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "inode:        {}", self.inode)?;
        writeln!(f, "mode:         {:#o}", self.mode)?;
        writeln!(f, "links:        {}", self.links_count)?;
        writeln!(f, "dtime:        {}", self.dtime)?;
        writeln!(f, "deleted:      {}", self.is_deleted())?;
        writeln!(f, "stored size:  {}", self.stored_size)?;
        writeln!(f, "flags:        {:#x}", self.flags.bits())?;
        writeln!(f, "addressing:   {}", self.scheme)?;
        writeln!(f, "block size:   {}", self.block_size)?;
        writeln!(f, "mapped:       {} blocks", self.mapped_blocks)?;
        writeln!(f, "holes:        {} blocks", self.hole_blocks)?;
        writeln!(f, "lost:         {} blocks", self.lost_blocks)?;
        writeln!(f, "unwritten:    {} blocks", self.unwritten_blocks)?;
        write!(
            f,
            "span:         {} blocks ({} bytes)",
            self.span_blocks,
            self.span_blocks * self.block_size as u64
        )
    }
}

/// 从设备恢复 inode 的数据到输出文件
///
/// 使用默认选项。
pub fn recover(
    device_path: impl AsRef<Path>,
    inode: u32,
    output_path: impl AsRef<Path>,
) -> Result<()> {
    recover_with(device_path, inode, output_path, &RecoveryOptions::default()).map(|_| ())
}

/// 按给定选项恢复，返回统计
pub fn recover_with(
    device_path: impl AsRef<Path>,
    inode: u32,
    output_path: impl AsRef<Path>,
    options: &RecoveryOptions,
) -> Result<RecoveryReport> {
    let device = FileDevice::open(device_path)?;
    Recovery::open(device, options)?.recover_to(inode, output_path)
}

/// 只检查 inode 和块映射，不写输出
pub fn inspect(
    device_path: impl AsRef<Path>,
    inode: u32,
    options: &RecoveryOptions,
) -> Result<InodeReport> {
    let device = FileDevice::open(device_path)?;
    Recovery::open(device, options)?.inspect(inode)
}

/// 一次恢复会话
///
/// 持有唯一的设备句柄和 superblock，各阶段借用它们
pub struct Recovery<D: BlockDevice> {
    bdev: BlockDev<D>,
    sb: Superblock,
    options: RecoveryOptions,
}

impl<D: BlockDevice> Recovery<D> {
    /// 包装设备并读取 superblock
    pub fn open(device: D, options: &RecoveryOptions) -> Result<Self> {
        let mut bdev = BlockDev::new_partition(device, options.partition_offset)?;
        let sb = Superblock::load(&mut bdev)?;
        Ok(Self {
            bdev,
            sb,
            options: options.clone(),
        })
    }

    /// superblock
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// 块设备
    pub fn block_dev(&self) -> &BlockDev<D> {
        &self.bdev
    }

    /// 可寻址物理块数：superblock 声明的块数与设备实际块数取小
    pub fn addressable_blocks(&self) -> u64 {
        self.sb.blocks_count().min(self.bdev.total_blocks())
    }

    /// 读取 inode
    pub fn load_inode(&mut self, inode_num: u32) -> Result<Inode> {
        Inode::load(&mut self.bdev, &self.sb, inode_num)
    }

    /// 判断寻址方式
    ///
    /// 文件系统与 inode 都声明 inline data 时按内联数据处理；
    /// 文件系统支持 extent 且 inode 带 EXTENTS 标志时按 extent 树解析，否则按间接块解析
    pub fn scheme(&self, inode: &Inode) -> AddressingScheme {
        if self.sb.incompat().contains(IncompatFeatures::INLINE_DATA) && inode.has_inline_data() {
            AddressingScheme::Inline
        } else if self.sb.has_extents() && inode.has_extents() {
            AddressingScheme::Extents
        } else {
            AddressingScheme::Indirect
        }
    }

    /// 展开 inode 的块映射
    ///
    /// 结果追加到 `mapping`；出错时已展开的部分保留在其中。
    /// 跨度超过文件系统总块数的部分被丢弃。
    pub fn map_inode(&mut self, inode: &Inode, mapping: &mut BlockMapping) -> Result<AddressingScheme> {
        let scheme = self.scheme(inode);
        let limit = self.addressable_blocks();
        let cap = self.sb.blocks_count();

        let result = match scheme {
            AddressingScheme::Extents => ExtentTree::new(&mut self.bdev, limit)
                .with_max_depth(self.options.max_depth)
                .walk(inode.block_area(), mapping),
            AddressingScheme::Indirect => IndirectBlockMapper::new(self.sb.block_size())
                .with_limits(limit, cap)
                .map_all(&mut self.bdev, inode.block_area(), mapping),
            AddressingScheme::Inline => Ok(()),
        };

        let dropped = mapping.truncate_to(cap);
        if dropped > 0 {
            warn!(
                "[RECOVERY] {} blocks beyond the filesystem size ({} blocks) dropped",
                dropped, cap
            );
        }

        info!(
            "[RECOVERY] inode {} via {}: span={} blocks, mapped={}, holes={} ({} lost), unwritten={}",
            inode.inode_num(),
            scheme,
            mapping.span_blocks(),
            mapping.mapped_blocks(),
            mapping.hole_blocks(),
            mapping.lost_blocks(),
            mapping.unwritten_blocks()
        );

        result.map(|_| scheme)
    }

    /// 检查 inode 和块映射
    pub fn inspect(&mut self, inode_num: u32) -> Result<InodeReport> {
        let inode = self.load_inode(inode_num)?;
        let mut mapping = BlockMapping::new();
        let scheme = self.map_inode(&inode, &mut mapping)?;

        Ok(InodeReport {
            inode: inode_num,
            mode: inode.mode(),
            links_count: inode.links_count(),
            dtime: inode.dtime(),
            stored_size: inode.file_size(),
            flags: inode.flags(),
            scheme,
            block_size: self.sb.block_size(),
            span_blocks: mapping.span_blocks(),
            mapped_blocks: mapping.mapped_blocks(),
            hole_blocks: mapping.hole_blocks(),
            lost_blocks: mapping.lost_blocks(),
            unwritten_blocks: mapping.unwritten_blocks(),
        })
    }

    /// 恢复 inode 到输出文件
    pub fn recover_to(&mut self, inode_num: u32, output_path: impl AsRef<Path>) -> Result<RecoveryReport> {
        let inode = self.load_inode(inode_num)?;
        if !inode.is_deleted() {
            info!("[RECOVERY] inode {} is still linked", inode_num);
        }

        let mut mapping = BlockMapping::new();
        let scheme = self.scheme(&inode);
        let mapped = self.map_inode(&inode, &mut mapping);

        // 只有 extent 树损坏时继续写出已解析的部分
        let corruption = match mapped {
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::CorruptExtentTree => {
                error!(
                    "[RECOVERY] {}; writing the {} blocks resolved so far",
                    e,
                    mapping.span_blocks()
                );
                Some(e)
            }
            Err(e) => return Err(e),
        };

        if mapping.span_blocks() == 0 && scheme != AddressingScheme::Inline {
            warn!(
                "[RECOVERY] inode {} maps no blocks; output will be empty",
                inode_num
            );
        }

        let block_size = self.sb.block_size();
        let mut writer = RecoveryWriter::create(output_path, block_size, self.options.unwritten)?;

        if scheme == AddressingScheme::Inline {
            let stored = inode.file_size().min(EXT4_INODE_BLOCK_AREA_SIZE as u64) as usize;
            warn!(
                "[RECOVERY] inode {} keeps its data inline; recovering {} bytes from i_block only",
                inode_num, stored
            );
            writer.write_inline(&inode.block_area()[..stored])?;
        } else {
            writer.write_mapping(&mut self.bdev, &mapping)?;
        }

        let trim_to = (self.options.trim_to_inode_size && inode.file_size() > 0)
            .then(|| inode.file_size());
        let bytes_written = writer.finish(trim_to)?;

        if let Some(e) = corruption {
            return Err(e);
        }

        let report = RecoveryReport {
            block_size,
            span_blocks: mapping.span_blocks(),
            mapped_blocks: mapping.mapped_blocks(),
            hole_blocks: mapping.hole_blocks(),
            lost_blocks: mapping.lost_blocks(),
            unwritten_blocks: mapping.unwritten_blocks(),
            bytes_written,
            device_reads: self.bdev.physical_read_count(),
            scheme,
        };

        info!(
            "[RECOVERY] inode {} recovered: {} bytes ({} mapped, {} hole, {} unwritten blocks)",
            inode_num,
            report.bytes_written,
            report.mapped_blocks,
            report.hole_blocks,
            report.unwritten_blocks
        );

        Ok(report)
    }
}
