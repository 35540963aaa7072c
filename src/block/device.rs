//! 块设备核心类型

use crate::consts::{EXT4_MAX_BLOCK_SIZE, EXT4_MIN_BLOCK_SIZE};
use crate::error::{Error, ErrorKind, Result, Stage};

/// 块设备接口
///
/// 实现此 trait 以提供底层设备访问。地址单位是扇区。
///
/// # 示例
///
/// ```rust,ignore
/// use ext4_undelete::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn total_sectors(&self) -> u64 {
///         1_000_000
///     }
///
///     fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
///         // 实现扇区读取
///         Ok(count as usize * self.sector_size() as usize)
///     }
/// }
/// ```
pub trait BlockDevice {
    /// 物理扇区大小（通常 512）
    fn sector_size(&self) -> u32 {
        crate::consts::EXT4_DEFAULT_SECTOR_SIZE
    }

    /// 总扇区数
    fn total_sectors(&self) -> u64;

    /// 读取扇区
    ///
    /// # 参数
    ///
    /// * `lba` - 起始扇区号
    /// * `count` - 要读取的扇区数
    /// * `buf` - 目标缓冲区（大小至少为 count * sector_size）
    ///
    /// # 返回
    ///
    /// 成功返回实际读取的字节数
    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize>;
}

/// 块设备包装器
///
/// 为恢复流程提供按文件系统块的访问，包含分区偏移与读取统计。
///
/// 读取 superblock 之前块大小为 1024，解析出真实块大小后通过
/// [`BlockDev::set_block_size`] 更新。整个恢复过程只有这一个设备句柄，
/// 各阶段以 `&mut BlockDev<D>` 借用它。
pub struct BlockDev<D> {
    /// 底层设备
    device: D,
    /// 文件系统块大小（字节）
    block_size: u32,
    /// 分区偏移（字节）
    partition_offset: u64,
    /// 分区大小（字节）
    partition_size: u64,
    /// 逻辑块读取次数
    read_count: u64,
    /// 物理读取次数（实际设备操作）
    physical_read_count: u64,
}

impl<D: BlockDevice> BlockDev<D> {
    /// 创建覆盖整个设备的包装器
    pub fn new(device: D) -> Result<Self> {
        Self::new_partition(device, 0)
    }

    /// 创建从 `offset` 字节处开始的分区包装器
    ///
    /// 分区一直延伸到设备末尾。偏移必须按扇区对齐。
    pub fn new_partition(device: D, offset: u64) -> Result<Self> {
        let sector_size = device.sector_size() as u64;
        if sector_size == 0 || offset % sector_size != 0 {
            return Err(Error::new(
                ErrorKind::ReadError,
                Stage::Device,
                format!("partition offset {offset} is not aligned to {sector_size}-byte sectors"),
            ));
        }

        let device_size = device.total_sectors().saturating_mul(sector_size);
        if offset >= device_size {
            return Err(Error::new(
                ErrorKind::ReadError,
                Stage::Device,
                format!("partition offset {offset} is past the end of the device ({device_size} bytes)"),
            ));
        }

        Ok(Self {
            device,
            block_size: EXT4_MIN_BLOCK_SIZE,
            partition_offset: offset,
            partition_size: device_size - offset,
            read_count: 0,
            physical_read_count: 0,
        })
    }

    /// 获取底层设备的可变引用
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// 获取文件系统块大小
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 设置文件系统块大小
    ///
    /// 块大小必须是 2 的幂，位于 1 KiB..=64 KiB，并且是扇区大小的整数倍
    pub fn set_block_size(&mut self, block_size: u32) -> Result<()> {
        if !block_size.is_power_of_two()
            || !(EXT4_MIN_BLOCK_SIZE..=EXT4_MAX_BLOCK_SIZE).contains(&block_size)
            || block_size % self.device.sector_size() != 0
        {
            return Err(Error::new(
                ErrorKind::InvalidFilesystem,
                Stage::Device,
                format!("unusable block size {block_size}"),
            ));
        }
        self.block_size = block_size;
        Ok(())
    }

    /// 获取物理扇区大小
    pub fn sector_size(&self) -> u32 {
        self.device.sector_size()
    }

    /// 分区内可寻址的完整块数
    pub fn total_blocks(&self) -> u64 {
        self.partition_size / self.block_size as u64
    }

    /// 获取分区偏移
    pub fn partition_offset(&self) -> u64 {
        self.partition_offset
    }

    /// 获取分区大小
    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    /// 获取逻辑块读取次数
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// 获取物理读取次数（实际设备操作）
    pub fn physical_read_count(&self) -> u64 {
        self.physical_read_count
    }

    // 内部辅助方法

    /// 将分区内字节偏移转换为设备扇区号
    pub(super) fn byte_to_sector(&self, offset: u64) -> u64 {
        (offset + self.partition_offset) / self.device.sector_size() as u64
    }

    /// 增加读计数
    pub(super) fn inc_read_count(&mut self, blocks: u64) {
        self.read_count += blocks;
    }

    /// 增加物理读计数
    pub(super) fn inc_physical_read_count(&mut self) {
        self.physical_read_count += 1;
    }
}
