//! 块 I/O 操作实现

use super::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result, Stage};
use log::trace;

impl<D: BlockDevice> BlockDev<D> {
    /// 读取单个逻辑块
    ///
    /// # 参数
    ///
    /// * `lba` - 分区内的块号
    /// * `buf` - 目标缓冲区（大小至少为 block_size）
    ///
    /// # 返回
    ///
    /// 成功返回读取的字节数
    pub fn read_block(&mut self, lba: u64, buf: &mut [u8]) -> Result<usize> {
        self.read_blocks(lba, 1, buf)
    }

    /// 读取连续的多个逻辑块
    ///
    /// 块号越过分区末尾时返回 `ReadError`，不会发起设备读取。
    ///
    /// # 参数
    ///
    /// * `lba` - 起始块号
    /// * `count` - 块数
    /// * `buf` - 目标缓冲区（大小至少为 count * block_size）
    pub fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let block_size = self.block_size() as u64;
        let len = count as u64 * block_size;

        if (buf.len() as u64) < len {
            return Err(Error::new(
                ErrorKind::ReadError,
                Stage::Device,
                "buffer too small for requested blocks",
            ));
        }

        let end = lba.checked_add(count as u64);
        if end.map_or(true, |end| end > self.total_blocks()) {
            return Err(Error::new(
                ErrorKind::ReadError,
                Stage::Device,
                format!(
                    "blocks {lba}+{count} lie beyond the end of the device ({} blocks)",
                    self.total_blocks()
                ),
            ));
        }

        self.inc_read_count(count as u64);
        let offset = lba * block_size;
        self.read_aligned(offset, &mut buf[..len as usize])
    }

    /// 读取字节
    ///
    /// 从任意字节偏移读取，自动处理扇区对齐。
    ///
    /// # 参数
    ///
    /// * `offset` - 分区内字节偏移量
    /// * `buf` - 目标缓冲区
    ///
    /// # 返回
    ///
    /// 成功返回读取的字节数
    ///
    /// # 示例
    ///
    /// ```rust,ignore
    /// let mut buf = vec![0u8; 1024];
    /// block_dev.read_bytes(1024, &mut buf)?;
    /// ```
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len() as u64;
        if len == 0 {
            return Ok(0);
        }

        let end = offset.checked_add(len);
        if end.map_or(true, |end| end > self.partition_size()) {
            return Err(Error::new(
                ErrorKind::ReadError,
                Stage::Device,
                format!(
                    "byte range {offset}+{len} lies beyond the end of the device ({} bytes)",
                    self.partition_size()
                ),
            ));
        }

        let sector_size = self.sector_size() as u64;
        let abs = offset + self.partition_offset();
        let head = abs % sector_size;

        // 已对齐则直接读入目标缓冲区
        if head == 0 && len % sector_size == 0 {
            return self.read_aligned(offset, buf);
        }

        // 计算覆盖范围的扇区并读到临时缓冲区
        let aligned_start = offset - head;
        let aligned_len = (head + len).div_ceil(sector_size) * sector_size;
        let mut temp = vec![0u8; aligned_len as usize];
        self.read_aligned(aligned_start, &mut temp)?;

        // 复制所需字节
        buf.copy_from_slice(&temp[head as usize..(head + len) as usize]);

        Ok(buf.len())
    }

    /// 读取扇区对齐的字节范围
    fn read_aligned(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let sector_size = self.sector_size() as u64;
        let sector = self.byte_to_sector(offset);
        let sector_count = u32::try_from(buf.len() as u64 / sector_size).map_err(|_| {
            Error::new(ErrorKind::ReadError, Stage::Device, "read request too large")
        })?;

        trace!(
            "[BLOCK READ] sector={}, count={}, bytes={}",
            sector,
            sector_count,
            buf.len()
        );

        self.inc_physical_read_count();
        self.device_mut().read_sectors(sector, sector_count, buf)
    }
}
