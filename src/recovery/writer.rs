//! 恢复输出写入
//!
//! 按逻辑块顺序把映射区间写入输出文件：映射块从设备读取，空洞写零，
//! unwritten 块按 [`UnwrittenPolicy`] 处理。输出文件长度等于恢复跨度。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use super::UnwrittenPolicy;
use crate::block::{BlockDev, BlockDevice};
use crate::error::{Error, ErrorKind, Result, Stage, StageExt};
use crate::mapping::{BlockMapping, BlockRef, Segment};

/// 单次设备读取的最大块数
const MAX_BLOCKS_PER_READ: u64 = 256;

/// 输出文件写入器
///
/// 创建时截断目标文件。出错时已写入的部分保留在磁盘上。
pub struct RecoveryWriter {
    out: BufWriter<File>,
    path: PathBuf,
    block_size: u32,
    unwritten: UnwrittenPolicy,
    /// 已写入的字节数，也是下一次写入的文件偏移
    written: u64,
}

impl RecoveryWriter {
    /// 创建（截断）输出文件
    pub fn create(path: impl AsRef<Path>, block_size: u32, unwritten: UnwrittenPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            Error::with_io(
                ErrorKind::WriteError,
                Stage::OutputWrite,
                format!("cannot create {}", path.display()),
                e,
            )
        })?;

        debug!("[RECOVERY] writing to {}", path.display());

        Ok(Self {
            out: BufWriter::new(file),
            path,
            block_size,
            unwritten,
            written: 0,
        })
    }

    /// 已写入的字节数
    pub fn written(&self) -> u64 {
        self.written
    }

    /// 按逻辑顺序写出整个映射
    pub fn write_mapping<D: BlockDevice>(
        &mut self,
        bdev: &mut BlockDev<D>,
        mapping: &BlockMapping,
    ) -> Result<()> {
        for seg in mapping.segments() {
            self.write_segment(bdev, &seg)?;
        }
        Ok(())
    }

    fn write_segment<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, seg: &Segment) -> Result<()> {
        let bs = self.block_size as u64;
        debug_assert_eq!(self.written, seg.logical * bs);

        trace!(
            "[RECOVERY] logical {}..{} -> {:?}",
            seg.logical,
            seg.end(),
            seg.target
        );

        match seg.target {
            BlockRef::Mapped(physical) => self.copy_blocks(bdev, physical, seg.len),
            BlockRef::Unwritten(physical) => match self.unwritten {
                UnwrittenPolicy::ReadRaw => self.copy_blocks(bdev, physical, seg.len),
                UnwrittenPolicy::ZeroFill => self.write_zeros(seg.len * bs),
            },
            BlockRef::Hole | BlockRef::Lost => self.write_zeros(seg.len * bs),
        }
    }

    /// 从设备复制 `count` 个连续物理块
    fn copy_blocks<D: BlockDevice>(&mut self, bdev: &mut BlockDev<D>, start: u64, count: u64) -> Result<()> {
        let bs = self.block_size as usize;
        let mut buf = vec![0u8; bs * count.min(MAX_BLOCKS_PER_READ) as usize];

        let mut done = 0u64;
        while done < count {
            let n = (count - done).min(MAX_BLOCKS_PER_READ);
            let chunk = &mut buf[..n as usize * bs];
            bdev.read_blocks(start + done, n as u32, chunk)
                .at(Stage::OutputWrite)?;
            self.write_bytes_from(chunk)?;
            done += n;
        }

        Ok(())
    }

    fn write_zeros(&mut self, mut len: u64) -> Result<()> {
        let zeros = vec![0u8; (self.block_size as u64 * MAX_BLOCKS_PER_READ).min(len) as usize];
        while len > 0 {
            let n = len.min(zeros.len() as u64) as usize;
            self.write_bytes_from(&zeros[..n])?;
            len -= n as u64;
        }
        Ok(())
    }

    /// 写入内联数据（data 位于 inode 中的文件）
    pub fn write_inline(&mut self, data: &[u8]) -> Result<()> {
        self.write_bytes_from(data)
    }

    fn write_bytes_from(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_all(data).map_err(|e| self.write_error(e))?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        Error::with_io(
            ErrorKind::WriteError,
            Stage::OutputWrite,
            format!("write to {} at offset {} failed", self.path.display(), self.written),
            e,
        )
    }

    /// 刷新并关闭输出文件
    ///
    /// `trim_to` 给出且小于已写入长度时截断到该长度
    ///
    /// # 返回
    ///
    /// 最终文件长度
    pub fn finish(self, trim_to: Option<u64>) -> Result<u64> {
        let Self { out, path, written, .. } = self;
        let wrap = |e: std::io::Error, what: &str| {
            Error::with_io(
                ErrorKind::WriteError,
                Stage::OutputWrite,
                format!("{what} {} failed", path.display()),
                e,
            )
        };

        let file = out.into_inner().map_err(|e| wrap(e.into_error(), "flush of"))?;

        let len = match trim_to {
            Some(size) if size < written => {
                file.set_len(size).map_err(|e| wrap(e, "truncate of"))?;
                debug!("[RECOVERY] trimmed output from {} to {} bytes", written, size);
                size
            }
            _ => written,
        };

        file.sync_all().map_err(|e| wrap(e, "sync of"))?;
        Ok(len)
    }
}
