//! 基于 `std::fs::File` 的块设备
//!
//! 镜像文件和块设备节点都走这里。块设备节点的 `metadata().len()` 为 0，
//! 所以设备大小通过 seek 到末尾获得。
//!
//! 镜像长度不是扇区整数倍时，最后一个扇区按不足部分补零读出。

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;

use super::BlockDevice;
use crate::consts::EXT4_DEFAULT_SECTOR_SIZE;
use crate::error::{Error, ErrorKind, Result, Stage};

/// 只读打开的镜像文件 / 块设备
///
/// 句柄在 drop 时关闭，任何退出路径都会释放
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    size: u64,
}

impl FileDevice {
    /// 只读打开设备
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            Error::with_io(
                ErrorKind::ReadError,
                Stage::Device,
                format!("cannot open {}", path.display()),
                e,
            )
        })?;

        let size = file.seek(SeekFrom::End(0)).map_err(|e| {
            Error::with_io(
                ErrorKind::ReadError,
                Stage::Device,
                format!("cannot determine size of {}", path.display()),
                e,
            )
        })?;

        debug!("[DEVICE] opened {} ({} bytes)", path.display(), size);

        Ok(Self { file, size })
    }

    /// 设备大小（字节）
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl BlockDevice for FileDevice {
    fn total_sectors(&self) -> u64 {
        self.size.div_ceil(EXT4_DEFAULT_SECTOR_SIZE as u64)
    }

    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let sector_size = self.sector_size() as u64;
        let offset = lba * sector_size;
        let len = (count as u64 * sector_size) as usize;

        let io_err = |e: std::io::Error| {
            Error::with_io(
                ErrorKind::ReadError,
                Stage::Device,
                format!("read of {len} bytes at offset {offset} failed"),
                e,
            )
        };

        if offset + len as u64 > self.total_sectors() * sector_size {
            return Err(io_err(std::io::ErrorKind::UnexpectedEof.into()));
        }

        // 末尾不足一个扇区的部分补零
        let avail = self.size.saturating_sub(offset).min(len as u64) as usize;
        self.file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        self.file.read_exact(&mut buf[..avail]).map_err(io_err)?;
        buf[avail..len].fill(0);
        Ok(len)
    }
}
