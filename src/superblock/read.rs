//! Superblock 读取和验证

use crate::{
    block::{BlockDev, BlockDevice},
    consts::*,
    error::{Error, ErrorKind, Result, Stage, StageExt},
    types::ext4_sblock,
};
use log::{debug, info};

/// 从块设备读取 superblock
///
/// # 参数
///
/// * `bdev` - 块设备引用
///
/// # 返回
///
/// 成功返回 superblock 结构；魔数不匹配返回 `InvalidFilesystem`
pub fn read_superblock<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<ext4_sblock> {
    let mut sb_buf = vec![0u8; EXT4_SUPERBLOCK_SIZE];

    // 读取 superblock（从偏移 1024 开始）
    bdev.read_bytes(EXT4_SUPERBLOCK_OFFSET, &mut sb_buf)
        .at(Stage::Superblock)?;

    let sb = ext4_sblock::parse(&sb_buf).map_err(|e| {
        Error::new(ErrorKind::InvalidFilesystem, Stage::Superblock, e.to_string())
    })?;

    // 验证魔数
    if !sb.is_valid() {
        return Err(Error::new(
            ErrorKind::InvalidFilesystem,
            Stage::Superblock,
            format!(
                "bad superblock magic {:#06x} (expected {:#06x})",
                sb.magic, EXT4_SUPERBLOCK_MAGIC
            ),
        ));
    }

    Ok(sb)
}

/// Superblock 包装器，提供几何参数查询
///
/// 一次恢复只读取一次，之后不可变
#[derive(Debug, Clone)]
pub struct Superblock {
    pub(crate) inner: ext4_sblock,
}

impl Superblock {
    /// 从 ext4_sblock 创建 Superblock（主要用于测试）
    pub fn new(inner: ext4_sblock) -> Self {
        Self { inner }
    }

    /// 从块设备加载 superblock
    ///
    /// 读取、校验合理性，并把块设备的块大小切换为文件系统块大小
    pub fn load<D: BlockDevice>(bdev: &mut BlockDev<D>) -> Result<Self> {
        let inner = read_superblock(bdev)?;
        let sb = Self { inner };
        sb.check()?;

        bdev.set_block_size(sb.block_size()).at(Stage::Superblock)?;

        info!(
            "[SUPERBLOCK] block_size={}, inode_size={}, blocks={}, inodes={}, \
             blocks_per_group={}, inodes_per_group={}, desc_size={}, incompat={:?}",
            sb.block_size(),
            sb.inode_size(),
            sb.blocks_count(),
            sb.inodes_count(),
            sb.blocks_per_group(),
            sb.inodes_per_group(),
            sb.group_desc_size(),
            sb.incompat(),
        );
        if let Some(name) = sb.volume_name().filter(|n| !n.is_empty()) {
            debug!("[SUPERBLOCK] volume name {:?}", name);
        }

        Ok(sb)
    }

    /// 获取内部 superblock 结构的引用
    pub fn inner(&self) -> &ext4_sblock {
        &self.inner
    }

    /// 获取块大小（1024 << log_block_size）
    pub fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    /// 获取 inode 大小
    pub fn inode_size(&self) -> u16 {
        self.inner.inode_size()
    }

    /// 获取总块数
    pub fn blocks_count(&self) -> u64 {
        self.inner.blocks_count()
    }

    /// 获取总 inode 数
    pub fn inodes_count(&self) -> u32 {
        self.inner.inodes_count
    }

    /// 获取每组块数
    pub fn blocks_per_group(&self) -> u32 {
        self.inner.blocks_per_group
    }

    /// 获取每组 inode 数
    pub fn inodes_per_group(&self) -> u32 {
        self.inner.inodes_per_group
    }

    /// 获取第一个数据块
    pub fn first_data_block(&self) -> u32 {
        self.inner.first_data_block
    }

    /// 不兼容特性集合
    pub fn incompat(&self) -> IncompatFeatures {
        IncompatFeatures::from_bits_retain(self.inner.feature_incompat)
    }

    /// 只读兼容特性集合
    pub fn ro_compat(&self) -> RoCompatFeatures {
        RoCompatFeatures::from_bits_retain(self.inner.feature_ro_compat)
    }

    /// 检查是否支持 extent
    pub fn has_extents(&self) -> bool {
        self.incompat().contains(IncompatFeatures::EXTENTS)
    }

    /// 检查是否是 64 位文件系统
    pub fn is_64bit(&self) -> bool {
        self.incompat().contains(IncompatFeatures::BIT64)
    }

    /// 获取块组描述符大小
    ///
    /// 非 64 位文件系统固定 32 字节；64 位文件系统取 desc_size 字段，为 0 时按 64
    pub fn group_desc_size(&self) -> usize {
        if self.is_64bit() {
            let size = self.inner.desc_size as usize;
            if size > 0 {
                size
            } else {
                EXT4_GROUP_DESC_SIZE_64
            }
        } else {
            EXT4_GROUP_DESC_SIZE
        }
    }

    /// 按 inode 总数计算的块组数量（向上取整）
    pub fn group_count(&self) -> u32 {
        self.inodes_count().div_ceil(self.inodes_per_group())
    }

    /// 按总块数计算的块组数量（向上取整）
    pub fn block_group_count(&self) -> u64 {
        let data_blocks = self
            .blocks_count()
            .saturating_sub(self.first_data_block() as u64);
        data_blocks.div_ceil(self.blocks_per_group() as u64)
    }

    /// 获取卷名称（UTF-8 字符串）
    pub fn volume_name(&self) -> Option<&str> {
        // 找到第一个 null 字节
        let len = self
            .inner
            .volume_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.inner.volume_name.len());

        core::str::from_utf8(&self.inner.volume_name[..len]).ok()
    }

    /// superblock 合理性检查
    ///
    /// 检查解码后续阶段依赖的几何字段：
    /// - 魔数
    /// - 计数字段非零
    /// - 块大小 1 KiB..=64 KiB
    /// - inode 大小：≥ 128、2 的幂、不超过块大小
    /// - 块组描述符大小范围
    ///
    /// 不做校验和验证。
    pub fn check(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::new(ErrorKind::InvalidFilesystem, Stage::Superblock, msg));

        if !self.inner.is_valid() {
            return fail(format!("bad superblock magic {:#06x}", self.inner.magic));
        }

        if self.inner.log_block_size > EXT4_MAX_LOG_BLOCK_SIZE {
            return fail(format!(
                "log_block_size {} out of range",
                self.inner.log_block_size
            ));
        }

        if self.inodes_count() == 0 {
            return fail("inodes_count is zero".into());
        }
        if self.blocks_count() == 0 {
            return fail("blocks_count is zero".into());
        }
        if self.blocks_per_group() == 0 {
            return fail("blocks_per_group is zero".into());
        }
        if self.inodes_per_group() == 0 {
            return fail("inodes_per_group is zero".into());
        }
        if self.first_data_block() as u64 >= self.blocks_count() {
            return fail(format!(
                "first_data_block {} beyond blocks_count {}",
                self.first_data_block(),
                self.blocks_count()
            ));
        }

        let inode_size = self.inode_size() as u32;
        if (inode_size as usize) < EXT4_GOOD_OLD_INODE_SIZE
            || !inode_size.is_power_of_two()
            || inode_size > self.block_size()
        {
            return fail(format!("inode_size {inode_size} is invalid"));
        }

        let desc_size = self.group_desc_size();
        if !(EXT4_MIN_BLOCK_GROUP_DESCRIPTOR_SIZE..=EXT4_MAX_BLOCK_GROUP_DESCRIPTOR_SIZE)
            .contains(&desc_size)
            || !desc_size.is_power_of_two()
        {
            return fail(format!("group descriptor size {desc_size} is invalid"));
        }

        Ok(())
    }

    /// 判断块组是否为稀疏超级块组
    ///
    /// 稀疏超级块特性：只在特定块组（0, 1, 和 3/5/7 的幂次）存储超级块备份
    pub fn is_sparse_group(group: u64) -> bool {
        // 块组 0 和 1 总是包含超级块
        if group <= 1 {
            return true;
        }

        // 偶数组不包含超级块
        if (group & 1) == 0 {
            return false;
        }

        // 检查是否是 3、5、7 的幂次
        is_power_of(group, 7) || is_power_of(group, 5) || is_power_of(group, 3)
    }

    /// 判断超级块（及其备份）是否存在于指定的块组中
    pub fn has_super_in_bg(&self, group: u64) -> bool {
        if self.ro_compat().contains(RoCompatFeatures::SPARSE_SUPER) {
            Self::is_sparse_group(group)
        } else {
            true
        }
    }
}

/// 判断一个数是否为另一个数的幂
fn is_power_of(mut a: u64, b: u64) -> bool {
    loop {
        if a < b {
            return false;
        }
        if a == b {
            return true;
        }
        if (a % b) != 0 {
            return false;
        }
        a /= b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_sblock, ImageBuilder, MockDevice};

    #[test]
    fn test_block_size_is_power_of_two() {
        for log in 0..=EXT4_MAX_LOG_BLOCK_SIZE {
            let mut sb = sample_sblock();
            sb.log_block_size = log;
            let sb = Superblock::new(sb);
            assert_eq!(sb.block_size(), 1024 << log);
            assert!(sb.block_size().is_power_of_two());
            assert!(sb.block_size() >= 1024);
        }
    }

    #[test]
    fn test_group_desc_size_by_feature() {
        let mut raw = sample_sblock();
        raw.desc_size = 64;
        assert_eq!(Superblock::new(raw).group_desc_size(), 32);

        raw.feature_incompat |= IncompatFeatures::BIT64.bits();
        assert_eq!(Superblock::new(raw).group_desc_size(), 64);

        raw.desc_size = 0;
        assert_eq!(Superblock::new(raw).group_desc_size(), 64);
    }

    #[test]
    fn test_check_rejects_bad_geometry() {
        let sb = Superblock::new(sample_sblock());
        assert!(sb.check().is_ok());

        let mut raw = sample_sblock();
        raw.inodes_per_group = 0;
        let err = Superblock::new(raw).check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFilesystem);

        let mut raw = sample_sblock();
        raw.log_block_size = 7;
        assert!(Superblock::new(raw).check().is_err());

        let mut raw = sample_sblock();
        raw.inode_size = 200;
        assert!(Superblock::new(raw).check().is_err());
    }

    #[test]
    fn test_group_counts() {
        let mut raw = sample_sblock();
        raw.inodes_count = 9050;
        raw.inodes_per_group = 1000;
        raw.blocks_count_lo = 950;
        raw.first_data_block = 0;
        raw.blocks_per_group = 100;
        let sb = Superblock::new(raw);

        assert_eq!(sb.group_count(), 10);
        assert_eq!(sb.block_group_count(), 10);
    }

    #[test]
    fn test_sparse_groups() {
        assert!(Superblock::is_sparse_group(0));
        assert!(Superblock::is_sparse_group(1));
        assert!(Superblock::is_sparse_group(3));
        assert!(Superblock::is_sparse_group(25));
        assert!(Superblock::is_sparse_group(49));
        assert!(!Superblock::is_sparse_group(2));
        assert!(!Superblock::is_sparse_group(15));
    }

    #[test]
    fn test_load_from_device() {
        let image = ImageBuilder::new(4096, 64).build();
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();

        let sb = Superblock::load(&mut bdev).unwrap();
        assert_eq!(sb.block_size(), 4096);
        assert_eq!(bdev.block_size(), 4096);
        assert!(sb.has_extents());
    }

    #[test]
    fn test_bad_magic_is_invalid_filesystem() {
        let mut image = ImageBuilder::new(1024, 64).build();
        image[1024 + 56] = 0;
        image[1024 + 57] = 0;
        let mut bdev = BlockDev::new(MockDevice::new(image)).unwrap();

        let err = Superblock::load(&mut bdev).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFilesystem);
        assert_eq!(err.stage(), Stage::Superblock);
    }

    #[test]
    fn test_truncated_device_is_read_error() {
        let mut bdev = BlockDev::new(MockDevice::new(vec![0u8; 1536])).unwrap();
        let err = read_superblock(&mut bdev).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadError);
        assert_eq!(err.stage(), Stage::Superblock);
    }
}
