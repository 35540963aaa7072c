//! 测试辅助：内存块设备和合成 ext4 镜像

use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result, Stage};
use crate::types::ext4_sblock;

/// 以 `Vec<u8>` 为后端的块设备
pub(crate) struct MockDevice {
    data: Vec<u8>,
}

impl MockDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl BlockDevice for MockDevice {
    fn total_sectors(&self) -> u64 {
        self.data.len() as u64 / EXT4_DEFAULT_SECTOR_SIZE as u64
    }

    fn read_sectors(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let start = (lba * EXT4_DEFAULT_SECTOR_SIZE as u64) as usize;
        let len = count as usize * EXT4_DEFAULT_SECTOR_SIZE as usize;

        if start + len > self.data.len() || buf.len() < len {
            return Err(Error::new(
                ErrorKind::ReadError,
                Stage::Device,
                "mock read out of range",
            ));
        }

        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(len)
    }
}

/// 一个合法的 4K 块、4 个块组的 superblock
pub(crate) fn sample_sblock() -> ext4_sblock {
    ext4_sblock {
        inodes_count: 8192,
        blocks_count_lo: 131072,
        first_data_block: 0,
        log_block_size: 2,
        blocks_per_group: 32768,
        inodes_per_group: 2048,
        magic: EXT4_SUPERBLOCK_MAGIC,
        state: 1,
        rev_level: 1,
        first_ino: 11,
        inode_size: 256,
        feature_incompat: (IncompatFeatures::FILETYPE | IncompatFeatures::EXTENTS).bits(),
        feature_ro_compat: (RoCompatFeatures::SPARSE_SUPER | RoCompatFeatures::LARGE_FILE)
            .bits(),
        ..ext4_sblock::default()
    }
}

//=============================================================================
// 磁盘结构编码
//=============================================================================

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_header(buf: &mut [u8], entries: usize, depth: u16) {
    let max = buf.len() / EXT4_EXTENT_ENTRY_SIZE - 1;
    put_u16(buf, 0, EXT4_EXTENT_MAGIC);
    put_u16(buf, 2, entries as u16);
    put_u16(buf, 4, max as u16);
    put_u16(buf, 6, depth);
}

fn put_leaf_entries(buf: &mut [u8], extents: &[(u32, u16, u64)]) {
    put_header(buf, extents.len(), 0);
    for (i, &(logical, len, physical)) in extents.iter().enumerate() {
        let off = (i + 1) * EXT4_EXTENT_ENTRY_SIZE;
        put_u32(buf, off, logical);
        put_u16(buf, off + 4, len);
        put_u16(buf, off + 6, (physical >> 32) as u16);
        put_u32(buf, off + 8, physical as u32);
    }
}

fn put_index_entries(buf: &mut [u8], depth: u16, indexes: &[(u32, u64)]) {
    put_header(buf, indexes.len(), depth);
    for (i, &(logical, child)) in indexes.iter().enumerate() {
        let off = (i + 1) * EXT4_EXTENT_ENTRY_SIZE;
        put_u32(buf, off, logical);
        put_u32(buf, off + 4, child as u32);
        put_u16(buf, off + 8, (child >> 32) as u16);
    }
}

/// inode 内的叶子根节点，extent 为 (逻辑块, 长度, 物理块)
pub(crate) fn extent_leaf_root(extents: &[(u32, u16, u64)]) -> [u8; EXT4_INODE_BLOCK_AREA_SIZE] {
    let mut root = [0u8; EXT4_INODE_BLOCK_AREA_SIZE];
    put_leaf_entries(&mut root, extents);
    root
}

/// inode 内的索引根节点，索引为 (逻辑块, 子节点块号)
pub(crate) fn extent_index_root(depth: u16, indexes: &[(u32, u64)]) -> [u8; EXT4_INODE_BLOCK_AREA_SIZE] {
    let mut root = [0u8; EXT4_INODE_BLOCK_AREA_SIZE];
    put_index_entries(&mut root, depth, indexes);
    root
}

/// 整块大小的叶子节点
pub(crate) fn extent_leaf_block(block_size: usize, extents: &[(u32, u16, u64)]) -> Vec<u8> {
    let mut buf = vec![0u8; block_size];
    put_leaf_entries(&mut buf, extents);
    buf
}

/// 整块大小的索引节点
pub(crate) fn extent_index_block(block_size: usize, depth: u16, indexes: &[(u32, u64)]) -> Vec<u8> {
    let mut buf = vec![0u8; block_size];
    put_index_entries(&mut buf, depth, indexes);
    buf
}

/// 间接寻址的块指针区域，未给出的指针为 0
pub(crate) fn indirect_root(ptrs: &[u32]) -> [u8; EXT4_INODE_BLOCK_AREA_SIZE] {
    let mut root = [0u8; EXT4_INODE_BLOCK_AREA_SIZE];
    for (i, &p) in ptrs.iter().take(EXT4_INODE_BLOCKS).enumerate() {
        put_u32(&mut root, i * 4, p);
    }
    root
}

/// 间接块，未给出的指针为 0
pub(crate) fn pointer_block(block_size: usize, ptrs: &[u32]) -> Vec<u8> {
    let mut buf = vec![0u8; block_size];
    for (i, &p) in ptrs.iter().enumerate() {
        put_u32(&mut buf, i * 4, p);
    }
    buf
}

/// 内容可区分的数据块
pub(crate) fn pattern_block(block_size: usize, seed: u8) -> Vec<u8> {
    (0..block_size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed.wrapping_mul(7)) | 1)
        .collect()
}

//=============================================================================
// 合成镜像
//=============================================================================

/// 测试 inode 的内容
#[derive(Clone)]
pub(crate) struct InodeSpec {
    mode: u16,
    size: u64,
    links: u16,
    dtime: u32,
    flags: u32,
    i_block: [u8; EXT4_INODE_BLOCK_AREA_SIZE],
}

impl InodeSpec {
    /// 普通文件，块指针区域原样写入，不带 EXTENTS 标志
    pub fn raw(i_block: [u8; EXT4_INODE_BLOCK_AREA_SIZE]) -> Self {
        Self {
            mode: EXT4_INODE_MODE_FILE | 0o644,
            size: 0,
            links: 1,
            dtime: 0,
            flags: 0,
            i_block,
        }
    }

    /// 带 EXTENTS 标志的 extent 树根
    pub fn extent_tree(root: [u8; EXT4_INODE_BLOCK_AREA_SIZE]) -> Self {
        Self {
            flags: InodeFlags::EXTENTS.bits(),
            ..Self::raw(root)
        }
    }

    /// 深度为 0 的 extent 树
    pub fn extents(extents: &[(u32, u16, u64)]) -> Self {
        Self::extent_tree(extent_leaf_root(extents))
    }

    /// 间接寻址
    pub fn indirect(ptrs: &[u32]) -> Self {
        Self::raw(indirect_root(ptrs))
    }

    pub fn flags(mut self, flags: InodeFlags) -> Self {
        self.flags |= flags.bits();
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// 链接数清零并设置删除时间
    pub fn deleted(mut self) -> Self {
        self.links = 0;
        self.dtime = 1_700_000_000;
        self
    }

    fn encode(&self, buf: &mut [u8]) {
        put_u16(buf, 0, self.mode);
        put_u32(buf, 4, self.size as u32);
        put_u32(buf, 20, self.dtime);
        put_u16(buf, 26, self.links);
        put_u32(buf, 32, self.flags);
        buf[40..40 + EXT4_INODE_BLOCK_AREA_SIZE].copy_from_slice(&self.i_block);
        put_u32(buf, 108, (self.size >> 32) as u32);
    }
}

/// 单块组的合成 ext4 镜像
///
/// 布局：superblock 位于字节 1024，描述符表紧随 superblock 所在块，
/// inode 表从 [`ImageBuilder::INODE_TABLE_BLOCK`] 开始，测试数据放在
/// [`ImageBuilder::DATA_START`] 之后。
pub(crate) struct ImageBuilder {
    block_size: u32,
    blocks: u64,
    desc64: bool,
    extents: bool,
    inline_data: bool,
    inode_table: u64,
    inodes: Vec<(u32, InodeSpec)>,
    data: Vec<(u64, Vec<u8>)>,
}

impl ImageBuilder {
    pub const INODE_TABLE_BLOCK: u64 = 4;
    pub const DATA_START: u64 = 16;
    pub const INODES_PER_GROUP: u32 = 32;
    pub const INODE_SIZE: usize = 256;

    pub fn new(block_size: u32, blocks: u64) -> Self {
        Self {
            block_size,
            blocks,
            desc64: false,
            extents: true,
            inline_data: false,
            inode_table: Self::INODE_TABLE_BLOCK,
            inodes: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn with_64bit_descriptors(mut self) -> Self {
        self.desc64 = true;
        self
    }

    pub fn without_extents_feature(mut self) -> Self {
        self.extents = false;
        self
    }

    pub fn with_inline_data_feature(mut self) -> Self {
        self.inline_data = true;
        self
    }

    /// 只修改描述符中的 inode 表块号，inode 仍写在默认位置
    pub fn inode_table_at(mut self, block: u64) -> Self {
        self.inode_table = block;
        self
    }

    pub fn inode(mut self, ino: u32, spec: InodeSpec) -> Self {
        self.inodes.push((ino, spec));
        self
    }

    pub fn block(mut self, block: u64, data: Vec<u8>) -> Self {
        self.data.push((block, data));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let bs = self.block_size as usize;
        let mut image = vec![0u8; bs * self.blocks as usize];
        let first_data_block: u32 = if bs == 1024 { 1 } else { 0 };

        // superblock
        let sb = &mut image[EXT4_SUPERBLOCK_OFFSET as usize..][..EXT4_SUPERBLOCK_SIZE];
        let mut incompat = IncompatFeatures::FILETYPE;
        if self.extents {
            incompat |= IncompatFeatures::EXTENTS;
        }
        if self.desc64 {
            incompat |= IncompatFeatures::BIT64;
        }
        if self.inline_data {
            incompat |= IncompatFeatures::INLINE_DATA;
        }
        put_u32(sb, 0, Self::INODES_PER_GROUP);
        put_u32(sb, 4, self.blocks as u32);
        put_u32(sb, 20, first_data_block);
        put_u32(sb, 24, self.block_size.trailing_zeros() - 10);
        put_u32(sb, 32, self.blocks as u32);
        put_u32(sb, 40, Self::INODES_PER_GROUP);
        put_u16(sb, 56, EXT4_SUPERBLOCK_MAGIC);
        put_u16(sb, 58, 1);
        put_u32(sb, 76, 1);
        put_u32(sb, 84, 11);
        put_u16(sb, 88, Self::INODE_SIZE as u16);
        put_u32(sb, 96, incompat.bits());
        put_u32(
            sb,
            100,
            (RoCompatFeatures::SPARSE_SUPER | RoCompatFeatures::LARGE_FILE).bits(),
        );
        sb[120..130].copy_from_slice(b"undel-test");
        if self.desc64 {
            put_u16(sb, 254, EXT4_GROUP_DESC_SIZE_64 as u16);
            put_u32(sb, 336, (self.blocks >> 32) as u32);
        }

        // 块组 0 的描述符
        let gd = &mut image[(first_data_block as usize + 1) * bs..][..EXT4_GROUP_DESC_SIZE_64];
        put_u32(gd, 0, first_data_block + 2);
        put_u32(gd, 4, first_data_block + 3);
        put_u32(gd, 8, self.inode_table as u32);
        if self.desc64 {
            put_u32(gd, 40, (self.inode_table >> 32) as u32);
        }

        // inode 表
        for (ino, spec) in &self.inodes {
            let off = Self::INODE_TABLE_BLOCK as usize * bs + (*ino as usize - 1) * Self::INODE_SIZE;
            spec.encode(&mut image[off..off + Self::INODE_SIZE]);
        }

        for (block, data) in &self.data {
            let off = *block as usize * bs;
            image[off..off + data.len()].copy_from_slice(data);
        }

        image
    }
}
