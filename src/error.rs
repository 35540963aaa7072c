//! 错误类型定义
//!
//! 恢复流程中每个阶段的失败都会带上阶段标签（[`Stage`]）和错误类别（[`ErrorKind`]），
//! 调用方据此给出"哪一步、因为什么"的诊断信息。

use std::borrow::Cow;
use std::fmt;
use std::io;

/// 恢复操作错误
#[derive(Debug, thiserror::Error)]
#[error("{stage}: {kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    stage: Stage,
    message: Cow<'static, str>,
    #[source]
    source: Option<io::Error>,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// superblock 魔数不匹配或关键字段越界
    InvalidFilesystem,
    /// inode 编号为 0 或超过 inode 总数
    InvalidInode,
    /// 计算出的块组号超出块组数量
    GroupOutOfRange,
    /// extent 树深度超限、重复访问同一块或节点头损坏
    CorruptExtentTree,
    /// 设备 I/O 失败
    ReadError,
    /// 输出文件 I/O 失败
    WriteError,
}

/// 出错的恢复阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 打开或读取设备本身
    Device,
    /// 读取 superblock
    Superblock,
    /// 定位 / 读取块组描述符
    GroupDescriptor,
    /// 读取 inode
    InodeRead,
    /// 解析块映射（extent 树或间接块）
    BlockMapping,
    /// 写输出文件
    OutputWrite,
}

impl Error {
    /// 创建新错误
    pub fn new(kind: ErrorKind, stage: Stage, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            source: None,
        }
    }

    /// 创建带底层 I/O 原因的错误
    pub fn with_io(
        kind: ErrorKind,
        stage: Stage,
        message: impl Into<Cow<'static, str>>,
        cause: io::Error,
    ) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
            source: Some(cause),
        }
    }

    /// 重新标记阶段
    ///
    /// 设备层只知道自己是 `Stage::Device`，由发起读取的上层阶段改写为自己的标签。
    pub fn at(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// 获取错误类型
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取出错阶段
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 获取错误消息
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidFilesystem => "invalid filesystem",
            ErrorKind::InvalidInode => "invalid inode",
            ErrorKind::GroupOutOfRange => "block group out of range",
            ErrorKind::CorruptExtentTree => "corrupt extent tree",
            ErrorKind::ReadError => "device read error",
            ErrorKind::WriteError => "output write error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Device => "device",
            Stage::Superblock => "superblock",
            Stage::GroupDescriptor => "group descriptor",
            Stage::InodeRead => "inode read",
            Stage::BlockMapping => "block mapping",
            Stage::OutputWrite => "output write",
        };
        f.write_str(s)
    }
}

/// 给 `Result` 改写阶段标签的扩展方法
pub(crate) trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn at(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.at(stage))
    }
}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
