//! Extent 树操作模块
//!
//! 把 inode 中的 extent 树展开为 [`BlockMapping`](crate::mapping::BlockMapping)。
//!
//! 删除后的 inode 里，extent 树可能残缺或指向已被复用的块，遍历时：
//! - 节点头魔数错误、深度超限、深度不连续、重复访问同一节点块 → `CorruptExtentTree`
//! - 单个物理块越界 → 记为空洞并继续

mod tree;

pub use tree::*;
