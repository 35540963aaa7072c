//! 块组操作模块
//!
//! 这个模块负责把 inode 编号映射到块组，并读取该块组的描述符。

mod read;

pub use read::*;
