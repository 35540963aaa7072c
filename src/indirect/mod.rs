//! 间接块映射模块
//!
//! 不使用 extent 的 inode 按传统方式寻址：12 个直接块指针，
//! 随后是一级、二级、三级间接块指针。

mod mapper;

pub use mapper::IndirectBlockMapper;
