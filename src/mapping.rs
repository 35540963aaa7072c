//! 块映射
//!
//! 块映射器（extent 树 / 间接块）把 inode 的块指针区域展开为一串逻辑块区间，
//! 每个区间要么映射到连续的物理块，要么是空洞，要么是 unwritten extent。
//!
//! 恢复跨度（span）取所有映射区间（含 unwritten 和越界丢失的区间）末尾的最大值；
//! 指针为 0 的空洞位于最后一个映射之后时不会延长跨度。

use log::debug;

/// 单个逻辑块的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// 映射到物理块
    Mapped(u64),
    /// 预分配但未写入的物理块
    Unwritten(u64),
    /// 空洞，恢复时写零
    Hole,
    /// 指向设备范围外的块，数据已丢失；恢复时写零，但计入跨度
    Lost,
}

/// 一段连续的逻辑块区间
///
/// `target` 中的物理块号是区间第一个逻辑块对应的物理块，后续逻辑块依次 +1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// 起始逻辑块号
    pub logical: u64,
    /// 块数
    pub len: u64,
    /// 区间起点的去向
    pub target: BlockRef,
}

impl Segment {
    /// 区间末尾（不含）
    pub fn end(&self) -> u64 {
        self.logical + self.len
    }

    /// 区间内第 `offset` 块的去向
    pub fn at(&self, offset: u64) -> BlockRef {
        match self.target {
            BlockRef::Mapped(p) => BlockRef::Mapped(p + offset),
            BlockRef::Unwritten(p) => BlockRef::Unwritten(p + offset),
            BlockRef::Hole => BlockRef::Hole,
            BlockRef::Lost => BlockRef::Lost,
        }
    }

    /// 是否有物理块支撑（映射或 unwritten）
    pub fn is_backed(&self) -> bool {
        matches!(self.target, BlockRef::Mapped(_) | BlockRef::Unwritten(_))
    }

    /// 是否计入恢复跨度（除指针为 0 的空洞外都计入）
    pub fn extends_span(&self) -> bool {
        !matches!(self.target, BlockRef::Hole)
    }

    /// 从区间前端去掉 `n` 块
    fn skip_front(&self, n: u64) -> Segment {
        Segment {
            logical: self.logical + n,
            len: self.len - n,
            target: self.at(n),
        }
    }

    /// 能否把 `next` 接到本区间尾部
    fn joins(&self, next: &Segment) -> bool {
        if self.end() != next.logical {
            return false;
        }
        match (self.at(self.len), next.target) {
            (BlockRef::Mapped(a), BlockRef::Mapped(b)) => a == b,
            (BlockRef::Unwritten(a), BlockRef::Unwritten(b)) => a == b,
            (BlockRef::Hole, BlockRef::Hole) => true,
            (BlockRef::Lost, BlockRef::Lost) => true,
            _ => false,
        }
    }
}

/// 解析后的块映射
///
/// 按压入顺序记录区间；[`BlockMapping::segments`] 给出按逻辑块排序、互不重叠、
/// 完整覆盖 `[0, span)` 的视图，未记录的逻辑块补为空洞。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMapping {
    runs: Vec<Segment>,
}

impl BlockMapping {
    /// 创建空映射
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录 `len` 个映射块
    pub fn push_mapped(&mut self, logical: u64, physical: u64, len: u64) {
        self.push(Segment {
            logical,
            len,
            target: BlockRef::Mapped(physical),
        });
    }

    /// 记录 `len` 个 unwritten 块
    pub fn push_unwritten(&mut self, logical: u64, physical: u64, len: u64) {
        self.push(Segment {
            logical,
            len,
            target: BlockRef::Unwritten(physical),
        });
    }

    /// 记录 `len` 个越界丢失的块
    pub fn push_lost(&mut self, logical: u64, len: u64) {
        self.push(Segment {
            logical,
            len,
            target: BlockRef::Lost,
        });
    }

    /// 记录 `len` 个空洞块
    pub fn push_hole(&mut self, logical: u64, len: u64) {
        self.push(Segment {
            logical,
            len,
            target: BlockRef::Hole,
        });
    }

    fn push(&mut self, seg: Segment) {
        if seg.len == 0 {
            return;
        }
        if let Some(last) = self.runs.last_mut() {
            if last.joins(&seg) {
                last.len += seg.len;
                return;
            }
        }
        self.runs.push(seg);
    }

    /// 是否没有任何区间
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// 按压入顺序的原始区间
    pub fn runs(&self) -> &[Segment] {
        &self.runs
    }

    /// 恢复跨度（块数）
    pub fn span_blocks(&self) -> u64 {
        self.runs
            .iter()
            .filter(|s| s.extends_span())
            .map(Segment::end)
            .max()
            .unwrap_or(0)
    }

    /// 规范化视图
    ///
    /// - 按逻辑块排序
    /// - 重叠部分以先出现（逻辑块更小，相同时先压入）的区间为准
    /// - 空隙补为空洞
    /// - 截止到 `span_blocks()`
    pub fn segments(&self) -> Vec<Segment> {
        let span = self.span_blocks();
        let mut sorted = self.runs.clone();
        // 稳定排序，保持同起点区间的压入顺序
        sorted.sort_by_key(|s| s.logical);

        let mut out: Vec<Segment> = Vec::with_capacity(sorted.len());
        let mut cursor = 0u64;

        for mut seg in sorted {
            if cursor >= span {
                break;
            }
            if seg.end() <= cursor {
                debug!(
                    "[MAPPING] logical blocks {}..{} already covered, dropped",
                    seg.logical,
                    seg.end()
                );
                continue;
            }
            if seg.logical < cursor {
                debug!(
                    "[MAPPING] logical blocks {}..{} overlap an earlier range",
                    seg.logical, cursor
                );
                seg = seg.skip_front(cursor - seg.logical);
            }
            if seg.logical >= span {
                break;
            }
            if seg.logical > cursor {
                push_joined(&mut out, Segment {
                    logical: cursor,
                    len: seg.logical - cursor,
                    target: BlockRef::Hole,
                });
            }
            if seg.end() > span {
                seg.len = span - seg.logical;
            }
            cursor = seg.end();
            push_joined(&mut out, seg);
        }

        out
    }

    /// 查询单个逻辑块
    pub fn lookup(&self, logical: u64) -> BlockRef {
        self.segments()
            .iter()
            .find(|s| s.logical <= logical && logical < s.end())
            .map_or(BlockRef::Hole, |s| s.at(logical - s.logical))
    }

    /// 逐块展开的 (逻辑块, 物理块) 映射对，只含已映射块
    pub fn pairs(&self) -> Vec<(u64, u64)> {
        self.segments()
            .iter()
            .filter_map(|s| match s.target {
                BlockRef::Mapped(p) => Some((s.logical..s.end()).zip(p..)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// 已映射块数
    pub fn mapped_blocks(&self) -> u64 {
        self.count(|t| matches!(t, BlockRef::Mapped(_)))
    }

    /// unwritten 块数
    pub fn unwritten_blocks(&self) -> u64 {
        self.count(|t| matches!(t, BlockRef::Unwritten(_)))
    }

    /// 跨度内写零的块数（空洞与越界丢失的块）
    pub fn hole_blocks(&self) -> u64 {
        self.count(|t| matches!(t, BlockRef::Hole | BlockRef::Lost))
    }

    /// 越界丢失的块数
    pub fn lost_blocks(&self) -> u64 {
        self.count(|t| matches!(t, BlockRef::Lost))
    }

    fn count(&self, pred: impl Fn(&BlockRef) -> bool) -> u64 {
        self.segments()
            .iter()
            .filter(|s| pred(&s.target))
            .map(|s| s.len)
            .sum()
    }

    /// 丢弃逻辑块号不小于 `cap` 的部分
    ///
    /// # 返回
    ///
    /// 被丢弃的计入跨度的块数
    pub fn truncate_to(&mut self, cap: u64) -> u64 {
        let mut dropped = 0;
        self.runs.retain_mut(|seg| {
            if seg.end() <= cap {
                return true;
            }
            let cut = if seg.logical >= cap { seg.len } else { seg.end() - cap };
            if seg.extends_span() {
                dropped += cut;
            }
            seg.len -= cut;
            seg.len > 0
        });
        dropped
    }
}

fn push_joined(out: &mut Vec<Segment>, seg: Segment) {
    if let Some(last) = out.last_mut() {
        if last.joins(&seg) {
            last.len += seg.len;
            return;
        }
    }
    out.push(seg);
}
