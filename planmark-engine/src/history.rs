use tracing::debug;

/// 线性撤销/重做栈。
///
/// `states[index]` 始终是当前状态；提交会截断 `index` 之后的重做分支。
#[derive(Debug, Clone)]
pub struct History<S> {
    states: Vec<S>,
    index: usize,
}

impl<S: Clone + PartialEq> History<S> {
    pub fn new(initial: S) -> Self {
        Self {
            states: vec![initial],
            index: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> &S {
        &self.states[self.index]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// 历史至少保留一个快照，因此恒为 `false`。
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.states.len()
    }

    /// 基于当前状态生成新状态并入栈。新旧状态结构相等时不记录，返回 `false`。
    pub fn commit<F>(&mut self, updater: F) -> bool
    where
        F: FnOnce(&S) -> S,
    {
        let next = updater(self.current());
        if &next == self.current() {
            debug!(index = self.index, "提交内容未变化，忽略");
            return false;
        }
        self.states.truncate(self.index + 1);
        self.states.push(next);
        self.index = self.states.len() - 1;
        debug!(index = self.index, len = self.states.len(), "提交新状态");
        true
    }

    /// 原地覆盖当前状态，不新增历史记录（拖拽等连续操作）。
    pub fn live_update<F>(&mut self, updater: F)
    where
        F: FnOnce(&S) -> S,
    {
        let next = updater(self.current());
        self.states[self.index] = next;
    }

    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.index -= 1;
        debug!(index = self.index, "撤销");
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.index += 1;
        debug!(index = self.index, "重做");
        true
    }

    /// 以新状态重置历史（加载设计时使用）。
    pub fn reset_with(&mut self, state: S) {
        self.states = vec![state];
        self.index = 0;
        debug!("历史记录已重置");
    }

    /// 按时间顺序返回全部快照。
    pub fn states(&self) -> &[S] {
        &self.states
    }
}

impl<S: Clone + PartialEq + Default> Default for History<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}
