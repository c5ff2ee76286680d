use crate::splitter::split_lines;

/// 跨数据块边界安全地重组行。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 文本片段的边界与行边界无关：一行可能跨越多个片段，`\r\n` 也可能被拆成 `"...\r"` 与 `"\n..."`；
/// - 累加器只缓存“尚未确认完整”的尾部（挂起片段），保证内存只与当前未完成的行成正比。
///
/// ## 逻辑 (How)
/// - 挂起片段在第一次 `push` 时由“不存在”变为空串，此后每个片段都追加到其末尾；
/// - 若挂起片段以 `\r` 结尾，该 `\r` 暂不参与切分：它可能是下一片段开头 `\n` 的前半部；
/// - 对其余文本调用 [`split_lines`]，除最后一段外全部作为完整行输出，最后一段（连同暂扣的 `\r`）
///   成为新的挂起片段；
/// - 挂起片段长度不超过暂扣的 `\r` 时直接等待更多输入。
///
/// ## 契约 (What)
/// - `push`：输出本轮确认完整的行，顺序与原文一致；
/// - `finish`：对挂起片段做最后一次切分并全部输出，只有这里才把末尾孤立的 `\r` 当作终止符；
///   若从未收到任何片段则不输出；整个输入恰好是一个 `"\r"` 时按字面量输出为单字符行；
/// - `finish` 消费挂起片段，重复调用不会重复输出。
#[derive(Debug, Default)]
pub struct LineAccumulator {
    pending: Option<String>,
    emitted: bool,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前挂起片段；首个片段到达前为 `None`。
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// 追加一个解码后的文本片段，并把确认完整的行写入 `lines`。
    pub fn push<E>(&mut self, fragment: &str, lines: &mut E)
    where
        E: Extend<String>,
    {
        let pending = self.pending.get_or_insert_with(String::new);
        pending.push_str(fragment);

        let withheld = usize::from(pending.ends_with('\r'));
        if pending.len() <= withheld {
            return;
        }

        let scan_len = pending.len() - withheld;
        let mut segments = split_lines(&pending[..scan_len]);
        let mut keep_from = 0;
        while let Some(segment) = segments.next() {
            if segments.remainder().is_none() {
                // 最后一段总是延伸到扫描区末尾。
                keep_from = scan_len - segment.len();
            } else {
                self.emitted = true;
                lines.extend(Some(segment.to_owned()));
            }
        }
        pending.drain(..keep_from);
    }

    /// 输入结束：输出挂起片段中剩余的所有行。
    pub fn finish<E>(&mut self, lines: &mut E)
    where
        E: Extend<String>,
    {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending == "\r" && !self.emitted {
            lines.extend(Some(pending));
            return;
        }
        lines.extend(split_lines(&pending).map(str::to_owned));
    }
}
