//! 纯函数式的行切分器。
//!
//! 按 `\r\n`、`\n`、`\r` 三类终止符切分文本：每个扫描位置先尝试 `\r\n`，
//! 因而 `\r\n` 总是作为一个整体被消费。结果是惰性序列，调用方只取前 N-1 段时
//! 不会为后续片段构造子串；无论输入为何（包括空串）至少产出一段。

use std::iter::FusedIterator;

/// 对 `text` 惰性切分，返回借用原文的行片段迭代器。
///
/// ```
/// use spark_line_stream::split_lines;
///
/// let lines: Vec<&str> = split_lines("a\nb\r\nc\rd").collect();
/// assert_eq!(lines, ["a", "b", "c", "d"]);
/// assert_eq!(split_lines("").collect::<Vec<_>>(), [""]);
/// ```
pub fn split_lines(text: &str) -> SplitLines<'_> {
    SplitLines { rest: Some(text) }
}

/// [`split_lines`] 返回的迭代器。
#[derive(Clone, Debug)]
pub struct SplitLines<'a> {
    rest: Option<&'a str>,
}

impl<'a> SplitLines<'a> {
    /// 尚未扫描的剩余文本；迭代结束后为 `None`。
    pub fn remainder(&self) -> Option<&'a str> {
        self.rest
    }
}

impl<'a> Iterator for SplitLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        match rest.find(['\r', '\n']) {
            Some(index) => {
                let terminator_len = if rest[index..].starts_with("\r\n") {
                    2
                } else {
                    1
                };
                self.rest = Some(&rest[index + terminator_len..]);
                Some(&rest[..index])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.rest {
            Some(rest) => (1, Some(rest.len() + 1)),
            None => (0, Some(0)),
        }
    }
}

impl FusedIterator for SplitLines<'_> {}
