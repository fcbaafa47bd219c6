//! 文本字幕清理：去掉 ASS/SSA 覆盖标签和简单 HTML 标签，统一换行

/// 从 ASS 事件行取出正文
///
/// 解码器输出的事件行有两种形式：
/// - `Dialogue: Layer,Start,End,Style,Name,MarginL,MarginR,MarginV,Effect,Text`
/// - `ReadOrder,Layer,Style,Name,MarginL,MarginR,MarginV,Effect,Text`
pub fn ass_dialogue_text(line: &str) -> &str {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.strip_prefix("Dialogue:") {
        Some(rest) => rest.splitn(10, ',').nth(9).unwrap_or(""),
        None => line.splitn(9, ',').nth(8).unwrap_or(line),
    }
}

/// 清理字幕文本
///
/// 去掉 `{\an8}` 这类覆盖标签和 `<i>`、`</font>` 这类标签，
/// `\N`/`\n` 转为换行，`\h` 转为空格；每行去掉首尾空白，空行丢弃。
pub fn clean_subtitle_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_override = false;

    while let Some(ch) = chars.next() {
        if in_override {
            if ch == '}' {
                in_override = false;
            }
            continue;
        }
        match ch {
            '{' => in_override = true,
            '<' => {
                let mut tag = String::from('<');
                let mut closed = false;
                while let Some(&next) = chars.peek() {
                    if next == '>' {
                        chars.next();
                        closed = true;
                        break;
                    }
                    if !(next.is_ascii_alphanumeric()
                        || next.is_whitespace()
                        || matches!(next, '/' | '=' | '"' | '#' | '\''))
                    {
                        break;
                    }
                    tag.push(next);
                    chars.next();
                }
                if !closed {
                    result.push_str(&tag);
                }
            }
            '\\' => match chars.peek() {
                Some('N') | Some('n') => {
                    chars.next();
                    result.push('\n');
                }
                Some('h') => {
                    chars.next();
                    result.push(' ');
                }
                _ => result.push('\\'),
            },
            '\r' => {}
            _ => result.push(ch),
        }
    }

    result
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
