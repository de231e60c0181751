//! 文本辅助函数

/// 按字符（而非字节）截断文本，超出部分以 `…` 结尾
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let mut chars = text.char_indices();
    match chars.nth(max_chars) {
        None => text.to_string(),
        Some(_) => {
            // 保留 max_chars - 1 个字符，为省略号腾出位置
            let cut = text
                .char_indices()
                .nth(max_chars - 1)
                .map(|(idx, _)| idx)
                .unwrap_or(text.len());
            format!("{}…", &text[..cut])
        }
    }
}

/// 字符串是否为空或仅包含空白
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hell…");
        assert_eq!(truncate_chars("你好世界欢迎", 3), "你好…");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(""));
        assert!(is_blank("  \n\t"));
        assert!(!is_blank(" hi "));
    }
}
