//! 回忆检索分词
//!
//! 查询词：小写、去标点、去重、长度 >= 2（按字符计）。
//! 包含 CJK 字符时先用 jieba 搜索引擎模式切词，否则按空白切分。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 最短检索词长度（字符）
const MIN_TERM_CHARS: usize = 2;

/// 全局 Jieba 实例（延迟初始化，加载词典较慢）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 将查询切分为检索词
pub fn query_terms(query: &str) -> Vec<String> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let words: Vec<String> = if contains_cjk(query) {
        get_jieba()
            .cut_for_search(query, true)
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        query.split_whitespace().map(str::to_string).collect()
    };

    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for word in &words {
        for piece in word.split(|c: char| !c.is_alphanumeric()) {
            let term = piece.to_lowercase();
            if term.chars().count() >= MIN_TERM_CHARS && seen.insert(term.clone()) {
                terms.push(term);
            }
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_are_normalized() {
        let terms = query_terms("Alpha, alpha TOKEN! a x-ray");
        assert_eq!(terms, vec!["alpha", "token", "ray"]);
    }

    #[test]
    fn test_empty_query() {
        assert!(query_terms("   ").is_empty());
        assert!(query_terms("a b c ?").is_empty());
    }

    #[test]
    fn test_chinese_terms() {
        let terms = query_terms("我喜欢编程和人工智能");
        assert!(terms.iter().any(|t| t.contains("编程") || t.contains("人工") || t.contains("智能")));
        assert!(terms.iter().all(|t| t.chars().count() >= 2));
    }

    #[test]
    fn test_contains_cjk() {
        assert!(contains_cjk("Hello 世界"));
        assert!(!contains_cjk("Hello World"));
    }
}
