//! 实体名模糊匹配
//!
//! 对搜索词和每个候选的规范化展示名逐词打分，取分数严格最高者
//! （平分时先到先得，保证确定性）。打分规则经年累月由真实误匹配
//! 案例校准而来，调整前先跑全量测试。

use crate::resolve::hints::{canonicalize, EntityRecord};

/// 匹配时可容忍缺失的冠词与类别词
const IGNORABLE_TOKENS: [&str; 4] = ["the", "hotel", "house", "restaurant"];

/// Levenshtein 编辑距离（单位成本）
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitute.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// 去掉末尾的括号附注（" (Remastered 2011)" 之类）
fn strip_parenthetical(name: &str) -> &str {
    match name.find(" (") {
        Some(pos) => &name[..pos],
        None => name,
    }
}

fn score(search_tokens: &[&str], search_joined: &str, candidate: &EntityRecord, entity_type: &str) -> f64 {
    let candidate_name = canonicalize(strip_parenthetical(&candidate.name));
    let candidate_tokens: Vec<&str> = candidate_name.split_whitespace().collect();

    // 整串距离作轻微惩罚，偏好长度相近的候选
    let mut score = -0.1 * edit_distance(search_joined, &candidate_name) as f64;

    let mut seen: Vec<&str> = Vec::new();
    for &token in &candidate_tokens {
        if seen.contains(&token) {
            continue;
        }
        seen.push(token);

        let mut matched = false;
        for &search_token in search_tokens {
            if token == search_token
                || (search_token.chars().count() > 1 && edit_distance(token, search_token) <= 1)
            {
                score += 10.0;
                matched = true;
            } else if token.starts_with(search_token) {
                score += 0.5;
            }
        }
        if !matched && IGNORABLE_TOKENS.contains(&token) {
            score += 0.1 * (1 + token.chars().count()) as f64;
        }
        // meme 名里的 "x" 是占位变量，出现即是强信号
        if token == "x" && entity_type == "imgflip:meme_id" {
            score += 1.0;
        }
    }

    score
}

/// 在候选中为搜索词挑出最佳实体。
///
/// 候选不能为空：空列表说明上游查询逻辑有 bug，直接 panic。
pub fn best_match<'a>(
    search_term: &str,
    entity_type: &str,
    candidates: &'a [EntityRecord],
) -> &'a EntityRecord {
    assert!(!candidates.is_empty(), "no candidates to match against");

    let search = canonicalize(strip_parenthetical(search_term));
    let search_tokens: Vec<&str> = search.split_whitespace().collect();

    let mut best = &candidates[0];
    let mut best_score = score(&search_tokens, &search, best, entity_type);
    for candidate in &candidates[1..] {
        let candidate_score = score(&search_tokens, &search, candidate, entity_type);
        if candidate_score > best_score {
            best = candidate;
            best_score = candidate_score;
        }
    }
    best
}
