//! Token 估算
//!
//! 传输层未报告用量时，按字符数近似估算，供上下文窗口判断使用。

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let (ascii, non_ascii) = text.chars().fold((0usize, 0usize), |(a, n), c| {
            if c.is_ascii() {
                (a + 1, n)
            } else {
                (a, n + 1)
            }
        });
        let tokens = ascii / 4 + (non_ascii as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}
