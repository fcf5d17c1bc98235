//! 日志脱敏
//! 地址只显示首尾，私钥/签名等长 hex 串与疑似助记词一律打码

use once_cell::sync::Lazy;
use regex::Regex;

/// 64 位及以上的 hex 串（私钥、签名、种子）
static LONG_HEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:0x)?[0-9a-fA-F]{64,}").expect("static regex"));

/// 连续 12 个及以上的小写单词（疑似助记词）
static WORD_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[a-z]{3,8}\s+){11,}[a-z]{3,8}\b").expect("static regex")
});

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 {
        return "*".repeat(address.len());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 清洗自由文本（错误信息等）中的敏感片段
pub fn sanitize_message(message: &str) -> String {
    let step = LONG_HEX.replace_all(message, "[REDACTED_HEX]");
    WORD_RUN.replace_all(&step, "[REDACTED_WORDS]").into_owned()
}
