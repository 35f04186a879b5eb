//! ID 生成与校验
//!
//! 本模块提供两类 ID 工具：
//!
//! - 工作单元 / 事件 ID 生成（10 位 62 进制短 ID 与 UUID）
//! - 模块 / 特性 ID 格式校验（注册表入口统一调用）

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 短 ID 长度
const SHORT_ID_LENGTH: usize = 10;

/// 模块 / 特性 ID 最大长度
const MAX_DESCRIPTOR_ID_LENGTH: usize = 64;

/// 生成 10 位 62 进制短 ID
///
/// 使用时间戳 + 随机数组合，用于标识一次工作单元。
///
/// # Example
///
/// ```
/// use taro_core::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();

    // 获取当前时间戳（毫秒）
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    // 生成随机数
    let random: u64 = rng.gen();

    // 组合时间戳和随机数
    let mut value = timestamp ^ random;

    // 转换为 62 进制
    let mut result = Vec::with_capacity(SHORT_ID_LENGTH);
    for _ in 0..SHORT_ID_LENGTH {
        let index = (value % 62) as usize;
        result.push(BASE62_CHARS[index]);
        value = value / 62 + (random >> 32);
    }

    // 反转得到最终 ID
    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}

/// 生成 UUID v4 字符串
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 校验模块 / 特性 ID 格式是否有效
///
/// 规则：以 ASCII 字母开头，仅包含小写字母、数字、`_`、`.`、`-`，
/// 长度不超过 64 个字符。特性 ID 常见形式为 `模块 ID.特性名`。
///
/// # Example
///
/// ```
/// use taro_core::utils::id::is_valid_descriptor_id;
///
/// assert!(is_valid_descriptor_id("blog"));
/// assert!(is_valid_descriptor_id("blog.archive"));
/// assert!(!is_valid_descriptor_id(""));
/// assert!(!is_valid_descriptor_id("1blog"));
/// ```
pub fn is_valid_descriptor_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_DESCRIPTOR_ID_LENGTH {
        return false;
    }

    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_length() {
        let id = generate_id();
        assert_eq!(id.len(), SHORT_ID_LENGTH);
        assert!(id.bytes().all(|b| BASE62_CHARS.contains(&b)));
    }

    #[test]
    fn test_generate_id_uniqueness() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            seen.insert(generate_id());
        }
        // 允许极小概率的碰撞，但 1000 次内不应出现
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_generate_uuid_format() {
        let id = generate_uuid();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn test_valid_descriptor_ids() {
        assert!(is_valid_descriptor_id("blog"));
        assert!(is_valid_descriptor_id("blog.archive"));
        assert!(is_valid_descriptor_id("shapes-ui"));
        assert!(is_valid_descriptor_id("a1_b2"));
    }

    #[test]
    fn test_invalid_descriptor_ids() {
        assert!(!is_valid_descriptor_id(""));
        assert!(!is_valid_descriptor_id("1blog"));
        assert!(!is_valid_descriptor_id("Blog"));
        assert!(!is_valid_descriptor_id("中文"));
        assert!(!is_valid_descriptor_id(&"a".repeat(65)));
    }
}
