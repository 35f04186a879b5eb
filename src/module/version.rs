//! 版本模型
//!
//! 提供版本号解析和版本约束表达式的解析与匹配。
//!
//! 约束表达式由一个或多个比较子句组成（空格或逗号分隔），所有子句同时
//! 成立才算匹配。比较符仅支持 `=`、`<`、`<=`、`>`、`>=`，纯粹按版本号
//! 的数值/字典序比较，不提供 `^`/`~` 之类的兼容区间简写。
//!
//! # 示例
//!
//! ```rust
//! use taro_core::module::version::{parse_version, VersionConstraint};
//!
//! let constraint = VersionConstraint::parse(">=1.0.0 <2.0.0").unwrap();
//! assert!(constraint.matches(&parse_version("1.2.3").unwrap()));
//! assert!(!constraint.matches(&parse_version("2.0.0").unwrap()));
//! ```

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{CoreError, Result};

/// 解析版本号
///
/// 在 semver 的基础上放宽要求：缺失的字段以 0 补齐（`"1"` → 1.0.0，
/// `"1.2"` → 1.2.0）。预发布标签与构建元数据按 semver 规则解析。
///
/// # Errors
///
/// 格式无效时返回 [`CoreError::VersionParse`]。
pub fn parse_version(text: &str) -> Result<Version> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CoreError::VersionParse {
            text: text.to_string(),
            reason: "版本号不能为空".to_string(),
        });
    }

    // 先按完整 semver 解析，失败时尝试补齐缺失字段
    if let Ok(version) = Version::parse(text) {
        return Ok(version);
    }

    let padded = pad_version(text);
    Version::parse(&padded).map_err(|e| CoreError::VersionParse {
        text: text.to_string(),
        reason: e.to_string(),
    })
}

/// 补齐缺失的版本字段（"1.2" → "1.2.0"）
///
/// 预发布/构建后缀（`-`、`+` 之后的部分）原样保留。
fn pad_version(text: &str) -> String {
    let (core, suffix) = match text.find(['-', '+']) {
        Some(pos) => text.split_at(pos),
        None => (text, ""),
    };

    let dots = core.matches('.').count();
    match dots {
        0 => format!("{}.0.0{}", core, suffix),
        1 => format!("{}.0{}", core, suffix),
        _ => text.to_string(),
    }
}

/// 比较符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    /// 等于
    Eq,
    /// 小于
    Lt,
    /// 小于等于
    Le,
    /// 大于
    Gt,
    /// 大于等于
    Ge,
}

impl ConstraintOp {
    /// 按比较符求值
    fn eval(self, candidate: &Version, bound: &Version) -> bool {
        match self {
            ConstraintOp::Eq => candidate == bound,
            ConstraintOp::Lt => candidate < bound,
            ConstraintOp::Le => candidate <= bound,
            ConstraintOp::Gt => candidate > bound,
            ConstraintOp::Ge => candidate >= bound,
        }
    }
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Lt => "<",
            ConstraintOp::Le => "<=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// 单个比较子句
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintClause {
    /// 比较符
    pub op: ConstraintOp,
    /// 比较基准版本
    pub version: Version,
}

impl fmt::Display for ConstraintClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}

/// 版本约束
///
/// 多个比较子句的合取。空缺的约束（`Option<VersionConstraint>` 为
/// `None`）匹配任何版本，由调用方处理。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    /// 全部子句（至少一个）
    clauses: Vec<ConstraintClause>,
}

impl VersionConstraint {
    /// 解析版本约束表达式
    ///
    /// 接受单个子句（`">=1.0.0"`）或由空格/逗号分隔的多个子句
    /// （`">=1.0.0 <2.0.0"`、`">=1.0, <2"`）。不带比较符的裸版本号
    /// 视为精确匹配（`"1.2.3"` 等价于 `"=1.2.3"`）。
    ///
    /// # Errors
    ///
    /// 格式无效时返回 [`CoreError::ConstraintParse`]，不会静默忽略。
    pub fn parse(text: &str) -> Result<Self> {
        let tokens: Vec<&str> = text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(CoreError::ConstraintParse {
                text: text.to_string(),
                reason: "约束表达式不能为空".to_string(),
            });
        }

        let mut clauses = Vec::with_capacity(tokens.len());
        for token in tokens {
            clauses.push(Self::parse_clause(text, token)?);
        }

        Ok(Self { clauses })
    }

    /// 解析单个子句
    fn parse_clause(full_text: &str, token: &str) -> Result<ConstraintClause> {
        let (op, rest) = if let Some(rest) = token.strip_prefix(">=") {
            (ConstraintOp::Ge, rest)
        } else if let Some(rest) = token.strip_prefix("<=") {
            (ConstraintOp::Le, rest)
        } else if let Some(rest) = token.strip_prefix('>') {
            (ConstraintOp::Gt, rest)
        } else if let Some(rest) = token.strip_prefix('<') {
            (ConstraintOp::Lt, rest)
        } else if let Some(rest) = token.strip_prefix('=') {
            (ConstraintOp::Eq, rest)
        } else {
            (ConstraintOp::Eq, token)
        };

        if rest.is_empty() {
            return Err(CoreError::ConstraintParse {
                text: full_text.to_string(),
                reason: format!("子句 '{}' 缺少版本号", token),
            });
        }

        // 版本部分不允许再出现比较符
        if rest.starts_with(['<', '>', '=']) {
            return Err(CoreError::ConstraintParse {
                text: full_text.to_string(),
                reason: format!("子句 '{}' 包含未知比较符", token),
            });
        }

        let version = parse_version(rest).map_err(|e| CoreError::ConstraintParse {
            text: full_text.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ConstraintClause { op, version })
    }

    /// 检查版本是否满足约束
    ///
    /// 所有子句同时成立才算匹配。
    pub fn matches(&self, version: &Version) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.op.eval(version, &clause.version))
    }

    /// 获取全部子句
    pub fn clauses(&self) -> &[ConstraintClause] {
        &self.clauses
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for clause in &self.clauses {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", clause)?;
            first = false;
        }
        Ok(())
    }
}

/// 空缺约束匹配任何版本
///
/// 统一处理 `Option<VersionConstraint>` 的匹配语义。
pub fn constraint_matches(constraint: Option<&VersionConstraint>, version: &Version) -> bool {
    match constraint {
        Some(c) => c.matches(version),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_full() {
        let v = parse_version("1.2.3").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_version_padded() {
        assert_eq!(parse_version("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
    }

    #[test]
    fn test_parse_version_prerelease() {
        let v = parse_version("1.2.3-beta.1").unwrap();
        assert_eq!(v.pre.as_str(), "beta.1");

        // 补齐也保留预发布后缀
        let v = parse_version("1.2-beta.1").unwrap();
        assert_eq!(v.minor, 2);
        assert_eq!(v.pre.as_str(), "beta.1");
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(parse_version("").is_err());
        assert!(parse_version("abc").is_err());
        assert!(parse_version("1.2.3.4").is_err());
    }

    #[test]
    fn test_constraint_single_clause() {
        let c = VersionConstraint::parse(">=1.0.0").unwrap();
        assert!(c.matches(&Version::new(1, 0, 0)));
        assert!(c.matches(&Version::new(2, 5, 0)));
        assert!(!c.matches(&Version::new(0, 9, 9)));
    }

    #[test]
    fn test_constraint_range() {
        let c = VersionConstraint::parse(">=1.0.0 <2.0.0").unwrap();
        assert!(c.matches(&parse_version("1.2.3").unwrap()));
        assert!(c.matches(&Version::new(1, 0, 0)));
        assert!(!c.matches(&Version::new(2, 0, 0)));
        assert!(!c.matches(&Version::new(0, 9, 0)));
    }

    #[test]
    fn test_constraint_comma_separated() {
        let c = VersionConstraint::parse(">=1.0, <2").unwrap();
        assert!(c.matches(&Version::new(1, 5, 0)));
        assert!(!c.matches(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_constraint_bare_version_is_exact() {
        let c = VersionConstraint::parse("1.2.3").unwrap();
        assert!(c.matches(&Version::new(1, 2, 3)));
        // 裸版本不是 ^ 语义
        assert!(!c.matches(&Version::new(1, 2, 4)));
    }

    #[test]
    fn test_constraint_all_operators() {
        assert!(VersionConstraint::parse("=1.0.0")
            .unwrap()
            .matches(&Version::new(1, 0, 0)));
        assert!(VersionConstraint::parse("<2.0.0")
            .unwrap()
            .matches(&Version::new(1, 9, 9)));
        assert!(VersionConstraint::parse("<=2.0.0")
            .unwrap()
            .matches(&Version::new(2, 0, 0)));
        assert!(VersionConstraint::parse(">1.0.0")
            .unwrap()
            .matches(&Version::new(1, 0, 1)));
    }

    #[test]
    fn test_constraint_parse_errors() {
        assert!(VersionConstraint::parse("").is_err());
        assert!(VersionConstraint::parse("   ").is_err());
        assert!(VersionConstraint::parse(">=").is_err());
        assert!(VersionConstraint::parse(">>1.0.0").is_err());
        assert!(VersionConstraint::parse(">=x.y.z").is_err());
    }

    #[test]
    fn test_constraint_matches_none() {
        // 空缺约束匹配任何版本
        assert!(constraint_matches(None, &Version::new(0, 0, 1)));

        let c = VersionConstraint::parse(">=1.0.0").unwrap();
        assert!(!constraint_matches(Some(&c), &Version::new(0, 0, 1)));
    }

    #[test]
    fn test_constraint_display() {
        let c = VersionConstraint::parse(">=1.0.0 <2.0.0").unwrap();
        assert_eq!(c.to_string(), ">=1.0.0 <2.0.0");
    }

    #[test]
    fn test_constraint_serde_roundtrip() {
        let c = VersionConstraint::parse(">=1.0.0 <2.0.0").unwrap();
        let json = serde_json::to_string(&c).unwrap();
        let parsed: VersionConstraint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, c);
    }
}
