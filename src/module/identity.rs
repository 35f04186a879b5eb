//! 二进制身份与重定向解析
//!
//! [`BinaryIdentity`] 标识一个具体可加载代码单元（名称、版本、区域、
//! 强名令牌）。模块物化时，请求的身份经一条有序的重定向规则链解析为
//! 实际供给的身份；无规则匹配时请求保持未解析，在调用方表现为
//! REFLECTION_FAILED 一类的条件。
//!
//! 解析是幂等的：对已解析出的身份再次解析是空操作，返回同一身份。

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// 二进制身份
///
/// 相等性按全部已填充字段结构化比较；`version`/`locale`/`token`
/// 为可选字段，匹配时空缺一侧视为通配。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryIdentity {
    /// 名称
    pub name: String,

    /// 版本
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,

    /// 区域
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// 强名令牌
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl BinaryIdentity {
    /// 仅以名称创建身份
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            locale: None,
            token: None,
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// 设置区域
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// 设置强名令牌
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// 可选字段匹配：任一侧空缺即视为匹配
    fn optional_matches<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
        match (a, b) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        }
    }

    /// 判断本身份是否与请求兼容
    ///
    /// 名称必须相等；版本/区域/令牌按可选匹配语义比较。
    pub fn is_match(&self, requested: &BinaryIdentity) -> bool {
        self.name == requested.name
            && Self::optional_matches(&self.version, &requested.version)
            && Self::optional_matches(&self.locale, &requested.locale)
            && Self::optional_matches(&self.token, &requested.token)
    }
}

impl fmt::Display for BinaryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref version) = self.version {
            write!(f, ", version={}", version)?;
        }
        if let Some(ref locale) = self.locale {
            write!(f, ", locale={}", locale)?;
        }
        if let Some(ref token) = self.token {
            write!(f, ", token={}", token)?;
        }
        Ok(())
    }
}

/// 重定向规则
///
/// 每个已发现的可加载单元对应一条规则：规则声明"我能供给与该请求
/// 兼容的身份，且我实际供给的具体身份是 X"。规则由外部协作方实现。
pub trait RedirectRule: Send + Sync {
    /// 本规则实际供给的具体身份
    fn supplied(&self) -> &BinaryIdentity;

    /// 尝试重定向请求；不匹配时返回 None
    fn try_redirect(&self, requested: &BinaryIdentity) -> Option<BinaryIdentity>;
}

/// 表驱动的重定向规则
///
/// 最常见的规则形态：请求与供给身份兼容即重定向到供给身份。
#[derive(Debug, Clone)]
pub struct TableRedirectRule {
    supplied: BinaryIdentity,
}

impl TableRedirectRule {
    /// 以供给身份创建规则
    pub fn new(supplied: BinaryIdentity) -> Self {
        Self { supplied }
    }
}

impl RedirectRule for TableRedirectRule {
    fn supplied(&self) -> &BinaryIdentity {
        &self.supplied
    }

    fn try_redirect(&self, requested: &BinaryIdentity) -> Option<BinaryIdentity> {
        if self.supplied.is_match(requested) {
            Some(self.supplied.clone())
        } else {
            None
        }
    }
}

/// 身份解析器
///
/// 持有有序的重定向规则链，首条匹配的规则生效。
#[derive(Default)]
pub struct IdentityResolver {
    rules: Vec<Box<dyn RedirectRule>>,
}

impl IdentityResolver {
    /// 创建空解析器
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// 追加规则（追加顺序即匹配顺序）
    pub fn add_rule(&mut self, rule: Box<dyn RedirectRule>) {
        self.rules.push(rule);
    }

    /// 规则数量
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// 解析请求的身份
    ///
    /// 已解析出的身份再次解析返回其自身（幂等）；其余请求按规则链顺序
    /// 取首条匹配规则的供给身份；无匹配返回 None，由调用方表面化。
    pub fn resolve(&self, requested: &BinaryIdentity) -> Option<BinaryIdentity> {
        // 幂等：请求与某条规则的供给身份完全相等时原样返回
        if self
            .rules
            .iter()
            .any(|rule| rule.supplied() == requested)
        {
            trace!(identity = %requested, "身份已解析，原样返回");
            return Some(requested.clone());
        }

        for rule in &self.rules {
            if let Some(resolved) = rule.try_redirect(requested) {
                debug!(requested = %requested, resolved = %resolved, "身份重定向");
                return Some(resolved);
            }
        }

        debug!(requested = %requested, "身份未解析");
        None
    }
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("rules", &self.rules.len())
            .finish()
    }
}
