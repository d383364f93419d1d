//! 价目表解析器
//!
//! 将支付服务商的价格标识符映射为结构化的购买描述。
//! 表在进程启动时从配置一次性构建并做全量校验，之后只读——
//! 以显式注入的不可变结构取代模块级可变缓存。

use std::collections::HashMap;

use tracing::info;

use credit_shared::config::CatalogEntryConfig;
use credit_shared::error::CreditError;

use crate::models::CatalogItem;

/// 价目表
///
/// 纯查找结构，无 I/O、无内部可变状态。查不到只意味着
/// 配置中没有该价格——由调用方决定如何处置（终态确认，不重试）。
#[derive(Debug)]
pub struct Catalog {
    items: HashMap<String, CatalogItem>,
}

impl Catalog {
    /// 从配置条目构建价目表
    ///
    /// 任一条目非法（金额非正、互斥字段同时设置、标识符重复等）即整体失败，
    /// 调用方应据此拒绝启动。
    pub fn from_config(entries: &[CatalogEntryConfig]) -> Result<Self, CreditError> {
        let mut items = HashMap::with_capacity(entries.len());

        for entry in entries {
            let item = CatalogItem::from_config(entry)?;
            if items.insert(item.identifier.clone(), item).is_some() {
                return Err(CreditError::InvalidCatalogItem {
                    identifier: entry.identifier.clone(),
                    reason: "identifier 重复".to_string(),
                });
            }
        }

        info!(item_count = items.len(), "价目表加载完成");

        Ok(Self { items })
    }

    /// 按价格标识符查找
    pub fn resolve(&self, identifier: &str) -> Option<&CatalogItem> {
        self.items.get(identifier)
    }

    /// 已注册的条目数量
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
