//! 数据实体定义 - 对应镜像表与事务日志的存储结构
//!
//! 这里定义了本地存储与远端接口共用的 Rust 结构体，用于：
//! - 类型安全的数据传输
//! - 事务类型用标签联合表达（Add / Update / Delete 各自只携带所需字段）
//! - 序列化/反序列化支持

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HeroSyncError, Result};

/// 英雄实体 - 对应镜像表中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hero {
    pub id: i64,
    pub name: String,
}

impl Hero {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

impl fmt::Display for Hero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.name)
    }
}

/// 尚未分配 id 的英雄（新增请求体）
///
/// 序列化为 `{"id": null, "name": ...}`，与远端 POST 接口约定一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHero {
    #[serde(default, skip_deserializing)]
    id: Option<i64>,
    pub name: String,
}

impl NewHero {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into() }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }

    /// 以给定 id 落地为完整实体
    pub fn with_id(&self, id: i64) -> Hero {
        Hero::new(id, self.name.clone())
    }
}

/// 英雄局部更新
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroPatch {
    pub name: Option<String>,
}

impl HeroPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()) }
    }

    /// 空补丁或空白名称视为非法参数
    pub fn validate(&self) -> Result<()> {
        match &self.name {
            Some(name) => validate_name(name),
            None => Err(HeroSyncError::InvalidArgument(
                "patch contains no fields".to_string(),
            )),
        }
    }

    pub fn apply(&self, hero: &mut Hero) {
        if let Some(name) = &self.name {
            hero.name = name.clone();
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(HeroSyncError::InvalidArgument(
            "hero name must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// 事务类型（不带负载），用于日志与统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Add => write!(f, "add"),
            TransactionKind::Update => write!(f, "update"),
            TransactionKind::Delete => write!(f, "delete"),
        }
    }
}

/// 待回放的变更
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionOp {
    Add { name: String },
    Update { name: String },
    /// 删除只需要 id；name 仅用于日志
    Delete { name: String },
}

impl TransactionOp {
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionOp::Add { .. } => TransactionKind::Add,
            TransactionOp::Update { .. } => TransactionKind::Update,
            TransactionOp::Delete { .. } => TransactionKind::Delete,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TransactionOp::Add { name }
            | TransactionOp::Update { name }
            | TransactionOp::Delete { name } => name,
        }
    }
}

/// 事务日志条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// 日志 id（单调递增，由存储层分配）
    pub log_id: u64,
    /// 目标实体 id，可能是临时 id
    pub entity_id: i64,
    pub op: TransactionOp,
    /// 已尝试回放次数
    #[serde(default)]
    pub attempts: u32,
    /// 追加时间（UTC 毫秒）
    pub created_at: i64,
}

impl Transaction {
    pub fn new(log_id: u64, entity_id: i64, op: TransactionOp) -> Self {
        Self {
            log_id,
            entity_id,
            op,
            attempts: 0,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        self.op.kind()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}({}, \"{}\")",
            self.log_id,
            self.op.kind(),
            self.entity_id,
            self.op.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_hero_serializes_null_id() {
        let json = serde_json::to_value(NewHero::new("Magneta")).unwrap();
        assert_eq!(json, serde_json::json!({"id": null, "name": "Magneta"}));
    }

    #[test]
    fn test_patch_validation() {
        assert!(HeroPatch::default().validate().is_err());
        assert!(HeroPatch::name("   ").validate().is_err());
        assert!(HeroPatch::name("Tornado").validate().is_ok());

        let mut hero = Hero::new(1, "Bombasto");
        HeroPatch::name("Tornado").apply(&mut hero);
        assert_eq!(hero, Hero::new(1, "Tornado"));
    }

    #[test]
    fn test_transaction_op_is_tagged() {
        let tx = Transaction::new(3, 12, TransactionOp::Update { name: "Narco".into() });
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["op"]["type"], "update");
        assert_eq!(json["op"]["name"], "Narco");
        assert_eq!(tx.kind(), TransactionKind::Update);
        assert_eq!(tx.to_string(), "#3 update(12, \"Narco\")");

        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }
}
