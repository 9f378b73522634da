//! 事务日志 - 离线期间未能发往远端的变更
//!
//! 只追加；按 log_id 升序即追加顺序，回放必须严格 FIFO。
//! 每次写入都 flush，保证返回即持久。

use sled::{Batch, Tree};
use tracing::{debug, info};

use crate::error::{HeroSyncError, Result};
use crate::storage::entities::{Transaction, TransactionKind, TransactionOp};
use crate::storage::kv::KvStore;

const TREE_NAME: &str = "transactions";

#[derive(Debug, Clone)]
pub struct TransactionLog {
    kv: KvStore,
    tree: Tree,
}

impl TransactionLog {
    pub fn open(kv: &KvStore) -> Result<Self> {
        Ok(Self {
            kv: kv.clone(),
            tree: kv.open_tree(TREE_NAME)?,
        })
    }

    fn serialize_tx(tx: &Transaction) -> Result<Vec<u8>> {
        serde_json::to_vec(tx).map_err(|e| HeroSyncError::Serialization(e.to_string()))
    }

    fn deserialize_tx(data: &[u8]) -> Result<Transaction> {
        serde_json::from_slice(data).map_err(|e| HeroSyncError::Serialization(e.to_string()))
    }

    async fn persist(&self) -> Result<()> {
        self.tree
            .flush_async()
            .await
            .map_err(|e| HeroSyncError::KvStore(format!("事务日志落盘失败: {}", e)))?;
        Ok(())
    }

    /// 追加一条待回放变更，返回 log_id
    pub async fn append(&self, entity_id: i64, op: TransactionOp) -> Result<u64> {
        let log_id = self.kv.generate_id()?;
        let tx = Transaction::new(log_id, entity_id, op);
        self.tree.insert(log_id.to_be_bytes(), Self::serialize_tx(&tx)?)?;
        self.persist().await?;
        debug!("事务已追加: {}", tx);
        Ok(log_id)
    }

    pub async fn get(&self, log_id: u64) -> Result<Option<Transaction>> {
        match self.tree.get(log_id.to_be_bytes())? {
            Some(data) => Ok(Some(Self::deserialize_tx(&data)?)),
            None => Ok(None),
        }
    }

    /// 全部事务，最早的在前
    pub async fn list(&self) -> Result<Vec<Transaction>> {
        let mut txs = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (_, data) = item?;
            txs.push(Self::deserialize_tx(&data)?);
        }
        Ok(txs)
    }

    /// 游标读取：log_id 严格大于 `cursor` 的第一条
    ///
    /// 回放期间日志可能被改写（id 重映射），逐条读取保证看到最新内容。
    pub async fn next_after(&self, cursor: Option<u64>) -> Result<Option<Transaction>> {
        let entry = match cursor {
            None => self.tree.first()?,
            Some(log_id) => match log_id.checked_add(1) {
                Some(start) => self.tree.range(start.to_be_bytes()..).next().transpose()?,
                None => None,
            },
        };
        entry.map(|(_, data)| Self::deserialize_tx(&data)).transpose()
    }

    /// 是否还有以该 id 新增、尚未回放的条目（即该 id 仍是临时 id）
    pub async fn has_pending_add(&self, entity_id: i64) -> Result<bool> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|tx| tx.entity_id == entity_id && tx.kind() == TransactionKind::Add))
    }

    /// 删除一条；不存在时为 no-op
    pub async fn remove(&self, log_id: u64) -> Result<()> {
        if self.tree.remove(log_id.to_be_bytes())?.is_some() {
            self.persist().await?;
            debug!("事务已移除: #{}", log_id);
        }
        Ok(())
    }

    /// 记录一次失败的回放尝试，返回更新后的条目
    pub async fn record_attempt(&self, log_id: u64) -> Result<Option<Transaction>> {
        let Some(mut tx) = self.get(log_id).await? else {
            return Ok(None);
        };
        tx.attempts += 1;
        self.tree.insert(log_id.to_be_bytes(), Self::serialize_tx(&tx)?)?;
        self.persist().await?;
        Ok(Some(tx))
    }

    /// 把引用临时 id 的待回放条目改写为服务端 id
    ///
    /// 回放中途失败的条目留到下一轮时，仍能指向正确的远端实体。
    pub async fn remap_entity(&self, from_id: i64, to_id: i64) -> Result<usize> {
        let mut batch = Batch::default();
        let mut count = 0usize;
        for item in self.tree.iter() {
            let (key, data) = item?;
            let mut tx = Self::deserialize_tx(&data)?;
            if tx.entity_id == from_id {
                tx.entity_id = to_id;
                batch.insert(key, Self::serialize_tx(&tx)?);
                count += 1;
            }
        }
        if count > 0 {
            self.tree.apply_batch(batch)?;
            self.persist().await?;
            debug!("已改写 {} 条事务的实体 id: {} -> {}", count, from_id, to_id);
        }
        Ok(count)
    }

    /// 丢弃全部条目（仅用于全量重同步）
    pub async fn clear(&self) -> Result<()> {
        let count = self.tree.len();
        self.tree.clear()?;
        self.persist().await?;
        info!("事务日志已清空: 丢弃 {} 条", count);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
