//! 存储模块 - 离线优先的本地持久化层
//!
//! - StorageManager: 统一的存储管理器，由调用方显式创建后交给同步协调器
//! - EntityMirror: 远端集合的本地镜像
//! - TransactionLog: 待回放的变更队列
//! - KvStore: 底层 sled 数据库与元数据

use std::path::Path;
use tracing::info;

use crate::error::Result;

pub mod entities;
pub mod kv;
pub mod mirror;
pub mod transaction_log;

// 重新导出核心类型
pub use entities::*;
pub use kv::KvStore;
pub use mirror::EntityMirror;
pub use transaction_log::TransactionLog;

/// 存储管理器
///
/// 镜像表与事务日志只归同步协调器所有，外部组件不应直接改写。
#[derive(Debug, Clone)]
pub struct StorageManager {
    kv: KvStore,
    mirror: EntityMirror,
    log: TransactionLog,
}

impl StorageManager {
    /// 在数据目录下打开持久化存储
    pub async fn new(data_dir: &Path, namespace: &str) -> Result<Self> {
        let kv = KvStore::new(data_dir, namespace).await?;
        let storage = Self::from_kv(kv)?;
        info!(
            "存储管理器初始化完成: 镜像 {} 条, 待回放 {} 条",
            storage.mirror.len(),
            storage.log.len()
        );
        Ok(storage)
    }

    /// 临时存储（测试、演示）
    pub fn temporary(namespace: &str) -> Result<Self> {
        Self::from_kv(KvStore::temporary(namespace)?)
    }

    fn from_kv(kv: KvStore) -> Result<Self> {
        let mirror = EntityMirror::open(&kv)?;
        let log = TransactionLog::open(&kv)?;
        Ok(Self { kv, mirror, log })
    }

    pub fn mirror(&self) -> &EntityMirror {
        &self.mirror
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// 分配临时 id：严格大于镜像表中所有 id，且永不复用
    pub async fn next_provisional_id(&self) -> Result<i64> {
        let floor = self.mirror.max_id().await?.unwrap_or(0);
        self.kv
            .next_sequence(kv::keys::PROVISIONAL_ID_HIGH_WATER, floor)
            .await
    }

    pub async fn flush(&self) -> Result<()> {
        self.kv.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provisional_id_exceeds_mirror_and_is_not_reused() {
        let storage = StorageManager::temporary("test").unwrap();
        storage.mirror().put(&Hero::new(1, "A")).await.unwrap();
        storage.mirror().put(&Hero::new(2, "B")).await.unwrap();

        let first = storage.next_provisional_id().await.unwrap();
        assert_eq!(first, 3);
        storage.mirror().put(&Hero::new(first, "C")).await.unwrap();
        storage.mirror().remove(first).await.unwrap();

        // 删除后最大 id 回到 2，但临时 id 不会回退
        let second = storage.next_provisional_id().await.unwrap();
        assert_eq!(second, 4);
    }

    #[tokio::test]
    async fn test_provisional_id_on_empty_mirror() {
        let storage = StorageManager::temporary("test").unwrap();
        assert_eq!(storage.next_provisional_id().await.unwrap(), 1);
    }
}
