//! 镜像表 - 远端英雄集合在本地的缓存
//!
//! 离线时它是读路径的唯一数据源。键为编码后的 id，遍历顺序即 id 升序。

use sled::{Batch, Tree};
use tracing::debug;

use crate::error::{HeroSyncError, Result};
use crate::storage::entities::{Hero, HeroPatch};
use crate::storage::kv::KvStore;

const TREE_NAME: &str = "heroes";

/// id 编码：翻转符号位后大端序，保证负数也按数值排序
fn encode_id(id: i64) -> [u8; 8] {
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

#[derive(Debug, Clone)]
pub struct EntityMirror {
    tree: Tree,
}

impl EntityMirror {
    pub fn open(kv: &KvStore) -> Result<Self> {
        Ok(Self {
            tree: kv.open_tree(TREE_NAME)?,
        })
    }

    fn decode(bytes: &[u8]) -> Result<Hero> {
        serde_json::from_slice(bytes)
            .map_err(|e| HeroSyncError::Serialization(format!("反序列化英雄失败: {}", e)))
    }

    fn encode(hero: &Hero) -> Result<Vec<u8>> {
        serde_json::to_vec(hero)
            .map_err(|e| HeroSyncError::Serialization(format!("序列化英雄失败: {}", e)))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Hero>> {
        match self.tree.get(encode_id(id))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 全量快照（id 升序）
    pub async fn list(&self) -> Result<Vec<Hero>> {
        let mut heroes = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (_, bytes) = item?;
            heroes.push(Self::decode(&bytes)?);
        }
        Ok(heroes)
    }

    /// 名称前缀搜索；空白前缀返回空集合而不是全集
    pub async fn search(&self, prefix: &str) -> Result<Vec<Hero>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|hero| hero.name.starts_with(prefix))
            .collect())
    }

    /// 按 id 插入或覆盖
    pub async fn put(&self, hero: &Hero) -> Result<()> {
        self.tree.insert(encode_id(hero.id), Self::encode(hero)?)?;
        Ok(())
    }

    /// 局部更新，id 不存在时返回 NotFound
    pub async fn update(&self, id: i64, patch: &HeroPatch) -> Result<Hero> {
        patch.validate()?;
        let mut hero = self
            .get(id)
            .await?
            .ok_or_else(|| HeroSyncError::NotFound(format!("hero {} not in mirror", id)))?;
        patch.apply(&mut hero);
        self.put(&hero).await?;
        Ok(hero)
    }

    /// 删除；不存在时为 no-op
    pub async fn remove(&self, id: i64) -> Result<Option<Hero>> {
        match self.tree.remove(encode_id(id))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 清空并重新填充；单个 batch 提交，读者看不到半清空状态
    pub async fn replace_all(&self, heroes: &[Hero]) -> Result<()> {
        let mut batch = Batch::default();
        for key in self.tree.iter().keys() {
            batch.remove(key?);
        }
        for hero in heroes {
            batch.insert(encode_id(hero.id).to_vec(), Self::encode(hero)?);
        }
        self.tree.apply_batch(batch)?;
        debug!("镜像表已整体替换: {} 条", heroes.len());
        Ok(())
    }

    /// 把临时 id 的条目换成服务端 id，保留本地最新字段
    ///
    /// 临时条目已被本地删除时不再插入，返回 None。
    pub async fn rekey(&self, provisional_id: i64, server_id: i64) -> Result<Option<Hero>> {
        let Some(mut hero) = self.get(provisional_id).await? else {
            return Ok(None);
        };
        hero.id = server_id;

        let mut batch = Batch::default();
        batch.remove(encode_id(provisional_id).to_vec());
        batch.insert(encode_id(server_id).to_vec(), Self::encode(&hero)?);
        self.tree.apply_batch(batch)?;
        Ok(Some(hero))
    }

    /// 当前最大 id（利用键序，取最后一个）
    pub async fn max_id(&self) -> Result<Option<i64>> {
        match self.tree.last()? {
            Some((_, bytes)) => Ok(Some(Self::decode(&bytes)?.id)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub async fn flush(&self) -> Result<()> {
        self.tree.flush_async().await?;
        Ok(())
    }
}
