//! KV 存储模块 - 基于 sled 的本地持久化
//!
//! 本模块提供：
//! - 按命名空间隔离的 Tree（镜像表、事务日志各占一棵）
//! - 元数据 Tree 上的单调序列（临时 id 高水位）

use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{HeroSyncError, Result};

/// KV 存储组件
///
/// `sled::Db` 内部已是引用计数句柄，clone 开销很小。
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Db,
    namespace: String,
    /// 元数据 Tree（序列高水位）
    meta: Tree,
}

impl KvStore {
    /// 在 `base_path/kv` 下打开（或创建）数据库
    pub async fn new(base_path: &Path, namespace: &str) -> Result<Self> {
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| HeroSyncError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 旧实例可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        debug!("sled 被占用，{}ms 后重试（第 {} 次）", delay_ms, attempt + 1);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            HeroSyncError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        let store = Self::from_db(db, namespace)?;
        info!("KV 存储已打开: {} (namespace={})", kv_path.display(), namespace);
        Ok(store)
    }

    /// 临时数据库（内存 + 关闭后自动删除），用于测试和无持久化场景
    pub fn temporary(namespace: &str) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| HeroSyncError::KvStore(format!("打开临时 sled 数据库失败: {}", e)))?;
        Self::from_db(db, namespace)
    }

    fn from_db(db: Db, namespace: &str) -> Result<Self> {
        let meta = db
            .open_tree(format!("{}_meta", namespace))
            .map_err(|e| HeroSyncError::KvStore(format!("打开元数据 Tree 失败: {}", e)))?;
        Ok(Self {
            db,
            namespace: namespace.to_string(),
            meta,
        })
    }

    /// 打开命名空间下的 Tree：`{namespace}_{name}`
    pub fn open_tree(&self, name: &str) -> Result<Tree> {
        let tree_name = format!("{}_{}", self.namespace, name);
        self.db
            .open_tree(&tree_name)
            .map_err(|e| HeroSyncError::KvStore(format!("打开 Tree {} 失败: {}", tree_name, e)))
    }

    /// 单调递增 id（跨重启不回退）
    pub fn generate_id(&self) -> Result<u64> {
        self.db
            .generate_id()
            .map_err(|e| HeroSyncError::KvStore(format!("生成 id 失败: {}", e)))
    }

    /// 单调序列：返回 `max(当前值, floor) + 1` 并写回
    ///
    /// 用于临时 id：即使对应实体已删除，序列也不会回退。
    pub async fn next_sequence(&self, key: &str, floor: i64) -> Result<i64> {
        self.update_counter(key, |current| current.max(floor) + 1)
    }

    fn update_counter<F>(&self, key: &str, f: F) -> Result<i64>
    where
        F: Fn(i64) -> i64,
    {
        let mut parse_error = None;
        let updated = self
            .meta
            .update_and_fetch(key, |old| {
                let current = match old.map(parse_counter) {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => {
                        parse_error = Some(e);
                        0
                    }
                    None => 0,
                };
                Some(f(current).to_string().into_bytes())
            })
            .map_err(|e| HeroSyncError::KvStore(format!("原子更新计数器失败: {}", e)))?;

        if let Some(e) = parse_error {
            return Err(e);
        }
        match updated {
            Some(bytes) => parse_counter(&bytes),
            None => Err(HeroSyncError::KvStore(format!("计数器 {} 写入后为空", key))),
        }
    }

    /// 落盘
    pub async fn flush(&self) -> Result<usize> {
        self.db
            .flush_async()
            .await
            .map_err(|e| HeroSyncError::KvStore(format!("flush 失败: {}", e)))
    }
}

fn parse_counter(bytes: &[u8]) -> Result<i64> {
    let value_str = std::str::from_utf8(bytes)
        .map_err(|e| HeroSyncError::KvStore(format!("计数器值格式错误: {}", e)))?;
    value_str
        .parse::<i64>()
        .map_err(|e| HeroSyncError::KvStore(format!("计数器值解析失败: {}", e)))
}

/// 常用的元数据键
pub mod keys {
    /// 已发放过的最大临时 id
    pub const PROVISIONAL_ID_HIGH_WATER: &str = "provisional_id_high_water";
}
