//! 事务回放
//!
//! 按 log_id 升序逐条把事务日志发往远端，严格串行：
//! 上一条的镜像表/日志更新完成之前不会发出下一条的网关调用。
//!
//! 失败策略为尽力继续：单条失败只影响该条（及依赖它的同一临时 id 的后续条目），
//! 其余条目照常回放。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

use crate::connection_state::SyncStateManager;
use crate::error::Result;
use crate::events::{event_builders, EventManager};
use crate::gateway::RemoteGateway;
use crate::storage::entities::{Hero, NewHero, Transaction, TransactionKind, TransactionOp};
use crate::storage::StorageManager;
use crate::sync::failure::ReplayFailureReason;

/// 服务端分配的 id 恰好被另一个尚未回放的临时条目占用时，把该条目挪到新的临时 id
///
/// 返回挪动后的临时 id。
pub(crate) async fn vacate_provisional_id(storage: &StorageManager, server_id: i64) -> Result<Option<i64>> {
    let mirror = storage.mirror();
    let log = storage.log();
    if mirror.get(server_id).await?.is_none() || !log.has_pending_add(server_id).await? {
        return Ok(None);
    }
    let fresh_id = storage.next_provisional_id().await?;
    mirror.rekey(server_id, fresh_id).await?;
    log.remap_entity(server_id, fresh_id).await?;
    info!("临时 id 冲突: {} 改为 {}", server_id, fresh_id);
    Ok(Some(fresh_id))
}

/// 一次回放中临时 id 的解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdResolution {
    /// 发往远端时使用的 id
    Remote(i64),
    /// 对应的新增在本轮失败但可重试，依赖条目留到下一轮
    Deferred,
}

/// 临时 id → 服务端 id 映射（单轮回放内有效）
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    active: HashMap<i64, i64>,
    reconciled: BTreeMap<i64, i64>,
    deferred: HashSet<i64>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, entity_id: i64) -> IdResolution {
        if self.deferred.contains(&entity_id) {
            IdResolution::Deferred
        } else {
            IdResolution::Remote(self.active.get(&entity_id).copied().unwrap_or(entity_id))
        }
    }

    /// 记录映射；每个临时 id 只能映射一次
    pub fn install(&mut self, provisional_id: i64, server_id: i64) -> bool {
        if self.reconciled.contains_key(&provisional_id) {
            return false;
        }
        // 服务端 id 恰好等于之前某个临时 id 时，该值此后指代真实实体
        self.active.remove(&server_id);
        self.active.insert(provisional_id, server_id);
        self.reconciled.insert(provisional_id, server_id);
        true
    }

    pub fn defer(&mut self, provisional_id: i64) {
        self.deferred.insert(provisional_id);
    }

    pub fn reconciled(&self) -> &BTreeMap<i64, i64> {
        &self.reconciled
    }

    pub fn is_empty(&self) -> bool {
        self.reconciled.is_empty()
    }
}

/// 一轮回放的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// 成功回放并移出日志的条目数
    pub replayed: usize,
    /// 失败但保留在日志中的条目数
    pub failed: usize,
    /// 因依赖的新增尚未成功而推迟的条目数
    pub deferred: usize,
    /// 永久不可应用而移出日志的条目数
    pub dropped: usize,
    /// 回放结束时日志中剩余的条目数
    pub remaining: usize,
    /// 是否因断网中止
    pub abandoned: bool,
    /// 本轮完成的临时 id → 服务端 id 映射
    pub reconciled: BTreeMap<i64, i64>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        !self.abandoned && self.failed == 0 && self.deferred == 0 && self.dropped == 0
    }

    /// 本轮跑完且日志已清空（被丢弃的条目也已移出）
    pub fn is_drained(&self) -> bool {
        !self.abandoned && self.remaining == 0
    }
}

/// 单条事务的处理结果
enum StepOutcome {
    Replayed { remote_id: i64 },
    Failed(ReplayFailureReason),
    Deferred,
}

/// 回放器，由协调器在进入 Syncing 后为每一轮创建
pub struct Replayer<'a> {
    storage: &'a StorageManager,
    gateway: &'a dyn RemoteGateway,
    state: &'a SyncStateManager,
    events: &'a EventManager,
}

impl<'a> Replayer<'a> {
    pub fn new(
        storage: &'a StorageManager,
        gateway: &'a dyn RemoteGateway,
        state: &'a SyncStateManager,
        events: &'a EventManager,
    ) -> Self {
        Self {
            storage,
            gateway,
            state,
            events,
        }
    }

    /// 回放整个日志（第 `epoch` 轮 Syncing）
    ///
    /// 状态离开该轮 Syncing（断网）时立即停止，正在处理的条目既不移除也不视为已应用。
    #[instrument(skip(self), fields(pending = self.storage.log().len()))]
    pub async fn run(&self, epoch: u64) -> Result<ReplayReport> {
        let log = self.storage.log();
        let mut id_map = IdMap::new();
        let mut report = ReplayReport::default();
        let mut cursor = None;

        if !self.state.is_syncing(epoch).await {
            report.abandoned = true;
        }

        while !report.abandoned {
            let Some(tx) = log.next_after(cursor).await? else {
                break;
            };
            cursor = Some(tx.log_id);

            if !self.state.is_syncing(epoch).await {
                report.abandoned = true;
                break;
            }

            let outcome = self.step(&tx, &id_map).await;

            if !self.state.is_syncing(epoch).await {
                info!("回放中止: 事务 {} 的结果不予采信", tx);
                report.abandoned = true;
                break;
            }

            match outcome {
                StepOutcome::Replayed { remote_id } => {
                    if let TransactionOp::Add { .. } = tx.op {
                        self.reconcile(tx.entity_id, remote_id, &mut id_map).await?;
                    }
                    log.remove(tx.log_id).await?;
                    report.replayed += 1;
                    self.state.record_replayed().await;
                    debug!("事务回放成功: {} -> 远端 id {}", tx, remote_id);
                    self.events
                        .emit(event_builders::transaction_replayed(
                            tx.log_id,
                            tx.kind(),
                            tx.entity_id,
                            remote_id,
                        ))
                        .await;
                }
                StepOutcome::Failed(reason) if reason.is_retryable() => {
                    if tx.kind() == TransactionKind::Add {
                        id_map.defer(tx.entity_id);
                    }
                    log.record_attempt(tx.log_id).await?;
                    report.failed += 1;
                    let error = reason.into_error(tx.log_id);
                    warn!("事务回放失败，保留待重试: {} ({})", tx, error);
                    self.state.record_failed(&error.to_string()).await;
                    self.events
                        .emit(event_builders::transaction_failed(
                            tx.log_id,
                            tx.kind(),
                            tx.entity_id,
                            error.to_string(),
                            true,
                        ))
                        .await;
                }
                StepOutcome::Failed(reason) => {
                    self.drop_entry(&tx, reason.message().to_string(), &mut report)
                        .await?;
                    if tx.kind() == TransactionKind::Add {
                        // 新增被远端拒绝：该临时 id 永远不会存在于远端，依赖它的条目一并丢弃
                        self.storage.mirror().remove(tx.entity_id).await?;
                        let reason = format!("hero {} was rejected by the server", tx.entity_id);
                        for dependent in log.list().await? {
                            if dependent.entity_id == tx.entity_id {
                                self.drop_entry(&dependent, reason.clone(), &mut report).await?;
                            }
                        }
                    }
                }
                StepOutcome::Deferred => {
                    debug!("事务推迟: {} (依赖的新增尚未成功)", tx);
                    report.deferred += 1;
                }
            }
        }

        report.remaining = log.len();
        report.reconciled = id_map.reconciled().clone();
        info!(
            "回放结束: 成功 {}, 失败 {}, 推迟 {}, 丢弃 {}, 剩余 {}, 中止 {}",
            report.replayed,
            report.failed,
            report.deferred,
            report.dropped,
            report.remaining,
            report.abandoned
        );
        Ok(report)
    }

    async fn step(&self, tx: &Transaction, id_map: &IdMap) -> StepOutcome {
        let remote_id = match id_map.resolve(tx.entity_id) {
            IdResolution::Remote(id) => id,
            IdResolution::Deferred => return StepOutcome::Deferred,
        };

        let result = match &tx.op {
            TransactionOp::Add { name } => self
                .gateway
                .add(&NewHero::new(name.clone()))
                .await
                .map(|created| created.id),
            TransactionOp::Update { name } => self
                .gateway
                .update(&Hero::new(remote_id, name.clone()))
                .await
                .map(|_| remote_id),
            TransactionOp::Delete { .. } => self.gateway.delete(remote_id).await.map(|_| remote_id),
        };

        match result {
            Ok(remote_id) => StepOutcome::Replayed { remote_id },
            Err(error) => StepOutcome::Failed(ReplayFailureReason::classify(tx.kind(), &error)),
        }
    }

    /// 新增回放成功后：映射临时 id，镜像表换成服务端 id，日志中后续条目同步改写
    async fn reconcile(&self, provisional_id: i64, server_id: i64, id_map: &mut IdMap) -> Result<()> {
        if !id_map.install(provisional_id, server_id) {
            warn!("临时 id {} 已映射过，忽略重复映射到 {}", provisional_id, server_id);
            return Ok(());
        }
        if provisional_id == server_id {
            return Ok(());
        }

        vacate_provisional_id(self.storage, server_id).await?;
        if self
            .storage
            .mirror()
            .rekey(provisional_id, server_id)
            .await?
            .is_none()
        {
            debug!("临时条目 {} 已在本地删除，不再插入 {}", provisional_id, server_id);
        }
        self.storage.log().remap_entity(provisional_id, server_id).await?;
        Ok(())
    }

    async fn drop_entry(&self, tx: &Transaction, reason: String, report: &mut ReplayReport) -> Result<()> {
        self.storage.log().remove(tx.log_id).await?;
        report.dropped += 1;
        warn!("事务永久不可应用，已丢弃: {} ({})", tx, reason);
        self.state.record_dropped(&reason).await;
        self.events
            .emit(event_builders::transaction_failed(
                tx.log_id,
                tx.kind(),
                tx.entity_id,
                reason,
                false,
            ))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_state::SyncState;
    use crate::gateway::{FailOn, GatewayCall, InMemoryGateway, InjectedError};

    struct Fixture {
        storage: StorageManager,
        gateway: InMemoryGateway,
        state: SyncStateManager,
        events: EventManager,
    }

    impl Fixture {
        async fn new(mirror: Vec<Hero>, remote: Vec<Hero>) -> Self {
            let storage = StorageManager::temporary("test").unwrap();
            storage.mirror().replace_all(&mirror).await.unwrap();
            Self {
                storage,
                gateway: InMemoryGateway::with_heroes(remote),
                state: SyncStateManager::new(SyncState::Syncing),
                events: EventManager::new(100),
            }
        }

        async fn offline_add(&self, name: &str) -> i64 {
            let id = self.storage.next_provisional_id().await.unwrap();
            self.storage.mirror().put(&Hero::new(id, name)).await.unwrap();
            self.storage
                .log()
                .append(id, TransactionOp::Add { name: name.into() })
                .await
                .unwrap();
            id
        }

        async fn offline_update(&self, id: i64, name: &str) {
            self.storage.mirror().put(&Hero::new(id, name)).await.unwrap();
            self.storage
                .log()
                .append(id, TransactionOp::Update { name: name.into() })
                .await
                .unwrap();
        }

        async fn replay(&self) -> ReplayReport {
            let epoch = self.state.sync_epoch().await;
            Replayer::new(&self.storage, &self.gateway, &self.state, &self.events)
                .run(epoch)
                .await
                .unwrap()
        }
    }

    #[test]
    fn test_id_map_install_once() {
        let mut map = IdMap::new();
        assert!(map.install(3, 101));
        assert!(!map.install(3, 102));
        assert_eq!(map.resolve(3), IdResolution::Remote(101));
        assert_eq!(map.resolve(7), IdResolution::Remote(7));

        // 服务端 id 与之前的临时 id 相同：该值此后原样使用
        assert!(map.install(4, 3));
        assert_eq!(map.resolve(3), IdResolution::Remote(3));

        map.defer(5);
        assert_eq!(map.resolve(5), IdResolution::Deferred);
    }

    #[tokio::test]
    async fn test_add_then_update_uses_server_id() {
        let heroes = vec![Hero::new(1, "A"), Hero::new(2, "B")];
        let fx = Fixture::new(heroes.clone(), heroes).await;
        fx.gateway.set_next_id(101);

        let p = fx.offline_add("C").await;
        assert_eq!(p, 3);
        fx.offline_update(p, "C2").await;

        let report = fx.replay().await;
        assert_eq!(report.replayed, 2);
        assert!(report.is_clean());
        assert_eq!(report.reconciled.get(&3), Some(&101));

        assert_eq!(
            fx.gateway.write_journal(),
            vec![
                GatewayCall::Add { name: "C".into() },
                GatewayCall::Update { id: 101, name: "C2".into() },
            ]
        );
        assert_eq!(fx.storage.mirror().get(3).await.unwrap(), None);
        assert_eq!(fx.storage.mirror().get(101).await.unwrap(), Some(Hero::new(101, "C2")));
        assert!(fx.storage.log().is_empty());
    }

    #[tokio::test]
    async fn test_failed_add_defers_dependents_until_next_pass() {
        let heroes = vec![Hero::new(1, "A")];
        let fx = Fixture::new(heroes.clone(), heroes).await;
        fx.gateway.set_next_id(50);

        let p = fx.offline_add("C").await;
        fx.offline_update(p, "C2").await;
        fx.offline_update(1, "A2").await;
        fx.gateway.fail_once(FailOn::Add { name: "C".into() }, InjectedError::Unavailable);

        let report = fx.replay().await;
        assert_eq!((report.replayed, report.failed, report.deferred), (1, 1, 1));
        assert_eq!(report.remaining, 2);
        // 临时 id 从未发往远端
        assert_eq!(
            fx.gateway.write_journal(),
            vec![
                GatewayCall::Add { name: "C".into() },
                GatewayCall::Update { id: 1, name: "A2".into() },
            ]
        );
        let retained = fx.storage.log().list().await.unwrap();
        assert_eq!(retained[0].attempts, 1);

        fx.gateway.clear_journal();
        let report = fx.replay().await;
        assert_eq!(report.replayed, 2);
        assert_eq!(
            fx.gateway.write_journal(),
            vec![
                GatewayCall::Add { name: "C".into() },
                GatewayCall::Update { id: 50, name: "C2".into() },
            ]
        );
        assert_eq!(fx.storage.mirror().get(50).await.unwrap(), Some(Hero::new(50, "C2")));
    }

    #[tokio::test]
    async fn test_retained_update_carries_server_id_to_next_pass() {
        let fx = Fixture::new(vec![], vec![]).await;
        fx.gateway.set_next_id(101);

        let p = fx.offline_add("C").await;
        fx.offline_update(p, "C2").await;
        fx.gateway.fail_once(FailOn::Update { id: 101 }, InjectedError::Unavailable);

        let report = fx.replay().await;
        assert_eq!((report.replayed, report.failed), (1, 1));
        let retained = fx.storage.log().list().await.unwrap();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].entity_id, 101);

        let report = fx.replay().await;
        assert_eq!(report.replayed, 1);
        assert_eq!(fx.gateway.hero(101), Some(Hero::new(101, "C2")));
    }

    #[tokio::test]
    async fn test_permanently_inapplicable_entries_are_dropped() {
        let heroes = vec![Hero::new(1, "A"), Hero::new(2, "B")];
        let fx = Fixture::new(heroes.clone(), vec![Hero::new(1, "A")]).await;

        // 远端已不存在 2
        fx.offline_update(2, "B2").await;
        let p = fx.offline_add("Bad").await;
        fx.offline_update(p, "Bad2").await;
        fx.gateway.fail_once(FailOn::Add { name: "Bad".into() }, InjectedError::InvalidArgument);

        let report = fx.replay().await;
        assert_eq!(report.dropped, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(fx.storage.mirror().get(p).await.unwrap(), None);
        assert_eq!(fx.state.get_stats().await.transactions_dropped, 3);
    }

    #[tokio::test]
    async fn test_server_id_colliding_with_pending_provisional_id() {
        let fx = Fixture::new(vec![Hero::new(1, "A"), Hero::new(2, "B")], vec![]).await;
        // 服务端下一个 id 恰好是第二个临时 id
        fx.gateway.set_next_id(4);

        let first = fx.offline_add("C").await;
        let second = fx.offline_add("D").await;
        assert_eq!((first, second), (3, 4));

        let report = fx.replay().await;
        assert_eq!(report.replayed, 2);
        assert_eq!(report.reconciled.get(&3), Some(&4));

        let names: Vec<(i64, String)> = fx
            .storage
            .mirror()
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|h| (h.id, h.name))
            .collect();
        assert_eq!(
            names,
            vec![
                (1, "A".to_string()),
                (2, "B".to_string()),
                (4, "C".to_string()),
                (5, "D".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_abandon_when_state_leaves_syncing() {
        let fx = Fixture::new(vec![Hero::new(1, "A")], vec![Hero::new(1, "A")]).await;
        fx.offline_update(1, "A2").await;
        fx.offline_update(1, "A3").await;
        fx.state.set_state(SyncState::Offline).await;

        let report = fx.replay().await;
        assert!(report.abandoned);
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 2);
        assert!(fx.gateway.write_journal().is_empty());
    }
}
