//! 同步协调器
//!
//! 唯一持有镜像表与事务日志的组件：
//! - Online：读写直达远端，读结果顺带刷新镜像表；读失败回退到镜像表
//! - Offline：读镜像表，写先落镜像表再追加事务日志
//!   （在线但日志中仍有未回放条目时，写入同样排队并立即触发回放）
//! - Syncing：离线恢复后回放事务日志，完成后回到 Online
//!
//! 一次只执行一个逻辑操作（读、写或一整轮回放），由 `op_lock` 保证；
//! 连通性事件不受其约束，断网会立即把状态切到 Offline。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection_state::{SyncState, SyncStateManager, SyncStats};
use crate::error::{HeroSyncError, Result};
use crate::events::{event_builders, EventManager};
use crate::gateway::RemoteGateway;
use crate::network::{ConnectivityEvent, ConnectivitySignal, NetworkStatus};
use crate::storage::entities::{Hero, HeroPatch, NewHero, Transaction, TransactionOp};
use crate::storage::StorageManager;
use crate::sync::replay::{vacate_provisional_id, ReplayReport, Replayer};

#[derive(Clone)]
pub struct SyncCoordinator {
    storage: StorageManager,
    gateway: Arc<dyn RemoteGateway>,
    signal: Arc<dyn ConnectivitySignal>,
    state: SyncStateManager,
    events: Arc<EventManager>,
    op_lock: Arc<Mutex<()>>,
    /// 回放防重入
    replay_running: Arc<AtomicBool>,
    /// 回放期间被合并的上线请求
    resync_requested: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    monitor_task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("storage", &self.storage)
            .field("signal", &self.signal)
            .field("replay_running", &self.replay_running.load(Ordering::SeqCst))
            .finish()
    }
}

impl SyncCoordinator {
    /// 创建协调器；调用 [`start`](Self::start) 之前视为离线
    pub fn new(
        storage: StorageManager,
        gateway: Arc<dyn RemoteGateway>,
        signal: Arc<dyn ConnectivitySignal>,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            storage,
            gateway,
            signal,
            state: SyncStateManager::new(SyncState::Offline),
            events,
            op_lock: Arc::new(Mutex::new(())),
            replay_running: Arc::new(AtomicBool::new(false)),
            resync_requested: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            monitor_task: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// 订阅连通性信号并按当前读数进入初始状态
    ///
    /// `sync_pending` 为 true 且当前在线时，立即回放上次遗留的事务。
    pub async fn start(&self, sync_pending: bool) -> Result<()> {
        if self.monitor_task.lock().is_some() {
            debug!("同步协调器已启动");
            return Ok(());
        }

        // 先订阅再读当前状态，避免漏掉两者之间的变化
        let receiver = self.signal.start_monitoring().await?;
        let status = self.signal.current_status().await;
        info!(
            "同步协调器启动: 网络 {:?}, 待回放 {} 条",
            status,
            self.storage.log().len()
        );

        if status.is_online() {
            if sync_pending && !self.storage.log().is_empty() {
                self.handle_connectivity(NetworkStatus::Online).await;
            } else {
                self.change_state(SyncState::Online).await;
            }
        }

        let this = self.clone();
        let handle = tokio::spawn(async move { this.monitor_loop(receiver).await });
        *self.monitor_task.lock() = Some(handle);
        Ok(())
    }

    async fn monitor_loop(self, mut receiver: broadcast::Receiver<ConnectivityEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                received = receiver.recv() => match received {
                    Ok(event) => self.handle_connectivity(event.status).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("连通性事件积压，跳过 {} 条，按当前读数处理", skipped);
                        let status = self.signal.current_status().await;
                        self.handle_connectivity(status).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("连通性信号已关闭");
                        break;
                    }
                },
            }
        }
        debug!("连通性监听任务退出");
    }

    /// 处理一次连通性读数
    pub async fn handle_connectivity(&self, status: NetworkStatus) {
        self.events
            .emit(event_builders::connectivity_changed(status))
            .await;

        match status {
            NetworkStatus::Offline => {
                let old = self.state.set_state(SyncState::Offline).await;
                if old != SyncState::Offline {
                    if old == SyncState::Syncing {
                        info!("回放进行中断网，本轮回放将中止");
                    }
                    self.events
                        .emit(event_builders::state_changed(old, SyncState::Offline))
                        .await;
                }
            }
            NetworkStatus::Online => {
                if self.state.transition(SyncState::Offline, SyncState::Syncing).await {
                    info!("网络恢复，开始回放事务日志: {} 条", self.storage.log().len());
                    self.events
                        .emit(event_builders::state_changed(SyncState::Offline, SyncState::Syncing))
                        .await;
                    self.spawn_replay();
                } else {
                    debug!("忽略上线读数: 当前 {}", self.state.state().await);
                }
            }
        }
    }

    async fn change_state(&self, state: SyncState) {
        let old = self.state.set_state(state).await;
        if old != state {
            self.events
                .emit(event_builders::state_changed(old, state))
                .await;
        }
    }

    fn try_acquire_replay(&self) -> bool {
        self.replay_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 释放回放标记；期间有被合并的请求且仍处于 Syncing 时重新占用并返回 true
    async fn release_replay(&self) -> bool {
        self.replay_running.store(false, Ordering::SeqCst);
        if !self.resync_requested.swap(false, Ordering::SeqCst) {
            return false;
        }
        if self.state.state().await != SyncState::Syncing {
            return false;
        }
        self.try_acquire_replay()
    }

    fn spawn_replay(&self) {
        self.resync_requested.store(true, Ordering::SeqCst);
        if !self.try_acquire_replay() {
            debug!("已有回放在进行，合并本次请求");
            return;
        }
        self.resync_requested.store(false, Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move { this.replay_task().await });
    }

    async fn replay_task(self) {
        loop {
            if let Err(e) = self.run_pass().await {
                error!("回放失败: {}", e);
            }
            if !self.release_replay().await {
                break;
            }
            debug!("执行被合并的回放请求");
        }
    }

    /// 执行一轮回放，期间独占 `op_lock`
    async fn run_pass(&self) -> Result<ReplayReport> {
        let _guard = self.op_lock.lock().await;
        let epoch = self.state.sync_epoch().await;
        let replayer = Replayer::new(&self.storage, self.gateway.as_ref(), &self.state, &self.events);

        match replayer.run(epoch).await {
            Ok(report) if report.abandoned => {
                self.state.record_pass_abandoned().await;
                warn!("回放已中止，{} 条留待下次恢复在线", report.remaining);
                self.events
                    .emit(event_builders::replay_abandoned(report.clone()))
                    .await;
                Ok(report)
            }
            Ok(report) => {
                self.finish_pass(epoch).await;
                self.state.record_pass_completed().await;
                if report.is_drained() {
                    self.events
                        .emit(event_builders::replay_completed(report.clone()))
                        .await;
                } else {
                    info!("本轮回放结束，{} 条仍保留在日志中", report.remaining);
                    self.events
                        .emit(event_builders::replay_incomplete(report.clone()))
                        .await;
                }
                Ok(report)
            }
            Err(e) => {
                self.state.record_failed(&e.to_string()).await;
                self.finish_pass(epoch).await;
                Err(e)
            }
        }
    }

    async fn finish_pass(&self, epoch: u64) {
        if self.state.finish_pass(epoch).await {
            self.events
                .emit(event_builders::state_changed(SyncState::Syncing, SyncState::Online))
                .await;
        }
    }

    /// 在线时手动触发一轮回放
    ///
    /// 离线或已有回放在进行时返回 `None`。
    pub async fn sync_now(&self) -> Result<Option<ReplayReport>> {
        if !self.try_acquire_replay() {
            debug!("已有回放在进行，忽略手动同步");
            return Ok(None);
        }

        let result = if self.state.transition(SyncState::Online, SyncState::Syncing).await {
            self.events
                .emit(event_builders::state_changed(SyncState::Online, SyncState::Syncing))
                .await;
            self.run_pass().await.map(Some)
        } else {
            Ok(None)
        };

        if self.release_replay().await {
            let this = self.clone();
            tokio::spawn(async move { this.replay_task().await });
        }
        result
    }

    async fn is_direct(&self) -> bool {
        self.state.state().await == SyncState::Online
    }

    /// 写入直达远端：在线且日志已清空，新写入不会越过排队中的事务
    async fn is_direct_write(&self) -> bool {
        self.is_direct().await && self.storage.log().is_empty()
    }

    /// 在线时排队的写入立即触发一轮回放
    async fn schedule_replay(&self) {
        if self.state.transition(SyncState::Online, SyncState::Syncing).await {
            self.events
                .emit(event_builders::state_changed(SyncState::Online, SyncState::Syncing))
                .await;
            self.spawn_replay();
        }
    }

    async fn report_fallback(&self, operation: &str, error: &HeroSyncError) {
        warn!("{} 远端失败，回退到镜像表: {}", operation, error);
        self.events
            .emit(event_builders::gateway_fallback(operation, error.to_string()))
            .await;
    }

    /// 远端读到的单个实体写入镜像表
    ///
    /// 该 id 若正被尚未回放的离线新增占用，先把本地条目挪到新的临时 id。
    async fn absorb_remote(&self, hero: &Hero) -> Result<()> {
        if !self.storage.log().is_empty() {
            vacate_provisional_id(&self.storage, hero.id).await?;
        }
        self.storage.mirror().put(hero).await
    }

    /// 用远端列表刷新镜像表
    ///
    /// 日志中仍有待回放条目时只合并不清空，保留尚未同步的本地状态。
    async fn refresh_mirror(&self, heroes: &[Hero]) -> Result<()> {
        if self.storage.log().is_empty() {
            self.storage.mirror().replace_all(heroes).await?;
        } else {
            for hero in heroes {
                self.absorb_remote(hero).await?;
            }
        }
        self.events
            .emit(event_builders::mirror_refreshed(heroes.len()))
            .await;
        Ok(())
    }

    pub async fn get_heroes(&self) -> Result<Vec<Hero>> {
        let _guard = self.op_lock.lock().await;
        if !self.is_direct().await {
            return self.storage.mirror().list().await;
        }

        match self.gateway.list().await {
            Ok(heroes) => {
                debug!("fetched heroes: {}", heroes.len());
                self.refresh_mirror(&heroes).await?;
                Ok(heroes)
            }
            Err(e) => {
                self.report_fallback("getHeroes", &e).await;
                self.storage.mirror().list().await
            }
        }
    }

    pub async fn get_hero(&self, id: i64) -> Result<Hero> {
        let _guard = self.op_lock.lock().await;
        if self.is_direct().await {
            match self.gateway.get(id).await {
                Ok(hero) => {
                    self.absorb_remote(&hero).await?;
                    return Ok(hero);
                }
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => self.report_fallback("getHero", &e).await,
            }
        }

        self.storage
            .mirror()
            .get(id)
            .await?
            .ok_or_else(|| HeroSyncError::NotFound(format!("hero {} not found", id)))
    }

    /// 空白检索词直接返回空集合，不访问远端或镜像表
    pub async fn search_heroes(&self, term: &str) -> Result<Vec<Hero>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.op_lock.lock().await;
        if !self.is_direct().await {
            return self.storage.mirror().search(term).await;
        }

        match self.gateway.search(term).await {
            Ok(heroes) => {
                for hero in &heroes {
                    self.absorb_remote(hero).await?;
                }
                debug!("found heroes matching \"{}\": {}", term, heroes.len());
                Ok(heroes)
            }
            Err(e) => {
                self.report_fallback("searchHeroes", &e).await;
                self.storage.mirror().search(term).await
            }
        }
    }

    /// 新增
    ///
    /// 先以临时 id 写入镜像表。离线（或日志中仍有排队事务）时追加 Add 事务并返回本地实体；
    /// 否则发往远端，成功后镜像表换成服务端 id，失败时临时条目保留、错误返回给调用方。
    pub async fn add_hero(&self, hero: NewHero) -> Result<Hero> {
        hero.validate()?;
        let _guard = self.op_lock.lock().await;

        let provisional_id = self.storage.next_provisional_id().await?;
        let local = hero.with_id(provisional_id);
        self.storage.mirror().put(&local).await?;

        if !self.is_direct_write().await {
            self.storage
                .log()
                .append(provisional_id, TransactionOp::Add { name: hero.name.clone() })
                .await?;
            info!("新增已排队: {}", local);
            self.schedule_replay().await;
            return Ok(local);
        }

        let created = self.gateway.add(&hero).await?;
        vacate_provisional_id(&self.storage, created.id).await?;
        self.storage.mirror().remove(provisional_id).await?;
        self.storage.mirror().put(&created).await?;
        debug!("added hero w/ id={}", created.id);
        Ok(created)
    }

    pub async fn update_hero(&self, hero: Hero) -> Result<Hero> {
        let patch = HeroPatch::name(hero.name.clone());
        patch.validate()?;
        let _guard = self.op_lock.lock().await;

        if !self.is_direct_write().await {
            let updated = self.storage.mirror().update(hero.id, &patch).await?;
            self.storage
                .log()
                .append(hero.id, TransactionOp::Update { name: updated.name.clone() })
                .await?;
            info!("更新已排队: {}", updated);
            self.schedule_replay().await;
            return Ok(updated);
        }

        self.storage.mirror().put(&hero).await?;
        self.gateway.update(&hero).await?;
        debug!("updated hero id={}", hero.id);
        Ok(hero)
    }

    pub async fn delete_hero(&self, id: i64) -> Result<()> {
        let _guard = self.op_lock.lock().await;

        if !self.is_direct_write().await {
            let Some(removed) = self.storage.mirror().remove(id).await? else {
                return Err(HeroSyncError::NotFound(format!("hero {} not in mirror", id)));
            };
            self.storage
                .log()
                .append(id, TransactionOp::Delete { name: removed.name.clone() })
                .await?;
            info!("删除已排队: {}", removed);
            self.schedule_replay().await;
            return Ok(());
        }

        self.storage.mirror().remove(id).await?;
        self.gateway.delete(id).await?;
        debug!("deleted hero id={}", id);
        Ok(())
    }

    /// 全量重同步：以远端为准重建镜像表并丢弃全部待回放事务
    pub async fn resynchronize(&self) -> Result<Vec<Hero>> {
        let _guard = self.op_lock.lock().await;
        if !self.is_direct().await {
            return Err(HeroSyncError::GatewayUnavailable(format!(
                "cannot resynchronize while {}",
                self.state.state().await
            )));
        }

        let heroes = self.gateway.list().await?;
        self.storage.mirror().replace_all(&heroes).await?;
        self.storage.log().clear().await?;
        info!("全量重同步完成: {} 条", heroes.len());
        self.events
            .emit(event_builders::mirror_refreshed(heroes.len()))
            .await;
        Ok(heroes)
    }

    /// 待回放事务（最早的在前）
    pub async fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        self.storage.log().list().await
    }

    pub async fn state(&self) -> SyncState {
        self.state.state().await
    }

    pub async fn stats(&self) -> SyncStats {
        self.state.get_stats().await
    }

    pub fn state_manager(&self) -> &SyncStateManager {
        &self.state
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// 停止监听连通性信号，等待进行中的操作结束并落盘
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.notify_one();
        let handle = self.monitor_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("连通性监听任务异常退出: {}", e);
            }
        }
        self.signal.stop_monitoring().await;

        let _guard = self.op_lock.lock().await;
        self.storage.flush().await?;
        info!("同步协调器已关闭");
        Ok(())
    }
}
