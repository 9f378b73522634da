//! 统一 SDK 接口 - HeroSyncSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! HeroSyncSDK (应用接口层)
//!   └── SyncCoordinator (读写路由 + 回放)
//!         ├── StorageManager (镜像表 + 事务日志)
//!         ├── RemoteGateway (远端英雄接口)
//!         ├── ConnectivitySignal (连通性信号)
//!         └── EventManager (事件系统层)
//! ```
//!
//! 设计原则：
//! - 异步优先：所有 API 使用 async/await
//! - 显式初始化：本地存储由 `initialize` 打开并交给协调器，没有全局单例
//! - 事件驱动：回放完成等通知统一走 EventManager

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::connection_state::{SyncState, SyncStats};
use crate::error::{HeroSyncError, Result};
use crate::events::{EventManager, SyncEvent};
use crate::gateway::{HttpHeroGateway, RemoteGateway};
use crate::network::{ConnectivitySignal, ManualConnectivity};
use crate::storage::entities::{Hero, NewHero, Transaction};
use crate::storage::StorageManager;
use crate::sync::{ReplayReport, SyncCoordinator};
use crate::version;

/// HTTP 客户端配置（远端英雄接口）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 服务根地址
    pub base_url: String,
    /// 英雄集合路径
    pub heroes_path: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            heroes_path: "api/heroes".to_string(),
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// HeroSync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeroSyncConfig {
    /// 数据存储目录
    pub data_dir: PathBuf,
    /// 存储命名空间（sled tree 前缀）
    pub namespace: String,
    pub http_client_config: HttpClientConfig,
    pub event_config: EventConfig,
    /// 收到第一条连通性读数之前假定的状态（仅默认信号使用）
    pub initial_online: bool,
    /// 初始化时若在线，立即回放上次遗留的事务
    pub sync_on_startup: bool,
    /// 调试模式（初始化 fmt 日志输出）
    pub debug_mode: bool,
}

impl Default for HeroSyncConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            namespace: "hero".to_string(),
            http_client_config: HttpClientConfig::default(),
            event_config: EventConfig::default(),
            initial_online: true,
            sync_on_startup: true,
            debug_mode: false,
        }
    }
}

/// 获取默认数据目录 ~/.herosync/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".herosync")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows
        home_dir.join(".herosync")
    } else {
        PathBuf::from("./herosync_data")
    }
}

/// HeroSync SDK 配置构建器
pub struct HeroSyncConfigBuilder {
    config: HeroSyncConfig,
}

impl HeroSyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HeroSyncConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// 远端服务根地址，如 `http://localhost:5000`
    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.http_client_config.base_url = url.into();
        self
    }

    pub fn heroes_path<S: Into<String>>(mut self, path: S) -> Self {
        self.config.http_client_config.heroes_path = path.into();
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_config.buffer_size = size;
        self
    }

    pub fn initial_online(mut self, online: bool) -> Self {
        self.config.initial_online = online;
        self
    }

    pub fn sync_on_startup(mut self, enabled: bool) -> Self {
        self.config.sync_on_startup = enabled;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> HeroSyncConfig {
        self.config
    }
}

impl Default for HeroSyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeroSyncConfig {
    pub fn builder() -> HeroSyncConfigBuilder {
        HeroSyncConfigBuilder::new()
    }
}

/// 统一 SDK 主接口
pub struct HeroSyncSDK {
    /// SDK 配置
    config: HeroSyncConfig,

    /// 同步协调器
    coordinator: SyncCoordinator,

    /// 事件管理器
    event_manager: Arc<EventManager>,

    /// 默认连通性信号（注入自定义信号时为 None）
    connectivity: Option<Arc<ManualConnectivity>>,

    /// 是否已初始化
    initialized: Arc<RwLock<bool>>,

    /// 是否正在关闭
    shutting_down: Arc<RwLock<bool>>,
}

impl HeroSyncSDK {
    /// 使用 REST 网关和手动连通性信号初始化 SDK
    pub async fn initialize(config: HeroSyncConfig) -> Result<Arc<Self>> {
        Self::initialize_with(config, None, None).await
    }

    /// 初始化 SDK，可注入自定义网关与连通性信号
    ///
    /// 分层初始化顺序：
    /// 1. 存储层 → 2. 网关 / 连通性 → 3. 事件层 → 4. 协调器
    pub async fn initialize_with(
        config: HeroSyncConfig,
        gateway: Option<Arc<dyn RemoteGateway>>,
        signal: Option<Arc<dyn ConnectivitySignal>>,
    ) -> Result<Arc<Self>> {
        if config.debug_mode {
            // 宿主可能已经安装了 subscriber
            let _ = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::DEBUG)
                .try_init();
        }

        info!("正在初始化 HeroSyncSDK {}...", version::version_string());
        Self::validate_config(&config)?;

        let storage = StorageManager::new(&config.data_dir, &config.namespace).await?;
        debug!(
            "本地存储已打开: {} (镜像 {} 条, 待回放 {} 条)",
            config.data_dir.display(),
            storage.mirror().len(),
            storage.log().len()
        );

        let gateway: Arc<dyn RemoteGateway> = match gateway {
            Some(gateway) => gateway,
            None => Arc::new(HttpHeroGateway::new(&config.http_client_config)?),
        };

        let mut connectivity = None;
        let signal: Arc<dyn ConnectivitySignal> = match signal {
            Some(signal) => signal,
            None => {
                let manual = Arc::new(ManualConnectivity::new(config.initial_online));
                connectivity = Some(manual.clone());
                manual
            }
        };

        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));
        let coordinator = SyncCoordinator::new(storage, gateway, signal, event_manager.clone());
        coordinator.start(config.sync_on_startup).await?;

        let sdk = Arc::new(Self {
            config,
            coordinator,
            event_manager,
            connectivity,
            initialized: Arc::new(RwLock::new(true)),
            shutting_down: Arc::new(RwLock::new(false)),
        });

        info!("HeroSyncSDK 初始化完成: {}", sdk.coordinator.state().await);
        Ok(sdk)
    }

    /// 验证配置
    fn validate_config(config: &HeroSyncConfig) -> Result<()> {
        if config.data_dir.as_os_str().is_empty() {
            return Err(HeroSyncError::Config("数据目录不能为空".to_string()));
        }
        if config.namespace.trim().is_empty() {
            return Err(HeroSyncError::Config("存储命名空间不能为空".to_string()));
        }
        if config.event_config.buffer_size == 0 {
            return Err(HeroSyncError::Config("事件缓冲区大小不能为0".to_string()));
        }
        HttpHeroGateway::collection_url(
            &config.http_client_config.base_url,
            &config.http_client_config.heroes_path,
        )?;
        Ok(())
    }

    async fn ensure_ready(&self) -> Result<()> {
        if *self.shutting_down.read().await {
            return Err(HeroSyncError::ShuttingDown("SDK 正在关闭".to_string()));
        }
        if !*self.initialized.read().await {
            return Err(HeroSyncError::NotInitialized("SDK 未初始化".to_string()));
        }
        Ok(())
    }

    pub async fn get_heroes(&self) -> Result<Vec<Hero>> {
        self.ensure_ready().await?;
        self.coordinator.get_heroes().await
    }

    pub async fn get_hero(&self, id: i64) -> Result<Hero> {
        self.ensure_ready().await?;
        self.coordinator.get_hero(id).await
    }

    pub async fn search_heroes(&self, term: &str) -> Result<Vec<Hero>> {
        self.ensure_ready().await?;
        self.coordinator.search_heroes(term).await
    }

    pub async fn add_hero(&self, name: &str) -> Result<Hero> {
        self.ensure_ready().await?;
        self.coordinator.add_hero(NewHero::new(name)).await
    }

    pub async fn update_hero(&self, hero: Hero) -> Result<Hero> {
        self.ensure_ready().await?;
        self.coordinator.update_hero(hero).await
    }

    pub async fn delete_hero(&self, id: i64) -> Result<()> {
        self.ensure_ready().await?;
        self.coordinator.delete_hero(id).await
    }

    /// 在线时立即回放一轮
    pub async fn sync_now(&self) -> Result<Option<ReplayReport>> {
        self.ensure_ready().await?;
        self.coordinator.sync_now().await
    }

    /// 以远端为准重建本地数据，丢弃待回放事务
    pub async fn resynchronize(&self) -> Result<Vec<Hero>> {
        self.ensure_ready().await?;
        self.coordinator.resynchronize().await
    }

    pub async fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        self.coordinator.pending_transactions().await
    }

    /// 转发平台层的连通性读数（仅默认信号）
    pub fn report_connectivity(&self, online: bool) -> Result<()> {
        match &self.connectivity {
            Some(signal) => {
                signal.set_online(online);
                Ok(())
            }
            None => Err(HeroSyncError::Config(
                "已注入自定义连通性信号，请通过该信号报告".to_string(),
            )),
        }
    }

    pub async fn sync_state(&self) -> SyncState {
        self.coordinator.state().await
    }

    pub async fn sync_stats(&self) -> SyncStats {
        self.coordinator.stats().await
    }

    pub async fn sync_summary(&self) -> String {
        self.coordinator.state_manager().get_summary().await
    }

    /// 订阅 SDK 事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_manager.subscribe()
    }

    /// 一轮回放清空事务日志后回调
    ///
    /// 本轮仍有条目保留在日志中时不回调，对应 `SyncEvent::ReplayIncomplete`。
    pub async fn on_sync_completed<F>(&self, callback: F)
    where
        F: Fn(&ReplayReport) + Send + Sync + 'static,
    {
        self.event_manager
            .add_listener("replay_completed", move |event| {
                if let SyncEvent::ReplayCompleted { report, .. } = event {
                    callback(report);
                }
            })
            .await;
    }

    pub fn event_manager(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    pub fn config(&self) -> &HeroSyncConfig {
        &self.config
    }

    /// 检查 SDK 是否已初始化
    pub async fn is_initialized(&self) -> bool {
        *self.initialized.read().await
    }

    /// 异步关闭 SDK
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut shutting_down = self.shutting_down.write().await;
            if *shutting_down {
                warn!("HeroSyncSDK 已在关闭中");
                return Ok(());
            }
            *shutting_down = true;
        }
        info!("正在关闭 HeroSyncSDK...");

        self.coordinator.shutdown().await?;
        self.event_manager.clear_listeners().await;

        *self.initialized.write().await = false;
        info!("HeroSyncSDK 关闭完成");
        Ok(())
    }
}
