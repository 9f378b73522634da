//! HeroSync SDK - 离线优先的英雄数据同步 SDK
//!
//! 本 SDK 在应用与远端英雄接口之间提供一层离线优先的同步：
//! - 🪞 镜像表：远端集合的本地副本，离线时提供读服务
//! - 📜 事务日志：离线写入按顺序持久化，恢复在线后 FIFO 回放
//! - 🔁 临时 id 对账：离线新增的实体在回放后换成服务端 id
//! - 📡 连通性驱动的三态状态机：在线 / 离线 / 同步中
//! - ⚙️ 事件系统：回放完成通知、读路径回退诊断
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use herosync_sdk::{HeroSyncConfig, HeroSyncSDK};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HeroSyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .base_url("http://localhost:5000")
//!         .build();
//!
//!     let sdk = HeroSyncSDK::initialize(config).await?;
//!
//!     sdk.on_sync_completed(|report| {
//!         println!("同步完成: {} 条已回放", report.replayed);
//!     })
//!     .await;
//!
//!     // 平台层转发网络变化
//!     sdk.report_connectivity(false)?;
//!     let hero = sdk.add_hero("Magneta").await?;
//!     println!("离线新增: {}", hero);
//!     sdk.report_connectivity(true)?;
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod connection_state;
pub mod error;
pub mod events;
pub mod gateway;
pub mod network;
pub mod sdk;
pub mod storage;
pub mod sync;
pub mod version;

pub use connection_state::{SyncSnapshot, SyncState, SyncStateManager, SyncStats};
pub use error::{HeroSyncError, Result};
pub use events::{event_builders, EventListener, EventManager, EventStats, SyncEvent};
pub use gateway::{HttpHeroGateway, InMemoryGateway, RemoteGateway};
pub use network::{ConnectivityEvent, ConnectivitySignal, ManualConnectivity, NetworkStatus};
pub use sdk::{EventConfig, HeroSyncConfig, HeroSyncConfigBuilder, HeroSyncSDK, HttpClientConfig};
pub use storage::{
    EntityMirror, Hero, HeroPatch, NewHero, StorageManager, Transaction, TransactionKind,
    TransactionLog, TransactionOp,
};
pub use sync::{ReplayFailureReason, ReplayReport, SyncCoordinator};
pub use version::{version_string, SDK_VERSION};
