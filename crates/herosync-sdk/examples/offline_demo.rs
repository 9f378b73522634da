//! 离线同步演示
//!
//! 默认使用内存网关；设置 `HEROSYNC_BASE_URL` 时改为访问真实 REST 服务。
//!
//! ```text
//! cargo run --example offline_demo
//! HEROSYNC_BASE_URL=http://localhost:5000 cargo run --example offline_demo
//! ```

use herosync_sdk::{Hero, HeroSyncConfig, HeroSyncSDK, InMemoryGateway, RemoteGateway, SyncState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 离线同步演示\n");
    println!("====================================\n");

    let data_dir = tempfile::TempDir::new()?;
    let mut builder = HeroSyncConfig::builder().data_dir(data_dir.path());

    let gateway: Option<Arc<dyn RemoteGateway>> = match std::env::var("HEROSYNC_BASE_URL") {
        Ok(url) => {
            println!("🌐 远端: {}", url);
            builder = builder.base_url(url);
            None
        }
        Err(_) => {
            println!("🧪 远端: 内存网关");
            Some(Arc::new(InMemoryGateway::with_heroes(vec![
                Hero::new(11, "Dr Nice"),
                Hero::new(12, "Narco"),
                Hero::new(13, "Bombasto"),
            ])))
        }
    };

    let sdk = HeroSyncSDK::initialize_with(builder.build(), gateway, None).await?;
    sdk.on_sync_completed(|report| {
        println!(
            "✅ 回放完成: 成功 {} / 失败 {} / 丢弃 {}, id 对账 {:?}",
            report.replayed, report.failed, report.dropped, report.reconciled
        );
    })
    .await;

    println!("\n📋 在线读取:");
    for hero in sdk.get_heroes().await? {
        println!("   {}", hero);
    }

    println!("\n📴 断网");
    sdk.report_connectivity(false)?;
    wait_for(&sdk, SyncState::Offline).await;

    let added = sdk.add_hero("Magneta").await?;
    println!("   新增 (临时 id): {}", added);
    sdk.update_hero(Hero::new(12, "Narco the Great")).await?;
    sdk.delete_hero(13).await?;
    println!("   搜索 \"Nar\": {:?}", sdk.search_heroes("Nar").await?);
    for tx in sdk.pending_transactions().await? {
        println!("   待回放: {}", tx);
    }

    println!("\n📶 恢复在线");
    sdk.report_connectivity(true)?;
    wait_for(&sdk, SyncState::Online).await;

    println!("\n📋 同步后:");
    for hero in sdk.get_heroes().await? {
        println!("   {}", hero);
    }
    println!("\n{}", sdk.sync_summary().await);

    sdk.shutdown().await?;
    Ok(())
}

async fn wait_for(sdk: &HeroSyncSDK, state: SyncState) {
    for _ in 0..200 {
        if sdk.sync_state().await == state {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    println!("⚠️ 等待状态 {} 超时", state);
}
