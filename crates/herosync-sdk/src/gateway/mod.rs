//! 远端英雄集合接口
//!
//! 权威数据源的 CRUD 抽象。SDK 自带两个实现：
//! - [`http::HttpHeroGateway`]：REST 接口（reqwest）
//! - [`memory::InMemoryGateway`]：内存实现，带调用记录与故障注入，用于测试和演示

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::entities::{Hero, NewHero};

pub mod http;
pub mod memory;

pub use http::HttpHeroGateway;
pub use memory::{FailOn, GatewayCall, InMemoryGateway, InjectedError};

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn list(&self) -> Result<Vec<Hero>>;

    /// 不存在时返回 NotFound
    async fn get(&self, id: i64) -> Result<Hero>;

    /// `term` 非空（调用方负责过滤空白检索词）
    async fn search(&self, term: &str) -> Result<Vec<Hero>>;

    /// 服务端分配 id
    async fn add(&self, hero: &NewHero) -> Result<Hero>;

    async fn update(&self, hero: &Hero) -> Result<()>;

    async fn delete(&self, id: i64) -> Result<()>;
}
