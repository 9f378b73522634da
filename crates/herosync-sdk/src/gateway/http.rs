//! HTTP 网关 - 远端英雄集合的 REST 接口
//!
//! 本模块使用 reqwest 作为底层 HTTP 客户端，接口约定：
//! - `GET    {base}/api/heroes`           列表
//! - `GET    {base}/api/heroes/{id}`      单个（空对象视为不存在）
//! - `GET    {base}/api/heroes/?name=xx`  检索
//! - `POST   {base}/api/heroes`           新增，返回带 id 的实体
//! - `PUT    {base}/api/heroes/{id}`      更新
//! - `DELETE {base}/api/heroes/{id}`      删除

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, error, info};

use super::RemoteGateway;
use crate::error::{HeroSyncError, Result};
use crate::sdk::HttpClientConfig;
use crate::storage::entities::{Hero, NewHero};

/// HTTP 网关
#[derive(Debug, Clone)]
pub struct HttpHeroGateway {
    client: Client,
    /// 集合地址，以 `/` 结尾
    collection_url: Url,
}

impl HttpHeroGateway {
    /// 创建新的 HTTP 网关
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| HeroSyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let collection_url = Self::collection_url(&config.base_url, &config.heroes_path)?;
        info!("HTTP 网关已创建: {}", collection_url);

        Ok(Self {
            client,
            collection_url,
        })
    }

    /// 拼接集合地址：保证 base 与 path 都以 `/` 结尾，避免 `Url::join` 吞掉最后一段
    pub(crate) fn collection_url(base_url: &str, heroes_path: &str) -> Result<Url> {
        let base = format!("{}/", base_url.trim_end_matches('/'));
        let path = format!("{}/", heroes_path.trim_matches('/'));
        Url::parse(&base)
            .and_then(|u| u.join(&path))
            .map_err(|e| HeroSyncError::Config(format!("无效的服务地址 {}{}: {}", base, path, e)))
    }

    /// 不带末尾 `/` 的集合地址（POST / 列表）
    fn list_url(&self) -> Url {
        let mut url = self.collection_url.clone();
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);
        url
    }

    fn item_url(&self, id: i64) -> Result<Url> {
        self.collection_url
            .join(&id.to_string())
            .map_err(|e| HeroSyncError::InvalidArgument(format!("无效的 id {}: {}", id, e)))
    }

    fn search_url(&self, term: &str) -> Url {
        let mut url = self.collection_url.clone();
        url.query_pairs_mut().append_pair("name", term);
        url
    }

    /// 按状态码归类错误：404 → NotFound，其他 4xx → InvalidArgument，5xx → GatewayUnavailable
    async fn check_status(response: Response, operation: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误信息".to_string());
        error!("{} 失败，HTTP 状态码: {}, 错误: {}", operation, status, error_text);
        Err(status_error(status, operation, &error_text))
    }
}

pub(crate) fn status_error(status: StatusCode, operation: &str, detail: &str) -> HeroSyncError {
    let message = format!("{}: HTTP {} ({})", operation, status, detail);
    if status == StatusCode::NOT_FOUND {
        HeroSyncError::NotFound(message)
    } else if status.is_client_error() {
        HeroSyncError::InvalidArgument(message)
    } else {
        HeroSyncError::GatewayUnavailable(message)
    }
}

#[async_trait]
impl RemoteGateway for HttpHeroGateway {
    async fn list(&self) -> Result<Vec<Hero>> {
        let response = self.client.get(self.list_url()).send().await?;
        let response = Self::check_status(response, "getHeroes").await?;
        let heroes: Vec<Hero> = response.json().await?;
        debug!("fetched heroes: {}", heroes.len());
        Ok(heroes)
    }

    async fn get(&self, id: i64) -> Result<Hero> {
        let response = self.client.get(self.item_url(id)?).send().await?;
        let response = Self::check_status(response, "getHero").await?;
        // 后端对不存在的 id 返回 `{}`
        let value: serde_json::Value = response.json().await?;
        if value.as_object().map_or(true, |o| o.is_empty()) {
            return Err(HeroSyncError::NotFound(format!("hero {} not on server", id)));
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn search(&self, term: &str) -> Result<Vec<Hero>> {
        let response = self.client.get(self.search_url(term)).send().await?;
        let response = Self::check_status(response, "searchHeroes").await?;
        Ok(response.json().await?)
    }

    async fn add(&self, hero: &NewHero) -> Result<Hero> {
        let response = self.client.post(self.list_url()).json(hero).send().await?;
        let response = Self::check_status(response, "addHero").await?;
        let created: Hero = response.json().await?;
        debug!("added hero w/ id={}", created.id);
        Ok(created)
    }

    async fn update(&self, hero: &Hero) -> Result<()> {
        let response = self.client.put(self.item_url(hero.id)?).json(hero).send().await?;
        Self::check_status(response, "updateHero").await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let response = self.client.delete(self.item_url(id)?).send().await?;
        Self::check_status(response, "deleteHero").await?;
        Ok(())
    }
}
