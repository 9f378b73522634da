use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::RemoteGateway;
use crate::error::{HeroSyncError, Result};
use crate::storage::entities::{Hero, NewHero};

/// 网关收到的一次调用（按到达顺序记录）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    List,
    Get { id: i64 },
    Search { term: String },
    Add { name: String },
    Update { id: i64, name: String },
    Delete { id: i64 },
}

/// 故障注入匹配条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOn {
    Any,
    List,
    Add { name: String },
    Update { id: i64 },
    Delete { id: i64 },
}

impl FailOn {
    fn matches(&self, call: &GatewayCall) -> bool {
        match (self, call) {
            (FailOn::Any, _) => true,
            (FailOn::List, GatewayCall::List) => true,
            (FailOn::Add { name }, GatewayCall::Add { name: n }) => name == n,
            (FailOn::Update { id }, GatewayCall::Update { id: i, .. }) => id == i,
            (FailOn::Delete { id }, GatewayCall::Delete { id: i }) => id == i,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedError {
    Unavailable,
    NotFound,
    InvalidArgument,
}

impl InjectedError {
    fn to_error(self, call: &GatewayCall) -> HeroSyncError {
        match self {
            InjectedError::Unavailable => {
                HeroSyncError::GatewayUnavailable(format!("injected failure on {:?}", call))
            }
            InjectedError::NotFound => HeroSyncError::NotFound(format!("injected on {:?}", call)),
            InjectedError::InvalidArgument => {
                HeroSyncError::InvalidArgument(format!("injected on {:?}", call))
            }
        }
    }
}

type CallHook = Arc<dyn Fn(&GatewayCall) + Send + Sync>;

#[derive(Default)]
struct GatewayState {
    heroes: BTreeMap<i64, Hero>,
    next_id: i64,
    available: bool,
    journal: Vec<GatewayCall>,
    failures: Vec<(FailOn, InjectedError)>,
    latency: Option<Duration>,
    hook: Option<CallHook>,
}

/// 内存版远端集合
#[derive(Clone)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl std::fmt::Debug for InMemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryGateway")
            .field("heroes", &state.heroes.len())
            .field("next_id", &state.next_id)
            .field("available", &state.available)
            .finish()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::with_heroes(Vec::new())
    }

    /// 预置数据；下一个分配的 id 为当前最大 id + 1
    pub fn with_heroes(heroes: Vec<Hero>) -> Self {
        let next_id = heroes.iter().map(|h| h.id).max().unwrap_or(0) + 1;
        let state = GatewayState {
            heroes: heroes.into_iter().map(|h| (h.id, h)).collect(),
            next_id,
            available: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn set_next_id(&self, id: i64) {
        self.state.lock().next_id = id;
    }

    /// 为 false 时所有调用都返回 GatewayUnavailable
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// 下一次匹配的调用失败一次
    pub fn fail_once(&self, on: FailOn, error: InjectedError) {
        self.state.lock().failures.push((on, error));
    }

    /// 每次调用前等待一段时间（模拟慢网络）
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// 调用到达时同步执行的回调
    pub fn set_call_hook<F>(&self, hook: F)
    where
        F: Fn(&GatewayCall) + Send + Sync + 'static,
    {
        self.state.lock().hook = Some(Arc::new(hook));
    }

    /// 已收到的调用（不含读调用）
    pub fn write_journal(&self) -> Vec<GatewayCall> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    GatewayCall::Add { .. } | GatewayCall::Update { .. } | GatewayCall::Delete { .. }
                )
            })
            .cloned()
            .collect()
    }

    pub fn journal(&self) -> Vec<GatewayCall> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    pub fn heroes(&self) -> Vec<Hero> {
        self.state.lock().heroes.values().cloned().collect()
    }

    pub fn hero(&self, id: i64) -> Option<Hero> {
        self.state.lock().heroes.get(&id).cloned()
    }

    /// 记录调用并决定是否注入失败
    async fn enter(&self, call: GatewayCall) -> Result<()> {
        let (hook, latency) = {
            let mut state = self.state.lock();
            state.journal.push(call.clone());
            (state.hook.clone(), state.latency)
        };
        if let Some(hook) = hook {
            hook(&call);
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.available {
            return Err(HeroSyncError::GatewayUnavailable("gateway offline".to_string()));
        }
        if let Some(pos) = state.failures.iter().position(|(on, _)| on.matches(&call)) {
            let (_, error) = state.failures.remove(pos);
            debug!("注入失败: {:?} -> {:?}", call, error);
            return Err(error.to_error(&call));
        }
        Ok(())
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteGateway for InMemoryGateway {
    async fn list(&self) -> Result<Vec<Hero>> {
        self.enter(GatewayCall::List).await?;
        Ok(self.heroes())
    }

    async fn get(&self, id: i64) -> Result<Hero> {
        self.enter(GatewayCall::Get { id }).await?;
        self.hero(id)
            .ok_or_else(|| HeroSyncError::NotFound(format!("hero {} not on server", id)))
    }

    /// 与 REST 后端一致：名称包含检索词即命中
    async fn search(&self, term: &str) -> Result<Vec<Hero>> {
        self.enter(GatewayCall::Search { term: term.to_string() }).await?;
        Ok(self
            .state
            .lock()
            .heroes
            .values()
            .filter(|h| h.name.contains(term))
            .cloned()
            .collect())
    }

    async fn add(&self, hero: &NewHero) -> Result<Hero> {
        self.enter(GatewayCall::Add { name: hero.name.clone() }).await?;
        let mut state = self.state.lock();
        let created = hero.with_id(state.next_id);
        state.next_id += 1;
        state.heroes.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&self, hero: &Hero) -> Result<()> {
        self.enter(GatewayCall::Update {
            id: hero.id,
            name: hero.name.clone(),
        })
        .await?;
        let mut state = self.state.lock();
        match state.heroes.get_mut(&hero.id) {
            Some(existing) => {
                existing.name = hero.name.clone();
                Ok(())
            }
            None => Err(HeroSyncError::NotFound(format!("hero {} not on server", hero.id))),
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.enter(GatewayCall::Delete { id }).await?;
        self.state.lock().heroes.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crud_and_journal() {
        let gateway = InMemoryGateway::with_heroes(vec![Hero::new(1, "A")]);
        gateway.set_next_id(101);

        let created = gateway.add(&NewHero::new("C")).await.unwrap();
        assert_eq!(created, Hero::new(101, "C"));
        gateway.update(&Hero::new(1, "A2")).await.unwrap();
        gateway.delete(101).await.unwrap();
        assert!(gateway.get(101).await.unwrap_err().is_not_found());

        assert_eq!(
            gateway.write_journal(),
            vec![
                GatewayCall::Add { name: "C".into() },
                GatewayCall::Update { id: 1, name: "A2".into() },
                GatewayCall::Delete { id: 101 },
            ]
        );
        assert_eq!(gateway.heroes(), vec![Hero::new(1, "A2")]);
    }

    #[tokio::test]
    async fn test_fail_once_and_unavailable() {
        let gateway = InMemoryGateway::with_heroes(vec![Hero::new(1, "A")]);
        gateway.fail_once(FailOn::Update { id: 1 }, InjectedError::Unavailable);

        let err = gateway.update(&Hero::new(1, "X")).await.unwrap_err();
        assert!(err.is_gateway_unavailable());
        gateway.update(&Hero::new(1, "X")).await.unwrap();

        gateway.set_available(false);
        assert!(gateway.list().await.unwrap_err().is_gateway_unavailable());
    }

    #[tokio::test]
    async fn test_search_is_contains() {
        let gateway = InMemoryGateway::with_heroes(vec![Hero::new(1, "Magneta"), Hero::new(2, "Dynama")]);
        let found = gateway.search("ma").await.unwrap();
        assert_eq!(found, vec![Hero::new(2, "Dynama")]);
    }
}
