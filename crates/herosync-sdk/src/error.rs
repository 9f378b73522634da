use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeroSyncError {
    /// 远端不可用（网络或后端故障）
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),
    /// 镜像表或远端中不存在该实体
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// 回放某条事务失败
    #[error("Replay failure [log_id={log_id}]: {reason}")]
    ReplayFailure { log_id: u64, reason: String },
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl From<sled::Error> for HeroSyncError {
    fn from(error: sled::Error) -> Self {
        HeroSyncError::KvStore(error.to_string())
    }
}

impl From<serde_json::Error> for HeroSyncError {
    fn from(error: serde_json::Error) -> Self {
        HeroSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for HeroSyncError {
    fn from(error: std::io::Error) -> Self {
        HeroSyncError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for HeroSyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            HeroSyncError::GatewayUnavailable(error.to_string())
        } else if error.is_decode() {
            HeroSyncError::Serialization(error.to_string())
        } else {
            HeroSyncError::Transport(error.to_string())
        }
    }
}

impl HeroSyncError {
    /// 是否属于远端不可用（读路径据此回退到镜像表）
    pub fn is_gateway_unavailable(&self) -> bool {
        matches!(
            self,
            HeroSyncError::GatewayUnavailable(_) | HeroSyncError::Transport(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HeroSyncError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, HeroSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(HeroSyncError::GatewayUnavailable("down".into()).is_gateway_unavailable());
        assert!(HeroSyncError::Transport("reset".into()).is_gateway_unavailable());
        assert!(!HeroSyncError::NotFound("hero 1".into()).is_gateway_unavailable());
        assert!(HeroSyncError::NotFound("hero 1".into()).is_not_found());
    }

    #[test]
    fn test_replay_failure_display() {
        let err = HeroSyncError::ReplayFailure {
            log_id: 7,
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "Replay failure [log_id=7]: timeout");
    }
}
