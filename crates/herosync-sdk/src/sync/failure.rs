use serde::{Deserialize, Serialize};

use crate::error::HeroSyncError;
use crate::storage::entities::TransactionKind;

/// 回放失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplayFailureReason {
    /// 远端不可用 - 下次恢复在线后重试
    GatewayUnavailable(String),
    /// 远端已不存在该实体 - 更新/删除不再可能成功
    EntityGone(String),
    /// 远端拒绝请求内容 - 重试也不会成功
    Rejected(String),
    /// 其他错误（本地存储、序列化等）- 保守起见重试
    Other(String),
}

impl ReplayFailureReason {
    /// 按事务类型归类网关错误
    pub fn classify(kind: TransactionKind, error: &HeroSyncError) -> Self {
        let message = error.to_string();
        match error {
            HeroSyncError::NotFound(_) if kind != TransactionKind::Add => {
                ReplayFailureReason::EntityGone(message)
            }
            HeroSyncError::InvalidArgument(_) => ReplayFailureReason::Rejected(message),
            e if e.is_gateway_unavailable() => ReplayFailureReason::GatewayUnavailable(message),
            _ => ReplayFailureReason::Other(message),
        }
    }

    /// 判断是否可以重试（否则从日志中丢弃）
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplayFailureReason::GatewayUnavailable(_) => true,
            ReplayFailureReason::EntityGone(_) => false,
            ReplayFailureReason::Rejected(_) => false,
            ReplayFailureReason::Other(_) => true,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ReplayFailureReason::GatewayUnavailable(m)
            | ReplayFailureReason::EntityGone(m)
            | ReplayFailureReason::Rejected(m)
            | ReplayFailureReason::Other(m) => m,
        }
    }

    pub fn into_error(self, log_id: u64) -> HeroSyncError {
        HeroSyncError::ReplayFailure {
            log_id,
            reason: self.message().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_only_final_for_update_and_delete() {
        let gone = HeroSyncError::NotFound("hero 9".into());
        assert!(!ReplayFailureReason::classify(TransactionKind::Update, &gone).is_retryable());
        assert!(!ReplayFailureReason::classify(TransactionKind::Delete, &gone).is_retryable());
        assert!(ReplayFailureReason::classify(TransactionKind::Add, &gone).is_retryable());
    }

    #[test]
    fn test_classification() {
        let down = HeroSyncError::GatewayUnavailable("503".into());
        let reason = ReplayFailureReason::classify(TransactionKind::Add, &down);
        assert!(matches!(reason, ReplayFailureReason::GatewayUnavailable(_)));
        assert!(reason.is_retryable());

        let bad = HeroSyncError::InvalidArgument("empty name".into());
        assert!(!ReplayFailureReason::classify(TransactionKind::Add, &bad).is_retryable());

        let kv = HeroSyncError::KvStore("io".into());
        assert!(matches!(
            ReplayFailureReason::classify(TransactionKind::Update, &kv),
            ReplayFailureReason::Other(_)
        ));
    }

    #[test]
    fn test_into_error() {
        let reason = ReplayFailureReason::Rejected("Invalid argument: x".into());
        match reason.into_error(4) {
            HeroSyncError::ReplayFailure { log_id, reason } => {
                assert_eq!(log_id, 4);
                assert_eq!(reason, "Invalid argument: x");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
