use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// Политика буферизации канала одного подписчика.
///
/// Выбирается при подписке и не меняется в течение её жизни.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Неограниченная очередь: ни одно событие не теряется,
    /// медленный подписчик не тормозит остальных. `buffer` игнорируется.
    #[default]
    Unbounded,
    /// Очередь на `buffer` событий: при переполнении событие дропается
    /// только для этого подписчика (с warn в лог).
    Drop,
}

// ════════════════════════════════════════════════════════════════
//  Subscription identity
// ════════════════════════════════════════════════════════════════

/// Идентификатор регистрации подписчика внутри registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ════════════════════════════════════════════════════════════════
//  TopicEvent
// ════════════════════════════════════════════════════════════════

/// Событие, доставляемое подписчикам topic'а.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicEvent {
    /// Порядковый номер публикации внутри topic'а (с 1, строго растёт).
    pub seq: u64,
    /// Время публикации, Unix ms.
    pub ts_ms: i64,
    /// Опубликованная запись.
    pub value: serde_json::Value,
}
