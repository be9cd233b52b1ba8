use std::future::Future;
use std::pin::Pin;

use crate::{OverflowPolicy, SubscriptionId, TopicEvent};

// ════════════════════════════════════════════════════════════════
//  Topic Traits
// ════════════════════════════════════════════════════════════════

/// Подписка на topic — асинхронный поток событий.
///
/// Реализуется в topic-engine. API crate определяет только трейт,
/// без зависимости от tokio.
pub trait TopicSubscription: Send {
    /// Идентификатор регистрации (для явной отмены через `TopicSubscriber`).
    fn id(&self) -> SubscriptionId;

    /// Имя topic'а, на который оформлена подписка.
    fn topic(&self) -> &str;

    /// Получить следующее событие. None = registry закрыт / подписка отменена.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<TopicEvent>> + Send + '_>>;
}

/// Публикация событий в topic (fan-out текущим подписчикам).
pub trait TopicPublisher: Send + Sync {
    /// Разослать `value` всем текущим подписчикам `topic`.
    /// Возвращает число регистраций, которым событие доставлено.
    /// Без подписчиков событие отбрасывается.
    fn publish(&self, topic: &str, value: serde_json::Value) -> usize;
}

/// Регистрация подписчиков на real-time поток topic'а.
pub trait TopicSubscriber: Send + Sync {
    /// Подписаться на topic. Несуществующий topic создаётся.
    ///
    /// - `buffer`: размер буфера канала (для `OverflowPolicy::Drop`)
    /// - `overflow`: политика буферизации
    fn subscribe(
        &self,
        topic: &str,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Box<dyn TopicSubscription>;

    /// Снять регистрацию. Повторный вызов — no-op, возвращает false.
    fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool;

    /// Число живых регистраций на topic.
    fn subscriber_count(&self, topic: &str) -> usize;
}
