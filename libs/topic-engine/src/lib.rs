use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use service_api::{
    OverflowPolicy, SubscriptionId, TopicEvent, TopicPublisher, TopicSubscriber,
    TopicSubscription, now_ms,
};

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

enum Delivery {
    Unbounded(mpsc::UnboundedSender<TopicEvent>),
    Bounded(mpsc::Sender<TopicEvent>),
}

enum DeliveryOutcome {
    Delivered,
    Dropped,
    Closed,
}

struct Subscriber {
    id: SubscriptionId,
    tx: Delivery,
}

impl Subscriber {
    fn deliver(&self, event: TopicEvent) -> DeliveryOutcome {
        match &self.tx {
            Delivery::Unbounded(tx) => match tx.send(event) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(_) => DeliveryOutcome::Closed,
            },
            Delivery::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => DeliveryOutcome::Dropped,
                Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::Closed,
            },
        }
    }
}

enum Receiver {
    Unbounded(mpsc::UnboundedReceiver<TopicEvent>),
    Bounded(mpsc::Receiver<TopicEvent>),
}

// ═══════════════════════════════════════════════════════════════
//  Subscription
// ═══════════════════════════════════════════════════════════════

/// Регистрация одного подписчика на topic.
///
/// Отдаёт события, опубликованные после `subscribe`, пока не будет
/// отменена (`cancel`, drop, `TopicRegistry::unsubscribe`) или пока
/// registry не закрыт. Drop снимает регистрацию сразу.
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    rx: Receiver,
    registry: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Следующее событие. `None` после отмены или закрытия registry.
    pub async fn recv(&mut self) -> Option<TopicEvent> {
        match &mut self.rx {
            Receiver::Unbounded(rx) => rx.recv().await,
            Receiver::Bounded(rx) => rx.recv().await,
        }
    }

    /// Уже доставленное событие без ожидания.
    pub fn try_recv(&mut self) -> Option<TopicEvent> {
        match &mut self.rx {
            Receiver::Unbounded(rx) => rx.try_recv().ok(),
            Receiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }

    /// Явная отмена: снять регистрацию и освободить канал.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(&self.topic, self.id);
        }
    }
}

impl TopicSubscription for Subscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<TopicEvent>> + Send + '_>> {
        Box::pin(Subscription::recv(self))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Registry state
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Topic {
    /// Число публикаций с момента создания topic'а.
    seq: u64,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Topic>,
    closed: bool,
}

#[derive(Default)]
struct Inner {
    /// Единая точка сериализации: subscribe, unsubscribe и fan-out
    /// выполняются под этим mutex'ом.
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut state = self.lock();
        let Some(t) = state.topics.get_mut(topic) else {
            return false;
        };
        let before = t.subscribers.len();
        t.subscribers.retain(|s| s.id != id);
        let removed = t.subscribers.len() != before;
        if removed {
            tracing::debug!(topic, subscription = %id, "unsubscribed");
        }
        removed
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicRegistry
// ═══════════════════════════════════════════════════════════════

/// Реестр topic → подписчики. Один экземпляр на процесс, передаётся
/// обработчикам и gateway явно (обычно как `Arc<TopicRegistry>`).
///
/// Topic'и существуют неявно: подписка создаёт topic, публикация в
/// topic без подписчиков ничего не делает.
#[derive(Default)]
pub struct TopicRegistry {
    inner: Arc<Inner>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Зарегистрировать нового подписчика на `topic`.
    pub fn subscribe(&self, topic: &str, buffer: usize, overflow: OverflowPolicy) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = match overflow {
            OverflowPolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Delivery::Unbounded(tx), Receiver::Unbounded(rx))
            }
            OverflowPolicy::Drop => {
                let (tx, rx) = mpsc::channel(buffer.max(1));
                (Delivery::Bounded(tx), Receiver::Bounded(rx))
            }
        };

        let mut state = self.inner.lock();
        if state.closed {
            // tx дропается здесь: подписка сразу завершена
            tracing::debug!(topic, "subscribe on closed registry");
        } else {
            let t = state.topics.entry(topic.to_string()).or_default();
            t.subscribers.push(Subscriber { id, tx });
            tracing::debug!(topic, subscription = %id, subscribers = t.subscribers.len(), "subscribed");
        }
        drop(state);

        Subscription {
            id,
            topic: topic.to_string(),
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Разослать событие всем текущим подписчикам `topic`.
    ///
    /// Fan-out идёт под mutex'ом registry: подписка, оформленная
    /// конкурентно, либо получит это событие целиком, либо не получит
    /// вовсе. Порядок доставки одному подписчику совпадает с порядком
    /// вызовов publish.
    pub fn publish(&self, topic: &str, value: serde_json::Value) -> usize {
        let mut state = self.inner.lock();
        if state.closed {
            return 0;
        }
        let Some(t) = state.topics.get_mut(topic) else {
            tracing::trace!(topic, "publish without subscribers");
            return 0;
        };

        t.seq += 1;
        let event = TopicEvent { seq: t.seq, ts_ms: now_ms(), value };

        let mut delivered = 0;
        t.subscribers.retain(|sub| match sub.deliver(event.clone()) {
            DeliveryOutcome::Delivered => {
                delivered += 1;
                true
            }
            DeliveryOutcome::Dropped => {
                tracing::warn!(topic, subscription = %sub.id, "subscriber channel full, dropping");
                true
            }
            DeliveryOutcome::Closed => {
                tracing::debug!(topic, subscription = %sub.id, "pruned closed subscriber");
                false
            }
        });

        tracing::trace!(topic, seq = event.seq, delivered, "published");
        delivered
    }

    /// Снять регистрацию. Возвращает false, если её уже нет.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        self.inner.remove(topic, id)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Закрыть registry: все подписки завершаются (`recv` → None),
    /// дальнейшие publish игнорируются.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let dropped: usize = state.topics.values().map(|t| t.subscribers.len()).sum();
        state.topics.clear();
        tracing::info!(subscriptions = dropped, "topic registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl TopicPublisher for TopicRegistry {
    fn publish(&self, topic: &str, value: serde_json::Value) -> usize {
        TopicRegistry::publish(self, topic, value)
    }
}

impl TopicSubscriber for TopicRegistry {
    fn subscribe(
        &self,
        topic: &str,
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Box<dyn TopicSubscription> {
        Box::new(TopicRegistry::subscribe(self, topic, buffer, overflow))
    }

    fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        TopicRegistry::unsubscribe(self, topic, id)
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        TopicRegistry::subscriber_count(self, topic)
    }
}
