use std::sync::Arc;

use rendezvous_error::RendezvousResult;

use super::{pump::PumpHandle, release::Release};

/// Сопоставляет теги с ожидающими релизами, регистрируя интерес в помпе.
#[derive(Debug, Clone)]
pub struct ReleaseNotifier {
    pump: PumpHandle,
}

impl ReleaseNotifier {
    pub fn new(pump: PumpHandle) -> Self {
        Self { pump }
    }

    /// Создаёт релиз для `tag`. Возвращается, когда подписка уже активна.
    pub async fn listen(
        &self,
        tag: &str,
    ) -> RendezvousResult<Release> {
        self.pump.subscribe(Arc::from(tag)).await
    }

    /// Снимает с прослушивания все релизы тега. Идемпотентно, не ждёт
    /// выполнения.
    pub fn unlisten(
        &self,
        tag: &str,
    ) {
        self.pump.unsubscribe(Arc::from(tag));
    }

    pub fn pump(&self) -> &PumpHandle {
        &self.pump
    }
}
