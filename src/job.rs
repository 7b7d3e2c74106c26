//! Встраивание барьера в исполнитель задач.
//!
//! Задача может нести в аргументах дескриптор барьера под ключом
//! `"__barrier__"`. Перед основной работой исполнитель вызывает
//! [`gate_job`]: участник ждёт остальных, а результат ожидания
//! (`release_message`, `wait_time`) записывается обратно в дескриптор.

use std::{future::Future, str::FromStr, time::Duration};

use rendezvous_error::{GenericError, RendezvousResult, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{barrier::Barrier, broker::CommandConnection};

/// Ключ дескриптора в аргументах задачи.
pub const BARRIER_KEY: &str = "__barrier__";

/// Дескриптор барьера `{tag, count, message, timeout}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierDescriptor {
    pub tag: String,
    pub count: i64,
    pub message: String,
    /// Секунды; `None` означает ожидание без ограничения
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl BarrierDescriptor {
    /// Таймаут как `Duration`. Отрицательное или нечисловое значение
    /// считается ошибкой аргументов.
    pub fn timeout(&self) -> RendezvousResult<Option<Duration>> {
        match self.timeout {
            None => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
                GenericError::new(
                    StatusCode::InvalidArgs,
                    format!("invalid barrier timeout {secs}"),
                )
                .into()
            }),
        }
    }

    /// Извлекает дескриптор из аргументов задачи.
    ///
    /// # Возвращает
    /// `Ok(None)`, если ключа `"__barrier__"` нет.
    pub fn from_kwargs(kwargs: &Value) -> RendezvousResult<Option<Self>> {
        match kwargs.get(BARRIER_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone()).map(Some).map_err(|e| {
                GenericError::new(
                    StatusCode::InvalidValue,
                    format!("malformed barrier descriptor: {e}"),
                )
                .into()
            }),
        }
    }
}

/// Компактная форма `tag:count:message[:timeout]`.
///
/// Тег и счётчик отделяются по первым двум двоеточиям. Последний сегмент
/// считается таймаутом, только если он разбирается как число; иначе он
/// часть сообщения.
impl FromStr for BarrierDescriptor {
    type Err = rendezvous_error::StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            GenericError::new(
                StatusCode::InvalidArgs,
                format!("invalid barrier descriptor '{s}': {reason}"),
            )
        };

        let mut parts = s.splitn(3, ':');
        let (Some(tag), Some(count), Some(rest)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected tag:count:message[:timeout]").into());
        };
        let count = count
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid("count is not an integer"))?;

        let (message, timeout) = match rest.rsplit_once(':') {
            Some((message, t)) => match t.trim().parse::<f64>() {
                Ok(secs) => (message, Some(secs)),
                Err(_) => (rest, None),
            },
            None => (rest, None),
        };

        let descriptor = Self {
            tag: tag.to_string(),
            count,
            message: message.to_string(),
            timeout,
        };
        descriptor.timeout()?;
        Ok(descriptor)
    }
}

/// Итог прохождения барьера задачей.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Дескриптора нет: задача выполняется сразу
    NoBarrier,
    /// Все участники собрались
    Released {
        release_message: String,
        wait_time: Duration,
    },
    /// Рандеву не состоялось вовремя: задача считается проваленной
    Failed { reason: String },
}

impl GateOutcome {
    /// Можно ли запускать основную работу задачи.
    pub fn should_run(&self) -> bool {
        !matches!(self, GateOutcome::Failed { .. })
    }
}

/// Проводит задачу через барьер, если в её аргументах есть дескриптор.
///
/// Таймаут рандеву превращается в [`GateOutcome::Failed`], все остальные
/// ошибки пробрасываются.
pub async fn gate_job<C: CommandConnection>(
    barrier: &Barrier<C>,
    kwargs: &mut Value,
) -> RendezvousResult<GateOutcome> {
    let Some(descriptor) = BarrierDescriptor::from_kwargs(kwargs)? else {
        return Ok(GateOutcome::NoBarrier);
    };
    let timeout = descriptor.timeout()?;

    let start = Instant::now();
    let synced = barrier
        .sync(
            &descriptor.tag,
            descriptor.count,
            descriptor.message.clone(),
            timeout,
        )
        .await;

    match synced {
        Ok(release_message) => {
            let wait_time = start.elapsed();
            if let Some(slot) = kwargs.get_mut(BARRIER_KEY).and_then(Value::as_object_mut) {
                slot.insert(
                    "release_message".to_string(),
                    Value::String(release_message.clone()),
                );
                slot.insert("wait_time".to_string(), Value::from(wait_time.as_secs_f64()));
            }
            info!(
                tag = %descriptor.tag,
                wait_ms = u64::try_from(wait_time.as_millis()).unwrap_or(u64::MAX),
                "job released"
            );
            Ok(GateOutcome::Released {
                release_message,
                wait_time,
            })
        }
        Err(e) if e.is_timeout() => {
            warn!(tag = %descriptor.tag, error = %e, "job failed at barrier");
            Ok(GateOutcome::Failed {
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Проводит задачу через барьер и запускает `job`, если она пропущена.
///
/// # Возвращает
/// `Ok(None)`, если задача провалилась на барьере и `job` не запускалась.
pub async fn run_gated<C, F, Fut, T>(
    barrier: &Barrier<C>,
    kwargs: &mut Value,
    job: F,
) -> RendezvousResult<Option<T>>
where
    C: CommandConnection,
    F: FnOnce(&Value) -> Fut,
    Fut: Future<Output = RendezvousResult<T>>,
{
    let outcome = gate_job(barrier, kwargs).await?;
    if !outcome.should_run() {
        return Ok(None);
    }
    job(kwargs).await.map(Some)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_compact_form() {
        let d: BarrierDescriptor = "visit-7:2:AAAA".parse().unwrap();
        assert_eq!(
            d,
            BarrierDescriptor {
                tag: "visit-7".into(),
                count: 2,
                message: "AAAA".into(),
                timeout: None,
            }
        );

        let d: BarrierDescriptor = "t:3:go:1.5".parse().unwrap();
        assert_eq!(d.timeout().unwrap(), Some(Duration::from_millis(1500)));
        assert_eq!(d.message, "go");
    }

    /// Тест проверяет, что двоеточие в сообщении не принимается за таймаут,
    /// если хвост не число.
    #[test]
    fn test_compact_form_colon_in_message() {
        let d: BarrierDescriptor = "t:2:http://host".parse().unwrap();
        assert_eq!(d.message, "http://host");
        assert_eq!(d.timeout, None);
    }

    #[test]
    fn test_compact_form_errors() {
        assert!("t:2".parse::<BarrierDescriptor>().is_err());
        assert!("t:two:m".parse::<BarrierDescriptor>().is_err());
        assert!("t:2:m:-1".parse::<BarrierDescriptor>().is_err());
    }

    #[test]
    fn test_from_kwargs() {
        let kwargs = json!({"url": "x", "__barrier__": {"tag": "a", "count": 2, "message": "m"}});
        let d = BarrierDescriptor::from_kwargs(&kwargs).unwrap().unwrap();
        assert_eq!(d.tag, "a");
        assert_eq!(d.timeout, None);

        assert_eq!(BarrierDescriptor::from_kwargs(&json!({"url": "x"})).unwrap(), None);

        let err = BarrierDescriptor::from_kwargs(&json!({"__barrier__": {"tag": 1}})).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidValue);
    }

    #[test]
    fn test_should_run() {
        assert!(GateOutcome::NoBarrier.should_run());
        assert!(!GateOutcome::Failed {
            reason: String::new()
        }
        .should_run());
    }
}
