use std::fmt;

use rendezvous_error::{ClientError, RendezvousResult};
use url::Url;

/// Порт брокера по умолчанию.
pub const DEFAULT_PORT: u16 = 6379;

/// Схемы, которые понимает [`BrokerEndpoint::parse`].
const SCHEMES: [&str; 3] = ["redis", "rendezvous", "tcp"];

/// Адрес сетевого брокера.
///
/// Формат: `redis://[[user]:password@]host[:port][/db]`. Схемы
/// `rendezvous://` и `tcp://` являются синонимами.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BrokerEndpoint {
    pub fn parse(raw: &str) -> RendezvousResult<Self> {
        let invalid = |reason: String| ClientError::InvalidEndpoint {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        if !SCHEMES.contains(&url.scheme()) {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())).into());
        }

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(invalid("missing host".to_string()).into()),
        };

        let db = match url.path().trim_start_matches('/') {
            "" => 0,
            path => path
                .parse::<u32>()
                .map_err(|_| invalid(format!("invalid database index '{path}'")))?,
        };

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let password = url.password().map(str::to_string);

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            db,
            username,
            password,
        })
    }

    /// `host:port` для `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Пароль никогда не попадает в логи.
impl fmt::Debug for BrokerEndpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BrokerEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[cfg(test)]
mod tests {
    use rendezvous_error::StatusCode;

    use super::*;

    #[test]
    fn test_parse_full_url() {
        let ep = BrokerEndpoint::parse("redis://:s3cret@broker.local:6380/2").unwrap();
        assert_eq!(ep.host, "broker.local");
        assert_eq!(ep.port, 6380);
        assert_eq!(ep.db, 2);
        assert_eq!(ep.username, None);
        assert_eq!(ep.password.as_deref(), Some("s3cret"));
        assert_eq!(ep.address(), "broker.local:6380");
    }

    #[test]
    fn test_parse_defaults_and_aliases() {
        let ep = BrokerEndpoint::parse("redis://localhost").unwrap();
        assert_eq!((ep.port, ep.db), (DEFAULT_PORT, 0));

        let ep = BrokerEndpoint::parse("tcp://10.0.0.5:7000").unwrap();
        assert_eq!(ep.address(), "10.0.0.5:7000");

        let ep = BrokerEndpoint::parse("rendezvous://worker:pw@h/1").unwrap();
        assert_eq!(ep.username.as_deref(), Some("worker"));
        assert_eq!(ep.db, 1);
    }

    /// Тест проверяет отказ для чужой схемы и некорректного номера базы.
    #[test]
    fn test_parse_rejects_bad_input() {
        for raw in ["http://localhost", "redis://localhost/abc", "not a url"] {
            let err = BrokerEndpoint::parse(raw).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::InvalidArgs, "{raw}");
        }
    }

    #[test]
    fn test_debug_hides_password() {
        let ep = BrokerEndpoint::parse("redis://:topsecret@h").unwrap();
        let dbg = format!("{ep:?}");
        assert!(!dbg.contains("topsecret"));
        assert!(dbg.contains("***"));
    }
}
