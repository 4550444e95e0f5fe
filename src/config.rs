/*
 * Responsibility
 * - 環境変数や設定の読み込み (identity 設定、scope マップ、discovery モードなど)
 * - 設定値のバリデーション (不足なら起動失敗)
 * - 読み込みは起動時の一回のみ。以後 immutable (ホットリロードはしない)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Scope resolution mode.
///
/// `Default` reproduces the historical gateway behavior: every path resolves
/// to the default scope set, ignoring the mapping table. It exists so the old
/// deployment shape keeps working; `Prefix` is what new deployments should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMode {
    Prefix,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Static,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryProviderKind {
    Configured,
    Dns,
}

/// One path-prefix → scope-list entry of the routing scope table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ScopeMapEntry {
    pub path: String,
    pub scopes: Vec<String>,
}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub cors_allowed_origins: Vec<String>,

    // Identity provider (confidential client) settings.
    pub auth_audience: Option<String>,
    pub auth_authority: String,
    pub auth_metadata_address: String,
    pub auth_client_id: String,
    pub auth_client_secret: String,
    pub auth_exp_leeway_seconds: u64,

    pub scope_mode: ScopeMode,
    pub scope_map: Vec<ScopeMapEntry>,
    pub default_scopes: Vec<String>,

    pub discovery_mode: DiscoveryMode,
    pub discovery_provider: DiscoveryProviderKind,
    pub discovery_endpoints: Vec<(String, u16)>,
    pub discovery_dns_name: Option<String>,
    pub discovery_poll_interval: Duration,

    // `None` selects the in-process cache.
    pub cache_connection: Option<String>,
    pub cache_sliding_expiration: Duration,

    // Per-request deadline for exchange, discovery and forwarding.
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_env();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let auth_audience = std::env::var("AUTH_AUDIENCE").ok().filter(|s| !s.is_empty());

        let auth_authority = std::env::var("AUTH_AUTHORITY")
            .map_err(|_| ConfigError::Missing("AUTH_AUTHORITY"))?;
        Url::parse(&auth_authority).map_err(|_| ConfigError::Invalid("AUTH_AUTHORITY"))?;

        // Defaults to the OIDC discovery document under the authority.
        let auth_metadata_address = match std::env::var("AUTH_METADATA_ADDRESS") {
            Ok(v) if !v.is_empty() => {
                Url::parse(&v).map_err(|_| ConfigError::Invalid("AUTH_METADATA_ADDRESS"))?;
                v
            }
            _ => format!(
                "{}/.well-known/openid-configuration",
                auth_authority.trim_end_matches('/')
            ),
        };

        let auth_client_id =
            std::env::var("AUTH_CLIENT_ID").map_err(|_| ConfigError::Missing("AUTH_CLIENT_ID"))?;
        let auth_client_secret = std::env::var("AUTH_CLIENT_SECRET")
            .map_err(|_| ConfigError::Missing("AUTH_CLIENT_SECRET"))?;

        let auth_exp_leeway_seconds = std::env::var("AUTH_EXP_LEEWAY_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);

        let scope_mode = match std::env::var("SCOPE_MODE")
            .unwrap_or_else(|_| "prefix".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "prefix" => ScopeMode::Prefix,
            "default" => ScopeMode::Default,
            _ => return Err(ConfigError::Invalid("SCOPE_MODE")),
        };

        let scope_map = match std::env::var("SCOPE_MAP") {
            Ok(raw) if !raw.is_empty() => {
                parse_scope_map(&raw).map_err(|_| ConfigError::Invalid("SCOPE_MAP"))?
            }
            _ => Vec::new(),
        };

        let default_scopes = std::env::var("DEFAULT_SCOPES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        // `default` mode without a default scope set can never resolve anything.
        if scope_mode == ScopeMode::Default && default_scopes.is_empty() {
            return Err(ConfigError::Missing("DEFAULT_SCOPES"));
        }
        if scope_mode == ScopeMode::Prefix && scope_map.is_empty() && default_scopes.is_empty() {
            return Err(ConfigError::Missing("SCOPE_MAP"));
        }

        let discovery_mode = match std::env::var("DISCOVERY_MODE")
            .unwrap_or_else(|_| "static".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "static" => DiscoveryMode::Static,
            "polling" => DiscoveryMode::Polling,
            _ => return Err(ConfigError::Invalid("DISCOVERY_MODE")),
        };

        let discovery_provider = match std::env::var("DISCOVERY_PROVIDER")
            .unwrap_or_else(|_| "configured".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "configured" => DiscoveryProviderKind::Configured,
            "dns" => DiscoveryProviderKind::Dns,
            _ => return Err(ConfigError::Invalid("DISCOVERY_PROVIDER")),
        };

        let discovery_endpoints = std::env::var("DISCOVERY_ENDPOINTS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_host_port)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ConfigError::Invalid("DISCOVERY_ENDPOINTS"))?;

        let discovery_dns_name = std::env::var("DISCOVERY_DNS_NAME").ok().filter(|s| !s.is_empty());

        match discovery_provider {
            DiscoveryProviderKind::Configured if discovery_endpoints.is_empty() => {
                return Err(ConfigError::Missing("DISCOVERY_ENDPOINTS"));
            }
            DiscoveryProviderKind::Dns if discovery_dns_name.is_none() => {
                return Err(ConfigError::Missing("DISCOVERY_DNS_NAME"));
            }
            _ => {}
        }

        let discovery_poll_interval = std::env::var("DISCOVERY_POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(15));

        let cache_connection = std::env::var("CACHE_CONNECTION").ok().filter(|s| !s.is_empty());

        let cache_sliding_expiration = std::env::var("CACHE_SLIDING_EXPIRATION_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30 * 60));

        let upstream_timeout = std::env::var("UPSTREAM_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            addr,
            app_env,
            cors_allowed_origins,
            auth_audience,
            auth_authority,
            auth_metadata_address,
            auth_client_id,
            auth_client_secret,
            auth_exp_leeway_seconds,
            scope_mode,
            scope_map,
            default_scopes,
            discovery_mode,
            discovery_provider,
            discovery_endpoints,
            discovery_dns_name,
            discovery_poll_interval,
            cache_connection,
            cache_sliding_expiration,
            upstream_timeout,
        })
    }
}

/// Parse the scope table from its JSON form:
/// `[{"path": "/api/orders", "scopes": ["api://orders/.default"]}, ...]`
pub fn parse_scope_map(raw: &str) -> Result<Vec<ScopeMapEntry>, serde_json::Error> {
    serde_json::from_str(raw)
}

fn parse_host_port(s: &str) -> Result<(String, u16), ()> {
    let (host, port) = s.rsplit_once(':').ok_or(())?;
    if host.is_empty() {
        return Err(());
    }
    let port: u16 = port.parse().map_err(|_| ())?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scope_map_json() {
        let raw = r#"[
            {"path": "/api/orders", "scopes": ["api://orders/.default"]},
            {"path": "/api/users", "scopes": ["api://users/read", "api://users/write"]}
        ]"#;

        let entries = parse_scope_map(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/api/orders");
        assert_eq!(entries[1].scopes.len(), 2);
    }

    #[test]
    fn rejects_malformed_scope_map() {
        assert!(parse_scope_map("{\"path\": 1}").is_err());
        assert!(parse_scope_map("not json").is_err());
    }

    #[test]
    fn parses_host_port_pairs() {
        assert_eq!(
            parse_host_port("orders.internal:8080"),
            Ok(("orders.internal".to_string(), 8080))
        );
        assert!(parse_host_port("no-port").is_err());
        assert!(parse_host_port(":8080").is_err());
        assert!(parse_host_port("host:notaport").is_err());
    }

    // `from_env` tests mutate process-wide environment, so they serialize on
    // one lock and reset every recognized key before applying their own.

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "PORT",
        "APP_ENV",
        "CORS_ALLOWED_ORIGINS",
        "AUTH_AUDIENCE",
        "AUTH_AUTHORITY",
        "AUTH_METADATA_ADDRESS",
        "AUTH_CLIENT_ID",
        "AUTH_CLIENT_SECRET",
        "AUTH_EXP_LEEWAY_SECONDS",
        "SCOPE_MODE",
        "SCOPE_MAP",
        "DEFAULT_SCOPES",
        "DISCOVERY_MODE",
        "DISCOVERY_PROVIDER",
        "DISCOVERY_ENDPOINTS",
        "DISCOVERY_DNS_NAME",
        "DISCOVERY_POLL_INTERVAL_SECONDS",
        "CACHE_CONNECTION",
        "CACHE_SLIDING_EXPIRATION_SECONDS",
        "UPSTREAM_TIMEOUT_SECONDS",
    ];

    fn scoped_env(vars: &[(&str, &str)]) -> std::sync::MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
        for (key, value) in vars {
            unsafe { std::env::set_var(key, value) };
        }
        guard
    }

    /// Smallest environment that passes validation.
    const BASE_ENV: &[(&str, &str)] = &[
        ("AUTH_AUTHORITY", "https://login.example.com/tenant"),
        ("AUTH_CLIENT_ID", "gateway-client"),
        ("AUTH_CLIENT_SECRET", "gateway-secret"),
        (
            "SCOPE_MAP",
            r#"[{"path":"/api/test","scopes":["api://test/.default"]}]"#,
        ),
        ("DISCOVERY_ENDPOINTS", "orders.internal:8080"),
    ];

    #[test]
    fn from_env_accepts_a_minimal_environment() {
        let _guard = scoped_env(BASE_ENV);

        let config = Config::from_env().unwrap();

        assert_eq!(config.auth_client_id, "gateway-client");
        assert_eq!(config.scope_mode, ScopeMode::Prefix);
        assert_eq!(
            config.auth_metadata_address,
            "https://login.example.com/tenant/.well-known/openid-configuration"
        );
        assert_eq!(
            config.discovery_endpoints,
            vec![("orders.internal".to_string(), 8080)]
        );
        assert!(config.cache_connection.is_none());
    }

    #[test]
    fn missing_client_id_fails_startup() {
        let mut vars: Vec<(&str, &str)> = BASE_ENV.to_vec();
        vars.retain(|(k, _)| *k != "AUTH_CLIENT_ID");
        let _guard = scoped_env(&vars);

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("AUTH_CLIENT_ID"))
        ));
    }

    #[test]
    fn default_mode_requires_default_scopes() {
        let mut vars: Vec<(&str, &str)> = BASE_ENV.to_vec();
        vars.push(("SCOPE_MODE", "default"));
        let _guard = scoped_env(&vars);

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DEFAULT_SCOPES"))
        ));
    }

    #[test]
    fn dns_provider_requires_a_service_name() {
        let mut vars: Vec<(&str, &str)> = BASE_ENV.to_vec();
        vars.push(("DISCOVERY_PROVIDER", "dns"));
        let _guard = scoped_env(&vars);

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DISCOVERY_DNS_NAME"))
        ));
    }

    #[test]
    fn invalid_authority_url_is_rejected() {
        let mut vars: Vec<(&str, &str)> = BASE_ENV.to_vec();
        vars.retain(|(k, _)| *k != "AUTH_AUTHORITY");
        vars.push(("AUTH_AUTHORITY", "not a url"));
        let _guard = scoped_env(&vars);

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("AUTH_AUTHORITY"))
        ));
    }
}
