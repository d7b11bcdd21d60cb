//! Configuration management for Taskgate services

use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which service a process hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Gateway,
    Tasks,
    Users,
}

impl ServiceKind {
    pub fn default_port(self) -> u16 {
        match self {
            ServiceKind::Gateway => 8080,
            ServiceKind::Users => 8081,
            ServiceKind::Tasks => 8082,
        }
    }

    pub fn default_protected_prefixes(self) -> &'static str {
        match self {
            ServiceKind::Gateway => "/user/users,/tasks",
            ServiceKind::Tasks => "/api/v1/tasks",
            ServiceKind::Users => "/api/v1/users",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Gateway => "gateway",
            ServiceKind::Tasks => "task-service",
            ServiceKind::Users => "user-service",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceKind,
    /// HTTP server host
    pub http_host: String,
    /// HTTP server port
    pub http_port: u16,
    /// JWT configuration
    pub jwt: JwtConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Path prefixes that require a bearer token
    pub protected_prefixes: Vec<String>,
    /// Gateway upstreams
    pub gateway: GatewayConfig,
    /// Base URL used in links sent by email
    pub public_url: String,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Shared HMAC secret. Only the gateway may run without one.
    pub secret: Option<String>,
    pub issuer: String,
    pub access_token_ttl_secs: i64,
}

/// A limit of `requests` admissions per rolling `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub requests: usize,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(requests: usize, window_secs: u64) -> Self {
        Self {
            requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether the pipeline throttles inbound calls
    pub enabled: bool,
    /// Inbound calls per client IP
    pub inbound: RateLimitRule,
    /// Registration attempts per email
    pub register: RateLimitRule,
    /// Login attempts per email
    pub login: RateLimitRule,
    /// Key inbound calls by `X-Real-IP` before the socket address. Set on
    /// services that only the gateway can reach.
    pub trust_forwarded_ip: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inbound: RateLimitRule::new(10, 60),
            register: RateLimitRule::new(5, 60),
            login: RateLimitRule::new(10, 60),
            trust_forwarded_ip: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub user_service_url: String,
    pub task_service_url: String,
    /// Upstream request timeout
    pub upstream_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            user_service_url: "http://user-service:8081/api/v1".to_string(),
            task_service_url: "http://task-service:8082/api/v1/tasks".to_string(),
            upstream_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// "pretty" or "json"
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: "pretty".to_string(),
            metrics_enabled: false,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        _ => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
        .unwrap_or(default)
}

fn rule_from_env(prefix: &str, default: RateLimitRule) -> Result<RateLimitRule> {
    let requests: usize = env_or(&format!("{}_REQUESTS", prefix), default.requests)?;
    let window_secs: u64 = env_or(&format!("{}_WINDOW_SECS", prefix), default.window.as_secs())?;
    if requests == 0 || window_secs == 0 {
        bail!("{}_REQUESTS and {}_WINDOW_SECS must be positive", prefix, prefix);
    }
    Ok(RateLimitRule::new(requests, window_secs))
}

/// Split a comma-separated prefix list, dropping blanks
pub fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env(service: ServiceKind) -> Result<Self> {
        let secret = env::var("JWT_SECRET").ok().filter(|s| !s.is_empty());
        if secret.is_none() && service != ServiceKind::Gateway {
            bail!("JWT_SECRET is required for the {}", service.name());
        }

        let defaults = RateLimitConfig::default();
        let gateway_defaults = GatewayConfig::default();

        Ok(Self {
            service,
            http_host: env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_or("HTTP_PORT", service.default_port()).context("Invalid HTTP_PORT")?,
            jwt: JwtConfig {
                secret,
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "taskgate".to_string()),
                access_token_ttl_secs: env_or("JWT_ACCESS_TOKEN_TTL_SECS", 3600)?,
            },
            rate_limit: RateLimitConfig {
                enabled: env_flag("RATE_LIMIT_ENABLED", true),
                inbound: rule_from_env("RATE_LIMIT", defaults.inbound)?,
                register: rule_from_env("REGISTER_RATE_LIMIT", defaults.register)?,
                login: rule_from_env("LOGIN_RATE_LIMIT", defaults.login)?,
                trust_forwarded_ip: env_flag(
                    "TRUST_FORWARDED_IP",
                    service != ServiceKind::Gateway,
                ),
            },
            protected_prefixes: parse_prefixes(
                &env::var("PROTECTED_PATH_PREFIXES")
                    .unwrap_or_else(|_| service.default_protected_prefixes().to_string()),
            ),
            gateway: GatewayConfig {
                user_service_url: env::var("USER_SERVICE_URL")
                    .unwrap_or(gateway_defaults.user_service_url),
                task_service_url: env::var("TASK_SERVICE_URL")
                    .unwrap_or(gateway_defaults.task_service_url),
                upstream_timeout_secs: env_or(
                    "UPSTREAM_TIMEOUT_SECS",
                    gateway_defaults.upstream_timeout_secs,
                )?,
            },
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            telemetry: TelemetryConfig {
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
                metrics_enabled: env_flag("METRICS_ENABLED", false),
            },
        })
    }

    /// Get HTTP server address
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}
