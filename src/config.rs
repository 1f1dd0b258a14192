use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration, loaded from the environment with documented
/// defaults. Durations are configured in seconds.
#[derive(Debug, Clone)]
pub struct Config {
    /// Max concurrent running containers per subject.
    pub max_per_user: usize,
    /// Idle timeout before a container is reaped.
    pub idle_limit: Duration,
    /// Absolute container lifetime.
    pub lifetime_limit: Duration,
    /// Watcher tick.
    pub check_interval: Duration,
    /// Reconciler period.
    pub reconcile_interval: Duration,
    /// Terminal registry rows older than this are purged.
    pub stopped_retention: Duration,
    /// Proxy round-trip / idle-socket timeout.
    pub proxy_timeout: Duration,
    /// How long in-flight requests may drain after a shutdown signal.
    pub shutdown_grace: Duration,
    /// Suffix used when constructing sandbox URLs.
    pub base_domain: String,
    /// Docker network sandboxes are attached to.
    pub network_name: String,
    /// Upload archive size cap in bytes.
    pub upload_max_size: usize,
    /// Whether the completion callback also reaps the container.
    pub complete_stops_container: bool,
    /// Directory for upload staging and build contexts.
    pub work_dir: PathBuf,
    /// Docker socket override; defaults to the platform socket.
    pub docker_socket: Option<String>,
    pub database_url: String,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            max_per_user: env_parse("MAX_PER_USER", 3),
            idle_limit: Duration::from_secs(env_parse("IDLE_LIMIT", 15 * 60)),
            lifetime_limit: Duration::from_secs(env_parse("LIFETIME_LIMIT", 2 * 60 * 60)),
            check_interval: Duration::from_secs(env_parse("CHECK_INTERVAL", 60)),
            reconcile_interval: Duration::from_secs(env_parse("RECONCILE_INTERVAL", 6 * 60 * 60)),
            stopped_retention: Duration::from_secs(env_parse("STOPPED_RETENTION", 24 * 60 * 60)),
            proxy_timeout: Duration::from_secs(env_parse("PROXY_TIMEOUT", 60)),
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE", 30)),
            base_domain: std::env::var("BASE_DOMAIN").unwrap_or_else(|_| "localhost".to_string()),
            network_name: std::env::var("NETWORK_NAME")
                .unwrap_or_else(|_| "training_network".to_string()),
            upload_max_size: env_parse("UPLOAD_MAX_SIZE", 50 * 1024 * 1024),
            complete_stops_container: env_parse("COMPLETE_STOPS_CONTAINER", false),
            work_dir: PathBuf::from(
                std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/dojo/work".to_string()),
            ),
            docker_socket: std::env::var("DOCKER_SOCKET").ok(),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://dojo.db?mode=rwc".to_string()),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "super-secret-key".to_string()),
        }
    }

    /// Public host of a sandbox, `<subdomain>.<base-domain>`.
    pub fn sandbox_host(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.base_domain)
    }

    /// Completion callback URL injected into sandbox containers.
    pub fn callback_url(&self, subdomain: &str) -> String {
        format!(
            "http://{}/api/containers/{}/complete",
            self.base_domain, subdomain
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::from_env();
        assert_eq!(config.max_per_user, 3);
        assert_eq!(config.idle_limit, Duration::from_secs(900));
        assert_eq!(config.lifetime_limit, Duration::from_secs(7200));
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.reconcile_interval, Duration::from_secs(6 * 60 * 60));
        assert_eq!(config.stopped_retention, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.proxy_timeout, Duration::from_secs(60));
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
        assert_eq!(config.network_name, "training_network");
        assert_eq!(config.upload_max_size, 50 * 1024 * 1024);
        assert!(!config.complete_stops_container);
    }

    #[test]
    fn sandbox_urls_use_base_domain() {
        let mut config = Config::from_env();
        config.base_domain = "train.example.com".to_string();
        assert_eq!(config.sandbox_host("abc"), "abc.train.example.com");
        assert_eq!(
            config.callback_url("abc"),
            "http://train.example.com/api/containers/abc/complete"
        );
    }
}
