//! Client options and their validation.
//!
//! Validation runs synchronously in [`crate::Client::new`], before any
//! process is spawned or socket opened, so misconfiguration surfaces as a
//! configuration error at construction time.

use agentwire_protocol::types::LogLevel;
use agentwire_protocol::{Error, Result};
use agentwire_transport::{ProcessCommand, ServerAddress};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable the auth token is forwarded through.
pub const AUTH_TOKEN_ENV: &str = "AGENT_AUTH_TOKEN";

/// Executable looked up on PATH when no explicit path is configured.
pub const DEFAULT_EXECUTABLE: &str = "agent";

/// How the client reaches the server.
#[derive(Debug, Clone)]
pub enum TransportTarget {
    /// Spawn the server and speak over its stdio.
    Stdio(ProcessCommand),
    /// Attach to an already-running server over TCP.
    Tcp(ServerAddress),
}

/// Options for [`crate::Client::new`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Path to the server executable; defaults to [`DEFAULT_EXECUTABLE`]
    /// resolved on PATH.
    pub executable: Option<PathBuf>,
    /// Extra arguments for the spawned server.
    pub args: Vec<String>,
    /// Working directory for the spawned server.
    pub cwd: Option<PathBuf>,
    /// Extra environment for the spawned server.
    pub env: HashMap<String, String>,
    /// Attach to a running server on this localhost port instead of
    /// spawning. Requires `use_stdio = false`.
    pub port: Option<u16>,
    /// Speak stdio to a spawned server. Defaults to true.
    pub use_stdio: bool,
    /// Attach to a running server at this URL instead of spawning.
    /// Mutually exclusive with `executable`, `port`, and auth options.
    pub server_url: Option<String>,
    /// Verbosity the spawned server logs at.
    pub log_level: Option<LogLevel>,
    /// Connect lazily on the first operation. Defaults to true.
    pub auto_start: bool,
    /// Restart the connection and resume sessions after a loss.
    /// Defaults to true.
    pub auto_restart: bool,
    /// Auth token forwarded to the spawned server via [`AUTH_TOKEN_ENV`].
    pub auth_token: Option<String>,
    /// Let the spawned server use its logged-in user credentials.
    pub use_logged_in_user: bool,
    /// Deadline for each request.
    pub request_timeout: Duration,
    /// How often the health check pings.
    pub ping_interval: Duration,
    /// Deadline for each health-check ping.
    pub ping_timeout: Duration,
    /// Restart attempts after a connection loss.
    pub restart_attempts: u32,
    /// Delay before the first restart attempt; doubles per attempt.
    pub restart_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            port: None,
            use_stdio: true,
            server_url: None,
            log_level: None,
            auto_start: true,
            auto_restart: true,
            auth_token: None,
            use_logged_in_user: false,
            request_timeout: Duration::from_secs(300),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
            restart_attempts: 3,
            restart_backoff: Duration::from_millis(100),
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("executable", &self.executable)
            .field("args", &self.args)
            .field("port", &self.port)
            .field("use_stdio", &self.use_stdio)
            .field("server_url", &self.server_url)
            .field("auto_start", &self.auto_start)
            .field("auto_restart", &self.auto_restart)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("use_logged_in_user", &self.use_logged_in_user)
            .finish_non_exhaustive()
    }
}

impl ClientOptions {
    /// Checks the option combination and resolves the transport target.
    pub fn resolve_target(&self) -> Result<TransportTarget> {
        if let Some(url) = &self.server_url {
            if self.executable.is_some() {
                return Err(Error::configuration(
                    "server_url and executable are mutually exclusive",
                ));
            }
            if self.port.is_some() {
                return Err(Error::configuration(
                    "server_url and port are mutually exclusive",
                ));
            }
            if self.auth_token.is_some() {
                return Err(Error::configuration(
                    "server_url and auth_token are mutually exclusive; \
                     the attached server manages its own credentials",
                ));
            }
            if self.use_logged_in_user {
                return Err(Error::configuration(
                    "server_url and use_logged_in_user are mutually exclusive",
                ));
            }
            let address = ServerAddress::parse(url).map_err(agentwire_protocol::Error::from)?;
            return Ok(TransportTarget::Tcp(address));
        }

        if let Some(port) = self.port {
            if self.use_stdio {
                return Err(Error::configuration(
                    "port requires use_stdio = false; stdio and TCP cannot both be selected",
                ));
            }
            if port == 0 {
                return Err(Error::configuration("port must be in 1-65535"));
            }
            return Ok(TransportTarget::Tcp(ServerAddress::localhost(port)));
        }

        if !self.use_stdio {
            return Err(Error::configuration(
                "use_stdio = false requires either port or server_url",
            ));
        }

        if self.auth_token.is_some() && self.use_logged_in_user {
            return Err(Error::configuration(
                "auth_token and use_logged_in_user are mutually exclusive",
            ));
        }

        let mut command = ProcessCommand::new(
            self.executable
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE)),
        );
        command.args.push("--stdio".to_string());
        if let Some(level) = self.log_level {
            command.args.push("--log-level".to_string());
            command.args.push(
                serde_json::to_value(level)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "info".to_string()),
            );
        }
        command.args.extend(self.args.iter().cloned());
        command.cwd = self.cwd.clone();
        command.env = self.env.clone();
        if let Some(token) = &self.auth_token {
            command.env.insert(AUTH_TOKEN_ENV.to_string(), token.clone());
        }
        Ok(TransportTarget::Stdio(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_spawn_over_stdio() {
        let options = ClientOptions::default();
        match options.resolve_target().unwrap() {
            TransportTarget::Stdio(cmd) => {
                assert_eq!(cmd.program, PathBuf::from(DEFAULT_EXECUTABLE));
                assert_eq!(cmd.args, vec!["--stdio".to_string()]);
            }
            other => panic!("expected stdio target, got {other:?}"),
        }
    }

    #[test]
    fn server_url_attaches_over_tcp() {
        let options = ClientOptions {
            server_url: Some("http://localhost:8080".to_string()),
            ..Default::default()
        };
        match options.resolve_target().unwrap() {
            TransportTarget::Tcp(addr) => assert_eq!(addr.authority(), "localhost:8080"),
            other => panic!("expected tcp target, got {other:?}"),
        }
    }

    #[test]
    fn bare_port_url_means_localhost() {
        let options = ClientOptions {
            server_url: Some("9000".to_string()),
            ..Default::default()
        };
        match options.resolve_target().unwrap() {
            TransportTarget::Tcp(addr) => assert_eq!(addr.authority(), "localhost:9000"),
            other => panic!("expected tcp target, got {other:?}"),
        }
    }

    #[test]
    fn server_url_conflicts_with_executable() {
        let options = ClientOptions {
            server_url: Some("8080".to_string()),
            executable: Some(PathBuf::from("/usr/bin/agent")),
            ..Default::default()
        };
        assert!(options.resolve_target().is_err());
    }

    #[test]
    fn server_url_conflicts_with_auth_options() {
        let with_token = ClientOptions {
            server_url: Some("8080".to_string()),
            auth_token: Some("tok".to_string()),
            ..Default::default()
        };
        assert!(with_token.resolve_target().is_err());

        let with_user = ClientOptions {
            server_url: Some("8080".to_string()),
            use_logged_in_user: true,
            ..Default::default()
        };
        assert!(with_user.resolve_target().is_err());
    }

    #[test]
    fn port_requires_non_stdio() {
        let conflicting = ClientOptions {
            port: Some(8080),
            ..Default::default()
        };
        assert!(conflicting.resolve_target().is_err());

        let valid = ClientOptions {
            port: Some(8080),
            use_stdio: false,
            ..Default::default()
        };
        assert!(matches!(
            valid.resolve_target().unwrap(),
            TransportTarget::Tcp(_)
        ));
    }

    #[test]
    fn non_stdio_without_target_is_rejected() {
        let options = ClientOptions {
            use_stdio: false,
            ..Default::default()
        };
        assert!(options.resolve_target().is_err());
    }

    #[test]
    fn invalid_url_is_a_configuration_error() {
        let options = ClientOptions {
            server_url: Some("not a url".to_string()),
            ..Default::default()
        };
        let err = options.resolve_target().unwrap_err();
        assert_eq!(err.kind, agentwire_protocol::ErrorKind::Configuration);
    }

    #[test]
    fn auth_token_lands_in_child_env() {
        let options = ClientOptions {
            auth_token: Some("secret".to_string()),
            log_level: Some(LogLevel::Debug),
            ..Default::default()
        };
        match options.resolve_target().unwrap() {
            TransportTarget::Stdio(cmd) => {
                assert_eq!(cmd.env.get(AUTH_TOKEN_ENV).map(String::as_str), Some("secret"));
                assert!(cmd.args.contains(&"--log-level".to_string()));
                assert!(cmd.args.contains(&"debug".to_string()));
            }
            other => panic!("expected stdio target, got {other:?}"),
        }
    }

    #[test]
    fn token_and_logged_in_user_conflict() {
        let options = ClientOptions {
            auth_token: Some("tok".to_string()),
            use_logged_in_user: true,
            ..Default::default()
        };
        assert!(options.resolve_target().is_err());
    }
}
