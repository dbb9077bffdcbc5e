use thiserror::Error;

/// Structured errors for the subsystems whose failures callers branch on.
///
/// Internal code uses `anyhow::Result` with context chains; these types
/// travel inside `anyhow::Error` and are recovered by downcast where a
/// decision depends on the failure kind (HTTP status mapping, CLI
/// messages).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a bot named '{0}' already exists")]
    DuplicateName(String),

    #[error("bot {0} not found")]
    NotFound(i64),

    #[error("invalid bot spec: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to launch '{script}': {message}")]
    Launch { script: String, message: String },

    #[error("failed to terminate '{name}': {message}")]
    Terminate { name: String, message: String },

    #[error("remote session to {host} failed: {message}")]
    Session { host: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_displays_correctly() {
        let err = RegistryError::DuplicateName("worker1".into());
        assert!(err.to_string().contains("worker1"));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn runner_session_error_names_host() {
        let err = RunnerError::Session {
            host: "10.0.0.5".into(),
            message: "connection refused".into(),
        };
        assert!(err.to_string().contains("10.0.0.5"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn registry_error_survives_anyhow_round_trip() {
        // Callers branch on NotFound by downcasting out of anyhow chains.
        let err: anyhow::Error = RegistryError::NotFound(7).into();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::NotFound(7))
        ));
    }
}
