use super::{types::Config, ConfigError};

/// Rejects settings a pipeline could never run with: no worker tokens, or
/// a chunking window that never closes.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.process.workers == 0 {
        return Err(ConfigError::Rejected {
            field: "process.workers",
            reason: "must be at least 1".to_string(),
        });
    }

    if config.chunking.window_ms == 0 {
        return Err(ConfigError::Rejected {
            field: "chunking.window_ms",
            reason: "must be at least 1 millisecond".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = Config::default();
        config.process.workers = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Rejected {
                field: "process.workers",
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "Config value process.workers must be at least 1"
        );
    }

    #[test]
    fn test_validate_zero_window_fails() {
        let mut config = Config::default();
        config.chunking.window_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Rejected {
                field: "chunking.window_ms",
                ..
            })
        ));
    }
}
