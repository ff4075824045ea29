use std::env;
use std::str::FromStr;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read an env var, treating empty values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read and parse an env var. Unparseable values are logged and ignored.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_opt(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    // A second init (tests, embedding) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_reads_typed_values() {
        env::set_var("PULSE_CORE_TEST_U32", "42");
        env::set_var("PULSE_CORE_TEST_BAD", "forty-two");
        env::set_var("PULSE_CORE_TEST_EMPTY", "");

        assert_eq!(env_parse::<u32>("PULSE_CORE_TEST_U32"), Some(42));
        assert_eq!(env_parse::<u32>("PULSE_CORE_TEST_BAD"), None);
        assert_eq!(env_opt("PULSE_CORE_TEST_EMPTY"), None);
        assert_eq!(env_opt("PULSE_CORE_TEST_MISSING"), None);
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing("warn");
        init_tracing("debug");
    }
}
