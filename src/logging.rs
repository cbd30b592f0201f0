//! Logger setup for applications and tests.
//!
//! The library itself only uses the `log` facade. `init` installs `env_logger`
//! with `RUST_LOG` as the filter (default `info`).

/// Install the default logger. Calling it again is harmless.
pub fn init() {
    init_with_default_filter("info");
}

pub fn init_with_default_filter(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_err()
    {
        log::debug!("logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_harmless() {
        super::init_with_default_filter("debug");
        super::init();
        log::info!("logger initialized");
    }
}
