use env_logger::Env;

/// Initialize logging using env_logger.
/// Filtering follows `RUST_LOG` and defaults to `info`,
/// e.g. `RUST_LOG=linkd_core=debug linkd list-groups`.
pub fn init_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}
