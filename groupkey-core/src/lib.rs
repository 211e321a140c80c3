pub mod config;
pub mod core_group;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::Config;
pub use core_group::{FinishOutcome, Group, GroupContext, GroupError, GroupRegistry, GroupResult};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Ensure the main exports are accessible
        let _ = LogLevel::Info;
        let config = Config::default();
        assert_eq!(config.rotation.max_rounds, config::DEFAULT_ROTATION_ROUNDS);
    }
}
