use super::Config;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("CONCLAVE_TOKEN_BUDGET")
            && let Ok(budget) = raw.parse::<u64>()
            && budget > 0
        {
            self.window.token_budget = budget;
        }

        if let Ok(raw) = std::env::var("CONCLAVE_WARN_THRESHOLD")
            && let Ok(threshold) = raw.parse::<f64>()
            && threshold > 0.0
            && threshold <= 1.0
        {
            self.window.warn_threshold = threshold;
        }

        if let Ok(path) = std::env::var("CONCLAVE_DATABASE_PATH")
            && !path.is_empty()
        {
            self.store.database_path = path;
        }

        if let Ok(level) = std::env::var("CONCLAVE_LOG_LEVEL")
            && !level.is_empty()
        {
            self.observability.log_level = level;
        }
    }
}
