use conclave::Config;

pub fn render_status(config: &Config) -> String {
    [
        format!("◆ conclave {}", env!("CARGO_PKG_VERSION")),
        String::new(),
        format!("Config:        {}", config.config_path.display()),
        format!("Workspace:     {}", config.workspace_dir.display()),
        format!("Database:      {}", config.store.resolved_database_path()),
        format!("Connections:   {}", config.store.max_connections),
        String::new(),
        format!("Token budget:  {}", config.window.token_budget),
        format!("Warn at:       {:.0}%", config.window.warn_threshold * 100.0),
        format!(
            "Idle flush:    {}",
            if config.window.flush_idle_secs == 0 {
                "disabled".to_string()
            } else {
                format!("{}s", config.window.flush_idle_secs)
            }
        ),
        format!(
            "Feedback:      {}",
            if config.dispatcher.notify_action_feedback {
                "notify client"
            } else {
                "silent"
            }
        ),
        format!("Log level:     {}", config.observability.log_level),
    ]
    .join("\n")
}
