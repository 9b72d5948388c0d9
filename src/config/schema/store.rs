use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path for the durable store (`~` is expanded)
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    "~/.conclave/conclave.db".into()
}
fn default_max_connections() -> u32 {
    4
}

impl StoreConfig {
    /// Database path with a leading `~` resolved against the home directory.
    pub fn resolved_database_path(&self) -> String {
        shellexpand::tilde(&self.database_path).into_owned()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}
