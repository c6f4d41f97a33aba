//! A propagation target: one tenant database and how to reach it.

use std::fmt;

use sqlx::postgres::PgConnectOptions;

/// Connection settings shared by every target of a job.
///
/// Credentials are resolved once at job start; workers only ever see the
/// resolved values.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// One tenant database receiving the script.
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    password: String,
}

impl Target {
    pub fn new(settings: &ConnectSettings, database: impl Into<String>) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            database: database.into(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }

    /// Driver options for a direct connection to this tenant.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
    }
}

// The password never appears in logs or progress events.
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
