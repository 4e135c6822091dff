//! Application-wide state passed explicitly to the parts that need it.
//!
//! Holds the loaded configuration, the current theme and the first-run
//! credentials. Loaded once at startup with [`AppContext::load`]; cleared with
//! [`AppContext::reset`].

use crate::config::{Config, Theme};
use crate::error::Result;
use crate::storage::{CredentialStore, Credentials};

pub struct AppContext {
    config: Config,
    theme: Theme,
    credentials: Option<Credentials>,
    store: CredentialStore,
}

impl AppContext {
    /// Build the context from configuration, reading stored credentials.
    ///
    /// A failed read is logged and treated as "setup not completed".
    pub fn load(config: Config) -> Self {
        let store = CredentialStore::new(config.credentials_path());
        let credentials = match store.load() {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load user data, setup required");
                None
            }
        };

        Self {
            theme: config.ui.theme,
            config,
            credentials,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.theme
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn user_name(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.user_name.as_str())
    }

    pub fn gemini_api_key(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.gemini_api_key.as_str())
    }

    /// Whether the first-run setup flow must be shown
    pub fn needs_setup(&self) -> bool {
        self.credentials.is_none()
    }

    pub fn complete_setup(&mut self, credentials: Credentials) -> Result<()> {
        self.store.save(&credentials)?;
        tracing::debug!(user = %credentials.user_name, "setup completed");
        self.credentials = Some(credentials);
        Ok(())
    }

    /// Forget stored credentials; the next start shows setup again
    pub fn reset(&mut self) -> Result<()> {
        self.store.clear()?;
        self.credentials = None;
        Ok(())
    }
}
