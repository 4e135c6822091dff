use crate::error::{JunoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

pub const USER_NAME_KEY: &str = "userName";
pub const GEMINI_API_KEY: &str = "geminiApiKey";
pub const TAVILY_API_KEY: &str = "tavilyApiKey";

/// The three values collected by first-run setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_name: String,
    pub gemini_api_key: String,
    pub tavily_api_key: String,
}

impl Credentials {
    /// Trim every field and reject any that ends up empty
    pub fn new(
        user_name: impl AsRef<str>,
        gemini_api_key: impl AsRef<str>,
        tavily_api_key: impl AsRef<str>,
    ) -> Result<Self> {
        let user_name = user_name.as_ref().trim();
        let gemini_api_key = gemini_api_key.as_ref().trim();
        let tavily_api_key = tavily_api_key.as_ref().trim();

        if user_name.is_empty() {
            return Err(JunoError::InvalidCredentials(USER_NAME_KEY));
        }
        if gemini_api_key.is_empty() {
            return Err(JunoError::InvalidCredentials(GEMINI_API_KEY));
        }
        if tavily_api_key.is_empty() {
            return Err(JunoError::InvalidCredentials(TAVILY_API_KEY));
        }

        Ok(Self {
            user_name: user_name.to_string(),
            gemini_api_key: gemini_api_key.to_string(),
            tavily_api_key: tavily_api_key.to_string(),
        })
    }
}

/// Flat string key-value file holding the setup values
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(map)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.remove(key))
    }

    /// Credentials when all three keys are present and non-empty
    pub fn load(&self) -> Result<Option<Credentials>> {
        let map = self.read_map()?;
        let value = |key: &str| map.get(key).filter(|v| !v.trim().is_empty()).cloned();

        match (value(USER_NAME_KEY), value(GEMINI_API_KEY), value(TAVILY_API_KEY)) {
            (Some(user_name), Some(gemini_api_key), Some(tavily_api_key)) => Ok(Some(Credentials {
                user_name,
                gemini_api_key,
                tavily_api_key,
            })),
            _ => Ok(None),
        }
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        let mut map = self.read_map().unwrap_or_default();
        map.insert(USER_NAME_KEY.to_string(), credentials.user_name.clone());
        map.insert(GEMINI_API_KEY.to_string(), credentials.gemini_api_key.clone());
        map.insert(TAVILY_API_KEY.to_string(), credentials.tavily_api_key.clone());
        self.write_map(&map)
    }

    /// Remove the three setup keys, leaving anything else untouched
    pub fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut map = self.read_map().unwrap_or_default();
        for key in [USER_NAME_KEY, GEMINI_API_KEY, TAVILY_API_KEY] {
            map.remove(key);
        }
        self.write_map(&map)
    }
}
