//! Facilities for reading host configuration values
use std::error::Error;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::*;

use super::codepage::{self, CodePage, CP_WINDOWS_1252, CP_WINUNICODE};
use super::error::PropError;
use super::error::PropErrorEnum::*;
use super::format::{DEFAULT_OS_VERSION, LOCALE_SYSTEM_DEFAULT};

/// Properties of the host that property sets are read and written on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// The narrow code page callers' `VT_LPSTR` bytes are in
    pub code_page: CodePage,
    /// The locale given to new property sets
    pub locale: u32,
    /// The originator OS written to new property set streams
    pub originator_os: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            code_page: CP_WINDOWS_1252,
            locale: LOCALE_SYSTEM_DEFAULT,
            originator_os: DEFAULT_OS_VERSION,
        }
    }
}

impl HostConfig {
    /// Loads the configuration from `propset.toml` and `PROPSET_` environment variables, with
    /// defaults for anything missing
    pub fn load() -> Result<Self, Box<dyn Error>> {
        let config: Self = Figment::new()
            .merge(Toml::file("propset.toml"))
            .merge(Env::prefixed("PROPSET_"))
            .extract()
            .map_err(|err| {
                error!("Failed to validate configuration: {}", err);
                err
            })?;
        config.validate()?;
        Ok(config)
    }

    /// The host code page must be a narrow code page from the table
    pub fn validate(&self) -> Result<(), PropError> {
        if self.code_page == CP_WINUNICODE || !codepage::is_supported(self.code_page) {
            error!("Unsupported host code page {}", self.code_page);
            return Err(UnsupportedCodePage(self.code_page).into());
        }
        Ok(())
    }
}
