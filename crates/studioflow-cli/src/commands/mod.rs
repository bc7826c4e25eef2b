pub mod config;
pub mod profile;
pub mod session;
pub mod streak;
pub mod trophies;

use std::error::Error;
use std::sync::Arc;

use serde::Serialize;
use studioflow_core::storage::{
    Clock, ConfigIdentity, Database, IdentityProvider, Profile, SystemClock,
};
use studioflow_core::{Config, CoreError, FreezeEconomy, StreakContinuityValidator};

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Everything a command needs: config, database, clock and identity.
pub struct Context {
    pub config: Config,
    pub db: Arc<Database>,
    pub clock: Arc<dyn Clock>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Context {
    pub fn open() -> CliResult<Self> {
        let config = Config::load()?;
        let db = Arc::new(Database::open()?);
        let identity = Arc::new(ConfigIdentity::from_config(&config.profile));
        Ok(Self {
            config,
            db,
            clock: Arc::new(SystemClock),
            identity,
        })
    }

    /// The signed-in user, failing with `NotAuthenticated` otherwise.
    pub fn user_id(&self) -> Result<String, CoreError> {
        self.identity
            .current_user()
            .ok_or(CoreError::NotAuthenticated)
    }

    /// The signed-in user's profile, created from config defaults on first use.
    pub fn profile(&self) -> CliResult<Profile> {
        let user_id = self.user_id()?;
        Ok(self.db.ensure_profile(&user_id, &self.config.profile)?)
    }

    pub fn validator(&self) -> CliResult<StreakContinuityValidator> {
        let profile = self.profile()?;
        Ok(StreakContinuityValidator::new(
            profile.user_id,
            self.db.clone(),
            self.clock.clone(),
            FreezeEconomy::new(&self.config.freeze),
        ))
    }
}

pub fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
