use clap::Subcommand;
use studioflow_core::UserTimezone;

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Show timezone, goal, XP, freezes and streak
    Show,
    /// Change profile settings
    Set {
        /// UTC offset such as "+09:00", "-0530" or "UTC"
        #[arg(long)]
        timezone: Option<UserTimezone>,
        /// Daily goal in minutes
        #[arg(long)]
        goal: Option<u32>,
    },
    /// List recently completed sessions
    Sessions {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

pub fn run(action: ProfileAction) -> CliResult {
    let ctx = Context::open()?;
    let profile = ctx.profile()?;

    match action {
        ProfileAction::Show => {
            print_json(&profile)?;
        }
        ProfileAction::Set { timezone, goal } => {
            if goal == Some(0) {
                return Err("daily goal must be at least one minute".into());
            }
            let updated = ctx
                .db
                .update_profile_settings(&profile.user_id, timezone, goal)?;
            print_json(&updated)?;
        }
        ProfileAction::Sessions { limit } => {
            print_json(&ctx.db.recent_sessions(&profile.user_id, limit)?)?;
        }
    }
    Ok(())
}
