use clap::Subcommand;

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum StreakAction {
    /// Report lost days, freezes and what a recovery would cost
    Check,
    /// Cover the lost days with owned freezes
    UseFreezes,
    /// Buy the missing freezes with XP, then cover the lost days
    BuyFreezes,
    /// Give up on the current streak
    Reset,
}

pub fn run(action: StreakAction) -> CliResult {
    let ctx = Context::open()?;
    let validator = ctx.validator()?;

    match action {
        StreakAction::Check => {
            print_json(&validator.check_lost_days()?)?;
        }
        StreakAction::UseFreezes => {
            print_json(&validator.try_use_freezes_to_recover()?)?;
        }
        StreakAction::BuyFreezes => {
            let report = validator.try_buy_freezes_and_recover()?;
            print_json(&report)?;
            if let Some(failure) = report.failure {
                return Err(format!(
                    "purchase stopped at {}: {} (earlier steps were applied)",
                    failure.step, failure.error
                )
                .into());
            }
        }
        StreakAction::Reset => {
            print_json(&validator.try_reset_streak()?)?;
        }
    }
    Ok(())
}
