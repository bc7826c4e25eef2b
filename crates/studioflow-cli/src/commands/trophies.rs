use clap::Subcommand;
use serde::Serialize;
use studioflow_core::storage::CelebrationStore;
use studioflow_core::TrophyId;

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum TrophyAction {
    /// List the trophy catalog with unlock state
    List,
}

#[derive(Serialize)]
struct TrophyRow {
    id: TrophyId,
    title: &'static str,
    description: &'static str,
    unlocked_at: Option<String>,
    shown: bool,
}

pub fn run(action: TrophyAction) -> CliResult {
    let ctx = Context::open()?;
    let user_id = ctx.user_id()?;

    match action {
        TrophyAction::List => {
            let unlocks = ctx.db.trophy_unlocks(&user_id)?;
            let rows: Vec<TrophyRow> = TrophyId::ALL
                .into_iter()
                .map(|id| {
                    let unlock = unlocks.iter().find(|u| u.trophy == id);
                    TrophyRow {
                        id,
                        title: id.title(),
                        description: id.description(),
                        unlocked_at: unlock.map(|u| u.unlocked_at.to_rfc3339()),
                        shown: unlock.is_some_and(|u| u.shown_at.is_some()),
                    }
                })
                .collect();
            print_json(&rows)?;
        }
    }
    Ok(())
}
