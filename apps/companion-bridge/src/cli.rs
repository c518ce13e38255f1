use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use companion_proto::{CompanionData, HabitSummary, StreakStats};
use companion_sync::{
    CompanionBridge, FilePreferences, PhonePublisher, PreferenceStore, SnapshotCache,
};
use companion_transport::LocalLink;
use tracing::{info, warn};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "companion-bridge")]
#[command(about = "Phone/wearable companion sync bridge tools")]
pub struct Cli {
    /// Preferences file holding the cached snapshot (overrides COMPANION_PREFS_PATH)
    #[arg(long, global = true)]
    pub prefs: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pair an in-process phone and wearable and run habit toggles through the bridge
    Simulate {
        /// JSON snapshot the phone starts from (built-in sample if omitted)
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Habit ids to complete on the wearable
        #[arg(long = "complete")]
        complete: Vec<String>,

        /// Habit ids to uncomplete on the wearable
        #[arg(long = "uncomplete")]
        uncomplete: Vec<String>,

        /// Keep the phone unreachable for the whole run
        #[arg(long)]
        offline: bool,

        /// Time allowed for messages to settle between steps
        #[arg(long, default_value_t = 200)]
        settle_ms: u64,
    },

    /// Print the cached snapshot
    Inspect,

    /// Remove the cached snapshot
    Clear,
}

pub async fn run(cli: Cli, cfg: AppConfig) -> Result<()> {
    let prefs_path = cli
        .prefs
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cfg.prefs_path));
    match cli.command {
        Commands::Simulate {
            seed,
            complete,
            uncomplete,
            offline,
            settle_ms,
        } => {
            let seed = load_seed(seed.as_deref()).await?;
            let plan = SimulationPlan {
                complete,
                uncomplete,
                offline,
                settle: Duration::from_millis(settle_ms),
            };
            let snapshot = simulate(&cfg, &prefs_path, seed, plan).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Inspect => {
            let snapshot = cache_at(&cfg, &prefs_path).load().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Clear => {
            cache_at(&cfg, &prefs_path)
                .clear()
                .await
                .with_context(|| format!("failed to clear {}", prefs_path.display()))?;
            info!(path = %prefs_path.display(), "cached snapshot cleared");
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct SimulationPlan {
    pub complete: Vec<String>,
    pub uncomplete: Vec<String>,
    pub offline: bool,
    pub settle: Duration,
}

/// Runs one phone/wearable session over a local link and returns the
/// wearable's final snapshot.
pub async fn simulate(
    cfg: &AppConfig,
    prefs_path: &Path,
    seed: CompanionData,
    plan: SimulationPlan,
) -> Result<CompanionData> {
    let bridge_config = cfg.bridge_config();
    let link = LocalLink::pair("phone", "watch");
    if plan.offline {
        link.set_connected(false);
    }

    let phone = Arc::new(
        PhonePublisher::new(link.first(), seed).with_capability(bridge_config.capability.clone()),
    );
    let phone_task = phone.spawn_command_handler();
    phone.advertise().await.context("phone failed to advertise")?;

    let prefs: Arc<dyn PreferenceStore> = Arc::new(FilePreferences::new(prefs_path));
    let bridge = CompanionBridge::start(link.second(), prefs, bridge_config).await;

    let mut state_rx = bridge.subscribe();
    let observer = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let data = state_rx.borrow_and_update().clone();
            info!(
                habits = data.today_total_habits,
                completed = data.today_completed_habits,
                progress = data.today_progress,
                last_updated = data.last_updated,
                "wearable snapshot changed"
            );
        }
    });

    tokio::time::sleep(plan.settle).await;

    for habit_id in &plan.complete {
        if !bridge.complete_habit(habit_id).await {
            warn!(habit_id = %habit_id, "complete ignored");
        }
    }
    for habit_id in &plan.uncomplete {
        if !bridge.uncomplete_habit(habit_id).await {
            warn!(habit_id = %habit_id, "uncomplete ignored");
        }
    }

    tokio::time::sleep(plan.settle).await;

    let snapshot = (*bridge.current()).clone();
    info!(
        connection = ?bridge.connection_state(),
        phone_completed = phone.snapshot().today_completed_habits,
        "simulation finished"
    );
    bridge.shutdown();
    phone_task.abort();
    observer.abort();
    Ok(snapshot)
}

async fn load_seed(path: Option<&Path>) -> Result<CompanionData> {
    let Some(path) = path else {
        return Ok(sample_seed());
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read seed {}", path.display()))?;
    let mut data = CompanionData::from_json(&text)
        .with_context(|| format!("invalid seed snapshot {}", path.display()))?;
    data.recompute_today();
    Ok(data)
}

fn cache_at(cfg: &AppConfig, prefs_path: &Path) -> SnapshotCache {
    let bridge_config = cfg.bridge_config();
    SnapshotCache::new(
        Arc::new(FilePreferences::new(prefs_path)),
        bridge_config.prefs_namespace,
        bridge_config.cache_key,
    )
}

fn sample_seed() -> CompanionData {
    let habit = |id: &str, name: &str, emoji: &str, streak: u32, target: u32, week: u32| {
        HabitSummary {
            emoji: Some(emoji.to_string()),
            current_streak: streak,
            target_frequency: target,
            completions_this_week: week,
            ..HabitSummary::new(id, name)
        }
    };
    CompanionData::assemble(
        vec![
            habit("read", "Read 20 pages", "📚", 3, 7, 3),
            habit("walk", "Evening walk", "🚶", 0, 5, 1),
            habit("water", "Drink water", "💧", 12, 7, 6),
        ],
        StreakStats {
            current_streak: 4,
            best_streak: 11,
            total_points: 340,
            current_level: 3,
            sync_version: 1,
            ..StreakStats::default()
        },
        companion_proto::now_millis(),
    )
}
