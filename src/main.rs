use anyhow::Context;
use clap::Parser;
use linkkeeper::{
    Account, EntityId, EntityStore, FeedCapabilities, InMemoryEntityStore, LifecycleManager, Profile,
    ReconcilerConfig, Role,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs the consistency engine over an in-memory pair of stores.
#[derive(Debug, Parser)]
#[command(name = "linkkeeper", version, about)]
struct Args {
    /// JSON file with a ReconcilerConfig; environment variables apply when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the sweep interval
    #[arg(long)]
    sweep_interval_ms: Option<u64>,

    /// Skip the sweep at startup
    #[arg(long)]
    no_initial_sweep: bool,

    #[arg(long, short)]
    verbose: bool,

    /// Start the stores without change notifications
    #[arg(long)]
    disable_feed: bool,

    /// Start the stores without pre-images on the delete feed
    #[arg(long)]
    no_pre_images: bool,

    /// Linked account/profile pairs to seed
    #[arg(long, default_value_t = 8)]
    pairs: usize,
}

fn load_config(args: &Args) -> anyhow::Result<ReconcilerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => ReconcilerConfig::from_env()?,
    };

    if let Some(ms) = args.sweep_interval_ms {
        config.sweep_interval_ms = ms;
    }
    if args.no_initial_sweep {
        config.sweep_on_start = false;
    }
    if args.verbose {
        config.verbose = true;
    }
    config.validate()?;
    Ok(config)
}

async fn seed(
    accounts: &InMemoryEntityStore,
    profiles: &InMemoryEntityStore,
    pairs: usize,
) -> anyhow::Result<Vec<(EntityId, EntityId)>> {
    let mut seeded = Vec::with_capacity(pairs);
    for n in 0..pairs {
        let email = format!("student{}@example.com", n);
        let account = Account::new(&email, Role::Student).with_display_name(&format!("Student {}", n));
        let account_id = accounts.insert_account(account).await?;
        let profile = Profile::new(&email)
            .linked_to(&account_id)
            .with_payload(serde_json::json!({ "className": format!("class-{}", n % 3) }));
        let profile_id = profiles.insert_profile(profile).await?;
        seeded.push((account_id, profile_id));
    }
    Ok(seeded)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&args)?;
    let capabilities = if args.disable_feed {
        FeedCapabilities::disabled()
    } else if args.no_pre_images {
        FeedCapabilities::without_pre_images()
    } else {
        FeedCapabilities::full()
    };

    let accounts = Arc::new(InMemoryEntityStore::accounts(capabilities));
    let profiles = Arc::new(InMemoryEntityStore::profiles(capabilities));
    let seeded = seed(&accounts, &profiles, args.pairs).await?;

    let mut engine = LifecycleManager::new(accounts.clone(), profiles.clone(), config)?;
    engine.start().await;

    let mut pairs = seeded.into_iter();
    if let Some((account_id, _)) = pairs.next() {
        accounts.delete_many(&BTreeSet::from([account_id])).await?;
    }
    if let Some((_, profile_id)) = pairs.next() {
        profiles.delete_many(&BTreeSet::from([profile_id])).await?;
    }
    if let Some((_, profile_id)) = pairs.next() {
        profiles.delete_out_of_band(&BTreeSet::from([profile_id])).await?;
    }

    info!("running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    engine.stop().await;
    let (remaining_accounts, remaining_profiles) = (accounts.len().await, profiles.len().await);
    info!(
        accounts = remaining_accounts,
        profiles = remaining_profiles,
        "shut down"
    );
    Ok(())
}
