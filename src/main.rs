use anyhow::Result;
use clap::Parser;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, warn};
use twotower::services::dataset::FsRecordSource;
use twotower::utils::{format_table, windowed_mean};
use twotower::{init_tracing, Config, Session};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory holding u.data, u.item and u.user. Overrides the config.
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Compare recommendations for this user instead of a random one.
    #[arg(short, long)]
    user: Option<u32>,

    #[arg(short, long)]
    epochs: Option<usize>,

    /// Print the comparison report as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", &args.log_level);
    }
    init_tracing();

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using defaults with environment overrides");
        Config::from_env()?
    };
    if let Some(dir) = args.data_dir {
        config.data.data_dir = dir;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }

    let session = Session::new(config)?;
    let source = FsRecordSource::new(&session.config().data);
    session.load(&source).await?;

    let report = session.train().await?;
    for epoch in &report.epochs {
        println!(
            "epoch {:>3}  simple {:.4}  deep {:.4}",
            epoch.epoch + 1,
            epoch.simple_loss,
            epoch.deep_loss
        );
    }
    let batches = report.epochs.first().map(|e| e.batches).unwrap_or(1);
    info!(
        "Deep loss per epoch window: {:?}",
        windowed_mean(&report.loss_history, batches.max(1))
    );

    let mut rng = rand::rngs::StdRng::seed_from_u64(session.config().model.seed);
    let comparison = match args.user {
        Some(user_id) => session.compare_for_user(user_id)?,
        None => session.compare_random(&mut rng)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
    } else {
        println!("\nUser {}", comparison.user_id);
        println!("{}", format_table("Top rated (history)", "Rating", &comparison.history));
        println!("{}", format_table("Simple model", "Score", &comparison.simple_recommendations));
        println!("{}", format_table("Deep model", "Score", &comparison.deep_recommendations));
    }

    match session.project_item_embeddings() {
        Ok(points) => info!("Projected {} item embeddings to 2D", points.len()),
        Err(e) => warn!("Skipping embedding projection: {}", e),
    }

    Ok(())
}
