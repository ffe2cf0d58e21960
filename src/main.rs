use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgcache::domain::CacheKey;
use imgcache::infrastructure::{
    CacheConfig, CliArgs, Command, ImageCache, LoggingObserver, StorageManager,
};

fn init_logging(config: &CacheConfig) -> Result<()> {
    let default_level = LevelFilter::from_level(config.log_level.to_tracing_level());
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<CacheConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn run(cache: &ImageCache, command: Command) -> Result<()> {
    match command {
        Command::Fetch { url, output } => {
            let loaded = cache.load(&url).await?;
            println!(
                "{} {}x{} from {}",
                loaded.key,
                loaded.image.width(),
                loaded.image.height(),
                loaded.source
            );
            if let Some(path) = output {
                loaded.image.save(&path)?;
                println!("saved to {}", path.display());
            }
        }
        Command::Disk { url } => match cache.fetch_from_disk_only(&url)? {
            Some(image) => println!("{url} {}x{} on disk", image.width(), image.height()),
            None => println!("{url} not on disk"),
        },
        Command::Remove { url } => {
            cache.remove(&url)?;
            println!("removed {url}");
        }
        Command::Path { url } => {
            let key = CacheKey::parse(&url)?;
            println!("{}", cache.disk().path_for(&key).display());
        }
        Command::Stats => println!("{}", cache.stats()),
        Command::Clear => {
            cache.clear().await?;
            println!("cleared {}", cache.disk().cache_dir().display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = imgcache::VERSION, "Starting imgcache");

    let cache = ImageCache::new(config).await?;
    cache.subscribe(Arc::new(LoggingObserver));

    let result = run(&cache, args.command).await;

    cache.flush().await?;

    result
}
