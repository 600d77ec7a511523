//! RAM cache plugin binary.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use plugin::config::Config;
use plugin::facade::{CacheCallbacks, RamCachePlugin};
use plugin::logging;
use plugin::transport::{Endpoint, Locator};
use ram_cache::RamCacheManager;

#[derive(Parser)]
#[command(name = "cache-plugin")]
#[command(about = "In-memory content-addressed cache plugin")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("No config file specified. Use cache-plugin <path> or --print-config");
            std::process::exit(1);
        }
    };

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        eprintln!("Plugin error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let locator = Locator::parse(config.locator())?;

    let cache = Arc::new(
        RamCacheManager::builder()
            .max_size(config.cache.size)
            .handle_limit(config.cache.handle_limit)
            .build(),
    );
    let callbacks = Arc::new(RamCachePlugin::new(cache));
    tracing::info!(
        cache_size = config.cache.size,
        handle_limit = config.cache.handle_limit,
        capabilities = ?callbacks.capabilities(),
        "cache ready"
    );

    let endpoint = Endpoint::bind(&locator)?;
    println!("Listening for clients on {}", endpoint.locator());
    println!("Press <R ENTER> to ask clients to release nested catalogs");
    println!("Press <Ctrl+D> to quit");

    // The terminal drives the plugin lifecycle: 'R' relays the detach
    // request, end-of-stream shuts down.
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'R' => {
                println!("  ... asking clients to release nested catalogs");
                endpoint.ask_detach();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }

    endpoint.shutdown();
    tracing::info!("shut down cleanly");
    Ok(())
}

fn print_default_config() {
    let config = r#"# RAM cache plugin configuration

# Transport endpoint to listen on (required).
# Also accepted under its canonical key CVMFS_CACHE_EXTERNAL_LOCATOR;
# the environment variable of that name overrides the file.
locator = "unix:/var/run/cache-plugin.socket"

[cache]
# Total payload bytes the cache may hold (e.g. "4GB", "512MB")
size = "4GB"

# Maximum number of simultaneously open handles
handle_limit = 8192

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
# (the RUST_LOG environment variable takes precedence)
level = "info"

# Output format: "pretty", "compact", or "json"
format = "pretty"

# Include the event's module path in the output
target = false
"#;
    print!("{}", config);
}
