//! webresource - compile-and-cache engine for a path-addressed content store.

mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use webresource::config::find_config_file;
use webresource::inventory::InventoryIndex;
use webresource::{
    CompileCache, CompilerRegistry, ContentStore, EngineConfig, FsStore, Service, log, logger,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = load_config(&cli)?;
    let store: Arc<dyn ContentStore> = Arc::new(
        FsStore::open(&config.store.root)
            .with_context(|| format!("cannot open store at {}", config.store.root.display()))?,
    );
    let registry = Arc::new(CompilerRegistry::with_passthrough());

    match &cli.command {
        Commands::Serve { .. } => serve(config, store, registry),
        Commands::Compile { path } => compile(&config, store, registry, path),
        Commands::Group { name, split } => group(&config, store, registry, name, *split),
        Commands::Sweep => sweep(config, store, registry),
    }
}

/// Locate and load the config, then apply command-line overrides.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let path = find_config_file(&cli.config).unwrap_or_else(|| cli.config.clone());
    let mut config = EngineConfig::load(&path)?;

    if let Some(store) = &cli.store {
        config.store.root = store.clone();
    }
    match cli.command {
        Commands::Serve {
            workers: Some(workers),
        } => {
            if workers == 0 {
                bail!("--workers must be at least 1");
            }
            config.scheduler.workers = workers;
        }
        // one-shot commands never need subtree subscriptions
        Commands::Sweep | Commands::Compile { .. } | Commands::Group { .. } => {
            config.scheduler.watch = false;
        }
        Commands::Serve { workers: None } => {}
    }
    Ok(config)
}

fn new_cache(
    config: &EngineConfig,
    store: Arc<dyn ContentStore>,
    registry: Arc<CompilerRegistry>,
) -> (Arc<InventoryIndex>, CompileCache) {
    let inventory = Arc::new(InventoryIndex::new(Arc::clone(&store)));
    let cache = CompileCache::new(
        store,
        registry,
        Arc::clone(&inventory),
        config.cache.group_root.clone(),
    );
    (inventory, cache)
}

// =============================================================================
// Commands
// =============================================================================

fn serve(
    config: EngineConfig,
    store: Arc<dyn ContentStore>,
    registry: Arc<CompilerRegistry>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))?;

    let mut service = Service::new(Arc::new(config), store, registry);
    service.start()?;
    log!("serve"; "running, press Ctrl+C to stop");

    let _ = shutdown_rx.recv();
    log!("serve"; "shutting down...");
    service.shutdown();
    Ok(())
}

fn compile(
    config: &EngineConfig,
    store: Arc<dyn ContentStore>,
    registry: Arc<CompilerRegistry>,
    path: &str,
) -> Result<()> {
    let (_, cache) = new_cache(config, store, registry);
    match cache.compiled_bytes(path) {
        Ok(bytes) => {
            let mut out = std::io::stdout().lock();
            out.write_all(&bytes)?;
            out.flush()?;
            Ok(())
        }
        Err(e) => {
            println!("{}", e.placeholder());
            Err(e.into())
        }
    }
}

fn group(
    config: &EngineConfig,
    store: Arc<dyn ContentStore>,
    registry: Arc<CompilerRegistry>,
    name: &str,
    split: bool,
) -> Result<()> {
    let (inventory, cache) = new_cache(config, store, registry);
    inventory.load_all()?;
    for (ext, paths) in cache.group_paths(name, !split)? {
        for path in paths {
            println!("{ext}\t{path}");
        }
    }
    Ok(())
}

fn sweep(
    config: EngineConfig,
    store: Arc<dyn ContentStore>,
    registry: Arc<CompilerRegistry>,
) -> Result<()> {
    let service = Service::new(Arc::new(config), store, registry);
    service.inventory().load_all()?;

    let changed = service.sweep_now()?;
    let compiled = service.dispatcher().run_pending();
    log!("sweep"; "{} group(s) changed, {} job(s) run", changed.len(), compiled);
    Ok(())
}
