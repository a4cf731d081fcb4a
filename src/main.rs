mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use imagevault::{config, events, ingest, policy, server, store};
use imagevault_db::{pool::init_pool, MetadataStore, SqliteMetadataStore};

async fn start_server(
    host: String,
    port: u16,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    // Load config
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.server.host = host;
    config.server.port = port;

    tracing::info!("Starting imagevault server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    // Determine data directory from config path or current directory
    let data_dir = config_path
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    // Initialize database
    let db_path = config
        .database
        .path
        .clone()
        .unwrap_or_else(|| data_dir.join("imagevault.db"));
    let db_path_str = db_path.to_string_lossy();
    tracing::info!("Initializing database at {}", db_path_str);
    let db_pool = init_pool(&db_path_str)?;
    let meta: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(db_pool));

    // Reconcile uploads interrupted by a previous server session
    match ingest::sweep::kill_orphaned_uploads(meta.as_ref()) {
        Ok(count) if count > 0 => {
            tracing::info!("Killed {count} orphaned uploads from previous session");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to sweep orphaned uploads: {e}");
        }
    }

    // Storage backends, one per scheme
    let mut registry = store::StoreRegistry::new(config.storage.default_scheme.clone());
    registry.register(Arc::new(store::FilesystemBackend::new(
        config.storage.filesystem_root.clone(),
    )));
    registry.register(Arc::new(store::HttpBackend::new("http")));
    registry.register(Arc::new(store::HttpBackend::new("https")));
    let registry = Arc::new(registry);

    // Byte-removal scheduling
    let mode = if config.deletion.delayed_delete {
        ingest::DeletionMode::Delayed
    } else {
        ingest::DeletionMode::Immediate
    };
    let (deleter, deletion_worker) = ingest::Deleter::new(Arc::clone(&registry), mode);
    let deletion_handle = tokio::spawn(deletion_worker.run());

    // Authorization
    let policy: Arc<dyn policy::Policy> = if config.policy.admin_only_actions.is_empty() {
        Arc::new(policy::AllowAll)
    } else {
        Arc::new(policy::AdminOnlyActions::new(
            config.policy.admin_only_actions.clone(),
        ))
    };

    let service = Arc::new(ingest::IngestService::new(
        meta,
        registry,
        events::Notifier::new(),
        policy,
        ingest::TaskPool::default(),
        deleter,
        config.storage.image_size_cap,
    ));

    let ctx = server::AppContext {
        service: Arc::clone(&service),
        config: Arc::new(config),
    };
    let server_result = server::start_server(ctx).await;

    // Cleanup: drain detached copy-from tasks, then the deletion queue
    tracing::info!("Shutting down...");
    service.pool().shutdown().await;
    drop(service);
    let _ = deletion_handle.await;

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "imagevault=trace,imagevault_db=debug,imagevault_common=debug,tower_http=debug"
                .to_string()
        } else {
            "imagevault=debug,imagevault_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("imagevault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Default store: {}", config.storage.default_scheme);
            println!("  Storage root: {:?}", config.storage.filesystem_root);
            println!("  Image size cap: {} bytes", config.storage.image_size_cap);
            println!("  Delayed delete: {}", config.deletion.delayed_delete);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
