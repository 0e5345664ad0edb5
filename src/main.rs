use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG overrides; default to info for our own crate
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tiddlyace=info")),
        )
        .init();

    // Optional first argument: path to config.json
    let config_path = std::env::args_os().nth(1).map(std::path::PathBuf::from);

    if let Err(e) = tiddlyace::run(config_path) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
