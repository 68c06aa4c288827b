//! tracing-subscriber setup for the host process.

use cvg4j_trampoline::LogConfig;
use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber using the bridge's log config.
///
/// Returns false when the host already installed a global subscriber; ours
/// is then dropped and events go to theirs.
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
        eprintln!("cvg4j: invalid log filter {:?}: {e}", config.filter);
        EnvFilter::new("cvg4j=info")
    });

    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
    };
    installed.is_ok()
}
