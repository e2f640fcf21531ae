//! Board server command: `taskboard serve`.

use std::path::PathBuf;

use anyhow::Result;
use taskboard::config::TaskboardConfig;

/// CLI overrides for the `[server]` section.
#[derive(Debug, Default)]
pub struct ServeArgs {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
    pub init: bool,
}

pub async fn cmd_serve(config: &TaskboardConfig, args: ServeArgs) -> Result<()> {
    let problems = config.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid configuration:\n  {}", problems.join("\n  "));
    }

    let mut server = config.server_config();
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(host) = args.host {
        server.host = host;
    }
    if let Some(db_path) = args.db_path {
        server.db_path = db_path;
    }
    server.dev_mode |= args.dev;
    server.init_demo = args.init;

    taskboard::server::start_server(server).await
}
