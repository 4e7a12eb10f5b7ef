use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use crate::backend::ContainerBackend;
use crate::config::Settings;
use crate::session::registry::Registry;
use crate::session::shutdown::ShutdownCoordinator;
use crate::session::SessionManager;
use crate::web::server::{self, WebState};

#[derive(Parser, Debug)]
#[command(name = "ttypub", version, about = "Disposable container terminals in the browser")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "TTYPUB_LISTEN", default_value = "[::]:8080")]
    pub listen: String,

    /// Directory served for anything not routed explicitly (e.g. xterm.js)
    #[arg(long, env = "TTYPUB_WWW", default_value = "./www")]
    pub www: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env();
    tracing::info!(settings = %serde_json::to_string(&settings)?, "Loaded settings");

    let sessions = Arc::new(SessionManager::new(
        Registry::new(settings.capacity),
        ShutdownCoordinator::new(),
        ContainerBackend::new(&settings),
    ));
    let state = Arc::new(WebState {
        sessions,
        title: settings.title,
    });

    server::start_web_server(&cli.listen, &cli.www, state, server::shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["ttypub"]).unwrap();
        assert_eq!(cli.listen, "[::]:8080");
        assert_eq!(cli.www, PathBuf::from("./www"));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from(["ttypub", "--listen", "127.0.0.1:9000", "--www", "/srv/www"])
            .unwrap();
        assert_eq!(cli.listen, "127.0.0.1:9000");
        assert_eq!(cli.www, PathBuf::from("/srv/www"));
    }
}
