use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::application::{spawn_signal_listener, Application};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind, overriding the configuration
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind, overriding the configuration
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl ServeArgs {
    fn apply(self, mut config: Config) -> Config {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        config
    }
}

pub async fn execute(args: ServeArgs, config: Config) -> Result<()> {
    let config = args.apply(config);
    let app = Application::setup(config).await?;

    let shutdown = CancellationToken::new();
    let signals = spawn_signal_listener(shutdown.clone());
    let result = app.run(shutdown.clone()).await;

    shutdown.cancel();
    let _ = signals.await;
    result
}
