pub mod aggregate;
pub mod codec;
pub mod config;
pub mod error;
pub mod io_struct;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod server;
pub mod source;
pub mod state;
pub mod stream;

#[cfg(test)]
mod mock;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use registry::{BlockingRegistry, HttpRegistry, ModelBinding, Registry};
pub use stream::{AsyncChunkStream, ChunkStream};

use server::startup;
use state::AppState;
use tokio::signal;

/// Runs the HTTP server until it stops or the process receives Ctrl+C.
pub fn serve(config: Config) -> anyhow::Result<()> {
    let app_state = AppState::new(&config)
        .map_err(|e| anyhow::anyhow!("Failed to build relay: {:#}", e))?;

    actix_web::rt::System::new().block_on(async move {
        tokio::select! {
            res = startup(config, app_state) => {
                res?;
            }
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down");
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}
