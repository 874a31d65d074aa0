use anyhow::{bail, Result};
use codedrop::core::signaling::http::HttpStore;
use codedrop::core::signaling::SignalingStore;
use codedrop::workers;
use codedrop::workers::args::{Args, Command};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::load();

    // Note: webrtc_ice generates many "unknown TransactionID" warnings for
    // late-arriving STUN responses, which are normal. Filter these out to
    // reduce noise.
    let filter = match args.verbose {
        0 => "warn,codedrop=info,webrtc_ice::agent=error",
        1 => "info,webrtc_ice::agent=error",
        2 => "debug,webrtc_ice::agent=error",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Recv { ref out, delete_session } => {
            let store = signal_store(&args)?;
            workers::receive::run(store, out.clone(), delete_session).await
        }
        Command::Send { ref code, zip, ref files } => {
            let store = signal_store(&args)?;
            workers::send::run(store, code.clone(), files.clone(), zip).await
        }
        Command::Loopback { ref out, zip, ref files } => {
            workers::loopback::run(files.clone(), out.clone(), zip).await
        }
    }
}

fn signal_store(args: &Args) -> Result<Arc<dyn SignalingStore>> {
    let Some(url) = args.resolve_signal_url() else {
        bail!("no signaling store configured; pass --signal-url or set CODEDROP_SIGNAL_URL");
    };
    Ok(Arc::new(HttpStore::new(url)))
}
