//! The `phr-server` binary: binds the HTTP surface of spec §6.4 to a
//! `PhrSystem` rooted at a configurable data directory, the way the
//! teacher's `cloud-relay` binary parses `clap`-derived options and
//! initializes `tracing` before handing control to a long-running
//! network loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod directory;
mod routes;
mod session;

use directory::SledUserDirectory;
use routes::AppState;
use session::CookieSessionGate;

/// CLI options for the PHR secure repository's HTTP surface.
#[derive(Parser)]
#[clap(about = "HTTP surface for the PHR secure repository")]
struct Opts {
    /// Root directory for keys/, meta/, objects/, attributes/ and
    /// audit.log. Created if it doesn't exist.
    #[clap(long, default_value = "phr-data")]
    data_dir: PathBuf,

    /// Directory for the `user_id -> role` directory tree, separate from
    /// `phr::Config`'s stores since the identity store is out of this
    /// core's scope (spec §1).
    #[clap(long, default_value = "phr-data/users")]
    users_dir: PathBuf,

    /// Secret used to HMAC-tag session cookies. Losing or rotating this
    /// invalidates every outstanding session.
    #[clap(long, env = "PHR_SESSION_SECRET")]
    session_secret: String,

    /// Address to listen on.
    #[clap(long, default_value = "127.0.0.1:3030")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    phr::init_tracing();

    let config = phr::Config::new(&opts.data_dir)?;
    let system = Arc::new(phr::PhrSystem::open(&config)?);
    let directory = Arc::new(SledUserDirectory::open(&opts.users_dir)?);
    let sessions = Arc::new(CookieSessionGate::new(opts.session_secret.into_bytes()));

    let state = AppState {
        system,
        directory,
        sessions,
    };

    info!(listen = %opts.listen, data_dir = %opts.data_dir.display(), "starting phr-server");
    warp::serve(routes::routes(state)).run(opts.listen).await;
    Ok(())
}
