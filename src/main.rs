mod app;
mod input;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use petroom::config::{load_settings, project_paths, Paths, RemoteSettings, Settings};
use petroom::persist::FailurePolicy;
use petroom::remote::{MemoryRemote, RemoteStore};
use petroom::rest::PostgrestStore;
use petroom::session::SystemClock;
use petroom::stats::ThreadRandom;
use petroom::storage::FileStore;
use petroom::{Backends, Session, SessionOptions, UserId};
use std::fs::OpenOptions;

#[derive(Parser, Debug)]
#[command(name = "petroom")]
#[command(about = "Raise a small virtual pet in your terminal")]
struct Cli {
    /// Signed-in user id. Without it the pet is kept on this device only.
    #[arg(long)]
    user: Option<String>,

    /// Base URL of the backend (PostgREST / Supabase project URL)
    #[arg(long)]
    remote_url: Option<String>,

    /// API key sent with every backend request
    #[arg(long)]
    api_key: Option<String>,

    /// Directory for settings, the local pet cache and the log
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Revert to the last saved state when a remote write fails
    #[arg(long, default_value_t = false)]
    rollback_on_error: bool,
}

fn init_logging(paths: &Paths) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_path)
        .with_context(|| format!("could not open {}", paths.log_path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .context("logger already initialised")?;
    Ok(())
}

fn apply_overrides(cli: Cli, settings: &mut Settings) {
    if let Some(user) = cli.user {
        settings.user_id = Some(user);
    }
    match (cli.remote_url, cli.api_key) {
        (Some(url), Some(api_key)) => {
            settings.remote = Some(RemoteSettings {
                url,
                api_key,
                access_token: None,
            });
        }
        (Some(url), None) => {
            if let Some(remote) = settings.remote.as_mut() {
                remote.url = url;
            }
        }
        (None, Some(api_key)) => {
            if let Some(remote) = settings.remote.as_mut() {
                remote.api_key = api_key;
            }
        }
        (None, None) => {}
    }
    if cli.rollback_on_error {
        settings.failure_policy = FailurePolicy::Rollback;
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = match &cli.data_dir {
        Some(dir) => Paths::in_dir(dir)?,
        None => project_paths()?,
    };
    init_logging(&paths)?;

    let mut settings = load_settings(&paths.settings_path);
    apply_overrides(cli, &mut settings);

    let mut user = settings.user_id.clone().map(UserId::new);
    let remote: Box<dyn RemoteStore> = match &settings.remote {
        Some(r) => Box::new(
            PostgrestStore::new(&r.url, r.api_key.clone(), r.access_token.clone())
                .context("could not build the backend client")?,
        ),
        None => {
            if user.take().is_some() {
                warn!("no backend configured, playing as guest");
            }
            Box::new(MemoryRemote::with_catalog())
        }
    };
    let local = FileStore::open(&paths.data_dir).context("could not open local storage")?;

    let session = Session::start(
        user,
        SessionOptions::from(&settings),
        Backends {
            remote,
            local: Box::new(local),
            clock: Box::new(SystemClock),
            rng: Box::new(ThreadRandom::from_entropy()),
        },
    );
    info!("loaded pet from {:?}", session.source());

    app::App::new(settings, paths, session)?.run()
}
