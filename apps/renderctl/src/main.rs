mod config;
mod confirm;
mod render;

use anyhow::{bail, Result};
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use renderctl_core::{
    mime_candidates, select_mime, AutoAccept, Confirm, MediaMap, Resolution, ResolutionSource,
    ResolveError, SoapProbe,
};
use renderctl_persistence::DeviceCache;
use renderctl_resolver::{select_cached, Resolver};
use renderctl_upnp::{
    host_of, AvTransport, Enricher, HttpIdentityFetcher, ProbeScanner, SoapClient, SsdpDiscovery,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::confirm::StdinConfirm;

#[derive(Parser, Debug)]
#[command(author, version, about = "Find and drive UPnP/DLNA AVTransport renderers")]
struct Cli {
    /// -v for debug output, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: <config_dir>/renderctl/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Device cache file (default: <data_dir>/renderctl/devices.json)
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    /// Neither read nor write the device cache while resolving; the `cache`
    /// subcommands always work on the file
    #[arg(long, global = true)]
    no_cache: bool,

    /// Answer yes to every confirmation
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// Renderer IP; enables the cache and probe strategies
    #[arg(long)]
    ip: Option<String>,

    /// Use the cached device at this index (see `cache list`)
    #[arg(long, conflicts_with = "ip")]
    select_cache: Option<usize>,

    /// Skip SSDP discovery
    #[arg(long)]
    no_ssdp: bool,

    /// Probe the expanded vendor path list
    #[arg(long)]
    deep: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a control endpoint and print it
    Resolve {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Play a media URL on a renderer
    Play {
        media_url: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Skip resolution and use this control URL
        #[arg(long, conflicts_with_all = ["ip", "select_cache"])]
        control_url: Option<String>,

        /// Override the vendor used for metadata
        #[arg(long)]
        vendor: Option<String>,

        /// Override MIME negotiation
        #[arg(long)]
        mime: Option<String>,
    },
    /// Stop playback
    Stop {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long, conflicts_with_all = ["ip", "select_cache"])]
        control_url: Option<String>,
    },
    /// Look for renderers without playing anything
    #[command(group(ArgGroup::new("mode").required(true).args(["ssdp", "subnet", "ip"])))]
    Scan {
        /// List SSDP announcements only
        #[arg(long)]
        ssdp: bool,

        /// Probe every host of an IPv4 CIDR block
        #[arg(long)]
        subnet: Option<String>,

        /// Probe a single host
        #[arg(long)]
        ip: Option<String>,

        #[arg(long)]
        deep: bool,
    },
    /// Inspect or prune the device cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// One line per cached device
    List,
    /// Endpoint details for a device
    Show {
        /// Index from `cache list`, or an IP
        key: String,

        /// List every MIME type with its profiles
        #[arg(long)]
        media: bool,
    },
    /// Remove a device, or `all`
    Forget { key: String },
}

/// Shared state for one invocation
struct App {
    config: Config,
    client: SoapClient,
    cache: DeviceCache,
    cancel: CancellationToken,
}

impl App {
    fn confirmer(&self) -> Arc<dyn Confirm> {
        if self.config.cache.auto_accept {
            Arc::new(AutoAccept)
        } else {
            Arc::new(StdinConfirm::new(self.cancel.clone()))
        }
    }

    fn resolver(&self) -> Resolver {
        let probe: Arc<dyn SoapProbe> = Arc::new(self.client.clone());
        Resolver::new(
            Arc::new(SsdpDiscovery::new(self.config.ssdp(), self.client.clone())),
            ProbeScanner::new(probe.clone()),
            Enricher::new(self.client.clone(), probe),
            Arc::new(HttpIdentityFetcher::new(self.client.clone())),
            self.confirmer(),
            self.config.resolver_options(),
        )
    }

    async fn resolve(&mut self, target: &TargetArgs) -> Result<Resolution> {
        check_cache_selection(&self.config, target)?;
        if let Some(index) = target.select_cache {
            return Ok(select_cached(&self.cache, index)?);
        }

        let resolver = self.resolver();
        let resolution = resolver
            .resolve(&mut self.cache, target.ip.as_deref(), &self.cancel)
            .await?;
        tracing::info!("{}", render::resolution_line(&resolution));
        Ok(resolution)
    }

    /// `--control-url` short-circuits resolution entirely
    async fn resolve_or_manual(&mut self, target: &TargetArgs, control_url: Option<String>) -> Result<Resolution> {
        match control_url {
            Some(control_url) => Ok(Resolution {
                ip: host_of(&control_url).unwrap_or_default(),
                control_url,
                conn_mgr_url: String::new(),
                vendor: String::new(),
                media: MediaMap::new(),
                source: ResolutionSource::Manual,
            }),
            None => self.resolve(target).await,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "info,renderctl=info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// 2 when no renderer could be resolved, 130 on Ctrl-C, 1 otherwise
fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ResolveError>() {
        Some(ResolveError::Cancelled) => 130,
        Some(_) => 2,
        None => 1,
    }
}

/// `--select-cache` reads the cache, which `--no-cache` forbids
fn check_cache_selection(config: &Config, target: &TargetArgs) -> Result<()> {
    if target.select_cache.is_some() && !config.cache.enabled {
        bail!("--select-cache needs the device cache, but caching is disabled");
    }
    Ok(())
}

/// Fold command-line overrides into the loaded config
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if cli.no_cache {
        config.cache.enabled = false;
    }
    if cli.yes {
        config.cache.auto_accept = true;
    }
    if let Some(path) = &cli.cache_file {
        config.cache.path = Some(path.clone());
    }

    let (no_ssdp, deep) = match &cli.command {
        Command::Resolve { target } | Command::Play { target, .. } | Command::Stop { target, .. } => {
            (target.no_ssdp, target.deep)
        }
        Command::Scan { deep, .. } => (false, *deep),
        Command::Cache { .. } => (false, false),
    };
    if no_ssdp {
        config.discovery.enabled = false;
    }
    if deep {
        config.probe.deep_search = true;
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    let cache_path = config.cache_path()?;
    tracing::debug!("Device cache: {}", cache_path.display());

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });

    let mut app = App {
        client: config.soap_client()?,
        cache: DeviceCache::load(&cache_path).await,
        config,
        cancel,
    };

    match cli.command {
        Command::Resolve { target } => {
            let resolution = app.resolve(&target).await?;
            println!("{}", render::resolution_line(&resolution));
        }
        Command::Play {
            media_url,
            target,
            control_url,
            vendor,
            mime,
        } => {
            let resolution = app.resolve_or_manual(&target, control_url).await?;
            let vendor = vendor.unwrap_or(resolution.vendor);
            let mime = mime.unwrap_or_else(|| select_mime(&mime_candidates(&media_url), &resolution.media));
            tracing::info!("Playing {} as {} on {}", media_url, mime, resolution.control_url);

            if app.cancel.is_cancelled() {
                return Err(ResolveError::Cancelled.into());
            }
            let transport = AvTransport::new(app.client.clone(), resolution.control_url, vendor);
            transport.play_media(&media_url, &mime).await?;
            println!("Playing on {}", transport.control_url());
        }
        Command::Stop { target, control_url } => {
            let resolution = app.resolve_or_manual(&target, control_url).await?;
            AvTransport::new(app.client.clone(), resolution.control_url, resolution.vendor)
                .stop()
                .await?;
            println!("Stopped");
        }
        Command::Scan { ssdp, subnet, ip, .. } => {
            let resolver = app.resolver();
            if ssdp {
                let devices = resolver.survey_ssdp(&app.cancel).await;
                if devices.is_empty() {
                    println!("No renderers announced themselves");
                }
                for device in &devices {
                    println!("{}", render::detected_line(device));
                }
                if app.cancel.is_cancelled() {
                    return Err(ResolveError::Cancelled.into());
                }
            } else if let Some(cidr) = subnet {
                let report = resolver.scan_subnet(&mut app.cache, &cidr, &app.cancel).await?;
                print!("{}", render::scan_summary(&report));
                if report.cancelled {
                    return Err(ResolveError::Cancelled.into());
                }
            } else if let Some(ip) = ip {
                let resolution = resolver.probe_device(&mut app.cache, &ip, &app.cancel).await?;
                println!("{}", render::resolution_line(&resolution));
            }
        }
        Command::Cache { action } => cache_command(&mut app, action).await?,
    }

    Ok(())
}

async fn cache_command(app: &mut App, action: CacheCommand) -> Result<()> {
    match action {
        CacheCommand::List => print!("{}", render::cache_table(&app.cache)),
        CacheCommand::Show { key, media } => match app.cache.find(&key) {
            Some(entry) => print!("{}", render::device_details(&entry, media)),
            None => bail!("No cached device matches {}", key),
        },
        CacheCommand::Forget { key } => {
            let confirm = app.confirmer();
            if key.eq_ignore_ascii_case("all") {
                if !confirm.confirm("Delete ALL cached devices?").await {
                    return declined(&app.cancel);
                }
                let removed = app.cache.forget_all();
                app.cache.save().await?;
                println!("Removed {} device(s)", removed);
            } else {
                let ip = match app.cache.find(&key) {
                    Some(entry) => entry.ip.to_string(),
                    None => bail!("No cached device matches {}", key),
                };
                if !confirm.confirm(&format!("Delete cached entry for {}?", ip)).await {
                    return declined(&app.cancel);
                }
                app.cache.forget(&ip);
                app.cache.save().await?;
                println!("Removed {}", ip);
            }
        }
    }
    Ok(())
}

/// A refused prompt is fine; an interrupted one is a cancellation
fn declined(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ResolveError::Cancelled.into());
    }
    println!("Nothing deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_play() {
        let cli = Cli::try_parse_from([
            "renderctl", "-vv", "play", "http://nas/movie.mkv", "--ip", "10.0.0.5", "--deep", "--no-ssdp",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Play { media_url, target, .. } => {
                assert_eq!(media_url, "http://nas/movie.mkv");
                assert_eq!(target.ip.as_deref(), Some("10.0.0.5"));
                assert!(target.deep && target.no_ssdp);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_scan_requires_a_mode() {
        assert!(Cli::try_parse_from(["renderctl", "scan"]).is_err());
        assert!(Cli::try_parse_from(["renderctl", "scan", "--ssdp", "--ip", "10.0.0.1"]).is_err());
        assert!(Cli::try_parse_from(["renderctl", "scan", "--subnet", "10.0.0.0/24"]).is_ok());
    }

    #[test]
    fn test_control_url_conflicts_with_ip() {
        let parsed = Cli::try_parse_from([
            "renderctl", "stop", "--ip", "10.0.0.5", "--control-url", "http://10.0.0.5/avt",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from(["renderctl", "--no-cache", "-y", "resolve", "--no-ssdp", "--deep"]).unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        assert!(!config.cache.enabled);
        assert!(config.cache.auto_accept);
        assert!(!config.discovery.enabled);
        assert!(config.probe.deep_search);
    }

    #[test]
    fn test_select_cache_requires_cache() {
        let cli = Cli::try_parse_from(["renderctl", "--no-cache", "resolve", "--select-cache", "0"]).unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        let Command::Resolve { target } = &cli.command else {
            panic!("expected resolve");
        };
        assert!(check_cache_selection(&config, target).is_err());
        assert!(check_cache_selection(&Config::default(), target).is_ok());
    }

    #[test]
    fn test_interrupted_prompt_maps_to_cancelled() {
        let cancel = CancellationToken::new();
        assert!(declined(&cancel).is_ok());

        cancel.cancel();
        let err = declined(&cancel).unwrap_err();
        assert_eq!(exit_code(&err), 130);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&ResolveError::Exhausted.into()), 2);
        assert_eq!(exit_code(&ResolveError::Cancelled.into()), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
