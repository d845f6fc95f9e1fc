use anyhow::Result;
use clap::Parser;
use perfminer::cli::Cli;
use perfminer::config::{Credentials, PipelineConfig};
use perfminer::error::PipelineError;
use perfminer::llm::{ChatEndpoint, OpenAiChat};
use perfminer::pipeline::{
    load_hub_tags, read_commit_list, read_repo_list, Collaborators, Coordinator, ImagePolicy,
    RunSummary,
};
use perfminer::sandbox::{ContainerHost, DockerCli};
use perfminer::source::GitHubSource;
use perfminer::vcs::GitClient;
use std::collections::BTreeSet;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` raises the default to TRACE
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Cli) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml(path)
            .map_err(|e| PipelineError::config(format!("{:#}", e)))?,
        None => PipelineConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate().map_err(PipelineError::config)?;
    Ok(config)
}

fn run(args: &Cli) -> Result<RunSummary> {
    let mut config = load_config(args)?;
    let credentials = Credentials::from_env(config.filter_kind).map_err(PipelineError::config)?;
    if let Some(url) = &credentials.llm_base_url {
        config.llm_base_url = url.clone();
    }
    fs::create_dir_all(&args.output).map_err(|e| {
        PipelineError::config(format!("cannot create {}: {}", args.output.display(), e))
    })?;

    let chat = match &credentials.llm_api_key {
        Some(key) => Some(OpenAiChat::new(&config.llm_base_url, key)?),
        None => None,
    };
    let source = GitHubSource::new(&credentials.github_token)?;
    let vcs = GitClient::new(args.output.join("mirrors"));
    let host: Arc<dyn ContainerHost> = Arc::new(DockerCli::new("docker"));

    let remote_tags = match (&credentials.dockerhub_user, &credentials.dockerhub_repo) {
        (Some(user), Some(repo)) => {
            load_hub_tags(&args.output.join("dockerhub_tags.json"), user, repo).unwrap_or_else(
                |e| {
                    tracing::warn!("Remote image dedup disabled: {:#}", e);
                    BTreeSet::new()
                },
            )
        }
        _ => BTreeSet::new(),
    };
    let images = ImagePolicy::new(host.clone(), credentials.image_prefix(), config.force)
        .with_remote_tags(remote_tags);

    let collab = Collaborators {
        host,
        vcs: &vcs,
        source: &source,
        chat: chat.as_ref().map(|c| c as &dyn ChatEndpoint),
    };
    let mut coordinator =
        Coordinator::new(config, &args.output, collab, images)?.with_dry_run(args.dry_run);

    match (&args.repos, &args.commits) {
        (Some(path), _) => {
            let repos = read_repo_list(path).map_err(|e| PipelineError::config(format!("{:#}", e)))?;
            tracing::info!("{} repositories from {}", repos.len(), path.display());
            coordinator.run_repos(&repos)
        }
        (None, Some(path)) => {
            let pairs = read_commit_list(path).map_err(|e| {
                PipelineError::config(format!("invalid commit list {}: {:#}", path.display(), e))
            })?;
            tracing::info!("{} commit pairs from {}", pairs.len(), path.display());
            coordinator.run_commits(pairs)
        }
        (None, None) => Err(PipelineError::config("one of --repos or --commits is required").into()),
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.debug);

    match run(&args) {
        Ok(summary) => {
            println!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            if PipelineError::classify(&e).is_some_and(PipelineError::is_fatal) {
                eprintln!("perfminer: {:#}", e);
                ExitCode::from(2)
            } else {
                tracing::error!("Run aborted: {:#}", e);
                ExitCode::FAILURE
            }
        }
    }
}
