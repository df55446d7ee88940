use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;

use synthjob::cli::{Cli, Command};
use synthjob::clock::TokioClock;
use synthjob::config::SynthConfig;
use synthjob::poller::JobPoller;
use synthjob::registry::JobRegistry;
use synthjob::state_machine::{JobRequest, JobState};
use synthjob::transport::HttpTransport;
use synthjob::ui::{self, JobProgress};
use synthjob::vendor::VendorKind;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    synthjob::logging::init(cli.verbose);

    let config = SynthConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match &cli.command {
        Command::Run { vendor, .. } => {
            let vendor = vendor.map(VendorKind::from).unwrap_or(config.vendor);
            let request = cli
                .command
                .job_request()
                .context("run command without a request")?;
            run(&config, vendor, request).await
        }
        Command::Status { job_id, vendor } => {
            let vendor = vendor.map(VendorKind::from).unwrap_or(config.vendor);
            status(&config, vendor, job_id).await
        }
        Command::Config => {
            println!("{}", config.redacted());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn poller(config: &SynthConfig, vendor: VendorKind) -> Result<JobPoller<HttpTransport>> {
    let route = config.route(vendor)?;
    let key = config.api_key(vendor)?;
    let parts = config.vendor_parts(vendor);
    let transport = HttpTransport::new(route, parts.encoder, key)?;
    Ok(JobPoller::new(transport, parts.normalizer, TokioClock, config.poll_policy(vendor)))
}

/// Submit one job and follow it to a terminal state. Ctrl-C cancels it.
async fn run(config: &SynthConfig, vendor: VendorKind, request: JobRequest) -> Result<ExitCode> {
    let registry = JobRegistry::new(poller(config, vendor)?);
    let session = registry.start_session(&uuid::Uuid::new_v4().to_string());

    let progress = JobProgress::start(&request.text);
    registry.subscribe(session.id(), progress.observer())?;
    let mut updates = registry.subscribe_stream(session.id())?;

    let job = match registry.submit(session.id(), &request).await {
        Ok(job) => job,
        Err(e) => {
            progress.abandon();
            return Err(e).context(format!("{vendor} rejected the job"));
        }
    };
    tracing::info!(job_id = %job.id, %vendor, session = session.id(), "polling job");

    let last = loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(job) if job.is_terminal() => break job,
                Some(_) => {}
                None => bail!("notification stream closed before the job finished"),
            },
            _ = tokio::signal::ctrl_c() => {
                if registry.cancel(session.id())? {
                    tracing::info!(job_id = %job.id, "cancelled by user");
                }
            }
        }
    };

    progress.complete(&last);
    registry.end_session(session.id());

    Ok(match last.state {
        JobState::Succeeded { .. } => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// One status fetch for a job created elsewhere.
async fn status(config: &SynthConfig, vendor: VendorKind, job_id: &str) -> Result<ExitCode> {
    let state = poller(config, vendor)?.check(job_id).await;
    ui::print_json(&state);
    Ok(match state {
        JobState::Failed { .. } | JobState::Unknown { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}
