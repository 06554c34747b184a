use std::path::Path;

use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use netcensus::aggregate::CancelFlag;
use netcensus::cache::ResolverCache;
use netcensus::config::{
    AnalyzeArgs, Cli, Command, DevicesArgs, DomainsArgs, ExtractArgs, UpdateOuiArgs, VolumesArgs,
};
use netcensus::pipeline::{self, Analysis};
use netcensus::report;
use netcensus::resolve::oui;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelFlag::new();
    let cancel_clone = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, stopping");
        cancel_clone.cancel();
    })?;

    match cli.command {
        Command::Extract(args) => extract(args)?,
        Command::Domains(args) => domains(args, &cancel)?,
        Command::Devices(args) => devices(args, &cancel)?,
        Command::Volumes(args) => volumes(args, &cancel)?,
        Command::Analyze(args) => analyze(args, &cancel).await?,
        Command::UpdateOui(args) => update_oui(args).await?,
    }
    Ok(())
}

fn extract(args: ExtractArgs) -> netcensus::Result<()> {
    let events = match (&args.events, &args.pcap) {
        (Some(path), _) => pipeline::load_events(path)?,
        (None, Some(path)) => load_capture(path)?,
        (None, None) => return Ok(()),
    };
    pipeline::extract_to_table(events, &args.output, args.workers)?;
    Ok(())
}

#[cfg(feature = "capture")]
fn load_capture(path: &Path) -> netcensus::Result<Vec<netcensus::event::PacketEvent>> {
    pipeline::load_capture(path)
}

#[cfg(not(feature = "capture"))]
fn load_capture(path: &Path) -> netcensus::Result<Vec<netcensus::event::PacketEvent>> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!(
            "cannot read {}: built without the `capture` feature",
            path.display()
        ),
    )
    .into())
}

fn domains(args: DomainsArgs, cancel: &CancelFlag) -> netcensus::Result<()> {
    let records = pipeline::load_table(&args.input)?;
    let resolver = pipeline::dns_resolver(&args.dns)?;
    let counts = pipeline::run_domains(
        &records,
        args.max_rows,
        &ResolverCache::new(),
        &*resolver,
        &args.pool.pass_options(cancel),
    )?;
    report::to_path_or_stdout(args.output.as_deref(), "domains", |w| {
        report::write_domains(w, &counts).map(drop)
    })
}

fn devices(args: DevicesArgs, cancel: &CancelFlag) -> netcensus::Result<()> {
    let records = pipeline::load_table(&args.input)?;
    let vendors = pipeline::vendor_resolver(&args.oui)?;
    let devices = pipeline::run_devices(
        &records,
        &ResolverCache::new(),
        &vendors,
        &args.pool.pass_options(cancel),
    )?;
    report::to_path_or_stdout(args.output.as_deref(), "devices", |w| {
        report::write_devices(w, &devices).map(drop)
    })?;
    if let Some(path) = args.counts_output.as_deref() {
        report::to_path_or_stdout(Some(path), "device counts", |w| {
            report::write_device_counts(w, &devices).map(drop)
        })?;
    }
    Ok(())
}

fn volumes(args: VolumesArgs, cancel: &CancelFlag) -> netcensus::Result<()> {
    let records = pipeline::load_table(&args.input)?;
    let matrix = pipeline::run_volumes(&records, cancel)?;
    report::to_path_or_stdout(args.output.as_deref(), "volumes", |w| {
        report::write_volumes(w, &matrix).map(drop)
    })?;
    if let Some(path) = args.sources_output.as_deref() {
        report::to_path_or_stdout(Some(path), "source totals", |w| {
            report::write_source_totals(w, &matrix).map(drop)
        })?;
    }
    if let Some(path) = args.destinations_output.as_deref() {
        report::to_path_or_stdout(Some(path), "destination totals", |w| {
            report::write_destination_totals(w, &matrix).map(drop)
        })?;
    }
    Ok(())
}

/// All three passes at once on blocking threads; the first failure (or a
/// cancellation) discards the whole summary.
async fn analyze(args: AnalyzeArgs, cancel: &CancelFlag) -> Result<(), Box<dyn std::error::Error>> {
    let records = pipeline::load_table(&args.input)?;
    let analysis = Analysis::new(
        records,
        pipeline::dns_resolver(&args.dns)?,
        pipeline::vendor_resolver(&args.oui)?,
        args.max_rows,
        args.pool.pass_options(cancel),
    );

    let (a, b, c) = (analysis.clone(), analysis.clone(), analysis.clone());
    let (domains, devices, volumes) = tokio::try_join!(
        tokio::task::spawn_blocking(move || a.domains()),
        tokio::task::spawn_blocking(move || b.devices()),
        tokio::task::spawn_blocking(move || c.volumes()),
    )?;
    let (domains, devices, volumes) = (domains?, devices?, volumes?);

    let summary = report::summarize(analysis.records.len(), &domains, &devices, &volumes);
    info!(
        records = summary.records,
        domains = summary.domains.len(),
        devices = summary.devices.len(),
        links = summary.volumes.len(),
        "analysis finished"
    );
    report::to_path_or_stdout(args.output.as_deref(), "analysis", |w| {
        report::write_summary(w, &summary)
    })?;
    Ok(())
}

async fn update_oui(args: UpdateOuiArgs) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = pipeline::oui_timeout(args.timeout_secs);
    let entries = tokio::task::spawn_blocking(move || {
        oui::download(&args.url, &args.output, timeout)
    })
    .await??;
    info!(entries, "vendor database refreshed");
    Ok(())
}
