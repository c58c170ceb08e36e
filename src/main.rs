use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use clap::Parser;

use telemetry_sampling::config::{Config, MiddlewareConfig};
use telemetry_sampling::middleware::{LiveMetrics, Middleware, Sample, Server, Upstream};
use telemetry_sampling::quickpulse::{LiveMetricsPublisher, LogSink, QuickPulseCollector};
use telemetry_sampling::sampling::overrides::SamplingOverrideConfig;
use telemetry_sampling::sampling::{
    AdaptiveSampler, AdaptiveSettings, FixedRateSampler, SamplingOverrides,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to receive telemetry lines on, in 'host:port' format.
    #[arg(short, long)]
    listen: String,

    /// Specify an address to forward kept telemetry to in 'host:port' format.
    #[arg(short, long)]
    upstream: String,

    #[arg(short, long)]
    config_path: Option<String>,
}

fn fixed_rate_sampler(
    sampling_percentage: f64,
    exclude_types: &str,
    include_types: &str,
    overrides: &[SamplingOverrideConfig],
) -> FixedRateSampler {
    let sampler = FixedRateSampler::new(sampling_percentage)
        .with_overrides(SamplingOverrides::new(overrides));
    sampler.set_exclude_types(exclude_types);
    sampler.set_include_types(include_types);
    sampler
}

/// Wraps `next` in the configured middlewares, so the first configured one sees items first.
fn build_chain(
    config: Config,
    mut next: Box<dyn Middleware>,
) -> Result<Box<dyn Middleware>, Error> {
    for middleware in config.middlewares.into_iter().rev() {
        next = match middleware {
            MiddlewareConfig::LiveMetrics(config) => {
                let collector = Arc::new(QuickPulseCollector::new(config.max_documents));
                collector.enable(&config.instrumentation_key);
                let interval = Duration::from_secs(config.publish_interval.max(1));
                let publisher = LiveMetricsPublisher::start(collector.clone(), interval, LogSink)?;
                Box::new(LiveMetrics::new(collector, next).with_publisher(publisher))
            }
            MiddlewareConfig::FixedRateSample(config) => {
                let sampler = fixed_rate_sampler(
                    config.sampling_percentage,
                    &config.exclude_types,
                    &config.include_types,
                    &config.overrides,
                );
                Box::new(Sample::new(Arc::new(sampler), next))
            }
            MiddlewareConfig::AdaptiveSample(config) => {
                let settings = AdaptiveSettings::from_options(&config.options);
                log::debug!("adaptive sampling settings: {settings:?}");
                let sampler = fixed_rate_sampler(
                    settings.initial_sampling_percentage,
                    &config.exclude_types,
                    &config.include_types,
                    &config.overrides,
                );
                let sampler = Arc::new(AdaptiveSampler::with_sampler(settings, sampler));
                sampler.start()?;
                Box::new(Sample::new(sampler, next))
            }
        };
    }
    Ok(next)
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config_path {
        Some(path) => Config::new(path)?,
        None => Config {
            middlewares: vec![],
        },
    };

    let upstream: Box<dyn Middleware> = Box::new(Upstream::new(&args.upstream)?);
    let chain = build_chain(config, upstream)?;
    let server = Server::new(&args.listen, chain)?;
    log::info!("listening on {}, forwarding to {}", args.listen, args.upstream);

    let mut chain = server.run()?;
    chain.join()?;
    Ok(())
}
