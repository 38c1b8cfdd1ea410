use std::io::Write;
use std::sync::Arc;

use tokio::sync::Mutex;

use prisma::config;
use prisma::error::ApiResult;
use prisma::model::profile::ResourceProfile;
use prisma::resource::Resources;
use prisma::server::entertainment::EntertainmentService;
use prisma::server::service;
use prisma::upstream::uuid_map::UuidMapper;

/*
 * Formatter function to output in syslog format. This makes sense when running
 * as a service (where output might go to a log file, or the system journal)
 */
#[allow(clippy::match_same_arms)]
fn syslog_format(
    buf: &mut pretty_env_logger::env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "<{}>{}: {}",
        match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 6,
            log::Level::Debug => 7,
            log::Level::Trace => 7,
        },
        record.target(),
        record.args()
    )
}

fn init_logging(default_level: &str) -> ApiResult<()> {
    let log_filters = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());

    /* Detect if we need syslog or human-readable formatting */
    if std::env::var("SYSTEMD_EXEC_PID").is_ok_and(|pid| pid == std::process::id().to_string()) {
        Ok(pretty_env_logger::env_logger::builder()
            .format(syslog_format)
            .parse_filters(&log_filters)
            .try_init()?)
    } else {
        Ok(pretty_env_logger::formatted_timed_builder()
            .parse_filters(&log_filters)
            .try_init()?)
    }
}

async fn run() -> ApiResult<()> {
    let profile = ResourceProfile::detect();

    init_logging(profile.settings.log_level)?;

    let config = Arc::new(config::parse("config.yaml".into())?);
    log::debug!("Configuration loaded successfully");

    let profile = profile.with_overrides(&config.profile);
    log::info!(
        "Host profile {} ({} cpus, {:.1} GiB): {} workers, {} byte udp buffers, target {} fps",
        profile.class,
        profile.cpu_count,
        profile.memory_gb,
        profile.settings.max_workers,
        profile.settings.udp_send_buffer,
        profile.settings.target_fps,
    );

    let res = Arc::new(Mutex::new(Resources::new()));
    let mapper = Arc::new(UuidMapper::load(config.prisma.uuid_map_file.clone()));

    let svc = EntertainmentService::new(config, &profile, res.clone(), mapper);
    let entertainment = service::spawn("entertainment", svc);

    tokio::signal::ctrl_c().await?;
    log::warn!("Ctrl-C pressed, exiting..");
    entertainment.abort();

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("Prisma error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
    }
}
