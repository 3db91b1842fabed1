use dyesub_backend::config::{Config, TestMode};
use dyesub_backend::cups::{self, BackendStatus};
use dyesub_backend::engine::{CancelToken, ProtocolEngine};
use dyesub_backend::family::{BankedFamily, Family, FamilyKind, TaggedFamily};
use dyesub_backend::job::JobHeader;
use dyesub_backend::policy;
use dyesub_backend::spool::{ReadOptions, SpoolCursor};
use dyesub_backend::transport::{discover, Transport, UsbTransport};
use dyesub_backend::{EngineError, FormatError};

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use log::LevelFilter;

/// CUPS backend for dye-sublimation photo printers.
/// Without arguments, list the attached printers for device discovery.
#[derive(Parser, Debug)]
#[command(name = "dyesub", version)]
struct Args {
    job_id: Option<String>,
    user: Option<String>,
    title: Option<String>,
    copies: Option<u16>,
    options: Option<String>,

    /// Spool file; standard input when absent.
    file: Option<PathBuf>,
}

/// Parse the CUPS argument vector.
/// Help and version requests end the run successfully, anything unusable fails it.
fn parse_args<I, T>(argv: I) -> Result<Args, BackendStatus>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Args::try_parse_from(argv).map_err(|err| match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = err.print();
            BackendStatus::Ok
        }
        _ => {
            log::error!("{}", err.to_string().trim_start_matches("error: "));
            BackendStatus::Failed
        }
    })
}

/// CUPS cancels a job with SIGTERM.
fn install_sigterm_handler(cancel: &CancelToken) {
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.flag()) {
        log::warn!("Cannot watch for SIGTERM: {}", err);
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            cups::init_logging(LevelFilter::Info);
            log::error!("{}", err);
            return BackendStatus::Failed.into();
        }
    };

    cups::init_logging(config.log_level());

    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(status) => return status.into(),
    };

    if args.job_id.is_none() {
        return list_devices(&config).into();
    }

    log::debug!(
        "Job {:?} for {:?}: {:?}, options {:?}",
        args.job_id,
        args.user,
        args.title,
        args.options
    );

    let input: Box<dyn Read> = match &args.file {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(file),
            Err(err) => {
                log::error!("Cannot open {:?}: {}", path, err);
                return BackendStatus::Failed.into();
            }
        },
        None => Box::new(io::stdin().lock()),
    };

    let options = ReadOptions {
        copies_override: args.copies.filter(|copies| *copies > 1),
        timestamp: chrono::Local::now().naive_local(),
    };

    let cancel = CancelToken::new();
    install_sigterm_handler(&cancel);

    run(&config, SpoolCursor::new(input), &options, cancel).into()
}

fn list_devices(config: &Config) -> BackendStatus {
    match discover(config.extra_model) {
        Ok(devices) => {
            for device in devices {
                println!("{}", cups::device_line(device.model.family(), &device));
            }
            BackendStatus::Ok
        }
        Err(err) => {
            log::error!("Device discovery failed: {}", err);
            BackendStatus::Failed
        }
    }
}

fn banked_family(config: &Config) -> Option<BankedFamily> {
    match config.load_correction_table() {
        Ok(table) => Some(BankedFamily::new(table).with_combining(config.combine_jobs)),
        Err(err) => {
            log::error!("{}", err);
            None
        }
    }
}

fn run<R: Read>(
    config: &Config,
    mut cursor: SpoolCursor<R>,
    options: &ReadOptions,
    cancel: CancelToken,
) -> BackendStatus {
    if config.test_mode == TestMode::NoAttach {
        let Some(uri) = &config.device_uri else {
            log::error!("Without a device, DEVICE_URI has to name the printer family");
            return BackendStatus::Failed;
        };

        return match uri.family {
            FamilyKind::Banked => match banked_family(config) {
                Some(family) => parse_only(&family, &mut cursor, options, config),
                None => BackendStatus::Failed,
            },
            FamilyKind::Tagged => parse_only(&TaggedFamily::new(), &mut cursor, options, config),
        };
    }

    let transport = match UsbTransport::attach(&config.attach_filter()) {
        Ok(transport) => transport,
        Err(err) => {
            log::error!("{}", err);
            return policy::for_transport(&err).exit_status();
        }
    };

    match transport.connection().family {
        FamilyKind::Banked => match banked_family(config) {
            Some(family) => print_jobs(&family, transport, &mut cursor, options, config, cancel),
            None => BackendStatus::Failed,
        },
        FamilyKind::Tagged => {
            print_jobs(&TaggedFamily::new(), transport, &mut cursor, options, config, cancel)
        }
    }
}

/// Validate every job in the spool and report the media as if it were loaded.
fn parse_only<F: Family, R: Read>(
    family: &F,
    cursor: &mut SpoolCursor<R>,
    options: &ReadOptions,
    config: &Config,
) -> BackendStatus {
    let mut jobs = 0;
    let mut media = config.media_code;

    loop {
        match family.read_job(cursor, options) {
            Ok(job) => {
                jobs += 1;
                media.get_or_insert(job.header.media());
                log::info!(
                    "Job {}: {}x{}, {} copies, {} bytes",
                    jobs,
                    job.header.columns(),
                    job.header.rows(),
                    job.header.copies(),
                    job.payload_len()
                );
            }
            Err(FormatError::EndOfStream) if jobs > 0 => break,
            Err(err) => {
                log::error!("{}", err);
                return policy::for_format(&err).exit_status();
            }
        }
    }

    let markers = family.offline_markers(media.unwrap_or(0));
    let _ = cups::report_markers(&mut io::stderr(), &markers);

    BackendStatus::Ok
}

fn print_jobs<F: Family, T: Transport, R: Read>(
    family: &F,
    transport: T,
    cursor: &mut SpoolCursor<R>,
    options: &ReadOptions,
    config: &Config,
    cancel: CancelToken,
) -> BackendStatus {
    let mut out = io::stderr();
    let mut engine = ProtocolEngine::new(family, transport, config.engine(), cancel.clone());

    if config.test_mode == TestMode::NoPrint {
        return match engine.poll_status() {
            Ok(report) => {
                log::info!("Printer status: {}", family.describe(&report.status));
                let _ = cups::report_markers(&mut out, &report.markers);
                BackendStatus::Ok
            }
            Err(err) => report_failure(family, &engine, &err),
        };
    }

    let mut spool = SpoolState::default();
    let mut page = 0;

    loop {
        // Keep the next job in hand so neighbours can be combined.
        loop {
            fill_pending(family, &mut engine, cursor, options, &mut spool);

            if !engine.combine_pending() {
                break;
            }
        }

        let Some(result) = engine.run_next() else {
            break;
        };

        match result {
            Ok(summary) => {
                page += 1;
                let _ = cups::report_page(&mut out, page, summary.copies_submitted);
                let _ = cups::report_markers(&mut out, engine.markers());
            }
            Err(err) => return report_failure(family, &engine, &err),
        }

        if cancel.is_cancelled() {
            log::info!("Cancelled, remaining jobs are dropped");
            break;
        }
    }

    if let Some(err) = spool.error {
        log::error!("{}", err);
        return policy::for_format(&err).exit_status();
    }

    let _ = cups::clear_state_reasons(&mut out);

    log::info!("Printed {} jobs", page);
    BackendStatus::Ok
}

#[derive(Debug, Default)]
struct SpoolState {
    jobs_read: u32,
    done: bool,
    error: Option<FormatError>,
}

/// Read jobs until two are pending or the spool is done.
/// A spool error ends the reading; the jobs before it still print.
fn fill_pending<F: Family, T: Transport, R: Read>(
    family: &F,
    engine: &mut ProtocolEngine<'_, F, T>,
    cursor: &mut SpoolCursor<R>,
    options: &ReadOptions,
    spool: &mut SpoolState,
) {
    while !spool.done && engine.queue().pending() < 2 {
        match family.read_job(cursor, options) {
            Ok(job) => {
                spool.jobs_read += 1;
                engine.enqueue(job);
            }
            Err(FormatError::EndOfStream) if spool.jobs_read > 0 => spool.done = true,
            Err(err) => {
                spool.done = true;
                spool.error = Some(err);
            }
        }
    }
}

fn report_failure<F: Family, T: Transport>(
    family: &F,
    engine: &ProtocolEngine<'_, F, T>,
    err: &EngineError,
) -> BackendStatus {
    let mut out = io::stderr();
    let _ = cups::report_markers(&mut out, engine.markers());

    match err {
        EngineError::Device(status) => {
            if let Some(reason) = cups::state_reason(status) {
                let _ = cups::set_state_reason(&mut out, reason, true);
            }
            log::error!("{}", family.describe(status));
        }
        other => log::error!("{}", other),
    }

    policy::for_error(err).exit_status()
}
