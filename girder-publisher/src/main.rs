//! The trace-publishing sidecar.
//!
//! Long-running bridge between the span queue that services on this host
//! write to and the trace collector: messages are drained from the queue,
//! batched by size and age, and POSTed with retry. On SIGINT or SIGTERM
//! the queue is drained and the remaining batch published before exit.
use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info, LevelFilter};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use girder::config::Config;
use girder::trace_queue_name;
use girder_mq::{MessageQueue, MessageQueueError, PosixMessageQueue};

use crate::batch::{BatchFull, RawJsonBatch, TimeLimitedBatch};
use crate::publish::{PublishError, ZipkinPublisher, POST_TIMEOUT_DEFAULT, RETRY_LIMIT_DEFAULT};

mod batch;
mod publish;

/// The maximum size of a batch of traces, in bytes.
const MAX_BATCH_SIZE_DEFAULT: usize = 500 * 1024;

/// The maximum time a trace sits in a batch waiting for company.
const MAX_BATCH_AGE: Duration = Duration::from_secs(1);

/// How long each queue poll waits for a message.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// How long a shutdown drain may take before remaining messages are
/// abandoned to the queue.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown(_: nix::libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

#[derive(Parser)]
#[command(about = "publish queued span records to the trace collector")]
struct Args {
    /// path to a configuration file
    config_file: PathBuf,

    /// name of trace queue / publisher config section (default: main)
    #[arg(long, default_value = "main")]
    queue_name: String,

    /// enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    install_shutdown_handlers().context("failed to install signal handlers")?;

    let config = load_config(&args.config_file, &args.queue_name)?;
    let api_url = config.get_string("zipkin_api_url")?;
    let post_timeout = Duration::from_secs(config.get_integer_or(
        "post_timeout",
        POST_TIMEOUT_DEFAULT.as_secs() as i64,
    )? as u64);
    let max_batch_size =
        config.get_integer_or("max_batch_size", MAX_BATCH_SIZE_DEFAULT as i64)? as usize;
    let retry_limit = config.get_integer_or("retry_limit", RETRY_LIMIT_DEFAULT as i64)? as usize;
    let max_queue_size =
        config.get_integer_or("max_queue_size", girder_mq::DEFAULT_MAX_MESSAGES)?;

    let queue = PosixMessageQueue::open(
        &trace_queue_name(&args.queue_name),
        max_queue_size,
        girder_mq::DEFAULT_MAX_MESSAGE_SIZE,
    )
    .context("failed to open trace queue")?;
    info!("publishing traces from {} to {}", queue.name(), api_url);

    let publisher = ZipkinPublisher::new(&api_url, post_timeout, retry_limit)
        .context("failed to build collector client")?;
    let mut batcher = TimeLimitedBatch::new(RawJsonBatch::new(max_batch_size), MAX_BATCH_AGE);

    let mut drain_started: Option<Instant> = None;
    loop {
        let message = match queue.get(Some(POLL_TIMEOUT)) {
            Ok(message) => Some(message),
            Err(MessageQueueError::TimedOut) => None,
            Err(err) => bail!("error reading trace queue: {}", err),
        };

        if batcher.add(message.as_deref()).is_err() {
            publish_batch(&publisher, &mut batcher)?;
            if let Err(BatchFull) = batcher.add(message.as_deref()) {
                error!("span record larger than the batch byte budget, dropping it");
            }
        }

        if SHUTDOWN.load(Ordering::SeqCst) {
            let drain_started = *drain_started.get_or_insert_with(Instant::now);
            if message.is_none() {
                // empty for a full poll interval; flush what we have
                publish_batch(&publisher, &mut batcher)?;
                info!("trace queue drained, exiting");
                return Ok(());
            }
            if drain_started.elapsed() >= DRAIN_TIMEOUT {
                publish_batch(&publisher, &mut batcher)?;
                info!("drain timeout elapsed, exiting");
                return Ok(());
            }
        }
    }
}

/// Publishes and resets the current batch.
///
/// Retry exhaustion drops the batch and keeps the publisher alive; a
/// fatal collector response propagates and terminates the process.
fn publish_batch(
    publisher: &ZipkinPublisher,
    batcher: &mut TimeLimitedBatch,
) -> anyhow::Result<()> {
    let payload = batcher.serialize();
    batcher.reset();
    match publisher.publish(&payload) {
        Ok(()) => Ok(()),
        Err(PublishError::RetriesExhausted(attempts)) => {
            error!(
                "dropping batch of {} traces after {} failed attempts",
                payload.item_count, attempts
            );
            Ok(())
        }
        Err(err) => Err(err).context("publishing failed"),
    }
}

fn install_shutdown_handlers() -> nix::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

fn load_config(path: &PathBuf, queue_name: &str) -> anyhow::Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let table: toml::Table = raw
        .parse()
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let section = table
        .get("trace-publisher")
        .and_then(|publishers| publishers.get(queue_name))
        .and_then(|section| section.as_table())
        .with_context(|| {
            format!(
                "no [trace-publisher.{}] section in {}",
                queue_name,
                path.display()
            )
        })?;

    Ok(Config::from_pairs(section.iter().map(|(key, value)| {
        let value = match value {
            toml::Value::String(value) => value.clone(),
            other => other.to_string(),
        };
        (key.clone(), value)
    })))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_section_selection() {
        let mut file = tempfile();
        writeln!(
            file.1,
            "[trace-publisher.main]\n\
             zipkin_api_url = \"http://collector:9411/api/v1\"\n\
             retry_limit = 5\n\
             \n\
             [trace-publisher.other]\n\
             zipkin_api_url = \"http://elsewhere:9411\"\n"
        )
        .unwrap();

        let config = load_config(&file.0, "main").unwrap();
        assert_eq!(
            config.get_string("zipkin_api_url").unwrap(),
            "http://collector:9411/api/v1"
        );
        assert_eq!(config.get_integer_or("retry_limit", 10).unwrap(), 5);

        let other = load_config(&file.0, "other").unwrap();
        assert_eq!(
            other.get_string("zipkin_api_url").unwrap(),
            "http://elsewhere:9411"
        );

        assert!(load_config(&file.0, "missing").is_err());
    }

    fn tempfile() -> (PathBuf, fs::File) {
        let path = std::env::temp_dir().join(format!(
            "girder-publisher-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let file = fs::File::create(&path).unwrap();
        (path, file)
    }
}
