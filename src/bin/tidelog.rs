//! tidelog CLI
//!
//! Inspect, append to and tail a queue directory.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tidelog::queue::QueueMetadata;
use tidelog::store::{RecordKind, SegmentStore};
use tidelog::{Config, Queue, ReplicationCounters, RollCycle, WriteCursor};
use tracing_subscriber::{fmt, EnvFilter};

/// tidelog
#[derive(Parser, Debug)]
#[command(name = "tidelog")]
#[command(about = "Memory-mapped, time-rolled message queue tool")]
#[command(version)]
struct Args {
    /// Roll cycle for a queue that has no metadata yet
    #[arg(long, global = true, default_value = "DAILY")]
    roll_cycle: String,

    /// Epoch (millis since the Unix epoch) for a queue that has no metadata yet
    #[arg(long, global = true, default_value = "0", allow_hyphen_values = true)]
    epoch: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the metadata, segment headers and every record
    Dump {
        /// Queue directory
        dir: PathBuf,
    },

    /// Append each message as one record
    Append {
        /// Queue directory
        dir: PathBuf,

        /// Messages to append
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Print readable records, one per line
    Tail {
        /// Queue directory
        dir: PathBuf,

        /// Start after the last record instead of at the first
        #[arg(long)]
        from_end: bool,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tidelog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match &args.command {
        Commands::Dump { dir } => dump(dir),
        Commands::Append { dir, messages } => append(&args, dir, messages),
        Commands::Tail { dir, from_end } => tail(dir, *from_end),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn dump(dir: &Path) -> tidelog::Result<()> {
    let queue = Queue::open_existing(dir, true)?;
    let metadata = queue.metadata();
    println!(
        "queue {:?}: roll cycle {}, epoch {}, source id {}",
        dir,
        metadata.roll_cycle.name(),
        metadata.epoch,
        metadata.source_id
    );

    for cycle in queue.cycles()? {
        match queue.store_for_cycle(cycle, false)? {
            Some(store) => dump_segment(&queue, &store)?,
            None => println!("cycle {}: missing", cycle),
        }
    }
    Ok(())
}

fn dump_segment(queue: &Queue, store: &SegmentStore) -> tidelog::Result<()> {
    let header = store.header();
    println!(
        "--- {:?} cycle {} ({:?}) capacity {} allocated {} interval {} write position {} closed {}",
        store.path(),
        store.cycle(),
        store.header_state(),
        header.capacity,
        store.allocated(),
        header.delta_checkpoint_interval,
        store.write_position(),
        store.is_closed()
    );
    println!(
        "    replicated {:?} acknowledged {:?}",
        store.last_index_replicated(),
        store.last_acknowledged_index_replicated()
    );

    for record in store.records() {
        match record.kind {
            RecordKind::Data { sequence, len } => {
                let index = queue.roll_cycle().to_index(store.cycle(), sequence)?;
                println!(
                    "{:>10}  data        index {:#x} sequence {} len {}",
                    record.position, index, sequence, len
                );
            }
            RecordKind::Checkpoint { sequence, position } => println!(
                "{:>10}  checkpoint  sequence {} at {}",
                record.position, sequence, position
            ),
            RecordKind::Padding { len } => {
                println!("{:>10}  padding     len {}", record.position, len)
            }
            RecordKind::Busy => println!("{:>10}  busy", record.position),
            RecordKind::EndOfFile => println!("{:>10}  eof", record.position),
            RecordKind::Corrupted { word } => {
                println!("{:>10}  corrupted   word {:#010x}", record.position, word)
            }
        }
    }
    Ok(())
}

fn append(args: &Args, dir: &Path, messages: &[String]) -> tidelog::Result<()> {
    let config = match QueueMetadata::load(dir)? {
        Some(metadata) => metadata.to_config(dir),
        None => {
            let roll_cycle = RollCycle::from_name(&args.roll_cycle).ok_or_else(|| {
                tidelog::TideError::Config(format!("unknown roll cycle {:?}", args.roll_cycle))
            })?;
            Config::builder()
                .data_dir(dir)
                .roll_cycle(roll_cycle)
                .epoch(args.epoch)
                .build()
        }
    };

    let queue = Queue::open(config)?;
    let mut appender = queue.acquire_appender()?;
    for message in messages {
        let index = appender.write_bytes(message.as_bytes())?;
        println!("{:#x}", index);
    }
    Ok(())
}

fn tail(dir: &Path, from_end: bool) -> tidelog::Result<()> {
    let queue = Queue::open_existing(dir, true)?;
    let mut tailer = queue.create_tailer();
    if from_end {
        tailer.to_end()?;
    }

    while let Some(document) = tailer.reading_document()? {
        println!(
            "{:#x}  {}",
            document.index(),
            String::from_utf8_lossy(document.payload())
        );
    }
    Ok(())
}
