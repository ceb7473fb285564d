//! Small demo binary exercising the public `stratum` API end to end:
//! opens a resource directory, runs a handful of read/write
//! transactions through the instrumented facade, and prints the
//! resulting buffer-cache / allocator statistics. Not a product
//! surface, just a way to poke the library from a shell.

use std::path::PathBuf;

use clap::Parser;
use stratum::{
    CodecKind, Database, DatabaseId, IndexNumber, IndexType, InstrumentedDatabase, PageKey,
    ResourceId, Slot, StorageConfig, VersioningStrategy,
};

#[derive(Parser)]
#[command(about = "Runs a handful of transactions against a stratum database and reports stats")]
struct Args {
    /// Directory the database lives in; created if absent.
    #[arg(long, default_value = "stratum-demo-db")]
    root: PathBuf,

    /// Resource id to operate on.
    #[arg(long, default_value_t = 1)]
    resource: u64,

    /// Number of write transactions to run before reading back.
    #[arg(long, default_value_t = 10)]
    writes: u64,
}

fn main() -> stratum::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = StorageConfig::new()
        .with_codec(CodecKind::Identity)
        .with_versioning_strategy(VersioningStrategy::Incremental { restore_window: 8 });
    let database = Database::open(&args.root, DatabaseId(1), config)?;
    let instrumented = InstrumentedDatabase::new(database);

    let resource_id = ResourceId(args.resource);
    for record in 0..args.writes {
        let page_key = PageKey::of_record(record);
        let slot = Slot::of_record(record);

        let mut writer = instrumented.begin_write(resource_id)?;
        writer.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key)?;
        writer.write_record(IndexType::DOCUMENT, page_key, slot, format!("record-{record}").into_bytes())?;
        let revision = writer.commit(record)?;
        tracing::info!(?revision, record, "committed");
    }

    let mut reader = instrumented.begin_read(resource_id)?;
    for record in 0..args.writes {
        let page_key = PageKey::of_record(record);
        let slot = Slot::of_record(record);
        reader.fetch_page(IndexType::DOCUMENT, IndexNumber(0), page_key)?;
        let payload = reader.read_record(IndexType::DOCUMENT, page_key, slot)?;
        println!("record {record}: {}", String::from_utf8_lossy(&payload));
    }

    let stats = instrumented.stats();
    println!(
        "reads={} writes={} commits={} rollbacks={} cache_hits={} cache_misses={} evictions={}",
        stats.page_reads,
        stats.page_writes,
        stats.commits,
        stats.rollbacks,
        stats.cache_hits,
        stats.cache_misses,
        stats.evictions,
    );

    Ok(())
}
