use clap::Parser;
use mongo_migrate::{run_migration, Endpoint, MigrateError, MigrateSection, SyncerConfig};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(version = env!("CARGO_PKG_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// configuration file path, command line values take precedence over it.
    #[clap(short, long)]
    conf: Option<String>,
    /// source mongodb uri.
    #[clap(short, long, env = "SOURCE_URI")]
    src_uri: Option<String>,
    /// target mongodb uri.
    #[clap(short, long, env = "TARGET_URI")]
    target_uri: Option<String>,
    /// source database name.
    #[clap(long, env = "SOURCE_DB")]
    src_db: Option<String>,
    /// target database name.
    #[clap(long, env = "TARGET_DB")]
    target_db: Option<String>,
    /// only migrate these collections, separated by comma.
    #[clap(long, value_delimiter = ',')]
    colls: Option<Vec<String>>,
    /// documents per bulk insert.
    #[clap(short, long)]
    batch_size: Option<usize>,
    /// how many collections to migrate at the same time.
    #[clap(long)]
    collection_concurrent: Option<usize>,
    /// deadline of the whole migration, in seconds.
    #[clap(long)]
    timeout_secs: Option<u64>,
    /// deadline of one collection, in seconds.
    #[clap(long)]
    collection_timeout_secs: Option<u64>,
    /// log file path, if not specified, all log information will be output to stdout.
    #[clap(long)]
    log_path: Option<String>,
}

impl Opts {
    fn to_config(&self) -> SyncerConfig {
        SyncerConfig {
            src: Endpoint {
                url: self.src_uri.clone(),
                db: self.src_db.clone(),
            },
            dst: Endpoint {
                url: self.target_uri.clone(),
                db: self.target_db.clone(),
            },
            migrate: MigrateSection {
                batch_size: self.batch_size,
                colls: self.colls.clone(),
                collection_concurrent: self.collection_concurrent,
                timeout_secs: self.timeout_secs,
                collection_timeout_secs: self.collection_timeout_secs,
            },
        }
    }
}

fn main() {
    // `process::exit` skips destructors, run everything in `run` so the log writer is flushed.
    std::process::exit(run());
}

fn run() -> i32 {
    let opts: Opts = Opts::parse();
    let (non_blocking, _guard) = match &opts.log_path {
        Some(path) => {
            let path = Path::new(path);
            let dir_name = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| "mongo_migrate.log".as_ref());
            let file_appender = tracing_appender::rolling::daily(dir_name, file_name);
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .init();

    let conf = match &opts.conf {
        Some(path) => match SyncerConfig::from_path(path) {
            Ok(file_conf) => file_conf.overlay(opts.to_config()),
            Err(e) => return report_failure(e),
        },
        None => opts.to_config(),
    }
    .resolve();
    info!(
        src_db = conf.get_src_db(),
        dst_db = conf.get_dst_db(),
        batch_size = conf.get_batch_size(),
        collection_concurrent = conf.get_collection_concurrent(),
        "Use the following config to migrate database"
    );

    match run_migration(&conf) {
        Ok(summary) => {
            for coll in summary.collections.iter() {
                info!(coll = %coll.name, count = coll.read, inserted = coll.inserted, rejected = coll.rejected, "Collection summary");
            }
            0
        }
        Err(e) => report_failure(e),
    }
}

fn report_failure(e: MigrateError) -> i32 {
    let coll = e.collection().unwrap_or("-");
    error!(op = %e.operation(), %coll, "Migration failed: {}", e);
    1
}
