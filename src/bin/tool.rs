//! ShardKV Tool
//!
//! Inspect and modify a ShardKV data directory.

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shardkv::store::key::escape;
use shardkv::{Config, Int64ArrayMergeOperator, KvIterator, Result, Store, StoreBuilder};
use tracing_subscriber::{fmt, EnvFilter};

/// ShardKV Tool
#[derive(Parser, Debug)]
#[command(name = "shardkv-tool")]
#[command(about = "Inspect and modify a ShardKV store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./shardkv_data")]
    data_dir: String,

    /// Sharding definition, e.g. "O(6) m(7,10-)"
    #[arg(short, long, default_value = "")]
    sharding: String,

    /// Engine and store option string
    #[arg(short, long, default_value = "")]
    options: String,

    /// Prefixes whose values are merged as i64 arrays
    #[arg(long = "int64-merge")]
    int64_merge: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new store with the given sharding
    Create,

    /// Get a value
    Get { prefix: String, key: String },

    /// Set a value
    Set {
        prefix: String,
        key: String,
        value: String,
    },

    /// Merge an i64 into a value of an --int64-merge prefix
    Add {
        prefix: String,
        key: String,
        amount: i64,
    },

    /// Remove a key
    Rm { prefix: String, key: String },

    /// Remove every key of a prefix
    RmPrefix { prefix: String },

    /// List the keys of a prefix, or of the shared family when omitted
    List { prefix: Option<String> },

    /// Compact everything
    Compact,

    /// Repair a damaged store
    Repair,

    /// Print the stored sharding and column families
    Sharding,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shardkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("ShardKV tool v{}", shardkv::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn builder(args: &Args) -> StoreBuilder {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .options(&args.options)
        .build();
    args.int64_merge
        .iter()
        .fold(StoreBuilder::new(config), |builder, prefix| {
            builder.merge_operator(prefix.clone(), Arc::new(Int64ArrayMergeOperator))
        })
}

fn open(args: &Args) -> Result<Store> {
    builder(args).open_existing(&args.sharding)
}

fn run(args: Args) -> Result<()> {
    match &args.command {
        Commands::Create => {
            let store = builder(&args).create_and_open(&args.sharding)?;
            println!("created {}", store.data_dir().display());
            store.close()
        }
        Commands::Get { prefix, key } => {
            let store = open(&args)?;
            match store.get(prefix, key.as_bytes())? {
                Some(value) => println!("{}", escape(&value)),
                None => println!("(not found)"),
            }
            store.close()
        }
        Commands::Set { prefix, key, value } => {
            let store = open(&args)?;
            let mut tx = store.new_transaction();
            tx.set(prefix, key.as_bytes(), value.as_bytes());
            store.submit(tx, true)?;
            store.close()
        }
        Commands::Add { prefix, key, amount } => {
            let store = open(&args)?;
            let mut tx = store.new_transaction();
            tx.merge(prefix, key.as_bytes(), Int64ArrayMergeOperator::encode(&[*amount]));
            store.submit(tx, true)?;
            if let Some(value) = store.get(prefix, key.as_bytes())? {
                println!("{:?}", Int64ArrayMergeOperator::decode(&value));
            }
            store.close()
        }
        Commands::Rm { prefix, key } => {
            let store = open(&args)?;
            let mut tx = store.new_transaction();
            tx.remove(prefix, key.as_bytes());
            store.submit(tx, true)?;
            store.close()
        }
        Commands::RmPrefix { prefix } => {
            let store = open(&args)?;
            let mut tx = store.new_transaction();
            tx.remove_range_by_prefix(prefix)?;
            let operations = tx.len();
            store.submit(tx, true)?;
            println!("{} operations", operations);
            store.close()
        }
        Commands::List { prefix } => {
            let store = open(&args)?;
            match prefix {
                Some(prefix) => {
                    let mut it = store.get_iterator(prefix);
                    it.seek_to_first()?;
                    while it.valid() {
                        println!("{} = {}", escape(it.key()), escape(&it.value()));
                        it.next()?;
                    }
                    it.status()?;
                }
                None => {
                    let mut it = store.whole_space_iterator();
                    it.seek_to_first()?;
                    while it.valid() {
                        let (prefix, key) = it.raw_key()?;
                        println!("{} {} = {}", prefix, escape(&key), escape(&it.value()));
                        it.next()?;
                    }
                    it.status()?;
                }
            }
            store.close()
        }
        Commands::Compact => {
            let store = open(&args)?;
            store.compact_now()?;
            store.close()
        }
        Commands::Repair => {
            builder(&args).repair()?;
            println!("repaired {}", args.data_dir);
            Ok(())
        }
        Commands::Sharding => {
            let store = open(&args)?;
            println!("sharding: {}", store.sharding_definition());
            for name in store.column_family_names() {
                println!("  {}", name);
            }
            store.close()
        }
    }
}
