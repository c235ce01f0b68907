use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use heapdb::HeapDB;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Interactive SQL shell over a heap file database
#[derive(Parser, Debug)]
#[command(name = "heapdb", version, about = "HeapDB SQL shell")]
struct Args {
    /// Directory holding the database files
    #[arg(
        short = 'd',
        long,
        value_name = "DIR",
        default_value = "./heapdb-data",
        env = "HEAPDB_DATA_DIR"
    )]
    data_dir: PathBuf,

    /// Keep everything in memory; nothing is written to disk
    #[arg(long)]
    memory: bool,

    /// Run one statement, print its result and exit
    #[arg(short = 'c', long, value_name = "SQL")]
    command: Option<String>,

    /// Log level (error, warn, info, debug, trace) or a full filter directive
    #[arg(long, default_value = "warn", env = "HEAPDB_LOG")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(format!("heapdb={}", args.log_level))
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();

    let mut db = if args.memory {
        info!("opening in-memory database");
        HeapDB::in_memory()?
    } else {
        info!(dir = %args.data_dir.display(), "opening database");
        HeapDB::open(&args.data_dir)?
    };

    if let Some(sql) = args.command {
        let result = db.execute(&sql)?;
        println!("{result}");
        return Ok(());
    }

    println!("HeapDB v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'help' for commands, 'quit' to exit");
    println!();

    loop {
        print!("SQL> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            println!();
            break;
        }
        let input = input.trim();

        match input {
            "quit" | "exit" => break,
            "help" => {
                show_help();
                continue;
            }
            "" => continue,
            _ => {}
        }

        match db.execute(input) {
            Ok(result) => println!("{result}"),
            Err(e) => println!("Error: {e}"),
        }
    }

    Ok(())
}

fn show_help() {
    println!("HeapDB commands:");
    println!("  help                - Show this help message");
    println!("  quit/exit           - Exit the shell");
    println!();
    println!("Supported SQL:");
    println!("  CREATE TABLE [IF NOT EXISTS] t (column INT|TEXT, ...)");
    println!("  CREATE INDEX ix ON t [USING BTREE|HASH] (column, ...)");
    println!("  DROP TABLE t");
    println!("  DROP INDEX ix FROM t");
    println!("  SHOW TABLES | SHOW COLUMNS FROM t | SHOW INDEX FROM t");
    println!("  INSERT INTO t [(column, ...)] VALUES (value, ...)");
    println!("  SELECT * | column, ... FROM t [WHERE column = value [AND ...]]");
    println!("  DELETE FROM t [WHERE column = value [AND ...]]");
    println!();
    println!("Example:");
    println!("  CREATE TABLE students (id INT, name TEXT)");
    println!("  INSERT INTO students VALUES (1, 'Alice')");
    println!("  SELECT name FROM students WHERE id = 1");
}
