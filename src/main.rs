use std::process::ExitCode;
use std::thread;

use log::{error, info};

use strata::{init_log, Engine, Result, StorageConfig};

const DEMO_OID: u64 = 1;
const ROWS: u64 = 10_000;

fn run() -> Result<()> {
    let config = StorageConfig::from_env()?;
    info!(
        "data dir {}, {} slots",
        config.data_dir.display(),
        config.slot_count
    );
    let engine = Engine::new(config)?;

    let tree = match engine.open_table(DEMO_OID) {
        Ok(tree) => tree,
        Err(_) => engine.create_table(DEMO_OID, 8)?,
    };

    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..4u64)
            .map(|worker| {
                let tree = &tree;
                scope.spawn(move || -> Result<()> {
                    for key in (worker..ROWS).step_by(4) {
                        match tree.insert(key, &(key * 10).to_le_bytes()) {
                            Ok(()) | Err(strata::StrataError::DuplicateKey(_)) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| strata::StrataError::Worker("insert worker panicked".into()))??;
        }
        Ok(())
    })?;

    let rows = tree.scan_parallel(8)?;
    println!("rows: {}, height: {}", rows.len(), tree.height()?);
    if let Some(value) = tree.get(4242)? {
        println!("key 4242 -> {:?}", &value[..]);
    }
    let stats = engine.manager().stats();
    println!(
        "hits {} misses {} evictions {} reads {} writes {}",
        stats.hits, stats.misses, stats.evictions, stats.reads, stats.writes
    );

    engine.shutdown()?;
    Ok(())
}

fn main() -> ExitCode {
    init_log();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
