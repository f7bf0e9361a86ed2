use std::{env, fs::File, io, path::Path};

use tracing::info;

use balance_ledger::config::Config;
use balance_ledger::dlq::StdErrDLQ;
use balance_ledger::domain::{BalanceStore, Error};
use balance_ledger::engine::Ledger;
use balance_ledger::ingestion::CsvReader;
use balance_ledger::logging;
use balance_ledger::output::CsvOutput;
use balance_ledger::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    logging::init(&config.log);

    let file_path = env::args().nth(1).ok_or_else(|| {
        Error::Config("usage: balance_ledger <commands.csv>".to_string())
    })?;
    let file = File::open(Path::new(&file_path))?;

    // Set up the components
    let store = MemoryStore::from_config(&config.store);
    let ledger = Ledger::with_rules(store.clone(), store, config.ledger.clone());
    let mut ingestion = CsvReader::new(file)?;
    let dlq = StdErrDLQ::new();

    let summary = ledger.process(&mut ingestion, &dlq).await?;
    info!(
        service = %config.service_name,
        applied = summary.applied,
        rejected = summary.rejected,
        "replay finished"
    );

    let balances = BalanceStore::list(ledger.store()).await?;
    let mut output = CsvOutput::new(io::stdout().lock());
    output.write_balances(&balances)?;

    Ok(())
}
