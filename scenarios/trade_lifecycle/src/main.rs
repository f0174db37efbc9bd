use gale_http_runner::prelude::*;
use trade_lifecycle::TradeDefinition;

fn main() -> GaleResult<()> {
    let builder = trade_lifecycle::define(TradeDefinition::new_with_init(env!("CARGO_PKG_NAME")))?;

    let outcome = run(builder)?;

    std::process::exit(outcome.exit_code());
}
