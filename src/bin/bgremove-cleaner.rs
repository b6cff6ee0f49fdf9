//! Background removal HTTP service
//!
//! Serves `/clean`, `/healthz`, `/selftest` and `/info` with the model selected
//! by `--model` / `--execution-provider` (or their `CLEANER_*` variables).

use bgremove_cleaner::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
