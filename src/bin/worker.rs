#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = grading_orchestrator::run_worker().await {
        eprintln!("grading-orchestrator-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
