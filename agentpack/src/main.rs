fn main() -> anyhow::Result<()> {
    agentpack::run_cli()
}
