use crate::config::FileConfig;

pub fn run(config: &FileConfig) -> anyhow::Result<()> {
    let manager = config.manager()?;
    let quorum = manager.config();

    println!("Configuration is valid.");
    println!("  stores:        {}", manager.store_count());
    println!("  quorum:        {}", manager.quorum());
    println!("  default ttl:   {:?}", quorum.default_ttl);
    println!(
        "  store timeout: {:?}",
        quorum.store_timeout_for(quorum.default_ttl)
    );
    println!(
        "  retry:         {} retries, {:?}..={:?}",
        quorum.retry.max_retries, quorum.retry.delay_min, quorum.retry.delay_max
    );
    if let Some(namespace) = &config.lock.namespace {
        println!("  namespace:     {namespace}");
    }
    Ok(())
}
