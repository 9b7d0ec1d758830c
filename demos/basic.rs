use trino_http::{Statement, TrinoClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = TrinoClient::from_env()?;

    let info = client.server_info().await?;
    println!("connected to Trino {} ({})", info.node_version.version, info.environment);

    client.execute("USE tpch.tiny").await?;

    let statement = Statement::query("SELECT name, regionkey FROM nation WHERE regionkey = ?")
        .bind(1)
        .on_status(|stats, error| match error {
            Some(error) => eprintln!("query failed: {}", error.message),
            None => eprintln!("processed {} rows", stats.processed_rows),
        });

    let mut records = client.query(statement).await?;
    while records.next().await? {
        let name: String = records.get(0)?;
        let region: i64 = records.get(1)?;
        println!("{name} {region}");
    }

    Ok(())
}
