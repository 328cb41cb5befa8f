use anyhow::Result;
use otinv::db::{migrate, seed, Db};
use otinv::Config;
use std::path::Path;

/// Load the sample inventory fixture into the configured database.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(move |conn| migrate::run_migrations(conn, migrations_dir))
        .await?;

    let seeded = seed::seed_sample_data(&db, &config.inventory.seed_data_path).await?;
    if seeded == 0 {
        log::info!("Database already contains assets; nothing to seed");
    } else {
        log::info!("Seeded {} sample assets", seeded);
    }

    Ok(())
}
