use anyhow::Result;
use otinv::db::{migrate, seed, Db};
use otinv::mcp::{HttpMcpServer, McpServer};
use otinv::Config;
use std::path::Path;

#[derive(Debug, PartialEq)]
enum Command {
    Serve,
    ServeHttp,
    Verify,
}

fn parse_command(arg: Option<&str>) -> Option<Command> {
    match arg {
        None | Some("verify") => Some(Command::Verify),
        Some("serve") => Some(Command::Serve),
        Some("serve-http") => Some(Command::ServeHttp),
        Some(_) => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // MCP stdio transport owns stdout, so logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args: Vec<String> = std::env::args().collect();
    let command = match parse_command(args.get(1).map(|s| s.as_str())) {
        Some(command) => command,
        None => {
            eprintln!("Unknown command: {}", args[1]);
            eprintln!("Usage: otinv [serve | serve-http | verify]");
            std::process::exit(2);
        }
    };

    match command {
        Command::Serve => run_mcp_server().await?,
        Command::ServeHttp => run_http_server().await?,
        Command::Verify => run_schema_verification().await?,
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<Db> {
    let db = Db::new(config.db_path());
    let migrations_dir = Path::new("migrations");
    db.with_connection(move |conn| migrate::run_migrations(conn, migrations_dir))
        .await?;

    if config.inventory.seed_data {
        let seeded = seed::seed_sample_data(&db, &config.inventory.seed_data_path).await?;
        if seeded > 0 {
            log::info!("Seeded {} sample assets", seeded);
        }
    }

    Ok(db)
}

/// Run MCP server (stdio transport)
async fn run_mcp_server() -> Result<()> {
    let config = Config::load()?;
    let db = open_database(&config).await?;

    let mut server = McpServer::new(db, config);
    server.run().await?;

    Ok(())
}

/// Run HTTP MCP server
async fn run_http_server() -> Result<()> {
    log::info!("Starting otinv HTTP server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let db = open_database(&config).await?;
    log::info!("Database initialized successfully");

    let port = config.http_server.port;
    let http_server = HttpMcpServer::new(db, config)?;
    http_server.run(port).await?;

    Ok(())
}

/// Verify the database schema and report inventory counts
async fn run_schema_verification() -> Result<()> {
    use otinv::OtInvError;

    log::info!("Starting otinv v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());

    let db = open_database(&config).await?;

    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_tables = [
            "assets",
            "compliance_frameworks",
            "environments",
            "process_areas",
            "relationships",
            "review_flags",
            "schema_migrations",
            "sites",
        ];
        let mut all_tables_exist = true;
        for table in &expected_tables {
            if !tables.iter().any(|t| t == table) {
                log::error!("Missing table: {}", table);
                all_tables_exist = false;
            } else {
                log::debug!("Table exists: {}", table);
            }
        }
        if !all_tables_exist {
            return Err(OtInvError::Config(
                "Not all required tables exist".to_string(),
            ));
        }

        let asset_count: i64 = conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?;
        let relationship_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        let open_flags: i64 = conn.query_row(
            "SELECT COUNT(*) FROM review_flags WHERE status = 'open'",
            [],
            |row| row.get(0),
        )?;
        log::info!(
            "Schema verified: {} assets, {} relationships, {} open review flags",
            asset_count,
            relationship_count,
            open_flags
        );
        Ok(())
    })
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(None), Some(Command::Verify));
        assert_eq!(parse_command(Some("verify")), Some(Command::Verify));
        assert_eq!(parse_command(Some("serve")), Some(Command::Serve));
        assert_eq!(parse_command(Some("serve-http")), Some(Command::ServeHttp));
        assert_eq!(parse_command(Some("servehttp")), None);
        assert_eq!(parse_command(Some("--help")), None);
    }
}
