use crate::entities::{file_sets, files};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm::{ConnectionTrait, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> anyhow::Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    info!("🔄 Running auto-migrations...");

    // Order matters for foreign keys: FileSets -> Files
    let stmts = vec![
        (
            "file_sets",
            schema
                .create_table_from_entity(file_sets::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "files",
            schema
                .create_table_from_entity(files::Entity)
                .if_not_exists()
                .to_owned(),
        ),
    ];

    for (name, stmt) in stmts {
        let stmt = builder.build(&stmt);
        db.execute(stmt).await?;
        info!("   - Table '{}' checked/created", name);
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_files_file_set_id ON files(file_set_id)",
        "CREATE INDEX IF NOT EXISTS idx_files_origin_id ON files(origin_id)",
    ];

    for query in indexes {
        match db
            .execute(sea_orm::Statement::from_string(builder, query.to_owned()))
            .await
        {
            Ok(_) => info!("   - Executed schema update: {}", query),
            Err(e) => tracing::warn!("   - Schema update warning: {} -> {}", query, e),
        }
    }

    Ok(())
}
