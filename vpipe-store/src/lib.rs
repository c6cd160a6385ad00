pub mod analysis;
pub mod brand;
pub mod provider;
pub mod queue_item;
pub mod stream;

pub use analysis::AnalysisRepository;
pub use brand::BrandRepository;
pub use provider::ProviderRepository;
pub use queue_item::QueueItemRepository;
pub use stream::StreamRepository;

/// Run pending migrations against `pool`. Called once at startup.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
