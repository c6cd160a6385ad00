use sqlx::{PgPool, Row};
use std::str::FromStr;

use vpipe_core::error::Result;
use vpipe_core::ids::ProviderId;
use vpipe_core::models::{Capability, Provider};

/// Backs the provider registry's `reload()` — reads the set of providers
/// an operator has marked active, one per capability.
#[derive(Clone)]
pub struct ProviderRepository {
    pool: PgPool,
}

impl ProviderRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn active_providers(&self) -> Result<Vec<Provider>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, capability, provider_type, config, active
            FROM providers
            WHERE active
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Provider> {
                Ok(Provider {
                    id: ProviderId::from_string(row.try_get::<String, _>("id")?),
                    name: row.try_get("name")?,
                    capability: Capability::from_str(&row.try_get::<String, _>("capability")?)?,
                    provider_type: row.try_get("provider_type")?,
                    config: row.try_get("config")?,
                    active: row.try_get("active")?,
                })
            })
            .collect()
    }
}
