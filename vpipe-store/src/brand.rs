use sqlx::{PgPool, Row};

use vpipe_core::error::Result;
use vpipe_core::ids::BrandId;
use vpipe_core::models::Brand;

/// Feeds the prompt-based logo classifier's vocabulary.
#[derive(Clone)]
pub struct BrandRepository {
    pool: PgPool,
}

impl BrandRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn active_brands(&self) -> Result<Vec<Brand>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, search_terms
            FROM brands
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Brand> {
                let raw_terms: serde_json::Value = row.try_get("search_terms")?;
                let search_terms: Vec<String> =
                    serde_json::from_value(raw_terms).unwrap_or_default();
                Ok(Brand {
                    id: BrandId::from_string(row.try_get::<String, _>("id")?),
                    name: row.try_get("name")?,
                    search_terms,
                })
            })
            .collect()
    }
}
