//! Opaque nanoid-backed identifier types.
//!
//! Every ID is a 12-character nanoid wrapped in a newtype so the type
//! checker catches mixing a `ProviderId` for a `BrandId`. Each type also
//! implements `sqlx::Type`/`Encode`/`Decode` so it can be bound directly in
//! queries as `TEXT`.

use nanoid::nanoid;
use serde::{Deserialize, Serialize};

fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! nanoid_type {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(generate_id())
            }

            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(Self(s))
            }
        }
    };
}

nanoid_type!(StreamKey);
nanoid_type!(AnalysisId);
nanoid_type!(DetectionId);
nanoid_type!(ProviderId);
nanoid_type!(BrandId);
nanoid_type!(SessionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_twelve_chars() {
        let a = AnalysisId::new();
        let b = AnalysisId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 12);
    }

    #[test]
    fn roundtrips_through_string() {
        let raw = "abcdefghijkl".to_string();
        let id = StreamKey::from(raw.clone());
        assert_eq!(id.as_str(), raw);
        assert_eq!(id.to_string(), raw);
    }
}
