// ============================================================================
// Entity Records
// ============================================================================
//
// Every CRM collection holds records of one closed, typed shape. A record has
// a server-assigned identifier, two timestamps and its own fields. Partial
// shapes (create drafts and update patches) share one `Patch` type per entity
// whose fields are all optional.
//
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// Reserved prefix of identifiers minted locally before the server confirms.
pub const PROVISIONAL_PREFIX: &str = "temp-";

/// Returns true if `id` was minted locally and is not yet confirmed.
pub fn is_provisional(id: &str) -> bool {
    id.starts_with(PROVISIONAL_PREFIX)
}

/// Mints a provisional identifier: reserved prefix, clock millis, random suffix.
pub fn provisional_id(now: DateTime<Utc>) -> String {
    format!(
        "{}{}-{}",
        PROVISIONAL_PREFIX,
        now.timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Decodes an optional categorical field, turning wire values this client
/// does not know into `None`.
///
/// Used with `#[serde(deserialize_with = ...)]` on record fields so a new
/// server-side category lands in the unknown bucket instead of failing the
/// whole record.
pub fn lenient_category<'de, D, E>(deserializer: D) -> Result<Option<E>, D::Error>
where
    D: Deserializer<'de>,
    E: DeserializeOwned,
{
    let raw = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

/// A typed CRM record held by an entity store.
pub trait Record:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Partial shape used both as create draft and as update patch.
    type Patch: Clone + fmt::Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Remote collection name ("leads").
    const COLLECTION: &'static str;
    /// Display name used in notifications ("Lead").
    const ENTITY: &'static str;
    /// Categorical fields broken down by the statistics aggregator.
    const BREAKDOWN_FIELDS: &'static [&'static str];
    /// Numeric fields summed by the statistics aggregator.
    const MEASURE_FIELDS: &'static [&'static str] = &[];

    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Builds a fresh record from field defaults with `patch` merged over them.
    fn draft(id: String, now: DateTime<Utc>, patch: &Self::Patch) -> Self;

    /// Shallow field-level merge; fields present in `patch` win.
    fn apply_patch(&mut self, patch: &Self::Patch, now: DateTime<Utc>);

    /// Value of a categorical field, `None` when unset or unknown.
    fn category(&self, field: &str) -> Option<&str>;

    fn measure(&self, _field: &str) -> Option<f64> {
        None
    }
}

/// Declares a categorical enum with stable wire names.
#[macro_export]
macro_rules! categorical {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Declares a record struct and its patch struct.
///
/// The record gets `id`, `created_at`, `updated_at` plus the listed fields;
/// unknown fields coming from the server are ignored. The patch mirrors the
/// listed fields as `Option`s and rejects unknown fields.
#[macro_export]
macro_rules! crm_record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident / $patch:ident {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            pub id: String,
            #[serde(default)]
            pub created_at: chrono::DateTime<chrono::Utc>,
            #[serde(default)]
            pub updated_at: chrono::DateTime<chrono::Utc>,
            $(
                $(#[$fmeta])*
                #[serde(default)]
                pub $field: $ty,
            )+
        }

        #[doc = concat!("Partial [`", stringify!($name), "`] used for drafts and patches.")]
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct $patch {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )+
        }

        impl $name {
            fn from_patch(
                id: String,
                now: chrono::DateTime<chrono::Utc>,
                patch: &$patch,
            ) -> Self {
                let mut record = Self {
                    id,
                    created_at: now,
                    updated_at: now,
                    $($field: Default::default(),)+
                };
                record.merge_patch(patch);
                record
            }

            fn merge_patch(&mut self, patch: &$patch) {
                $(
                    if let Some(value) = &patch.$field {
                        self.$field = value.clone();
                    }
                )+
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_ids_are_prefixed_and_distinct() {
        let now = Utc::now();
        let a = provisional_id(now);
        let b = provisional_id(now);

        assert!(is_provisional(&a));
        assert!(is_provisional(&b));
        assert_ne!(a, b);
        assert!(!is_provisional("7f9c2a51-real"));
    }

    crate::categorical! {
        enum Shade {
            Light => "light",
            Dark => "dark",
        }
    }

    #[derive(Debug, serde::Deserialize)]
    struct Painted {
        #[serde(default, deserialize_with = "lenient_category")]
        shade: Option<Shade>,
    }

    #[test]
    fn test_lenient_category_maps_unrecognised_values_to_none() {
        let decode = |json: &str| serde_json::from_str::<Painted>(json).unwrap().shade;

        assert_eq!(decode(r#"{ "shade": "dark" }"#), Some(Shade::Dark));
        assert_eq!(decode(r#"{ "shade": "ultraviolet" }"#), None);
        assert_eq!(decode(r#"{ "shade": 7 }"#), None);
        assert_eq!(decode(r#"{ "shade": null }"#), None);
        assert_eq!(decode("{}"), None);
    }
}
