//! Typed identifiers for datasets, jobs and upload sessions.
//!
//! Every identifier is a random UUID wrapped in its own newtype so a job id
//! can never be passed where a dataset id is expected.

/// Defines a UUID-backed identifier newtype with parsing and display.
macro_rules! define_ids {
    ($($(#[$meta:meta])* $name:ident => $label:literal),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
                serde::Serialize, serde::Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(uuid::Uuid);

            impl $name {
                /// Generate a fresh random identifier
                pub fn new() -> Self {
                    Self(uuid::Uuid::new_v4())
                }

                /// Access the underlying UUID
                pub fn as_uuid(&self) -> &uuid::Uuid {
                    &self.0
                }

                /// Human-readable resource label
                pub const fn label() -> &'static str {
                    $label
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

            impl std::str::FromStr for $name {
                type Err = $crate::error::ValidationError;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    uuid::Uuid::parse_str(s.trim()).map(Self).map_err(|e| {
                        $crate::error::ValidationError::invalid_parameter(
                            $label,
                            &format!("'{s}' is not a valid id: {e}"),
                        )
                    })
                }
            }
        )+
    };
}

define_ids! {
    /// Identity of a registered dataset version
    DatasetId => "dataset",
    /// Identity of a pipeline job
    JobId => "job",
    /// Identity correlating the chunks of one upload
    UploadId => "upload",
}
