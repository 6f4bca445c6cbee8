//! Enum catalogs for the braid system.
//!
//! Each enum serializes as a snake_case (or kebab-case) string and
//! deserializes any unknown value into a `Custom(String)` catch-all, so that
//! mirrors written by newer versions still parse. Validation decides whether
//! a custom value is acceptable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            Custom(String),
        }

        impl $name {
            /// Returns the canonical string form.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::Custom(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a known (non-custom) variant.
            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Custom(_))
            }

            /// Returns `true` if this is known, or one of the given custom values.
            pub fn is_known_or(&self, allowed: &[&str]) -> bool {
                match self {
                    Self::Custom(s) => allowed.contains(&s.as_str()),
                    _ => true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::Custom(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::Custom(s),
                }
            }
        }
    };
}

// ===========================================================================
// Status
// ===========================================================================

string_enum! {
    /// Current state of an issue.
    Status, default = Open,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Blocked, "blocked"),
        (Closed, "closed"),
        (Deferred, "deferred"),
        (Tombstone, "tombstone"),
        (Pinned, "pinned"),
        (Hooked, "hooked"),
    ]
}

impl Status {
    /// Normalises common aliases to their canonical form.
    pub fn normalize(&self) -> Self {
        match self.as_str() {
            "wip" | "in-progress" | "active" => Self::InProgress,
            "done" | "resolved" => Self::Closed,
            _ => self.clone(),
        }
    }

    /// Returns `true` if an issue in this status still counts as unresolved
    /// for readiness purposes.
    pub fn is_unclosed(&self) -> bool {
        !matches!(self, Self::Closed | Self::Tombstone)
    }

    /// Returns `true` if an issue in this status can appear in the ready set.
    pub fn is_workable(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

// ===========================================================================
// IssueType
// ===========================================================================

string_enum! {
    /// Categorises the kind of work.
    IssueType, default = Task,
    variants: [
        (Bug, "bug"),
        (Feature, "feature"),
        (Task, "task"),
        (Epic, "epic"),
        (Chore, "chore"),
        (Message, "message"),
        (MergeRequest, "merge_request"),
        (Molecule, "molecule"),
        (Gate, "gate"),
        (Agent, "agent"),
        (Role, "role"),
        (Convoy, "convoy"),
        (Event, "event"),
    ]
}

impl IssueType {
    /// Normalises common aliases to their canonical form.
    pub fn normalize(&self) -> Self {
        match self.as_str() {
            "enhancement" | "feat" => Self::Feature,
            "mr" | "merge-request" => Self::MergeRequest,
            _ => self.clone(),
        }
    }
}

// ===========================================================================
// DependencyType
// ===========================================================================

string_enum! {
    /// Relationship type between issues.
    DependencyType, default = Blocks,
    variants: [
        (Blocks, "blocks"),
        (ParentChild, "parent-child"),
        (ConditionalBlocks, "conditional-blocks"),
        (WaitsFor, "waits-for"),
        (Related, "related"),
        (RelatesTo, "relates-to"),
        (DiscoveredFrom, "discovered-from"),
        (RepliesTo, "replies-to"),
        (Duplicates, "duplicates"),
        (Supersedes, "supersedes"),
    ]
}

impl DependencyType {
    /// Returns `true` if edges of this type gate readiness.
    ///
    /// This is the single source of truth for the blocking subgraph; every
    /// readiness query, cycle check, and wave computation routes through it.
    pub fn affects_readiness(&self) -> bool {
        matches!(
            self,
            Self::Blocks | Self::ParentChild | Self::ConditionalBlocks | Self::WaitsFor
        )
    }

    /// The blocking types as SQL string literals, for IN (...) clauses.
    pub fn blocking_sql_list() -> &'static str {
        "'blocks', 'parent-child', 'conditional-blocks', 'waits-for'"
    }
}

// ===========================================================================
// EventType
// ===========================================================================

string_enum! {
    /// Categorises audit trail events.
    EventType, default = Created,
    variants: [
        (Created, "created"),
        (Updated, "updated"),
        (StatusChanged, "status_changed"),
        (Closed, "closed"),
        (Reopened, "reopened"),
        (Commented, "commented"),
        (DependencyAdded, "dependency_added"),
        (DependencyRemoved, "dependency_removed"),
        (LabelAdded, "label_added"),
        (LabelRemoved, "label_removed"),
        (Deleted, "deleted"),
        (Imported, "imported"),
    ]
}

// ===========================================================================
// SortPolicy
// ===========================================================================

string_enum! {
    /// Determines how ready work is ordered.
    SortPolicy, default = Hybrid,
    variants: [
        (Hybrid, "hybrid"),
        (Priority, "priority"),
        (Oldest, "oldest"),
    ]
}
