use crate::error::CatalogError;
use crate::schema;
use crate::version::INITIAL_VERSION;

/// One versioned batch of schema changes, applied atomically.
///
/// Statements run in order and must be existence-guarded: a database whose
/// version was inferred may already contain some of what they create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationUnit {
    pub version: u32,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// Migrations shipped with the forum, oldest first. New schema changes are
/// appended here and mirrored in [`schema::BOOTSTRAP_STATEMENTS`].
pub const FORUM_MIGRATIONS: &[MigrationUnit] = &[
    MigrationUnit {
        version: 2,
        description: "Add OAuth support",
        statements: &[
            schema::CREATE_OAUTH_ACCOUNTS_TABLE,
            schema::IDX_OAUTH_PROVIDER_USER,
            schema::IDX_OAUTH_USER_ID,
        ],
    },
    MigrationUnit {
        version: 3,
        description: "Add OAuth state management",
        statements: &[
            schema::CREATE_OAUTH_STATES_TABLE,
            schema::IDX_OAUTH_STATES_EXPIRES,
            schema::IDX_OAUTH_STATES_PROVIDER,
        ],
    },
    MigrationUnit {
        version: 4,
        description: "Add images table",
        statements: &[schema::CREATE_IMAGES_TABLE, schema::IDX_IMAGES_POST_ID],
    },
    MigrationUnit {
        version: 5,
        description: "Add notifications table",
        statements: &[
            schema::CREATE_NOTIFICATIONS_TABLE,
            schema::IDX_NOTIFICATIONS_USER_ID,
            schema::IDX_NOTIFICATIONS_ACTOR_ID,
        ],
    },
];

/// Immutable, ascending registry of migration units.
#[derive(Debug, Clone)]
pub struct MigrationCatalog {
    units: Vec<MigrationUnit>,
}

impl MigrationCatalog {
    /// Build a catalog, rejecting unsorted, duplicated or baseline versions.
    pub fn new(units: Vec<MigrationUnit>) -> Result<Self, CatalogError> {
        let mut previous = INITIAL_VERSION;
        for unit in &units {
            if unit.version <= INITIAL_VERSION {
                return Err(CatalogError::BelowBaseline {
                    version: unit.version,
                    baseline: INITIAL_VERSION,
                });
            }
            if unit.version == previous {
                return Err(CatalogError::Duplicate(unit.version));
            }
            if unit.version < previous {
                return Err(CatalogError::OutOfOrder {
                    previous,
                    next: unit.version,
                });
            }
            previous = unit.version;
        }
        Ok(Self { units })
    }

    /// The forum's own migrations. Ordering is covered by tests.
    pub fn builtin() -> Self {
        Self {
            units: FORUM_MIGRATIONS.to_vec(),
        }
    }

    /// Version a fully migrated database reports.
    pub fn latest_version(&self) -> u32 {
        self.units
            .last()
            .map(|unit| unit.version)
            .unwrap_or(INITIAL_VERSION)
    }

    /// Units above `current`, in the order they must be applied.
    pub fn pending(&self, current: u32) -> &[MigrationUnit] {
        let start = self.units.partition_point(|unit| unit.version <= current);
        &self.units[start..]
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Default for MigrationCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
