//! Table and index definitions for the forum database.
//!
//! Every statement is existence-guarded so it can run against a database
//! that already holds part of the schema. The bootstrap script and the
//! migration catalog both draw from these constants; a table that a
//! migration introduces must also appear in [`BOOTSTRAP_STATEMENTS`].

pub const CREATE_USER_TABLE: &str = "CREATE TABLE IF NOT EXISTS user (
    user_id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

pub const CREATE_USER_AUTH_TABLE: &str = "CREATE TABLE IF NOT EXISTS user_auth (
    user_id TEXT PRIMARY KEY REFERENCES user(user_id) ON DELETE CASCADE,
    password_hash TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

pub const CREATE_SESSIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP NOT NULL
)";

pub const CREATE_CATEGORIES_TABLE: &str = "CREATE TABLE IF NOT EXISTS categories (
    category_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
)";

pub const CREATE_POSTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS posts (
    post_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP
)";

pub const CREATE_POST_CATEGORIES_TABLE: &str = "CREATE TABLE IF NOT EXISTS post_categories (
    post_id TEXT NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
    category_id INTEGER NOT NULL REFERENCES categories(category_id) ON DELETE CASCADE,
    PRIMARY KEY (post_id, category_id)
)";

pub const CREATE_COMMENTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS comments (
    comment_id TEXT PRIMARY KEY,
    post_id TEXT NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP
)";

pub const CREATE_REACTIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS reactions (
    reaction_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    post_id TEXT REFERENCES posts(post_id) ON DELETE CASCADE,
    comment_id TEXT REFERENCES comments(comment_id) ON DELETE CASCADE,
    reaction_type TEXT NOT NULL CHECK (reaction_type IN ('like', 'dislike')),
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    CHECK ((post_id IS NULL) <> (comment_id IS NULL))
)";

pub const CREATE_OAUTH_ACCOUNTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS oauth_accounts (
    oauth_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    provider TEXT NOT NULL,
    provider_user_id TEXT NOT NULL,
    email TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (provider, provider_user_id)
)";

pub const CREATE_OAUTH_STATES_TABLE: &str = "CREATE TABLE IF NOT EXISTS oauth_states (
    state TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    ip_address TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP NOT NULL
)";

pub const CREATE_IMAGES_TABLE: &str = "CREATE TABLE IF NOT EXISTS images (
    image_id TEXT PRIMARY KEY,
    post_id TEXT NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    file_path TEXT NOT NULL,
    thumbnail_path TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

pub const CREATE_NOTIFICATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS notifications (
    notification_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    actor_id TEXT NOT NULL REFERENCES user(user_id) ON DELETE CASCADE,
    post_id TEXT REFERENCES posts(post_id) ON DELETE CASCADE,
    comment_id TEXT REFERENCES comments(comment_id) ON DELETE CASCADE,
    action TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

pub const IDX_POSTS_USER_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_posts_user_id ON posts(user_id)";
pub const IDX_POST_CATEGORIES_POST_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_post_categories_post_id ON post_categories(post_id)";
pub const IDX_POST_CATEGORIES_CATEGORY_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_post_categories_category_id ON post_categories(category_id)";
pub const IDX_COMMENTS_POST_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id)";
pub const IDX_COMMENTS_USER_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_comments_user_id ON comments(user_id)";
pub const IDX_REACTIONS_USER_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_reactions_user_id ON reactions(user_id)";
pub const IDX_REACTIONS_POST_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_reactions_post_id ON reactions(post_id)";
pub const IDX_REACTIONS_COMMENT_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_reactions_comment_id ON reactions(comment_id)";
pub const IDX_OAUTH_PROVIDER_USER: &str =
    "CREATE INDEX IF NOT EXISTS idx_oauth_provider_user ON oauth_accounts(provider, provider_user_id)";
pub const IDX_OAUTH_USER_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_oauth_user_id ON oauth_accounts(user_id)";
pub const IDX_OAUTH_STATES_EXPIRES: &str =
    "CREATE INDEX IF NOT EXISTS idx_oauth_states_expires ON oauth_states(expires_at)";
pub const IDX_OAUTH_STATES_PROVIDER: &str =
    "CREATE INDEX IF NOT EXISTS idx_oauth_states_provider ON oauth_states(provider)";
pub const IDX_IMAGES_POST_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_images_post_id ON images(post_id)";
pub const IDX_NOTIFICATIONS_USER_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_notifications_user_id ON notifications(user_id)";
pub const IDX_NOTIFICATIONS_ACTOR_ID: &str =
    "CREATE INDEX IF NOT EXISTS idx_notifications_actor_id ON notifications(actor_id)";

/// Schema of installs that predate version tracking (implicit version 1).
pub const LEGACY_V1_STATEMENTS: &[&str] = &[
    CREATE_USER_TABLE,
    CREATE_USER_AUTH_TABLE,
    CREATE_SESSIONS_TABLE,
    CREATE_CATEGORIES_TABLE,
    CREATE_POSTS_TABLE,
    CREATE_POST_CATEGORIES_TABLE,
    CREATE_COMMENTS_TABLE,
    CREATE_REACTIONS_TABLE,
    IDX_POSTS_USER_ID,
    IDX_POST_CATEGORIES_POST_ID,
    IDX_POST_CATEGORIES_CATEGORY_ID,
    IDX_COMMENTS_POST_ID,
    IDX_COMMENTS_USER_ID,
    IDX_REACTIONS_USER_ID,
    IDX_REACTIONS_POST_ID,
    IDX_REACTIONS_COMMENT_ID,
];

/// Cumulative schema at the latest catalog version. Tables first, then indexes.
pub const BOOTSTRAP_STATEMENTS: &[&str] = &[
    CREATE_USER_TABLE,
    CREATE_USER_AUTH_TABLE,
    CREATE_SESSIONS_TABLE,
    CREATE_CATEGORIES_TABLE,
    CREATE_POSTS_TABLE,
    CREATE_COMMENTS_TABLE,
    CREATE_REACTIONS_TABLE,
    CREATE_IMAGES_TABLE,
    CREATE_NOTIFICATIONS_TABLE,
    CREATE_POST_CATEGORIES_TABLE,
    CREATE_OAUTH_ACCOUNTS_TABLE,
    CREATE_OAUTH_STATES_TABLE,
    IDX_POSTS_USER_ID,
    IDX_POST_CATEGORIES_POST_ID,
    IDX_POST_CATEGORIES_CATEGORY_ID,
    IDX_COMMENTS_POST_ID,
    IDX_COMMENTS_USER_ID,
    IDX_REACTIONS_USER_ID,
    IDX_REACTIONS_POST_ID,
    IDX_REACTIONS_COMMENT_ID,
    IDX_IMAGES_POST_ID,
    IDX_NOTIFICATIONS_USER_ID,
    IDX_NOTIFICATIONS_ACTOR_ID,
    IDX_OAUTH_PROVIDER_USER,
    IDX_OAUTH_USER_ID,
    IDX_OAUTH_STATES_EXPIRES,
    IDX_OAUTH_STATES_PROVIDER,
];

/// Reference data inserted by the bootstrapper. Re-running it is a no-op.
pub const SEED_CATEGORY_SQL: &str = "INSERT OR IGNORE INTO categories (name) VALUES (?1)";
