//! SQL schema definitions.

/// Complete schema for the aula v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Wallets & ledger
-- ============================================================

CREATE TABLE IF NOT EXISTS wallets (
    user_id INTEGER PRIMARY KEY,
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS wallet_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('add', 'deduct', 'purchase')),
    description TEXT NOT NULL,
    previous_balance INTEGER NOT NULL,
    new_balance INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wallet_tx_user ON wallet_transactions(user_id, created_at);

-- ============================================================
-- Activation codes
-- ============================================================

CREATE TABLE IF NOT EXISTS activation_codes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    package_id INTEGER REFERENCES packages(id),
    grade TEXT NOT NULL,
    is_used INTEGER NOT NULL DEFAULT 0,
    used_by INTEGER,
    used_at INTEGER,
    expires_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_codes_unused ON activation_codes(is_used) WHERE is_used = 0;

-- ============================================================
-- Packages & entitlements
-- ============================================================

CREATE TABLE IF NOT EXISTS packages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    grade TEXT NOT NULL,
    price INTEGER NOT NULL CHECK (price >= 0),
    duration_days INTEGER NOT NULL CHECK (duration_days > 0),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_packages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    package_id INTEGER NOT NULL REFERENCES packages(id),
    purchased_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    source TEXT NOT NULL CHECK (source IN ('wallet', 'code'))
);

-- At most one active entitlement per (user, package). Expired rows are
-- deactivated before insert; this index is the store-level backstop.
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_packages_active
    ON user_packages(user_id, package_id) WHERE is_active = 1;

CREATE INDEX IF NOT EXISTS idx_user_packages_user ON user_packages(user_id);

-- ============================================================
-- Student profiles (read-only projection for eligibility checks)
-- ============================================================

CREATE TABLE IF NOT EXISTS profiles (
    user_id INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    grade TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- ============================================================
-- Purchase idempotency journal
-- ============================================================

CREATE TABLE IF NOT EXISTS purchase_attempts (
    idempotency_key TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    package_id INTEGER NOT NULL,
    method TEXT NOT NULL CHECK (method IN ('wallet', 'code')),
    status TEXT NOT NULL,
    new_balance INTEGER,
    entitlement_id INTEGER,
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);
"#;
