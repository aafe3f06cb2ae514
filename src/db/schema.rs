use rusqlite::Connection;

/// Initialize the ledger schema
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Local identities. Buyers first seen through a postback get source = 'webpay'.
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'unknown' CHECK (source IN ('unknown', 'webpay')),
            created_at INTEGER NOT NULL
        );

        -- Catalog apps (read side of the catalog store)
        CREATE TABLE IF NOT EXISTS webapps (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            default_locale TEXT NOT NULL DEFAULT 'en-US',
            solitude_public_id TEXT,
            application_size INTEGER,
            price_point TEXT,
            price_amount TEXT,
            currency TEXT NOT NULL DEFAULT 'USD',
            has_icon INTEGER NOT NULL DEFAULT 0,
            support_email TEXT,
            developer_email TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS inapp_products (
            id TEXT PRIMARY KEY,
            webapp_id TEXT REFERENCES webapps(id),
            name TEXT NOT NULL,
            logo_url TEXT,
            price_point TEXT NOT NULL,
            price_amount TEXT NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            simulate TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_inapp_products_webapp ON inapp_products(webapp_id);

        -- Contribution ledger. Rows are never deleted.
        -- Exactly one of webapp_id / inapp_product_id is set.
        CREATE TABLE IF NOT EXISTS contributions (
            id TEXT PRIMARY KEY,
            uuid TEXT NOT NULL,
            transaction_id TEXT,
            type TEXT NOT NULL CHECK (type IN ('pending', 'purchase', 'refund', 'chargeback')),
            amount TEXT,
            currency TEXT NOT NULL DEFAULT 'USD',
            webapp_id TEXT REFERENCES webapps(id),
            inapp_product_id TEXT REFERENCES inapp_products(id),
            user_id TEXT REFERENCES users(id),
            related_id TEXT REFERENCES contributions(id),
            source TEXT,
            source_locale TEXT,
            price_point TEXT,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            CHECK ((webapp_id IS NULL) != (inapp_product_id IS NULL))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_contributions_uuid ON contributions(uuid);
        CREATE INDEX IF NOT EXISTS idx_contributions_transaction ON contributions(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_contributions_related ON contributions(related_id);
        -- A purchase is reversed at most once
        CREATE UNIQUE INDEX IF NOT EXISTS idx_contributions_single_reversal
            ON contributions(related_id) WHERE related_id IS NOT NULL;

        -- Refund requests, one per purchase contribution
        CREATE TABLE IF NOT EXISTS refunds (
            id TEXT PRIMARY KEY,
            contribution_id TEXT NOT NULL UNIQUE REFERENCES contributions(id),
            status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'approved_instant', 'declined', 'failed')),
            requested_at INTEGER,
            approved_at INTEGER,
            declined_at INTEGER,
            refund_reason TEXT NOT NULL DEFAULT '',
            rejection_reason TEXT NOT NULL DEFAULT '',
            actor_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_refunds_status ON refunds(status);

        -- App ownership, materialized from purchases of catalog apps
        CREATE TABLE IF NOT EXISTS app_purchases (
            id TEXT PRIMARY KEY,
            webapp_id TEXT NOT NULL REFERENCES webapps(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            status TEXT NOT NULL CHECK (status IN ('purchased', 'refunded', 'chargeback')),
            created_at INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            UNIQUE(webapp_id, user_id)
        );
        "#,
    )
}
