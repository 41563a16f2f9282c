//! Idempotent schema initialization for the brokerage database.
//!
//! Every statement is `IF NOT EXISTS` so boot can run it unconditionally.

use sqlx::PgPool;

pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing PostgreSQL schema...");

    for (name, ddl) in STATEMENTS {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            tracing::error!(statement = name, error = %e, "Schema statement failed");
            e
        })?;
    }

    tracing::info!("PostgreSQL schema initialized");
    Ok(())
}

const STATEMENTS: &[(&str, &str)] = &[
    ("users", CREATE_USERS),
    ("balances", CREATE_BALANCES),
    ("instruments", CREATE_INSTRUMENTS),
    ("watchlists", CREATE_WATCHLISTS),
    ("orders", CREATE_ORDERS),
    ("orders_user_status_idx", CREATE_ORDERS_USER_STATUS_IDX),
    ("orders_idempotency_idx", CREATE_ORDERS_IDEMPOTENCY_IDX),
    ("positions", CREATE_POSITIONS),
    ("positions_open_idx", CREATE_POSITIONS_OPEN_IDX),
    ("position_applied", CREATE_POSITION_APPLIED),
    ("outbox", CREATE_OUTBOX),
    ("outbox_unpublished_idx", CREATE_OUTBOX_UNPUBLISHED_IDX),
];

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id              UUID PRIMARY KEY,
    username        TEXT NOT NULL UNIQUE,
    email           TEXT,
    password_hash   TEXT NOT NULL,
    is_admin        BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_BALANCES: &str = r#"
CREATE TABLE IF NOT EXISTS balances (
    user_id         UUID PRIMARY KEY,
    available       NUMERIC(20, 8) NOT NULL DEFAULT 0,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_INSTRUMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS instruments (
    symbol          TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    category        TEXT NOT NULL DEFAULT 'EQUITY',
    last_quote      NUMERIC(20, 8) NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_WATCHLISTS: &str = r#"
CREATE TABLE IF NOT EXISTS watchlists (
    user_id         UUID NOT NULL,
    symbol          TEXT NOT NULL REFERENCES instruments(symbol),
    added_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, symbol)
)
"#;

const CREATE_ORDERS: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id                          UUID PRIMARY KEY,
    user_id                     UUID NOT NULL,
    symbol                      TEXT NOT NULL,
    side                        TEXT NOT NULL,
    order_type                  TEXT NOT NULL,
    quantity                    NUMERIC(20, 8) NOT NULL CHECK (quantity > 0),
    price                       NUMERIC(20, 8),
    status                      TEXT NOT NULL,
    created_at                  TIMESTAMPTZ NOT NULL,
    updated_at                  TIMESTAMPTZ NOT NULL,
    executed_at                 TIMESTAMPTZ,
    execution_price             NUMERIC(20, 8),
    market_price_at_submission  NUMERIC(20, 8),
    failure_reason              TEXT,
    idempotency_key             TEXT
)
"#;

const CREATE_ORDERS_USER_STATUS_IDX: &str = r#"
CREATE INDEX IF NOT EXISTS orders_user_status_created_idx
    ON orders (user_id, status, created_at DESC)
"#;

const CREATE_ORDERS_IDEMPOTENCY_IDX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS orders_user_idempotency_idx
    ON orders (user_id, idempotency_key)
    WHERE idempotency_key IS NOT NULL
"#;

const CREATE_POSITIONS: &str = r#"
CREATE TABLE IF NOT EXISTS positions (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL,
    symbol              TEXT NOT NULL,
    quantity            NUMERIC(20, 8) NOT NULL CHECK (quantity >= 0),
    average_price       NUMERIC(20, 8) NOT NULL CHECK (average_price >= 0),
    total_investment    NUMERIC(20, 8) NOT NULL,
    current_price       NUMERIC(20, 8),
    market_value        NUMERIC(20, 8),
    unrealized_pnl      NUMERIC(20, 8),
    unrealized_pnl_pct  NUMERIC(20, 8),
    position_type       TEXT NOT NULL DEFAULT 'LONG',
    status              TEXT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    last_trade_at       TIMESTAMPTZ
)
"#;

const CREATE_POSITIONS_OPEN_IDX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS positions_user_symbol_open_idx
    ON positions (user_id, symbol)
    WHERE status IN ('ACTIVE', 'PARTIAL')
"#;

const CREATE_POSITION_APPLIED: &str = r#"
CREATE TABLE IF NOT EXISTS position_applied (
    order_id        UUID PRIMARY KEY,
    applied_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_OUTBOX: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    id              BIGSERIAL PRIMARY KEY,
    aggregate_type  TEXT NOT NULL,
    aggregate_id    UUID NOT NULL,
    queue           TEXT NOT NULL,
    message_type    TEXT NOT NULL,
    priority        SMALLINT NOT NULL DEFAULT 1,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    published_at    TIMESTAMPTZ,
    attempts        INT NOT NULL DEFAULT 0
)
"#;

const CREATE_OUTBOX_UNPUBLISHED_IDX: &str = r#"
CREATE INDEX IF NOT EXISTS outbox_unpublished_idx
    ON outbox (id)
    WHERE published_at IS NULL
"#;
