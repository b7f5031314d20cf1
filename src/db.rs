// src/db.rs
use crate::error::Error;
use crate::models::{Action, Holding, Quote, Transaction, Usd, User};
use chrono::Utc;
use log::{info, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Trades take the write lock up front so concurrent trades queue on the busy
/// timeout instead of failing to upgrade a read lock.
const WRITE_TX: &str = "BEGIN IMMEDIATE";

pub async fn init(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    info!("Successfully opened database at {}.", database_url);
    Ok(pool)
}

pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            hash TEXT NOT NULL,
            cash INTEGER NOT NULL DEFAULT 1000000,
            session_version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // A holding is deleted in the same transaction that brings it to zero.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS portfolio (
            userid INTEGER NOT NULL REFERENCES users(id),
            symbol TEXT NOT NULL,
            shares INTEGER NOT NULL CHECK (shares >= 0),
            PRIMARY KEY (userid, symbol)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            userid INTEGER NOT NULL REFERENCES users(id),
            symbol TEXT NOT NULL,
            shares INTEGER NOT NULL,
            method TEXT NOT NULL CHECK (method IN ('Buy', 'Sell')),
            price INTEGER NOT NULL,
            transacted TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_userid ON history(userid, id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    hash: &str,
    cash: Usd,
) -> Result<i64, Error> {
    let result = sqlx::query("INSERT INTO users (username, hash, cash) VALUES (?, ?, ?)")
        .bind(username)
        .bind(hash)
        .bind(cash)
        .execute(pool)
        .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::UsernameTaken),
        Err(e) => Err(e.into()),
    }
}

pub async fn find_user(pool: &SqlitePool, id: i64) -> Result<Option<User>, Error> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, hash, cash, session_version FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_name(pool: &SqlitePool, username: &str) -> Result<Option<User>, Error> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, hash, cash, session_version FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Replaces the password hash and invalidates every session issued before.
pub async fn update_hash(pool: &SqlitePool, id: i64, hash: &str) -> Result<(), Error> {
    sqlx::query("UPDATE users SET hash = ?, session_version = session_version + 1 WHERE id = ?")
        .bind(hash)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn holdings(pool: &SqlitePool, user_id: i64) -> Result<Vec<Holding>, Error> {
    let rows = sqlx::query_as::<_, Holding>(
        "SELECT symbol, shares FROM portfolio WHERE userid = ? ORDER BY symbol",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn holding(
    pool: &SqlitePool,
    user_id: i64,
    symbol: &str,
) -> Result<Option<Holding>, Error> {
    let row = sqlx::query_as::<_, Holding>(
        "SELECT symbol, shares FROM portfolio WHERE userid = ? AND symbol = ?",
    )
    .bind(user_id)
    .bind(symbol)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn history(pool: &SqlitePool, user_id: i64) -> Result<Vec<Transaction>, Error> {
    let rows = sqlx::query_as::<_, Transaction>(
        "SELECT symbol, shares, method, price, transacted FROM history WHERE userid = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Buys `shares` of `quote.symbol` at `quote.price`, returning the cash left.
///
/// The cash debit only applies while the balance covers the cost, so the
/// balance can never go negative even under concurrent requests.
pub async fn buy(
    pool: &SqlitePool,
    user_id: i64,
    quote: &Quote,
    shares: i64,
) -> Result<Usd, Error> {
    let cost = quote.price.times(shares).ok_or(Error::Overflow)?;

    let mut tx = pool.begin_with(WRITE_TX).await?;

    let remaining = sqlx::query_scalar::<_, Usd>(
        "UPDATE users SET cash = cash - ?1 WHERE id = ?2 AND cash >= ?1 RETURNING cash",
    )
    .bind(cost)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(remaining) = remaining else {
        warn!(
            "User {} cannot afford {} x {} at {}",
            user_id, shares, quote.symbol, quote.price
        );
        return Err(Error::InsufficientFunds);
    };

    sqlx::query(
        r#"
        INSERT INTO portfolio (userid, symbol, shares) VALUES (?1, ?2, ?3)
        ON CONFLICT (userid, symbol) DO UPDATE SET shares = shares + excluded.shares
        "#,
    )
    .bind(user_id)
    .bind(&quote.symbol)
    .bind(shares)
    .execute(&mut *tx)
    .await?;

    record(&mut tx, user_id, &quote.symbol, shares, Action::Buy, quote.price).await?;

    tx.commit().await?;

    info!(
        "User {} bought {} x {} at {} (cash left {})",
        user_id, shares, quote.symbol, quote.price, remaining
    );
    Ok(remaining)
}

/// Sells `shares` of `quote.symbol` at `quote.price`, returning the new cash
/// balance. The holding row is removed once it reaches zero shares.
pub async fn sell(
    pool: &SqlitePool,
    user_id: i64,
    quote: &Quote,
    shares: i64,
) -> Result<Usd, Error> {
    let proceeds = quote.price.times(shares).ok_or(Error::Overflow)?;

    let mut tx = pool.begin_with(WRITE_TX).await?;

    let left = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE portfolio SET shares = shares - ?1
        WHERE userid = ?2 AND symbol = ?3 AND shares >= ?1
        RETURNING shares
        "#,
    )
    .bind(shares)
    .bind(user_id)
    .bind(&quote.symbol)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(left) = left else {
        let owned = sqlx::query_scalar::<_, i64>(
            "SELECT shares FROM portfolio WHERE userid = ? AND symbol = ?",
        )
        .bind(user_id)
        .bind(&quote.symbol)
        .fetch_optional(&mut *tx)
        .await?;
        warn!(
            "User {} cannot sell {} x {} (owns {:?})",
            user_id, shares, quote.symbol, owned
        );
        return Err(match owned {
            Some(_) => Error::InsufficientShares,
            None => Error::NotOwned,
        });
    };

    if left == 0 {
        sqlx::query("DELETE FROM portfolio WHERE userid = ? AND symbol = ?")
            .bind(user_id)
            .bind(&quote.symbol)
            .execute(&mut *tx)
            .await?;
    }

    let balance = sqlx::query_scalar::<_, Usd>("SELECT cash FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
    let cash = balance.checked_add(proceeds).ok_or(Error::Overflow)?;

    sqlx::query("UPDATE users SET cash = ? WHERE id = ?")
        .bind(cash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    record(&mut tx, user_id, &quote.symbol, -shares, Action::Sell, quote.price).await?;

    tx.commit().await?;

    info!(
        "User {} sold {} x {} at {} (cash now {})",
        user_id, shares, quote.symbol, quote.price, cash
    );
    Ok(cash)
}

async fn record(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: i64,
    symbol: &str,
    shares: i64,
    action: Action,
    price: Usd,
) -> Result<(), Error> {
    sqlx::query(
        "INSERT INTO history (userid, symbol, shares, method, price, transacted) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(symbol)
    .bind(shares)
    .bind(action.as_str())
    .bind(price)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // One connection: every connection to `sqlite::memory:` is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    create_schema(&pool).await.expect("schema");
    pool
}
