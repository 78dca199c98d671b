// RustyDB cache-layer demo server.
//
// This binary is not a network-facing database server; it wires together
// the FLC/SLC/LLC engines against the in-memory store test doubles and
// drives a short smoke sequence through each, logging every step. It is the
// closest equivalent to the original startup sequence that this crate's
// scope (a caching layer in front of an existing cache store + database,
// not the database itself) still supports.

use rusty_db::config::Config;
use rusty_db::flc::FlcEngine;
use rusty_db::llc::LlcEngine;
use rusty_db::schema::Condition;
use rusty_db::slc::SlcEngine;
use rusty_db::store::{DdlParser, InMemoryCacheStore, InMemorySqlExecutor, Row, SqlDdlParser};
use rusty_db::transaction::Session;
use rusty_db::value::{Kind, Value};
use rusty_db::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    let config_path = PathBuf::from("rustydb.yaml");
    let config = if config_path.exists() {
        info!(path = %config_path.display(), "loading configuration");
        Config::from_file(&config_path)?
    } else {
        info!("no rustydb.yaml found, running with defaults");
        Config::default()
    };

    info!(addr = %config.server.addr, store_kind = ?config.server.store_kind, "server configuration");

    let cache = Arc::new(InMemoryCacheStore::new());
    let seed_row = Row::new()
        .with("id", Value::Int(1))
        .with("email", Value::String("a@example.com".into()))
        .with("org", Value::String("acme".into()));
    let sql = Arc::new(InMemorySqlExecutor::new(move |_sql, _args| vec![seed_row.clone()]));
    let ddl = SqlDdlParser::new();

    let create_table = "CREATE TABLE users (id INT PRIMARY KEY, email VARCHAR UNIQUE, org VARCHAR)";

    info!("warming up FLC for table users");
    let flc = FlcEngine::warm_up(
        "users",
        create_table,
        vec![
            ("id".to_string(), Kind::Int),
            ("email".to_string(), Kind::String),
            ("org".to_string(), Kind::String),
        ],
        &ddl,
        sql.as_ref(),
    )
    .await?;
    let all = flc.find_all();
    info!(rows = all.0.len(), "FLC warm-up complete");

    let table_config = config.table("users");
    let schema = Arc::new(rusty_db::schema::Struct::new(
        "users",
        vec![
            ("id".to_string(), Kind::Int),
            ("email".to_string(), Kind::String),
            ("org".to_string(), Kind::String),
        ],
        ddl.parse_constraints(create_table)?
            .into_iter()
            .map(|c| rusty_db::schema::Index::new(c.kind, c.columns))
            .collect(),
    ));
    let slc = SlcEngine::new(schema, cache.clone(), sql.clone(), table_config);

    let session = Session::with_database(cache.clone(), sql.clone());
    let builder = rusty_db::query::QueryBuilder::new("users").condition(Condition::eq("id", Value::Int(1)));
    let found = slc.find_by_query_builder(&session, &builder).await?;
    info!(rows = found.0.len(), "SLC lookup by primary key complete");
    session.commit().await?;

    let llc = LlcEngine::from_config(cache.clone(), &config);
    let session = Session::new(cache.clone());
    llc.create(&session, "sessions", "demo-token", b"active".to_vec()).await?;
    session.commit().await?;
    info!("LLC smoke write committed");

    info!("demo sequence complete, exiting");
    Ok(())
}

fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║      RustyDB Cache Layer - FLC / SLC / LLC demo server      ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}
