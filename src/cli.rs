//! Interactive client for exercising the last-level cache in isolation.
//!
//! There is no wire protocol or server process left to connect to (see
//! `src/main.rs`); this talks to an in-process `LlcEngine` over an
//! in-memory cache store instead, reading `tag key [value]`-shaped lines
//! from stdin.

use rusty_db::llc::LlcEngine;
use rusty_db::store::InMemoryCacheStore;
use rusty_db::transaction::Session;
use rusty_db::Result;
use std::sync::Arc;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║       RustyDB LLC Shell - tagged key/value scratchpad      ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();
    println!("commands: get <tag> <key> | set <tag> <key> <value> | del <tag> <key> | commit | exit");
    println!();

    let cache = Arc::new(InMemoryCacheStore::new());
    let llc = LlcEngine::new(cache.clone());
    let mut session = Session::new(cache.clone());

    let mut reader = BufReader::new(stdin());
    let mut input = String::new();

    loop {
        print!("llc> ");
        std::io::Write::flush(&mut std::io::stdout()).unwrap();

        input.clear();
        let n = reader.read_line(&mut input).await?;
        if n == 0 {
            break;
        }

        let mut parts = input.trim().split_whitespace();
        let Some(cmd) = parts.next() else { continue };

        match cmd {
            "exit" | "quit" => {
                println!("Goodbye!");
                break;
            }
            "get" => {
                let (Some(tag), Some(key)) = (parts.next(), parts.next()) else {
                    println!("usage: get <tag> <key>");
                    continue;
                };
                match llc.find(&session, tag, key).await {
                    Ok(Some(value)) => println!("{}", String::from_utf8_lossy(&value)),
                    Ok(None) => println!("(nil)"),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "set" => {
                let (Some(tag), Some(key)) = (parts.next(), parts.next()) else {
                    println!("usage: set <tag> <key> <value>");
                    continue;
                };
                let value = parts.collect::<Vec<_>>().join(" ");
                if let Err(e) = llc.update(&session, tag, key, value.into_bytes()).await {
                    println!("ERROR: {}", e);
                } else {
                    println!("OK");
                }
            }
            "del" => {
                let (Some(tag), Some(key)) = (parts.next(), parts.next()) else {
                    println!("usage: del <tag> <key>");
                    continue;
                };
                if let Err(e) = llc.delete(&session, tag, key).await {
                    println!("ERROR: {}", e);
                } else {
                    println!("OK");
                }
            }
            "commit" => match session.commit().await {
                Ok(()) => {
                    println!("committed");
                    session = Session::new(cache.clone());
                }
                Err(e) => println!("ERROR: {}", e),
            },
            other => {
                println!("unknown command: {}", other);
            }
        }
    }

    Ok(())
}
