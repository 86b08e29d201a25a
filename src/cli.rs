//! # rqlited CLI
//!
//! A thin interactive SQL client. Connects to a running node's HTTP API
//! (spec.md §4.7) and forwards each typed line as a query or statement —
//! it is not a cluster participant and never speaks the binary cluster
//! transport directly.

use rqlited::VERSION;
use std::io::Write;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() {
    println!("rqlited-cli {VERSION}");

    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:4001".to_string());
    println!("Connecting to rqlited node at {addr}...");
    println!("Type SQL or 'exit' to quit. Statements beginning with SELECT run as reads.");
    println!();

    let http = reqwest::Client::new();
    let mut reader = BufReader::new(stdin());
    let mut input = String::new();

    loop {
        print!("rqlited> ");
        let _ = std::io::stdout().flush();

        input.clear();
        if reader.read_line(&mut input).await.unwrap_or(0) == 0 {
            println!();
            break;
        }

        let sql = input.trim();
        if sql.is_empty() {
            continue;
        }
        if sql.eq_ignore_ascii_case("exit") || sql.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        let is_read = sql.to_ascii_uppercase().starts_with("SELECT");
        let url = format!("http://{addr}/db");
        let result = if is_read {
            http.get(&url).body(sql.to_string()).send().await
        } else {
            http.post(&url).body(sql.to_string()).send().await
        };

        match result {
            Ok(response) => match response.text().await {
                Ok(body) => println!("{body}"),
                Err(e) => println!("error reading response body: {e}"),
            },
            Err(e) => println!("request failed: {e}"),
        }
        println!();
    }
}
