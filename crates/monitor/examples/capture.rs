//! Capture example - snapshot a list of URLs and highlight what changed
//!
//! Needs Chrome started with `--remote-debugging-port=9222`.
//!
//! ```text
//! cargo run --example capture -- capture ws://localhost:9222/devtools/browser/<id> https://example.com/
//! cargo run --example capture -- diff ws://localhost:9222/devtools/browser/<id> 1700000000000
//! ```
//!
//! `MONITOR_CONFIG` may point at a JSON config file.

use std::sync::Arc;

use browser::{BrowserSession, SessionConfig};
use monitor::{Monitor, MonitorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = match std::env::var("MONITOR_CONFIG") {
        Ok(path) => MonitorConfig::from_json_file(path)?,
        Err(_) => MonitorConfig::default(),
    };

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "capture".to_string());
    let cdp_url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());
    let rest: Vec<String> = args.collect();

    let session = Arc::new(BrowserSession::new(SessionConfig {
        cdp_url,
        viewport: config.page.viewport,
        load_timeout_ms: config.page.load_timeout_ms,
        ..SessionConfig::default()
    }));
    session.start().await?;

    let monitor = Monitor::new(session.clone(), Arc::new(config));

    match command.as_str() {
        "diff" => {
            let time: u64 = rest.first().ok_or("missing time")?.parse()?;
            for (path, result) in monitor.diff_all(time).await? {
                match result {
                    Ok(outcome) => println!("{}: {:?}", path, outcome.state()),
                    Err(e) => println!("{}: failed: {}", path, e),
                }
            }
        }
        _ => {
            let urls = if rest.is_empty() {
                vec!["https://example.com/".to_string()]
            } else {
                rest
            };
            let (time, results) = monitor.capture_all(&urls, true).await;
            println!("Captured at {}", time);
            for (url, result) in results {
                match result {
                    Ok(outcome) => println!("{}: {:?}", url, outcome.state()),
                    Err(e) => println!("{}: failed: {}", url, e),
                }
            }
        }
    }

    session.stop().await?;
    Ok(())
}
