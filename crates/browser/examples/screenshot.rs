//! Screenshot example - open a page, read its title, save a PNG
//!
//! Needs Chrome started with `--remote-debugging-port=9222`; pass the
//! browser websocket URL from `http://localhost:9222/json/version`.

use browser::{BrowserSession, RenderCapability, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let cdp_url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());
    let url = args
        .next()
        .unwrap_or_else(|| "https://example.com".to_string());

    let session = BrowserSession::new(SessionConfig {
        cdp_url,
        ..SessionConfig::default()
    });

    // Print page events as they arrive
    let mut event_rx = session.events();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            println!("Event: {:?}", event);
        }
    });

    session.start().await?;

    let page = session.navigate(&url).await?;
    let title = session
        .evaluate(&page, "() => document.title", vec![])
        .await?;
    println!("Title: {}", title);

    let png = session.screenshot(&page, None).await?;
    std::fs::write("screenshot.png", &png)?;
    println!("Wrote screenshot.png ({} bytes)", png.len());

    session.close(page).await?;
    session.stop().await?;
    Ok(())
}
