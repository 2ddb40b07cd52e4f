//! Terminal runner for the live translation bridge.

use std::sync::Arc;
use std::time::Duration;

use bazaar_bridge::bridge::session::{BridgeSession, SessionState};
use bazaar_bridge::bridge::transport::SessionConfig;
use bazaar_bridge::bridge::{Role, SellerLanguage};
use bazaar_bridge::config::{get_config_path, load_config};

fn main() {
    let config = load_config();
    if !config.has_credentials() {
        eprintln!("[Main] no API key configured");
        eprintln!(
            "[Main] set \"gemini_api_key\" in {}",
            get_config_path().display()
        );
        std::process::exit(1);
    }

    let language = std::env::args()
        .nth(1)
        .and_then(|name| {
            let parsed = SellerLanguage::from_name(&name);
            if parsed.is_none() {
                eprintln!("[Main] unknown language '{}', using Urdu", name);
            }
            parsed
        })
        .unwrap_or_default();

    println!("[Main] bridging English <-> {}", language.display_name());

    let session = Arc::new(BridgeSession::new(SessionConfig {
        api_key: config.gemini_api_key.clone(),
        model: config.live_model.clone(),
        seller_language: language,
    }));

    if let Err(e) = session.start() {
        eprintln!("[Main] failed to start: {}", e);
        std::process::exit(1);
    }

    // Print utterances as they finalize while the session runs.
    let printer = session.clone();
    std::thread::spawn(move || {
        let mut printed = 0;
        loop {
            let utterances = printer.utterances();
            while printed < utterances.len() {
                let u = &utterances[printed];
                if !u.is_final {
                    break;
                }
                let who = match u.role {
                    Role::Traveler => "traveler",
                    Role::Seller => "merchant",
                };
                println!("[{}] {}", who, u.text);
                printed += 1;
            }

            match printer.state() {
                SessionState::Error => {
                    if let Some(message) = printer.last_error() {
                        eprintln!("[Main] session error: {}", message);
                    }
                    std::process::exit(1);
                }
                SessionState::Idle => return,
                _ => {}
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    });

    println!("[Main] press Enter to stop");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    session.stop();
    std::thread::sleep(Duration::from_millis(200));
}
