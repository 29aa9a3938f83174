//! Quiz Battle Server
//!
//! Binary entry point: loads configuration from the environment, wires up
//! the store, and runs the websocket server until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use quiz_battle::network::auth::{AuthConfig, TokenClaims};
use quiz_battle::store::QuestionRecord;
use quiz_battle::{GameServer, MemoryStore, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let auth = AuthConfig::from_env();

    info!("Quiz Battle Server v{}", VERSION);
    info!(
        addr = %config.bind_addr,
        path = %config.endpoint_path,
        questions = config.total_questions,
        question_time_secs = config.question_time_secs,
        "configuration loaded"
    );

    if !auth.is_configured() {
        warn!("no AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; every auth attempt will be rejected");
    }

    // swap in a relational Store implementation here for production; the
    // in-memory store starts empty, so optionally seed demo data
    let store = Arc::new(MemoryStore::new());
    let seed_demo = std::env::var("QUIZ_SEED_DEMO")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    if seed_demo {
        seed_demo_data(&store).await;
    }

    let server = GameServer::new(config, auth, store);

    tokio::select! {
        result = server.run() => result.context("server terminated")?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}

/// Seed two demo accounts and a tiny question bank so a fresh build can be
/// played against with tokens whose subjects are `demo-alice` / `demo-bob`.
async fn seed_demo_data(store: &MemoryStore) {
    for sub in ["demo-alice", "demo-bob"] {
        let claims = TokenClaims {
            sub: sub.into(),
            exp: 0,
            iat: 0,
            iss: None,
            aud: None,
            name: None,
        };
        let user_id = claims.user_id();
        store.seed_user(user_id, sub).await;
        info!(%user_id, subject = sub, "seeded demo user");
    }

    let bank = [
        ("Which planet is known as the Red Planet?", ["Venus", "Mars", "Jupiter", "Mercury"], 1),
        ("What is the capital of Japan?", ["Osaka", "Kyoto", "Tokyo", "Nagoya"], 2),
        ("How many sides does a hexagon have?", ["five", "six", "seven", "eight"], 1),
        ("Which gas do plants absorb?", ["Oxygen", "Nitrogen", "Carbon dioxide", "Helium"], 2),
        ("What is 12 * 12?", ["124", "144", "148", "164"], 1),
        ("Which ocean is the largest?", ["Atlantic", "Indian", "Arctic", "Pacific"], 3),
        ("Who painted the Mona Lisa?", ["Raphael", "Da Vinci", "Monet", "Vermeer"], 1),
        ("What is the chemical symbol for gold?", ["Ag", "Au", "Gd", "Go"], 1),
    ];
    for (text, choices, correct_index) in bank {
        store
            .seed_question(QuestionRecord {
                id: Uuid::new_v4(),
                text: text.into(),
                choices: choices.iter().map(|c| c.to_string()).collect(),
                correct_index,
                difficulty: "easy".into(),
                category: "all".into(),
            })
            .await;
    }
    info!("seeded demo question bank");
}
