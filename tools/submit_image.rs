//! Submit Image Tool
//!
//! Publishes one prediction request to NATS and prints the session updates
//! the pipeline sends back for that user.
//!
//! Usage: submit_image <image url or path> [user_id] [nats_url] [request_subject] [session_prefix]

use food_recognition_pipeline::producer::session_subject;
use food_recognition_pipeline::types::{
    request::{ImageSource, PredictionRequest},
    session::PredictionSession,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Give up waiting for a terminal update after this long
const WAIT_TIMEOUT: Duration = Duration::from_secs(120);

fn image_source(arg: &str) -> ImageSource {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        ImageSource::Url(arg.to_string())
    } else {
        let path = PathBuf::from(arg);
        // The service reads the file itself, so hand it an absolute path
        ImageSource::Path(std::fs::canonicalize(&path).unwrap_or(path))
    }
}

/// Track the highest request sequence seen for the user; updates from a
/// lower sequence belong to a superseded request.
fn is_newest(newest: &mut u64, session: &PredictionSession) -> bool {
    if session.sequence < *newest {
        return false;
    }
    *newest = session.sequence;
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("submit_image=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let Some(image) = args.get(1) else {
        anyhow::bail!(
            "usage: submit_image <image url or path> [user_id] [nats_url] [request_subject] [session_prefix]"
        );
    };
    let user_id = args.get(2).map(|s| s.as_str()).unwrap_or("demo_user");
    let nats_url = args.get(3).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(4).map(|s| s.as_str()).unwrap_or("food.predict");
    let prefix = args.get(5).map(|s| s.as_str()).unwrap_or("food.sessions");

    let request = PredictionRequest::new(user_id, image_source(image));
    let updates_subject = session_subject(prefix, user_id);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        updates = %updates_subject,
        "Configuration loaded"
    );

    let client = async_nats::connect(nats_url).await?;
    info!("Connected to NATS");

    // Subscribe before publishing so no update is missed
    let mut updates = client.subscribe(updates_subject).await?;

    let payload = serde_json::to_vec(&request)?;
    client.publish(subject.to_string(), payload.into()).await?;
    client.flush().await?;
    info!(user_id = %user_id, "Prediction request published");

    let wait = async {
        let mut newest = 0;
        while let Some(message) = updates.next().await {
            let session: PredictionSession = match serde_json::from_slice(&message.payload) {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed session update");
                    continue;
                }
            };

            if !is_newest(&mut newest, &session) {
                info!(
                    sequence = session.sequence,
                    newest = newest,
                    "Ignoring update from an older request"
                );
                continue;
            }

            info!(
                sequence = session.sequence,
                status = session.status.as_str(),
                "Session update"
            );

            if session.status.is_terminal() {
                return Some(session);
            }
        }
        None
    };

    let Ok(Some(session)) = tokio::time::timeout(WAIT_TIMEOUT, wait).await else {
        anyhow::bail!("No final session update within {}s", WAIT_TIMEOUT.as_secs());
    };

    println!("{}", session.display_text().unwrap_or_default());
    if let Some(classification) = &session.classification {
        println!(
            "  top label: {} ({:.1}% confidence)",
            classification.label,
            classification.confidence * 100.0
        );
    }
    if let Some(nutrition) = &session.nutrition {
        println!(
            "  {:.0} kcal per {:.0} g | protein {:.1} g | carbs {:.1} g | fat {:.1} g",
            nutrition.calories,
            nutrition.serving_weight_grams,
            nutrition.protein_grams,
            nutrition.carbs_grams,
            nutrition.fat_grams
        );
        if let Some(sugars) = nutrition.sugars_grams {
            println!("  sugars {:.1} g", sugars);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use food_recognition_pipeline::types::session::SessionStatus;

    fn update(sequence: u64, status: SessionStatus) -> PredictionSession {
        let mut session = PredictionSession::new("demo_user", sequence);
        session.transition(status);
        session
    }

    #[test]
    fn test_older_terminal_update_ignored() {
        let mut newest = 0;
        assert!(is_newest(&mut newest, &update(4, SessionStatus::Preprocessing)));
        assert!(!is_newest(&mut newest, &update(3, SessionStatus::Succeeded)));
        assert!(is_newest(&mut newest, &update(4, SessionStatus::Succeeded)));
        assert_eq!(newest, 4);
    }
}
