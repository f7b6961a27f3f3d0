use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Token validity in hours
    #[arg(long, default_value_t = 1.0)]
    hours: f64,

    /// User id placed in the `sub` claim
    #[arg(long, default_value = "test-user-id")]
    user: String,

    /// Optional device id claim
    #[arg(long)]
    device_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    iat: i64,
    exp: i64,
}

fn load_secret() -> Result<String> {
    // Try environment first
    if let Ok(secret) = env::var("VOICELINK_AUTH_SECRET") {
        return Ok(secret);
    }

    // Try .env file using dotenvy
    if dotenvy::dotenv().is_ok() {
        if let Ok(secret) = env::var("VOICELINK_AUTH_SECRET") {
            return Ok(secret);
        }
    }

    anyhow::bail!("VOICELINK_AUTH_SECRET not found in environment or .env file")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let secret = load_secret().context("Failed to load VOICELINK_AUTH_SECRET")?;

    let now = Utc::now();
    let duration_secs = (cli.hours * 3600.0) as i64;
    let exp = now + Duration::seconds(duration_secs);

    let claims = Claims {
        sub: cli.user,
        device_id: cli.device_id,
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    println!("Generated test JWT token:");
    println!();
    println!("{}", token);
    println!();
    println!("Valid until: {}", exp.to_rfc3339());

    Ok(())
}
